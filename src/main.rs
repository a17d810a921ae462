use anyhow::Result;
use clap::Parser;
use word_doc_corrector::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "word_doc_corrector=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    cli.run().await
}
