// ============================================================
// Layer 6 — Out-of-Process Providers
// ============================================================
// Concrete GrammarProvider and LanguageModel implementations.
//
//   CommandGrammar        text on stdin → corrected text on stdout.
//                         Blocking; runs on the grammar pool. Pipes
//                         are serviced on helper threads and the
//                         child is killed at its deadline.
//   CommandLanguageModel  JSON array of texts on stdin → JSON array
//                         of corrected texts on stdout. Async, with
//                         its own per-call timeout and retries.
//   PassThrough*          return their input; used when nothing is
//                         configured, so the pipeline shape never
//                         changes.
//
// Retry schedule for the language model (base = 500 ms):
//   attempt 1 fails → wait ~500 ms  (+ up to 50% jitter)
//   attempt 2 fails → wait ~1000 ms
//   attempt 3 fails → give up, report the last failure
//
// Whatever a command prints, the pipeline only ever sees a
// ProviderOutcome / BatchOutcome.
//
// Reference: tokio docs (process::Command, time::timeout)
//            Rust Book §9 (Error Handling)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rand::Rng;
use std::{
    io::{self, Read, Write},
    process::{Command, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tokio::io::AsyncWriteExt;

use crate::domain::traits::{BatchOutcome, GrammarProvider, LanguageModel, ProviderOutcome};

// ─── Pass-through ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughGrammar;

impl GrammarProvider for PassThroughGrammar {
    fn name(&self) -> &str {
        "pass-through"
    }

    fn check(&self, text: &str) -> ProviderOutcome {
        ProviderOutcome::Corrected(text.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughLanguageModel;

#[async_trait]
impl LanguageModel for PassThroughLanguageModel {
    fn name(&self) -> &str {
        "pass-through"
    }

    async fn correct_batch(&self, texts: &[String]) -> BatchOutcome {
        BatchOutcome::Corrected(texts.to_vec())
    }
}

// ─── CommandGrammar ───────────────────────────────────────────────────────────
/// How often a running grammar command is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct CommandGrammar {
    argv:    Vec<String>,
    timeout: Duration,
}

/// How a grammar command run ended.
enum Finished {
    Output(String),
    TimedOut,
}

impl CommandGrammar {
    /// `timeout` bounds one check; a command still running after it
    /// is killed, so the worker that ran it is free again.
    pub fn new(argv: Vec<String>, timeout: Duration) -> Result<Self> {
        if argv.is_empty() {
            bail!("Grammar command is empty");
        }
        Ok(Self { argv, timeout })
    }

    fn run(&self, text: &str) -> Result<Finished> {
        let mut child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Cannot start grammar command '{}'", self.argv[0]))?;

        // Feed stdin and drain stdout/stderr on their own threads, so
        // a child that writes before it has read everything never
        // blocks against us on a full pipe.
        let input  = text.to_string();
        let stdin  = child.stdin.take();
        let writer = thread::spawn(move || -> io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(input.as_bytes())?;
            }
            Ok(())
        });
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let started = Instant::now();
        let status = loop {
            match child.try_wait().context("Cannot poll grammar command")? {
                Some(status) => break status,
                None if started.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(command = %self.argv[0], timeout_ms = self.timeout.as_millis() as u64, "Grammar command killed after timeout");
                    // Pipe threads end on their own once the pipes close
                    return Ok(Finished::TimedOut);
                }
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        let written = writer.join().map_err(|_| anyhow::anyhow!("stdin writer panicked"))?;
        let out     = join_pipe(stdout)?;
        let err     = join_pipe(stderr)?;

        if !status.success() {
            bail!("exit {}: {}", status, String::from_utf8_lossy(&err).trim());
        }
        // A child may legitimately exit without reading all of stdin
        if let Err(e) = written {
            if e.kind() != io::ErrorKind::BrokenPipe {
                return Err(e).context("Cannot write to grammar command");
            }
        }
        let out = String::from_utf8(out).context("Grammar command printed invalid UTF-8")?;
        Ok(Finished::Output(strip_added_newline(text, out)))
    }
}

impl GrammarProvider for CommandGrammar {
    fn name(&self) -> &str {
        &self.argv[0]
    }

    fn check(&self, text: &str) -> ProviderOutcome {
        match self.run(text) {
            Ok(Finished::Output(out)) => ProviderOutcome::Corrected(out),
            Ok(Finished::TimedOut)    => ProviderOutcome::TimedOut,
            Err(e)                    => ProviderOutcome::Failed(format!("{e:#}")),
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn join_pipe(handle: JoinHandle<io::Result<Vec<u8>>>) -> Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| anyhow::anyhow!("pipe reader panicked"))?
        .context("Cannot read grammar command output")
}

/// Most tools end their output with a newline the input never had.
fn strip_added_newline(input: &str, mut output: String) -> String {
    if !input.ends_with('\n') && output.ends_with('\n') {
        output.pop();
        if output.ends_with('\r') {
            output.pop();
        }
    }
    output
}

// ─── CommandLanguageModel ─────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    /// Wait before attempt `attempt + 1`: exponential plus jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp    = self.backoff_base.saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let jitter = rand::thread_rng().gen_range(0..=self.backoff_base.as_millis() as u64 / 2);
        exp + Duration::from_millis(jitter)
    }
}

pub struct CommandLanguageModel {
    argv:    Vec<String>,
    timeout: Duration,
    retry:   RetryPolicy,
}

impl CommandLanguageModel {
    pub fn new(argv: Vec<String>, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        if argv.is_empty() {
            bail!("Language model command is empty");
        }
        Ok(Self { argv, timeout, retry })
    }

    async fn call_once(&self, texts: &[String]) -> Result<Vec<String>> {
        let request = serde_json::to_vec(texts)?;

        let mut child = tokio::process::Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Cannot start language model command '{}'", self.argv[0]))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&request).await.context("Cannot write to language model command")?;
        }
        let output = child.wait_with_output().await.context("Language model command did not finish")?;

        if !output.status.success() {
            bail!("exit {}: {}", output.status, String::from_utf8_lossy(&output.stderr).trim());
        }
        serde_json::from_slice(&output.stdout).context("Language model reply is not a JSON array of strings")
    }
}

#[async_trait]
impl LanguageModel for CommandLanguageModel {
    fn name(&self) -> &str {
        &self.argv[0]
    }

    async fn correct_batch(&self, texts: &[String]) -> BatchOutcome {
        let attempts = self.retry.max_attempts.max(1);
        let mut last = BatchOutcome::Failed("not attempted".into());

        for attempt in 1..=attempts {
            last = match tokio::time::timeout(self.timeout, self.call_once(texts)).await {
                Ok(Ok(out)) => return BatchOutcome::Corrected(out),
                Ok(Err(e))  => BatchOutcome::Failed(format!("{e:#}")),
                Err(_)      => BatchOutcome::TimedOut,
            };

            if attempt < attempts {
                let wait = self.retry.delay(attempt);
                tracing::warn!(attempt, wait_ms = wait.as_millis() as u64, outcome = ?last, "Language model call failed; retrying");
                tokio::time::sleep(wait).await;
            }
        }
        last
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::engine::grammar_pool::GrammarPool;
    use std::sync::Arc;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn quick_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy { max_attempts, backoff_base: Duration::from_millis(1) }
    }

    #[test]
    fn test_command_grammar_pipes_text() {
        let g = CommandGrammar::new(argv(&["tr", "a-z", "A-Z"]), Duration::from_secs(5)).unwrap();
        assert_eq!(g.check("ciao mondo"), ProviderOutcome::Corrected("CIAO MONDO".into()));
    }

    #[test]
    fn test_command_grammar_failure_is_reported() {
        let g = CommandGrammar::new(argv(&["sh", "-c", "echo boom >&2; exit 3"]), Duration::from_secs(5)).unwrap();
        match g.check("x") {
            ProviderOutcome::Failed(reason) => assert!(reason.contains("boom")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_empty_commands_are_rejected() {
        assert!(CommandGrammar::new(Vec::new(), Duration::from_secs(1)).is_err());
        assert!(CommandLanguageModel::new(Vec::new(), Duration::from_secs(1), quick_retry(1)).is_err());
    }

    #[test]
    fn test_command_grammar_handles_text_larger_than_a_pipe() {
        let g    = CommandGrammar::new(argv(&["cat"]), Duration::from_secs(10)).unwrap();
        let text = "parola ".repeat(40_000);
        assert_eq!(g.check(&text), ProviderOutcome::Corrected(text.clone()));
    }

    #[test]
    fn test_command_grammar_is_killed_at_deadline() {
        let g = CommandGrammar::new(argv(&["sleep", "5"]), Duration::from_millis(100)).unwrap();
        let started = Instant::now();
        assert_eq!(g.check("x"), ProviderOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_grammar_worker_recovers_after_timeout() {
        // Long input stalls, short input answers "ok"
        let script = r#"n=$(wc -c); if [ "$n" -gt 1000 ]; then exec sleep 5; fi; echo ok"#;
        let grammar = CommandGrammar::new(argv(&["sh", "-c", script]), Duration::from_millis(500)).unwrap();
        let pool    = GrammarPool::new(Arc::new(grammar), 1, Duration::from_millis(500)).unwrap();

        assert_eq!(pool.check(&"lungo ".repeat(50_000)).await, ProviderOutcome::TimedOut);
        assert_eq!(pool.check("breve testo").await, ProviderOutcome::Corrected("ok".into()));
    }

    #[test]
    fn test_added_newline_is_stripped() {
        assert_eq!(strip_added_newline("a", "a\n".into()), "a");
        assert_eq!(strip_added_newline("a\n", "a\n".into()), "a\n");
    }

    #[tokio::test]
    async fn test_language_model_round_trip() {
        let lm = CommandLanguageModel::new(argv(&["cat"]), Duration::from_secs(5), quick_retry(1)).unwrap();
        let texts = vec!["uno".to_string(), "due \"tre\"".to_string()];
        assert_eq!(lm.correct_batch(&texts).await, BatchOutcome::Corrected(texts.clone()));
    }

    #[tokio::test]
    async fn test_language_model_timeout() {
        let lm = CommandLanguageModel::new(argv(&["sleep", "5"]), Duration::from_millis(100), quick_retry(1)).unwrap();
        assert_eq!(lm.correct_batch(&["x".to_string()]).await, BatchOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_language_model_gives_up_after_retries() {
        let lm = CommandLanguageModel::new(argv(&["sh", "-c", "exit 1"]), Duration::from_secs(5), quick_retry(3)).unwrap();
        assert!(matches!(lm.correct_batch(&["x".to_string()]).await, BatchOutcome::Failed(_)));
    }

    #[test]
    fn test_backoff_grows() {
        let policy = RetryPolicy { max_attempts: 3, backoff_base: Duration::from_millis(100) };
        let first  = policy.delay(1);
        let second = policy.delay(2);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(250));
    }
}
