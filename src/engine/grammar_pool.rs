// ============================================================
// Layer 5 — Grammar Worker Pool
// ============================================================
// Grammar checking is CPU-bound (or blocks on a child process),
// so it must never run on the async scheduler's threads. Each
// check is handed to a dedicated rayon pool and the result comes
// back over a oneshot channel that the chunk task awaits.
//
//   chunk task ──spawn──► rayon worker ──provider.check()──┐
//        ▲                                                 │
//        └──────────── oneshot (with timeout) ◄────────────┘
//
// Pool size defaults to available cores minus one (at least 1),
// which leaves a core for the async runtime.
//
// A timed-out check keeps its worker until the provider returns,
// so providers must bound their own work: CommandGrammar kills
// its child at the same deadline, freeing the worker for the next
// check.
//
// Reference: rayon docs (ThreadPoolBuilder)
//            tokio docs (sync::oneshot, time::timeout)

use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};
use tokio::sync::oneshot;

use crate::domain::traits::{GrammarProvider, ProviderOutcome};

/// Cores minus one, never less than one.
pub fn default_workers() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

pub struct GrammarPool {
    pool:     rayon::ThreadPool,
    provider: Arc<dyn GrammarProvider>,
    timeout:  Duration,
}

impl GrammarPool {
    pub fn new(provider: Arc<dyn GrammarProvider>, workers: usize, timeout: Duration) -> Result<Self> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("grammar-{i}"))
            .panic_handler(|_| tracing::warn!("Grammar worker panicked; the check counts as failed"))
            .build()
            .context("Failed to build grammar worker pool")?;

        tracing::debug!(workers, provider = provider.name(), "Grammar pool ready");
        Ok(Self { pool, provider, timeout })
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run one grammar check on the pool and wait for it, up to
    /// the configured timeout.
    pub async fn check(&self, text: &str) -> ProviderOutcome {
        let (tx, rx) = oneshot::channel();
        let provider = Arc::clone(&self.provider);
        let text     = text.to_string();

        self.pool.spawn(move || {
            // The receiver may already be gone after a timeout
            let _ = tx.send(provider.check(&text));
        });

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without sending: the worker panicked
            Ok(Err(_)) => ProviderOutcome::Failed("grammar worker stopped before answering".into()),
            Err(_)     => ProviderOutcome::TimedOut,
        }
    }
}
