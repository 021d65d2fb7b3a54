//! 🧵 Workers: the ones who actually do the work while the Supervisor takes
//! all the credit in the sprint retro.
//!
//! ⚠️ "If you're reading this, the code review went poorly."

use anyhow::Result;
use tokio::task::JoinHandle;

mod indexer_worker;
mod reference_reader;

pub(crate) use indexer_worker::IndexerWorker;
pub(crate) use reference_reader::ReferenceReaderWorker;

/// 🏗️ A background worker, that does work. duh.
///
/// Starting one hands back a `JoinHandle`. What comes out of it when the work is
/// done depends on the worker.
pub(crate) trait Worker {
    type Output: Send + 'static;

    fn start(self) -> JoinHandle<Result<Self::Output>>;
}

/// 📜 One non-blank line of a reference dump, and how many bytes it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReferenceLine {
    pub(crate) text: String,
    pub(crate) bytes: u64,
}
