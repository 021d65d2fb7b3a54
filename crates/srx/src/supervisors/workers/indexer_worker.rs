//! 🎬 *[a channel fills with reference lines. somewhere, an indexer waits.]*
//! *[the clock on the wall reads 2:47am.]*
//!
//! 🗑️ The IndexerWorker drains the channel into a [`BulkIndexer`]. Lines that
//! don't parse are set aside, everything else is processed. When the channel
//! closes it flushes one last time and reports.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_channel::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{ReferenceLine, Worker};
use crate::document_reference::DocumentReference;
use crate::indexer::BulkIndexer;
use crate::progress::ProgressMetrics;
use crate::supervisors::IndexingSummary;

#[derive(Debug)]
pub(crate) struct IndexerWorker {
    rx: Receiver<ReferenceLine>,
    indexer: BulkIndexer,
    progress: ProgressMetrics,
}

impl IndexerWorker {
    pub(crate) fn new(rx: Receiver<ReferenceLine>, indexer: BulkIndexer, progress: ProgressMetrics) -> Self {
        Self { rx, indexer, progress }
    }

    fn sync_failures(&mut self) {
        let total = self.indexer.failures().len() as u64;
        self.progress.record_failures(total.saturating_sub(self.progress.failed()));
    }
}

impl Worker for IndexerWorker {
    type Output = IndexingSummary;

    fn start(mut self) -> JoinHandle<Result<IndexingSummary>> {
        tokio::spawn(async move {
            debug!("📥 IndexerWorker started draining channel...");
            let mut summary = IndexingSummary::default();

            while let Ok(line) = self.rx.recv().await {
                match DocumentReference::deserialize(&line.text) {
                    Ok(reference) => {
                        self.indexer
                            .process(&reference)
                            .await
                            .with_context(|| format!("💀 IndexerWorker failed on '{reference}'"))?;
                        summary.processed += 1;
                    }
                    Err(err) => {
                        warn!(line = %line.text, %err, "🧟 not a reference, setting it aside");
                        summary.invalid.push(line.text);
                    }
                }
                self.progress.update(line.bytes, 1);
                self.sync_failures();
            }

            debug!("🏁 IndexerWorker: channel closed, final flush.");
            let last_failures = self.indexer.flush().await;
            debug!(failed = last_failures.len(), "🚽 final flush done");
            self.sync_failures();
            self.progress.finish();

            // a reference that failed in two flushes is requeued once
            let mut seen = HashSet::new();
            summary.failed = self
                .indexer
                .failures()
                .iter()
                .filter(|reference| seen.insert(*reference))
                .cloned()
                .collect();
            Ok(summary)
        })
    }
}
