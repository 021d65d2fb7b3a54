//! 🎬 *[a reference dump sits on disk. four million lines. some of them gzipped.]*
//!
//! 📖 The ReferenceReaderWorker reads a dump line by line and feeds the channel.
//! It reads on the blocking pool, so a slow disk never stalls the runtime, and it
//! sniffs the gzip magic instead of trusting file extensions.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_channel::Sender;
use flate2::bufread::GzDecoder;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{ReferenceLine, Worker};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug)]
pub(crate) struct ReferenceReaderWorker {
    path: PathBuf,
    tx: Sender<ReferenceLine>,
}

impl ReferenceReaderWorker {
    pub(crate) fn new(path: PathBuf, tx: Sender<ReferenceLine>) -> Self {
        Self { path, tx }
    }

    fn open(&self) -> Result<Box<dyn BufRead + Send>> {
        let file = File::open(&self.path)
            .with_context(|| format!("💀 The refs file '{}' would not open.", self.path.display()))?;
        let mut reader = BufReader::new(file);
        let gzipped = reader
            .fill_buf()
            .context("💀 Could not peek at the first bytes of the refs file.")?
            .starts_with(&GZIP_MAGIC);
        if gzipped {
            debug!(path = %self.path.display(), "🫁 gzip magic found, decompressing on the fly");
            Ok(Box::new(BufReader::new(GzDecoder::new(reader))))
        } else {
            Ok(Box::new(reader))
        }
    }

    /// Returns how many lines were sent. The sender drops with `self`, closing the channel.
    fn read_all(self) -> Result<u64> {
        let reader = self.open()?;
        let mut sent = 0u64;
        for (line_number, line) in reader.lines().enumerate() {
            let line = line.with_context(|| {
                format!("💀 Line {} of '{}' could not be read.", line_number + 1, self.path.display())
            })?;
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            let reference = ReferenceLine {
                text: text.to_string(),
                bytes: line.len() as u64 + 1,
            };
            if self.tx.send_blocking(reference).is_err() {
                warn!(sent, "📪 nobody is listening anymore, the reader stops here");
                break;
            }
            sent += 1;
        }
        debug!(sent, "📖 reference reader reached the end of the dump");
        Ok(sent)
    }
}

impl Worker for ReferenceReaderWorker {
    type Output = u64;

    fn start(self) -> JoinHandle<Result<u64>> {
        tokio::task::spawn_blocking(move || self.read_all())
    }
}
