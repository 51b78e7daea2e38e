//! Learning compressor
//!
//! Once enough rejections pile up, their reasons are condensed into a short
//! learnings text and the raw rejections are dropped. A failed summarization
//! leaves the history exactly as it was.

use tracing::{info, warn};

use super::HistoryDocument;
use crate::agent::evaluator::IdeaModel;

/// Compressor lifecycle within a single cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressorState {
    Idle,
    Compressing,
}

/// What a compression attempt did to the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressionOutcome {
    /// Below the threshold, nothing attempted
    NotNeeded,
    /// Learnings replaced, `summarized` rejections dropped
    Compressed { summarized: usize },
    /// Summarizer failed; document untouched
    Failed(String),
}

impl CompressionOutcome {
    pub fn is_compressed(&self) -> bool {
        matches!(self, CompressionOutcome::Compressed { .. })
    }
}

/// Holds the compressor in `Compressing` until dropped, including when the
/// enclosing future is cancelled mid-summarization
struct CompressingGuard<'a>(&'a mut CompressorState);

impl<'a> CompressingGuard<'a> {
    fn enter(state: &'a mut CompressorState) -> Self {
        *state = CompressorState::Compressing;
        Self(state)
    }
}

impl Drop for CompressingGuard<'_> {
    fn drop(&mut self) {
        *self.0 = CompressorState::Idle;
    }
}

pub struct LearningCompressor {
    threshold: usize,
    state: CompressorState,
}

impl LearningCompressor {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            state: CompressorState::Idle,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn state(&self) -> CompressorState {
        self.state
    }

    pub fn should_compress(&self, doc: &HistoryDocument) -> bool {
        doc.rejected_ideas.len() >= self.threshold
    }

    /// Summarize and drop the accumulated rejections if the threshold is reached.
    ///
    /// On success the learnings are replaced, not appended to; the summarizer
    /// receives the prior learnings so it can fold them in.
    pub async fn maybe_compress(
        &mut self,
        doc: &mut HistoryDocument,
        model: &dyn IdeaModel,
    ) -> CompressionOutcome {
        if !self.should_compress(doc) {
            return CompressionOutcome::NotNeeded;
        }

        let pending = doc.rejected_ideas.len();
        info!("Compressing {} rejected ideas into learnings", pending);
        let result = {
            let _guard = CompressingGuard::enter(&mut self.state);
            model
                .summarize(&doc.rejected_ideas, &doc.compressed_learnings)
                .await
        };

        match result {
            Ok(summary) if !summary.trim().is_empty() => {
                doc.compressed_learnings = summary.trim().to_string();
                doc.rejected_ideas.clear();
                info!(
                    "Learnings updated ({} chars), {} rejections summarized",
                    doc.compressed_learnings.chars().count(),
                    pending
                );
                CompressionOutcome::Compressed { summarized: pending }
            }
            Ok(_) => {
                warn!("Summarizer returned nothing; keeping {} rejections", pending);
                CompressionOutcome::Failed("empty summary".to_string())
            }
            Err(e) => {
                warn!("Learning compression failed: {:#}; keeping {} rejections", e, pending);
                CompressionOutcome::Failed(e.to_string())
            }
        }
    }
}
