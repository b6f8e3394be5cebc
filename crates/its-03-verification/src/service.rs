//! # Verification Service
//!
//! Application service implementing [`VerificationApi`]. Chooses between
//! inline verification on the receive thread and the async window.
//!
//! | Mode | Verification | Post-processing |
//! |------|--------------|-----------------|
//! | `Sync` | `verify_sync` on the caller | inline, before `ingest` returns |
//! | `Async` | `verify_async` via [`AsyncVerificationPipeline`] | consumer task |

use crate::domain::{
    PipelineError, PipelineStatsSnapshot, Processed, Verdict, VerificationRequest,
};
use crate::pipeline::{AsyncVerificationPipeline, SubmitHandle};
use crate::ports::{SecurityVerifier, VerificationApi};
use crate::post_process::PostProcessor;
use serde::{Deserialize, Serialize};
use shared_types::entities::SafetyMessage;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VerificationMode {
    Sync,
    #[default]
    Async,
}

/// Result of [`VerificationApi::ingest`].
#[derive(Debug)]
pub enum Ingested {
    /// Verified and post-processed inline.
    Completed(Processed),
    /// Queued in the async window.
    Submitted(SubmitHandle),
}

/// Priority handed to the security collaborator: beacons first.
#[must_use]
pub fn verification_priority(message: &SafetyMessage) -> u8 {
    if message.is_bsm() {
        2
    } else {
        1
    }
}

pub struct VerificationService {
    mode: VerificationMode,
    pipeline: Arc<AsyncVerificationPipeline>,
    post: Arc<PostProcessor>,
    verifier: Arc<dyn SecurityVerifier>,
}

impl VerificationService {
    pub fn new(
        mode: VerificationMode,
        pipeline: Arc<AsyncVerificationPipeline>,
        post: Arc<PostProcessor>,
        verifier: Arc<dyn SecurityVerifier>,
    ) -> Self {
        Self {
            mode,
            pipeline,
            post,
            verifier,
        }
    }

    #[must_use]
    pub fn mode(&self) -> VerificationMode {
        self.mode
    }

    #[must_use]
    pub fn pipeline(&self) -> &Arc<AsyncVerificationPipeline> {
        &self.pipeline
    }

    fn verify_inline(&self, message: &SafetyMessage) -> Processed {
        let started = Instant::now();
        let verdict = match self.verifier.verify_sync(message) {
            Ok(ok) => Verdict::from(ok),
            Err(e) => {
                warn!(source = message.source, error = %e, "Inline verification failed");
                Verdict::Rejected
            }
        };
        self.post.process(
            &VerificationRequest::from(message),
            verdict,
            started.elapsed(),
        )
    }
}

impl VerificationApi for VerificationService {
    fn ingest(&self, message: &SafetyMessage) -> Result<Ingested, PipelineError> {
        match self.mode {
            VerificationMode::Sync => Ok(Ingested::Completed(self.verify_inline(message))),
            VerificationMode::Async => {
                match self
                    .pipeline
                    .submit(message, verification_priority(message))
                {
                    Ok(handle) => Ok(Ingested::Submitted(handle)),
                    Err(e @ PipelineError::SlotAwaitingConsumption { .. }) => {
                        // Dropped messages still count toward the sender's rate.
                        self.post.flow_filter().on_message(message.source);
                        Err(e)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn stats(&self) -> PipelineStatsSnapshot {
        self.pipeline.stats()
    }
}
