//! # Verification Pipeline
//!
//! **Component:** 03
//!
//! ## Purpose
//!
//! Verifies signed safety messages either inline or through a bounded
//! window of in-flight asynchronous requests, and applies the results:
//! LDM update, flood accounting, congestion feed, misbehavior check and
//! latency audit.
//!
//! ## Invariants
//!
//! | Invariant | Enforced by |
//! |-----------|-------------|
//! | Every slot is in exactly one phase; the phase counts sum to N | `Window::phase_counts` |
//! | A slot reaches `PpDone` at most once per generation | `AsyncSlot::claim` |
//! | A callback for a reused slot has no effect | generation check in `AsyncSlot::complete` |
//! | A `VerifDone` slot is never overwritten | `AsyncVerificationPipeline::submit` |
//! | Post-processing never runs under the window lock | `pipeline::process` |
//!
//! ## Module Structure
//!
//! ```text
//! domain/            - slots, requests, config, counters
//! pipeline.rs        - AsyncVerificationPipeline, VerificationTicket, consumer
//! post_process.rs    - side effects of a completed verification
//! service.rs         - VerificationService: sync / async dispatch
//! ports/             - SecurityVerifier, CongestionFeed, VerificationApi
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod domain;
pub mod pipeline;
pub mod ports;
pub mod post_process;
pub mod service;

#[cfg(test)]
mod test_support;

pub use domain::{
    PhaseCounts, PipelineConfig, PipelineError, PipelineStats, PipelineStatsSnapshot, Processed,
    SlotPhase, Verdict, VerificationRequest,
};
pub use pipeline::{AsyncVerificationPipeline, SubmitHandle, VerificationTicket};
pub use ports::{CongestionFeed, SecurityVerifier, VerificationApi};
pub use post_process::PostProcessor;
pub use service::{verification_priority, Ingested, VerificationMode, VerificationService};
