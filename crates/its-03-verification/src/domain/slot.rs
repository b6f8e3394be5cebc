//! Window slots.

use super::request::{Processed, Verdict, VerificationRequest};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Lifecycle of one window slot.
///
/// ```text
/// FREE ──submit──→ AWAITING_CALLBACK ──callback──→ VERIF_DONE ──consumer──→ PP_DONE ──→ FREE
///                    │          ↑
///                    └──wrap────┘  (overwrite, older generation discarded)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SlotPhase {
    #[default]
    Free,
    AwaitingCallback,
    VerifDone,
    PpDone,
}

/// One in-flight verification.
#[derive(Debug, Default)]
pub struct AsyncSlot {
    pub phase: SlotPhase,
    /// Bumped on every submission; callbacks from an older generation are
    /// discarded.
    pub generation: u64,
    pub request: Option<VerificationRequest>,
    pub verdict: Option<Verdict>,
    pub submitted_at: Option<Instant>,
    pub latency: Duration,
    pub(crate) notify: Option<oneshot::Sender<Processed>>,
}

/// What the consumer takes out of a slot when it claims it.
#[derive(Debug)]
pub(crate) struct Claimed {
    pub request: VerificationRequest,
    pub verdict: Verdict,
    pub latency: Duration,
    pub notify: Option<oneshot::Sender<Processed>>,
}

impl AsyncSlot {
    /// Loads a new request, returning its generation.
    ///
    /// Dropping the previous notifier tells an overwritten submitter that
    /// its result was discarded.
    pub(crate) fn arm(
        &mut self,
        request: VerificationRequest,
        notify: oneshot::Sender<Processed>,
    ) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.phase = SlotPhase::AwaitingCallback;
        self.request = Some(request);
        self.verdict = None;
        self.submitted_at = Some(Instant::now());
        self.latency = Duration::ZERO;
        self.notify = Some(notify);
        self.generation
    }

    /// Records a callback. Returns false for a stale generation or a slot
    /// that is no longer awaiting.
    pub(crate) fn complete(&mut self, generation: u64, verdict: Verdict) -> bool {
        if self.generation != generation || self.phase != SlotPhase::AwaitingCallback {
            return false;
        }
        self.phase = SlotPhase::VerifDone;
        self.verdict = Some(verdict);
        self.latency = self
            .submitted_at
            .map(|t| t.elapsed())
            .unwrap_or_default();
        true
    }

    /// Moves a finished slot of `generation` to `PpDone` and hands over its
    /// contents.
    pub(crate) fn claim(&mut self, generation: u64) -> Option<Claimed> {
        if self.generation != generation || self.phase != SlotPhase::VerifDone {
            return None;
        }
        let request = self.request.take()?;
        self.phase = SlotPhase::PpDone;
        Some(Claimed {
            request,
            verdict: self.verdict.take().unwrap_or(Verdict::Rejected),
            latency: self.latency,
            notify: self.notify.take(),
        })
    }

    /// Returns a post-processed slot of `generation` to the pool.
    pub(crate) fn release(&mut self, generation: u64) {
        if self.generation == generation && self.phase == SlotPhase::PpDone {
            self.phase = SlotPhase::Free;
            self.submitted_at = None;
        }
    }
}

/// Number of slots in each phase. The four always sum to the window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PhaseCounts {
    pub free: usize,
    pub awaiting: usize,
    pub verif_done: usize,
    pub pp_done: usize,
}

impl PhaseCounts {
    #[must_use]
    pub fn total(&self) -> usize {
        self.free + self.awaiting + self.verif_done + self.pp_done
    }
}
