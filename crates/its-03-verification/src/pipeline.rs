//! # Async Verification Window
//!
//! A fixed window of N slots, a bounded completion log of M entries and a
//! single consumer task.
//!
//! ```text
//!  receive thread                 security callbacks            consumer task
//!  ──────────────                 ──────────────────            ─────────────
//!  submit() ──→ slot[cursor]      ticket.complete()
//!               AWAITING ────────→ VERIF_DONE ──try_send──→ [completion log] ──→ claim → PP_DONE
//!                                                                               post-process
//!                                                                               release → FREE
//! ```
//!
//! The cursor walks down from the top of the window and wraps back to the
//! top when it reaches the low watermark. A slot that is still
//! `AwaitingCallback` when the cursor comes round again is overwritten; its
//! generation is bumped so the late callback is discarded. A slot sitting in
//! `VerifDone` is never overwritten and the new message is dropped instead.
//!
//! When the completion log is full a finished slot is left in `VerifDone`
//! and an overflow flag is raised. Once the consumer has drained the log it
//! scans the window and processes those slots directly.

use crate::domain::slot::Claimed;
use crate::domain::{
    AsyncSlot, PhaseCounts, PipelineConfig, PipelineError, PipelineStats,
    PipelineStatsSnapshot, Processed, SlotPhase, Verdict, VerificationRequest,
};
use crate::post_process::PostProcessor;
use crate::ports::SecurityVerifier;
use parking_lot::Mutex;
use shared_types::entities::{SafetyMessage, SlotIndex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One completion log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Completion {
    slot: SlotIndex,
    generation: u64,
}

struct Window {
    slots: Vec<AsyncSlot>,
    cursor: usize,
    low_watermark: usize,
}

impl Window {
    fn new(size: usize, low_watermark: usize) -> Self {
        Self {
            slots: (0..size).map(|_| AsyncSlot::default()).collect(),
            cursor: size,
            low_watermark,
        }
    }

    /// Index for the next submission. Slots below the watermark are unused.
    fn advance(&mut self) -> SlotIndex {
        if self.cursor <= self.low_watermark {
            self.cursor = self.slots.len();
        }
        self.cursor -= 1;
        self.cursor
    }

    fn phase_counts(&self) -> PhaseCounts {
        let mut counts = PhaseCounts::default();
        for slot in &self.slots {
            match slot.phase {
                SlotPhase::Free => counts.free += 1,
                SlotPhase::AwaitingCallback => counts.awaiting += 1,
                SlotPhase::VerifDone => counts.verif_done += 1,
                SlotPhase::PpDone => counts.pp_done += 1,
            }
        }
        counts
    }
}

/// State reachable from callbacks.
struct Shared {
    window: Mutex<Window>,
    log: mpsc::Sender<Completion>,
    overflowed: AtomicBool,
    stats: Arc<PipelineStats>,
}

impl Shared {
    fn complete(&self, slot: SlotIndex, generation: u64, verdict: Verdict) {
        let mut window = self.window.lock();
        let accepted = window
            .slots
            .get_mut(slot)
            .is_some_and(|s| s.complete(generation, verdict));
        if !accepted {
            PipelineStats::bump(&self.stats.stale_callbacks);
            debug!(slot, generation, "Discarding late verification result");
            return;
        }
        PipelineStats::bump(&self.stats.callbacks);

        // Queued under the window lock so log order matches callback order.
        match self.log.try_send(Completion { slot, generation }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.overflowed.store(true, Ordering::Release);
                PipelineStats::bump(&self.stats.log_overflows);
                warn!(slot, "Completion log full, slot left for compaction");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(slot, "Consumer stopped, completion not queued");
            }
        }
    }

    fn claim(&self, completion: Completion) -> Option<Claimed> {
        self.window
            .lock()
            .slots
            .get_mut(completion.slot)
            .and_then(|s| s.claim(completion.generation))
    }

    fn release(&self, completion: Completion) {
        if let Some(slot) = self.window.lock().slots.get_mut(completion.slot) {
            slot.release(completion.generation);
        }
    }

    fn orphans(&self) -> Vec<Completion> {
        self.window
            .lock()
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.phase == SlotPhase::VerifDone)
            .map(|(slot, s)| Completion {
                slot,
                generation: s.generation,
            })
            .collect()
    }
}

/// Completion capability handed to the security collaborator.
///
/// Completing a ticket whose slot has since been reused is a no-op.
#[must_use = "an uncompleted ticket leaves its slot in flight"]
pub struct VerificationTicket {
    shared: Arc<Shared>,
    slot: SlotIndex,
    generation: u64,
}

impl VerificationTicket {
    #[must_use]
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Delivers the verification result. Safe to call from any thread.
    pub fn complete(self, verified: bool) {
        self.shared
            .complete(self.slot, self.generation, Verdict::from(verified));
    }
}

impl fmt::Debug for VerificationTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationTicket")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Returned by [`AsyncVerificationPipeline::submit`].
#[derive(Debug)]
pub struct SubmitHandle {
    slot: SlotIndex,
    generation: u64,
    outcome: oneshot::Receiver<Processed>,
}

impl SubmitHandle {
    #[must_use]
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Waits for post-processing of this request.
    ///
    /// Resolves to [`PipelineError::Discarded`] if the slot was reused first
    /// or the pipeline stopped.
    pub async fn outcome(self) -> Result<Processed, PipelineError> {
        let slot = self.slot;
        self.outcome
            .await
            .map_err(|_| PipelineError::Discarded { slot })
    }

    /// Non-blocking variant of [`SubmitHandle::outcome`].
    pub fn try_outcome(&mut self) -> Option<Result<Processed, PipelineError>> {
        match self.outcome.try_recv() {
            Ok(processed) => Some(Ok(processed)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(PipelineError::Discarded { slot: self.slot })),
        }
    }
}

struct ConsumerTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// The async verification window and its consumer.
pub struct AsyncVerificationPipeline {
    config: PipelineConfig,
    shared: Arc<Shared>,
    verifier: Arc<dyn SecurityVerifier>,
    post: Arc<PostProcessor>,
    receiver: Mutex<Option<mpsc::Receiver<Completion>>>,
    consumer: Mutex<Option<ConsumerTask>>,
    closed: AtomicBool,
}

impl AsyncVerificationPipeline {
    pub fn new(
        config: PipelineConfig,
        verifier: Arc<dyn SecurityVerifier>,
        post: Arc<PostProcessor>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let (log, receiver) = mpsc::channel(config.completion_log_size);
        let shared = Arc::new(Shared {
            window: Mutex::new(Window::new(config.window_size, config.low_watermark)),
            log,
            overflowed: AtomicBool::new(false),
            stats: Arc::clone(post.stats()),
        });

        Ok(Self {
            config,
            shared,
            verifier,
            post,
            receiver: Mutex::new(Some(receiver)),
            consumer: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Places `message` in the next window slot and starts verification.
    ///
    /// Fails with [`PipelineError::SlotAwaitingConsumption`] when that slot
    /// holds a result the consumer has not taken yet.
    pub fn submit(
        &self,
        message: &SafetyMessage,
        priority: u8,
    ) -> Result<SubmitHandle, PipelineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PipelineError::ShuttingDown);
        }

        let (notify, outcome) = oneshot::channel();
        let (slot, generation) = {
            let mut window = self.shared.window.lock();
            let index = window.advance();
            let slot = &mut window.slots[index];
            match slot.phase {
                SlotPhase::VerifDone => {
                    PipelineStats::bump(&self.shared.stats.dropped_busy);
                    debug!(slot = index, "Next slot awaiting consumption, message dropped");
                    return Err(PipelineError::SlotAwaitingConsumption { slot: index });
                }
                SlotPhase::AwaitingCallback => {
                    PipelineStats::bump(&self.shared.stats.overwritten);
                    debug!(
                        slot = index,
                        generation = slot.generation,
                        "Window wrapped onto an in-flight verification"
                    );
                }
                SlotPhase::Free | SlotPhase::PpDone => {}
            }
            let generation = slot.arm(VerificationRequest::from(message), notify);
            (index, generation)
        };
        PipelineStats::bump(&self.shared.stats.submitted);

        let ticket = VerificationTicket {
            shared: Arc::clone(&self.shared),
            slot,
            generation,
        };
        if let Err(e) = self.verifier.verify_async(message, priority, ticket) {
            PipelineStats::bump(&self.shared.stats.submit_errors);
            warn!(slot, error = %e, "Async verification request refused");
            self.shared.complete(slot, generation, Verdict::Rejected);
        }

        Ok(SubmitHandle {
            slot,
            generation,
            outcome,
        })
    }

    /// Spawns the consumer task. Returns false if it was already started.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let Some(receiver) = self.receiver.lock().take() else {
            return false;
        };
        let (shutdown, stop) = watch::channel(false);
        let consumer = Consumer {
            shared: Arc::clone(&self.shared),
            post: Arc::clone(&self.post),
            receiver,
        };
        let handle = tokio::spawn(consumer.run(stop));
        *self.consumer.lock() = Some(ConsumerTask { shutdown, handle });
        info!(
            window = self.config.window_size,
            log = self.config.completion_log_size,
            "Verification consumer started"
        );
        true
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.consumer
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Processes queued completions on the calling thread.
    ///
    /// Only has an effect while the consumer task is not running.
    pub fn process_pending(&self) -> usize {
        let mut guard = self.receiver.lock();
        let Some(receiver) = guard.as_mut() else {
            return 0;
        };
        drain(&self.shared, &self.post, receiver)
    }

    /// Refuses new submissions and stops the consumer after it drains the
    /// log.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let task = self.consumer.lock().take();
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            if let Err(e) = task.handle.await {
                warn!(error = %e, "Verification consumer ended abnormally");
            }
        }
    }

    #[must_use]
    pub fn window_size(&self) -> usize {
        self.config.window_size
    }

    #[must_use]
    pub fn phase_counts(&self) -> PhaseCounts {
        self.shared.window.lock().phase_counts()
    }

    #[must_use]
    pub fn slot_phase(&self, slot: SlotIndex) -> Option<SlotPhase> {
        self.shared.window.lock().slots.get(slot).map(|s| s.phase)
    }

    /// Verifications currently awaiting a callback.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.phase_counts().awaiting
    }

    #[must_use]
    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Drop for AsyncVerificationPipeline {
    fn drop(&mut self) {
        if let Some(task) = self.consumer.get_mut().take() {
            let _ = task.shutdown.send(true);
        }
    }
}

struct Consumer {
    shared: Arc<Shared>,
    post: Arc<PostProcessor>,
    receiver: mpsc::Receiver<Completion>,
}

impl Consumer {
    async fn run(mut self, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                next = self.receiver.recv() => match next {
                    Some(completion) => {
                        process(&self.shared, &self.post, completion);
                        drain(&self.shared, &self.post, &mut self.receiver);
                    }
                    None => break,
                },
            }
        }

        let remaining = drain(&self.shared, &self.post, &mut self.receiver);
        info!(remaining, "Verification consumer stopped");
    }
}

/// Processes everything already queued, then compacts if the log
/// overflowed meanwhile.
fn drain(
    shared: &Shared,
    post: &PostProcessor,
    receiver: &mut mpsc::Receiver<Completion>,
) -> usize {
    let mut processed = 0;
    while let Ok(completion) = receiver.try_recv() {
        if process(shared, post, completion) {
            processed += 1;
        }
    }
    if shared.overflowed.swap(false, Ordering::AcqRel) {
        processed += compact(shared, post);
    }
    processed
}

fn process(shared: &Shared, post: &PostProcessor, completion: Completion) -> bool {
    let Some(claimed) = shared.claim(completion) else {
        debug!(slot = completion.slot, "Completion no longer current");
        return false;
    };

    let processed = post.process(&claimed.request, claimed.verdict, claimed.latency);
    if let Some(notify) = claimed.notify {
        // The submitter may have stopped waiting.
        let _ = notify.send(processed);
    }
    shared.release(completion);
    true
}

/// Processes finished slots whose log entries were dropped.
fn compact(shared: &Shared, post: &PostProcessor) -> usize {
    let mut recovered = 0;
    for orphan in shared.orphans() {
        if process(shared, post, orphan) {
            PipelineStats::bump(&shared.stats.compaction_recovered);
            recovered += 1;
        }
    }
    if recovered > 0 {
        info!(recovered, "Completion log overflow recovered by compaction");
    }
    recovered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bsm, Harness};
    use std::time::Duration;

    /// Test: a verified beacon is cached and the slot returns to Free
    #[test]
    fn test_submit_complete_process() {
        let h = Harness::new(PipelineConfig::with_window(4));
        let mut handle = h.pipeline.submit(&bsm(1, 10), 2).unwrap();
        assert_eq!(h.pipeline.slot_phase(handle.slot()), Some(SlotPhase::AwaitingCallback));

        h.verifier.complete_next(true);
        assert_eq!(h.pipeline.slot_phase(handle.slot()), Some(SlotPhase::VerifDone));

        assert_eq!(h.pipeline.process_pending(), 1);
        assert_eq!(h.pipeline.slot_phase(handle.slot()), Some(SlotPhase::Free));

        let processed = handle.try_outcome().unwrap().unwrap();
        assert_eq!(processed.verdict, Verdict::Verified);
        assert!(processed.cached_slot.is_some());
        assert!(h.ldm.contains(1));
        assert_eq!(h.flow.record(10).unwrap().total, 1);
    }

    /// Test: the cursor walks down and wraps to the top
    #[test]
    fn test_cursor_walks_down_and_wraps() {
        let mut window = Window::new(4, 0);
        let order: Vec<_> = (0..6).map(|_| window.advance()).collect();
        assert_eq!(order, vec![3, 2, 1, 0, 3, 2]);

        let mut window = Window::new(4, 1);
        let order: Vec<_> = (0..4).map(|_| window.advance()).collect();
        assert_eq!(order, vec![3, 2, 1, 3]);
    }

    /// Test: wraparound overwrites an in-flight slot and discards the late callback
    #[test]
    fn test_wraparound_discards_late_callback() {
        let h = Harness::new(PipelineConfig::with_window(4));
        let mut first = h.pipeline.submit(&bsm(1, 1), 2).unwrap();
        for id in 2..=4 {
            h.pipeline.submit(&bsm(id, id), 2).unwrap();
        }
        let fifth = h.pipeline.submit(&bsm(5, 5), 2).unwrap();
        assert_eq!(fifth.slot(), first.slot());
        assert_eq!(h.pipeline.stats().overwritten, 1);
        assert!(matches!(
            first.try_outcome(),
            Some(Err(PipelineError::Discarded { .. }))
        ));

        // Oldest ticket is the first submission.
        h.verifier.complete_next(true);
        assert_eq!(h.pipeline.stats().stale_callbacks, 1);
        assert_eq!(h.pipeline.slot_phase(fifth.slot()), Some(SlotPhase::AwaitingCallback));
        assert_eq!(h.pipeline.process_pending(), 0);
        assert!(!h.ldm.contains(1));
    }

    /// Test: a slot awaiting consumption is never overwritten
    #[test]
    fn test_verif_done_slot_drops_new_message() {
        let h = Harness::new(PipelineConfig::with_window(2));
        h.pipeline.submit(&bsm(1, 1), 2).unwrap();
        h.pipeline.submit(&bsm(2, 2), 2).unwrap();
        h.verifier.complete_all(true);

        let err = h.pipeline.submit(&bsm(3, 3), 2).unwrap_err();
        assert!(matches!(err, PipelineError::SlotAwaitingConsumption { .. }));
        assert_eq!(h.pipeline.stats().dropped_busy, 1);
        assert_eq!(h.pipeline.phase_counts().verif_done, 2);

        assert_eq!(h.pipeline.process_pending(), 2);
        assert_eq!(h.pipeline.phase_counts().free, 2);
    }

    /// Test: overflowed completions are recovered by compaction
    #[test]
    fn test_log_overflow_compaction() {
        let config = PipelineConfig {
            window_size: 4,
            completion_log_size: 1,
            ..PipelineConfig::default()
        };
        let h = Harness::new(config);
        for id in 1..=3 {
            h.pipeline.submit(&bsm(id, id), 2).unwrap();
        }
        h.verifier.complete_all(true);

        let stats = h.pipeline.stats();
        assert_eq!(stats.callbacks, 3);
        assert_eq!(stats.log_overflows, 2);

        assert_eq!(h.pipeline.process_pending(), 3);
        let stats = h.pipeline.stats();
        assert_eq!(stats.compaction_recovered, 2);
        assert_eq!(stats.processed, 3);
        assert_eq!(h.pipeline.phase_counts().free, 4);
        for id in 1..=3 {
            assert!(h.ldm.contains(id));
        }
    }

    /// Test: a refused async request is processed as a failure
    #[test]
    fn test_refused_request_counts_as_failure() {
        let h = Harness::new(PipelineConfig::with_window(4));
        h.verifier.refuse_next();
        let mut handle = h.pipeline.submit(&bsm(1, 1), 2).unwrap();
        assert_eq!(h.pipeline.process_pending(), 1);

        let processed = handle.try_outcome().unwrap().unwrap();
        assert_eq!(processed.verdict, Verdict::Rejected);
        let stats = h.pipeline.stats();
        assert_eq!(stats.submit_errors, 1);
        assert_eq!(stats.failed, 1);
        assert!(!h.ldm.contains(1));
    }

    /// Test: failed verification is counted and not cached
    #[test]
    fn test_rejected_not_cached() {
        let h = Harness::new(PipelineConfig::with_window(4));
        h.pipeline.submit(&bsm(1, 1), 2).unwrap();
        h.verifier.complete_next(false);
        h.pipeline.process_pending();
        assert_eq!(h.pipeline.stats().failed, 1);
        assert!(!h.ldm.contains(1));
        assert_eq!(h.flow.record(1).unwrap().total, 1);
    }

    /// Test: consumer task delivers results completed on another thread
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_consumer_task_end_to_end() {
        let h = Harness::new(PipelineConfig::with_window(8));
        assert!(h.pipeline.start());
        assert!(!h.pipeline.start());

        let handle = h.pipeline.submit(&bsm(7, 70), 2).unwrap();
        let verifier = Arc::clone(&h.verifier);
        std::thread::spawn(move || verifier.complete_next(true))
            .join()
            .unwrap();

        let processed = handle.outcome().await.unwrap();
        assert_eq!(processed.verdict, Verdict::Verified);
        assert!(h.ldm.contains(7));

        h.pipeline.shutdown().await;
        assert!(!h.pipeline.is_running());
        assert!(matches!(
            h.pipeline.submit(&bsm(8, 80), 2),
            Err(PipelineError::ShuttingDown)
        ));
    }

    /// Test: concurrent callbacks are each counted once and every current slot is processed once
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callbacks_processed_exactly_once() {
        const WINDOW: usize = 16;
        const SUBMITTED: u32 = 24;
        let h = Harness::new(PipelineConfig::with_window(WINDOW));
        assert!(h.pipeline.start());

        let mut handles: Vec<_> = (1..=SUBMITTED)
            .map(|id| h.pipeline.submit(&bsm(id, id), 2).unwrap())
            .collect();
        // The last 8 submissions wrapped onto the first 8 in-flight slots.
        assert_eq!(h.pipeline.stats().overwritten, 8);

        let tickets = h.verifier.take_tickets();
        assert_eq!(tickets.len(), SUBMITTED as usize);
        let mut chunks: Vec<Vec<VerificationTicket>> = (0..4).map(|_| Vec::new()).collect();
        for (i, ticket) in tickets.into_iter().rev().enumerate() {
            chunks[i % 4].push(ticket);
        }
        let barrier = Arc::new(std::sync::Barrier::new(chunks.len()));
        let completers: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    for ticket in chunk {
                        ticket.complete(true);
                    }
                })
            })
            .collect();
        for c in completers {
            c.join().unwrap();
        }

        let current = handles.split_off(8);
        for mut stale in handles {
            assert!(matches!(
                stale.try_outcome(),
                Some(Err(PipelineError::Discarded { .. }))
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for handle in current {
            let slot = handle.slot();
            let processed = tokio::time::timeout(Duration::from_secs(2), handle.outcome())
                .await
                .expect("outcome timed out")
                .unwrap();
            assert_eq!(processed.verdict, Verdict::Verified);
            assert!(seen.insert(slot), "slot {slot} delivered twice");
        }
        assert_eq!(seen.len(), WINDOW);

        h.pipeline.shutdown().await;
        let stats = h.pipeline.stats();
        assert_eq!(stats.callbacks, WINDOW as u64);
        assert_eq!(stats.stale_callbacks, 8);
        assert_eq!(stats.callbacks + stats.stale_callbacks, u64::from(SUBMITTED));
        assert_eq!(stats.processed, stats.callbacks);
        assert_eq!(stats.verified, WINDOW as u64);
        assert_eq!(h.pipeline.phase_counts().free, WINDOW);
        for id in 1..=8 {
            assert!(!h.ldm.contains(id));
        }
        for id in 9..=SUBMITTED {
            assert!(h.ldm.contains(id));
        }
    }
}
