//! Scripted collaborators for unit tests.

use crate::domain::{PipelineConfig, PipelineStats};
use crate::pipeline::{AsyncVerificationPipeline, VerificationTicket};
use crate::post_process::PostProcessor;
use crate::ports::SecurityVerifier;
use its_01_ldm::{Ldm, LdmConfig};
use its_02_flow_filter::FlowFilter;
use parking_lot::Mutex;
use shared_types::entities::{Kinematics, SafetyMessage, PSID_BSM};
use shared_types::errors::SecurityError;
use shared_types::time::ManualClock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Holds tickets until the test completes them.
#[derive(Default)]
pub(crate) struct ScriptedVerifier {
    tickets: Mutex<VecDeque<VerificationTicket>>,
    refuse: AtomicBool,
    pub sync_result: AtomicBool,
    pub misbehaving: AtomicBool,
    pub priorities: Mutex<Vec<u8>>,
}

impl ScriptedVerifier {
    pub fn complete_next(&self, verified: bool) {
        let ticket = self.tickets.lock().pop_front();
        if let Some(ticket) = ticket {
            ticket.complete(verified);
        }
    }

    pub fn complete_all(&self, verified: bool) {
        let tickets: Vec<_> = self.tickets.lock().drain(..).collect();
        for ticket in tickets {
            ticket.complete(verified);
        }
    }

    /// Hands the pending tickets to the caller, oldest first.
    pub fn take_tickets(&self) -> Vec<VerificationTicket> {
        self.tickets.lock().drain(..).collect()
    }

    pub fn refuse_next(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }
}

impl SecurityVerifier for ScriptedVerifier {
    fn verify_sync(&self, _message: &SafetyMessage) -> Result<bool, SecurityError> {
        Ok(self.sync_result.load(Ordering::SeqCst))
    }

    fn verify_async(
        &self,
        _message: &SafetyMessage,
        priority: u8,
        ticket: VerificationTicket,
    ) -> Result<(), SecurityError> {
        if self.refuse.swap(false, Ordering::SeqCst) {
            return Err(SecurityError::Refused("queue full".into()));
        }
        self.priorities.lock().push(priority);
        self.tickets.lock().push_back(ticket);
        Ok(())
    }

    fn misbehavior_check(&self, _kinematics: &Kinematics) -> Result<bool, SecurityError> {
        Ok(self.misbehaving.load(Ordering::SeqCst))
    }
}

pub(crate) struct Harness {
    pub pipeline: AsyncVerificationPipeline,
    pub post: Arc<PostProcessor>,
    pub verifier: Arc<ScriptedVerifier>,
    pub ldm: Arc<Ldm>,
    pub flow: Arc<FlowFilter>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_post(config, |post| post)
    }

    pub fn with_post(
        config: PipelineConfig,
        customize: impl FnOnce(PostProcessor) -> PostProcessor,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(1_000));
        let ldm = Arc::new(Ldm::new(LdmConfig::default(), clock.clone()));
        let flow = Arc::new(FlowFilter::new(Duration::from_secs(5), clock.clone()));
        let verifier = Arc::new(ScriptedVerifier::default());
        let stats = Arc::new(PipelineStats::new(config.stat_batch_size));
        let post = Arc::new(customize(PostProcessor::new(
            ldm.clone(),
            flow.clone(),
            verifier.clone(),
            clock.clone(),
            stats,
        )));
        let pipeline =
            AsyncVerificationPipeline::new(config, verifier.clone(), post.clone()).unwrap();
        Self {
            pipeline,
            post,
            verifier,
            ldm,
            flow,
            clock,
        }
    }
}

/// A basic safety message from `source` carrying pseudonym `id`.
pub(crate) fn bsm(id: u32, source: u32) -> SafetyMessage {
    SafetyMessage {
        source,
        psid: PSID_BSM,
        kinematics: Kinematics {
            id,
            timestamp_ms: u64::from(id) * 100 + 1,
            ..Default::default()
        },
        signed_payload: vec![0xAB; 8],
        received_at_ms: 1_000,
    }
}
