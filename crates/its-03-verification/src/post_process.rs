//! Side effects of a completed verification.
//!
//! Runs on the single consumer (async mode) or on the receive thread (sync
//! mode). The window lock is never held here.

use crate::domain::{PipelineStats, Processed, Verdict, VerificationRequest};
use crate::ports::{CongestionFeed, SecurityVerifier};
use its_01_ldm::{Ldm, RecordValidity, VehicleRecord};
use its_02_flow_filter::FlowFilter;
use shared_types::audit::AuditLog;
use shared_types::entities::CongestionSample;
use shared_types::time::TimeSource;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct PostProcessor {
    ldm: Arc<Ldm>,
    flow: Arc<FlowFilter>,
    verifier: Arc<dyn SecurityVerifier>,
    congestion: Option<Arc<dyn CongestionFeed>>,
    misbehavior_detection: bool,
    verify_log: Arc<AuditLog>,
    misbehavior_log: Arc<AuditLog>,
    clock: Arc<dyn TimeSource>,
    stats: Arc<PipelineStats>,
}

impl PostProcessor {
    pub fn new(
        ldm: Arc<Ldm>,
        flow: Arc<FlowFilter>,
        verifier: Arc<dyn SecurityVerifier>,
        clock: Arc<dyn TimeSource>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            ldm,
            flow,
            verifier,
            congestion: None,
            misbehavior_detection: false,
            verify_log: Arc::new(AuditLog::disabled()),
            misbehavior_log: Arc::new(AuditLog::disabled()),
            clock,
            stats,
        }
    }

    #[must_use]
    pub fn with_congestion_feed(mut self, feed: Arc<dyn CongestionFeed>) -> Self {
        self.congestion = Some(feed);
        self
    }

    #[must_use]
    pub fn with_misbehavior_detection(mut self, enabled: bool) -> Self {
        self.misbehavior_detection = enabled;
        self
    }

    #[must_use]
    pub fn with_audit_logs(mut self, verify: Arc<AuditLog>, misbehavior: Arc<AuditLog>) -> Self {
        self.verify_log = verify;
        self.misbehavior_log = misbehavior;
        self
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    #[must_use]
    pub fn flow_filter(&self) -> &Arc<FlowFilter> {
        &self.flow
    }

    /// Applies every side effect of one completed verification.
    pub fn process(
        &self,
        request: &VerificationRequest,
        verdict: Verdict,
        latency: Duration,
    ) -> Processed {
        self.flow.on_message(request.source);
        PipelineStats::bump(&self.stats.processed);

        let mut processed = Processed {
            verdict,
            latency,
            replay: false,
            misbehavior: None,
            cached_slot: None,
        };

        match verdict {
            Verdict::Verified => {
                PipelineStats::bump(&self.stats.verified);
                if request.is_bsm() {
                    self.cache(request, &mut processed);
                }
            }
            Verdict::Rejected => {
                PipelineStats::bump(&self.stats.failed);
                debug!(
                    source = request.source,
                    id = request.kinematics.id,
                    "Signature verification failed"
                );
            }
        }

        let now = self.clock.now_ms();
        if let Err(e) = self
            .verify_log
            .record(now, latency.as_secs_f64() * 1000.0)
        {
            warn!(error = %e, "Verification audit line dropped");
        }
        self.stats.record_latency(latency);
        processed
    }

    fn cache(&self, request: &VerificationRequest, processed: &mut Processed) {
        let assessment = self.ldm.assess(&request.kinematics);
        processed.replay = assessment.is_replay();
        if processed.replay {
            PipelineStats::bump(&self.stats.replays);
            debug!(id = request.kinematics.id, "Repeated generation timestamp");
        }

        if self.misbehavior_detection {
            processed.misbehavior = self.check_misbehavior(request);
        }

        let validity = if processed.replay || processed.misbehavior == Some(true) {
            RecordValidity::Suspicious
        } else {
            RecordValidity::Verified
        };
        match self.ldm.upsert(VehicleRecord {
            kinematics: request.kinematics,
            source: request.source,
            validity,
        }) {
            Ok(slot) => processed.cached_slot = Some(slot),
            Err(e) => warn!(id = request.kinematics.id, error = %e, "LDM update failed"),
        }

        if let Some(feed) = &self.congestion {
            feed.add_data(&CongestionSample::from(&request.kinematics));
        }
    }

    fn check_misbehavior(&self, request: &VerificationRequest) -> Option<bool> {
        let started = Instant::now();
        let result = self.verifier.misbehavior_check(&request.kinematics);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        if let Err(e) = self.misbehavior_log.record(self.clock.now_ms(), elapsed_ms) {
            warn!(error = %e, "Misbehavior audit line dropped");
        }

        match result {
            Ok(true) => {
                PipelineStats::bump(&self.stats.misbehavior_detected);
                warn!(
                    source = request.source,
                    id = request.kinematics.id,
                    "Misbehavior detected"
                );
                Some(true)
            }
            Ok(false) => {
                PipelineStats::bump(&self.stats.misbehavior_clean);
                Some(false)
            }
            Err(e) => {
                warn!(error = %e, "Misbehavior check failed");
                None
            }
        }
    }
}
