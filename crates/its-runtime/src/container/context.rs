//! # Application Context
//!
//! Builds every component once, in dependency order, and hands out shared
//! references. Nothing in the stack reaches for a global: each collaborator
//! is passed in explicitly here.
//!
//! ```text
//! Phase 1: clock, event bus, audit logs
//! Phase 2: security service, radio, codec
//! Phase 3: LDM, flow filter, congestion control
//! Phase 4: verification pipeline and service, flood detector
//! Phase 5: critical state, gate, identity, mode controller, transmitter
//! ```

use crate::adapters::{
    PacedCongestionControl, PacingSettings, PipelineLoadMonitor, SimulatedSecurity, UdpRadio,
    WireCodec,
};
use crate::container::config::{AuditLogSetting, StackConfig};
use anyhow::{Context, Result};
use its_01_ldm::Ldm;
use its_02_flow_filter::{FloodDetector, FlowFilter};
use its_03_verification::{
    AsyncVerificationPipeline, PipelineStats, PostProcessor, VerificationService,
};
use its_04_congestion_gate::{
    CongestionGate, CriticalState, HostState, IdentityChangeScheduler, ModeController,
    TransmitPorts, TransmitScheduler,
};
use shared_bus::InMemoryEventBus;
use shared_types::audit::AuditLog;
use shared_types::time::{SystemTimeSource, TimeSource};
use std::sync::Arc;
use tracing::{info, instrument};

/// Every component of the running stack.
pub struct AppContext {
    pub config: StackConfig,
    pub clock: Arc<dyn TimeSource>,
    pub bus: Arc<InMemoryEventBus>,

    // Receive side
    pub security: Arc<SimulatedSecurity>,
    pub radio: Arc<UdpRadio>,
    pub codec: Arc<WireCodec>,
    pub ldm: Arc<Ldm>,
    pub flow: Arc<FlowFilter>,
    pub pipeline: Arc<AsyncVerificationPipeline>,
    pub verification: Arc<VerificationService>,
    pub flood: Arc<FloodDetector>,

    // Transmit side
    pub congestion: Arc<PacedCongestionControl>,
    pub critical: Arc<CriticalState>,
    pub gate: Arc<CongestionGate>,
    pub host: Arc<HostState>,
    pub identity: Arc<IdentityChangeScheduler>,
    pub modes: Arc<ModeController>,
    pub transmit: Arc<TransmitScheduler>,
}

fn open_audit_log(name: &str, setting: &AuditLogSetting) -> Result<Arc<AuditLog>> {
    let log = AuditLog::open_if(setting.enabled, &setting.path)
        .with_context(|| format!("opening {name} audit log {}", setting.path.display()))?;
    Ok(Arc::new(log))
}

impl AppContext {
    /// Builds the stack on the system clock.
    pub async fn build(config: StackConfig) -> Result<Self> {
        Self::build_with_clock(config, Arc::new(SystemTimeSource)).await
    }

    /// Builds the stack on `clock`. Must run inside a tokio runtime; the
    /// radio socket is bound here.
    #[instrument(name = "stack_init", skip_all)]
    pub async fn build_with_clock(config: StackConfig, clock: Arc<dyn TimeSource>) -> Result<Self> {
        info!("Phase 1: shared infrastructure");
        let bus = Arc::new(InMemoryEventBus::new());
        let verify_log = open_audit_log("verification", &config.audit.verify)?;
        let sign_log = open_audit_log("signing", &config.audit.sign)?;
        let misbehavior_log = open_audit_log("misbehavior", &config.audit.misbehavior)?;

        info!("Phase 2: security, radio and codec");
        let security = Arc::new(
            SimulatedSecurity::open(config.security.clone())
                .context("security service unavailable")?,
        );
        let radio = Arc::new(
            UdpRadio::bind(&config.radio)
                .await
                .with_context(|| format!("binding radio on port {}", config.radio.rx_port))?,
        );
        let codec = Arc::new(WireCodec::new(Arc::clone(&clock)));

        info!("Phase 3: LDM, flow filter and congestion control");
        let ldm = Arc::new(Ldm::new(config.ldm.clone(), Arc::clone(&clock)));
        let flow = Arc::new(FlowFilter::new(config.flood.staleness, Arc::clone(&clock)));
        let congestion = Arc::new(PacedCongestionControl::new(
            PacingSettings::with_min_itt(config.gate.transmit_interval),
            Arc::clone(&clock),
        ));

        info!("Phase 4: verification and flood detection");
        let stats = Arc::new(PipelineStats::new(config.verification.pipeline.stat_batch_size));
        let post = Arc::new(
            PostProcessor::new(
                Arc::clone(&ldm),
                Arc::clone(&flow),
                security.clone(),
                Arc::clone(&clock),
                stats,
            )
            .with_congestion_feed(congestion.clone())
            .with_misbehavior_detection(config.verification.pipeline.misbehavior_detection)
            .with_audit_logs(verify_log, misbehavior_log),
        );
        let pipeline = Arc::new(
            AsyncVerificationPipeline::new(
                config.verification.pipeline.clone(),
                security.clone(),
                Arc::clone(&post),
            )
            .context("invalid verification window")?,
        );
        let verification = Arc::new(VerificationService::new(
            config.verification.mode,
            Arc::clone(&pipeline),
            post,
            security.clone(),
        ));
        let monitor = Arc::new(PipelineLoadMonitor::new(
            Arc::clone(&pipeline),
            security.capacity(),
            Arc::clone(&clock),
        ));
        let flood = Arc::new(FloodDetector::new(
            Arc::clone(&flow),
            monitor,
            config.flood.clone(),
        ));

        info!("Phase 5: transmit path");
        let critical = Arc::new(CriticalState::new());
        let gate = Arc::new(CongestionGate::new(Arc::clone(&critical)));
        let host = Arc::new(HostState::default());
        let identity = Arc::new(IdentityChangeScheduler::new(
            security.clone(),
            Arc::clone(&critical),
            Arc::clone(&clock),
            config.gate.identity_change,
        ));
        let modes = Arc::new(
            ModeController::new(
                Arc::clone(&critical),
                Arc::clone(&host),
                Arc::clone(&identity),
                bus.clone(),
            )
            .with_congestion_control(congestion.clone()),
        );
        let transmit = Arc::new(
            TransmitScheduler::new(
                Arc::clone(&gate),
                Arc::clone(&critical),
                Arc::clone(&identity),
                TransmitPorts {
                    host: host.clone(),
                    encoder: codec.clone(),
                    signer: security.clone(),
                    radio: radio.clone(),
                },
                config.gate.transmit_interval,
                Arc::clone(&clock),
            )
            .with_sign_log(sign_log),
        );

        info!(
            mode = ?config.verification.mode,
            window = config.verification.pipeline.window_size,
            flood_detection = config.flood.enabled,
            congestion_control = config.gate.congestion_control,
            "Stack context ready"
        );

        Ok(Self {
            config,
            clock,
            bus,
            security,
            radio,
            codec,
            ldm,
            flow,
            pipeline,
            verification,
            flood,
            congestion,
            critical,
            gate,
            host,
            identity,
            modes,
            transmit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::time::ManualClock;

    /// Test: the default configuration builds a complete context
    #[tokio::test]
    async fn test_build_default_context() {
        let ctx = AppContext::build_with_clock(StackConfig::default(), Arc::new(ManualClock::new(0)))
            .await
            .unwrap();
        assert_eq!(ctx.pipeline.window_size(), 2048);
        assert_eq!(ctx.ldm.pool_size(), 1);
        assert!(!ctx.gate.is_gated());
        assert!(!ctx.critical.is_critical());
        assert_ne!(ctx.radio.l2_address(), 0);
        ctx.security.close();
    }

    /// Test: an unusable security service is fatal
    #[tokio::test]
    async fn test_security_failure_is_fatal() {
        let mut config = StackConfig::default();
        config.security.workers = 0;
        let err = AppContext::build(config).await.err().unwrap();
        assert!(err.to_string().contains("security service unavailable"));
    }

    /// Test: enabled audit logs are created at their paths
    #[tokio::test]
    async fn test_audit_logs_opened() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StackConfig::default();
        config.audit.verify = AuditLogSetting {
            enabled: true,
            path: dir.path().join("verif.log"),
        };
        let ctx = AppContext::build(config).await.unwrap();
        assert!(dir.path().join("verif.log").exists());
        ctx.security.close();
    }
}
