//! # Stack Runtime
//!
//! Starts the long-running tasks over an [`AppContext`] and stops them on
//! one shutdown signal.
//!
//! ```text
//! radio ──→ receive ──→ VerificationService ──→ pipeline consumer ──→ LDM
//!                                                                 └──→ FlowFilter
//! vehicle events ──→ bus ──→ ModeController ──→ CriticalState
//!                                                    │
//! pacing ──→ CongestionGate ──→ periodic loop ───────┤
//!                               event loop ──────────┴──→ sign ──→ radio
//! flood detector ──→ L2 filters ──→ radio
//! ```
//!
//! ## Shutdown Order
//!
//! 1. Broadcast on the `watch` channel and wake every critical-state waiter.
//! 2. Close the gate and stop pacing.
//! 3. Join the spawned tasks.
//! 4. Drain the pipeline, stop eviction and close the security service.
//! 5. Log final statistics.

use crate::adapters::{unframe, RadioStats, SecurityStats, MAX_FRAME_BYTES};
use crate::container::AppContext;
use its_01_ldm::LdmStats;
use its_02_flow_filter::classify_remote;
use its_03_verification::{
    Ingested, PipelineError, PipelineStatsSnapshot, VerificationApi, VerificationMode,
};
use its_04_congestion_gate::{
    is_critical_event, CongestionControl, GateStats, HostVehicle, TransmitStats,
};
use its_telemetry::{
    advance_counter, metric_inc, metric_observe, COMPONENT_ERRORS, EVENT_BUS_MESSAGES,
    FLOW_FLAGGED_SENDERS, FLOW_UTILIZATION, IDENTITY_CHANGES, LDM_EVICTIONS, LDM_SLOTS,
    MODE_CHANGES, TX_MESSAGES, VERIFICATION_DROPS, VERIFICATION_IN_FLIGHT, VERIFICATION_LATENCY,
    VERIFICATION_RESULTS,
};
use parking_lot::Mutex;
use serde::Serialize;
use shared_bus::{EventFilter, EventPublisher, EventTopic, ItsEvent};
use shared_types::entities::{OperatingMode, VehicleState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How often counters are exported.
const METRICS_INTERVAL: Duration = Duration::from_secs(1);

/// How long shutdown waits for each task.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Statistics logged when the stack stops.
#[derive(Debug, Clone, Serialize)]
pub struct FinalStats {
    pub ldm: LdmStats,
    pub verification: PipelineStatsSnapshot,
    pub transmit: TransmitStats,
    pub gate: GateStats,
    pub radio: RadioStats,
    pub security: SecurityStats,
    pub flood_rounds: u64,
    pub flood_flagged: u64,
    pub identity_changes: u64,
    pub events_published: u64,
}

/// The running stack.
pub struct ItsRuntime {
    ctx: Arc<AppContext>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl ItsRuntime {
    pub fn new(ctx: AppContext) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            ctx: Arc::new(ctx),
            shutdown_tx,
            shutdown_rx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Starts every background task. Must be called from within a tokio
    /// runtime.
    pub fn start(&self) {
        let ctx = &self.ctx;
        info!(
            l2_address = ctx.radio.l2_address(),
            "Starting V2X safety stack"
        );

        match ctx
            .gate
            .start(&*ctx.congestion, ctx.config.gate.congestion_control)
        {
            Ok(gated) => debug!(gated, "Congestion gate ready"),
            Err(e) => {
                metric_inc!(COMPONENT_ERRORS, &["congestion", "start"]);
                warn!(error = %e, "Continuing with ungated transmissions");
            }
        }

        if ctx.ldm.start_configured_eviction() {
            debug!("LDM eviction running");
        }
        if ctx.config.verification.mode == VerificationMode::Async && ctx.pipeline.start() {
            debug!("Verification consumer running");
        }

        // Subscribe before any task can publish.
        let vehicle_events = ctx.bus.subscribe(EventFilter::topics(vec![EventTopic::Vehicle]));
        let bus_events = ctx.bus.subscribe(EventFilter::all());

        self.spawn("receive", receive_loop(Arc::clone(ctx), self.shutdown_rx.clone()));
        {
            let ctx = Arc::clone(ctx);
            let shutdown = self.shutdown_rx.clone();
            self.spawn("periodic", async move { ctx.transmit.run_periodic(shutdown).await });
        }
        {
            let ctx = Arc::clone(ctx);
            let shutdown = self.shutdown_rx.clone();
            self.spawn("events", async move { ctx.transmit.run_events(shutdown).await });
        }
        {
            let ctx = Arc::clone(ctx);
            let shutdown = self.shutdown_rx.clone();
            self.spawn("modes", async move { ctx.modes.run(vehicle_events, shutdown).await });
        }
        if ctx.config.flood.enabled {
            self.spawn("flood", flood_loop(Arc::clone(ctx), self.shutdown_rx.clone()));
        }
        self.spawn(
            "bus-monitor",
            bus_monitor(bus_events, self.shutdown_rx.clone()),
        );
        self.spawn("metrics", metrics_loop(Arc::clone(ctx), self.shutdown_rx.clone()));

        info!(tasks = self.tasks.lock().len(), "V2X safety stack running");
    }

    fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().push((name, tokio::spawn(task)));
    }

    /// Reports a host vehicle state change on the bus.
    pub async fn publish_vehicle_state(&self, state: VehicleState) -> usize {
        let critical = is_critical_event(&state);
        self.ctx
            .bus
            .publish(ItsEvent::VehicleStateChanged { critical, state })
            .await
    }

    /// Stops every task and returns the final statistics.
    pub async fn shutdown(&self) -> FinalStats {
        info!("Shutting down V2X safety stack");
        let _ = self.shutdown_tx.send(true);
        self.ctx.critical.shutdown();
        self.ctx.gate.close();
        self.ctx.congestion.stop();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for (name, handle) in tasks {
            match tokio::time::timeout(TASK_JOIN_TIMEOUT, handle).await {
                Ok(Ok(())) => debug!(task = name, "Task stopped"),
                Ok(Err(e)) => error!(task = name, error = %e, "Task failed"),
                Err(_) => warn!(task = name, "Task did not stop in time"),
            }
        }

        self.ctx.pipeline.shutdown().await;
        self.ctx.ldm.stop_eviction();
        let security = Arc::clone(&self.ctx.security);
        if let Err(e) = tokio::task::spawn_blocking(move || security.close()).await {
            error!(error = %e, "Security service did not close cleanly");
        }

        let stats = self.final_stats();
        match serde_json::to_string(&stats) {
            Ok(json) => info!(stats = %json, "Final statistics"),
            Err(e) => warn!(error = %e, "Final statistics not serializable"),
        }
        stats
    }

    #[must_use]
    pub fn final_stats(&self) -> FinalStats {
        let ctx = &self.ctx;
        FinalStats {
            ldm: ctx.ldm.stats(),
            verification: ctx.verification.stats(),
            transmit: ctx.transmit.stats(),
            gate: ctx.gate.stats(),
            radio: ctx.radio.stats(),
            security: ctx.security.stats(),
            flood_rounds: ctx.flood.rounds(),
            flood_flagged: ctx.flood.flagged_total(),
            identity_changes: ctx.identity.changes(),
            events_published: ctx.bus.events_published(),
        }
    }
}

/// Decodes and verifies one received datagram.
fn ingest_datagram(ctx: &AppContext, datagram: &[u8]) {
    let (source, envelope) = match unframe(datagram) {
        Ok(parts) => parts,
        Err(e) => {
            metric_inc!(COMPONENT_ERRORS, &["radio", "frame"]);
            debug!(error = %e, "Malformed frame dropped");
            return;
        }
    };
    if !ctx.radio.admit(source) {
        return;
    }

    let message = match ctx.codec.decode(source, envelope, ctx.clock.now_ms()) {
        Ok(message) => message,
        Err(e) => {
            metric_inc!(COMPONENT_ERRORS, &["codec", "decode"]);
            debug!(source, error = %e, "Undecodable message dropped");
            return;
        }
    };
    if !message.is_bsm() {
        debug!(source, psid = message.psid, "Non-BSM message ignored");
        return;
    }
    let host = ctx.host.snapshot();
    ctx.flow
        .classify(source, classify_remote(&host.kinematics, &message.kinematics));

    match ctx.verification.ingest(&message) {
        Ok(Ingested::Completed(processed)) => {
            metric_observe!(VERIFICATION_LATENCY, processed.latency.as_secs_f64());
        }
        Ok(Ingested::Submitted(handle)) => {
            tokio::spawn(async move {
                if let Ok(processed) = handle.outcome().await {
                    metric_observe!(VERIFICATION_LATENCY, processed.latency.as_secs_f64());
                }
            });
        }
        Err(PipelineError::SlotAwaitingConsumption { slot }) => {
            debug!(source, slot, "Verification window busy, message dropped");
        }
        Err(e) => {
            metric_inc!(COMPONENT_ERRORS, &["verification", "ingest"]);
            warn!(source, error = %e, "Message not verified");
        }
    }
}

async fn receive_loop(ctx: Arc<AppContext>, mut shutdown: watch::Receiver<bool>) {
    let inline_verification = ctx.verification.mode() == VerificationMode::Sync;
    let mut buf = vec![0u8; MAX_FRAME_BYTES];
    loop {
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            received = ctx.radio.recv(&mut buf) => received,
        };
        match received {
            Ok(len) if inline_verification => {
                // Inline verification blocks for the security service.
                let ctx = Arc::clone(&ctx);
                let datagram = buf[..len].to_vec();
                if let Err(e) =
                    tokio::task::spawn_blocking(move || ingest_datagram(&ctx, &datagram)).await
                {
                    error!(error = %e, "Inline verification task failed");
                }
            }
            Ok(len) => ingest_datagram(&ctx, &buf[..len]),
            Err(e) => {
                metric_inc!(COMPONENT_ERRORS, &["radio", "receive"]);
                warn!(error = %e, "Radio receive failed");
            }
        }
    }
    debug!("Receive loop stopped");
}

async fn flood_loop(ctx: Arc<AppContext>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(ctx.flood.next_interval()) => {}
        }

        let decision = ctx.flood.run_once();
        FLOW_UTILIZATION.set(decision.utilization);
        if decision.is_empty() {
            continue;
        }
        let entries = decision.filter_list();
        ctx.radio.apply_l2_filters(&entries);
        ctx.bus
            .publish(ItsEvent::FloodMitigation { entries })
            .await;
    }
    debug!("Flood detection loop stopped");
}

fn event_name(event: &ItsEvent) -> &'static str {
    match event {
        ItsEvent::VehicleStateChanged { .. } => "vehicle_state_changed",
        ItsEvent::ModeChanged { .. } => "mode_changed",
        ItsEvent::IdentityChanged { .. } => "identity_changed",
        ItsEvent::FloodMitigation { .. } => "flood_mitigation",
    }
}

async fn bus_monitor(mut events: shared_bus::Subscription, mut shutdown: watch::Receiver<bool>) {
    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            next = events.recv() => match next {
                Some(event) => event,
                None => break,
            },
        };
        EVENT_BUS_MESSAGES
            .with_label_values(&[event_name(&event)])
            .inc();
        match event {
            ItsEvent::ModeChanged { mode } => {
                let label = match mode {
                    OperatingMode::Normal => "normal",
                    OperatingMode::Critical => "critical",
                };
                MODE_CHANGES.with_label_values(&[label]).inc();
            }
            ItsEvent::FloodMitigation { entries } => {
                info!(senders = entries.len(), "Flood mitigation applied");
            }
            _ => {}
        }
    }
    debug!("Bus monitor stopped");
}

/// Last exported values of the cumulative counters.
#[derive(Debug, Default)]
struct Exported {
    ldm: LdmStats,
    verification: PipelineStatsSnapshot,
    transmit: TransmitStats,
    flagged: u64,
    identity_changes: u64,
}

fn export_metrics(ctx: &AppContext, last: &mut Exported) {
    let ldm = ctx.ldm.stats();
    LDM_SLOTS.with_label_values(&["total"]).set(ldm.total_slots as f64);
    LDM_SLOTS.with_label_values(&["free"]).set(ldm.free_slots as f64);
    LDM_SLOTS.with_label_values(&["bound"]).set(ldm.bound_ids as f64);
    advance_counter(
        &LDM_EVICTIONS.with_label_values(&["age"]),
        last.ldm.evicted,
        ldm.evicted,
    );
    advance_counter(
        &LDM_EVICTIONS.with_label_values(&["pressure"]),
        last.ldm.pressure_evictions,
        ldm.pressure_evictions,
    );

    let v = ctx.verification.stats();
    let prev = &last.verification;
    advance_counter(&VERIFICATION_RESULTS.with_label_values(&["verified"]), prev.verified, v.verified);
    advance_counter(&VERIFICATION_RESULTS.with_label_values(&["failed"]), prev.failed, v.failed);
    advance_counter(&VERIFICATION_DROPS.with_label_values(&["busy"]), prev.dropped_busy, v.dropped_busy);
    advance_counter(&VERIFICATION_DROPS.with_label_values(&["overwritten"]), prev.overwritten, v.overwritten);
    advance_counter(&VERIFICATION_DROPS.with_label_values(&["stale"]), prev.stale_callbacks, v.stale_callbacks);
    advance_counter(&VERIFICATION_DROPS.with_label_values(&["overflow"]), prev.log_overflows, v.log_overflows);
    VERIFICATION_IN_FLIGHT.set(ctx.pipeline.in_flight() as f64);

    let tx = ctx.transmit.stats();
    let prev = &last.transmit;
    advance_counter(&TX_MESSAGES.with_label_values(&["sps", "sent"]), prev.sps_sent, tx.sps_sent);
    advance_counter(&TX_MESSAGES.with_label_values(&["event", "sent"]), prev.events_sent, tx.events_sent);
    advance_counter(&TX_MESSAGES.with_label_values(&["any", "suppressed"]), prev.suppressed, tx.suppressed);
    advance_counter(&TX_MESSAGES.with_label_values(&["any", "failed"]), prev.failures, tx.failures);

    let flagged = ctx.flood.flagged_total();
    advance_counter(&FLOW_FLAGGED_SENDERS, last.flagged, flagged);
    let identity_changes = ctx.identity.changes();
    advance_counter(&IDENTITY_CHANGES, last.identity_changes, identity_changes);

    *last = Exported {
        ldm,
        verification: v,
        transmit: tx,
        flagged,
        identity_changes,
    };
}

/// Exports counters and announces pseudonym changes.
async fn metrics_loop(ctx: Arc<AppContext>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(METRICS_INTERVAL);
    let mut last = Exported::default();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        let previous_changes = last.identity_changes;
        export_metrics(&ctx, &mut last);
        if last.identity_changes > previous_changes {
            ctx.bus
                .publish(ItsEvent::IdentityChanged {
                    changes: last.identity_changes,
                })
                .await;
        }
    }
    debug!("Metrics loop stopped");
}
