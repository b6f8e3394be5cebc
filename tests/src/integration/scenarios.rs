//! # Component Scenarios
//!
//! Behavior that only shows once components are combined with the runtime
//! adapters:
//!
//! 1. **LDM growth**: more distinct senders than slots never lose a record.
//! 2. **Window wraparound**: the oldest in-flight request is overwritten and
//!    its late result has no effect.
//! 3. **Permits**: one transmit opportunity releases one sender.
//! 4. **Flooding**: an over-rate sender is flagged and dropped at the radio.

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use its_01_ldm::{Ldm, LdmConfig, RecordValidity, VehicleRecord};
    use its_02_flow_filter::{
        FloodDetectionConfig, FloodDetector, FlowFilter, LoadError, LoadMonitor,
    };
    use its_03_verification::{
        AsyncVerificationPipeline, PipelineConfig, PipelineError, PipelineStats, PostProcessor,
        SecurityVerifier, SlotPhase, VerificationTicket,
    };
    use its_04_congestion_gate::{CongestionControl, CongestionGate, CriticalState, TransmitError};
    use its_runtime::adapters::{PacedCongestionControl, PacingSettings, UdpRadio};
    use its_runtime::container::config::RadioSettings;
    use shared_types::entities::{Kinematics, SafetyMessage, TransmitType, PSID_BSM};
    use shared_types::errors::SecurityError;
    use shared_types::time::{ManualClock, TimeSource};

    // =========================================================================
    // FIXTURES
    // =========================================================================

    fn beacon(id: u32, source: u32) -> SafetyMessage {
        SafetyMessage {
            source,
            psid: PSID_BSM,
            kinematics: Kinematics {
                id,
                timestamp_ms: u64::from(id) * 100,
                ..Default::default()
            },
            signed_payload: vec![],
            received_at_ms: 0,
        }
    }

    /// Records every ticket so the test decides when callbacks arrive.
    #[derive(Default)]
    struct DeferredVerifier {
        tickets: Arc<Mutex<Vec<VerificationTicket>>>,
    }

    impl SecurityVerifier for DeferredVerifier {
        fn verify_sync(&self, _message: &SafetyMessage) -> Result<bool, SecurityError> {
            Ok(true)
        }

        fn verify_async(
            &self,
            _message: &SafetyMessage,
            _priority: u8,
            ticket: VerificationTicket,
        ) -> Result<(), SecurityError> {
            self.tickets.lock().push(ticket);
            Ok(())
        }

        fn misbehavior_check(&self, _kinematics: &Kinematics) -> Result<bool, SecurityError> {
            Ok(false)
        }
    }

    /// Fixed load and capacity.
    struct SteadyLoad {
        load: f64,
        capacity: f64,
    }

    impl LoadMonitor for SteadyLoad {
        fn load(&self) -> f64 {
            self.load
        }

        fn capacity(&self) -> Result<f64, LoadError> {
            Ok(self.capacity)
        }
    }

    // =========================================================================
    // LDM GROWTH
    // =========================================================================

    /// Test: five senders into four slots grow the pool and keep every record
    #[test]
    fn test_ldm_grows_past_initial_size() {
        let clock = Arc::new(ManualClock::new(0));
        let ldm = Ldm::new(
            LdmConfig {
                initial_size: 4,
                ..LdmConfig::default()
            },
            clock,
        );

        let mut slots = HashSet::new();
        for id in 1..=5 {
            let slot = ldm
                .upsert(VehicleRecord {
                    kinematics: beacon(id, id).kinematics,
                    source: id,
                    validity: RecordValidity::Verified,
                })
                .unwrap();
            slots.insert(slot);
        }

        assert!(ldm.pool_size() >= 5);
        assert_eq!(slots.len(), 5);
        for id in 1..=5 {
            assert_eq!(ldm.get(id).unwrap().kinematics.id, id);
        }
        assert_eq!(ldm.stats().bound_ids, 5);
    }

    // =========================================================================
    // WINDOW WRAPAROUND
    // =========================================================================

    /// Test: the fifth submission reuses the first slot and the late callback is dropped
    #[test]
    fn test_window_wraparound_discards_late_result() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ldm = Arc::new(Ldm::new(LdmConfig::default(), clock.clone()));
        let flow = Arc::new(FlowFilter::new(Duration::from_secs(5), clock.clone()));
        let verifier = Arc::new(DeferredVerifier::default());
        let tickets = Arc::clone(&verifier.tickets);
        let post = Arc::new(PostProcessor::new(
            Arc::clone(&ldm),
            flow,
            verifier.clone(),
            clock,
            Arc::new(PipelineStats::default()),
        ));
        let pipeline =
            AsyncVerificationPipeline::new(PipelineConfig::with_window(4), verifier, post).unwrap();

        let mut first = pipeline.submit(&beacon(1, 1), 2).unwrap();
        let mut slots = vec![first.slot()];
        for id in 2..=4 {
            slots.push(pipeline.submit(&beacon(id, id), 2).unwrap().slot());
        }
        assert_eq!(slots.iter().collect::<HashSet<_>>().len(), 4);

        let fifth = pipeline.submit(&beacon(5, 5), 2).unwrap();
        assert_eq!(fifth.slot(), first.slot());
        assert!(matches!(
            first.try_outcome(),
            Some(Err(PipelineError::Discarded { .. }))
        ));

        // The callback for the first submission arrives after the reuse.
        let late = tickets.lock().remove(0);
        late.complete(true);
        let stats = pipeline.stats();
        assert_eq!(stats.overwritten, 1);
        assert_eq!(stats.stale_callbacks, 1);
        assert_eq!(
            pipeline.slot_phase(fifth.slot()),
            Some(SlotPhase::AwaitingCallback)
        );
        assert_eq!(pipeline.process_pending(), 0);
        assert!(!ldm.contains(1));

        // The request now in the slot still completes normally.
        let current = tickets.lock().pop().unwrap();
        current.complete(true);
        assert_eq!(pipeline.process_pending(), 1);
        assert!(ldm.contains(5));
        assert_eq!(pipeline.phase_counts().total(), 4);
    }

    // =========================================================================
    // PERMITS
    // =========================================================================

    /// Test: one posted permit releases exactly one of two waiting senders
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_one_permit_releases_one_sender() {
        let critical = Arc::new(CriticalState::new());
        let gate = Arc::new(CongestionGate::new(critical));
        // Pacing slow enough that only the manual post below counts.
        let pacing = PacedCongestionControl::new(
            PacingSettings::with_min_itt(Duration::from_secs(3_600)),
            Arc::new(ManualClock::new(0)),
        );
        assert!(gate.start(&pacing, true).unwrap());

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move { gate.acquire(TransmitType::Sps).await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(waiters.iter().all(|w| !w.is_finished()));

        gate.post();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(waiters.iter().filter(|w| w.is_finished()).count(), 1);
        assert_eq!(gate.stats().granted, 1);

        gate.close();
        let mut results = Vec::new();
        for waiter in waiters {
            results.push(waiter.await.unwrap());
        }
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.contains(&Err(TransmitError::GateClosed)));
        pacing.stop();
    }

    // =========================================================================
    // FLOODING
    // =========================================================================

    /// Test: a 200 msg/s sender under load is flagged within one period and dropped at the radio
    #[tokio::test]
    async fn test_flooding_sender_flagged_and_filtered() {
        let clock = Arc::new(ManualClock::new(0));
        let flow = Arc::new(FlowFilter::new(Duration::from_secs(5), clock.clone()));
        let detector = FloodDetector::new(
            Arc::clone(&flow),
            Arc::new(SteadyLoad {
                load: 90.0,
                capacity: 100.0,
            }),
            FloodDetectionConfig {
                enabled: true,
                rate_threshold: 100.0,
                utilization_threshold: 0.5,
                ..FloodDetectionConfig::default()
            },
        );

        // Sender 7 floods at 200 msg/s, sender 8 stays at 10 msg/s.
        for tick in 0..200u64 {
            flow.on_message(7);
            if tick % 20 == 0 {
                flow.on_message(8);
            }
            clock.advance(5);
        }
        assert_eq!(clock.now_ms(), 1_000);

        let decision = detector.run_once();
        assert_eq!(decision.entries.len(), 1);
        assert_eq!(decision.entries[0].source, 7);
        assert!(decision.entries[0].duration_ms > 0);
        assert!(detector.is_mitigating());
        assert_eq!(detector.next_interval(), Duration::from_millis(500));

        let radio = UdpRadio::bind(&RadioSettings {
            rx_port: 0,
            tx_address: None,
            l2_address: 1,
        })
        .await
        .unwrap();
        radio.apply_l2_filters(&decision.entries);
        assert!(!radio.admit(7));
        assert!(radio.admit(8));
    }
}
