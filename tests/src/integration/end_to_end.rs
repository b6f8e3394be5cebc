//! # End-to-End Flows
//!
//! Two complete stacks on UDP loopback:
//!
//! ```text
//! sender stack ──beacons──→ receiver stack ──verify──→ LDM
//! attacker socket ──flood──→ receiver stack ──flood detector──→ L2 filter
//! ```

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::net::UdpSocket;
    use tokio::time::timeout;

    use its_03_verification::VerificationMode;
    use its_04_congestion_gate::MessageEncoder;
    use its_runtime::adapters::{frame, SignedEnvelope, WireCodec};
    use its_runtime::{AppContext, ItsRuntime, StackConfig};
    use shared_bus::EventPublisher;
    use shared_types::entities::{vehicle_events, Kinematics, TransmitType, VehicleState};
    use shared_types::time::SystemTimeSource;

    // =========================================================================
    // FIXTURES
    // =========================================================================

    fn base_config() -> StackConfig {
        let mut config = StackConfig::default();
        config.security.verify_latency = Duration::from_micros(100);
        config.gate.transmit_interval = Duration::from_millis(20);
        config
    }

    async fn stack(config: StackConfig) -> ItsRuntime {
        ItsRuntime::new(AppContext::build(config).await.unwrap())
    }

    fn loopback(runtime: &ItsRuntime) -> SocketAddr {
        let port = runtime.context().radio.local_addr().unwrap().port();
        SocketAddr::from((Ipv4Addr::LOCALHOST, port))
    }

    fn host_state(id: u32, event_flags: u16) -> VehicleState {
        VehicleState {
            kinematics: Kinematics {
                id,
                speed: 1_500,
                ..Default::default()
            },
            event_flags,
        }
    }

    async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    // =========================================================================
    // BEACONS
    // =========================================================================

    /// Test: periodic beacons are verified asynchronously and cached by the receiver
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_periodic_beacons_reach_receiver_ldm() {
        let receiver = stack(base_config()).await;
        let mut config = base_config();
        config.radio.tx_address = Some(loopback(&receiver));
        let sender = stack(config).await;
        sender.context().host.update(host_state(9001, 0));

        receiver.start();
        sender.start();

        let ldm = Arc::clone(&receiver.context().ldm);
        wait_until("beacon in LDM", || ldm.contains(9001)).await;
        let record = ldm.get(9001).unwrap();
        assert_eq!(record.source, sender.context().radio.l2_address());
        assert_eq!(record.kinematics.speed, 1_500);

        let sent = sender.shutdown().await;
        let heard = receiver.shutdown().await;
        assert!(sent.transmit.sps_sent >= 1);
        assert_eq!(sent.transmit.events_sent, 0);
        assert!(sent.security.signed >= 1);
        assert!(heard.verification.verified >= 1);
        assert_eq!(heard.verification.failed, 0);
    }

    /// Test: the synchronous path caches beacons the same way
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sync_verification_path() {
        let mut config = base_config();
        config.verification.mode = VerificationMode::Sync;
        let receiver = stack(config).await;
        let mut config = base_config();
        config.radio.tx_address = Some(loopback(&receiver));
        let sender = stack(config).await;
        sender.context().host.update(host_state(77, 0));

        receiver.start();
        sender.start();
        let ldm = Arc::clone(&receiver.context().ldm);
        wait_until("beacon in LDM", || ldm.contains(77)).await;

        sender.shutdown().await;
        let heard = receiver.shutdown().await;
        assert_eq!(heard.verification.submitted, 0);
        assert!(heard.verification.processed >= 1);
    }

    // =========================================================================
    // CRITICAL EVENTS
    // =========================================================================

    /// Test: a critical vehicle event switches the sender to event messages only
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_critical_event_switches_to_event_messages() {
        let receiver = stack(base_config()).await;
        let mut config = base_config();
        config.radio.tx_address = Some(loopback(&receiver));
        let sender = stack(config).await;
        sender.context().host.update(host_state(4100, 0));

        receiver.start();
        sender.start();

        sender
            .publish_vehicle_state(host_state(4100, vehicle_events::HARD_BRAKING))
            .await;
        let ctx = Arc::clone(sender.context());
        wait_until("critical mode", || ctx.critical.is_critical()).await;
        assert!(ctx.identity.is_locked());
        wait_until("event message sent", || ctx.transmit.stats().events_sent >= 2).await;

        let sps_in_critical = ctx.transmit.stats().sps_sent;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ctx.transmit.stats().sps_sent, sps_in_critical);

        sender.publish_vehicle_state(host_state(4100, 0)).await;
        wait_until("normal mode", || !ctx.critical.is_critical()).await;
        assert!(!ctx.identity.is_locked());
        wait_until("periodic beacon resumed", || {
            ctx.transmit.stats().sps_sent > sps_in_critical
        })
        .await;

        let ldm = Arc::clone(&receiver.context().ldm);
        wait_until("event in LDM", || ldm.contains(4100)).await;
        sender.shutdown().await;
        receiver.shutdown().await;
    }

    // =========================================================================
    // FLOODING
    // =========================================================================

    /// Test: a flooding sender is detected and filtered at the receiver's radio
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_flooding_sender_filtered() {
        let mut config = base_config();
        config.flood.enabled = true;
        config.flood.rate_threshold = 50.0;
        config.flood.utilization_threshold = 0.5;
        config.flood.capacity_override = Some(1.0);
        config.flood.evaluation_period = Duration::from_millis(100);
        let receiver = stack(config).await;
        receiver.start();

        let target = loopback(&receiver);
        let attacker = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let codec = WireCodec::new(Arc::new(SystemTimeSource));
        let flood = tokio::spawn(async move {
            for _ in 0..2_000 {
                let payload = codec
                    .encode(&host_state(666, 0), TransmitType::Sps)
                    .unwrap();
                let envelope = SignedEnvelope {
                    certificate: false,
                    signer: 666,
                    signature: vec![0; 8],
                    payload,
                }
                .to_bytes()
                .unwrap();
                if attacker.send_to(&frame(0x666, &envelope), target).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        });

        let ctx = Arc::clone(receiver.context());
        wait_until("flooding sender filtered", || ctx.radio.stats().rx_filtered > 0).await;
        assert!(ctx.flood.flagged_total() >= 1);
        assert!(ctx.bus.events_published() >= 1);

        flood.abort();
        let stats = receiver.shutdown().await;
        assert!(stats.flood_rounds >= 1);
        assert!(stats.flood_flagged >= 1);
    }
}
