//! # UDP Radio
//!
//! Stands in for the sidelink radio: each datagram is one over-the-air
//! frame. Link-layer filters installed by flood mitigation drop frames from
//! a sender until they expire.

use crate::adapters::codec::frame;
use crate::container::config::RadioSettings;
use async_trait::async_trait;
use its_04_congestion_gate::{RadioTransmitter, TransmitError};
use parking_lot::Mutex;
use serde::Serialize;
use shared_types::entities::{L2Address, L2FilterEntry, TransmitType};
use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info};

/// Largest datagram the receive loop accepts.
pub const MAX_FRAME_BYTES: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RadioStats {
    pub rx_frames: u64,
    pub rx_filtered: u64,
    pub tx_frames: u64,
    pub tx_bytes: u64,
    pub active_filters: usize,
}

#[derive(Debug, Default)]
struct Counters {
    rx_frames: AtomicU64,
    rx_filtered: AtomicU64,
    tx_frames: AtomicU64,
    tx_bytes: AtomicU64,
}

pub struct UdpRadio {
    socket: UdpSocket,
    tx_address: Option<SocketAddr>,
    l2_address: L2Address,
    filters: Mutex<HashMap<L2Address, Instant>>,
    counters: Counters,
}

impl UdpRadio {
    /// Binds the receive port. A zero link-layer address is replaced by a
    /// random non-zero one.
    pub async fn bind(settings: &RadioSettings) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, settings.rx_port)).await?;
        let l2_address = match settings.l2_address {
            0 => rand::random::<L2Address>().max(1),
            address => address,
        };
        info!(
            local = %socket.local_addr()?,
            tx = ?settings.tx_address,
            l2_address,
            "UDP radio bound"
        );
        Ok(Self {
            socket,
            tx_address: settings.tx_address,
            l2_address,
            filters: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    #[must_use]
    pub fn l2_address(&self) -> L2Address {
        self.l2_address
    }

    /// Receives one datagram into `buf`.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let (len, _) = self.socket.recv_from(buf).await?;
        self.counters.rx_frames.fetch_add(1, Ordering::Relaxed);
        Ok(len)
    }

    /// Drops frames from each entry's source for its duration.
    pub fn apply_l2_filters(&self, entries: &[L2FilterEntry]) {
        let now = Instant::now();
        let mut filters = self.filters.lock();
        for entry in entries {
            let until = now + Duration::from_millis(u64::from(entry.duration_ms));
            filters
                .entry(entry.source)
                .and_modify(|t| *t = (*t).max(until))
                .or_insert(until);
        }
        debug!(added = entries.len(), active = filters.len(), "L2 filters applied");
    }

    /// Whether a frame from `source` should be processed: not our own echo
    /// and not under an active filter.
    pub fn admit(&self, source: L2Address) -> bool {
        if source == self.l2_address {
            return false;
        }
        let mut filters = self.filters.lock();
        match filters.get(&source) {
            Some(until) if *until > Instant::now() => {
                self.counters.rx_filtered.fetch_add(1, Ordering::Relaxed);
                false
            }
            Some(_) => {
                filters.remove(&source);
                true
            }
            None => true,
        }
    }

    #[must_use]
    pub fn stats(&self) -> RadioStats {
        let now = Instant::now();
        RadioStats {
            rx_frames: self.counters.rx_frames.load(Ordering::Relaxed),
            rx_filtered: self.counters.rx_filtered.load(Ordering::Relaxed),
            tx_frames: self.counters.tx_frames.load(Ordering::Relaxed),
            tx_bytes: self.counters.tx_bytes.load(Ordering::Relaxed),
            active_filters: self.filters.lock().values().filter(|t| **t > now).count(),
        }
    }
}

#[async_trait]
impl RadioTransmitter for UdpRadio {
    async fn transmit(&self, payload: &[u8], kind: TransmitType) -> Result<usize, TransmitError> {
        let Some(target) = self.tx_address else {
            return Err(TransmitError::Radio("no transmit address configured".into()));
        };
        let datagram = frame(self.l2_address, payload);
        let sent = self
            .socket
            .send_to(&datagram, target)
            .await
            .map_err(|e| TransmitError::Radio(e.to_string()))?;
        self.counters.tx_frames.fetch_add(1, Ordering::Relaxed);
        self.counters
            .tx_bytes
            .fetch_add(sent as u64, Ordering::Relaxed);
        debug!(?kind, bytes = sent, "Frame transmitted");
        Ok(sent)
    }
}
