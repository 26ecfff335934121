//! Observability and Metrics
//!
//! Counters for the relay: admissions, frames, handshakes and deliveries.
//!
//! Uses atomic counters so the accept loop, connection tasks and hub task can all record into
//! one shared instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for relay operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections admitted
    pub connections_total: AtomicU64,
    /// Currently open admitted connections
    pub connections_active: AtomicU64,
    /// Connections dropped by the whitelist
    pub connections_rejected: AtomicU64,
    /// Frames read off sockets
    pub frames_received: AtomicU64,
    /// Frames dropped (malformed, schema or routing errors)
    pub frames_dropped: AtomicU64,
    /// Successful identify handshakes
    pub handshakes_success: AtomicU64,
    /// Rejected identify requests
    pub handshakes_failed: AtomicU64,
    /// Frames queued to recipients
    pub deliveries: AtomicU64,
    /// Bytes queued to recipients (without delimiters)
    pub bytes_delivered: AtomicU64,
    /// Frames that could not be queued because the recipient's writer was gone
    pub delivery_failures: AtomicU64,
    /// Socket-level read or write errors
    pub transport_errors: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            bytes_delivered: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record an admitted connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an admitted connection going away
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a connection turned away at the door
    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame queued to a recipient
    pub fn delivery(&self, byte_count: u64) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
        self.bytes_delivered.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn delivery_failed(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Currently open connections
    pub fn active_connections(&self) -> u64 {
        self.connections_active.load(Ordering::Relaxed)
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            connections_rejected = snapshot.connections_rejected,
            frames_received = snapshot.frames_received,
            frames_dropped = snapshot.frames_dropped,
            handshakes_success = snapshot.handshakes_success,
            handshakes_failed = snapshot.handshakes_failed,
            deliveries = snapshot.deliveries,
            bytes_delivered = snapshot.bytes_delivered,
            delivery_failures = snapshot.delivery_failures,
            transport_errors = snapshot.transport_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Relay metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub deliveries: u64,
    pub bytes_delivered: u64,
    pub delivery_failures: u64,
    pub transport_errors: u64,
    pub uptime_seconds: u64,
}
