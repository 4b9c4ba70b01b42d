// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Deadline-driven periodic transmitter.
//!
//! The transmitter owns no thread and no OS timer: the controller derives
//! its poll timeout from [`next_deadline`](PeriodicTransmitter::next_deadline)
//! and calls [`fire`](PeriodicTransmitter::fire) when the deadline passes.
//! At most one timer is active per session; starting a second one is a
//! controller defect and halts.
//!
//! Each tick re-reads destination, payload, and the loopback flag from the
//! live [`SendConfig`], so the operator can retarget or toggle loopback
//! while transmission is running. [`reschedule`](PeriodicTransmitter::reschedule)
//! changes the period without stopping: the pending deadline is kept and
//! the new period applies from the next tick on.

use crate::config::SendConfig;
use crate::datagram::SendRecord;
use crate::engine::EventSink;
use crate::net::session::UdpSession;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

/// Recurring send driver. Inactive until [`start`](Self::start).
#[derive(Debug)]
pub struct PeriodicTransmitter {
    interval: Duration,
    next_fire: Option<Instant>,
}

impl Default for PeriodicTransmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl PeriodicTransmitter {
    /// Create an inactive transmitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            interval: Duration::from_secs(1),
            next_fire: None,
        }
    }

    /// Whether a timer is currently armed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.next_fire.is_some()
    }

    /// Effective firing period.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Arm the timer; the first tick fires one full period from now.
    ///
    /// Starting an already-active transmitter is a precondition violation
    /// and halts.
    pub fn start(&mut self, interval: Duration) {
        assert!(
            self.next_fire.is_none(),
            "transmitter already active; one timer per session"
        );
        self.interval = interval;
        self.next_fire = Some(Instant::now() + interval);
        log::debug!("[TX] started interval={:?}", interval);
    }

    /// Change the firing period without stopping transmission.
    ///
    /// The pending deadline is left in place; the new period takes effect
    /// on the next tick. Harmless when inactive (the period is stored for
    /// the next start).
    pub fn reschedule(&mut self, interval: Duration) {
        log::debug!(
            "[TX] rescheduled interval={:?} (was {:?})",
            interval,
            self.interval
        );
        self.interval = interval;
    }

    /// Cancel the timer. Safe to call when already stopped.
    pub fn stop(&mut self) {
        if self.next_fire.take().is_some() {
            log::debug!("[TX] stopped");
        }
    }

    /// Deadline of the next tick, when active.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_fire
    }

    /// Time remaining until the next tick, zero when overdue.
    #[must_use]
    pub fn time_to_deadline(&self, now: Instant) -> Option<Duration> {
        self.next_fire
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Whether the next tick is due.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_fire.is_some_and(|deadline| now >= deadline)
    }

    /// Execute one tick: re-resolve destination and loopback from the
    /// current configuration, send, and arm the next deadline.
    ///
    /// A failed transmission is reported through the sink and the schedule
    /// continues unaffected.
    pub fn fire(&mut self, session: &mut UdpSession, config: &SendConfig, sink: &mut dyn EventSink) {
        // Loopback re-applied every tick so a toggle mid-run takes effect
        session.set_loopback(config.loopback);

        let destination = SocketAddr::V4(SocketAddrV4::new(config.destination, config.port));
        match session.send(&config.payload, destination) {
            Ok(_) => {
                let source = session.local_addr().unwrap_or(SocketAddr::V4(
                    SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
                ));
                sink.datagram_sent(&SendRecord {
                    destination,
                    source,
                    payload: config.payload.clone(),
                });
            }
            Err(err) => {
                log::debug!("[TX] send failed dest={} err={}", destination, err);
                sink.operational_error("send", &err.to_string());
            }
        }

        self.next_fire = Some(Instant::now() + self.interval);
    }
}
