// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session controller: one toggle, two states.
//!
//! ```text
//! Stopped --start--> Running --stop--> Stopped --start--> Running ...
//!            |                                    |
//!            +-- fresh UdpSession per transition --+
//! ```
//!
//! The controller holds at most one owned [`UdpSession`], explicitly
//! `None` between cycles. The discarded session is never reused: the
//! multicast send interface and prior group memberships cannot be cleanly
//! reverted on a live socket, so every Stopped -> Running transition
//! constructs a new instance. Bind failure surfaces a user notice and
//! leaves the controller Stopped; join failure is reported but receiving
//! continues.
//!
//! Interval changes and send-side edits (destination, payload, loopback)
//! are absorbed while Running - the transmitter re-reads the configuration
//! on every tick, so no stop/start cycle is forced.

use crate::config::{BindConfig, MulticastJoinConfig, SendConfig};
use crate::engine::receiver::ReceiveLoop;
use crate::engine::transmitter::PeriodicTransmitter;
use crate::engine::EventSink;
use crate::net::iface;
use crate::net::session::{JoinOutcome, UdpSession};
use mio::{Events, Poll, Token};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

/// Registration token for the session socket.
const SESSION_TOKEN: Token = Token(0);

/// Event capacity per poll cycle.
const EVENTS_CAPACITY: usize = 16;

/// Full configuration snapshot consumed from the presentation layer.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Local endpoint and sharing semantics.
    pub bind: BindConfig,
    /// Multicast membership request.
    pub join: MulticastJoinConfig,
    /// Whether the receive side starts on Running.
    pub receive_enabled: bool,
    /// Whether the send side starts on Running.
    pub send_enabled: bool,
    /// Periodic transmission settings.
    pub send: SendConfig,
}

/// Orchestrates session start/stop as a single logical transition.
pub struct SessionController {
    config: SessionConfig,
    poll: Poll,
    events: Events,
    session: Option<UdpSession>,
    transmitter: PeriodicTransmitter,
    receiver: ReceiveLoop,
}

impl SessionController {
    /// Create a controller in the Stopped state.
    pub fn new(config: SessionConfig) -> io::Result<Self> {
        Ok(Self {
            config,
            poll: Poll::new()?,
            events: Events::with_capacity(EVENTS_CAPACITY),
            session: None,
            transmitter: PeriodicTransmitter::new(),
            receiver: ReceiveLoop::new(SESSION_TOKEN),
        })
    }

    /// Whether a session is live.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Flip between Stopped and Running.
    pub fn toggle(&mut self, sink: &mut dyn EventSink) {
        if self.is_running() {
            self.stop(sink);
        } else {
            self.start(sink);
        }
    }

    /// Stopped -> Running: allocate a fresh session, bind, then bring up
    /// the enabled sides.
    ///
    /// On bind failure the session is discarded, a notice is surfaced,
    /// and the controller remains Stopped. A join refusal is surfaced the
    /// same way but receiving continues without the membership.
    pub fn start(&mut self, sink: &mut dyn EventSink) {
        if self.session.is_some() {
            log::debug!("[CTRL] start ignored: already running");
            return;
        }

        let mut session = UdpSession::new();
        if let Err(err) = session.bind(&self.config.bind) {
            log::debug!("[CTRL] bind failed: {}", err);
            sink.notice(&format!("bind failed: {}", err));
            return;
        }
        sink.state_changed("bound");

        if self.config.receive_enabled {
            // Any join requested before this point was deferred; now that
            // bind completed, this is the retry
            match session.join_group(&self.config.join) {
                Ok(JoinOutcome::Joined(group)) => {
                    log::debug!("[CTRL] membership established group={}", group);
                }
                Ok(JoinOutcome::Skipped | JoinOutcome::Deferred) => {}
                Err(err) => {
                    log::debug!("[CTRL] join refused: {}", err);
                    sink.notice(&format!("multicast join failed: {}", err));
                }
            }
            if let Err(err) = self.receiver.start(self.poll.registry(), &mut session) {
                sink.operational_error("receive", &err.to_string());
            }
        }

        if self.config.send_enabled {
            if let Some(iface) = &self.config.send.interface {
                session.set_send_interface(iface);
            } else if let Some(addr) = iface::send_interface_override() {
                session.set_send_interface_addr(addr);
            }
            let interval = Duration::from_secs(self.config.send.interval_secs.max(1));
            self.transmitter.start(interval);
        }

        self.session = Some(session);
        sink.state_changed("running");
    }

    /// Running -> Stopped: detach subscriptions, close and discard the
    /// session. Safe to call when already Stopped.
    pub fn stop(&mut self, sink: &mut dyn EventSink) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.receiver.stop(self.poll.registry());
        self.transmitter.stop();
        session.close();
        sink.state_changed("stopped");
        // session drops here; the next start constructs a fresh instance
    }

    /// Run one event-loop cycle: wait up to `max_wait` (clipped to the
    /// next transmitter deadline), dispatch readiness notifications, and
    /// fire a due tick. No-op while Stopped.
    pub fn pump(&mut self, max_wait: Duration, sink: &mut dyn EventSink) -> io::Result<()> {
        if self.session.is_none() {
            return Ok(());
        }

        let timeout = match self.transmitter.time_to_deadline(Instant::now()) {
            Some(remaining) => remaining.min(max_wait),
            None => max_wait,
        };
        if let Err(err) = self.poll.poll(&mut self.events, Some(timeout)) {
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        let session = self.session.as_mut().expect("running controller owns a session");
        for event in self.events.iter() {
            if event.token() == SESSION_TOKEN && event.is_readable() {
                self.receiver.on_ready(session, sink);
            }
        }

        if self.transmitter.is_due(Instant::now()) {
            self.transmitter.fire(session, &self.config.send, sink);
        }
        Ok(())
    }
}

// ===== Live reconfiguration =====

impl SessionController {
    /// Change the transmission period; effective from the next tick, no
    /// stop/start required.
    pub fn reschedule(&mut self, interval_secs: u64) {
        self.config.send.interval_secs = interval_secs;
        self.transmitter
            .reschedule(Duration::from_secs(interval_secs.max(1)));
    }

    /// Retarget the periodic transmission.
    pub fn set_destination(&mut self, destination: Ipv4Addr, port: u16) {
        self.config.send.destination = destination;
        self.config.send.port = port;
    }

    /// Toggle multicast loopback; re-applied on the next tick.
    pub fn set_loopback(&mut self, enabled: bool) {
        self.config.send.loopback = enabled;
    }

    /// Replace the transmission payload.
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.config.send.payload = payload;
    }
}

// ===== Accessors =====

impl SessionController {
    /// The active configuration snapshot.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Local endpoint of the live session.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.session.as_ref().and_then(UdpSession::local_addr)
    }

    /// Joined group of the live session.
    #[must_use]
    pub fn joined_group(&self) -> Option<Ipv4Addr> {
        self.session.as_ref().and_then(UdpSession::joined_group)
    }

    /// Multicast send interface of the live session.
    #[must_use]
    pub fn send_interface(&self) -> Option<Ipv4Addr> {
        self.session.as_ref().and_then(UdpSession::send_interface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datagram::{Datagram, SendRecord};

    #[derive(Default)]
    struct RecordingSink {
        states: Vec<String>,
        notices: Vec<String>,
        received: usize,
        sent: usize,
    }

    impl EventSink for RecordingSink {
        fn state_changed(&mut self, state: &str) {
            self.states.push(state.to_string());
        }
        fn datagram_received(&mut self, _datagram: &Datagram) {
            self.received += 1;
        }
        fn datagram_sent(&mut self, _record: &SendRecord) {
            self.sent += 1;
        }
        fn operational_error(&mut self, _context: &str, _detail: &str) {}
        fn notice(&mut self, message: &str) {
            self.notices.push(message.to_string());
        }
    }

    fn loopback_config() -> SessionConfig {
        SessionConfig {
            bind: BindConfig {
                bind_addr: Ipv4Addr::LOCALHOST,
                bind_any: false,
                ..BindConfig::default()
            },
            receive_enabled: true,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_bind_failure_surfaces_notice_and_stays_stopped() {
        // TEST-NET-1: never assigned to a local interface
        let mut controller = SessionController::new(SessionConfig {
            bind: BindConfig {
                bind_addr: Ipv4Addr::new(192, 0, 2, 1),
                bind_any: false,
                ..BindConfig::default()
            },
            ..SessionConfig::default()
        })
        .expect("poll creation should succeed");
        let mut sink = RecordingSink::default();

        controller.start(&mut sink);

        assert!(!controller.is_running());
        assert_eq!(sink.notices.len(), 1);
        assert!(sink.notices[0].contains("bind failed"));
        assert!(sink.states.is_empty());
    }

    #[test]
    fn test_start_stop_cycle() {
        let mut controller =
            SessionController::new(loopback_config()).expect("poll creation should succeed");
        let mut sink = RecordingSink::default();

        controller.start(&mut sink);
        assert!(controller.is_running());
        assert!(controller.local_addr().is_some());

        controller.stop(&mut sink);
        assert!(!controller.is_running());
        assert!(controller.local_addr().is_none());
        assert_eq!(sink.states, vec!["bound", "running", "stopped"]);

        // Stop when already stopped is a no-op
        controller.stop(&mut sink);
        assert_eq!(sink.states.len(), 3);
    }

    #[test]
    fn test_restart_constructs_fresh_session() {
        let mut controller =
            SessionController::new(loopback_config()).expect("poll creation should succeed");
        let mut sink = RecordingSink::default();

        controller.start(&mut sink);
        let first_addr = controller.local_addr();
        controller.stop(&mut sink);
        controller.start(&mut sink);

        assert!(controller.is_running());
        // Fresh instance: no membership or send-interface carry-over
        assert!(controller.joined_group().is_none());
        assert!(controller.send_interface().is_none());
        // Port 0 bind: the new socket is a different endpoint object even
        // if the OS happens to hand back the same port
        assert!(controller.local_addr().is_some());
        let _ = first_addr;
    }

    #[test]
    fn test_toggle_flips_states() {
        let mut controller =
            SessionController::new(loopback_config()).expect("poll creation should succeed");
        let mut sink = RecordingSink::default();

        controller.toggle(&mut sink);
        assert!(controller.is_running());
        controller.toggle(&mut sink);
        assert!(!controller.is_running());
    }

    #[test]
    fn test_pump_while_stopped_is_a_noop() {
        let mut controller =
            SessionController::new(loopback_config()).expect("poll creation should succeed");
        let mut sink = RecordingSink::default();
        controller
            .pump(Duration::from_millis(1), &mut sink)
            .expect("pump should succeed");
        assert_eq!(sink.received, 0);
    }

    #[test]
    fn test_reschedule_absorbed_while_running() {
        let mut config = loopback_config();
        config.send_enabled = true;
        config.send.destination = Ipv4Addr::LOCALHOST;
        config.send.port = 1; // never actually due in this test
        config.send.interval_secs = 60;
        config.send.payload = b"tick".to_vec();

        let mut controller =
            SessionController::new(config).expect("poll creation should succeed");
        let mut sink = RecordingSink::default();
        controller.start(&mut sink);

        controller.reschedule(1);
        assert!(controller.is_running());
        assert_eq!(controller.config().send.interval_secs, 1);

        controller.stop(&mut sink);
    }
}
