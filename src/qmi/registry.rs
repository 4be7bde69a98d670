//! QMI client registration tracking (§ client registry / force-reset).
//!
//! Grounded in `original_source/.../ipc.c`'s `track_client_count` / `drain_client_tracking` /
//! `force_close_qmi`: the original keeps a fixed-size array of registered `(service, client_id)`
//! pairs and, once it either overflows or has held clients open longer than the force-reset
//! timeout, synthesizes `QMI_CLIENT_RELEASE` frames for every slot plus a defensive sweep over
//! every `(service, instance)` combination the modem might expose, rather than trusting the
//! client side to clean up after itself.
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::frame::{QmiFrame, QmiHeader, MSG_CLIENT_RELEASE};

/// Maximum number of clients tracked before a forced reset is triggered.
pub const MAX_CLIENTS: usize = 32;

/// How long a client may stay registered before the registry forces a reset regardless of count.
pub const FORCE_RESET_TIMEOUT: Duration = Duration::from_secs(240);

/// Services swept by [`ClientRegistry::force_close_frames`]'s defensive nuke: every service id
/// the modem's QMUX multiplexer can address, matching the original's belief that it can't know in
/// advance which services the modem happens to expose.
const SWEEP_SERVICES: std::ops::RangeInclusive<u8> = 0..=255;
/// Instance ids swept per service, both for the defensive nuke and for each individually tracked
/// client (the original releases every instance of a client's service, not just the one instance
/// it happened to register against).
const SWEEP_INSTANCES: std::ops::RangeInclusive<u8> = 0..=5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RegisteredClient {
    service: u8,
    client_id: u8,
}

/// Tracks which `(service, client_id)` pairs are currently registered against the modem.
///
/// Registrations are popped in LIFO order on release, matching the original's use of the
/// tracking array as a stack rather than a set.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: Vec<RegisteredClient>,
    oldest_registration: Option<Instant>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        ClientRegistry {
            clients: Vec::with_capacity(MAX_CLIENTS),
            oldest_registration: None,
        }
    }

    /// Record a successful `QMI_CLIENT_REGISTER` response.
    pub fn track(&mut self, service: u8, client_id: u8) {
        if self.clients.is_empty() {
            self.oldest_registration = Some(Instant::now());
        }
        self.clients.push(RegisteredClient { service, client_id });
        debug!(service, client_id, count = self.clients.len(), "tracked QMI client");
    }

    /// Record a `QMI_CLIENT_RELEASE`, popping the most recently tracked matching entry.
    pub fn release(&mut self, service: u8, client_id: u8) {
        if let Some(pos) = self
            .clients
            .iter()
            .rposition(|c| c.service == service && c.client_id == client_id)
        {
            self.clients.remove(pos);
        }
        if self.clients.is_empty() {
            self.oldest_registration = None;
        }
    }

    /// Number of clients currently tracked.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Whether the registry has crossed either the count or age threshold for a forced reset.
    pub fn needs_force_reset(&self) -> bool {
        if self.clients.len() > MAX_CLIENTS {
            return true;
        }
        match self.oldest_registration {
            Some(since) => since.elapsed() >= FORCE_RESET_TIMEOUT,
            None => false,
        }
    }

    /// Build the `QMI_CLIENT_RELEASE` frames for a forced reset: for each tracked client (LIFO),
    /// every instance of that client's service, followed by a defensive sweep across every
    /// `(service, instance)` pair the modem could possibly expose. This mirrors the original's
    /// belt-and-braces approach of releasing slots it isn't even sure are open — it has no way to
    /// know which instance of a service actually registered, so it releases all of them.
    pub fn force_close_frames(&mut self) -> Vec<QmiFrame> {
        warn!(
            count = self.clients.len(),
            "forcing QMI client registry reset"
        );
        let mut frames = Vec::new();
        while let Some(c) = self.clients.pop() {
            for instance in SWEEP_INSTANCES {
                frames.push(release_frame(c.service, instance));
            }
        }
        self.oldest_registration = None;
        for service in SWEEP_SERVICES {
            for instance in SWEEP_INSTANCES {
                frames.push(release_frame(service, instance));
            }
        }
        frames
    }

    /// The client id most recently tracked for `service`, used to address synthesized frames at
    /// whichever client the host registered for that service.
    pub fn client_id_for_service(&self, service: u8) -> Option<u8> {
        self.clients
            .iter()
            .rev()
            .find(|c| c.service == service)
            .map(|c| c.client_id)
    }
}

fn release_frame(service: u8, client_id: u8) -> QmiFrame {
    QmiFrame {
        header: QmiHeader {
            control: 0x00,
            service,
            client_id,
            ctl_flags: 0x00,
            transaction_id: 0,
            message_id: MSG_CLIENT_RELEASE,
        },
        tlvs: Vec::new(),
    }
}
