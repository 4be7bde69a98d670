//! Pending-message queue and interception state machine.
//!
//! Grounded in `original_source/.../sms.c`'s `struct message_queue` / `sms_runtime` /
//! `handle_message_state` / `process_message_queue`: a bounded queue of messages waiting to be
//! "delivered" to the host, processed one at a time (never more than one message mid-handshake),
//! advanced by a periodic tick rather than blocking waits, with a retry budget per state before
//! the original gives up and drops the message. The `#[cfg(test)] mod test` placement follows the
//! teacher's `src/parse.rs` convention of colocating unit tests with the module under test.
use std::time::{Duration, Instant};

use derive_is_enum_variant::is_enum_variant;
use tracing::{debug, warn};

use crate::errors::{BridgeError, BridgeResult};
use crate::sms::pdu::SmsDeliverPdu;

/// Maximum number of messages the queue will hold before rejecting new ones.
pub const QUEUE_CAPACITY: usize = 10;

/// How long the queue waits in any one state before retrying.
const STATE_TIMEOUT: Duration = Duration::from_secs(5);

/// How many times a state is retried before the message is abandoned.
const MAX_RETRIES: u32 = 3;

/// Where a single pending message sits in the interception handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, is_enum_variant)]
pub enum MessageState {
    /// Queued, not yet the active message.
    Pending,
    /// `WMS_EVENT_REPORT` (new-message notification) sent to the host.
    NotifySent,
    /// Waiting for the host to request the message body (`WMS_READ_MESSAGE`).
    AwaitRead,
    /// The synthesized SMS-DELIVER PDU has been handed to the host.
    ReadSent,
    /// Waiting for the host to request deletion (`WMS_DELETE`).
    AwaitDelete,
    /// Delete acknowledged back to the host.
    DeleteAck,
    /// Handshake complete; ready to be reaped from the queue.
    Done,
}

/// Where a message originated. This crate only ever synthesizes its own command replies, so every
/// message pushed onto the queue is tagged `Internal`; the variant still exists because the data
/// model distinguishes it from a real over-the-air message the modem handed up (`External`), a
/// path this crate never exercises but that the state machine's shape accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, is_enum_variant)]
pub enum MessageSource {
    None,
    Internal,
    External,
}

/// An action the tick driver should take as a result of advancing the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueAction {
    /// (Re-)send the new-message notification for this id.
    SendNotify(u32),
    /// (Re-)send the PDU body for this id.
    SendRead(u32, SmsDeliverPdu),
    /// (Re-)send the delete acknowledgement for this id.
    SendDeleteAck(u32),
    /// The message exhausted its retry budget in the given state and was dropped.
    GaveUp(u32, MessageState),
}

#[derive(Debug, Clone)]
struct PendingMessage {
    id: u32,
    pdu: SmsDeliverPdu,
    state: MessageState,
    entered_state_at: Instant,
    retries: u32,
}

/// FIFO queue of messages awaiting interception delivery, advanced one at a time.
#[derive(Debug, Default)]
pub struct MessageQueue {
    messages: Vec<PendingMessage>,
    next_id: u32,
    /// The oldest non-`Done` message's id, or `None` when the queue holds nothing live.
    current_id: Option<u32>,
    /// Set while a `SendNotify` action is outstanding and not yet confirmed by `on_notify_sent`.
    notify_pending: bool,
    /// Source of the current active message (`None` when nothing is active).
    source: MessageSource,
    /// Transaction id most recently echoed from a host `WMS_READ_MESSAGE`/`WMS_DELETE` request.
    last_host_transaction_id: Option<u16>,
}

impl MessageQueue {
    pub fn new() -> Self {
        MessageQueue {
            messages: Vec::new(),
            next_id: 1,
            current_id: None,
            notify_pending: false,
            source: MessageSource::None,
            last_host_transaction_id: None,
        }
    }

    /// Enqueue a synthesized message. Fails with [`BridgeError::QueueFull`] at capacity.
    pub fn push(&mut self, pdu: SmsDeliverPdu) -> BridgeResult<u32> {
        if self.messages.len() >= QUEUE_CAPACITY {
            return Err(BridgeError::QueueFull);
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.messages.push(PendingMessage {
            id,
            pdu,
            state: MessageState::Pending,
            entered_state_at: Instant::now(),
            retries: 0,
        });
        debug!(id, "queued synthetic SMS");
        self.refresh_current();
        Ok(id)
    }

    fn active_index(&self) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| !m.state.is_pending() && !m.state.is_done())
    }

    fn find_mut(&mut self, id: u32) -> Option<&mut PendingMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    fn transition(&mut self, id: u32, state: MessageState) {
        if let Some(m) = self.find_mut(id) {
            m.state = state;
            m.entered_state_at = Instant::now();
            m.retries = 0;
        }
        self.refresh_current();
    }

    /// Recompute `current_id`/`source` from the oldest non-`Done` message, after any mutation.
    fn refresh_current(&mut self) {
        match self.messages.iter().find(|m| !m.state.is_done()) {
            Some(m) => {
                self.current_id = Some(m.id);
                self.source = MessageSource::Internal;
            }
            None => {
                self.current_id = None;
                self.source = MessageSource::None;
            }
        }
    }

    /// The oldest non-`Done` message's id, if any.
    pub fn active_id(&self) -> Option<u32> {
        self.current_id
    }

    /// Source of the currently active message.
    pub fn source(&self) -> MessageSource {
        self.source
    }

    /// Whether a `SendNotify` action is outstanding and not yet confirmed.
    pub fn notify_pending(&self) -> bool {
        self.notify_pending
    }

    /// Transaction id most recently echoed from a host read/delete request.
    pub fn last_host_transaction_id(&self) -> Option<u16> {
        self.last_host_transaction_id
    }

    /// The PDU belonging to `id`, for a hook that needs to answer a host request synchronously.
    pub fn pdu_for(&self, id: u32) -> Option<&SmsDeliverPdu> {
        self.messages.iter().find(|m| m.id == id).map(|m| &m.pdu)
    }

    /// Whether the message's original body was non-empty, used to decide whether a delete response
    /// needs the double-acknowledgement quirk.
    pub fn body_non_empty(&self, id: u32) -> bool {
        self.messages
            .iter()
            .find(|m| m.id == id)
            .map(|m| !m.pdu.body.is_empty())
            .unwrap_or(false)
    }

    /// Host requested the message body: `AwaitRead -> ReadSent`, recording the echoed transaction.
    pub fn on_read_request(&mut self, id: u32, transaction_id: u16) {
        self.last_host_transaction_id = Some(transaction_id);
        self.transition(id, MessageState::ReadSent);
    }

    /// Host requested deletion: `AwaitDelete -> DeleteAck`, recording the echoed transaction.
    pub fn on_delete_request(&mut self, id: u32, transaction_id: u16) {
        self.last_host_transaction_id = Some(transaction_id);
        self.transition(id, MessageState::DeleteAck);
    }

    /// Host acknowledged the delete ack (or the state machine completed): reap the message.
    pub fn on_complete(&mut self, id: u32) {
        self.transition(id, MessageState::Done);
        self.messages.retain(|m| m.id != id);
        self.refresh_current();
    }

    /// Advance the queue by one tick: activate the next pending message if none is in flight,
    /// and retry or abandon the active message's current state if it has timed out.
    ///
    /// At most one [`QueueAction`] is returned per call, preserving the at-most-one-in-flight
    /// invariant — this never activates a second message while one is mid-handshake.
    pub fn tick(&mut self) -> Option<QueueAction> {
        if let Some(idx) = self.active_index() {
            let timed_out = self.messages[idx].entered_state_at.elapsed() >= STATE_TIMEOUT;
            if !timed_out {
                return None;
            }
            let (id, state, retries) = {
                let m = &self.messages[idx];
                (m.id, m.state, m.retries)
            };
            if retries >= MAX_RETRIES {
                warn!(id, ?state, "giving up on message after exhausting retries");
                self.messages.remove(idx);
                return Some(QueueAction::GaveUp(id, state));
            }
            self.messages[idx].retries += 1;
            self.messages[idx].entered_state_at = Instant::now();
            let action = self.resend_action(idx);
            if matches!(action, QueueAction::SendNotify(_)) {
                self.notify_pending = true;
            }
            return Some(action);
        }
        if let Some(idx) = self.messages.iter().position(|m| m.state == MessageState::Pending) {
            self.messages[idx].state = MessageState::NotifySent;
            self.messages[idx].entered_state_at = Instant::now();
            let id = self.messages[idx].id;
            debug!(id, "activating queued message");
            self.notify_pending = true;
            return Some(QueueAction::SendNotify(id));
        }
        None
    }

    fn resend_action(&self, idx: usize) -> QueueAction {
        let m = &self.messages[idx];
        match m.state {
            MessageState::NotifySent => QueueAction::SendNotify(m.id),
            MessageState::AwaitRead => QueueAction::SendNotify(m.id),
            MessageState::ReadSent => QueueAction::SendRead(m.id, m.pdu.clone()),
            MessageState::AwaitDelete => QueueAction::SendRead(m.id, m.pdu.clone()),
            MessageState::DeleteAck => QueueAction::SendDeleteAck(m.id),
            MessageState::Pending | MessageState::Done => unreachable!(),
        }
    }

    /// Move the active message from `NotifySent` to `AwaitRead` once the notification has gone
    /// out over the wire (tick only synthesizes the action; the caller confirms the write).
    pub fn on_notify_sent(&mut self, id: u32) {
        self.notify_pending = false;
        self.transition(id, MessageState::AwaitRead);
    }

    /// Move the active message from `ReadSent` to `AwaitDelete` once the PDU write completes.
    pub fn on_read_sent(&mut self, id: u32) {
        self.transition(id, MessageState::AwaitDelete);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sms::pdu::Timestamp;

    fn sample_pdu() -> SmsDeliverPdu {
        SmsDeliverPdu {
            originator: "5551234".to_string(),
            timestamp: Timestamp::from_calendar(2024, 1, 1, 0, 0, 0, 0),
            body: "hi".to_string(),
        }
    }

    #[test]
    fn queue_rejects_past_capacity() {
        let mut q = MessageQueue::new();
        for _ in 0..QUEUE_CAPACITY {
            q.push(sample_pdu()).unwrap();
        }
        assert!(matches!(q.push(sample_pdu()), Err(BridgeError::QueueFull)));
    }

    #[test]
    fn at_most_one_in_flight() {
        let mut q = MessageQueue::new();
        let first = q.push(sample_pdu()).unwrap();
        let second = q.push(sample_pdu()).unwrap();

        assert_eq!(q.tick(), Some(QueueAction::SendNotify(first)));
        // Second message stays Pending; ticking again produces nothing new (not yet timed out).
        assert_eq!(q.tick(), None);
        q.on_notify_sent(first);
        q.on_read_request(first, 11);
        q.on_delete_request(first, 12);
        q.on_complete(first);
        assert_eq!(q.tick(), Some(QueueAction::SendNotify(second)));
    }

    #[test]
    fn full_handshake_reaps_message() {
        let mut q = MessageQueue::new();
        let id = q.push(sample_pdu()).unwrap();
        q.tick();
        q.on_notify_sent(id);
        q.on_read_request(id, 21);
        q.on_delete_request(id, 22);
        q.on_complete(id);
        assert!(q.is_empty());
    }

    #[test]
    fn echoes_host_transaction_id() {
        let mut q = MessageQueue::new();
        let id = q.push(sample_pdu()).unwrap();
        q.tick();
        assert!(q.notify_pending());
        q.on_notify_sent(id);
        assert!(!q.notify_pending());
        q.on_read_request(id, 77);
        assert_eq!(q.last_host_transaction_id(), Some(77));
        q.on_delete_request(id, 78);
        assert_eq!(q.last_host_transaction_id(), Some(78));
    }

    #[test]
    fn current_id_and_source_track_the_active_message() {
        let mut q = MessageQueue::new();
        assert_eq!(q.active_id(), None);
        assert_eq!(q.source(), MessageSource::None);
        let id = q.push(sample_pdu()).unwrap();
        assert_eq!(q.active_id(), Some(id));
        assert_eq!(q.source(), MessageSource::Internal);
        q.on_complete(id);
        assert_eq!(q.active_id(), None);
        assert_eq!(q.source(), MessageSource::None);
    }
}
