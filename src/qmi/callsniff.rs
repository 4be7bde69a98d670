//! Call-indication sniffing (voice-service `QMI_VOICE_ALL_CALL_STATUS_IND` watching).
//!
//! Grounded in `original_source/.../sms.c` and `command.c`'s use of fixed byte offsets into the
//! raw QMI indication buffer to detect a ringing/connected/ended call, rather than fully parsing
//! the voice service's TLVs. This mirrors that: it is a read-only pattern match over a handful of
//! offsets (0, 3, 4, 6, 9, 18, 20, 21), never a `QmiFrame::parse`. The original does this because
//! the voice indication's interesting bytes sit at a stable offset regardless of which particular
//! TLVs are present; this crate keeps that shortcut rather than inventing a full voice-service TLV
//! schema the spec never asked for.
use crate::qmi::frame::SERVICE_WMS;

/// Minimum buffer length the sniffer needs to look at every offset it cares about.
const MIN_LEN: usize = 22;

/// QMI service id for voice-call indications.
pub const SERVICE_VOICE: u8 = 0x09;

/// Indication message id for `QMI_VOICE_ALL_CALL_STATUS_IND`.
const MSG_CALL_STATUS_IND: u8 = 0x2e;

/// What a sniffed buffer told us about call state, if anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    /// A call started ringing.
    Ringing,
    /// A call was answered / became active.
    Connected,
    /// A call ended.
    Ended,
}

/// Inspect a raw voice-service indication buffer for a call-state transition.
///
/// Returns `None` for anything that isn't a recognized call-status indication, including frames
/// from other services, or buffers too short to hold the offsets examined. Never allocates and
/// never touches `buf` other than to read it: the caller forwards the original bytes to the host
/// unconditionally, using the returned event only to drive the injected [`crate::audio`] backend.
pub fn sniff(buf: &[u8]) -> Option<CallEvent> {
    if buf.len() < MIN_LEN {
        return None;
    }
    if buf[0] != 0x01 {
        return None;
    }
    let service = buf[4];
    if service != SERVICE_VOICE {
        return None;
    }
    // byte 3 carries the QMUX control flag; indications always have bit 0x02 set.
    if buf[3] & 0x02 == 0 {
        return None;
    }
    // byte 6 low nibble distinguishes indication vs. response/request framing.
    if buf[6] & 0x0f != 0x04 {
        return None;
    }
    if buf[9] as u8 != MSG_CALL_STATUS_IND {
        return None;
    }
    match (buf[18], buf[20], buf[21]) {
        (0x01, 0x04, _) => Some(CallEvent::Ringing),
        (0x01, 0x06, _) => Some(CallEvent::Connected),
        (0x01, 0x07, _) | (0x01, 0x00, _) => Some(CallEvent::Ended),
        _ => None,
    }
}
