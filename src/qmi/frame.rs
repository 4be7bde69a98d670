//! QMUX/QMI frame parsing and serialization.
//!
//! Corresponds to the `QmiFrame` "view over a byte buffer" from the data model: a tagged parser
//! that takes a byte slice and returns a typed view plus the remainder, rather than the
//! pointer-arithmetic struct overlays the original C used. Built with `nom`, the same parsing
//! crate the teacher reaches for in `src/parse.rs` (there for textual AT responses; here for
//! binary QMUX/QMI framing).
//!
//! A `QmiFrame` that round-trips through [`QmiFrame::parse`] then [`QmiFrame::to_bytes`] MUST
//! reproduce the exact original bytes (§6, §8 property). Every length field is recomputed from
//! the TLV contents at serialization time; none is ever a baked-in literal.
use bytes::{BufMut, BytesMut};
use nom::bytes::complete::take;
use nom::multi::many0;
use nom::number::complete::{le_u16, le_u8};
use nom::IResult;

use crate::errors::{BridgeError, BridgeResult};

/// Expected value of the leading QMUX framing octet.
pub const QMUX_FRAMING: u8 = 0x01;

/// WMS (SMS) QMI service id.
pub const SERVICE_WMS: u8 = 0x05;

/// `QMI_CLIENT_REGISTER`, common to every QMI service's control interface.
pub const MSG_CLIENT_REGISTER: u16 = 0x0022;
/// `QMI_CLIENT_RELEASE`.
pub const MSG_CLIENT_RELEASE: u16 = 0x0023;

/// WMS message ids relevant to the SMS interception state machine.
pub const WMS_EVENT_REPORT: u16 = 0x0001;
pub const WMS_RAW_SEND: u16 = 0x0020;
pub const WMS_RAW_WRITE: u16 = 0x0021;
pub const WMS_READ_MESSAGE: u16 = 0x0022;
pub const WMS_DELETE: u16 = 0x0024;

/// A single QMI TLV: `{type: u8, length: u16 LE, value}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tag: u8,
    pub value: Vec<u8>,
}
impl Tlv {
    pub fn new(tag: u8, value: Vec<u8>) -> Self {
        Tlv { tag, value }
    }
    fn encoded_len(&self) -> usize {
        1 + 2 + self.value.len()
    }
}

/// The QMUX + QMI header fields common to every frame this crate synthesizes or inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QmiHeader {
    pub control: u8,
    pub service: u8,
    pub client_id: u8,
    pub ctl_flags: u8,
    pub transaction_id: u16,
    pub message_id: u16,
}

/// A fully parsed (or about-to-be-serialized) QMI frame: header plus TLVs.
///
/// `length` and `payload_length` are never stored; they are derived from `tlvs` whenever the
/// frame is serialized, so a frame built field-by-field and one round-tripped through `parse`
/// always serialize identically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QmiFrame {
    pub header: QmiHeader,
    pub tlvs: Vec<Tlv>,
}

fn tlv(input: &[u8]) -> IResult<&[u8], Tlv> {
    let (input, tag) = le_u8(input)?;
    let (input, len) = le_u16(input)?;
    let (input, value) = take(len as usize)(input)?;
    Ok((
        input,
        Tlv {
            tag,
            value: value.to_vec(),
        },
    ))
}

fn header(input: &[u8]) -> IResult<&[u8], (u8, u16, QmiHeader)> {
    let (input, framing) = le_u8(input)?;
    let (input, length) = le_u16(input)?;
    let (input, control) = le_u8(input)?;
    let (input, service) = le_u8(input)?;
    let (input, client_id) = le_u8(input)?;
    let (input, ctl_flags) = le_u8(input)?;
    let (input, transaction_id) = le_u16(input)?;
    let (input, message_id) = le_u16(input)?;
    let (input, _payload_length) = le_u16(input)?;
    Ok((
        input,
        (
            framing,
            length,
            QmiHeader {
                control,
                service,
                client_id,
                ctl_flags,
                transaction_id,
                message_id,
            },
        ),
    ))
}

impl QmiFrame {
    /// Parse a complete frame from `buf`.
    ///
    /// Per the data-model invariant, a frame whose `length` field doesn't match the buffer size
    /// is considered opaque: this returns `Err(BadFrame)` and the caller (the proxy hook chain)
    /// forwards the original bytes unmodified rather than dropping or rewriting them.
    pub fn parse(buf: &[u8]) -> BridgeResult<QmiFrame> {
        let (rest, (framing, length, hdr)) =
            header(buf).map_err(|e| BridgeError::BadFrame(format!("{e}")))?;
        if framing != QMUX_FRAMING {
            return Err(BridgeError::BadFrame(format!(
                "unexpected framing octet 0x{framing:02x}"
            )));
        }
        if length as usize != buf.len().saturating_sub(1) {
            return Err(BridgeError::BadFrame(format!(
                "length field {length} does not match buffer size {}",
                buf.len()
            )));
        }
        let (rest, tlvs) =
            many0(tlv)(rest).map_err(|e| BridgeError::BadFrame(format!("{e}")))?;
        if !rest.is_empty() {
            return Err(BridgeError::BadFrame("trailing bytes after TLVs".into()));
        }
        Ok(QmiFrame { header: hdr, tlvs })
    }

    /// Service id this frame belongs to (byte 4 of the QMUX header).
    pub fn service(&self) -> u8 {
        self.header.service
    }

    /// Look up the first TLV with the given tag.
    pub fn tlv(&self, tag: u8) -> Option<&Tlv> {
        self.tlvs.iter().find(|t| t.tag == tag)
    }

    /// Serialize back to wire format, recomputing every length field from `self.tlvs`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload_length: usize = self.tlvs.iter().map(Tlv::encoded_len).sum();
        // QMI header (ctl + txn + msg + plen) plus the payload that follows it.
        let qmi_len = 1 + 2 + 2 + 2 + payload_length;
        // Total buffer size minus the framing octet itself (data-model invariant on `length`).
        let total_len = 1 + 2 + 1 + 1 + 1 + qmi_len;
        let qmux_length = total_len - 1;

        let mut buf = BytesMut::with_capacity(total_len);
        buf.put_u8(QMUX_FRAMING);
        buf.put_u16_le(qmux_length as u16);
        buf.put_u8(self.header.control);
        buf.put_u8(self.header.service);
        buf.put_u8(self.header.client_id);
        buf.put_u8(self.header.ctl_flags);
        buf.put_u16_le(self.header.transaction_id);
        buf.put_u16_le(self.header.message_id);
        buf.put_u16_le(payload_length as u16);
        for t in &self.tlvs {
            buf.put_u8(t.tag);
            buf.put_u16_le(t.value.len() as u16);
            buf.put_slice(&t.value);
        }
        buf.to_vec()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> QmiFrame {
        QmiFrame {
            header: QmiHeader {
                control: 0x80,
                service: SERVICE_WMS,
                client_id: 0x01,
                ctl_flags: 0x04,
                transaction_id: 2,
                message_id: WMS_EVENT_REPORT,
            },
            tlvs: vec![
                Tlv::new(0x10, vec![0x01, 0x2a, 0x00, 0x00, 0x00]),
                Tlv::new(0x12, vec![0x01]),
                Tlv::new(0x16, vec![0x00]),
            ],
        }
    }

    #[test]
    fn round_trip_identity() {
        let frame = sample();
        let bytes = frame.to_bytes();
        let parsed = QmiFrame::parse(&bytes).expect("parses");
        assert_eq!(parsed, frame);
        assert_eq!(parsed.to_bytes(), bytes);
    }

    #[test]
    fn rejects_bad_framing_octet() {
        let mut bytes = sample().to_bytes();
        bytes[0] = 0x02;
        assert!(QmiFrame::parse(&bytes).is_err());
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut bytes = sample().to_bytes();
        bytes.push(0xff);
        assert!(QmiFrame::parse(&bytes).is_err());
    }

    #[test]
    fn tlv_lookup() {
        let frame = sample();
        assert_eq!(frame.tlv(0x12).unwrap().value, vec![0x01]);
        assert!(frame.tlv(0x99).is_none());
    }
}
