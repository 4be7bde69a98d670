//! SMS-DELIVER PDU synthesis and parsing.
//!
//! Grounded in `original_source/.../sms.c`'s `build_and_send_message`, which assembles a
//! synthetic SMS-DELIVER entirely in-process (stub SMSC, bot's address as the originator, a fixed
//! TP-PID/TP-DCS, a timestamp built from the current clock) rather than ever touching a real
//! network PDU. The nibble-swapped BCD timestamp and the pre-2001-clamped-to-2022 year rule are
//! both carried over unchanged, since the spec calls out the exact same workaround: the original
//! hardware's RTC can power up at a pre-2001 default, and stamping messages with that date breaks
//! message ordering on the host, so any year read from the clock before 2001 is clamped to 2022.
use crate::errors::{BridgeError, BridgeResult};
use crate::qmi::frame::{
    QmiFrame, QmiHeader, Tlv, SERVICE_WMS, WMS_DELETE, WMS_EVENT_REPORT, WMS_READ_MESSAGE,
};
use crate::sms::codec::{ascii_to_gsm7, bcd_decode_digit_pair, bcd_encode_digit_pair, gsm7_to_ascii};

/// Fixed transaction id used for the unsolicited `WMS_EVENT_REPORT` indication: indications carry
/// no host-originated transaction to echo, so the original's `QMI_EVENT_IND_TRANSACTION_ID` stand-in
/// is reused verbatim.
pub const NOTIFY_TRANSACTION_ID: u16 = 2;

/// TP-PID: "SMS type 0", silently deliverable implementation-specific protocol.
const TP_PID_DEFAULT: u8 = 0x00;
/// TP-DCS: default 7-bit GSM alphabet, no message class.
const TP_DCS_GSM7: u8 = 0x00;
/// TP-MTI low bits for SMS-DELIVER with no TP-MMS, no TP-SRI, no TP-UDHI.
const TP_FIRST_OCTET: u8 = 0x04;
/// TP-VPF mask within the SMS-SUBMIT first octet.
const TP_VPF_MASK: u8 = 0x18;

/// Stub SMSC address: length byte (7) followed by type-of-address `91` (international, ISDN
/// numbering plan) and an all-zero number padded to a full octet, matching the literal bytes the
/// original writes rather than relying on the modem's own default-SMSC lookup.
const SMSC_STUB: [u8; 8] = [0x07, 0x91, 0x00, 0x00, 0x00, 0x00, 0x00, 0xF0];

/// A calendar timestamp as stored in a TP-SCTS / TP-VP field: six BCD digit pairs plus a
/// quarter-hour timezone offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Timezone offset in quarter-hours from GMT, sign included.
    pub tz_quarter_hours: i8,
}

impl Timestamp {
    /// Build a timestamp from a raw calendar year, clamping any pre-2001 year to 2022.
    ///
    /// The original hardware's RTC can power on reporting a year before 2001 (its pre-NITZ
    /// default); stamping a synthesized message with that date would sort it before every real
    /// message already on the host, so the clamp substitutes a fixed, always-later year instead.
    pub fn from_calendar(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        tz_quarter_hours: i8,
    ) -> Self {
        let year = if year < 2001 { 2022 } else { year };
        Timestamp {
            year,
            month,
            day,
            hour,
            minute,
            second,
            tz_quarter_hours,
        }
    }

    /// Build a timestamp from the wall clock, applying the same pre-2001 clamp as
    /// [`Self::from_calendar`].
    pub fn now() -> Self {
        use chrono::{Datelike, Timelike, Utc};
        let now = Utc::now();
        Timestamp::from_calendar(
            now.year() as u16,
            now.month() as u8,
            now.day() as u8,
            now.hour() as u8,
            now.minute() as u8,
            now.second() as u8,
            0,
        )
    }

    fn to_bcd(self) -> [u8; 7] {
        let yy = (self.year % 100) as u8;
        let tz_sign = self.tz_quarter_hours < 0;
        let tz_mag = self.tz_quarter_hours.unsigned_abs();
        let mut tz_byte = bcd_encode_digit_pair(tz_mag);
        if tz_sign {
            tz_byte |= 0x08;
        }
        [
            bcd_encode_digit_pair(yy),
            bcd_encode_digit_pair(self.month),
            bcd_encode_digit_pair(self.day),
            bcd_encode_digit_pair(self.hour),
            bcd_encode_digit_pair(self.minute),
            bcd_encode_digit_pair(self.second),
            tz_byte,
        ]
    }

    fn from_bcd(bytes: &[u8; 7]) -> Self {
        let yy = bcd_decode_digit_pair(bytes[0]) as u16;
        let tz_negative = bytes[6] & 0x08 != 0;
        let tz_mag = bcd_decode_digit_pair(bytes[6] & !0x08) as i8;
        Timestamp {
            year: 2000 + yy,
            month: bcd_decode_digit_pair(bytes[1]),
            day: bcd_decode_digit_pair(bytes[2]),
            hour: bcd_decode_digit_pair(bytes[3]),
            minute: bcd_decode_digit_pair(bytes[4]),
            second: bcd_decode_digit_pair(bytes[5]),
            tz_quarter_hours: if tz_negative { -tz_mag } else { tz_mag },
        }
    }
}

/// A synthesized SMS-DELIVER PDU: stub SMSC, bot address as originator, GSM-7 body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsDeliverPdu {
    pub originator: String,
    pub timestamp: Timestamp,
    pub body: String,
}

fn encode_semi_octet_address(digits: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity((digits.len() + 1) / 2);
    let mut chars = digits.bytes();
    loop {
        let lo = match chars.next() {
            Some(c) => c - b'0',
            None => break,
        };
        let hi = match chars.next() {
            Some(c) => c - b'0',
            None => 0x0f,
        };
        bytes.push((hi << 4) | lo);
    }
    bytes
}

fn decode_semi_octet_address(bytes: &[u8], digit_count: usize) -> String {
    let mut out = String::with_capacity(digit_count);
    'outer: for &b in bytes {
        for nibble in [b & 0x0f, b >> 4] {
            if out.len() >= digit_count {
                break 'outer;
            }
            if nibble == 0x0f {
                break 'outer;
            }
            out.push((b'0' + nibble) as char);
        }
    }
    out
}

impl SmsDeliverPdu {
    /// Serialize to the wire bytes the WMS raw-send TLV expects: SMSC stub (length 0, meaning
    /// "use default"), first octet, originator address, TP-PID, TP-DCS, TP-SCTS, UDL, UD.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(SMSC_STUB);
        out.push(TP_FIRST_OCTET);
        out.push(self.originator.len() as u8);
        out.push(0x81); // type-of-number/numbering-plan: unknown/ISDN, matching the original stub.
        out.extend(encode_semi_octet_address(&self.originator));
        out.push(TP_PID_DEFAULT);
        out.push(TP_DCS_GSM7);
        out.extend(self.timestamp.to_bcd());
        let packed = ascii_to_gsm7(self.body.as_bytes()).expect("body is validated 7-bit clean");
        out.push(self.body.len() as u8);
        out.extend(packed);
        out
    }

    /// Parse a PDU previously produced by [`Self::to_bytes`]. Round-tripping through
    /// `to_bytes`/`parse` must reproduce the original fields exactly.
    pub fn parse(buf: &[u8]) -> BridgeResult<Self> {
        let mut pos = 0usize;
        let smsc_len = *buf
            .get(pos)
            .ok_or_else(|| BridgeError::BadFrame("PDU truncated: SMSC length".into()))?
            as usize;
        pos += 1 + smsc_len;
        pos += 1; // first octet, not round-tripped as a field (always SMS-DELIVER).
        let addr_digits = *buf
            .get(pos)
            .ok_or_else(|| BridgeError::BadFrame("PDU truncated: address length".into()))?
            as usize;
        pos += 1;
        pos += 1; // type-of-number/numbering-plan octet.
        let addr_bytes_len = (addr_digits + 1) / 2;
        let addr_bytes = buf
            .get(pos..pos + addr_bytes_len)
            .ok_or_else(|| BridgeError::BadFrame("PDU truncated: address".into()))?;
        let originator = decode_semi_octet_address(addr_bytes, addr_digits);
        pos += addr_bytes_len;
        pos += 2; // TP-PID, TP-DCS.
        let ts_bytes: [u8; 7] = buf
            .get(pos..pos + 7)
            .ok_or_else(|| BridgeError::BadFrame("PDU truncated: timestamp".into()))?
            .try_into()
            .unwrap();
        pos += 7;
        let timestamp = Timestamp::from_bcd(&ts_bytes);
        let udl = *buf
            .get(pos)
            .ok_or_else(|| BridgeError::BadFrame("PDU truncated: UDL".into()))? as usize;
        pos += 1;
        let packed_len = (udl * 7 + 7) / 8;
        let packed = buf
            .get(pos..pos + packed_len)
            .ok_or_else(|| BridgeError::BadFrame("PDU truncated: UD".into()))?;
        let body_bytes = gsm7_to_ascii(packed, udl)?;
        let body = String::from_utf8(body_bytes)
            .map_err(|e| BridgeError::BadFrame(format!("body not utf8: {e}")))?;
        Ok(SmsDeliverPdu {
            originator,
            timestamp,
            body,
        })
    }
}

/// A host-originated SMS-SUBMIT PDU, decoded from an intercepted `WMS_RAW_SEND`/`WMS_RAW_WRITE`
/// request. Only the fields the command interpreter needs (destination address, body) are kept;
/// TP-VP and TP-MR are parsed past but not retained, since nothing downstream echoes them back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsSubmitPdu {
    pub destination: String,
    pub body: String,
}

impl SmsSubmitPdu {
    /// Parse a TP-SUBMIT PDU as written by a host wanting to send an SMS. Unlike TP-DELIVER, there
    /// is no TP-SCTS; instead a TP-MR (message reference) byte follows the first octet, and TP-VP
    /// is present only when the VPF bits in the first octet say so.
    pub fn parse(buf: &[u8]) -> BridgeResult<Self> {
        let mut pos = 0usize;
        let smsc_len = *buf
            .get(pos)
            .ok_or_else(|| BridgeError::BadFrame("PDU truncated: SMSC length".into()))?
            as usize;
        pos += 1 + smsc_len;
        let first_octet = *buf
            .get(pos)
            .ok_or_else(|| BridgeError::BadFrame("PDU truncated: first octet".into()))?;
        pos += 1;
        pos += 1; // TP-MR.
        let addr_digits = *buf
            .get(pos)
            .ok_or_else(|| BridgeError::BadFrame("PDU truncated: address length".into()))?
            as usize;
        pos += 1;
        pos += 1; // type-of-number/numbering-plan octet.
        let addr_bytes_len = (addr_digits + 1) / 2;
        let addr_bytes = buf
            .get(pos..pos + addr_bytes_len)
            .ok_or_else(|| BridgeError::BadFrame("PDU truncated: address".into()))?;
        let destination = decode_semi_octet_address(addr_bytes, addr_digits);
        pos += addr_bytes_len;
        pos += 2; // TP-PID, TP-DCS.
        let vpf = first_octet & TP_VPF_MASK;
        let vp_len = match vpf {
            0x00 => 0,
            0x10 => 1,
            0x08 | 0x18 => 7,
            _ => return Err(BridgeError::BadFrame(format!("unsupported TP-VPF 0x{vpf:02x}"))),
        };
        pos += vp_len;
        let udl = *buf
            .get(pos)
            .ok_or_else(|| BridgeError::BadFrame("PDU truncated: UDL".into()))? as usize;
        pos += 1;
        let packed_len = (udl * 7 + 7) / 8;
        let packed = buf
            .get(pos..pos + packed_len)
            .ok_or_else(|| BridgeError::BadFrame("PDU truncated: UD".into()))?;
        let body_bytes = gsm7_to_ascii(packed, udl)?;
        let body = String::from_utf8(body_bytes)
            .map_err(|e| BridgeError::BadFrame(format!("body not utf8: {e}")))?;
        Ok(SmsSubmitPdu { destination, body })
    }
}

/// Build the unsolicited `WMS_EVENT_REPORT` indication that tells the host a new message has
/// arrived: storage index TLV, mode TLV (SMS, not CDMA/voicemail), IMS-disabled TLV.
pub fn build_notify_frame(client_id: u8, message_index: u32) -> QmiFrame {
    let mut storage = vec![0x01]; // storage type: UIM/NV "memory" index that follows.
    storage.extend(message_index.to_le_bytes());
    QmiFrame {
        header: QmiHeader {
            control: 0x80,
            service: SERVICE_WMS,
            client_id,
            ctl_flags: 0x04, // indication
            transaction_id: NOTIFY_TRANSACTION_ID,
            message_id: WMS_EVENT_REPORT,
        },
        tlvs: vec![
            Tlv::new(0x10, storage),
            Tlv::new(0x12, vec![0x01]), // mode: GW SMS.
            Tlv::new(0x16, vec![0x00]), // ims disabled.
        ],
    }
}

/// Build the `WMS_READ_MESSAGE` response carrying the synthesized message's raw PDU.
pub fn build_read_response_frame(client_id: u8, transaction_id: u16, pdu: &SmsDeliverPdu) -> QmiFrame {
    let body = pdu.to_bytes();
    let mut raw = Vec::with_capacity(2 + body.len());
    raw.extend((body.len() as u16).to_le_bytes());
    raw.extend(body);
    QmiFrame {
        header: QmiHeader {
            control: 0x80,
            service: SERVICE_WMS,
            client_id,
            ctl_flags: 0x02, // response
            transaction_id,
            message_id: WMS_READ_MESSAGE,
        },
        tlvs: vec![
            Tlv::new(0x02, vec![0x00, 0x00, 0x00, 0x00]), // result: success.
            Tlv::new(0x01, vec![0x01]),                   // tag format: raw UMTS PDU.
            Tlv::new(0x06, raw),
        ],
    }
}

/// Build a `WMS_DELETE` response with the given result/response code pair. Callers emit this
/// twice in a row when the deleted message had a non-empty body: `(0x0001, 0x0032)` followed by
/// `(0x0000, 0x0000)`, matching the double-acknowledgement quirk host stacks are known to expect.
pub fn build_delete_response_frame(
    client_id: u8,
    transaction_id: u16,
    result: u16,
    response: u16,
) -> QmiFrame {
    let mut value = Vec::with_capacity(4);
    value.extend(result.to_le_bytes());
    value.extend(response.to_le_bytes());
    QmiFrame {
        header: QmiHeader {
            control: 0x80,
            service: SERVICE_WMS,
            client_id,
            ctl_flags: 0x02,
            transaction_id,
            message_id: WMS_DELETE,
        },
        tlvs: vec![Tlv::new(0x02, value)],
    }
}

/// Build the acknowledgement response for an intercepted `WMS_RAW_SEND`/`WMS_RAW_WRITE` request,
/// so the host believes its outgoing SMS reached the network even though it was diverted into the
/// command interpreter instead.
pub fn build_send_ack_frame(client_id: u8, transaction_id: u16, message_id: u16) -> QmiFrame {
    QmiFrame {
        header: QmiHeader {
            control: 0x80,
            service: SERVICE_WMS,
            client_id,
            ctl_flags: 0x02,
            transaction_id,
            message_id,
        },
        tlvs: vec![Tlv::new(0x02, vec![0x00, 0x00, 0x00, 0x00])],
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> SmsDeliverPdu {
        SmsDeliverPdu {
            originator: "1234567".to_string(),
            timestamp: Timestamp::from_calendar(2024, 3, 15, 9, 30, 12, 0),
            body: "ready".to_string(),
        }
    }

    #[test]
    fn round_trip_identity() {
        let pdu = sample();
        let bytes = pdu.to_bytes();
        let parsed = SmsDeliverPdu::parse(&bytes).unwrap();
        assert_eq!(parsed, pdu);
    }

    #[test]
    fn odd_length_originator_round_trips() {
        let pdu = SmsDeliverPdu {
            originator: "123".to_string(),
            ..sample()
        };
        let bytes = pdu.to_bytes();
        assert_eq!(SmsDeliverPdu::parse(&bytes).unwrap(), pdu);
    }

    #[test]
    fn pre_2001_year_clamped_to_2022() {
        let ts = Timestamp::from_calendar(1980, 1, 1, 0, 0, 0, 0);
        assert_eq!(ts.year, 2022);
    }

    #[test]
    fn timestamp_bcd_round_trip() {
        let ts = Timestamp::from_calendar(2024, 12, 31, 23, 59, 59, -4);
        let bcd = ts.to_bcd();
        assert_eq!(Timestamp::from_bcd(&bcd), ts);
    }

    #[test]
    fn deliver_pdu_carries_literal_smsc_stub() {
        let bytes = sample().to_bytes();
        assert_eq!(&bytes[..8], &SMSC_STUB);
    }

    fn submit_bytes(destination: &str, body: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(SMSC_STUB);
        out.push(0x01); // SMS-SUBMIT, VPF absent.
        out.push(0x00); // TP-MR.
        out.push(destination.len() as u8);
        out.push(0x81);
        out.extend(encode_semi_octet_address(destination));
        out.push(TP_PID_DEFAULT);
        out.push(TP_DCS_GSM7);
        let packed = ascii_to_gsm7(body.as_bytes()).unwrap();
        out.push(body.len() as u8);
        out.extend(packed);
        out
    }

    #[test]
    fn submit_pdu_parses_destination_and_body() {
        let bytes = submit_bytes("5551234567", "status");
        let submit = SmsSubmitPdu::parse(&bytes).unwrap();
        assert_eq!(submit.destination, "5551234567");
        assert_eq!(submit.body, "status");
    }

    #[test]
    fn notify_frame_addresses_given_client() {
        let frame = build_notify_frame(7, 42);
        assert_eq!(frame.header.client_id, 7);
        assert_eq!(frame.header.message_id, WMS_EVENT_REPORT);
        assert_eq!(frame.header.ctl_flags, 0x04);
    }

    #[test]
    fn read_response_carries_wrapped_pdu() {
        let pdu = sample();
        let frame = build_read_response_frame(3, 9, &pdu);
        assert_eq!(frame.header.transaction_id, 9);
        let raw = &frame.tlv(0x06).unwrap().value;
        let len = u16::from_le_bytes([raw[0], raw[1]]) as usize;
        assert_eq!(&raw[2..2 + len], pdu.to_bytes().as_slice());
    }
}
