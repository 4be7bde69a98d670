//! Cell-signal sampling via AT-command scraping.
//!
//! Grounded in `original_source/.../cell.c`/`command.c`'s `render_gsm_signal_data`, which scrapes
//! signal quality out of an AT-command response rather than a QMI TLV. The original's tokenizer
//! has a specific quirk worth preserving: AT responses from this modem firmware occasionally embed
//! a stray NUL byte mid-field (a firmware artifact, not a protocol feature), and the original's
//! `strtok`-based splitting treats that NUL as an end-of-string, silently truncating the current
//! field to whatever preceded it rather than erroring. This module reproduces that truncation
//! behavior exactly, since downstream formatting (command C8's signal report) depends on it not
//! panicking on firmware noise.
use async_trait::async_trait;

/// A single decoded field from a `CellSampler` response line, after NUL-truncation.
pub type Field = String;

/// Split a raw AT response line on `,` the way the original's `strtok` loop does: a `\0` anywhere
/// in a field truncates that field (dropping everything from the NUL onward) without affecting
/// later fields, and a NUL at the very start of a field produces an empty field rather than being
/// skipped.
pub fn tokenize_truncating_at_nul(line: &str) -> Vec<Field> {
    line.split(',')
        .map(|field| match field.find('\0') {
            Some(idx) => field[..idx].to_string(),
            None => field.to_string(),
        })
        .collect()
}

/// Decoded signal-quality sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalSample {
    pub rssi_dbm: i32,
    pub ber_percent: u8,
}

/// Parse a `+CSQ: <rssi>,<ber>` style response into a [`SignalSample`].
///
/// `rssi` of 99 and `ber` of 99 both mean "not known or not detectable" in the AT command set;
/// those are passed through as-is rather than mapped to an `Option`, matching the original, which
/// never distinguished the sentinel from a real reading at this layer.
pub fn parse_csq(body: &str) -> Option<SignalSample> {
    let rest = body.strip_prefix("+CSQ:")?.trim();
    let fields = tokenize_truncating_at_nul(rest);
    let rssi_raw: i32 = fields.first()?.trim().parse().ok()?;
    let ber: u8 = fields.get(1)?.trim().parse().ok()?;
    let rssi_dbm = match rssi_raw {
        0 => -113,
        1..=30 => -113 + rssi_raw * 2,
        31 => -51,
        other => other, // 99 (unknown) passed through verbatim.
    };
    Some(SignalSample {
        rssi_dbm,
        ber_percent: ber,
    })
}

/// Host-side effect of issuing an AT command and reading back its response line.
#[async_trait]
pub trait CellSampler: Send + Sync {
    async fn query_csq(&self) -> std::io::Result<String>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tokenizer_truncates_embedded_nul() {
        let fields = tokenize_truncating_at_nul("12,3\0garbage,4");
        assert_eq!(fields, vec!["12", "3", "4"]);
    }

    #[test]
    fn tokenizer_nul_at_start_yields_empty_field() {
        let fields = tokenize_truncating_at_nul("\0x,1");
        assert_eq!(fields, vec!["", "1"]);
    }

    #[test]
    fn parses_csq_response() {
        let sample = parse_csq("+CSQ: 16,99").unwrap();
        assert_eq!(sample.rssi_dbm, -81);
        assert_eq!(sample.ber_percent, 99);
    }

    #[test]
    fn parses_csq_with_embedded_nul_noise() {
        let sample = parse_csq("+CSQ: 16\0junk,2").unwrap();
        assert_eq!(sample.rssi_dbm, -81);
        assert_eq!(sample.ber_percent, 2);
    }

    #[test]
    fn rejects_non_csq() {
        assert!(parse_csq("+CREG: 1,1").is_none());
    }
}
