//! Decoder for protocol event payloads: JSON text carried inside
//! ABI-encoded byte strings.
//!
//! Decoding is a two-stage strategy. The strict stage slices the UTF-8
//! payload out of the ABI string encoding and parses the first balanced
//! JSON object it contains. When that fails (truncated or malformed
//! payloads do occur in this protocol's logs), a regex fallback recovers a
//! deliberately narrower field set: event/action type, profit percent,
//! prices, fee components, collateral, and the direction flag. Nothing in
//! this module returns an error or panics; unrecoverable input is `None`
//! and the caller skips the entry.

use std::sync::LazyLock;

use regex::Regex;

use crate::domain::DecodedPayload;

/// One ABI word as hex characters.
const WORD_HEX: usize = 64;

/// Receipt log data carries a fixed two-word header before the ABI-encoded
/// event string.
const LOG_HEADER_HEX: usize = 2 * WORD_HEX;

/// Decode the UTF-8 text from an ABI-encoded string (offset word, length
/// word, then the bytes).
pub fn decode_payload_text(raw_hex: &str) -> Option<String> {
    let hex_str = raw_hex.trim().trim_start_matches("0x");
    if hex_str.len() < 2 * WORD_HEX {
        return None;
    }
    let bytes = hex::decode(hex_str).ok()?;

    // The length word is a big-endian u256; any real payload fits in the
    // low 8 bytes.
    let len_word = &bytes[32..64];
    if len_word[..24].iter().any(|b| *b != 0) {
        return None;
    }
    let declared_len = u64::from_be_bytes(len_word[24..32].try_into().ok()?) as usize;

    let body = &bytes[64..];
    let take = declared_len.min(body.len());
    if take == 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&body[..take]).into_owned())
}

/// Decode a receipt log's `data` field: skip the header, then treat the
/// remainder as an ABI-encoded string.
pub fn decode_log_text(data_hex: &str) -> Option<String> {
    let hex_str = data_hex.trim().trim_start_matches("0x");
    decode_payload_text(hex_str.get(LOG_HEADER_HEX..)?)
}

/// Full decode of an ABI payload into a record. `None` when nothing
/// recognizable could be recovered.
pub fn decode_event_payload(raw_hex: &str) -> Option<DecodedPayload> {
    parse_payload_text(&decode_payload_text(raw_hex)?)
}

/// Full decode of a receipt log's `data` field into a record.
pub fn decode_log_event(data_hex: &str) -> Option<DecodedPayload> {
    parse_payload_text(&decode_log_text(data_hex)?)
}

/// Parse decoded payload text: strict JSON first, regex fallback second.
pub fn parse_payload_text(text: &str) -> Option<DecodedPayload> {
    if let Some(span) = balanced_object_span(text) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(span) {
            let payload = DecodedPayload::from_json(&value);
            if !payload.is_empty() {
                return Some(payload);
            }
        }
    }

    let payload = fallback_extract(text);
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

/// Locate the first balanced `{...}` span. Brace depth is tracked across
/// nested objects, and braces inside string literals are ignored.
fn balanced_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Keys the fallback knows how to recover. Narrower than the strict path on
/// purpose: identity and market fields are only trusted from well-formed
/// payloads.
static FALLBACK_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#""(event|action|profit_pct|open_price|close_price|price|opening_fee|closing_fee|trigger_fee|borrowing_fee|collateral|long)"\s*:\s*"?([A-Za-z0-9_.\-]+)"?"#,
    )
    .expect("fallback field regex is valid")
});

fn fallback_extract(text: &str) -> DecodedPayload {
    let mut payload = DecodedPayload::default();
    for caps in FALLBACK_FIELD_RE.captures_iter(text) {
        let value = caps[2].to_string();
        match &caps[1] {
            "event" => payload.event = Some(value),
            "action" => payload.action = Some(value),
            "profit_pct" => payload.profit_pct = value.parse().ok(),
            "open_price" => payload.open_price = value.parse().ok(),
            "close_price" => payload.close_price = value.parse().ok(),
            "price" => payload.price = value.parse().ok(),
            "opening_fee" => payload.opening_fee = Some(value),
            "closing_fee" => payload.closing_fee = Some(value),
            "trigger_fee" => payload.trigger_fee = Some(value),
            "borrowing_fee" => payload.borrowing_fee = Some(value),
            "collateral" => payload.collateral = Some(value),
            "long" => {
                payload.long = match value.as_str() {
                    "true" => Some(true),
                    "false" => Some(false),
                    _ => None,
                }
            }
            _ => {}
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventKind;

    /// ABI-encode a text payload the way the protocol does: offset word,
    /// length word, then the UTF-8 bytes padded to a word boundary.
    fn abi_encode(text: &str) -> String {
        let bytes = text.as_bytes();
        let mut out = String::from("0x");
        out.push_str(&format!("{:064x}", 0x20));
        out.push_str(&format!("{:064x}", bytes.len()));
        out.push_str(&hex::encode(bytes));
        let pad = (32 - bytes.len() % 32) % 32;
        out.push_str(&"00".repeat(pad));
        out
    }

    #[test]
    fn test_decode_well_formed_payload() {
        let raw = abi_encode(r#"{"event":"open_trade","leverage":"5","collateral":"100000000","long":"true"}"#);
        let payload = decode_event_payload(&raw).unwrap();
        assert_eq!(payload.kind(), EventKind::OpenTrade);
        assert_eq!(payload.leverage, Some(5.0));
        assert_eq!(payload.collateral.as_deref(), Some("100000000"));
        assert_eq!(payload.long, Some(true));
    }

    #[test]
    fn test_decode_payload_with_surrounding_garbage() {
        let raw = abi_encode("\u{1}\u{2}xx{\"event\":\"close_trade\",\"profit_pct\":\"0.5\"}trailing");
        let payload = decode_event_payload(&raw).unwrap();
        assert_eq!(payload.kind(), EventKind::CloseTrade);
        assert_eq!(payload.profit_pct, Some(0.5));
    }

    #[test]
    fn test_decode_nested_object_brace_depth() {
        let raw = abi_encode(r#"{"event":"open_trade","meta":{"inner":{"a":1}},"leverage":"3"}"#);
        let payload = decode_event_payload(&raw).unwrap();
        assert_eq!(payload.kind(), EventKind::OpenTrade);
        assert_eq!(payload.leverage, Some(3.0));
    }

    #[test]
    fn test_brace_inside_string_literal_ignored() {
        let raw = abi_encode(r#"{"event":"open_trade","trader":"who{ever","leverage":"2"}"#);
        let payload = decode_event_payload(&raw).unwrap();
        assert_eq!(payload.leverage, Some(2.0));
    }

    #[test]
    fn test_fallback_on_truncated_json() {
        // Closing brace lost in truncation; strict parse fails.
        let raw = abi_encode(r#"{"event":"user_close_order","profit_pct":"0.12","collateral":"100000000""#);
        let payload = decode_event_payload(&raw).unwrap();
        assert_eq!(payload.kind(), EventKind::UserCloseOrder);
        assert_eq!(payload.profit_pct, Some(0.12));
        assert_eq!(payload.collateral.as_deref(), Some("100000000"));
    }

    #[test]
    fn test_fallback_field_set_is_narrower() {
        let raw = abi_encode(r#"{"event":"open_trade","trade_id":"17","leverage":"5""#);
        let payload = decode_event_payload(&raw).unwrap();
        // Identity fields are not recovered on the fallback path.
        assert_eq!(payload.trade_id, None);
        assert_eq!(payload.event.as_deref(), Some("open_trade"));
    }

    #[test]
    fn test_decoder_never_panics_on_malformed_input() {
        let cases = [
            "",
            "0x",
            "0x1234",
            "0xzznothex",
            "0x12345",                         // odd length
            &"00".repeat(63),                  // one byte short of two words
            &format!("0x{}", "ff".repeat(64)), // absurd length word
        ];
        for case in cases {
            assert_eq!(decode_event_payload(case), None, "input {:?}", case);
        }
    }

    #[test]
    fn test_decode_length_word_clamped_to_body() {
        // Declared length larger than the actual body: slice what exists.
        let text = r#"{"event":"close_trade"}"#;
        let bytes = text.as_bytes();
        let mut raw = String::from("0x");
        raw.push_str(&format!("{:064x}", 0x20));
        raw.push_str(&format!("{:064x}", bytes.len() + 500));
        raw.push_str(&hex::encode(bytes));
        let payload = decode_event_payload(&raw).unwrap();
        assert_eq!(payload.kind(), EventKind::CloseTrade);
    }

    #[test]
    fn test_unrecognizable_payload_is_none() {
        let raw = abi_encode("no json here at all");
        assert_eq!(decode_event_payload(&raw), None);
    }

    #[test]
    fn test_decode_log_data_skips_header() {
        let text = r#"{"event":"process_closing_fee","closing_fee":"2500000"}"#;
        let inner = abi_encode(text);
        let data = format!("0x{}{}", "00".repeat(64), inner.trim_start_matches("0x"));
        let payload = decode_log_event(&data).unwrap();
        assert_eq!(payload.kind(), EventKind::ProcessClosingFee);
        assert_eq!(payload.closing_fee.as_deref(), Some("2500000"));
    }

    #[test]
    fn test_decode_log_data_too_short() {
        assert_eq!(decode_log_event(&format!("0x{}", "00".repeat(64))), None);
    }

    #[test]
    fn test_decode_log_data_multibyte_garbage() {
        // Non-hex multibyte input must be rejected, not panic on a slice.
        let garbage = "0x".to_string() + &"é".repeat(100);
        assert_eq!(decode_log_event(&garbage), None);
        assert_eq!(decode_event_payload(&garbage), None);
    }
}
