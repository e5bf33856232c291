//! Percent-decoding and query-string parsing.
//!
//! # Design Decisions
//! - `+` means space only inside query strings, never in path segments
//! - An escape that is not two hex digits is echoed verbatim and logged;
//!   decoding never fails
//! - Decoded bytes are interpreted as UTF-8, invalid sequences replaced

use std::collections::HashMap;

use crate::protocol::ProtocolError;

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decode `%XX` escapes (and `+` when `query` is set).
pub fn decode(input: &str, query: bool) -> String {
    if !input.bytes().any(|b| b == b'%' || (query && b == b'+')) {
        return input.to_string();
    }

    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' if query => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let escaped = bytes
                    .get(i + 1)
                    .and_then(|&h| hex_value(h))
                    .zip(bytes.get(i + 2).and_then(|&l| hex_value(l)));
                match escaped {
                    Some((hi, lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    None => {
                        let end = (i + 3).min(bytes.len());
                        tracing::warn!(
                            escape = %String::from_utf8_lossy(&bytes[i..end]),
                            input = %input,
                            "Invalid percent-escape left undecoded"
                        );
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Decode a URI path (no `+` translation).
pub fn decode_path(path: &str) -> String {
    decode(path, false)
}

/// Parse `a=1&b=2&a=3` into `params`, appending to existing values.
///
/// Fails once the total number of parameter values would exceed `max`.
pub fn parse_query(
    query: &str,
    params: &mut HashMap<String, Vec<String>>,
    max: usize,
) -> Result<(), ProtocolError> {
    let mut count: usize = params.values().map(Vec::len).sum();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        if count >= max {
            return Err(ProtocolError::TooManyParameters(max));
        }
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        params
            .entry(decode(name, true))
            .or_default()
            .push(decode(value, true));
        count += 1;
    }
    Ok(())
}
