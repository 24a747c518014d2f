//! Opaque pagination tokens for volume listings.
//!
//! A token carries the full set of target indices already handed out, as a
//! comma-joined decimal list wrapped in standard base64. Nothing is stored
//! server-side between calls.

use std::collections::BTreeSet;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

/// Errors raised while decoding a pagination token.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CursorError {
    /// The token is not valid base64.
    #[error("page token is not valid base64: {0}")]
    Encoding(String),
    /// The decoded payload is not UTF-8 text.
    #[error("page token payload is not text")]
    NotText,
    /// A list element is not a non-negative integer.
    #[error("page token element '{0}' is not an index")]
    Element(String),
}

/// Encodes a seen-set as an opaque token. The empty set encodes to `""`.
#[must_use]
pub fn encode(seen: &BTreeSet<u32>) -> String {
    if seen.is_empty() {
        return String::new();
    }
    let joined = seen
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    STANDARD.encode(joined)
}

/// Decodes a token produced by [`encode`]. An empty token is the empty set.
///
/// # Errors
///
/// Returns [`CursorError`] when the token is malformed. Listing callers
/// should treat any error as "start from the beginning"; see
/// [`decode_or_empty`].
pub fn decode(token: &str) -> Result<BTreeSet<u32>, CursorError> {
    if token.is_empty() {
        return Ok(BTreeSet::new());
    }

    let bytes = STANDARD
        .decode(token)
        .map_err(|err| CursorError::Encoding(err.to_string()))?;
    let text = String::from_utf8(bytes).map_err(|_| CursorError::NotText)?;
    if text.is_empty() {
        return Ok(BTreeSet::new());
    }

    text.split(',')
        .map(|element| {
            element
                .parse::<u32>()
                .map_err(|_| CursorError::Element(element.to_owned()))
        })
        .collect()
}

/// Decodes a token, falling back to the empty set for malformed input.
#[must_use]
pub fn decode_or_empty(token: &str) -> BTreeSet<u32> {
    decode(token).unwrap_or_else(|err| {
        tracing::debug!(error = %err, "ignoring malformed page token");
        BTreeSet::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[])]
    #[case(&[0])]
    #[case(&[3, 1, 2])]
    #[case(&[7, 4_294_967_295])]
    fn decode_reverses_encode(#[case] indices: &[u32]) {
        let seen: BTreeSet<u32> = indices.iter().copied().collect();
        let token = encode(&seen);
        let decoded = decode(&token).unwrap_or_else(|err| panic!("decode failed: {err}"));
        assert_eq!(decoded, seen);
    }

    #[test]
    fn encodes_comma_joined_payload() {
        let seen = BTreeSet::from([1, 2, 10]);
        assert_eq!(encode(&seen), STANDARD.encode("1,2,10"));
    }

    #[rstest]
    #[case("%%%not-base64")]
    #[case("LCw=")] // ",,"
    #[case("YSxi")] // "a,b"
    #[case("LTE=")] // "-1"
    fn rejects_malformed_tokens(#[case] token: &str) {
        let result = decode(token);
        assert!(result.is_err(), "unexpected outcome: {result:?}");
        assert!(decode_or_empty(token).is_empty());
    }

    #[test]
    fn empty_token_is_empty_set() {
        assert_eq!(decode(""), Ok(BTreeSet::new()));
    }
}
