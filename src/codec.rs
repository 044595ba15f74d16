//! base64url, compact-JWT splitting, and JSON-object parsing.
//!
//! Everything here is pure computation; malformed input fails with
//! [`Error::InvalidJwt`].

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::{Map, Value};

use crate::error::Error;

/// The three segments of a compact-serialized JWT, borrowed from the token,
/// plus the signing input: the literal `header + "." + payload` bytes the
/// signature is computed over.
#[derive(Debug, Clone, Copy)]
pub struct JwtParts<'a> {
    pub header: &'a str,
    pub payload: &'a str,
    pub signature: &'a str,
    pub signing_input: &'a str,
}

fn is_base64url_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

/// Decode base64url with tolerance for 1-2 trailing `=` padding characters.
///
/// Any other character, interior padding, or a data length of 1 mod 4 is
/// rejected.
pub fn decode_base64url(input: &str) -> Result<Vec<u8>, Error> {
    let bytes = input.as_bytes();
    let mut padding = 0usize;
    for &b in bytes.iter().rev() {
        if b == b'=' {
            padding += 1;
        } else {
            break;
        }
    }
    if padding > 2 {
        return Err(Error::InvalidJwt("too much base64url padding".to_string()));
    }

    let data = &bytes[..bytes.len() - padding];
    if data.len() % 4 == 1 {
        return Err(Error::InvalidJwt("invalid base64url length".to_string()));
    }
    if let Some(idx) = data.iter().position(|b| !is_base64url_char(*b)) {
        return Err(Error::InvalidJwt(format!(
            "invalid base64url character at index {idx}"
        )));
    }

    URL_SAFE_NO_PAD
        .decode(data)
        .map_err(|err| Error::InvalidJwt(format!("base64url decode error: {err}")))
}

/// Encode bytes as unpadded base64url.
pub fn encode_base64url(input: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

/// Split a compact JWT into exactly three non-empty dot-separated segments.
pub fn split_compact_jwt(token: &str) -> Result<JwtParts<'_>, Error> {
    let mut iter = token.split('.');
    let header = iter
        .next()
        .ok_or_else(|| Error::InvalidJwt("missing jwt header segment".to_string()))?;
    let payload = iter
        .next()
        .ok_or_else(|| Error::InvalidJwt("missing jwt payload segment".to_string()))?;
    let signature = iter
        .next()
        .ok_or_else(|| Error::InvalidJwt("missing jwt signature segment".to_string()))?;
    if iter.next().is_some() {
        return Err(Error::InvalidJwt(
            "jwt has more than three segments".to_string(),
        ));
    }
    if header.is_empty() || payload.is_empty() || signature.is_empty() {
        return Err(Error::InvalidJwt("empty jwt segment".to_string()));
    }
    Ok(JwtParts {
        header,
        payload,
        signature,
        signing_input: &token[..header.len() + 1 + payload.len()],
    })
}

/// Parse bytes as a UTF-8 JSON object.
pub fn parse_json_object(bytes: &[u8]) -> Result<Map<String, Value>, Error> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|err| Error::InvalidJwt(format!("json parse error: {err}")))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(Error::InvalidJwt("expected a json object".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64url_round_trip() {
        for input in [
            b"".as_slice(),
            b"f",
            b"fo",
            b"foo",
            b"foob",
            &[0u8, 255, 7, 128, 63],
        ] {
            let encoded = encode_base64url(input);
            assert_eq!(decode_base64url(&encoded).expect("decode"), input);
        }
    }

    #[test]
    fn base64url_accepts_trailing_padding() {
        assert_eq!(decode_base64url("Zm9vYg==").expect("decode"), b"foob");
        assert_eq!(decode_base64url("Zm9vYmE=").expect("decode"), b"fooba");
    }

    #[test]
    fn base64url_rejects_bad_input() {
        for input in ["Zm9v+g", "Zm9v/g", "Zm=9v", "Zm9vY", "====", "a"] {
            assert!(matches!(
                decode_base64url(input),
                Err(Error::InvalidJwt(_))
            ));
        }
    }

    #[test]
    fn split_requires_three_segments() {
        for token in ["", "a", "a.b", "a.b.c.d", ".b.c", "a..c", "a.b."] {
            assert!(matches!(
                split_compact_jwt(token),
                Err(Error::InvalidJwt(_))
            ));
        }
    }

    #[test]
    fn split_reassembly_is_identity() {
        let token = "aGVhZGVy.cGF5bG9hZA.c2ln";
        let parts = split_compact_jwt(token).expect("split");
        assert_eq!(
            format!("{}.{}.{}", parts.header, parts.payload, parts.signature),
            token
        );
        assert_eq!(parts.signing_input, "aGVhZGVy.cGF5bG9hZA");
    }

    #[test]
    fn json_object_only() {
        assert!(parse_json_object(br#"{"a":1}"#).is_ok());
        assert!(matches!(
            parse_json_object(b"[1,2]"),
            Err(Error::InvalidJwt(_))
        ));
        assert!(matches!(
            parse_json_object(b"not json"),
            Err(Error::InvalidJwt(_))
        ));
    }
}
