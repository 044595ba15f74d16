//! Conversion of validated JWKs into native verification keys.

use rsa::{BigUint, RsaPublicKey};

use crate::codec::decode_base64url;
use crate::error::Error;
use crate::jwk::{EcCurve, Jwk, KeyParams, OkpCurve};
use crate::jws::JwsAlgorithm;

/// A verification key in its native form, ready for the signature engine.
#[derive(Clone)]
pub enum KeyMaterial {
    Rsa(RsaPublicKey),
    P256(p256::ecdsa::VerifyingKey),
    P384(p384::ecdsa::VerifyingKey),
    P521(p521::ecdsa::VerifyingKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            KeyMaterial::Rsa(_) => "Rsa",
            KeyMaterial::P256(_) => "P256",
            KeyMaterial::P384(_) => "P384",
            KeyMaterial::P521(_) => "P521",
            KeyMaterial::Ed25519(_) => "Ed25519",
        };
        f.debug_tuple("KeyMaterial").field(&kind).finish()
    }
}

impl KeyMaterial {
    /// Whether this key can carry signatures of the given algorithm.
    pub fn supports(&self, alg: JwsAlgorithm) -> bool {
        use JwsAlgorithm::*;
        match self {
            KeyMaterial::Rsa(_) => {
                matches!(alg, RS256 | RS384 | RS512 | PS256 | PS384 | PS512)
            }
            KeyMaterial::P256(_) => alg == ES256,
            KeyMaterial::P384(_) => alg == ES384,
            KeyMaterial::P521(_) => alg == ES512,
            KeyMaterial::Ed25519(_) => alg == EdDSA,
        }
    }
}

/// Build a native key from a JWK, enforcing the JWK invariants on the way.
pub fn key_material_from_jwk(jwk: &Jwk) -> Result<KeyMaterial, Error> {
    match jwk.validate()? {
        KeyParams::Rsa { n, e } => {
            let n = decode_key_member(n, "n")?;
            let e = decode_key_member(e, "e")?;
            let key = RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
                .map_err(|err| Error::JwkInvalid(format!("invalid rsa key: {err}")))?;
            Ok(KeyMaterial::Rsa(key))
        }
        KeyParams::Ec { curve, x, y } => {
            let sec1 = sec1_point(curve, x, y)?;
            match curve {
                EcCurve::P256 => p256::ecdsa::VerifyingKey::from_sec1_bytes(&sec1)
                    .map(KeyMaterial::P256)
                    .map_err(|err| Error::JwkInvalid(format!("invalid p-256 key: {err}"))),
                EcCurve::P384 => p384::ecdsa::VerifyingKey::from_sec1_bytes(&sec1)
                    .map(KeyMaterial::P384)
                    .map_err(|err| Error::JwkInvalid(format!("invalid p-384 key: {err}"))),
                EcCurve::P521 => p521::ecdsa::VerifyingKey::from_sec1_bytes(&sec1)
                    .map(KeyMaterial::P521)
                    .map_err(|err| Error::JwkInvalid(format!("invalid p-521 key: {err}"))),
            }
        }
        KeyParams::Okp { curve, x } => match curve {
            OkpCurve::Ed25519 => {
                let x = decode_key_member(x, "x")?;
                let x: [u8; 32] = x.as_slice().try_into().map_err(|_| {
                    Error::JwkInvalid(format!("ed25519 x must be 32 bytes, got {}", x.len()))
                })?;
                ed25519_dalek::VerifyingKey::from_bytes(&x)
                    .map(KeyMaterial::Ed25519)
                    .map_err(|err| Error::JwkInvalid(format!("invalid ed25519 key: {err}")))
            }
            OkpCurve::Ed448 => Err(Error::NotSupported(
                "ed448 keys are not supported".to_string(),
            )),
        },
    }
}

/// Resolve the effective signature algorithm: the JWK's `alg` wins when
/// present, otherwise the header's; a disagreement between the two is an
/// error, as is having neither.
pub fn resolve_algorithm(
    jwk_alg: Option<&str>,
    header_alg: Option<&str>,
) -> Result<JwsAlgorithm, Error> {
    let parse = |alg: &str| {
        alg.parse::<JwsAlgorithm>()
            .map_err(|_| Error::JwtInvalidSignatureAlgorithm(format!("unknown alg {alg:?}")))
    };
    match (jwk_alg, header_alg) {
        (Some(jwk_alg), Some(header_alg)) => {
            let resolved = parse(jwk_alg)?;
            if parse(header_alg)? != resolved {
                return Err(Error::JwtInvalidSignatureAlgorithm(format!(
                    "jwt alg {header_alg:?} does not match jwk alg {jwk_alg:?}"
                )));
            }
            Ok(resolved)
        }
        (Some(alg), None) | (None, Some(alg)) => parse(alg),
        (None, None) => Err(Error::JwtInvalidSignatureAlgorithm(
            "neither jwt nor jwk carries an alg".to_string(),
        )),
    }
}

fn decode_key_member(value: &str, member: &str) -> Result<Vec<u8>, Error> {
    decode_base64url(value)
        .map_err(|_| Error::JwkInvalid(format!("jwk member {member} is not base64url")))
}

/// Assemble an uncompressed SEC1 point from base64url coordinates, padding
/// short coordinates to the curve width on the left.
fn sec1_point(curve: EcCurve, x: &str, y: &str) -> Result<Vec<u8>, Error> {
    let size = curve.coordinate_len();
    let x = decode_coordinate(decode_key_member(x, "x")?, size)?;
    let y = decode_coordinate(decode_key_member(y, "y")?, size)?;
    let mut sec1 = Vec::with_capacity(1 + size * 2);
    sec1.push(0x04);
    sec1.extend_from_slice(&x);
    sec1.extend_from_slice(&y);
    Ok(sec1)
}

fn decode_coordinate(bytes: Vec<u8>, size: usize) -> Result<Vec<u8>, Error> {
    if bytes.len() > size {
        return Err(Error::JwkInvalid(format!(
            "ec coordinate is {} bytes, curve width is {size}",
            bytes.len()
        )));
    }
    if bytes.len() == size {
        return Ok(bytes);
    }
    let mut padded = vec![0u8; size - bytes.len()];
    padded.extend_from_slice(&bytes);
    Ok(padded)
}
