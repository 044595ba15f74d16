//! JWS signature algorithms and the verification engine.
//!
//! Signatures are verified over the signing input (`header.payload` as
//! ASCII). ECDSA signatures are the JOSE raw `r || s` concatenation at the
//! curve's fixed width, not DER. A well-formed signature that simply does
//! not match yields `Ok(false)`; structurally malformed signature bytes
//! fail with [`Error::InvalidSignature`].

use std::fmt;
use std::str::FromStr;

use rsa::pkcs1v15::{Signature as Pkcs1v15Signature, VerifyingKey as Pkcs1v15VerifyingKey};
use rsa::pss::{Signature as PssSignature, VerifyingKey as PssVerifyingKey};
use sha2::{Sha256, Sha384, Sha512};
use signature::Verifier as _;

use crate::error::Error;
use crate::jwk::EcCurve;
use crate::key::KeyMaterial;

/// The supported JWS signature algorithms. Unknown algorithms fail closed
/// at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JwsAlgorithm {
    RS256,
    RS384,
    RS512,
    PS256,
    PS384,
    PS512,
    ES256,
    ES384,
    ES512,
    EdDSA,
}

impl JwsAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            JwsAlgorithm::RS256 => "RS256",
            JwsAlgorithm::RS384 => "RS384",
            JwsAlgorithm::RS512 => "RS512",
            JwsAlgorithm::PS256 => "PS256",
            JwsAlgorithm::PS384 => "PS384",
            JwsAlgorithm::PS512 => "PS512",
            JwsAlgorithm::ES256 => "ES256",
            JwsAlgorithm::ES384 => "ES384",
            JwsAlgorithm::ES512 => "ES512",
            JwsAlgorithm::EdDSA => "EdDSA",
        }
    }

    /// The curve an ECDSA algorithm requires. ES512 pairs with P-521.
    pub fn ec_curve(self) -> Option<EcCurve> {
        match self {
            JwsAlgorithm::ES256 => Some(EcCurve::P256),
            JwsAlgorithm::ES384 => Some(EcCurve::P384),
            JwsAlgorithm::ES512 => Some(EcCurve::P521),
            _ => None,
        }
    }
}

impl fmt::Display for JwsAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JwsAlgorithm {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RS256" => Ok(JwsAlgorithm::RS256),
            "RS384" => Ok(JwsAlgorithm::RS384),
            "RS512" => Ok(JwsAlgorithm::RS512),
            "PS256" => Ok(JwsAlgorithm::PS256),
            "PS384" => Ok(JwsAlgorithm::PS384),
            "PS512" => Ok(JwsAlgorithm::PS512),
            "ES256" => Ok(JwsAlgorithm::ES256),
            "ES384" => Ok(JwsAlgorithm::ES384),
            "ES512" => Ok(JwsAlgorithm::ES512),
            "EdDSA" => Ok(JwsAlgorithm::EdDSA),
            _ => Err(()),
        }
    }
}

/// Verify `signature` over `signing_input` with `key` under `alg`.
pub fn verify_signature(
    alg: JwsAlgorithm,
    key: &KeyMaterial,
    signing_input: &[u8],
    signature: &[u8],
) -> Result<bool, Error> {
    if !key.supports(alg) {
        return Err(Error::JwtInvalidSignatureAlgorithm(format!(
            "key does not support alg {alg}"
        )));
    }

    match (alg, key) {
        (JwsAlgorithm::RS256, KeyMaterial::Rsa(key)) => {
            let sig = rsa_pkcs1v15_signature(signature)?;
            let verifier = Pkcs1v15VerifyingKey::<Sha256>::new(key.clone());
            Ok(verifier.verify(signing_input, &sig).is_ok())
        }
        (JwsAlgorithm::RS384, KeyMaterial::Rsa(key)) => {
            let sig = rsa_pkcs1v15_signature(signature)?;
            let verifier = Pkcs1v15VerifyingKey::<Sha384>::new(key.clone());
            Ok(verifier.verify(signing_input, &sig).is_ok())
        }
        (JwsAlgorithm::RS512, KeyMaterial::Rsa(key)) => {
            let sig = rsa_pkcs1v15_signature(signature)?;
            let verifier = Pkcs1v15VerifyingKey::<Sha512>::new(key.clone());
            Ok(verifier.verify(signing_input, &sig).is_ok())
        }
        (JwsAlgorithm::PS256, KeyMaterial::Rsa(key)) => {
            let sig = rsa_pss_signature(signature)?;
            let verifier = PssVerifyingKey::<Sha256>::new(key.clone());
            Ok(verifier.verify(signing_input, &sig).is_ok())
        }
        (JwsAlgorithm::PS384, KeyMaterial::Rsa(key)) => {
            let sig = rsa_pss_signature(signature)?;
            let verifier = PssVerifyingKey::<Sha384>::new(key.clone());
            Ok(verifier.verify(signing_input, &sig).is_ok())
        }
        (JwsAlgorithm::PS512, KeyMaterial::Rsa(key)) => {
            let sig = rsa_pss_signature(signature)?;
            let verifier = PssVerifyingKey::<Sha512>::new(key.clone());
            Ok(verifier.verify(signing_input, &sig).is_ok())
        }
        (JwsAlgorithm::ES256, KeyMaterial::P256(key)) => {
            let sig = p256::ecdsa::Signature::from_slice(signature)
                .map_err(|err| Error::InvalidSignature(format!("malformed p-256 signature: {err}")))?;
            Ok(key.verify(signing_input, &sig).is_ok())
        }
        (JwsAlgorithm::ES384, KeyMaterial::P384(key)) => {
            let sig = p384::ecdsa::Signature::from_slice(signature)
                .map_err(|err| Error::InvalidSignature(format!("malformed p-384 signature: {err}")))?;
            Ok(key.verify(signing_input, &sig).is_ok())
        }
        (JwsAlgorithm::ES512, KeyMaterial::P521(key)) => {
            let sig = p521::ecdsa::Signature::from_slice(signature)
                .map_err(|err| Error::InvalidSignature(format!("malformed p-521 signature: {err}")))?;
            Ok(key.verify(signing_input, &sig).is_ok())
        }
        (JwsAlgorithm::EdDSA, KeyMaterial::Ed25519(key)) => {
            let sig = ed25519_dalek::Signature::from_slice(signature)
                .map_err(|err| Error::InvalidSignature(format!("malformed ed25519 signature: {err}")))?;
            Ok(key.verify(signing_input, &sig).is_ok())
        }
        _ => Err(Error::JwtInvalidSignatureAlgorithm(format!(
            "key does not support alg {alg}"
        ))),
    }
}

fn rsa_pkcs1v15_signature(signature: &[u8]) -> Result<Pkcs1v15Signature, Error> {
    Pkcs1v15Signature::try_from(signature)
        .map_err(|err| Error::InvalidSignature(format!("malformed rsa signature: {err}")))
}

fn rsa_pss_signature(signature: &[u8]) -> Result<PssSignature, Error> {
    PssSignature::try_from(signature)
        .map_err(|err| Error::InvalidSignature(format!("malformed rsa-pss signature: {err}")))
}
