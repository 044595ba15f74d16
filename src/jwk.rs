//! JWK and JWKS wire models, and validation into closed key-parameter sums.
//!
//! The serde structs mirror the JSON shape of a key set; nothing outside
//! this module branches on raw JSON. [`Jwk::validate`] is the boundary that
//! turns a duck-shaped key into a [`KeyParams`] value.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::jws::JwsAlgorithm;

/// A single JSON Web Key as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    #[serde(default)]
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_ops: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

/// A JSON Web Key Set: `{ "keys": [...] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Parse a JWKS body. The set shape must be well-formed; individual
    /// keys are only checked when selected for use.
    pub fn from_slice(body: &[u8]) -> Result<Self, Error> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|err| Error::JwksValidation(format!("json parse error: {err}")))?;
        if !value.is_object() {
            return Err(Error::JwksValidation(
                "jwks body is not a json object".to_string(),
            ));
        }
        match value.get("keys") {
            Some(serde_json::Value::Array(_)) => {}
            _ => {
                return Err(Error::JwksValidation(
                    "jwks body has no keys array".to_string(),
                ))
            }
        }
        serde_json::from_value(value)
            .map_err(|err| Error::JwksValidation(format!("jwks shape error: {err}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurve {
    P256,
    P384,
    P521,
}

impl EcCurve {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "P-256" => Some(EcCurve::P256),
            "P-384" => Some(EcCurve::P384),
            "P-521" => Some(EcCurve::P521),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EcCurve::P256 => "P-256",
            EcCurve::P384 => "P-384",
            EcCurve::P521 => "P-521",
        }
    }

    /// Width in bytes of one coordinate (and of one half of a raw
    /// `r || s` signature).
    pub(crate) fn coordinate_len(self) -> usize {
        match self {
            EcCurve::P256 => 32,
            EcCurve::P384 => 48,
            EcCurve::P521 => 66,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OkpCurve {
    Ed25519,
    Ed448,
}

impl OkpCurve {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Ed25519" => Some(OkpCurve::Ed25519),
            "Ed448" => Some(OkpCurve::Ed448),
            _ => None,
        }
    }
}

/// Validated key parameters, borrowed from the originating [`Jwk`].
#[derive(Debug, Clone, Copy)]
pub enum KeyParams<'a> {
    Rsa { n: &'a str, e: &'a str },
    Ec { curve: EcCurve, x: &'a str, y: &'a str },
    Okp { curve: OkpCurve, x: &'a str },
}

impl Jwk {
    /// Enforce the JWK invariants and classify the key.
    ///
    /// `use`, when present, must be `sig`; `alg`, when present, must fit the
    /// key type and curve; the members required by `kty` must be present.
    pub fn validate(&self) -> Result<KeyParams<'_>, Error> {
        if let Some(use_) = self.use_.as_deref() {
            if use_ != "sig" {
                return Err(Error::JwkInvalid(format!(
                    "jwk use is {use_:?}, expected \"sig\""
                )));
            }
        }

        let params = match self.kty.as_str() {
            "RSA" => {
                let n = self
                    .n
                    .as_deref()
                    .ok_or_else(|| Error::JwkInvalid("rsa jwk is missing n".to_string()))?;
                let e = self
                    .e
                    .as_deref()
                    .ok_or_else(|| Error::JwkInvalid("rsa jwk is missing e".to_string()))?;
                KeyParams::Rsa { n, e }
            }
            "EC" => {
                let crv = self
                    .crv
                    .as_deref()
                    .ok_or_else(|| Error::JwkInvalid("ec jwk is missing crv".to_string()))?;
                let curve = EcCurve::from_name(crv)
                    .ok_or_else(|| Error::JwkInvalid(format!("unknown ec curve {crv:?}")))?;
                let x = self
                    .x
                    .as_deref()
                    .ok_or_else(|| Error::JwkInvalid("ec jwk is missing x".to_string()))?;
                let y = self
                    .y
                    .as_deref()
                    .ok_or_else(|| Error::JwkInvalid("ec jwk is missing y".to_string()))?;
                KeyParams::Ec { curve, x, y }
            }
            "OKP" => {
                let crv = self
                    .crv
                    .as_deref()
                    .ok_or_else(|| Error::JwkInvalid("okp jwk is missing crv".to_string()))?;
                let curve = OkpCurve::from_name(crv)
                    .ok_or_else(|| Error::JwkInvalid(format!("unknown okp curve {crv:?}")))?;
                let x = self
                    .x
                    .as_deref()
                    .ok_or_else(|| Error::JwkInvalid("okp jwk is missing x".to_string()))?;
                KeyParams::Okp { curve, x }
            }
            other => {
                return Err(Error::JwkInvalid(format!("unknown kty {other:?}")));
            }
        };

        if let Some(alg) = self.alg.as_deref() {
            let alg: JwsAlgorithm = alg
                .parse()
                .map_err(|_| Error::JwkInvalid(format!("unknown jwk alg {alg:?}")))?;
            if !alg_fits_params(alg, &params) {
                return Err(Error::JwkInvalid(format!(
                    "jwk alg {alg} does not match kty {:?}",
                    self.kty
                )));
            }
        }

        Ok(params)
    }
}

fn alg_fits_params(alg: JwsAlgorithm, params: &KeyParams<'_>) -> bool {
    use JwsAlgorithm::*;
    match params {
        KeyParams::Rsa { .. } => matches!(alg, RS256 | RS384 | RS512 | PS256 | PS384 | PS512),
        KeyParams::Ec { curve, .. } => alg.ec_curve() == Some(*curve),
        KeyParams::Okp { .. } => alg == EdDSA,
    }
}
