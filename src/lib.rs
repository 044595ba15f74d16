#![forbid(unsafe_code)]

//! Verification of OIDC/OAuth2 JWTs against remote JWKS endpoints.
//!
//! Given a compact-serialized JWT, a [`JwtVerifier`] decides whether the
//! token is authentic and currently acceptable: it resolves the signing key
//! from the issuer's JWKS (fetched on demand, cached, with concurrent
//! refreshes coalesced and unknown `kid`s penalty-boxed), verifies the
//! signature (RSA PKCS#1 v1.5 and PSS, ECDSA over P-256/P-384/P-521,
//! Ed25519), and asserts the configured claim policy.
//!
//! ```no_run
//! use oidc_jwt_verify::{IssuerPolicy, JwtVerifier};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let verifier = JwtVerifier::new(
//!         IssuerPolicy::new("https://issuer.example.com")?
//!             .audience(&["my-client"])
//!             .grace_seconds(30),
//!     );
//!
//!     let token = "eyJhbGciOiJSUzI1NiIsImtpZCI6ImsxIn0...";
//!     let verified = verifier.verify(token).await?;
//!     println!("subject: {:?}", verified.claims.get("sub"));
//!     Ok(())
//! }
//! ```
//!
//! The synchronous surfaces ([`JwtVerifier::verify_sync`] and
//! [`JwtVerifier::verify_with_jwks`]) never perform I/O; they work against
//! key material that is already resident or supplied by the caller.

mod claims;
mod codec;
mod cognito;
mod error;
mod jwk;
mod jwks;
mod jws;
mod key;
mod verifier;

pub use claims::{ClaimsPolicy, CustomCheck, PolicyOverrides};
pub use codec::{
    decode_base64url, encode_base64url, parse_json_object, split_compact_jwt, JwtParts,
};
pub use cognito::{CognitoVerifier, CognitoVerifierBuilder, TokenUse};
pub use error::{CustomCheckFailure, Error};
pub use jwk::{EcCurve, Jwk, JwkSet, KeyParams, OkpCurve};
pub use jwks::{
    CachedKey, HttpFetcher, JwksCache, JwksFetcher, StandardJwksCache,
    DEFAULT_PENALTY_BOX_CAPACITY, DEFAULT_RESPONSE_TIMEOUT,
};
pub use jws::{verify_signature, JwsAlgorithm};
pub use key::{key_material_from_jwk, resolve_algorithm, KeyMaterial};
pub use verifier::{IssuerPolicy, JwtHeader, JwtVerifier, VerifiedJwt};
