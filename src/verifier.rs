//! The verification pipeline and its per-issuer configuration.
//!
//! Every surface runs the same pipeline: split, decode header and payload,
//! pick the issuer policy from the unverified `iss` claim, resolve the key,
//! verify the signature, then assert the claims. Only [`JwtVerifier::verify`]
//! can suspend; the synchronous surfaces work strictly against resident or
//! caller-supplied key material.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};
use url::Url;

use crate::claims::{
    self, ClaimsPolicy, CustomCheck, PolicyOverrides, SpecializationCheck,
};
use crate::codec::{decode_base64url, parse_json_object, split_compact_jwt};
use crate::error::Error;
use crate::jwk::JwkSet;
use crate::jwks::{select_jwk, CachedKey, JwksCache, StandardJwksCache};
use crate::jws::verify_signature;
use crate::key::{key_material_from_jwk, resolve_algorithm};

/// The decoded JOSE header fields the pipeline cares about.
#[derive(Debug, Clone)]
pub struct JwtHeader {
    pub alg: String,
    pub kid: Option<String>,
    pub typ: Option<String>,
}

/// A successfully verified token: its header and the payload claims,
/// returned exactly as decoded.
#[derive(Debug, Clone)]
pub struct VerifiedJwt {
    pub header: JwtHeader,
    pub claims: Map<String, Value>,
}

/// Configuration for one accepted issuer: where its JWKS lives and which
/// claim assertions apply.
#[derive(Debug, Clone)]
pub struct IssuerPolicy {
    issuer: String,
    jwks_uri: Url,
    claims: ClaimsPolicy,
    include_raw_jwt_in_errors: bool,
}

impl IssuerPolicy {
    /// A policy for `issuer` with the JWKS expected at
    /// `{issuer}/.well-known/jwks.json` and an `iss` assertion against the
    /// issuer itself.
    pub fn new(issuer: &str) -> Result<Self, Error> {
        Ok(Self {
            issuer: issuer.to_string(),
            jwks_uri: default_jwks_uri(issuer)?,
            claims: ClaimsPolicy {
                issuer: Some(vec![issuer.to_string()]),
                ..ClaimsPolicy::default()
            },
            include_raw_jwt_in_errors: false,
        })
    }

    pub fn jwks_uri(mut self, jwks_uri: &str) -> Result<Self, Error> {
        self.jwks_uri = Url::parse(jwks_uri)?;
        Ok(self)
    }

    pub fn audience(mut self, audience: &[&str]) -> Self {
        self.claims.audience = Some(audience.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn scope(mut self, scope: &[&str]) -> Self {
        self.claims.scope = Some(scope.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn grace_seconds(mut self, grace_seconds: u64) -> Self {
        self.claims.grace_seconds = grace_seconds;
        self
    }

    pub fn custom_check(mut self, check: CustomCheck) -> Self {
        self.claims.custom_check = Some(check);
        self
    }

    pub fn include_raw_jwt_in_errors(mut self, include: bool) -> Self {
        self.include_raw_jwt_in_errors = include;
        self
    }

    /// Drop the `iss` assertion (the policy still routes by issuer).
    pub fn disable_issuer_check(mut self) -> Self {
        self.claims.issuer = None;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub(crate) fn push_specialization_check(&mut self, check: SpecializationCheck) {
        self.claims.specialization_checks.push(check);
    }
}

fn default_jwks_uri(issuer: &str) -> Result<Url, Error> {
    let mut url = Url::parse(issuer)?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| Error::InvalidIssuerUrl(issuer.to_string()))?;
        segments.pop_if_empty();
        segments.extend([".well-known", "jwks.json"]);
    }
    Ok(url)
}

/// Verifier for compact JWTs from one or more configured issuers.
///
/// The verifier holds a handle to a shared [`JwksCache`]; it owns no JWKS
/// state itself and is safe to share across tasks.
pub struct JwtVerifier {
    issuers: Vec<IssuerPolicy>,
    cache: Arc<dyn JwksCache>,
}

struct DecomposedJwt<'a> {
    header: JwtHeader,
    claims: Map<String, Value>,
    signing_input: &'a [u8],
    signature: Vec<u8>,
}

impl JwtVerifier {
    pub fn new(policy: IssuerPolicy) -> Self {
        Self::with_issuers(vec![policy])
    }

    /// A verifier accepting several issuers; the token's `iss` claim picks
    /// the policy (and thereby the JWKS endpoint).
    pub fn with_issuers(issuers: Vec<IssuerPolicy>) -> Self {
        Self {
            issuers,
            cache: Arc::new(StandardJwksCache::new()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn JwksCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<dyn JwksCache> {
        &self.cache
    }

    /// Fetch the JWKS for every configured issuer once, so later
    /// verifications (including synchronous ones) start warm.
    pub async fn hydrate(&self) -> Result<(), Error> {
        for policy in &self.issuers {
            self.cache.refresh(&policy.jwks_uri).await?;
        }
        Ok(())
    }

    /// Seed the cache for `issuer` with a JWKS already in hand.
    pub fn preload(&self, issuer: &str, jwks: JwkSet) -> Result<(), Error> {
        let policy = self
            .issuers
            .iter()
            .find(|policy| policy.issuer == issuer)
            .ok_or_else(|| {
                claims::issuer_not_allowed(format!("issuer {issuer:?} is not configured"))
            })?;
        self.cache.preload(&policy.jwks_uri, jwks);
        Ok(())
    }

    /// Verify a token, fetching the issuer's JWKS if the key is unknown.
    pub async fn verify(&self, token: &str) -> Result<VerifiedJwt, Error> {
        self.verify_with_overrides(token, &PolicyOverrides::default())
            .await
    }

    pub async fn verify_with_overrides(
        &self,
        token: &str,
        overrides: &PolicyOverrides,
    ) -> Result<VerifiedJwt, Error> {
        let jwt = decompose(token)?;
        let policy = self.select_policy(&jwt.claims)?;

        let outcome = async {
            let key = self
                .cache
                .get_key(&policy.jwks_uri, jwt.header.kid.as_deref())
                .await?;
            check_signature(&key, &jwt)?;
            let effective = policy.claims.merged(overrides);
            claims::assert_fixed_claims(&jwt.claims, &effective, now_seconds())?;
            claims::run_custom_check(&jwt.claims, &effective).await
        }
        .await;

        finalize(policy, token, jwt, outcome)
    }

    /// Verify against resident cache state only; never performs I/O.
    pub fn verify_sync(&self, token: &str) -> Result<VerifiedJwt, Error> {
        self.verify_sync_with_overrides(token, &PolicyOverrides::default())
    }

    pub fn verify_sync_with_overrides(
        &self,
        token: &str,
        overrides: &PolicyOverrides,
    ) -> Result<VerifiedJwt, Error> {
        let jwt = decompose(token)?;
        let policy = self.select_policy(&jwt.claims)?;

        let outcome = (|| {
            let key = self
                .cache
                .get_cached_key(&policy.jwks_uri, jwt.header.kid.as_deref())?;
            check_signature(&key, &jwt)?;
            let effective = policy.claims.merged(overrides);
            claims::assert_fixed_claims(&jwt.claims, &effective, now_seconds())?;
            claims::run_custom_check_sync(&jwt.claims, &effective)
        })();

        finalize(policy, token, jwt, outcome)
    }

    /// Verify with a caller-supplied JWKS, bypassing the cache entirely.
    pub fn verify_with_jwks(&self, token: &str, jwks: &JwkSet) -> Result<VerifiedJwt, Error> {
        let jwt = decompose(token)?;
        let policy = self.select_policy(&jwt.claims)?;

        let outcome = (|| {
            let jwk = select_jwk(jwks, jwt.header.kid.as_deref())?;
            let key = CachedKey {
                jwk: jwk.clone(),
                material: key_material_from_jwk(jwk)?,
            };
            check_signature(&key, &jwt)?;
            claims::assert_fixed_claims(&jwt.claims, &policy.claims, now_seconds())?;
            claims::run_custom_check_sync(&jwt.claims, &policy.claims)
        })();

        finalize(policy, token, jwt, outcome)
    }

    fn select_policy(&self, claims: &Map<String, Value>) -> Result<&IssuerPolicy, Error> {
        if self.issuers.len() == 1 {
            return Ok(&self.issuers[0]);
        }
        let iss = claims
            .get("iss")
            .and_then(Value::as_str)
            .ok_or_else(|| claims::issuer_not_allowed("jwt has no iss claim"))?;
        self.issuers
            .iter()
            .find(|policy| policy.issuer == iss)
            .ok_or_else(|| {
                claims::issuer_not_allowed(format!("issuer {iss:?} is not configured"))
            })
    }
}

fn decompose(token: &str) -> Result<DecomposedJwt<'_>, Error> {
    let parts = split_compact_jwt(token)?;
    let header = decode_header(parse_json_object(&decode_base64url(parts.header)?)?)?;
    let claims = parse_json_object(&decode_base64url(parts.payload)?)?;
    let signature = decode_base64url(parts.signature)?;
    Ok(DecomposedJwt {
        header,
        claims,
        signing_input: parts.signing_input.as_bytes(),
        signature,
    })
}

fn decode_header(map: Map<String, Value>) -> Result<JwtHeader, Error> {
    let alg = map
        .get("alg")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidJwt("jwt header has no alg".to_string()))?
        .to_string();
    let kid = optional_string(&map, "kid")?;
    let typ = optional_string(&map, "typ")?;
    Ok(JwtHeader { alg, kid, typ })
}

fn optional_string(map: &Map<String, Value>, name: &str) -> Result<Option<String>, Error> {
    match map.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(Error::InvalidJwt(format!(
            "jwt header {name} is not a string"
        ))),
    }
}

fn check_signature(key: &CachedKey, jwt: &DecomposedJwt<'_>) -> Result<(), Error> {
    let alg = resolve_algorithm(key.jwk.alg.as_deref(), Some(jwt.header.alg.as_str()))?;
    if !verify_signature(alg, &key.material, jwt.signing_input, &jwt.signature)? {
        return Err(Error::InvalidSignature(
            "jwt signature does not match".to_string(),
        ));
    }
    Ok(())
}

fn finalize(
    policy: &IssuerPolicy,
    token: &str,
    jwt: DecomposedJwt<'_>,
    outcome: Result<(), Error>,
) -> Result<VerifiedJwt, Error> {
    match outcome {
        Ok(()) => Ok(VerifiedJwt {
            header: jwt.header,
            claims: jwt.claims,
        }),
        Err(err) if policy.include_raw_jwt_in_errors => Err(err.attach_raw_jwt(token)),
        Err(err) => Err(err),
    }
}

fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_base64url;
    use serde_json::json;

    fn token_with(header: Value, payload: Value) -> String {
        format!(
            "{}.{}.{}",
            encode_base64url(serde_json::to_vec(&header).expect("header json")),
            encode_base64url(serde_json::to_vec(&payload).expect("payload json")),
            encode_base64url(b"signature")
        )
    }

    #[test]
    fn default_jwks_uri_appends_well_known() {
        let policy = IssuerPolicy::new("https://issuer.example.com/tenant").expect("policy");
        assert_eq!(policy.issuer(), "https://issuer.example.com/tenant");

        let verifier = JwtVerifier::new(policy);
        assert_eq!(
            verifier.issuers[0].jwks_uri.as_str(),
            "https://issuer.example.com/tenant/.well-known/jwks.json"
        );
    }

    #[test]
    fn decompose_rejects_missing_alg_and_bad_header_types() {
        let token = token_with(json!({ "kid": "k1" }), json!({ "iss": "x" }));
        assert!(matches!(decompose(&token), Err(Error::InvalidJwt(_))));

        let token = token_with(json!({ "alg": "RS256", "kid": 42 }), json!({ "iss": "x" }));
        assert!(matches!(decompose(&token), Err(Error::InvalidJwt(_))));

        let token = token_with(json!({ "alg": "RS256", "typ": ["JWT"] }), json!({}));
        assert!(matches!(decompose(&token), Err(Error::InvalidJwt(_))));
    }

    #[test]
    fn multi_issuer_routes_on_iss_claim() {
        let verifier = JwtVerifier::with_issuers(vec![
            IssuerPolicy::new("https://a.example.com").expect("policy"),
            IssuerPolicy::new("https://b.example.com").expect("policy"),
        ]);

        let claims = match json!({ "iss": "https://b.example.com" }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let policy = verifier.select_policy(&claims).expect("policy");
        assert_eq!(policy.issuer(), "https://b.example.com");

        let claims = match json!({ "iss": "https://c.example.com" }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert!(matches!(
            verifier.select_policy(&claims),
            Err(Error::JwtIssuerNotAllowed { .. })
        ));
    }

    #[test]
    fn sync_verify_without_resident_jwks_fails_without_io() {
        let verifier =
            JwtVerifier::new(IssuerPolicy::new("https://issuer.example.com").expect("policy"));
        let token = token_with(
            json!({ "alg": "RS256", "kid": "k1" }),
            json!({ "iss": "https://issuer.example.com" }),
        );
        assert!(matches!(
            verifier.verify_sync(&token),
            Err(Error::KidNotFoundInJwks(_))
        ));
    }
}
