//! Claim-level policy and assertion.
//!
//! Checks run in a fixed order so that failure attribution is
//! deterministic: issuer, audience, expiration, not-before, issuer-flavored
//! checks, scope, and finally the user's custom check.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{CustomCheckFailure, Error};

type SyncCheckFn = dyn Fn(&Map<String, Value>) -> Result<(), String> + Send + Sync;
type AsyncCheckFn = dyn Fn(Map<String, Value>) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>>
    + Send
    + Sync;

/// A user-supplied predicate over the decoded claims, evaluated after every
/// built-in check. The async flavor receives an owned copy of the claims so
/// the returned future is self-contained.
#[derive(Clone)]
pub enum CustomCheck {
    Sync(Arc<SyncCheckFn>),
    Async(Arc<AsyncCheckFn>),
}

impl CustomCheck {
    pub fn sync<F>(check: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Result<(), String> + Send + Sync + 'static,
    {
        CustomCheck::Sync(Arc::new(check))
    }

    pub fn asynchronous<F, Fut>(check: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        CustomCheck::Async(Arc::new(
            move |claims| -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> {
                Box::pin(check(claims))
            },
        ))
    }
}

impl fmt::Debug for CustomCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustomCheck::Sync(_) => f.write_str("CustomCheck::Sync"),
            CustomCheck::Async(_) => f.write_str("CustomCheck::Async"),
        }
    }
}

pub(crate) type SpecializationCheck =
    Arc<dyn Fn(&Map<String, Value>) -> Result<(), Error> + Send + Sync>;

/// The claim assertions applied to a verified payload. `None` disables the
/// corresponding check.
#[derive(Clone, Default)]
pub struct ClaimsPolicy {
    pub issuer: Option<Vec<String>>,
    pub audience: Option<Vec<String>>,
    pub grace_seconds: u64,
    pub scope: Option<Vec<String>>,
    pub custom_check: Option<CustomCheck>,
    pub(crate) specialization_checks: Vec<SpecializationCheck>,
}

impl fmt::Debug for ClaimsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimsPolicy")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("grace_seconds", &self.grace_seconds)
            .field("scope", &self.scope)
            .field("custom_check", &self.custom_check)
            .field("specialization_checks", &self.specialization_checks.len())
            .finish()
    }
}

/// Per-call overrides applied on top of a verifier's configured policy.
#[derive(Clone, Default)]
pub struct PolicyOverrides {
    pub audience: Option<Vec<String>>,
    pub scope: Option<Vec<String>>,
    pub custom_check: Option<CustomCheck>,
}

impl ClaimsPolicy {
    pub(crate) fn merged(&self, overrides: &PolicyOverrides) -> ClaimsPolicy {
        let mut merged = self.clone();
        if overrides.audience.is_some() {
            merged.audience = overrides.audience.clone();
        }
        if overrides.scope.is_some() {
            merged.scope = overrides.scope.clone();
        }
        if overrides.custom_check.is_some() {
            merged.custom_check = overrides.custom_check.clone();
        }
        merged
    }
}

fn expired(message: impl Into<String>) -> Error {
    Error::JwtExpired {
        message: message.into(),
        raw_jwt: None,
    }
}

fn not_before(message: impl Into<String>) -> Error {
    Error::JwtNotBefore {
        message: message.into(),
        raw_jwt: None,
    }
}

pub(crate) fn issuer_not_allowed(message: impl Into<String>) -> Error {
    Error::JwtIssuerNotAllowed {
        message: message.into(),
        raw_jwt: None,
    }
}

fn audience_not_allowed(message: impl Into<String>) -> Error {
    Error::JwtAudienceNotAllowed {
        message: message.into(),
        raw_jwt: None,
    }
}

fn scope_not_allowed(message: impl Into<String>) -> Error {
    Error::JwtScopeNotAllowed {
        message: message.into(),
        raw_jwt: None,
    }
}

fn custom_check_failed(message: String) -> Error {
    Error::JwtCustomCheckFailed {
        cause: CustomCheckFailure { message },
        raw_jwt: None,
    }
}

/// A numeric claim: JSON integers directly, finite non-negative floats by
/// rounding (some issuers emit `exp` as a float).
fn numeric_claim(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    match value.as_f64() {
        Some(f) if f.is_finite() && f >= 0.0 && f < u64::MAX as f64 => Some(f.round() as u64),
        _ => None,
    }
}

/// Run the built-in assertions (everything but the custom check) in order.
pub(crate) fn assert_fixed_claims(
    claims: &Map<String, Value>,
    policy: &ClaimsPolicy,
    now: u64,
) -> Result<(), Error> {
    if let Some(allowed) = policy.issuer.as_deref() {
        let iss = claims
            .get("iss")
            .and_then(Value::as_str)
            .ok_or_else(|| issuer_not_allowed("jwt has no iss claim"))?;
        if !allowed.iter().any(|candidate| candidate == iss) {
            return Err(issuer_not_allowed(format!("issuer {iss:?} is not allowed")));
        }
    }

    if let Some(allowed) = policy.audience.as_deref() {
        let aud = claims
            .get("aud")
            .ok_or_else(|| audience_not_allowed("jwt has no aud claim"))?;
        if !audience_matches(aud, allowed) {
            return Err(audience_not_allowed(format!(
                "audience {aud} is not allowed"
            )));
        }
    }

    let exp = claims
        .get("exp")
        .ok_or_else(|| expired("jwt has no exp claim"))?;
    let exp = numeric_claim(exp).ok_or_else(|| expired("exp claim is not numeric"))?;
    if now > exp.saturating_add(policy.grace_seconds) {
        return Err(expired(format!("expired at {exp} (now {now})")));
    }

    if let Some(nbf) = claims.get("nbf") {
        let nbf = numeric_claim(nbf).ok_or_else(|| not_before("nbf claim is not numeric"))?;
        if now.saturating_add(policy.grace_seconds) < nbf {
            return Err(not_before(format!("not valid before {nbf} (now {now})")));
        }
    }

    for check in &policy.specialization_checks {
        check(claims)?;
    }

    if let Some(required) = policy.scope.as_deref() {
        let scope = claims
            .get("scope")
            .and_then(Value::as_str)
            .ok_or_else(|| scope_not_allowed("jwt has no scope claim"))?;
        let granted: Vec<&str> = scope.split_ascii_whitespace().collect();
        if !required.iter().any(|s| granted.contains(&s.as_str())) {
            return Err(scope_not_allowed(format!(
                "scope {scope:?} grants none of the required scopes"
            )));
        }
    }

    Ok(())
}

fn audience_matches(aud: &Value, allowed: &[String]) -> bool {
    match aud {
        Value::String(aud) => allowed.iter().any(|candidate| candidate == aud),
        Value::Array(entries) => entries
            .iter()
            .filter_map(Value::as_str)
            .any(|aud| allowed.iter().any(|candidate| candidate == aud)),
        _ => false,
    }
}

/// Custom check on the synchronous surface; an async check cannot run here.
pub(crate) fn run_custom_check_sync(
    claims: &Map<String, Value>,
    policy: &ClaimsPolicy,
) -> Result<(), Error> {
    match &policy.custom_check {
        None => Ok(()),
        Some(CustomCheck::Sync(check)) => check(claims).map_err(custom_check_failed),
        Some(CustomCheck::Async(_)) => Err(Error::NotSupported(
            "an async custom check cannot run on the sync verify path".to_string(),
        )),
    }
}

pub(crate) async fn run_custom_check(
    claims: &Map<String, Value>,
    policy: &ClaimsPolicy,
) -> Result<(), Error> {
    match &policy.custom_check {
        None => Ok(()),
        Some(CustomCheck::Sync(check)) => check(claims).map_err(custom_check_failed),
        Some(CustomCheck::Async(check)) => check(claims.clone()).await.map_err(custom_check_failed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: u64 = 1_700_000_000;

    fn claims_from_value(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn base_claims() -> Map<String, Value> {
        claims_from_value(json!({
            "iss": "https://issuer.example.com",
            "aud": "client-a",
            "exp": NOW + 100,
        }))
    }

    fn base_policy() -> ClaimsPolicy {
        ClaimsPolicy {
            issuer: Some(vec!["https://issuer.example.com".to_string()]),
            audience: Some(vec!["client-a".to_string()]),
            ..ClaimsPolicy::default()
        }
    }

    #[test]
    fn happy_path() {
        assert_fixed_claims(&base_claims(), &base_policy(), NOW).expect("assert");
    }

    #[test]
    fn issuer_failure_wins_over_expiration() {
        let mut claims = base_claims();
        claims.insert("iss".to_string(), json!("https://evil.example.com"));
        claims.insert("exp".to_string(), json!(NOW - 100));
        assert!(matches!(
            assert_fixed_claims(&claims, &base_policy(), NOW),
            Err(Error::JwtIssuerNotAllowed { .. })
        ));
    }

    #[test]
    fn disabled_checks_pass() {
        let mut claims = base_claims();
        claims.remove("iss");
        claims.remove("aud");
        let policy = ClaimsPolicy::default();
        assert_fixed_claims(&claims, &policy, NOW).expect("assert");
    }

    #[test]
    fn audience_list_intersection() {
        let mut claims = base_claims();
        claims.insert("aud".to_string(), json!(["other", "client-a"]));
        assert_fixed_claims(&claims, &base_policy(), NOW).expect("assert");

        claims.insert("aud".to_string(), json!(["other", "another"]));
        assert!(matches!(
            assert_fixed_claims(&claims, &base_policy(), NOW),
            Err(Error::JwtAudienceNotAllowed { .. })
        ));
    }

    #[test]
    fn exp_boundary_is_inclusive() {
        let mut claims = base_claims();
        claims.insert("exp".to_string(), json!(NOW));
        assert_fixed_claims(&claims, &base_policy(), NOW).expect("exp == now is valid");

        claims.insert("exp".to_string(), json!(NOW - 1));
        assert!(matches!(
            assert_fixed_claims(&claims, &base_policy(), NOW),
            Err(Error::JwtExpired { .. })
        ));
    }

    #[test]
    fn grace_widens_exp_and_nbf() {
        let mut claims = base_claims();
        claims.insert("exp".to_string(), json!(NOW - 30));
        claims.insert("nbf".to_string(), json!(NOW + 30));
        let mut policy = base_policy();
        policy.grace_seconds = 60;
        assert_fixed_claims(&claims, &policy, NOW).expect("assert");

        policy.grace_seconds = 0;
        assert!(matches!(
            assert_fixed_claims(&claims, &policy, NOW),
            Err(Error::JwtExpired { .. })
        ));
    }

    #[test]
    fn nbf_in_future_fails() {
        let mut claims = base_claims();
        claims.insert("nbf".to_string(), json!(NOW + 10));
        assert!(matches!(
            assert_fixed_claims(&claims, &base_policy(), NOW),
            Err(Error::JwtNotBefore { .. })
        ));
    }

    #[test]
    fn missing_exp_fails() {
        let mut claims = base_claims();
        claims.remove("exp");
        assert!(matches!(
            assert_fixed_claims(&claims, &base_policy(), NOW),
            Err(Error::JwtExpired { .. })
        ));
    }

    #[test]
    fn scope_requires_intersection() {
        let mut claims = base_claims();
        claims.insert("scope".to_string(), json!("openid profile email"));
        let mut policy = base_policy();
        policy.scope = Some(vec!["profile".to_string()]);
        assert_fixed_claims(&claims, &policy, NOW).expect("assert");

        policy.scope = Some(vec!["admin".to_string()]);
        assert!(matches!(
            assert_fixed_claims(&claims, &policy, NOW),
            Err(Error::JwtScopeNotAllowed { .. })
        ));

        claims.remove("scope");
        assert!(matches!(
            assert_fixed_claims(&claims, &policy, NOW),
            Err(Error::JwtScopeNotAllowed { .. })
        ));
    }

    #[test]
    fn sync_custom_check_wraps_cause() {
        let mut policy = base_policy();
        policy.custom_check = Some(CustomCheck::sync(|claims| {
            if claims.contains_key("department") {
                Ok(())
            } else {
                Err("department claim is required".to_string())
            }
        }));
        let err = run_custom_check_sync(&base_claims(), &policy).expect_err("should fail");
        match err {
            Error::JwtCustomCheckFailed { cause, .. } => {
                assert_eq!(cause.message, "department claim is required");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn async_custom_check_runs_on_async_path_only() {
        let mut policy = base_policy();
        policy.custom_check = Some(CustomCheck::asynchronous(|claims| async move {
            if claims.contains_key("aud") {
                Ok(())
            } else {
                Err("no aud".to_string())
            }
        }));

        run_custom_check(&base_claims(), &policy).await.expect("ok");
        assert!(matches!(
            run_custom_check_sync(&base_claims(), &policy),
            Err(Error::NotSupported(_))
        ));
    }
}
