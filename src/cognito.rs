//! Verifier preset for Amazon Cognito user pools.
//!
//! Cognito issues two JWT kinds from the same JWKS: id tokens carry the
//! client id in `aud`, access tokens in `client_id`. The preset fixes the
//! issuer and JWKS shape, pins `token_use`, and optionally requires
//! membership in one of a set of `cognito:groups`. Everything else is the
//! generic pipeline.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::claims::CustomCheck;
use crate::error::Error;
use crate::jwk::JwkSet;
use crate::jwks::JwksCache;
use crate::verifier::{IssuerPolicy, JwtVerifier, VerifiedJwt};

/// Which Cognito token kind a verifier accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenUse {
    Id,
    Access,
}

impl TokenUse {
    fn claim_value(self) -> &'static str {
        match self {
            TokenUse::Id => "id",
            TokenUse::Access => "access",
        }
    }
}

/// Builder for [`CognitoVerifier`].
pub struct CognitoVerifierBuilder {
    region: String,
    user_pool_id: String,
    client_ids: Vec<String>,
    token_use: TokenUse,
    groups: Option<Vec<String>>,
    grace_seconds: u64,
    include_raw_jwt_in_errors: bool,
    custom_check: Option<CustomCheck>,
    cache: Option<Arc<dyn JwksCache>>,
}

impl CognitoVerifierBuilder {
    pub fn token_use(mut self, token_use: TokenUse) -> Self {
        self.token_use = token_use;
        self
    }

    pub fn additional_client_id(mut self, client_id: &str) -> Self {
        self.client_ids.push(client_id.to_string());
        self
    }

    /// Require membership in at least one of the given groups
    /// (`cognito:groups` claim).
    pub fn groups(mut self, groups: &[&str]) -> Self {
        self.groups = Some(groups.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn grace_seconds(mut self, grace_seconds: u64) -> Self {
        self.grace_seconds = grace_seconds;
        self
    }

    pub fn include_raw_jwt_in_errors(mut self, include: bool) -> Self {
        self.include_raw_jwt_in_errors = include;
        self
    }

    pub fn custom_check(mut self, check: CustomCheck) -> Self {
        self.custom_check = Some(check);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn JwksCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<CognitoVerifier, Error> {
        let issuer = format!(
            "https://cognito-idp.{}.amazonaws.com/{}",
            self.region, self.user_pool_id
        );
        let mut policy = IssuerPolicy::new(&issuer)?
            .grace_seconds(self.grace_seconds)
            .include_raw_jwt_in_errors(self.include_raw_jwt_in_errors);
        if let Some(check) = self.custom_check {
            policy = policy.custom_check(check);
        }

        let token_use = self.token_use;
        policy.push_specialization_check(Arc::new(move |claims| {
            let got = claims.get("token_use").and_then(Value::as_str);
            if got == Some(token_use.claim_value()) {
                Ok(())
            } else {
                Err(Error::JwtTokenUseNotAllowed {
                    message: format!(
                        "token_use is {got:?}, expected {:?}",
                        token_use.claim_value()
                    ),
                    raw_jwt: None,
                })
            }
        }));

        let client_ids = self.client_ids;
        policy.push_specialization_check(Arc::new(move |claims| match token_use {
            TokenUse::Id => assert_id_token_client_id(claims, &client_ids),
            TokenUse::Access => assert_access_token_client_id(claims, &client_ids),
        }));

        if let Some(groups) = self.groups {
            policy.push_specialization_check(Arc::new(move |claims| {
                assert_group_membership(claims, &groups)
            }));
        }

        let mut inner = JwtVerifier::new(policy);
        if let Some(cache) = self.cache {
            inner = inner.with_cache(cache);
        }
        Ok(CognitoVerifier { issuer, inner })
    }
}

/// Verifier for JWTs issued by one Cognito user pool.
pub struct CognitoVerifier {
    issuer: String,
    inner: JwtVerifier,
}

impl CognitoVerifier {
    /// Start configuring a verifier for the pool `user_pool_id` in
    /// `region`, accepting tokens minted for `client_id`.
    pub fn builder(region: &str, user_pool_id: &str, client_id: &str) -> CognitoVerifierBuilder {
        CognitoVerifierBuilder {
            region: region.to_string(),
            user_pool_id: user_pool_id.to_string(),
            client_ids: vec![client_id.to_string()],
            token_use: TokenUse::Access,
            groups: None,
            grace_seconds: 0,
            include_raw_jwt_in_errors: false,
            custom_check: None,
            cache: None,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub async fn hydrate(&self) -> Result<(), Error> {
        self.inner.hydrate().await
    }

    pub fn preload(&self, jwks: JwkSet) -> Result<(), Error> {
        self.inner.preload(&self.issuer, jwks)
    }

    pub async fn verify(&self, token: &str) -> Result<VerifiedJwt, Error> {
        self.inner.verify(token).await
    }

    pub fn verify_sync(&self, token: &str) -> Result<VerifiedJwt, Error> {
        self.inner.verify_sync(token)
    }

    pub fn verify_with_jwks(&self, token: &str, jwks: &JwkSet) -> Result<VerifiedJwt, Error> {
        self.inner.verify_with_jwks(token, jwks)
    }
}

/// Id tokens carry the client id in `aud`; `azp` is deliberately ignored.
fn assert_id_token_client_id(
    claims: &Map<String, Value>,
    client_ids: &[String],
) -> Result<(), Error> {
    let matched = match claims.get("aud") {
        Some(Value::String(aud)) => client_ids.iter().any(|candidate| candidate == aud),
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(Value::as_str)
            .any(|aud| client_ids.iter().any(|candidate| candidate == aud)),
        _ => false,
    };
    if matched {
        Ok(())
    } else {
        Err(Error::JwtClientIdNotAllowed {
            message: "id token aud does not match a configured client id".to_string(),
            raw_jwt: None,
        })
    }
}

/// Access tokens carry the client id in `client_id`; `aud` is ignored.
fn assert_access_token_client_id(
    claims: &Map<String, Value>,
    client_ids: &[String],
) -> Result<(), Error> {
    let matched = claims
        .get("client_id")
        .and_then(Value::as_str)
        .is_some_and(|client_id| client_ids.iter().any(|candidate| candidate == client_id));
    if matched {
        Ok(())
    } else {
        Err(Error::JwtClientIdNotAllowed {
            message: "access token client_id does not match a configured client id".to_string(),
            raw_jwt: None,
        })
    }
}

fn assert_group_membership(claims: &Map<String, Value>, groups: &[String]) -> Result<(), Error> {
    let matched = match claims.get("cognito:groups") {
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(Value::as_str)
            .any(|group| groups.iter().any(|candidate| candidate == group)),
        Some(Value::String(group)) => groups.iter().any(|candidate| candidate == group),
        _ => false,
    };
    if matched {
        Ok(())
    } else {
        Err(Error::JwtGroupNotAllowed {
            message: "jwt is not in any of the required cognito:groups".to_string(),
            raw_jwt: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims_from_value(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn issuer_shape() {
        let verifier = CognitoVerifier::builder("eu-west-1", "eu-west-1_AbC123", "client-1")
            .build()
            .expect("build");
        assert_eq!(
            verifier.issuer(),
            "https://cognito-idp.eu-west-1.amazonaws.com/eu-west-1_AbC123"
        );
    }

    #[test]
    fn id_token_checks_aud() {
        let claims = claims_from_value(json!({ "aud": "client-1" }));
        assert_id_token_client_id(&claims, &["client-1".to_string()]).expect("match");

        let claims = claims_from_value(json!({ "aud": "other" }));
        assert!(matches!(
            assert_id_token_client_id(&claims, &["client-1".to_string()]),
            Err(Error::JwtClientIdNotAllowed { .. })
        ));
    }

    #[test]
    fn access_token_checks_client_id_and_ignores_aud() {
        let claims = claims_from_value(json!({ "aud": "other", "client_id": "client-1" }));
        assert_access_token_client_id(&claims, &["client-1".to_string()]).expect("match");

        let claims = claims_from_value(json!({ "aud": "client-1" }));
        assert!(matches!(
            assert_access_token_client_id(&claims, &["client-1".to_string()]),
            Err(Error::JwtClientIdNotAllowed { .. })
        ));
    }

    #[test]
    fn group_membership() {
        let claims = claims_from_value(json!({ "cognito:groups": ["admins", "users"] }));
        assert_group_membership(&claims, &["admins".to_string()]).expect("member");

        let claims = claims_from_value(json!({ "cognito:groups": ["users"] }));
        assert!(matches!(
            assert_group_membership(&claims, &["admins".to_string()]),
            Err(Error::JwtGroupNotAllowed { .. })
        ));

        let claims = claims_from_value(json!({}));
        assert!(matches!(
            assert_group_membership(&claims, &["admins".to_string()]),
            Err(Error::JwtGroupNotAllowed { .. })
        ));
    }
}
