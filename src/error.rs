use std::fmt;

/// Failure raised by a user-supplied claim check.
///
/// Carries the message produced by the check; the original cause is folded
/// into the message because errors must stay cloneable for coalesced cache
/// waiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomCheckFailure {
    pub message: String,
}

impl fmt::Display for CustomCheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("invalid jwt: {0}")]
    InvalidJwt(String),
    #[error("invalid jwk: {0}")]
    JwkInvalid(String),
    #[error("invalid jwks: {0}")]
    JwksValidation(String),
    #[error("no jwk found in jwks: {0}")]
    KidNotFoundInJwks(String),
    #[error("ambiguous jwks lookup: {0}")]
    JwksMultipleKeysFound(String),
    #[error("invalid signature algorithm: {0}")]
    JwtInvalidSignatureAlgorithm(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("jwt expired: {message}")]
    JwtExpired {
        message: String,
        raw_jwt: Option<String>,
    },
    #[error("jwt not yet valid: {message}")]
    JwtNotBefore {
        message: String,
        raw_jwt: Option<String>,
    },
    #[error("issuer not allowed: {message}")]
    JwtIssuerNotAllowed {
        message: String,
        raw_jwt: Option<String>,
    },
    #[error("audience not allowed: {message}")]
    JwtAudienceNotAllowed {
        message: String,
        raw_jwt: Option<String>,
    },
    #[error("scope not allowed: {message}")]
    JwtScopeNotAllowed {
        message: String,
        raw_jwt: Option<String>,
    },
    #[error("custom jwt check failed: {cause}")]
    JwtCustomCheckFailed {
        cause: CustomCheckFailure,
        raw_jwt: Option<String>,
    },
    #[error("token_use not allowed: {message}")]
    JwtTokenUseNotAllowed {
        message: String,
        raw_jwt: Option<String>,
    },
    #[error("client_id not allowed: {message}")]
    JwtClientIdNotAllowed {
        message: String,
        raw_jwt: Option<String>,
    },
    #[error("group not allowed: {message}")]
    JwtGroupNotAllowed {
        message: String,
        raw_jwt: Option<String>,
    },
    #[error("invalid issuer url: {0}")]
    InvalidIssuerUrl(String),
    #[error("jwks fetch error: {0}")]
    FetchError(String),
    #[error("jwks fetch error (non-retryable): {0}")]
    NonRetryableFetchError(String),
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Whether retrying the verification later can reasonably succeed.
    ///
    /// Only transient transport failures qualify; `KidNotFoundInJwks` is
    /// deliberately non-retryable because the penalty box already absorbed
    /// the refresh attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::FetchError(_))
    }

    /// The offending compact JWT, when the verifier was configured to
    /// include it in claim failures.
    pub fn raw_jwt(&self) -> Option<&str> {
        match self {
            Error::JwtExpired { raw_jwt, .. }
            | Error::JwtNotBefore { raw_jwt, .. }
            | Error::JwtIssuerNotAllowed { raw_jwt, .. }
            | Error::JwtAudienceNotAllowed { raw_jwt, .. }
            | Error::JwtScopeNotAllowed { raw_jwt, .. }
            | Error::JwtCustomCheckFailed { raw_jwt, .. }
            | Error::JwtTokenUseNotAllowed { raw_jwt, .. }
            | Error::JwtClientIdNotAllowed { raw_jwt, .. }
            | Error::JwtGroupNotAllowed { raw_jwt, .. } => raw_jwt.as_deref(),
            _ => None,
        }
    }

    /// Attach the raw token to claim-level failures. Other error kinds pass
    /// through untouched; transport and parse errors never carry the token.
    pub(crate) fn attach_raw_jwt(mut self, token: &str) -> Self {
        match &mut self {
            Error::JwtExpired { raw_jwt, .. }
            | Error::JwtNotBefore { raw_jwt, .. }
            | Error::JwtIssuerNotAllowed { raw_jwt, .. }
            | Error::JwtAudienceNotAllowed { raw_jwt, .. }
            | Error::JwtScopeNotAllowed { raw_jwt, .. }
            | Error::JwtCustomCheckFailed { raw_jwt, .. }
            | Error::JwtTokenUseNotAllowed { raw_jwt, .. }
            | Error::JwtClientIdNotAllowed { raw_jwt, .. }
            | Error::JwtGroupNotAllowed { raw_jwt, .. } => *raw_jwt = Some(token.to_string()),
            _ => {}
        }
        self
    }
}
