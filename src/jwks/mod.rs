//! JWKS retrieval and caching.

mod cache;
mod fetch;

pub use cache::{CachedKey, JwksCache, StandardJwksCache, DEFAULT_PENALTY_BOX_CAPACITY};
pub use fetch::{HttpFetcher, JwksFetcher, DEFAULT_RESPONSE_TIMEOUT};

pub(crate) use cache::select_jwk;
