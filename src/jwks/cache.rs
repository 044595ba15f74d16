//! Per-issuer JWKS cache with refresh coalescing and a penalty box.
//!
//! Entries move Empty -> Fetching -> Ready and, on later kid misses,
//! Ready <-> Refetching. A failed fetch leaves the last good JWKS in place
//! and surfaces the error to every caller that awaited that fetch.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Notify;
use url::Url;

use crate::error::Error;
use crate::jwk::{Jwk, JwkSet};
use crate::jwks::fetch::{HttpFetcher, JwksFetcher};
use crate::key::{key_material_from_jwk, KeyMaterial};

/// Default bound on how many unknown `kid`s an issuer entry remembers.
pub const DEFAULT_PENALTY_BOX_CAPACITY: usize = 10;

/// A JWK together with its derived native key, cached per issuer until the
/// JWKS is replaced.
#[derive(Debug, Clone)]
pub struct CachedKey {
    pub jwk: Jwk,
    pub material: KeyMaterial,
}

/// Key resolution against per-issuer JWKS state.
///
/// `get_key` may fetch; `get_cached_key` never performs I/O and fails with
/// [`Error::KidNotFoundInJwks`] when the key is not already resident.
#[async_trait]
pub trait JwksCache: Send + Sync {
    async fn get_key(&self, jwks_uri: &Url, kid: Option<&str>) -> Result<Arc<CachedKey>, Error>;

    fn get_cached_key(&self, jwks_uri: &Url, kid: Option<&str>) -> Result<Arc<CachedKey>, Error>;

    /// Fetch the JWKS for an issuer now, coalescing with any fetch already
    /// in flight.
    async fn refresh(&self, jwks_uri: &Url) -> Result<(), Error>;

    /// Seed an issuer entry so the synchronous surface works before any
    /// fetch has happened.
    fn preload(&self, jwks_uri: &Url, jwks: JwkSet);
}

/// Completion handle shared between the caller that owns a fetch and every
/// caller that coalesced onto it. The result is set before waiters are
/// notified.
#[derive(Default)]
struct FetchHandle {
    done: Notify,
    result: OnceLock<Result<Arc<JwkSet>, Error>>,
}

impl FetchHandle {
    async fn wait(&self) -> Result<Arc<JwkSet>, Error> {
        let mut notified = std::pin::pin!(self.done.notified());
        notified.as_mut().enable();
        if self.result.get().is_none() {
            notified.await;
        }
        self.result
            .get()
            .cloned()
            .expect("fetch result is set before waiters are notified")
    }

    fn complete(&self, result: Result<Arc<JwkSet>, Error>) {
        let _ = self.result.set(result);
        self.done.notify_waiters();
    }
}

#[derive(Default)]
struct IssuerEntry {
    jwks: Option<Arc<JwkSet>>,
    fetched_at: Option<Instant>,
    derived: HashMap<String, Arc<CachedKey>>,
    in_flight: Option<Arc<FetchHandle>>,
    penalty_box: VecDeque<String>,
}

enum Action {
    Done(Result<Arc<CachedKey>, Error>),
    Await(Arc<FetchHandle>),
    Fetch(Arc<FetchHandle>),
}

/// The default [`JwksCache`] implementation.
///
/// All entry transitions happen under one mutex; the mutex is never held
/// across the network fetch.
pub struct StandardJwksCache {
    fetcher: Arc<dyn JwksFetcher>,
    entries: Mutex<HashMap<Url, IssuerEntry>>,
    penalty_box_capacity: usize,
}

impl StandardJwksCache {
    pub fn new() -> Self {
        Self::with_fetcher(Arc::new(HttpFetcher::new()))
    }

    pub fn with_fetcher(fetcher: Arc<dyn JwksFetcher>) -> Self {
        Self {
            fetcher,
            entries: Mutex::new(HashMap::new()),
            penalty_box_capacity: DEFAULT_PENALTY_BOX_CAPACITY,
        }
    }

    pub fn with_penalty_box_capacity(mut self, capacity: usize) -> Self {
        self.penalty_box_capacity = capacity;
        self
    }

    /// Resolve against the resident JWKS. `None` means the kid is simply
    /// not there (a refresh may help); ambiguity and key defects are
    /// terminal.
    fn try_resident(
        entry: &mut IssuerEntry,
        kid: Option<&str>,
    ) -> Option<Result<Arc<CachedKey>, Error>> {
        let jwks = entry.jwks.clone()?;
        match select_jwk(&jwks, kid) {
            Ok(jwk) => Some(Self::derive_key(entry, jwk, kid)),
            Err(Error::KidNotFoundInJwks(_)) => None,
            Err(err) => Some(Err(err)),
        }
    }

    fn derive_key(
        entry: &mut IssuerEntry,
        jwk: &Jwk,
        kid: Option<&str>,
    ) -> Result<Arc<CachedKey>, Error> {
        let slot = kid.unwrap_or("");
        if let Some(cached) = entry.derived.get(slot) {
            return Ok(cached.clone());
        }
        let material = key_material_from_jwk(jwk)?;
        let cached = Arc::new(CachedKey {
            jwk: jwk.clone(),
            material,
        });
        entry.derived.insert(slot.to_string(), cached.clone());
        Ok(cached)
    }

    fn install(entry: &mut IssuerEntry, jwks: Arc<JwkSet>) {
        if let Some(fetched_at) = entry.fetched_at {
            log::debug!(
                "replacing jwks fetched {:.0?} ago ({} keys)",
                fetched_at.elapsed(),
                jwks.keys.len()
            );
        }
        entry.derived.clear();
        entry
            .penalty_box
            .retain(|kid| !jwks_contains_kid(&jwks, kid));
        entry.jwks = Some(jwks);
        entry.fetched_at = Some(Instant::now());
    }

    fn penalize(entry: &mut IssuerEntry, kid: &str, capacity: usize) {
        if capacity == 0 || entry.penalty_box.iter().any(|boxed| boxed == kid) {
            return;
        }
        while entry.penalty_box.len() >= capacity {
            entry.penalty_box.pop_front();
        }
        entry.penalty_box.push_back(kid.to_string());
    }

    async fn fetch_jwks(&self, jwks_uri: &Url) -> Result<Arc<JwkSet>, Error> {
        log::debug!("refreshing jwks from {jwks_uri}");
        let body = self.fetcher.fetch(jwks_uri).await.map_err(|err| {
            log::warn!("jwks fetch from {jwks_uri} failed: {err}");
            err
        })?;
        let jwks = JwkSet::from_slice(&body)?;
        log::debug!("fetched {} jwks keys from {jwks_uri}", jwks.keys.len());
        Ok(Arc::new(jwks))
    }

    /// Run the fetch this caller owns: fetch outside the lock, install the
    /// result and clear the in-flight slot under it, then wake waiters.
    async fn drive_fetch(
        &self,
        jwks_uri: &Url,
        handle: Arc<FetchHandle>,
    ) -> Result<Arc<JwkSet>, Error> {
        let result = self.fetch_jwks(jwks_uri).await;
        {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries.entry(jwks_uri.clone()).or_default();
            if let Ok(jwks) = &result {
                Self::install(entry, jwks.clone());
            }
            if entry
                .in_flight
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &handle))
            {
                entry.in_flight = None;
            }
        }
        handle.complete(result.clone());
        result
    }

    /// Re-check after a successful refresh; a kid that is still absent
    /// enters the penalty box.
    fn post_refresh_lookup(
        &self,
        jwks_uri: &Url,
        kid: Option<&str>,
    ) -> Result<Arc<CachedKey>, Error> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(jwks_uri.clone()).or_default();
        if let Some(resident) = Self::try_resident(entry, kid) {
            return resident;
        }
        match kid {
            Some(kid) => {
                log::warn!("kid {kid:?} not present in jwks from {jwks_uri} after refresh");
                Self::penalize(entry, kid, self.penalty_box_capacity);
                Err(Error::KidNotFoundInJwks(format!("kid {kid:?} not found")))
            }
            None => Err(Error::KidNotFoundInJwks(
                "jwks contains no keys and jwt has no kid".to_string(),
            )),
        }
    }
}

impl Default for StandardJwksCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JwksCache for StandardJwksCache {
    async fn get_key(&self, jwks_uri: &Url, kid: Option<&str>) -> Result<Arc<CachedKey>, Error> {
        let action = {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries.entry(jwks_uri.clone()).or_default();
            if let Some(resident) = Self::try_resident(entry, kid) {
                Action::Done(resident)
            } else if kid.is_some_and(|kid| entry.penalty_box.iter().any(|boxed| boxed == kid)) {
                Action::Done(Err(Error::KidNotFoundInJwks(format!(
                    "kid {:?} not found (penalty box)",
                    kid.unwrap_or_default()
                ))))
            } else if let Some(handle) = entry.in_flight.clone() {
                Action::Await(handle)
            } else {
                let handle = Arc::new(FetchHandle::default());
                entry.in_flight = Some(handle.clone());
                Action::Fetch(handle)
            }
        };

        match action {
            Action::Done(result) => result,
            Action::Await(handle) => {
                handle.wait().await?;
                self.post_refresh_lookup(jwks_uri, kid)
            }
            Action::Fetch(handle) => {
                self.drive_fetch(jwks_uri, handle).await?;
                self.post_refresh_lookup(jwks_uri, kid)
            }
        }
    }

    async fn refresh(&self, jwks_uri: &Url) -> Result<(), Error> {
        let (handle, owned) = {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries.entry(jwks_uri.clone()).or_default();
            match entry.in_flight.clone() {
                Some(handle) => (handle, false),
                None => {
                    let handle = Arc::new(FetchHandle::default());
                    entry.in_flight = Some(handle.clone());
                    (handle, true)
                }
            }
        };

        if owned {
            self.drive_fetch(jwks_uri, handle).await.map(|_| ())
        } else {
            handle.wait().await.map(|_| ())
        }
    }

    fn get_cached_key(&self, jwks_uri: &Url, kid: Option<&str>) -> Result<Arc<CachedKey>, Error> {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(jwks_uri) else {
            return Err(Error::KidNotFoundInJwks(format!(
                "no jwks resident for {jwks_uri}"
            )));
        };
        match Self::try_resident(entry, kid) {
            Some(resident) => resident,
            None => Err(Error::KidNotFoundInJwks(match kid {
                Some(kid) => format!("kid {kid:?} not resident in cached jwks"),
                None => format!("no jwks resident for {jwks_uri}"),
            })),
        }
    }

    fn preload(&self, jwks_uri: &Url, jwks: JwkSet) {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(jwks_uri.clone()).or_default();
        Self::install(entry, Arc::new(jwks));
    }
}

fn jwks_contains_kid(jwks: &JwkSet, kid: &str) -> bool {
    jwks.keys.iter().any(|key| key.kid.as_deref() == Some(kid))
}

/// Pick the JWK for a `kid`. A token without a `kid` matches a single-key
/// set; anything ambiguous fails closed.
pub(crate) fn select_jwk<'a>(jwks: &'a JwkSet, kid: Option<&str>) -> Result<&'a Jwk, Error> {
    match kid {
        Some(kid) => {
            let mut matches = jwks
                .keys
                .iter()
                .filter(|key| key.kid.as_deref() == Some(kid));
            match (matches.next(), matches.next()) {
                (Some(jwk), None) => Ok(jwk),
                (Some(_), Some(_)) => Err(Error::JwksMultipleKeysFound(format!(
                    "jwks contains multiple keys with kid {kid:?}"
                ))),
                (None, _) => Err(Error::KidNotFoundInJwks(format!("kid {kid:?} not found"))),
            }
        }
        None => match jwks.keys.len() {
            1 => Ok(&jwks.keys[0]),
            0 => Err(Error::KidNotFoundInJwks(
                "jwks contains no keys and jwt has no kid".to_string(),
            )),
            n => Err(Error::JwksMultipleKeysFound(format!(
                "jwt has no kid and jwks contains {n} keys"
            ))),
        },
    }
}
