//! In-memory cache of loaded responses, which also keeps track of fetches in progress.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use ahash::{HashMap, HashMapExt};
use parking_lot::Mutex;
use quick_cache::unsync::Cache;
use quick_cache::Weighter;
use tokio::task::AbortHandle;
use web_time::SystemTime;

use crate::resource::{Resource, Response, ResponseError};

mod policy;

pub use policy::{ExpirationPolicy, Freshness, RevalidationPolicy, StaleWhileRevalidate};

const DEFAULT_CAPACITY: u64 = 50 * 1024 * 1024;
const DEFAULT_ESTIMATED_ITEMS: usize = 1024;
const ENTRY_OVERHEAD: u64 = 256;

/// Function called with the response of a request.
pub type ResponseCallback = Box<dyn FnOnce(Arc<Response>) + Send + 'static>;

/// Size limits of a [`ResponseCache`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    /// Maximum total size of cached payloads in bytes.
    pub max_bytes: u64,
    /// Expected number of entries, used to preallocate the cache.
    pub estimated_items: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_CAPACITY,
            estimated_items: DEFAULT_ESTIMATED_ITEMS,
        }
    }
}

impl CacheOptions {
    /// Sets the maximum total size of cached payloads.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Sets the expected number of entries.
    pub fn with_estimated_items(mut self, estimated_items: usize) -> Self {
        self.estimated_items = estimated_items;
        self
    }
}

/// Snapshot of the cache counters.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of stored responses.
    pub entries: usize,
    /// Total weight of the stored responses.
    pub weight: u64,
    /// Number of resources being loaded.
    pub in_flight: usize,
    /// Number of fetches started since the cache was created.
    pub fetches: u64,
}

#[derive(Debug, Clone)]
struct ResponseWeighter;

impl Weighter<Resource, Arc<Response>> for ResponseWeighter {
    fn weight(&self, _key: &Resource, val: &Arc<Response>) -> u64 {
        val.payload_size() as u64 + ENTRY_OVERHEAD
    }
}

/// Requester waiting for a response.
pub(crate) struct Waiter {
    id: u64,
    callback: Mutex<Option<ResponseCallback>>,
}

impl Waiter {
    pub(crate) fn new(callback: ResponseCallback) -> Arc<Self> {
        static ID: AtomicU64 = AtomicU64::new(0);
        Arc::new(Self {
            id: ID.fetch_add(1, Ordering::Relaxed),
            callback: Mutex::new(Some(callback)),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Takes the callback out. Only the first call returns it.
    pub(crate) fn take(&self) -> Option<ResponseCallback> {
        self.callback.lock().take()
    }

    /// Calls the callback with the response, unless it was already called or canceled.
    pub(crate) fn notify(&self, response: Arc<Response>) -> bool {
        match self.take() {
            Some(callback) => {
                callback(response);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.callback.lock().is_some()
    }
}

struct InFlight {
    fetch_id: u64,
    waiters: Vec<Arc<Waiter>>,
    prior: Option<Arc<Response>>,
    abort: Option<AbortHandle>,
}

struct CacheState {
    store: Cache<Resource, Arc<Response>, ResponseWeighter>,
    in_flight: HashMap<Resource, InFlight>,
    next_fetch_id: u64,
    fetches: u64,
}

impl CacheState {
    fn new(options: &CacheOptions) -> Self {
        Self {
            store: new_store(options),
            in_flight: HashMap::new(),
            next_fetch_id: 0,
            fetches: 0,
        }
    }

    fn start_fetch(
        &mut self,
        resource: &Resource,
        waiter: Option<&Arc<Waiter>>,
        prior: Option<Arc<Response>>,
    ) -> FetchTicket {
        let id = self.next_fetch_id;
        self.next_fetch_id += 1;
        self.fetches += 1;

        self.in_flight.insert(
            resource.clone(),
            InFlight {
                fetch_id: id,
                waiters: waiter.into_iter().cloned().collect(),
                prior: prior.clone(),
                abort: None,
            },
        );

        FetchTicket { id, prior }
    }
}

impl Drop for CacheState {
    fn drop(&mut self) {
        for (_, entry) in self.in_flight.drain() {
            if let Some(abort) = entry.abort {
                abort.abort();
            }
        }
    }
}

fn new_store(options: &CacheOptions) -> Cache<Resource, Arc<Response>, ResponseWeighter> {
    Cache::with_weighter(
        options.estimated_items.max(1),
        options.max_bytes,
        ResponseWeighter,
    )
}

/// Permission to run a fetch for a resource. Only one ticket exists for a resource at a time.
pub(crate) struct FetchTicket {
    pub(crate) id: u64,
    pub(crate) prior: Option<Arc<Response>>,
}

/// Outcome of [`ResponseCache::get_or_fetch`].
pub(crate) enum Attach {
    /// A fresh response is cached.
    Hit(Arc<Response>),
    /// The resource is already being loaded, the waiter will be notified when it is done.
    Joined,
    /// The waiter is the first one, the caller must start the fetch.
    Fetch(FetchTicket),
    /// A stale response is cached. It can be delivered, and the caller must start a background
    /// fetch to refresh it. The waiter is not attached to that fetch.
    Stale {
        response: Arc<Response>,
        revalidate: FetchTicket,
    },
}

/// Result of a finished fetch together with everyone waiting for it.
pub(crate) struct Completion {
    pub(crate) response: Arc<Response>,
    pub(crate) waiters: Vec<Arc<Waiter>>,
}

struct CacheShared {
    state: Mutex<CacheState>,
    policy: Arc<dyn RevalidationPolicy>,
    options: CacheOptions,
}

/// In-memory store of loaded responses keyed by [`Resource`].
///
/// Besides the responses themselves, the cache keeps track of resources that are being loaded.
/// While a resource is loading, all new requests for it wait for the same fetch, so there is
/// never more than one fetch for a resource at a time, and all its requesters get the same
/// response object.
///
/// Stored responses are weighted by their payload size. When the total weight exceeds
/// [`CacheOptions::max_bytes`], responses that were not requested recently are evicted.
/// Resources being loaded are tracked separately and are never evicted. Failed responses are not
/// stored.
#[derive(Clone)]
pub struct ResponseCache {
    shared: Arc<CacheShared>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("options", &self.shared.options)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CacheOptions::default())
    }
}

impl ResponseCache {
    /// Creates a new cache with [`ExpirationPolicy`].
    pub fn new(options: CacheOptions) -> Self {
        Self::with_policy(options, ExpirationPolicy)
    }

    /// Creates a new cache with the given revalidation policy.
    pub fn with_policy(options: CacheOptions, policy: impl RevalidationPolicy + 'static) -> Self {
        Self::with_shared_policy(options, Arc::new(policy))
    }

    /// Creates a new cache with a policy that may be shared with other caches.
    pub fn with_shared_policy(options: CacheOptions, policy: Arc<dyn RevalidationPolicy>) -> Self {
        Self {
            shared: Arc::new(CacheShared {
                state: Mutex::new(CacheState::new(&options)),
                policy,
                options,
            }),
        }
    }

    /// Size limits of the cache.
    pub fn options(&self) -> CacheOptions {
        self.shared.options
    }

    /// Returns the stored response for the resource regardless of its freshness.
    pub fn get(&self, resource: &Resource) -> Option<Arc<Response>> {
        self.shared.state.lock().store.get(resource).cloned()
    }

    /// Returns true if the resource is being loaded.
    pub fn is_in_flight(&self, resource: &Resource) -> bool {
        self.shared.state.lock().in_flight.contains_key(resource)
    }

    /// Current counters of the cache.
    pub fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock();
        CacheStats {
            entries: state.store.len(),
            weight: state.store.weight(),
            in_flight: state.in_flight.len(),
            fetches: state.fetches,
        }
    }

    /// Releases all stored responses. Fetches in progress are not affected.
    pub fn clear(&self) {
        let mut state = self.shared.state.lock();
        let released = state.store.len();
        state.store = new_store(&self.shared.options);

        if released > 0 {
            log::debug!("Released {released} cached responses");
        }
    }

    pub(crate) fn downgrade(&self) -> WeakResponseCache {
        WeakResponseCache {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Registers the waiter for the resource.
    pub(crate) fn get_or_fetch(&self, resource: &Resource, waiter: &Arc<Waiter>) -> Attach {
        let now = SystemTime::now();
        let mut state = self.shared.state.lock();

        if let Some(entry) = state.in_flight.get_mut(resource) {
            log::trace!("Joining the fetch of {resource}");
            entry.waiters.push(waiter.clone());
            return Attach::Joined;
        }

        let Some(cached) = state.store.get(resource).cloned() else {
            return Attach::Fetch(state.start_fetch(resource, Some(waiter), None));
        };

        match self.shared.policy.freshness(&cached, now) {
            Freshness::Fresh => Attach::Hit(cached),
            Freshness::Stale => {
                log::trace!("Serving stale {resource} while revalidating");
                let revalidate = state.start_fetch(resource, None, Some(cached.clone()));
                Attach::Stale {
                    response: cached,
                    revalidate,
                }
            }
            Freshness::Expired => {
                log::trace!("Cached {resource} expired");
                Attach::Fetch(state.start_fetch(resource, Some(waiter), Some(cached)))
            }
        }
    }

    /// Stores the abort handle of the fetch. If nobody waits for the fetch anymore, it is aborted
    /// right away.
    pub(crate) fn set_abort(&self, resource: &Resource, fetch_id: u64, abort: AbortHandle) {
        let mut state = self.shared.state.lock();
        match state.in_flight.get_mut(resource) {
            Some(entry) if entry.fetch_id == fetch_id => entry.abort = Some(abort),
            _ => abort.abort(),
        }
    }

    /// Finishes the fetch and returns the response and the waiters to deliver it to.
    ///
    /// Fails with [`ResponseError::Canceled`] if the fetch was canceled in the meantime.
    pub(crate) fn complete(
        &self,
        resource: &Resource,
        fetch_id: u64,
        response: Response,
    ) -> Result<Completion, ResponseError> {
        let mut state = self.shared.state.lock();
        let is_active = state
            .in_flight
            .get(resource)
            .is_some_and(|entry| entry.fetch_id == fetch_id);
        let Some(entry) = is_active
            .then(|| state.in_flight.remove(resource))
            .flatten()
        else {
            return Err(ResponseError::Canceled);
        };

        let response = if response.is_not_modified() {
            match &entry.prior {
                Some(prior) => Response::revalidated(prior, &response),
                None => Response::error(ResponseError::permanent(
                    "not modified response for a resource that is not cached",
                )),
            }
        } else {
            response
        };

        let response = Arc::new(response);
        if response.is_success() {
            state.store.insert(resource.clone(), response.clone());
        } else {
            log::debug!("Failed to load {resource}: {:?}", response.failure());
        }

        Ok(Completion {
            response,
            waiters: entry.waiters,
        })
    }

    /// Removes the waiter from the fetch of the resource. Aborts the fetch if it was the last
    /// waiter.
    pub(crate) fn detach(&self, resource: &Resource, waiter_id: u64) {
        let mut state = self.shared.state.lock();
        let Some(entry) = state.in_flight.get_mut(resource) else {
            return;
        };

        let waiters_count = entry.waiters.len();
        entry.waiters.retain(|waiter| waiter.id() != waiter_id);
        if entry.waiters.len() == waiters_count || !entry.waiters.is_empty() {
            return;
        }

        if let Some(entry) = state.in_flight.remove(resource) {
            log::debug!("Canceled the fetch of {resource}");
            if let Some(abort) = entry.abort {
                abort.abort();
            }
        }
    }
}

/// Reference to a cache that does not keep it alive.
#[derive(Clone)]
pub(crate) struct WeakResponseCache {
    shared: Weak<CacheShared>,
}

impl WeakResponseCache {
    pub(crate) fn upgrade(&self) -> Option<ResponseCache> {
        self.shared.upgrade().map(|shared| ResponseCache { shared })
    }
}
