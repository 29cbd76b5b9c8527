use web_time::{Duration, SystemTime};

use crate::resource::Response;

/// State of a cached response with respect to its expiration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// The response can be used as is.
    Fresh,
    /// The response can be used, but it should be refreshed in background.
    Stale,
    /// The response must not be used until it is revalidated.
    Expired,
}

/// Decides whether a cached response can be delivered without loading it again.
///
/// Whatever the policy is, the cache never runs more than one fetch for the same resource at a
/// time.
pub trait RevalidationPolicy: Send + Sync {
    /// Freshness of the cached `response` at the time `now`.
    fn freshness(&self, response: &Response, now: SystemTime) -> Freshness;
}

/// Responses are fresh until their expiration time. After that they are loaded again, using
/// their entity tag for a conditional request.
///
/// Responses without expiration time never expire.
#[derive(Debug, Default, Copy, Clone)]
pub struct ExpirationPolicy;

impl RevalidationPolicy for ExpirationPolicy {
    fn freshness(&self, response: &Response, now: SystemTime) -> Freshness {
        if response.is_expired(now) {
            Freshness::Expired
        } else {
            Freshness::Fresh
        }
    }
}

/// Expired responses are still delivered while a fresh copy is loaded in background.
#[derive(Debug, Default, Copy, Clone)]
pub struct StaleWhileRevalidate {
    max_stale: Option<Duration>,
}

impl StaleWhileRevalidate {
    /// Expired responses are delivered regardless of how long ago they expired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Responses that expired more than `max_stale` ago are not delivered until revalidated.
    pub fn with_max_stale(max_stale: Duration) -> Self {
        Self {
            max_stale: Some(max_stale),
        }
    }
}

impl RevalidationPolicy for StaleWhileRevalidate {
    fn freshness(&self, response: &Response, now: SystemTime) -> Freshness {
        let Some(expires) = response.expires() else {
            return Freshness::Fresh;
        };

        if expires > now {
            return Freshness::Fresh;
        }

        let stale_until = self
            .max_stale
            .and_then(|max_stale| expires.checked_add(max_stale));
        match stale_until {
            Some(stale_until) if stale_until <= now => Freshness::Expired,
            _ => Freshness::Stale,
        }
    }
}
