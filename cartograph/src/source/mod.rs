//! Loading of resources.
//!
//! [`ResourceSource`] is the entry point: it combines a [`ResourceLoader`] backend with a
//! [`ResponseCache`] and delivers responses through a [`RunLoop`](crate::run_loop::RunLoop).

use std::sync::Arc;

use crate::async_runtime;
use crate::cache::{Attach, FetchTicket, ResponseCache, Waiter, WeakResponseCache};
use crate::resource::{Resource, Response, ResponseError};
use crate::run_loop::RunLoopHandle;

mod asset;
mod loader;
mod mapbox;
mod network;
mod router;
mod stub;

pub use asset::AssetLoader;
pub use loader::ResourceLoader;
pub use network::NetworkLoader;
pub use router::{RouterOptions, SchemeRouter};
pub use stub::StubLoader;

/// Loads resources with a loader, caching and coalescing the results.
///
/// All callbacks are executed on the thread of the run loop the source was created with, never
/// inside [`ResourceSource::request`] itself, even when the response is already cached.
pub struct ResourceSource {
    loader: Arc<dyn ResourceLoader>,
    cache: ResponseCache,
    run_loop: RunLoopHandle,
}

impl std::fmt::Debug for ResourceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSource")
            .field("cache", &self.cache)
            .field("run_loop", &self.run_loop)
            .finish()
    }
}

impl ResourceSource {
    /// Creates a new source.
    pub fn new(
        loader: Arc<dyn ResourceLoader>,
        cache: ResponseCache,
        run_loop: RunLoopHandle,
    ) -> Self {
        Self {
            loader,
            cache,
            run_loop,
        }
    }

    /// Cache of the source.
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Handle of the run loop responses are delivered to.
    pub fn run_loop(&self) -> &RunLoopHandle {
        &self.run_loop
    }

    /// Requests the resource.
    ///
    /// `on_complete` is called exactly once on the run loop thread with the response, unless the
    /// returned handle is canceled or dropped before that. A canceled request never calls its
    /// callback.
    pub fn request(
        &self,
        resource: Resource,
        on_complete: impl FnOnce(Arc<Response>) + Send + 'static,
    ) -> RequestHandle {
        let waiter = Waiter::new(Box::new(on_complete));
        match self.cache.get_or_fetch(&resource, &waiter) {
            Attach::Hit(response) => self.deliver(&waiter, response),
            Attach::Joined => {}
            Attach::Fetch(ticket) => self.fetch(&resource, ticket),
            Attach::Stale {
                response,
                revalidate,
            } => {
                self.deliver(&waiter, response);
                self.fetch(&resource, revalidate);
            }
        }

        RequestHandle {
            waiter,
            resource,
            cache: self.cache.downgrade(),
        }
    }

    fn deliver(&self, waiter: &Arc<Waiter>, response: Arc<Response>) {
        let waiter = waiter.clone();
        if !self.run_loop.post(move || {
            waiter.notify(response);
        }) {
            log::debug!("Run loop is closed, cached response will not be delivered");
        }
    }

    fn fetch(&self, resource: &Resource, ticket: FetchTicket) {
        let FetchTicket { id, prior } = ticket;
        log::trace!("Loading {resource}");

        let loader = self.loader.clone();
        let cache = self.cache.downgrade();
        let run_loop = self.run_loop.clone();
        let task_resource = resource.clone();
        let task = async_runtime::spawn(async move {
            let response = loader.load(&task_resource, prior.as_deref()).await;
            post_completion(&run_loop, cache, task_resource, id, response);
        });

        match task {
            Some(task) => self.cache.set_abort(resource, id, task.abort_handle()),
            None => post_completion(
                &self.run_loop,
                self.cache.downgrade(),
                resource.clone(),
                id,
                Response::error(ResponseError::retriable("worker runtime is not available")),
            ),
        }
    }
}

fn post_completion(
    run_loop: &RunLoopHandle,
    cache: WeakResponseCache,
    resource: Resource,
    fetch_id: u64,
    response: Response,
) {
    let posted = run_loop.post(move || {
        let Some(cache) = cache.upgrade() else {
            return;
        };

        let completion = match cache.complete(&resource, fetch_id, response) {
            Ok(completion) => completion,
            Err(err) => {
                log::trace!("Dropping the result of {resource}: {err}");
                return;
            }
        };

        for waiter in completion.waiters {
            waiter.notify(completion.response.clone());
        }
    });

    if !posted {
        log::trace!("Run loop is closed, dropping a loaded response");
    }
}

/// Outstanding request of a resource.
///
/// Canceling or dropping the handle guarantees that the callback of the request will not be
/// called. If nobody else waits for the same resource, the fetch is aborted.
pub struct RequestHandle {
    waiter: Arc<Waiter>,
    resource: Resource,
    cache: WeakResponseCache,
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("resource", &self.resource)
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl RequestHandle {
    /// Requested resource.
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Returns true if the callback was neither called nor canceled yet.
    pub fn is_pending(&self) -> bool {
        self.waiter.is_pending()
    }

    /// Cancels the request. Does nothing if the request is already completed or canceled.
    pub fn cancel(&self) {
        if self.waiter.take().is_none() {
            return;
        }

        if let Some(cache) = self.cache.upgrade() {
            cache.detach(&self.resource, self.waiter.id());
        }
    }
}

impl Drop for RequestHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
