use async_trait::async_trait;

use crate::resource::{Resource, Response};

/// Backend that loads resources.
///
/// Loaders are called on the worker runtime, never on the run loop thread. They do not cache or
/// retry: every call must try to load the resource and report the outcome as a [`Response`].
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    /// Loads the resource.
    ///
    /// `prior` is the previously loaded response of the same resource when it is being
    /// revalidated. A loader that supports conditional requests may return
    /// [`Response::not_modified`] if the prior response is still valid.
    async fn load(&self, resource: &Resource, prior: Option<&Response>) -> Response;
}
