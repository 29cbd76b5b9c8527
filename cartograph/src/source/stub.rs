use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use web_time::Duration;

use crate::resource::{Resource, ResourceKind, Response, ResponseError};
use crate::source::ResourceLoader;

type Responder = Box<dyn Fn(&Resource) -> Response + Send + Sync>;

/// Loader that answers with responses produced by injected functions.
///
/// One function can be set for every [`ResourceKind`]. Requests of a kind without a function
/// fail with [`ResponseError::NotFound`]. Every request is recorded, so tests can check what was
/// loaded and how many times.
///
/// ```ignore
/// let loader = StubLoader::new()
///     .with_style_response(|_| Response::data(STYLE))
///     .with_tile_response(|_| Response::data(vec![0; 1024]));
/// ```
#[derive(Default)]
pub struct StubLoader {
    responders: HashMap<ResourceKind, Responder>,
    delay: Option<Duration>,
    requests: Mutex<Vec<Resource>>,
}

impl std::fmt::Debug for StubLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubLoader")
            .field("kinds", &self.responders.keys().collect::<Vec<_>>())
            .field("delay", &self.delay)
            .field("requests", &self.load_count())
            .finish()
    }
}

impl StubLoader {
    /// Creates a loader that answers every request with [`ResponseError::NotFound`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the function producing responses for the resources of the `kind`.
    pub fn with_response(
        mut self,
        kind: ResourceKind,
        responder: impl Fn(&Resource) -> Response + Send + Sync + 'static,
    ) -> Self {
        self.responders.insert(kind, Box::new(responder));
        self
    }

    /// Sets the function producing style documents.
    pub fn with_style_response(
        self,
        responder: impl Fn(&Resource) -> Response + Send + Sync + 'static,
    ) -> Self {
        self.with_response(ResourceKind::Style, responder)
    }

    /// Sets the function producing source metadata.
    pub fn with_source_response(
        self,
        responder: impl Fn(&Resource) -> Response + Send + Sync + 'static,
    ) -> Self {
        self.with_response(ResourceKind::Source, responder)
    }

    /// Sets the function producing tiles.
    pub fn with_tile_response(
        self,
        responder: impl Fn(&Resource) -> Response + Send + Sync + 'static,
    ) -> Self {
        self.with_response(ResourceKind::Tile, responder)
    }

    /// Sets the function producing glyph ranges.
    pub fn with_glyphs_response(
        self,
        responder: impl Fn(&Resource) -> Response + Send + Sync + 'static,
    ) -> Self {
        self.with_response(ResourceKind::Glyphs, responder)
    }

    /// Sets the function producing sprite metadata.
    pub fn with_sprite_json_response(
        self,
        responder: impl Fn(&Resource) -> Response + Send + Sync + 'static,
    ) -> Self {
        self.with_response(ResourceKind::SpriteJson, responder)
    }

    /// Sets the function producing sprite images.
    pub fn with_sprite_image_response(
        self,
        responder: impl Fn(&Resource) -> Response + Send + Sync + 'static,
    ) -> Self {
        self.with_response(ResourceKind::SpriteImage, responder)
    }

    /// Makes every request wait for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of requests received.
    pub fn load_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of requests received for resources of the `kind`.
    pub fn load_count_of(&self, kind: ResourceKind) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|resource| resource.kind == kind)
            .count()
    }

    /// All received requests in order of arrival.
    pub fn requests(&self) -> Vec<Resource> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ResourceLoader for StubLoader {
    async fn load(&self, resource: &Resource, _prior: Option<&Response>) -> Response {
        self.requests.lock().push(resource.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.responders.get(&resource.kind) {
            Some(responder) => responder(resource),
            None => Response::error(ResponseError::NotFound),
        }
    }
}
