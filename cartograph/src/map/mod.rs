//! [`Map`] loads everything its style needs and keeps track of the outstanding requests.
//!
//! A map owns its [`ResourceSource`] together with the cache inside it, so dropping a map
//! releases everything it loaded. Callbacks of the map requests only hold weak references to the
//! map state, and carry the style generation they were issued for: responses that arrive after
//! the map was dropped or re-styled are discarded.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use ahash::{HashMap, HashMapExt};
use parking_lot::Mutex;

use crate::cache::{CacheStats, ResponseCache};
use crate::error::CartographError;
use crate::resource::{GlyphRange, Resource, ResourceKind, Response};
use crate::run_loop::RunLoop;
use crate::source::{RequestHandle, ResourceLoader, ResourceSource};
use crate::tileset::{TileId, Tileset};
use crate::view::MapView;

mod builder;
mod frame;
mod style;

pub use builder::{MapBuilder, MapMode, MapOptions, RetryPolicy};
pub use frame::{FailureReason, ResourceFailure, StillFrame, TileData};
pub use style::{
    SourceType, Sprite, SpriteSheet, StyleDocument, StyleLayer, StyleSource, DEFAULT_FONT_STACK,
};

/// Lifecycle phase of a [`Map`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MapPhase {
    /// No style was set.
    Idle,
    /// Style document is being loaded.
    StyleLoading,
    /// Style is resolved (loaded or failed). Resources of the style may still be loading.
    Ready,
    /// The map is being dropped, outstanding requests are being canceled.
    Destroying,
    /// All requests are canceled and the cache is released.
    Destroyed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RequestKey {
    Style,
    Source(String),
    Tile(String, TileId),
    SpriteJson,
    SpriteImage,
    Glyphs(String),
}

enum SlotStatus {
    /// `handle` is `None` while a retry is scheduled.
    Pending {
        handle: Option<RequestHandle>,
        attempt: u32,
    },
    Loaded(Arc<Response>),
    Failed(FailureReason),
}

struct Slot {
    resource: Resource,
    status: SlotStatus,
}

impl Slot {
    fn is_pending(&self) -> bool {
        matches!(self.status, SlotStatus::Pending { .. })
    }
}

enum StyleStatus {
    None,
    Loading,
    Loaded(Arc<StyleDocument>),
    Failed(FailureReason),
}

#[derive(Default)]
struct SourceState {
    tileset: Option<Tileset>,
    /// Tile size set by the style, which takes precedence over the one of the TileJSON.
    tile_size: Option<u16>,
    cover: Vec<TileId>,
}

struct MapState {
    phase: MapPhase,
    generation: u64,
    view: MapView,
    style_url: Option<String>,
    style: StyleStatus,
    sources: BTreeMap<String, SourceState>,
    slots: HashMap<RequestKey, Slot>,
}

impl MapState {
    fn new(view: MapView) -> Self {
        Self {
            phase: MapPhase::Idle,
            generation: 0,
            view,
            style_url: None,
            style: StyleStatus::None,
            sources: BTreeMap::new(),
            slots: HashMap::new(),
        }
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation != generation
            || matches!(self.phase, MapPhase::Destroying | MapPhase::Destroyed)
    }

    fn pending_count(&self) -> usize {
        self.slots.values().filter(|slot| slot.is_pending()).count()
    }

    fn is_settled(&self) -> bool {
        self.phase == MapPhase::Ready && self.pending_count() == 0
    }

    /// Forgets the current style and cancels all its requests.
    fn reset(&mut self) {
        self.generation += 1;

        let canceled = self.pending_count();
        self.slots.clear();
        self.sources.clear();
        self.style = StyleStatus::None;

        if canceled > 0 {
            log::debug!("Canceled {canceled} requests of the previous style");
        }
    }

    fn frame(&self) -> Result<StillFrame, CartographError> {
        match &self.style {
            StyleStatus::None => return Err(CartographError::NoStyle),
            StyleStatus::Failed(reason) => return Err(style_error(reason)),
            StyleStatus::Loading | StyleStatus::Loaded(_) => {}
        }

        let mut frame = StillFrame::default();
        for (name, source) in &self.sources {
            for id in &source.cover {
                let key = RequestKey::Tile(name.clone(), *id);
                if let Some(Slot {
                    status: SlotStatus::Loaded(response),
                    ..
                }) = self.slots.get(&key)
                {
                    frame.tiles.push(TileData {
                        source: name.clone(),
                        id: *id,
                        response: response.clone(),
                    });
                }
            }

            if let Some(tileset) = &source.tileset {
                if !tileset.attribution.is_empty()
                    && !frame.attributions.contains(&tileset.attribution)
                {
                    frame.attributions.push(tileset.attribution.clone());
                }
            }
        }

        for (key, slot) in &self.slots {
            match (&slot.status, key) {
                (SlotStatus::Loaded(response), RequestKey::SpriteJson) => {
                    frame.sprite_json = Some(response.clone())
                }
                (SlotStatus::Loaded(response), RequestKey::SpriteImage) => {
                    frame.sprite_image = Some(response.clone())
                }
                (SlotStatus::Loaded(response), RequestKey::Glyphs(font_stack)) => {
                    frame.glyphs.insert(font_stack.clone(), response.clone());
                }
                (SlotStatus::Failed(reason), _) => frame.failures.push(ResourceFailure {
                    resource: slot.resource.clone(),
                    reason: reason.clone(),
                }),
                _ => {}
            }
        }

        frame
            .failures
            .sort_by(|a, b| a.resource.url.cmp(&b.resource.url));

        Ok(frame)
    }
}

fn style_error(reason: &FailureReason) -> CartographError {
    match reason {
        FailureReason::Load(error) => CartographError::Response {
            kind: ResourceKind::Style,
            error: error.clone(),
        },
        FailureReason::Parse(message) => CartographError::Parse {
            kind: ResourceKind::Style,
            message: message.clone(),
        },
    }
}

fn parse_reason(error: CartographError) -> FailureReason {
    match error {
        CartographError::Parse { message, .. } => FailureReason::Parse(message),
        other => FailureReason::Parse(other.to_string()),
    }
}

struct MapShared {
    source: ResourceSource,
    options: MapOptions,
    state: Mutex<MapState>,
}

impl MapShared {
    fn request(
        self: &Arc<Self>,
        state: &mut MapState,
        key: RequestKey,
        resource: Resource,
        attempt: u32,
    ) {
        let map = Arc::downgrade(self);
        let generation = state.generation;
        let callback_key = key.clone();
        let handle = self.source.request(resource.clone(), move |response| {
            if let Some(map) = map.upgrade() {
                map.on_response(generation, callback_key, response);
            }
        });

        state.slots.insert(
            key,
            Slot {
                resource,
                status: SlotStatus::Pending {
                    handle: Some(handle),
                    attempt,
                },
            },
        );
    }

    fn on_response(self: &Arc<Self>, generation: u64, key: RequestKey, response: Arc<Response>) {
        {
            let mut state = self.state.lock();
            if state.is_stale(generation) {
                log::trace!("Discarding a response of a previous style");
                return;
            }

            let Some(slot) = state.slots.get_mut(&key) else {
                return;
            };
            let SlotStatus::Pending { attempt, .. } = slot.status else {
                return;
            };

            match response.failure() {
                None => {
                    slot.status = SlotStatus::Loaded(response.clone());
                    match &key {
                        RequestKey::Style => self.apply_style_response(&mut state, &response),
                        RequestKey::Source(name) => {
                            self.apply_tileset_response(&mut state, name, &response)
                        }
                        _ => {}
                    }
                }
                Some(error) if error.is_retriable() && attempt < self.options.retry.max_retries => {
                    let attempt = attempt + 1;
                    let delay = self.options.retry.delay(attempt);
                    log::debug!(
                        "Failed to load {}: {error}. Retry {attempt} in {delay:?}",
                        slot.resource
                    );

                    slot.status = SlotStatus::Pending {
                        handle: None,
                        attempt,
                    };
                    let map = Arc::downgrade(self);
                    self.source.run_loop().post_after(delay, move || {
                        if let Some(map) = map.upgrade() {
                            map.retry(generation, key, attempt);
                        }
                    });
                }
                Some(error) => {
                    log::warn!("Failed to load {}: {error}", slot.resource);
                    let reason = FailureReason::Load(error.clone());
                    slot.status = SlotStatus::Failed(reason.clone());
                    if key == RequestKey::Style {
                        state.style = StyleStatus::Failed(reason);
                        state.phase = MapPhase::Ready;
                    }
                }
            }
        }

        if let Some(messenger) = &self.options.messenger {
            messenger.request_redraw();
        }
    }

    fn retry(self: &Arc<Self>, generation: u64, key: RequestKey, attempt: u32) {
        let mut state = self.state.lock();
        if state.is_stale(generation) {
            return;
        }

        let resource = match state.slots.get(&key) {
            Some(Slot {
                resource,
                status:
                    SlotStatus::Pending {
                        handle: None,
                        attempt: scheduled,
                    },
            }) if *scheduled == attempt => resource.clone(),
            _ => return,
        };

        self.request(&mut state, key, resource, attempt);
    }

    fn apply_style_response(self: &Arc<Self>, state: &mut MapState, response: &Response) {
        let data = response.bytes().map(|bytes| bytes.as_ref()).unwrap_or_default();
        self.apply_style(state, data);
    }

    fn apply_style(self: &Arc<Self>, state: &mut MapState, data: &[u8]) {
        state.phase = MapPhase::Ready;

        let document = match StyleDocument::from_json(data) {
            Ok(document) => Arc::new(document),
            Err(err) => {
                log::warn!("Failed to parse style: {err}");
                state.style = StyleStatus::Failed(parse_reason(err));
                return;
            }
        };

        log::debug!(
            "Style {:?} loaded with {} sources",
            document.name,
            document.sources.len()
        );
        state.style = StyleStatus::Loaded(document.clone());

        for (name, source) in &document.sources {
            if !source.source_type.is_tiled() {
                log::debug!("Source {name} does not consist of tiles, skipping");
                continue;
            }

            if let Some(url) = &source.url {
                let source_state = SourceState {
                    tile_size: source.tile_size,
                    ..SourceState::default()
                };
                state.sources.insert(name.clone(), source_state);
                self.request(
                    state,
                    RequestKey::Source(name.clone()),
                    Resource::source(url),
                    0,
                );
                continue;
            }

            match source.inline_tileset() {
                Some(Ok(tileset)) => self.set_tileset(state, name, tileset),
                Some(Err(err)) => log::warn!("Source {name} has invalid tiles: {err}"),
                None => log::warn!("Source {name} has neither url nor tiles"),
            }
        }

        let pixel_ratio = self.options.pixel_ratio;
        if let Some(base) = document.sprite_url() {
            self.request(
                state,
                RequestKey::SpriteJson,
                Resource::sprite_json(base, pixel_ratio),
                0,
            );
            self.request(
                state,
                RequestKey::SpriteImage,
                Resource::sprite_image(base, pixel_ratio),
                0,
            );
        }

        if let Some(template) = &document.glyphs {
            for font_stack in document.font_stacks() {
                match Resource::glyphs(template, &font_stack, GlyphRange::containing(0)) {
                    Ok(resource) => {
                        self.request(state, RequestKey::Glyphs(font_stack), resource, 0)
                    }
                    Err(err) => log::warn!("Cannot request glyphs of {font_stack}: {err}"),
                }
            }
        }
    }

    fn apply_tileset_response(
        self: &Arc<Self>,
        state: &mut MapState,
        name: &str,
        response: &Response,
    ) {
        let data = response.bytes().map(|bytes| bytes.as_ref()).unwrap_or_default();
        match Tileset::from_json(data) {
            Ok(tileset) => self.set_tileset(state, name, tileset),
            Err(err) => {
                log::warn!("Source {name} has invalid metadata: {err}");
                if let Some(slot) = state.slots.get_mut(&RequestKey::Source(name.to_string())) {
                    slot.status = SlotStatus::Failed(parse_reason(err));
                }
            }
        }
    }

    fn set_tileset(self: &Arc<Self>, state: &mut MapState, name: &str, mut tileset: Tileset) {
        let source = state.sources.entry(name.to_string()).or_default();
        if let Some(tile_size) = source.tile_size.filter(|size| *size > 0) {
            tileset.tile_size = tile_size;
        }
        source.tileset = Some(tileset);
        self.update_tiles(state, name);
    }

    /// Requests the tiles of the source covering the current view and cancels the rest.
    fn update_tiles(self: &Arc<Self>, state: &mut MapState, name: &str) {
        let Some(source) = state.sources.get_mut(name) else {
            return;
        };
        let Some(tileset) = &source.tileset else {
            return;
        };

        let cover = tileset.tile_cover(&state.view);
        let resources: Vec<_> = cover
            .iter()
            .map(|id| (*id, Resource::tile(tileset, *id, self.options.pixel_ratio)))
            .collect();
        let covered: HashSet<TileId> = cover.iter().copied().collect();
        source.cover = cover;

        let before = state.slots.len();
        state.slots.retain(|key, _| match key {
            RequestKey::Tile(source, id) if source == name => covered.contains(id),
            _ => true,
        });
        let dropped = before - state.slots.len();
        if dropped > 0 {
            log::debug!("Released {dropped} tiles of {name} outside of the view");
        }

        for (id, resource) in resources {
            let key = RequestKey::Tile(name.to_string(), id);
            if state.slots.contains_key(&key) {
                continue;
            }

            match resource {
                Ok(resource) => self.request(state, key, resource, 0),
                Err(err) => log::warn!("Cannot request tile {id:?} of {name}: {err}"),
            }
        }
    }
}

/// Map instance.
///
/// The map loads the style it is given, and then all the resources the style refers to: source
/// metadata, tiles covering the current view, the sprite sheet and glyphs. Resources are loaded
/// through the loader given at construction, with responses delivered on the thread of the
/// [`RunLoop`] the map is bound to.
///
/// Dropping the map cancels all its outstanding requests and releases its cache.
pub struct Map {
    shared: Arc<MapShared>,
}

impl std::fmt::Debug for Map {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Map")
            .field("phase", &state.phase)
            .field("style_url", &state.style_url)
            .field("view", &state.view)
            .field("outstanding_requests", &state.pending_count())
            .finish()
    }
}

impl Map {
    /// Creates a new map bound to the run loop. Use [`MapBuilder`] for a more convenient way
    /// to set the options.
    pub fn new(
        run_loop: &RunLoop,
        loader: Arc<dyn ResourceLoader>,
        options: MapOptions,
    ) -> Result<Self, CartographError> {
        options.validate()?;

        let cache = ResponseCache::with_shared_policy(options.cache, options.revalidation.clone());
        let source = ResourceSource::new(loader, cache, run_loop.handle());
        let state = Mutex::new(MapState::new(options.view));

        Ok(Self {
            shared: Arc::new(MapShared {
                source,
                options,
                state,
            }),
        })
    }

    /// Loads the style document from the url and replaces the current style with it.
    ///
    /// All requests of the previous style are canceled. Their callbacks never run.
    pub fn set_style_url(&self, url: impl Into<String>) {
        let url = url.into();
        let mut state = self.shared.state.lock();
        state.reset();

        log::info!("Loading style {url}");
        state.style_url = Some(url.clone());
        state.style = StyleStatus::Loading;
        state.phase = MapPhase::StyleLoading;
        self.shared
            .request(&mut state, RequestKey::Style, Resource::style(url), 0);
    }

    /// Replaces the current style with the given style document.
    ///
    /// If the document cannot be parsed, the map stays usable and [`Map::render_still`] reports
    /// the problem.
    pub fn set_style_json(&self, json: &str) {
        let mut state = self.shared.state.lock();
        state.reset();
        state.style_url = None;
        self.shared.apply_style(&mut state, json.as_bytes());
    }

    /// Changes the view, requesting the newly visible tiles and canceling the ones that are not
    /// visible anymore.
    pub fn set_view(&self, view: MapView) {
        let mut state = self.shared.state.lock();
        state.view = view;

        let sources: Vec<String> = state.sources.keys().cloned().collect();
        for name in sources {
            self.shared.update_tiles(&mut state, &name);
        }
    }

    /// Changes the zoom level of the view.
    pub fn set_zoom(&self, zoom: f64) {
        self.set_view(self.view().with_zoom(zoom));
    }

    /// Changes the center of the view.
    pub fn set_center(&self, latitude: f64, longitude: f64) {
        self.set_view(self.view().with_center(latitude, longitude));
    }

    /// Changes the size of the view in pixels.
    pub fn set_size(&self, width: f64, height: f64) {
        self.set_view(self.view().with_size(width, height));
    }

    /// Current view.
    pub fn view(&self) -> MapView {
        self.shared.state.lock().view
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> MapPhase {
        self.shared.state.lock().phase
    }

    /// Url of the current style, if it was set by url.
    pub fn style_url(&self) -> Option<String> {
        self.shared.state.lock().style_url.clone()
    }

    /// Current style document, if it is loaded.
    pub fn style(&self) -> Option<Arc<StyleDocument>> {
        match &self.shared.state.lock().style {
            StyleStatus::Loaded(document) => Some(document.clone()),
            _ => None,
        }
    }

    /// Render mode of the map.
    pub fn mode(&self) -> MapMode {
        self.shared.options.mode
    }

    /// Pixel ratio of the map.
    pub fn pixel_ratio(&self) -> f32 {
        self.shared.options.pixel_ratio
    }

    /// Number of requests that are not completed yet, including the ones waiting for a retry.
    pub fn outstanding_requests(&self) -> usize {
        self.shared.state.lock().pending_count()
    }

    /// Returns true if the style is resolved and no requests are outstanding.
    pub fn is_fully_loaded(&self) -> bool {
        self.shared.state.lock().is_settled()
    }

    /// Counters of the map cache.
    pub fn cache_stats(&self) -> CacheStats {
        self.shared.source.cache().stats()
    }

    /// Releases the responses stored in the map cache. Resources used by the current frame stay
    /// alive as long as the map holds them.
    pub fn clear_cache(&self) {
        self.shared.source.cache().clear();
    }

    /// Resources loaded so far for the current style and view.
    ///
    /// In continuous mode this is what the application draws every time it is asked to redraw.
    pub fn frame(&self) -> Result<StillFrame, CartographError> {
        self.shared.state.lock().frame()
    }

    /// Waits until all resources of the current style and view are loaded or failed, and returns
    /// them.
    ///
    /// The run loop is driven while waiting, so this must be called on the thread of the loop
    /// the map is bound to. Fails if the map is not in still mode, no style was set, the style
    /// could not be loaded, or the run loop was stopped before everything was loaded.
    pub fn render_still(&self, run_loop: &RunLoop) -> Result<StillFrame, CartographError> {
        if self.shared.options.mode != MapMode::Still {
            return Err(CartographError::Configuration(
                "still rendering requires a map in still mode".into(),
            ));
        }

        if run_loop.id() != self.shared.source.run_loop().id() {
            return Err(CartographError::Configuration(
                "map is bound to a different run loop".into(),
            ));
        }

        if self.phase() == MapPhase::Idle {
            return Err(CartographError::NoStyle);
        }

        let shared = &self.shared;
        if !run_loop.run_until(|| shared.state.lock().is_settled()) {
            return Err(CartographError::Interrupted);
        }

        self.frame()
    }
}

impl Drop for Map {
    fn drop(&mut self) {
        let slots = {
            let mut state = self.shared.state.lock();
            state.phase = MapPhase::Destroying;
            state.generation += 1;
            state.sources.clear();
            state.style = StyleStatus::None;
            std::mem::take(&mut state.slots)
        };

        let canceled = slots.values().filter(|slot| slot.is_pending()).count();
        drop(slots);
        self.shared.source.cache().clear();

        self.shared.state.lock().phase = MapPhase::Destroyed;
        log::debug!("Map destroyed, {canceled} outstanding requests canceled");
    }
}
