use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use cartograph::cache::{CacheOptions, ResponseCache, StaleWhileRevalidate};
use cartograph::error::CartographError;
use cartograph::map::{MapBuilder, DEFAULT_FONT_STACK};
use cartograph::resource::{Resource, ResourceKind, Response};
use cartograph::source::{
    AssetLoader, ResourceLoader, ResourceSource, RouterOptions, SchemeRouter, StubLoader,
};
use cartograph::tileset::{TileId, Tileset};
use cartograph::{MapView, RunLoop};
use parking_lot::Mutex;
use web_time::{Duration, SystemTime};

mod common;

use common::{fixture_loader, fixtures_dir, init_logger, TILE_SIZE};

const STREETS: &str = "mapbox://styles/mapbox/streets-v11";
const SATELLITE: &str = "mapbox://styles/mapbox/satellite-v9";

fn tile_resource(index: u32) -> Resource {
    Resource::new(
        ResourceKind::Tile,
        format!("https://tiles.example.com/14/{index}/0.pbf"),
    )
}

fn source_with(
    loader: Arc<dyn ResourceLoader>,
    cache: ResponseCache,
    run_loop: &RunLoop,
) -> ResourceSource {
    ResourceSource::new(loader, cache, run_loop.handle())
}

#[test]
fn tileset_resolution() {
    let tileset = Tileset::new(vec!["https://a/{z}/{x}/{y}.pbf".into()], 0, 14)
        .expect("tileset is valid");

    assert_matches!(
        tileset.resolve(15, 3, 5),
        Err(CartographError::OutOfRange { .. })
    );
    for _ in 0..3 {
        assert_eq!(tileset.resolve(14, 3, 5).as_deref().ok(), Some("https://a/14/3/5.pbf"));
    }
}

#[test]
fn concurrent_requests_share_one_fetch() {
    init_logger();
    let run_loop = RunLoop::new();
    let loader = Arc::new(fixture_loader().with_delay(Duration::from_millis(20)));
    let source = source_with(loader.clone(), ResponseCache::default(), &run_loop);

    let received = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let received = received.clone();
            source.request(tile_resource(1), move |response| {
                received.lock().push(response)
            })
        })
        .collect();

    assert!(run_loop.run_until(|| received.lock().len() == 2));
    assert_eq!(loader.load_count(), 1);

    let received = received.lock();
    assert!(Arc::ptr_eq(&received[0], &received[1]));
    assert_eq!(received[0].payload_size(), TILE_SIZE);
    assert!(handles.iter().all(|handle| !handle.is_pending()));
}

#[test]
fn canceled_request_never_calls_back() {
    init_logger();
    let run_loop = RunLoop::new();
    let loader = Arc::new(fixture_loader().with_delay(Duration::from_millis(10)));
    let source = source_with(loader, ResponseCache::default(), &run_loop);

    let called = Arc::new(AtomicBool::new(false));
    let handle = source.request(tile_resource(1), {
        let called = called.clone();
        move |_| called.store(true, Ordering::SeqCst)
    });
    handle.cancel();
    assert!(!handle.is_pending());
    assert!(!source.cache().is_in_flight(&tile_resource(1)));

    let control_done = Arc::new(AtomicBool::new(false));
    let _control = source.request(tile_resource(2), {
        let control_done = control_done.clone();
        move |_| control_done.store(true, Ordering::SeqCst)
    });
    assert!(run_loop.run_until(|| control_done.load(Ordering::SeqCst)));

    std::thread::sleep(Duration::from_millis(50));
    run_loop.run_once();
    assert!(!called.load(Ordering::SeqCst));
}

#[test]
fn same_url_of_different_kinds_is_loaded_separately() {
    init_logger();
    let run_loop = RunLoop::new();
    let loader = Arc::new(fixture_loader());
    let source = source_with(loader.clone(), ResponseCache::default(), &run_loop);

    let url = "https://example.com/data.json";
    let delivered = Arc::new(AtomicUsize::new(0));
    let _handles: Vec<_> = [Resource::style(url), Resource::source(url)]
        .into_iter()
        .map(|resource| {
            let delivered = delivered.clone();
            source.request(resource, move |_| {
                delivered.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    assert!(run_loop.run_until(|| delivered.load(Ordering::SeqCst) == 2));
    assert_eq!(loader.load_count(), 2);
    assert_eq!(source.cache().stats().entries, 2);
    assert_ne!(
        source.cache().get(&Resource::style(url)).and_then(|r| r.bytes().cloned()),
        source.cache().get(&Resource::source(url)).and_then(|r| r.bytes().cloned()),
    );
}

#[test]
fn cache_stays_within_capacity() {
    init_logger();
    let run_loop = RunLoop::new();
    let capacity = 4 * TILE_SIZE as u64;
    let cache = ResponseCache::new(CacheOptions::default().with_max_bytes(capacity));
    let source = source_with(Arc::new(fixture_loader()), cache, &run_loop);

    for index in 0..20 {
        let done = Arc::new(AtomicBool::new(false));
        let _handle = source.request(tile_resource(index), {
            let done = done.clone();
            move |_| done.store(true, Ordering::SeqCst)
        });
        assert!(run_loop.run_until(|| done.load(Ordering::SeqCst)));
    }

    let stats = source.cache().stats();
    assert!(stats.weight <= capacity, "{stats:?}");
    assert!(stats.entries < 20, "{stats:?}");
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.fetches, 20);
}

#[derive(Default)]
struct EtagLoader {
    loads: AtomicUsize,
    conditional: AtomicUsize,
}

#[async_trait]
impl ResourceLoader for EtagLoader {
    async fn load(&self, _resource: &Resource, prior: Option<&Response>) -> Response {
        self.loads.fetch_add(1, Ordering::SeqCst);
        match prior.and_then(|prior| prior.etag()) {
            Some("\"v1\"") => {
                self.conditional.fetch_add(1, Ordering::SeqCst);
                Response::not_modified().with_expires(SystemTime::now() + Duration::from_secs(3600))
            }
            _ => Response::data(&b"payload"[..])
                .with_etag("\"v1\"")
                .with_expires(SystemTime::now() - Duration::from_secs(1)),
        }
    }
}

fn load_once(source: &ResourceSource, run_loop: &RunLoop, resource: &Resource) -> Arc<Response> {
    let received = Arc::new(Mutex::new(None));
    let _handle = source.request(resource.clone(), {
        let received = received.clone();
        move |response| *received.lock() = Some(response)
    });
    assert!(run_loop.run_until(|| received.lock().is_some()));

    let response = received.lock().take();
    response.expect("response is delivered")
}

#[test]
fn expired_response_is_revalidated_with_etag() {
    init_logger();
    let run_loop = RunLoop::new();
    let loader = Arc::new(EtagLoader::default());
    let source = source_with(loader.clone(), ResponseCache::default(), &run_loop);
    let resource = tile_resource(1);

    let first = load_once(&source, &run_loop, &resource);
    assert_eq!(first.bytes().map(|b| b.as_ref()), Some(&b"payload"[..]));

    let revalidated = load_once(&source, &run_loop, &resource);
    assert_eq!(revalidated.bytes().map(|b| b.as_ref()), Some(&b"payload"[..]));
    assert!(!revalidated.is_not_modified());
    assert!(!revalidated.is_expired(SystemTime::now()));
    assert_eq!(loader.conditional.load(Ordering::SeqCst), 1);

    let cached = load_once(&source, &run_loop, &resource);
    assert!(Arc::ptr_eq(&revalidated, &cached));
    assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
}

#[derive(Default)]
struct LastModifiedLoader {
    conditional: AtomicUsize,
}

impl LastModifiedLoader {
    fn modified() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(784_111_777)
    }
}

#[async_trait]
impl ResourceLoader for LastModifiedLoader {
    async fn load(&self, _resource: &Resource, prior: Option<&Response>) -> Response {
        if prior.and_then(Response::modified) == Some(Self::modified()) {
            self.conditional.fetch_add(1, Ordering::SeqCst);
            return Response::not_modified()
                .with_expires(SystemTime::now() + Duration::from_secs(3600));
        }

        Response::data(&b"payload"[..])
            .with_modified(Self::modified())
            .with_expires(SystemTime::now() - Duration::from_secs(1))
    }
}

#[test]
fn expired_response_is_revalidated_with_modification_time() {
    init_logger();
    let run_loop = RunLoop::new();
    let loader = Arc::new(LastModifiedLoader::default());
    let source = source_with(loader.clone(), ResponseCache::default(), &run_loop);
    let resource = tile_resource(2);

    let first = load_once(&source, &run_loop, &resource);
    assert_eq!(first.etag(), None);

    let revalidated = load_once(&source, &run_loop, &resource);
    assert_eq!(revalidated.bytes().map(|b| b.as_ref()), Some(&b"payload"[..]));
    assert_eq!(revalidated.modified(), Some(LastModifiedLoader::modified()));
    assert!(!revalidated.is_expired(SystemTime::now()));
    assert_eq!(loader.conditional.load(Ordering::SeqCst), 1);
}

#[test]
fn stale_response_is_served_while_revalidating() {
    init_logger();
    let run_loop = RunLoop::new();
    let version = Arc::new(AtomicUsize::new(0));
    let loader = Arc::new(StubLoader::new().with_tile_response({
        let version = version.clone();
        move |_| match version.fetch_add(1, Ordering::SeqCst) {
            0 => Response::data(&b"v1"[..]).with_expires(SystemTime::now() - Duration::from_secs(1)),
            _ => Response::data(&b"v2"[..]),
        }
    }));
    let cache = ResponseCache::with_policy(CacheOptions::default(), StaleWhileRevalidate::new());
    let source = source_with(loader.clone(), cache, &run_loop);
    let resource = tile_resource(1);

    let first = load_once(&source, &run_loop, &resource);
    assert_eq!(first.bytes().map(|b| b.as_ref()), Some(&b"v1"[..]));

    let stale = load_once(&source, &run_loop, &resource);
    assert!(Arc::ptr_eq(&first, &stale));

    let cache = source.cache();
    assert!(run_loop.run_until(|| {
        cache
            .get(&resource)
            .is_some_and(|response| response.bytes().map(|b| b.as_ref()) == Some(&b"v2"[..]))
    }));
    assert_eq!(loader.load_count(), 2);
}

#[test]
fn restyle_discards_previous_style_resources() {
    init_logger();
    let run_loop = RunLoop::new();
    let loader = Arc::new(fixture_loader().with_delay(Duration::from_millis(30)));
    let map = MapBuilder::new(loader.clone())
        .with_view(MapView::new(55.75, 37.62, 16.0))
        .build(&run_loop)
        .expect("options are valid");

    map.set_style_url(SATELLITE);
    assert!(run_loop.run_until(|| loader.load_count_of(ResourceKind::Tile) > 0));
    assert!(map.outstanding_requests() > 0);

    map.set_style_url(STREETS);
    let frame = map.render_still(&run_loop).expect("streets style loads");

    assert!(!frame.tiles.is_empty());
    assert!(frame.tiles.iter().all(|tile| tile.source == "composite"));
    assert!(frame
        .tiles
        .iter()
        .all(|tile| !tile.response.bytes().is_some_and(|b| b[0] == 0xAA)));
    assert!(frame.failures.is_empty(), "{:?}", frame.failures);
    assert_eq!(frame.attributions, vec!["© Mapbox © OpenStreetMap".to_string()]);
    assert_eq!(
        frame.glyphs.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["DIN Offc Pro Medium,Arial Unicode MS Regular", DEFAULT_FONT_STACK]
    );
    assert!(frame.sprite_json.is_some());
    assert!(frame.sprite_image.is_some());
    assert_eq!(map.style_url().as_deref(), Some(STREETS));
}

#[test]
fn raster_style_tiles_follow_tile_size() {
    init_logger();
    let run_loop = RunLoop::new();
    let map = MapBuilder::new(Arc::new(fixture_loader()))
        .with_view(MapView::new(55.75, 37.62, 16.0))
        .build(&run_loop)
        .expect("options are valid");

    map.set_style_url(SATELLITE);
    let frame = map.render_still(&run_loop).expect("satellite style loads");

    assert!(!frame.tiles.is_empty());
    assert!(frame
        .source_tiles("satellite")
        .all(|tile| tile.id.z == 17 && tile.response.payload_size() == TILE_SIZE));
    assert!(frame.glyphs.is_empty());
}

#[test]
fn mapbox_urls_are_normalized_by_router() {
    init_logger();
    let run_loop = RunLoop::new();
    let network = Arc::new(fixture_loader());
    let router = SchemeRouter::with_loaders(
        network.clone(),
        Arc::new(StubLoader::new()),
        RouterOptions::default().with_access_token("pk.test"),
    );
    let map = MapBuilder::new(Arc::new(router))
        .with_view(MapView::new(55.75, 37.62, 16.0))
        .build(&run_loop)
        .expect("options are valid");

    map.set_style_url(STREETS);
    let frame = map.render_still(&run_loop).expect("style loads");
    assert!(frame.failures.is_empty(), "{:?}", frame.failures);

    let requests = network.requests();
    assert_eq!(
        requests[0],
        Resource::style("https://api.mapbox.com/styles/v1/mapbox/streets-v11?access_token=pk.test")
    );
    assert!(requests.contains(&Resource::source(
        "https://api.mapbox.com/v4/mapbox.mapbox-streets-v8.json?secure&access_token=pk.test"
    )));
    assert!(requests.contains(&Resource::new(
        ResourceKind::SpriteJson,
        "https://api.mapbox.com/styles/v1/mapbox/streets-v11/sprite.json?access_token=pk.test"
    )));
    assert!(requests
        .iter()
        .filter(|resource| resource.kind != ResourceKind::Tile)
        .all(|resource| resource.url.ends_with("access_token=pk.test")));
    assert!(requests
        .iter()
        .filter(|resource| resource.kind == ResourceKind::Tile)
        .all(|resource| resource.url.starts_with("https://")
            && resource.url.contains(".tiles.mapbox.com/")));
}

#[test]
fn style_is_loaded_from_assets() {
    init_logger();
    let run_loop = RunLoop::new();
    let network = Arc::new(fixture_loader());
    let router = SchemeRouter::with_loaders(
        network.clone(),
        Arc::new(AssetLoader::new(fixtures_dir())),
        RouterOptions::default().with_access_token("pk.test"),
    );
    let map = MapBuilder::new(Arc::new(router))
        .with_view(MapView::new(55.75, 37.62, 16.0))
        .build(&run_loop)
        .expect("options are valid");

    map.set_style_url("asset://style_raster.json");
    let frame = map.render_still(&run_loop).expect("style loads");

    assert_eq!(
        map.style().and_then(|style| style.name.clone()).as_deref(),
        Some("Satellite")
    );
    assert!(!frame.tiles.is_empty());
    assert_eq!(network.load_count_of(ResourceKind::Style), 0);
}

#[test]
fn missing_style_asset_is_reported() {
    init_logger();
    let run_loop = RunLoop::new();
    let router = SchemeRouter::with_loaders(
        Arc::new(StubLoader::new()),
        Arc::new(AssetLoader::new(fixtures_dir())),
        RouterOptions::default(),
    );
    let map = MapBuilder::new(Arc::new(router))
        .build(&run_loop)
        .expect("options are valid");

    map.set_style_url("asset://missing.json");
    assert_matches!(
        map.render_still(&run_loop),
        Err(CartographError::Response {
            kind: ResourceKind::Style,
            ..
        })
    );

    // Without an access token the mapbox urls of the style cannot be loaded, but the frame is
    // still produced.
    map.set_style_url("asset://style_vector.json");
    let frame = map.render_still(&run_loop).expect("style loads");
    assert!(frame.tiles.is_empty());
    assert!(frame
        .failures
        .iter()
        .any(|failure| failure.resource.kind == ResourceKind::Source));
}

#[test]
fn low_zoom_view_is_covered_by_four_tiles() {
    let tileset = Tileset::new(vec!["https://a/{z}/{x}/{y}.pbf".into()], 0, 14)
        .expect("tileset is valid");
    let view = MapView::new(0.0, 0.0, 1.0);

    let cover = tileset.tile_cover(&view);
    assert_eq!(cover.len(), 4);
    assert!(cover.contains(&TileId::new(1, 0, 0)));
    assert!(cover.contains(&TileId::new(1, 1, 1)));
}
