#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use cartograph::resource::{Resource, Response};
use cartograph::source::StubLoader;

pub const TILE_SIZE: usize = 512 * 1024;
pub const GLYPHS_SIZE: usize = 64 * 1024;
pub const SPRITE_IMAGE_SIZE: usize = 128 * 1024;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/resources")
}

pub fn fixture(name: &str) -> Bytes {
    let path = fixtures_dir().join(name);
    std::fs::read(&path)
        .unwrap_or_else(|err| panic!("cannot read fixture {}: {err}", path.display()))
        .into()
}

/// Fixture flavour of the resource: satellite resources are raster, everything else is vector.
pub fn flavour(resource: &Resource) -> &'static str {
    if resource.url.contains("satellite") {
        "raster"
    } else {
        "vector"
    }
}

/// Payload that is allocated anew for every response, so that every map holds its own copy.
pub fn fresh_payload(size: usize, fill: u8) -> Response {
    Response::data(vec![fill; size])
}

/// Loader serving the fixture styles and sources, with generated tiles, glyphs and sprites.
pub fn fixture_loader() -> StubLoader {
    let style_vector = fixture("style_vector.json");
    let style_raster = fixture("style_raster.json");
    let source_vector = fixture("source_vector.json");
    let source_raster = fixture("source_raster.json");
    let sprite = fixture("sprite.json");

    StubLoader::new()
        .with_style_response(move |resource| match flavour(resource) {
            "raster" => Response::data(style_raster.clone()),
            _ => Response::data(style_vector.clone()),
        })
        .with_source_response(move |resource| match flavour(resource) {
            "raster" => Response::data(source_raster.clone()),
            _ => Response::data(source_vector.clone()),
        })
        .with_tile_response(|resource| match flavour(resource) {
            "raster" => fresh_payload(TILE_SIZE, 0xAA),
            _ => fresh_payload(TILE_SIZE, 0x55),
        })
        .with_glyphs_response(|_| fresh_payload(GLYPHS_SIZE, 1))
        .with_sprite_json_response(move |_| Response::data(sprite.clone()))
        .with_sprite_image_response(|_| fresh_payload(SPRITE_IMAGE_SIZE, 2))
}

pub fn shared_fixture_loader() -> Arc<StubLoader> {
    Arc::new(fixture_loader())
}
