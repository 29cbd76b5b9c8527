use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::resource::{Resource, Response, ResponseError};
use crate::tileset::TileId;

/// Loaded tile of a source.
#[derive(Debug, Clone)]
pub struct TileData {
    /// Id of the style source the tile belongs to.
    pub source: String,
    /// Index of the tile.
    pub id: TileId,
    /// Loaded tile.
    pub response: Arc<Response>,
}

/// Reason a resource is missing from a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    /// The resource could not be loaded.
    #[error(transparent)]
    Load(#[from] ResponseError),
    /// The resource was loaded, but its content is malformed.
    #[error("malformed content: {0}")]
    Parse(String),
}

/// Resource that a frame needs but does not have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFailure {
    /// The failed resource.
    pub resource: Resource,
    /// Why it failed.
    pub reason: FailureReason,
}

/// Complete set of resolved resources for one frame of a map.
///
/// This is what a renderer consumes to draw the map. Failed resources are listed in
/// [`StillFrame::failures`], they never make the whole frame fail.
#[derive(Debug, Clone, Default)]
pub struct StillFrame {
    /// Tiles of all sources, ordered by source id and then by the distance from the view center.
    pub tiles: Vec<TileData>,
    /// Sprite sheet metadata.
    pub sprite_json: Option<Arc<Response>>,
    /// Sprite sheet image.
    pub sprite_image: Option<Arc<Response>>,
    /// Glyph ranges by font stack.
    pub glyphs: BTreeMap<String, Arc<Response>>,
    /// Resources that could not be loaded or parsed.
    pub failures: Vec<ResourceFailure>,
    /// Attributions of the sources.
    pub attributions: Vec<String>,
}

impl StillFrame {
    /// Total size of the payloads in the frame.
    pub fn payload_size(&self) -> usize {
        let tiles: usize = self
            .tiles
            .iter()
            .map(|tile| tile.response.payload_size())
            .sum();
        let glyphs: usize = self.glyphs.values().map(|g| g.payload_size()).sum();
        let sprite = [&self.sprite_json, &self.sprite_image]
            .into_iter()
            .flatten()
            .map(|response| response.payload_size())
            .sum::<usize>();

        tiles + glyphs + sprite
    }

    /// Tiles of the source with the given id.
    pub fn source_tiles<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a TileData> + 'a {
        self.tiles.iter().filter(move |tile| tile.source == source)
    }
}
