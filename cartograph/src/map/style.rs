//! Parts of a style document that determine which resources a map loads.
//!
//! Paint and layout properties are not interpreted, except for the font stacks of text layers.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::Value;

use crate::error::CartographError;
use crate::resource::ResourceKind;
use crate::tileset::{Tileset, DEFAULT_MAX_ZOOM, DEFAULT_TILE_SIZE};

/// Font stack used by text layers that do not set `text-font`.
pub const DEFAULT_FONT_STACK: &str = "Open Sans Regular,Arial Unicode MS Regular";

/// Parsed style document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StyleDocument {
    /// Name of the style.
    #[serde(default)]
    pub name: Option<String>,
    /// Data sources by their ids.
    #[serde(default)]
    pub sources: BTreeMap<String, StyleSource>,
    /// Sprite sheet.
    #[serde(default)]
    pub sprite: Option<Sprite>,
    /// Url template of glyph ranges.
    #[serde(default)]
    pub glyphs: Option<String>,
    /// Layers in the order of drawing.
    #[serde(default)]
    pub layers: Vec<StyleLayer>,
}

/// Data source declared by a style.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StyleSource {
    /// Type of the source.
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// Url of the TileJSON document of the source.
    #[serde(default)]
    pub url: Option<String>,
    /// Inline tile url templates.
    #[serde(default)]
    pub tiles: Option<Vec<String>>,
    /// Inline minimum zoom level.
    #[serde(default, rename = "minzoom")]
    pub min_zoom: Option<u8>,
    /// Inline maximum zoom level.
    #[serde(default, rename = "maxzoom")]
    pub max_zoom: Option<u8>,
    /// Inline attribution.
    #[serde(default)]
    pub attribution: Option<String>,
    /// Inline tile size.
    #[serde(default, rename = "tileSize")]
    pub tile_size: Option<u16>,
}

/// Type of a style source.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    /// Vector tiles.
    Vector,
    /// Raster tiles.
    Raster,
    /// Raster elevation tiles.
    RasterDem,
    /// Any other source type (GeoJSON, image, video). Such sources do not load tiles.
    #[serde(other)]
    Unknown,
}

impl SourceType {
    /// Returns true for sources that consist of tiles.
    pub fn is_tiled(&self) -> bool {
        !matches!(self, SourceType::Unknown)
    }
}

impl StyleSource {
    /// Tileset defined by the inline `tiles` of the source, if the source has them.
    pub fn inline_tileset(&self) -> Option<Result<Tileset, CartographError>> {
        let tiles = self.tiles.as_ref()?;

        let tileset = Tileset {
            tiles: tiles.clone(),
            min_zoom: self.min_zoom.unwrap_or(0),
            max_zoom: self.max_zoom.unwrap_or(DEFAULT_MAX_ZOOM),
            attribution: self.attribution.clone().unwrap_or_default(),
            tile_size: self.tile_size.unwrap_or(DEFAULT_TILE_SIZE),
        };

        Some(tileset.validate().map(|_| tileset))
    }
}

/// Sprite sheet of a style.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Sprite {
    /// Base url of a single sprite sheet.
    Url(String),
    /// Several named sprite sheets.
    Sheets(Vec<SpriteSheet>),
}

/// Named sprite sheet.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpriteSheet {
    /// Id of the sheet.
    pub id: String,
    /// Base url of the sheet.
    pub url: String,
}

impl Sprite {
    /// Base url of the sheet the map loads. With several sheets this is the one with the
    /// `default` id, or the first one.
    pub fn url(&self) -> Option<&str> {
        match self {
            Sprite::Url(url) => Some(url),
            Sprite::Sheets(sheets) => sheets
                .iter()
                .find(|sheet| sheet.id == "default")
                .or_else(|| sheets.first())
                .map(|sheet| sheet.url.as_str()),
        }
    }
}

/// Layer of a style.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StyleLayer {
    /// Id of the layer.
    pub id: String,
    /// Type of the layer.
    #[serde(rename = "type")]
    pub layer_type: String,
    /// Id of the source the layer draws.
    #[serde(default)]
    pub source: Option<String>,
    /// Layout properties.
    #[serde(default)]
    pub layout: serde_json::Map<String, Value>,
}

impl StyleLayer {
    /// Font stack of the text of the layer, if the layer draws text.
    ///
    /// Only literal font lists are supported. Expressions are ignored.
    pub fn font_stack(&self) -> Option<String> {
        if self.layer_type != "symbol" {
            return None;
        }

        match self.layout.get("text-font") {
            Some(Value::Array(fonts)) => {
                let fonts: Option<Vec<&str>> = fonts.iter().map(Value::as_str).collect();
                fonts
                    .filter(|fonts| !fonts.is_empty())
                    .map(|fonts| fonts.join(","))
            }
            Some(_) => None,
            None => self
                .layout
                .contains_key("text-field")
                .then(|| DEFAULT_FONT_STACK.to_string()),
        }
    }
}

impl StyleDocument {
    /// Parses a style document.
    pub fn from_json(data: &[u8]) -> Result<Self, CartographError> {
        serde_json::from_slice(data).map_err(|err| CartographError::Parse {
            kind: ResourceKind::Style,
            message: err.to_string(),
        })
    }

    /// All distinct font stacks used by the layers.
    pub fn font_stacks(&self) -> BTreeSet<String> {
        self.layers
            .iter()
            .filter_map(StyleLayer::font_stack)
            .collect()
    }

    /// Base url of the sprite sheet.
    pub fn sprite_url(&self) -> Option<&str> {
        self.sprite.as_ref().and_then(Sprite::url)
    }
}
