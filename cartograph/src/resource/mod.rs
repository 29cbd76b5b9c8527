//! [`Resource`] identifies a piece of data a map needs, [`Response`] is the result of loading it.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use url::Url;

use crate::error::CartographError;
use crate::tileset::{TileId, Tileset};

mod response;

pub use response::{Response, ResponseError};

/// Number of glyphs in a single glyph range request.
pub const GLYPHS_PER_RANGE: u32 = 256;

/// Type of the data a [`Resource`] points to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    /// Style document.
    Style,
    /// Source metadata (TileJSON).
    Source,
    /// Raster or vector tile.
    Tile,
    /// Range of glyphs of a font stack.
    Glyphs,
    /// Sprite sheet metadata.
    SpriteJson,
    /// Sprite sheet image.
    SpriteImage,
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceKind::Style => "style",
            ResourceKind::Source => "source",
            ResourceKind::Tile => "tile",
            ResourceKind::Glyphs => "glyphs",
            ResourceKind::SpriteJson => "sprite JSON",
            ResourceKind::SpriteImage => "sprite image",
        };

        f.write_str(name)
    }
}

/// Typed, URL-identified thing a map needs to load.
///
/// Two resources are the same (for caching and deduplication) if both their kind and url are
/// equal. The same url requested as different kinds results in different cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    /// Kind of the resource.
    pub kind: ResourceKind,
    /// Url to load the resource from.
    pub url: String,
}

impl Resource {
    /// Creates a new resource.
    pub fn new(kind: ResourceKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
        }
    }

    /// Style document resource.
    pub fn style(url: impl Into<String>) -> Self {
        Self::new(ResourceKind::Style, url)
    }

    /// Source metadata (TileJSON) resource.
    pub fn source(url: impl Into<String>) -> Self {
        Self::new(ResourceKind::Source, url)
    }

    /// Tile resource with the url resolved from the `tileset` templates.
    ///
    /// Fails with [`CartographError::OutOfRange`] if the tileset does not contain the zoom level
    /// of the tile.
    pub fn tile(tileset: &Tileset, id: TileId, pixel_ratio: f32) -> Result<Self, CartographError> {
        let url = tileset.resolve_with_ratio(id.z, id.x, id.y, pixel_ratio)?;
        Ok(Self::new(ResourceKind::Tile, url))
    }

    /// Glyph range resource. The `template` must contain `{fontstack}` and `{range}` placeholders.
    pub fn glyphs(
        template: &str,
        font_stack: &str,
        range: GlyphRange,
    ) -> Result<Self, CartographError> {
        let mut vars = HashMap::new();
        vars.insert(
            "fontstack".to_string(),
            urlencoding::encode(font_stack).into_owned(),
        );
        vars.insert("range".to_string(), range.to_string());

        let url = strfmt::strfmt(template, &vars)?;
        Ok(Self::new(ResourceKind::Glyphs, url))
    }

    /// Sprite metadata resource for the sprite sheet at `base` url.
    pub fn sprite_json(base: &str, pixel_ratio: f32) -> Self {
        Self::new(
            ResourceKind::SpriteJson,
            format!("{base}{}.json", ratio_suffix(pixel_ratio)),
        )
    }

    /// Sprite image resource for the sprite sheet at `base` url.
    pub fn sprite_image(base: &str, pixel_ratio: f32) -> Self {
        Self::new(
            ResourceKind::SpriteImage,
            format!("{base}{}.png", ratio_suffix(pixel_ratio)),
        )
    }

    /// Lowercase scheme of the url. `None` if the url is not absolute.
    pub fn scheme(&self) -> Option<String> {
        Url::parse(&self.url).ok().map(|url| url.scheme().to_owned())
    }
}

impl Display for Resource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.url)
    }
}

/// Range of [`GLYPHS_PER_RANGE`] consecutive code points, which is the unit glyphs are loaded by.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlyphRange {
    start: u32,
}

impl GlyphRange {
    /// Range that contains the given code point.
    pub fn containing(code_point: u32) -> Self {
        Self {
            start: code_point / GLYPHS_PER_RANGE * GLYPHS_PER_RANGE,
        }
    }

    /// First code point of the range.
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Last code point of the range.
    pub fn end(&self) -> u32 {
        self.start + GLYPHS_PER_RANGE - 1
    }
}

impl Display for GlyphRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start(), self.end())
    }
}

pub(crate) fn ratio_suffix(pixel_ratio: f32) -> &'static str {
    if pixel_ratio > 1.0 {
        "@2x"
    } else {
        ""
    }
}
