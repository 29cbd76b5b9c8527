//! [`Tileset`] describes where tiles of a source live and at which zoom levels they exist.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::CartographError;
use crate::resource::{ratio_suffix, ResourceKind};
use crate::view::{MapView, WORLD_TILE_SIZE};

/// Largest zoom level a tileset can declare.
pub const MAX_ZOOM: u8 = 25;

pub(crate) const DEFAULT_MAX_ZOOM: u8 = 22;
pub(crate) const DEFAULT_TILE_SIZE: u16 = 512;

// Fixed seeds keep template selection stable for the lifetime of the process.
const TEMPLATE_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// Tile index.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
pub struct TileId {
    /// Z index.
    pub z: u8,
    /// X index.
    pub x: u32,
    /// Y index.
    pub y: u32,
}

impl TileId {
    /// Create a new index instance.
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }
}

/// Set of tile url templates and the range of zoom levels the tiles exist for.
///
/// Usually parsed from a TileJSON document loaded as a [`Source`](ResourceKind::Source)
/// resource, or built from the inline `tiles` of a style source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tileset {
    /// Url templates of the tiles. Templates can contain `{z}`, `{x}`, `{y}`, `{prefix}`,
    /// `{quadkey}` and `{ratio}` placeholders.
    pub tiles: Vec<String>,
    /// Minimum zoom level for which tiles are available.
    #[serde(rename = "minzoom", default)]
    pub min_zoom: u8,
    /// Maximum zoom level for which tiles are available.
    #[serde(rename = "maxzoom", default = "default_max_zoom")]
    pub max_zoom: u8,
    /// Attribution text to display with the map. Not used for loading.
    #[serde(default)]
    pub attribution: String,
    /// Size of a tile in pixels.
    #[serde(rename = "tileSize", default = "default_tile_size")]
    pub tile_size: u16,
}

fn default_max_zoom() -> u8 {
    DEFAULT_MAX_ZOOM
}

fn default_tile_size() -> u16 {
    DEFAULT_TILE_SIZE
}

impl Tileset {
    /// Creates a new tileset with default tile size and no attribution.
    pub fn new(tiles: Vec<String>, min_zoom: u8, max_zoom: u8) -> Result<Self, CartographError> {
        let tileset = Self {
            tiles,
            min_zoom,
            max_zoom,
            attribution: String::new(),
            tile_size: DEFAULT_TILE_SIZE,
        };
        tileset.validate()?;

        Ok(tileset)
    }

    /// Parses a TileJSON document.
    pub fn from_json(data: &[u8]) -> Result<Self, CartographError> {
        let tileset: Self = serde_json::from_slice(data).map_err(|err| CartographError::Parse {
            kind: ResourceKind::Source,
            message: err.to_string(),
        })?;

        tileset
            .validate()
            .map_err(|err| CartographError::Parse {
                kind: ResourceKind::Source,
                message: err.to_string(),
            })?;

        Ok(tileset)
    }

    /// Checks the invariants of the tileset.
    pub fn validate(&self) -> Result<(), CartographError> {
        if self.tiles.is_empty() {
            return Err(CartographError::Configuration(
                "tileset has no tile url templates".into(),
            ));
        }

        if self.min_zoom > self.max_zoom || self.max_zoom > MAX_ZOOM {
            return Err(CartographError::Configuration(format!(
                "invalid tileset zoom range {}..={}",
                self.min_zoom, self.max_zoom
            )));
        }

        if self.tile_size == 0 {
            return Err(CartographError::Configuration(
                "tile size must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Returns true if tiles of the zoom level `z` are available.
    pub fn contains_zoom(&self, z: u8) -> bool {
        self.min_zoom <= z && z <= self.max_zoom
    }

    /// Url of the tile with the given index.
    ///
    /// Fails with [`CartographError::OutOfRange`] if `z` is outside of the tileset zoom range.
    /// The same index always resolves to the same url.
    pub fn resolve(&self, z: u8, x: u32, y: u32) -> Result<String, CartographError> {
        self.resolve_with_ratio(z, x, y, 1.0)
    }

    /// Same as [`Tileset::resolve`], but also substitutes `{ratio}` for high density displays.
    pub fn resolve_with_ratio(
        &self,
        z: u8,
        x: u32,
        y: u32,
        pixel_ratio: f32,
    ) -> Result<String, CartographError> {
        if !self.contains_zoom(z) {
            return Err(CartographError::OutOfRange {
                z,
                min_zoom: self.min_zoom,
                max_zoom: self.max_zoom,
            });
        }

        let template = self.template_for(x, y).ok_or_else(|| {
            CartographError::Configuration("tileset has no tile url templates".into())
        })?;

        let mut vars = HashMap::new();
        vars.insert("z".to_string(), z.to_string());
        vars.insert("x".to_string(), x.to_string());
        vars.insert("y".to_string(), y.to_string());
        vars.insert("prefix".to_string(), format!("{:x}{:x}", x % 16, y % 16));
        vars.insert("quadkey".to_string(), quadkey(z, x, y));
        vars.insert("ratio".to_string(), ratio_suffix(pixel_ratio).to_string());

        Ok(strfmt::strfmt(template, &vars)?)
    }

    /// Indices of the tiles needed to display the `view`, nearest to the center first.
    ///
    /// The zoom level of the tiles is the one matching the view zoom for the tile size of the
    /// tileset, clamped to the tileset zoom range.
    pub fn tile_cover(&self, view: &MapView) -> Vec<TileId> {
        if self.validate().is_err() {
            return vec![];
        }

        let ideal_z = view.zoom() + (WORLD_TILE_SIZE / f64::from(self.tile_size.max(1))).log2();
        let z = (ideal_z.floor().max(0.0) as u8).clamp(self.min_zoom, self.max_zoom);

        let tiles_count = 1i64 << z;
        let scale = tiles_count as f64 / view.world_size();
        let (center_x, center_y) = view.world_center();
        let (center_x, center_y) = (center_x * scale, center_y * scale);
        let half_width = view.width() / 2.0 * scale;
        let half_height = view.height() / 2.0 * scale;

        let mut min_x = (center_x - half_width).floor() as i64;
        let mut max_x = ((center_x + half_width).ceil() as i64 - 1).max(min_x);
        if max_x - min_x >= tiles_count {
            // The view is wider than the world, every column is needed once.
            min_x = (center_x - tiles_count as f64 / 2.0).floor() as i64;
            max_x = min_x + tiles_count - 1;
        }
        let min_y = ((center_y - half_height).floor() as i64).clamp(0, tiles_count - 1);
        let max_y = ((center_y + half_height).ceil() as i64 - 1).clamp(min_y, tiles_count - 1);

        let mut candidates = vec![];
        for x in min_x..=max_x {
            for y in min_y..=max_y {
                let dx = x as f64 + 0.5 - center_x;
                let dy = y as f64 + 0.5 - center_y;
                candidates.push((dx * dx + dy * dy, x, y));
            }
        }

        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut seen = HashSet::new();
        candidates
            .into_iter()
            .filter_map(|(_, x, y)| {
                let id = TileId::new(z, x.rem_euclid(tiles_count) as u32, y as u32);
                seen.insert(id).then_some(id)
            })
            .collect()
    }

    fn template_for(&self, x: u32, y: u32) -> Option<&str> {
        if self.tiles.len() <= 1 {
            return self.tiles.first().map(String::as_str);
        }

        let [k0, k1, k2, k3] = TEMPLATE_SEEDS;
        let hash = ahash::RandomState::with_seeds(k0, k1, k2, k3).hash_one((x, y));
        self.tiles
            .get((hash % self.tiles.len() as u64) as usize)
            .map(String::as_str)
    }
}

fn quadkey(z: u8, x: u32, y: u32) -> String {
    (1..=u32::from(z))
        .rev()
        .map(|i| {
            let mask = 1 << (i - 1);
            let mut digit = 0;
            if x & mask != 0 {
                digit += 1;
            }
            if y & mask != 0 {
                digit += 2;
            }
            char::from(b'0' + digit)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn simple_tileset() -> Tileset {
        Tileset::new(vec!["https://a/{z}/{x}/{y}.pbf".into()], 0, 14).expect("valid tileset")
    }

    #[test]
    fn resolve_out_of_range() {
        let tileset = simple_tileset();
        assert_matches!(
            tileset.resolve(15, 0, 0),
            Err(CartographError::OutOfRange {
                z: 15,
                min_zoom: 0,
                max_zoom: 14
            })
        );
    }

    #[test]
    fn resolve_is_deterministic() {
        let tileset = simple_tileset();
        for _ in 0..3 {
            assert_eq!(
                tileset.resolve(14, 3, 5).expect("in range"),
                "https://a/14/3/5.pbf"
            );
        }
    }

    #[test]
    fn resolve_below_min_zoom() {
        let tileset = Tileset::new(vec!["https://a/{z}/{x}/{y}.pbf".into()], 4, 14)
            .expect("valid tileset");
        assert_matches!(
            tileset.resolve(3, 0, 0),
            Err(CartographError::OutOfRange { z: 3, .. })
        );
    }

    #[test]
    fn resolve_other_placeholders() {
        let tileset = Tileset::new(
            vec!["https://{prefix}.a/{quadkey}/{z}/{x}/{y}{ratio}.png".into()],
            0,
            22,
        )
        .expect("valid tileset");

        assert_eq!(
            tileset.resolve_with_ratio(3, 17, 2, 2.0).expect("in range"),
            "https://12.a/021/3/17/2@2x.png"
        );
    }

    #[test]
    fn resolve_unknown_placeholder() {
        let tileset =
            Tileset::new(vec!["https://a/{layer}/{z}/{x}/{y}".into()], 0, 22).expect("valid");
        assert_matches!(
            tileset.resolve(1, 0, 0),
            Err(CartographError::Configuration(_))
        );
    }

    #[test]
    fn multiple_templates_distribute_load() {
        let tileset = Tileset::new(
            vec![
                "https://a.example/{z}/{x}/{y}".into(),
                "https://b.example/{z}/{x}/{y}".into(),
                "https://c.example/{z}/{x}/{y}".into(),
            ],
            0,
            22,
        )
        .expect("valid tileset");

        let mut hosts = HashSet::new();
        for x in 0..16 {
            for y in 0..16 {
                let url = tileset.resolve(10, x, y).expect("in range");
                assert_eq!(url, tileset.resolve(10, x, y).expect("in range"));
                hosts.insert(url[8..9].to_string());
            }
        }

        assert_eq!(hosts.len(), 3);
    }

    #[test]
    fn invalid_zoom_range() {
        assert_matches!(
            Tileset::new(vec!["a".into()], 5, 4),
            Err(CartographError::Configuration(_))
        );
        assert_matches!(
            Tileset::new(vec![], 0, 4),
            Err(CartographError::Configuration(_))
        );
    }

    #[test]
    fn parse_tile_json() {
        let json = br#"{
            "tilejson": "2.2.0",
            "tiles": ["https://a/{z}/{x}/{y}.pbf", "https://b/{z}/{x}/{y}.pbf"],
            "minzoom": 2,
            "maxzoom": 15,
            "attribution": "Test data",
            "center": [0, 0, 3]
        }"#;

        let tileset = Tileset::from_json(json).expect("valid TileJSON");
        assert_eq!(tileset.tiles.len(), 2);
        assert_eq!(tileset.min_zoom, 2);
        assert_eq!(tileset.max_zoom, 15);
        assert_eq!(tileset.attribution, "Test data");
        assert_eq!(tileset.tile_size, 512);
    }

    #[test]
    fn parse_tile_json_defaults() {
        let tileset = Tileset::from_json(br#"{"tiles": ["https://a/{z}/{x}/{y}.png"]}"#)
            .expect("valid TileJSON");
        assert_eq!(tileset.min_zoom, 0);
        assert_eq!(tileset.max_zoom, 22);
    }

    #[test]
    fn parse_invalid_tile_json() {
        assert_matches!(
            Tileset::from_json(b"not json"),
            Err(CartographError::Parse {
                kind: ResourceKind::Source,
                ..
            })
        );
        assert_matches!(
            Tileset::from_json(br#"{"tiles": [], "minzoom": 0}"#),
            Err(CartographError::Parse { .. })
        );
    }

    #[test]
    fn cover_of_world_at_zero_zoom() {
        let tileset = simple_tileset();
        let cover = tileset.tile_cover(&MapView::default());
        assert_eq!(cover, vec![TileId::new(0, 0, 0)]);
    }

    #[test]
    fn cover_is_clamped_to_max_zoom() {
        let tileset = simple_tileset();
        let view = MapView::new(10.0, 10.0, 16.0).with_size(256.0, 256.0);
        let cover = tileset.tile_cover(&view);
        assert!(!cover.is_empty());
        assert!(cover.len() <= 4);
        assert!(cover.iter().all(|id| id.z == 14));
    }

    #[test]
    fn cover_wraps_antimeridian() {
        let tileset = Tileset::new(vec!["https://a/{z}/{x}/{y}.png".into()], 0, 22)
            .expect("valid tileset");
        let view = MapView::new(0.0, 179.9, 2.0).with_size(1024.0, 512.0);
        let cover = tileset.tile_cover(&view);

        assert!(cover.iter().all(|id| id.x < 4 && id.y < 4 && id.z == 2));
        assert!(cover.iter().any(|id| id.x == 0));
        assert!(cover.iter().any(|id| id.x == 3));
    }

    #[test]
    fn cover_uses_tile_size() {
        let mut tileset = simple_tileset();
        tileset.tile_size = 256;
        let cover = tileset.tile_cover(&MapView::default());
        assert_eq!(cover.len(), 4);
        assert!(cover.iter().all(|id| id.z == 1));
    }
    #[test]
    fn cover_of_view_wider_than_world() {
        let tileset = simple_tileset();
        let view = MapView::new(0.0, 0.0, 1.0).with_size(1e12, 512.0);
        let cover = tileset.tile_cover(&view);

        assert_eq!(cover.len(), 4);
        let columns: HashSet<u32> = cover.iter().map(|id| id.x).collect();
        assert_eq!(columns, HashSet::from([0, 1]));
    }
}
