/// Maximum latitude that can be displayed in the web mercator projection.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Size in pixels of the whole world at zoom level 0.
pub const WORLD_TILE_SIZE: f64 = 512.0;

/// Displayed part of the map: geographic center, zoom level and size in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapView {
    latitude: f64,
    longitude: f64,
    zoom: f64,
    width: f64,
    height: f64,
}

impl Default for MapView {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            zoom: 0.0,
            width: WORLD_TILE_SIZE,
            height: WORLD_TILE_SIZE,
        }
    }
}

impl MapView {
    /// Creates a new view centered at the given point.
    ///
    /// Latitude is clamped to the range displayable in web mercator, longitude is wrapped into
    /// `-180..180` and negative zoom levels are replaced with 0.
    pub fn new(latitude: f64, longitude: f64, zoom: f64) -> Self {
        Self::default()
            .with_center(latitude, longitude)
            .with_zoom(zoom)
    }

    /// Latitude of the center.
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Longitude of the center.
    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Zoom level.
    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// Width in pixels.
    pub fn width(&self) -> f64 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> f64 {
        self.height
    }

    /// Returns a copy of the view with the given center.
    pub fn with_center(&self, latitude: f64, longitude: f64) -> Self {
        let longitude = if longitude.is_finite() {
            (longitude + 180.0).rem_euclid(360.0) - 180.0
        } else {
            0.0
        };
        let latitude = if latitude.is_finite() {
            latitude.clamp(-MAX_LATITUDE, MAX_LATITUDE)
        } else {
            0.0
        };

        Self {
            latitude,
            longitude,
            ..*self
        }
    }

    /// Returns a copy of the view with the given zoom level.
    pub fn with_zoom(&self, zoom: f64) -> Self {
        let zoom = if zoom.is_finite() { zoom.max(0.0) } else { 0.0 };
        Self { zoom, ..*self }
    }

    /// Returns a copy of the view with the given size in pixels.
    pub fn with_size(&self, width: f64, height: f64) -> Self {
        Self {
            width: width.max(0.0),
            height: height.max(0.0),
            ..*self
        }
    }

    /// Size of the whole world in pixels at the zoom level of the view.
    pub(crate) fn world_size(&self) -> f64 {
        WORLD_TILE_SIZE * self.zoom.exp2()
    }

    /// Position of the center in pixels from the top left corner of the world.
    pub(crate) fn world_center(&self) -> (f64, f64) {
        let world_size = self.world_size();
        let x = (self.longitude + 180.0) / 360.0 * world_size;
        let lat = self.latitude.to_radians();
        let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / std::f64::consts::PI) / 2.0 * world_size;

        (x, y)
    }
}
