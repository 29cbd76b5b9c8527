use std::sync::Arc;

use web_time::Duration;

use super::Map;
use crate::cache::{CacheOptions, ExpirationPolicy, RevalidationPolicy};
use crate::error::CartographError;
use crate::messenger::Messenger;
use crate::run_loop::RunLoop;
use crate::source::ResourceLoader;
use crate::view::MapView;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(250);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// How a map is rendered.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum MapMode {
    /// Frames are produced on demand with [`Map::render_still`] once everything is loaded.
    #[default]
    Still,
    /// The application redraws the map whenever new data arrives.
    Continuous,
}

/// Retries of resources that failed with a retriable error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries of a single resource.
    pub max_retries: u32,
    /// Delay before the first retry. Every next retry waits twice as long.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before the retry number `attempt` (starting from 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_RETRY_DELAY)
    }
}

/// Configuration of a [`Map`].
#[derive(Clone)]
pub struct MapOptions {
    /// Render mode.
    pub mode: MapMode,
    /// Ratio of physical to logical pixels. Selects `@2x` sprites and tiles when above 1.
    pub pixel_ratio: f32,
    /// Initial view.
    pub view: MapView,
    /// Limits of the cache owned by the map.
    pub cache: CacheOptions,
    /// Revalidation policy of the cache owned by the map.
    pub revalidation: Arc<dyn RevalidationPolicy>,
    /// Retries of failed resources.
    pub retry: RetryPolicy,
    /// Receiver of redraw requests in continuous mode.
    pub messenger: Option<Arc<dyn Messenger>>,
}

impl std::fmt::Debug for MapOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapOptions")
            .field("mode", &self.mode)
            .field("pixel_ratio", &self.pixel_ratio)
            .field("view", &self.view)
            .field("cache", &self.cache)
            .field("retry", &self.retry)
            .field("messenger", &self.messenger.is_some())
            .finish()
    }
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            mode: MapMode::default(),
            pixel_ratio: 1.0,
            view: MapView::default(),
            cache: CacheOptions::default(),
            revalidation: Arc::new(ExpirationPolicy),
            retry: RetryPolicy::default(),
            messenger: None,
        }
    }
}

impl MapOptions {
    /// Checks that the options can be used together.
    pub fn validate(&self) -> Result<(), CartographError> {
        if !self.pixel_ratio.is_finite() || self.pixel_ratio <= 0.0 {
            return Err(CartographError::Configuration(format!(
                "pixel ratio must be a positive number, got {}",
                self.pixel_ratio
            )));
        }

        if self.mode == MapMode::Still && self.messenger.is_some() {
            return Err(CartographError::Configuration(
                "messenger can only be used with a map in continuous mode".into(),
            ));
        }

        if self.cache.max_bytes == 0 {
            return Err(CartographError::Configuration(
                "cache capacity must be positive".into(),
            ));
        }

        Ok(())
    }
}

/// Constructor for a [`Map`].
///
/// ```ignore
/// let run_loop = RunLoop::new();
/// let map = MapBuilder::new(Arc::new(SchemeRouter::new(RouterOptions::default())?))
///     .with_pixel_ratio(2.0)
///     .with_view(MapView::new(55.75, 37.62, 10.0))
///     .build(&run_loop)?;
/// ```
pub struct MapBuilder {
    loader: Arc<dyn ResourceLoader>,
    options: MapOptions,
}

impl MapBuilder {
    /// Initializes a builder for a map that loads resources with the given loader.
    pub fn new(loader: Arc<dyn ResourceLoader>) -> Self {
        Self {
            loader,
            options: MapOptions::default(),
        }
    }

    /// Sets the render mode.
    pub fn with_mode(mut self, mode: MapMode) -> Self {
        self.options.mode = mode;
        self
    }

    /// Sets the pixel ratio.
    pub fn with_pixel_ratio(mut self, pixel_ratio: f32) -> Self {
        self.options.pixel_ratio = pixel_ratio;
        self
    }

    /// Sets the initial view.
    pub fn with_view(mut self, view: MapView) -> Self {
        self.options.view = view;
        self
    }

    /// Sets the limits of the map cache.
    pub fn with_cache_options(mut self, cache: CacheOptions) -> Self {
        self.options.cache = cache;
        self
    }

    /// Sets the revalidation policy of the map cache.
    pub fn with_revalidation_policy(
        mut self,
        policy: impl RevalidationPolicy + 'static,
    ) -> Self {
        self.options.revalidation = Arc::new(policy);
        self
    }

    /// Sets the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.options.retry = retry;
        self
    }

    /// Sets the messenger notified when new data arrives. Only valid in continuous mode.
    pub fn with_messenger(mut self, messenger: impl Messenger + 'static) -> Self {
        self.options.messenger = Some(Arc::new(messenger));
        self
    }

    /// Consumes the builder and constructs the map bound to the run loop.
    ///
    /// Returns an error if the options are inconsistent.
    pub fn build(self, run_loop: &RunLoop) -> Result<Map, CartographError> {
        let Self { loader, options } = self;
        Map::new(run_loop, loader, options)
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_compact_debug_snapshot;

    use super::*;
    use crate::messenger::DummyMessenger;
    use crate::source::StubLoader;

    fn builder() -> MapBuilder {
        MapBuilder::new(Arc::new(StubLoader::new()))
    }

    #[test]
    fn default_options() {
        let run_loop = RunLoop::new();
        let map = builder().build(&run_loop).expect("default options are valid");

        assert_eq!(map.mode(), MapMode::Still);
        assert_eq!(map.pixel_ratio(), 1.0);
        assert_eq!(map.view(), MapView::default());
    }

    #[test]
    fn invalid_pixel_ratio() {
        let run_loop = RunLoop::new();
        let result = builder().with_pixel_ratio(0.0).build(&run_loop);

        assert_compact_debug_snapshot!(result.err(), @r#"Some(Configuration("pixel ratio must be a positive number, got 0"))"#);
    }

    #[test]
    fn messenger_requires_continuous_mode() {
        let run_loop = RunLoop::new();
        let result = builder().with_messenger(DummyMessenger).build(&run_loop);

        assert_compact_debug_snapshot!(result.err(), @r#"Some(Configuration("messenger can only be used with a map in continuous mode"))"#);

        let result = builder()
            .with_mode(MapMode::Continuous)
            .with_messenger(DummyMessenger)
            .build(&run_loop);
        assert!(result.is_ok());
    }

    #[test]
    fn zero_cache_capacity() {
        let run_loop = RunLoop::new();
        let result = builder()
            .with_cache_options(CacheOptions::default().with_max_bytes(0))
            .build(&run_loop);

        assert_compact_debug_snapshot!(result.err(), @r#"Some(Configuration("cache capacity must be positive"))"#);
    }

    #[test]
    fn retry_delays() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
        };

        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
        assert_eq!(policy.delay(20), MAX_RETRY_DELAY);
    }
}
