//! Cartograph is the resource pipeline of a map rendering engine. It loads everything a map style
//! refers to (style documents, source metadata, tiles, glyphs and sprites), caches it, and hands
//! it to a renderer.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cartograph::map::MapBuilder;
//! use cartograph::source::{RouterOptions, SchemeRouter};
//! use cartograph::{MapView, RunLoop};
//!
//! let run_loop = RunLoop::new();
//! let loader = SchemeRouter::new(RouterOptions::default().with_access_token("pk.token"))?;
//! let map = MapBuilder::new(Arc::new(loader))
//!     .with_view(MapView::new(55.75, 37.62, 10.0))
//!     .build(&run_loop)?;
//!
//! map.set_style_url("mapbox://styles/mapbox/streets-v11");
//! let frame = map.render_still(&run_loop)?;
//! println!("{} tiles loaded", frame.tiles.len());
//! # Ok::<(), cartograph::error::CartographError>(())
//! ```
//!
//! # Main components
//!
//! * [`Map`](map::Map) owns everything it loads. It parses the style, requests the resources the
//!   style needs for the current [`MapView`], and cancels them when the style or the view
//!   changes or when the map is dropped.
//! * [`ResourceSource`](source::ResourceSource) turns a [`Resource`](resource::Resource) request
//!   into a [`Response`](resource::Response) using a pluggable
//!   [`ResourceLoader`](source::ResourceLoader) backend. Concurrent requests of the same
//!   resource share a single fetch, and results are kept in a
//!   [`ResponseCache`](cache::ResponseCache).
//! * [`RunLoop`] is the single thread all responses are delivered on. Loaders run on a small
//!   worker pool, but callbacks never run there.

#![warn(clippy::unwrap_used)]
#![warn(missing_docs)]

pub(crate) mod async_runtime;
pub mod cache;
pub mod diagnostics;
pub mod error;
pub mod map;
mod messenger;
pub mod resource;
pub mod run_loop;
pub mod source;
pub mod tileset;
mod view;

pub use map::{Map, MapBuilder};
pub use messenger::{DummyMessenger, Messenger};
pub use run_loop::{RunLoop, RunLoopHandle};
pub use view::MapView;
