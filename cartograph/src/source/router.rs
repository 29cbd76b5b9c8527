use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CartographError;
use crate::resource::{Resource, Response, ResponseError};
use crate::source::{mapbox, AssetLoader, NetworkLoader, ResourceLoader};

const DEFAULT_API_BASE_URL: &str = "https://api.mapbox.com";

/// Configuration of a [`SchemeRouter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterOptions {
    /// Base url `mapbox://` urls are expanded against.
    pub api_base_url: String,
    /// Access token added to expanded `mapbox://` urls.
    pub access_token: Option<String>,
    /// Folder `asset://` urls are resolved against.
    pub asset_root: PathBuf,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            access_token: None,
            asset_root: PathBuf::from("."),
        }
    }
}

impl RouterOptions {
    /// Sets the base url of the API.
    pub fn with_api_base_url(mut self, api_base_url: impl Into<String>) -> Self {
        self.api_base_url = api_base_url.into();
        self
    }

    /// Sets the access token.
    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    /// Sets the asset root folder.
    pub fn with_asset_root(mut self, asset_root: impl Into<PathBuf>) -> Self {
        self.asset_root = asset_root.into();
        self
    }
}

/// Loader that selects the backend by the url scheme of the resource.
///
/// | scheme          | backend                                     |
/// |-----------------|---------------------------------------------|
/// | `http`, `https` | network                                     |
/// | `file`, `asset` | asset                                       |
/// | `mapbox`        | network, after expanding the url to the API |
///
/// Other schemes fail with a permanent network error.
pub struct SchemeRouter {
    network: Arc<dyn ResourceLoader>,
    asset: Arc<dyn ResourceLoader>,
    options: RouterOptions,
}

impl std::fmt::Debug for SchemeRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemeRouter")
            .field("api_base_url", &self.options.api_base_url)
            .field("asset_root", &self.options.asset_root)
            .finish()
    }
}

impl SchemeRouter {
    /// Creates a router with [`NetworkLoader`] and [`AssetLoader`] backends.
    pub fn new(options: RouterOptions) -> Result<Self, CartographError> {
        let network = Arc::new(NetworkLoader::new()?);
        let asset = Arc::new(AssetLoader::new(options.asset_root.clone()));

        Ok(Self::with_loaders(network, asset, options))
    }

    /// Creates a router with custom backends.
    pub fn with_loaders(
        network: Arc<dyn ResourceLoader>,
        asset: Arc<dyn ResourceLoader>,
        options: RouterOptions,
    ) -> Self {
        Self {
            network,
            asset,
            options,
        }
    }

    /// Router configuration.
    pub fn options(&self) -> &RouterOptions {
        &self.options
    }
}

#[async_trait]
impl ResourceLoader for SchemeRouter {
    async fn load(&self, resource: &Resource, prior: Option<&Response>) -> Response {
        match resource.scheme().as_deref() {
            Some("http") | Some("https") => self.network.load(resource, prior).await,
            Some("file") | Some("asset") => self.asset.load(resource, prior).await,
            Some("mapbox") => {
                let normalized = mapbox::normalize(
                    &resource.url,
                    &self.options.api_base_url,
                    self.options.access_token.as_deref(),
                );

                match normalized {
                    Ok(url) => {
                        let normalized = Resource::new(resource.kind, url);
                        self.network.load(&normalized, prior).await
                    }
                    Err(message) => {
                        log::warn!("Cannot load {resource}: {message}");
                        Response::error(ResponseError::permanent(message))
                    }
                }
            }
            Some(scheme) => Response::error(ResponseError::permanent(format!(
                "unsupported url scheme: {scheme}"
            ))),
            None => Response::error(ResponseError::permanent(format!(
                "url has no scheme: {}",
                resource.url
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::source::StubLoader;

    fn router(options: RouterOptions) -> (SchemeRouter, Arc<StubLoader>, Arc<StubLoader>) {
        let network = Arc::new(StubLoader::new().with_style_response(|_| Response::data("net")));
        let asset = Arc::new(StubLoader::new().with_style_response(|_| Response::data("asset")));
        let router = SchemeRouter::with_loaders(network.clone(), asset.clone(), options);

        (router, network, asset)
    }

    fn load(router: &SchemeRouter, url: &str) -> Response {
        tokio_test::block_on(router.load(&Resource::style(url), None))
    }

    #[test]
    fn dispatches_by_scheme() {
        let (router, network, asset) = router(RouterOptions::default());

        load(&router, "https://example.com/style.json");
        load(&router, "http://example.com/style.json");
        load(&router, "asset://style.json");
        load(&router, "file:///data/style.json");

        assert_eq!(network.load_count(), 2);
        assert_eq!(asset.load_count(), 2);
    }

    #[test]
    fn scheme_is_matched_case_insensitively() {
        let (router, network, asset) = router(RouterOptions::default());

        assert!(load(&router, "HTTPS://example.com/style.json").is_success());
        assert!(load(&router, "Asset://style.json").is_success());

        assert_eq!(network.load_count(), 1);
        assert_eq!(asset.load_count(), 1);
    }

    #[test]
    fn expands_mapbox_urls() {
        let (router, network, _) = router(
            RouterOptions::default()
                .with_api_base_url("https://api.example.com")
                .with_access_token("secret"),
        );

        let response = load(&router, "mapbox://styles/user/basic");
        assert!(response.is_success());
        assert_eq!(
            network.requests()[0],
            Resource::style("https://api.example.com/styles/v1/user/basic?access_token=secret")
        );
    }

    #[test]
    fn mapbox_url_without_token_fails() {
        let (router, network, _) = router(RouterOptions::default());

        let response = load(&router, "mapbox://styles/user/basic");
        assert_matches!(
            response.failure(),
            Some(ResponseError::Network {
                retriable: false,
                ..
            })
        );
        assert_eq!(network.load_count(), 0);
    }

    #[test]
    fn unknown_scheme_fails() {
        let (router, network, asset) = router(RouterOptions::default());

        let response = load(&router, "ftp://example.com/style.json");
        assert_eq!(
            response.failure(),
            Some(&ResponseError::permanent("unsupported url scheme: ftp"))
        );
        assert_eq!(network.load_count() + asset.load_count(), 0);
    }
}
