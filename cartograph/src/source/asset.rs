use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use url::Url;

use crate::resource::{Resource, Response, ResponseError};
use crate::source::ResourceLoader;

/// Loads resources from the file system.
///
/// * `file:///absolute/path` urls are read as is.
/// * `asset://relative/path` urls are read relative to the asset root. Paths that would leave
///   the root are rejected.
#[derive(Debug, Clone)]
pub struct AssetLoader {
    root: PathBuf,
}

impl AssetLoader {
    /// Creates a loader with the given asset root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Folder `asset://` urls are resolved against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, url: &str) -> Result<PathBuf, ResponseError> {
        let invalid = |message: &str| ResponseError::permanent(format!("{message}: {url}"));
        let parsed = Url::parse(url).map_err(|_| invalid("invalid url"))?;

        match parsed.scheme() {
            "file" => parsed
                .to_file_path()
                .map_err(|()| invalid("file url must contain an absolute path")),
            "asset" => {
                let encoded = format!("{}{}", parsed.host_str().unwrap_or_default(), parsed.path());
                let decoded =
                    urlencoding::decode(&encoded).map_err(|_| invalid("invalid asset path"))?;
                let path = Path::new(decoded.as_ref());
                let escapes = path.components().any(|component| {
                    !matches!(component, Component::Normal(_) | Component::CurDir)
                });
                if escapes || decoded.is_empty() {
                    return Err(invalid("asset path must be relative to the asset root"));
                }

                Ok(self.root.join(path))
            }
            _ => Err(invalid("not a file or asset url")),
        }
    }
}

#[async_trait]
impl ResourceLoader for AssetLoader {
    async fn load(&self, resource: &Resource, _prior: Option<&Response>) -> Response {
        let path = match self.path(&resource.url) {
            Ok(path) => path,
            Err(err) => return Response::error(err),
        };

        match tokio::fs::read(&path).await {
            Ok(data) => {
                log::debug!("Loaded {resource} from {path:?}");
                Response::data(data)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                log::debug!("File {path:?} not found");
                Response::error(ResponseError::NotFound)
            }
            Err(err) => {
                log::info!("Failed to read {path:?}: {err}");
                Response::error(ResponseError::permanent(format!(
                    "failed to read {}: {err}",
                    path.display()
                )))
            }
        }
    }
}
