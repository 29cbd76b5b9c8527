use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{
    HeaderMap, HeaderName, CACHE_CONTROL, ETAG, EXPIRES, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    LAST_MODIFIED,
};
use reqwest::StatusCode;
use web_time::{Duration, SystemTime};

use crate::error::CartographError;
use crate::resource::{Resource, Response, ResponseError};
use crate::source::ResourceLoader;

const USER_AGENT: &str = concat!("cartograph/", env!("CARGO_PKG_VERSION"));

/// Loads `http` and `https` resources.
#[derive(Debug, Clone)]
pub struct NetworkLoader {
    http_client: reqwest::Client,
}

impl NetworkLoader {
    /// Creates a new loader with its own http client.
    pub fn new() -> Result<Self, CartographError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| {
                CartographError::Configuration(format!("failed to create http client: {err}"))
            })?;

        Ok(Self { http_client })
    }

    /// Creates a loader that uses the given client.
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl ResourceLoader for NetworkLoader {
    async fn load(&self, resource: &Resource, prior: Option<&Response>) -> Response {
        let mut request = self.http_client.get(&resource.url);
        if let Some(etag) = prior.and_then(Response::etag) {
            request = request.header(IF_NONE_MATCH, etag);
        } else if let Some(modified) = prior
            .and_then(Response::modified)
            .and_then(format_http_date)
        {
            request = request.header(IF_MODIFIED_SINCE, modified);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                log::info!("Failed to load {resource}: {err}");
                return Response::error(ResponseError::retriable(err.to_string()));
            }
        };

        let status = response.status();
        let validity = Validity::from_headers(response.headers(), SystemTime::now());

        if status == StatusCode::NOT_MODIFIED {
            log::debug!("{resource} is not modified");
            return validity.apply(Response::not_modified());
        }

        if !status.is_success() {
            log::info!("Failed to load {resource}: {status}");
            return Response::error(status_error(status));
        }

        match response.bytes().await {
            Ok(bytes) => validity.apply(Response::data(bytes)),
            Err(err) => {
                log::info!("Failed to read the body of {resource}: {err}");
                Response::error(ResponseError::retriable(err.to_string()))
            }
        }
    }
}

/// Caching headers of an http response.
#[derive(Debug, Default, PartialEq)]
struct Validity {
    etag: Option<String>,
    expires: Option<SystemTime>,
    modified: Option<SystemTime>,
}

impl Validity {
    /// `Cache-Control: max-age` takes precedence over `Expires`.
    fn from_headers(headers: &HeaderMap, now: SystemTime) -> Self {
        let expires = max_age(headers)
            .and_then(|max_age| now.checked_add(max_age))
            .or_else(|| http_date(headers, EXPIRES));

        Self {
            etag: etag(headers),
            expires,
            modified: http_date(headers, LAST_MODIFIED),
        }
    }

    fn apply(self, mut response: Response) -> Response {
        if let Some(etag) = self.etag {
            response = response.with_etag(etag);
        }
        if let Some(expires) = self.expires {
            response = response.with_expires(expires);
        }
        if let Some(modified) = self.modified {
            response = response.with_modified(modified);
        }

        response
    }
}

fn status_error(status: StatusCode) -> ResponseError {
    if status == StatusCode::NOT_FOUND {
        return ResponseError::NotFound;
    }

    let message = format!("server responded with {status}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ResponseError::retriable(message)
    } else {
        ResponseError::permanent(message)
    }
}

fn etag(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ETAG)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

fn max_age(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(CACHE_CONTROL)?.to_str().ok()?;
    parse_cache_control(value)
}

fn http_date(headers: &HeaderMap, name: HeaderName) -> Option<SystemTime> {
    let value = headers.get(name)?.to_str().ok()?;
    parse_http_date(value)
}

/// Parses a date in the `Sun, 06 Nov 1994 08:49:37 GMT` format.
fn parse_http_date(value: &str) -> Option<SystemTime> {
    let date = DateTime::parse_from_rfc2822(value.trim()).ok()?;
    let seconds = u64::try_from(date.timestamp()).ok()?;
    SystemTime::UNIX_EPOCH.checked_add(Duration::from_secs(seconds))
}

fn format_http_date(time: SystemTime) -> Option<String> {
    let seconds = time.duration_since(SystemTime::UNIX_EPOCH).ok()?.as_secs();
    let date = DateTime::<Utc>::from_timestamp(i64::try_from(seconds).ok()?, 0)?;
    Some(date.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

/// Lifetime of a response according to its `Cache-Control` header value.
fn parse_cache_control(value: &str) -> Option<Duration> {
    let mut max_age = None;
    for directive in value.split(',').map(str::trim) {
        let directive = directive.to_ascii_lowercase();
        if directive == "no-cache" || directive == "no-store" {
            return Some(Duration::ZERO);
        }

        if let Some(seconds) = directive.strip_prefix("max-age=") {
            max_age = seconds.trim_matches('"').parse().ok().map(Duration::from_secs);
        }
    }

    max_age
}
