use bytes::Bytes;
use thiserror::Error;
use web_time::SystemTime;

/// Reason a resource could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// The backend reports that the resource does not exist.
    #[error("resource not found")]
    NotFound,
    /// Transport level failure.
    #[error("network error: {message}")]
    Network {
        /// Details of the failure.
        message: String,
        /// Whether repeating the request may succeed.
        retriable: bool,
    },
    /// The request was withdrawn before completion. Never delivered to the requester.
    #[error("request canceled")]
    Canceled,
}

impl ResponseError {
    /// Creates a network error that is worth retrying.
    pub fn retriable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retriable: true,
        }
    }

    /// Creates a network error that will not go away on retry.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retriable: false,
        }
    }

    /// Returns true if repeating the request may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Network { retriable: true, .. })
    }
}

/// Immutable result of loading a [`Resource`](super::Resource).
///
/// A response either carries the loaded bytes or the reason of the failure. It is never changed
/// after creation, and is shared between all requesters of the same resource through an `Arc`.
/// A response with data is a success even if the data later turns out to be malformed.
#[derive(Debug, Clone)]
pub struct Response {
    result: Result<Bytes, ResponseError>,
    etag: Option<String>,
    expires: Option<SystemTime>,
    modified: Option<SystemTime>,
    not_modified: bool,
}

impl Response {
    /// Successful response with the given payload.
    pub fn data(data: impl Into<Bytes>) -> Self {
        Self::from_result(Ok(data.into()))
    }

    /// Failed response.
    pub fn error(error: ResponseError) -> Self {
        Self::from_result(Err(error))
    }

    /// Response of a conditional request telling that the previously loaded data is still valid.
    ///
    /// Such responses are merged with the cached ones and are never delivered to requesters.
    pub fn not_modified() -> Self {
        Self {
            not_modified: true,
            ..Self::from_result(Ok(Bytes::new()))
        }
    }

    fn from_result(result: Result<Bytes, ResponseError>) -> Self {
        Self {
            result,
            etag: None,
            expires: None,
            modified: None,
            not_modified: false,
        }
    }

    /// Sets the entity tag of the response.
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Sets the time after which the response must be revalidated.
    pub fn with_expires(mut self, expires: SystemTime) -> Self {
        self.expires = Some(expires);
        self
    }

    /// Sets the last modification time of the resource.
    pub fn with_modified(mut self, modified: SystemTime) -> Self {
        self.modified = Some(modified);
        self
    }

    /// Loaded payload or the failure reason.
    pub fn result(&self) -> Result<&Bytes, &ResponseError> {
        self.result.as_ref()
    }

    /// Loaded payload, if the response is successful.
    pub fn bytes(&self) -> Option<&Bytes> {
        self.result.as_ref().ok()
    }

    /// Failure reason, if the response is a failure.
    pub fn failure(&self) -> Option<&ResponseError> {
        self.result.as_ref().err()
    }

    /// Returns true if the response carries data.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Entity tag of the response.
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Expiration time of the response.
    pub fn expires(&self) -> Option<SystemTime> {
        self.expires
    }

    /// Last modification time of the resource.
    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    /// Returns true for a response of a conditional request confirming the cached data.
    pub fn is_not_modified(&self) -> bool {
        self.not_modified
    }

    /// Returns true if the response has an expiration time that is not after `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }

    /// Size of the payload in bytes.
    pub fn payload_size(&self) -> usize {
        self.bytes().map(Bytes::len).unwrap_or(0)
    }

    /// Combines the data of the `prior` response with the validity information of a not modified
    /// response.
    pub(crate) fn revalidated(prior: &Response, not_modified: &Response) -> Response {
        Response {
            result: prior.result.clone(),
            etag: not_modified.etag.clone().or_else(|| prior.etag.clone()),
            expires: not_modified.expires,
            modified: not_modified.modified.or(prior.modified),
            not_modified: false,
        }
    }
}
