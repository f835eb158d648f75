// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Errors returned by the metadata [Client][crate::client::Client].

use http::StatusCode;
use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

type ArcError = Arc<dyn StdError + Send + Sync + 'static>;

/// Represents an error fetching a session token or a metadata value.
///
/// The error is cheap to clone. A single failed token acquisition is reported
/// to every caller waiting for it, each receiving a clone of the same error.
///
/// Most applications will just return the error or log it. Applications that
/// need to distinguish a missing metadata path from other failures can query
/// the HTTP status code:
///
/// ```
/// # use cloud_imds::errors::Error;
/// fn instance_tags(result: Result<String, Error>) -> Result<Option<String>, Error> {
///     match result {
///         Ok(tags) => Ok(Some(tags)),
///         Err(e) if e.http_status_code() == Some(404) => Ok(None),
///         Err(e) => Err(e),
///     }
/// }
/// ```
#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    source: Option<ArcError>,
}

#[derive(Clone, Debug)]
enum ErrorKind {
    TokenAcquisition {
        status: Option<StatusCode>,
        retryable: bool,
    },
    Metadata(StatusCode),
    Transport {
        timeout: bool,
    },
    Decode,
    InvalidPath,
    Exhausted {
        attempts: u32,
    },
    Closed,
}

impl Error {
    /// The session token could not be obtained.
    ///
    /// The source, if any, contains the underlying transport error.
    pub fn is_token_acquisition(&self) -> bool {
        matches!(self.kind, ErrorKind::TokenAcquisition { .. })
    }

    /// The metadata service rejected the metadata request.
    ///
    /// Use [http_status_code][Self::http_status_code] to find out why. A
    /// `404` means the path is not present on this instance.
    pub fn is_metadata(&self) -> bool {
        matches!(self.kind, ErrorKind::Metadata(_))
    }

    /// The request could not be sent, or no response was received.
    pub fn is_transport(&self) -> bool {
        matches!(self.kind, ErrorKind::Transport { .. })
    }

    /// The request did not complete before the connect or read timeout.
    ///
    /// The metadata service is local to the instance and responds in a few
    /// milliseconds. Timeouts typically indicate that the application is not
    /// running in an environment with a metadata service.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Transport { timeout: true })
    }

    /// The response body is not valid UTF-8 text.
    pub fn is_decode(&self) -> bool {
        matches!(self.kind, ErrorKind::Decode)
    }

    /// The metadata path cannot be used in a request URL.
    ///
    /// No request was sent, there is no HTTP status code.
    pub fn is_invalid_path(&self) -> bool {
        matches!(self.kind, ErrorKind::InvalidPath)
    }

    /// The retry budget was exhausted.
    ///
    /// The [source][StdError::source] contains the error from the last
    /// attempt.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.kind, ErrorKind::Exhausted { .. })
    }

    /// The client was closed before or during the request.
    pub fn is_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::Closed)
    }

    /// Returns `true` if a new attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            ErrorKind::TokenAcquisition { retryable, .. } => *retryable,
            ErrorKind::Metadata(status) => is_token_rejection(*status),
            ErrorKind::Transport { .. } => true,
            ErrorKind::Decode
            | ErrorKind::InvalidPath
            | ErrorKind::Exhausted { .. }
            | ErrorKind::Closed => false,
        }
    }

    /// The HTTP status code returned by the metadata service, if any.
    ///
    /// For exhausted retry loops this is the status code of the last attempt.
    pub fn http_status_code(&self) -> Option<u16> {
        match &self.kind {
            ErrorKind::TokenAcquisition { status, .. } => status.map(|s| s.as_u16()),
            ErrorKind::Metadata(status) => Some(status.as_u16()),
            ErrorKind::Exhausted { .. } => self
                .source
                .as_ref()
                .and_then(|s| s.downcast_ref::<Error>())
                .and_then(Error::http_status_code),
            ErrorKind::Transport { .. }
            | ErrorKind::Decode
            | ErrorKind::InvalidPath
            | ErrorKind::Closed => None,
        }
    }

    /// A human readable description of the problem.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The number of attempts made before giving up, if the retry budget was
    /// exhausted.
    pub fn attempts(&self) -> Option<u32> {
        match &self.kind {
            ErrorKind::Exhausted { attempts } => Some(*attempts),
            _ => None,
        }
    }

    pub(crate) fn token_acquisition_status<T: Into<String>>(status: StatusCode, body: T) -> Self {
        Self {
            kind: ErrorKind::TokenAcquisition {
                status: Some(status),
                retryable: is_retryable_status(status),
            },
            message: format!(
                "failed to fetch session token, status: {status}, body: {}",
                body.into()
            ),
            source: None,
        }
    }

    pub(crate) fn token_acquisition<T>(retryable: bool, message: &str, source: T) -> Self
    where
        T: StdError + Send + Sync + 'static,
    {
        Self {
            kind: ErrorKind::TokenAcquisition {
                status: None,
                retryable,
            },
            message: message.to_string(),
            source: Some(Arc::new(source)),
        }
    }

    /// A session token acquisition that failed in the transport.
    ///
    /// The transport error is kept as the source so callers can still detect
    /// timeouts.
    pub(crate) fn token_transport(source: Error) -> Self {
        Self {
            kind: ErrorKind::TokenAcquisition {
                status: None,
                retryable: true,
            },
            message: "failed to fetch session token".to_string(),
            source: Some(Arc::new(source)),
        }
    }

    pub(crate) fn metadata<T: Into<String>>(status: StatusCode, message: T) -> Self {
        Self {
            kind: ErrorKind::Metadata(status),
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error representing a transport failure.
    ///
    /// Custom [HttpTransport][crate::transport::HttpTransport]
    /// implementations use this when no response is received. Set `timeout`
    /// if the request did not complete in time.
    ///
    /// # Example
    /// ```
    /// # use cloud_imds::errors::Error;
    /// let error = Error::transport(true, std::io::Error::other("simulated timeout"));
    /// assert!(error.is_timeout());
    /// assert!(error.is_retryable());
    /// ```
    pub fn transport<T>(timeout: bool, source: T) -> Self
    where
        T: StdError + Send + Sync + 'static,
    {
        Self {
            kind: ErrorKind::Transport { timeout },
            message: "cannot send request to the metadata service".to_string(),
            source: Some(Arc::new(source)),
        }
    }

    pub(crate) fn decode<T>(source: T) -> Self
    where
        T: StdError + Send + Sync + 'static,
    {
        Self {
            kind: ErrorKind::Decode,
            message: "cannot decode the metadata response as UTF-8".to_string(),
            source: Some(Arc::new(source)),
        }
    }

    pub(crate) fn invalid_path<T>(path: &str, source: T) -> Self
    where
        T: StdError + Send + Sync + 'static,
    {
        Self {
            kind: ErrorKind::InvalidPath,
            message: format!("invalid metadata path `{path}`"),
            source: Some(Arc::new(source)),
        }
    }

    pub(crate) fn exhausted(attempts: u32, last: Error) -> Self {
        Self {
            kind: ErrorKind::Exhausted { attempts },
            message: format!("retry budget exhausted after {attempts} attempt(s)"),
            source: Some(Arc::new(last)),
        }
    }

    pub(crate) fn closed() -> Self {
        Self {
            kind: ErrorKind::Closed,
            message: "the metadata client is closed".to_string(),
            source: None,
        }
    }

    /// Returns `true` if the metadata service rejected the session token.
    pub(crate) fn is_token_rejection(&self) -> bool {
        matches!(self.kind, ErrorKind::Metadata(status) if is_token_rejection(status))
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn StdError + 'static))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            None => write!(f, "{}", self.message),
            Some(source) => write!(f, "{}, source: {source}", self.message),
        }
    }
}

/// The metadata service returns these when the session token is missing,
/// expired, or otherwise invalid.
pub(crate) fn is_token_rejection(c: StatusCode) -> bool {
    matches!(c, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
}

pub(crate) fn is_retryable_status(c: StatusCode) -> bool {
    match c {
        // Internal server errors do not indicate that there is anything wrong
        // with our request, so we retry them.
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => true,
        c => c.is_server_error(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(StatusCode::INTERNAL_SERVER_ERROR)]
    #[test_case(StatusCode::BAD_GATEWAY)]
    #[test_case(StatusCode::SERVICE_UNAVAILABLE)]
    #[test_case(StatusCode::REQUEST_TIMEOUT)]
    #[test_case(StatusCode::TOO_MANY_REQUESTS)]
    fn retryable(c: StatusCode) {
        assert!(is_retryable_status(c));
        let e = Error::token_acquisition_status(c, "body");
        assert!(e.is_retryable(), "{e:?}");
    }

    #[test_case(StatusCode::NOT_FOUND)]
    #[test_case(StatusCode::UNAUTHORIZED)]
    #[test_case(StatusCode::FORBIDDEN)]
    #[test_case(StatusCode::BAD_REQUEST)]
    #[test_case(StatusCode::PRECONDITION_FAILED)]
    fn non_retryable(c: StatusCode) {
        assert!(!is_retryable_status(c));
        let e = Error::token_acquisition_status(c, "body");
        assert!(!e.is_retryable(), "{e:?}");
    }

    #[test_case(StatusCode::UNAUTHORIZED, true)]
    #[test_case(StatusCode::FORBIDDEN, true)]
    #[test_case(StatusCode::NOT_FOUND, false)]
    #[test_case(StatusCode::INTERNAL_SERVER_ERROR, false)]
    fn metadata(c: StatusCode, rejection: bool) {
        let e = Error::metadata(c, "test-only");
        assert!(e.is_metadata(), "{e:?}");
        assert_eq!(e.is_token_rejection(), rejection, "{e:?}");
        assert_eq!(e.is_retryable(), rejection, "{e:?}");
        assert_eq!(e.http_status_code(), Some(c.as_u16()));
        assert_eq!(e.message(), "test-only");
    }

    #[test]
    fn transport() {
        let e = Error::transport(true, std::io::Error::other("timed out"));
        assert!(e.is_transport(), "{e:?}");
        assert!(e.is_timeout(), "{e:?}");
        assert!(e.is_retryable(), "{e:?}");
        assert!(e.source().is_some(), "{e:?}");
        assert_eq!(e.http_status_code(), None);

        let e = Error::transport(false, std::io::Error::other("connection refused"));
        assert!(!e.is_timeout(), "{e:?}");
        assert!(e.to_string().contains("connection refused"), "{e}");
    }

    #[test]
    fn exhausted() {
        let last = Error::metadata(StatusCode::FORBIDDEN, "rejected");
        let e = Error::exhausted(3, last);
        assert!(e.is_exhausted(), "{e:?}");
        assert!(!e.is_retryable(), "{e:?}");
        assert_eq!(e.attempts(), Some(3));
        assert_eq!(e.http_status_code(), Some(403));
        let source = e
            .source()
            .and_then(|s| s.downcast_ref::<Error>())
            .expect("source is the last error");
        assert!(source.is_metadata(), "{source:?}");
    }

    #[test]
    fn token_transport() {
        let e = Error::token_transport(Error::transport(true, std::io::Error::other("slow")));
        assert!(e.is_token_acquisition(), "{e:?}");
        assert!(e.is_retryable(), "{e:?}");
        assert_eq!(e.http_status_code(), None);
        assert!(e.to_string().contains("slow"), "{e}");
    }

    #[test]
    fn decode() {
        let source = String::from_utf8(vec![0xff, 0xfe]).unwrap_err();
        let e = Error::decode(source);
        assert!(e.is_decode(), "{e:?}");
        assert!(!e.is_retryable(), "{e:?}");
        assert!(e.source().is_some(), "{e:?}");
    }

    #[test]
    fn invalid_path() {
        let source = "/a b".parse::<http::Uri>().unwrap_err();
        let e = Error::invalid_path("/a b", source);
        assert!(e.is_invalid_path(), "{e:?}");
        assert!(!e.is_metadata(), "{e:?}");
        assert!(!e.is_retryable(), "{e:?}");
        assert_eq!(e.http_status_code(), None);
        assert!(e.message().contains("/a b"), "{e:?}");
    }

    #[test]
    fn closed() {
        let e = Error::closed();
        assert!(e.is_closed(), "{e:?}");
        assert!(!e.is_retryable(), "{e:?}");
        assert!(e.source().is_none(), "{e:?}");
    }

    #[test]
    fn clone_shares_source() {
        let e = Error::transport(false, std::io::Error::other("shared"));
        let clone = e.clone();
        assert_eq!(e.to_string(), clone.to_string());
    }
}
