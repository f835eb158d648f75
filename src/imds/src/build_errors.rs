// Copyright 2025 Google LLC
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

//! Errors created during client construction.
//!
//! All configuration problems are detected when the client is built, or when
//! an [EndpointMode][crate::endpoint::EndpointMode] is parsed. They are never
//! retried.

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type for [Client][crate::client::Client] builders.
///
/// Applications rarely need to create instances of this error type. The
/// exception might be when testing application code, where the application is
/// mocking a client library behavior.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    /// The custom endpoint is not a valid metadata service URL.
    pub fn is_invalid_endpoint(&self) -> bool {
        matches!(self.0, ErrorKind::InvalidEndpoint(_))
    }

    /// The endpoint mode name is not recognized.
    pub fn is_unknown_mode(&self) -> bool {
        matches!(self.0, ErrorKind::UnknownMode(_))
    }

    /// The session token TTL is outside the range accepted by the service.
    pub fn is_invalid_token_ttl(&self) -> bool {
        matches!(self.0, ErrorKind::InvalidTokenTtl(_))
    }

    /// The default transport could not be created.
    pub fn is_transport(&self) -> bool {
        matches!(self.0, ErrorKind::Transport(_))
    }

    pub(crate) fn invalid_endpoint<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::InvalidEndpoint(source.into()))
    }

    pub(crate) fn unknown_mode<T: Into<String>>(mode: T) -> Error {
        Error(ErrorKind::UnknownMode(mode.into()))
    }

    pub(crate) fn invalid_token_ttl(ttl: std::time::Duration) -> Error {
        Error(ErrorKind::InvalidTokenTtl(ttl))
    }

    pub(crate) fn transport<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::Transport(source.into()))
    }
}

#[derive(thiserror::Error, Debug)]
enum ErrorKind {
    #[error("invalid metadata service endpoint: {0}")]
    InvalidEndpoint(#[source] BoxError),
    #[error("unknown endpoint mode `{0}`, expected `IPv4` or `IPv6`")]
    UnknownMode(String),
    #[error("token TTL must be between 1 and 21600 seconds, got {0:?}")]
    InvalidTokenTtl(std::time::Duration),
    #[error("cannot create the HTTP transport: {0}")]
    Transport(#[source] BoxError),
}
