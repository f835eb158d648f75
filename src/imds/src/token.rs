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

//! IMDSv2 session tokens.

use crate::Result;
use crate::clock::Clock;
use crate::constants::{TOKEN_HEADER, TOKEN_PATH, TOKEN_TTL_HEADER};
use crate::endpoint::Endpoint;
use crate::errors::Error;
use crate::transport::HttpTransport;
use bytes::Bytes;
use http::{HeaderValue, Method, Request};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A session token for the metadata service.
#[derive(Clone, PartialEq)]
pub struct Token {
    /// The opaque token value.
    ///
    /// This is the value sent in the `x-aws-ec2-metadata-token` header.
    pub value: String,

    /// The instant at which the token expires.
    ///
    /// Note that the `Instant` is not valid across processes.
    pub expires_at: Instant,
}

impl Token {
    /// Returns `true` if the token has not expired at `now`.
    pub fn is_valid_at(&self, now: Instant) -> bool {
        self.expires_at > now
    }

    /// The header carrying this token on metadata requests.
    pub(crate) fn header(&self) -> Result<(&'static str, HeaderValue)> {
        let mut value = HeaderValue::from_str(&self.value)
            .map_err(|e| Error::token_acquisition(false, "invalid session token", e))?;
        value.set_sensitive(true);
        Ok((TOKEN_HEADER, value))
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("value", &"[censored]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait::async_trait]
pub(crate) trait TokenProvider: std::fmt::Debug + Send + Sync {
    async fn token(&self) -> Result<Token>;
}

/// Acquires session tokens from the metadata service.
#[derive(Debug)]
pub(crate) struct ImdsTokenProvider {
    endpoint: Endpoint,
    ttl: Duration,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
}

impl ImdsTokenProvider {
    pub(crate) fn new(
        endpoint: Endpoint,
        ttl: Duration,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            endpoint,
            ttl,
            transport,
            clock,
        }
    }

    fn request(&self) -> Result<Request<Bytes>> {
        Request::builder()
            .method(Method::PUT)
            .uri(self.endpoint.url(TOKEN_PATH))
            .header(TOKEN_TTL_HEADER, self.ttl.as_secs())
            .body(Bytes::new())
            .map_err(|e| Error::token_acquisition(false, "cannot create token request", e))
    }
}

#[async_trait::async_trait]
impl TokenProvider for ImdsTokenProvider {
    async fn token(&self) -> Result<Token> {
        let request = self.request()?;
        // Measure the lifetime from the moment the request is made, the
        // service starts the clock when it receives the request.
        let start = self.clock.now();
        tracing::debug!(endpoint = %self.endpoint, ttl = self.ttl.as_secs(), "fetching session token");

        let response = self
            .transport
            .send(request)
            .await
            .map_err(Error::token_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = String::from_utf8_lossy(response.body()).into_owned();
            return Err(Error::token_acquisition_status(status, body));
        }

        // The service may shorten the lifetime, never extend it.
        let ttl = response
            .headers()
            .get(TOKEN_TTL_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| std::cmp::min(self.ttl, Duration::from_secs(secs)))
            .unwrap_or(self.ttl);

        let value = String::from_utf8(response.into_body().to_vec())
            .map_err(|e| Error::token_acquisition(false, "session token is not valid UTF-8", e))?;
        if value.is_empty() {
            return Err(Error::token_acquisition(
                false,
                "session token is empty",
                std::io::Error::other("empty response body"),
            ));
        }
        // A token that cannot be sent back must never reach the cache.
        if let Err(e) = HeaderValue::from_str(&value) {
            return Err(Error::token_acquisition(
                false,
                "session token is not a valid header value",
                e,
            ));
        }

        Ok(Token {
            value,
            expires_at: start + ttl,
        })
    }
}
