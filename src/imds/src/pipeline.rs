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

use crate::Result;
use crate::endpoint::Endpoint;
use crate::errors::{Error, is_token_rejection};
use crate::token::Token;
use crate::token_cache::TokenCache;
use crate::transport::HttpTransport;
use bytes::Bytes;
use http::{Method, Request, Uri};
use std::sync::Arc;

// A failed attempt carries the token it used, if it got that far.
type AttemptResult = std::result::Result<String, (Error, Option<Token>)>;

/// The states of the retry loop around a metadata request.
///
/// Each `Fetching` state is one attempt: obtaining a token (possibly from the
/// cache) and sending the metadata request.
#[derive(Debug)]
enum FetchState {
    Fetching { attempt: u32 },
    // The service rejected `rejected`, the token used in `attempt`.
    Refreshing { attempt: u32, rejected: Token },
    Succeeded(String),
    Failed(Error),
}

/// Sends metadata requests, attaching a valid session token and retrying
/// token rejections and transport failures.
///
/// All retries happen here. Neither the token cache nor the client retry on
/// their own.
#[derive(Clone, Debug)]
pub(crate) struct Pipeline {
    endpoint: Endpoint,
    tokens: TokenCache,
    transport: Arc<dyn HttpTransport>,
    max_attempts: u32,
}

impl Pipeline {
    pub(crate) fn new(
        endpoint: Endpoint,
        tokens: TokenCache,
        transport: Arc<dyn HttpTransport>,
        max_attempts: u32,
    ) -> Self {
        Self {
            endpoint,
            tokens,
            transport,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Fetches `path` and returns the response body.
    pub(crate) async fn fetch(&self, path: &str) -> Result<String> {
        let mut state = FetchState::Fetching { attempt: 1 };
        loop {
            state = match state {
                FetchState::Fetching { attempt } => match self.attempt(path).await {
                    Ok(body) => FetchState::Succeeded(body),
                    Err((e, token)) => self.on_error(path, attempt, e, token),
                },
                FetchState::Refreshing { attempt, rejected } => {
                    self.tokens.invalidate(&rejected);
                    FetchState::Fetching {
                        attempt: attempt + 1,
                    }
                }
                FetchState::Succeeded(body) => return Ok(body),
                FetchState::Failed(e) => return Err(e),
            };
        }
    }

    fn on_error(
        &self,
        path: &str,
        attempt: u32,
        error: Error,
        token: Option<Token>,
    ) -> FetchState {
        if !error.is_retryable() {
            return FetchState::Failed(error);
        }
        let rejected = token.filter(|_| error.is_token_rejection());
        if attempt >= self.max_attempts {
            if let Some(rejected) = &rejected {
                // Do not keep a token the service rejected.
                self.tokens.invalidate(rejected);
            }
            tracing::warn!(path, attempt, "retry budget exhausted: {error}");
            return FetchState::Failed(Error::exhausted(attempt, error));
        }
        tracing::warn!(path, attempt, "metadata request failed, retrying: {error}");
        if let Some(rejected) = rejected {
            FetchState::Refreshing { attempt, rejected }
        } else {
            FetchState::Fetching {
                attempt: attempt + 1,
            }
        }
    }

    async fn attempt(&self, path: &str) -> AttemptResult {
        // Reject bad paths before acquiring a token.
        let uri = self
            .endpoint
            .url(path)
            .parse::<Uri>()
            .map_err(|e| (Error::invalid_path(path, e), None))?;
        let token = self.tokens.token().await.map_err(|e| (e, None))?;
        let result = self.send(uri, path, &token).await;
        result.map_err(|e| (e, Some(token)))
    }

    async fn send(&self, uri: Uri, path: &str, token: &Token) -> Result<String> {
        let (name, value) = token.header()?;
        let mut request = Request::new(Bytes::new());
        *request.method_mut() = Method::GET;
        *request.uri_mut() = uri;
        request.headers_mut().insert(name, value);

        let response = self.transport.send(request).await?;
        let status = response.status();
        if status.is_success() {
            return String::from_utf8(response.into_body().to_vec()).map_err(Error::decode);
        }
        if is_token_rejection(status) {
            return Err(Error::metadata(
                status,
                format!("the metadata service rejected the session token, status: {status}"),
            ));
        }
        Err(Error::metadata(
            status,
            format!("metadata request for `{path}` failed with status: {status}"),
        ))
    }
}
