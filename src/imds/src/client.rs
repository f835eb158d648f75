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

//! The metadata service client.
//!
//! Compute instances provide a metadata service. This is a local service to
//! the VM which (as the name implies) provides metadata information about the
//! VM: its image, instance id, network interfaces, and so on. Each metadata
//! request requires a session token, which the [Client] obtains and refreshes
//! automatically.
//!
//! Example usage:
//!
//! ```no_run
//! # use cloud_imds::client::Client;
//! # use cloud_imds::endpoint::EndpointMode;
//! # tokio_test::block_on(async {
//! let client = Client::builder()
//!     .with_endpoint_mode(EndpointMode::IPv6)
//!     .with_max_retries(5)
//!     .build()?;
//! let instance_id = client.get("/latest/meta-data/instance-id").await?;
//! println!("instance id: {instance_id}");
//! client.close();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

use crate::Result;
use crate::build_errors::Error as BuildError;
use crate::clock::{Clock, SystemClock};
use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_READ_TIMEOUT, MAX_TOKEN_TTL,
    MIN_TOKEN_TTL,
};
use crate::endpoint::{Endpoint, EndpointConfiguration, EndpointMode};
use crate::errors::Error;
use crate::pipeline::Pipeline;
use crate::token::ImdsTokenProvider;
use crate::token_cache::TokenCache;
use crate::transport::{HttpTransport, ReqwestTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

type BuildResult<T> = std::result::Result<T, BuildError>;

/// A client for the Instance Metadata Service (IMDSv2).
///
/// The client is cheap to clone, clones share the session token, the
/// transport, and the closed state. It is safe to use the client from many
/// tasks at the same time. Concurrent requests share a single session token
/// refresh.
///
/// Metadata values are never cached, each call to [get][Client::get] sends a
/// new request.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    endpoint: Endpoint,
    pipeline: Pipeline,
    transport: Arc<dyn HttpTransport>,
    closed: watch::Sender<bool>,
}

impl Client {
    /// Returns a builder with the default configuration.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Fetches the metadata value at `path`.
    ///
    /// The path is relative to the service root, for example
    /// `/latest/meta-data/ami-id`. Returns the response body as text.
    ///
    /// Token rejections (HTTP 401 and 403) and transport failures are retried
    /// up to the configured budget. Other HTTP errors are returned
    /// immediately, use [Error::http_status_code] to inspect them.
    ///
    /// Dropping the returned future cancels the request.
    pub async fn get(&self, path: &str) -> Result<String> {
        let mut closed = self.inner.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(Error::closed());
        }
        tokio::select! {
            result = self.inner.pipeline.fetch(path) => result,
            _ = closed.wait_for(|c| *c) => Err(Error::closed()),
        }
    }

    /// The resolved metadata service endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Closes the client and releases the transport.
    ///
    /// Closing affects all clones. Requests in progress fail, and any new
    /// calls to [get][Client::get] fail with an error where
    /// [is_closed][Error::is_closed] returns `true`. Closing an already
    /// closed client has no effect.
    pub fn close(&self) {
        if self.inner.closed.send_replace(true) {
            return;
        }
        tracing::debug!(endpoint = %self.inner.endpoint, "closing metadata client");
        self.inner.transport.shutdown();
    }

    /// Returns `true` if [close][Client::close] was called.
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }
}

/// Configures and creates a [Client].
///
/// The defaults are suitable for most applications:
/// * up to 3 attempts per request,
/// * session tokens valid for 6 hours (the maximum),
/// * one second connect and read timeouts,
/// * the endpoint is selected from the environment, using IPv4 by default.
#[derive(Debug)]
pub struct Builder {
    max_retries: u32,
    endpoint: EndpointSource,
    token_ttl: Duration,
    connect_timeout: Duration,
    read_timeout: Duration,
    clock: Option<Arc<dyn Clock>>,
    transport: Option<Arc<dyn HttpTransport>>,
}

#[derive(Debug)]
enum EndpointSource {
    Configuration(EndpointConfiguration),
    // Validated when the client is built.
    Url(String),
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            endpoint: EndpointSource::Configuration(EndpointConfiguration::Default),
            token_ttl: MAX_TOKEN_TTL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            clock: None,
            transport: None,
        }
    }
}

impl Builder {
    /// Sets the maximum number of attempts for each request.
    ///
    /// An attempt includes obtaining a session token (if needed) and sending
    /// the metadata request. A value of `0` is treated as `1`, a single
    /// attempt without retries.
    pub fn with_max_retries(mut self, v: u32) -> Self {
        self.max_retries = v;
        self
    }

    /// Sets the endpoint configuration.
    ///
    /// This replaces any endpoint set with
    /// [with_endpoint][Builder::with_endpoint] or
    /// [with_endpoint_mode][Builder::with_endpoint_mode].
    pub fn with_endpoint_configuration<T: Into<EndpointConfiguration>>(mut self, v: T) -> Self {
        self.endpoint = EndpointSource::Configuration(v.into());
        self
    }

    /// Sends all requests to a custom endpoint, e.g. `http://localhost:8080`.
    ///
    /// The URL is validated by [build][Builder::build].
    pub fn with_endpoint<T: Into<String>>(mut self, v: T) -> Self {
        self.endpoint = EndpointSource::Url(v.into());
        self
    }

    /// Sends all requests to the well-known endpoint for `mode`.
    pub fn with_endpoint_mode(mut self, mode: EndpointMode) -> Self {
        self.endpoint = EndpointSource::Configuration(EndpointConfiguration::ModeOverride(mode));
        self
    }

    /// Sets the requested session token lifetime.
    ///
    /// Must be between 1 second and 6 hours, the value is truncated to whole
    /// seconds.
    pub fn with_token_ttl(mut self, v: Duration) -> Self {
        self.token_ttl = v;
        self
    }

    /// Sets the connect timeout for the default transport.
    pub fn with_connect_timeout(mut self, v: Duration) -> Self {
        self.connect_timeout = v;
        self
    }

    /// Sets the read timeout for the default transport.
    pub fn with_read_timeout(mut self, v: Duration) -> Self {
        self.read_timeout = v;
        self
    }

    /// Replaces the clock used to compute token expiration.
    ///
    /// Only intended for tests.
    pub fn with_clock<T: Clock + 'static>(mut self, v: T) -> Self {
        self.clock = Some(Arc::new(v));
        self
    }

    /// Replaces the HTTP transport.
    ///
    /// Only intended for tests. The connect and read timeouts are ignored
    /// when a custom transport is used.
    pub fn with_transport<T: HttpTransport + 'static>(mut self, v: T) -> Self {
        self.transport = Some(Arc::new(v));
        self
    }

    /// Validates the configuration and creates the client.
    ///
    /// No requests are sent until the first call to [get][Client::get].
    pub fn build(self) -> BuildResult<Client> {
        let endpoint = match self.endpoint {
            EndpointSource::Configuration(c) => c.resolve()?,
            EndpointSource::Url(url) => Endpoint::parse(&url)?,
        };
        if self.token_ttl < MIN_TOKEN_TTL || self.token_ttl > MAX_TOKEN_TTL {
            return Err(BuildError::invalid_token_ttl(self.token_ttl));
        }
        // Truncate, the service only accepts whole seconds.
        let token_ttl = Duration::from_secs(self.token_ttl.as_secs());
        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(ReqwestTransport::new(
                self.connect_timeout,
                self.read_timeout,
            )?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let provider = ImdsTokenProvider::new(
            endpoint.clone(),
            token_ttl,
            transport.clone(),
            clock.clone(),
        );
        let tokens = TokenCache::new(Arc::new(provider), clock);
        let pipeline = Pipeline::new(
            endpoint.clone(),
            tokens,
            transport.clone(),
            self.max_retries,
        );
        tracing::debug!(%endpoint, max_retries = self.max_retries, "created metadata client");

        let (closed, _) = watch::channel(false);
        Ok(Client {
            inner: Arc::new(ClientInner {
                endpoint,
                pipeline,
                transport,
                closed,
            }),
        })
    }
}
