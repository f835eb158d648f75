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

//! The HTTP transport used to reach the metadata service.
//!
//! The client sends all its requests through an [HttpTransport]. The default
//! implementation, [ReqwestTransport], uses short connect and read timeouts.
//! The metadata service is local to the instance, a slow response most likely
//! means there is no metadata service at all.
//!
//! Applications rarely need to implement this trait. The main use case is
//! testing application code without a metadata service.

use crate::Result;
use crate::build_errors::Error as BuildError;
use crate::errors::Error;
use bytes::Bytes;
use http::{Request, Response};
use std::time::Duration;

type BuildResult<T> = std::result::Result<T, BuildError>;

/// Sends HTTP requests to the metadata service.
#[async_trait::async_trait]
pub trait HttpTransport: std::fmt::Debug + Send + Sync {
    /// Sends `request` and returns the full response.
    ///
    /// Implementations should return an error created with
    /// [Error][crate::errors::Error] transport constructors only when no
    /// response was received. Any HTTP status, including errors, is a
    /// successful result for this function.
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>>;

    /// Releases any resources held by the transport.
    ///
    /// The client calls this exactly once, when it is closed.
    fn shutdown(&self) {}
}

/// An [HttpTransport] based on [reqwest].
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with the given connect and read timeouts.
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> BuildResult<Self> {
        let inner = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            // The metadata service is link-local, proxies cannot reach it.
            .no_proxy()
            .build()
            .map_err(BuildError::transport)?;
        Ok(Self { inner })
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let (parts, body) = request.into_parts();
        let response = self
            .inner
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .body(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    fn shutdown(&self) {
        // Pooled connections close when the last clone of `inner` is dropped.
        tracing::debug!("metadata transport shut down");
    }
}

fn map_reqwest_error(e: reqwest::Error) -> Error {
    Error::transport(e.is_timeout(), e)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use httptest::{Expectation, Server, matchers::*, responders::*};

    // Used by tests in other modules.
    mockall::mock! {
        #[derive(Debug)]
        pub Transport { }

        #[async_trait::async_trait]
        impl HttpTransport for Transport {
            async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>>;
            fn shutdown(&self);
        }
    }

    fn transport() -> ReqwestTransport {
        ReqwestTransport::new(Duration::from_secs(1), Duration::from_secs(1)).unwrap()
    }

    #[tokio::test]
    async fn send_success() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method("GET"),
                request::path("/latest/meta-data/ami-id"),
                request::headers(contains(("x-aws-ec2-metadata-token", "T1".to_string()))),
            ])
            .respond_with(
                status_code(200)
                    .insert_header("x-test-only", "value")
                    .body("ami-0abc"),
            ),
        );

        let request = Request::builder()
            .method(http::Method::GET)
            .uri(format!("http://{}/latest/meta-data/ami-id", server.addr()))
            .header("x-aws-ec2-metadata-token", "T1")
            .body(Bytes::new())
            .unwrap();
        let response = transport().send(request).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(
            response.headers().get("x-test-only").map(|v| v.as_bytes()),
            Some(b"value".as_slice())
        );
        assert_eq!(response.body().as_ref(), b"ami-0abc");
    }

    #[tokio::test]
    async fn send_error_status_is_not_an_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/missing"))
                .respond_with(status_code(404).body("Not Found")),
        );

        let request = Request::builder()
            .uri(format!("http://{}/missing", server.addr()))
            .body(Bytes::new())
            .unwrap();
        let response = transport().send(request).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn send_connection_refused() {
        // Bind and immediately drop a listener to find a closed port.
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let request = Request::builder()
            .uri(format!("http://{addr}/latest/meta-data"))
            .body(Bytes::new())
            .unwrap();
        let err = transport().send(request).await.unwrap_err();
        assert!(err.is_transport(), "{err:?}");
        assert!(err.is_retryable(), "{err:?}");
    }

    #[tokio::test]
    async fn send_read_timeout() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/slow")).respond_with(delay_and_then(
                Duration::from_millis(500),
                status_code(200).body("too late"),
            )),
        );

        let transport =
            ReqwestTransport::new(Duration::from_secs(1), Duration::from_millis(50)).unwrap();
        let request = Request::builder()
            .uri(format!("http://{}/slow", server.addr()))
            .body(Bytes::new())
            .unwrap();
        let err = transport.send(request).await.unwrap_err();
        assert!(err.is_transport(), "{err:?}");
        assert!(err.is_retryable(), "{err:?}");
    }
}
