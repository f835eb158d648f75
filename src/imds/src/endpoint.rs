// Copyright 2026 Google LLC
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

//! Metadata service endpoints.
//!
//! The metadata service listens on two well-known link-local addresses, one
//! for IPv4 and one for IPv6. Applications can select either address with an
//! [EndpointMode], or point the client to a custom [Endpoint], typically a
//! local emulator used in tests.

use crate::build_errors::Error as BuildError;
use crate::constants::{ENDPOINT_ENV_VAR, ENDPOINT_MODE_ENV_VAR, IPV4_HOST, IPV6_HOST};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

type BuildResult<T> = std::result::Result<T, BuildError>;

/// The base URL of a metadata service.
///
/// Contains only the scheme, host, and optional port. The metadata path is
/// appended to this base on each request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl Endpoint {
    /// Parses and validates a custom endpoint.
    ///
    /// The URL must use the `http` or `https` scheme, must have a host, and
    /// must not carry a path (other than `/`), query, or fragment.
    ///
    /// ```
    /// # use cloud_imds::endpoint::Endpoint;
    /// let endpoint = Endpoint::parse("http://localhost:8080")?;
    /// assert_eq!(endpoint.to_string(), "http://localhost:8080");
    /// # Ok::<(), cloud_imds::build_errors::Error>(())
    /// ```
    pub fn parse(url: &str) -> BuildResult<Self> {
        let parsed = url::Url::parse(url).map_err(BuildError::invalid_endpoint)?;
        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(BuildError::invalid_endpoint(format!(
                    "unsupported scheme `{scheme}` in `{url}`"
                )));
            }
        };
        let host = match parsed.host() {
            None => {
                return Err(BuildError::invalid_endpoint(format!(
                    "missing host in `{url}`"
                )));
            }
            Some(url::Host::Ipv6(addr)) => format!("[{addr}]"),
            Some(host) => host.to_string(),
        };
        if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
            return Err(BuildError::invalid_endpoint(format!(
                "the endpoint `{url}` must not include a path, query, or fragment"
            )));
        }
        Ok(Self {
            scheme: parsed.scheme().to_string(),
            host,
            port: parsed.port(),
        })
    }

    /// The URL scheme, always `http` for the well-known endpoints.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The host, IPv6 addresses are enclosed in brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Returns the full URL for `path`.
    pub(crate) fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{self}{path}")
        } else {
            format!("{self}/{path}")
        }
    }

    fn well_known(host: &str) -> Self {
        Self {
            scheme: "http".to_string(),
            host: host.to_string(),
            port: None,
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.port {
            None => write!(f, "{}://{}", self.scheme, self.host),
            Some(port) => write!(f, "{}://{}:{port}", self.scheme, self.host),
        }
    }
}

/// Selects one of the well-known metadata service addresses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EndpointMode {
    /// `http://169.254.169.254`
    #[default]
    IPv4,
    /// `http://[fd00:ec2::254]`
    IPv6,
}

impl EndpointMode {
    /// The fixed endpoint for this mode.
    pub fn endpoint(&self) -> Endpoint {
        match self {
            Self::IPv4 => Endpoint::well_known(IPV4_HOST),
            Self::IPv6 => Endpoint::well_known(IPV6_HOST),
        }
    }
}

impl FromStr for EndpointMode {
    type Err = BuildError;

    /// Parses `ipv4` or `ipv6`, ignoring case.
    fn from_str(s: &str) -> BuildResult<Self> {
        match s.trim() {
            m if m.eq_ignore_ascii_case("ipv4") => Ok(Self::IPv4),
            m if m.eq_ignore_ascii_case("ipv6") => Ok(Self::IPv6),
            _ => Err(BuildError::unknown_mode(s)),
        }
    }
}

/// Where the client sends its requests.
///
/// Exactly one configuration source is active for each client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum EndpointConfiguration {
    /// Use the environment to select the endpoint.
    ///
    /// If `AWS_EC2_METADATA_SERVICE_ENDPOINT` is set it is used as a custom
    /// endpoint. Otherwise `AWS_EC2_METADATA_SERVICE_ENDPOINT_MODE` selects
    /// the mode, and the IPv4 endpoint is used when neither is set.
    #[default]
    Default,
    /// Use this endpoint.
    Custom(Endpoint),
    /// Use the well-known endpoint for this mode.
    ModeOverride(EndpointMode),
}

impl EndpointConfiguration {
    /// Resolves the endpoint for this configuration.
    ///
    /// This never performs network I/O. Only the `Default` configuration
    /// consults the process environment.
    pub fn resolve(&self) -> BuildResult<Endpoint> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Resolves the endpoint using `lookup` to query environment variables.
    pub(crate) fn resolve_with<F>(&self, lookup: F) -> BuildResult<Endpoint>
    where
        F: Fn(&str) -> Option<String>,
    {
        match self {
            Self::Custom(endpoint) => Ok(endpoint.clone()),
            Self::ModeOverride(mode) => Ok(mode.endpoint()),
            Self::Default => {
                if let Some(url) = lookup(ENDPOINT_ENV_VAR).filter(|v| !v.is_empty()) {
                    return Endpoint::parse(&url);
                }
                match lookup(ENDPOINT_MODE_ENV_VAR).filter(|v| !v.is_empty()) {
                    Some(mode) => Ok(mode.parse::<EndpointMode>()?.endpoint()),
                    None => Ok(EndpointMode::IPv4.endpoint()),
                }
            }
        }
    }
}

impl From<Endpoint> for EndpointConfiguration {
    fn from(value: Endpoint) -> Self {
        Self::Custom(value)
    }
}

impl From<EndpointMode> for EndpointConfiguration {
    fn from(value: EndpointMode) -> Self {
        Self::ModeOverride(value)
    }
}
