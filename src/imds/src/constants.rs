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

use std::time::Duration;

pub(crate) const TOKEN_PATH: &str = "/latest/api/token";
/// Requested (and returned) session token lifetime, in seconds.
pub(crate) const TOKEN_TTL_HEADER: &str = "x-aws-ec2-metadata-token-ttl-seconds";
pub(crate) const TOKEN_HEADER: &str = "x-aws-ec2-metadata-token";

pub(crate) const ENDPOINT_MODE_ENV_VAR: &str = "AWS_EC2_METADATA_SERVICE_ENDPOINT_MODE";
pub(crate) const ENDPOINT_ENV_VAR: &str = "AWS_EC2_METADATA_SERVICE_ENDPOINT";

pub(crate) const IPV4_HOST: &str = "169.254.169.254";
pub(crate) const IPV6_HOST: &str = "[fd00:ec2::254]";

pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;
/// The service rejects tokens with longer lifetimes.
pub(crate) const MAX_TOKEN_TTL: Duration = Duration::from_secs(21600);
pub(crate) const MIN_TOKEN_TTL: Duration = Duration::from_secs(1);
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub(crate) const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);
