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

//! Instance Metadata Service (IMDS) client.
//!
//! Cloud compute instances expose a local, unauthenticated HTTP endpoint with
//! information about the host: its identity, network configuration, and
//! similar data. The token-gated version of this protocol (IMDSv2) requires a
//! short-lived session token on every metadata request.
//!
//! This crate contains a [Client][client::Client] that hides the session
//! token lifecycle. Applications call [get][client::Client::get] with a
//! metadata path, and the client acquires, caches, and refreshes the session
//! token as needed.
//!
//! The client never falls back to the unauthenticated (IMDSv1) protocol. If a
//! session token cannot be obtained the request fails.
//!
//! # Example
//! ```no_run
//! # use cloud_imds::client::Client;
//! # tokio_test::block_on(async {
//! let client = Client::builder().build()?;
//! let ami = client.get("/latest/meta-data/ami-id").await?;
//! println!("running on {ami}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod build_errors;
pub mod client;
pub mod clock;
pub mod endpoint;
pub mod errors;
pub mod token;
pub mod transport;

pub(crate) mod constants;
pub(crate) mod pipeline;
pub(crate) mod token_cache;

/// A `Result` alias where the `Err` case is `cloud_imds::errors::Error`.
pub type Result<T> = std::result::Result<T, crate::errors::Error>;
