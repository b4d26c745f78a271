// Copyright 2022 Google LLC
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

//! Renews certbot-managed TLS certificates and distributes them to ACM and
//! the SSM parameter store.
//!
//! The certbot configuration directory is kept between invocations as a
//! tar.gz archive in S3. Each invocation restores it into a private working
//! directory, runs certbot, and pushes the resulting artifacts out to the
//! certificate registry and the secret store. All external systems are
//! reached through the traits collected in [`runtime::Runtime`].

pub mod archive;
pub mod artifacts;
pub mod error;
pub mod identity;
pub mod issuer;
pub mod pattern;
pub mod provision;
pub mod reconciler;
pub mod registry;
pub mod request;
pub mod runtime;
pub mod secrets;
pub mod serde_helpers;

pub use error::ProvisionError;
pub use provision::{handle_event, provision, ProvisionReport, Stage};
pub use request::{ProvisioningEvent, ProvisioningRequest};
pub use runtime::Runtime;
