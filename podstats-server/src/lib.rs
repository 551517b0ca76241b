// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Podstats Server
//!
//! The RPC backend that owns the redirect log partitions, the registry and
//! key server, the in-process transport to it, and the redirect logger.

pub mod backend;
pub mod config;
pub mod key_server;
pub mod redirect;
pub mod registry;
pub mod transport;

pub use backend::{Backend, Signal};
pub use config::PodstatsConfig;
pub use redirect::{FlushOutcome, RedirectLogger};
pub use transport::LocalTransport;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with `RUST_LOG`, defaulting to `podstats=info`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "podstats=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
