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

//! Podstats Query
//!
//! Read side of the redirect log: the query endpoint with its export
//! formats, and the hourly and daily download aggregation jobs.

pub mod classifier;
pub mod downloads;
pub mod export;
pub mod redirect_logs;

pub use classifier::{
    PatternClassifier, ShowEpisode, ShowLookup, StaticShowLookup, UserAgentClassifier,
    UserAgentEntity,
};
pub use downloads::{
    compute_daily_downloads, compute_hourly_downloads, DailyResult, HourlyOptions, HourlyResult,
};
pub use export::{export_redirect_logs, ExportFormat};
pub use redirect_logs::{parse_query_params, query_redirect_logs, Permission, QueryResponse};
