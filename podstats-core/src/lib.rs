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

//! Podstats Core
//!
//! Fundamental data structures for the redirect log: attribute numbering
//! and record packing, raw redirect events, timestamp ids, and the RPC
//! model shared by partitions and their callers.

pub mod att_nums;
pub mod client;
pub mod error;
pub mod event;
pub mod hashing;
pub mod key;
pub mod range_header;
pub mod record;
pub mod rpc;
pub mod timestamp;
pub mod urls;

pub use att_nums::{AttNums, AttributeSet};
pub use client::{RpcClient, RpcTransport};
pub use error::{PodstatsError, Result, INTERNAL_ERROR_MESSAGE};
pub use event::{attributes, RawRedirectEvent, RecordContext};
pub use key::{TimestampId, TimestampIdGenerator};
pub use record::Record;
pub use rpc::{
    partition_names, AlarmPayload, KeyKind, LogMetrics, PackedRedirectLogs, PartitionChange,
    PartitionInfo, QueryRedirectLogsRequest, RebuildIndexResult, RpcRequest, RpcResponse,
};
