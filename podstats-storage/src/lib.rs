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

//! Podstats Storage
//!
//! Redirect log partitions and blob storage:
//!
//! - [`RedirectLogStore`]: packed records ordered by timestamp id, with one
//!   secondary index per queryable field
//! - [`Journal`]: optional durable append log behind each partition
//! - [`PartitionRegistry`]: name to partition mapping, one lock per partition
//! - [`BlobStore`]: streamed blob reads and exact-length writes

pub mod blobs;
pub mod journal;
pub mod partition;
pub mod redirect_log;
pub mod secondary_index;

pub use blobs::{read_blob, reader_from_chunks, BlobReader, BlobStore, FsBlobs, MemoryBlobs};
pub use journal::{Journal, JournalContents};
pub use partition::{PartitionConfig, PartitionRegistry};
pub use redirect_log::{FieldFilter, LogEntry, LogQuery, RedirectLogStore};
pub use secondary_index::{IndexField, IndexSet, KeyBounds, SecondaryIndex};
