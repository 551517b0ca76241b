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

//! Redirect log journal
//!
//! Append-only file of packed records, plus a JSON snapshot of the attribute
//! numbering needed to unpack them.
//!
//! # Layout
//!
//! ```text
//! records.log:   MAGIC(4) VERSION(u32 LE) { LEN(u32 LE) DATA(bincode) CRC32(u32 LE) }*
//! att-nums.json: { "name": num, ... }
//! ```
//!
//! Frames that fail their checksum or do not decode are skipped and counted.
//! A truncated tail frame ends replay and is cut off before new frames are
//! appended.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use podstats_core::{PodstatsError, Result, TimestampId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

const JOURNAL_MAGIC: &[u8; 4] = b"PSRL";
const JOURNAL_VERSION: u32 = 1;
const RECORDS_FILE: &str = "records.log";
const ATT_NUMS_FILE: &str = "att-nums.json";

#[derive(Debug, Serialize, Deserialize)]
struct JournalFrame {
    timestamp_id: String,
    packed: String,
}

/// Everything recovered from a journal directory.
#[derive(Debug, Default)]
pub struct JournalContents {
    pub names_to_nums: Option<BTreeMap<String, u32>>,
    pub entries: Vec<(TimestampId, String)>,
    /// Frames skipped during replay
    pub malformed: u64,
}

/// Durable journal for one redirect log partition.
pub struct Journal {
    dir: PathBuf,
    file: File,
    len: u64,
    sync: bool,
}

impl Journal {
    /// Open or create a journal in `dir` and replay its contents.
    pub fn open(dir: impl AsRef<Path>, sync: bool) -> Result<(Self, JournalContents)> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let log_path = dir.join(RECORDS_FILE);
        if !log_path.exists() {
            let mut file = File::create(&log_path)?;
            file.write_all(JOURNAL_MAGIC)?;
            file.write_u32::<LittleEndian>(JOURNAL_VERSION)?;
            file.sync_all()?;
        }

        let (mut contents, valid_len) = Self::replay(&log_path)?;
        contents.names_to_nums = Self::load_att_nums(&dir.join(ATT_NUMS_FILE))?;

        let file = OpenOptions::new().append(true).open(&log_path)?;
        let mut len = file.metadata()?.len();
        if len > valid_len {
            tracing::warn!(
                path = %log_path.display(),
                torn_bytes = len - valid_len,
                "truncating torn journal tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
            len = valid_len;
        }
        Ok((
            Self {
                dir,
                file,
                len,
                sync,
            },
            contents,
        ))
    }

    /// Replay a journal file.
    ///
    /// Also returns the offset just past the last complete frame.
    fn replay(path: &Path) -> Result<(JournalContents, u64)> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        let mut reader = Cursor::new(bytes.as_slice());
        let mut contents = JournalContents::default();

        let mut magic = [0u8; 4];
        if reader.read_exact(&mut magic).is_err() || &magic != JOURNAL_MAGIC {
            return Err(PodstatsError::Storage(format!(
                "not a redirect log journal: {}",
                path.display()
            )));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != JOURNAL_VERSION {
            return Err(PodstatsError::Storage(format!(
                "unsupported journal version {} in {}",
                version,
                path.display()
            )));
        }

        let mut valid_len = reader.position();
        loop {
            let remaining = bytes.len() - reader.position() as usize;
            if remaining == 0 {
                break;
            }
            let Ok(len) = reader.read_u32::<LittleEndian>() else {
                contents.malformed += 1;
                tracing::warn!(path = %path.display(), "truncated journal frame header");
                break;
            };
            // data plus checksum must fit in what is left
            if len as usize + 4 > remaining - 4 {
                contents.malformed += 1;
                tracing::warn!(path = %path.display(), len, "truncated journal frame");
                break;
            }
            let mut data = vec![0u8; len as usize];
            reader.read_exact(&mut data)?;
            let stored_crc = reader.read_u32::<LittleEndian>()?;
            valid_len = reader.position();

            if stored_crc != crc32fast::hash(&data) {
                contents.malformed += 1;
                tracing::warn!(path = %path.display(), "CRC mismatch in journal, skipping frame");
                continue;
            }

            let frame = match bincode::deserialize::<JournalFrame>(&data) {
                Ok(frame) => frame,
                Err(e) => {
                    contents.malformed += 1;
                    tracing::warn!(path = %path.display(), error = %e, "undecodable journal frame");
                    continue;
                }
            };
            match TimestampId::parse(&frame.timestamp_id) {
                Ok(id) => contents.entries.push((id, frame.packed)),
                Err(e) => {
                    contents.malformed += 1;
                    tracing::warn!(path = %path.display(), error = %e, "bad timestamp id in journal");
                }
            }
        }

        Ok((contents, valid_len))
    }

    fn load_att_nums(path: &Path) -> Result<Option<BTreeMap<String, u32>>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Append one packed record.
    ///
    /// A failed write is truncated away so the next frame starts clean.
    pub fn append(&mut self, id: &TimestampId, packed: &str) -> Result<()> {
        let data = bincode::serialize(&JournalFrame {
            timestamp_id: id.as_str().to_string(),
            packed: packed.to_string(),
        })
        .map_err(|e| PodstatsError::Serialization(e.to_string()))?;

        let mut frame = Vec::with_capacity(data.len() + 8);
        frame.write_u32::<LittleEndian>(data.len() as u32)?;
        frame.extend_from_slice(&data);
        frame.write_u32::<LittleEndian>(crc32fast::hash(&data))?;

        let written = self.file.write_all(&frame).and_then(|_| {
            if self.sync {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            if let Err(truncate_err) = self.file.set_len(self.len) {
                tracing::error!(error = %truncate_err, "failed to truncate partial journal frame");
            }
            return Err(PodstatsError::Storage(format!("journal append failed: {}", e)));
        }
        self.len += frame.len() as u64;
        Ok(())
    }

    /// Persist the attribute numbering snapshot.
    pub fn save_att_nums(&self, names_to_nums: &BTreeMap<String, u32>) -> Result<()> {
        let path = self.dir.join(ATT_NUMS_FILE);
        let tmp = self.dir.join(format!("{}.tmp", ATT_NUMS_FILE));
        std::fs::write(&tmp, serde_json::to_vec_pretty(names_to_nums)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
