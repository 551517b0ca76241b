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

//! Attribute numbering and record packing
//!
//! Packed records replace attribute names with small integers assigned on
//! first sight. The name to number map travels alongside packed records so
//! readers can unpack them.
//!
//! # Packed format
//!
//! ```text
//! ""                          empty record
//! "\t{num}:{value}\t..."      one segment per field, closed by a trailing tab
//! ```
//!
//! Values are stripped of tab characters before encoding; they are never
//! escaped.

use crate::error::{PodstatsError, Result};
use crate::event::is_redirect_log_attribute;
use crate::record::Record;
use std::collections::{BTreeMap, HashMap};

/// Which attribute names may be packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributeSet {
    /// Any non-empty name
    #[default]
    Open,
    /// The fixed redirect log attribute set
    RedirectLog,
}

impl AttributeSet {
    fn admits(&self, name: &str) -> bool {
        match self {
            AttributeSet::Open => !name.is_empty(),
            AttributeSet::RedirectLog => is_redirect_log_attribute(name),
        }
    }
}

/// Bidirectional attribute name and number mapping.
#[derive(Debug, Clone, Default)]
pub struct AttNums {
    names_to_nums: BTreeMap<String, u32>,
    nums_to_names: HashMap<u32, String>,
    next_num: u32,
    attributes: AttributeSet,
}

impl AttNums {
    /// Create an empty mapping accepting any attribute name.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty mapping restricted to redirect log attributes.
    pub fn for_redirect_logs() -> Self {
        Self {
            attributes: AttributeSet::RedirectLog,
            ..Self::default()
        }
    }

    /// Restore a mapping from its serialized form.
    ///
    /// Numbering of new names continues from one past the largest number.
    pub fn from_json(names_to_nums: BTreeMap<String, u32>) -> Result<Self> {
        let mut nums_to_names = HashMap::with_capacity(names_to_nums.len());
        for (name, num) in &names_to_nums {
            if name.is_empty() {
                return Err(PodstatsError::Validation(
                    "attribute name must not be empty".to_string(),
                ));
            }
            if let Some(existing) = nums_to_names.insert(*num, name.clone()) {
                return Err(PodstatsError::Validation(format!(
                    "attribute number {} assigned to both {} and {}",
                    num, existing, name
                )));
            }
        }
        let next_num = names_to_nums.values().max().map(|n| n + 1).unwrap_or(0);
        Ok(Self {
            names_to_nums,
            nums_to_names,
            next_num,
            attributes: AttributeSet::Open,
        })
    }

    /// Restrict which names may be packed.
    pub fn with_attributes(mut self, attributes: AttributeSet) -> Self {
        self.attributes = attributes;
        self
    }

    /// Serialize the name to number mapping.
    pub fn to_json(&self) -> BTreeMap<String, u32> {
        self.names_to_nums.clone()
    }

    /// Get the number for a name, assigning the next unused one if new.
    pub fn get(&mut self, name: &str) -> u32 {
        if let Some(num) = self.names_to_nums.get(name) {
            return *num;
        }
        let num = self.next_num;
        self.next_num += 1;
        self.names_to_nums.insert(name.to_string(), num);
        self.nums_to_names.insert(num, name.to_string());
        num
    }

    /// Look up a name by number without assigning.
    pub fn name_of(&self, num: u32) -> Option<&str> {
        self.nums_to_names.get(&num).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names_to_nums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names_to_nums.is_empty()
    }

    /// Pack a record into its compact string form.
    ///
    /// Every name is checked before any number is assigned, so a rejected
    /// record leaves the mapping untouched.
    pub fn pack_record(&mut self, record: &Record) -> Result<String> {
        if record.is_empty() {
            return Ok(String::new());
        }
        if let Some((name, _)) = record.iter().find(|(name, _)| !self.attributes.admits(name)) {
            return Err(PodstatsError::Validation(format!(
                "unknown attribute: {}",
                name
            )));
        }

        let mut packed = String::from("\t");
        for (name, value) in record.iter() {
            let num = self.get(name);
            packed.push_str(&num.to_string());
            packed.push(':');
            packed.extend(value.chars().filter(|c| *c != '\t'));
            packed.push('\t');
        }
        Ok(packed)
    }

    /// Unpack a record produced by [`AttNums::pack_record`].
    pub fn unpack_record(&self, packed: &str) -> Result<Record> {
        let mut record = Record::new();
        if packed.is_empty() {
            return Ok(record);
        }
        if packed.len() < 2 || !packed.starts_with('\t') || !packed.ends_with('\t') {
            return Err(PodstatsError::Parse(format!(
                "packed record must start and end with a tab: {:?}",
                packed
            )));
        }

        for segment in packed[1..packed.len() - 1].split('\t') {
            let (num, value) = segment.split_once(':').ok_or_else(|| {
                PodstatsError::Parse(format!("bad packed segment: {:?}", segment))
            })?;
            if num.is_empty() || !num.bytes().all(|b| b.is_ascii_digit()) {
                return Err(PodstatsError::Parse(format!(
                    "bad attribute number: {:?}",
                    num
                )));
            }
            let num: u32 = num
                .parse()
                .map_err(|_| PodstatsError::Parse(format!("bad attribute number: {}", num)))?;
            let name = self
                .name_of(num)
                .ok_or_else(|| PodstatsError::Lookup(format!("unknown attribute number: {}", num)))?;
            record.insert(name, value);
        }
        Ok(record)
    }
}

impl PartialEq for AttNums {
    fn eq(&self, other: &Self) -> bool {
        self.names_to_nums == other.names_to_nums
    }
}

impl Eq for AttNums {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(fields: &[(&str, &str)]) -> Record {
        fields.iter().copied().collect()
    }

    #[test]
    fn test_get_assigns_in_first_seen_order() {
        let mut att_nums = AttNums::new();
        assert_eq!(att_nums.get("id"), 0);
        assert_eq!(att_nums.get("id"), 0);
        assert_eq!(att_nums.get("name"), 1);
        assert_eq!(att_nums.get("id"), 0);
        assert_eq!(att_nums.get("description"), 2);

        let json = att_nums.to_json();
        assert_eq!(json.get("description"), Some(&2));
        assert_eq!(AttNums::from_json(json.clone()).unwrap().to_json(), json);
    }

    #[test]
    fn test_pack_record() {
        let mut att_nums = AttNums::new();
        assert_eq!(att_nums.pack_record(&Record::new()).unwrap(), "");
        assert_eq!(att_nums.pack_record(&record(&[("id", "a")])).unwrap(), "\t0:a\t");
        assert_eq!(
            att_nums.pack_record(&record(&[("name", "foo"), ("id", "a")])).unwrap(),
            "\t1:foo\t0:a\t"
        );
        assert_eq!(att_nums.pack_record(&record(&[("id", "a\tb")])).unwrap(), "\t0:ab\t");
    }

    #[test]
    fn test_pack_rejects_unknown_attribute_without_numbering() {
        let mut att_nums = AttNums::for_redirect_logs();
        let result = att_nums.pack_record(&record(&[("method", "GET"), ("foo", "2")]));
        assert!(matches!(result, Err(PodstatsError::Validation(_))));
        assert!(att_nums.is_empty());

        let packed = att_nums
            .pack_record(&record(&[("method", "GET"), ("other.country", "US")]))
            .unwrap();
        assert_eq!(packed, "\t0:GET\t1:US\t");
    }

    #[test]
    fn test_unpack_record() {
        let mut att_nums = AttNums::new();
        att_nums.get("id");
        assert_eq!(att_nums.unpack_record("").unwrap(), Record::new());
        assert_eq!(att_nums.unpack_record("\t0:a\t").unwrap(), record(&[("id", "a")]));
        assert_eq!(att_nums.unpack_record("\t0:a:b\t").unwrap(), record(&[("id", "a:b")]));

        for bad in ["0:a", "\t", "\t\t", "\t0:a", "0:a\t", "\t0a\t1:b", "\t+0:a\t", "\t0:a\t\t"] {
            assert!(att_nums.unpack_record(bad).is_err(), "expected error for {:?}", bad);
        }
        assert!(matches!(
            att_nums.unpack_record("\t7:a\t"),
            Err(PodstatsError::Lookup(_))
        ));
    }

    #[test]
    fn test_round_trip() {
        let mut att_nums = AttNums::new();
        for fields in [
            vec![],
            vec![("id", "a")],
            vec![("id", "a"), ("name", "foo")],
            vec![("name", "foo"), ("id", "a")],
        ] {
            let r = record(&fields);
            let packed = att_nums.pack_record(&r).unwrap();
            assert_eq!(att_nums.unpack_record(&packed).unwrap(), r);
        }
    }

    #[test]
    fn test_from_json_continues_numbering() {
        let mut original = AttNums::new();
        original.get("a");
        original.get("b");
        original.get("c");

        let mut restored = AttNums::from_json(original.to_json()).unwrap();
        assert_eq!(restored, original);
        assert_eq!(restored.get("d"), 3);
        assert_eq!(original.get("d"), 3);
    }

    #[test]
    fn test_from_json_rejects_duplicate_numbers() {
        let json: BTreeMap<String, u32> =
            [("a".to_string(), 0), ("b".to_string(), 0)].into_iter().collect();
        assert!(AttNums::from_json(json).is_err());
    }

    proptest! {
        #[test]
        fn prop_unpack_inverts_pack(
            fields in proptest::collection::vec(("[a-z]{1,8}", "[^\t]{0,16}"), 0..8)
        ) {
            let r: Record = fields.into_iter().collect();
            let mut att_nums = AttNums::new();
            let packed = att_nums.pack_record(&r).unwrap();
            prop_assert_eq!(att_nums.unpack_record(&packed).unwrap(), r);
        }
    }
}
