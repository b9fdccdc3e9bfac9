//! Inventory & Hashing
//!
//! Canonical JSON serialization and SHA-256 digests give each experiment a
//! stable content hash. Workspace-root prefixes are stripped from string
//! values first, so inventories are independent of workspace relocation.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::keywords;
use crate::value::VariableMap;

pub const INVENTORY_FILE_NAME: &str = "ramble_inventory.json";

/// SHA-256 digest of a string, as lowercase hex.
pub fn hash_string(data: &str) -> String {
    format!("{:x}", Sha256::digest(data.as_bytes()))
}

/// Serialize a JSON value in canonical form: sorted keys, no whitespace.
pub fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| k.as_str());
            let entries: Vec<String> = pairs
                .iter()
                .map(|(k, v)| {
                    format!(
                        "{}:{}",
                        serde_json::Value::String((*k).clone()),
                        canonical_json(v)
                    )
                })
                .collect();
            format!("{{{}}}", entries.join(","))
        }
        serde_json::Value::Array(arr) => {
            let entries: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", entries.join(","))
        }
        _ => value.to_string(),
    }
}

/// Digest of a JSON value's canonical form.
pub fn hash_json(value: &serde_json::Value) -> String {
    hash_string(&canonical_json(value))
}

/// A named digest inside the inventory document.
#[derive(Debug, Clone, Serialize)]
pub struct DigestEntry {
    pub name: String,
    pub digest: String,
}

/// The per-experiment inventory document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Inventory {
    pub attributes: Vec<DigestEntry>,
    pub inputs: Vec<DigestEntry>,
    pub software: Vec<DigestEntry>,
    pub templates: Vec<DigestEntry>,
}

impl Inventory {
    pub fn add_attribute(&mut self, name: &str, value: &serde_json::Value) {
        self.attributes.push(DigestEntry {
            name: name.to_string(),
            digest: hash_json(value),
        });
    }
}

/// Prepare variables for hashing: drop `workspace_name` and strip the
/// workspace root from string values.
pub fn clean_hash_variables(variables: &VariableMap, root: &str) -> serde_json::Value {
    let prefix = format!("{}/", root);
    let mut map = serde_json::Map::new();
    for (name, value) in variables {
        if name == keywords::WORKSPACE_NAME {
            continue;
        }
        let mut json = value.to_json();
        strip_prefix_in_place(&mut json, &prefix);
        map.insert(name.clone(), json);
    }
    serde_json::Value::Object(map)
}

fn strip_prefix_in_place(value: &mut serde_json::Value, prefix: &str) {
    match value {
        serde_json::Value::String(s) => {
            if s.contains(prefix) {
                *s = s.replace(prefix, "");
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                strip_prefix_in_place(item, prefix);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                strip_prefix_in_place(item, prefix);
            }
        }
        _ => {}
    }
}

/// Write a serializable document to `path` via a temporary file and atomic
/// rename. Returns the serialized bytes that were written.
pub fn write_json_atomic<T: Serialize>(path: &std::path::Path, value: &T) -> crate::error::Result<String> {
    let serialized = serde_json::to_string_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &serialized)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(serialized)
}
