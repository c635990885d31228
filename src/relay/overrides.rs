//! Title and logo overrides merged into discovery responses.
//!
//! Deployments can ship a JSON file mapping channel ids to replacement
//! display fields:
//!
//! ```json
//! { "bbc_one": { "title": "BBC One", "logoId": "bbc_one_hd" } }
//! ```
//!
//! Only the fields present in an entry are applied; everything else
//! passes through unchanged.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Replacement display fields for one channel.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TitleOverride {
    pub title: Option<String>,
    #[serde(rename = "logoId")]
    pub logo_id: Option<String>,
}

/// Channel id to its override entry.
pub type OverrideTable = BTreeMap<String, TitleOverride>;

/// Load the override table from an optional JSON file.
///
/// No path or a missing file yields an empty table; an unreadable or
/// malformed file is an error, since silently dropping configured
/// overrides would be worse than failing at startup.
pub fn load(path: Option<&Path>) -> Result<OverrideTable> {
    let Some(path) = path else {
        return Ok(OverrideTable::new());
    };
    if !path.exists() {
        debug!(path = %path.display(), "no override file, using empty table");
        return Ok(OverrideTable::new());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading override file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("parsing override file {}", path.display()))
}

/// Apply the override table to a discovery response.
///
/// The response is a JSON array of `{id, title, logoId}` objects; entries
/// whose id matches the table get their fields replaced. Anything that is
/// not an array of objects passes through untouched.
pub fn merge_discovery(mut discovery: Value, table: &OverrideTable) -> Value {
    let Some(items) = discovery.as_array_mut() else {
        return discovery;
    };

    for item in items {
        let Some(id) = item.get("id").and_then(Value::as_str) else {
            continue;
        };
        let Some(entry) = table.get(id) else {
            continue;
        };
        if let Some(title) = &entry.title {
            item["title"] = Value::String(title.clone());
        }
        if let Some(logo_id) = &entry.logo_id {
            item["logoId"] = Value::String(logo_id.clone());
        }
    }

    discovery
}
