//! Pack codec: a query map as a single osquery pack manifest.
//!
//! Packs are JSON objects with one top-level `queries` key:
//!
//! ```json
//! {
//!   "queries": {
//!     "uptime": {
//!       "query": "SELECT * FROM uptime;",
//!       "interval": 3600
//!     }
//!   }
//! }
//! ```
//!
//! Fields at their default value are omitted and query names are emitted in
//! sorted order, so rendering the same map always yields the same bytes.
use crate::error::QueryError;
use crate::metadata::{normalize_line_breaks, validate_metadata, Metadata, QueryMap};
use serde::de::{Error as _, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// File extension of pack manifests.
pub const PACK_EXTENSION: &str = "conf";

/// Queries loaded from one pack manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pack {
    pub queries: QueryMap,
}

#[derive(Serialize, Deserialize)]
struct PackFile {
    #[serde(deserialize_with = "deserialize_unique_queries")]
    queries: BTreeMap<String, PackEntry>,
}

#[derive(Serialize, Deserialize)]
struct PackEntry {
    query: String,
    #[serde(
        default,
        skip_serializing_if = "is_zero",
        deserialize_with = "deserialize_interval"
    )]
    interval: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    platform: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    value: String,
}

// serde_json keeps the last of repeated object keys; a repeated query name
// is an error instead.
fn deserialize_unique_queries<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, PackEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    struct UniqueQueries;

    impl<'de> Visitor<'de> for UniqueQueries {
        type Value = BTreeMap<String, PackEntry>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of query names to queries")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut queries = BTreeMap::new();
            while let Some((name, entry)) = access.next_entry::<String, PackEntry>()? {
                if queries.contains_key(&name) {
                    return Err(A::Error::custom(format!("duplicate query name {name:?}")));
                }
                queries.insert(name, entry);
            }
            Ok(queries)
        }
    }

    deserializer.deserialize_map(UniqueQueries)
}

/// osquery packs in the wild carry intervals as numbers or numeric strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum IntervalRepr {
    Number(u64),
    Text(String),
}

fn deserialize_interval<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match IntervalRepr::deserialize(deserializer)? {
        IntervalRepr::Number(value) => Ok(value),
        IntervalRepr::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid interval {text:?}"))),
    }
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl PackEntry {
    fn from_metadata(meta: &Metadata) -> Self {
        PackEntry {
            query: meta.query.clone(),
            interval: meta.interval,
            platform: meta.platform.clone(),
            version: meta.version.clone(),
            description: meta.description.clone(),
            value: meta.value.clone(),
        }
    }

    fn into_metadata(self, name: String) -> Metadata {
        Metadata {
            name,
            query: self.query.trim().to_string(),
            description: normalize_line_breaks(&self.description),
            platform: normalize_line_breaks(&self.platform),
            version: normalize_line_breaks(&self.version),
            interval: self.interval,
            value: normalize_line_breaks(&self.value),
        }
    }
}

/// Render a query map as pretty-printed pack JSON with a trailing newline.
pub fn render_pack(queries: &QueryMap) -> Result<String, QueryError> {
    let file = PackFile {
        queries: queries
            .iter()
            .map(|(name, meta)| (name.clone(), PackEntry::from_metadata(meta)))
            .collect(),
    };
    let mut text = serde_json::to_string_pretty(&file)
        .map_err(|err| QueryError::serialization("render", err.to_string()))?;
    text.push('\n');
    Ok(text)
}

/// Parse pack JSON. `origin` names the source in error messages.
pub fn parse_pack(origin: &str, bytes: &[u8]) -> Result<Pack, QueryError> {
    let file: PackFile = serde_json::from_slice(bytes)
        .map_err(|err| QueryError::serialization(origin, err.to_string()))?;
    let mut queries = QueryMap::new();
    for (name, entry) in file.queries {
        let meta = entry.into_metadata(name);
        validate_metadata(&meta).map_err(|message| {
            QueryError::serialization(origin, format!("query {:?}: {message}", meta.name))
        })?;
        queries.insert(meta.name.clone(), meta);
    }
    Ok(Pack { queries })
}

/// Read and parse a pack manifest from disk.
pub fn load_pack(path: &Path) -> Result<Pack, QueryError> {
    let bytes = fs::read(path).map_err(|err| QueryError::io("read", path, err))?;
    let pack = parse_pack(&path.display().to_string(), &bytes)?;
    tracing::debug!(path = %path.display(), count = pack.queries.len(), "loaded pack");
    Ok(pack)
}

/// Whether `path` names a pack manifest by extension.
pub fn is_pack_path(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(PACK_EXTENSION)
}
