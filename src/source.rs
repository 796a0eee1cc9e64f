//! Query source files: one `.sql` file per query.
//!
//! A source file starts with an optional header of `-- key: value` comment
//! lines, followed by the query body:
//!
//! ```text
//! -- description: Kernel extensions not signed by Apple
//! -- platform: darwin
//! -- interval: 3600
//! -- value: Unsigned kexts are a common persistence mechanism
//!
//! SELECT * FROM kernel_extensions WHERE linked_against NOT LIKE '%com.apple%';
//! ```
//!
//! The header is the run of `--` lines at the very top of the file; the first
//! blank or non-comment line ends it. Recognized keys are `description`,
//! `platform`, `version`, `interval`, and `value`. Repeating a key on the next
//! line continues its value on a new line. The query name is the file stem.
use crate::error::QueryError;
use crate::metadata::{validate_metadata, validate_name, Metadata};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// File extension of query source files.
pub const SOURCE_EXTENSION: &str = "sql";

const HEADER_PREFIX: &str = "--";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderKey {
    Description,
    Platform,
    Version,
    Interval,
    Value,
}

impl HeaderKey {
    fn parse(key: &str) -> Option<Self> {
        match key {
            "description" => Some(HeaderKey::Description),
            "platform" => Some(HeaderKey::Platform),
            "version" => Some(HeaderKey::Version),
            "interval" => Some(HeaderKey::Interval),
            "value" => Some(HeaderKey::Value),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            HeaderKey::Description => "description",
            HeaderKey::Platform => "platform",
            HeaderKey::Version => "version",
            HeaderKey::Interval => "interval",
            HeaderKey::Value => "value",
        }
    }
}

#[derive(Default)]
struct Header {
    description: Option<String>,
    platform: Option<String>,
    version: Option<String>,
    interval: Option<String>,
    value: Option<String>,
}

impl Header {
    fn slot(&mut self, key: HeaderKey) -> &mut Option<String> {
        match key {
            HeaderKey::Description => &mut self.description,
            HeaderKey::Platform => &mut self.platform,
            HeaderKey::Version => &mut self.version,
            HeaderKey::Interval => &mut self.interval,
            HeaderKey::Value => &mut self.value,
        }
    }
}

/// Derive the query name from a source file path.
pub fn name_from_path(path: &Path) -> Result<String, QueryError> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| QueryError::parse(path, "file name is not valid UTF-8"))?;
    validate_name(stem).map_err(|message| QueryError::parse(path, message))?;
    Ok(stem.to_string())
}

/// Parse one source file into query metadata.
pub fn parse_source(path: &Path, content: &str) -> Result<Metadata, QueryError> {
    let name = name_from_path(path)?;

    let mut header = Header::default();
    let mut last_key: Option<HeaderKey> = None;
    let mut body_start = content.len();
    let mut offset = 0;
    for (idx, raw_line) in content.split_inclusive('\n').enumerate() {
        let lineno = idx + 1;
        let line = strip_line_break(raw_line);
        let Some(text) = line.strip_prefix(HEADER_PREFIX) else {
            body_start = offset;
            break;
        };
        offset += raw_line.len();
        if text.trim().is_empty() {
            last_key = None;
            continue;
        }
        let (raw_key, value) = text.split_once(':').ok_or_else(|| {
            QueryError::parse(
                path,
                format!("line {lineno}: expected `-- key: value`, got {line:?}"),
            )
        })?;
        let raw_key = raw_key.trim().to_ascii_lowercase();
        if raw_key == "name" {
            return Err(QueryError::parse(
                path,
                format!("line {lineno}: query name comes from the file name"),
            ));
        }
        let key = HeaderKey::parse(&raw_key).ok_or_else(|| {
            QueryError::parse(path, format!("line {lineno}: unknown header key {raw_key:?}"))
        })?;
        // Only the separator space after the colon is syntax.
        let value = value.strip_prefix(' ').unwrap_or(value);
        let continues = last_key == Some(key);
        let slot = header.slot(key);
        if let Some(existing) = slot.as_mut() {
            if !continues {
                return Err(QueryError::parse(
                    path,
                    format!("line {lineno}: duplicate header key {:?}", key.as_str()),
                ));
            }
            existing.push('\n');
            existing.push_str(value);
        } else {
            *slot = Some(value.to_string());
        }
        last_key = Some(key);
    }

    let query = content[body_start..].trim().to_string();
    if query.is_empty() {
        return Err(QueryError::parse(path, "query body is empty"));
    }

    let interval = match header.interval.as_deref().map(str::trim) {
        None | Some("") => 0,
        Some(raw) => raw.parse::<u64>().map_err(|_| {
            QueryError::parse(path, format!("interval {raw:?} is not a whole number of seconds"))
        })?,
    };

    let meta = Metadata {
        name,
        query,
        description: header.description.unwrap_or_default(),
        platform: header.platform.unwrap_or_default(),
        version: header.version.unwrap_or_default(),
        interval,
        value: header.value.unwrap_or_default(),
    };
    validate_metadata(&meta).map_err(|message| QueryError::parse(path, message))?;
    Ok(meta)
}

/// Render metadata as source file contents.
///
/// Output depends only on the metadata, so rendering is byte-stable.
pub fn render_source(meta: &Metadata) -> String {
    let mut out = String::new();
    push_header_field(&mut out, HeaderKey::Description, &meta.description);
    push_header_field(&mut out, HeaderKey::Platform, &meta.platform);
    push_header_field(&mut out, HeaderKey::Version, &meta.version);
    if meta.interval != 0 {
        push_header_field(&mut out, HeaderKey::Interval, &meta.interval.to_string());
    }
    push_header_field(&mut out, HeaderKey::Value, &meta.value);

    let query = meta.query.trim();
    if !out.is_empty() || query.starts_with(HEADER_PREFIX) {
        out.push('\n');
    }
    out.push_str(query);
    out.push('\n');
    out
}

fn push_header_field(out: &mut String, key: HeaderKey, value: &str) {
    if value.is_empty() {
        return;
    }
    for line in value.split('\n') {
        if line.is_empty() {
            let _ = writeln!(out, "{HEADER_PREFIX} {}:", key.as_str());
        } else {
            let _ = writeln!(out, "{HEADER_PREFIX} {}: {line}", key.as_str());
        }
    }
}

fn strip_line_break(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Read and parse a single source file.
pub fn load_file(path: &Path) -> Result<Metadata, QueryError> {
    let content = fs::read_to_string(path).map_err(|err| QueryError::io("read", path, err))?;
    parse_source(path, &content)
}
