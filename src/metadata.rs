//! In-memory model for one named query.
use std::collections::BTreeMap;

/// Queries keyed by name.
///
/// Ordered so every rendering and report walks names in sorted order.
pub type QueryMap = BTreeMap<String, Metadata>;

/// One query plus its descriptive and scheduling fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub query: String,
    pub description: String,
    /// Comma-separated platform tokens; empty means all platforms.
    pub platform: String,
    /// Minimum engine version.
    pub version: String,
    /// Suggested scheduling period in seconds; 0 defers to the caller.
    pub interval: u64,
    /// Why this query exists.
    pub value: String,
}

impl Metadata {
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Metadata {
            name: name.into(),
            query: query.into().trim().to_string(),
            ..Metadata::default()
        }
    }
}

/// Check that `name` can be used as a map key and a file name.
pub fn validate_name(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err("query name must not be empty".to_string());
    };
    if !first.is_ascii_alphanumeric() {
        return Err(format!(
            "query name {name:?} must start with an ASCII letter or digit"
        ));
    }
    if let Some(bad) =
        chars.find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.')))
    {
        return Err(format!(
            "query name {name:?} contains unsupported character {bad:?}"
        ));
    }
    Ok(())
}

/// Check the fields shared by every load path: name, non-empty query, and
/// recognized platform tokens.
pub fn validate_metadata(meta: &Metadata) -> Result<(), String> {
    validate_name(&meta.name)?;
    if meta.query.trim().is_empty() {
        return Err("query body is empty".to_string());
    }
    if let Some(token) = crate::platform::unknown_token(&meta.platform) {
        return Err(format!("unrecognized platform {token:?}"));
    }
    Ok(())
}

/// Use `\n` line breaks in free-text fields.
///
/// Source files cannot carry a carriage return at the end of a header line,
/// so values take this form before they enter a mapping.
pub fn normalize_line_breaks(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drop queries whose names appear in `exclude`.
pub fn exclude(mut queries: QueryMap, exclude: &[String]) -> QueryMap {
    for name in exclude {
        queries.remove(name);
    }
    queries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_file_safe_names() {
        assert!(validate_name("processes").is_ok());
        assert!(validate_name("unsigned-kexts_v2.1").is_ok());
    }

    #[test]
    fn rejects_unsafe_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("two words").is_err());
    }

    #[test]
    fn new_trims_query_text() {
        let meta = Metadata::new("q", "\n  SELECT 1;  \n");
        assert_eq!(meta.query, "SELECT 1;");
        assert_eq!(meta.interval, 0);
    }

    #[test]
    fn validate_metadata_flags_empty_query_and_unknown_platform() {
        let mut meta = Metadata::new("q", "   ");
        assert_eq!(
            validate_metadata(&meta).unwrap_err(),
            "query body is empty"
        );
        meta.query = "SELECT 1".to_string();
        meta.platform = "linux,amiga".to_string();
        assert!(validate_metadata(&meta).unwrap_err().contains("amiga"));
    }

    #[test]
    fn normalizes_only_line_final_carriage_returns() {
        assert_eq!(normalize_line_breaks("a\r\nb\r"), "a\nb");
        assert_eq!(normalize_line_breaks("a\rb\n  c"), "a\rb\n  c");
    }

    #[test]
    fn exclude_removes_named_queries() {
        let mut queries = QueryMap::new();
        queries.insert("a".to_string(), Metadata::new("a", "SELECT 1"));
        queries.insert("b".to_string(), Metadata::new("b", "SELECT 2"));
        let kept = exclude(queries, &["a".to_string(), "missing".to_string()]);
        assert_eq!(kept.keys().collect::<Vec<_>>(), vec!["b"]);
    }
}
