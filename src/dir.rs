//! Directory codec: a tree of `.sql` source files as a query map.
use crate::error::QueryError;
use crate::metadata::QueryMap;
use crate::source::{load_file, render_source, SOURCE_EXTENSION};
use crate::util::display_path;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

/// Load every source file under `dir`, recursively.
///
/// The load is all-or-nothing: the first bad file or duplicate name fails
/// the whole call.
pub fn load_from_dir(dir: &Path) -> Result<QueryMap, QueryError> {
    let mut queries = QueryMap::new();
    let mut origins: BTreeMap<String, PathBuf> = BTreeMap::new();
    for path in collect_source_files(dir)? {
        let meta = load_file(&path)?;
        tracing::trace!(
            file = %display_path(&path, Some(dir)),
            name = %meta.name,
            "parsed source"
        );
        if let Some(first) = origins.get(&meta.name) {
            return Err(QueryError::DuplicateName {
                name: meta.name,
                first: first.clone(),
                second: path,
            });
        }
        origins.insert(meta.name.clone(), path);
        queries.insert(meta.name.clone(), meta);
    }
    tracing::debug!(dir = %dir.display(), count = queries.len(), "loaded query sources");
    Ok(queries)
}

/// Write one `<name>.sql` file per query into `dir`, creating it if needed.
///
/// Each file is written to a temporary file and renamed into place. Files
/// written before a failure are left behind.
pub fn save_to_directory(queries: &QueryMap, dir: &Path) -> Result<usize, QueryError> {
    fs::create_dir_all(dir).map_err(|err| QueryError::io("create", dir, err))?;
    let mut written = 0;
    for meta in queries.values() {
        let path = source_path(dir, &meta.name);
        write_atomic(dir, &path, render_source(meta).as_bytes())?;
        written += 1;
    }
    Ok(written)
}

/// Path of the source file for `name` inside `dir`.
pub fn source_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{SOURCE_EXTENSION}"))
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), QueryError> {
    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|err| QueryError::io("create", dir, err))?;
    tmp.write_all(bytes)
        .map_err(|err| QueryError::io("write", path, err))?;
    tmp.persist(path)
        .map_err(|err| QueryError::io("write", path, err.error))?;
    Ok(())
}

fn collect_source_files(root: &Path) -> Result<Vec<PathBuf>, QueryError> {
    let mut files = Vec::new();
    let entries = fs::read_dir(root).map_err(|err| QueryError::io("read", root, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| QueryError::io("read", root, err))?;
        let path = entry.path();
        if path.is_dir() {
            files.extend(collect_source_files(&path)?);
        } else if path.is_file() && is_source_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn is_source_file(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(SOURCE_EXTENSION)
}
