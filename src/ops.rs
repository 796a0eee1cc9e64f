//! Caller-facing operations: pack, unpack, and verify.
//!
//! These wrap the codecs and the verification engine with path handling and
//! error context; the CLI is a thin layer over them.
use crate::dir::{load_from_dir, save_to_directory};
use crate::metadata::{exclude, QueryMap};
use crate::pack::{is_pack_path, load_pack, render_pack};
use crate::source::load_file;
use crate::verify::{
    verify_all, BatchOptions, CancelToken, QueryRunner, Reporter, Verifier, VerifyReport,
};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Render the queries under `source_dir` as pack JSON.
pub fn pack(source_dir: &Path, excluded: &[String]) -> Result<String> {
    let queries = load_from_dir(source_dir).context("load from dir")?;
    let queries = exclude(queries, excluded);
    let text = render_pack(&queries).context("render")?;
    Ok(text)
}

/// Write each query in the pack at `pack_path` to `dest_dir`.
///
/// Returns the loaded queries and the number of files written.
pub fn unpack(pack_path: &Path, dest_dir: &Path) -> Result<(QueryMap, usize)> {
    let pack = load_pack(pack_path).context("load pack")?;
    let written = save_to_directory(&pack.queries, dest_dir).context("save to dir")?;
    Ok((pack.queries, written))
}

/// Load queries from a directory, a `.conf` pack, or a single source file.
pub fn load_any(path: &Path) -> Result<QueryMap> {
    let stat = fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    if stat.is_dir() {
        return load_from_dir(path).context("load from dir");
    }
    if is_pack_path(path) {
        return Ok(load_pack(path).context("load pack")?.queries);
    }
    let meta = load_file(path).context("load")?;
    let mut queries = QueryMap::new();
    queries.insert(meta.name.clone(), meta);
    Ok(queries)
}

/// Load the queries at `path` and verify them all.
///
/// Load failures are returned as errors; per-query failures are in the
/// report (see [`VerifyReport::check`]).
pub fn verify<R: QueryRunner>(
    path: &Path,
    excluded: &[String],
    verifier: &Verifier<R>,
    options: BatchOptions,
    cancel: &CancelToken,
    reporter: &dyn Reporter,
) -> Result<VerifyReport> {
    let queries = exclude(load_any(path)?, excluded);
    Ok(verify_all(verifier, &queries, options, cancel, reporter))
}
