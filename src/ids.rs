//! Reconciles lists of scraped work ids: unions fragment files from parallel
//! id scrapes and subtracts ids that already have metadata.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::cli::IdsArgs;

/// One row of an id list: the id plus whatever followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdRow {
    pub id: String,
    pub rest: Vec<String>,
}

pub fn run(args: IdsArgs) -> anyhow::Result<()> {
    let mut rows = match (&args.sections_dir, &args.scraped_path) {
        (Some(dir), _) => {
            tracing::info!(dir = %dir, "combining scraped fic ids");
            union_dir(Path::new(dir))?
        }
        (None, Some(path)) => read_id_rows(Path::new(path))?,
        (None, None) => anyhow::bail!("either --sections-dir or --scraped-path is required"),
    };
    tracing::info!(count = rows.len(), "scraped fic ids");

    if let Some(exclude) = &args.exclude_path {
        let existing = read_fic_id_column(Path::new(exclude))?;
        rows = difference(rows, &existing);
        tracing::info!(count = rows.len(), "new fic ids after excluding scraped metadata");
    }

    let out = PathBuf::from(&args.out);
    write_id_rows(&out, &rows)?;
    tracing::info!(path = %out.display(), "saved fic ids");
    Ok(())
}

/// Union of every fragment in `dir`, in file-name order; the first row seen
/// for an id wins.
pub fn union_dir(dir: &Path) -> anyhow::Result<Vec<IdRow>> {
    let mut paths = std::fs::read_dir(dir)
        .with_context(|| format!("read sections dir: {}", dir.display()))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("list sections dir: {}", dir.display()))?;
    paths.retain(|path| path.is_file());
    paths.sort();

    let fragments = paths
        .iter()
        .map(|path| read_id_rows(path))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(union(fragments))
}

pub fn union(fragments: impl IntoIterator<Item = Vec<IdRow>>) -> Vec<IdRow> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for row in fragments.into_iter().flatten() {
        if seen.insert(row.id.clone()) {
            out.push(row);
        }
    }
    out
}

pub fn difference(rows: Vec<IdRow>, existing: &HashSet<String>) -> Vec<IdRow> {
    rows.into_iter()
        .filter(|row| !existing.contains(&row.id))
        .collect()
}

/// Headerless id list; blank rows are ignored.
pub fn read_id_rows(path: &Path) -> anyhow::Result<Vec<IdRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("open id list: {}", path.display()))?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("read id list: {}", path.display()))?;
        let mut fields = record.iter();
        let Some(id) = fields.next().map(str::trim).filter(|id| !id.is_empty()) else {
            continue;
        };
        rows.push(IdRow {
            id: id.to_owned(),
            rest: fields.map(str::to_owned).collect(),
        });
    }
    Ok(rows)
}

/// The `fic_id` column of a metadata CSV with a header row.
pub fn read_fic_id_column(path: &Path) -> anyhow::Result<HashSet<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("open metadata: {}", path.display()))?;
    let column = reader
        .headers()
        .with_context(|| format!("read metadata header: {}", path.display()))?
        .iter()
        .position(|name| name == "fic_id")
        .ok_or_else(|| anyhow::anyhow!("metadata has no fic_id column: {}", path.display()))?;

    let mut ids = HashSet::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("read metadata: {}", path.display()))?;
        if let Some(id) = record.get(column) {
            ids.insert(id.trim().to_owned());
        }
    }
    Ok(ids)
}

pub fn write_id_rows(path: &Path, rows: &[IdRow]) -> anyhow::Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("create id list: {}", path.display()))?;
    for row in rows {
        writer
            .write_record(std::iter::once(row.id.as_str()).chain(row.rest.iter().map(String::as_str)))
            .with_context(|| format!("write id list: {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("flush id list: {}", path.display()))
}
