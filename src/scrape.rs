use std::path::Path;

use anyhow::Context as _;

use crate::cache::RawCache;
use crate::cli::FetchArgs;
use crate::config::ScrapeConfig;
use crate::extract::Extractor;
use crate::fetch::{Fetcher, ReqwestTransport, Transport};
use crate::model::{ErrorRecord, Extraction};
use crate::writer::{IncrementalWriter, OutputLayout};

pub const ACCESS_DENIED: &str = "Access Denied";

/// Position in the input list relative to the restart identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    Skipping { restart: String },
    Processing,
}

impl Cursor {
    pub fn new(restart: Option<String>) -> Self {
        match restart {
            Some(restart) => Self::Skipping { restart },
            None => Self::Processing,
        }
    }

    /// Advances past `fic_id`; true when it should be processed. The restart
    /// id itself is processed.
    pub fn admit(&mut self, fic_id: &str) -> bool {
        if let Self::Skipping { restart } = self {
            if restart.as_str() != fic_id {
                return false;
            }
            *self = Self::Processing;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub written: usize,
    pub denied: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    Written { chapters: usize },
    Denied,
}

pub async fn run(args: FetchArgs) -> anyhow::Result<()> {
    let config = ScrapeConfig::from_args(args).context("resolve configuration")?;
    if config.user_agent.is_empty() {
        tracing::warn!("no user agent configured; requests will not self-identify");
    } else {
        tracing::info!(user_agent = %config.user_agent, "self-identifying to the archive");
    }

    let ids = load_ids(&config.ids)?;
    let transport = ReqwestTransport::new(config.timeout)?;
    let fetcher = Fetcher::new(transport, config.retry, config.user_agent.clone())
        .with_cache(RawCache::new(&config.cache_dir), config.populate_cache);
    let extractor = Extractor::new()?;
    let mut writer = IncrementalWriter::open(OutputLayout::new(&config.out_dir, &config.fandom))
        .context("open output sinks")?;

    let summary = scrape_ids(&config, &fetcher, &extractor, &mut writer, &ids).await?;
    tracing::info!(
        written = summary.written,
        denied = summary.denied,
        skipped = summary.skipped,
        "scrape finished"
    );
    Ok(())
}

/// Processes `ids` in order. A fetch that exhausts its retries aborts the run.
pub async fn scrape_ids<T: Transport>(
    config: &ScrapeConfig,
    fetcher: &Fetcher<T>,
    extractor: &Extractor,
    writer: &mut IncrementalWriter,
    ids: &[String],
) -> anyhow::Result<RunSummary> {
    let mut cursor = Cursor::new(config.restart.clone());
    let mut summary = RunSummary::default();
    let total = ids.len();

    for (index, fic_id) in ids.iter().enumerate() {
        if !cursor.admit(fic_id) {
            tracing::info!(fic_id = %fic_id, "skipping already processed work");
            summary.skipped += 1;
            continue;
        }

        tracing::info!(fic_id = %fic_id, "scraping {}/{total}", index + 1);
        match scrape_work(config, fetcher, extractor, writer, fic_id).await? {
            WorkOutcome::Written { chapters } => {
                tracing::info!(fic_id = %fic_id, chapters, "done");
                summary.written += 1;
            }
            WorkOutcome::Denied => summary.denied += 1,
        }
    }

    if let Cursor::Skipping { restart } = &cursor {
        tracing::warn!(%restart, "restart id never appeared in the input; nothing was scraped");
    }
    Ok(summary)
}

/// Fetch, extract, and write one work.
pub async fn scrape_work<T: Transport>(
    config: &ScrapeConfig,
    fetcher: &Fetcher<T>,
    extractor: &Extractor,
    writer: &mut IncrementalWriter,
    fic_id: &str,
) -> anyhow::Result<WorkOutcome> {
    let url = config.work_url(fic_id)?;
    let html = fetcher
        .fetch(url.as_str())
        .await
        .with_context(|| format!("fetch work {fic_id}"))?;

    let extracted = match extractor.extract(fic_id, &html) {
        Extraction::Work(extracted) => extracted,
        Extraction::Denied => {
            tracing::warn!(fic_id, "access denied");
            writer.write_error(&ErrorRecord::new(fic_id, ACCESS_DENIED))?;
            let dump = writer.layout().denied_dump(fic_id);
            if let Err(err) = std::fs::write(&dump, &html) {
                tracing::warn!(fic_id, path = %dump.display(), %err, "could not dump denied page");
            }
            return Ok(WorkOutcome::Denied);
        }
    };

    for soft_error in &extracted.soft_errors {
        writer.write_error(soft_error)?;
    }
    writer.write_work(&extracted.work)?;
    for chapter in &extracted.chapters {
        writer.write_chapter(&chapter.record)?;
        writer.write_paragraphs(fic_id, chapter.record.chapter_num, &chapter.paragraphs)?;
    }

    Ok(WorkOutcome::Written {
        chapters: extracted.chapters.len(),
    })
}

/// Literal ids, or the first column of a single `.csv` argument. Blank rows
/// and rows starting with `#` are skipped.
pub fn load_ids(inputs: &[String]) -> anyhow::Result<Vec<String>> {
    match inputs {
        [single] if single.contains(".csv") => read_id_column(Path::new(single)),
        _ => Ok(inputs.to_vec()),
    }
}

fn read_id_column(path: &Path) -> anyhow::Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("open id list: {}", path.display()))?;

    let mut ids = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("read id list: {}", path.display()))?;
        let Some(first) = record.get(0).map(str::trim) else {
            continue;
        };
        if first.is_empty() || first.starts_with('#') {
            continue;
        }
        ids.push(first.to_owned());
    }
    Ok(ids)
}
