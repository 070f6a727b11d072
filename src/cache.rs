use std::fs::File;
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

/// Read-through store of raw response bodies, one gzip file per URL.
#[derive(Debug, Clone)]
pub struct RawCache {
    dir: PathBuf,
}

impl RawCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.gz", cache_key(url)))
    }

    /// Returns the cached body. Missing, truncated, or undecodable entries
    /// are misses.
    pub fn load(&self, url: &str) -> Option<String> {
        let path = self.entry_path(url);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::debug!(path = %path.display(), %err, "cache entry unreadable");
                return None;
            }
        };

        let mut body = String::new();
        match GzDecoder::new(file).read_to_string(&mut body) {
            Ok(_) => Some(body),
            Err(err) => {
                tracing::debug!(path = %path.display(), %err, "cache entry corrupt; treating as miss");
                None
            }
        }
    }

    /// `load` on the blocking pool.
    pub async fn load_quietly(&self, url: &str) -> Option<String> {
        let cache = self.clone();
        let url = url.to_owned();
        match tokio::task::spawn_blocking(move || cache.load(&url)).await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(%err, "cache read task failed");
                None
            }
        }
    }

    /// Writes the entry to a temporary sibling and renames it into place so
    /// concurrent readers never observe a partial file.
    pub fn store(&self, url: &str, body: &str) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create cache dir: {}", self.dir.display()))?;

        let path = self.entry_path(url);
        let tmp_path = path.with_extension(format!("gz.tmp.{}", uuid::Uuid::new_v4().simple()));

        let result = write_gzip(&tmp_path, body).and_then(|()| {
            std::fs::rename(&tmp_path, &path)
                .with_context(|| format!("rename tmp to final: {}", path.display()))
        });
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        }
        result.map(|()| path)
    }

    /// Runs `store` on the blocking pool. Failures are logged and swallowed.
    pub async fn store_quietly(&self, url: &str, body: &str) {
        let cache = self.clone();
        let url = url.to_owned();
        let body = body.to_owned();
        let task = tokio::task::spawn_blocking(move || {
            if let Err(err) = cache.store(&url, &body) {
                tracing::warn!(%url, "cache write failed: {err:#}");
            }
        });
        if let Err(err) = task.await {
            tracing::warn!(%err, "cache write task failed");
        }
    }
}

/// Deterministic file stem for a URL: every character outside `[A-Za-z0-9]`
/// becomes `_`.
pub fn cache_key(url: &str) -> String {
    url.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}

fn write_gzip(path: &Path, body: &str) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("create: {}", path.display()))?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder
        .write_all(body.as_bytes())
        .with_context(|| format!("write: {}", path.display()))?;
    let file = encoder
        .finish()
        .with_context(|| format!("finish gzip: {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("sync: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_replaces_non_alphanumerics() {
        assert_eq!(
            cache_key("http://archiveofourown.org/works/1?view_adult=true"),
            "http___archiveofourown_org_works_1_view_adult_true"
        );
        assert_eq!(cache_key("é-1"), "__1");
    }

    #[test]
    fn entry_path_uses_gz_suffix() {
        let cache = RawCache::new("raw");
        assert_eq!(
            cache.entry_path("https://x.org/a"),
            PathBuf::from("raw").join("https___x_org_a.gz")
        );
    }

    #[test]
    fn store_then_load_returns_body_and_leaves_no_temp_files() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let cache = RawCache::new(temp.path().join("raw"));

        let path = cache.store("https://x.org/works/1", "<html>ü</html>")?;
        assert!(path.ends_with("https___x_org_works_1.gz"));
        assert_eq!(cache.load("https://x.org/works/1").as_deref(), Some("<html>ü</html>"));

        let names = std::fs::read_dir(cache.dir())?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(names, vec!["https___x_org_works_1.gz".to_owned()]);
        Ok(())
    }

    #[test]
    fn missing_entry_is_a_miss() {
        let temp = tempfile::TempDir::new().unwrap();
        let cache = RawCache::new(temp.path());
        assert_eq!(cache.load("https://x.org/none"), None);
    }

    #[test]
    fn truncated_entry_is_a_miss() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let cache = RawCache::new(temp.path());
        let path = cache.store("https://x.org/works/2", &"paragraph ".repeat(500))?;

        let bytes = std::fs::read(&path)?;
        std::fs::write(&path, &bytes[..bytes.len() / 2])?;
        assert_eq!(cache.load("https://x.org/works/2"), None);
        Ok(())
    }
}
