use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use url::Url;

use crate::cli::FetchArgs;
use crate::fetch::RetryPolicy;

/// Fallback location of the User-Agent string when `--header` is empty.
pub const HEADER_FILE: &str = ".browser_header.txt";

#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub ids: Vec<String>,
    pub fandom: String,
    pub user_agent: String,
    pub restart: Option<String>,
    pub first_chapter: bool,
    pub out_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub populate_cache: bool,
    pub base_url: Url,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl ScrapeConfig {
    pub fn from_args(args: FetchArgs) -> anyhow::Result<Self> {
        let base_url = Url::parse(&args.base_url).context("parse --base-url")?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            anyhow::bail!("--base-url must be http/https: {base_url}");
        }
        if args.retries == 0 {
            anyhow::bail!("--retries must be at least 1");
        }

        let user_agent = if args.header.is_empty() {
            read_header_file(Path::new(HEADER_FILE))?
        } else {
            args.header
        };

        Ok(Self {
            ids: args.ids,
            fandom: args.fandom,
            user_agent,
            restart: args.restart.filter(|id| !id.is_empty()),
            first_chapter: args.first_chapter,
            out_dir: PathBuf::from(args.out_dir),
            cache_dir: PathBuf::from(args.cache_dir),
            populate_cache: !args.no_cache_write,
            base_url,
            retry: RetryPolicy {
                delay: Duration::from_millis(args.delay_ms),
                cooldown: Duration::from_millis(args.cooldown_ms),
                attempts: args.retries,
            },
            timeout: Duration::from_secs(args.timeout_secs),
        })
    }

    /// `<base>/works/<id>?view_adult=true[&view_full_work=true]&show_comments=true`
    pub fn work_url(&self, fic_id: &str) -> anyhow::Result<Url> {
        let mut url = self
            .base_url
            .join(&format!("works/{fic_id}"))
            .with_context(|| format!("build work url for {fic_id}"))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("view_adult", "true");
            if !self.first_chapter {
                query.append_pair("view_full_work", "true");
            }
            query.append_pair("show_comments", "true");
        }
        Ok(url)
    }
}

fn read_header_file(path: &Path) -> anyhow::Result<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().to_owned()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err).with_context(|| format!("read header file: {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser as _;

    use super::*;
    use crate::cli::{Cli, Command};

    fn config(extra: &[&str]) -> ScrapeConfig {
        let mut argv = vec!["ao3scrape", "fetch", "--header", "me/1.0"];
        argv.extend_from_slice(extra);
        argv.push("12345");
        let Command::Fetch(args) = Cli::parse_from(argv).command else {
            panic!("expected fetch");
        };
        ScrapeConfig::from_args(args).unwrap()
    }

    #[test]
    fn defaults_match_courtesy_policy() {
        let config = config(&[]);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.user_agent, "me/1.0");
        assert_eq!(config.fandom, "some_fandom");
        assert!(config.populate_cache);
        assert_eq!(config.restart, None);
    }

    #[test]
    fn work_url_requests_full_work_with_comments() {
        let url = config(&[]).work_url("12345").unwrap();
        assert_eq!(
            url.as_str(),
            "https://archiveofourown.org/works/12345?view_adult=true&view_full_work=true&show_comments=true"
        );
    }

    #[test]
    fn first_chapter_mode_omits_full_work() {
        let url = config(&["--first-chapter"]).work_url("7").unwrap();
        assert_eq!(
            url.as_str(),
            "https://archiveofourown.org/works/7?view_adult=true&show_comments=true"
        );
    }

    #[test]
    fn header_file_is_trimmed_and_optional() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join(HEADER_FILE);
        assert_eq!(read_header_file(&path)?, "");
        std::fs::write(&path, "  Bot/2 (me@example.com)\n")?;
        assert_eq!(read_header_file(&path)?, "Bot/2 (me@example.com)");
        Ok(())
    }
}
