use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scrape works and append their records to the fandom's CSV files.
    Fetch(FetchArgs),
    /// Combine scraped id fragments and drop ids that were already scraped.
    Ids(IdsArgs),
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Work ids, or a single CSV file whose first column holds work ids.
    #[arg(required = true, value_name = "IDS")]
    pub ids: Vec<String>,

    /// Fandom label used to name the output directory.
    #[arg(long, default_value = "some_fandom")]
    pub fandom: String,

    /// User-Agent sent with every request (default: `.browser_header.txt`).
    #[arg(long, default_value = "")]
    pub header: String,

    /// Work id to resume from when reading ids from a CSV file.
    #[arg(long)]
    pub restart: Option<String>,

    /// Only retrieve the first chapter of multi-chapter works.
    #[arg(long)]
    pub first_chapter: bool,

    /// Parent directory for `ao3_<fandom>_text/`.
    #[arg(long, default_value = ".")]
    pub out_dir: String,

    /// Directory of gzip-compressed raw responses.
    #[arg(long, default_value = "raw")]
    pub cache_dir: String,

    /// Do not populate the cache with fresh responses.
    #[arg(long)]
    pub no_cache_write: bool,

    /// Archive origin.
    #[arg(long, default_value = "https://archiveofourown.org")]
    pub base_url: String,

    /// Delay before each request (politeness).
    #[arg(long, default_value_t = 5000)]
    pub delay_ms: u64,

    /// Wait after a failed request before retrying.
    #[arg(long, default_value_t = 30000)]
    pub cooldown_ms: u64,

    /// Attempts per request before giving up.
    #[arg(long, default_value_t = 10)]
    pub retries: u32,

    /// HTTP request timeout.
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,
}

#[derive(Debug, Args)]
pub struct IdsArgs {
    /// Output CSV path (no header; id first).
    pub out: String,

    /// Directory of id fragment CSVs to combine.
    #[arg(long)]
    pub sections_dir: Option<String>,

    /// Single scraped id CSV (used when not combining fragments).
    #[arg(long)]
    pub scraped_path: Option<String>,

    /// Metadata CSV of already scraped stories (needs a `fic_id` column).
    #[arg(long)]
    pub exclude_path: Option<String>,
}
