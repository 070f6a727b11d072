use serde::{Deserialize, Serialize};

/// Literal written in place of a value that could not be extracted.
pub const NULL_SENTINEL: &str = "null";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags {
    pub rating: Vec<String>,
    pub category: Vec<String>,
    pub fandom: Vec<String>,
    pub relationship: Vec<String>,
    pub character: Vec<String>,
    pub freeform: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub part: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub language: String,
    pub published: String,
    pub status: String,
    pub status_date: String,
    pub words: String,
    pub chapters: String,
    pub comments: String,
    pub kudos: String,
    pub bookmarks: String,
    pub hits: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRecord {
    pub fic_id: String,
    pub title: String,
    pub author: String,
    pub author_key: String,
    pub tags: Tags,
    pub stats: Stats,
    pub chapter_count: usize,
    pub series: Series,
    pub summary: String,
    pub preface_notes: String,
    pub afterword_notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub fic_id: String,
    pub title: String,
    pub summary: String,
    pub preface_notes: String,
    pub afterword_notes: String,
    pub chapter_num: usize,
    pub chapter_title: String,
    pub paragraph_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParagraphRecord {
    pub fic_id: String,
    pub chapter_id: usize,
    pub para_id: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub fic_id: String,
    pub error: String,
}

impl ErrorRecord {
    pub fn new(fic_id: &str, error: impl Into<String>) -> Self {
        Self {
            fic_id: fic_id.to_owned(),
            error: error.into(),
        }
    }
}

/// A chapter's row plus its paragraphs in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedChapter {
    pub record: ChapterRecord,
    pub paragraphs: Vec<ParagraphRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedWork {
    pub work: WorkRecord,
    pub chapters: Vec<ExtractedChapter>,
    /// Non-fatal problems that still produced a work row.
    pub soft_errors: Vec<ErrorRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Work(Box<ExtractedWork>),
    Denied,
}
