use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::model::{ChapterRecord, ErrorRecord, NULL_SENTINEL, ParagraphRecord, WorkRecord};

pub const STORY_COLUMNS: [&str; 27] = [
    "fic_id",
    "title",
    "author",
    "author_key",
    "rating",
    "category",
    "fandom",
    "relationship",
    "character",
    "additional tags",
    "language",
    "published",
    "status",
    "status date",
    "words",
    "chapters",
    "comments",
    "kudos",
    "bookmarks",
    "hits",
    "chapter_count",
    "series",
    "seriespart",
    "seriesid",
    "summary",
    "preface_notes",
    "afterword_notes",
];

pub const CHAPTER_COLUMNS: [&str; 8] = [
    "fic_id",
    "title",
    "summary",
    "preface_notes",
    "afterword_notes",
    "chapter_num",
    "chapter_title",
    "paragraph_count",
];

pub const ERROR_COLUMNS: [&str; 2] = ["fic_id", "error"];

pub const PARAGRAPH_COLUMNS: [&str; 4] = ["fic_id", "chapter_id", "para_id", "text"];

/// File locations for one fandom scope.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(out_dir: &Path, fandom: &str) -> Self {
        Self {
            root: out_dir.join(format!("ao3_{fandom}_text")),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stories_csv(&self) -> PathBuf {
        self.root.join("stories.csv")
    }

    pub fn chapters_csv(&self) -> PathBuf {
        self.root.join("chapters.csv")
    }

    pub fn errors_csv(&self) -> PathBuf {
        self.root.join("errors.csv")
    }

    pub fn content_dir(&self) -> PathBuf {
        self.root.join("stories")
    }

    pub fn content_file(&self, fic_id: &str, chapter_num: usize) -> PathBuf {
        self.content_dir()
            .join(format!("{fic_id}_{chapter_num:04}.csv"))
    }

    pub fn denied_dump(&self, fic_id: &str) -> PathBuf {
        self.root.join(format!("err_{fic_id}.err.txt"))
    }
}

struct Sink<W = File> {
    path: PathBuf,
    out: W,
}

impl Sink {
    /// Opens `path` for appending; writes `columns` only if the file is empty.
    fn open(path: PathBuf, columns: &[&str]) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open sink: {}", path.display()))?;
        let is_empty = file
            .metadata()
            .with_context(|| format!("stat sink: {}", path.display()))?
            .len()
            == 0;

        let mut sink = Self::new(path, file);
        if is_empty {
            tracing::info!(path = %sink.path.display(), "writing header row");
            sink.write_row(columns.iter().map(|c| Cow::Borrowed(*c)))?;
        }
        Ok(sink)
    }
}

impl<W: Write> Sink<W> {
    fn new(path: PathBuf, out: W) -> Self {
        Self { path, out }
    }

    /// Encodes the row on its own and hands it to `out` in one write, so a
    /// failed row leaves nothing buffered for the next one.
    fn write_row<'a>(&mut self, fields: impl IntoIterator<Item = Cow<'a, str>>) -> anyhow::Result<()> {
        let fields = fields.into_iter().collect::<Vec<_>>();
        let mut encoder = csv::Writer::from_writer(Vec::new());
        encoder
            .write_record(fields.iter().map(|field| field.as_bytes()))
            .with_context(|| format!("encode row: {}", self.path.display()))?;
        let row = encoder
            .into_inner()
            .map_err(|err| anyhow::anyhow!("encode row: {}: {}", self.path.display(), err.error()))?;

        self.out
            .write_all(&row)
            .with_context(|| format!("write row: {}", self.path.display()))?;
        self.out
            .flush()
            .with_context(|| format!("flush: {}", self.path.display()))
    }
}

/// Append-only writer for the story, chapter, and error sinks plus the
/// per-chapter paragraph files. Never reads back or rewrites earlier rows.
pub struct IncrementalWriter {
    layout: OutputLayout,
    stories: Sink,
    chapters: Sink,
    errors: Sink,
}

impl IncrementalWriter {
    pub fn open(layout: OutputLayout) -> anyhow::Result<Self> {
        std::fs::create_dir_all(layout.content_dir()).with_context(|| {
            format!("create content dir: {}", layout.content_dir().display())
        })?;

        Ok(Self {
            stories: Sink::open(layout.stories_csv(), &STORY_COLUMNS)?,
            chapters: Sink::open(layout.chapters_csv(), &CHAPTER_COLUMNS)?,
            errors: Sink::open(layout.errors_csv(), &ERROR_COLUMNS)?,
            layout,
        })
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn write_work(&mut self, work: &WorkRecord) -> anyhow::Result<()> {
        let row = STORY_COLUMNS
            .iter()
            .map(|column| story_value(work, column))
            .collect::<anyhow::Result<Vec<_>>>()?;
        self.stories.write_row(row)
    }

    pub fn write_chapter(&mut self, chapter: &ChapterRecord) -> anyhow::Result<()> {
        let row = CHAPTER_COLUMNS
            .iter()
            .map(|column| chapter_value(chapter, column));
        self.chapters.write_row(row)
    }

    pub fn write_error(&mut self, error: &ErrorRecord) -> anyhow::Result<()> {
        self.errors.write_row([
            Cow::Borrowed(error.fic_id.as_str()),
            Cow::Borrowed(error.error.as_str()),
        ])
    }

    /// Creates (truncating) the paragraph file for one chapter. A paragraph
    /// that fails to write is recorded in the error sink and skipped.
    pub fn write_paragraphs(
        &mut self,
        fic_id: &str,
        chapter_num: usize,
        paragraphs: &[ParagraphRecord],
    ) -> anyhow::Result<PathBuf> {
        let path = self.layout.content_file(fic_id, chapter_num);
        let file = File::create(&path)
            .with_context(|| format!("create paragraph file: {}", path.display()))?;
        self.write_paragraph_rows(Sink::new(path.clone(), file), fic_id, chapter_num, paragraphs)?;
        Ok(path)
    }

    fn write_paragraph_rows<W: Write>(
        &mut self,
        mut content: Sink<W>,
        fic_id: &str,
        chapter_num: usize,
        paragraphs: &[ParagraphRecord],
    ) -> anyhow::Result<()> {
        content.write_row(PARAGRAPH_COLUMNS.iter().map(|c| Cow::Borrowed(*c)))?;

        for paragraph in paragraphs {
            let row = [
                Cow::Borrowed(paragraph.fic_id.as_str()),
                Cow::Owned(paragraph.chapter_id.to_string()),
                Cow::Owned(paragraph.para_id.to_string()),
                Cow::Borrowed(paragraph.text.as_str()),
            ];
            if let Err(err) = content.write_row(row) {
                tracing::warn!(
                    fic_id,
                    chapter_num,
                    para_id = paragraph.para_id,
                    "paragraph write failed: {err:#}"
                );
                self.write_error(&ErrorRecord::new(
                    fic_id,
                    format!("Paragraph {chapter_num}.{}: {err}", paragraph.para_id),
                ))?;
            }
        }

        Ok(())
    }
}

fn story_value<'a>(work: &'a WorkRecord, column: &str) -> anyhow::Result<Cow<'a, str>> {
    let borrowed = |value: &'a str| -> anyhow::Result<Cow<'a, str>> { Ok(Cow::Borrowed(value)) };
    let list = |values: &Vec<String>| -> anyhow::Result<Cow<'a, str>> {
        let json = serde_json::to_string(values)
            .with_context(|| format!("serialize tag list: {column}"))?;
        Ok(Cow::Owned(json))
    };

    match column {
        "fic_id" => borrowed(&work.fic_id),
        "title" => borrowed(&work.title),
        "author" => borrowed(&work.author),
        "author_key" => borrowed(&work.author_key),
        "rating" => list(&work.tags.rating),
        "category" => list(&work.tags.category),
        "fandom" => list(&work.tags.fandom),
        "relationship" => list(&work.tags.relationship),
        "character" => list(&work.tags.character),
        "additional tags" => list(&work.tags.freeform),
        "language" => borrowed(&work.stats.language),
        "published" => borrowed(&work.stats.published),
        "status" => borrowed(&work.stats.status),
        "status date" => borrowed(&work.stats.status_date),
        "words" => borrowed(&work.stats.words),
        "chapters" => borrowed(&work.stats.chapters),
        "comments" => borrowed(&work.stats.comments),
        "kudos" => borrowed(&work.stats.kudos),
        "bookmarks" => borrowed(&work.stats.bookmarks),
        "hits" => borrowed(&work.stats.hits),
        "chapter_count" => Ok(Cow::Owned(work.chapter_count.to_string())),
        "series" => borrowed(&work.series.name),
        "seriespart" => borrowed(&work.series.part),
        "seriesid" => borrowed(&work.series.id),
        "summary" => borrowed(&work.summary),
        "preface_notes" => borrowed(&work.preface_notes),
        "afterword_notes" => borrowed(&work.afterword_notes),
        _ => borrowed(NULL_SENTINEL),
    }
}

fn chapter_value<'a>(chapter: &'a ChapterRecord, column: &str) -> Cow<'a, str> {
    match column {
        "fic_id" => Cow::Borrowed(chapter.fic_id.as_str()),
        "title" => Cow::Borrowed(chapter.title.as_str()),
        "summary" => Cow::Borrowed(chapter.summary.as_str()),
        "preface_notes" => Cow::Borrowed(chapter.preface_notes.as_str()),
        "afterword_notes" => Cow::Borrowed(chapter.afterword_notes.as_str()),
        "chapter_num" => Cow::Owned(chapter.chapter_num.to_string()),
        "chapter_title" => Cow::Borrowed(chapter.chapter_title.as_str()),
        "paragraph_count" => Cow::Owned(chapter.paragraph_count.to_string()),
        _ => Cow::Borrowed(NULL_SENTINEL),
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{Series, Stats, Tags};

    use super::*;

    fn work(fic_id: &str) -> WorkRecord {
        WorkRecord {
            fic_id: fic_id.to_owned(),
            title: "Title, with comma".to_owned(),
            author: "pen".to_owned(),
            author_key: "key".to_owned(),
            tags: Tags {
                fandom: vec!["F1".to_owned(), "F \"2\"".to_owned()],
                ..Tags::default()
            },
            stats: Stats {
                language: "English".to_owned(),
                published: "2020-01-01".to_owned(),
                status: "Completed".to_owned(),
                status_date: "2020-01-01".to_owned(),
                words: "10".to_owned(),
                chapters: "1/1".to_owned(),
                comments: NULL_SENTINEL.to_owned(),
                kudos: "3".to_owned(),
                bookmarks: "0".to_owned(),
                hits: "9".to_owned(),
            },
            chapter_count: 1,
            series: Series::default(),
            summary: "Line one\nLine two".to_owned(),
            preface_notes: String::new(),
            afterword_notes: String::new(),
        }
    }

    fn read_rows(path: &Path) -> anyhow::Result<Vec<Vec<String>>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_owned).collect());
        }
        Ok(rows)
    }

    #[test]
    fn content_file_is_zero_padded() {
        let layout = OutputLayout::new(Path::new("out"), "hp");
        assert_eq!(
            layout.content_file("12345", 7),
            PathBuf::from("out/ao3_hp_text/stories/12345_0007.csv")
        );
    }

    #[test]
    fn header_is_written_once_across_reopens() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let layout = OutputLayout::new(temp.path(), "f");

        let mut writer = IncrementalWriter::open(layout.clone())?;
        writer.write_work(&work("1"))?;
        drop(writer);

        let mut writer = IncrementalWriter::open(layout.clone())?;
        writer.write_work(&work("2"))?;
        drop(writer);

        let rows = read_rows(&layout.stories_csv())?;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], STORY_COLUMNS.map(str::to_owned).to_vec());
        assert_eq!(rows[1][0], "1");
        assert_eq!(rows[2][0], "2");
        Ok(())
    }

    #[test]
    fn story_row_follows_column_order() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let layout = OutputLayout::new(temp.path(), "f");
        let mut writer = IncrementalWriter::open(layout.clone())?;
        writer.write_work(&work("5"))?;

        let rows = read_rows(&layout.stories_csv())?;
        let row = &rows[1];
        let col = |name: &str| STORY_COLUMNS.iter().position(|c| *c == name).unwrap();

        assert_eq!(row.len(), STORY_COLUMNS.len());
        assert_eq!(row[col("title")], "Title, with comma");
        assert_eq!(row[col("fandom")], r#"["F1","F \"2\""]"#);
        assert_eq!(row[col("rating")], "[]");
        assert_eq!(row[col("comments")], NULL_SENTINEL);
        assert_eq!(row[col("chapter_count")], "1");
        assert_eq!(row[col("summary")], "Line one\nLine two");
        Ok(())
    }

    #[test]
    fn error_and_chapter_sinks_get_headers() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let layout = OutputLayout::new(temp.path(), "f");
        let mut writer = IncrementalWriter::open(layout.clone())?;
        writer.write_error(&ErrorRecord::new("9", "Access Denied"))?;
        writer.write_chapter(&ChapterRecord {
            fic_id: "9".to_owned(),
            title: "T".to_owned(),
            summary: String::new(),
            preface_notes: String::new(),
            afterword_notes: String::new(),
            chapter_num: 1,
            chapter_title: "One".to_owned(),
            paragraph_count: 0,
        })?;

        let errors = read_rows(&layout.errors_csv())?;
        assert_eq!(errors, vec![vec!["fic_id", "error"], vec!["9", "Access Denied"]]);
        let chapters = read_rows(&layout.chapters_csv())?;
        assert_eq!(chapters[0], CHAPTER_COLUMNS.map(str::to_owned).to_vec());
        assert_eq!(chapters[1], vec!["9", "T", "", "", "", "1", "One", "0"]);
        Ok(())
    }

    #[test]
    fn paragraph_file_is_rewritten_not_appended() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let layout = OutputLayout::new(temp.path(), "f");
        let mut writer = IncrementalWriter::open(layout)?;
        let paragraphs = vec![ParagraphRecord {
            fic_id: "3".to_owned(),
            chapter_id: 2,
            para_id: 1,
            text: "Ünïcode, \"quoted\"".to_owned(),
        }];

        writer.write_paragraphs("3", 2, &paragraphs)?;
        let path = writer.write_paragraphs("3", 2, &paragraphs)?;

        assert!(path.ends_with("3_0002.csv"));
        let rows = read_rows(&path)?;
        assert_eq!(
            rows,
            vec![
                vec!["fic_id", "chapter_id", "para_id", "text"],
                vec!["3", "2", "1", "Ünïcode, \"quoted\""],
            ]
        );
        Ok(())
    }

    /// Accepts writes except the `fail_at`-th (0-based), which errors
    /// without consuming any bytes.
    struct FailingWriter {
        written: Vec<u8>,
        calls: usize,
        fail_at: usize,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let call = self.calls;
            self.calls += 1;
            if call == self.fail_at {
                return Err(std::io::Error::other("disk full"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_paragraph_is_recorded_and_the_rest_are_written() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let layout = OutputLayout::new(temp.path(), "f");
        let mut writer = IncrementalWriter::open(layout.clone())?;
        let paragraphs = (1..=3)
            .map(|para_id| ParagraphRecord {
                fic_id: "8".to_owned(),
                chapter_id: 1,
                para_id,
                text: format!("Paragraph, number {para_id}"),
            })
            .collect::<Vec<_>>();

        // header is write 0, so write 2 is the second paragraph
        let mut out = FailingWriter {
            written: Vec::new(),
            calls: 0,
            fail_at: 2,
        };
        writer.write_paragraph_rows(
            Sink::new(PathBuf::from("8_0001.csv"), &mut out),
            "8",
            1,
            &paragraphs,
        )?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(out.written.as_slice());
        let rows = reader
            .records()
            .map(|record| record.map(|r| r.iter().map(str::to_owned).collect::<Vec<_>>()))
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(
            rows,
            vec![
                vec!["fic_id", "chapter_id", "para_id", "text"],
                vec!["8", "1", "1", "Paragraph, number 1"],
                vec!["8", "1", "3", "Paragraph, number 3"],
            ]
        );

        let errors = read_rows(&layout.errors_csv())?;
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[1][0], "8");
        assert!(errors[1][1].starts_with("Paragraph 1.2:"), "{:?}", errors[1]);
        Ok(())
    }
}
