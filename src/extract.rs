use anyhow::Context as _;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::model::{
    ChapterRecord, ErrorRecord, ExtractedChapter, ExtractedWork, Extraction, NULL_SENTINEL,
    ParagraphRecord, Series, Stats, Tags, WorkRecord,
};
use crate::segment::{into_text, segment};

/// Heading the archive renders above single-chapter bodies.
const CHAPTER_TEXT_PLACEHOLDER: &str = "Chapter Text";

/// Every optional value the extractor looks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Language,
    Published,
    Status,
    StatusDate,
    Words,
    Chapters,
    Comments,
    Kudos,
    Bookmarks,
    Hits,
    ChapterTitle,
    Summary,
    PrefaceNotes,
    AfterwordNotes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fallback {
    Sentinel,
    Empty,
    Completed,
    PublishedDate,
}

impl Field {
    fn fallback(self) -> Fallback {
        match self {
            Self::Title
            | Self::Language
            | Self::Published
            | Self::Words
            | Self::Chapters
            | Self::Comments
            | Self::Kudos
            | Self::Bookmarks
            | Self::Hits => Fallback::Sentinel,
            Self::Status => Fallback::Completed,
            Self::StatusDate => Fallback::PublishedDate,
            Self::ChapterTitle | Self::Summary | Self::PrefaceNotes | Self::AfterwordNotes => {
                Fallback::Empty
            }
        }
    }

    /// `dd` class carrying the statistic, for fields that are statistics.
    fn stat_class(self) -> Option<&'static str> {
        match self {
            Self::Language => Some("language"),
            Self::Published => Some("published"),
            // The `dd.status` value is the date of the last status change.
            Self::StatusDate => Some("status"),
            Self::Words => Some("words"),
            Self::Chapters => Some("chapters"),
            Self::Comments => Some("comments"),
            Self::Kudos => Some("kudos"),
            Self::Bookmarks => Some("bookmarks"),
            Self::Hits => Some("hits"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{0:?} not found")]
pub struct NotFound(pub Field);

/// Resolves a lookup through the fallback table. `published` is only
/// consulted for fields that fall back to the publication date.
pub fn resolve(lookup: Result<String, NotFound>, published: Option<&str>) -> String {
    match lookup {
        Ok(value) => value,
        Err(NotFound(field)) => match field.fallback() {
            Fallback::Sentinel => NULL_SENTINEL.to_owned(),
            Fallback::Empty => String::new(),
            Fallback::Completed => "Completed".to_owned(),
            Fallback::PublishedDate => published.unwrap_or(NULL_SENTINEL).to_owned(),
        },
    }
}

const STAT_FIELDS: [Field; 9] = [
    Field::Language,
    Field::Published,
    Field::StatusDate,
    Field::Words,
    Field::Chapters,
    Field::Comments,
    Field::Kudos,
    Field::Bookmarks,
    Field::Hits,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagCategory {
    Rating,
    Category,
    Fandom,
    Relationship,
    Character,
    Freeform,
}

impl TagCategory {
    const ALL: [Self; 6] = [
        Self::Rating,
        Self::Category,
        Self::Fandom,
        Self::Relationship,
        Self::Character,
        Self::Freeform,
    ];

    fn class(self) -> &'static str {
        match self {
            Self::Rating => "rating",
            Self::Category => "category",
            Self::Fandom => "fandom",
            Self::Relationship => "relationship",
            Self::Character => "character",
            Self::Freeform => "freeform",
        }
    }

    fn slot(self, tags: &mut Tags) -> &mut Vec<String> {
        match self {
            Self::Rating => &mut tags.rating,
            Self::Category => &mut tags.category,
            Self::Fandom => &mut tags.fandom,
            Self::Relationship => &mut tags.relationship,
            Self::Character => &mut tags.character,
            Self::Freeform => &mut tags.freeform,
        }
    }
}

struct Selectors {
    flash_error: Selector,
    meta: Selector,
    title: Selector,
    byline: Selector,
    link: Selector,
    series_position: Selector,
    status_label: Selector,
    stats: Vec<(Field, Selector)>,
    tags: Vec<(TagCategory, Selector)>,
    chapters_root: Selector,
    chapter_node: Selector,
    chapter_heading: Selector,
    chapter_body: Selector,
    preface: Selector,
    blockquote: Selector,
    work_notes: Selector,
    work_summary: Selector,
    chapter_summary: Selector,
    chapter_notes: Selector,
    chapter_end: Selector,
    scoped_preface: Selector,
    scoped_heading: Selector,
    scoped_end: Selector,
}

impl Selectors {
    fn new() -> anyhow::Result<Self> {
        let stats = STAT_FIELDS
            .into_iter()
            .filter_map(|field| field.stat_class().map(|class| (field, class)))
            .map(|(field, class)| Ok((field, create_selector(&format!("dd.{class}"))?)))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let tags = TagCategory::ALL
            .into_iter()
            .map(|category| {
                let selector = create_selector(&format!("dd.{}.tags .tag", category.class()))?;
                Ok((category, selector))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            flash_error: create_selector(".flash.error")?,
            meta: create_selector(".work.meta.group")?,
            title: create_selector("h2.title.heading")?,
            byline: create_selector(".byline")?,
            link: create_selector("a")?,
            series_position: create_selector("span.series span.position")?,
            status_label: create_selector("dt.status")?,
            stats,
            tags,
            chapters_root: create_selector("div#chapters")?,
            chapter_node: create_selector(r#"div[id^="chapter-"]"#)?,
            chapter_heading: create_selector("h3")?,
            chapter_body: create_selector("div.userstuff")?,
            preface: create_selector("div.preface")?,
            blockquote: create_selector("blockquote")?,
            work_notes: create_selector("div.notes")?,
            work_summary: create_selector("div.summary")?,
            chapter_summary: create_selector("div#summary")?,
            chapter_notes: create_selector("div#notes")?,
            chapter_end: create_selector("div.end")?,
            scoped_preface: create_selector("div.chapter.preface")?,
            scoped_heading: create_selector("div.chapter.preface h3.title")?,
            scoped_end: create_selector("div.chapter.preface div.end")?,
        })
    }
}

fn create_selector(selector: &str) -> anyhow::Result<Selector> {
    Selector::parse(selector)
        .map_err(|err| anyhow::anyhow!("{err:?}"))
        .with_context(|| format!("parse selector: {selector}"))
}

/// A chapter container. `Implicit` covers the fallbacks where the page has
/// no per-chapter markers and may also hold work-level blocks, so lookups
/// inside it only accept chapter-scoped elements.
#[derive(Debug, Clone, Copy)]
enum ChapterNode<'a> {
    Marked(ElementRef<'a>),
    Implicit(ElementRef<'a>),
}

/// Turns a work page into normalized records.
pub struct Extractor {
    selectors: Selectors,
    series_pattern: Regex,
}

impl Extractor {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            selectors: Selectors::new()?,
            series_pattern: Regex::new(r"Part (\d+) of the (.*) series")
                .context("compile series pattern")?,
        })
    }

    pub fn extract(&self, fic_id: &str, html: &str) -> Extraction {
        let doc = Html::parse_document(html);
        let sel = &self.selectors;

        if doc.select(&sel.flash_error).next().is_some() {
            return Extraction::Denied;
        }
        let Some(meta) = doc.select(&sel.meta).next() else {
            return Extraction::Denied;
        };

        let mut soft_errors = Vec::new();

        let title = resolve(
            first(doc.root_element(), &sel.title)
                .map(text_of)
                .ok_or(NotFound(Field::Title)),
            None,
        );

        let (author, author_key) = match self.authorship(&doc) {
            Ok(authorship) => authorship,
            Err(reason) => {
                let display = first(doc.root_element(), &sel.byline)
                    .map(text_of)
                    .unwrap_or_else(|| NULL_SENTINEL.to_owned());
                tracing::warn!(fic_id, %reason, "authorship fallback to display name");
                soft_errors.push(ErrorRecord::new(fic_id, format!("Authorship: {reason}")));
                (display.clone(), display)
            }
        };

        let (summary, preface_notes, afterword_notes) = self.work_notes(&doc);

        let chapters = self
            .chapter_nodes(&doc)
            .into_iter()
            .enumerate()
            .map(|(index, node)| self.chapter(fic_id, &title, index + 1, node))
            .collect::<Vec<_>>();

        let work = WorkRecord {
            fic_id: fic_id.to_owned(),
            title,
            author,
            author_key,
            tags: self.tags(meta),
            stats: self.stats(meta),
            chapter_count: chapters.len(),
            series: self.series(meta).unwrap_or_default(),
            summary,
            preface_notes,
            afterword_notes,
        };

        Extraction::Work(Box::new(ExtractedWork {
            work,
            chapters,
            soft_errors,
        }))
    }

    /// `(pseudonym, author key)` from the first byline profile link,
    /// shaped `/users/<key>/pseuds/<pseudonym>`.
    fn authorship(&self, doc: &Html) -> Result<(String, String), String> {
        let byline = first(doc.root_element(), &self.selectors.byline)
            .ok_or_else(|| "missing byline".to_owned())?;
        let href = first(byline, &self.selectors.link)
            .and_then(|link| link.value().attr("href"))
            .ok_or_else(|| "byline has no profile link".to_owned())?;

        let segments = href.split('/').collect::<Vec<_>>();
        match (segments.get(2), segments.get(4)) {
            (Some(key), Some(pseud)) if !key.is_empty() && !pseud.is_empty() => {
                Ok(((*pseud).to_owned(), (*key).to_owned()))
            }
            _ => Err(format!("unexpected profile link: {href}")),
        }
    }

    fn stats(&self, meta: ElementRef<'_>) -> Stats {
        let lookup = |field: Field| -> Result<String, NotFound> {
            self.selectors
                .stats
                .iter()
                .find(|(candidate, _)| *candidate == field)
                .and_then(|(_, selector)| first(meta, selector))
                .map(text_of)
                .ok_or(NotFound(field))
        };

        let published = resolve(lookup(Field::Published), None);
        let status = first(meta, &self.selectors.status_label)
            .map(|el| text_of(el).trim_end_matches(':').trim().to_owned())
            .ok_or(NotFound(Field::Status));

        Stats {
            language: resolve(lookup(Field::Language), None),
            status: resolve(status, None),
            status_date: resolve(lookup(Field::StatusDate), Some(&published)),
            words: resolve(lookup(Field::Words), None),
            chapters: resolve(lookup(Field::Chapters), None),
            comments: resolve(lookup(Field::Comments), None),
            kudos: resolve(lookup(Field::Kudos), None),
            bookmarks: resolve(lookup(Field::Bookmarks), None),
            hits: resolve(lookup(Field::Hits), None),
            published,
        }
    }

    fn tags(&self, meta: ElementRef<'_>) -> Tags {
        let mut tags = Tags::default();
        for (category, selector) in &self.selectors.tags {
            *category.slot(&mut tags) = meta.select(selector).map(text_of).collect();
        }
        tags
    }

    fn series(&self, meta: ElementRef<'_>) -> Option<Series> {
        let position = first(meta, &self.selectors.series_position)?;
        let text = position.text().collect::<String>();
        let captures = self.series_pattern.captures(&text)?;
        let id = first(position, &self.selectors.link)?
            .value()
            .attr("href")?
            .split('/')
            .nth(2)?
            .to_owned();

        Some(Series {
            name: captures.get(2)?.as_str().to_owned(),
            part: captures.get(1)?.as_str().to_owned(),
            id,
        })
    }

    /// Work-level `(summary, preface notes, afterword notes)`.
    fn work_notes(&self, doc: &Html) -> (String, String, String) {
        let sel = &self.selectors;
        let mut summary = String::new();
        let mut preface_notes = String::new();
        let mut afterword_notes = String::new();

        for preface in doc.select(&sel.preface) {
            let has_class = |name: &str| preface.value().classes().any(|class| class == name);
            if has_class("afterword") {
                if let Some(quote) = first(preface, &sel.blockquote) {
                    afterword_notes = into_text(quote);
                }
            } else if !has_class("chapter") {
                if let Some(quote) = nested(preface, &[&sel.work_notes, &sel.blockquote]) {
                    preface_notes = into_text(quote);
                }
                if let Some(quote) = nested(preface, &[&sel.work_summary, &sel.blockquote]) {
                    summary = into_text(quote);
                }
            }
        }

        (summary, preface_notes, afterword_notes)
    }

    fn chapter_nodes<'a>(&self, doc: &'a Html) -> Vec<ChapterNode<'a>> {
        let sel = &self.selectors;
        let Some(root) = doc.select(&sel.chapters_root).next() else {
            return vec![ChapterNode::Implicit(doc.root_element())];
        };
        let nodes = root
            .select(&sel.chapter_node)
            .map(ChapterNode::Marked)
            .collect::<Vec<_>>();
        if nodes.is_empty() {
            vec![ChapterNode::Implicit(root)]
        } else {
            nodes
        }
    }

    fn chapter(
        &self,
        fic_id: &str,
        work_title: &str,
        chapter_num: usize,
        node: ChapterNode<'_>,
    ) -> ExtractedChapter {
        let sel = &self.selectors;
        let (node, heading, preface, end) = match node {
            ChapterNode::Marked(node) => {
                (node, &sel.chapter_heading, &sel.preface, &sel.chapter_end)
            }
            ChapterNode::Implicit(node) => (
                node,
                &sel.scoped_heading,
                &sel.scoped_preface,
                &sel.scoped_end,
            ),
        };

        let chapter_title = resolve(
            first(node, heading)
                .map(text_of)
                .ok_or(NotFound(Field::ChapterTitle)),
            None,
        );
        let note = |path: &[&Selector], field: Field| {
            resolve(
                nested(node, path).map(into_text).ok_or(NotFound(field)),
                None,
            )
        };
        let summary = note(
            &[preface, &sel.chapter_summary, &sel.blockquote],
            Field::Summary,
        );
        let preface_notes = note(
            &[preface, &sel.chapter_notes, &sel.blockquote],
            Field::PrefaceNotes,
        );
        let afterword_notes = note(&[end, &sel.blockquote], Field::AfterwordNotes);

        let paragraphs = first(node, &sel.chapter_body)
            .map(paragraphs_of)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, text)| ParagraphRecord {
                fic_id: fic_id.to_owned(),
                chapter_id: chapter_num,
                para_id: index + 1,
                text,
            })
            .collect::<Vec<_>>();

        ExtractedChapter {
            record: ChapterRecord {
                fic_id: fic_id.to_owned(),
                title: work_title.to_owned(),
                summary,
                preface_notes,
                afterword_notes,
                chapter_num,
                chapter_title,
                paragraph_count: paragraphs.len(),
            },
            paragraphs,
        }
    }
}

fn paragraphs_of(body: ElementRef<'_>) -> Vec<String> {
    segment(body)
        .filter_map(|chunk| {
            let chunk = chunk.trim();
            (!chunk.is_empty() && chunk != CHAPTER_TEXT_PLACEHOLDER).then(|| chunk.to_owned())
        })
        .collect()
}

fn first<'a>(scope: ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    scope.select(selector).next()
}

/// Follows a chain of "first descendant matching" steps.
fn nested<'a>(scope: ElementRef<'a>, path: &[&Selector]) -> Option<ElementRef<'a>> {
    path.iter()
        .try_fold(scope, |current, selector| first(current, selector))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_owned()
}
