//! Splits a markup subtree into plain-text chunks.
//!
//! Consecutive inline content (text nodes and inline elements) is buffered and
//! consolidated into a single chunk. A `<p>` or `<div>` child flushes the buffer
//! and its own chunks are yielded in place; a `<br>` flushes without descending.
//! Every container ends with one trailing chunk, which may be empty; callers
//! drop empty chunks.

use scraper::ElementRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Paragraph,
    Div,
    LineBreak,
    Other,
}

impl ElementKind {
    fn of(element: &ElementRef<'_>) -> Self {
        match element.value().name() {
            "p" => Self::Paragraph,
            "div" => Self::Div,
            "br" => Self::LineBreak,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone)]
enum Child<'a> {
    Text(&'a str),
    Element(ElementKind, ElementRef<'a>),
}

#[derive(Debug, Clone)]
struct Frame<'a> {
    children: std::vec::IntoIter<Child<'a>>,
    pending: Vec<String>,
}

impl<'a> Frame<'a> {
    fn new(container: ElementRef<'a>) -> Self {
        let children = container
            .children()
            .filter_map(|node| {
                if let Some(text) = node.value().as_text() {
                    return Some(Child::Text(&**text));
                }
                let element = ElementRef::wrap(node)?;
                Some(Child::Element(ElementKind::of(&element), element))
            })
            .collect::<Vec<_>>();

        Self {
            children: children.into_iter(),
            pending: Vec::new(),
        }
    }

    fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        Some(consolidate(std::mem::take(&mut self.pending)))
    }
}

/// Lazy chunk iterator over one subtree. Uses an explicit stack so deeply
/// nested documents do not recurse on the call stack.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    stack: Vec<Frame<'a>>,
}

impl Iterator for Chunks<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let frame = self.stack.last_mut()?;
            let Some(child) = frame.children.next() else {
                let finished = self.stack.pop()?;
                return Some(consolidate(finished.pending));
            };

            match child {
                Child::Text(text) => frame.pending.push(text.to_owned()),
                Child::Element(ElementKind::Other, element) => {
                    frame.pending.push(element.text().collect::<String>());
                }
                Child::Element(ElementKind::LineBreak, _) => {
                    if let Some(chunk) = frame.flush() {
                        return Some(chunk);
                    }
                }
                Child::Element(ElementKind::Paragraph | ElementKind::Div, element) => {
                    let flushed = frame.flush();
                    self.stack.push(Frame::new(element));
                    if let Some(chunk) = flushed {
                        return Some(chunk);
                    }
                }
            }
        }
    }
}

pub fn segment(container: ElementRef<'_>) -> Chunks<'_> {
    Chunks {
        stack: vec![Frame::new(container)],
    }
}

/// Non-empty chunks joined by newlines; used for notes and summaries.
pub fn into_text(container: ElementRef<'_>) -> String {
    segment(container)
        .filter_map(|chunk| {
            let chunk = chunk.trim();
            (!chunk.is_empty()).then(|| chunk.to_owned())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Trims each piece and joins with single spaces. Whitespace-only pieces
/// still take a slot, so callers trim the result.
fn consolidate(pieces: Vec<String>) -> String {
    pieces
        .iter()
        .map(|piece| piece.trim())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use scraper::{Html, Selector};

    use super::*;

    fn chunks_of(fragment: &str) -> Vec<String> {
        let html = Html::parse_fragment(&format!(r#"<div id="root">{fragment}</div>"#));
        let selector = Selector::parse("#root").unwrap();
        let root = html.select(&selector).next().unwrap();
        segment(root).collect()
    }

    fn non_empty(chunks: Vec<String>) -> Vec<String> {
        chunks.into_iter().filter(|c| !c.is_empty()).collect()
    }

    #[test]
    fn paragraphs_become_separate_chunks() {
        let chunks = non_empty(chunks_of("<p>One.</p><p>Two <em>and</em> more.</p>"));
        assert_eq!(chunks, vec!["One.", "Two and more."]);
    }

    #[test]
    fn inline_run_is_flushed_before_block() {
        let chunks = non_empty(chunks_of("lead <b>in</b><p>body</p>tail"));
        assert_eq!(chunks, vec!["lead in", "body", "tail"]);
    }

    #[test]
    fn whitespace_between_inline_elements_keeps_its_slot() {
        let chunks = non_empty(chunks_of("<p>a <b>b</b> <i>c</i></p>"));
        assert_eq!(chunks, vec!["a b  c"]);
    }

    #[test]
    fn line_break_splits_without_descending() {
        let chunks = non_empty(chunks_of("<p>first line<br>second line<br/>third</p>"));
        assert_eq!(chunks, vec!["first line", "second line", "third"]);
    }

    #[test]
    fn nested_blocks_keep_document_order() {
        let chunks = non_empty(chunks_of(
            "a<div>b<p>c</p>d<div><p>e</p>f</div>g</div>h",
        ));
        assert_eq!(chunks, vec!["a", "b", "c", "d", "e", "f", "g", "h"]);
    }

    #[test]
    fn trailing_chunk_is_always_emitted() {
        let chunks = chunks_of("<p>only</p>");
        // paragraph body, then the (empty) trailing chunk of the root
        assert_eq!(chunks, vec!["only".to_owned(), String::new()]);
    }

    #[test]
    fn concatenated_chunks_match_visible_text() {
        let fragment = "Intro <i>text</i><p>Para <a href=\"#\">link</a> one</p>\
                        <div>Inner<br>break</div>closing words";
        let html = Html::parse_fragment(&format!(r#"<div id="root">{fragment}</div>"#));
        let selector = Selector::parse("#root").unwrap();
        let root = html.select(&selector).next().unwrap();

        let joined = non_empty(segment(root).collect()).join(" ");
        let visible = root
            .text()
            .flat_map(|t| t.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(joined, visible);
    }

    #[test]
    fn segmenting_twice_yields_the_same_sequence() {
        let html = Html::parse_fragment(r#"<div id="root"><p>x</p>y</div>"#);
        let selector = Selector::parse("#root").unwrap();
        let root = html.select(&selector).next().unwrap();
        let first = segment(root).collect::<Vec<_>>();
        let second = segment(root).collect::<Vec<_>>();
        assert_eq!(first, second);
    }

    #[test]
    fn into_text_joins_non_empty_chunks_with_newlines() {
        let html = Html::parse_fragment(r#"<blockquote id="q"><p>A</p><p> </p><p>B</p></blockquote>"#);
        let selector = Selector::parse("#q").unwrap();
        let quote = html.select(&selector).next().unwrap();
        assert_eq!(into_text(quote), "A\nB");
    }
}
