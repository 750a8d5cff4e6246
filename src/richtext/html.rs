//! Structured document → HTML for the editing surface.

use super::{Block, Document, ListItem, Mark, TextRun};

impl Mark {
    pub fn tag(self) -> &'static str {
        match self {
            Mark::Bold => "strong",
            Mark::Italic => "em",
        }
    }
}

/// Render a document as an HTML fragment.
///
/// Each block maps to a fixed tag. Blocks of an unknown kind render their
/// text with no wrapping tag. Output is deterministic for a given document.
pub fn decode_to_html(document: &Document) -> String {
    let mut out = String::new();
    for block in &document.content {
        write_block(&mut out, block);
    }
    out
}

fn write_block(out: &mut String, block: &Block) {
    match block {
        Block::Paragraph(runs) => write_wrapped(out, "p", runs),
        Block::Heading { level, content } => {
            let tag = format!("h{}", level.number());
            write_wrapped(out, &tag, content);
        }
        Block::UnorderedList(items) => write_list(out, "ul", items),
        Block::OrderedList(items) => write_list(out, "ol", items),
        Block::Other { content, .. } => write_runs(out, content),
    }
}

fn write_wrapped(out: &mut String, tag: &str, runs: &[TextRun]) {
    out.push('<');
    out.push_str(tag);
    out.push('>');
    write_runs(out, runs);
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

fn write_list(out: &mut String, tag: &str, items: &[ListItem]) {
    out.push_str(&format!("<{}>", tag));
    for item in items {
        write_wrapped(out, "li", &item.content);
    }
    out.push_str(&format!("</{}>", tag));
}

fn write_runs(out: &mut String, runs: &[TextRun]) {
    for run in runs {
        out.push_str(&render_run(run));
    }
}

/// Escape a run's text and fold its marks around it, innermost first.
pub fn render_run(run: &TextRun) -> String {
    run.marks
        .iter()
        .fold(escape_text(&run.value), |inner, mark| {
            let tag = mark.tag();
            format!("<{tag}>{inner}</{tag}>")
        })
}

/// Escape text for use as HTML element content.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}
