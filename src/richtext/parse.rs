//! HTML fragment → structured document.
//!
//! The scanner is lenient and only as complete as editor output needs:
//! attributes are skipped, comments and doctypes are dropped, `script` and
//! `style` bodies are ignored, and missing end tags are closed implicitly.

use std::ops::Range;

use super::{Block, Document, HeadingLevel, ListItem, TextRun};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Element { name: String, children: Vec<Node> },
    Text(String),
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Tags that separate lines of visible text.
const BREAKS_TEXT: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li", "div", "blockquote", "pre", "br",
    "hr", "table", "tr",
];

/// Opening one of these implicitly closes an open `<p>`.
const CLOSES_PARAGRAPH: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "div", "blockquote", "pre", "table",
];

/// Parse an HTML fragment into a document.
///
/// Only top-level elements of the body are considered. `p`, `h1`-`h3`, `ul`
/// and `ol` map to blocks carrying their text content; every other element
/// and any bare top-level text is skipped. Inline formatting is not
/// reconstructed, so every produced run has no marks.
pub fn encode_from_html(html: &str) -> Document {
    let nodes = parse_fragment(html);
    let content = top_level(&nodes)
        .iter()
        .filter_map(block_from_node)
        .collect();
    Document::new(content)
}

/// Text content of an HTML fragment, entities decoded.
pub fn text_content(html: &str) -> String {
    let mut out = String::new();
    collect_text(&parse_fragment(html), &mut out);
    out
}

fn block_from_node(node: &Node) -> Option<Block> {
    let Node::Element { name, children } = node else {
        return None;
    };
    let runs = || vec![TextRun::plain(text_of(children))];
    let heading = |level| Block::Heading {
        level,
        content: runs(),
    };
    match name.as_str() {
        "p" => Some(Block::Paragraph(runs())),
        "h1" => Some(heading(HeadingLevel::One)),
        "h2" => Some(heading(HeadingLevel::Two)),
        "h3" => Some(heading(HeadingLevel::Three)),
        "ul" => Some(Block::UnorderedList(list_items(children))),
        "ol" => Some(Block::OrderedList(list_items(children))),
        _ => None,
    }
}

fn list_items(children: &[Node]) -> Vec<ListItem> {
    children
        .iter()
        .filter_map(|child| match child {
            Node::Element { name, children } if name == "li" => {
                Some(ListItem::plain(text_of(children)))
            }
            _ => None,
        })
        .collect()
}

fn text_of(nodes: &[Node]) -> String {
    let mut out = String::new();
    collect_text(nodes, &mut out);
    out
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Element { children, .. } => collect_text(children, out),
        }
    }
}

fn top_level(nodes: &[Node]) -> &[Node] {
    find_element(nodes, "body")
        .or_else(|| find_element(nodes, "html"))
        .unwrap_or(nodes)
}

fn find_element<'a>(nodes: &'a [Node], wanted: &str) -> Option<&'a [Node]> {
    for node in nodes {
        if let Node::Element { name, children } = node {
            if name == wanted {
                return Some(children);
            }
            if let Some(found) = find_element(children, wanted) {
                return Some(found);
            }
        }
    }
    None
}

#[derive(Default)]
struct TreeBuilder {
    root: Vec<Node>,
    open: Vec<(String, Vec<Node>)>,
}

impl TreeBuilder {
    fn push(&mut self, node: Node) {
        let children = match self.open.last_mut() {
            Some((_, children)) => children,
            None => &mut self.root,
        };
        if let (Node::Text(text), Some(Node::Text(prev))) = (&node, children.last_mut()) {
            prev.push_str(text);
            return;
        }
        children.push(node);
    }

    fn text(&mut self, raw: &str) {
        if !raw.is_empty() {
            self.push(Node::Text(decode_entities(raw)));
        }
    }

    fn is_open(&self, name: &str) -> bool {
        self.open.iter().any(|(n, _)| n == name)
    }

    fn close_top(&mut self) {
        if let Some((name, children)) = self.open.pop() {
            self.push(Node::Element { name, children });
        }
    }

    /// Close up to and including the nearest open `name`. Stray end tags
    /// are ignored.
    fn close(&mut self, name: &str) {
        if !self.is_open(name) {
            return;
        }
        while let Some((top, _)) = self.open.last() {
            let done = top == name;
            self.close_top();
            if done {
                break;
            }
        }
    }

    fn open(&mut self, name: String) {
        if name == "li" {
            let li_in_list = self
                .open
                .iter()
                .rev()
                .take_while(|(n, _)| n != "ul" && n != "ol")
                .any(|(n, _)| n == "li");
            if li_in_list {
                self.close("li");
            }
        }
        if CLOSES_PARAGRAPH.contains(&name.as_str()) && self.is_open("p") {
            self.close("p");
        }
        self.open.push((name, Vec::new()));
    }

    fn finish(mut self) -> Vec<Node> {
        while !self.open.is_empty() {
            self.close_top();
        }
        self.root
    }
}

fn parse_fragment(input: &str) -> Vec<Node> {
    let bytes = input.as_bytes();
    let mut builder = TreeBuilder::default();
    let mut idx = 0_usize;

    while idx < bytes.len() {
        if bytes[idx] != b'<' {
            let next = find_byte(bytes, idx, b'<').unwrap_or(bytes.len());
            builder.text(&input[idx..next]);
            idx = next;
            continue;
        }

        if bytes[idx..].starts_with(b"<!--") {
            idx = input[idx + 4..]
                .find("-->")
                .map(|end| idx + 4 + end + 3)
                .unwrap_or(bytes.len());
            continue;
        }

        if bytes[idx..].starts_with(b"<!") || bytes[idx..].starts_with(b"<?") {
            idx = find_byte(bytes, idx, b'>')
                .map(|end| end + 1)
                .unwrap_or(bytes.len());
            continue;
        }

        let Some((tag, next)) = parse_tag(bytes, idx) else {
            builder.text("<");
            idx += 1;
            continue;
        };

        if tag.is_end {
            builder.close(&tag.name);
        } else if RAW_TEXT_ELEMENTS.contains(&tag.name.as_str()) && !tag.self_closing {
            idx = skip_raw_text(input, next, &tag.name);
            continue;
        } else if VOID_ELEMENTS.contains(&tag.name.as_str()) {
            builder.push(Node::Element {
                name: tag.name,
                children: Vec::new(),
            });
        } else {
            builder.open(tag.name);
            if tag.self_closing {
                builder.close_top();
            }
        }
        idx = next;
    }

    builder.finish()
}

/// Visible text of an HTML fragment, with each character mapped back to
/// the markup it came from.
#[derive(Debug, Clone, Default)]
pub struct TextIndex {
    text: String,
    /// Offset in `text` and source bytes of every visible char.
    chars: Vec<(usize, Range<usize>)>,
    /// Source ranges of matched start and end tags.
    elements: Vec<(Range<usize>, Range<usize>)>,
}

impl TextIndex {
    pub fn new(html: &str) -> Self {
        let bytes = html.as_bytes();
        let mut index = TextIndex::default();
        let mut open: Vec<(String, Range<usize>)> = Vec::new();
        let mut idx = 0_usize;

        while idx < bytes.len() {
            if bytes[idx] != b'<' {
                let next = find_byte(bytes, idx, b'<').unwrap_or(bytes.len());
                index.push_text(html, idx..next);
                idx = next;
                continue;
            }

            if bytes[idx..].starts_with(b"<!--") {
                idx = html[idx + 4..]
                    .find("-->")
                    .map(|end| idx + 4 + end + 3)
                    .unwrap_or(bytes.len());
                continue;
            }

            if bytes[idx..].starts_with(b"<!") || bytes[idx..].starts_with(b"<?") {
                idx = find_byte(bytes, idx, b'>')
                    .map(|end| end + 1)
                    .unwrap_or(bytes.len());
                continue;
            }

            let Some((tag, next)) = parse_tag(bytes, idx) else {
                index.push_char('<', idx..idx + 1);
                idx += 1;
                continue;
            };
            let raw = idx..next;

            if BREAKS_TEXT.contains(&tag.name.as_str()) {
                index.push_char('\n', raw.clone());
            }
            if tag.is_end {
                if let Some(pos) = open.iter().rposition(|(name, _)| *name == tag.name) {
                    open.truncate(pos + 1);
                    if let Some((_, start)) = open.pop() {
                        index.elements.push((start, raw));
                    }
                }
            } else if RAW_TEXT_ELEMENTS.contains(&tag.name.as_str()) && !tag.self_closing {
                idx = skip_raw_text(html, next, &tag.name);
                continue;
            } else if !VOID_ELEMENTS.contains(&tag.name.as_str()) && !tag.self_closing {
                open.push((tag.name, raw));
            }
            idx = next;
        }

        index
    }

    fn push_char(&mut self, ch: char, raw: Range<usize>) {
        self.chars.push((self.text.len(), raw));
        self.text.push(ch);
    }

    fn push_text(&mut self, html: &str, raw: Range<usize>) {
        let segment = &html[raw.clone()];
        let mut offset = 0;
        while let Some(ch) = segment[offset..].chars().next() {
            let (ch, len) = if ch == '&' {
                decode_entity(&segment[offset..]).unwrap_or((ch, 1))
            } else {
                (ch, ch.len_utf8())
            };
            let at = raw.start + offset;
            self.push_char(ch, at..at + len);
            offset += len;
        }
    }

    /// The visible text. Block boundaries read as newlines.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Source range of the `occurrence`-th (0-based) visible match of
    /// `needle`. A match that crosses an element boundary grows to cover
    /// the whole element, so the range never splits a tag pair.
    pub fn find(&self, needle: &str, occurrence: usize) -> Option<Range<usize>> {
        if needle.is_empty() {
            return None;
        }
        let (start, m) = self.text.match_indices(needle).nth(occurrence)?;
        self.source_range(start..start + m.len())
    }

    fn source_range(&self, visible: Range<usize>) -> Option<Range<usize>> {
        let first = self.chars.partition_point(|(at, _)| *at < visible.start);
        let last = self.chars.partition_point(|(at, _)| *at < visible.end);
        let start = self.chars.get(first)?.1.start;
        let end = self.chars.get(last.checked_sub(1)?)?.1.end;
        Some(self.widen(start..end))
    }

    fn widen(&self, mut range: Range<usize>) -> Range<usize> {
        loop {
            let mut grown = range.clone();
            for (open, close) in &self.elements {
                let open_inside = open.start >= range.start && open.end <= range.end;
                let close_inside = close.start >= range.start && close.end <= range.end;
                if open_inside != close_inside {
                    grown.start = grown.start.min(open.start);
                    grown.end = grown.end.max(close.end);
                }
            }
            if grown == range {
                return range;
            }
            range = grown;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedTag {
    name: String,
    is_end: bool,
    self_closing: bool,
}

/// Parse a tag starting at `start` (which holds `<`). Returns the tag and the
/// index just past its `>`.
fn parse_tag(bytes: &[u8], start: usize) -> Option<(ParsedTag, usize)> {
    let mut idx = start + 1;
    let is_end = bytes.get(idx) == Some(&b'/');
    if is_end {
        idx += 1;
    }

    if !bytes.get(idx)?.is_ascii_alphabetic() {
        return None;
    }
    let name_start = idx;
    while idx < bytes.len() && is_tag_name_char(bytes[idx]) {
        idx += 1;
    }
    let name = String::from_utf8_lossy(&bytes[name_start..idx]).to_ascii_lowercase();

    let mut quote: Option<u8> = None;
    while idx < bytes.len() {
        let byte = bytes[idx];
        match quote {
            Some(q) if byte == q => quote = None,
            Some(_) => {}
            None => match byte {
                b'"' | b'\'' => quote = Some(byte),
                b'>' => {
                    let self_closing = idx > name_start && bytes[idx - 1] == b'/';
                    return Some((
                        ParsedTag {
                            name,
                            is_end,
                            self_closing,
                        },
                        idx + 1,
                    ));
                }
                _ => {}
            },
        }
        idx += 1;
    }
    None
}

fn is_tag_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b':'
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    bytes[from..]
        .iter()
        .position(|&b| b == needle)
        .map(|pos| from + pos)
}

fn skip_raw_text(input: &str, from: usize, name: &str) -> usize {
    let closing = format!("</{}", name);
    match input[from..].to_ascii_lowercase().find(&closing) {
        Some(pos) => {
            let bytes = input.as_bytes();
            find_byte(bytes, from + pos, b'>')
                .map(|end| end + 1)
                .unwrap_or(bytes.len())
        }
        None => input.len(),
    }
}

/// Decode the named entities editors emit plus numeric references. Anything
/// unrecognised is left as written.
fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match decode_entity(tail) {
            Some((ch, len)) => {
                out.push(ch);
                rest = &tail[len..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// `tail` starts with `&`. Returns the decoded char and the entity's length.
fn decode_entity(tail: &str) -> Option<(char, usize)> {
    const MAX_ENTITY_LEN: usize = 10;

    let semi = tail.get(1..)?.find(';')? + 1;
    if semi > MAX_ENTITY_LEN {
        return None;
    }
    let name = &tail[1..semi];
    let ch = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None if num.bytes().all(|b| b.is_ascii_digit()) => num.parse::<u32>().ok()?,
                None => return None,
            };
            char::from_u32(code)?
        }
    };
    Some((ch, semi + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::richtext::{decode_to_html, Mark};

    fn kinds_and_text(doc: &Document) -> Vec<(&'static str, String)> {
        doc.content
            .iter()
            .map(|block| {
                let kind = match block {
                    Block::Paragraph(_) => "p",
                    Block::Heading { level, .. } => match level {
                        HeadingLevel::One => "h1",
                        HeadingLevel::Two => "h2",
                        HeadingLevel::Three => "h3",
                    },
                    Block::UnorderedList(_) => "ul",
                    Block::OrderedList(_) => "ol",
                    Block::Other { .. } => "other",
                };
                (kind, block.plain_text())
            })
            .collect()
    }

    #[test]
    fn test_intro_scenario_drops_marks() {
        let doc = encode_from_html("<h1>Intro</h1><p>Hello <strong>world</strong></p>");
        assert_eq!(
            kinds_and_text(&doc),
            vec![("h1", "Intro".to_string()), ("p", "Hello world".to_string())]
        );
        assert!(doc.content.iter().all(|b| b.runs().all(|r| r.marks.is_empty())));
    }

    #[test]
    fn test_round_trip_keeps_structure_and_loses_marks() {
        let original = Document::new(vec![
            Block::Heading {
                level: HeadingLevel::Two,
                content: vec![TextRun::plain("Title & more")],
            },
            Block::Paragraph(vec![
                TextRun::plain("plain "),
                TextRun::with_marks("bold", [Mark::Bold]),
                TextRun::with_marks(" italic", [Mark::Italic]),
            ]),
            Block::UnorderedList(vec![ListItem::plain("a"), ListItem::plain("b < c")]),
            Block::OrderedList(vec![ListItem::plain("first")]),
            Block::Heading {
                level: HeadingLevel::Three,
                content: vec![TextRun::plain("End")],
            },
        ]);

        let back = encode_from_html(&decode_to_html(&original));
        assert_eq!(kinds_and_text(&back), kinds_and_text(&original));
        assert!(back.content.iter().all(|b| b.runs().all(|r| r.marks.is_empty())));
    }

    #[test]
    fn test_list_items_become_single_runs() {
        let doc = encode_from_html("<ul><li>one <em>two</em></li><p>stray</p><li>three</li></ul>");
        assert_eq!(
            doc.content,
            vec![Block::UnorderedList(vec![
                ListItem::plain("one two"),
                ListItem::plain("three"),
            ])]
        );
    }

    #[test]
    fn test_unknown_elements_and_bare_text_are_skipped() {
        let doc = encode_from_html("loose<div>box</div><blockquote>q</blockquote><h4>deep</h4><p>kept</p>");
        assert_eq!(kinds_and_text(&doc), vec![("p", "kept".to_string())]);
    }

    #[test]
    fn test_reads_body_children_of_full_document() {
        let html = "<!DOCTYPE html><html><head><title>t</title></head>\
                    <body><h2>Head</h2><!-- note --><p>Body</p></body></html>";
        let doc = encode_from_html(html);
        assert_eq!(
            kinds_and_text(&doc),
            vec![("h2", "Head".to_string()), ("p", "Body".to_string())]
        );
    }

    #[test]
    fn test_implicitly_closed_tags() {
        let doc = encode_from_html("<p>one<p>two<ol><li>a<li>b</ol></span>");
        assert_eq!(
            doc.content,
            vec![
                Block::Paragraph(vec![TextRun::plain("one")]),
                Block::Paragraph(vec![TextRun::plain("two")]),
                Block::OrderedList(vec![ListItem::plain("a"), ListItem::plain("b")]),
            ]
        );
    }

    #[test]
    fn test_decodes_entities_and_skips_scripts() {
        let doc = encode_from_html(
            "<p>a &amp; b &lt;c&gt; &#39;d&#x27; &bogus; &nbsp;x</p><script>var s = '<p>';</script>",
        );
        assert_eq!(
            kinds_and_text(&doc),
            vec![("p", "a & b <c> 'd' &bogus; \u{a0}x".to_string())]
        );
    }

    #[test]
    fn test_void_and_attributes() {
        let doc = encode_from_html(r#"<p class="x" data-y='a>b'>line<br/>next<img src="i.png"></p>"#);
        assert_eq!(kinds_and_text(&doc), vec![("p", "linenext".to_string())]);
    }

    #[test]
    fn test_literal_less_than_is_text() {
        assert_eq!(text_content("1 < 2 <b>and</b> 3"), "1 < 2 and 3");
    }

    #[test]
    fn test_empty_input_is_empty_document() {
        assert!(encode_from_html("").is_empty());
        assert!(encode_from_html("   \n").is_empty());
    }

    #[test]
    fn test_text_index_maps_visible_text_to_source() {
        let html = r#"<p>Learn <a href="https://rust-lang.org">more</a> about rust &amp; co</p>"#;
        let index = TextIndex::new(html);
        assert_eq!(index.text(), "\nLearn more about rust & co\n");

        let rust = index.find("rust", 0).unwrap();
        assert_eq!(&html[rust], "rust");
        assert_eq!(index.find("rust", 1), None);

        let amp = index.find("rust & co", 0).unwrap();
        assert_eq!(&html[amp], "rust &amp; co");
    }

    #[test]
    fn test_text_index_widens_across_elements() {
        let html = "<p>Hello <b>wor</b>ld</p><p>next</p>";
        let index = TextIndex::new(html);
        let range = index.find("world", 0).unwrap();
        assert_eq!(&html[range], "<b>wor</b>ld");
        // Blocks are separated, so a match cannot run from one into the next.
        assert_eq!(index.find("worldnext", 0), None);
        assert_eq!(index.find("", 0), None);
    }
}
