//! Structured rich-text documents.
//!
//! `Document` is the node tree a Contentful-shaped CMS stores for rich text
//! fields. It serializes to and from the CMS wire shape
//! (`{"nodeType": "document", "data": {}, "content": [...]}`), and converts
//! to HTML for editing (`decode_to_html`) and back (`encode_from_html`).

pub mod html;
pub mod parse;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use html::decode_to_html;
pub use parse::{encode_from_html, text_content, TextIndex};

/// Inline formatting carried by a text run.
///
/// Ordering matters: marks are folded onto a run in `Ord` order, so a run
/// that is both bold and italic renders as `<em><strong>..</strong></em>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mark {
    Bold,
    Italic,
}

impl Mark {
    fn wire_name(self) -> &'static str {
        match self {
            Mark::Bold => "bold",
            Mark::Italic => "italic",
        }
    }

    fn from_wire(name: &str) -> Option<Self> {
        match name {
            "bold" => Some(Mark::Bold),
            "italic" => Some(Mark::Italic),
            _ => None,
        }
    }
}

/// A leaf run of text with its marks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextRun {
    pub value: String,
    pub marks: BTreeSet<Mark>,
}

impl TextRun {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            marks: BTreeSet::new(),
        }
    }

    pub fn with_marks(value: impl Into<String>, marks: impl IntoIterator<Item = Mark>) -> Self {
        Self {
            value: value.into(),
            marks: marks.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadingLevel {
    One,
    Two,
    Three,
}

impl HeadingLevel {
    pub fn number(self) -> u8 {
        match self {
            HeadingLevel::One => 1,
            HeadingLevel::Two => 2,
            HeadingLevel::Three => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(HeadingLevel::One),
            2 => Some(HeadingLevel::Two),
            3 => Some(HeadingLevel::Three),
            _ => None,
        }
    }
}

/// One entry of an ordered or unordered list. Its inline content behaves
/// like a nested paragraph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListItem {
    pub content: Vec<TextRun>,
}

impl ListItem {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            content: vec![TextRun::plain(value)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph(Vec<TextRun>),
    Heading {
        level: HeadingLevel,
        content: Vec<TextRun>,
    },
    UnorderedList(Vec<ListItem>),
    OrderedList(Vec<ListItem>),
    /// A node kind the codec does not model. Only its text survives.
    Other {
        node_type: String,
        content: Vec<TextRun>,
    },
}

impl Block {
    /// Concatenated text of the block. List items are separated by newlines.
    pub fn plain_text(&self) -> String {
        match self {
            Block::Paragraph(runs)
            | Block::Heading { content: runs, .. }
            | Block::Other { content: runs, .. } => join_runs(runs),
            Block::UnorderedList(items) | Block::OrderedList(items) => items
                .iter()
                .map(|item| join_runs(&item.content))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Every text run in reading order.
    pub fn runs(&self) -> Box<dyn Iterator<Item = &TextRun> + '_> {
        match self {
            Block::Paragraph(runs)
            | Block::Heading { content: runs, .. }
            | Block::Other { content: runs, .. } => Box::new(runs.iter()),
            Block::UnorderedList(items) | Block::OrderedList(items) => {
                Box::new(items.iter().flat_map(|item| item.content.iter()))
            }
        }
    }
}

fn join_runs(runs: &[TextRun]) -> String {
    runs.iter().map(|r| r.value.as_str()).collect()
}

/// Root of a rich-text field. Block order is reading order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawNode", into = "RawNode")]
pub struct Document {
    pub content: Vec<Block>,
}

impl Document {
    pub fn new(content: Vec<Block>) -> Self {
        Self { content }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

const DOCUMENT: &str = "document";
const TEXT: &str = "text";
const PARAGRAPH: &str = "paragraph";
const LIST_ITEM: &str = "list-item";
const UNORDERED_LIST: &str = "unordered-list";
const ORDERED_LIST: &str = "ordered-list";

/// Untyped CMS node. `content` is optional on the wire; a missing array reads
/// as empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNode {
    node_type: String,
    #[serde(default)]
    data: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<Vec<RawNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    marks: Option<Vec<RawMark>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawMark {
    #[serde(rename = "type")]
    kind: String,
}

impl RawNode {
    fn block(node_type: &str, content: Vec<RawNode>) -> Self {
        Self {
            node_type: node_type.to_string(),
            content: Some(content),
            ..Default::default()
        }
    }

    fn text(run: &TextRun) -> Self {
        Self {
            node_type: TEXT.to_string(),
            value: Some(run.value.clone()),
            marks: Some(
                run.marks
                    .iter()
                    .map(|m| RawMark {
                        kind: m.wire_name().to_string(),
                    })
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn children(&self) -> &[RawNode] {
        self.content.as_deref().unwrap_or_default()
    }
}

/// Flatten inline nodes into runs. Inline wrappers such as hyperlinks keep
/// their text; unknown mark types are dropped.
fn collect_runs(nodes: &[RawNode], out: &mut Vec<TextRun>) {
    for node in nodes {
        if node.node_type == TEXT {
            let marks = node
                .marks
                .iter()
                .flatten()
                .filter_map(|m| Mark::from_wire(&m.kind));
            out.push(TextRun::with_marks(
                node.value.clone().unwrap_or_default(),
                marks,
            ));
        } else {
            collect_runs(node.children(), out);
        }
    }
}

fn runs_of(nodes: &[RawNode]) -> Vec<TextRun> {
    let mut runs = Vec::new();
    collect_runs(nodes, &mut runs);
    runs
}

fn list_items(node: &RawNode) -> Vec<ListItem> {
    node.children()
        .iter()
        .map(|item| ListItem {
            content: runs_of(item.children()),
        })
        .collect()
}

impl From<&RawNode> for Block {
    fn from(node: &RawNode) -> Self {
        match node.node_type.as_str() {
            PARAGRAPH => Block::Paragraph(runs_of(node.children())),
            UNORDERED_LIST => Block::UnorderedList(list_items(node)),
            ORDERED_LIST => Block::OrderedList(list_items(node)),
            other => {
                let level = other
                    .strip_prefix("heading-")
                    .and_then(|n| n.parse::<u8>().ok())
                    .and_then(HeadingLevel::from_number);
                match level {
                    Some(level) => Block::Heading {
                        level,
                        content: runs_of(node.children()),
                    },
                    None if other == TEXT => Block::Other {
                        node_type: other.to_string(),
                        content: runs_of(std::slice::from_ref(node)),
                    },
                    None => Block::Other {
                        node_type: other.to_string(),
                        content: runs_of(node.children()),
                    },
                }
            }
        }
    }
}

fn raw_runs(runs: &[TextRun]) -> Vec<RawNode> {
    runs.iter().map(RawNode::text).collect()
}

fn raw_list(node_type: &str, items: &[ListItem]) -> RawNode {
    let items = items
        .iter()
        .map(|item| {
            RawNode::block(
                LIST_ITEM,
                vec![RawNode::block(PARAGRAPH, raw_runs(&item.content))],
            )
        })
        .collect();
    RawNode::block(node_type, items)
}

impl From<&Block> for RawNode {
    fn from(block: &Block) -> Self {
        match block {
            Block::Paragraph(runs) => RawNode::block(PARAGRAPH, raw_runs(runs)),
            Block::Heading { level, content } => {
                RawNode::block(&format!("heading-{}", level.number()), raw_runs(content))
            }
            Block::UnorderedList(items) => raw_list(UNORDERED_LIST, items),
            Block::OrderedList(items) => raw_list(ORDERED_LIST, items),
            Block::Other { node_type, content } => RawNode::block(node_type, raw_runs(content)),
        }
    }
}

impl From<RawNode> for Document {
    fn from(root: RawNode) -> Self {
        Document::new(root.children().iter().map(Block::from).collect())
    }
}

impl From<Document> for RawNode {
    fn from(doc: Document) -> Self {
        RawNode::block(DOCUMENT, doc.content.iter().map(RawNode::from).collect())
    }
}
