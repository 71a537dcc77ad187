//! Block model
//!
//! An ordered list of typed content blocks. Every mutating operation leaves
//! `order` equal to the block's position in the list (dense `0..n-1`).

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Open metadata map (formatting flags, dimensions, captions, language...)
pub type BlockMetadata = BTreeMap<String, Value>;

/// Completion sentinel for checklist items
pub const CHECKLIST_DONE: &str = "[x]";
pub const CHECKLIST_OPEN: &str = "[ ]";

/// Kind of a content block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Text,
    Heading,
    Subheading,
    List,
    Checklist,
    Image,
    Video,
    Link,
    Code,
    Quote,
    Divider,
}

/// A single addressable unit of lesson content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    pub content: String,
    pub order: u32,
    #[serde(default)]
    pub metadata: BlockMetadata,
}

/// Direction for single-step moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    Up,
    Down,
}

// =============================================================================
// TYPED VIEW
// =============================================================================

/// One checklist line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistItem<'a> {
    pub text: &'a str,
    pub done: bool,
}

/// Media reference shared by image, video and link blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef<'a> {
    pub src: &'a str,
    pub alt: Option<&'a str>,
    pub caption: Option<&'a str>,
    pub width: Option<u64>,
    pub height: Option<u64>,
}

/// Typed view over a block's payload.
///
/// Built from `kind` + raw `content`/`metadata`. A payload that no longer
/// fits its kind (after a retype) yields empty or absent fields, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockBody<'a> {
    Text(&'a str),
    Heading(&'a str),
    Subheading(&'a str),
    List(Vec<&'a str>),
    Checklist(Vec<ChecklistItem<'a>>),
    Image(MediaRef<'a>),
    Video(MediaRef<'a>),
    Link(MediaRef<'a>),
    Code { source: &'a str, language: Option<&'a str> },
    Quote { text: &'a str, author: Option<&'a str> },
    Divider { label: Option<&'a str> },
}

impl Block {
    pub fn new(kind: BlockKind, content: impl Into<String>, metadata: BlockMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            content: content.into(),
            order: 0,
            metadata,
        }
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    fn meta_u64(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(Value::as_u64)
    }

    fn media(&self) -> MediaRef<'_> {
        MediaRef {
            src: self.content.trim(),
            alt: self.meta_str("alt"),
            caption: self.meta_str("caption"),
            width: self.meta_u64("width"),
            height: self.meta_u64("height"),
        }
    }

    /// Typed view of this block's payload
    pub fn body(&self) -> BlockBody<'_> {
        match self.kind {
            BlockKind::Text => BlockBody::Text(&self.content),
            BlockKind::Heading => BlockBody::Heading(&self.content),
            BlockKind::Subheading => BlockBody::Subheading(&self.content),
            BlockKind::List => BlockBody::List(
                self.content
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .collect(),
            ),
            BlockKind::Checklist => BlockBody::Checklist(
                self.content
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(parse_checklist_line)
                    .collect(),
            ),
            BlockKind::Image => BlockBody::Image(self.media()),
            BlockKind::Video => BlockBody::Video(self.media()),
            BlockKind::Link => BlockBody::Link(self.media()),
            BlockKind::Code => BlockBody::Code {
                source: &self.content,
                language: self.meta_str("language"),
            },
            BlockKind::Quote => BlockBody::Quote {
                text: &self.content,
                author: self.meta_str("author"),
            },
            BlockKind::Divider => BlockBody::Divider {
                label: Some(self.content.trim()).filter(|l| !l.is_empty()),
            },
        }
    }

    /// Human-readable text of the block, used for summaries and word counts
    pub fn plain_text(&self) -> String {
        match self.body() {
            BlockBody::Text(s) | BlockBody::Heading(s) | BlockBody::Subheading(s) => s.to_string(),
            BlockBody::List(items) => items.join("\n"),
            BlockBody::Checklist(items) => items
                .iter()
                .map(|i| i.text)
                .collect::<Vec<_>>()
                .join("\n"),
            BlockBody::Image(m) | BlockBody::Video(m) | BlockBody::Link(m) => {
                m.caption.or(m.alt).unwrap_or_default().to_string()
            }
            BlockBody::Code { .. } => String::new(),
            BlockBody::Quote { text, .. } => text.to_string(),
            BlockBody::Divider { label } => label.unwrap_or_default().to_string(),
        }
    }
}

fn parse_checklist_line(line: &str) -> ChecklistItem<'_> {
    if let Some(rest) = line
        .strip_prefix(CHECKLIST_DONE)
        .or_else(|| line.strip_prefix("[X]"))
    {
        ChecklistItem { text: rest.trim_start(), done: true }
    } else if let Some(rest) = line.strip_prefix(CHECKLIST_OPEN) {
        ChecklistItem { text: rest.trim_start(), done: false }
    } else {
        ChecklistItem { text: line, done: false }
    }
}

// =============================================================================
// REORDER PRIMITIVE
// =============================================================================

/// Move the element at `from` so that it ends up at index `to` of the result.
///
/// `to` is clamped to the last position. An out-of-range `from` returns the
/// list unchanged.
pub fn reorder<T>(mut list: Vec<T>, from: usize, to: usize) -> Vec<T> {
    if from >= list.len() {
        return list;
    }
    let item = list.remove(from);
    let to = to.min(list.len());
    list.insert(to, item);
    list
}

// =============================================================================
// BLOCK DOCUMENT
// =============================================================================

/// Ordered block list owned by a proposal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockDocument {
    blocks: Vec<Block>,
}

impl BlockDocument {
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    /// Build a document from an externally supplied list, renumbering `order`
    /// to array position. Duplicate ids are rejected.
    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self, AppError> {
        let mut seen = HashSet::with_capacity(blocks.len());
        for block in &blocks {
            if !seen.insert(block.id) {
                return Err(AppError::Validation(format!(
                    "Duplicate block id {}",
                    block.id
                )));
            }
        }
        let mut doc = Self { blocks };
        doc.renumber();
        Ok(doc)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    fn position(&self, id: Uuid) -> Result<usize, AppError> {
        self.blocks
            .iter()
            .position(|b| b.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Block {} not found", id)))
    }

    fn renumber(&mut self) {
        for (index, block) in self.blocks.iter_mut().enumerate() {
            block.order = index as u32;
        }
    }

    /// Insert a new block, appending when `at_index` is omitted or past the end
    pub fn insert(
        &mut self,
        kind: BlockKind,
        content: impl Into<String>,
        metadata: BlockMetadata,
        at_index: Option<usize>,
    ) -> Block {
        let block = Block::new(kind, content, metadata);
        let index = at_index.unwrap_or(self.blocks.len()).min(self.blocks.len());
        self.blocks.insert(index, block);
        self.renumber();
        self.blocks[index].clone()
    }

    /// Replace content and/or metadata of a block; kind and id are untouched
    pub fn update(
        &mut self,
        id: Uuid,
        content: Option<String>,
        metadata: Option<BlockMetadata>,
    ) -> Result<&Block, AppError> {
        let index = self.position(id)?;
        let block = &mut self.blocks[index];
        if let Some(content) = content {
            block.content = content;
        }
        if let Some(metadata) = metadata {
            block.metadata = metadata;
        }
        Ok(&self.blocks[index])
    }

    pub fn remove(&mut self, id: Uuid) -> Result<Block, AppError> {
        let index = self.position(id)?;
        let removed = self.blocks.remove(index);
        self.renumber();
        Ok(removed)
    }

    /// Swap with the neighbour in `direction`; no-op at a boundary
    pub fn move_block(&mut self, id: Uuid, direction: MoveDirection) -> Result<(), AppError> {
        let index = self.position(id)?;
        let target = match direction {
            MoveDirection::Up if index > 0 => index - 1,
            MoveDirection::Down if index + 1 < self.blocks.len() => index + 1,
            _ => return Ok(()),
        };
        self.blocks.swap(index, target);
        self.renumber();
        Ok(())
    }

    /// Re-insert `id` immediately before `before_id`, or at the end when `None`
    pub fn reorder(&mut self, id: Uuid, before_id: Option<Uuid>) -> Result<(), AppError> {
        let from = self.position(id)?;
        let to = match before_id {
            Some(before) if before == id => return Ok(()),
            Some(before) => {
                let before_index = self.position(before)?;
                // index of `before` once `id` has been taken out
                if before_index > from {
                    before_index - 1
                } else {
                    before_index
                }
            }
            None => self.blocks.len() - 1,
        };
        self.blocks = reorder(std::mem::take(&mut self.blocks), from, to);
        self.renumber();
        Ok(())
    }

    /// Change the kind only; content and metadata are kept verbatim
    pub fn retype(&mut self, id: Uuid, kind: BlockKind) -> Result<&Block, AppError> {
        let index = self.position(id)?;
        self.blocks[index].kind = kind;
        Ok(&self.blocks[index])
    }

    /// Copy of this document with fresh block ids
    pub fn with_fresh_ids(&self) -> Self {
        let blocks = self
            .blocks
            .iter()
            .map(|b| Block { id: Uuid::new_v4(), ..b.clone() })
            .collect();
        Self { blocks }
    }

    pub fn plain_text(&self) -> String {
        self.blocks
            .iter()
            .map(Block::plain_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn word_count(&self) -> usize {
        self.plain_text().split_whitespace().count()
    }
}
