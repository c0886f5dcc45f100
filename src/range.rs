use serde::Deserialize;

use crate::dom::{Document, NodeId};
use crate::error::HighlightError;
use crate::offsets::TextIndex;

/// `(container, offset)`: chars inside a text node, children inside an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub node: NodeId,
    pub offset: usize,
}

impl Boundary {
    pub fn new(node: NodeId, offset: usize) -> Self {
        Boundary { node, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextRange {
    pub start: Boundary,
    pub end: Boundary,
}

impl TextRange {
    pub fn new(start: Boundary, end: Boundary) -> Self {
        TextRange { start, end }
    }

    /// Range covering the global offsets `[start, end)` of the page body.
    pub fn from_offsets(
        doc: &Document,
        index: &TextIndex,
        start: usize,
        end: usize,
    ) -> Result<Self, HighlightError> {
        let len = index.total_len();
        if start >= end {
            return Err(HighlightError::EmptySelection);
        }
        let (start_node, start_offset) = index
            .locate(start)
            .ok_or(HighlightError::OffsetOutOfRange { offset: start, len })?;
        let (end_node, end_offset) = index
            .locate_end(end)
            .ok_or(HighlightError::OffsetOutOfRange { offset: end, len })?;
        let range = TextRange::new(
            Boundary::new(start_node, start_offset),
            Boundary::new(end_node, end_offset),
        );
        range.validate(doc)?;
        Ok(range)
    }

    pub fn validate(&self, doc: &Document) -> Result<(), HighlightError> {
        for b in [self.start, self.end] {
            if !doc.contains(b.node) {
                return Err(HighlightError::UnknownNode(b.node));
            }
            let len = doc.node_len(b.node);
            if b.offset > len {
                return Err(HighlightError::OffsetOutOfRange {
                    offset: b.offset,
                    len,
                });
            }
        }
        Ok(())
    }

    pub fn common_ancestor(&self, doc: &Document) -> Option<NodeId> {
        doc.common_ancestor(self.start.node, self.end.node)
    }

    /// Global `[start, end)` of the range, or `None` when a boundary lies
    /// outside the indexed subtree.
    pub fn global_offsets(&self, doc: &Document, index: &TextIndex) -> Option<(usize, usize)> {
        let start = boundary_offset(doc, index, self.start)?;
        let end = boundary_offset(doc, index, self.end)?;
        Some((start, end))
    }

    pub fn is_collapsed(&self, doc: &Document, index: &TextIndex) -> bool {
        match self.global_offsets(doc, index) {
            Some((start, end)) => start >= end,
            None => true,
        }
    }

    /// Text the range covers.
    pub fn to_text(&self, doc: &Document, index: &TextIndex) -> String {
        let Some((start, end)) = self.global_offsets(doc, index) else {
            return String::new();
        };
        if start >= end {
            return String::new();
        }
        let mut out = String::new();
        for seg in index.segments() {
            if seg.end() <= start || seg.start >= end {
                continue;
            }
            let Some(text) = doc.text(seg.node) else {
                continue;
            };
            let from = start.saturating_sub(seg.start);
            let to = (end - seg.start).min(seg.len);
            out.extend(text.chars().skip(from).take(to - from));
        }
        out
    }
}

/// Global text offset of a boundary point.
pub fn boundary_offset(doc: &Document, index: &TextIndex, b: Boundary) -> Option<usize> {
    if doc.is_text(b.node) {
        return index.offset_of(b.node).map(|start| start + b.offset);
    }
    let children = doc.children(b.node);
    match children.get(b.offset) {
        Some(&child) => index.offset_of(child),
        None => index.span_of(b.node).map(|(_, end)| end),
    }
}

/// Selection as delivered by the host: either global offsets or explicit
/// boundary points addressed by node index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SelectionSpec {
    Offsets {
        start: usize,
        end: usize,
    },
    #[serde(rename_all = "camelCase")]
    Boundaries {
        start_node: usize,
        start_offset: usize,
        end_node: usize,
        end_offset: usize,
    },
}

impl SelectionSpec {
    pub fn resolve(&self, doc: &Document, index: &TextIndex) -> Result<TextRange, HighlightError> {
        match *self {
            SelectionSpec::Offsets { start, end } => TextRange::from_offsets(doc, index, start, end),
            SelectionSpec::Boundaries {
                start_node,
                start_offset,
                end_node,
                end_offset,
            } => {
                let start = doc
                    .node_at(start_node)
                    .ok_or(HighlightError::NoSuchNode(start_node))?;
                let end = doc
                    .node_at(end_node)
                    .ok_or(HighlightError::NoSuchNode(end_node))?;
                let range = TextRange::new(
                    Boundary::new(start, start_offset),
                    Boundary::new(end, end_offset),
                );
                range.validate(doc)?;
                Ok(range)
            }
        }
    }
}
