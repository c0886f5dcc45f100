use std::collections::HashMap;

use crate::dom::{Document, NodeId};

/// One text node and the global interval it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSegment {
    pub node: NodeId,
    pub start: usize,
    pub len: usize,
}

impl TextSegment {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Global character offsets of the page body, assigned depth-first in
/// document order. Marker wrappers are transparent, so offsets stay stable
/// while highlights come and go.
#[derive(Debug, Clone, Default)]
pub struct TextIndex {
    segments: Vec<TextSegment>,
    /// Global interval covered by every visited node, elements included.
    spans: HashMap<NodeId, (usize, usize)>,
    total: usize,
}

impl TextIndex {
    /// Indexes the document body.
    pub fn build(doc: &Document) -> Self {
        Self::build_from(doc, doc.body())
    }

    pub fn build_from(doc: &Document, root: NodeId) -> Self {
        let mut index = TextIndex::default();
        index.total = index.visit(doc, root, 0);
        index
    }

    fn visit(&mut self, doc: &Document, node: NodeId, start: usize) -> usize {
        let end = if doc.is_text(node) {
            let len = doc.text_len(node);
            self.segments.push(TextSegment { node, start, len });
            start + len
        } else {
            doc.children(node)
                .iter()
                .fold(start, |offset, &child| self.visit(doc, child, offset))
        };
        self.spans.insert(node, (start, end));
        end
    }

    pub fn segments(&self) -> &[TextSegment] {
        &self.segments
    }

    pub fn total_len(&self) -> usize {
        self.total
    }

    /// Global `[start, end)` covered by any indexed node.
    pub fn span_of(&self, node: NodeId) -> Option<(usize, usize)> {
        self.spans.get(&node).copied()
    }

    /// Global offset of the first character of `node`.
    pub fn offset_of(&self, node: NodeId) -> Option<usize> {
        self.span_of(node).map(|(start, _)| start)
    }

    /// Maps a global offset to `(text node, local offset)`.
    ///
    /// An offset sitting exactly on a boundary between two nodes resolves to
    /// the start of the later non-empty node, except for the very end of the
    /// text which resolves to the end of the last node.
    pub fn locate(&self, offset: usize) -> Option<(NodeId, usize)> {
        if offset > self.total {
            return None;
        }
        let found = self
            .segments
            .iter()
            .find(|s| s.len > 0 && offset >= s.start && offset < s.end());
        match found {
            Some(seg) => Some((seg.node, offset - seg.start)),
            None => self
                .segments
                .iter()
                .rev()
                .find(|s| s.end() == offset)
                .map(|seg| (seg.node, seg.len)),
        }
    }

    /// Like [`locate`](Self::locate) but prefers the end of the earlier node
    /// on a boundary. Used for range ends so that a range never reaches into
    /// a node it does not cover.
    pub fn locate_end(&self, offset: usize) -> Option<(NodeId, usize)> {
        if offset > self.total {
            return None;
        }
        let found = self
            .segments
            .iter()
            .find(|s| s.len > 0 && offset > s.start && offset <= s.end());
        match found {
            Some(seg) => Some((seg.node, offset - seg.start)),
            None => self.locate(offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Marker;
    use pretty_assertions::assert_eq;

    fn three_nodes() -> (Document, Vec<NodeId>) {
        let mut doc = Document::new();
        let p = doc.create_element("p", Vec::new());
        doc.append_child(doc.root(), p);
        let a = doc.create_text("abc");
        let empty = doc.create_text("");
        let b = doc.create_text("defg");
        doc.append_child(p, a);
        doc.append_child(p, empty);
        doc.append_child(p, b);
        (doc, vec![a, empty, b])
    }

    #[test]
    fn test_offsets_accumulate_in_document_order() {
        let (doc, nodes) = three_nodes();
        let index = TextIndex::build(&doc);

        let starts: Vec<(NodeId, usize, usize)> = index
            .segments()
            .iter()
            .map(|s| (s.node, s.start, s.len))
            .collect();
        assert_eq!(
            starts,
            vec![(nodes[0], 0, 3), (nodes[1], 3, 0), (nodes[2], 3, 4)]
        );
        assert_eq!(index.total_len(), 7);
    }

    #[test]
    fn test_markers_are_transparent() {
        let (mut doc, nodes) = three_nodes();
        let before = TextIndex::build(&doc);

        doc.wrap_text_slice(nodes[2], 1, 3, Marker::new("hl-x", "#fef08a"))
            .unwrap();
        let after = TextIndex::build(&doc);

        assert_eq!(before.total_len(), after.total_len());
        assert_eq!(after.locate(4).map(|(n, _)| doc.text(n)), Some(Some("ef")));
    }

    #[test]
    fn test_locate_boundaries() {
        let (doc, nodes) = three_nodes();
        let index = TextIndex::build(&doc);

        assert_eq!(index.locate(0), Some((nodes[0], 0)));
        assert_eq!(index.locate(3), Some((nodes[2], 0)));
        assert_eq!(index.locate_end(3), Some((nodes[0], 3)));
        assert_eq!(index.locate(7), Some((nodes[2], 4)));
        assert_eq!(index.locate(8), None);
    }

    #[test]
    fn test_offsets_count_chars_not_utf16_units() {
        let mut doc = Document::new();
        let p = doc.create_element("p", Vec::new());
        let a = doc.create_text("ok 😀 go");
        let b = doc.create_text("ne");
        doc.append_child(doc.root(), p);
        doc.append_child(p, a);
        doc.append_child(p, b);
        let index = TextIndex::build(&doc);

        // The emoji is two UTF-16 units but a single offset.
        assert_eq!(index.total_len(), 9);
        assert_eq!(index.locate(7), Some((b, 0)));
        assert_eq!(index.locate_end(7), Some((a, 7)));

        let wrapper = doc
            .wrap_text_slice(a, 3, 4, Marker::new("hl-e", "#fef08a"))
            .unwrap();
        assert_eq!(doc.text_content(wrapper), "😀");
    }
}
