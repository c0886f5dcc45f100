use crate::dom::{Document, Marker, NodeId};
use crate::error::HighlightError;
use crate::highlight::palette::adaptive_color;
use crate::highlight::registry::Registry;
use crate::offsets::TextIndex;
use crate::range::TextRange;

/// A text node as seen by the partition step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDescriptor<N> {
    pub node: N,
    /// Global offset of the first character.
    pub start: usize,
    pub len: usize,
    /// Whitespace-only text that is not preserved, or text already highlighted.
    pub skip: bool,
}

impl<N> SegmentDescriptor<N> {
    fn end(&self) -> usize {
        self.start + self.len
    }
}

/// The range being applied, with its containers and global extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target<N> {
    pub start_node: N,
    pub start_offset: usize,
    pub end_node: N,
    pub end_offset: usize,
    pub start: usize,
    pub end: usize,
}

/// Characters `[from, to)` of `node` to wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapSlice<N> {
    pub node: N,
    pub from: usize,
    pub to: usize,
}

pub fn partition<N: Copy + PartialEq>(
    segments: &[SegmentDescriptor<N>],
    target: &Target<N>,
) -> Vec<WrapSlice<N>> {
    let mut slices = Vec::new();
    for seg in segments {
        if seg.skip {
            continue;
        }
        let is_start = seg.node == target.start_node;
        let is_end = seg.node == target.end_node;
        let (from, to) = match (is_start, is_end) {
            (true, true) => (target.start_offset, target.end_offset),
            (true, false) => (target.start_offset, seg.len),
            (false, true) => (0, target.end_offset),
            (false, false) => {
                if seg.start >= target.start && seg.end() <= target.end {
                    (0, seg.len)
                } else {
                    continue;
                }
            }
        };
        if from < to && to <= seg.len {
            slices.push(WrapSlice {
                node: seg.node,
                from,
                to,
            });
        }
    }
    slices
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// A new highlight was created; the caller records it in history.
    Created { id: String, wrappers: Vec<NodeId> },
    /// The selection sat inside an existing highlight which was recolored.
    Recolored { id: String },
}

impl ApplyOutcome {
    pub fn id(&self) -> &str {
        match self {
            ApplyOutcome::Created { id, .. } => id,
            ApplyOutcome::Recolored { id } => id,
        }
    }
}

/// Highlights `range` with the light variant of `base_color`.
///
/// A wrap failure stops the call; wrappers already inserted by it stay in the
/// page and in the registry, but the error is returned so no history entry
/// gets recorded.
pub fn apply(
    doc: &mut Document,
    registry: &mut Registry,
    range: &TextRange,
    base_color: &str,
) -> Result<ApplyOutcome, HighlightError> {
    range.validate(doc)?;
    let index = TextIndex::build(doc);
    let (start, end) = range
        .global_offsets(doc, &index)
        .ok_or(HighlightError::UnknownNode(range.start.node))?;
    if start >= end {
        return Err(HighlightError::EmptySelection);
    }

    let common = range
        .common_ancestor(doc)
        .ok_or(HighlightError::UnknownNode(range.end.node))?;
    let color = adaptive_color(base_color);

    if let Some(existing) = doc.closest_marker(common) {
        let id = doc
            .marker(existing)
            .map(|m| m.id.clone())
            .unwrap_or_default();
        registry.recolor(doc, &id, &color);
        tracing::debug!(id = %id, color = %color, "recolored existing highlight");
        return Ok(ApplyOutcome::Recolored { id });
    }

    let segments: Vec<SegmentDescriptor<NodeId>> = index
        .segments()
        .iter()
        .filter(|seg| doc.is_inclusive_ancestor(common, seg.node))
        .map(|seg| SegmentDescriptor {
            node: seg.node,
            start: seg.start,
            len: seg.len,
            skip: should_skip(doc, seg.node),
        })
        .collect();
    let target = Target {
        start_node: range.start.node,
        start_offset: range.start.offset,
        end_node: range.end.node,
        end_offset: range.end.offset,
        start,
        end,
    };
    let slices = partition(&segments, &target);
    if slices.is_empty() {
        return Err(HighlightError::EmptySelection);
    }

    let id = registry.allocate_id();
    let wrappers = wrap_slices(doc, registry, &id, &color, &slices)?;

    tracing::debug!(id = %id, segments = wrappers.len(), "created highlight");
    Ok(ApplyOutcome::Created { id, wrappers })
}

/// Wraps every slice under `id`, registering each wrapper as soon as it exists.
/// Stops at the first failure and leaves earlier wrappers in place.
fn wrap_slices(
    doc: &mut Document,
    registry: &mut Registry,
    id: &str,
    color: &str,
    slices: &[WrapSlice<NodeId>],
) -> Result<Vec<NodeId>, HighlightError> {
    let mut wrappers = Vec::with_capacity(slices.len());
    for slice in slices {
        match doc.wrap_text_slice(slice.node, slice.from, slice.to, Marker::new(id, color)) {
            Ok(wrapper) => {
                registry.register(id, wrapper);
                wrappers.push(wrapper);
            }
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "could not highlight selection");
                return Err(HighlightError::Wrap(e));
            }
        }
    }
    Ok(wrappers)
}

fn should_skip(doc: &Document, node: NodeId) -> bool {
    if doc.closest_marker(node).is_some() {
        return true;
    }
    let blank = doc.text(node).is_some_and(|t| t.trim().is_empty());
    blank && !doc.preserves_whitespace(node)
}

/// Removes a highlight wrapper, putting its children back where it was.
pub fn unwrap(doc: &mut Document, wrapper: NodeId) -> Result<(), HighlightError> {
    doc.unwrap(wrapper)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::DomError;
    use crate::range::Boundary;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn seg(node: u32, start: usize, len: usize) -> SegmentDescriptor<u32> {
        SegmentDescriptor {
            node,
            start,
            len,
            skip: false,
        }
    }

    // Four nodes of ten characters each: [0,10) [10,20) [20,30) [30,40).
    fn four() -> Vec<SegmentDescriptor<u32>> {
        vec![seg(1, 0, 10), seg(2, 10, 10), seg(3, 20, 10), seg(4, 30, 10)]
    }

    fn slice(node: u32, from: usize, to: usize) -> WrapSlice<u32> {
        WrapSlice { node, from, to }
    }

    #[rstest]
    #[case::inside_one_node(2, 3, 2, 8, vec![slice(2, 3, 8)])]
    #[case::start_to_end_of_node(2, 3, 3, 4, vec![slice(2, 3, 10), slice(3, 0, 4)])]
    #[case::spanning_interior(1, 5, 4, 5, vec![slice(1, 5, 10), slice(2, 0, 10), slice(3, 0, 10), slice(4, 0, 5)])]
    #[case::start_at_node_end(1, 10, 2, 4, vec![slice(2, 0, 4)])]
    fn test_partition_text_boundaries(
        #[case] start_node: u32,
        #[case] start_offset: usize,
        #[case] end_node: u32,
        #[case] end_offset: usize,
        #[case] expected: Vec<WrapSlice<u32>>,
    ) {
        let segments = four();
        let start_seg = segments.iter().find(|s| s.node == start_node).unwrap();
        let end_seg = segments.iter().find(|s| s.node == end_node).unwrap();
        let target = Target {
            start_node,
            start_offset,
            end_node,
            end_offset,
            start: start_seg.start + start_offset,
            end: end_seg.start + end_offset,
        };

        assert_eq!(partition(&segments, &target), expected);
    }

    #[test]
    fn test_partition_with_element_boundaries_uses_containment() {
        let segments = four();
        // Boundaries in elements: no text node is a container.
        let target = Target {
            start_node: 100,
            start_offset: 1,
            end_node: 101,
            end_offset: 0,
            start: 10,
            end: 30,
        };

        assert_eq!(
            partition(&segments, &target),
            vec![slice(2, 0, 10), slice(3, 0, 10)]
        );
    }

    #[test]
    fn test_partition_skips_flagged_and_empty_segments() {
        let mut segments = four();
        segments[1].skip = true;
        segments.insert(2, seg(9, 20, 0));
        let target = Target {
            start_node: 1,
            start_offset: 0,
            end_node: 3,
            end_offset: 10,
            start: 0,
            end: 30,
        };

        assert_eq!(
            partition(&segments, &target),
            vec![slice(1, 0, 10), slice(3, 0, 10)]
        );
    }

    fn page() -> (Document, NodeId, NodeId, NodeId) {
        let mut doc = Document::new();
        let p = doc.create_element("p", Vec::new());
        let a = doc.create_text("Alpha beta ");
        let em = doc.create_element("em", Vec::new());
        let b = doc.create_text("gamma");
        let c = doc.create_text(" delta");
        doc.append_child(doc.root(), p);
        doc.append_child(p, a);
        doc.append_child(p, em);
        doc.append_child(em, b);
        doc.append_child(p, c);
        (doc, a, b, c)
    }

    #[test]
    fn test_apply_wraps_each_text_node_once() {
        let (mut doc, a, _, c) = page();
        let mut registry = Registry::default();
        let range = TextRange::new(Boundary::new(a, 6), Boundary::new(c, 3));

        let outcome = apply(&mut doc, &mut registry, &range, "#4ade80").unwrap();

        let ApplyOutcome::Created { id, wrappers } = outcome else {
            panic!("expected a new highlight");
        };
        assert_eq!(wrappers.len(), 3);
        let texts: Vec<String> = wrappers.iter().map(|&w| doc.text_content(w)).collect();
        assert_eq!(texts, vec!["beta ", "gamma", " de"]);
        for &w in &wrappers {
            let marker = doc.marker(w).unwrap();
            assert_eq!(marker.id, id);
            assert_eq!(marker.color, "#bbf7d0");
        }
        assert_eq!(doc.text_content(doc.root()), "Alpha beta gamma delta");
        assert_eq!(registry.wrappers(&id), wrappers.as_slice());
    }

    #[test]
    fn test_failed_wrap_keeps_earlier_wrappers() {
        let (mut doc, a, _, _) = page();
        let loose = doc.create_text("nowhere");
        let mut registry = Registry::default();
        let id = registry.allocate_id();
        let slices = [
            WrapSlice { node: a, from: 0, to: 5 },
            WrapSlice { node: loose, from: 0, to: 3 },
        ];

        let result = wrap_slices(&mut doc, &mut registry, &id, "#fef08a", &slices);

        assert!(matches!(result, Err(HighlightError::Wrap(DomError::Detached(n))) if n == loose));
        assert_eq!(registry.wrappers(&id).len(), 1);
        let wrapper = registry.wrappers(&id)[0];
        assert_eq!(doc.text_content(wrapper), "Alpha");
        assert_eq!(doc.marker(wrapper).unwrap().id, id);
        assert_eq!(doc.text(loose), Some("nowhere"));
    }

    #[test]
    fn test_apply_inside_marker_recolors() {
        let (mut doc, a, _, _) = page();
        let mut registry = Registry::default();
        let first = apply(
            &mut doc,
            &mut registry,
            &TextRange::new(Boundary::new(a, 0), Boundary::new(a, 5)),
            "#facc15",
        )
        .unwrap();
        let wrapper = registry.wrappers(first.id())[0];
        let inner = doc.children(wrapper)[0];

        let second = apply(
            &mut doc,
            &mut registry,
            &TextRange::new(Boundary::new(inner, 1), Boundary::new(inner, 3)),
            "#38bdf8",
        )
        .unwrap();

        assert_eq!(
            second,
            ApplyOutcome::Recolored {
                id: first.id().to_string()
            }
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(doc.marker(wrapper).unwrap().color, "#bae6fd");
    }

    #[test]
    fn test_apply_skips_blank_text_outside_pre() {
        let mut doc = Document::new();
        let div = doc.create_element("div", Vec::new());
        let a = doc.create_text("one");
        let gap = doc.create_text("\n  ");
        let b = doc.create_text("two");
        doc.append_child(doc.root(), div);
        doc.append_child(div, a);
        doc.append_child(div, gap);
        doc.append_child(div, b);
        let mut registry = Registry::default();

        let outcome = apply(
            &mut doc,
            &mut registry,
            &TextRange::new(Boundary::new(a, 0), Boundary::new(b, 3)),
            "#facc15",
        )
        .unwrap();

        let ApplyOutcome::Created { wrappers, .. } = outcome else {
            panic!("expected a new highlight");
        };
        assert_eq!(wrappers.len(), 2);
        assert_eq!(doc.parent(gap), Some(div));
    }

    #[test]
    fn test_apply_keeps_blank_text_inside_pre() {
        let mut doc = Document::new();
        let pre = doc.create_element("pre", Vec::new());
        let a = doc.create_text("one");
        let gap = doc.create_text("   ");
        let b = doc.create_text("two");
        doc.append_child(doc.root(), pre);
        doc.append_child(pre, a);
        doc.append_child(pre, gap);
        doc.append_child(pre, b);
        let mut registry = Registry::default();

        let outcome = apply(
            &mut doc,
            &mut registry,
            &TextRange::new(Boundary::new(a, 0), Boundary::new(b, 3)),
            "#facc15",
        )
        .unwrap();

        let ApplyOutcome::Created { wrappers, .. } = outcome else {
            panic!("expected a new highlight");
        };
        assert_eq!(wrappers.len(), 3);
    }

    #[test]
    fn test_apply_collapsed_range_is_rejected() {
        let (mut doc, a, _, _) = page();
        let mut registry = Registry::default();

        let result = apply(
            &mut doc,
            &mut registry,
            &TextRange::new(Boundary::new(a, 2), Boundary::new(a, 2)),
            "#facc15",
        );

        assert_eq!(result, Err(HighlightError::EmptySelection));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unwrap_restores_structure() {
        let (mut doc, a, _, _) = page();
        let mut registry = Registry::default();
        let outcome = apply(
            &mut doc,
            &mut registry,
            &TextRange::new(Boundary::new(a, 0), Boundary::new(a, 5)),
            "#facc15",
        )
        .unwrap();
        let wrapper = registry.wrappers(outcome.id())[0];
        let parent = doc.parent(wrapper).unwrap();
        let before = doc.children(parent).len();

        unwrap(&mut doc, wrapper).unwrap();

        assert_eq!(doc.children(parent).len(), before);
        assert!(doc.children(parent).iter().all(|&c| !doc.is_marker(c)));
        assert_eq!(doc.text_content(parent), "Alpha beta gamma delta");
    }
}
