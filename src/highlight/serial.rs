use crate::dom::{Document, Marker, NodeId};
use crate::highlight::applier::SegmentDescriptor;
use crate::highlight::palette::TRANSPARENT;
use crate::highlight::registry::Registry;
use crate::model::HighlightRecord;
use crate::offsets::TextIndex;

pub const RESTORE_BATCH_SIZE: usize = 50;

pub fn serialize(doc: &Document) -> Vec<HighlightRecord> {
    let index = TextIndex::build(doc);
    index
        .segments()
        .iter()
        .filter(|seg| seg.len > 0)
        .filter_map(|seg| {
            let marker = doc.parent(seg.node).and_then(|p| doc.marker(p))?;
            Some(HighlightRecord {
                start: seg.start,
                end: seg.end(),
                color: marker.color.clone(),
                id: marker.id.clone(),
            })
        })
        .collect()
}

/// One slice of one text node to wrap during a restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapTask<N> {
    pub node: N,
    pub from: usize,
    pub to: usize,
    pub color: String,
    pub id: String,
}

/// Maps records onto segments, yielding tasks in document order.
///
/// Records are sorted by `start` and those with `start >= end` are dropped.
/// A record stays open until a segment reaches its `end`, so a record spanning
/// several nodes yields one task per node. Segments flagged `skip` produce no
/// tasks but still advance the walk.
pub fn plan<N: Copy>(
    segments: &[SegmentDescriptor<N>],
    records: &[HighlightRecord],
) -> Vec<WrapTask<N>> {
    let mut sorted: Vec<&HighlightRecord> = records.iter().filter(|r| r.start < r.end).collect();
    sorted.sort_by_key(|r| r.start);

    let mut tasks = Vec::new();
    let mut next = 0;
    let mut open: Vec<&HighlightRecord> = Vec::new();

    for seg in segments {
        if next == sorted.len() && open.is_empty() {
            break;
        }
        let seg_start = seg.start;
        let seg_end = seg.start + seg.len;
        while next < sorted.len() && sorted[next].start < seg_end {
            open.push(sorted[next]);
            next += 1;
        }
        for record in &open {
            let from = seg_start.max(record.start);
            let to = seg_end.min(record.end);
            if from < to && !seg.skip {
                tasks.push(WrapTask {
                    node: seg.node,
                    from: from - seg_start,
                    to: to - seg_start,
                    color: record.color.clone(),
                    id: record.id.clone(),
                });
            }
        }
        open.retain(|record| record.end > seg_end);
    }
    tasks
}

/// Plans a restore against the page body. Records without an id receive a
/// fresh one; text already inside a highlight is left alone.
pub fn restore_tasks(
    doc: &Document,
    registry: &Registry,
    records: &[HighlightRecord],
) -> Vec<WrapTask<NodeId>> {
    let records: Vec<HighlightRecord> = records
        .iter()
        .cloned()
        .map(|mut record| {
            if record.id.is_empty() {
                record.id = registry.allocate_id();
            }
            record
        })
        .collect();
    let index = TextIndex::build(doc);
    let segments: Vec<SegmentDescriptor<NodeId>> = index
        .segments()
        .iter()
        .map(|seg| SegmentDescriptor {
            node: seg.node,
            start: seg.start,
            len: seg.len,
            skip: doc.closest_marker(seg.node).is_some(),
        })
        .collect();
    plan(&segments, &records)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub applied: usize,
    pub failed: usize,
}

/// Wraps one batch of tasks. Failures are logged and skipped.
pub fn apply_tasks(
    doc: &mut Document,
    registry: &mut Registry,
    tasks: &[WrapTask<NodeId>],
    report: &mut RestoreReport,
) {
    for task in tasks {
        match doc.wrap_text_slice(task.node, task.from, task.to, restored_marker(task)) {
            Ok(wrapper) => {
                registry.register(&task.id, wrapper);
                report.applied += 1;
            }
            Err(e) => {
                tracing::warn!(id = %task.id, error = %e, "skipped highlight during restore");
                report.failed += 1;
            }
        }
    }
}

fn restored_marker(task: &WrapTask<NodeId>) -> Marker {
    let mut marker = Marker::new(&task.id, &task.color);
    if task.color == TRANSPARENT {
        marker.text_color = None;
        marker.shadow = false;
    }
    marker
}

/// Re-creates highlights from records, yielding to the scheduler between
/// batches of `batch_size` wraps. Slices are wrapped from the end of the page
/// backwards so a split never shifts a slice still waiting.
pub async fn restore(
    doc: &mut Document,
    registry: &mut Registry,
    records: &[HighlightRecord],
    batch_size: usize,
) -> RestoreReport {
    let mut tasks = restore_tasks(doc, registry, records);
    tasks.reverse();

    let mut report = RestoreReport::default();
    let mut batches = tasks.chunks(batch_size.max(1)).peekable();
    while let Some(batch) = batches.next() {
        apply_tasks(doc, registry, batch, &mut report);
        if batches.peek().is_some() {
            tokio::task::yield_now().await;
        }
    }
    tracing::debug!(
        records = records.len(),
        applied = report.applied,
        failed = report.failed,
        "restored highlights"
    );
    report
}
