use std::collections::HashMap;

use uuid::Uuid;

use crate::dom::{Document, NodeId};
use crate::error::HighlightError;
use crate::highlight::palette::{FORCED_TEXT_COLOR, TRANSPARENT};

/// Highlight id to the wrappers carrying it. A selection over several text
/// nodes has several wrappers under one id.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    wrappers: HashMap<String, Vec<NodeId>>,
}

impl Registry {
    /// Rebuilds the registry from the wrappers present under `doc.body()`.
    pub fn rescan(doc: &Document) -> Self {
        let mut registry = Registry::default();
        for node in doc.descendants(doc.body()) {
            if let Some(marker) = doc.marker(node) {
                registry.register(&marker.id, node);
            }
        }
        registry
    }

    /// Fresh id of the form `hl-xxxxxxxxx`, unused by this registry.
    pub fn allocate_id(&self) -> String {
        loop {
            let id = format!("hl-{}", &Uuid::new_v4().simple().to_string()[..9]);
            if !self.wrappers.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn register(&mut self, id: &str, wrapper: NodeId) {
        let entry = self.wrappers.entry(id.to_string()).or_default();
        if !entry.contains(&wrapper) {
            entry.push(wrapper);
        }
    }

    pub fn wrappers(&self, id: &str) -> &[NodeId] {
        self.wrappers.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.wrappers.contains_key(id)
    }

    /// Number of distinct highlights.
    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }

    /// Number of highlights currently rendered with a color.
    pub fn visible_count(&self, doc: &Document) -> usize {
        self.wrappers
            .values()
            .filter(|nodes| {
                nodes
                    .iter()
                    .any(|&n| doc.marker(n).is_some_and(|m| m.is_visible()))
            })
            .count()
    }

    /// Sets the display color and forces legible black text.
    pub fn recolor(&self, doc: &mut Document, id: &str, color: &str) -> bool {
        self.for_each_marker(doc, id, |marker| {
            marker.color = color.to_string();
            marker.text_color = Some(FORCED_TEXT_COLOR.to_string());
            marker.shadow = true;
        })
    }

    /// Hides a highlight without removing it, remembering its colors.
    pub fn fade(&self, doc: &mut Document, id: &str) -> bool {
        self.for_each_marker(doc, id, |marker| {
            marker.saved_color = Some(marker.color.clone());
            marker.saved_text_color = marker.text_color.clone();
            marker.color = TRANSPARENT.to_string();
            marker.text_color = None;
            marker.shadow = false;
        })
    }

    /// Brings back the colors saved by [`fade`](Self::fade), falling back to
    /// `fallback_color` and black text when nothing was saved.
    pub fn restore(&self, doc: &mut Document, id: &str, fallback_color: &str) -> bool {
        self.for_each_marker(doc, id, |marker| {
            marker.color = marker
                .saved_color
                .clone()
                .unwrap_or_else(|| fallback_color.to_string());
            marker.text_color = Some(
                marker
                    .saved_text_color
                    .clone()
                    .unwrap_or_else(|| FORCED_TEXT_COLOR.to_string()),
            );
            marker.shadow = true;
        })
    }

    fn for_each_marker<F>(&self, doc: &mut Document, id: &str, mut f: F) -> bool
    where
        F: FnMut(&mut crate::dom::Marker),
    {
        let mut touched = false;
        for &wrapper in self.wrappers(id) {
            if doc.parent(wrapper).is_none() {
                continue;
            }
            if let Some(marker) = doc.marker_mut(wrapper) {
                f(marker);
                touched = true;
            }
        }
        touched
    }

    /// Unwraps every wrapper of `id`. Returns false for unknown ids.
    pub fn remove(&mut self, doc: &mut Document, id: &str) -> Result<bool, HighlightError> {
        let Some(nodes) = self.wrappers.remove(id) else {
            return Ok(false);
        };
        for wrapper in nodes {
            if doc.parent(wrapper).is_some() {
                crate::highlight::applier::unwrap(doc, wrapper)?;
            }
        }
        Ok(true)
    }

    /// Replaces every wrapper on the page with a plain text node of its
    /// content and normalizes the parents. Returns the number of wrappers
    /// removed.
    pub fn clear(&mut self, doc: &mut Document) -> usize {
        let markers: Vec<NodeId> = doc
            .descendants(doc.body())
            .into_iter()
            .filter(|&n| doc.is_marker(n))
            .collect();
        let mut removed = 0;
        for wrapper in markers {
            let Some(parent) = doc.parent(wrapper) else {
                continue;
            };
            match doc.replace_with_text(wrapper) {
                Ok(_) => {
                    doc.normalize(parent);
                    removed += 1;
                }
                Err(e) => tracing::warn!(error = %e, node = %wrapper, "failed to clear highlight"),
            }
        }
        self.wrappers.clear();
        removed
    }
}
