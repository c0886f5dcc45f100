use crate::dom::Document;
use crate::highlight::registry::Registry;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    undo: Vec<String>,
    redo: Vec<String>,
}

impl History {
    /// Records a newly created highlight. Any pending redo is dropped.
    pub fn create(&mut self, id: &str) {
        self.undo.push(id.to_string());
        self.redo.clear();
    }

    /// Fades the most recent highlight. An id whose wrappers are gone is
    /// dropped from history without reaching the redo stack.
    pub fn undo(&mut self, doc: &mut Document, registry: &Registry) -> Option<String> {
        let id = self.undo.pop()?;
        if !registry.fade(doc, &id) {
            tracing::debug!(id = %id, "undo target no longer on the page");
            return None;
        }
        self.redo.push(id.clone());
        Some(id)
    }

    /// Restores the most recently undone highlight. `fallback_color` is used
    /// when the wrapper carries no saved color.
    pub fn redo(
        &mut self,
        doc: &mut Document,
        registry: &Registry,
        fallback_color: &str,
    ) -> Option<String> {
        let id = self.redo.pop()?;
        if !registry.restore(doc, &id, fallback_color) {
            tracing::debug!(id = %id, "redo target no longer on the page");
            return None;
        }
        self.undo.push(id.clone());
        Some(id)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Drops every mention of a highlight that no longer exists.
    pub fn forget(&mut self, id: &str) {
        self.undo.retain(|entry| entry != id);
        self.redo.retain(|entry| entry != id);
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    pub fn undo_stack(&self) -> &[String] {
        &self.undo
    }

    pub fn redo_stack(&self) -> &[String] {
        &self.redo
    }
}
