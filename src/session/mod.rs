//! Session Coordinator
//!
//! One [`Session`] per open page. It owns the page tree together with its
//! registry and history, answers host commands, persists through the
//! configured [`KeyValueStore`] and broadcasts status to every listener.
//!
//! # Lifecycle
//!
//! - [`open`] parses nothing itself: it takes a ready [`Document`], reads the
//!   global enabled flag and collects the record sets to restore (the page's
//!   autosave, then a matching pending import).
//! - Restores run after the configured delay so the page can settle.
//! - Every highlight change schedules a debounced autosave.
//! - Storage changes to the enabled flag are mirrored into every session.
//!
//! ```rust,ignore
//! let session = session::open(&ctx, url, doc).await;
//! let reply = session.lock().await.handle(Command::Undo).await;
//! ```

mod autosave;
pub mod command;
mod handler;
mod routes;

pub use autosave::Autosave;
pub use command::{Command, ImportRequest, Notification, PageEvent, PdfOptions, Reply};
pub use handler::events;
pub use routes::routes;

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capture::{ExportFormat, Exporter, PageSnapshot, export_filename};
use crate::config;
use crate::dom::Document;
use crate::error::HighlightError;
use crate::highlight::{self, ApplyOutcome, History, Registry, RestoreReport, adaptive_color, serialize};
use crate::markup;
use crate::model::{ExportFile, HighlightRecord, PendingRestore, Status, StoredHighlights, parse_backup};
use crate::offsets::TextIndex;
use crate::range::{SelectionSpec, TextRange};
use crate::store::{
    ENABLED_KEY, KeyValueStore, PENDING_RESTORE_KEY, StorageChange, autosave_key, get_json, set_json,
};

pub type SharedSession = Arc<Mutex<Session>>;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub autosave_debounce: Duration,
    pub restore_delay: Duration,
    pub restore_batch_size: usize,
    pub default_color: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&config::Highlighter::default())
    }
}

impl From<&config::Highlighter> for SessionSettings {
    fn from(cfg: &config::Highlighter) -> Self {
        SessionSettings {
            autosave_debounce: Duration::from_millis(cfg.autosave_debounce_ms),
            restore_delay: Duration::from_millis(cfg.restore_delay_ms),
            restore_batch_size: cfg.restore_batch_size,
            default_color: cfg.default_color.clone(),
        }
    }
}

/// Everything a new session shares with its siblings.
#[derive(Clone)]
pub struct SessionContext {
    pub store: Arc<dyn KeyValueStore>,
    pub exporter: Exporter,
    pub settings: SessionSettings,
    pub events: broadcast::Sender<PageEvent>,
    pub cancel: CancellationToken,
}

impl SessionContext {
    pub fn new(store: Arc<dyn KeyValueStore>, exporter: Exporter, settings: SessionSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        SessionContext {
            store,
            exporter,
            settings,
            events,
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub enabled: bool,
    /// Highlight every selection right away instead of waiting for a color pick.
    pub auto: bool,
    pub active_color: String,
    /// Selection waiting for a color, as global text offsets.
    pub pending: Option<(usize, usize)>,
}

pub struct Session {
    url: String,
    doc: Document,
    registry: Registry,
    history: History,
    state: SessionState,
    settings: SessionSettings,
    store: Arc<dyn KeyValueStore>,
    exporter: Exporter,
    autosave: Autosave,
    events: broadcast::Sender<PageEvent>,
}

impl Session {
    /// Must be called inside a tokio runtime; the autosave task starts here.
    pub fn new(ctx: &SessionContext, url: &str, doc: Document) -> Self {
        let registry = Registry::rescan(&doc);
        let autosave = Autosave::spawn(
            ctx.store.clone(),
            autosave_key(url),
            ctx.settings.autosave_debounce,
            ctx.cancel.clone(),
        );
        Session {
            url: url.to_string(),
            doc,
            registry,
            history: History::default(),
            state: SessionState {
                enabled: true,
                auto: false,
                active_color: ctx.settings.default_color.clone(),
                pending: None,
            },
            settings: ctx.settings.clone(),
            store: ctx.store.clone(),
            exporter: ctx.exporter.clone(),
            autosave,
            events: ctx.events.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn status(&self) -> Status {
        Status {
            is_highlighting: self.state.auto,
            active_color: self.state.active_color.clone(),
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
        }
    }

    pub fn markup(&self) -> String {
        markup::render(&self.doc)
    }

    /// Reads the enabled flag and returns the record sets to restore, in order.
    /// A pending import is consumed whether or not it targets this page.
    pub async fn load(&mut self) -> Vec<Vec<HighlightRecord>> {
        match self.store.get(ENABLED_KEY).await {
            Ok(value) => self.state.enabled = enabled_from(value.as_ref()),
            Err(e) => tracing::warn!(error = %e, "failed to read enabled flag"),
        }

        let mut sets = Vec::new();
        match get_json::<StoredHighlights>(self.store.as_ref(), &autosave_key(&self.url)).await {
            Ok(Some(saved)) if !saved.highlights.is_empty() => sets.push(saved.highlights),
            Ok(_) => {}
            Err(e) => tracing::warn!(url = %self.url, error = %e, "ignoring unreadable autosave"),
        }

        match get_json::<PendingRestore>(self.store.as_ref(), PENDING_RESTORE_KEY).await {
            Ok(Some(pending)) => {
                if let Err(e) = self.store.remove(PENDING_RESTORE_KEY).await {
                    tracing::warn!(error = %e, "failed to clear pending restore");
                }
                if pending.url == self.url {
                    tracing::info!(url = %self.url, highlights = pending.data.len(), "picked up pending import");
                    sets.push(pending.data);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "ignoring unreadable pending restore"),
        }
        sets
    }

    pub async fn restore_records(&mut self, records: &[HighlightRecord]) -> RestoreReport {
        let report = highlight::restore(
            &mut self.doc,
            &mut self.registry,
            records,
            self.settings.restore_batch_size,
        )
        .await;
        self.schedule_save();
        report
    }

    pub async fn handle(&mut self, command: Command) -> Reply {
        match command {
            Command::ToggleGlobal(enabled) => self.set_enabled(enabled).await,
            Command::ToggleHighlight(auto) => {
                self.state.auto = auto;
                if auto {
                    self.state.pending = None;
                }
                self.broadcast_status();
                Reply::Ack("ok")
            }
            Command::SetColor(color) => {
                self.state.active_color = color;
                self.broadcast_status();
                Reply::Status(self.status())
            }
            Command::ClearHighlights => {
                let removed = self.registry.clear(&mut self.doc);
                self.history.clear();
                self.state.pending = None;
                tracing::info!(url = %self.url, removed, "cleared highlights");
                self.changed();
                Reply::Ack("cleaned")
            }
            Command::Undo => {
                self.history.undo(&mut self.doc, &self.registry);
                self.changed();
                Reply::Status(self.status())
            }
            Command::Redo => {
                let fallback = adaptive_color(&self.state.active_color);
                self.history.redo(&mut self.doc, &self.registry, &fallback);
                self.changed();
                Reply::Status(self.status())
            }
            Command::GetStatus => Reply::Status(self.status()),
            Command::ExportData => self.export_data(),
            Command::TriggerImport(request) => self.import(request).await,
            Command::ExportPng => self.export(ExportFormat::Png).await,
            Command::ExportPdf(options) => {
                let quality = options.unwrap_or_default().quality;
                self.export(ExportFormat::Pdf(quality)).await
            }
            Command::Selection(spec) => self.on_selection(spec),
            Command::PickColor(color) => self.pick_color(&color),
            Command::RemoveHighlight(id) => match self.remove_highlight(&id) {
                Ok(true) => Reply::Status(self.status()),
                Ok(false) => Reply::Ack("ignored"),
                Err(e) => Reply::Failed(e.to_string()),
            },
        }
    }

    async fn set_enabled(&mut self, enabled: bool) -> Reply {
        self.state.enabled = enabled;
        if !enabled {
            self.state.pending = None;
        }
        if let Err(e) = self.store.set(ENABLED_KEY, Value::Bool(enabled)).await {
            tracing::error!(error = %e, "failed to persist enabled flag");
        }
        self.broadcast_status();
        Reply::Ack("ok")
    }

    /// A finished selection. In auto mode it is highlighted at once with the
    /// active color; otherwise it waits for [`Session::pick_color`].
    pub fn on_selection(&mut self, spec: SelectionSpec) -> Reply {
        if !self.state.enabled {
            return Reply::Ack("disabled");
        }
        self.state.pending = None;

        let index = TextIndex::build(&self.doc);
        let range = match spec.resolve(&self.doc, &index) {
            Ok(range) => range,
            Err(e) => {
                tracing::debug!(error = %e, "ignoring selection");
                return Reply::Ack("ignored");
            }
        };
        if range.is_collapsed(&self.doc, &index) || range.to_text(&self.doc, &index).trim().is_empty() {
            return Reply::Ack("ignored");
        }
        let Some(offsets) = range.global_offsets(&self.doc, &index) else {
            return Reply::Ack("ignored");
        };

        if self.state.auto {
            let color = self.state.active_color.clone();
            self.highlight(&range, &color)
        } else {
            self.state.pending = Some(offsets);
            Reply::Ack("pending")
        }
    }

    /// Highlights the pending selection with `color`.
    pub fn pick_color(&mut self, color: &str) -> Reply {
        let Some((start, end)) = self.state.pending.take() else {
            return Reply::Ack("ignored");
        };
        if !self.state.enabled {
            return Reply::Ack("disabled");
        }
        let index = TextIndex::build(&self.doc);
        match TextRange::from_offsets(&self.doc, &index, start, end) {
            Ok(range) => self.highlight(&range, color),
            Err(e) => {
                tracing::debug!(error = %e, "pending selection no longer resolves");
                Reply::Ack("ignored")
            }
        }
    }

    fn highlight(&mut self, range: &TextRange, color: &str) -> Reply {
        match highlight::apply(&mut self.doc, &mut self.registry, range, color) {
            Ok(ApplyOutcome::Created { id, wrappers }) => {
                tracing::debug!(id = %id, wrappers = wrappers.len(), "highlight created");
                self.history.create(&id);
                self.changed();
                Reply::Status(self.status())
            }
            Ok(ApplyOutcome::Recolored { id }) => {
                tracing::debug!(id = %id, "highlight recolored");
                self.changed();
                Reply::Status(self.status())
            }
            Err(HighlightError::Wrap(message)) => {
                tracing::warn!(url = %self.url, error = %message, "could not wrap selection");
                Reply::Failed(format!("Could not highlight selection: {}", message))
            }
            Err(e) => {
                tracing::debug!(error = %e, "nothing to highlight");
                Reply::Ack("ignored")
            }
        }
    }

    /// Unwraps every wrapper of `id`. Returns false for an unknown id.
    pub fn remove_highlight(&mut self, id: &str) -> Result<bool, HighlightError> {
        if !self.registry.remove(&mut self.doc, id)? {
            return Ok(false);
        }
        self.history.forget(id);
        self.changed();
        Ok(true)
    }

    fn export_data(&self) -> Reply {
        let data = ExportFile::new(&self.url, serialize(&self.doc));
        let filename = export_filename(self.doc.title(), "json", Utc::now().date_naive());
        tracing::info!(url = %self.url, highlights = data.highlights.len(), "exported highlight data");
        Reply::Exported { filename, data }
    }

    async fn import(&mut self, request: ImportRequest) -> Reply {
        let backup = match parse_backup(&request.contents) {
            Ok(backup) => backup,
            Err(e) => {
                tracing::error!(url = %self.url, error = %e, "import failed");
                return Reply::Rejected(e.to_string());
            }
        };

        if let Some(target) = backup.url.clone().filter(|target| *target != self.url) {
            if request.redirect {
                let pending = PendingRestore {
                    url: target.clone(),
                    data: backup.highlights,
                };
                if let Err(e) = set_json(self.store.as_ref(), PENDING_RESTORE_KEY, &pending).await {
                    tracing::error!(error = %e, "failed to stage pending import");
                    return Reply::Failed(e.to_string());
                }
                tracing::info!(from = %self.url, to = %target, "import belongs to another page");
                return Reply::Redirect { url: target };
            }
        }

        let report = self.restore_records(&backup.highlights).await;
        tracing::info!(
            url = %self.url,
            applied = report.applied,
            failed = report.failed,
            dropped = backup.dropped,
            "imported highlights"
        );
        Reply::Imported {
            report,
            dropped: backup.dropped,
        }
    }

    async fn export(&self, format: ExportFormat) -> Reply {
        let page = PageSnapshot {
            url: self.url.clone(),
            title: self.doc.title().map(str::to_string),
            markup: self.markup(),
        };
        match self.exporter.export(&page, format, Utc::now().date_naive()).await {
            Ok(artifact) => Reply::Artifact(artifact),
            Err(e) => {
                tracing::error!(url = %self.url, error = %e, "export failed");
                self.notify(Notification::Error(format!("Export error: {}", e)));
                Reply::Failed(e.to_string())
            }
        }
    }

    /// Mirrors a store change made anywhere into this session.
    pub fn on_storage_change(&mut self, change: &StorageChange) {
        if change.key != ENABLED_KEY {
            return;
        }
        self.state.enabled = enabled_from(change.new_value.as_ref());
        if !self.state.enabled {
            self.state.pending = None;
        }
    }

    fn changed(&self) {
        self.broadcast_status();
        self.schedule_save();
    }

    fn schedule_save(&self) {
        self.autosave.schedule(serialize(&self.doc));
    }

    fn broadcast_status(&self) {
        self.notify(Notification::GetStatus(self.status()));
    }

    fn notify(&self, notification: Notification) {
        // No subscribers is fine.
        let _ = self.events.send(PageEvent {
            url: self.url.clone(),
            notification,
        });
    }
}

/// A missing flag and anything but `false` mean enabled.
fn enabled_from(value: Option<&Value>) -> bool {
    !matches!(value, Some(Value::Bool(false)))
}

/// Creates a session for a freshly loaded page and starts its background work.
pub async fn open(ctx: &SessionContext, url: &str, doc: Document) -> SharedSession {
    let mut session = Session::new(ctx, url, doc);
    let changes = ctx.store.subscribe();
    let sets = session.load().await;
    let shared = Arc::new(Mutex::new(session));

    spawn_storage_listener(Arc::downgrade(&shared), changes, ctx.cancel.clone());
    if !sets.is_empty() {
        spawn_restore(shared.clone(), sets, ctx.settings.restore_delay);
    }
    shared
}

pub fn spawn_restore(
    session: SharedSession,
    sets: Vec<Vec<HighlightRecord>>,
    delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let mut session = session.lock().await;
        for records in sets {
            let report = session.restore_records(&records).await;
            tracing::info!(
                url = %session.url(),
                applied = report.applied,
                failed = report.failed,
                "restored saved highlights"
            );
        }
    })
}

/// Runs until the session is dropped, the store goes away or `cancel` fires.
pub fn spawn_storage_listener(
    session: Weak<Mutex<Session>>,
    mut changes: broadcast::Receiver<StorageChange>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let change = tokio::select! {
                change = changes.recv() => change,
                _ = cancel.cancelled() => return,
            };
            match change {
                Ok(change) => {
                    let Some(session) = session.upgrade() else {
                        return;
                    };
                    session.lock().await.on_storage_change(&change);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "storage listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Canvas, PageCapture, Viewport};
    use crate::error::CaptureError;
    use crate::highlight::DEFAULT_COLOR;
    use crate::store::MemoryStore;
    use futures_util::future::BoxFuture;
    use pretty_assertions::assert_eq;

    const URL: &str = "https://a.test/article";

    fn page() -> Document {
        markup::parse(
            "<html><head><title>Notes</title></head><body><p>The quick brown fox jumps over the lazy dog</p></body></html>",
        )
        .unwrap()
    }

    fn context(store: Arc<MemoryStore>) -> SessionContext {
        SessionContext::new(
            store,
            Exporter::new(Duration::from_secs(12), vec!["chrome".to_string()]),
            SessionSettings::default(),
        )
    }

    fn offsets(start: usize, end: usize) -> SelectionSpec {
        SelectionSpec::Offsets { start, end }
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_mode_highlights_and_autosaves() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone());
        let mut events = ctx.events.subscribe();
        let mut session = Session::new(&ctx, URL, page());
        session.handle(Command::ToggleHighlight(true)).await;

        let reply = session.handle(Command::Selection(offsets(4, 9))).await;

        let Reply::Status(status) = reply else {
            panic!("expected a status reply");
        };
        assert!(status.can_undo);
        assert_eq!(session.registry().len(), 1);
        assert!(matches!(
            events.recv().await.unwrap().notification,
            Notification::GetStatus(_)
        ));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let saved: StoredHighlights = get_json(store.as_ref(), &autosave_key(URL))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.highlights.len(), 1);
        assert_eq!((saved.highlights[0].start, saved.highlights[0].end), (4, 9));
    }

    #[tokio::test]
    async fn test_manual_mode_waits_for_color() {
        let ctx = context(Arc::new(MemoryStore::new()));
        let mut session = Session::new(&ctx, URL, page());

        let reply = session.handle(Command::Selection(offsets(10, 15))).await;
        assert_eq!(reply, Reply::Ack("pending"));
        assert_eq!(session.state().pending, Some((10, 15)));
        assert!(session.registry().is_empty());

        session
            .handle(Command::PickColor("#4ade80".to_string()))
            .await;

        assert_eq!(session.state().pending, None);
        let records = serialize(session.document());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].color, adaptive_color("#4ade80"));
        assert_eq!(
            session.handle(Command::PickColor("#4ade80".to_string())).await,
            Reply::Ack("ignored")
        );
    }

    #[tokio::test]
    async fn test_blank_selection_is_ignored() {
        let doc = markup::parse("<body><p>one</p>   <p>two</p></body>").unwrap();
        let ctx = context(Arc::new(MemoryStore::new()));
        let mut session = Session::new(&ctx, URL, doc);
        session.handle(Command::ToggleHighlight(true)).await;

        assert_eq!(session.on_selection(offsets(3, 6)), Reply::Ack("ignored"));
        assert!(session.registry().is_empty());
    }

    #[tokio::test]
    async fn test_backwards_selection_is_ignored() {
        let doc = markup::parse("<body><p>The quick brown fox</p></body>").unwrap();
        let text = doc.text_nodes(doc.body())[0].index();
        let ctx = context(Arc::new(MemoryStore::new()));
        let mut session = Session::new(&ctx, URL, doc);
        session.handle(Command::ToggleHighlight(true)).await;

        let reply = session.on_selection(SelectionSpec::Boundaries {
            start_node: text,
            start_offset: 9,
            end_node: text,
            end_offset: 4,
        });

        assert_eq!(reply, Reply::Ack("ignored"));
        assert!(session.registry().is_empty());
        assert!(!session.status().can_undo);
    }

    #[tokio::test]
    async fn test_disabled_session_ignores_selection() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone());
        let mut session = Session::new(&ctx, URL, page());

        session.handle(Command::ToggleGlobal(false)).await;

        assert_eq!(store.get(ENABLED_KEY).await.unwrap(), Some(Value::Bool(false)));
        assert_eq!(session.on_selection(offsets(0, 3)), Reply::Ack("disabled"));

        session.on_storage_change(&StorageChange {
            key: ENABLED_KEY.to_string(),
            new_value: None,
        });
        assert!(session.state().enabled);
    }

    #[tokio::test]
    async fn test_undo_redo_and_clear() {
        let ctx = context(Arc::new(MemoryStore::new()));
        let mut session = Session::new(&ctx, URL, page());
        session.handle(Command::ToggleHighlight(true)).await;
        session.on_selection(offsets(4, 9));
        session.on_selection(offsets(16, 19));

        session.handle(Command::Undo).await;
        assert_eq!(session.registry().visible_count(session.document()), 1);
        let Reply::Status(status) = session.handle(Command::Redo).await else {
            panic!("expected status");
        };
        assert!(!status.can_redo);
        assert_eq!(session.registry().visible_count(session.document()), 2);

        assert_eq!(session.handle(Command::ClearHighlights).await, Reply::Ack("cleaned"));
        assert_eq!(session.handle(Command::ClearHighlights).await, Reply::Ack("cleaned"));
        assert!(session.registry().is_empty());
        assert!(!session.status().can_undo);
        assert_eq!(
            session.document().text_content(session.document().root()),
            page().text_content(page().root())
        );
    }

    #[tokio::test]
    async fn test_export_then_import_does_not_duplicate() {
        let ctx = context(Arc::new(MemoryStore::new()));
        let mut session = Session::new(&ctx, URL, page());
        session.handle(Command::ToggleHighlight(true)).await;
        session.on_selection(offsets(10, 25));

        let Reply::Exported { filename, data } = session.handle(Command::ExportData).await else {
            panic!("expected exported data");
        };
        assert!(filename.starts_with("notes-"));
        assert!(filename.ends_with(".json"));
        assert_eq!(data.url, URL);

        let mut fresh = Session::new(&ctx, URL, page());
        let contents = serde_json::to_string(&data).unwrap();
        let reply = fresh
            .handle(Command::TriggerImport(ImportRequest {
                contents,
                redirect: true,
            }))
            .await;

        assert_eq!(
            reply,
            Reply::Imported {
                report: RestoreReport {
                    applied: 1,
                    failed: 0
                },
                dropped: 0
            }
        );
        assert_eq!(serialize(fresh.document()), data.highlights);
    }

    #[tokio::test]
    async fn test_import_for_other_page_redirects() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone());
        let mut session = Session::new(&ctx, URL, page());
        let contents = serde_json::json!({
            "url": "https://b.test/other",
            "highlights": [{ "start": 0, "end": 3, "color": "#fef08a", "id": "hl-abc" }]
        })
        .to_string();

        let reply = session
            .handle(Command::TriggerImport(ImportRequest {
                contents,
                redirect: true,
            }))
            .await;

        assert_eq!(
            reply,
            Reply::Redirect {
                url: "https://b.test/other".to_string()
            }
        );
        let pending: PendingRestore = get_json(store.as_ref(), PENDING_RESTORE_KEY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.data.len(), 1);
        assert!(session.registry().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_import_is_rejected() {
        let ctx = context(Arc::new(MemoryStore::new()));
        let mut session = Session::new(&ctx, URL, page());

        let reply = session
            .handle(Command::TriggerImport(ImportRequest {
                contents: "{not json".to_string(),
                redirect: true,
            }))
            .await;

        assert!(matches!(reply, Reply::Rejected(_)));
        assert!(session.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_restores_autosave_and_pending_import() {
        let store = Arc::new(MemoryStore::new());
        let saved = StoredHighlights {
            highlights: vec![HighlightRecord {
                start: 4,
                end: 9,
                color: "#fef08a".to_string(),
                id: "hl-saved0001".to_string(),
            }],
            timestamp: 1_700_000_000_000,
        };
        set_json(store.as_ref(), &autosave_key(URL), &saved).await.unwrap();
        let pending = PendingRestore {
            url: URL.to_string(),
            data: vec![HighlightRecord {
                start: 20,
                end: 25,
                color: "#bbf7d0".to_string(),
                id: String::new(),
            }],
        };
        set_json(store.as_ref(), PENDING_RESTORE_KEY, &pending).await.unwrap();
        let ctx = context(store.clone());

        let session = open(&ctx, URL, page()).await;

        assert_eq!(store.get(PENDING_RESTORE_KEY).await.unwrap(), None);
        assert!(session.lock().await.registry().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        let session = session.lock().await;
        assert_eq!(session.registry().len(), 2);
        assert!(session.registry().contains("hl-saved0001"));
    }

    #[tokio::test]
    async fn test_open_reads_disabled_flag() {
        let store = Arc::new(MemoryStore::new());
        store.set(ENABLED_KEY, Value::Bool(false)).await.unwrap();
        let ctx = context(store.clone());

        let session = open(&ctx, URL, page()).await;

        assert!(!session.lock().await.state().enabled);
    }

    #[tokio::test]
    async fn test_storage_listener_mirrors_flag() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone());
        let first = open(&ctx, URL, page()).await;
        let second = open(&ctx, "https://b.test/", page()).await;

        first.lock().await.handle(Command::ToggleGlobal(false)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(!second.lock().await.state().enabled);
    }

    #[tokio::test]
    async fn test_export_without_renderer_notifies_error() {
        let ctx = context(Arc::new(MemoryStore::new()));
        let mut events = ctx.events.subscribe();
        let mut session = Session::new(&ctx, URL, page());

        let reply = session.handle(Command::ExportPng).await;

        assert!(reply.is_failure());
        let event = events.recv().await.unwrap();
        assert_eq!(
            event.notification,
            Notification::Error("Export error: Page capture library not loaded.".to_string())
        );
    }

    struct BlankCapture;

    impl PageCapture for BlankCapture {
        fn viewport(&self) -> Viewport {
            Viewport::default()
        }

        fn set_viewport(&self, _viewport: &Viewport) {}

        fn capture<'a>(&'a self, _page: &'a PageSnapshot) -> BoxFuture<'a, Result<Canvas, CaptureError>> {
            Box::pin(async {
                Ok(Canvas {
                    width: 10,
                    height: 10,
                    png: vec![0x89, b'P', b'N', b'G'],
                })
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_png_export_produces_artifact() {
        let mut ctx = context(Arc::new(MemoryStore::new()));
        ctx.exporter = ctx.exporter.clone().with_capture(Arc::new(BlankCapture));
        let mut session = Session::new(&ctx, URL, page());

        let Reply::Artifact(artifact) = session.handle(Command::ExportPng).await else {
            panic!("expected an artifact");
        };

        assert_eq!(artifact.mime, "image/png");
        assert!(artifact.filename.ends_with(".png"));
        assert_eq!(session.status().active_color, DEFAULT_COLOR);
    }
}
