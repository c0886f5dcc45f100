use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::model::{HighlightRecord, StoredHighlights};
use crate::store::{KeyValueStore, set_json};

type Snapshot = Option<Vec<HighlightRecord>>;

/// Debounced writer: each schedule replaces the pending snapshot, which is
/// written once left alone for the quiet period.
pub struct Autosave {
    tx: watch::Sender<Snapshot>,
    handle: JoinHandle<()>,
}

impl Autosave {
    pub fn spawn(
        store: Arc<dyn KeyValueStore>,
        key: String,
        debounce: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = watch::channel(None);
        let handle = tokio::spawn(run(rx, store, key, debounce, cancel));
        Autosave { tx, handle }
    }

    pub fn schedule(&self, highlights: Vec<HighlightRecord>) {
        self.tx.send_replace(Some(highlights));
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

async fn run(
    mut rx: watch::Receiver<Snapshot>,
    store: Arc<dyn KeyValueStore>,
    key: String,
    debounce: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = cancel.cancelled() => return,
        }

        // Wait for a quiet period; every new snapshot restarts it.
        loop {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        let snapshot = rx.borrow_and_update().clone();
        if let Some(highlights) = snapshot {
            let count = highlights.len();
            let stored = StoredHighlights {
                highlights,
                timestamp: Utc::now().timestamp_millis(),
            };
            match set_json(store.as_ref(), &key, &stored).await {
                Ok(()) => tracing::debug!(key = %key, highlights = count, "autosaved"),
                Err(e) => tracing::error!(key = %key, error = %e, "autosave failed"),
            }
        }
    }
}
