//! Calling layer that ties capture, the store and restore together.
//!
//! # Data flow
//!
//! ```text
//! save(key)    → capture_all_windows → ArrangementStore::set
//! restore(key) → ArrangementStore::get → restore → corrections? → re-capture → set
//! embed_in_document(path)    → capture → DocumentContextStore::set_context
//! restore_from_document(path) → get_context → restore → corrections? → re-embed
//! ```
//!
//! Only one save or restore runs at a time per service; an overlapping call
//! fails with [`Error::Busy`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::capture::LayoutSnapshotCapturer;
use crate::config::Config;
use crate::document::{DocumentContextStore, ensure_stable_id};
use crate::error::{Error, Result};
use crate::host::HostHandle;
use crate::resolver::CatalogHandle;
use crate::restore::{LayoutSnapshotRestorer, RestoreOptions, RestoreReport};
use crate::snapshot::Snapshot;
use crate::store::ArrangementStore;

struct InProgressGuard<'a>(&'a AtomicBool);

impl<'a> InProgressGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            return Err(Error::Busy);
        }
        Ok(Self(flag))
    }
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Save and restore arrangements by key or through documents.
pub struct ArrangementService {
    capturer: LayoutSnapshotCapturer,
    restorer: LayoutSnapshotRestorer,
    store: ArrangementStore,
    documents: Option<Arc<dyn DocumentContextStore>>,
    in_progress: AtomicBool,
}

impl ArrangementService {
    pub fn new(
        host: HostHandle,
        catalog: CatalogHandle,
        store: ArrangementStore,
        config: &Config,
    ) -> Self {
        Self {
            capturer: LayoutSnapshotCapturer::new(
                host.clone(),
                catalog.clone(),
                config.geometry.clone(),
                config.capture.clone(),
            ),
            restorer: LayoutSnapshotRestorer::new(
                host,
                catalog,
                config.geometry.clone(),
                config.restore.clone(),
            ),
            store,
            documents: None,
            in_progress: AtomicBool::new(false),
        }
    }

    /// Enable the document-embedded operations.
    #[must_use]
    pub fn with_documents(mut self, documents: Arc<dyn DocumentContextStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    #[must_use]
    pub fn store(&self) -> &ArrangementStore {
        &self.store
    }

    fn documents(&self) -> Result<&Arc<dyn DocumentContextStore>> {
        self.documents
            .as_ref()
            .ok_or_else(|| Error::Config(crate::error::ConfigError::ValidationError(
                "no document adapter configured".to_string(),
            )))
    }

    /// Capture every window and append it to `key`'s history. Returns the
    /// record timestamp.
    pub async fn save(&self, key: &str, max_entries: Option<usize>) -> Result<u64> {
        let _guard = InProgressGuard::acquire(&self.in_progress)?;
        let snapshot = self.capturer.capture_all_windows().await;
        let tabs = snapshot.tab_count();
        let saved_at = self.store.set(key, snapshot, max_entries).await?;
        info!(key = %key, tabs, saved_at, "arrangement saved");
        Ok(saved_at)
    }

    /// Restore the newest record for `key`.
    pub async fn restore(&self, key: &str, context_document: Option<&str>) -> Result<RestoreReport> {
        let _guard = InProgressGuard::acquire(&self.in_progress)?;
        let record = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| Error::NoArrangement(key.to_string()))?;
        self.restore_and_heal(key, record.arrangement, context_document)
            .await
    }

    /// Restore a specific record from `key`'s history.
    pub async fn restore_record(
        &self,
        key: &str,
        saved_at: u64,
        context_document: Option<&str>,
    ) -> Result<RestoreReport> {
        let _guard = InProgressGuard::acquire(&self.in_progress)?;
        let record = self
            .store
            .get_all(key)
            .await?
            .into_iter()
            .find(|r| r.saved_at == saved_at)
            .ok_or_else(|| Error::NoArrangement(format!("{key}@{saved_at}")))?;
        self.restore_and_heal(key, record.arrangement, context_document)
            .await
    }

    async fn restore_and_heal(
        &self,
        key: &str,
        snapshot: Snapshot,
        context_document: Option<&str>,
    ) -> Result<RestoreReport> {
        let report = self
            .restorer
            .restore(
                snapshot,
                RestoreOptions {
                    context_document: context_document.map(str::to_string),
                },
            )
            .await?;
        if !report.corrections.is_empty() {
            let keep = self.store.get_all(key).await?.len().max(1);
            let healed = self.capturer.capture_all_windows().await;
            self.store.set(key, healed, Some(keep)).await?;
            info!(
                key = %key,
                corrections = report.corrections.len(),
                "stored arrangement updated with corrected paths"
            );
        }
        Ok(report)
    }

    /// Capture every window into the document itself and make sure the
    /// document has a stable id.
    pub async fn embed_in_document(&self, path: &str) -> Result<Snapshot> {
        let _guard = InProgressGuard::acquire(&self.in_progress)?;
        let documents = self.documents()?;
        ensure_stable_id(documents.as_ref(), path).await?;
        let snapshot = self.capturer.capture_all_windows().await;
        documents.set_context(path, &snapshot).await?;
        info!(path = %path, tabs = snapshot.tab_count(), "arrangement embedded");
        Ok(snapshot)
    }

    /// Restore the arrangement embedded in `path`, focusing that document.
    pub async fn restore_from_document(&self, path: &str) -> Result<RestoreReport> {
        let _guard = InProgressGuard::acquire(&self.in_progress)?;
        let documents = self.documents()?;
        let snapshot = documents
            .get_context(path)
            .await?
            .ok_or_else(|| Error::NoArrangement(path.to_string()))?;
        let report = self
            .restorer
            .restore(
                snapshot,
                RestoreOptions {
                    context_document: Some(path.to_string()),
                },
            )
            .await?;
        if !report.corrections.is_empty() {
            let healed = self.capturer.capture_all_windows().await;
            if let Err(e) = documents.set_context(path, &healed).await {
                warn!(path = %path, error = %e, "could not re-embed corrected arrangement");
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FrontmatterAdapter;
    use crate::geometry::Rect;
    use crate::host::memory::InMemoryHost;
    use crate::snapshot::{LayoutNode, SplitDirection, Tab};
    use crate::store::{MemoryBackend, StoreConfig};

    fn screen() -> Rect {
        Rect::new(0.0, 0.0, 1728.0, 1117.0)
    }

    fn service(host: &Arc<InMemoryHost>) -> ArrangementService {
        let store = ArrangementStore::new(Arc::new(MemoryBackend::new()), StoreConfig::default());
        ArrangementService::new(host.clone(), host.clone(), store, &Config::default())
    }

    fn two_pane_layout(left: &str, right: &str) -> LayoutNode {
        LayoutNode::split_sized(
            SplitDirection::Horizontal,
            vec![
                LayoutNode::tab_group(vec![Tab::new(left)]),
                LayoutNode::tab_group(vec![Tab::new(right)]),
            ],
            vec![60.0, 40.0],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn save_then_restore_rebuilds_layout() {
        let host = Arc::new(InMemoryHost::new(screen()));
        host.add_document("a.md", None);
        host.add_document("b.md", None);
        host.seed_main(&two_pane_layout("a.md", "b.md"), screen());
        let service = service(&host);

        service.save("work", None).await.unwrap();
        host.seed_main(&LayoutNode::tab_group(vec![Tab::new("a.md")]), screen());

        let report = service.restore("work", None).await.unwrap();
        assert_eq!(report.tabs_opened, 2);
        assert!(report.corrections.is_empty());
        assert_eq!(
            host.render_window(host.main_window_id()),
            "h{60,40}([a.md] | [b.md])"
        );
        assert_eq!(service.store().get_all("work").await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_key_is_reported() {
        let host = Arc::new(InMemoryHost::new(screen()));
        let err = service(&host).restore("nothing", None).await.unwrap_err();
        assert!(matches!(err, Error::NoArrangement(key) if key == "nothing"));
    }

    #[tokio::test(start_paused = true)]
    async fn renamed_documents_are_healed_in_the_store() {
        let host = Arc::new(InMemoryHost::new(screen()));
        host.add_document("old/a.md", Some("id-a"));
        host.add_document("b.md", None);
        host.seed_main(&two_pane_layout("old/a.md", "b.md"), screen());
        let service = service(&host);
        service.save("work", None).await.unwrap();

        host.rename_document("old/a.md", "new/a.md");
        let report = service.restore("work", None).await.unwrap();
        assert_eq!(report.corrections.len(), 1);
        assert_eq!(report.corrections[0].new_path, "new/a.md");

        let newest = service.store().get("work").await.unwrap().unwrap();
        let paths: Vec<&str> = newest
            .arrangement
            .main
            .root
            .tabs()
            .into_iter()
            .map(|t| t.path.as_str())
            .collect();
        assert_eq!(paths, vec!["new/a.md", "b.md"]);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_calls_are_rejected() {
        let host = Arc::new(InMemoryHost::new(screen()));
        let service = service(&host);
        let _held = InProgressGuard::acquire(&service.in_progress).unwrap();
        assert!(matches!(service.save("k", None).await, Err(Error::Busy)));
        drop(_held);
        assert!(service.save("k", None).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn document_embedding_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# A\n").unwrap();
        let host = Arc::new(InMemoryHost::new(screen()));
        host.add_document("a.md", None);
        host.add_document("b.md", None);
        host.seed_main(&two_pane_layout("a.md", "b.md"), screen());
        let service =
            service(&host).with_documents(Arc::new(FrontmatterAdapter::new(dir.path())));

        service.embed_in_document("a.md").await.unwrap();
        let text = std::fs::read_to_string(dir.path().join("a.md")).unwrap();
        assert!(text.contains("layout-id: "));
        assert!(text.contains("layout-arrangement: "));

        host.seed_main(&LayoutNode::tab_group(vec![Tab::new("b.md")]), screen());
        let report = service.restore_from_document("a.md").await.unwrap();
        assert_eq!(report.tabs_opened, 2);
        assert_eq!(report.focused, Some(host.main_window_id()));
    }

    #[tokio::test(start_paused = true)]
    async fn document_operations_need_an_adapter() {
        let host = Arc::new(InMemoryHost::new(screen()));
        let err = service(&host).embed_in_document("a.md").await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
