//! Layout restoration engine: rebuild the live layout from a [`Snapshot`].
//!
//! # Data flow
//!
//! ```text
//! VersionedSnapshot → normalize → clamp → tiling? → teardown → main window
//!     → tree reconstruction → popouts → activation → sidebars
//!     → deferred view state (spawned) → focus → RestoreReport
//! ```
//!
//! Stages run strictly in order. Missing documents, bad geometry and sidebar
//! failures are handled locally; any other host failure aborts the restore
//! with [`Error::Restore`] naming the stage and shows one notification.
//! Effects of earlier stages are kept.
//!
//! Trees are rebuilt from a single seed pane. A split builds its first child
//! from the seed, then creates every sibling by splitting from the first leaf
//! of that first child. Under the host split contract (see
//! [`crate::host`]) this wraps the whole first subtree as one unit and adds
//! siblings in order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, HostError, Result};
use crate::geometry::{
    CoordinateTransformer, GeometryConfig, Rect, sanitize_geometry, validate_geometry,
};
use crate::host::{
    ContainerView, HostHandle, PaneId, SidebarSide, ViewState, WindowId, WindowOptions,
};
use crate::resolver::{CatalogHandle, FileResolver, PathCorrection};
use crate::snapshot::{LayoutNode, Snapshot, Tab, VersionedSnapshot, normalize_sizes};

// =============================================================================
// Configuration
// =============================================================================

/// Restore settings (`[restore]` in layoutkeep.toml).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Popouts beyond this count are dropped.
    pub max_popouts: usize,
    /// Wait after the next frame before activating tabs, used when the host
    /// cannot signal layout completion.
    pub settle_delay_ms: u64,
    /// Wait before the deferred view-state pass.
    pub scroll_delay_ms: u64,
    /// How many parent containers the size walk may climb.
    pub size_walk_hops: usize,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            max_popouts: 20,
            settle_delay_ms: 100,
            scroll_delay_ms: 300,
            size_walk_hops: 5,
        }
    }
}

/// Pipeline stage, reported on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStage {
    Normalize,
    ClampPopouts,
    Tiling,
    Teardown,
    MainWindow,
    TreeReconstruction,
    Popouts,
    Activation,
    Sidebars,
    ViewState,
    Focus,
}

impl RestoreStage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normalize => "normalize",
            Self::ClampPopouts => "popout clamp",
            Self::Tiling => "tiling",
            Self::Teardown => "teardown",
            Self::MainWindow => "main window reconciliation",
            Self::TreeReconstruction => "tree reconstruction",
            Self::Popouts => "popout windows",
            Self::Activation => "deferred activation",
            Self::Sidebars => "sidebars",
            Self::ViewState => "view state",
            Self::Focus => "focus",
        }
    }
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Document the restore was requested from. Its window gets focus.
    pub context_document: Option<String>,
}

// =============================================================================
// Result types
// =============================================================================

/// Handle to the deferred view-state task.
pub struct ScrollRestoreHandle {
    task: JoinHandle<usize>,
}

impl ScrollRestoreHandle {
    /// Stop the task if it has not run yet.
    pub fn cancel(&self) {
        self.task.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Number of panes whose view state was applied, or `None` when the task
    /// was cancelled.
    pub async fn join(self) -> Option<usize> {
        self.task.await.ok()
    }
}

impl fmt::Debug for ScrollRestoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScrollRestoreHandle")
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

/// Outcome of a completed restore.
#[derive(Debug)]
pub struct RestoreReport {
    /// Windows holding restored content, main included.
    pub windows_opened: usize,
    pub tabs_opened: usize,
    /// Tabs whose document could not be resolved.
    pub tabs_skipped: usize,
    /// Popouts dropped by the ceiling, duplicate claims or lack of content.
    pub popouts_skipped: usize,
    pub tiled: bool,
    /// Paths that resolved somewhere else. Callers should re-capture and save.
    pub corrections: Vec<PathCorrection>,
    pub scroll: Option<ScrollRestoreHandle>,
    pub focused: Option<WindowId>,
}

// =============================================================================
// Restorer
// =============================================================================

/// Mutable bookkeeping for one restore call.
struct RestoreRun {
    resolver: FileResolver,
    activations: Vec<PaneId>,
    view_states: Vec<(String, ViewState)>,
    /// Primary documents of popouts already opened in this pass.
    popout_claims: BTreeSet<String>,
    doc_panes: BTreeMap<String, (WindowId, PaneId)>,
    window_active: BTreeMap<WindowId, PaneId>,
    tabs_opened: usize,
    tabs_skipped: usize,
}

impl RestoreRun {
    fn new(catalog: CatalogHandle) -> Self {
        Self {
            resolver: FileResolver::new(catalog),
            activations: Vec::new(),
            view_states: Vec::new(),
            popout_claims: BTreeSet::new(),
            doc_panes: BTreeMap::new(),
            window_active: BTreeMap::new(),
            tabs_opened: 0,
            tabs_skipped: 0,
        }
    }

    /// Resolved `(intrinsic index, path)` pairs, in order.
    fn resolve_tabs(&mut self, tabs: &[Tab]) -> Vec<(usize, String)> {
        tabs.iter()
            .enumerate()
            .filter_map(|(idx, tab)| self.resolver.resolve(tab).document.map(|doc| (idx, doc)))
            .collect()
    }

    fn first_resolvable(&mut self, node: &LayoutNode) -> Option<String> {
        node.tabs()
            .into_iter()
            .find_map(|tab| self.resolver.resolve(tab).document)
    }
}

struct StageFailure {
    stage: RestoreStage,
    error: Error,
}

trait StageExt<T> {
    fn stage(self, stage: RestoreStage) -> std::result::Result<T, StageFailure>;
}

impl<T, E: Into<Error>> StageExt<T> for std::result::Result<T, E> {
    fn stage(self, stage: RestoreStage) -> std::result::Result<T, StageFailure> {
        self.map_err(|e| StageFailure {
            stage,
            error: e.into(),
        })
    }
}

/// Index of the tab to activate: the single active tab, otherwise the first.
fn active_index(tabs: &[Tab]) -> usize {
    let mut active = tabs.iter().enumerate().filter(|(_, t)| t.active);
    match (active.next(), active.next()) {
        (Some((idx, _)), None) => idx,
        _ => 0,
    }
}

/// Rebuilds the live layout through a [`LayoutHost`](crate::host::LayoutHost).
pub struct LayoutSnapshotRestorer {
    host: HostHandle,
    catalog: CatalogHandle,
    geometry: GeometryConfig,
    config: RestoreConfig,
}

impl LayoutSnapshotRestorer {
    pub fn new(
        host: HostHandle,
        catalog: CatalogHandle,
        geometry: GeometryConfig,
        config: RestoreConfig,
    ) -> Self {
        Self {
            host,
            catalog,
            geometry,
            config,
        }
    }

    /// Restore a snapshot of any supported version.
    pub async fn restore(
        &self,
        snapshot: impl Into<VersionedSnapshot>,
        options: RestoreOptions,
    ) -> Result<RestoreReport> {
        match self.run(snapshot.into(), &options).await {
            Ok(report) => Ok(report),
            Err(StageFailure { stage, error }) => {
                warn!(stage = %stage, error = %error, "restore aborted");
                self.host
                    .notify(&format!("Could not restore the arrangement ({stage} failed)."));
                Err(Error::Restore {
                    stage,
                    source: Box::new(error),
                })
            }
        }
    }

    async fn run(
        &self,
        versioned: VersionedSnapshot,
        options: &RestoreOptions,
    ) -> std::result::Result<RestoreReport, StageFailure> {
        let mut run = RestoreRun::new(self.catalog.clone());

        // 1. Normalize
        let from_version = versioned.version();
        let mut snapshot: Snapshot = versioned.into_current().normalized();
        debug!(
            stage = %RestoreStage::Normalize,
            from_version,
            tabs = snapshot.tab_count(),
            "snapshot normalized"
        );

        // 2. Clamp popouts
        let mut popouts_skipped = 0;
        if snapshot.popouts.len() > self.config.max_popouts {
            popouts_skipped = snapshot.popouts.len() - self.config.max_popouts;
            warn!(
                stage = %RestoreStage::ClampPopouts,
                dropped = popouts_skipped,
                max = self.config.max_popouts,
                "too many popouts, dropping the excess"
            );
            snapshot.popouts.truncate(self.config.max_popouts);
        }

        // 3. Tiling decision
        let screen = self.host.screen().await.stage(RestoreStage::Tiling)?;
        let transformer = CoordinateTransformer::new(screen, self.geometry.clone());
        let source = snapshot.source_screen;
        let tiles = match &source {
            Some(source) if transformer.needs_tiling(source) => {
                let tiles = transformer.calculate_tiled_layout(1 + snapshot.popouts.len());
                info!(
                    stage = %RestoreStage::Tiling,
                    windows = tiles.len(),
                    source_aspect = source.aspect_ratio,
                    current_aspect = screen.aspect_ratio(),
                    "screen shape changed, tiling windows"
                );
                self.host.notify(
                    "Screen shape changed since this arrangement was saved. Windows were tiled.",
                );
                Some(tiles)
            }
            _ => None,
        };

        // 4. Teardown
        let main = self.host.main_window().await.stage(RestoreStage::Teardown)?;
        let registry = self
            .host
            .floating_windows()
            .await
            .stage(RestoreStage::Teardown)?;
        let mut closed = BTreeSet::new();
        for window in registry {
            if window == main || !closed.insert(window) {
                continue;
            }
            if let Err(e) = self.host.close_window(window).await {
                warn!(stage = %RestoreStage::Teardown, window_id = %window, error = %e, "close failed");
            }
        }

        // 5. Main window reconciliation
        let seed = self.reconcile_main(main).await.stage(RestoreStage::MainWindow)?;
        let main_bounds = match &tiles {
            Some(tiles) => tiles.first().copied(),
            None => validate_geometry(snapshot.main.raw_geometry())
                .map(|v| transformer.virtual_to_physical(v, source.as_ref())),
        };
        match main_bounds {
            Some(bounds) => self
                .host
                .set_window_bounds(main, bounds)
                .await
                .stage(RestoreStage::MainWindow)?,
            None => debug!(stage = %RestoreStage::MainWindow, "main geometry invalid, left as is"),
        }

        // 6. Tree reconstruction
        self.build_node(&snapshot.main.root, seed, main, &mut run)
            .await
            .stage(RestoreStage::TreeReconstruction)?;

        // 7. Popouts
        let mut windows_opened = 1;
        let mut popout_windows: Vec<Option<WindowId>> = vec![None; snapshot.popouts.len()];
        for (idx, popout) in snapshot.popouts.iter().enumerate() {
            let Some(primary) = run.first_resolvable(&popout.root) else {
                debug!(stage = %RestoreStage::Popouts, index = idx, "popout has no resolvable tab");
                popouts_skipped += 1;
                continue;
            };
            if run.popout_claims.contains(&primary) {
                debug!(stage = %RestoreStage::Popouts, index = idx, path = %primary, "popout already claimed");
                popouts_skipped += 1;
                continue;
            }

            let bounds = match &tiles {
                Some(tiles) => tiles.get(idx + 1).copied(),
                None => Some(self.popout_bounds(popout.raw_geometry(), &transformer, source.as_ref())),
            };
            let (window, seed) = self
                .host
                .open_window(WindowOptions {
                    bounds,
                    proxy: popout.is_proxy(),
                })
                .await
                .stage(RestoreStage::Popouts)?;
            self.build_node(&popout.root, seed, window, &mut run)
                .await
                .stage(RestoreStage::Popouts)?;
            run.popout_claims.insert(primary);
            popout_windows[idx] = Some(window);
            windows_opened += 1;
        }

        // 8. Deferred activation
        self.host.next_frame().await;
        if !self.host.wait_for_layout().await {
            tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;
        }
        for pane in std::mem::take(&mut run.activations) {
            self.host
                .activate_tab(pane)
                .await
                .stage(RestoreStage::Activation)?;
        }

        // 9. Sidebars
        for (side, state) in [
            (SidebarSide::Left, &snapshot.left_sidebar),
            (SidebarSide::Right, &snapshot.right_sidebar),
        ] {
            if let Some(state) = state {
                if let Err(e) = self.host.set_sidebar(side, state).await {
                    debug!(stage = %RestoreStage::Sidebars, ?side, error = %e, "sidebar not restored");
                }
            }
        }

        // 10. Deferred view state
        let scroll = self.spawn_view_state(std::mem::take(&mut run.view_states));

        // 11. Focus
        let focused = self
            .focus(&snapshot, main, &popout_windows, options, &run)
            .await
            .stage(RestoreStage::Focus)?;

        let corrections = run.resolver.take_corrections();
        info!(
            windows = windows_opened,
            tabs = run.tabs_opened,
            skipped = run.tabs_skipped,
            popouts_skipped,
            corrections = corrections.len(),
            tiled = tiles.is_some(),
            "arrangement restored"
        );

        Ok(RestoreReport {
            windows_opened,
            tabs_opened: run.tabs_opened,
            tabs_skipped: run.tabs_skipped,
            popouts_skipped,
            tiled: tiles.is_some(),
            corrections,
            scroll,
            focused,
        })
    }

    /// Detach every main-window pane except the first and return it as seed.
    async fn reconcile_main(&self, main: WindowId) -> Result<PaneId> {
        let panes: Vec<PaneId> = self
            .host
            .iterate_all_panes()
            .await?
            .into_iter()
            .filter_map(|(w, p)| (w == main).then_some(p))
            .collect();
        let Some((&seed, rest)) = panes.split_first() else {
            return Err(HostError::rejected("reconcile_main", "main window has no pane").into());
        };
        for pane in rest {
            self.host.detach_pane(*pane).await?;
        }
        debug!(seed = %seed, detached = rest.len(), "main window reduced to seed pane");
        Ok(seed)
    }

    fn popout_bounds(
        &self,
        raw: crate::geometry::RawGeometry,
        transformer: &CoordinateTransformer,
        source: Option<&crate::snapshot::ScreenInfo>,
    ) -> Rect {
        let virtual_rect = validate_geometry(raw).unwrap_or_else(|| {
            debug!(stage = %RestoreStage::Popouts, "popout geometry invalid, sanitizing");
            sanitize_geometry(raw, self.geometry.default_window)
        });
        transformer.virtual_to_physical(virtual_rect, source)
    }

    /// Rebuild `node` starting from `seed`. Returns the first leaf pane of
    /// the built subtree.
    fn build_node<'a>(
        &'a self,
        node: &'a LayoutNode,
        seed: PaneId,
        window: WindowId,
        run: &'a mut RestoreRun,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<PaneId>> + Send + 'a>> {
        Box::pin(async move {
            match node {
                LayoutNode::TabGroup { tabs } => self.build_group(tabs, seed, window, run).await,
                LayoutNode::Split {
                    direction,
                    children,
                    sizes,
                } => {
                    let mut kept = Vec::with_capacity(children.len());
                    for (idx, child) in children.iter().enumerate() {
                        if run.first_resolvable(child).is_some() {
                            kept.push(idx);
                        } else {
                            run.tabs_skipped += child.tab_count();
                        }
                    }
                    let Some((&first, rest)) = kept.split_first() else {
                        return Ok(seed);
                    };

                    let first_leaf = self.build_node(&children[first], seed, window, run).await?;
                    for &idx in rest {
                        let pane = self.host.split_from(first_leaf, *direction).await?;
                        debug!(
                            from = %first_leaf,
                            new_pane = %pane,
                            ?direction,
                            "split pane created"
                        );
                        self.build_node(&children[idx], pane, window, run).await?;
                    }

                    if let Some(sizes) = sizes.as_ref().filter(|_| kept.len() > 1) {
                        let kept_sizes: Vec<f64> =
                            kept.iter().filter_map(|&i| sizes.get(i).copied()).collect();
                        if kept_sizes.len() == kept.len() {
                            self.apply_sizes(first_leaf, *direction, &normalize_sizes(&kept_sizes))
                                .await;
                        }
                    }
                    Ok(first_leaf)
                }
            }
        })
    }

    async fn build_group(
        &self,
        tabs: &[Tab],
        seed: PaneId,
        window: WindowId,
        run: &mut RestoreRun,
    ) -> Result<PaneId> {
        let resolved = run.resolve_tabs(tabs);
        run.tabs_skipped += tabs.len() - resolved.len();
        if resolved.is_empty() {
            return Ok(seed);
        }

        let active = active_index(tabs);
        let mut order: Vec<&(usize, String)> = resolved.iter().filter(|(i, _)| *i != active).collect();
        if let Some(active_tab) = resolved.iter().find(|(i, _)| *i == active) {
            order.push(active_tab);
        }
        let activate = resolved
            .iter()
            .find(|(i, _)| *i == active)
            .or_else(|| resolved.first())
            .map(|(i, _)| *i);

        let group = self.host.pane_container(seed).await?;
        let mut opened: Vec<(usize, PaneId)> = Vec::with_capacity(order.len());
        for (position, (idx, path)) in order.into_iter().enumerate() {
            let pane = if position == 0 {
                seed
            } else {
                let insert_at = opened.iter().filter(|(i, _)| i < idx).count();
                self.host.create_pane_in(group, insert_at).await?
            };
            self.host.open_document(pane, path).await?;
            debug!(pane_id = %pane, path = %path, "tab opened");

            let slot = opened.partition_point(|(i, _)| i < idx);
            opened.insert(slot, (*idx, pane));
            run.tabs_opened += 1;
            run.doc_panes.entry(path.clone()).or_insert((window, pane));

            let tab = &tabs[*idx];
            if tab.has_view_state() {
                run.view_states.push((
                    path.clone(),
                    ViewState {
                        scroll: tab.scroll_position,
                        properties_collapsed: tab.properties_collapsed,
                        canvas_viewport: tab.canvas_viewport,
                    },
                ));
            }
            if Some(*idx) == activate {
                run.activations.push(pane);
                run.window_active.entry(window).or_insert(pane);
            }
        }

        Ok(opened.first().map_or(seed, |(_, pane)| *pane))
    }

    /// Walk up from `leaf` to the first split matching the direction and
    /// child count, then apply `sizes`.
    async fn apply_sizes(&self, leaf: PaneId, direction: crate::snapshot::SplitDirection, sizes: &[f64]) {
        let Ok(mut current) = self.host.pane_container(leaf).await else {
            return;
        };
        for _ in 0..self.config.size_walk_hops {
            let Ok(Some(parent)) = self.host.parent_container(current).await else {
                break;
            };
            if let Ok(ContainerView::Split {
                direction: d,
                children,
            }) = self.host.container(parent).await
            {
                if d == direction && children.len() == sizes.len() {
                    if let Err(e) = self.host.set_container_sizes(parent, sizes).await {
                        warn!(container_id = %parent, error = %e, "split sizes not applied");
                    }
                    return;
                }
            }
            current = parent;
        }
        debug!(pane_id = %leaf, "no matching split for sizes");
    }

    fn spawn_view_state(&self, states: Vec<(String, ViewState)>) -> Option<ScrollRestoreHandle> {
        if states.is_empty() {
            return None;
        }
        let host = self.host.clone();
        let delay = Duration::from_millis(self.config.scroll_delay_ms);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let panes = match host.iterate_all_panes().await {
                Ok(panes) => panes,
                Err(e) => {
                    warn!(stage = %RestoreStage::ViewState, error = %e, "pane iteration failed");
                    return 0;
                }
            };
            let mut documents = Vec::with_capacity(panes.len());
            for (_, pane) in panes {
                if let Ok(view) = host.pane(pane).await {
                    documents.push((pane, view.document));
                }
            }

            let mut used = BTreeSet::new();
            let mut applied = 0;
            for (path, state) in states {
                let target = documents
                    .iter()
                    .find(|(pane, doc)| doc.as_deref() == Some(path.as_str()) && !used.contains(pane))
                    .map(|(pane, _)| *pane);
                let Some(pane) = target else {
                    debug!(path = %path, "no pane for deferred view state");
                    continue;
                };
                used.insert(pane);
                match host.apply_view_state(pane, &state).await {
                    Ok(()) => applied += 1,
                    Err(e) => debug!(pane_id = %pane, error = %e, "view state not applied"),
                }
            }
            applied
        });
        Some(ScrollRestoreHandle { task })
    }

    async fn focus(
        &self,
        snapshot: &Snapshot,
        main: WindowId,
        popouts: &[Option<WindowId>],
        options: &RestoreOptions,
        run: &RestoreRun,
    ) -> Result<Option<WindowId>> {
        let context = options
            .context_document
            .as_ref()
            .and_then(|doc| run.doc_panes.get(doc).copied());

        let (window, pane) = match context {
            Some((window, pane)) => (window, Some(pane)),
            None => {
                let window = usize::try_from(snapshot.focused_window)
                    .ok()
                    .and_then(|idx| popouts.get(idx).copied().flatten())
                    .unwrap_or(main);
                (window, run.window_active.get(&window).copied())
            }
        };

        self.host.focus_window(window).await?;
        if let Some(pane) = pane {
            self.host.set_active_pane(pane).await?;
        }
        Ok(Some(window))
    }
}
