//! Layout capture engine: walk the live layout and produce a [`Snapshot`].
//!
//! # Data flow
//!
//! ```text
//! LayoutHost (containers, panes, windows) → LayoutSnapshotCapturer → Snapshot
//!                                          ↘ CoordinateTransformer (virtual geometry)
//! ```
//!
//! Capture never fails. Host errors are logged and the affected node
//! degrades to an empty tab group, which normalization later removes.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::geometry::{CoordinateTransformer, GeometryConfig};
use crate::host::{ContainerId, ContainerView, HostHandle, SidebarSide, WindowId};
use crate::resolver::CatalogHandle;
use crate::snapshot::{
    LayoutNode, MAIN_WINDOW_INDEX, ScreenInfo, SidebarState, Snapshot, Tab, WindowState,
    display_name_for, epoch_ms,
};

/// View type the host shows in proxy windows.
pub const DEFAULT_PROXY_VIEW_TYPE: &str = "layoutkeep-proxy";

// =============================================================================
// Configuration
// =============================================================================

/// Capture settings (`[capture]` in layoutkeep.toml).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// A window containing a pane of this view type is flagged as a proxy.
    pub proxy_view_type: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            proxy_view_type: DEFAULT_PROXY_VIEW_TYPE.to_string(),
        }
    }
}

// =============================================================================
// Capturer
// =============================================================================

/// Reads the live layout through a [`LayoutHost`](crate::host::LayoutHost).
pub struct LayoutSnapshotCapturer {
    host: HostHandle,
    catalog: CatalogHandle,
    geometry: GeometryConfig,
    config: CaptureConfig,
}

impl LayoutSnapshotCapturer {
    pub fn new(
        host: HostHandle,
        catalog: CatalogHandle,
        geometry: GeometryConfig,
        config: CaptureConfig,
    ) -> Self {
        Self {
            host,
            catalog,
            geometry,
            config,
        }
    }

    async fn transformer(&self) -> Option<CoordinateTransformer> {
        match self.host.screen().await {
            Ok(screen) => Some(CoordinateTransformer::new(screen, self.geometry.clone())),
            Err(e) => {
                warn!(error = %e, "screen unavailable, capturing without geometry");
                None
            }
        }
    }

    /// Capture every window, sidebars, focus and the current screen.
    pub async fn capture_all_windows(&self) -> Snapshot {
        let ts = epoch_ms();
        let transformer = self.transformer().await;

        let Ok(main) = self.host.main_window().await else {
            warn!("main window unavailable, capturing an empty arrangement");
            return Snapshot::new(WindowState::new(LayoutNode::empty()), ts);
        };

        let mut snapshot = Snapshot::new(
            self.capture_window_with(main, transformer.as_ref()).await,
            ts,
        );

        let registry = self.host.floating_windows().await.unwrap_or_else(|e| {
            warn!(error = %e, "floating window registry unavailable");
            Vec::new()
        });
        let proxies = self.proxy_windows().await;

        let mut seen = BTreeSet::new();
        let mut popout_ids = Vec::new();
        for window in registry {
            if window == main || !seen.insert(window) {
                continue;
            }
            let mut state = self.capture_window_with(window, transformer.as_ref()).await;
            if proxies.contains(&window) {
                state.is_proxy = Some(true);
            }
            snapshot.popouts.push(state);
            popout_ids.push(window);
        }

        snapshot.focused_window = match self.host.focused_window().await {
            Ok(Some(window)) => popout_ids
                .iter()
                .position(|w| *w == window)
                .and_then(|idx| i32::try_from(idx).ok())
                .unwrap_or(MAIN_WINDOW_INDEX),
            _ => MAIN_WINDOW_INDEX,
        };
        snapshot.left_sidebar = self.capture_sidebar(SidebarSide::Left).await;
        snapshot.right_sidebar = self.capture_sidebar(SidebarSide::Right).await;
        snapshot.source_screen = transformer.map(|t| ScreenInfo::from_rect(&t.screen()));

        info!(
            windows = 1 + snapshot.popouts.len(),
            tabs = snapshot.tab_count(),
            focused = snapshot.focused_window,
            "captured arrangement"
        );
        snapshot
    }

    /// Windows holding a pane of the proxy marker view type.
    async fn proxy_windows(&self) -> BTreeSet<WindowId> {
        let mut by_window: BTreeMap<WindowId, bool> = BTreeMap::new();
        let panes = match self.host.iterate_all_panes().await {
            Ok(panes) => panes,
            Err(e) => {
                warn!(error = %e, "pane iteration failed, proxy detection skipped");
                return BTreeSet::new();
            }
        };
        for (window, pane) in panes {
            let is_marker = self
                .host
                .pane(pane)
                .await
                .is_ok_and(|p| p.view_type == self.config.proxy_view_type);
            *by_window.entry(window).or_default() |= is_marker;
        }
        by_window
            .into_iter()
            .filter_map(|(window, proxy)| proxy.then_some(window))
            .collect()
    }

    /// Capture one window's tree and virtual geometry.
    pub async fn capture_window(&self, window: WindowId) -> WindowState {
        let transformer = self.transformer().await;
        self.capture_window_with(window, transformer.as_ref()).await
    }

    async fn capture_window_with(
        &self,
        window: WindowId,
        transformer: Option<&CoordinateTransformer>,
    ) -> WindowState {
        let root = match self.host.root_container(window).await {
            Ok(root) => self.capture_node(root).await,
            Err(e) => {
                warn!(window_id = %window, error = %e, "window root unavailable");
                LayoutNode::empty()
            }
        };
        let mut state = WindowState::new(root);
        if let Some(transformer) = transformer {
            match self.host.window_bounds(window).await {
                Ok(bounds) => state.set_geometry(transformer.physical_to_virtual(bounds)),
                Err(e) => debug!(window_id = %window, error = %e, "window bounds unavailable"),
            }
        }
        state
    }

    /// Recursively capture a container.
    ///
    /// Uses explicit `Pin<Box<..>>` return type because async recursion
    /// requires boxing the future.
    pub fn capture_node<'a>(
        &'a self,
        container: ContainerId,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = LayoutNode> + Send + 'a>> {
        Box::pin(async move {
            let view = match self.host.container(container).await {
                Ok(view) => view,
                Err(e) => {
                    warn!(container_id = %container, error = %e, "container unreadable");
                    return LayoutNode::empty();
                }
            };

            match view {
                ContainerView::Split {
                    direction,
                    children,
                } => {
                    let mut kept = Vec::with_capacity(children.len());
                    for child in children {
                        let node = self.capture_node(child.container).await;
                        if !node.is_empty() {
                            kept.push((node, child.size));
                        }
                    }
                    let share = 100.0 / kept.len().max(1) as f64;
                    match kept.len() {
                        0 => LayoutNode::empty(),
                        1 => kept
                            .pop()
                            .map_or_else(LayoutNode::empty, |(node, _)| node),
                        _ => {
                            let sizes = kept.iter().map(|(_, s)| s.unwrap_or(share)).collect();
                            let children = kept.into_iter().map(|(node, _)| node).collect();
                            LayoutNode::split_sized(direction, children, sizes)
                        }
                    }
                }
                ContainerView::TabGroup {
                    panes,
                    active_index,
                } => {
                    let mut tabs = Vec::with_capacity(panes.len());
                    for (idx, pane_id) in panes.into_iter().enumerate() {
                        let pane = match self.host.pane(pane_id).await {
                            Ok(pane) => pane,
                            Err(e) => {
                                debug!(pane_id = %pane_id, error = %e, "pane unreadable");
                                continue;
                            }
                        };
                        let Some(path) = pane.document else {
                            continue;
                        };
                        let mut tab = Tab::new(path);
                        tab.active = active_index == Some(idx);
                        tab.stable_id = self.catalog.stable_id(&tab.path);
                        tab.display_name = display_name_for(&tab.path);
                        tab.scroll_position = pane.scroll;
                        tab.properties_collapsed = pane.properties_collapsed;
                        if pane.view_type == "canvas" {
                            tab.canvas_viewport = pane.canvas_viewport;
                        }
                        tabs.push(tab);
                    }
                    LayoutNode::tab_group(tabs)
                }
                ContainerView::Unknown => {
                    debug!(container_id = %container, "unclassifiable container");
                    LayoutNode::empty()
                }
            }
        })
    }

    /// Sidebar collapsed flag plus the visible panel.
    ///
    /// The panel is looked up through the group's active-tab pointer, then a
    /// scan for the active entry, then the legacy single-leaf pointer. The
    /// first lookup that answers wins; failures are silent.
    pub async fn capture_sidebar(&self, side: SidebarSide) -> Option<SidebarState> {
        let collapsed = match self.host.sidebar_collapsed(side).await {
            Ok(collapsed) => collapsed,
            Err(e) => {
                debug!(?side, error = %e, "sidebar unavailable");
                return None;
            }
        };

        let mut active_tab = self.host.sidebar_active_tab(side).await.ok().flatten();
        if active_tab.is_none() {
            active_tab = self
                .host
                .sidebar_tabs(side)
                .await
                .ok()
                .and_then(|tabs| tabs.into_iter().find(|t| t.active).map(|t| t.name));
        }
        if active_tab.is_none() {
            active_tab = self.host.sidebar_legacy_leaf(side).await.ok().flatten();
        }

        Some(SidebarState {
            collapsed,
            active_tab,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::host::memory::{InMemoryHost, SidebarExposure};
    use crate::snapshot::SplitDirection;
    use std::sync::Arc;

    fn screen() -> Rect {
        Rect::new(0.0, 0.0, 1728.0, 1117.0)
    }

    fn capturer(host: &Arc<InMemoryHost>) -> LayoutSnapshotCapturer {
        LayoutSnapshotCapturer::new(
            host.clone(),
            host.clone(),
            GeometryConfig::default(),
            CaptureConfig::default(),
        )
    }

    fn group(tabs: Vec<Tab>) -> LayoutNode {
        LayoutNode::tab_group(tabs)
    }

    #[tokio::test]
    async fn captures_split_tree_with_sizes_and_active() {
        let host = Arc::new(InMemoryHost::new(screen()));
        host.add_document("a.md", Some("u-a"));
        host.seed_main(
            &LayoutNode::split_sized(
                SplitDirection::Horizontal,
                vec![
                    group(vec![Tab::new("a.md"), Tab::new("b.md").activated()]),
                    group(vec![Tab::new("c.md")]),
                ],
                vec![70.0, 30.0],
            ),
            screen(),
        );

        let snapshot = capturer(&host).capture_all_windows().await;
        let LayoutNode::Split {
            direction,
            children,
            sizes,
        } = &snapshot.main.root
        else {
            panic!("expected split, got {:?}", snapshot.main.root);
        };
        assert_eq!(*direction, SplitDirection::Horizontal);
        assert_eq!(sizes.as_deref(), Some(&[70.0, 30.0][..]));
        let tabs = children[0].tabs();
        assert_eq!(tabs[0].stable_id.as_deref(), Some("u-a"));
        assert_eq!(tabs[0].display_name.as_deref(), Some("a"));
        assert!(!tabs[0].active);
        assert!(tabs[1].active);
        assert_eq!(snapshot.main.geometry(), Some(screen()));
    }

    #[tokio::test]
    async fn empty_children_collapse_and_sizes_fall_back_to_equal_share() {
        let host = Arc::new(InMemoryHost::new(screen()));
        host.seed_main(
            &LayoutNode::split(
                SplitDirection::Vertical,
                vec![
                    LayoutNode::empty(),
                    group(vec![Tab::new("a.md")]),
                    LayoutNode::split(
                        SplitDirection::Horizontal,
                        vec![group(vec![Tab::new("b.md")]), LayoutNode::empty()],
                    ),
                ],
            ),
            screen(),
        );

        let node = capturer(&host).capture_all_windows().await.main.root;
        assert_eq!(
            node,
            LayoutNode::split_sized(
                SplitDirection::Vertical,
                vec![
                    group(vec![Tab::new("a.md").with_display_name("a").activated()]),
                    group(vec![Tab::new("b.md").with_display_name("b").activated()]),
                ],
                vec![50.0, 50.0],
            )
        );
    }

    #[tokio::test]
    async fn registry_duplicates_and_main_are_skipped() {
        let host = Arc::new(InMemoryHost::new(screen()));
        let popout = host.add_window(
            &group(vec![Tab::new("p.md")]),
            Rect::new(100.0, 100.0, 800.0, 600.0),
            false,
        );
        host.register_duplicate(popout);
        host.register_duplicate(host.main_window_id());
        host.set_focused(popout);

        let snapshot = capturer(&host).capture_all_windows().await;
        assert_eq!(snapshot.popouts.len(), 1);
        assert_eq!(snapshot.focused_window, 0);
        assert!(!snapshot.popouts[0].is_proxy());
    }

    #[tokio::test]
    async fn proxy_windows_are_flagged() {
        let host = Arc::new(InMemoryHost::new(screen()));
        host.add_window(
            &group(vec![Tab::new("p.md")]),
            Rect::new(0.0, 0.0, 600.0, 400.0),
            true,
        );
        let snapshot = capturer(&host).capture_all_windows().await;
        assert!(snapshot.popouts[0].is_proxy());
        assert_eq!(snapshot.popouts[0].root.tab_count(), 1);
    }

    #[tokio::test]
    async fn geometry_is_virtualized() {
        let host = Arc::new(InMemoryHost::new(Rect::new(0.0, 0.0, 3456.0, 2234.0)));
        let window = host.add_window(
            &group(vec![Tab::new("p.md")]),
            Rect::new(200.0, 100.0, 1000.0, 800.0),
            false,
        );
        let state = capturer(&host).capture_window(window).await;
        assert_eq!(state.geometry(), Some(Rect::new(100.0, 50.0, 500.0, 400.0)));
    }

    #[tokio::test]
    async fn sidebar_lookup_falls_back_in_order() {
        let host = Arc::new(InMemoryHost::new(screen()));
        host.configure_sidebar(
            SidebarSide::Left,
            false,
            &["files", "search"],
            Some(1),
            SidebarExposure::TabScan,
        );
        host.configure_sidebar(
            SidebarSide::Right,
            true,
            &["outline", "backlinks"],
            Some(0),
            SidebarExposure::LegacyLeaf,
        );
        let capturer = capturer(&host);
        assert_eq!(
            capturer.capture_sidebar(SidebarSide::Left).await,
            Some(SidebarState {
                collapsed: false,
                active_tab: Some("search".into())
            })
        );
        assert_eq!(
            capturer.capture_sidebar(SidebarSide::Right).await,
            Some(SidebarState {
                collapsed: true,
                active_tab: Some("outline".into())
            })
        );
    }

    #[tokio::test]
    async fn sidebar_failure_is_silent() {
        let host = Arc::new(InMemoryHost::new(screen()));
        host.fail_operation("sidebar");
        let snapshot = capturer(&host).capture_all_windows().await;
        assert!(snapshot.left_sidebar.is_none());
        assert!(snapshot.right_sidebar.is_none());
    }

    #[tokio::test]
    async fn records_source_screen() {
        let host = Arc::new(InMemoryHost::new(Rect::new(0.0, 0.0, 2560.0, 1600.0)));
        let snapshot = capturer(&host).capture_all_windows().await;
        let screen = snapshot.source_screen.unwrap();
        assert!((screen.aspect_ratio - 1.6).abs() < 1e-9);
    }
}
