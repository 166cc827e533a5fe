//! In-memory [`LayoutHost`] and [`DocumentCatalog`].
//!
//! Models windows, split trees, tab groups, sidebars and a document set in an
//! arena behind a mutex. Used by the test suites and by `lk simulate` to
//! dry-run a restore without an editor attached.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{
    ContainerId, ContainerView, HostResult, LayoutHost, PaneId, PaneView, SidebarSide,
    SidebarTab, SplitChild, ViewState, WindowId, WindowOptions,
};
use crate::capture::DEFAULT_PROXY_VIEW_TYPE;
use crate::error::HostError;
use crate::geometry::Rect;
use crate::resolver::DocumentCatalog;
use crate::snapshot::{LayoutNode, SidebarState, SplitDirection};

const EMPTY_VIEW: &str = "empty";

// =============================================================================
// Arena model
// =============================================================================

#[derive(Debug, Clone)]
enum NodeKind {
    Split {
        direction: SplitDirection,
        children: Vec<ContainerId>,
        sizes: Vec<Option<f64>>,
    },
    Group {
        panes: Vec<PaneId>,
        active: usize,
    },
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<ContainerId>,
    window: WindowId,
    kind: NodeKind,
}

#[derive(Debug, Clone)]
struct PaneRecord {
    group: ContainerId,
    document: Option<String>,
    view_type: String,
    view: ViewState,
}

#[derive(Debug, Clone)]
struct WindowRecord {
    root: ContainerId,
    bounds: Rect,
}

#[derive(Debug, Clone)]
struct DocumentRecord {
    stable_id: Option<String>,
}

/// Which lookup paths a simulated sidebar answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebarExposure {
    /// Group keeps an active-tab pointer.
    ActivePointer,
    /// Only the per-panel active flags are visible.
    TabScan,
    /// Only a legacy single-leaf pointer exists.
    LegacyLeaf,
}

#[derive(Debug, Clone)]
struct SidebarRecord {
    collapsed: bool,
    tabs: Vec<String>,
    active: Option<usize>,
    exposure: SidebarExposure,
}

impl Default for SidebarRecord {
    fn default() -> Self {
        Self {
            collapsed: false,
            tabs: Vec::new(),
            active: None,
            exposure: SidebarExposure::ActivePointer,
        }
    }
}

#[derive(Debug)]
struct HostState {
    next_id: u64,
    nodes: BTreeMap<ContainerId, Node>,
    panes: BTreeMap<PaneId, PaneRecord>,
    windows: BTreeMap<WindowId, WindowRecord>,
    main: WindowId,
    registry: Vec<WindowId>,
    focused: Option<WindowId>,
    active_pane: Option<PaneId>,
    screen: Rect,
    documents: BTreeMap<String, DocumentRecord>,
    sidebars: BTreeMap<SidebarSide, SidebarRecord>,
    notifications: Vec<String>,
    failures: BTreeSet<String>,
    layout_signal: bool,
    proxy_view_type: String,
    open_log: Vec<String>,
}

fn view_type_for(path: &str) -> &'static str {
    if path.ends_with(".canvas") {
        "canvas"
    } else {
        "markdown"
    }
}

impl HostState {
    fn alloc(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn node(&self, id: ContainerId) -> HostResult<&Node> {
        self.nodes.get(&id).ok_or(HostError::ContainerNotFound(id))
    }

    fn node_mut(&mut self, id: ContainerId) -> HostResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(HostError::ContainerNotFound(id))
    }

    fn pane_rec(&self, id: PaneId) -> HostResult<&PaneRecord> {
        self.panes.get(&id).ok_or(HostError::PaneNotFound(id))
    }

    fn window(&self, id: WindowId) -> HostResult<&WindowRecord> {
        self.windows.get(&id).ok_or(HostError::WindowNotFound(id))
    }

    fn check(&self, operation: &str) -> HostResult<()> {
        if self.failures.contains(operation) {
            return Err(HostError::rejected(operation, "injected failure"));
        }
        Ok(())
    }

    fn new_pane(&mut self, group: ContainerId, view_type: &str) -> PaneId {
        let id = PaneId(self.alloc());
        self.panes.insert(
            id,
            PaneRecord {
                group,
                document: None,
                view_type: view_type.to_string(),
                view: ViewState::default(),
            },
        );
        id
    }

    /// Group holding one empty pane.
    fn new_group(&mut self, window: WindowId, parent: Option<ContainerId>) -> (ContainerId, PaneId) {
        let group = ContainerId(self.alloc());
        let pane = self.new_pane(group, EMPTY_VIEW);
        self.nodes.insert(
            group,
            Node {
                parent,
                window,
                kind: NodeKind::Group {
                    panes: vec![pane],
                    active: 0,
                },
            },
        );
        (group, pane)
    }

    fn first_leaf(&self, id: ContainerId) -> Option<PaneId> {
        match &self.nodes.get(&id)?.kind {
            NodeKind::Group { panes, .. } => panes.first().copied(),
            NodeKind::Split { children, .. } => self.first_leaf(*children.first()?),
        }
    }

    fn collect_panes(&self, id: ContainerId, out: &mut Vec<PaneId>) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        match &node.kind {
            NodeKind::Group { panes, .. } => out.extend(panes.iter().copied()),
            NodeKind::Split { children, .. } => {
                for child in children {
                    self.collect_panes(*child, out);
                }
            }
        }
    }

    fn collect_nodes(&self, id: ContainerId, out: &mut Vec<ContainerId>) {
        out.push(id);
        if let Some(Node {
            kind: NodeKind::Split { children, .. },
            ..
        }) = self.nodes.get(&id)
        {
            for child in children {
                self.collect_nodes(*child, out);
            }
        }
    }

    /// Put `new` where `old` sits: in its parent's child list or as root.
    fn replace_in_parent(&mut self, old: ContainerId, new: ContainerId) -> HostResult<()> {
        let (parent, window) = {
            let node = self.node(old)?;
            (node.parent, node.window)
        };
        self.node_mut(new)?.parent = parent;
        match parent {
            Some(parent) => {
                if let NodeKind::Split { children, .. } = &mut self.node_mut(parent)?.kind {
                    for child in children.iter_mut() {
                        if *child == old {
                            *child = new;
                        }
                    }
                }
            }
            None => {
                if let Some(win) = self.windows.get_mut(&window) {
                    win.root = new;
                }
            }
        }
        Ok(())
    }

    fn remove_subtree(&mut self, id: ContainerId) {
        let mut ids = Vec::new();
        self.collect_nodes(id, &mut ids);
        for id in ids {
            if let Some(Node {
                kind: NodeKind::Group { panes, .. },
                ..
            }) = self.nodes.remove(&id)
            {
                for pane in panes {
                    self.panes.remove(&pane);
                }
            }
        }
    }

    /// Drop an empty group from its parent split and collapse the split if
    /// only one child remains.
    fn prune_group(&mut self, group: ContainerId) -> HostResult<()> {
        let Some(parent) = self.node(group)?.parent else {
            return Ok(());
        };
        self.nodes.remove(&group);
        let remaining = {
            let NodeKind::Split {
                children, sizes, ..
            } = &mut self.node_mut(parent)?.kind
            else {
                return Ok(());
            };
            if let Some(idx) = children.iter().position(|c| *c == group) {
                children.remove(idx);
                if idx < sizes.len() {
                    sizes.remove(idx);
                }
            }
            children.clone()
        };
        if remaining.len() == 1 {
            self.replace_in_parent(parent, remaining[0])?;
            self.nodes.remove(&parent);
        }
        Ok(())
    }

    fn build(
        &mut self,
        window: WindowId,
        parent: Option<ContainerId>,
        layout: &LayoutNode,
    ) -> ContainerId {
        match layout {
            LayoutNode::TabGroup { tabs } => {
                let (group, seed) = self.new_group(window, parent);
                let mut panes = vec![seed];
                for (idx, tab) in tabs.iter().enumerate() {
                    let pane = if idx == 0 {
                        seed
                    } else {
                        let pane = self.new_pane(group, EMPTY_VIEW);
                        panes.push(pane);
                        pane
                    };
                    if let Some(rec) = self.panes.get_mut(&pane) {
                        rec.document = Some(tab.path.clone());
                        rec.view_type = view_type_for(&tab.path).to_string();
                        rec.view = ViewState {
                            scroll: tab.scroll_position,
                            properties_collapsed: tab.properties_collapsed,
                            canvas_viewport: tab.canvas_viewport,
                        };
                    }
                }
                let active = tabs.iter().position(|t| t.active).unwrap_or(0);
                if let Some(node) = self.nodes.get_mut(&group) {
                    node.kind = NodeKind::Group { panes, active };
                }
                group
            }
            LayoutNode::Split {
                direction,
                children,
                sizes,
            } => {
                let id = ContainerId(self.alloc());
                self.nodes.insert(
                    id,
                    Node {
                        parent,
                        window,
                        kind: NodeKind::Split {
                            direction: *direction,
                            children: Vec::new(),
                            sizes: Vec::new(),
                        },
                    },
                );
                let built: Vec<ContainerId> = children
                    .iter()
                    .map(|child| self.build(window, Some(id), child))
                    .collect();
                let sizes: Vec<Option<f64>> = match sizes {
                    Some(s) if s.len() == built.len() => s.iter().copied().map(Some).collect(),
                    _ => vec![None; built.len()],
                };
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.kind = NodeKind::Split {
                        direction: *direction,
                        children: built,
                        sizes,
                    };
                }
                id
            }
        }
    }

    fn render(&self, id: ContainerId) -> String {
        let Some(node) = self.nodes.get(&id) else {
            return "?".to_string();
        };
        match &node.kind {
            NodeKind::Group { panes, active } => {
                let names: Vec<String> = panes
                    .iter()
                    .enumerate()
                    .map(|(idx, pane)| {
                        let name = self
                            .panes
                            .get(pane)
                            .and_then(|p| p.document.clone())
                            .unwrap_or_else(|| "-".to_string());
                        if idx == *active && panes.len() > 1 {
                            format!("{name}*")
                        } else {
                            name
                        }
                    })
                    .collect();
                format!("[{}]", names.join(", "))
            }
            NodeKind::Split {
                direction,
                children,
                sizes,
            } => {
                let inner: Vec<String> = children.iter().map(|c| self.render(*c)).collect();
                let sized = if sizes.iter().all(Option::is_some) && !sizes.is_empty() {
                    let s: Vec<String> = sizes
                        .iter()
                        .map(|s| format!("{}", s.unwrap_or_default().round()))
                        .collect();
                    format!("{{{}}}", s.join(","))
                } else {
                    String::new()
                };
                format!("{}{sized}({})", direction.as_short(), inner.join(" | "))
            }
        }
    }
}

// =============================================================================
// Host
// =============================================================================

/// Layout host backed by plain data structures.
#[derive(Debug)]
pub struct InMemoryHost {
    state: Mutex<HostState>,
}

impl InMemoryHost {
    /// One main window filling `screen`, holding a single empty pane.
    #[must_use]
    pub fn new(screen: Rect) -> Self {
        let mut state = HostState {
            next_id: 0,
            nodes: BTreeMap::new(),
            panes: BTreeMap::new(),
            windows: BTreeMap::new(),
            main: WindowId(0),
            registry: Vec::new(),
            focused: None,
            active_pane: None,
            screen,
            documents: BTreeMap::new(),
            sidebars: BTreeMap::new(),
            notifications: Vec::new(),
            failures: BTreeSet::new(),
            layout_signal: false,
            proxy_view_type: DEFAULT_PROXY_VIEW_TYPE.to_string(),
            open_log: Vec::new(),
        };
        let main = WindowId(state.alloc());
        let (root, _) = state.new_group(main, None);
        state.windows.insert(
            main,
            WindowRecord {
                root,
                bounds: screen,
            },
        );
        state.main = main;
        state.focused = Some(main);
        state.sidebars.insert(SidebarSide::Left, SidebarRecord::default());
        state.sidebars.insert(SidebarSide::Right, SidebarRecord::default());
        Self {
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- documents ---

    pub fn add_document(&self, path: &str, stable_id: Option<&str>) {
        self.state().documents.insert(
            path.to_string(),
            DocumentRecord {
                stable_id: stable_id.map(str::to_string),
            },
        );
    }

    pub fn remove_document(&self, path: &str) {
        self.state().documents.remove(path);
    }

    /// Move a document, keeping its stable id.
    pub fn rename_document(&self, old: &str, new: &str) {
        let mut state = self.state();
        if let Some(rec) = state.documents.remove(old) {
            state.documents.insert(new.to_string(), rec);
        }
    }

    // --- layout seeding ---

    /// Replace the main window's tree with `layout`.
    pub fn seed_main(&self, layout: &LayoutNode, bounds: Rect) {
        let mut state = self.state();
        let main = state.main;
        if let Some(old_root) = state.windows.get(&main).map(|w| w.root) {
            state.remove_subtree(old_root);
        }
        let root = state.build(main, None, layout);
        state.windows.insert(main, WindowRecord { root, bounds });
    }

    /// Add a floating window built from `layout`.
    pub fn add_window(&self, layout: &LayoutNode, bounds: Rect, proxy: bool) -> WindowId {
        let mut state = self.state();
        let window = WindowId(state.alloc());
        let root = state.build(window, None, layout);
        if proxy {
            let marker = state.proxy_view_type.clone();
            let pane = state.new_pane(root, &marker);
            if let Some(Node {
                kind: NodeKind::Group { panes, .. },
                ..
            }) = state.nodes.get_mut(&root)
            {
                panes.push(pane);
            }
        }
        state.windows.insert(window, WindowRecord { root, bounds });
        state.registry.push(window);
        window
    }

    /// Register a window in the floating registry a second time.
    pub fn register_duplicate(&self, window: WindowId) {
        self.state().registry.push(window);
    }

    pub fn set_focused(&self, window: WindowId) {
        self.state().focused = Some(window);
    }

    pub fn set_screen(&self, screen: Rect) {
        self.state().screen = screen;
    }

    pub fn configure_sidebar(
        &self,
        side: SidebarSide,
        collapsed: bool,
        tabs: &[&str],
        active: Option<usize>,
        exposure: SidebarExposure,
    ) {
        self.state().sidebars.insert(
            side,
            SidebarRecord {
                collapsed,
                tabs: tabs.iter().map(|t| (*t).to_string()).collect(),
                active,
                exposure,
            },
        );
    }

    /// Make the named operation fail from now on.
    pub fn fail_operation(&self, operation: &str) {
        self.state().failures.insert(operation.to_string());
    }

    /// Let `wait_for_layout` report completion.
    pub fn enable_layout_signal(&self) {
        self.state().layout_signal = true;
    }

    // --- inspection helpers ---

    #[must_use]
    pub fn notifications(&self) -> Vec<String> {
        self.state().notifications.clone()
    }

    /// Open windows, main first.
    #[must_use]
    pub fn window_ids(&self) -> Vec<WindowId> {
        let state = self.state();
        let mut ids = vec![state.main];
        ids.extend(state.windows.keys().copied().filter(|w| *w != state.main));
        ids
    }

    #[must_use]
    pub fn main_window_id(&self) -> WindowId {
        self.state().main
    }

    #[must_use]
    pub fn bounds_of(&self, window: WindowId) -> Option<Rect> {
        self.state().windows.get(&window).map(|w| w.bounds)
    }

    #[must_use]
    pub fn focused(&self) -> Option<WindowId> {
        self.state().focused
    }

    #[must_use]
    pub fn active_pane(&self) -> Option<PaneId> {
        self.state().active_pane
    }

    /// Document shown in a pane.
    #[must_use]
    pub fn document_of(&self, pane: PaneId) -> Option<String> {
        self.state().panes.get(&pane).and_then(|p| p.document.clone())
    }

    /// View state of the first pane showing `path`.
    #[must_use]
    pub fn view_state_of(&self, path: &str) -> Option<ViewState> {
        self.state()
            .panes
            .values()
            .find(|p| p.document.as_deref() == Some(path))
            .map(|p| p.view.clone())
    }

    /// Documents passed to `open_document`, in call order.
    #[must_use]
    pub fn open_order(&self) -> Vec<String> {
        self.state().open_log.clone()
    }

    /// Compact textual form of a window's tree, e.g. `h{60,40}([a*, b] | [c])`.
    #[must_use]
    pub fn render_window(&self, window: WindowId) -> String {
        let state = self.state();
        match state.windows.get(&window) {
            Some(w) => state.render(w.root),
            None => String::new(),
        }
    }

    #[must_use]
    pub fn sidebar(&self, side: SidebarSide) -> SidebarState {
        let state = self.state();
        let rec = state.sidebars.get(&side).cloned().unwrap_or_default();
        SidebarState {
            collapsed: rec.collapsed,
            active_tab: rec.active.and_then(|i| rec.tabs.get(i).cloned()),
        }
    }
}

impl DocumentCatalog for InMemoryHost {
    fn contains(&self, path: &str) -> bool {
        self.state().documents.contains_key(path)
    }

    fn documents(&self) -> Vec<String> {
        self.state().documents.keys().cloned().collect()
    }

    fn stable_id(&self, path: &str) -> Option<String> {
        self.state()
            .documents
            .get(path)
            .and_then(|d| d.stable_id.clone())
    }
}

#[async_trait]
impl LayoutHost for InMemoryHost {
    async fn main_window(&self) -> HostResult<WindowId> {
        Ok(self.state().main)
    }

    async fn floating_windows(&self) -> HostResult<Vec<WindowId>> {
        Ok(self.state().registry.clone())
    }

    async fn focused_window(&self) -> HostResult<Option<WindowId>> {
        Ok(self.state().focused)
    }

    async fn root_container(&self, window: WindowId) -> HostResult<ContainerId> {
        Ok(self.state().window(window)?.root)
    }

    async fn container(&self, id: ContainerId) -> HostResult<ContainerView> {
        let state = self.state();
        Ok(match &state.node(id)?.kind {
            NodeKind::Split {
                direction,
                children,
                sizes,
            } => ContainerView::Split {
                direction: *direction,
                children: children
                    .iter()
                    .enumerate()
                    .map(|(idx, c)| SplitChild {
                        container: *c,
                        size: sizes.get(idx).copied().flatten(),
                    })
                    .collect(),
            },
            NodeKind::Group { panes, active } => ContainerView::TabGroup {
                panes: panes.clone(),
                active_index: (!panes.is_empty()).then_some(*active),
            },
        })
    }

    async fn parent_container(&self, id: ContainerId) -> HostResult<Option<ContainerId>> {
        Ok(self.state().node(id)?.parent)
    }

    async fn pane(&self, id: PaneId) -> HostResult<PaneView> {
        let state = self.state();
        let rec = state.pane_rec(id)?;
        Ok(PaneView {
            document: rec.document.clone(),
            view_type: rec.view_type.clone(),
            scroll: rec.view.scroll,
            properties_collapsed: rec.view.properties_collapsed,
            canvas_viewport: rec.view.canvas_viewport,
        })
    }

    async fn pane_container(&self, pane: PaneId) -> HostResult<ContainerId> {
        Ok(self.state().pane_rec(pane)?.group)
    }

    async fn window_bounds(&self, window: WindowId) -> HostResult<Rect> {
        Ok(self.state().window(window)?.bounds)
    }

    async fn screen(&self) -> HostResult<Rect> {
        Ok(self.state().screen)
    }

    async fn iterate_all_panes(&self) -> HostResult<Vec<(WindowId, PaneId)>> {
        let state = self.state();
        let mut order = vec![state.main];
        order.extend(state.windows.keys().copied().filter(|w| *w != state.main));
        let mut out = Vec::new();
        for window in order {
            let Some(rec) = state.windows.get(&window) else {
                continue;
            };
            let mut panes = Vec::new();
            state.collect_panes(rec.root, &mut panes);
            out.extend(panes.into_iter().map(|p| (window, p)));
        }
        Ok(out)
    }

    async fn create_pane_in(&self, container: ContainerId, index: usize) -> HostResult<PaneId> {
        let mut state = self.state();
        state.check("create_pane_in")?;
        if !matches!(state.node(container)?.kind, NodeKind::Group { .. }) {
            return Err(HostError::rejected("create_pane_in", "container is not a tab group"));
        }
        let pane = state.new_pane(container, EMPTY_VIEW);
        if let NodeKind::Group { panes, active } = &mut state.node_mut(container)?.kind {
            let index = index.min(panes.len());
            panes.insert(index, pane);
            if index <= *active && panes.len() > 1 {
                *active += 1;
            }
        }
        Ok(pane)
    }

    async fn split_from(&self, pane: PaneId, direction: SplitDirection) -> HostResult<PaneId> {
        let mut state = self.state();
        state.check("split_from")?;
        let group = state.pane_rec(pane)?.group;
        let window = state.node(group)?.window;

        let mut anchor = group;
        while let Some(parent) = state.node(anchor)?.parent {
            if state.first_leaf(parent) == Some(pane) {
                anchor = parent;
            } else {
                break;
            }
        }

        let appends = matches!(
            state.node(anchor)?.kind,
            NodeKind::Split { direction: d, .. } if d == direction
        );
        if appends {
            let (new_group, new_pane) = state.new_group(window, Some(anchor));
            if let NodeKind::Split {
                children, sizes, ..
            } = &mut state.node_mut(anchor)?.kind
            {
                children.push(new_group);
                sizes.push(None);
            }
            return Ok(new_pane);
        }

        let split = ContainerId(state.alloc());
        let (new_group, new_pane) = state.new_group(window, Some(split));
        state.nodes.insert(
            split,
            Node {
                parent: None,
                window,
                kind: NodeKind::Split {
                    direction,
                    children: vec![anchor, new_group],
                    sizes: vec![None, None],
                },
            },
        );
        state.replace_in_parent(anchor, split)?;
        state.node_mut(anchor)?.parent = Some(split);
        Ok(new_pane)
    }

    async fn open_document(&self, pane: PaneId, path: &str) -> HostResult<()> {
        let mut state = self.state();
        state.check("open_document")?;
        if !state.documents.contains_key(path) {
            return Err(HostError::DocumentNotFound(path.to_string()));
        }
        let rec = state.panes.get_mut(&pane).ok_or(HostError::PaneNotFound(pane))?;
        rec.document = Some(path.to_string());
        rec.view_type = view_type_for(path).to_string();
        rec.view = ViewState::default();
        let group = rec.group;
        // Opening a document makes its tab the active one.
        if let NodeKind::Group { panes, active } = &mut state.node_mut(group)?.kind {
            if let Some(idx) = panes.iter().position(|p| *p == pane) {
                *active = idx;
            }
        }
        state.open_log.push(path.to_string());
        Ok(())
    }

    async fn detach_pane(&self, pane: PaneId) -> HostResult<()> {
        let mut state = self.state();
        state.check("detach_pane")?;
        let group = state.pane_rec(pane)?.group;
        state.panes.remove(&pane);
        let now_empty = match &mut state.node_mut(group)?.kind {
            NodeKind::Group { panes, active } => {
                if let Some(idx) = panes.iter().position(|p| *p == pane) {
                    panes.remove(idx);
                    if idx < *active || *active >= panes.len() {
                        *active = active.saturating_sub(1);
                    }
                }
                panes.is_empty()
            }
            NodeKind::Split { .. } => false,
        };
        if state.active_pane == Some(pane) {
            state.active_pane = None;
        }
        if now_empty {
            state.prune_group(group)?;
        }
        Ok(())
    }

    async fn open_window(&self, options: WindowOptions) -> HostResult<(WindowId, PaneId)> {
        let mut state = self.state();
        state.check("open_window")?;
        let window = WindowId(state.alloc());
        let (root, seed) = state.new_group(window, None);
        if options.proxy {
            let marker = state.proxy_view_type.clone();
            let pane = state.new_pane(root, &marker);
            if let NodeKind::Group { panes, .. } = &mut state.node_mut(root)?.kind {
                panes.push(pane);
            }
        }
        let screen = state.screen;
        let bounds = options.bounds.unwrap_or(screen);
        state.windows.insert(window, WindowRecord { root, bounds });
        state.registry.push(window);
        Ok((window, seed))
    }

    async fn close_window(&self, window: WindowId) -> HostResult<()> {
        let mut state = self.state();
        state.check("close_window")?;
        if window == state.main {
            return Err(HostError::rejected("close_window", "cannot close the main window"));
        }
        let root = state.window(window)?.root;
        state.remove_subtree(root);
        state.windows.remove(&window);
        state.registry.retain(|w| *w != window);
        if state.focused == Some(window) {
            state.focused = Some(state.main);
        }
        Ok(())
    }

    async fn set_window_bounds(&self, window: WindowId, bounds: Rect) -> HostResult<()> {
        let mut state = self.state();
        state.check("set_window_bounds")?;
        let rec = state
            .windows
            .get_mut(&window)
            .ok_or(HostError::WindowNotFound(window))?;
        rec.bounds = bounds;
        Ok(())
    }

    async fn set_container_sizes(&self, container: ContainerId, new_sizes: &[f64]) -> HostResult<()> {
        let mut state = self.state();
        state.check("set_container_sizes")?;
        match &mut state.node_mut(container)?.kind {
            NodeKind::Split {
                children, sizes, ..
            } if children.len() == new_sizes.len() => {
                *sizes = new_sizes.iter().copied().map(Some).collect();
                Ok(())
            }
            _ => Err(HostError::rejected(
                "set_container_sizes",
                "size count does not match split children",
            )),
        }
    }

    async fn activate_tab(&self, pane: PaneId) -> HostResult<()> {
        let mut state = self.state();
        state.check("activate_tab")?;
        let group = state.pane_rec(pane)?.group;
        if let NodeKind::Group { panes, active } = &mut state.node_mut(group)?.kind {
            if let Some(idx) = panes.iter().position(|p| *p == pane) {
                *active = idx;
            }
        }
        Ok(())
    }

    async fn focus_window(&self, window: WindowId) -> HostResult<()> {
        let mut state = self.state();
        state.check("focus_window")?;
        state.window(window)?;
        state.focused = Some(window);
        Ok(())
    }

    async fn set_active_pane(&self, pane: PaneId) -> HostResult<()> {
        let mut state = self.state();
        state.check("set_active_pane")?;
        let group = state.pane_rec(pane)?.group;
        let window = state.node(group)?.window;
        state.active_pane = Some(pane);
        state.focused = Some(window);
        Ok(())
    }

    async fn apply_view_state(&self, pane: PaneId, view: &ViewState) -> HostResult<()> {
        let mut state = self.state();
        state.check("apply_view_state")?;
        let rec = state.panes.get_mut(&pane).ok_or(HostError::PaneNotFound(pane))?;
        if view.scroll.is_some() {
            rec.view.scroll = view.scroll;
        }
        if view.properties_collapsed.is_some() {
            rec.view.properties_collapsed = view.properties_collapsed;
        }
        if view.canvas_viewport.is_some() {
            rec.view.canvas_viewport = view.canvas_viewport;
        }
        Ok(())
    }

    async fn sidebar_collapsed(&self, side: SidebarSide) -> HostResult<bool> {
        let state = self.state();
        state.check("sidebar")?;
        Ok(state.sidebars.get(&side).is_some_and(|s| s.collapsed))
    }

    async fn sidebar_active_tab(&self, side: SidebarSide) -> HostResult<Option<String>> {
        let state = self.state();
        state.check("sidebar")?;
        let Some(rec) = state.sidebars.get(&side) else {
            return Ok(None);
        };
        if rec.exposure != SidebarExposure::ActivePointer {
            return Err(HostError::rejected("sidebar_active_tab", "no active-tab pointer"));
        }
        Ok(rec.active.and_then(|i| rec.tabs.get(i).cloned()))
    }

    async fn sidebar_tabs(&self, side: SidebarSide) -> HostResult<Vec<SidebarTab>> {
        let state = self.state();
        state.check("sidebar")?;
        let Some(rec) = state.sidebars.get(&side) else {
            return Ok(Vec::new());
        };
        if rec.exposure == SidebarExposure::LegacyLeaf {
            return Ok(Vec::new());
        }
        Ok(rec
            .tabs
            .iter()
            .enumerate()
            .map(|(idx, name)| SidebarTab {
                name: name.clone(),
                active: rec.active == Some(idx),
            })
            .collect())
    }

    async fn sidebar_legacy_leaf(&self, side: SidebarSide) -> HostResult<Option<String>> {
        let state = self.state();
        state.check("sidebar")?;
        let Some(rec) = state.sidebars.get(&side) else {
            return Ok(None);
        };
        Ok(rec.active.and_then(|i| rec.tabs.get(i).cloned()))
    }

    async fn set_sidebar(&self, side: SidebarSide, sidebar: &SidebarState) -> HostResult<()> {
        let mut state = self.state();
        state.check("sidebar")?;
        let rec = state.sidebars.entry(side).or_default();
        rec.collapsed = sidebar.collapsed;
        if let Some(name) = &sidebar.active_tab {
            match rec.tabs.iter().position(|t| t == name) {
                Some(idx) => rec.active = Some(idx),
                None => {
                    rec.tabs.push(name.clone());
                    rec.active = Some(rec.tabs.len() - 1);
                }
            }
        }
        Ok(())
    }

    fn notify(&self, message: &str) {
        self.state().notifications.push(message.to_string());
    }

    async fn wait_for_layout(&self) -> bool {
        self.state().layout_signal
    }
}
