//! Adapter interface to the live editor layout.
//!
//! The capture and restore engines never touch editor internals. Everything
//! they need goes through [`LayoutHost`]: inspecting containers and panes,
//! creating and splitting panes, opening windows and documents, and a couple
//! of timing hooks for hosts that can signal when a layout pass is done.
//!
//! # Split contract
//!
//! [`LayoutHost::split_from`] must behave as follows. Let `a` be the
//! outermost ancestor (or the tab group itself) of the pane's tab group whose
//! first leaf is that pane. If `a` is a split running in the requested
//! direction the new tab group is appended as its last child; otherwise `a`
//! is replaced by a new split `[a, new]` in that direction.
//!
//! Restoring a split therefore creates every sibling by splitting from the
//! first leaf of the already-built first child: the whole first subtree is
//! wrapped as one unit and siblings land in forward order.

pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HostError;
use crate::geometry::Rect;
use crate::snapshot::{CanvasViewport, SidebarState, SplitDirection};

/// Result alias for host operations.
pub type HostResult<T> = std::result::Result<T, HostError>;

macro_rules! host_id {
    ($name:ident, $prefix:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

host_id!(PaneId, "pane#");
host_id!(ContainerId, "container#");
host_id!(WindowId, "window#");

// =============================================================================
// Views
// =============================================================================

/// One child of a split together with its size weight, when the host
/// exposes one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitChild {
    pub container: ContainerId,
    pub size: Option<f64>,
}

/// What a container is.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerView {
    Split {
        direction: SplitDirection,
        children: Vec<SplitChild>,
    },
    TabGroup {
        panes: Vec<PaneId>,
        active_index: Option<usize>,
    },
    /// Anything the engine cannot classify.
    Unknown,
}

/// Inspectable state of one pane.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaneView {
    /// Path of the open document, if any.
    pub document: Option<String>,
    /// Host view type identifier (e.g. "markdown", "canvas").
    pub view_type: String,
    pub scroll: Option<f64>,
    pub properties_collapsed: Option<bool>,
    pub canvas_viewport: Option<CanvasViewport>,
}

/// Per-view state applied once the layout has settled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub scroll: Option<f64>,
    pub properties_collapsed: Option<bool>,
    pub canvas_viewport: Option<CanvasViewport>,
}

impl ViewState {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scroll.is_none() && self.properties_collapsed.is_none() && self.canvas_viewport.is_none()
    }
}

/// Left or right sidebar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SidebarSide {
    Left,
    Right,
}

/// A panel inside a sidebar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidebarTab {
    pub name: String,
    pub active: bool,
}

/// Options for a new secondary window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowOptions {
    pub bounds: Option<Rect>,
    pub proxy: bool,
}

// =============================================================================
// Adapter trait
// =============================================================================

/// Narrow interface to the live layout.
#[async_trait]
pub trait LayoutHost: Send + Sync {
    // --- inspection ---

    async fn main_window(&self) -> HostResult<WindowId>;

    /// Registry of floating windows. May contain duplicates and may include
    /// the main window.
    async fn floating_windows(&self) -> HostResult<Vec<WindowId>>;

    async fn focused_window(&self) -> HostResult<Option<WindowId>>;

    async fn root_container(&self, window: WindowId) -> HostResult<ContainerId>;

    async fn container(&self, id: ContainerId) -> HostResult<ContainerView>;

    async fn parent_container(&self, id: ContainerId) -> HostResult<Option<ContainerId>>;

    async fn pane(&self, id: PaneId) -> HostResult<PaneView>;

    /// Tab group holding the pane.
    async fn pane_container(&self, pane: PaneId) -> HostResult<ContainerId>;

    async fn window_bounds(&self, window: WindowId) -> HostResult<Rect>;

    /// Available area of the current screen.
    async fn screen(&self) -> HostResult<Rect>;

    /// Every pane in every window, in layout order per window.
    async fn iterate_all_panes(&self) -> HostResult<Vec<(WindowId, PaneId)>>;

    // --- mutation ---

    /// New empty pane inserted into a tab group at `index`.
    async fn create_pane_in(&self, container: ContainerId, index: usize) -> HostResult<PaneId>;

    /// New empty pane next to `pane`. See the module docs for the contract.
    async fn split_from(&self, pane: PaneId, direction: SplitDirection) -> HostResult<PaneId>;

    async fn open_document(&self, pane: PaneId, path: &str) -> HostResult<()>;

    /// Remove a pane; emptied groups and single-child splits collapse.
    async fn detach_pane(&self, pane: PaneId) -> HostResult<()>;

    /// Open a secondary window holding one empty seed pane.
    async fn open_window(&self, options: WindowOptions) -> HostResult<(WindowId, PaneId)>;

    async fn close_window(&self, window: WindowId) -> HostResult<()>;

    async fn set_window_bounds(&self, window: WindowId, bounds: Rect) -> HostResult<()>;

    /// Apply size weights (summing to 100) to a split's children.
    async fn set_container_sizes(&self, container: ContainerId, sizes: &[f64]) -> HostResult<()>;

    /// Make the pane the visible tab of its group.
    async fn activate_tab(&self, pane: PaneId) -> HostResult<()>;

    async fn focus_window(&self, window: WindowId) -> HostResult<()>;

    async fn set_active_pane(&self, pane: PaneId) -> HostResult<()>;

    async fn apply_view_state(&self, pane: PaneId, state: &ViewState) -> HostResult<()>;

    // --- sidebars ---

    async fn sidebar_collapsed(&self, side: SidebarSide) -> HostResult<bool>;

    /// Active panel via the group's own active-tab pointer.
    async fn sidebar_active_tab(&self, side: SidebarSide) -> HostResult<Option<String>>;

    /// All panels with their active flags.
    async fn sidebar_tabs(&self, side: SidebarSide) -> HostResult<Vec<SidebarTab>>;

    /// Older hosts expose only a single-leaf pointer.
    async fn sidebar_legacy_leaf(&self, side: SidebarSide) -> HostResult<Option<String>>;

    async fn set_sidebar(&self, side: SidebarSide, state: &SidebarState) -> HostResult<()>;

    // --- user feedback and timing ---

    /// Show a short message to the user.
    fn notify(&self, message: &str);

    /// Resolves after the host has rendered the next frame.
    async fn next_frame(&self) {}

    /// Wait for pending layout work. Returns `false` when the host has no
    /// completion signal, in which case callers sleep a settle delay.
    async fn wait_for_layout(&self) -> bool {
        false
    }
}

/// Shared handle to a layout host.
pub type HostHandle = Arc<dyn LayoutHost>;
