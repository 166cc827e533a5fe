//! Arrangement snapshot data model.
//!
//! A [`Snapshot`] is a portable description of every editor window: the split
//! tree of each window, the tabs inside each tab group, sidebar state and
//! window geometry expressed in the virtual reference frame.
//!
//! # Data flow
//!
//! ```text
//! JSON / wire ─→ VersionedSnapshot { V1 | V2 } ─→ into_current() ─→ Snapshot (v2)
//! ```
//!
//! Version 1 snapshots only knew about a flat tab list per window. They are
//! upgraded in exactly one place, [`SnapshotV1::upgrade`]; nothing else in the
//! crate looks at v1 data.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CodecError;
use crate::geometry::{RawGeometry, Rect};

/// Current schema version written by this crate.
pub const SNAPSHOT_VERSION: u32 = 2;

/// `focusedWindow` value meaning "the main window".
pub const MAIN_WINDOW_INDEX: i32 = -1;

// =============================================================================
// Core types
// =============================================================================

/// Axis along which a split lays out its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitDirection {
    /// Children side by side, left to right.
    Horizontal,
    /// Children stacked, top to bottom.
    Vertical,
}

impl SplitDirection {
    #[must_use]
    pub const fn as_short(self) -> &'static str {
        match self {
            Self::Horizontal => "h",
            Self::Vertical => "v",
        }
    }

    #[must_use]
    pub fn from_short(s: &str) -> Option<Self> {
        match s {
            "h" => Some(Self::Horizontal),
            "v" => Some(Self::Vertical),
            _ => None,
        }
    }
}

/// Pan/zoom state of a canvas document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasViewport {
    pub tx: f64,
    pub ty: f64,
    pub zoom: f64,
}

/// One open document inside a tab group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub path: String,
    #[serde(default)]
    pub active: bool,
    /// Identifier owned by the document's own metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_position: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties_collapsed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canvas_viewport: Option<CanvasViewport>,
}

impl Tab {
    /// An inactive tab with only a path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            active: false,
            stable_id: None,
            display_name: None,
            scroll_position: None,
            properties_collapsed: None,
            canvas_viewport: None,
        }
    }

    #[must_use]
    pub fn activated(mut self) -> Self {
        self.active = true;
        self
    }

    #[must_use]
    pub fn with_stable_id(mut self, id: impl Into<String>) -> Self {
        self.stable_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// True when any per-view state would need restoring after layout settles.
    #[must_use]
    pub fn has_view_state(&self) -> bool {
        self.scroll_position.is_some()
            || self.properties_collapsed.is_some()
            || self.canvas_viewport.is_some()
    }
}

/// File name without directory or extension, used as a display name.
#[must_use]
pub fn display_name_for(path: &str) -> Option<String> {
    std::path::Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}

/// Recursive layout tree of one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LayoutNode {
    Split {
        direction: SplitDirection,
        children: Vec<LayoutNode>,
        /// Relative weights, one per child. Normalized to 100 when applied.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sizes: Option<Vec<f64>>,
    },
    TabGroup {
        tabs: Vec<Tab>,
    },
}

impl LayoutNode {
    /// A tab group with no tabs.
    #[must_use]
    pub const fn empty() -> Self {
        Self::TabGroup { tabs: Vec::new() }
    }

    #[must_use]
    pub fn tab_group(tabs: Vec<Tab>) -> Self {
        Self::TabGroup { tabs }
    }

    #[must_use]
    pub fn split(direction: SplitDirection, children: Vec<LayoutNode>) -> Self {
        Self::Split {
            direction,
            children,
            sizes: None,
        }
    }

    #[must_use]
    pub fn split_sized(
        direction: SplitDirection,
        children: Vec<LayoutNode>,
        sizes: Vec<f64>,
    ) -> Self {
        Self::Split {
            direction,
            children,
            sizes: Some(sizes),
        }
    }

    /// True when the subtree holds no tabs at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::TabGroup { tabs } => tabs.is_empty(),
            Self::Split { children, .. } => children.iter().all(Self::is_empty),
        }
    }

    /// All tabs in depth-first, left-to-right order.
    #[must_use]
    pub fn tabs(&self) -> Vec<&Tab> {
        let mut out = Vec::new();
        self.collect_tabs(&mut out);
        out
    }

    fn collect_tabs<'a>(&'a self, out: &mut Vec<&'a Tab>) {
        match self {
            Self::TabGroup { tabs } => out.extend(tabs.iter()),
            Self::Split { children, .. } => {
                for child in children {
                    child.collect_tabs(out);
                }
            }
        }
    }

    #[must_use]
    pub fn tab_count(&self) -> usize {
        match self {
            Self::TabGroup { tabs } => tabs.len(),
            Self::Split { children, .. } => children.iter().map(Self::tab_count).sum(),
        }
    }

    /// Number of tab groups in the subtree.
    #[must_use]
    pub fn group_count(&self) -> usize {
        match self {
            Self::TabGroup { .. } => 1,
            Self::Split { children, .. } => children.iter().map(Self::group_count).sum(),
        }
    }

    /// Tree depth; a lone tab group has depth 1.
    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            Self::TabGroup { .. } => 1,
            Self::Split { children, .. } => {
                1 + children.iter().map(Self::depth).max().unwrap_or(0)
            }
        }
    }

    /// Enforce the split invariants bottom-up.
    ///
    /// Empty children are dropped, a split left with one child collapses to
    /// that child and a split left with none becomes an empty tab group.
    /// `sizes` follow their children; a sizes list whose length does not
    /// match the original child count is discarded.
    #[must_use]
    pub fn normalize(self) -> Self {
        match self {
            Self::TabGroup { .. } => self,
            Self::Split {
                direction,
                children,
                sizes,
            } => {
                let sizes = sizes.filter(|s| s.len() == children.len());
                let mut kept = Vec::with_capacity(children.len());
                let mut kept_sizes = Vec::with_capacity(children.len());
                for (idx, child) in children.into_iter().enumerate() {
                    let child = child.normalize();
                    if child.is_empty() {
                        continue;
                    }
                    if let Some(sizes) = &sizes {
                        kept_sizes.push(sizes[idx]);
                    }
                    kept.push(child);
                }
                match kept.len() {
                    0 => Self::empty(),
                    1 => kept.pop().unwrap_or_else(Self::empty),
                    _ => Self::Split {
                        direction,
                        children: kept,
                        sizes: sizes.map(|_| kept_sizes),
                    },
                }
            }
        }
    }
}

/// Scale `sizes` so they sum to 100. Non-finite or negative weights count as
/// zero; an all-zero list becomes an equal share.
#[must_use]
pub fn normalize_sizes(sizes: &[f64]) -> Vec<f64> {
    if sizes.is_empty() {
        return Vec::new();
    }
    let cleaned: Vec<f64> = sizes
        .iter()
        .map(|s| if s.is_finite() && *s > 0.0 { *s } else { 0.0 })
        .collect();
    let total: f64 = cleaned.iter().sum();
    if total <= 0.0 {
        let share = 100.0 / sizes.len() as f64;
        return vec![share; sizes.len()];
    }
    cleaned.iter().map(|s| s / total * 100.0).collect()
}

/// Sidebar collapsed flag and visible panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidebarState {
    pub collapsed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_tab: Option<String>,
}

/// Screen the snapshot was captured on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenInfo {
    pub width: f64,
    pub height: f64,
    pub aspect_ratio: f64,
}

impl ScreenInfo {
    #[must_use]
    pub fn from_rect(rect: &Rect) -> Self {
        let aspect_ratio = if rect.height > 0.0 {
            rect.width / rect.height
        } else {
            0.0
        };
        Self {
            width: rect.width,
            height: rect.height,
            aspect_ratio,
        }
    }
}

/// One window: its layout tree plus geometry in virtual coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowState {
    pub root: LayoutNode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_proxy: Option<bool>,
}

impl WindowState {
    #[must_use]
    pub fn new(root: LayoutNode) -> Self {
        Self {
            root,
            x: None,
            y: None,
            width: None,
            height: None,
            is_proxy: None,
        }
    }

    #[must_use]
    pub fn with_geometry(mut self, rect: Rect) -> Self {
        self.set_geometry(rect);
        self
    }

    pub fn set_geometry(&mut self, rect: Rect) {
        self.x = Some(rect.x);
        self.y = Some(rect.y);
        self.width = Some(rect.width);
        self.height = Some(rect.height);
    }

    /// Geometry fields as captured, possibly incomplete.
    #[must_use]
    pub fn raw_geometry(&self) -> RawGeometry {
        RawGeometry {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }

    /// Geometry when all four fields are present.
    #[must_use]
    pub fn geometry(&self) -> Option<Rect> {
        Some(Rect::new(self.x?, self.y?, self.width?, self.height?))
    }

    #[must_use]
    pub fn is_proxy(&self) -> bool {
        self.is_proxy.unwrap_or(false)
    }
}

/// Current time in epoch milliseconds.
#[must_use]
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn main_window_index() -> i32 {
    MAIN_WINDOW_INDEX
}

/// Current (v2) snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub v: u32,
    /// Capture time, epoch milliseconds.
    pub ts: u64,
    pub main: WindowState,
    #[serde(default)]
    pub popouts: Vec<WindowState>,
    /// Index into `popouts`, or -1 for the main window.
    #[serde(default = "main_window_index")]
    pub focused_window: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_sidebar: Option<SidebarState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_sidebar: Option<SidebarState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_screen: Option<ScreenInfo>,
}

impl Snapshot {
    /// Snapshot with a main window and nothing else.
    #[must_use]
    pub fn new(main: WindowState, ts: u64) -> Self {
        Self {
            v: SNAPSHOT_VERSION,
            ts,
            main,
            popouts: Vec::new(),
            focused_window: MAIN_WINDOW_INDEX,
            left_sidebar: None,
            right_sidebar: None,
            source_screen: None,
        }
    }

    /// Main window first, then popouts in order.
    pub fn windows(&self) -> impl Iterator<Item = &WindowState> {
        std::iter::once(&self.main).chain(self.popouts.iter())
    }

    #[must_use]
    pub fn tab_count(&self) -> usize {
        self.windows().map(|w| w.root.tab_count()).sum()
    }

    /// Normalize every window tree.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.main.root = self.main.root.normalize();
        self.popouts = self
            .popouts
            .into_iter()
            .map(|mut w| {
                w.root = w.root.normalize();
                w
            })
            .collect();
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse JSON of any supported version into the current schema.
    pub fn from_json(json: &str) -> Result<Self, CodecError> {
        Ok(VersionedSnapshot::from_json(json)?.into_current())
    }
}

// =============================================================================
// Version 1
// =============================================================================

/// Version 1 window: a flat tab list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowStateV1 {
    #[serde(default)]
    pub tabs: Vec<Tab>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_proxy: Option<bool>,
}

/// Version 1 snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotV1 {
    #[serde(default = "v1_version")]
    pub v: u32,
    #[serde(default)]
    pub ts: u64,
    pub main: WindowStateV1,
    #[serde(default)]
    pub popouts: Vec<WindowStateV1>,
    #[serde(default = "main_window_index")]
    pub focused_window: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_sidebar: Option<SidebarState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_sidebar: Option<SidebarState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_screen: Option<ScreenInfo>,
}

fn v1_version() -> u32 {
    1
}

impl WindowStateV1 {
    fn upgrade(self) -> WindowState {
        WindowState {
            root: LayoutNode::TabGroup { tabs: self.tabs },
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            is_proxy: self.is_proxy,
        }
    }
}

impl SnapshotV1 {
    /// The only v1 → v2 conversion. Each window's tab list becomes a single
    /// tab group; every other field carries over unchanged.
    #[must_use]
    pub fn upgrade(self) -> Snapshot {
        Snapshot {
            v: SNAPSHOT_VERSION,
            ts: self.ts,
            main: self.main.upgrade(),
            popouts: self.popouts.into_iter().map(WindowStateV1::upgrade).collect(),
            focused_window: self.focused_window,
            left_sidebar: self.left_sidebar,
            right_sidebar: self.right_sidebar,
            source_screen: self.source_screen,
        }
    }
}

// =============================================================================
// Versioned envelope
// =============================================================================

/// A snapshot of any supported schema version.
#[derive(Debug, Clone, PartialEq)]
pub enum VersionedSnapshot {
    V1(SnapshotV1),
    V2(Snapshot),
}

impl VersionedSnapshot {
    /// Dispatch on the `v` field. A missing `v` predates versioning and is
    /// read as version 1.
    pub fn from_value(value: serde_json::Value) -> Result<Self, CodecError> {
        if !value.is_object() {
            return Err(CodecError::Malformed(
                "snapshot must be a JSON object".to_string(),
            ));
        }
        let version = match value.get("v") {
            None | Some(serde_json::Value::Null) => 1,
            Some(v) => v
                .as_u64()
                .ok_or_else(|| CodecError::Malformed(format!("invalid version field: {v}")))?,
        };
        match version {
            1 => Ok(Self::V1(serde_json::from_value(value)?)),
            2 => Ok(Self::V2(serde_json::from_value(value)?)),
            other => Err(CodecError::UnsupportedVersion(other)),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, CodecError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        match self {
            Self::V1(_) => 1,
            Self::V2(_) => SNAPSHOT_VERSION,
        }
    }

    /// Convert to the current schema.
    #[must_use]
    pub fn into_current(self) -> Snapshot {
        match self {
            Self::V1(v1) => v1.upgrade(),
            Self::V2(v2) => v2,
        }
    }
}

impl From<Snapshot> for VersionedSnapshot {
    fn from(snapshot: Snapshot) -> Self {
        Self::V2(snapshot)
    }
}

impl From<SnapshotV1> for VersionedSnapshot {
    fn from(snapshot: SnapshotV1) -> Self {
        Self::V1(snapshot)
    }
}

/// Serde adapter accepting any snapshot version, upgraded on the way in.
pub fn deserialize_any_version<'de, D>(deserializer: D) -> Result<Snapshot, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    VersionedSnapshot::from_value(value)
        .map(VersionedSnapshot::into_current)
        .map_err(serde::de::Error::custom)
}

// =============================================================================
// Tests
// =============================================================================
