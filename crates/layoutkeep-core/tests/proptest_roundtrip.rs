//! Property-based tests for capture/restore round trips.
//!
//! Validates:
//! 1. restore(T) then capture reproduces T's structure and active tabs
//! 2. The same holds per window when popouts share documents with the main
//!    window or with each other; a popout whose first document was already
//!    taken by an earlier popout is dropped
//! 3. The compact wire form preserves the same structure
//!
//! Generated trees have depth ≤ 4 and at most 10 tabs per group. Split
//! directions alternate by depth: a split whose first child runs in the same
//! direction is indistinguishable from a flat split once rebuilt.

use std::sync::Arc;

use proptest::prelude::*;

use layoutkeep_core::capture::{CaptureConfig, LayoutSnapshotCapturer};
use layoutkeep_core::geometry::{GeometryConfig, Rect};
use layoutkeep_core::host::memory::InMemoryHost;
use layoutkeep_core::restore::{LayoutSnapshotRestorer, RestoreConfig, RestoreOptions};
use layoutkeep_core::snapshot::{LayoutNode, Snapshot, SplitDirection, Tab, WindowState};
use layoutkeep_core::wire;

// =============================================================================
// Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum Shape {
    Group { tabs: usize, active: usize },
    Split(Vec<Shape>),
}

fn arb_shape() -> impl Strategy<Value = Shape> {
    let leaf = (1usize..=10)
        .prop_flat_map(|n| (Just(n), 0..n))
        .prop_map(|(tabs, active)| Shape::Group { tabs, active });
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop::collection::vec(inner, 2..=4).prop_map(Shape::Split)
    })
}

fn build(shape: &Shape, depth: usize, next: &mut usize) -> LayoutNode {
    match shape {
        Shape::Group { tabs, active } => LayoutNode::tab_group(
            (0..*tabs)
                .map(|i| {
                    *next += 1;
                    let tab = Tab::new(format!("notes/doc{}.md", *next));
                    if i == *active { tab.activated() } else { tab }
                })
                .collect(),
        ),
        Shape::Split(children) => {
            let direction = if depth % 2 == 0 {
                SplitDirection::Horizontal
            } else {
                SplitDirection::Vertical
            };
            LayoutNode::split(
                direction,
                children.iter().map(|c| build(c, depth + 1, next)).collect(),
            )
        }
    }
}

/// Documents a popout's first tab may share with other windows. The first
/// entry is always the main window's first tab.
const SHARED_PATHS: [&str; 3] = ["notes/doc1.md", "shared/p0.md", "shared/p1.md"];

fn arb_popouts() -> impl Strategy<Value = Vec<(Shape, Option<usize>)>> {
    prop::collection::vec(
        (arb_shape(), prop::option::of(0..SHARED_PATHS.len())),
        0..4,
    )
}

fn first_tab_mut(node: &mut LayoutNode) -> Option<&mut Tab> {
    match node {
        LayoutNode::TabGroup { tabs } => tabs.first_mut(),
        LayoutNode::Split { children, .. } => children.iter_mut().find_map(first_tab_mut),
    }
}

/// Structure and active flags, ignoring sizes and tab metadata.
fn outline(node: &LayoutNode) -> String {
    match node {
        LayoutNode::TabGroup { tabs } => {
            let names: Vec<String> = tabs
                .iter()
                .map(|t| format!("{}{}", t.path, if t.active { "*" } else { "" }))
                .collect();
            format!("[{}]", names.join(","))
        }
        LayoutNode::Split {
            direction,
            children,
            ..
        } => {
            let inner: Vec<String> = children.iter().map(outline).collect();
            format!("{}({})", direction.as_short(), inner.join("|"))
        }
    }
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

async fn restore_then_capture(snapshot: Snapshot) -> Snapshot {
    let screen = Rect::new(0.0, 0.0, 1728.0, 1117.0);
    let host = Arc::new(InMemoryHost::new(screen));
    for window in std::iter::once(&snapshot.main).chain(&snapshot.popouts) {
        for tab in window.root.tabs() {
            host.add_document(&tab.path, None);
        }
    }
    let restorer = LayoutSnapshotRestorer::new(
        host.clone(),
        host.clone(),
        GeometryConfig::default(),
        RestoreConfig::default(),
    );
    restorer
        .restore(snapshot, RestoreOptions::default())
        .await
        .unwrap();
    LayoutSnapshotCapturer::new(
        host.clone(),
        host,
        GeometryConfig::default(),
        CaptureConfig::default(),
    )
    .capture_all_windows()
    .await
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    #[test]
    fn restore_then_capture_preserves_structure(shape in arb_shape()) {
        let mut next = 0;
        let root = build(&shape, 0, &mut next);
        let expected = outline(&root);
        let snapshot = Snapshot::new(WindowState::new(root), 1);

        let captured = paused_runtime().block_on(restore_then_capture(snapshot));
        prop_assert_eq!(outline(&captured.main.root), expected);
        prop_assert!(captured.popouts.is_empty());
    }

    #[test]
    fn popouts_round_trip_per_window(shape in arb_shape(), popouts in arb_popouts()) {
        let mut next = 0;
        let main = build(&shape, 0, &mut next);
        let mut expected = vec![outline(&main)];
        let mut snapshot = Snapshot::new(WindowState::new(main), 1);

        let mut taken = std::collections::BTreeSet::new();
        for (popout_shape, shared) in &popouts {
            let mut root = build(popout_shape, 0, &mut next);
            let first = first_tab_mut(&mut root).unwrap();
            if let Some(idx) = shared {
                first.path = SHARED_PATHS[*idx].to_string();
            }
            if taken.insert(first.path.clone()) {
                expected.push(outline(&root));
            }
            snapshot.popouts.push(WindowState::new(root));
        }

        let captured = paused_runtime().block_on(restore_then_capture(snapshot));
        let actual: Vec<String> = std::iter::once(&captured.main)
            .chain(&captured.popouts)
            .map(|w| outline(&w.root))
            .collect();
        prop_assert_eq!(actual, expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn wire_form_preserves_structure(shape in arb_shape()) {
        let mut next = 0;
        let root = build(&shape, 0, &mut next);
        let expected = outline(&root);
        let snapshot = Snapshot::new(WindowState::new(root), 7);

        let decoded = wire::decode(&wire::encode(&snapshot)).unwrap();
        prop_assert_eq!(outline(&decoded.main.root), expected);
        prop_assert_eq!(decoded.ts, 7);
    }
}
