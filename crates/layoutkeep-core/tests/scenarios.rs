//! End-to-end scenarios: capture on one screen, ship through the wire form,
//! restore on another.
//!
//! Each scenario drives [`InMemoryHost`] through the public capture and
//! restore APIs only.

use std::sync::Arc;

use layoutkeep_core::capture::{CaptureConfig, LayoutSnapshotCapturer};
use layoutkeep_core::geometry::{GeometryConfig, Rect};
use layoutkeep_core::host::memory::InMemoryHost;
use layoutkeep_core::resolver::{FileResolver, ResolveMethod};
use layoutkeep_core::restore::{LayoutSnapshotRestorer, RestoreConfig, RestoreOptions};
use layoutkeep_core::snapshot::{LayoutNode, Snapshot, SplitDirection, Tab};
use layoutkeep_core::wire;

// =============================================================================
// Helpers
// =============================================================================

const DOCS: [&str; 4] = ["a.md", "b.md", "c.md", "d.md"];

fn host_on(screen: Rect) -> Arc<InMemoryHost> {
    let host = Arc::new(InMemoryHost::new(screen));
    for doc in DOCS {
        host.add_document(doc, None);
    }
    host
}

fn capturer(host: &Arc<InMemoryHost>) -> LayoutSnapshotCapturer {
    LayoutSnapshotCapturer::new(
        host.clone(),
        host.clone(),
        GeometryConfig::default(),
        CaptureConfig::default(),
    )
}

fn restorer(host: &Arc<InMemoryHost>) -> LayoutSnapshotRestorer {
    LayoutSnapshotRestorer::new(
        host.clone(),
        host.clone(),
        GeometryConfig::default(),
        RestoreConfig::default(),
    )
}

/// `h{60,40}([a*, b] | [c])` filling a 1920×1080 screen, plus a popout
/// holding `d.md` when `with_popout` is set.
async fn capture_desktop(with_popout: bool) -> Snapshot {
    let screen = Rect::new(0.0, 0.0, 1920.0, 1080.0);
    let host = host_on(screen);
    host.seed_main(
        &LayoutNode::split_sized(
            SplitDirection::Horizontal,
            vec![
                LayoutNode::tab_group(vec![Tab::new("a.md").activated(), Tab::new("b.md")]),
                LayoutNode::tab_group(vec![Tab::new("c.md")]),
            ],
            vec![60.0, 40.0],
        ),
        screen,
    );
    if with_popout {
        host.add_window(
            &LayoutNode::tab_group(vec![Tab::new("d.md")]),
            Rect::new(200.0, 150.0, 800.0, 600.0),
            false,
        );
    }
    capturer(&host).capture_all_windows().await
}

fn assert_close(actual: Rect, expected: Rect) {
    for (a, e) in [
        (actual.x, expected.x),
        (actual.y, expected.y),
        (actual.width, expected.width),
        (actual.height, expected.height),
    ] {
        assert!((a - e).abs() <= 1.0, "{actual:?} vs {expected:?}");
    }
}

// =============================================================================
// Capture
// =============================================================================

#[tokio::test(start_paused = true)]
async fn capture_records_tree_geometry_and_screen() {
    let snapshot = capture_desktop(false).await;

    let LayoutNode::Split {
        direction,
        sizes,
        children,
    } = &snapshot.main.root
    else {
        panic!("expected split root, got {:?}", snapshot.main.root);
    };
    assert_eq!(*direction, SplitDirection::Horizontal);
    assert_eq!(sizes.as_deref(), Some(&[60.0, 40.0][..]));
    assert_eq!(children.len(), 2);

    let tabs = snapshot.main.root.tabs();
    assert_eq!(tabs[0].path, "a.md");
    assert!(tabs[0].active);
    assert!(!tabs[1].active);

    assert_eq!(
        snapshot.main.geometry(),
        Some(Rect::new(0.0, 0.0, 1728.0, 1117.0))
    );
    let source = snapshot.source_screen.expect("source screen");
    assert!((source.aspect_ratio - 1920.0 / 1080.0).abs() < 1e-9);
    assert!(snapshot.popouts.is_empty());
}

// =============================================================================
// Restore on a different screen
// =============================================================================

#[tokio::test(start_paused = true)]
async fn same_shape_screen_scales_without_tiling() {
    let snapshot = capture_desktop(false).await;
    let shipped = wire::decode(&wire::encode(&snapshot)).expect("wire round trip");

    let screen = Rect::new(0.0, 0.0, 2560.0, 1440.0);
    let host = host_on(screen);
    let report = restorer(&host)
        .restore(shipped, RestoreOptions::default())
        .await
        .expect("restore");

    assert!(!report.tiled);
    assert_eq!(report.tabs_opened, 3);
    assert!(host.notifications().is_empty());
    let main = host.main_window_id();
    assert_eq!(
        host.render_window(main),
        "h{60,40}([a.md*, b.md] | [c.md])"
    );
    assert_close(host.bounds_of(main).expect("main bounds"), screen);
}

#[tokio::test(start_paused = true)]
async fn changed_aspect_ratio_tiles_every_window() {
    let snapshot = capture_desktop(true).await;
    assert_eq!(snapshot.popouts.len(), 1);

    let screen = Rect::new(0.0, 0.0, 1000.0, 1000.0);
    let host = host_on(screen);
    let report = restorer(&host)
        .restore(snapshot, RestoreOptions::default())
        .await
        .expect("restore");

    assert!(report.tiled);
    assert_eq!(report.windows_opened, 2);
    let notes = host.notifications();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].contains("Windows were tiled"), "{notes:?}");

    let windows = host.window_ids();
    assert_eq!(windows.len(), 2);
    let mut area = 0.0;
    for window in windows {
        let bounds = host.bounds_of(window).expect("bounds");
        assert!(screen.contains(&bounds), "{bounds:?} outside {screen:?}");
        area += bounds.width * bounds.height;
    }
    assert!((area - screen.width * screen.height).abs() < 1.0);
}

#[tokio::test(start_paused = true)]
async fn restore_twice_yields_the_same_layout() {
    let snapshot = capture_desktop(true).await;
    let host = host_on(Rect::new(0.0, 0.0, 1920.0, 1080.0));

    restorer(&host)
        .restore(snapshot.clone(), RestoreOptions::default())
        .await
        .expect("first restore");
    let first: Vec<String> = host
        .window_ids()
        .into_iter()
        .map(|w| host.render_window(w))
        .collect();

    restorer(&host)
        .restore(snapshot, RestoreOptions::default())
        .await
        .expect("second restore");
    let second: Vec<String> = host
        .window_ids()
        .into_iter()
        .map(|w| host.render_window(w))
        .collect();

    assert_eq!(first, second);
    assert_eq!(second.len(), 2);
}

// =============================================================================
// Resolution
// =============================================================================

#[test]
fn stable_id_match_wins_over_name_match() {
    let host = Arc::new(InMemoryHost::new(Rect::new(0.0, 0.0, 1728.0, 1117.0)));
    host.add_document("archive/renamed.md", Some("u1"));
    host.add_document("elsewhere/a.md", None);

    let mut resolver = FileResolver::new(host);
    let tab = Tab::new("a.md")
        .with_stable_id("u1")
        .with_display_name("a");
    let resolution = resolver.resolve(&tab);

    assert_eq!(resolution.method, ResolveMethod::Uid);
    assert_eq!(resolution.document.as_deref(), Some("archive/renamed.md"));
    assert_eq!(resolver.corrections().len(), 1);
    assert_eq!(resolver.corrections()[0].new_path, "archive/renamed.md");
}

#[tokio::test(start_paused = true)]
async fn moved_document_restores_in_place() {
    let snapshot = capture_desktop(false).await;
    let host = host_on(Rect::new(0.0, 0.0, 1920.0, 1080.0));
    host.rename_document("c.md", "archive/c.md");

    let report = restorer(&host)
        .restore(snapshot, RestoreOptions::default())
        .await
        .expect("restore");

    assert_eq!(report.tabs_skipped, 0);
    assert_eq!(report.corrections.len(), 1);
    assert_eq!(report.corrections[0].old_path, "c.md");
    assert_eq!(
        host.render_window(host.main_window_id()),
        "h{60,40}([a.md*, b.md] | [archive/c.md])"
    );
}
