//! Compact wire encoding for embedding snapshots in documents.
//!
//! The wire form is JSON with short keys, UTF-8 encoded and then standard
//! base64. Only layout, identity and geometry survive; per-view state
//! (scroll offsets, canvas viewports) is dropped.
//!
//! ```text
//! { "v": 2, "ts": 1700000000000, "f": -1,
//!   "m": { "r": <node>, "g": [x, y, w, h], "px": 1 },
//!   "p": [ <window>, ... ],
//!   "ls": { "c": 1, "t": "files" }, "rs": { "c": 0 },
//!   "ar": 1.547 }
//!
//! <node>  = [ <tab>, ... ]                       tab group
//!         | { "d": "h"|"v", "c": [<node>, ...], "s": [..] }   split
//! <tab>   = "path"                               inactive, no id
//!         | ["path", "id" | null]                inactive
//!         | ["path", "id" | null, 1]             active
//! ```
//!
//! `ar` carries only the capture screen's aspect ratio; decoding rebuilds a
//! screen with the virtual reference height and `ar ×` that height as width.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value, json};

use crate::error::CodecError;
use crate::geometry::VIRTUAL_HEIGHT;
use crate::snapshot::{
    LayoutNode, MAIN_WINDOW_INDEX, SNAPSHOT_VERSION, ScreenInfo, SidebarState, Snapshot,
    SplitDirection, Tab, WindowState, display_name_for,
};

// =============================================================================
// Encoding
// =============================================================================

/// Encode a snapshot to the compact base64 form.
#[must_use]
pub fn encode(snapshot: &Snapshot) -> String {
    STANDARD.encode(to_compact_value(snapshot).to_string())
}

/// Compact JSON value, before base64.
#[must_use]
pub fn to_compact_value(snapshot: &Snapshot) -> Value {
    let mut out = Map::new();
    out.insert("v".into(), json!(SNAPSHOT_VERSION));
    out.insert("ts".into(), json!(snapshot.ts));
    out.insert("f".into(), json!(snapshot.focused_window));
    out.insert("m".into(), window_value(&snapshot.main));
    if !snapshot.popouts.is_empty() {
        out.insert(
            "p".into(),
            Value::Array(snapshot.popouts.iter().map(window_value).collect()),
        );
    }
    if let Some(sidebar) = &snapshot.left_sidebar {
        out.insert("ls".into(), sidebar_value(sidebar));
    }
    if let Some(sidebar) = &snapshot.right_sidebar {
        out.insert("rs".into(), sidebar_value(sidebar));
    }
    if let Some(screen) = &snapshot.source_screen {
        out.insert("ar".into(), number(screen.aspect_ratio));
    }
    Value::Object(out)
}

/// Whole numbers are written without a fractional part.
fn number(v: f64) -> Value {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15 {
        json!(v as i64)
    } else {
        json!(v)
    }
}

fn window_value(window: &WindowState) -> Value {
    let mut out = Map::new();
    out.insert("r".into(), node_value(&window.root));
    if let Some(rect) = window.geometry() {
        out.insert(
            "g".into(),
            Value::Array(vec![
                number(rect.x),
                number(rect.y),
                number(rect.width),
                number(rect.height),
            ]),
        );
    }
    if window.is_proxy() {
        out.insert("px".into(), json!(1));
    }
    Value::Object(out)
}

fn node_value(node: &LayoutNode) -> Value {
    match node {
        LayoutNode::TabGroup { tabs } => Value::Array(tabs.iter().map(tab_value).collect()),
        LayoutNode::Split {
            direction,
            children,
            sizes,
        } => {
            let mut out = Map::new();
            out.insert("d".into(), json!(direction.as_short()));
            out.insert(
                "c".into(),
                Value::Array(children.iter().map(node_value).collect()),
            );
            if let Some(sizes) = sizes {
                out.insert(
                    "s".into(),
                    Value::Array(sizes.iter().map(|s| number(*s)).collect()),
                );
            }
            Value::Object(out)
        }
    }
}

fn tab_value(tab: &Tab) -> Value {
    match (&tab.stable_id, tab.active) {
        (None, false) => json!(tab.path),
        (id, false) => json!([tab.path, id]),
        (id, true) => json!([tab.path, id, 1]),
    }
}

fn sidebar_value(sidebar: &SidebarState) -> Value {
    let mut out = Map::new();
    out.insert("c".into(), json!(u8::from(sidebar.collapsed)));
    if let Some(tab) = &sidebar.active_tab {
        out.insert("t".into(), json!(tab));
    }
    Value::Object(out)
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode the compact base64 form.
pub fn decode(encoded: &str) -> Result<Snapshot, CodecError> {
    let bytes = STANDARD.decode(encoded.trim())?;
    let text = String::from_utf8(bytes)?;
    let value: Value = serde_json::from_str(&text)?;
    from_compact_value(&value)
}

fn malformed(msg: impl Into<String>) -> CodecError {
    CodecError::Malformed(msg.into())
}

/// Parse a compact JSON value.
pub fn from_compact_value(value: &Value) -> Result<Snapshot, CodecError> {
    let obj = value
        .as_object()
        .ok_or_else(|| malformed("top level is not an object"))?;

    let version = obj
        .get("v")
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed("missing version"))?;
    if version != u64::from(SNAPSHOT_VERSION) {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let ts = obj.get("ts").and_then(Value::as_u64).unwrap_or(0);
    let main = window_from(obj.get("m").ok_or_else(|| malformed("missing main window"))?)?;
    let mut snapshot = Snapshot::new(main, ts);

    if let Some(popouts) = obj.get("p") {
        let popouts = popouts
            .as_array()
            .ok_or_else(|| malformed("popouts are not an array"))?;
        snapshot.popouts = popouts.iter().map(window_from).collect::<Result<_, _>>()?;
    }

    snapshot.focused_window = obj
        .get("f")
        .and_then(Value::as_i64)
        .and_then(|f| i32::try_from(f).ok())
        .unwrap_or(MAIN_WINDOW_INDEX);
    snapshot.left_sidebar = obj.get("ls").map(sidebar_from).transpose()?;
    snapshot.right_sidebar = obj.get("rs").map(sidebar_from).transpose()?;
    snapshot.source_screen = obj
        .get("ar")
        .and_then(Value::as_f64)
        .filter(|ar| ar.is_finite() && *ar > 0.0)
        .map(|ar| ScreenInfo {
            width: ar * VIRTUAL_HEIGHT,
            height: VIRTUAL_HEIGHT,
            aspect_ratio: ar,
        });
    Ok(snapshot)
}

fn window_from(value: &Value) -> Result<WindowState, CodecError> {
    let obj = value
        .as_object()
        .ok_or_else(|| malformed("window is not an object"))?;
    let root = node_from(obj.get("r").ok_or_else(|| malformed("window without root"))?)?;
    let mut window = WindowState::new(root);
    if let Some(g) = obj.get("g") {
        let parts: Vec<f64> = g
            .as_array()
            .ok_or_else(|| malformed("geometry is not an array"))?
            .iter()
            .map(|v| v.as_f64().ok_or_else(|| malformed("geometry entry is not a number")))
            .collect::<Result<_, _>>()?;
        let [x, y, width, height] = parts[..] else {
            return Err(malformed("geometry needs four numbers"));
        };
        window.x = Some(x);
        window.y = Some(y);
        window.width = Some(width);
        window.height = Some(height);
    }
    if obj.get("px").is_some_and(truthy) {
        window.is_proxy = Some(true);
    }
    Ok(window)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

fn node_from(value: &Value) -> Result<LayoutNode, CodecError> {
    match value {
        Value::Array(tabs) => Ok(LayoutNode::tab_group(
            tabs.iter().map(tab_from).collect::<Result<_, _>>()?,
        )),
        Value::Object(obj) => {
            let direction = obj
                .get("d")
                .and_then(Value::as_str)
                .and_then(SplitDirection::from_short)
                .ok_or_else(|| malformed("split without a valid direction"))?;
            let children = obj
                .get("c")
                .and_then(Value::as_array)
                .ok_or_else(|| malformed("split without children"))?
                .iter()
                .map(node_from)
                .collect::<Result<Vec<_>, _>>()?;
            let sizes = match obj.get("s") {
                Some(s) => Some(
                    s.as_array()
                        .ok_or_else(|| malformed("split sizes are not an array"))?
                        .iter()
                        .map(|v| v.as_f64().ok_or_else(|| malformed("split size is not a number")))
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                None => None,
            };
            Ok(LayoutNode::Split {
                direction,
                children,
                sizes,
            })
        }
        _ => Err(malformed("layout node is neither a tab list nor a split")),
    }
}

fn tab_from(value: &Value) -> Result<Tab, CodecError> {
    let (path, stable_id, active) = match value {
        Value::String(path) => (path.clone(), None, false),
        Value::Array(parts) => {
            let path = parts
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("tab entry without a path"))?
                .to_string();
            let stable_id = parts.get(1).and_then(Value::as_str).map(str::to_string);
            let active = parts.get(2).is_some_and(truthy);
            (path, stable_id, active)
        }
        _ => return Err(malformed("tab entry is neither a string nor an array")),
    };
    let mut tab = Tab::new(path);
    tab.display_name = display_name_for(&tab.path);
    tab.stable_id = stable_id;
    tab.active = active;
    Ok(tab)
}

fn sidebar_from(value: &Value) -> Result<SidebarState, CodecError> {
    let obj = value
        .as_object()
        .ok_or_else(|| malformed("sidebar is not an object"))?;
    Ok(SidebarState {
        collapsed: obj.get("c").is_some_and(truthy),
        active_tab: obj.get("t").and_then(Value::as_str).map(str::to_string),
    })
}
