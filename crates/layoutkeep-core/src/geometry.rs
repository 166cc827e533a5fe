//! Resolution-independent window geometry.
//!
//! Window rectangles are stored in a fixed virtual frame (1728×1117 by
//! default) so a snapshot taken on one display can be replayed on another.
//! [`CoordinateTransformer`] converts between that frame and the physical
//! pixels of the current screen, validates restored rectangles and computes
//! the tiled fallback layout used when screen shapes differ too much.

use serde::{Deserialize, Serialize};

use crate::snapshot::ScreenInfo;

/// Default virtual reference width.
pub const VIRTUAL_WIDTH: f64 = 1728.0;
/// Default virtual reference height.
pub const VIRTUAL_HEIGHT: f64 = 1117.0;

const MIN_VALID_SIZE: f64 = 100.0;
const MAX_VALID_SIZE: f64 = 10_000.0;
const MIN_VALID_COORD: f64 = -10_000.0;
const MAX_VALID_COORD: f64 = 20_000.0;

// =============================================================================
// Core types
// =============================================================================

/// Axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// True when `other` lies fully inside `self`.
    #[must_use]
    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    #[must_use]
    pub fn aspect_ratio(&self) -> f64 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        }
    }
}

/// Possibly incomplete geometry, as read back from a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawGeometry {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

impl From<Rect> for RawGeometry {
    fn from(rect: Rect) -> Self {
        Self {
            x: Some(rect.x),
            y: Some(rect.y),
            width: Some(rect.width),
            height: Some(rect.height),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Geometry settings (`[geometry]` in layoutkeep.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    pub virtual_width: f64,
    pub virtual_height: f64,
    /// Smallest physical window size a restore will produce.
    pub min_window_width: f64,
    pub min_window_height: f64,
    /// Aspect-ratio difference above which windows are tiled instead.
    pub tiling_threshold: f64,
    /// Virtual rectangle substituted for missing popout geometry.
    pub default_window: Rect,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            virtual_width: VIRTUAL_WIDTH,
            virtual_height: VIRTUAL_HEIGHT,
            min_window_width: 400.0,
            min_window_height: 300.0,
            tiling_threshold: 0.5,
            default_window: Rect::new(200.0, 100.0, 1000.0, 700.0),
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

fn valid_size(v: f64) -> bool {
    v.is_finite() && (MIN_VALID_SIZE..=MAX_VALID_SIZE).contains(&v)
}

fn valid_coord(v: f64) -> bool {
    v.is_finite() && (MIN_VALID_COORD..=MAX_VALID_COORD).contains(&v)
}

/// Accept geometry only when every field is present, finite and in range.
#[must_use]
pub fn validate_geometry(raw: RawGeometry) -> Option<Rect> {
    let (x, y, width, height) = (raw.x?, raw.y?, raw.width?, raw.height?);
    if valid_coord(x) && valid_coord(y) && valid_size(width) && valid_size(height) {
        Some(Rect::new(x, y, width, height))
    } else {
        None
    }
}

/// Repair geometry field by field: substitute the default for missing or
/// non-finite values and clamp the rest into range.
#[must_use]
pub fn sanitize_geometry(raw: RawGeometry, defaults: Rect) -> Rect {
    fn pick(value: Option<f64>, fallback: f64, min: f64, max: f64) -> f64 {
        match value {
            Some(v) if v.is_finite() => v.clamp(min, max),
            _ => fallback.clamp(min, max),
        }
    }
    Rect::new(
        pick(raw.x, defaults.x, MIN_VALID_COORD, MAX_VALID_COORD),
        pick(raw.y, defaults.y, MIN_VALID_COORD, MAX_VALID_COORD),
        pick(raw.width, defaults.width, MIN_VALID_SIZE, MAX_VALID_SIZE),
        pick(raw.height, defaults.height, MIN_VALID_SIZE, MAX_VALID_SIZE),
    )
}

// =============================================================================
// Transformer
// =============================================================================

fn is_usable_screen(screen: &Rect) -> bool {
    [screen.x, screen.y, screen.width, screen.height]
        .iter()
        .all(|v| v.is_finite())
        && screen.width > 0.0
        && screen.height > 0.0
}

/// Converts geometry between the virtual frame and one physical screen.
#[derive(Debug, Clone)]
pub struct CoordinateTransformer {
    screen: Rect,
    config: GeometryConfig,
}

impl CoordinateTransformer {
    /// `screen` is the available area of the current display in pixels.
    #[must_use]
    pub fn new(screen: Rect, config: GeometryConfig) -> Self {
        Self { screen, config }
    }

    #[must_use]
    pub fn screen(&self) -> Rect {
        self.screen
    }

    #[must_use]
    pub fn config(&self) -> &GeometryConfig {
        &self.config
    }

    fn scale_to_virtual(&self) -> (f64, f64) {
        (
            self.config.virtual_width / self.screen.width,
            self.config.virtual_height / self.screen.height,
        )
    }

    /// Physical pixels → virtual frame, rounded to whole units.
    ///
    /// A screen with a zero or non-finite extent has no scale; the
    /// configured default window is returned instead.
    #[must_use]
    pub fn physical_to_virtual(&self, rect: Rect) -> Rect {
        if !is_usable_screen(&self.screen) {
            return self.config.default_window;
        }
        let (sx, sy) = self.scale_to_virtual();
        Rect::new(
            ((rect.x - self.screen.x) * sx).round(),
            ((rect.y - self.screen.y) * sy).round(),
            (rect.width * sx).round(),
            (rect.height * sy).round(),
        )
    }

    /// Virtual frame → physical pixels on the current screen.
    ///
    /// With a known `source` screen the size is scaled uniformly by the
    /// smaller of the two axis ratios so the window keeps its proportions.
    /// The result always fits inside the screen and respects the minimum
    /// window size (never larger than the screen itself).
    #[must_use]
    pub fn virtual_to_physical(&self, rect: Rect, source: Option<&ScreenInfo>) -> Rect {
        let vw = self.config.virtual_width;
        let vh = self.config.virtual_height;
        let screen = self.screen;
        if !is_usable_screen(&screen) {
            return rect;
        }

        let x = screen.x + rect.x * (screen.width / vw);
        let y = screen.y + rect.y * (screen.height / vh);

        let (mut width, mut height) = match source.filter(|s| s.width > 0.0 && s.height > 0.0) {
            Some(source) => {
                let src_w = rect.width * (source.width / vw);
                let src_h = rect.height * (source.height / vh);
                let uniform = (screen.width / source.width).min(screen.height / source.height);
                (src_w * uniform, src_h * uniform)
            }
            None => (
                rect.width * (screen.width / vw),
                rect.height * (screen.height / vh),
            ),
        };

        let min_w = self.config.min_window_width.min(screen.width);
        let min_h = self.config.min_window_height.min(screen.height);
        width = width.round().clamp(min_w, screen.width);
        height = height.round().clamp(min_h, screen.height);

        let x = x.round().clamp(screen.x, screen.right() - width);
        let y = y.round().clamp(screen.y, screen.bottom() - height);

        Rect::new(x, y, width, height)
    }

    /// True when the capture screen's aspect ratio differs from the current
    /// one by strictly more than the tiling threshold.
    #[must_use]
    pub fn needs_tiling(&self, source: &ScreenInfo) -> bool {
        let current = self.screen.aspect_ratio();
        if !source.aspect_ratio.is_finite() || source.aspect_ratio <= 0.0 || current <= 0.0 {
            return false;
        }
        (source.aspect_ratio - current).abs() > self.config.tiling_threshold
    }

    /// Deterministic layout for `count` windows on the current screen.
    ///
    /// One window fills the screen, two split it into left and right halves.
    /// With three or more the first (main) window takes the left half and the
    /// rest stack evenly down the right half; the last one absorbs the
    /// remainder of the integer division.
    #[must_use]
    pub fn calculate_tiled_layout(&self, count: usize) -> Vec<Rect> {
        let s = self.screen;
        match count {
            0 => Vec::new(),
            1 => vec![s],
            _ => {
                let half = (s.width / 2.0).floor();
                let left = Rect::new(s.x, s.y, half, s.height);
                let right_x = s.x + half;
                let right_w = s.width - half;
                if count == 2 {
                    return vec![left, Rect::new(right_x, s.y, right_w, s.height)];
                }
                let stacked = count - 1;
                let each = (s.height / stacked as f64).floor();
                let mut out = Vec::with_capacity(count);
                out.push(left);
                for i in 0..stacked {
                    let y = s.y + each * i as f64;
                    let height = if i + 1 == stacked {
                        s.height - each * (stacked - 1) as f64
                    } else {
                        each
                    };
                    out.push(Rect::new(right_x, y, right_w, height));
                }
                out
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
