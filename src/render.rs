//! Stateless meter geometry: maps snapshot values onto positions along a
//! gradient arc.
//!
//! The arc is a 100-degree band; each connected device travels along it in
//! its own lane, a fixed radial offset so icons at similar values do not
//! overlap. All functions are pure so the output for a given snapshot is
//! reproducible.

use serde::Serialize;

use crate::domain::{ValueRange, DEVICE_SLOTS};

const BASE_CX: f64 = 251.74;
const BASE_CY: f64 = 168.17;
const STROKE_WIDTH: f64 = 100.0;
const START_ANGLE: f64 = -140.0;
const END_ANGLE: f64 = -40.0;
const MAX_LANE_OFFSET: f64 = 30.0;
const MIN_LANE_OFFSET: f64 = -30.0;
const ICON_Y_OFFSET: f64 = -12.0;
const ICON_RADIUS: f64 = 25.0;
const VIEW_PADDING: f64 = 30.0;

fn base_radius() -> f64 {
    ((503.48 / 2.0f64).powi(2) + (168.17 * 0.52f64).powi(2)).sqrt()
}

/// The computed drawing surface and the translation that keeps the full arc
/// plus icon excursions inside it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewBox {
    pub width: f64,
    pub height: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

/// One positioned device icon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IconPlacement {
    pub index: usize,
    pub x: f64,
    pub y: f64,
    /// Normalized position along the arc, clamped to `[0, 100]`.
    pub percentage: f64,
    /// Denormalized value in the configured unit, rounded for display.
    pub display_value: i64,
    pub unit: String,
    pub icon_url: Option<String>,
}

/// Inputs beyond the raw values that affect placement.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub icons: Vec<Option<String>>,
    pub actual_values: Vec<Option<f64>>,
    pub value_range: ValueRange,
}

/// Radial lane offsets for `device_count` devices, evenly spread across the
/// band. A single device sits centered on the arc.
pub fn lane_offsets(device_count: usize) -> Vec<f64> {
    match device_count {
        0 => Vec::new(),
        1 => vec![0.0],
        n => (0..n)
            .map(|i| {
                let t = i as f64 / (n - 1) as f64;
                MIN_LANE_OFFSET + (MAX_LANE_OFFSET - MIN_LANE_OFFSET) * t
            })
            .collect(),
    }
}

/// Bounding box over the arc edges plus the widest icon excursion.
pub fn view_box() -> ViewBox {
    let outer = base_radius() + STROKE_WIDTH / 2.0;
    let inner = base_radius() - STROKE_WIDTH / 2.0;

    let mut min_x = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_y = f64::NEG_INFINITY;

    let mut angles = vec![START_ANGLE, END_ANGLE];
    let mut angle = START_ANGLE.ceil() as i64;
    while angle <= END_ANGLE.floor() as i64 {
        // Axis crossings are the arc's extreme points.
        if angle % 90 == 0 {
            angles.push(angle as f64);
        }
        angle += 1;
    }
    for angle in angles {
        let rad = angle.to_radians();
        for radius in [outer, inner] {
            let x = BASE_CX + radius * rad.cos();
            let y = BASE_CY + radius * rad.sin();
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }
    }

    let max_icon_offset = MAX_LANE_OFFSET.abs().max(MIN_LANE_OFFSET.abs());
    for i in 0..=10 {
        let t = i as f64 / 10.0;
        let rad = (START_ANGLE + (END_ANGLE - START_ANGLE) * t).to_radians();
        let radius = base_radius() + max_icon_offset;
        let x = BASE_CX + radius * rad.cos();
        let y = BASE_CY + radius * rad.sin();
        min_x = min_x.min(x - ICON_RADIUS);
        max_x = max_x.max(x + ICON_RADIUS);
        min_y = min_y.min(y - ICON_RADIUS);
        max_y = max_y.max(y + ICON_RADIUS);
    }

    ViewBox {
        width: max_x - min_x + VIEW_PADDING * 2.0,
        height: max_y - min_y + VIEW_PADDING * 2.0,
        offset_x: -min_x + VIEW_PADDING,
        offset_y: -min_y + VIEW_PADDING,
    }
}

fn center() -> (f64, f64) {
    let vb = view_box();
    (BASE_CX + vb.offset_x, BASE_CY + vb.offset_y)
}

/// SVG path data for the filled meter band.
pub fn arc_path() -> String {
    let (cx, cy) = center();
    let start = START_ANGLE.to_radians();
    let end = END_ANGLE.to_radians();
    let inner = base_radius() - STROKE_WIDTH / 2.0;
    let outer = base_radius() + STROKE_WIDTH / 2.0;
    let (x1, y1) = (cx + inner * start.cos(), cy + inner * start.sin());
    let (x2, y2) = (cx + outer * start.cos(), cy + outer * start.sin());
    let (x3, y3) = (cx + outer * end.cos(), cy + outer * end.sin());
    let (x4, y4) = (cx + inner * end.cos(), cy + inner * end.sin());
    let large_arc = i32::from(END_ANGLE - START_ANGLE > 180.0);
    format!(
        "M {x1} {y1} L {x2} {y2} A {outer} {outer} 0 {large_arc} 1 {x3} {y3} \
         L {x4} {y4} A {inner} {inner} 0 {large_arc} 0 {x1} {y1}"
    )
}

/// Position for one icon: `percentage` selects the angle along the arc and
/// the lane selects the radius.
pub fn icon_position(percentage: f64, lane_index: usize, device_count: usize) -> (f64, f64) {
    let (cx, cy) = center();
    let t = percentage.clamp(0.0, 100.0) / 100.0;
    let rad = (START_ANGLE + (END_ANGLE - START_ANGLE) * t).to_radians();
    let offsets = lane_offsets(device_count.max(1));
    let lane = lane_index.min(offsets.len() - 1);
    let radius = base_radius() + offsets[lane];
    (
        cx + radius * rad.cos(),
        cy + radius * rad.sin() + ICON_Y_OFFSET,
    )
}

/// Place icons for all connected devices. Disconnected slots produce no
/// placement; lanes are assigned by position among the connected devices so
/// the spread always matches the live count.
pub fn render_frame(values: &[Option<f64>], options: &RenderOptions) -> Vec<IconPlacement> {
    let connected: Vec<usize> = values
        .iter()
        .take(DEVICE_SLOTS)
        .enumerate()
        .filter_map(|(i, v)| v.filter(|v| !v.is_nan()).map(|_| i))
        .collect();
    if connected.is_empty() {
        return Vec::new();
    }
    let count = connected.len();

    connected
        .iter()
        .enumerate()
        .map(|(lane, &index)| {
            let value = values[index].unwrap_or(0.0);
            let safe = if value.is_finite() { value } else { 0.0 };
            let percentage = safe.clamp(0.0, 100.0);
            let (x, y) = icon_position(percentage, lane, count);
            let display = options
                .actual_values
                .get(index)
                .copied()
                .flatten()
                .or_else(|| options.value_range.denormalize(percentage))
                .unwrap_or(options.value_range.min);
            IconPlacement {
                index,
                x,
                y,
                percentage,
                display_value: display.round() as i64,
                unit: options.value_range.unit.clone(),
                icon_url: options.icons.get(index).cloned().flatten(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_offsets_spread_evenly() {
        assert!(lane_offsets(0).is_empty());
        assert_eq!(lane_offsets(1), vec![0.0]);
        assert_eq!(lane_offsets(2), vec![-30.0, 30.0]);
        let three = lane_offsets(3);
        assert_eq!(three, vec![-30.0, 0.0, 30.0]);
    }

    #[test]
    fn arc_endpoints_map_to_arc_ends() {
        let (x0, _) = icon_position(0.0, 0, 1);
        let (x100, _) = icon_position(100.0, 0, 1);
        let (x50, y50) = icon_position(50.0, 0, 1);
        // Left end of the band is left of the right end, midpoint is above
        // both (the arc opens downward).
        assert!(x0 < x50 && x50 < x100);
        let (_, y0) = icon_position(0.0, 0, 1);
        assert!(y50 < y0);
    }

    #[test]
    fn out_of_range_percentages_clamp_to_ends() {
        assert_eq!(icon_position(-20.0, 0, 1), icon_position(0.0, 0, 1));
        assert_eq!(icon_position(150.0, 0, 1), icon_position(100.0, 0, 1));
    }

    #[test]
    fn disconnected_slots_are_skipped_and_lanes_reassigned() {
        let values = vec![None, Some(25.0), None, Some(75.0), None, None];
        let placements = render_frame(&values, &RenderOptions::default());
        assert_eq!(placements.len(), 2);
        assert_eq!(placements[0].index, 1);
        assert_eq!(placements[1].index, 3);
        // Two connected devices take the outermost lanes regardless of which
        // slots they occupy.
        let (x, y) = icon_position(25.0, 0, 2);
        assert_eq!((placements[0].x, placements[0].y), (x, y));
    }

    #[test]
    fn display_value_prefers_actuals_then_denormalizes() {
        let options = RenderOptions {
            actual_values: vec![Some(37.4), None, None, None, None, None],
            value_range: ValueRange::new(0.0, 200.0, "deg"),
            ..Default::default()
        };
        let values = vec![Some(50.0), Some(50.0), None, None, None, None];
        let placements = render_frame(&values, &options);
        assert_eq!(placements[0].display_value, 37);
        assert_eq!(placements[1].display_value, 100);
        assert_eq!(placements[1].unit, "deg");
    }

    #[test]
    fn empty_frame_renders_nothing() {
        assert!(render_frame(&[None; 6], &RenderOptions::default()).is_empty());
    }

    #[test]
    fn arc_path_is_closed_and_stable() {
        let path = arc_path();
        assert!(path.starts_with("M "));
        assert_eq!(path, arc_path());
    }
}
