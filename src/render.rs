//! Heatmap renderer - standalone MapLibre GL page
//!
//! The weighted table becomes a GeoJSON source and a single `heatmap` layer.
//! Paint properties:
//! - heatmap-weight: per-point weight, scaled down to 0..0.1
//! - heatmap-intensity / radius: grow with zoom
//! - heatmap-opacity: fades out at high zoom, leaving room for a point layer
//! - heatmap-color: 5-stop "rocket" ramp, transparent at zero density

use serde_json::{json, Value};
use std::path::Path;
use thiserror::Error;

use crate::point::WeightedPoint;

pub const SOURCE_ID: &str = "gps-points";
pub const LAYER_ID: &str = "gps-heatmap";

/// CARTO "positron" base style
const POSITRON_STYLE: &str = "https://basemaps.cartocdn.com/gl/positron-gl-style/style.json";
const MAPLIBRE_VERSION: &str = "4.7.1";

/// Seaborn "rocket" sampled at 5 evenly spaced stops
const ROCKET: [(u8, u8, u8); 5] = [
    (63, 26, 66),
    (142, 27, 88),
    (203, 30, 79),
    (237, 96, 76),
    (245, 170, 133),
];

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("nothing to render: the point table is empty")]
    Empty,
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("cannot write {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Initial view: mean position and the bounding box of all points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Framing {
    /// `[lon, lat]`
    pub center: [f64; 2],
    /// `[min lon, min lat]`
    pub south_west: [f64; 2],
    /// `[max lon, max lat]`
    pub north_east: [f64; 2],
}

impl Framing {
    /// `None` for an empty table, where center and bounds are undefined
    pub fn from_points(points: &[WeightedPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }

        let n = points.len() as f64;
        let mut sum = [0.0, 0.0];
        let mut south_west = [f64::INFINITY, f64::INFINITY];
        let mut north_east = [f64::NEG_INFINITY, f64::NEG_INFINITY];

        for p in points {
            let xy = [p.point.longitude, p.point.latitude];
            for axis in 0..2 {
                sum[axis] += xy[axis];
                south_west[axis] = south_west[axis].min(xy[axis]);
                north_east[axis] = north_east[axis].max(xy[axis]);
            }
        }

        Some(Self {
            center: [sum[0] / n, sum[1] / n],
            south_west,
            north_east,
        })
    }
}

/// CSS colors of the ramp; the lowest stop is fully transparent
pub fn css_colors() -> Vec<String> {
    ROCKET
        .iter()
        .enumerate()
        .map(|(i, &(r, g, b))| {
            if i == 0 {
                format!("rgba({r},{g},{b},0)")
            } else {
                format!("rgb({r},{g},{b})")
            }
        })
        .collect()
}

/// `heatmap-color` expression interpolated over `heatmap-density`
pub fn heatmap_color() -> Value {
    let colors = css_colors();
    let last = (colors.len() - 1) as f64;

    let mut expr = vec![json!("interpolate"), json!(["linear"]), json!(["heatmap-density"])];
    for (i, color) in colors.into_iter().enumerate() {
        expr.push(json!(i as f64 / last));
        expr.push(json!(color));
    }
    Value::Array(expr)
}

pub fn heatmap_layer() -> Value {
    json!({
        "id": LAYER_ID,
        "type": "heatmap",
        "source": SOURCE_ID,
        "paint": {
            "heatmap-weight": ["interpolate", ["linear"], ["get", "weight"], 0, 0, 1, 0.1],
            "heatmap-intensity": ["interpolate", ["linear"], ["zoom"], 0, 0.1, 20, 10],
            "heatmap-color": heatmap_color(),
            "heatmap-radius": ["interpolate", ["linear"], ["zoom"], 0, 10, 20, 20],
            "heatmap-opacity": ["interpolate", ["linear"], ["zoom"], 7, 0.8, 20, 0.2],
        },
    })
}

/// One GeoJSON point feature per row, carrying its weight
pub fn feature_collection(points: &[WeightedPoint]) -> Value {
    let features: Vec<Value> = points
        .iter()
        .map(|p| {
            json!({
                "type": "Feature",
                "geometry": {
                    "type": "Point",
                    "coordinates": [p.point.longitude, p.point.latitude],
                },
                "properties": { "weight": p.weight },
            })
        })
        .collect();

    json!({ "type": "FeatureCollection", "features": features })
}

/// Serialize for inline `<script>` use
fn script_json(value: &Value) -> Result<String, RenderError> {
    Ok(serde_json::to_string(value)?.replace("</", "<\\/"))
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>__TITLE__</title>
<meta name="viewport" content="width=device-width, initial-scale=1">
<link rel="stylesheet" href="https://unpkg.com/maplibre-gl@__VERSION__/dist/maplibre-gl.css">
<script src="https://unpkg.com/maplibre-gl@__VERSION__/dist/maplibre-gl.js"></script>
<style>
  body { margin: 0; font-family: sans-serif; }
  #map { width: 100%; height: 600px; }
</style>
</head>
<body>
<div id="map"></div>
<script>
  const map = new maplibregl.Map({
    container: "map",
    style: "__STYLE__",
    center: __CENTER__,
    zoom: 1,
  });
  map.addControl(new maplibregl.NavigationControl());
  map.fitBounds(__BOUNDS__, { padding: 20, animate: false });
  map.on("load", () => {
    map.addSource("__SOURCE_ID__", { type: "geojson", data: __DATA__ });
    map.addLayer(__LAYER__);
  });
</script>
</body>
</html>
"#;

/// Render the full HTML page
pub fn render_html(points: &[WeightedPoint], title: &str) -> Result<String, RenderError> {
    let framing = Framing::from_points(points).ok_or(RenderError::Empty)?;

    // The title comes from stored data, so it is filled last
    let html = TEMPLATE
        .replace("__VERSION__", MAPLIBRE_VERSION)
        .replace("__STYLE__", POSITRON_STYLE)
        .replace("__SOURCE_ID__", SOURCE_ID)
        .replace("__CENTER__", &script_json(&json!(framing.center))?)
        .replace(
            "__BOUNDS__",
            &script_json(&json!([framing.south_west, framing.north_east]))?,
        )
        .replace("__LAYER__", &script_json(&heatmap_layer())?)
        .replace("__DATA__", &script_json(&feature_collection(points))?)
        .replace("__TITLE__", &html_escape(title));

    Ok(html)
}

/// Render and write the map page to `path`
pub fn write_map(path: &Path, points: &[WeightedPoint], title: &str) -> Result<(), RenderError> {
    let html = render_html(points, title)?;
    std::fs::write(path, html).map_err(|source| RenderError::Io {
        path: path.display().to_string(),
        source,
    })?;
    tracing::info!("Wrote heatmap with {} points to {}", points.len(), path.display());
    Ok(())
}

/// Export the weighted table as CSV
pub fn export_csv(path: &Path, points: &[WeightedPoint]) -> Result<(), RenderError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["time", "latitude", "longitude", "time_bin", "weight"])?;
    for p in points {
        writer.write_record([
            p.point.time.to_rfc3339(),
            p.point.latitude.to_string(),
            p.point.longitude.to_string(),
            p.time_bin.to_rfc3339(),
            p.weight.to_string(),
        ])?;
    }
    writer.flush().map_err(|source| RenderError::Io {
        path: path.display().to_string(),
        source,
    })?;
    tracing::info!("Exported {} rows to {}", points.len(), path.display());
    Ok(())
}
