//! Line chart of a run, rendered to SVG.

use crate::error::{AppResult, DmmError};
use crate::plot::axis_bounds;
use plotters::prelude::*;
use std::path::Path;

const CHART_SIZE: (u32, u32) = (1000, 600);

/// Draw `value` against elapsed seconds into `out`.
pub fn render_line_chart(points: &[(f64, f64)], title: &str, y_label: &str, out: &Path) -> AppResult<()> {
    let x_range = span(points.iter().map(|(x, _)| *x)).unwrap_or((0.0, 1.0));
    let y_range = axis_bounds(points.iter().map(|(_, y)| *y)).unwrap_or((-1.0, 1.0));

    let root = SVGBackend::new(out, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(chart_error)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(16)
        .x_label_area_size(40)
        .y_label_area_size(80)
        .build_cartesian_2d(x_range.0..x_range.1, y_range.0..y_range.1)
        .map_err(chart_error)?;

    chart
        .configure_mesh()
        .x_desc("Time (s)")
        .y_desc(y_label)
        .draw()
        .map_err(chart_error)?;

    chart
        .draw_series(LineSeries::new(points.iter().copied(), &BLUE))
        .map_err(chart_error)?;

    root.present().map_err(chart_error)?;
    Ok(())
}

fn span(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (min, max) = values.fold(None, |acc: Option<(f64, f64)>, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })?;
    if max > min {
        Some((min, max))
    } else {
        Some((min - 0.5, max + 0.5))
    }
}

fn chart_error<E: std::fmt::Display>(err: E) -> DmmError {
    DmmError::Chart(err.to_string())
}
