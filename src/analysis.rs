//! Post-processing of saved runs: joining, re-deriving and plotting archives.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};

use crate::archive::{self, ArchiveError};
use plotters::style::{RGBColor, RED};

use crate::drivers::{render_scatter3d_png, BenchError, Mark3d, PlotStyle, ScatterPlot};
use crate::measure::Geometry;
use crate::recorder::with_suffix;
use crate::series::MeasurementSeries;

/// Temperatures spanning less than this are treated as one fixed temperature (K).
pub const FIXED_TEMPERATURE_SPAN: f64 = 1.0;

/// Step between plotted current levels in the resistivity-temperature chart.
const RHO_T_STEP: usize = 10;

/// Milli-units for current axes.
const MILLI: f64 = 1000.0;

/// Archive path without its `.npz` extension: the description file of the run.
pub fn description_path(npz: &Path) -> PathBuf {
    let text = npz.to_string_lossy();
    PathBuf::from(text.strip_suffix(".npz").unwrap_or(&text).to_owned())
}

/// Several runs concatenated in the given order.
#[derive(Debug, Default)]
pub struct JoinedRuns {
    pub series: MeasurementSeries,
    pub description: String,
    /// archives skipped because an array was missing
    pub skipped: Vec<PathBuf>,
}

pub fn join_runs(paths: &[PathBuf]) -> Result<JoinedRuns> {
    let mut joined = JoinedRuns::default();
    for path in paths {
        match fs::read_to_string(description_path(path)) {
            Ok(text) => {
                joined.description.push_str(&text);
                joined.description.push_str("\n\n");
            }
            Err(_) => warn!("Description of {} not found.", path.display()),
        }
        match archive::read_npz(path) {
            Ok(series) => joined.series.extend(&series),
            Err(ArchiveError::MissingArray(key)) => {
                warn!("{} has no '{key}' array, skipped", path.display());
                joined.skipped.push(path.clone());
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }
    Ok(joined)
}

/// Joins `paths` and writes `<first>-joined` (description), `.npz` and `.csv`.
pub fn write_joined(paths: &[PathBuf]) -> Result<Option<PathBuf>> {
    let Some(first) = paths.first() else {
        return Ok(None);
    };
    let joined = join_runs(paths)?;
    let base = PathBuf::from(format!("{}-joined", description_path(first).display()));

    info!("Save experiments description {}", base.display());
    fs::write(&base, &joined.description)
        .with_context(|| format!("writing {}", base.display()))?;
    let npz = with_suffix(&base, "npz");
    info!("Save data in numpy format {}", npz.display());
    archive::write_npz(&npz, &joined.series)?;
    let csv = with_suffix(&base, "csv");
    info!("Save data in CSV format {}", csv.display());
    archive::write_csv(&csv, &joined.series)?;
    Ok(Some(base))
}

/// Recomputes field, current density and resistivity from voltage and current.
pub fn rederive(series: &MeasurementSeries, geometry: &Geometry) -> MeasurementSeries {
    let electric_field: Vec<f64> = series
        .voltage
        .iter()
        .map(|v| geometry.electric_field(*v))
        .collect();
    let current_density: Vec<f64> = series
        .current
        .iter()
        .map(|i| geometry.current_density(*i))
        .collect();
    let resistivity = electric_field
        .iter()
        .zip(&current_density)
        .map(|(e, j)| e / j)
        .collect();
    MeasurementSeries {
        electric_field,
        current_density,
        resistivity,
        ..series.clone()
    }
}

/// Writes `<stem>_a.npz` and `<stem>_a.csv` next to `path` with re-derived quantities.
pub fn rederive_file(path: &Path, geometry: &Geometry) -> Result<(PathBuf, PathBuf)> {
    let series = archive::read_npz_measured(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let series = rederive(&series, geometry);
    let base = PathBuf::from(format!("{}_a", description_path(path).display()));
    let npz = with_suffix(&base, "npz");
    let csv = with_suffix(&base, "csv");
    archive::write_npz(&npz, &series)?;
    archive::write_csv(&csv, &series)?;
    info!("Saved {} and {}", npz.display(), csv.display());
    Ok((npz, csv))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub fixed_temperature: bool,
    pub fixed_current: bool,
}

fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    let first = *values.first()?;
    Some(
        values
            .iter()
            .fold((first, first), |(lo, hi), v| (lo.min(*v), hi.max(*v))),
    )
}

pub fn classify(series: &MeasurementSeries) -> Classification {
    let fixed_temperature = min_max(&series.temperature)
        .map_or(true, |(lo, hi)| hi - lo < FIXED_TEMPERATURE_SPAN);
    let fixed_current = min_max(&series.current).map_or(true, |(lo, hi)| lo == hi);
    Classification {
        fixed_temperature,
        fixed_current,
    }
}

/// `(min-current index, max-current index)` per sweep, or `None` when the number of minima
/// and maxima differ and the sweeps cannot be told apart.
pub fn current_cycles(series: &MeasurementSeries) -> Option<Vec<(usize, usize)>> {
    let (lo, hi) = min_max(&series.current)?;
    let positions = |target: f64| -> Vec<usize> {
        series
            .current
            .iter()
            .enumerate()
            .filter(|(_, i)| **i == target)
            .map(|(idx, _)| idx)
            .collect()
    };
    let minima = positions(lo);
    let maxima = positions(hi);
    (minima.len() == maxima.len()).then(|| minima.into_iter().zip(maxima).collect())
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// One chart of the plot set.
#[derive(Clone, Debug)]
pub enum Chart {
    Flat(ScatterPlot),
    Cloud {
        title: String,
        axis_labels: [String; 3],
        points: Vec<(f64, f64, f64)>,
        temperature: Vec<f64>,
        /// maximum and minimum of the plotted quantity
        marks: Vec<Mark3d>,
    },
}

impl Chart {
    pub fn title(&self) -> &str {
        match self {
            Chart::Flat(plot) => &plot.title,
            Chart::Cloud { title, .. } => title,
        }
    }

    pub fn file_name(&self) -> String {
        let slug: String = self
            .title()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        format!("{slug}.png")
    }

    pub fn render_png(&self, style: &PlotStyle) -> Result<Vec<u8>, BenchError> {
        match self {
            Chart::Flat(plot) => plot.render_png(style),
            Chart::Cloud {
                title,
                axis_labels,
                points,
                temperature,
                marks,
            } => {
                let labels = [
                    axis_labels[0].as_str(),
                    axis_labels[1].as_str(),
                    axis_labels[2].as_str(),
                ];
                render_scatter3d_png(title, labels, points, temperature, marks, style)
            }
        }
    }
}

const ORANGE: RGBColor = RGBColor(255, 165, 0);

/// Indices of the first minimum and the first maximum.
pub fn arg_extrema(values: &[f64]) -> Option<(usize, usize)> {
    let first = *values.first()?;
    let (lo, hi, _, _) = values.iter().enumerate().skip(1).fold(
        (0, 0, first, first),
        |(lo, hi, min, max), (idx, v)| {
            let (lo, min) = if *v < min { (idx, *v) } else { (lo, min) };
            let (hi, max) = if *v > max { (idx, *v) } else { (hi, max) };
            (lo, hi, min, max)
        },
    );
    Some((lo, hi))
}

fn cloud(title: &str, labels: [&str; 3], xs: &[f64], ys: &[f64], t: &[f64]) -> Chart {
    let mark = |k: usize, color: RGBColor| Mark3d {
        at: (xs[k], ys[k], t[k]),
        text: format!("{:.2e}{}", ys[k], labels[1]),
        color,
    };
    let marks = match arg_extrema(ys) {
        Some((lo, hi)) if lo < xs.len() && hi < xs.len() && lo < t.len() && hi < t.len() => {
            vec![mark(hi, RED), mark(lo, ORANGE)]
        }
        _ => Vec::new(),
    };
    Chart::Cloud {
        title: title.to_owned(),
        axis_labels: labels.map(str::to_owned),
        points: xs
            .iter()
            .zip(ys)
            .zip(t)
            .map(|((x, y), z)| (*x, *y, *z))
            .collect(),
        temperature: t.to_vec(),
        marks,
    }
}

fn pairs(xs: &[f64], ys: &[f64]) -> Vec<(f64, f64)> {
    xs.iter().copied().zip(ys.iter().copied()).collect()
}

/// Picks the charts that make sense for the run: sweeps at varying temperature, a fixed
/// temperature characteristic, or a fixed current cooldown. Currents are in mA.
pub fn plot_set(series: &MeasurementSeries) -> Vec<Chart> {
    if series.is_empty() {
        return Vec::new();
    }
    let class = classify(series);
    let i_ma: Vec<f64> = series.current.iter().map(|i| i * MILLI).collect();
    let j_ma: Vec<f64> = series.current_density.iter().map(|j| j * MILLI).collect();
    let t = &series.temperature;
    let v = &series.voltage;
    let rho = &series.resistivity;
    let mut charts = Vec::new();

    match (class.fixed_temperature, class.fixed_current) {
        (false, false) => {
            if let Some(cycles) = current_cycles(series) {
                let mut vi = ScatterPlot::new("V vs I", "mA", "V");
                let mut rj = ScatterPlot::new("RHO vs J", "mA/cm2", "Ohm cm");
                for &(a, b) in &cycles {
                    let range = a.min(b)..a.max(b);
                    let label = format!("{:.0} K", mean(&t[range.clone()]));
                    vi = vi.series(label.clone(), pairs(&i_ma[range.clone()], &v[range.clone()]), false);
                    rj = rj.series(label, pairs(&j_ma[range.clone()], &rho[range]), false);
                }
                charts.push(Chart::Flat(vi));
                charts.push(Chart::Flat(rj));

                if let Some(&(first_min, first_max)) = cycles.first() {
                    let mut rt = ScatterPlot::new("RHO vs T", "K", "Ohm cm");
                    for step in (0..=first_max.max(first_min)).step_by(RHO_T_STEP) {
                        let points: Vec<(f64, f64)> = cycles
                            .iter()
                            .map(|&(a, _)| a + step)
                            .filter(|&k| k < series.len())
                            .map(|k| (t[k], rho[k]))
                            .collect();
                        let Some(&density) = j_ma.get(first_min + step) else {
                            continue;
                        };
                        rt = rt.series(format!("{density:.2} mA/cm2"), points, true);
                    }
                    charts.push(Chart::Flat(rt));
                }
            }
            charts.push(cloud(
                "V vs I and Temperature",
                ["mA", "V", "K"],
                &i_ma,
                v,
                t,
            ));
            charts.push(cloud(
                "E vs J and Temperature",
                ["mA/cm2", "V/cm", "K"],
                &j_ma,
                &series.electric_field,
                t,
            ));
            charts.push(cloud(
                "Rho vs J and Temperature",
                ["mA/cm2", "Ohm cm", "K"],
                &j_ma,
                rho,
                t,
            ));
        }
        (true, false) => {
            let last = series.len() - 1;
            let vi = ScatterPlot::new("V-I Characteristics", "mA", "V")
                .series("", pairs(&i_ma, v), true)
                .annotate(i_ma[0], v[0], "Start")
                .annotate(i_ma[last], v[last], "End");
            let rj = ScatterPlot::new("Resistivity vs J", "mA/cm2", "Ohm cm")
                .series("", pairs(&j_ma, rho), true)
                .annotate(j_ma[0], rho[0], "Start")
                .annotate(j_ma[last], rho[last], "End");
            charts.push(Chart::Flat(vi));
            charts.push(Chart::Flat(rj));
        }
        (false, true) => {
            charts.push(Chart::Flat(
                ScatterPlot::new("Voltage vs Temperature", "K", "V")
                    .log_y()
                    .series("", pairs(t, v), true),
            ));
            charts.push(Chart::Flat(
                ScatterPlot::new("Resistivity vs Temperature", "K", "Ohm cm")
                    .log_y()
                    .series("", pairs(t, rho), true),
            ));
        }
        (true, true) => {}
    }
    charts
}

/// Loads `paths` in order, prints their descriptions and renders the plot set into `out_dir`.
pub fn write_plots(paths: &[PathBuf], out_dir: &Path) -> Result<Vec<PathBuf>> {
    let joined = join_runs(paths)?;
    if !joined.description.is_empty() {
        println!("{}", joined.description.trim_end());
    }
    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    let style = PlotStyle::default();
    let mut written = Vec::new();
    for chart in plot_set(&joined.series) {
        let target = out_dir.join(chart.file_name());
        match chart.render_png(&style) {
            Ok(png) => {
                fs::write(&target, png).with_context(|| format!("writing {}", target.display()))?;
                info!("Plot {} saved as {}", chart.title(), target.display());
                written.push(target);
            }
            Err(e) => warn!("Plot {} skipped: {e}", chart.title()),
        }
    }
    Ok(written)
}
