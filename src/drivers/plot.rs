use std::io::Cursor;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::coord::ranged1d::ValueFormatter;
use plotters::coord::types::RangedCoordf64;
use plotters::coord::Shift;
use plotters::prelude::*;

use crate::drivers::error::BenchError;
use crate::series::MeasurementSeries;
use crate::types::SourceMode;

#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub palette: Vec<RGBColor>,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 900,
            height: 600,
            background: RGBColor(10, 10, 10),
            palette: vec![BLUE, RED, GREEN, CYAN, MAGENTA, YELLOW, WHITE],
        }
    }
}

impl PlotStyle {
    pub fn session() -> Self {
        Self {
            height: 900,
            ..Self::default()
        }
    }

    fn color(&self, idx: usize) -> RGBColor {
        self.palette[idx % self.palette.len().max(1)]
    }
}

/// Axis range covering `values`, padded by 5 %; flat or empty data gets a unit window.
pub fn padded_bounds(values: impl IntoIterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if !lo.is_finite() {
        return (0.0, 1.0);
    }
    let span = hi - lo;
    if span <= f64::EPSILON * lo.abs().max(1.0) {
        let half = (lo.abs() * 0.05).max(0.5);
        return (lo - half, hi + half);
    }
    (lo - span * 0.05, hi + span * 0.05)
}

/// Minutes since the first timestamp.
pub fn elapsed_minutes(timestamps: &[f64]) -> Vec<f64> {
    let t0 = timestamps.first().copied().unwrap_or(0.0);
    timestamps.iter().map(|t| (t - t0) / 60.0).collect()
}

/// Resistance, probe quantity and temperature against elapsed time, stacked.
pub fn render_session_png(
    series: &MeasurementSeries,
    title: &str,
    mode: SourceMode,
    style: &PlotStyle,
) -> Result<Vec<u8>, BenchError> {
    if series.is_empty() {
        return Err(BenchError::Plot("measurement series has no points".into()));
    }
    let minutes = elapsed_minutes(&series.timestamp);
    let probe = match mode {
        SourceMode::Current => series.voltage.as_slice(),
        SourceMode::Voltage => series.current.as_slice(),
    };
    let panels: [(&str, &str, &[f64]); 3] = [
        (title, "Resistance [Ohm]", series.resistance.as_slice()),
        ("", mode.probe_label(), probe),
        ("", "Temperature [K]", series.temperature.as_slice()),
    ];

    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let areas = root.split_evenly((3, 1));
        for (idx, (area, (caption, y_label, values))) in areas.iter().zip(panels).enumerate() {
            let x_label = if idx == 2 { "Time [min]" } else { "" };
            draw_time_panel(area, caption, x_label, y_label, &minutes, values, style.color(idx))?;
        }
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}

fn draw_time_panel(
    area: &DrawingArea<BitMapBackend<'_>, Shift>,
    caption: &str,
    x_label: &str,
    y_label: &str,
    minutes: &[f64],
    values: &[f64],
    color: RGBColor,
) -> Result<(), BenchError> {
    let (x_min, x_max) = padded_bounds(minutes.iter().copied());
    let (y_min, y_max) = padded_bounds(values.iter().copied());
    let mut builder = ChartBuilder::on(area);
    builder
        .margin(10)
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 35);
    if !caption.is_empty() {
        builder.caption(caption, ("sans-serif", 20).into_font().color(&WHITE));
    }
    let mut chart = builder.build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    chart
        .configure_mesh()
        .light_line_style(&WHITE.mix(0.1))
        .axis_desc_style(("sans-serif", 14).into_font().color(&WHITE))
        .label_style(("sans-serif", 12).into_font().color(&WHITE))
        .x_desc(x_label)
        .y_desc(y_label)
        .draw()?;
    let points = minutes.iter().copied().zip(values.iter().copied());
    chart.draw_series(LineSeries::new(points.clone(), &color))?;
    chart.draw_series(points.map(|p| Circle::new(p, 2, color.filled())))?;
    Ok(())
}

/// One named set of points in a [`ScatterPlot`].
#[derive(Clone, Debug)]
pub struct ScatterSeries {
    pub label: String,
    pub points: Vec<(f64, f64)>,
    /// join the markers with a line
    pub connected: bool,
}

/// Two-dimensional scatter/line chart with optional log y axis and text labels.
#[derive(Clone, Debug, Default)]
pub struct ScatterPlot {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub log_y: bool,
    pub series: Vec<ScatterSeries>,
    pub annotations: Vec<(f64, f64, String)>,
}

impl ScatterPlot {
    pub fn new(title: impl Into<String>, x_label: impl Into<String>, y_label: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            x_label: x_label.into(),
            y_label: y_label.into(),
            ..Self::default()
        }
    }

    pub fn log_y(mut self) -> Self {
        self.log_y = true;
        self
    }

    pub fn series(mut self, label: impl Into<String>, points: Vec<(f64, f64)>, connected: bool) -> Self {
        self.series.push(ScatterSeries {
            label: label.into(),
            points,
            connected,
        });
        self
    }

    pub fn annotate(mut self, x: f64, y: f64, text: impl Into<String>) -> Self {
        self.annotations.push((x, y, text.into()));
        self
    }

    pub fn render_png(&self, style: &PlotStyle) -> Result<Vec<u8>, BenchError> {
        if self.series.iter().all(|s| s.points.is_empty()) {
            return Err(BenchError::Plot(format!("{}: nothing to plot", self.title)));
        }
        let xs = self.series.iter().flat_map(|s| s.points.iter().map(|p| p.0));
        let (x_min, x_max) = padded_bounds(xs);

        let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
        {
            let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
                .into_drawing_area();
            root.fill(&style.background)?;
            let mut builder = ChartBuilder::on(&root);
            builder
                .margin(15)
                .caption(&self.title, ("sans-serif", 20).into_font().color(&WHITE))
                .set_label_area_size(LabelAreaPosition::Left, 80)
                .set_label_area_size(LabelAreaPosition::Bottom, 45);
            if self.log_y {
                let ys = self
                    .series
                    .iter()
                    .flat_map(|s| s.points.iter().map(|p| p.1.abs()))
                    .filter(|v| *v > 0.0);
                let (lo, hi) = padded_bounds(ys);
                let lo = if lo > 0.0 { lo } else { hi.abs().max(1.0) * 1e-6 };
                let mut chart =
                    builder.build_cartesian_2d(x_min..x_max, (lo..hi.max(lo * 10.0)).log_scale())?;
                self.draw_into(&mut chart, style, true)?;
            } else {
                let ys = self.series.iter().flat_map(|s| s.points.iter().map(|p| p.1));
                let (y_min, y_max) = padded_bounds(ys);
                let mut chart = builder.build_cartesian_2d(x_min..x_max, y_min..y_max)?;
                self.draw_into(&mut chart, style, false)?;
            }
            root.present()?;
        }
        encode_png(&buffer, style.width, style.height)
    }

    fn draw_into<'a, Y>(
        &self,
        chart: &mut ChartContext<'a, BitMapBackend<'a>, Cartesian2d<RangedCoordf64, Y>>,
        style: &PlotStyle,
        magnitude: bool,
    ) -> Result<(), BenchError>
    where
        Y: Ranged<ValueType = f64> + ValueFormatter<f64>,
    {
        chart
            .configure_mesh()
            .light_line_style(&WHITE.mix(0.1))
            .axis_desc_style(("sans-serif", 14).into_font().color(&WHITE))
            .label_style(("sans-serif", 12).into_font().color(&WHITE))
            .x_desc(self.x_label.as_str())
            .y_desc(self.y_label.as_str())
            .draw()?;
        let y_of = |y: f64| if magnitude { y.abs() } else { y };
        for (idx, s) in self.series.iter().enumerate() {
            let color = style.color(idx);
            let points: Vec<(f64, f64)> = s
                .points
                .iter()
                .map(|&(x, y)| (x, y_of(y)))
                .filter(|&(_, y)| !magnitude || y > 0.0)
                .collect();
            if s.connected {
                chart.draw_series(LineSeries::new(points.clone(), &color))?;
            }
            chart
                .draw_series(points.into_iter().map(|p| Circle::new(p, 3, color.filled())))?
                .label(s.label.clone())
                .legend(move |(x, y)| Circle::new((x + 10, y), 4, color.filled()));
        }
        for (x, y, text) in &self.annotations {
            chart.draw_series(std::iter::once(Text::new(
                text.clone(),
                (*x, y_of(*y)),
                ("sans-serif", 14).into_font().color(&YELLOW),
            )))?;
        }
        if self.series.iter().any(|s| !s.label.is_empty()) {
            chart
                .configure_series_labels()
                .label_font(("sans-serif", 12).into_font().color(&WHITE))
                .border_style(&WHITE.mix(0.2))
                .background_style(&style.background)
                .draw()?;
        }
        Ok(())
    }
}

/// Maps a value in `[lo, hi]` to a blue (low) .. red (high) colour.
pub fn heat_color(value: f64, lo: f64, hi: f64) -> HSLColor {
    let t = if hi > lo {
        ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
    } else {
        0.5
    };
    HSLColor((1.0 - t) * 0.66, 0.9, 0.5)
}

/// Text label placed at a point of a 3-D scatter.
#[derive(Clone, Debug, PartialEq)]
pub struct Mark3d {
    pub at: (f64, f64, f64),
    pub text: String,
    pub color: RGBColor,
}

/// Three-dimensional scatter, each point coloured by `color_by` (temperature).
pub fn render_scatter3d_png(
    title: &str,
    axis_labels: [&str; 3],
    points: &[(f64, f64, f64)],
    color_by: &[f64],
    marks: &[Mark3d],
    style: &PlotStyle,
) -> Result<Vec<u8>, BenchError> {
    if points.is_empty() || points.len() != color_by.len() {
        return Err(BenchError::Plot(format!("{title}: nothing to plot")));
    }
    let (x_min, x_max) = padded_bounds(points.iter().map(|p| p.0));
    let (y_min, y_max) = padded_bounds(points.iter().map(|p| p.1));
    let (z_min, z_max) = padded_bounds(points.iter().map(|p| p.2));
    let (c_lo, c_hi) = color_by
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });

    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let mut chart = ChartBuilder::on(&root)
            .margin(20)
            .caption(title, ("sans-serif", 20).into_font().color(&WHITE))
            .build_cartesian_3d(x_min..x_max, y_min..y_max, z_min..z_max)?;
        chart.with_projection(|mut pb| {
            pb.yaw = 0.6;
            pb.pitch = 0.3;
            pb.scale = 0.85;
            pb.into_matrix()
        });
        chart
            .configure_axes()
            .light_grid_style(&WHITE.mix(0.1))
            .label_style(("sans-serif", 11).into_font().color(&WHITE))
            .max_light_lines(4)
            .draw()?;
        chart.draw_series(
            points
                .iter()
                .zip(color_by)
                .map(|(&p, &c)| Circle::new(p, 3, heat_color(c, c_lo, c_hi).filled())),
        )?;
        chart.draw_series(marks.iter().map(|m| {
            Text::new(
                m.text.clone(),
                m.at,
                ("sans-serif", 13).into_font().color(&m.color),
            )
        }))?;
        let label_style = ("sans-serif", 14).into_font().color(&WHITE);
        let h = style.height as i32;
        let legend = format!(
            "x: {}   y: {}   z: {}   colour: {:.1} K .. {:.1} K",
            axis_labels[0], axis_labels[1], axis_labels[2], c_lo, c_hi
        );
        root.draw(&Text::new(legend, (20, h - 30), label_style))?;
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}

pub fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, BenchError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| BenchError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}
