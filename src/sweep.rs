//! Source sweep: the ordered setpoints applied during one measurement loop.
use log::info;

use crate::config::{ExperimentConfig, SourceShape};
use crate::types::SourceMode;

/// Extra room in the live plot window relative to one sweep.
const DISPLAY_MARGIN: f64 = 1.15;

#[derive(Clone, Debug, PartialEq)]
pub struct SweepPlan {
    pub mode: SourceMode,
    pub setpoints: Vec<f64>,
    pub flipped: bool,
    pub title: String,
    /// Points kept in the live plot window.
    pub display_samples: usize,
}

pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { end } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// 50 % duty square wave with `period` cycles over `n` samples of `t ∈ [0, 1]`.
pub fn square_wave(value: f64, period: u32, n: usize) -> Vec<f64> {
    linspace(0.0, 1.0, n)
        .into_iter()
        .map(|t| {
            if (period as f64 * t).fract() < 0.5 {
                value
            } else {
                -value
            }
        })
        .collect()
}

/// The sweep followed by its mirror image when `flipped`.
pub fn apply_flip(points: Vec<f64>, flipped: bool) -> Vec<f64> {
    if !flipped {
        return points;
    }
    let mut out = points.clone();
    out.extend(points.iter().rev());
    out
}

impl SweepPlan {
    pub fn from_config(config: &ExperimentConfig) -> Self {
        let mode = config.source.mode;
        let samples = config.source.samples;
        let sample = &config.sample_name;
        let (quantity, unit) = (mode.quantity(), mode.unit());
        let mut flipped = config.source.flipped;
        let (points, mut title) = match config.source.shape {
            SourceShape::Fixed { value } => {
                flipped = false;
                (
                    vec![value; samples],
                    format!("{sample} at fixed {quantity} {value}{unit}"),
                )
            }
            SourceShape::SquareWave { value, period } => {
                flipped = false;
                (
                    square_wave(value, period, samples),
                    format!("{sample} {quantity} square waveform value {value}{unit}"),
                )
            }
            SourceShape::Ramp { min, max } => (
                linspace(min, max, samples),
                format!("{sample} {quantity} from {min} to {max}{unit}"),
            ),
        };
        let mut display_samples = (samples as f64 * DISPLAY_MARGIN) as usize;
        if flipped {
            display_samples *= 2;
            title.push_str(" flipped");
            info!("Source is flipped");
        }
        Self {
            mode,
            setpoints: apply_flip(points, flipped),
            flipped,
            title,
            display_samples,
        }
    }

    pub fn first_setpoint(&self) -> f64 {
        self.setpoints.first().copied().unwrap_or(0.0)
    }

    /// Title with spaces replaced, used for directory and file names.
    pub fn file_stem(&self) -> String {
        self.title.replace(' ', "_")
    }

    /// One line describing the source program, for the run description file.
    pub fn source_description(&self, config: &ExperimentConfig) -> String {
        let label = match self.mode {
            SourceMode::Current => "Current",
            SourceMode::Voltage => "Voltage",
        };
        let unit = self.mode.unit();
        match config.source.shape {
            SourceShape::Fixed { value } => format!("{label} source fixed at {value}{unit}"),
            SourceShape::SquareWave { value, .. } => {
                format!("{label} square waveform source, value {value}{unit}")
            }
            SourceShape::Ramp { min, max } if self.flipped => {
                format!("{label} source starts and ends at {min}{unit} through {max}{unit}")
            }
            SourceShape::Ramp { min, max } => {
                format!("{label} source from {min}{unit} to {max}{unit}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(shape: &str, flipped: bool) -> ExperimentConfig {
        let text = format!(
            r#"
sample_name = "S1"
area = 1.0
length = 1.0
avg_measure = 1
limit = 5.0

[source]
mode = "voltage"
samples = 20
flipped = {flipped}
{shape}
"#
        );
        ExperimentConfig::from_toml_str(&text).unwrap()
    }

    #[test]
    fn linspace_includes_both_ends() {
        assert_eq!(linspace(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(linspace(2.0, 3.0, 1), vec![2.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn flip_appends_reverse_or_leaves_unchanged() {
        let base = vec![1.0, 2.0, 3.0];
        assert_eq!(
            apply_flip(base.clone(), true),
            vec![1.0, 2.0, 3.0, 3.0, 2.0, 1.0]
        );
        assert_eq!(apply_flip(base.clone(), false), base);
        assert!(apply_flip(Vec::new(), true).is_empty());
    }

    #[test]
    fn square_wave_alternates() {
        let wave = square_wave(2.0, 2, 9);
        assert_eq!(wave, vec![2.0, 2.0, -2.0, -2.0, 2.0, 2.0, -2.0, -2.0, 2.0]);
    }

    #[test]
    fn flipped_ramp_doubles_points_and_window() {
        let plan = SweepPlan::from_config(&config("shape = \"ramp\"\nmin = 0\nmax = 1", true));
        assert_eq!(plan.setpoints.len(), 40);
        assert_eq!(plan.setpoints[19], 1.0);
        assert_eq!(plan.setpoints[20], 1.0);
        assert_eq!(plan.display_samples, 46);
        assert_eq!(plan.title, "S1 voltage from 0 to 1V flipped");
        assert_eq!(plan.file_stem(), "S1_voltage_from_0_to_1V_flipped");
    }

    #[test]
    fn fixed_source_never_flips() {
        let plan = SweepPlan::from_config(&config("shape = \"fixed\"\nvalue = 0.5", true));
        assert!(!plan.flipped);
        assert_eq!(plan.setpoints, vec![0.5; 20]);
        assert_eq!(plan.display_samples, 23);
        assert_eq!(plan.title, "S1 at fixed voltage 0.5V");
        assert_eq!(plan.first_setpoint(), 0.5);
    }

    #[test]
    fn titles_print_setpoints_in_decimal() {
        let plan = SweepPlan::from_config(&config("shape = \"ramp\"\nmin = -1e-3\nmax = 2.5e-3", false));
        assert_eq!(plan.title, "S1 voltage from -0.001 to 0.0025V");
    }
}
