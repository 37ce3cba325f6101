// src/recorder.rs
use std::ffi::OsString;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::{error, info, warn};

use crate::archive;
use crate::config::ExperimentConfig;
use crate::drivers::{render_session_png, PlotStyle};
use crate::series::{MeasurementSeries, RunSummary};
use crate::sweep::SweepPlan;

/// Writes one finished run next to the others of the same sample and title.
pub struct SessionRecorder {
    run_path: PathBuf,
    stamp: String,
}

impl SessionRecorder {
    /// `<output_dir>/<sample>/<stem>/<stem>-<YYYYmmddHHMMSS>`
    pub fn new(output_dir: &Path, sample: &str, stem: &str, at: DateTime<Local>) -> Self {
        let stamp = at.format("%Y%m%d%H%M%S").to_string();
        let run_path = output_dir
            .join(sample)
            .join(stem)
            .join(format!("{stem}-{stamp}"));
        Self { run_path, stamp }
    }

    pub fn for_plan(config: &ExperimentConfig, plan: &SweepPlan, at: DateTime<Local>) -> Self {
        Self::new(&config.output_dir, &config.sample_name, &plan.file_stem(), at)
    }

    /// Run file with `extension`; the description itself has no extension.
    pub fn file(&self, extension: &str) -> PathBuf {
        with_suffix(&self.run_path, extension)
    }

    pub fn describe(
        &self,
        config: &ExperimentConfig,
        plan: &SweepPlan,
        summary: &RunSummary,
    ) -> String {
        let mut text = String::new();
        // 1. 样品与源
        text.push_str(&config.description);
        writeln!(text).ok();
        writeln!(text, "Name of the sample: {}", config.sample_name).ok();
        writeln!(text, "Area: {}cm2", config.area).ok();
        writeln!(text, "Length: {}cm", config.length).ok();
        writeln!(text, "{}", plan.source_description(config)).ok();
        // 2. 时间与温度
        writeln!(text, "\n### Experiment {} ###", self.stamp).ok();
        writeln!(
            text,
            "Date {} start at {} end at {} duration {}",
            summary.start.format("%Y-%m-%d"),
            summary.start.format("%H:%M:%S"),
            summary.end.format("%H:%M:%S"),
            format_duration(summary.end.timestamp() - summary.start.timestamp())
        )
        .ok();
        writeln!(
            text,
            "Temperature range from {:.2}K to {:.2}K",
            summary.temperature_start, summary.temperature_end
        )
        .ok();
        // 3. 统计
        for (name, unit, stats) in [
            ("Resistivity", "Ohm cm", &summary.resistivity),
            ("Voltage", "V", &summary.voltage),
        ] {
            writeln!(text, "{name}:").ok();
            writeln!(text, "\t average {:.4e}{unit}", stats.average).ok();
            writeln!(text, "\t minimum {:.4e}{unit} at {:.2}K", stats.minimum, stats.minimum_at).ok();
            writeln!(text, "\t maximum {:.4e}{unit} at {:.2}K", stats.maximum, stats.maximum_at).ok();
        }
        text
    }

    /// Writes description, `.npz`, `.csv`, `.png` and a copy of the log.
    ///
    /// Returns `None` without touching the disk when no point was recorded.
    pub fn save(
        &self,
        config: &ExperimentConfig,
        plan: &SweepPlan,
        series: &MeasurementSeries,
        log_file: Option<&Path>,
    ) -> Result<Option<PathBuf>> {
        let Some(summary) = series.summary() else {
            warn!("Data empty");
            return Ok(None);
        };
        if let Some(dir) = self.run_path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("cannot create {}", dir.display()))?;
        }

        // 1. 描述文件
        info!("Save the description file");
        if let Err(e) = self.append_description(&self.describe(config, plan, &summary)) {
            error!("Error handling description file: {e:#}");
        }

        // 2. numpy 压缩格式
        let npz = self.file("npz");
        info!("Save data in numpy format {}", npz.display());
        archive::write_npz(&npz, series).with_context(|| format!("saving {}", npz.display()))?;

        // 3. CSV
        let csv = self.file("csv");
        info!("Save data in CSV format {}", csv.display());
        archive::write_csv(&csv, series).with_context(|| format!("saving {}", csv.display()))?;

        // 4. 曲线图
        let png = self.file("png");
        info!("Save plot as image {}", png.display());
        let image = render_session_png(series, &plan.title, plan.mode, &PlotStyle::session())
            .context("rendering the session plot")?;
        fs::write(&png, image).with_context(|| format!("saving {}", png.display()))?;

        // 5. 日志副本
        if let Some(log_file) = log_file {
            let copy = self.file("log");
            if let Err(e) = fs::copy(log_file, &copy) {
                warn!("Cannot copy {} to {}: {e}", log_file.display(), copy.display());
            }
        }
        Ok(Some(self.run_path.clone()))
    }

    fn append_description(&self, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.run_path)
            .with_context(|| format!("opening {}", self.run_path.display()))?;
        file.write_all(text.as_bytes())?;
        Ok(())
    }
}

/// `path` with `.ext` appended; titles may contain dots, so `with_extension` is not usable.
pub fn with_suffix(path: &Path, extension: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

/// `H:MM:SS`, hours unbounded.
pub fn format_duration(seconds: i64) -> String {
    let s = seconds.max(0);
    format!("{}:{:02}:{:02}", s / 3600, (s / 60) % 60, s % 60)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::measure::{derive, Geometry};
    use crate::types::SourceMode;

    fn config(output_dir: &Path) -> ExperimentConfig {
        let text = format!(
            r#"
sample_name = "CA12X2"
description = "Cooldown in helium"
area = 2.0
length = 0.5
avg_measure = 1
limit = 10.0
output_dir = "{}"

[source]
mode = "current"
samples = 4
flipped = true
shape = "ramp"
min = 0.001
max = 0.002
"#,
            output_dir.display()
        );
        ExperimentConfig::from_toml_str(&text).unwrap()
    }

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
    }

    #[test]
    fn run_path_follows_sample_and_title() {
        let recorder = SessionRecorder::new(Path::new("/data"), "S1", "S1_current_ramp", at());
        assert_eq!(
            recorder.file("npz"),
            Path::new("/data/S1/S1_current_ramp/S1_current_ramp-20240305140709.npz")
        );
        assert_eq!(
            with_suffix(Path::new("/d/S1_from_0.001_to_1A"), "npz"),
            PathBuf::from("/d/S1_from_0.001_to_1A.npz")
        );
    }

    #[test]
    fn durations_are_h_mm_ss() {
        assert_eq!(format_duration(0), "0:00:00");
        assert_eq!(format_duration(3_725), "1:02:05");
        assert_eq!(format_duration(90_000), "25:00:00");
    }

    #[test]
    fn empty_series_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let plan = SweepPlan::from_config(&cfg);
        let recorder = SessionRecorder::for_plan(&cfg, &plan, at());
        let saved = recorder
            .save(&cfg, &plan, &MeasurementSeries::default(), None)
            .unwrap();
        assert!(saved.is_none());
        assert!(!dir.path().join("CA12X2").exists());
    }

    #[test]
    fn describes_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let plan = SweepPlan::from_config(&cfg);
        let g = Geometry { area: 2.0, length: 0.5 };
        let mut series = MeasurementSeries::default();
        let start = at().timestamp() as f64;
        series.push(start, &derive(SourceMode::Current, 1e-3, 0.1, 290.0, &g));
        series.push(start + 65.0, &derive(SourceMode::Current, 2e-3, 0.4, 280.0, &g));
        let recorder = SessionRecorder::for_plan(&cfg, &plan, at());
        let text = recorder.describe(&cfg, &plan, &series.summary().unwrap());
        assert!(text.starts_with("Cooldown in helium\nName of the sample: CA12X2"));
        assert!(text.contains("\nArea: 2cm2\nLength: 0.5cm"));
        assert!(text.contains("Current source starts and ends at 0.001A through 0.002A"));
        assert!(text.contains("### Experiment 20240305140709 ###"));
        assert!(text.contains("start at 14:07:09 end at 14:08:14 duration 0:01:05"));
        assert!(text.contains("Temperature range from 290.00K to 280.00K"));
        assert!(text.contains("maximum 4.0000e-1V at 280.00K"));
    }
}
