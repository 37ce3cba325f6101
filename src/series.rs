//! Parallel time series written by the acquisition thread and read by the plot.
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Local, TimeZone};

use crate::measure::MeasurementPoint;

/// All sequences have the same length; index `i` is one recorded point.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeasurementSeries {
    /// unix time, seconds
    pub timestamp: Vec<f64>,
    pub temperature: Vec<f64>,
    pub voltage: Vec<f64>,
    pub current: Vec<f64>,
    pub resistance: Vec<f64>,
    pub electric_field: Vec<f64>,
    pub current_density: Vec<f64>,
    pub resistivity: Vec<f64>,
}

impl MeasurementSeries {
    pub fn push(&mut self, timestamp: f64, point: &MeasurementPoint) {
        self.timestamp.push(timestamp);
        self.temperature.push(point.temperature);
        self.voltage.push(point.voltage);
        self.current.push(point.current);
        self.resistance.push(point.resistance);
        self.electric_field.push(point.electric_field);
        self.current_density.push(point.current_density);
        self.resistivity.push(point.resistivity);
    }

    pub fn len(&self) -> usize {
        self.timestamp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp.is_empty()
    }

    /// True when every sequence has the same length.
    pub fn is_consistent(&self) -> bool {
        let n = self.timestamp.len();
        [
            &self.temperature,
            &self.voltage,
            &self.current,
            &self.resistance,
            &self.electric_field,
            &self.current_density,
            &self.resistivity,
        ]
        .iter()
        .all(|s| s.len() == n)
    }

    /// The last `n` points (or all of them when shorter).
    pub fn tail(&self, n: usize) -> MeasurementSeries {
        let start = self.len().saturating_sub(n);
        MeasurementSeries {
            timestamp: self.timestamp[start..].to_vec(),
            temperature: self.temperature[start..].to_vec(),
            voltage: self.voltage[start..].to_vec(),
            current: self.current[start..].to_vec(),
            resistance: self.resistance[start..].to_vec(),
            electric_field: self.electric_field[start..].to_vec(),
            current_density: self.current_density[start..].to_vec(),
            resistivity: self.resistivity[start..].to_vec(),
        }
    }

    pub fn extend(&mut self, other: &MeasurementSeries) {
        self.timestamp.extend_from_slice(&other.timestamp);
        self.temperature.extend_from_slice(&other.temperature);
        self.voltage.extend_from_slice(&other.voltage);
        self.current.extend_from_slice(&other.current);
        self.resistance.extend_from_slice(&other.resistance);
        self.electric_field.extend_from_slice(&other.electric_field);
        self.current_density.extend_from_slice(&other.current_density);
        self.resistivity.extend_from_slice(&other.resistivity);
    }

    pub fn summary(&self) -> Option<RunSummary> {
        if self.is_empty() {
            return None;
        }
        let first = *self.timestamp.first()?;
        let last = *self.timestamp.last()?;
        Some(RunSummary {
            start: local_time(first),
            end: local_time(last),
            temperature_start: *self.temperature.first()?,
            temperature_end: *self.temperature.last()?,
            resistivity: Stats::of(&self.resistivity, &self.temperature)?,
            voltage: Stats::of(&self.voltage, &self.temperature)?,
        })
    }
}

pub fn local_time(unix_seconds: f64) -> DateTime<Local> {
    let secs = unix_seconds.floor();
    let nanos = ((unix_seconds - secs) * 1e9) as u32;
    Local
        .timestamp_opt(secs as i64, nanos.min(999_999_999))
        .single()
        .unwrap_or_else(Local::now)
}

pub fn now_unix_seconds() -> f64 {
    let now = Local::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) * 1e-6
}

/// Average, minimum and maximum of one quantity, with the temperature at each extremum.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stats {
    pub average: f64,
    pub minimum: f64,
    pub minimum_at: f64,
    pub maximum: f64,
    pub maximum_at: f64,
}

impl Stats {
    fn of(values: &[f64], temperature: &[f64]) -> Option<Self> {
        let (imin, min) = values
            .iter()
            .copied()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(&b.1))?;
        // max_by keeps the last of equal elements; walk backwards to report the first
        let (imax, max) = values
            .iter()
            .copied()
            .enumerate()
            .rev()
            .max_by(|a, b| a.1.total_cmp(&b.1))?;
        Some(Self {
            average: values.iter().sum::<f64>() / values.len() as f64,
            minimum: min,
            minimum_at: *temperature.get(imin)?,
            maximum: max,
            maximum_at: *temperature.get(imax)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
    pub temperature_start: f64,
    pub temperature_end: f64,
    pub resistivity: Stats,
    pub voltage: Stats,
}

/// Creates the writer/reader pair around one empty series.
pub fn channel() -> (SeriesWriter, SeriesReader) {
    let shared = Arc::new(RwLock::new(MeasurementSeries::default()));
    (
        SeriesWriter {
            inner: Arc::clone(&shared),
        },
        SeriesReader { inner: shared },
    )
}

/// Unique appending handle, owned by the acquisition thread.
pub struct SeriesWriter {
    inner: Arc<RwLock<MeasurementSeries>>,
}

impl SeriesWriter {
    pub fn append(&mut self, timestamp: f64, point: &MeasurementPoint) {
        write_lock(&self.inner).push(timestamp, point);
    }

    pub(crate) fn len(&self) -> usize {
        read_lock(&self.inner).len()
    }
}

/// Read-only view for the plot and the close handler.
#[derive(Clone)]
pub struct SeriesReader {
    inner: Arc<RwLock<MeasurementSeries>>,
}

impl SeriesReader {
    pub fn len(&self) -> usize {
        read_lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tail(&self, n: usize) -> MeasurementSeries {
        read_lock(&self.inner).tail(n)
    }

    pub fn snapshot(&self) -> MeasurementSeries {
        read_lock(&self.inner).clone()
    }
}

// A panic in the other thread must not take the recorded data with it.
fn read_lock(lock: &RwLock<MeasurementSeries>) -> RwLockReadGuard<'_, MeasurementSeries> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock(lock: &RwLock<MeasurementSeries>) -> RwLockWriteGuard<'_, MeasurementSeries> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(v: f64, t: f64) -> MeasurementPoint {
        MeasurementPoint {
            temperature: t,
            voltage: v,
            current: 1.0,
            resistance: v,
            electric_field: v,
            current_density: 1.0,
            resistivity: v * 2.0,
        }
    }

    #[test]
    fn reader_sees_writer_appends() {
        let (mut writer, reader) = channel();
        assert!(reader.is_empty());
        for i in 0..5 {
            writer.append(1_700_000_000.0 + i as f64, &point(i as f64, 300.0 - i as f64));
        }
        assert_eq!(reader.len(), 5);
        let tail = reader.tail(2);
        assert_eq!(tail.voltage, vec![3.0, 4.0]);
        assert!(tail.is_consistent());
        assert_eq!(reader.tail(50).len(), 5);
    }

    #[test]
    fn summary_reports_extrema_with_temperature() {
        let mut series = MeasurementSeries::default();
        series.push(10.0, &point(2.0, 300.0));
        series.push(20.0, &point(-1.0, 250.0));
        series.push(30.0, &point(5.0, 200.0));
        let summary = series.summary().unwrap();
        assert_eq!(summary.temperature_start, 300.0);
        assert_eq!(summary.temperature_end, 200.0);
        assert_eq!(summary.voltage.minimum, -1.0);
        assert_eq!(summary.voltage.minimum_at, 250.0);
        assert_eq!(summary.voltage.maximum_at, 200.0);
        assert_eq!(summary.resistivity.average, 4.0);
        assert!(MeasurementSeries::default().summary().is_none());
    }

    #[test]
    fn ties_report_the_first_extremum() {
        let mut series = MeasurementSeries::default();
        series.push(10.0, &point(5.0, 300.0));
        series.push(20.0, &point(1.0, 250.0));
        series.push(30.0, &point(5.0, 200.0));
        series.push(40.0, &point(1.0, 150.0));
        let summary = series.summary().unwrap();
        assert_eq!(summary.voltage.maximum_at, 300.0);
        assert_eq!(summary.voltage.minimum_at, 250.0);
        assert_eq!(summary.resistivity.maximum_at, 300.0);
    }

    #[test]
    fn extend_concatenates_in_order() {
        let mut a = MeasurementSeries::default();
        a.push(1.0, &point(1.0, 10.0));
        let mut b = MeasurementSeries::default();
        b.push(2.0, &point(2.0, 20.0));
        a.extend(&b);
        assert_eq!(a.timestamp, vec![1.0, 2.0]);
        assert_eq!(a.temperature, vec![10.0, 20.0]);
    }
}
