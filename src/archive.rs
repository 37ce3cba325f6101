//! On-disk formats of a run: compressed `.npz` arrays and a flat CSV table.
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::Array1;
use ndarray_npy::{NpzReader, NpzWriter, ReadNpzError, WriteNpzError};
use serde::Serialize;
use thiserror::Error;

use crate::series::MeasurementSeries;

/// Array names inside the `.npz`, in the order they are written.
pub const NPZ_KEYS: [&str; 8] = [
    "datetime",
    "temperature",
    "voltage",
    "resistance",
    "current_source",
    "electric_field",
    "current_density",
    "resistivity",
];

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot write npz: {0}")]
    WriteNpz(#[from] WriteNpzError),
    #[error("cannot read npz: {0}")]
    ReadNpz(#[from] ReadNpzError),
    #[error("archive has no '{0}' array")]
    MissingArray(&'static str),
    #[error("arrays in the archive have different lengths")]
    Inconsistent,
    #[error("cannot write csv: {0}")]
    Csv(#[from] csv::Error),
}

fn columns(series: &MeasurementSeries) -> [&Vec<f64>; 8] {
    [
        &series.timestamp,
        &series.temperature,
        &series.voltage,
        &series.resistance,
        &series.current,
        &series.electric_field,
        &series.current_density,
        &series.resistivity,
    ]
}

fn columns_mut(series: &mut MeasurementSeries) -> [&mut Vec<f64>; 8] {
    [
        &mut series.timestamp,
        &mut series.temperature,
        &mut series.voltage,
        &mut series.resistance,
        &mut series.current,
        &mut series.electric_field,
        &mut series.current_density,
        &mut series.resistivity,
    ]
}

pub fn write_npz(path: &Path, series: &MeasurementSeries) -> Result<(), ArchiveError> {
    if !series.is_consistent() {
        return Err(ArchiveError::Inconsistent);
    }
    let file = BufWriter::new(File::create(path)?);
    let mut npz = NpzWriter::new_compressed(file);
    for (key, values) in NPZ_KEYS.iter().zip(columns(series)) {
        npz.add_array(*key, &Array1::from_vec(values.clone()))?;
    }
    npz.finish()?;
    Ok(())
}

/// Number of leading [`NPZ_KEYS`] holding measured (not derived) quantities.
const MEASURED_KEYS: usize = 5;

pub fn read_npz(path: &Path) -> Result<MeasurementSeries, ArchiveError> {
    let series = read_columns(path, false)?;
    if !series.is_consistent() {
        return Err(ArchiveError::Inconsistent);
    }
    Ok(series)
}

/// Like [`read_npz`], but the derived arrays (field, density, resistivity) may be absent
/// and then come back empty.
pub fn read_npz_measured(path: &Path) -> Result<MeasurementSeries, ArchiveError> {
    read_columns(path, true)
}

fn read_columns(path: &Path, derived_optional: bool) -> Result<MeasurementSeries, ArchiveError> {
    let file = BufReader::new(File::open(path)?);
    let mut npz = NpzReader::new(file)?;
    let names = npz.names()?;
    let mut series = MeasurementSeries::default();
    for (idx, (key, target)) in NPZ_KEYS.iter().zip(columns_mut(&mut series)).enumerate() {
        // numpy stores each array as "<key>.npy"
        let found = names
            .iter()
            .find(|n| n.as_str() == *key || n.strip_suffix(".npy") == Some(*key));
        let name = match found {
            Some(name) => name,
            None if derived_optional && idx >= MEASURED_KEYS => continue,
            None => return Err(ArchiveError::MissingArray(*key)),
        };
        let array: Array1<f64> = npz.by_name(name)?;
        *target = array.to_vec();
    }
    let n = series.timestamp.len();
    let measured_ok = [&series.temperature, &series.voltage, &series.resistance, &series.current]
        .iter()
        .all(|s| s.len() == n);
    if !measured_ok {
        return Err(ArchiveError::Inconsistent);
    }
    Ok(series)
}

#[derive(Serialize)]
struct CsvRow {
    #[serde(rename = "Temperature [K]")]
    temperature: f64,
    #[serde(rename = "Voltage [V]")]
    voltage: f64,
    #[serde(rename = "Resistance [Ohm]")]
    resistance: f64,
    #[serde(rename = "Current Source [A]")]
    current: f64,
    #[serde(rename = "Electric Field [V/cm]")]
    electric_field: f64,
    #[serde(rename = "Resistivity [Ohm cm]")]
    resistivity: f64,
    #[serde(rename = "Current Density [A/cm2]")]
    current_density: f64,
}

pub fn write_csv(path: &Path, series: &MeasurementSeries) -> Result<(), ArchiveError> {
    let mut writer = csv::Writer::from_path(path)?;
    for i in 0..series.len() {
        writer.serialize(CsvRow {
            temperature: series.temperature[i],
            voltage: series.voltage[i],
            resistance: series.resistance[i],
            current: series.current[i],
            electric_field: series.electric_field[i],
            resistivity: series.resistivity[i],
            current_density: series.current_density[i],
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::{derive, Geometry};
    use crate::types::SourceMode;

    fn sample_series() -> MeasurementSeries {
        let g = Geometry {
            area: 4.807e-2,
            length: 2.376e-2,
        };
        let mut series = MeasurementSeries::default();
        for (i, (current, volts)) in [(1e-3, 0.1234), (-2.5e-4, -3.3e-2), (7e-6, 1e-7)]
            .into_iter()
            .enumerate()
        {
            let p = derive(SourceMode::Current, current, volts, 80.0 + i as f64 * 0.37, &g);
            series.push(1_700_000_000.123_456 + i as f64 * 1.5, &p);
        }
        series
    }

    #[test]
    fn npz_round_trip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.npz");
        let series = sample_series();
        write_npz(&path, &series).unwrap();
        assert_eq!(read_npz(&path).unwrap(), series);
    }

    #[test]
    fn empty_series_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.npz");
        write_npz(&path, &MeasurementSeries::default()).unwrap();
        assert!(read_npz(&path).unwrap().is_empty());
    }

    #[test]
    fn archive_without_an_array_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.npz");
        let mut npz = NpzWriter::new_compressed(File::create(&path).unwrap());
        npz.add_array("temperature", &Array1::from_vec(vec![1.0, 2.0]))
            .unwrap();
        npz.finish().unwrap();
        assert!(matches!(
            read_npz(&path),
            Err(ArchiveError::MissingArray("datetime"))
        ));
    }

    #[test]
    fn measured_only_archive_reads_with_empty_derived_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.npz");
        let mut npz = NpzWriter::new_compressed(File::create(&path).unwrap());
        for key in &NPZ_KEYS[..MEASURED_KEYS] {
            npz.add_array(*key, &Array1::from_vec(vec![1.0, 2.0])).unwrap();
        }
        npz.finish().unwrap();
        let series = read_npz_measured(&path).unwrap();
        assert_eq!(series.voltage, vec![1.0, 2.0]);
        assert!(series.resistivity.is_empty());
        assert!(matches!(
            read_npz(&path),
            Err(ArchiveError::MissingArray("electric_field"))
        ));
    }

    #[test]
    fn csv_has_header_and_one_row_per_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let series = sample_series();
        write_csv(&path, &series).unwrap();
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "Temperature [K]");
        assert_eq!(&headers[3], "Current Source [A]");
        assert_eq!(&headers[6], "Current Density [A/cm2]");
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        let rho: f64 = rows[1][5].parse().unwrap();
        assert_eq!(rho, series.resistivity[1]);
    }
}
