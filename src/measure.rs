//! Averaged readings and the quantities derived from them.
use crate::types::SourceMode;

/// Points whose complementary reading comes this close to the compliance limit are dropped.
pub const COMPLIANCE_MARGIN: f64 = 0.1;

/// Running mean over the raw reads taken at one setpoint.
#[derive(Clone, Copy, Debug, Default)]
pub struct Averager {
    sum: f64,
    count: usize,
}

impl Averager {
    pub fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Sample dimensions in centimetres.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Geometry {
    /// cross-section, cm²
    pub area: f64,
    /// distance between the voltage contacts, cm
    pub length: f64,
}

impl Geometry {
    pub fn electric_field(&self, voltage: f64) -> f64 {
        voltage / self.length
    }

    pub fn current_density(&self, current: f64) -> f64 {
        current / self.area
    }
}

/// One recorded row, before it is timestamped.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeasurementPoint {
    pub temperature: f64,
    pub voltage: f64,
    pub current: f64,
    pub resistance: f64,
    pub electric_field: f64,
    pub current_density: f64,
    pub resistivity: f64,
}

/// Builds a point from the averaged probe and temperature readings at `setpoint`.
///
/// In current mode the setpoint is the current and the probe reads voltage;
/// in voltage mode it is the other way round.
pub fn derive(
    mode: SourceMode,
    setpoint: f64,
    probe_mean: f64,
    temperature: f64,
    geometry: &Geometry,
) -> MeasurementPoint {
    let (voltage, current) = match mode {
        SourceMode::Current => (probe_mean, setpoint),
        SourceMode::Voltage => (setpoint, probe_mean),
    };
    let electric_field = geometry.electric_field(voltage);
    let current_density = geometry.current_density(current);
    MeasurementPoint {
        temperature,
        voltage,
        current,
        resistance: voltage / current,
        electric_field,
        current_density,
        resistivity: electric_field / current_density,
    }
}

/// True when the measured complementary quantity sits at (or within the margin of) the limit.
pub fn exceeds_compliance(measured: f64, limit: f64) -> bool {
    measured.abs() >= limit - COMPLIANCE_MARGIN
}

impl MeasurementPoint {
    /// The quantity the instrument limits: voltage when sourcing current, current otherwise.
    pub fn compliance_quantity(&self, mode: SourceMode) -> f64 {
        match mode {
            SourceMode::Current => self.voltage,
            SourceMode::Voltage => self.current,
        }
    }

    pub fn is_finite(&self) -> bool {
        [
            self.resistance,
            self.electric_field,
            self.current_density,
            self.resistivity,
        ]
        .iter()
        .all(|v| v.is_finite())
    }

    pub fn format_log(&self) -> String {
        format!(
            "T:{:.2}K V:{:.4e}V I:{:.4e}A R:{:.4e}Ohm E:{:.4e}V/cm J:{:.4e}A/cm2 rho:{:.4e}Ohm cm",
            self.temperature,
            self.voltage,
            self.current,
            self.resistance,
            self.electric_field,
            self.current_density,
            self.resistivity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averager_is_arithmetic_mean() {
        let mut avg = Averager::default();
        assert_eq!(avg.mean(), None);
        for v in [1.0, 2.0, 3.0, 6.0] {
            avg.push(v);
        }
        assert_eq!(avg.count(), 4);
        assert_eq!(avg.mean(), Some(3.0));
    }

    #[test]
    fn resistivity_is_resistance_times_area_over_length() {
        let geometries = [
            Geometry { area: 4.807e-2, length: 2.376e-2 },
            Geometry { area: 1.0, length: 0.5 },
            Geometry { area: 3e-4, length: 7.0 },
        ];
        for geometry in geometries {
            for (current, voltage) in [(1e-3, 0.25), (-2e-6, 1.5e-3), (0.7, -3.0)] {
                let p = derive(SourceMode::Current, current, voltage, 300.0, &geometry);
                let expected = (voltage / geometry.length) / (current / geometry.area);
                assert!((p.resistivity - expected).abs() <= 1e-12 * expected.abs());
                let via_r = p.resistance * geometry.area / geometry.length;
                assert!((p.resistivity - via_r).abs() <= 1e-9 * via_r.abs());
            }
        }
    }

    #[test]
    fn voltage_mode_swaps_roles() {
        let g = Geometry { area: 2.0, length: 4.0 };
        let p = derive(SourceMode::Voltage, 8.0, 2.0, 77.0, &g);
        assert_eq!(p.voltage, 8.0);
        assert_eq!(p.current, 2.0);
        assert_eq!(p.resistance, 4.0);
        assert_eq!(p.electric_field, 2.0);
        assert_eq!(p.current_density, 1.0);
        assert_eq!(p.resistivity, 2.0);
        assert_eq!(p.compliance_quantity(SourceMode::Voltage), 2.0);
    }

    #[test]
    fn compliance_margin() {
        assert!(exceeds_compliance(9.95, 10.0));
        assert!(exceeds_compliance(9.9, 10.0));
        assert!(exceeds_compliance(-9.95, 10.0));
        assert!(!exceeds_compliance(9.8, 10.0));
    }

    #[test]
    fn zero_current_is_not_finite() {
        let g = Geometry { area: 1.0, length: 1.0 };
        assert!(!derive(SourceMode::Current, 0.0, 0.0, 300.0, &g).is_finite());
    }
}
