//! DT-470 silicon diode thermometer.
//!
//! Temperature is interpolated from the standard Curve 10 table (10 µA excitation).
//! Voltage falls monotonically with temperature, so the table is kept in ascending
//! temperature / descending voltage order.
use crate::drivers::BenchError;

/// (kelvin, volts)
const CURVE_10: [(f64, f64); 101] = [
    (1.40, 1.69808),
    (1.60, 1.69260),
    (1.80, 1.68760),
    (2.00, 1.68346),
    (2.50, 1.67414),
    (3.00, 1.66404),
    (3.50, 1.65222),
    (4.00, 1.63896),
    (4.50, 1.62483),
    (5.00, 1.61037),
    (5.50, 1.59581),
    (6.00, 1.58148),
    (6.50, 1.56758),
    (7.00, 1.55430),
    (7.50, 1.54176),
    (8.00, 1.53005),
    (8.50, 1.51920),
    (9.00, 1.50919),
    (9.50, 1.49993),
    (10.0, 1.49135),
    (11.0, 1.47586),
    (12.0, 1.46202),
    (13.0, 1.44937),
    (14.0, 1.43779),
    (15.0, 1.42744),
    (16.0, 1.41864),
    (17.0, 1.41162),
    (18.0, 1.40628),
    (19.0, 1.40232),
    (20.0, 1.39943),
    (22.0, 1.39578),
    (24.0, 1.39348),
    (26.0, 1.39153),
    (28.0, 1.38945),
    (30.0, 1.38698),
    (32.0, 1.38406),
    (34.0, 1.38070),
    (36.0, 1.37694),
    (38.0, 1.37283),
    (40.0, 1.36842),
    (44.0, 1.35885),
    (48.0, 1.34843),
    (52.0, 1.33738),
    (56.0, 1.32590),
    (60.0, 1.31406),
    (65.0, 1.29890),
    (70.0, 1.28346),
    (75.0, 1.26782),
    (77.35, 1.26039),
    (80.0, 1.25201),
    (85.0, 1.23607),
    (90.0, 1.22000),
    (95.0, 1.20382),
    (100.0, 1.18758),
    (105.0, 1.17127),
    (110.0, 1.15492),
    (115.0, 1.13853),
    (120.0, 1.12210),
    (125.0, 1.10564),
    (130.0, 1.08916),
    (135.0, 1.07264),
    (140.0, 1.05608),
    (145.0, 1.03951),
    (150.0, 1.02291),
    (155.0, 1.00628),
    (160.0, 0.98962),
    (165.0, 0.97295),
    (170.0, 0.95624),
    (175.0, 0.93953),
    (180.0, 0.92278),
    (185.0, 0.90602),
    (190.0, 0.88922),
    (195.0, 0.87243),
    (200.0, 0.85560),
    (205.0, 0.83876),
    (210.0, 0.82189),
    (215.0, 0.80500),
    (220.0, 0.78810),
    (225.0, 0.77118),
    (230.0, 0.75424),
    (235.0, 0.73727),
    (240.0, 0.72030),
    (245.0, 0.70331),
    (250.0, 0.68630),
    (255.0, 0.66927),
    (260.0, 0.65222),
    (265.0, 0.63515),
    (270.0, 0.61806),
    (273.0, 0.60779),
    (280.0, 0.58383),
    (290.0, 0.54951),
    (300.0, 0.51512),
    (310.0, 0.48063),
    (320.0, 0.44604),
    (330.0, 0.41133),
    (340.0, 0.37654),
    (350.0, 0.34166),
    (375.0, 0.25399),
    (400.0, 0.16579),
    (425.0, 0.07712),
    (445.0, 0.00674),
];

#[derive(Clone, Copy, Debug, Default)]
pub struct Dt470;

impl Dt470 {
    pub fn voltage_to_temperature(&self, volts: f64) -> Result<f64, BenchError> {
        if !volts.is_finite() {
            return Err(BenchError::TemperatureOutOfRange(volts));
        }
        // segment i spans CURVE_10[i] (higher voltage) to CURVE_10[i + 1]
        CURVE_10
            .windows(2)
            .find(|w| volts <= w[0].1 && volts >= w[1].1)
            .map(|w| {
                let (t0, v0) = w[0];
                let (t1, v1) = w[1];
                t0 + (volts - v0) * (t1 - t0) / (v1 - v0)
            })
            .ok_or(BenchError::TemperatureOutOfRange(volts))
    }

    pub fn temperature_to_voltage(&self, kelvin: f64) -> Result<f64, BenchError> {
        CURVE_10
            .windows(2)
            .find(|w| kelvin >= w[0].0 && kelvin <= w[1].0)
            .map(|w| {
                let (t0, v0) = w[0];
                let (t1, v1) = w[1];
                v0 + (kelvin - t0) * (v1 - v0) / (t1 - t0)
            })
            .ok_or(BenchError::TemperatureOutOfRange(kelvin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_monotonic() {
        for w in CURVE_10.windows(2) {
            assert!(w[0].0 < w[1].0);
            assert!(w[0].1 > w[1].1);
        }
    }

    #[test]
    fn hits_table_points_and_interpolates() {
        let dt = Dt470;
        let t = dt.voltage_to_temperature(1.26039).unwrap();
        assert!((t - 77.35).abs() < 1e-9);
        let mid = dt.voltage_to_temperature((0.51512 + 0.48063) / 2.0).unwrap();
        assert!((mid - 305.0).abs() < 1e-9);
    }

    #[test]
    fn inverse_round_trips() {
        let dt = Dt470;
        for kelvin in [4.2, 50.0, 150.0, 295.0] {
            let v = dt.temperature_to_voltage(kelvin).unwrap();
            let back = dt.voltage_to_temperature(v).unwrap();
            assert!((back - kelvin).abs() < 1e-6);
        }
    }

    #[test]
    fn rejects_out_of_range_voltage() {
        let dt = Dt470;
        assert!(matches!(
            dt.voltage_to_temperature(1.8),
            Err(BenchError::TemperatureOutOfRange(_))
        ));
        assert!(dt.voltage_to_temperature(-0.2).is_err());
        assert!(dt.voltage_to_temperature(f64::NAN).is_err());
    }
}
