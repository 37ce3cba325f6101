//! The instruments one experiment drives, wired according to the source mode.
use log::info;

use crate::config::ExperimentConfig;
use crate::drivers::{
    open_bus, BenchError, CurrentSource6220, GpibDevice, Multimeter2000, Nanovoltmeter2182,
    SourceMeter2400,
};
use crate::types::SourceMode;

/// Programmable source: current (6220) or voltage (2400).
pub trait SourceOutput: Send {
    fn set_level(&mut self, level: f64) -> Result<(), BenchError>;
    fn output_off(&mut self) -> Result<(), BenchError>;
}

/// Reads the quantity complementary to the source.
pub trait Probe: Send {
    fn read(&mut self) -> Result<f64, BenchError>;
}

pub trait Thermometer: Send {
    /// Kelvin
    fn read_temperature(&mut self) -> Result<f64, BenchError>;
}

impl SourceOutput for CurrentSource6220 {
    fn set_level(&mut self, level: f64) -> Result<(), BenchError> {
        self.set_current(level)
    }

    fn output_off(&mut self) -> Result<(), BenchError> {
        CurrentSource6220::output_off(self)
    }
}

impl SourceOutput for SourceMeter2400 {
    fn set_level(&mut self, level: f64) -> Result<(), BenchError> {
        self.set_voltage(level)
    }

    fn output_off(&mut self) -> Result<(), BenchError> {
        SourceMeter2400::output_off(self)
    }
}

impl Probe for Nanovoltmeter2182 {
    fn read(&mut self) -> Result<f64, BenchError> {
        self.read_voltage()
    }
}

impl Probe for SourceMeter2400 {
    fn read(&mut self) -> Result<f64, BenchError> {
        self.read_current()
    }
}

impl Thermometer for Multimeter2000 {
    fn read_temperature(&mut self) -> Result<f64, BenchError> {
        Multimeter2000::read_temperature(self)
    }
}

pub struct Rig {
    pub source: Box<dyn SourceOutput>,
    pub probe: Box<dyn Probe>,
    pub thermometer: Box<dyn Thermometer>,
}

impl Rig {
    pub fn new(
        source: Box<dyn SourceOutput>,
        probe: Box<dyn Probe>,
        thermometer: Box<dyn Thermometer>,
    ) -> Self {
        Self {
            source,
            probe,
            thermometer,
        }
    }

    /// Opens the bus and runs every instrument's setup; the source starts at `first_setpoint`
    /// with its output enabled.
    pub fn connect(config: &ExperimentConfig, first_setpoint: f64) -> Result<Self, BenchError> {
        let bus = open_bus(&config.bus, &config.instruments)?;
        let addr = &config.instruments;
        let device = |address: u8| GpibDevice::new(bus.clone(), address);

        let thermometer = Multimeter2000::connect(device(addr.multimeter))?;
        let rig = match config.source.mode {
            SourceMode::Current => {
                let probe = Nanovoltmeter2182::connect(device(addr.nanovoltmeter))?;
                let source =
                    CurrentSource6220::connect(device(addr.current_source), first_setpoint, config.limit)?;
                Rig::new(
                    Box::new(source),
                    Box::new(probe),
                    Box::new(thermometer),
                )
            }
            SourceMode::Voltage => {
                let meter =
                    SourceMeter2400::connect(device(addr.source_meter), first_setpoint, config.limit)?;
                Rig::new(
                    Box::new(meter.clone()),
                    Box::new(meter),
                    Box::new(thermometer),
                )
            }
        };
        info!("Instruments ready ({:?} bus)", config.bus.backend);
        Ok(rig)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn simulated(mode: &str) -> ExperimentConfig {
        let text = format!(
            r#"
sample_name = "SIM"
area = 1.0
length = 1.0
avg_measure = 1
limit = 10.0

[source]
mode = "{mode}"
samples = 3
shape = "fixed"
value = 1e-3

[bus]
backend = "simulation"
"#
        );
        ExperimentConfig::from_toml_str(&text).unwrap()
    }

    #[test]
    fn connects_current_mode_on_simulated_bench() {
        let mut rig = Rig::connect(&simulated("current"), 1e-3).unwrap();
        let kelvin = rig.thermometer.read_temperature().unwrap();
        assert!(kelvin > 250.0 && kelvin < 300.0);
        let volts = rig.probe.read().unwrap();
        assert!(volts > 0.0);
        rig.source.output_off().unwrap();
        assert!(rig.probe.read().unwrap().abs() < 1e-9);
    }

    #[test]
    fn voltage_mode_uses_source_meter_as_probe() {
        let mut rig = Rig::connect(&simulated("voltage"), 1.0).unwrap();
        rig.source.set_level(2.0).unwrap();
        let amps = rig.probe.read().unwrap();
        assert!(amps > 0.0 && amps < 0.1);
    }
}
