//! The Keithley instruments on the bench, each with its power-on setup sequence.
use log::info;

use crate::drivers::bus::GpibDevice;
use crate::drivers::error::BenchError;
use crate::sensor::Dt470;

fn identify(dev: &GpibDevice, role: &str) -> Result<String, BenchError> {
    dev.write("*RST")?;
    let idn = dev.query("*IDN?")?;
    info!("Found {role} {idn}");
    Ok(idn)
}

/// Keithley 2000/2700 reading the DT-470 diode voltage.
pub struct Multimeter2000 {
    dev: GpibDevice,
    sensor: Dt470,
}

impl Multimeter2000 {
    pub fn connect(dev: GpibDevice) -> Result<Self, BenchError> {
        identify(&dev, "Multimeter")?;
        dev.write(":SENS:FUNC 'VOLT'")?;
        dev.write(":FORM:ELEM READ")?;
        Ok(Self {
            dev,
            sensor: Dt470,
        })
    }

    pub fn read_voltage(&self) -> Result<f64, BenchError> {
        self.dev.query_f64(":READ?")
    }

    pub fn read_temperature(&self) -> Result<f64, BenchError> {
        self.sensor.voltage_to_temperature(self.read_voltage()?)
    }
}

/// Keithley 2182A nanovoltmeter, channel 1.
pub struct Nanovoltmeter2182 {
    dev: GpibDevice,
}

impl Nanovoltmeter2182 {
    pub fn connect(dev: GpibDevice) -> Result<Self, BenchError> {
        identify(&dev, "Nanovolt Meter")?;
        dev.write(":SENS:FUNC 'VOLT'")?;
        dev.write(":SENS:CHAN 1")?;
        Ok(Self { dev })
    }

    pub fn read_voltage(&self) -> Result<f64, BenchError> {
        self.dev.query_f64(":READ?")
    }
}

/// Keithley 6220 precision current source with voltage compliance.
pub struct CurrentSource6220 {
    dev: GpibDevice,
}

impl CurrentSource6220 {
    pub fn connect(
        dev: GpibDevice,
        initial: f64,
        voltage_limit: f64,
    ) -> Result<Self, BenchError> {
        identify(&dev, "Source Meter")?;
        dev.write(":CLE")?;
        dev.write(":SOUR:CURR:RANG:AUTO ON")?;
        dev.write(&format!(":SOUR:CURR {initial}"))?;
        dev.write(&format!(":SOUR:CURR:COMP {voltage_limit}"))?;
        dev.write(":OUTP ON")?;
        Ok(Self { dev })
    }

    pub fn set_current(&self, amps: f64) -> Result<(), BenchError> {
        self.dev.write(&format!(":SOUR:CURR {amps}"))
    }

    pub fn output_off(&self) -> Result<(), BenchError> {
        self.dev.write(":OUTP OFF")
    }
}

/// Keithley 2400 sourcing voltage and measuring current, with current compliance.
#[derive(Clone)]
pub struct SourceMeter2400 {
    dev: GpibDevice,
}

impl SourceMeter2400 {
    pub fn connect(
        dev: GpibDevice,
        initial: f64,
        current_limit: f64,
    ) -> Result<Self, BenchError> {
        identify(&dev, "Source Meter")?;
        dev.write(":SOUR:FUNC VOLT")?;
        dev.write(&format!(":SOUR:VOLT:LEV {initial}"))?;
        dev.write(&format!(":SENS:CURR:PROT {current_limit}"))?;
        dev.write(":SENS:FUNC 'CURR'")?;
        dev.write(":FORM:ELEM CURR")?;
        dev.write(":OUTP ON")?;
        Ok(Self { dev })
    }

    pub fn set_voltage(&self, volts: f64) -> Result<(), BenchError> {
        self.dev.write(&format!(":SOUR:VOLT {volts}"))
    }

    pub fn read_current(&self) -> Result<f64, BenchError> {
        self.dev.query_f64(":READ?")
    }

    pub fn output_off(&self) -> Result<(), BenchError> {
        self.dev.write(":OUTP OFF")
    }
}
