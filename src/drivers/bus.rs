use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{BusBackend, BusConfig, InstrumentAddresses};
use crate::drivers::error::BenchError;
use crate::drivers::linux_gpib::LinuxGpibBus;
use crate::drivers::prologix::PrologixBus;
use crate::drivers::sim::SimulatedBench;

/// A GPIB controller able to talk to several instruments by primary address.
pub trait GpibBus: Send {
    fn write(&mut self, address: u8, command: &str) -> Result<(), BenchError>;
    fn read(&mut self, address: u8) -> Result<String, BenchError>;
}

/// One controller shared by every instrument on the bus.
pub type SharedBus = Arc<Mutex<dyn GpibBus>>;

pub fn shared<B: GpibBus + 'static>(bus: B) -> SharedBus {
    Arc::new(Mutex::new(bus))
}

/// Handle to a single instrument on a shared bus.
#[derive(Clone)]
pub struct GpibDevice {
    bus: SharedBus,
    address: u8,
}

impl GpibDevice {
    pub fn new(bus: SharedBus, address: u8) -> Self {
        Self { bus, address }
    }

    pub fn write(&self, command: &str) -> Result<(), BenchError> {
        let mut bus = self.bus.lock().map_err(|_| BenchError::Poisoned)?;
        bus.write(self.address, command)
    }

    pub fn read(&self) -> Result<String, BenchError> {
        let mut bus = self.bus.lock().map_err(|_| BenchError::Poisoned)?;
        bus.read(self.address)
    }

    /// Write then read while holding the bus, so no other device can slip in between.
    pub fn query(&self, command: &str) -> Result<String, BenchError> {
        let mut bus = self.bus.lock().map_err(|_| BenchError::Poisoned)?;
        bus.write(self.address, command)?;
        bus.read(self.address)
    }

    pub fn query_f64(&self, command: &str) -> Result<f64, BenchError> {
        let answer = self.query(command)?;
        parse_reading(&answer)
    }
}

/// Parses a single numeric SCPI reading such as `+1.234567E-03`.
///
/// Keithley instruments may append unit suffixes or extra elements separated by commas;
/// only the first element is used.
pub fn parse_reading(raw: &str) -> Result<f64, BenchError> {
    let first = raw.trim().split(',').next().unwrap_or("").trim();
    let numeric = first.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    numeric
        .parse::<f64>()
        .map_err(|_| BenchError::Parse(raw.trim().to_owned()))
}

pub fn open_bus(
    config: &BusConfig,
    addresses: &InstrumentAddresses,
) -> Result<SharedBus, BenchError> {
    let timeout = Duration::from_millis(config.timeout_ms);
    match config.backend {
        BusBackend::LinuxGpib => Ok(shared(LinuxGpibBus::open(config.board, timeout)?)),
        BusBackend::Prologix => Ok(shared(PrologixBus::open(
            &config.port,
            config.baud_rate,
            timeout,
        )?)),
        BusBackend::Simulation => Ok(shared(SimulatedBench::new(addresses.clone()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_decorated_readings() {
        assert_eq!(parse_reading("+1.234500E-03\n").unwrap(), 1.2345e-3);
        assert_eq!(parse_reading("-4.2E+00VDC,+0.0").unwrap(), -4.2);
        assert!(matches!(parse_reading("ERR"), Err(BenchError::Parse(_))));
        assert!(matches!(parse_reading(""), Err(BenchError::Parse(_))));
    }
}
