//! Simulated bench: answers the SCPI subset used by the Keithley drivers.
//!
//! The synthetic sample cools from room temperature and behaves like a semiconductor
//! (resistance rising as it cools). Both sources clip at their compliance limit, so the
//! acquisition loop's compliance handling can be exercised without hardware.
use std::collections::HashMap;

use rand::Rng;

use crate::config::InstrumentAddresses;
use crate::drivers::bus::GpibBus;
use crate::drivers::error::BenchError;
use crate::sensor::Dt470;

#[derive(Clone, Copy, Debug)]
pub struct SampleModel {
    pub start_kelvin: f64,
    pub base_kelvin: f64,
    /// cooling per temperature read
    pub cooling_step: f64,
    /// resistance at 300 K
    pub r300_ohms: f64,
    /// activation temperature of R(T) = r300 * exp(t_act / T - t_act / 300)
    pub activation_kelvin: f64,
    /// relative read noise
    pub noise: f64,
}

impl Default for SampleModel {
    fn default() -> Self {
        Self {
            start_kelvin: 295.0,
            base_kelvin: 80.0,
            cooling_step: 0.05,
            r300_ohms: 50.0,
            activation_kelvin: 300.0,
            noise: 1e-3,
        }
    }
}

impl SampleModel {
    pub fn resistance(&self, kelvin: f64) -> f64 {
        self.r300_ohms * (self.activation_kelvin / kelvin - self.activation_kelvin / 300.0).exp()
    }
}

#[derive(Default)]
struct SourceState {
    level: f64,
    compliance: f64,
    output_on: bool,
}

pub struct SimulatedBench {
    addresses: InstrumentAddresses,
    model: SampleModel,
    kelvin: f64,
    current_source: SourceState,
    source_meter: SourceState,
    pending: HashMap<u8, String>,
}

impl SimulatedBench {
    pub fn new(addresses: InstrumentAddresses) -> Self {
        Self::with_model(addresses, SampleModel::default())
    }

    pub fn with_model(addresses: InstrumentAddresses, model: SampleModel) -> Self {
        Self {
            addresses,
            kelvin: model.start_kelvin,
            model,
            current_source: SourceState::default(),
            source_meter: SourceState::default(),
            pending: HashMap::new(),
        }
    }

    fn noisy(&self, value: f64) -> f64 {
        if self.model.noise == 0.0 {
            return value;
        }
        let jitter: f64 = rand::thread_rng().gen_range(-1.0..1.0);
        value * (1.0 + jitter * self.model.noise)
    }

    fn model_name(&self, address: u8) -> &'static str {
        let a = &self.addresses;
        match address {
            x if x == a.multimeter => "MODEL 2000",
            x if x == a.nanovoltmeter => "MODEL 2182A",
            x if x == a.current_source => "MODEL 6220",
            x if x == a.source_meter => "MODEL 2400",
            _ => "UNKNOWN",
        }
    }

    fn reading(&mut self, address: u8) -> Option<f64> {
        let a = self.addresses.clone();
        if address == a.multimeter {
            self.kelvin = (self.kelvin - self.model.cooling_step).max(self.model.base_kelvin);
            return Dt470.temperature_to_voltage(self.kelvin).ok();
        }
        let r = self.model.resistance(self.kelvin);
        if address == a.nanovoltmeter {
            let s = &self.current_source;
            if !s.output_on {
                return Some(self.noisy(0.0));
            }
            let limit = if s.compliance > 0.0 { s.compliance } else { f64::INFINITY };
            return Some(self.noisy((s.level * r).clamp(-limit, limit)));
        }
        if address == a.source_meter {
            let s = &self.source_meter;
            if !s.output_on {
                return Some(0.0);
            }
            let limit = if s.compliance > 0.0 { s.compliance } else { f64::INFINITY };
            return Some(self.noisy((s.level / r).clamp(-limit, limit)));
        }
        None
    }

    fn source_for(&mut self, address: u8) -> Option<&mut SourceState> {
        if address == self.addresses.current_source {
            Some(&mut self.current_source)
        } else if address == self.addresses.source_meter {
            Some(&mut self.source_meter)
        } else {
            None
        }
    }
}

fn argument(command: &str) -> Option<f64> {
    command.split_whitespace().nth(1)?.parse().ok()
}

impl GpibBus for SimulatedBench {
    fn write(&mut self, address: u8, command: &str) -> Result<(), BenchError> {
        let command = command.trim();
        let head = command.split_whitespace().next().unwrap_or("");
        match head {
            "*IDN?" => {
                let idn = format!("SIMULATED BENCH,{},0,1.0", self.model_name(address));
                self.pending.insert(address, idn);
            }
            ":READ?" => {
                if let Some(value) = self.reading(address) {
                    self.pending.insert(address, format!("{value:+.6E}"));
                }
            }
            ":SOUR:CURR" | ":SOUR:VOLT" | ":SOUR:VOLT:LEV" => {
                let value = argument(command).ok_or_else(|| BenchError::Parse(command.into()))?;
                if let Some(source) = self.source_for(address) {
                    source.level = value;
                }
            }
            ":SOUR:CURR:COMP" | ":SENS:CURR:PROT" => {
                let value = argument(command).ok_or_else(|| BenchError::Parse(command.into()))?;
                if let Some(source) = self.source_for(address) {
                    source.compliance = value;
                }
            }
            ":OUTP" => {
                let on = command.ends_with("ON");
                if let Some(source) = self.source_for(address) {
                    source.output_on = on;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn read(&mut self, address: u8) -> Result<String, BenchError> {
        self.pending
            .remove(&address)
            .ok_or(BenchError::NoResponse(address))
    }
}
