// src/engine.rs
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn, Level};

use crate::config::ExperimentConfig;
use crate::drivers::BenchError;
use crate::measure::{derive, exceeds_compliance, Averager, Geometry, MeasurementPoint};
use crate::rig::Rig;
use crate::series::{now_unix_seconds, SeriesWriter};
use crate::sweep::SweepPlan;
use crate::types::*;

/// How often the idle loop polls for operator commands and refreshes the temperature.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, PartialEq)]
pub struct LoopSettings {
    pub setpoints: Vec<f64>,
    pub mode: SourceMode,
    pub geometry: Geometry,
    /// compliance limit, volts in current mode and amps in voltage mode
    pub limit: f64,
    pub avg_measure: usize,
    pub delay: Duration,
    pub continuous: bool,
}

impl LoopSettings {
    pub fn new(plan: &SweepPlan, config: &ExperimentConfig) -> Self {
        Self {
            setpoints: plan.setpoints.clone(),
            mode: plan.mode,
            geometry: Geometry {
                area: config.area,
                length: config.length,
            },
            limit: config.limit,
            avg_measure: config.avg_measure,
            delay: Duration::try_from_secs_f64(config.delay).unwrap_or(Duration::ZERO),
            continuous: config.continuous_mode,
        }
    }

    fn first_setpoint(&self) -> f64 {
        self.setpoints.first().copied().unwrap_or(0.0)
    }
}

/// Runs the acquisition loop on its own thread. Joining the handle gives the instruments back.
pub fn spawn_thread(
    rig: Rig,
    settings: LoopSettings,
    writer: SeriesWriter,
    control: RunControl,
    tx: Sender<EngineMessage>,
    rx_cmd: Receiver<GuiCommand>,
) -> JoinHandle<Rig> {
    thread::spawn(move || {
        let mut acquisition = Acquisition {
            rig,
            settings,
            writer,
            control,
            tx,
            rx_cmd,
        };
        acquisition.run();
        acquisition.rig
    })
}

enum Decision {
    Start,
    Finish,
}

enum SweepEnd {
    Completed,
    Stopped,
    Failed,
}

struct Acquisition {
    rig: Rig,
    settings: LoopSettings,
    writer: SeriesWriter,
    control: RunControl,
    tx: Sender<EngineMessage>,
    rx_cmd: Receiver<GuiCommand>,
}

impl Acquisition {
    // 写日志并转发到界面
    fn report(&self, level: Level, msg: String) {
        log::log!(level, "{msg}");
        self.tx.send(EngineMessage::Log(msg)).ok();
    }

    fn run(&mut self) {
        if self.settings.continuous {
            self.report(Level::Info, "Start the measurement loop in continuous mode".into());
        } else {
            self.report(Level::Info, "Start the measurement loop".into());
        }

        loop {
            // 1. 源回到起始值
            if let Err(e) = self.rig.source.set_level(self.settings.first_setpoint()) {
                self.report(Level::Warn, format!("Writing gpib error, check the source meter: {e}"));
            }
            if self.control.stop_requested() {
                self.report(Level::Info, "End of the measurement loop".into());
                break;
            }

            // 2. 非连续模式：等待操作员确认
            if !self.settings.continuous {
                self.control.set_started(false);
                if let Decision::Finish = self.await_start() {
                    self.report(Level::Info, "End of the measurement loop".into());
                    break;
                }
            }

            // 3. 扫描
            self.control.set_started(true);
            let before = self.writer.len();
            let end = self.sweep();
            let recorded = self.writer.len() - before;
            self.tx.send(EngineMessage::SweepFinished { recorded }).ok();
            if let SweepEnd::Failed = end {
                self.report(
                    Level::Error,
                    "End of the measurement loop: instrument failure".into(),
                );
                break;
            }
        }
        self.control.set_started(false);
        self.tx.send(EngineMessage::Finished).ok();
    }

    fn await_start(&mut self) -> Decision {
        let temperature = self.read_temperature();
        self.tx.send(EngineMessage::AwaitingStart(temperature)).ok();
        loop {
            if self.control.stop_requested() {
                return Decision::Finish;
            }
            match self.rx_cmd.recv_timeout(POLL_INTERVAL) {
                Ok(GuiCommand::StartLoop) => return Decision::Start,
                Ok(GuiCommand::RefreshTemperature) => {
                    let temperature = self.read_temperature();
                    self.tx.send(EngineMessage::AwaitingStart(temperature)).ok();
                }
                Ok(GuiCommand::Finish) | Err(RecvTimeoutError::Disconnected) => {
                    return Decision::Finish
                }
                Err(RecvTimeoutError::Timeout) => {
                    let temperature = self.read_temperature();
                    self.tx.send(EngineMessage::Temperature(temperature)).ok();
                }
            }
        }
    }

    fn read_temperature(&mut self) -> Option<f64> {
        match self.rig.thermometer.read_temperature() {
            Ok(kelvin) => Some(kelvin),
            Err(BenchError::TemperatureOutOfRange(_)) => {
                warn!("Temperature out of range!");
                None
            }
            Err(e) => {
                warn!("Reading gpib error, check the multimeter: {e}");
                None
            }
        }
    }

    fn sweep(&mut self) -> SweepEnd {
        let quantity = self.settings.mode.quantity();
        for idx in 0..self.settings.setpoints.len() {
            let setpoint = self.settings.setpoints[idx];
            if self.control.stop_requested() {
                self.report(Level::Info, format!("Leaving the {quantity} loop"));
                return SweepEnd::Stopped;
            }
            if let Err(e) = self.rig.source.set_level(setpoint) {
                self.report(Level::Warn, format!("Writing gpib error, check the source meter: {e}"));
                if !e.is_transient() {
                    return SweepEnd::Failed;
                }
            }
            info!("Measurement at {quantity} {setpoint}");

            match self.measure_point(setpoint) {
                Ok(Some(point)) => self.writer.append(now_unix_seconds(), &point),
                Ok(None) => {}
                Err(BenchError::TemperatureOutOfRange(_)) => {
                    self.report(Level::Warn, "Temperature out of range!".into());
                }
                Err(e) if e.is_transient() => {
                    self.report(
                        Level::Warn,
                        format!("Reading gpib error, check the instruments: {e}"),
                    );
                }
                Err(e) => {
                    error!("Measurement at {quantity} {setpoint} failed: {e}");
                    return SweepEnd::Failed;
                }
            }
        }
        SweepEnd::Completed
    }

    /// Averages the probe and the temperature over `avg_measure` read pairs.
    ///
    /// `Ok(None)` means the point was read but must not be recorded.
    fn measure_point(&mut self, setpoint: f64) -> Result<Option<MeasurementPoint>, BenchError> {
        let mut probe = Averager::default();
        let mut temperature = Averager::default();
        for _ in 0..self.settings.avg_measure {
            probe.push(self.rig.probe.read()?);
            temperature.push(self.rig.thermometer.read_temperature()?);
            if !self.settings.delay.is_zero() {
                thread::sleep(self.settings.delay);
            }
        }
        let (Some(probe_mean), Some(temperature_mean)) = (probe.mean(), temperature.mean()) else {
            return Ok(None);
        };

        let mode = self.settings.mode;
        let point = derive(
            mode,
            setpoint,
            probe_mean,
            temperature_mean,
            &self.settings.geometry,
        );
        if !point.is_finite() {
            self.report(
                Level::Warn,
                format!("Zero current at {} {setpoint}, point skipped", mode.quantity()),
            );
            return Ok(None);
        }
        self.report(Level::Info, point.format_log());
        if exceeds_compliance(point.compliance_quantity(mode), self.settings.limit) {
            self.report(Level::Warn, mode.compliance_warning().into());
            return Ok(None);
        }
        Ok(Some(point))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc::channel;
    use std::sync::Arc;

    use super::*;
    use crate::rig::fakes::{self, Response};
    use crate::series::{self, MeasurementSeries};

    fn settings(mode: SourceMode, setpoints: Vec<f64>, avg: usize, continuous: bool) -> LoopSettings {
        LoopSettings {
            setpoints,
            mode,
            geometry: Geometry {
                area: 0.5,
                length: 2.0,
            },
            limit: 10.0,
            avg_measure: avg,
            delay: Duration::ZERO,
            continuous,
        }
    }

    fn run(
        rig: Rig,
        settings: LoopSettings,
        control: RunControl,
        commands: &[GuiCommand],
    ) -> (Rig, MeasurementSeries, Vec<EngineMessage>) {
        let (writer, reader) = series::channel();
        let (tx, rx) = channel();
        let (tx_cmd, rx_cmd) = channel();
        for cmd in commands {
            tx_cmd.send(cmd.clone()).unwrap();
        }
        let handle = spawn_thread(rig, settings, writer, control, tx, rx_cmd);
        let rig = handle.join().unwrap();
        (rig, reader.snapshot(), rx.try_iter().collect())
    }

    fn logged(messages: &[EngineMessage], needle: &str) -> bool {
        messages
            .iter()
            .any(|m| matches!(m, EngineMessage::Log(s) if s.contains(needle)))
    }

    /// Probe answering a fixed cycle of readings regardless of the setpoint.
    fn cycle(values: Vec<f64>) -> Response {
        let mut idx = 0;
        Box::new(move |_| {
            let v = values[idx % values.len()];
            idx += 1;
            Ok(v)
        })
    }

    #[test]
    fn records_mean_of_raw_reads() {
        let (rig, _) = fakes::rig(
            cycle(vec![1.0, 2.0, 3.0, 6.0]),
            cycle(vec![100.0, 102.0, 98.0, 100.0]),
        );
        let cmds = [GuiCommand::StartLoop, GuiCommand::Finish];
        let (_, data, messages) = run(
            rig,
            settings(SourceMode::Current, vec![1e-3, 2e-3], 4, false),
            RunControl::new(),
            &cmds,
        );
        assert_eq!(data.voltage, vec![3.0, 3.0]);
        assert_eq!(data.temperature, vec![100.0, 100.0]);
        assert_eq!(data.current, vec![1e-3, 2e-3]);
        assert!(data.is_consistent());
        assert_eq!(messages.last(), Some(&EngineMessage::Finished));
        assert!(messages.contains(&EngineMessage::SweepFinished { recorded: 2 }));
    }

    #[test]
    fn points_near_compliance_are_discarded() {
        // 5 kOhm sample against a 10 V compliance
        let (rig, _) = fakes::rig(
            Box::new(|level| Ok(level * 5000.0)),
            fakes::constant(77.0),
        );
        let setpoints = vec![1e-3, 1.99e-3, 3e-3, -2e-3, 1.9e-3];
        let cmds = [GuiCommand::StartLoop, GuiCommand::Finish];
        let (_, data, messages) = run(
            rig,
            settings(SourceMode::Current, setpoints, 2, false),
            RunControl::new(),
            &cmds,
        );
        assert_eq!(data.current, vec![1e-3, 1.9e-3]);
        assert!(data.voltage.iter().all(|v| v.abs() < 9.9));
        assert!(logged(&messages, "Voltage compliance"));
    }

    #[test]
    fn source_meter_points_near_current_compliance_are_discarded() {
        // 10 Ohm sample against a 1 A compliance
        let (rig, _) = fakes::rig(Box::new(|level| Ok(level / 10.0)), fakes::constant(77.0));
        let cmds = [GuiCommand::StartLoop, GuiCommand::Finish];
        let mut settings = settings(SourceMode::Voltage, vec![1.0, 9.5, 12.0, -9.5, 5.0], 1, false);
        settings.limit = 1.0;
        let (_, data, messages) = run(rig, settings, RunControl::new(), &cmds);
        assert_eq!(data.voltage, vec![1.0, 5.0]);
        assert!(data.current.iter().all(|i| i.abs() < 0.9));
        assert!(logged(&messages, "Current compliance"));
        assert!(!logged(&messages, "Voltage compliance"));
    }

    #[test]
    fn stop_before_start_records_nothing() {
        let (rig, handles) = fakes::rig(
            fakes::constant(1.0),
            fakes::constant(300.0),
        );
        let control = RunControl::new();
        control.request_stop();
        let (_, data, messages) = run(
            rig,
            settings(SourceMode::Current, vec![5e-4, 1e-3], 1, true),
            control.clone(),
            &[],
        );
        assert!(data.is_empty());
        assert!(!control.is_started());
        assert_eq!(handles.applied(), vec![5e-4]);
        assert!(logged(&messages, "End of the measurement loop"));
    }

    #[test]
    fn stop_during_sweep_leaves_the_loop() {
        let control = RunControl::new();
        let reads = Arc::new(AtomicUsize::new(0));
        let started_while_reading = Arc::new(AtomicBool::new(false));
        let probe: Response = {
            let control = control.clone();
            let reads = reads.clone();
            let started = started_while_reading.clone();
            Box::new(move |_| {
                started.store(control.is_started(), Ordering::SeqCst);
                if reads.fetch_add(1, Ordering::SeqCst) == 2 {
                    control.request_stop();
                }
                Ok(0.5)
            })
        };
        let (rig, handles) = fakes::rig(probe, fakes::constant(290.0));
        let setpoints = vec![1e-4, 2e-4, 3e-4, 4e-4, 5e-4, 6e-4];
        let (mut rig, data, messages) = run(
            rig,
            settings(SourceMode::Current, setpoints, 1, true),
            control.clone(),
            &[],
        );
        assert_eq!(data.len(), 3);
        assert!(started_while_reading.load(Ordering::SeqCst));
        assert!(!control.is_started());
        assert!(logged(&messages, "Leaving the current loop"));
        assert_eq!(handles.applied(), vec![1e-4, 1e-4, 2e-4, 3e-4, 1e-4]);
        rig.source.output_off().unwrap();
        assert!(handles.is_off());
    }

    #[test]
    fn zero_current_and_read_errors_skip_the_point() {
        let mut first = true;
        let probe: Response = Box::new(move |level| {
            if level == 2.0 && first {
                first = false;
                return Err(BenchError::NoResponse(24));
            }
            Ok(level / 100.0)
        });
        let (rig, _) = fakes::rig(probe, fakes::constant(150.0));
        let cmds = [GuiCommand::StartLoop, GuiCommand::Finish];
        let (_, data, messages) = run(
            rig,
            settings(SourceMode::Voltage, vec![0.0, 1.0, 2.0, 3.0], 1, false),
            RunControl::new(),
            &cmds,
        );
        assert_eq!(data.voltage, vec![1.0, 3.0]);
        assert_eq!(data.resistance, vec![100.0, 100.0]);
        assert!(logged(&messages, "Zero current"));
        assert!(logged(&messages, "Reading gpib error"));
    }

    #[test]
    fn fatal_bus_error_ends_the_loop() {
        let probe: Response = Box::new(|_| Err(BenchError::Poisoned));
        let (rig, _) = fakes::rig(probe, fakes::constant(150.0));
        let (_, data, messages) = run(
            rig,
            settings(SourceMode::Current, vec![1e-3, 2e-3], 1, true),
            RunControl::new(),
            &[],
        );
        assert!(data.is_empty());
        assert!(logged(&messages, "instrument failure"));
        assert_eq!(messages.last(), Some(&EngineMessage::Finished));
    }

    #[test]
    fn operator_can_refresh_the_temperature_before_starting() {
        let (rig, _) = fakes::rig(
            fakes::constant(1.0),
            cycle(vec![80.0, 79.5]),
        );
        let cmds = [GuiCommand::RefreshTemperature, GuiCommand::Finish];
        let (_, data, messages) = run(
            rig,
            settings(SourceMode::Current, vec![1e-3], 1, false),
            RunControl::new(),
            &cmds,
        );
        assert!(data.is_empty());
        let prompts: Vec<_> = messages
            .iter()
            .filter_map(|m| match m {
                EngineMessage::AwaitingStart(t) => Some(*t),
                _ => None,
            })
            .collect();
        assert_eq!(prompts, vec![Some(80.0), Some(79.5)]);
        assert!(!messages
            .iter()
            .any(|m| matches!(m, EngineMessage::SweepFinished { .. })));
    }
}
