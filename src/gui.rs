// src/gui.rs
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use eframe::egui;
use egui::{Align2, Color32, RichText};
use egui_plot::{Line, Plot, PlotPoints, Points};
use log::{error, info, warn};

use crate::config::ExperimentConfig;
use crate::engine::{self, LoopSettings};
use crate::recorder::SessionRecorder;
use crate::rig::Rig;
use crate::series::{self, now_unix_seconds, MeasurementSeries, SeriesReader};
use crate::sweep::SweepPlan;
use crate::types::*;

/// Plot refresh period.
pub const REFRESH_INTERVAL: Duration = Duration::from_millis(500);

const LOG_LINES: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CloseStage {
    Running,
    AskSave,
    AskSwitchOff,
}

pub struct BenchApp {
    config: ExperimentConfig,
    plan: SweepPlan,
    log_file: Option<PathBuf>,

    // 采集线程
    reader: SeriesReader,
    control: RunControl,
    rx: Receiver<EngineMessage>,
    tx_cmd: Sender<GuiCommand>,
    engine: Option<JoinHandle<Rig>>,
    rig: Option<Rig>,

    // 显示窗口 (每 500 ms 刷新)
    window: MeasurementSeries,
    origin: f64,
    last_refresh: Option<Instant>,

    // 操作员交互
    awaiting: Option<Option<f64>>,
    live_temperature: Option<f64>,
    continuous_notice: bool,
    operator_done: bool,
    log_messages: Vec<String>,

    // 关闭流程
    close_stage: CloseStage,
    closing_at: Option<DateTime<Local>>,
    allowed_to_close: bool,
    exit_code: Arc<AtomicI32>,
}

impl BenchApp {
    /// Starts the acquisition thread on `rig` and builds the window state around it.
    pub fn new(
        config: ExperimentConfig,
        plan: SweepPlan,
        rig: Rig,
        log_file: Option<PathBuf>,
        exit_code: Arc<AtomicI32>,
    ) -> Self {
        let (tx, rx) = channel();
        let (tx_cmd, rx_cmd) = channel();
        let (writer, reader) = series::channel();
        let control = RunControl::new();
        let settings = LoopSettings::new(&plan, &config);
        let engine = engine::spawn_thread(rig, settings, writer, control.clone(), tx, rx_cmd);

        Self {
            continuous_notice: config.continuous_mode,
            config,
            plan,
            log_file,
            reader,
            control,
            rx,
            tx_cmd,
            engine: Some(engine),
            rig: None,
            window: MeasurementSeries::default(),
            origin: now_unix_seconds(),
            last_refresh: None,
            awaiting: None,
            live_temperature: None,
            operator_done: false,
            log_messages: Vec::new(),
            close_stage: CloseStage::Running,
            closing_at: None,
            allowed_to_close: false,
            exit_code,
        }
    }

    fn log(&mut self, msg: &str) {
        self.log_messages.push(format!("> {msg}"));
        if self.log_messages.len() > LOG_LINES {
            self.log_messages.remove(0);
        }
    }

    fn drain_messages(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                EngineMessage::Log(s) => self.log(&s),
                EngineMessage::Temperature(t) => self.live_temperature = t,
                EngineMessage::AwaitingStart(t) => {
                    self.live_temperature = t;
                    self.awaiting = Some(t);
                }
                EngineMessage::SweepFinished { recorded } => {
                    self.log(&format!("Sweep finished, {recorded} points recorded"));
                }
                EngineMessage::Finished => self.awaiting = None,
            }
        }
    }

    fn refresh_window(&mut self, force: bool) {
        let due = self
            .last_refresh
            .map_or(true, |t| t.elapsed() >= REFRESH_INTERVAL);
        if force || due {
            self.window = self.reader.tail(self.plan.display_samples);
            self.last_refresh = Some(Instant::now());
        }
    }

    fn begin_close(&mut self) {
        self.closing_at = Some(Local::now());
        self.control.request_stop();
        self.tx_cmd.send(GuiCommand::Finish).ok();
        self.awaiting = None;
        if let Some(handle) = self.engine.take() {
            match handle.join() {
                Ok(rig) => self.rig = Some(rig),
                Err(_) => error!("Acquisition thread panicked"),
            }
        }
        self.drain_messages();
        self.refresh_window(true);
        self.close_stage = CloseStage::AskSave;
    }

    fn save(&mut self) {
        let at = self.closing_at.unwrap_or_else(Local::now);
        let recorder = SessionRecorder::for_plan(&self.config, &self.plan, at);
        let series = self.reader.snapshot();
        match recorder.save(&self.config, &self.plan, &series, self.log_file.as_deref()) {
            Ok(Some(path)) => {
                info!("Experiment saved as {}", path.display());
                self.log(&format!("Saved {}", path.display()));
            }
            Ok(None) => info!("Data not saved"),
            Err(e) => {
                error!("Saving the experiment failed: {e:#}");
                self.log(&format!("Saving failed: {e:#}"));
            }
        }
    }

    fn switch_off(&mut self) {
        match self.rig.as_mut() {
            Some(rig) => {
                if let Err(e) = rig.source.output_off() {
                    warn!("Couldn't turn off the source: {e}");
                    self.exit_code.store(1, Ordering::SeqCst);
                } else {
                    info!("Source output switched off");
                }
            }
            None => {
                warn!("Couldn't turn off the source: instruments unavailable");
                self.exit_code.store(1, Ordering::SeqCst);
            }
        }
    }

    fn finish(&mut self, ctx: &egui::Context) {
        info!("Closing the experiment");
        self.allowed_to_close = true;
        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
    }

    fn dialog(ctx: &egui::Context, title: &str, add_contents: impl FnOnce(&mut egui::Ui)) {
        egui::Window::new(title)
            .collapsible(false)
            .resizable(false)
            .anchor(Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, add_contents);
    }

    fn start_dialog(&mut self, ctx: &egui::Context) {
        let Some(temperature) = self.awaiting else {
            return;
        };
        let shown = temperature.map_or_else(|| "unknown".to_owned(), |t| format!("{t:.2}K"));
        let mut command = None;
        Self::dialog(ctx, "Measurement loop", |ui| {
            ui.label(format!(
                "Start new measurement loop at the current temperature: {shown}?"
            ));
            ui.label("If you answer No, close the window to save the experiment.");
            ui.horizontal(|ui| {
                if ui.button("Yes, go on").clicked() {
                    command = Some(GuiCommand::StartLoop);
                }
                if ui.button("Show me the temperature").clicked() {
                    command = Some(GuiCommand::RefreshTemperature);
                }
                if ui.button("No, I have done").clicked() {
                    command = Some(GuiCommand::Finish);
                }
            });
        });
        if let Some(cmd) = command {
            if cmd != GuiCommand::RefreshTemperature {
                self.awaiting = None;
            }
            if cmd == GuiCommand::Finish {
                self.operator_done = true;
            }
            self.tx_cmd.send(cmd).ok();
        }
    }

    fn close_dialogs(&mut self, ctx: &egui::Context) {
        match self.close_stage {
            CloseStage::Running => {}
            CloseStage::AskSave => {
                let mut answer = None;
                Self::dialog(ctx, "Closing the experiment", |ui| {
                    ui.label("Save data?");
                    ui.horizontal(|ui| {
                        if ui.button("Yes").clicked() {
                            answer = Some(true);
                        }
                        if ui.button("No").clicked() {
                            answer = Some(false);
                        }
                    });
                });
                match answer {
                    Some(true) => {
                        self.save();
                        self.close_stage = CloseStage::AskSwitchOff;
                    }
                    Some(false) => {
                        info!("Data not saved");
                        if self.reader.is_empty() {
                            warn!("Data empty");
                        }
                        self.close_stage = CloseStage::AskSwitchOff;
                    }
                    None => {}
                }
            }
            CloseStage::AskSwitchOff => {
                let mut answer = None;
                Self::dialog(ctx, "Closing the experiment", |ui| {
                    ui.label("Switch off the source?");
                    ui.horizontal(|ui| {
                        if ui.button("Yes").clicked() {
                            answer = Some(true);
                        }
                        if ui.button("No").clicked() {
                            answer = Some(false);
                        }
                    });
                });
                if let Some(switch_off) = answer {
                    if switch_off {
                        self.switch_off();
                    }
                    self.finish(ctx);
                }
            }
        }
    }

    fn draw_trace(
        &self,
        ui: &mut egui::Ui,
        id: &str,
        y_label: &str,
        values: &[f64],
        color: Color32,
        height: f32,
    ) {
        let points: Vec<[f64; 2]> = self
            .window
            .timestamp
            .iter()
            .zip(values)
            .map(|(t, v)| [(t - self.origin) / 60.0, *v])
            .collect();
        let last = values
            .last()
            .map_or_else(String::new, |v| format!("{v:.3e}"));
        ui.horizontal(|ui| {
            let width = (ui.available_width() - 110.0).max(120.0);
            Plot::new(id)
                .width(width)
                .height(height)
                .x_axis_label("Time [min]")
                .y_axis_label(y_label)
                .allow_scroll(false)
                .show(ui, |plot_ui| {
                    plot_ui.line(Line::new(PlotPoints::new(points.clone())).color(color));
                    plot_ui.points(Points::new(PlotPoints::new(points)).radius(2.0).color(color));
                });
            ui.label(RichText::new(last).monospace().color(Color32::WHITE));
        });
    }
}

impl eframe::App for BenchApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // 1. 关闭请求：先拦截，再停止并回收采集线程
        if ctx.input(|i| i.viewport().close_requested()) && !self.allowed_to_close {
            ctx.send_viewport_cmd(egui::ViewportCommand::CancelClose);
            if self.close_stage == CloseStage::Running {
                info!("Close requested, stopping the acquisition");
                self.begin_close();
            }
        }

        // 2. 消息与定时刷新
        self.drain_messages();
        self.refresh_window(false);
        ctx.request_repaint_after(REFRESH_INTERVAL);

        // 3. 界面
        ctx.set_visuals(egui::Visuals::dark());

        egui::SidePanel::left("status").min_width(260.0).show(ctx, |ui| {
            ui.add_space(10.0);
            ui.heading(&self.config.sample_name);
            ui.label(&self.plan.title);
            ui.separator();
            let sweeping = self.control.is_started();
            let state = match (self.close_stage, sweeping, self.operator_done) {
                (CloseStage::Running, true, _) => "Sweeping",
                (CloseStage::Running, false, false) => "Waiting",
                (CloseStage::Running, false, true) => "Done, close the window to save",
                _ => "Closing",
            };
            ui.label(RichText::new(state).strong().color(Color32::YELLOW));
            // 扫描中显示最新记录点, 空闲时显示采集线程推送的实时温度
            let recorded = self.window.temperature.last().copied();
            let temperature = if sweeping {
                recorded
            } else {
                self.live_temperature.or(recorded)
            };
            match temperature {
                Some(t) => ui.label(format!("Current Temperature: {t:.2}K")),
                None => ui.label("Current Temperature: --"),
            };
            ui.label(format!("Recorded points: {}", self.reader.len()));
            ui.separator();
            egui::ScrollArea::vertical()
                .stick_to_bottom(true)
                .show(ui, |ui| {
                    for m in &self.log_messages {
                        ui.monospace(m);
                    }
                });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            if self.continuous_notice {
                ui.horizontal(|ui| {
                    ui.label(
                        RichText::new(
                            "Continuous mode: close the window to stop and save the measurements",
                        )
                        .color(Color32::from_rgb(0, 255, 255)),
                    );
                    if ui.button("OK").clicked() {
                        self.continuous_notice = false;
                    }
                });
            }
            let height = ((ui.available_height() - 20.0) / 3.0).max(80.0);
            let probe = match self.plan.mode {
                SourceMode::Current => &self.window.voltage,
                SourceMode::Voltage => &self.window.current,
            };
            self.draw_trace(
                ui,
                "resistance",
                "Resistance [Ohm]",
                &self.window.resistance,
                Color32::from_rgb(255, 165, 0),
                height,
            );
            self.draw_trace(ui, "probe", self.plan.mode.probe_label(), probe, Color32::RED, height);
            self.draw_trace(
                ui,
                "temperature",
                "Temperature [K]",
                &self.window.temperature,
                Color32::YELLOW,
                height,
            );
        });

        // 4. 对话框
        if self.close_stage == CloseStage::Running {
            self.start_dialog(ctx);
        }
        self.close_dialogs(ctx);
    }
}
