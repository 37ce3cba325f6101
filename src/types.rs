// src/types.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;

// 源表工作模式: 恒流源测电压 / 恒压源测电流
#[derive(PartialEq, Eq, Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    Current,
    Voltage,
}

impl SourceMode {
    /// Name of the sourced quantity, as used in run titles.
    pub fn quantity(self) -> &'static str {
        match self {
            SourceMode::Current => "current",
            SourceMode::Voltage => "voltage",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            SourceMode::Current => "A",
            SourceMode::Voltage => "V",
        }
    }

    /// Axis label of the measured (complementary) quantity.
    pub fn probe_label(self) -> &'static str {
        match self {
            SourceMode::Current => "Voltage [V]",
            SourceMode::Voltage => "Current [A]",
        }
    }

    pub fn compliance_warning(self) -> &'static str {
        match self {
            SourceMode::Current => "Voltage compliance",
            SourceMode::Voltage => "Current compliance",
        }
    }
}

// GUI 发给采集线程的命令
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuiCommand {
    // 开始新一轮扫描
    StartLoop,
    // 重新读取温度
    RefreshTemperature,
    // 结束实验
    Finish,
}

// 采集线程发给 GUI 的消息
#[derive(Clone, Debug, PartialEq)]
pub enum EngineMessage {
    Log(String),
    // 空闲时的实时温度 (None = 读取失败)
    Temperature(Option<f64>),
    // 等待操作员确认开始下一轮扫描
    AwaitingStart(Option<f64>),
    SweepFinished { recorded: usize },
    // 线程即将退出
    Finished,
}

/// Flags shared by the acquisition thread and the GUI.
///
/// `started` is written by the engine only and is true while a sweep runs; `stop` is written
/// by the GUI only.
#[derive(Clone, Debug, Default)]
pub struct RunControl {
    started: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}
