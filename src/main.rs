// src/main.rs
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use eframe::egui;
use env_logger::{Builder, Env, Target};
use log::{error, info};

use ecbench::config::ExperimentConfig;
use ecbench::gui::BenchApp;
use ecbench::rig::Rig;
use ecbench::sweep::SweepPlan;

const DEFAULT_CONFIG: &str = "exp_ec.toml";

// 日志写入与配置同名的 .log 文件
fn init_logging(log_file: &Path) -> bool {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} {} {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
            record.level(),
            record.args()
        )
    });
    let to_file = match File::create(log_file) {
        Ok(file) => {
            builder.target(Target::Pipe(Box::new(file)));
            true
        }
        Err(_) => false,
    };
    builder.init();
    to_file
}

fn run() -> Result<i32> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let log_path = config_path.with_extension("log");
    let log_file = init_logging(&log_path).then_some(log_path);

    let config = ExperimentConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let plan = SweepPlan::from_config(&config);
    info!("### Start experiment: {} ###", plan.title);

    // 1. 连接仪器 (失败则直接退出)
    let rig = match Rig::connect(&config, plan.first_setpoint()) {
        Ok(rig) => rig,
        Err(e) => {
            error!("Cannot connect the instruments: {e}");
            return Ok(1);
        }
    };

    // 2. 启动界面, 采集线程由 BenchApp 创建
    let exit_code = Arc::new(AtomicI32::new(0));
    let app_exit = exit_code.clone();
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_title(plan.title.clone()),
        ..Default::default()
    };
    let title = plan.title.clone();
    eframe::run_native(
        &title,
        options,
        Box::new(move |_cc| Box::new(BenchApp::new(config, plan, rig, log_file, app_exit))),
    )
    .map_err(|e| anyhow!("GUI error: {e}"))?;

    Ok(exit_code.load(Ordering::SeqCst))
}

fn main() -> ExitCode {
    match run() {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(code.clamp(1, 255) as u8),
        Err(e) => {
            error!("{e:#}");
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
