// src/main.rs
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]
mod bench;
mod config;
mod drivers;
mod engine;
mod gui;
mod recorder;
mod render;
mod settings;
mod types;

use anyhow::{anyhow, Context, Result};
use eframe::egui;
use log::{info, warn};

use crate::config::BenchConfig;
use crate::recorder::ActionLog;
use crate::settings::Settings;

const SETTINGS_PATH: &str = "utils/settings.conf";

// 入口函数
fn main() -> Result<()> {
    env_logger::init();
    let settings = Settings::open(SETTINGS_PATH)?;
    let config = BenchConfig::load(&settings)
        .with_context(|| format!("loading {}", settings.path().display()))?;
    info!("configuration: {config:?}");
    if let Err(e) = ActionLog::new(&config.log_path).record("Application started") {
        warn!("action log: {e}");
    }

    let viewport = egui::ViewportBuilder::default()
        .with_inner_size([1280.0, 800.0])
        .with_min_inner_size([900.0, 600.0])
        .with_title("Test Bench");
    let options = eframe::NativeOptions {
        viewport,
        ..Default::default()
    };
    eframe::run_native(
        "testbench",
        options,
        Box::new(move |cc| Box::new(gui::MonitorApp::new(cc.egui_ctx.clone(), settings, config))),
    )
    .map_err(|e| anyhow!("window: {e}"))
}
