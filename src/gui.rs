// src/gui.rs
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

use eframe::egui;
use egui::Color32;
use egui_plot::{Legend, Line, Plot, PlotPoints};
use log::warn;

use crate::bench::{list_devices, open_device, Bench};
use crate::config::{
    BenchConfig, KEY_CONNECTION, KEY_FILE_SIZE_LIMIT, KEY_LOGGING_ENABLED, KEY_LOG_INTERVAL,
};
use crate::drivers::{RenderError, SeriesSnapshot};
use crate::engine::LoopState;
use crate::recorder::ActionLog;
use crate::render::DisplaySink;
use crate::settings::Settings;
use crate::types::{ConnectionMode, EngineEvent};

const CHANNEL_COLORS: [Color32; 4] = [
    Color32::from_rgb(255, 60, 60),
    Color32::from_rgb(60, 220, 60),
    Color32::from_rgb(70, 110, 255),
    Color32::from_rgb(255, 220, 0),
];
const VISIBLE_LOG_LINES: usize = 8;

/// Display collaborator handed to the render loop: keeps the newest frame
/// for the next egui pass and wakes the UI thread.
pub struct PlotFeed {
    latest: Arc<Mutex<Option<SeriesSnapshot>>>,
    ctx: egui::Context,
}

impl DisplaySink for PlotFeed {
    fn present(&mut self, snapshot: SeriesSnapshot) -> Result<(), RenderError> {
        let mut slot = self
            .latest
            .lock()
            .map_err(|_| RenderError::DisplayClosed)?;
        *slot = Some(snapshot);
        drop(slot);
        self.ctx.request_repaint();
        Ok(())
    }
}

pub struct MonitorApp {
    ctx: egui::Context,
    settings: Settings,
    config: BenchConfig,
    actions: ActionLog,

    // 采集会话
    bench: Option<Bench>,
    frame: Arc<Mutex<Option<SeriesSnapshot>>>,
    tx: Sender<EngineEvent>,
    rx: Receiver<EngineEvent>,
    unresponsive: bool,

    // 设置面板 (下次启动生效)
    connection_mode: ConnectionMode,
    interval_secs: f64,
    size_limit_mb: f64,
    logging_enabled: bool,

    devices: Vec<String>,
    log_messages: Vec<String>,
}

impl MonitorApp {
    pub fn new(ctx: egui::Context, settings: Settings, config: BenchConfig) -> Self {
        let (tx, rx) = channel();
        let mut app = Self {
            ctx,
            actions: ActionLog::new(&config.log_path),
            settings,
            bench: None,
            frame: Arc::new(Mutex::new(None)),
            tx,
            rx,
            unresponsive: false,
            connection_mode: config.connection,
            interval_secs: config.log_interval.as_secs_f64(),
            size_limit_mb: config.file_size_limit_mb,
            logging_enabled: config.logging_enabled,
            config,
            devices: Vec::new(),
            log_messages: Vec::new(),
        };
        app.refresh_devices();
        app.start_session();
        app
    }

    // 同时写入界面日志和 actions.txt
    fn log(&mut self, msg: &str) {
        if let Err(e) = self.actions.record(msg) {
            warn!("action log: {e}");
        }
        self.log_messages.push(format!("> {msg}"));
        if self.log_messages.len() > VISIBLE_LOG_LINES {
            self.log_messages.remove(0);
        }
    }

    fn state(&self) -> LoopState {
        self.bench.as_ref().map_or(LoopState::Idle, |b| b.state())
    }

    fn refresh_devices(&mut self) {
        self.log("Refreshing connected devices");
        match list_devices(self.connection_mode) {
            Ok(devices) => {
                if devices.is_empty() {
                    self.log("No device detected");
                }
                for device in &devices {
                    self.log(&format!("Found {device}"));
                }
                self.devices = devices;
            }
            Err(e) => {
                self.devices.clear();
                self.log(&format!("Device enumeration failed: {e:#}"));
            }
        }
    }

    fn start_session(&mut self) {
        self.stop_session();
        self.unresponsive = false;
        let device = match open_device(&self.config) {
            Ok(device) => device,
            Err(e) => {
                self.log(&format!("Failed to open device: {e:#}"));
                return;
            }
        };
        let feed = PlotFeed {
            latest: self.frame.clone(),
            ctx: self.ctx.clone(),
        };
        match Bench::start(&self.config, device, feed, self.tx.clone()) {
            Ok(bench) => self.bench = Some(bench),
            Err(e) => self.log(&format!("Failed to start acquisition: {e:#}")),
        }
    }

    fn stop_session(&mut self) {
        if let Some(mut bench) = self.bench.take() {
            if let Some(Err(e)) = bench.shutdown() {
                warn!("acquisition ended with: {e}");
            }
        }
        self.drain_events();
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            if matches!(event, EngineEvent::DeviceUnresponsive { .. }) {
                self.unresponsive = true;
            }
            self.log(&event.describe());
        }
    }

    fn persist(&mut self, key: &str, value: String, message: String) {
        if let Err(e) = self.settings.set(key, &value) {
            self.log(&format!("Failed to save setting {key}: {e:#}"));
            return;
        }
        self.log(&message);
    }

    fn settings_panel(&mut self, ui: &mut egui::Ui) {
        ui.label("SETTINGS (applied on next start)");
        ui.horizontal(|ui| {
            let before = self.connection_mode;
            ui.selectable_value(&mut self.connection_mode, ConnectionMode::Simulation, "SIM");
            ui.selectable_value(&mut self.connection_mode, ConnectionMode::Hardware, "REAL");
            if self.connection_mode != before {
                self.config.connection = self.connection_mode;
                let mode = self.connection_mode;
                self.persist(KEY_CONNECTION, mode.to_string(), format!("Connection mode is set to {mode}"));
                self.refresh_devices();
            }
        });
        ui.horizontal(|ui| {
            ui.label("Connected devices");
            if ui.button("Refresh").clicked() {
                self.refresh_devices();
            }
        });
        if self.devices.is_empty() {
            ui.monospace("No device detected");
        }
        for device in &self.devices {
            ui.monospace(device);
        }
        let interval = ui.add(
            egui::DragValue::new(&mut self.interval_secs)
                .speed(0.1)
                .clamp_range(0.0..=3600.0)
                .prefix("Log interval: ")
                .suffix(" s"),
        );
        if interval.changed() {
            self.config.log_interval = std::time::Duration::from_secs_f64(self.interval_secs);
            let v = self.interval_secs;
            self.persist(KEY_LOG_INTERVAL, v.to_string(), format!("Log interval is set to {v} seconds"));
        }
        let size = ui.add(
            egui::DragValue::new(&mut self.size_limit_mb)
                .speed(1.0)
                .clamp_range(0.0..=4096.0)
                .prefix("File size limit: ")
                .suffix(" MB"),
        );
        if size.changed() {
            self.config.file_size_limit_mb = self.size_limit_mb;
            let v = self.size_limit_mb;
            self.persist(KEY_FILE_SIZE_LIMIT, v.to_string(), format!("File size limit is set to {v} megabytes"));
        }
        if ui.checkbox(&mut self.logging_enabled, "Record samples").changed() {
            self.config.logging_enabled = self.logging_enabled;
            let on = self.logging_enabled;
            let message = if on { "Logging is turned on" } else { "Logging is turned off" };
            self.persist(KEY_LOGGING_ENABLED, on.to_string(), message.to_owned());
        }
        ui.label(format!("Records: {}", self.config.log_path.display()));
    }
}

impl eframe::App for MonitorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // 1. 处理后台消息
        self.drain_events();
        let halted = self
            .bench
            .as_ref()
            .and_then(|b| b.status())
            .is_some_and(|s| s.halted());
        if halted {
            self.unresponsive = true;
        }
        if self.unresponsive && self.bench.is_some() {
            // Acquisition already ended; join it and release the device.
            self.stop_session();
        }

        // 2. 控制面板
        egui::SidePanel::left("controls").min_width(280.0).show(ctx, |ui| {
            ui.add_space(10.0);
            ui.heading("Test Bench");
            ui.separator();

            let state = self.state();
            let running = matches!(state, LoopState::Running | LoopState::Stopping);
            ui.horizontal(|ui| {
                let btn_txt = if running { "STOP" } else { "START" };
                if ui.button(btn_txt).clicked() {
                    if running {
                        self.stop_session();
                    } else {
                        self.start_session();
                    }
                }
                if ui.button("RESET VIEW").clicked() {
                    if let Some(bench) = &self.bench {
                        bench.buffer().reset();
                    }
                    if let Ok(mut frame) = self.frame.lock() {
                        *frame = None;
                    }
                }
            });
            let sets = self.bench.as_ref().map_or(0, |b| b.buffer().len());
            ui.label(format!("State: {state:?}  ({sets} sample sets buffered)"));
            if running && !self.bench.as_ref().is_some_and(|b| b.rendering()) {
                ui.label(egui::RichText::new("Display updates stopped").color(Color32::YELLOW));
            }
            if self.unresponsive {
                ui.label(
                    egui::RichText::new("Device unresponsive: acquisition halted")
                        .color(Color32::RED)
                        .strong(),
                );
            }

            ui.add_space(20.0);
            ui.separator();
            self.settings_panel(ui);

            ui.add_space(10.0);
            ui.separator();
            egui::ScrollArea::vertical().max_height(160.0).show(ui, |ui| {
                for m in &self.log_messages {
                    ui.monospace(m);
                }
            });
        });

        // 3. 波形
        let snapshot = self.frame.lock().ok().and_then(|f| f.clone());
        egui::CentralPanel::default().show(ctx, |ui| {
            let Some(snapshot) = snapshot.filter(|s| !s.is_empty()) else {
                ui.label("No data yet.");
                return;
            };
            ui.label(format!("{} sample sets", snapshot.len()));
            Plot::new("channels")
                .legend(Legend::default())
                .show(ui, |plot_ui| {
                    for (idx, channel) in snapshot.channels.iter().enumerate() {
                        let points = snapshot.points(idx);
                        if points.is_empty() {
                            continue;
                        }
                        plot_ui.line(
                            Line::new(PlotPoints::new(points))
                                .name(channel.to_string())
                                .color(CHANNEL_COLORS[idx % CHANNEL_COLORS.len()])
                                .width(2.0),
                        );
                    }
                });
        });
    }
}

impl Drop for MonitorApp {
    fn drop(&mut self) {
        // Render loop first, then acquisition, then the device.
        self.stop_session();
        self.log("Application closed");
    }
}
