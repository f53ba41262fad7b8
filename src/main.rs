#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod app;
mod config;
mod error;
mod ffmpeg;
mod logging;
mod sync;
mod ui;
mod utils;

use app::FpsSyncApp;
use config::AppConfig;
use eframe::egui;
use log::{warn, LevelFilter};

fn main() -> eframe::Result<()> {
    logging::init(LevelFilter::Info);

    let config = AppConfig::load().unwrap_or_else(|e| {
        warn!("{:#}, using default settings", e);
        let mut config = AppConfig::default();
        config.apply_env_overrides();
        config
    });

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([760.0, 720.0])
            .with_min_inner_size([560.0, 520.0])
            .with_title("FPS Audio Sync")
            .with_drag_and_drop(true),
        ..Default::default()
    };

    eframe::run_native(
        "FPS Audio Sync",
        options,
        Box::new(move |cc| Ok(Box::new(FpsSyncApp::new(cc, config)?))),
    )
}
