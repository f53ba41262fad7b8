use crate::app::{FpsSyncApp, VideoSlot};
use crate::ffmpeg::MediaProbeResult;
use crate::sync::{
    EncodeSettings, JobState, RatioBasis, SyncMode, AUDIO_BITRATES, AUDIO_CODECS, LANGUAGES,
    SAMPLE_RATES,
};
use crate::utils::{format_duration, format_remaining};
use eframe::egui;
use std::path::PathBuf;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm", "ts", "m2ts", "flv"];

enum RowAction {
    None,
    Picked(PathBuf),
    Edited,
}

pub fn render_main_window(app: &mut FpsSyncApp, ctx: &egui::Context) {
    // Status bar at bottom
    egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
        render_status_bar(app, ui);
    });

    egui::CentralPanel::default().show(ctx, |ui| {
        render_inputs(app, ui);
        ui.separator();

        render_options(app, ui);
        ui.separator();

        render_controls(app, ui);
        ui.separator();

        render_log(app, ui);
    });
}

fn render_status_bar(app: &FpsSyncApp, ui: &mut egui::Ui) {
    ui.horizontal(|ui| {
        ui.label(&app.status_message);

        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
            if app.ffmpeg_available {
                ui.weak(format!("ffmpeg: {}", app.orchestrator.ffmpeg().ffmpeg_path()));
            } else {
                ui.colored_label(egui::Color32::LIGHT_RED, "ffmpeg not found");
            }
        });
    });
}

fn render_inputs(app: &mut FpsSyncApp, ui: &mut egui::Ui) {
    ui.heading("Videos");
    ui.weak("Drop files on the window, or browse. The first drop sets the source.");
    ui.add_space(4.0);

    let enabled = !app.is_running();
    for slot in [VideoSlot::Source, VideoSlot::Target] {
        let (label, path, info) = match slot {
            VideoSlot::Source => ("Source (audio from):", &mut app.source_path, app.source_info.as_ref()),
            VideoSlot::Target => ("Target (video to):", &mut app.target_path, app.target_info.as_ref()),
        };

        match render_file_row(ui, label, path, info, enabled) {
            RowAction::Picked(path) => app.select_video(slot, path),
            RowAction::Edited => app.path_edited(slot),
            RowAction::None => {}
        }
    }
}

fn render_file_row(
    ui: &mut egui::Ui,
    label: &str,
    path: &mut String,
    info: Option<&MediaProbeResult>,
    enabled: bool,
) -> RowAction {
    let mut action = RowAction::None;

    ui.horizontal(|ui| {
        ui.add_sized([140.0, 20.0], egui::Label::new(label));
        let edit = ui.add_enabled(
            enabled,
            egui::TextEdit::singleline(path).desired_width(ui.available_width() - 90.0),
        );
        if edit.changed() {
            action = RowAction::Edited;
        }
        if ui.add_enabled(enabled, egui::Button::new("Browse...")).clicked() {
            if let Some(picked) = rfd::FileDialog::new()
                .add_filter("Video", VIDEO_EXTENSIONS)
                .add_filter("All Files", &["*"])
                .pick_file()
            {
                action = RowAction::Picked(picked);
            }
        }
    });

    if let Some(info) = info {
        ui.horizontal(|ui| {
            ui.add_space(144.0);
            ui.weak(format!(
                "{} fps ({:.3})  |  {}  |  {}  |  {} audio stream(s)",
                info.frame_rate,
                info.frame_rate.as_f64(),
                format_duration(info.duration_seconds),
                info.video_codec,
                info.audio_stream_indexes.len()
            ));
        });
    }

    action
}

fn render_options(app: &mut FpsSyncApp, ui: &mut egui::Ui) {
    ui.heading("Options");
    let enabled = !app.is_running();

    ui.add_enabled_ui(enabled, |ui| {
        egui::Grid::new("options_grid")
            .num_columns(2)
            .spacing([12.0, 6.0])
            .show(ui, |ui| {
                render_encode_grid(&mut app.config.encode, ui);
            });

        ui.add_space(4.0);
        ui.horizontal(|ui| {
            ui.label("Mode:");
            for mode in SyncMode::all() {
                ui.radio_value(&mut app.mode, *mode, mode.name());
            }
        });

        let mut exact = app.config.encode.ratio_basis == RatioBasis::Duration;
        if ui
            .checkbox(&mut exact, "Stretch to exact duration")
            .on_hover_text("Use the duration ratio instead of the frame-rate ratio")
            .changed()
        {
            app.config.encode.ratio_basis = if exact {
                RatioBasis::Duration
            } else {
                RatioBasis::FrameRate
            };
        }
    });

    if let (Some(source), Some(target)) = (&app.source_info, &app.target_info) {
        let ratio = match app.config.encode.ratio_basis {
            RatioBasis::FrameRate => source.frame_rate.as_f64() / target.frame_rate.as_f64(),
            RatioBasis::Duration if source.duration_seconds > 0.0 => {
                target.duration_seconds / source.duration_seconds
            }
            RatioBasis::Duration => 0.0,
        };
        if ratio > 0.0 {
            ui.weak(format!(
                "Audio will be scaled by {:.6} ({:+.3}%)",
                ratio,
                (ratio - 1.0) * 100.0
            ));
        }
    }
}

fn render_encode_grid(encode: &mut EncodeSettings, ui: &mut egui::Ui) {
    ui.label("Audio codec:");
    let codec_label = AUDIO_CODECS
        .iter()
        .find(|(value, _)| *value == encode.audio_codec)
        .map(|(_, label)| *label)
        .unwrap_or(encode.audio_codec.as_str())
        .to_string();
    egui::ComboBox::from_id_salt("audio_codec")
        .selected_text(codec_label)
        .show_ui(ui, |ui| {
            for (value, label) in AUDIO_CODECS {
                ui.selectable_value(&mut encode.audio_codec, value.to_string(), *label);
            }
        });
    ui.end_row();

    ui.label("Bitrate:");
    egui::ComboBox::from_id_salt("audio_bitrate")
        .selected_text(encode.audio_bitrate.clone())
        .show_ui(ui, |ui| {
            for bitrate in AUDIO_BITRATES {
                ui.selectable_value(&mut encode.audio_bitrate, bitrate.to_string(), *bitrate);
            }
        });
    ui.end_row();

    ui.label("Sample rate:");
    egui::ComboBox::from_id_salt("sample_rate")
        .selected_text(format!("{} Hz", encode.sample_rate))
        .show_ui(ui, |ui| {
            for rate in SAMPLE_RATES {
                ui.selectable_value(&mut encode.sample_rate, *rate, format!("{} Hz", rate));
            }
        });
    ui.end_row();

    ui.label("Language:");
    egui::ComboBox::from_id_salt("language")
        .selected_text(encode.language.clone())
        .width(220.0)
        .show_ui(ui, |ui| {
            for language in LANGUAGES {
                ui.selectable_value(&mut encode.language, language.to_string(), *language);
            }
        });
    ui.end_row();

    ui.label("Delay:");
    ui.add(
        egui::DragValue::new(&mut encode.delay_ms)
            .speed(10)
            .range(-60_000..=60_000)
            .suffix(" ms"),
    )
    .on_hover_text("Positive adds silence at the start, negative cuts audio");
    ui.end_row();
}

fn render_controls(app: &mut FpsSyncApp, ui: &mut egui::Ui) {
    ui.horizontal(|ui| {
        if ui
            .add_enabled(app.can_start(), egui::Button::new("Start Sync"))
            .clicked()
        {
            app.start_sync();
        }
        if ui
            .add_enabled(app.can_stop(), egui::Button::new("Stop"))
            .clicked()
        {
            app.stop_sync();
        }

        let finished = app.status.state == JobState::Succeeded && app.status.output_path.is_some();
        if ui.add_enabled(finished, egui::Button::new("Open output")).clicked() {
            app.open_output();
        }
        if ui.add_enabled(finished, egui::Button::new("Open folder")).clicked() {
            app.open_output_folder();
        }
    });

    ui.add_space(4.0);
    let status = &app.status;
    let animate = status.state == JobState::Encoding;
    ui.add(
        egui::ProgressBar::new(status.progress)
            .show_percentage()
            .animate(animate),
    );
    ui.horizontal(|ui| {
        ui.label(format!("Elapsed: {}", format_duration(status.elapsed_seconds)));
        ui.separator();
        ui.label(format!(
            "Remaining: {}",
            format_remaining(status.estimated_remaining_seconds)
        ));
        ui.separator();
        ui.label(status.state.label());
    });

    if let Some(message) = &status.message {
        ui.colored_label(egui::Color32::LIGHT_RED, message);
    }
}

fn render_log(app: &mut FpsSyncApp, ui: &mut egui::Ui) {
    ui.horizontal(|ui| {
        ui.heading("Log");
        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
            if ui.small_button("Clear").clicked() {
                app.log_lines.clear();
            }
        });
    });

    egui::ScrollArea::vertical()
        .auto_shrink([false, false])
        .stick_to_bottom(true)
        .id_salt("log_scroll")
        .show(ui, |ui| {
            for line in &app.log_lines {
                ui.monospace(line);
            }
        });
}
