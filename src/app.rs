use crate::engine::{DialogueEngine, PendingReply, TurnError};
use crate::event::AppEvent;
use crate::sanitize::is_safe_media_url;
use crate::script::MediaRef;
use crate::session::{store, ConversationRecord, Message, Role};
use crate::theme::Theme;
use crate::ui::markup;
use chrono::Utc;
use eframe::egui::{self, RichText, ScrollArea};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::time::Duration;
use tokio::runtime::Handle;

pub struct CampfireApp {
    rx: Receiver<AppEvent>,
    tx: Sender<AppEvent>,
    runtime: Handle,
    engine: DialogueEngine,
    theme: Theme,
    input_buffer: String,
    diagnostics_log: Vec<String>,
    scroll_to_bottom: bool,
}

impl CampfireApp {
    pub fn new(
        rx: Receiver<AppEvent>,
        tx: Sender<AppEvent>,
        runtime: Handle,
        engine: DialogueEngine,
        startup_warnings: Vec<String>,
    ) -> Self {
        let mut app = Self {
            rx,
            tx,
            runtime,
            engine,
            theme: Theme::default(),
            input_buffer: String::new(),
            diagnostics_log: Vec::new(),
            scroll_to_bottom: true,
        };
        for warning in startup_warnings {
            app.log_diagnostic(warning);
        }
        app
    }

    pub fn apply_theme(&self, ctx: &egui::Context) {
        self.theme.apply_visuals(ctx);
    }

    fn log_diagnostic(&mut self, message: impl Into<String>) {
        self.diagnostics_log
            .push(format!("[{}] {}", Utc::now().format("%H:%M:%S"), message.into()));
    }

    fn submit_message(&mut self, ctx: &egui::Context) {
        let Some(pending) = self.engine.send_user_message(&self.input_buffer) else {
            return;
        };
        self.input_buffer.clear();
        self.scroll_to_bottom = true;
        self.schedule_reply(ctx, pending);
        ctx.request_repaint();
    }

    fn schedule_reply(&self, ctx: &egui::Context, pending: PendingReply) {
        let tx = self.tx.clone();
        let ctx = ctx.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(pending.delay).await;
            let _ = tx.send(AppEvent::ReplyTimerElapsed {
                generation: pending.generation,
            });
            ctx.request_repaint();
        });
    }

    fn drain_events(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(AppEvent::ReplyTimerElapsed { generation }) => {
                    self.apply_reply_timer(generation);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.log_diagnostic("event channel disconnected");
                    break;
                }
            }
        }
    }

    fn apply_reply_timer(&mut self, generation: u64) {
        match self.engine.advance_turn(generation) {
            Ok(_) => {
                self.scroll_to_bottom = true;
                self.persist();
            }
            Err(TurnError::StaleGeneration) => {
                self.log_diagnostic("ignored reply timer from a previous conversation");
            }
            Err(err) => {
                // The banner itself renders from the engine's last_error.
                self.log_diagnostic(format!("turn failed: {err}"));
            }
        }
    }

    fn persist(&mut self) {
        let record = ConversationRecord::new(self.engine.messages().to_vec());
        if let Err(err) = store::save(&record) {
            self.log_diagnostic(format!("failed to persist conversation: {err}"));
        }
    }

    fn reset_conversation(&mut self) {
        self.engine.reset();
        self.input_buffer.clear();
        self.scroll_to_bottom = true;
        if let Err(err) = store::clear() {
            self.log_diagnostic(format!("failed to clear stored conversation: {err}"));
        }
    }

    fn render_top_bar(&mut self, ctx: &egui::Context) {
        let (status_label, status_color) = if self.engine.is_awaiting_response() {
            ("Telling...", self.theme.warning)
        } else {
            ("Flow intact", self.theme.success)
        };

        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.strong("Campfire");
                ui.separator();
                ui.label(RichText::new(status_label).color(status_color));
                ui.separator();
                ui.label(
                    RichText::new(format!(
                        "scene {} of {}",
                        self.engine.cursor() + 1,
                        self.engine.script_len().max(1)
                    ))
                    .color(self.theme.text_muted),
                );
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui
                        .add(egui::Button::new("Reset").stroke(self.theme.subtle_button_stroke()))
                        .clicked()
                    {
                        self.reset_conversation();
                    }
                });
            });
        });
    }

    fn render_center_panel(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let transcript_height = (ui.available_height() - 150.0).max(120.0);
            self.theme.transcript_frame().show(ui, |ui| {
                ScrollArea::vertical()
                    .id_salt("chat_transcript")
                    .max_height(transcript_height)
                    .stick_to_bottom(true)
                    .show(ui, |ui| {
                        ui.set_min_width(ui.available_width());
                        for message in self.engine.messages() {
                            render_message(ui, &self.theme, message);
                            ui.add_space(self.theme.spacing_8);
                        }

                        if self.engine.is_awaiting_response() {
                            ui.label(
                                RichText::new("the fire is thinking...")
                                    .color(self.theme.text_muted)
                                    .italics()
                                    .size(12.0),
                            );
                            ui.add_space(self.theme.spacing_24);
                        }

                        if self.scroll_to_bottom {
                            ui.scroll_to_cursor(Some(egui::Align::BOTTOM));
                        }
                    });
            });
            self.scroll_to_bottom = false;

            ui.separator();
            self.render_error_banner(ui);
            self.render_diagnostics(ui);
            ui.separator();
            self.render_composer(ui, ctx);
        });
    }

    fn render_error_banner(&mut self, ui: &mut egui::Ui) {
        let Some(error) = self.engine.last_error().map(str::to_string) else {
            return;
        };
        let mut dismissed = false;
        self.theme.card_frame().show(ui, |ui| {
            ui.horizontal(|ui| {
                ui.label(RichText::new(&error).color(self.theme.danger).size(13.0));
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui
                        .add(
                            egui::Button::new("Dismiss")
                                .stroke(self.theme.subtle_button_stroke()),
                        )
                        .clicked()
                    {
                        dismissed = true;
                    }
                });
            });
        });
        if dismissed {
            self.engine.dismiss_error();
        }
    }

    fn render_diagnostics(&mut self, ui: &mut egui::Ui) {
        if self.diagnostics_log.is_empty() {
            return;
        }
        egui::CollapsingHeader::new("Diagnostics")
            .default_open(false)
            .show(ui, |ui| {
                ScrollArea::vertical()
                    .id_salt("diagnostics_log")
                    .max_height(90.0)
                    .stick_to_bottom(true)
                    .show(ui, |ui| {
                        for entry in &self.diagnostics_log {
                            ui.label(RichText::new(entry).color(self.theme.text_muted).size(12.0));
                        }
                    });
            });
    }

    fn render_composer(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        let input_enabled = !self.engine.is_awaiting_response();
        let hint = if input_enabled {
            "Say anything to move the story forward"
        } else {
            "Waiting for the next scene..."
        };

        let mut send_now = false;
        ui.horizontal(|ui| {
            self.theme.composer_frame().show(ui, |ui| {
                let response = ui.add_enabled(
                    input_enabled,
                    egui::TextEdit::singleline(&mut self.input_buffer)
                        .desired_width(ui.available_width() - 90.0)
                        .hint_text(hint),
                );
                if response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                    send_now = true;
                }
            });

            let clicked = ui
                .add_enabled(
                    input_enabled && !self.input_buffer.trim().is_empty(),
                    egui::Button::new(
                        RichText::new("Send").color(self.theme.text_on_accent),
                    )
                    .fill(self.theme.accent_muted)
                    .stroke(self.theme.primary_button_stroke())
                    .min_size(egui::vec2(0.0, self.theme.button_height)),
                )
                .clicked();
            send_now |= clicked;
        });

        if send_now && input_enabled {
            self.submit_message(ctx);
        }
    }
}

fn render_message(ui: &mut egui::Ui, theme: &Theme, message: &Message) {
    let (align, fill) = match message.role {
        Role::User => (egui::Align::Max, theme.bubble_user),
        Role::Ai => (egui::Align::Min, theme.bubble_ai),
        Role::System => (egui::Align::Center, theme.surface_3),
    };

    ui.with_layout(egui::Layout::top_down(align), |ui| {
        ui.set_max_width(ui.available_width() * 0.85);
        theme.bubble_frame(fill).show(ui, |ui| {
            markup::show(ui, theme, &message.html);
            if let Some(media) = &message.media {
                ui.add_space(theme.spacing_8);
                render_media(ui, theme, media);
            }
            ui.add_space(theme.spacing_4);
            ui.label(
                RichText::new(message.timestamp.format("%H:%M").to_string())
                    .color(theme.text_muted)
                    .size(10.0),
            );
        });
    });
}

fn render_media(ui: &mut egui::Ui, theme: &Theme, media: &MediaRef) {
    theme.media_frame().show(ui, |ui| {
        if !is_safe_media_url(&media.src) {
            ui.label(
                RichText::new("Invalid media")
                    .color(theme.warning)
                    .size(12.0),
            );
            return;
        }

        // Images carry alt text, videos a title; that convention is the
        // only kind marker the descriptor has.
        let kind = if media.alt.is_some() { "Image" } else { "Video" };
        ui.label(RichText::new(kind).color(theme.text_muted).size(11.0));
        if let Some(caption) = media.caption() {
            ui.label(RichText::new(caption).color(theme.text_primary).size(13.0));
        }
        ui.hyperlink_to(
            RichText::new(&media.src)
                .color(theme.accent_primary)
                .size(12.0),
            &media.src,
        );
    });
}

impl eframe::App for CampfireApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events();
        if self.engine.is_awaiting_response() {
            // Keep the event drain alive while a reply timer is pending.
            ctx.request_repaint_after(Duration::from_millis(120));
        }
        self.render_top_bar(ctx);
        self.render_center_panel(ctx);
    }
}
