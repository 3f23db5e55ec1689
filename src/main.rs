mod app;
mod engine;
mod event;
mod sanitize;
mod script;
mod session;
mod theme;
mod ui;

use app::CampfireApp;
use eframe::egui;
use engine::{DialogueEngine, EngineConfig};
use script::Script;
use session::store;
use std::path::PathBuf;
use std::sync::mpsc;

fn script_path() -> Option<PathBuf> {
    if let Some(arg) = std::env::args_os().nth(1) {
        return Some(PathBuf::from(arg));
    }
    let default = store::data_dir().join("script.json");
    default.exists().then_some(default)
}

fn load_script(warnings: &mut Vec<String>) -> Script {
    let Some(path) = script_path() else {
        return Script::builtin();
    };
    match Script::load(&path) {
        Ok(script) if !script.is_empty() => script,
        Ok(_) => {
            warnings.push(format!(
                "{}: script has no turns, using the built-in script",
                path.display()
            ));
            Script::builtin()
        }
        Err(err) => {
            warnings.push(format!("{err}; using the built-in script"));
            Script::builtin()
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut warnings = Vec::new();
    let script = load_script(&mut warnings);

    let (record, warning) = store::load();
    warnings.extend(warning);
    let engine = match record {
        Some(record) => {
            DialogueEngine::with_messages(script, EngineConfig::default(), record.messages)
        }
        None => DialogueEngine::new(script, EngineConfig::default()),
    };

    let (tx, rx) = mpsc::channel();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("campfire-runtime")
        .build()?;

    let app = CampfireApp::new(rx, tx, runtime.handle().clone(), engine, warnings);
    let _runtime = runtime;

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([520.0, 760.0])
            .with_min_inner_size([420.0, 560.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Campfire",
        native_options,
        Box::new(move |creation_context| {
            app.apply_theme(&creation_context.egui_ctx);
            Ok(Box::new(app))
        }),
    )?;

    Ok(())
}
