//! Linkmirror RPC Server: JSON-RPC over stdin/stdout.
//!
//! Protocol: one JSON object per line (newline-delimited JSON).
//! Request:  {"id":1, "method":"bookmark.add", "params":{"url":"...","title":"..."}}
//! Response: {"id":1, "result":{...}} or {"id":1, "error":"..."}
//! Events:   {"event":"ready",...} once at startup, and
//!           {"event":"health","session_id":"...","state":"connected"} for the
//!           active session. The `session.start` result carries the health at
//!           start; the first health event is a snapshot of the state when the
//!           watcher attaches (it may already be past `connecting`), and every
//!           later event is a change.

use std::io::{self, Write};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{watch, Mutex};
use tracing::{error, warn};

use linkmirror::app::App;
use linkmirror::rpc_handler::handle_method;
use linkmirror::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use linkmirror::telemetry;
use linkmirror::types::health::ConnectionHealth;

use serde_json::{json, Value};

fn emit(value: &Value) {
    let mut out = io::stdout().lock();
    let _ = writeln!(out, "{}", value);
    let _ = out.flush();
}

/// Emits the current state, then one event per change until the session ends.
async fn forward_health(session_id: String, mut health: watch::Receiver<ConnectionHealth>) {
    loop {
        let state = *health.borrow_and_update();
        emit(&json!({"event": "health", "session_id": session_id, "state": state}));
        if health.changed().await.is_err() {
            break;
        }
    }
}

#[tokio::main]
async fn main() {
    let mut settings_engine = SettingsEngine::new(std::env::var("LINKMIRROR_CONFIG").ok());
    let loaded = settings_engine.load();
    telemetry::init(&settings_engine.get_settings().logging.filter);
    if let Err(e) = loaded {
        warn!(error = %e, "falling back to default settings");
    }

    let app = match App::new(settings_engine) {
        Ok(app) => Mutex::new(app),
        Err(e) => {
            error!(error = %e, "failed to initialize backend");
            std::process::exit(1);
        }
    };

    emit(&json!({"event": "ready", "version": env!("CARGO_PKG_VERSION")}));

    let mut watched_session: Option<String> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "failed to read request");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                emit(&json!({"id": null, "error": format!("parse error: {}", e)}));
                continue;
            }
        };

        let id = req.get("id").cloned().unwrap_or(Value::Null);
        let method = req.get("method").and_then(|v| v.as_str()).unwrap_or("");
        let params = req.get("params").cloned().unwrap_or(json!({}));

        let response = match handle_method(&app, method, &params).await {
            Ok(val) => json!({"id": id, "result": val}),
            Err(err) => json!({"id": id, "error": err}),
        };
        emit(&response);

        let a = app.lock().await;
        match a.session() {
            Some(session) if watched_session.as_deref() != Some(session.id()) => {
                watched_session = Some(session.id().to_string());
                tokio::spawn(forward_health(session.id().to_string(), session.watch_health()));
            }
            Some(_) => {}
            None => watched_session = None,
        }
    }

    app.lock().await.shutdown().await;
}
