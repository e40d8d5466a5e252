//! RPC method handler for the Linkmirror JSON-RPC protocol.
//!
//! Kept apart from `rpc_server.rs` so it can be tested without stdio.
//! `handle_method` dispatches one call against the shared [`App`].

use tokio::sync::Mutex;

use serde_json::{json, Value};

use crate::app::App;
use crate::managers::session_manager::Session;
use crate::services::settings_engine::SettingsEngineTrait;
use crate::types::bookmark::Bookmark;

/// JSON shape of a bookmark on the wire.
pub fn bookmark_json(b: &Bookmark) -> Value {
    json!({
        "id": b.id,
        "user_id": b.owner_id,
        "url": b.url,
        "title": b.title,
        "created_at": b.created_at,
    })
}

/// JSON shape of `session.status`.
pub fn session_status(session: &Session) -> Value {
    json!({
        "session_id": session.id(),
        "user_id": session.owner_id(),
        "channel": session.channel(),
        "health": session.health(),
        "loaded": session.is_loaded(),
        "count": session.len(),
    })
}

fn str_param<'a>(params: &'a Value, name: &str) -> Result<&'a str, String> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing {}", name))
}

/// Dispatch a JSON-RPC method call.
///
/// Returns `Ok(Value)` on success or `Err(String)` with an error message.
pub async fn handle_method(app: &Mutex<App>, method: &str, params: &Value) -> Result<Value, String> {
    match method {
        "ping" => Ok(json!({"pong": true, "version": env!("CARGO_PKG_VERSION")})),

        // ─── Session ───
        "session.start" => {
            let user_id = str_param(params, "user_id")?;
            let mut a = app.lock().await;
            let session = a.sign_in(user_id).await.map_err(|e| e.to_string())?;
            Ok(session_status(session))
        }
        "session.wait_loaded" => {
            let mut a = app.lock().await;
            let session = a.session_mut().ok_or("No active session")?;
            let count = session.wait_loaded().await.map_err(|e| e.to_string())?;
            Ok(json!({"count": count}))
        }
        "session.status" => {
            let a = app.lock().await;
            let session = a.require_session().map_err(|e| e.to_string())?;
            Ok(session_status(session))
        }
        "session.end" => {
            let mut a = app.lock().await;
            a.sign_out().await.map_err(|e| e.to_string())?;
            Ok(json!({"ok": true}))
        }

        // ─── Bookmarks ───
        "bookmark.list" => {
            let query = params.get("query").and_then(|v| v.as_str()).unwrap_or("");
            let a = app.lock().await;
            let session = a.require_session().map_err(|e| e.to_string())?;
            let total = session.len();
            let items: Vec<Value> = session.search(query).iter().map(bookmark_json).collect();
            Ok(json!({"items": items, "total": total}))
        }
        "bookmark.add" => {
            let url = str_param(params, "url")?;
            let title = str_param(params, "title")?;
            let a = app.lock().await;
            let session = a.require_session().map_err(|e| e.to_string())?;
            let record = session.create(url, title).await.map_err(|e| e.to_string())?;
            Ok(bookmark_json(&record))
        }
        "bookmark.delete" => {
            let id = str_param(params, "id")?;
            let a = app.lock().await;
            let session = a.require_session().map_err(|e| e.to_string())?;
            session.delete(id).await.map_err(|e| e.to_string())?;
            Ok(json!({"ok": true}))
        }

        // ─── Settings ───
        "settings.get" => {
            let a = app.lock().await;
            serde_json::to_value(a.settings_engine.get_settings()).map_err(|e| e.to_string())
        }
        "settings.set" => {
            let key = str_param(params, "key")?;
            let value = params.get("value").cloned().ok_or("missing value")?;
            let mut a = app.lock().await;
            a.settings_engine.set_value(key, value).map_err(|e| e.to_string())?;
            Ok(json!({"ok": true}))
        }

        _ => Err(format!("unknown method: {}", method)),
    }
}
