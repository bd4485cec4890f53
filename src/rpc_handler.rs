//! RPC method handler for the Smartmarks JSON-RPC protocol.
//!
//! Extracted from `rpc_server.rs` so it can be unit-tested independently.
//! The `handle_method` function dispatches JSON-RPC method calls to the
//! `App`.

use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::app::App;
use crate::types::bookmark::Bookmark;
use crate::types::session::AuthSession;

fn bookmark_json(bookmark: &Bookmark) -> Value {
    json!({
        "id": bookmark.id,
        "title": bookmark.title,
        "url": bookmark.url,
        "created_at": bookmark.created_at.to_rfc3339(),
    })
}

/// Encodes a list of bookmarks for the wire.
pub fn bookmarks_json(bookmarks: &[Bookmark]) -> Value {
    Value::Array(bookmarks.iter().map(bookmark_json).collect())
}

/// Dispatch a JSON-RPC method call to the appropriate handler.
///
/// Returns `Ok(Value)` on success or `Err(String)` with an error message.
pub async fn handle_method(app: &Mutex<App>, method: &str, params: &Value) -> Result<Value, String> {
    match method {
        "ping" => Ok(json!({"pong": true})),

        // ─── Auth ───
        "auth.sign_in" => {
            let user_id = params.get("user_id").and_then(|v| v.as_str()).ok_or("missing user_id")?;
            if user_id.trim().is_empty() {
                return Err("invalid user_id: must not be empty".to_string());
            }
            let email = params.get("email").and_then(|v| v.as_str()).map(str::to_string);
            let token = params.get("access_token").and_then(|v| v.as_str()).unwrap_or("");
            let auth = AuthSession::new(user_id, email, token);

            let mut a = app.lock().await;
            let outcome = a.sign_in(auth).await.map_err(|e| e.to_string())?;
            Ok(json!({
                "user_id": user_id,
                "count": outcome.bookmarks,
                "snapshot_error": outcome.snapshot_error,
            }))
        }
        "auth.sign_out" => {
            let mut a = app.lock().await;
            a.sign_out();
            Ok(json!({"ok": true}))
        }
        "auth.status" => {
            let a = app.lock().await;
            match a.auth() {
                Some(auth) => Ok(json!({"signed_in": true, "user_id": auth.user_id, "email": auth.email})),
                None => Ok(json!({"signed_in": false})),
            }
        }

        // ─── Bookmarks ───
        "bookmark.add" => {
            let title = params.get("title").and_then(|v| v.as_str()).unwrap_or("");
            let url = params.get("url").and_then(|v| v.as_str()).unwrap_or("");
            let a = app.lock().await;
            let bookmark = a.create_bookmark(title, url).await.map_err(|e| e.to_string())?;
            Ok(bookmark_json(&bookmark))
        }
        "bookmark.delete" => {
            let id = params.get("id").and_then(|v| v.as_str()).ok_or("missing id")?;
            let a = app.lock().await;
            let removed = a.delete_bookmark(id).await.map_err(|e| e.to_string())?;
            Ok(json!({"ok": true, "removed": removed}))
        }
        "bookmark.list" => {
            let a = app.lock().await;
            let items = a
                .bookmarks()
                .map(|view| bookmarks_json(&view))
                .unwrap_or_else(|| json!([]));
            Ok(json!({"items": items}))
        }

        // ─── Session ───
        "session.resync" => {
            let mut a = app.lock().await;
            let count = a.resync().await.map_err(|e| e.to_string())?;
            Ok(json!({"count": count}))
        }

        _ => Err(format!("unknown method: {}", method)),
    }
}
