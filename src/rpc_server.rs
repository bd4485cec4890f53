//! Smartmarks RPC Server: JSON-RPC over stdin/stdout for a UI shell.
//!
//! Protocol: one JSON object per line (newline-delimited JSON).
//! Request:  {"id":1, "method":"bookmark.add", "params":{"url":"...","title":"..."}}
//! Response: {"id":1, "result":{...}} or {"id":1, "error":"..."}
//! Push:     {"event":"bookmarks.changed", "items":[...]} whenever the signed-in
//!           user's list changes.

use std::time::Instant;

use serde_json::{json, Value};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use smartmarks::app::App;
use smartmarks::logging;
use smartmarks::managers::bookmark_store::BookmarkView;
use smartmarks::platform;
use smartmarks::rpc_handler::{bookmarks_json, handle_method};
use smartmarks::services::settings_engine::{SettingsEngine, SettingsEngineTrait};

/// Simple rate limiter: max requests per second.
struct RateLimiter {
    window_start: Instant,
    request_count: u32,
    max_per_second: u32,
}

impl RateLimiter {
    fn new(max_per_second: u32) -> Self {
        Self { window_start: Instant::now(), request_count: 0, max_per_second }
    }

    /// Returns true if the request is allowed, false if rate-limited.
    fn check(&mut self) -> bool {
        if self.window_start.elapsed().as_secs() >= 1 {
            self.window_start = Instant::now();
            self.request_count = 0;
        }
        self.request_count += 1;
        self.request_count <= self.max_per_second
    }
}

/// Forwards every change of the signed-in user's view to the output queue.
/// Ends when the session's store goes away.
fn spawn_change_pusher(mut changes: tokio::sync::watch::Receiver<BookmarkView>, out: mpsc::UnboundedSender<Value>) {
    tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let items = bookmarks_json(&changes.borrow_and_update());
            if out.send(json!({"event": "bookmarks.changed", "items": items})).is_err() {
                break;
            }
        }
    });
}

#[tokio::main]
async fn main() {
    let mut settings_engine = SettingsEngine::new(None);
    let settings_result = settings_engine
        .load()
        .and_then(|_| settings_engine.apply_env_overrides());
    logging::init(&settings_engine.get_settings().logging.level);
    if let Err(e) = settings_result {
        warn!(error = %e, "using default settings");
    }

    let data_dir = platform::get_data_dir();
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        error!(error = %e, "failed to create data directory");
    }
    let db_path = data_dir.join("smartmarks.db");
    let app = match App::new(&db_path.to_string_lossy(), settings_engine.get_settings().clone()) {
        Ok(app) => Mutex::new(app),
        Err(e) => {
            error!(error = %e, "failed to initialize Smartmarks");
            std::process::exit(1);
        }
    };

    // Single writer for stdout: responses and pushed events share one queue.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(message) = out_rx.recv().await {
            let line = format!("{}\n", message);
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let _ = out_tx.send(json!({"event": "ready", "version": env!("CARGO_PKG_VERSION")}));
    info!(db = %db_path.display(), "rpc server ready");

    // Max 200 RPC requests per second
    let mut rate_limiter = RateLimiter::new(200);

    let mut lines = BufReader::new(io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }

        let req: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                let _ = out_tx.send(json!({"id": null, "error": format!("parse error: {}", e)}));
                continue;
            }
        };

        let id = req.get("id").cloned().unwrap_or(Value::Null);

        if !rate_limiter.check() {
            let _ = out_tx.send(json!({"id": id, "error": "rate limit exceeded"}));
            continue;
        }

        let method = req.get("method").and_then(|v| v.as_str()).unwrap_or("");
        let params = req.get("params").cloned().unwrap_or(json!({}));

        let result = handle_method(&app, method, &params).await;

        if method == "auth.sign_in" && result.is_ok() {
            if let Some(session) = app.lock().await.session() {
                spawn_change_pusher(session.store().subscribe(), out_tx.clone());
            }
        }

        let response = match result {
            Ok(val) => json!({"id": id, "result": val}),
            Err(err) => json!({"id": id, "error": err}),
        };
        let _ = out_tx.send(response);
    }

    app.lock().await.shutdown();
    drop(out_tx);
    let _ = writer.await;
}
