mod db;
mod ipc;
mod ledger;
mod normalize;
mod progress;

use serde_json::json;
use std::io::{self, BufRead, Write};

fn main() {
    // stdout carries responses, so logs go to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("SHINED_LOG", "warn"))
        .target(env_logger::Target::Stderr)
        .init();
    log::info!("shined {} ready", env!("CARGO_PKG_VERSION"));

    let mut state = ipc::AppState::default();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                log::warn!("stdin closed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                log::warn!("bad request line: {e}");
                let resp = json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(stdout, "{}", resp);
        let _ = stdout.flush();
    }
    log::info!("shined exiting");
}
