use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::ledger::{AttendanceMap, RosterEntry};
use crate::progress::SubjectsState;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Attendance being edited for one class, between `attendance.open` and the
/// next open of the same class.
#[derive(Debug, Clone)]
pub struct OpenLedger {
    pub roster: Vec<RosterEntry>,
    pub attendance: AttendanceMap,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub ledgers: HashMap<String, OpenLedger>,
    pub academy: Option<SubjectsState>,
}

impl AppState {
    /// Drops everything cached from the previous workspace.
    pub fn reset_session(&mut self) {
        self.ledgers.clear();
        self.academy = None;
    }
}
