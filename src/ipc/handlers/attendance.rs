use crate::db::{self, RosterSource};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, OpenLedger, Request};
use crate::ledger::{self, AttendanceStatus};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn get_status(params: &serde_json::Value) -> Result<AttendanceStatus, HandlerErr> {
    let raw = get_required_str(params, "status")?;
    AttendanceStatus::parse(&raw).ok_or_else(|| {
        HandlerErr::bad_params(
            "status must be one of present, absent, late, excused, unrecorded",
        )
        .with_details(json!({ "status": raw }))
    })
}

fn opened<'a>(
    ledgers: &'a mut HashMap<String, OpenLedger>,
    class_id: &str,
) -> Result<&'a mut OpenLedger, HandlerErr> {
    ledgers
        .get_mut(class_id)
        .ok_or_else(|| HandlerErr::not_found("attendance is not open for this class"))
}

fn ledger_view(open: &OpenLedger) -> serde_json::Value {
    json!({
        "attendance": open.attendance,
        "summary": ledger::summarize(&open.attendance, &open.roster)
    })
}

fn attendance_open(
    source: &dyn RosterSource,
    ledgers: &mut HashMap<String, OpenLedger>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let roster = source
        .roster(&class_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("class not found"))?;
    let attendance = ledger::initialize(&roster);
    let summary = ledger::summarize(&attendance, &roster);
    log::debug!("attendance opened for {} ({} students)", class_id, roster.len());

    let result = json!({
        "classId": class_id,
        "students": roster,
        "attendance": attendance,
        "summary": summary
    });
    ledgers.insert(class_id, OpenLedger { roster, attendance });
    Ok(result)
}

fn attendance_set_status(
    ledgers: &mut HashMap<String, OpenLedger>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    let status = get_status(params)?;
    let open = opened(ledgers, &class_id)?;
    open.attendance = ledger::set_status(&open.attendance, &student_id, status);
    Ok(ledger_view(open))
}

fn attendance_mark_all(
    ledgers: &mut HashMap<String, OpenLedger>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let status = get_status(params)?;
    let open = opened(ledgers, &class_id)?;
    open.attendance = ledger::mark_all(&open.attendance, &open.roster, status);
    Ok(ledger_view(open))
}

fn attendance_summary(
    ledgers: &mut HashMap<String, OpenLedger>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let open = opened(ledgers, &class_id)?;
    Ok(json!(ledger::summarize(&open.attendance, &open.roster)))
}

fn attendance_search(
    ledgers: &mut HashMap<String, OpenLedger>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let query = get_optional_str(params, "query").unwrap_or("");
    let open = opened(ledgers, &class_id)?;
    Ok(json!({ "students": ledger::search(&open.roster, query) }))
}

fn attendance_submit(
    conn: &Connection,
    ledgers: &mut HashMap<String, OpenLedger>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let open = opened(ledgers, &class_id)?;

    let submission_id = Uuid::new_v4().to_string();
    let submitted_at = chrono::Utc::now().to_rfc3339();
    // The ledger never sees how saving went; the outcome is reported here.
    let mut saved: anyhow::Result<()> = Ok(());
    let payload = ledger::submit(&open.attendance, &open.roster, &class_id, |p| {
        saved = db::save_submission(conn, &submission_id, &submitted_at, p);
    });
    saved.map_err(|e| {
        HandlerErr::db("db_update_failed", e)
            .with_details(json!({ "table": "attendance_submissions" }))
    })?;

    for entry in open.roster.iter_mut() {
        if let Some(status) = payload.attendance_records.get(&entry.student_id) {
            entry.last_known_status = Some(*status);
        }
    }
    log::info!(
        "attendance submitted for {}: {}/{} recorded",
        class_id,
        payload.summary.recorded(),
        payload.summary.total
    );
    Ok(json!({
        "submissionId": submission_id,
        "submittedAt": submitted_at,
        "payload": payload
    }))
}

fn attendance_history(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    if !db::class_exists(conn, &class_id).map_err(|e| HandlerErr::db("db_query_failed", e))? {
        return Err(HandlerErr::not_found("class not found"));
    }
    let rows = db::list_submissions(conn, &class_id).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let submissions: Vec<serde_json::Value> = rows
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "submittedAt": r.submitted_at,
                "summary": r.summary
            })
        })
        .collect();
    Ok(json!({ "submissions": submissions }))
}

fn handle_attendance_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_open(conn, &mut state.ledgers, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_submit(conn, &mut state.ledgers, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_history(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

/// Edits of an open ledger live in memory only, so they need no workspace.
fn handle_in_memory(
    state: &mut AppState,
    req: &Request,
    f: fn(&mut HashMap<String, OpenLedger>, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    match f(&mut state.ledgers, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.open" => Some(handle_attendance_open(state, req)),
        "attendance.setStatus" => Some(handle_in_memory(state, req, attendance_set_status)),
        "attendance.markAll" => Some(handle_in_memory(state, req, attendance_mark_all)),
        "attendance.summary" => Some(handle_in_memory(state, req, attendance_summary)),
        "attendance.search" => Some(handle_in_memory(state, req, attendance_search)),
        "attendance.submit" => Some(handle_attendance_submit(state, req)),
        "attendance.history" => Some(handle_attendance_history(state, req)),
        _ => None,
    }
}
