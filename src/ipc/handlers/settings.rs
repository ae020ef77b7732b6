use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::academy::{ensure_loaded, state_json};
use crate::ipc::helpers::{get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::progress::{EmptySessionPolicy, Subject, SubjectsState};
use rusqlite::Connection;
use serde_json::json;

fn settings_get(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({
        "emptySessionPolicy": db::empty_session_policy(conn).as_str()
    }))
}

/// Changing the policy re-derives every stored subject under the new rule.
fn settings_set(
    conn: &Connection,
    academy: &mut Option<SubjectsState>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let raw = get_required_str(params, "emptySessionPolicy")?;
    let policy = EmptySessionPolicy::parse(&raw).ok_or_else(|| {
        HandlerErr::bad_params("emptySessionPolicy must be completed or notStarted")
    })?;

    let current = ensure_loaded(conn, academy)?;
    let subjects: Vec<Subject> = current
        .active
        .iter()
        .chain(current.completed.iter())
        .map(|s| Subject::clone(s))
        .collect();
    let next = SubjectsState::from_subjects(subjects, policy);

    db::set_policy_and_replace_subjects(conn, policy, &next).map_err(|e| {
        HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "settings" }))
    })?;
    log::info!("empty session policy set to {}", policy.as_str());

    let mut result = state_json(&next);
    result["emptySessionPolicy"] = json!(policy.as_str());
    *academy = Some(next);
    Ok(result)
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match settings_get(conn) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_settings_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match settings_set(conn, &mut state.academy, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.set" => Some(handle_settings_set(state, req)),
        _ => None,
    }
}
