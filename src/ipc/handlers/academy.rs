use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::normalize::{normalize_as, Envelope};
use crate::progress::{self, Subject, SubjectsState};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

/// Loads the subjects from the workspace on first use.
pub(crate) fn ensure_loaded<'a>(
    conn: &Connection,
    academy: &'a mut Option<SubjectsState>,
) -> Result<&'a mut SubjectsState, HandlerErr> {
    let loaded = match academy.take() {
        Some(s) => s,
        None => db::load_subjects(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?,
    };
    Ok(academy.insert(loaded))
}

pub(crate) fn state_json(state: &SubjectsState) -> serde_json::Value {
    json!({
        "active": state.active,
        "completed": state.completed
    })
}

fn check_unique<'a>(what: &str, ids: impl Iterator<Item = &'a str>) -> Result<(), HandlerErr> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(HandlerErr::bad_params(format!("duplicate {} id", what))
                .with_details(json!({ "id": id })));
        }
    }
    Ok(())
}

fn validate_subjects(subjects: &[Subject]) -> Result<(), HandlerErr> {
    check_unique("subject", subjects.iter().map(|s| s.id.as_str()))?;
    for subject in subjects {
        check_unique("session", subject.sessions.iter().map(|s| s.id.as_str()))?;
        for session in &subject.sessions {
            check_unique("material", session.materials.iter().map(|m| m.id.as_str()))?;
        }
    }
    Ok(())
}

fn academy_import(
    conn: &Connection,
    academy: &mut Option<SubjectsState>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    // Subjects arrive as whatever the backend returned, in any envelope shape.
    let raw = params
        .get("subjects")
        .ok_or_else(|| HandlerErr::bad_params("missing subjects"))?;
    let envelope: Envelope<Vec<Subject>> = normalize_as(raw, get_optional_str(params, "dataKey"));
    let subjects = match envelope.data {
        Some(subjects) if envelope.success => subjects,
        _ => {
            return Err(HandlerErr::bad_params(format!(
                "invalid subjects: {}",
                envelope.message
            )))
        }
    };
    validate_subjects(&subjects)?;

    let policy = db::empty_session_policy(conn);
    let next = SubjectsState::from_subjects(subjects, policy);
    db::replace_subjects(conn, &next).map_err(|e| {
        HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "subjects" }))
    })?;
    log::info!(
        "academy imported: {} active, {} completed",
        next.active.len(),
        next.completed.len()
    );
    let result = state_json(&next);
    *academy = Some(next);
    Ok(result)
}

fn academy_list(
    conn: &Connection,
    academy: &mut Option<SubjectsState>,
) -> Result<serde_json::Value, HandlerErr> {
    Ok(state_json(ensure_loaded(conn, academy)?))
}

fn academy_toggle_material(
    conn: &Connection,
    academy: &mut Option<SubjectsState>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let session_id = get_required_str(params, "sessionId")?;
    let material_id = get_required_str(params, "materialId")?;
    let is_completed = params
        .get("isCompleted")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params("missing isCompleted"))?;

    let policy = db::empty_session_policy(conn);
    let current = ensure_loaded(conn, academy)?;
    let next = progress::toggle_material(
        current,
        &subject_id,
        &session_id,
        &material_id,
        is_completed,
        policy,
    );
    // A miss anywhere along the lookup hands back the very same subject.
    let applied = match (current.find(&subject_id), next.find(&subject_id)) {
        (Some((_, before)), Some((_, after))) => !Arc::ptr_eq(before, after),
        _ => false,
    };
    if !applied {
        log::debug!(
            "toggle ignored: {}/{}/{} not found",
            subject_id,
            session_id,
            material_id
        );
        return Ok(json!({
            "active": next.active,
            "completed": next.completed,
            "applied": false
        }));
    }

    db::save_subject(conn, &next, &subject_id).map_err(|e| {
        HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "materials" }))
    })?;
    let result = json!({
        "active": next.active,
        "completed": next.completed,
        "applied": true
    });
    *academy = Some(next);
    Ok(result)
}

fn handle_academy_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match academy_import(conn, &mut state.academy, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_academy_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match academy_list(conn, &mut state.academy) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_academy_toggle_material(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match academy_toggle_material(conn, &mut state.academy, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "academy.import" => Some(handle_academy_import(state, req)),
        "academy.list" => Some(handle_academy_list(state, req)),
        "academy.toggleMaterial" => Some(handle_academy_toggle_material(state, req)),
        _ => None,
    }
}
