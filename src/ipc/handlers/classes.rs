use crate::db::{self, RosterSource};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::ledger::AttendanceStatus;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    match db::list_classes(conn) {
        Ok(rows) => {
            let classes: Vec<serde_json::Value> = rows
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "name": c.name,
                        "studentCount": c.student_count
                    })
                })
                .collect();
            ok(&req.id, json!({ "classes": classes }))
        }
        Err(e) => HandlerErr::db("db_query_failed", e).response(&req.id),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = db::insert_class(conn, &class_id, &name) {
        return HandlerErr::db("db_update_failed", e)
            .with_details(json!({ "table": "classes" }))
            .response(&req.id);
    }

    ok(&req.id, json!({ "classId": class_id, "name": name }))
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let roster = conn
        .roster(&class_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("class not found"))?;
    Ok(json!({ "students": roster }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let display_name = get_required_str(params, "displayName")?.trim().to_string();
    if display_name.is_empty() {
        return Err(HandlerErr::bad_params("displayName must not be empty"));
    }
    let last_status = match get_optional_str(params, "lastKnownStatus") {
        None => None,
        Some(raw) => Some(
            AttendanceStatus::parse(raw)
                .ok_or_else(|| HandlerErr::bad_params(format!("unknown status: {}", raw)))?,
        ),
    };
    if !db::class_exists(conn, &class_id).map_err(|e| HandlerErr::db("db_query_failed", e))? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let student_id = Uuid::new_v4().to_string();
    db::insert_student(conn, &class_id, &student_id, &display_name, last_status).map_err(|e| {
        HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "students" }))
    })?;
    Ok(json!({ "studentId": student_id }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_create(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        _ => None,
    }
}
