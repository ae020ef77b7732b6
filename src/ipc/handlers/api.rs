use crate::ipc::error::ok;
use crate::ipc::helpers::get_optional_str;
use crate::ipc::types::{AppState, Request};
use crate::normalize;
use serde_json::json;

static NO_RESPONSE: serde_json::Value = serde_json::Value::Null;

fn response_param(req: &Request) -> &serde_json::Value {
    req.params.get("response").unwrap_or(&NO_RESPONSE)
}

fn handle_api_normalize(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let envelope = normalize::normalize(response_param(req), get_optional_str(&req.params, "dataKey"));
    ok(&req.id, json!(envelope))
}

fn handle_api_extract_data(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let data = normalize::extract_data(response_param(req), get_optional_str(&req.params, "dataKey"));
    ok(&req.id, json!({ "data": data }))
}

fn handle_api_is_success(_state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, json!({ "success": normalize::is_success(response_param(req)) }))
}

fn handle_api_error_message(_state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, json!({ "message": normalize::error_message(response_param(req)) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "api.normalize" => Some(handle_api_normalize(state, req)),
        "api.extractData" => Some(handle_api_extract_data(state, req)),
        "api.isSuccess" => Some(handle_api_is_success(state, req)),
        "api.errorMessage" => Some(handle_api_error_message(state, req)),
        _ => None,
    }
}
