use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

pub const MSG_NO_RESPONSE: &str = "No response received";
pub const MSG_RETRIEVED: &str = "Data retrieved successfully";
pub const MSG_INVALID: &str = "Invalid response format";
pub const MSG_UNKNOWN_ERROR: &str = "Unknown error occurred";
pub const MSG_OK: &str = "Operation successful";

/// Canonical `{success, message, data}` shape handed to the dashboard.
/// `extra` carries any other fields of an envelope that was passed through.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
    pub extra: Map<String, Value>,
    /// The backend's own `success` and `message` entries of a passed-through
    /// envelope. They go back on the wire untouched.
    head: Option<Map<String, Value>>,
}

impl<T: Serialize> Serialize for Envelope<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match &self.head {
            Some(head) => {
                for (k, v) in head {
                    map.serialize_entry(k, v)?;
                }
            }
            None => {
                map.serialize_entry("success", &self.success)?;
                map.serialize_entry("message", &self.message)?;
            }
        }
        if let Some(data) = &self.data {
            map.serialize_entry("data", data)?;
        }
        for (k, v) in &self.extra {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Every backend response shape we know about, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResponseShape<'a> {
    Missing,
    Enveloped(&'a Map<String, Value>),
    Array(&'a Value),
    Keyed(&'a Value),
    DataEnvelope(&'a Value),
    BareObject(&'a Value),
    Primitive(&'a Value),
}

/// Arrays are classified before `data_key` is consulted, so an array is
/// never read as a keyed envelope.
pub fn classify<'a>(response: &'a Value, data_key: Option<&str>) -> ResponseShape<'a> {
    match response {
        Value::Null => ResponseShape::Missing,
        Value::Object(obj) if obj.contains_key("success") => ResponseShape::Enveloped(obj),
        Value::Array(_) => ResponseShape::Array(response),
        Value::Object(obj) => match data_key {
            Some(key) => match obj.get(key) {
                Some(v) => ResponseShape::Keyed(v),
                None => ResponseShape::BareObject(response),
            },
            None => match obj.get("data") {
                Some(v) => ResponseShape::DataEnvelope(v),
                None => ResponseShape::BareObject(response),
            },
        },
        _ => ResponseShape::Primitive(response),
    }
}

/// JavaScript truthiness, which the backend's loose envelopes rely on.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn text_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Returns the envelope as the backend sent it. The typed `success` and
/// `message` are read loosely; serializing gives back the original values.
fn pass_through(obj: &Map<String, Value>) -> Envelope<Value> {
    let mut extra = obj.clone();
    let mut head = Map::new();
    for key in ["success", "message"] {
        if let Some(v) = extra.remove(key) {
            head.insert(key.to_string(), v);
        }
    }
    let success = head.get("success").is_some_and(truthy);
    let message = match head.get("message") {
        None | Some(Value::Null) => String::new(),
        Some(v) => text_of(v),
    };
    let data = extra.remove("data");
    Envelope {
        success,
        message,
        data,
        extra,
        head: Some(head),
    }
}

pub fn normalize(response: &Value, data_key: Option<&str>) -> Envelope<Value> {
    match classify(response, data_key) {
        ResponseShape::Missing => make_error(MSG_NO_RESPONSE, None),
        ResponseShape::Enveloped(obj) => pass_through(obj),
        ResponseShape::Array(v)
        | ResponseShape::Keyed(v)
        | ResponseShape::DataEnvelope(v)
        | ResponseShape::BareObject(v) => make_success(v.clone(), Some(MSG_RETRIEVED)),
        ResponseShape::Primitive(v) => make_error(MSG_INVALID, Some(v.clone())),
    }
}

/// Like [`normalize`], then decodes the payload as `T`. A payload that does
/// not decode yields a failed envelope.
pub fn normalize_as<T: DeserializeOwned>(response: &Value, data_key: Option<&str>) -> Envelope<T> {
    let env = normalize(response, data_key);
    let Envelope {
        success,
        message,
        data,
        extra,
        head,
    } = env;
    let data = match data {
        None => None,
        Some(v) => match serde_json::from_value::<T>(v) {
            Ok(t) => Some(t),
            Err(e) => {
                log::debug!("response payload did not decode: {e}");
                return make_error(MSG_INVALID, None);
            }
        },
    };
    Envelope {
        success,
        message,
        data,
        extra,
        head,
    }
}

/// Looser lookup used where callers only want the payload.
pub fn extract_data(response: &Value, data_key: Option<&str>) -> Option<Value> {
    let obj = match response {
        Value::Array(_) => return Some(response.clone()),
        Value::Object(obj) => obj,
        _ => return None,
    };
    if obj.get("success").is_some_and(truthy) {
        if let Some(data) = obj.get("data").filter(|d| truthy(d)) {
            return Some(data.clone());
        }
    }
    if let Some(key) = data_key {
        if let Some(v) = obj.get(key).filter(|v| truthy(v)) {
            return Some(v.clone());
        }
    }
    if !obj.contains_key("success") {
        return Some(response.clone());
    }
    None
}

pub fn is_success(response: &Value) -> bool {
    response.get("success").and_then(Value::as_bool) == Some(true)
}

pub fn error_message(response: &Value) -> String {
    match response {
        Value::String(s) => s.clone(),
        Value::Object(obj) => ["message", "error"]
            .iter()
            .filter_map(|k| obj.get(*k))
            .find(|v| !v.is_null())
            .map(text_of)
            .unwrap_or_else(|| MSG_UNKNOWN_ERROR.to_string()),
        _ => MSG_INVALID.to_string(),
    }
}

pub fn make_error<T>(message: impl Into<String>, data: Option<T>) -> Envelope<T> {
    Envelope {
        success: false,
        message: message.into(),
        data,
        extra: Map::new(),
        head: None,
    }
}

pub fn make_success<T>(data: T, message: Option<&str>) -> Envelope<T> {
    Envelope {
        success: true,
        message: message.unwrap_or(MSG_OK).to_string(),
        data: Some(data),
        extra: Map::new(),
        head: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn null_is_no_response() {
        let env = normalize(&Value::Null, None);
        assert!(!env.success);
        assert_eq!(env.message, MSG_NO_RESPONSE);
        assert_eq!(env.data, None);
        assert_eq!(
            serde_json::to_value(&env).expect("serialize"),
            json!({ "success": false, "message": "No response received" })
        );
    }

    #[test]
    fn existing_envelope_passes_through() {
        let raw = json!({ "success": false, "message": "x" });
        let env = normalize(&raw, Some("items"));
        assert!(!env.success);
        assert_eq!(env.message, "x");
        assert_eq!(serde_json::to_value(&env).expect("serialize"), raw);

        let raw = json!({ "success": true, "message": "ok", "data": [1], "meta": { "page": 2 } });
        assert_eq!(serde_json::to_value(normalize(&raw, None)).expect("serialize"), raw);
    }

    #[test]
    fn loose_envelope_values_survive_pass_through() {
        let raw = json!({ "success": 1, "data": [1] });
        let env = normalize(&raw, None);
        assert!(env.success);
        assert_eq!(env.message, "");
        assert_eq!(env.data, Some(json!([1])));
        assert_eq!(serde_json::to_value(&env).expect("serialize"), raw);

        let raw = json!({ "success": "yes", "message": null, "errors": { "name": ["required"] } });
        assert_eq!(serde_json::to_value(normalize(&raw, None)).expect("serialize"), raw);

        // typed decoding keeps the backend's head as well
        let env: Envelope<Vec<u32>> = normalize_as(&json!({ "success": 1, "data": [4] }), None);
        assert_eq!(env.data, Some(vec![4]));
        assert_eq!(
            serde_json::to_value(&env).expect("serialize"),
            json!({ "success": 1, "data": [4] })
        );
    }

    #[test]
    fn array_wins_over_data_key() {
        let env = normalize(&json!([1, 2, 3]), Some("data"));
        assert!(env.success);
        assert_eq!(env.message, MSG_RETRIEVED);
        assert_eq!(env.data, Some(json!([1, 2, 3])));
    }

    #[test]
    fn data_key_selects_payload() {
        let env = normalize(&json!({ "items": [1, 2], "total": 2 }), Some("items"));
        assert!(env.success);
        assert_eq!(env.data, Some(json!([1, 2])));
    }

    #[test]
    fn data_field_is_unwrapped_only_without_data_key() {
        let raw = json!({ "data": { "id": 7 } });
        assert_eq!(normalize(&raw, None).data, Some(json!({ "id": 7 })));
        // an explicit key that is absent falls back to the bare object
        assert_eq!(normalize(&raw, Some("items")).data, Some(raw.clone()));
    }

    #[test]
    fn bare_object_and_primitives() {
        let raw = json!({ "id": 1, "name": "Kelas A" });
        let env = normalize(&raw, None);
        assert!(env.success);
        assert_eq!(env.data, Some(raw));

        let env = normalize(&json!(42), None);
        assert!(!env.success);
        assert_eq!(env.message, MSG_INVALID);
        assert_eq!(env.data, Some(json!(42)));
    }

    #[test]
    fn classify_follows_precedence() {
        assert_eq!(classify(&Value::Null, None), ResponseShape::Missing);
        assert!(matches!(
            classify(&json!({ "success": true, "data": [] }), Some("data")),
            ResponseShape::Enveloped(_)
        ));
        assert!(matches!(classify(&json!([]), Some("x")), ResponseShape::Array(_)));
        assert!(matches!(classify(&json!("hi"), None), ResponseShape::Primitive(_)));
    }

    #[test]
    fn normalize_as_decodes_or_fails_soft() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Teacher {
            id: u32,
        }
        let env: Envelope<Vec<Teacher>> = normalize_as(&json!({ "data": [{ "id": 3 }] }), None);
        assert!(env.success);
        assert_eq!(env.data, Some(vec![Teacher { id: 3 }]));

        let env: Envelope<Vec<Teacher>> = normalize_as(&json!({ "data": "nope" }), None);
        assert!(!env.success);
        assert_eq!(env.message, MSG_INVALID);
        assert!(env.data.is_none());
    }

    #[test]
    fn extract_data_is_loose() {
        assert_eq!(
            extract_data(&json!({ "success": true, "data": [1] }), None),
            Some(json!([1]))
        );
        assert_eq!(extract_data(&json!([1]), Some("items")), Some(json!([1])));
        assert_eq!(
            extract_data(&json!({ "items": [2] }), Some("items")),
            Some(json!([2]))
        );
        assert_eq!(
            extract_data(&json!({ "name": "x" }), None),
            Some(json!({ "name": "x" }))
        );
        assert_eq!(extract_data(&json!({ "success": false, "data": [1] }), None), None);
        assert_eq!(extract_data(&Value::Null, None), None);
        assert_eq!(extract_data(&json!(5), None), None);
    }

    #[test]
    fn success_and_error_helpers() {
        assert!(is_success(&json!({ "success": true })));
        assert!(!is_success(&json!({ "success": "true" })));
        assert!(!is_success(&Value::Null));

        assert_eq!(error_message(&json!("boom")), "boom");
        assert_eq!(error_message(&json!({ "message": "m", "error": "e" })), "m");
        assert_eq!(error_message(&json!({ "message": null, "error": "e" })), "e");
        assert_eq!(error_message(&json!({})), MSG_UNKNOWN_ERROR);
        assert_eq!(error_message(&json!(3)), MSG_INVALID);
    }

    #[test]
    fn constructors() {
        let ok = make_success(json!(1), None);
        assert!(ok.success);
        assert_eq!(ok.message, MSG_OK);
        let e: Envelope<Value> = make_error("nope", None);
        assert!(!e.success);
        assert_eq!(e.data, None);
    }
}
