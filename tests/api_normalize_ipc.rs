use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_shined");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn shined");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}


#[test]
fn normalize_follows_shape_precedence() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let missing = request_ok(&mut stdin, &mut reader, "1", "api.normalize", json!({}));
    assert_eq!(
        missing,
        json!({ "success": false, "message": "No response received" })
    );

    let passthrough = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "api.normalize",
        json!({ "response": { "success": false, "message": "x" } }),
    );
    assert_eq!(passthrough, json!({ "success": false, "message": "x" }));

    let loose = request_ok(
        &mut stdin,
        &mut reader,
        "2b",
        "api.normalize",
        json!({ "response": { "success": 1, "data": [1] } }),
    );
    assert_eq!(loose, json!({ "success": 1, "data": [1] }));

    let array = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "api.normalize",
        json!({ "response": [1, 2, 3], "dataKey": "data" }),
    );
    assert_eq!(
        array,
        json!({ "success": true, "message": "Data retrieved successfully", "data": [1, 2, 3] })
    );

    let keyed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "api.normalize",
        json!({ "response": { "items": [1, 2], "total": 2 }, "dataKey": "items" }),
    );
    assert_eq!(keyed["success"], json!(true));
    assert_eq!(keyed["data"], json!([1, 2]));

    let wrapped = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "api.normalize",
        json!({ "response": { "data": { "id": 9 } } }),
    );
    assert_eq!(wrapped["data"], json!({ "id": 9 }));

    let primitive = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "api.normalize",
        json!({ "response": "oops" }),
    );
    assert_eq!(
        primitive,
        json!({ "success": false, "message": "Invalid response format", "data": "oops" })
    );
}

#[test]
fn companion_helpers() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let extracted = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "api.extractData",
        json!({ "response": { "success": true, "data": [4] } }),
    );
    assert_eq!(extracted["data"], json!([4]));

    let nothing = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "api.extractData",
        json!({ "response": 12 }),
    );
    assert_eq!(nothing["data"], serde_json::Value::Null);

    let yes = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "api.isSuccess",
        json!({ "response": { "success": true } }),
    );
    assert_eq!(yes["success"], json!(true));

    let no = request_ok(&mut stdin, &mut reader, "4", "api.isSuccess", json!({}));
    assert_eq!(no["success"], json!(false));

    let message = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "api.errorMessage",
        json!({ "response": { "error": "Token expired" } }),
    );
    assert_eq!(message["message"], json!("Token expired"));

    let unknown = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "api.errorMessage",
        json!({ "response": {} }),
    );
    assert_eq!(unknown["message"], json!("Unknown error occurred"));
}
