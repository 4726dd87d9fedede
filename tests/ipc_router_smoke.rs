mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("campusd-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["workspacePath"].is_null());

    // Every family answers no_workspace before a workspace is selected.
    for (i, method) in [
        "setup.get",
        "catalog.get",
        "students.list",
        "grades.import.preview",
        "reservations.list",
    ]
    .iter()
    .enumerate()
    {
        let resp = request(&mut stdin, &mut reader, &format!("pre-{i}"), method, json!({}));
        assert_eq!(error_code(&resp), Some("no_workspace"), "{method}");
    }

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(workspace.join("campus.sqlite3").is_file());

    let _ = request_ok(&mut stdin, &mut reader, "3", "setup.get", json!({}));
    let _ = request_ok(&mut stdin, &mut reader, "4", "catalog.get", json!({}));
    let _ = request_ok(&mut stdin, &mut reader, "5", "academicYears.list", json!({}));
    let _ = request_ok(&mut stdin, &mut reader, "6", "students.list", json!({}));
    let _ = request_ok(&mut stdin, &mut reader, "7", "subjects.list", json!({}));
    let _ = request_ok(&mut stdin, &mut reader, "8", "grades.import.history", json!({}));
    let _ = request_ok(&mut stdin, &mut reader, "9", "resources.list", json!({}));
    let _ = request_ok(&mut stdin, &mut reader, "10", "reservations.list", json!({}));

    let missing = request(&mut stdin, &mut reader, "11", "students.create", json!({}));
    assert_eq!(error_code(&missing), Some("bad_params"));

    let unknown = request(&mut stdin, &mut reader, "12", "classes.open", json!({}));
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    // A garbage line gets an id-less bad_json reply and the loop keeps going.
    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json reply");
    let bad: serde_json::Value = serde_json::from_str(line.trim()).expect("parse bad_json reply");
    assert_eq!(error_code(&bad), Some("bad_json"));

    let health = request_ok(&mut stdin, &mut reader, "13", "health", json!({}));
    assert!(health["workspacePath"].is_string());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
