mod test_support;

use serde_json::json;
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn grade_import_settings_drive_preview() {
    let workspace = temp_dir("campusd-setup-grade-import");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let setup = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(setup["gradeImport"]["maxGrade"], json!(20.0));
    assert_eq!(setup["gradeImport"]["treatZeroAsAbsent"], json!(true));
    assert_eq!(setup["gradeImport"]["identifierColumn"], json!("matricule"));
    assert_eq!(setup["bookings"]["requireApproval"], json!(true));

    let sheet = "matricule,Droit_CC\nE1,85\nE2,0\n";
    let before = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.import.preview",
        json!({ "text": sheet }),
    );
    assert_eq!(before["report"]["valid"], json!(false));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "gradeImport", "patch": { "maxGrade": 100, "treatZeroAsAbsent": false } }),
    );
    let after = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.import.preview",
        json!({ "text": sheet }),
    );
    assert_eq!(after["report"]["valid"], json!(true), "{}", after["report"]);

    for (id, patch) in [
        ("6a", json!({ "maxGrade": 0 })),
        ("6b", json!({ "treatZeroAsAbsent": "yes" })),
        ("6c", json!({ "identifierColumn": "  " })),
        ("6d", json!({ "colour": "blue" })),
    ] {
        let resp = request(
            &mut stdin,
            &mut reader,
            id,
            "setup.update",
            json!({ "section": "gradeImport", "patch": patch }),
        );
        assert_eq!(error_code(&resp), Some("bad_params"), "{id}");
    }
    let resp = request(
        &mut stdin,
        &mut reader,
        "6e",
        "setup.update",
        json!({ "section": "attendance", "patch": {} }),
    );
    assert_eq!(error_code(&resp), Some("bad_params"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "setup.update",
        json!({ "section": "gradeImport", "patch": { "identifierColumn": "student_id" } }),
    );
    let renamed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "grades.import.preview",
        json!({ "text": "student_id,Droit_CC\nE1,12\n" }),
    );
    assert_eq!(renamed["rowCount"], json!(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn workspace_catalog_replaces_the_default_allow_list() {
    let workspace = temp_dir("campusd-setup-catalog");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let catalog = request_ok(&mut stdin, &mut reader, "2", "catalog.get", json!({}));
    assert_eq!(catalog["source"], json!("default"));
    assert_eq!(catalog["columns"]["Droit_CC"]["subjectCode"], json!("droit"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "catalog.update",
        json!({
            "columns": {
                "Civil_CC": { "subjectCode": "civil", "subjectName": "Droit civil" },
                "Oral": { "subjectCode": "oral", "subjectName": "Expression orale", "kind": "EF" }
            }
        }),
    );
    let catalog = request_ok(&mut stdin, &mut reader, "4", "catalog.get", json!({}));
    assert_eq!(catalog["source"], json!("workspace"));
    assert!(catalog["columns"]["Droit_CC"].is_null());

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.import.preview",
        json!({ "text": "matricule,Droit_CC,Civil_CC,Oral\nE1,12,14,16\n" }),
    );
    let mappings = preview["mappings"].as_array().expect("mappings");
    assert_eq!(mappings.len(), 2);
    assert_eq!(mappings[0]["column"], json!("Civil_CC"));
    assert_eq!(mappings[0]["kind"], json!("CC"));
    assert_eq!(mappings[1]["column"], json!("Oral"));
    assert_eq!(mappings[1]["kind"], json!("EF"));
    assert_eq!(preview["ignoredColumns"], json!(["Droit_CC"]));

    let bad = request(
        &mut stdin,
        &mut reader,
        "6",
        "catalog.update",
        json!({ "columns": { "X_CC": { "subjectCode": "", "subjectName": "X" } } }),
    );
    assert_eq!(error_code(&bad), Some("bad_params"));

    let reset = request_ok(&mut stdin, &mut reader, "7", "catalog.update", json!({ "columns": null }));
    assert_eq!(reset["source"], json!("default"));
    let catalog = request_ok(&mut stdin, &mut reader, "8", "catalog.get", json!({}));
    assert_eq!(catalog["source"], json!("default"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
