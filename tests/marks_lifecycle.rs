use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_registrard");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn registrard");
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

fn result_of(resp: &serde_json::Value, method: &str) -> serde_json::Value {
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        resp
    );
    resp.get("result").cloned().expect("result payload")
}

fn error_code(resp: &serde_json::Value) -> String {
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

struct Seeded {
    student_id: String,
    subject_ids: Vec<String>,
}

fn seed_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    subject_count: usize,
) -> Seeded {
    let _ = result_of(
        &request(
            stdin,
            reader,
            "seed-ws",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        ),
        "workspace.select",
    );
    let year = result_of(
        &request(
            stdin,
            reader,
            "seed-year",
            "years.create",
            json!({ "name": "2025/2026", "active": true }),
        ),
        "years.create",
    );
    let year_id = year["yearId"].as_str().expect("yearId").to_string();
    let class = result_of(
        &request(
            stdin,
            reader,
            "seed-class",
            "classes.create",
            json!({ "name": "Grade 7" }),
        ),
        "classes.create",
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();

    let mut subject_ids = Vec::new();
    for i in 0..subject_count {
        let subject = result_of(
            &request(
                stdin,
                reader,
                &format!("seed-subject-{}", i),
                "subjects.create",
                json!({ "name": format!("Subject {}", i), "semester": 1, "classId": class_id }),
            ),
            "subjects.create",
        );
        subject_ids.push(subject["subjectId"].as_str().expect("subjectId").to_string());
    }

    let student = result_of(
        &request(
            stdin,
            reader,
            "seed-student",
            "students.create",
            json!({
                "firstName": "Lina",
                "lastName": "Haddad",
                "identifier": "S-001",
                "classId": class_id,
                "academicYearId": year_id
            }),
        ),
        "students.create",
    );

    Seeded {
        student_id: student["studentId"].as_str().expect("studentId").to_string(),
        subject_ids,
    }
}

fn student_aggregate(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student_id: &str,
) -> (f64, i64) {
    let got = result_of(
        &request(
            stdin,
            reader,
            "agg",
            "students.get",
            json!({ "studentId": student_id }),
        ),
        "students.get",
    );
    (
        got["student"]["average"].as_f64().expect("average"),
        got["student"]["failedSubjects"]
            .as_i64()
            .expect("failedSubjects"),
    )
}

fn close_to(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 1e-9
}

#[test]
fn mark_mutations_keep_student_aggregate_consistent() {
    let workspace = temp_dir("registrard-marks-lifecycle");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_workspace(&mut stdin, &mut reader, &workspace, 3);

    // Create: component weights 0.10/0.20/0.20/0.20 + 0.40 final.
    let created = result_of(
        &request(
            &mut stdin,
            &mut reader,
            "m1",
            "marks.create",
            json!({
                "studentId": seeded.student_id,
                "subjectId": seeded.subject_ids[0],
                "verbal": 80, "homeworks": 90, "activities": 70,
                "quiz": 60, "finalExam": 40
            }),
        ),
        "marks.create",
    );
    let mark1_id = created["mark"]["id"].as_str().expect("mark id").to_string();
    assert!(close_to(created["mark"]["total"].as_f64().unwrap(), 52.0));
    assert!(close_to(
        created["mark"]["finalTotal"].as_f64().unwrap(),
        68.0
    ));
    assert_eq!(created["mark"]["result"].as_str(), Some("passed"));

    let (avg, failed) = student_aggregate(&mut stdin, &mut reader, &seeded.student_id);
    assert_eq!(avg, 68.0);
    assert_eq!(failed, 0);

    // Second subject fails: finalTotal 22 < 50 with finalExam entered.
    let created2 = result_of(
        &request(
            &mut stdin,
            &mut reader,
            "m2",
            "marks.create",
            json!({
                "studentId": seeded.student_id,
                "subjectId": seeded.subject_ids[1],
                "verbal": 20, "homeworks": 20, "activities": 20,
                "quiz": 20, "finalExam": 20
            }),
        ),
        "marks.create",
    );
    let mark2_id = created2["mark"]["id"].as_str().expect("mark id").to_string();
    assert_eq!(created2["mark"]["result"].as_str(), Some("failed"));

    let (avg, failed) = student_aggregate(&mut stdin, &mut reader, &seeded.student_id);
    assert_eq!(avg, 45.0); // round2((68 + 22) / 2)
    assert_eq!(failed, 1);

    // Partial edit of only the final exam flips the result and the aggregate.
    let updated = result_of(
        &request(
            &mut stdin,
            &mut reader,
            "m2-up",
            "marks.update",
            json!({ "markId": mark2_id, "finalExam": 95 }),
        ),
        "marks.update",
    );
    assert_eq!(updated["mark"]["result"].as_str(), Some("passed"));
    assert!(close_to(updated["mark"]["total"].as_f64().unwrap(), 14.0));
    assert!(close_to(
        updated["mark"]["finalTotal"].as_f64().unwrap(),
        52.0
    ));
    // Untouched components keep their stored values.
    assert!(close_to(updated["mark"]["quiz"].as_f64().unwrap(), 20.0));

    let (avg, failed) = student_aggregate(&mut stdin, &mut reader, &seeded.student_id);
    assert_eq!(avg, 60.0);
    assert_eq!(failed, 0);

    // Partial edit of only the quiz still recomputes from all components.
    let updated1 = result_of(
        &request(
            &mut stdin,
            &mut reader,
            "m1-up",
            "marks.update",
            json!({ "markId": mark1_id, "quiz": 100 }),
        ),
        "marks.update",
    );
    assert!(close_to(updated1["mark"]["total"].as_f64().unwrap(), 60.0));
    assert!(close_to(
        updated1["mark"]["finalTotal"].as_f64().unwrap(),
        76.0
    ));
    assert!(close_to(updated1["mark"]["verbal"].as_f64().unwrap(), 80.0));

    let (avg, _) = student_aggregate(&mut stdin, &mut reader, &seeded.student_id);
    assert_eq!(avg, 64.0); // round2((76 + 52) / 2)

    let listed = result_of(
        &request(
            &mut stdin,
            &mut reader,
            "list",
            "marks.listByStudent",
            json!({ "studentId": seeded.student_id }),
        ),
        "marks.listByStudent",
    );
    assert_eq!(listed["marks"].as_array().map(|a| a.len()), Some(2));

    // Deletes walk the aggregate back down.
    let _ = result_of(
        &request(
            &mut stdin,
            &mut reader,
            "m2-del",
            "marks.delete",
            json!({ "markId": mark2_id }),
        ),
        "marks.delete",
    );
    let (avg, _) = student_aggregate(&mut stdin, &mut reader, &seeded.student_id);
    assert_eq!(avg, 76.0);

    let _ = result_of(
        &request(
            &mut stdin,
            &mut reader,
            "m1-del",
            "marks.delete",
            json!({ "markId": mark1_id }),
        ),
        "marks.delete",
    );
    let (avg, failed) = student_aggregate(&mut stdin, &mut reader, &seeded.student_id);
    assert_eq!(avg, 0.0);
    assert_eq!(failed, 0);

    // No final exam recorded: holding, never failed.
    let holding = result_of(
        &request(
            &mut stdin,
            &mut reader,
            "m3",
            "marks.create",
            json!({
                "studentId": seeded.student_id,
                "subjectId": seeded.subject_ids[2],
                "verbal": 50
            }),
        ),
        "marks.create",
    );
    assert_eq!(holding["mark"]["result"].as_str(), Some("holding"));
    assert!(close_to(holding["mark"]["finalTotal"].as_f64().unwrap(), 5.0));
    let (avg, failed) = student_aggregate(&mut stdin, &mut reader, &seeded.student_id);
    assert_eq!(avg, 5.0);
    assert_eq!(failed, 0);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn invalid_and_missing_marks_reject_only_that_mutation() {
    let workspace = temp_dir("registrard-marks-errors");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_workspace(&mut stdin, &mut reader, &workspace, 1);

    // Negative component rejects the single mutation.
    let resp = request(
        &mut stdin,
        &mut reader,
        "neg",
        "marks.create",
        json!({
            "studentId": seeded.student_id,
            "subjectId": seeded.subject_ids[0],
            "verbal": -5
        }),
    );
    assert_eq!(error_code(&resp), "invalid_score");

    // Non-numeric component is an invalid score too.
    let resp = request(
        &mut stdin,
        &mut reader,
        "nan",
        "marks.create",
        json!({
            "studentId": seeded.student_id,
            "subjectId": seeded.subject_ids[0],
            "quiz": "eighty"
        }),
    );
    assert_eq!(error_code(&resp), "invalid_score");

    // The student is untouched by rejected mutations.
    let (avg, failed) = student_aggregate(&mut stdin, &mut reader, &seeded.student_id);
    assert_eq!(avg, 0.0);
    assert_eq!(failed, 0);

    let resp = request(
        &mut stdin,
        &mut reader,
        "up-miss",
        "marks.update",
        json!({ "markId": "no-such-mark", "quiz": 10 }),
    );
    assert_eq!(error_code(&resp), "not_found");

    let resp = request(
        &mut stdin,
        &mut reader,
        "del-miss",
        "marks.delete",
        json!({ "markId": "no-such-mark" }),
    );
    assert_eq!(error_code(&resp), "not_found");

    let resp = request(
        &mut stdin,
        &mut reader,
        "ghost",
        "marks.create",
        json!({ "studentId": "no-such-student", "subjectId": seeded.subject_ids[0] }),
    );
    assert_eq!(error_code(&resp), "not_found");

    // A negative update also leaves the stored mark intact.
    let created = result_of(
        &request(
            &mut stdin,
            &mut reader,
            "mk",
            "marks.create",
            json!({
                "studentId": seeded.student_id,
                "subjectId": seeded.subject_ids[0],
                "verbal": 80, "homeworks": 90, "activities": 70,
                "quiz": 60, "finalExam": 40
            }),
        ),
        "marks.create",
    );
    let mark_id = created["mark"]["id"].as_str().expect("mark id").to_string();
    let resp = request(
        &mut stdin,
        &mut reader,
        "up-neg",
        "marks.update",
        json!({ "markId": mark_id, "quiz": -1 }),
    );
    assert_eq!(error_code(&resp), "invalid_score");
    let (avg, _) = student_aggregate(&mut stdin, &mut reader, &seeded.student_id);
    assert_eq!(avg, 68.0);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn deleting_the_student_removes_their_marks() {
    let workspace = temp_dir("registrard-student-delete");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_workspace(&mut stdin, &mut reader, &workspace, 1);

    let _ = result_of(
        &request(
            &mut stdin,
            &mut reader,
            "mk",
            "marks.create",
            json!({
                "studentId": seeded.student_id,
                "subjectId": seeded.subject_ids[0],
                "finalExam": 100
            }),
        ),
        "marks.create",
    );

    let _ = result_of(
        &request(
            &mut stdin,
            &mut reader,
            "del",
            "students.delete",
            json!({ "studentId": seeded.student_id }),
        ),
        "students.delete",
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "gone",
        "students.get",
        json!({ "studentId": seeded.student_id }),
    );
    assert_eq!(error_code(&resp), "not_found");

    drop(stdin);
    let _ = child.wait();
}
