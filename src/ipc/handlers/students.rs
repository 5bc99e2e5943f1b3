use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let first_name = match req.params.get("firstName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing firstName", None),
    };
    let middle_name = req
        .params
        .get("middleName")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .unwrap_or_default();
    let last_name = match req.params.get("lastName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing lastName", None),
    };
    let identifier = match req.params.get("identifier").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing identifier", None),
    };
    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let year_id = match req.params.get("academicYearId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing academicYearId", None),
    };

    let class_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let year_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM academic_years WHERE id = ?",
            [&year_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if year_exists.is_none() {
        return err(&req.id, "not_found", "academic year not found", None);
    }

    let student_id = Uuid::new_v4().to_string();
    let now = db::now_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, first_name, middle_name, last_name, identifier,
                              class_id, academic_year_id, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &first_name,
            &middle_name,
            &last_name,
            &identifier,
            &class_id,
            &year_id,
            &now,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(
        &req.id,
        json!({ "studentId": student_id, "identifier": identifier }),
    )
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let class_filter = req
        .params
        .get("classId")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let year_filter = req
        .params
        .get("yearId")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let mut sql = String::from(
        "SELECT s.id, s.first_name, s.middle_name, s.last_name, s.identifier,
                s.class_id, c.name, s.academic_year_id, s.average, s.failed_subjects
         FROM students s
         JOIN classes c ON c.id = s.class_id",
    );
    let mut clauses: Vec<&str> = Vec::new();
    let mut params: Vec<String> = Vec::new();
    if let Some(cid) = &class_filter {
        clauses.push("s.class_id = ?");
        params.push(cid.clone());
    }
    if let Some(yid) = &year_filter {
        clauses.push("s.academic_year_id = ?");
        params.push(yid.clone());
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY s.last_name, s.first_name");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), |row| {
            let id: String = row.get(0)?;
            let first_name: String = row.get(1)?;
            let middle_name: String = row.get(2)?;
            let last_name: String = row.get(3)?;
            let identifier: String = row.get(4)?;
            let class_id: String = row.get(5)?;
            let class_name: String = row.get(6)?;
            let year_id: String = row.get(7)?;
            let average: f64 = row.get(8)?;
            let failed_subjects: i64 = row.get(9)?;
            Ok(json!({
                "id": id,
                "firstName": first_name,
                "middleName": middle_name,
                "lastName": last_name,
                "identifier": identifier,
                "classId": class_id,
                "className": class_name,
                "academicYearId": year_id,
                "average": average,
                "failedSubjects": failed_subjects
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let row = conn
        .query_row(
            "SELECT s.id, s.first_name, s.middle_name, s.last_name, s.identifier,
                    s.class_id, c.name, s.academic_year_id, s.average, s.failed_subjects,
                    (SELECT COUNT(*) FROM marks m WHERE m.student_id = s.id)
             FROM students s
             JOIN classes c ON c.id = s.class_id
             WHERE s.id = ?",
            [&student_id],
            |row| {
                let id: String = row.get(0)?;
                let first_name: String = row.get(1)?;
                let middle_name: String = row.get(2)?;
                let last_name: String = row.get(3)?;
                let identifier: String = row.get(4)?;
                let class_id: String = row.get(5)?;
                let class_name: String = row.get(6)?;
                let year_id: String = row.get(7)?;
                let average: f64 = row.get(8)?;
                let failed_subjects: i64 = row.get(9)?;
                let mark_count: i64 = row.get(10)?;
                Ok(json!({
                    "id": id,
                    "firstName": first_name,
                    "middleName": middle_name,
                    "lastName": last_name,
                    "identifier": identifier,
                    "classId": class_id,
                    "className": class_name,
                    "academicYearId": year_id,
                    "average": average,
                    "failedSubjects": failed_subjects,
                    "markCount": mark_count
                }))
            },
        )
        .optional();

    match row {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute("DELETE FROM marks WHERE student_id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "marks" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
