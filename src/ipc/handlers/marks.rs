use crate::aggregate::recompute_student_aggregate;
use crate::db;
use crate::grades::{compute_derived, Derived, MarkComponents};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

const COMPONENT_KEYS: [&str; 5] = ["verbal", "homeworks", "activities", "quiz", "finalExam"];

/// Reads one score component from the request params. Absent/null means
/// "not provided"; anything present must be numeric.
fn parse_component(
    params: &serde_json::Value,
    key: &'static str,
) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_f64() {
            Some(n) => Ok(Some(n)),
            None => Err(HandlerErr {
                code: "invalid_score",
                message: format!("{} must be a number", key),
                details: Some(json!({ "field": key, "value": v })),
            }),
        },
    }
}

/// Validates and derives totals for the full (merged) component set.
fn derive_or_err(components: &MarkComponents) -> Result<Derived, HandlerErr> {
    compute_derived(components).map_err(|e| HandlerErr {
        code: "invalid_score",
        message: e.to_string(),
        details: Some(json!({ "field": e.field, "value": e.value })),
    })
}

/// Post-mutation trigger: re-derive the owning student's aggregate from the
/// full current mark set. A vanished student is a no-op by contract.
fn recompute_or_err(conn: &Connection, student_id: &str) -> Result<(), HandlerErr> {
    recompute_student_aggregate(conn, student_id)
        .map(|_| ())
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "studentId": student_id })),
        })
}

fn mark_json(
    mark_id: &str,
    student_id: &str,
    subject_id: &str,
    c: &MarkComponents,
    d: &Derived,
) -> serde_json::Value {
    json!({
        "id": mark_id,
        "studentId": student_id,
        "subjectId": subject_id,
        "verbal": c.verbal,
        "homeworks": c.homeworks,
        "activities": c.activities,
        "quiz": c.quiz,
        "finalExam": c.final_exam,
        "total": d.total,
        "finalTotal": d.final_total,
        "result": d.result.as_str()
    })
}

fn handle_marks_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };

    let mut components = MarkComponents::default();
    for key in COMPONENT_KEYS {
        let value = match parse_component(&req.params, key) {
            Ok(v) => v.unwrap_or(0.0),
            Err(e) => return e.response(&req.id),
        };
        match key {
            "verbal" => components.verbal = value,
            "homeworks" => components.homeworks = value,
            "activities" => components.activities = value,
            "quiz" => components.quiz = value,
            "finalExam" => components.final_exam = value,
            _ => unreachable!(),
        }
    }

    let derived = match derive_or_err(&components) {
        Ok(d) => d,
        Err(e) => return e.response(&req.id),
    };

    let student_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let subject_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if subject_exists.is_none() {
        return err(&req.id, "not_found", "subject not found", None);
    }

    let mark_id = Uuid::new_v4().to_string();
    let now = db::now_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO marks(id, student_id, subject_id, verbal, homeworks, activities, quiz,
                           final_exam, total, final_total, result, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &mark_id,
            &student_id,
            &subject_id,
            components.verbal,
            components.homeworks,
            components.activities,
            components.quiz,
            components.final_exam,
            derived.total,
            derived.final_total,
            derived.result.as_str(),
            &now,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "marks" })),
        );
    }

    if let Err(e) = recompute_or_err(conn, &student_id) {
        return e.response(&req.id);
    }

    ok(
        &req.id,
        json!({ "mark": mark_json(&mark_id, &student_id, &subject_id, &components, &derived) }),
    )
}

fn handle_marks_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mark_id = match req.params.get("markId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing markId", None),
    };

    let existing: Option<(String, String, MarkComponents)> = match conn
        .query_row(
            "SELECT student_id, subject_id, verbal, homeworks, activities, quiz, final_exam
             FROM marks WHERE id = ?",
            [&mark_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    MarkComponents {
                        verbal: r.get(2)?,
                        homeworks: r.get(3)?,
                        activities: r.get(4)?,
                        quiz: r.get(5)?,
                        final_exam: r.get(6)?,
                    },
                ))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((student_id, subject_id, stored)) = existing else {
        return err(&req.id, "not_found", "mark not found", None);
    };

    // Partial edit: merge the provided components over the stored ones, then
    // re-derive from the full set.
    let mut components = stored;
    for key in COMPONENT_KEYS {
        let provided = match parse_component(&req.params, key) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
        let Some(value) = provided else {
            continue;
        };
        match key {
            "verbal" => components.verbal = value,
            "homeworks" => components.homeworks = value,
            "activities" => components.activities = value,
            "quiz" => components.quiz = value,
            "finalExam" => components.final_exam = value,
            _ => unreachable!(),
        }
    }

    let derived = match derive_or_err(&components) {
        Ok(d) => d,
        Err(e) => return e.response(&req.id),
    };

    if let Err(e) = conn.execute(
        "UPDATE marks
         SET verbal = ?, homeworks = ?, activities = ?, quiz = ?, final_exam = ?,
             total = ?, final_total = ?, result = ?, updated_at = ?
         WHERE id = ?",
        (
            components.verbal,
            components.homeworks,
            components.activities,
            components.quiz,
            components.final_exam,
            derived.total,
            derived.final_total,
            derived.result.as_str(),
            db::now_rfc3339(),
            &mark_id,
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "marks" })),
        );
    }

    if let Err(e) = recompute_or_err(conn, &student_id) {
        return e.response(&req.id);
    }

    ok(
        &req.id,
        json!({ "mark": mark_json(&mark_id, &student_id, &subject_id, &components, &derived) }),
    )
}

fn handle_marks_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mark_id = match req.params.get("markId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing markId", None),
    };

    let student_id: Option<String> = match conn
        .query_row("SELECT student_id FROM marks WHERE id = ?", [&mark_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(student_id) = student_id else {
        return err(&req.id, "not_found", "mark not found", None);
    };

    if let Err(e) = conn.execute("DELETE FROM marks WHERE id = ?", [&mark_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "marks" })),
        );
    }

    if let Err(e) = recompute_or_err(conn, &student_id) {
        return e.response(&req.id);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_marks_list_by_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT m.id, m.subject_id, sb.name, sb.semester,
                m.verbal, m.homeworks, m.activities, m.quiz, m.final_exam,
                m.total, m.final_total, m.result
         FROM marks m
         JOIN subjects sb ON sb.id = m.subject_id
         WHERE m.student_id = ?
         ORDER BY sb.semester, sb.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&student_id], |row| {
            let id: String = row.get(0)?;
            let subject_id: String = row.get(1)?;
            let subject_name: String = row.get(2)?;
            let semester: i64 = row.get(3)?;
            let verbal: f64 = row.get(4)?;
            let homeworks: f64 = row.get(5)?;
            let activities: f64 = row.get(6)?;
            let quiz: f64 = row.get(7)?;
            let final_exam: f64 = row.get(8)?;
            let total: f64 = row.get(9)?;
            let final_total: f64 = row.get(10)?;
            let result: String = row.get(11)?;
            Ok(json!({
                "id": id,
                "subjectId": subject_id,
                "subjectName": subject_name,
                "semester": semester,
                "verbal": verbal,
                "homeworks": homeworks,
                "activities": activities,
                "quiz": quiz,
                "finalExam": final_exam,
                "total": total,
                "finalTotal": final_total,
                "result": result
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(marks) => ok(&req.id, json!({ "marks": marks })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.create" => Some(handle_marks_create(state, req)),
        "marks.update" => Some(handle_marks_update(state, req)),
        "marks.delete" => Some(handle_marks_delete(state, req)),
        "marks.listByStudent" => Some(handle_marks_list_by_student(state, req)),
        _ => None,
    }
}
