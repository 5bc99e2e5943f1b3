use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::promotion::{plan_promotion, ClassOrder, PromotionPlan, StudentStanding};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

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

fn parse_class_order(params: &serde_json::Value) -> Result<ClassOrder, HandlerErr> {
    let Some(raw) = params.get("classOrder").and_then(|v| v.as_array()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing classOrder[]".to_string(),
            details: None,
        });
    };

    let mut names: Vec<String> = Vec::with_capacity(raw.len());
    for (i, v) in raw.iter().enumerate() {
        let Some(name) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return Err(HandlerErr {
                code: "bad_params",
                message: format!("classOrder[{}] must be a non-empty string", i),
                details: None,
            });
        };
        names.push(name.to_string());
    }

    let order = ClassOrder::new(names);
    if order.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "classOrder must not be empty".to_string(),
            details: None,
        });
    }
    Ok(order)
}

fn resolve_active_year(conn: &Connection) -> Result<String, HandlerErr> {
    let year_id: Option<String> = conn
        .query_row(
            "SELECT id FROM academic_years WHERE active = 1 LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    year_id.ok_or_else(|| HandlerErr {
        code: "no_active_year",
        message: "no active academic year configured".to_string(),
        details: None,
    })
}

fn load_standings(conn: &Connection, year_id: &str) -> Result<Vec<StudentStanding>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.first_name, s.middle_name, s.last_name, c.name, s.failed_subjects
             FROM students s
             JOIN classes c ON c.id = s.class_id
             WHERE s.academic_year_id = ?
             ORDER BY s.last_name, s.first_name",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    stmt.query_map([year_id], |row| {
        let student_id: String = row.get(0)?;
        let first: String = row.get(1)?;
        let middle: String = row.get(2)?;
        let last: String = row.get(3)?;
        let class_name: String = row.get(4)?;
        let failed_subjects: i64 = row.get(5)?;
        let name = if middle.is_empty() {
            format!("{} {}", first, last)
        } else {
            format!("{} {} {}", first, middle, last)
        };
        Ok(StudentStanding {
            student_id,
            name,
            class_name,
            failed_subjects,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn load_class_catalog(conn: &Connection) -> Result<HashMap<String, String>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT name, id FROM classes")
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    stmt.query_map([], |row| {
        let name: String = row.get(0)?;
        let id: String = row.get(1)?;
        Ok((name, id))
    })
    .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

/// Snapshot the active year's population and build the plan. Shared by the
/// live run and the dry-run report so both apply the identical predicate.
fn snapshot_and_plan(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(String, Vec<StudentStanding>, PromotionPlan), HandlerErr> {
    let order = parse_class_order(params)?;
    let year_id = resolve_active_year(conn)?;
    let standings = load_standings(conn, &year_id)?;
    let catalog = load_class_catalog(conn)?;
    let plan = plan_promotion(&order, &standings, &catalog);
    Ok((year_id, standings, plan))
}

fn plan_report(year_id: &str, plan: &PromotionPlan) -> serde_json::Value {
    json!({
        "yearId": year_id,
        "promotedCount": plan.promoted.len(),
        "skippedCount": plan.skipped.len(),
        "stagedCount": plan.staged.len(),
        "promoted": &plan.promoted,
        "skipped": &plan.skipped
    })
}

fn handle_promotion_run(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (year_id, _standings, plan) = match snapshot_and_plan(conn, &req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // All staged class changes land in one transaction; a failure keeps the
    // whole batch unapplied and the report still describes the attempt.
    if !plan.staged.is_empty() {
        let tx = match conn.unchecked_transaction() {
            Ok(t) => t,
            Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
        };
        for staged in &plan.staged {
            if let Err(e) = tx.execute(
                "UPDATE students SET class_id = ?, updated_at = ? WHERE id = ?",
                (
                    &staged.class_id,
                    crate::db::now_rfc3339(),
                    &staged.student_id,
                ),
            ) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_update_failed",
                    e.to_string(),
                    Some(json!({ "studentId": staged.student_id })),
                );
            }
        }
        if let Err(e) = tx.commit() {
            return err(&req.id, "db_commit_failed", e.to_string(), None);
        }
    }

    ok(&req.id, plan_report(&year_id, &plan))
}

fn handle_promotion_report(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (year_id, standings, plan) = match snapshot_and_plan(conn, &req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let failed_by_student: HashMap<&str, i64> = standings
        .iter()
        .map(|s| (s.student_id.as_str(), s.failed_subjects))
        .collect();

    let mut report = plan_report(&year_id, &plan);
    // Dry-run extra: annotate each row with the failed-subject count the
    // decision was made from.
    for key in ["promoted", "skipped"] {
        if let Some(rows) = report[key].as_array_mut() {
            for row in rows {
                let failed = row
                    .get("studentId")
                    .and_then(|v| v.as_str())
                    .and_then(|id| failed_by_student.get(id))
                    .copied()
                    .unwrap_or(0);
                row["failedSubjects"] = json!(failed);
            }
        }
    }

    ok(&req.id, report)
}

fn handle_promotion_reset_failed(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Unconditional, all students: run once the promotion report for the year
    // has been reviewed and finalized.
    match conn.execute(
        "UPDATE students SET failed_subjects = 0, updated_at = ?",
        [crate::db::now_rfc3339()],
    ) {
        Ok(updated) => ok(&req.id, json!({ "updated": updated })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "promotion.run" => Some(handle_promotion_run(state, req)),
        "promotion.report" => Some(handle_promotion_report(state, req)),
        "promotion.resetFailed" => Some(handle_promotion_reset_failed(state, req)),
        _ => None,
    }
}
