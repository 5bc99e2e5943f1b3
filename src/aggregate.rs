use rusqlite::{Connection, OptionalExtension};

use crate::db;
use crate::grades::round2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StudentAggregate {
    pub average: f64,
    pub failed_subjects: i64,
}

/// Re-derives a student's `average` and `failed_subjects` from the full
/// current set of that student's marks and persists both.
///
/// Always a from-scratch recompute, never an incremental patch: repeated or
/// reordered invocations converge to the same stored values as long as each
/// one sees a consistent read of the marks, which keeps concurrent grade
/// entry for the same student free of lost-update anomalies without locking.
///
/// Returns `Ok(None)` when the student row no longer exists; a trailing
/// recompute for a deleted student is discardable, not an error.
pub fn recompute_student_aggregate(
    conn: &Connection,
    student_id: &str,
) -> anyhow::Result<Option<StudentAggregate>> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()?;
    if exists.is_none() {
        return Ok(None);
    }

    let (sum, count, failed): (f64, i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(final_total), 0),
                COUNT(*),
                COALESCE(SUM(CASE WHEN result = 'failed' THEN 1 ELSE 0 END), 0)
         FROM marks
         WHERE student_id = ?",
        [student_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;

    let average = if count > 0 {
        round2(sum / count as f64)
    } else {
        0.0
    };

    conn.execute(
        "UPDATE students
         SET average = ?, failed_subjects = ?, updated_at = ?
         WHERE id = ?",
        (average, failed, db::now_rfc3339(), student_id),
    )?;

    Ok(Some(StudentAggregate {
        average,
        failed_subjects: failed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grades::{compute_derived, MarkComponents};
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};
    use uuid::Uuid;

    fn temp_workspace() -> PathBuf {
        std::env::temp_dir().join(format!(
            "registrard-aggregate-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ))
    }

    fn seed_student(conn: &Connection) -> String {
        conn.execute(
            "INSERT INTO academic_years(id, name, active) VALUES('y1', '2025/2026', 1)",
            [],
        )
        .expect("insert year");
        conn.execute("INSERT INTO classes(id, name) VALUES('c1', 'A')", [])
            .expect("insert class");
        conn.execute(
            "INSERT INTO subjects(id, name, semester, class_id) VALUES('sub1', 'Math', 1, 'c1')",
            [],
        )
        .expect("insert subject");
        let student_id = "stu1".to_string();
        conn.execute(
            "INSERT INTO students(id, first_name, last_name, identifier, class_id, academic_year_id)
             VALUES(?, 'Lina', 'Haddad', 'S-001', 'c1', 'y1')",
            [&student_id],
        )
        .expect("insert student");
        student_id
    }

    fn insert_mark(conn: &Connection, student_id: &str, subject_id: &str, c: MarkComponents) {
        let d = compute_derived(&c).expect("derive");
        conn.execute(
            "INSERT INTO subjects(id, name, semester, class_id)
             VALUES(?, ?, 1, 'c1')
             ON CONFLICT DO NOTHING",
            (subject_id, format!("Subject {}", subject_id)),
        )
        .expect("insert subject");
        conn.execute(
            "INSERT INTO marks(id, student_id, subject_id, verbal, homeworks, activities, quiz,
                               final_exam, total, final_total, result)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                student_id,
                subject_id,
                c.verbal,
                c.homeworks,
                c.activities,
                c.quiz,
                c.final_exam,
                d.total,
                d.final_total,
                d.result.as_str(),
            ),
        )
        .expect("insert mark");
    }

    // finalExam value whose finalTotal lands exactly on `target` with all
    // other components zero.
    fn final_only(target: f64) -> MarkComponents {
        MarkComponents {
            final_exam: target / 0.4,
            ..MarkComponents::default()
        }
    }

    #[test]
    fn averages_final_totals_rounded_to_2_decimals() {
        let conn = crate::db::open_db(&temp_workspace()).expect("open db");
        let sid = seed_student(&conn);
        insert_mark(&conn, &sid, "m1", final_only(40.0));
        insert_mark(&conn, &sid, "m2", final_only(60.0));
        insert_mark(&conn, &sid, "m3", final_only(80.0));

        let agg = recompute_student_aggregate(&conn, &sid)
            .expect("recompute")
            .expect("student exists");
        assert_eq!(agg.average, 60.0);
        // 40 is below the pass threshold; the other two pass.
        assert_eq!(agg.failed_subjects, 1);

        let (stored_avg, stored_failed): (f64, i64) = conn
            .query_row(
                "SELECT average, failed_subjects FROM students WHERE id = ?",
                [&sid],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .expect("read student");
        assert_eq!(stored_avg, 60.0);
        assert_eq!(stored_failed, 1);
    }

    #[test]
    fn empty_record_set_yields_zero_average() {
        let conn = crate::db::open_db(&temp_workspace()).expect("open db");
        let sid = seed_student(&conn);
        let agg = recompute_student_aggregate(&conn, &sid)
            .expect("recompute")
            .expect("student exists");
        assert_eq!(agg.average, 0.0);
        assert_eq!(agg.failed_subjects, 0);
    }

    #[test]
    fn holding_marks_do_not_count_as_failed() {
        let conn = crate::db::open_db(&temp_workspace()).expect("open db");
        let sid = seed_student(&conn);
        insert_mark(
            &conn,
            &sid,
            "m1",
            MarkComponents {
                verbal: 10.0,
                quiz: 10.0,
                ..MarkComponents::default()
            },
        );
        let agg = recompute_student_aggregate(&conn, &sid)
            .expect("recompute")
            .expect("student exists");
        assert_eq!(agg.failed_subjects, 0);
        assert_eq!(agg.average, 3.0);
    }

    #[test]
    fn recompute_is_idempotent() {
        let conn = crate::db::open_db(&temp_workspace()).expect("open db");
        let sid = seed_student(&conn);
        insert_mark(&conn, &sid, "m1", final_only(45.0));
        insert_mark(&conn, &sid, "m2", final_only(55.0));

        let first = recompute_student_aggregate(&conn, &sid)
            .expect("recompute")
            .expect("student exists");
        let second = recompute_student_aggregate(&conn, &sid)
            .expect("recompute again")
            .expect("student exists");
        assert_eq!(first, second);
    }

    #[test]
    fn recompute_is_order_independent() {
        let a = final_only(40.0);
        let b = final_only(80.0);

        let conn1 = crate::db::open_db(&temp_workspace()).expect("open db");
        let sid1 = seed_student(&conn1);
        insert_mark(&conn1, &sid1, "m1", a);
        recompute_student_aggregate(&conn1, &sid1).expect("recompute");
        insert_mark(&conn1, &sid1, "m2", b);
        let agg1 = recompute_student_aggregate(&conn1, &sid1)
            .expect("recompute")
            .expect("student exists");

        let conn2 = crate::db::open_db(&temp_workspace()).expect("open db");
        let sid2 = seed_student(&conn2);
        insert_mark(&conn2, &sid2, "m1", b);
        recompute_student_aggregate(&conn2, &sid2).expect("recompute");
        insert_mark(&conn2, &sid2, "m2", a);
        let agg2 = recompute_student_aggregate(&conn2, &sid2)
            .expect("recompute")
            .expect("student exists");

        assert_eq!(agg1, agg2);
    }

    #[test]
    fn missing_student_is_a_no_op() {
        let conn = crate::db::open_db(&temp_workspace()).expect("open db");
        let result = recompute_student_aggregate(&conn, "no-such-student").expect("recompute");
        assert_eq!(result, None);
    }
}
