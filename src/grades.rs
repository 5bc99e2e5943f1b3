use serde::Serialize;

/// Component weights inherited from the legacy grading policy.
/// They sum to 1.10, so a finalTotal above 100 is possible with maximal
/// components. This is intentional and must not be renormalized.
pub const WEIGHT_VERBAL: f64 = 0.10;
pub const WEIGHT_HOMEWORKS: f64 = 0.20;
pub const WEIGHT_ACTIVITIES: f64 = 0.20;
pub const WEIGHT_QUIZ: f64 = 0.20;
pub const WEIGHT_FINAL_EXAM: f64 = 0.40;

/// finalTotal at or above this is a pass, once the final exam is in.
pub const PASS_THRESHOLD: f64 = 50.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MarkComponents {
    pub verbal: f64,
    pub homeworks: f64,
    pub activities: f64,
    pub quiz: f64,
    pub final_exam: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkResult {
    Holding,
    Passed,
    Failed,
}

impl MarkResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkResult::Holding => "holding",
            MarkResult::Passed => "passed",
            MarkResult::Failed => "failed",
        }
    }

    /// Stored rows are only ever written from `as_str`, so anything else is
    /// treated as not-yet-gradable rather than an error.
    #[allow(dead_code)]
    pub fn parse(s: &str) -> MarkResult {
        match s {
            "passed" => MarkResult::Passed,
            "failed" => MarkResult::Failed,
            _ => MarkResult::Holding,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Derived {
    pub total: f64,
    pub final_total: f64,
    pub result: MarkResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct GradeError {
    pub field: &'static str,
    pub value: f64,
}

impl std::fmt::Display for GradeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} must not be negative (got {})", self.field, self.value)
    }
}

impl std::error::Error for GradeError {}

/// Computes the weighted totals and the three-valued result for one mark row.
///
/// `Holding` means the final exam has not been entered yet; it signals
/// "not yet gradable", never a failure. Pure and deterministic: callers merge
/// partial edits over the stored components before invoking this, so the full
/// component set is always in play.
pub fn compute_derived(c: &MarkComponents) -> Result<Derived, GradeError> {
    for (field, value) in [
        ("verbal", c.verbal),
        ("homeworks", c.homeworks),
        ("activities", c.activities),
        ("quiz", c.quiz),
        ("finalExam", c.final_exam),
    ] {
        if value < 0.0 {
            return Err(GradeError { field, value });
        }
    }

    let total = c.verbal * WEIGHT_VERBAL
        + c.homeworks * WEIGHT_HOMEWORKS
        + c.activities * WEIGHT_ACTIVITIES
        + c.quiz * WEIGHT_QUIZ;
    let final_total = total + c.final_exam * WEIGHT_FINAL_EXAM;

    let result = if c.final_exam == 0.0 {
        MarkResult::Holding
    } else if final_total >= PASS_THRESHOLD {
        MarkResult::Passed
    } else {
        MarkResult::Failed
    };

    Ok(Derived {
        total,
        final_total,
        result,
    })
}

/// Legacy-compatible 2-decimal rounding, half away from zero:
/// `Math.round(100*x) / 100`. Used for the student average only; the
/// per-mark totals are stored unrounded.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
