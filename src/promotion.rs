use serde::Serialize;
use std::collections::HashMap;

/// A student is held back at this many failed subjects or more.
/// Fixed policy constant, not configurable per call.
pub const MAX_FAILED_SUBJECTS: i64 = 3;

/// Ordered class-level names, leaf first, terminal level last.
/// Injected per promotion run; immutable while the plan is built.
#[derive(Debug, Clone)]
pub struct ClassOrder {
    names: Vec<String>,
}

impl ClassOrder {
    pub fn new(names: Vec<String>) -> ClassOrder {
        ClassOrder { names }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, class_name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == class_name)
    }

    pub fn is_terminal(&self, index: usize) -> bool {
        index + 1 == self.names.len()
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(|s| s.as_str())
    }
}

/// The per-student snapshot the planner works from.
#[derive(Debug, Clone)]
pub struct StudentStanding {
    pub student_id: String,
    pub name: String,
    pub class_name: String,
    pub failed_subjects: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooManyFailedSubjects,
    ClassNotInOrder,
    NextClassUnresolved,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::TooManyFailedSubjects => "too many failed subjects",
            SkipReason::ClassNotInOrder => "class not in promotion order",
            SkipReason::NextClassUnresolved => "next class not found in catalog",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Promoted {
    pub student_id: String,
    pub name: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Skipped {
    pub student_id: String,
    pub name: String,
    pub reason: String,
}

/// One class-id write to apply in the bulk update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedUpdate {
    pub student_id: String,
    pub class_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct PromotionPlan {
    pub promoted: Vec<Promoted>,
    pub skipped: Vec<Skipped>,
    pub staged: Vec<StagedUpdate>,
}

/// Decides every student's outcome independently; a skip never aborts the
/// plan. A student already at the terminal level is a fixed point: reported
/// promoted with `from == to` and nothing staged.
///
/// `catalog` maps class names to their storage ids for staging the next
/// level's write.
pub fn plan_promotion(
    order: &ClassOrder,
    students: &[StudentStanding],
    catalog: &HashMap<String, String>,
) -> PromotionPlan {
    let mut plan = PromotionPlan::default();

    for s in students {
        if s.failed_subjects >= MAX_FAILED_SUBJECTS {
            plan.skipped.push(Skipped {
                student_id: s.student_id.clone(),
                name: s.name.clone(),
                reason: SkipReason::TooManyFailedSubjects.as_str().to_string(),
            });
            continue;
        }

        let Some(index) = order.position(&s.class_name) else {
            plan.skipped.push(Skipped {
                student_id: s.student_id.clone(),
                name: s.name.clone(),
                reason: SkipReason::ClassNotInOrder.as_str().to_string(),
            });
            continue;
        };

        if order.is_terminal(index) {
            plan.promoted.push(Promoted {
                student_id: s.student_id.clone(),
                name: s.name.clone(),
                from: s.class_name.clone(),
                to: s.class_name.clone(),
            });
            continue;
        }

        // position() found the index, so index+1 is in range here.
        let next_name = order
            .name_at(index + 1)
            .expect("non-terminal index has a successor");

        let Some(next_class_id) = catalog.get(next_name) else {
            plan.skipped.push(Skipped {
                student_id: s.student_id.clone(),
                name: s.name.clone(),
                reason: SkipReason::NextClassUnresolved.as_str().to_string(),
            });
            continue;
        };

        plan.staged.push(StagedUpdate {
            student_id: s.student_id.clone(),
            class_id: next_class_id.clone(),
        });
        plan.promoted.push(Promoted {
            student_id: s.student_id.clone(),
            name: s.name.clone(),
            from: s.class_name.clone(),
            to: next_name.to_string(),
        });
    }

    plan
}
