//! `getDetailedGrades`: grade rows plus per-subject averages.

use std::collections::BTreeMap;

use guardian_core::types::ActorId;
use guardian_records::{GradeRecord, RecordStore};
use serde::{Deserialize, Serialize};

use super::{parse_args, resolve_child, row_count, store_err, ContextTally, DispatchError, ToolName, ToolOutput};

const TOOL: ToolName = ToolName::DetailedGrades;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Args {
    student_name: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    semester: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverage {
    pub subject: String,
    pub average: f64,
    pub count: usize,
}

pub fn run(
    store: &dyn RecordStore,
    actor: &ActorId,
    args: serde_json::Value,
) -> Result<ToolOutput, DispatchError> {
    let args: Args = parse_args(TOOL, args)?;
    let student = resolve_child(TOOL, store, actor, &args.student_name)?;

    let subject = args.subject.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let semester = args.semester.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let grades = store
        .grades(&student.id, subject, semester)
        .map_err(store_err(TOOL))?;
    let averages = subject_averages(&grades);

    let mut tally = ContextTally::default();
    tally.students.insert(student.id.clone());
    tally
        .subjects
        .extend(averages.iter().map(|a| (student.id.clone(), a.subject.clone())));
    tally.grades = row_count(&grades);

    Ok(ToolOutput {
        payload: serde_json::json!({
            "student": student,
            "grades": grades,
            "averages": averages,
        }),
        tally,
    })
}

/// Mean score per subject, rounded to two decimals, in subject order.
pub fn subject_averages(grades: &[GradeRecord]) -> Vec<SubjectAverage> {
    let mut sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for g in grades {
        let entry = sums.entry(g.subject.as_str()).or_insert((0.0, 0));
        entry.0 += g.score;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(subject, (sum, n))| SubjectAverage {
            subject: subject.to_string(),
            average: (sum / n as f64 * 100.0).round() / 100.0,
            count: n,
        })
        .collect()
}
