//! `getTeacherFeedback`: recent teacher comments about one child.

use guardian_core::types::ActorId;
use guardian_records::RecordStore;
use serde::Deserialize;

use super::{clamp_limit, parse_args, resolve_child, row_count, store_err, ContextTally, DispatchError, ToolName, ToolOutput};

const TOOL: ToolName = ToolName::TeacherFeedback;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Args {
    student_name: String,
    #[serde(default)]
    limit: Option<usize>,
}

pub fn run(
    store: &dyn RecordStore,
    actor: &ActorId,
    args: serde_json::Value,
) -> Result<ToolOutput, DispatchError> {
    let args: Args = parse_args(TOOL, args)?;
    let student = resolve_child(TOOL, store, actor, &args.student_name)?;
    let rows = store
        .feedback(&student.id, clamp_limit(args.limit))
        .map_err(store_err(TOOL))?;

    let mut tally = ContextTally::default();
    tally.students.insert(student.id.clone());
    tally.feedback = row_count(&rows);

    Ok(ToolOutput {
        payload: serde_json::json!({
            "student": student,
            "feedback": rows,
        }),
        tally,
    })
}
