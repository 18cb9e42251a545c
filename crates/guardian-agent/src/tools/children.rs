//! `getChildrenList`: the caller's children with their classes.

use guardian_core::types::ActorId;
use guardian_records::RecordStore;

use super::{store_err, ContextTally, DispatchError, ToolName, ToolOutput};

const TOOL: ToolName = ToolName::ChildrenList;

pub fn run(
    store: &dyn RecordStore,
    actor: &ActorId,
    _args: serde_json::Value,
) -> Result<ToolOutput, DispatchError> {
    let children = store.children_of(actor).map_err(store_err(TOOL))?;

    let mut tally = ContextTally::default();
    tally.students.extend(children.iter().map(|c| c.id.clone()));

    Ok(ToolOutput {
        payload: serde_json::json!({
            "count": children.len(),
            "children": children,
        }),
        tally,
    })
}
