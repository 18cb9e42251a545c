//! `getNotifications`: school notices addressed to the caller.

use guardian_core::types::ActorId;
use guardian_records::RecordStore;
use serde::Deserialize;

use super::{clamp_limit, parse_args, row_count, store_err, ContextTally, DispatchError, ToolName, ToolOutput};

const TOOL: ToolName = ToolName::Notifications;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Args {
    #[serde(default)]
    unread_only: bool,
    #[serde(default)]
    limit: Option<usize>,
}

pub fn run(
    store: &dyn RecordStore,
    actor: &ActorId,
    args: serde_json::Value,
) -> Result<ToolOutput, DispatchError> {
    let args: Args = parse_args(TOOL, args)?;
    let rows = store
        .notifications(actor, args.unread_only, clamp_limit(args.limit))
        .map_err(store_err(TOOL))?;
    let unread = rows.iter().filter(|n| !n.is_read).count();

    let tally = ContextTally {
        notifications: row_count(&rows),
        ..ContextTally::default()
    };

    Ok(ToolOutput {
        payload: serde_json::json!({
            "notifications": rows,
            "unread": unread,
        }),
        tally,
    })
}
