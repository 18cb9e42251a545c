//! Tool registry for model tool calling.
//!
//! The set of tools is closed: [`ToolName`] enumerates every tool the model
//! may call, and [`dispatch::Dispatcher`] routes a call to its handler. All
//! handlers are read-only and scoped to the calling actor's own records.

pub mod children;
pub mod dispatch;
pub mod feedback;
pub mod grades;
pub mod notifications;
pub mod violations;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use guardian_core::types::ActorId;
use guardian_protocol::ContextUsed;
use guardian_records::{RecordError, RecordStore, Student};
use serde::de::DeserializeOwned;

use crate::provider::ToolDefinition;

pub use dispatch::{DispatchOutcome, Dispatcher};

/// Default row limit for list-style tools.
pub const DEFAULT_LIMIT: usize = 10;
/// Hard cap on any `limit` argument.
pub const MAX_LIMIT: usize = 50;

/// Every tool the model may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    ChildrenList,
    DetailedGrades,
    TeacherFeedback,
    Violations,
    Notifications,
}

impl ToolName {
    pub const ALL: [ToolName; 5] = [
        ToolName::ChildrenList,
        ToolName::DetailedGrades,
        ToolName::TeacherFeedback,
        ToolName::Violations,
        ToolName::Notifications,
    ];

    /// Name on the wire and in model tool declarations.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::ChildrenList => "getChildrenList",
            ToolName::DetailedGrades => "getDetailedGrades",
            ToolName::TeacherFeedback => "getTeacherFeedback",
            ToolName::Violations => "getViolations",
            ToolName::Notifications => "getNotifications",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolName::ChildrenList => {
                "List the caller's children with their class names. Call this first \
                 when the parent does not name a child."
            }
            ToolName::DetailedGrades => {
                "Get a child's grades with per-subject averages. Optionally filter \
                 by subject and semester (e.g. \"HK1\")."
            }
            ToolName::TeacherFeedback => "Get recent teacher comments about a child, newest first.",
            ToolName::Violations => "Get a child's recorded discipline violations, newest first.",
            ToolName::Notifications => "Get school notifications addressed to the caller.",
        }
    }

    /// JSON Schema for the tool's arguments.
    pub fn parameters(&self) -> serde_json::Value {
        let student_name = serde_json::json!({
            "type": "string",
            "description": "Full name (or id) of one of the caller's children."
        });
        let limit = serde_json::json!({
            "type": "integer",
            "description": format!("Maximum rows to return (default {DEFAULT_LIMIT}, max {MAX_LIMIT}).")
        });
        match self {
            ToolName::ChildrenList => serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
            ToolName::DetailedGrades => serde_json::json!({
                "type": "object",
                "properties": {
                    "studentName": student_name,
                    "subject": { "type": "string", "description": "Subject name filter (optional)." },
                    "semester": { "type": "string", "description": "Semester filter such as \"HK1\" (optional)." }
                },
                "required": ["studentName"]
            }),
            ToolName::TeacherFeedback | ToolName::Violations => serde_json::json!({
                "type": "object",
                "properties": {
                    "studentName": student_name,
                    "limit": limit
                },
                "required": ["studentName"]
            }),
            ToolName::Notifications => serde_json::json!({
                "type": "object",
                "properties": {
                    "unreadOnly": { "type": "boolean", "description": "Only unread notifications (optional)." },
                    "limit": limit
                },
                "required": []
            }),
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.as_str().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }

    /// Declarations for every registered tool, in registry order.
    pub fn definitions() -> Vec<ToolDefinition> {
        Self::ALL.iter().map(ToolName::definition).collect()
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DispatchError::UnknownTool(s.to_string()))
    }
}

/// Why a tool call produced an error result instead of data.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("{tool}: invalid arguments: {reason}")]
    InvalidArguments { tool: ToolName, reason: String },

    #[error("Student {0} not found in your children list")]
    StudentNotFound(String),

    #[error("{tool}: {source}")]
    Store {
        tool: ToolName,
        #[source]
        source: RecordError,
    },

    #[error("{tool}: handler failed: {reason}")]
    HandlerFailed { tool: ToolName, reason: String },
}

/// Successful handler output plus the data points it touched.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub payload: serde_json::Value,
    pub tally: ContextTally,
}

/// Data points touched while answering, merged across a turn's tool calls.
///
/// Students and subjects are kept as sets so the same child looked up by two
/// tools counts once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextTally {
    pub students: BTreeSet<String>,
    pub subjects: BTreeSet<(String, String)>,
    pub grades: u32,
    pub feedback: u32,
    pub violations: u32,
    pub notifications: u32,
}

impl ContextTally {
    pub fn merge(&mut self, other: ContextTally) {
        self.students.extend(other.students);
        self.subjects.extend(other.subjects);
        self.grades = self.grades.saturating_add(other.grades);
        self.feedback = self.feedback.saturating_add(other.feedback);
        self.violations = self.violations.saturating_add(other.violations);
        self.notifications = self.notifications.saturating_add(other.notifications);
    }

    pub fn context_used(&self) -> ContextUsed {
        ContextUsed {
            students: count(self.students.len()),
            subjects: count(self.subjects.len()),
            grades: self.grades,
            feedback: self.feedback,
            violations: self.violations,
            notifications: self.notifications,
        }
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

pub(crate) fn row_count<T>(rows: &[T]) -> u32 {
    count(rows.len())
}

/// Deserialize a tool's argument map into its DTO. A missing or `null`
/// argument map is treated as `{}`.
pub(crate) fn parse_args<T: DeserializeOwned>(
    tool: ToolName,
    args: serde_json::Value,
) -> Result<T, DispatchError> {
    let args = if args.is_null() {
        serde_json::json!({})
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| DispatchError::InvalidArguments {
        tool,
        reason: e.to_string(),
    })
}

/// Resolve `name` among `actor`'s own children.
pub(crate) fn resolve_child(
    tool: ToolName,
    store: &dyn RecordStore,
    actor: &ActorId,
    name: &str,
) -> Result<Student, DispatchError> {
    if name.trim().is_empty() {
        return Err(DispatchError::InvalidArguments {
            tool,
            reason: "studentName must not be empty".to_string(),
        });
    }
    store
        .find_child(actor, name)
        .map_err(|source| DispatchError::Store { tool, source })?
        .ok_or_else(|| DispatchError::StudentNotFound(name.trim().to_string()))
}

pub(crate) fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

pub(crate) fn store_err(tool: ToolName) -> impl FnOnce(RecordError) -> DispatchError {
    move |source| DispatchError::Store { tool, source }
}
