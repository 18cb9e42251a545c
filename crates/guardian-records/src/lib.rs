//! Read-only access to the school records the chat tools query.
//!
//! The gateway only ever reads through [`RecordStore`]; the `db::insert_*`
//! helpers exist for migrations, fixtures and the demo seed.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::RecordError;
pub use store::{RecordStore, SqliteRecordStore};
pub use types::{Feedback, GradeRecord, Notification, Student, Violation};
