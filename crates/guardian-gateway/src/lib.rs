//! HTTP surface of the chat gateway: the streaming turn endpoint, the
//! conversation persistence endpoints and the health probe.

pub mod app;
pub mod auth;
pub mod error;
pub mod http;

pub use app::{build_router, AppState};
