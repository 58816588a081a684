//! Read-side streaming primitives over swarm-backed files.

mod file_view;

pub use file_view::{FileView, LookAhead, StreamError};
pub(crate) use file_view::ViewContext;
