//! Hook installation and the interposed kernel entry points.
//!
//! - `installer`: redirects the two configured entry points through the
//!   control call and keeps the displaced-original handles.
//! - `interceptors`: the replacement functions that run in kernel context.
//! - `classify`: pure region classification, no privilege required.
//! - `linebuf`: fixed-capacity record formatting for the no-heap hook path.

pub mod classify;
pub mod installer;
pub mod interceptors;
pub mod linebuf;

pub use installer::{InstallError, install_hooks};
