//! Terminal presentation.
//!
//! - [`actor`]: renders installer events on a dedicated thread as they arrive.
//! - [`diagnostics`]: the end-of-run report (errors, warnings, notes).

pub mod actor;
pub mod diagnostics;
