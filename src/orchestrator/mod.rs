//! Application-level orchestration.
//!
//! This module owns the controller lifecycle (dispatch, resolve, supervise, teardown) and
//! post-run processing such as auto-save and exports. CLI layers call into this module to
//! keep responsibilities separated.

mod controller;
mod post_process;

pub(crate) use controller::Controller;
pub(crate) use post_process::process_run_completion;
