//! Application-level orchestration.
//!
//! This module owns the blocker's lifecycle (start, stop, completion) and the
//! translation of raw worker events into user-facing state. UI/CLI layers call
//! into this module to keep responsibilities separated.

mod controller;
mod view;

pub(crate) use controller::{run_controller, SessionDeps, SessionReport, UiCommand};
pub(crate) use view::SessionView;
