//! Application-level orchestration.
//!
//! This module owns the session context, decides what UI triggers turn into,
//! drives runs through the process runner and applies post-run processing
//! (notices, snapshot refreshes, console raise, unattended exit). UI/CLI
//! layers only exchange `UiCommand`/`UiEvent` values with it.

mod controller;
mod dispatcher;
mod loader;
mod post_process;
mod session;

pub(crate) use controller::{run_controller, ControllerConfig, UiCommand};
pub(crate) use loader::{list_catalog, IdentityOverrides, Listing};
pub(crate) use session::{CatalogFilter, Window};
