//! Centralized constants for the authz controller.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod authz;
pub mod network;
pub mod paths;
pub mod state;
