//! Resource types shared by the state store, the controllers and the CLI.

pub mod cluster;
pub mod config;
pub mod manifest;
pub mod rbac;
pub mod validate;
