//! Network-related constants.

/// Default port for the controller's API server.
pub const DEFAULT_API_PORT: u16 = 7780;

/// Default API server address (HTTP).
pub const DEFAULT_API_ADDR: &str = "http://127.0.0.1:7780";
