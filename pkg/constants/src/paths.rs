//! Filesystem path constants.

/// Default config file path for the controller.
pub const DEFAULT_CONFIG: &str = "/etc/authz-controller/config.yaml";

/// Default data directory for the SlateDB state store.
pub const DEFAULT_DATA_DIR: &str = "/tmp/authz-controller-data";
