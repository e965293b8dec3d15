// Build-time identity, used for the control client's User-Agent and the startup log line

/// Package version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name (from Cargo.toml).
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// `fleetwatch/<version>`.
pub fn user_agent() -> String {
    format!("{NAME}/{VERSION}")
}
