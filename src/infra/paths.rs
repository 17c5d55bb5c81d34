// src/infra/paths.rs — Config file location
//
// FUSIONBRIDGE_HOME overrides everything. Otherwise config lives in
// ~/.fusionbridge/.

use directories::BaseDirs;
use std::path::PathBuf;

/// Returns the FUSIONBRIDGE_HOME override, if set.
fn bridge_home() -> Option<PathBuf> {
    std::env::var_os("FUSIONBRIDGE_HOME").map(PathBuf::from)
}

/// Configuration directory: $FUSIONBRIDGE_HOME/ or ~/.fusionbridge/
///
/// Falls back to the working directory when no home directory can be
/// determined (containers running as a bare uid).
pub fn config_dir() -> PathBuf {
    if let Some(home) = bridge_home() {
        return home;
    }
    match BaseDirs::new() {
        Some(base) => base.home_dir().join(".fusionbridge"),
        None => PathBuf::from("."),
    }
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}
