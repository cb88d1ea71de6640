use std::path::PathBuf;

/// Courier configuration directory (~/.courier)
pub fn courier_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".courier")
}

/// config.json path
pub fn config_json_path() -> PathBuf {
    courier_dir().join("config.json")
}

/// Default directory for the persisted key-value store
pub fn default_data_dir() -> PathBuf {
    courier_dir().join("store")
}
