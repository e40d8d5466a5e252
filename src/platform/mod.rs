// Linkmirror platform paths
// Resolves where settings and the local database live on each OS.

use std::env;
use std::path::PathBuf;

const APP_DIR: &str = "linkmirror";

fn home_dir() -> PathBuf {
    PathBuf::from(env::var("HOME").unwrap_or_else(|_| String::from("/tmp")))
}

/// Returns the configuration directory.
///
/// - **Linux**: `$XDG_CONFIG_HOME/linkmirror` or `~/.config/linkmirror`
/// - **macOS**: `~/Library/Application Support/linkmirror`
/// - **Windows**: `%APPDATA%/linkmirror`
pub fn get_config_dir() -> PathBuf {
    if cfg!(target_os = "windows") {
        windows_appdata().join(APP_DIR)
    } else if cfg!(target_os = "macos") {
        home_dir().join("Library").join("Application Support").join(APP_DIR)
    } else {
        match env::var("XDG_CONFIG_HOME") {
            Ok(xdg) => PathBuf::from(xdg).join(APP_DIR),
            Err(_) => home_dir().join(".config").join(APP_DIR),
        }
    }
}

/// Returns the data directory holding the local database.
///
/// - **Linux**: `$XDG_DATA_HOME/linkmirror` or `~/.local/share/linkmirror`
/// - **macOS** and **Windows**: same as the config directory
pub fn get_data_dir() -> PathBuf {
    if cfg!(any(target_os = "windows", target_os = "macos")) {
        get_config_dir()
    } else {
        match env::var("XDG_DATA_HOME") {
            Ok(xdg) => PathBuf::from(xdg).join(APP_DIR),
            Err(_) => home_dir().join(".local").join("share").join(APP_DIR),
        }
    }
}

fn windows_appdata() -> PathBuf {
    PathBuf::from(
        env::var("APPDATA").unwrap_or_else(|_| String::from("C:\\Users\\Default\\AppData\\Roaming")),
    )
}
