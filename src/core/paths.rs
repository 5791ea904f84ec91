use std::env;
use std::path::PathBuf;

pub const WORKBOOK_FILE_NAME: &str = "TradingData.xlsm";

/// Identifier the workbook geometry is stored under in the settings file.
pub const WORKBOOK_IDENTIFIER: &str = "TradingData";

const CONFIG_FILE_NAME: &str = "window_settings.xml";

/// Root of the trading workspace the app lives in.
///
/// The binary sits in a subdirectory of the workspace (e.g. `app/`), so the
/// root is the parent of the executable's directory. Falls back to the
/// current directory when the executable path can't be resolved.
pub fn project_root() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| {
            let dir = exe.parent()?;
            Some(dir.parent().unwrap_or(dir).to_path_buf())
        })
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn workbook_path() -> PathBuf {
    project_root()
        .join("Data")
        .join("Excel")
        .join(WORKBOOK_FILE_NAME)
}

pub fn config_file_path() -> PathBuf {
    project_root()
        .join("Data")
        .join("config")
        .join(CONFIG_FILE_NAME)
}

pub fn log_dir() -> PathBuf {
    project_root().join("Data").join("logs")
}
