use crate::core::app_log::{self, AppLogRecord};

#[tauri::command]
pub async fn read_logs(limit: Option<u32>, query: Option<String>) -> Result<Vec<AppLogRecord>, String> {
    let limit = limit.unwrap_or(500).clamp(1, 5000) as usize;
    app_log::read(limit, query)
}

#[tauri::command]
pub async fn clear_logs() -> Result<(), String> {
    app_log::clear()
}
