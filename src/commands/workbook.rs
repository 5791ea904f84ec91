use crate::core::controller::{DockState, Notice, NoticeLevel, WorkbookController};
use serde::Serialize;
use tauri::AppHandle;
use tauri_plugin_dialog::{DialogExt, MessageDialogKind};

#[derive(Debug, Clone, Serialize)]
pub struct DockSnapshot {
    pub state: DockState,
    pub workbook_file: String,
    pub unsave: bool,
}

fn present_notices(app_handle: &AppHandle, notices: &[Notice]) {
    for notice in notices {
        let kind = match notice.level {
            NoticeLevel::Warning => MessageDialogKind::Warning,
            NoticeLevel::Critical => MessageDialogKind::Error,
        };
        app_handle
            .dialog()
            .message(&notice.message)
            .title("sheetdock")
            .kind(kind)
            .show(|_| {});
    }
}

// The workbook commands are deliberately not async: they must run on the
// main thread (where the COM apartment and the IDispatch handle live), and
// Tauri dispatches non-async commands there. An async command would run on
// a worker thread and invoke the handle from the wrong apartment.
#[tauri::command]
pub fn toggle_workbook(app_handle: AppHandle) -> Result<DockState, String> {
    let controller = WorkbookController::instance();
    let mut guard = controller.lock();
    let controller = guard.as_mut().ok_or("Controller not initialized")?;

    match controller.toggle() {
        Ok(outcome) => {
            present_notices(&app_handle, &outcome.notices);
            Ok(outcome.state)
        }
        Err(e) => {
            let message = format!("{:#}", e);
            app_handle
                .dialog()
                .message(&message)
                .title("Erreur Excel")
                .kind(MessageDialogKind::Error)
                .show(|_| {});
            Err(message)
        }
    }
}

#[tauri::command]
pub fn set_unsave(app_handle: AppHandle, enabled: bool) -> Result<(), String> {
    let controller = WorkbookController::instance();
    let mut guard = controller.lock();
    let controller = guard.as_mut().ok_or("Controller not initialized")?;

    let notices = controller.set_suppress_persistence(enabled);
    present_notices(&app_handle, &notices);
    Ok(())
}

#[tauri::command]
pub fn get_dock_state() -> Result<DockSnapshot, String> {
    let controller = WorkbookController::instance();
    let mut guard = controller.lock();
    let controller = guard.as_mut().ok_or("Controller not initialized")?;

    Ok(DockSnapshot {
        state: controller.state(),
        workbook_file: controller.workbook_file_name(),
        unsave: controller.suppress_persistence(),
    })
}
