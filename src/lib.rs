#[cfg(feature = "desktop")]
mod commands;
pub mod core;
pub mod models;

#[cfg(feature = "desktop")]
pub fn run() {
    use crate::core::controller::WorkbookController;
    use crate::core::geometry_store::GeometryStore;
    use tauri::{Manager, WindowEvent};
    use tauri_plugin_dialog::{DialogExt, MessageDialogButtons};

    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .setup(|_app| {
            core::app_log::init(core::paths::log_dir());
            core::app_log::install_panic_hook();
            core::app_log::info("app", "startup");

            WorkbookController::install(WorkbookController::new(
                GeometryStore::new(core::paths::config_file_path()),
                core::excel::create_host(),
                core::paths::workbook_path(),
                core::paths::WORKBOOK_IDENTIFIER,
            ));

            Ok(())
        })
        .on_window_event(|window, event| {
            if let WindowEvent::CloseRequested { api, .. } = event {
                // Quit goes through a confirmation, and the workbook's
                // placement is persisted before the process exits.
                api.prevent_close();
                let app_handle = window.app_handle().clone();
                app_handle
                    .clone()
                    .dialog()
                    .message("Voulez-vous vraiment quitter ?")
                    .title("Confirmation")
                    .buttons(MessageDialogButtons::YesNo)
                    .show(move |confirmed| {
                        if !confirmed {
                            return;
                        }
                        // The dialog callback fires off the main thread, and
                        // shutdown drives the apartment-bound COM handle, so
                        // hop back to the main thread first.
                        let exit_handle = app_handle.clone();
                        let _ = app_handle.run_on_main_thread(move || {
                            if let Some(controller) =
                                WorkbookController::instance().lock().as_mut()
                            {
                                controller.shutdown();
                            }
                            core::app_log::info("app", "shutdown");
                            exit_handle.exit(0);
                        });
                    });
            }
        })
        .invoke_handler(tauri::generate_handler![
            commands::workbook::toggle_workbook,
            commands::workbook::set_unsave,
            commands::workbook::get_dock_state,
            commands::logs::read_logs,
            commands::logs::clear_logs,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
