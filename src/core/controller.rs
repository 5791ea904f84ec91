use crate::core::app_log;
use crate::core::excel::{ExcelHost, WorkbookWindow};
use crate::core::geometry_store::GeometryStore;
use crate::models::WindowGeometry;
use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DockState {
    Closed,
    OpenHidden,
    OpenVisible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Warning,
    Critical,
}

/// A problem worth telling the user about that did not abort the toggle.
#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    fn warning(message: String) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message,
        }
    }

    fn critical(message: String) -> Self {
        Self {
            level: NoticeLevel::Critical,
            message,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToggleOutcome {
    pub state: DockState,
    pub notices: Vec<Notice>,
}

static CONTROLLER: Lazy<Arc<Mutex<Option<WorkbookController>>>> =
    Lazy::new(|| Arc::new(Mutex::new(None)));

/// Owns the single tracked workbook window: its handle, its visibility
/// state, and the persistence of its on-screen placement.
pub struct WorkbookController {
    store: GeometryStore,
    host: Box<dyn ExcelHost>,
    workbook: Option<Box<dyn WorkbookWindow>>,
    workbook_path: PathBuf,
    identifier: String,
    suppress_persistence: bool,
}

impl WorkbookController {
    pub fn new(
        store: GeometryStore,
        host: Box<dyn ExcelHost>,
        workbook_path: PathBuf,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            store,
            host,
            workbook: None,
            workbook_path,
            identifier: identifier.into(),
            suppress_persistence: false,
        }
    }

    /// Installs `controller` as the process-wide instance the commands talk to.
    pub fn install(controller: WorkbookController) {
        *CONTROLLER.lock() = Some(controller);
    }

    pub fn instance() -> Arc<Mutex<Option<WorkbookController>>> {
        Arc::clone(&CONTROLLER)
    }

    pub fn workbook_file_name(&self) -> String {
        self.workbook_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn suppress_persistence(&self) -> bool {
        self.suppress_persistence
    }

    /// Current position in the state machine. A stale handle counts as
    /// `Closed` and is dropped so the next toggle re-acquires cleanly.
    pub fn state(&mut self) -> DockState {
        let Some(wb) = &self.workbook else {
            return DockState::Closed;
        };
        if !wb.probe() {
            app_log::warn("excel", "held workbook handle is stale; dropping it");
            self.workbook = None;
            return DockState::Closed;
        }
        match wb.is_visible() {
            Ok(true) => DockState::OpenVisible,
            Ok(false) => DockState::OpenHidden,
            Err(_) => {
                self.workbook = None;
                DockState::Closed
            }
        }
    }

    /// The one user action: show the workbook window if it is hidden or not
    /// yet open, hide it otherwise.
    pub fn toggle(&mut self) -> Result<ToggleOutcome> {
        if !self.workbook_path.exists() {
            bail!(
                "Workbook file '{}' was not found",
                self.workbook_path.display()
            );
        }

        let mut held = self.workbook.take();
        if let Some(wb) = &held {
            if !wb.probe() {
                app_log::warn("excel", "held workbook handle is stale; re-acquiring");
                held = None;
            }
        }

        if let Some(wb) = held {
            match wb.is_visible() {
                Ok(visible) => {
                    let outcome = if visible {
                        self.hide(wb.as_ref())
                    } else {
                        self.show(wb.as_ref())
                    }?;
                    // Keep the handle only on success; a failed transition
                    // forces clean re-acquisition on the next toggle.
                    self.workbook = Some(wb);
                    return Ok(outcome);
                }
                Err(e) => {
                    app_log::warn(
                        "excel",
                        &format!("workbook handle unusable ({:#}); re-acquiring", e),
                    );
                }
            }
        }

        let wb = self.acquire()?;
        let outcome = self.show(wb.as_ref())?;
        self.workbook = Some(wb);
        Ok(outcome)
    }

    /// Shutdown transition: persist the placement of a visible window, then
    /// close the workbook. Never fails loudly; the process is on its way out.
    pub fn shutdown(&mut self) {
        let Some(wb) = self.workbook.take() else {
            return;
        };
        if !wb.probe() {
            app_log::info("excel", "workbook already gone at shutdown");
            return;
        }

        if wb.is_visible().unwrap_or(false) && !self.suppress_persistence {
            match wb.bounds() {
                Ok(geom) => {
                    if let Err(e) = self.store.save(&self.identifier, geom) {
                        app_log::error("config", &format!("save at shutdown failed: {:#}", e));
                    }
                }
                Err(e) => {
                    app_log::warn(
                        "excel",
                        &format!("could not read window bounds at shutdown: {:#}", e),
                    );
                }
            }
        }

        if let Err(e) = wb.close() {
            app_log::warn("excel", &format!("closing workbook failed: {:#}", e));
        } else {
            app_log::info("excel", "workbook closed");
        }
    }

    /// Toggles the persistence-suppression flag. Turning suppression off
    /// while the window is visible re-applies the last saved placement.
    pub fn set_suppress_persistence(&mut self, suppress: bool) -> Vec<Notice> {
        self.suppress_persistence = suppress;
        app_log::info(
            "controller",
            if suppress {
                "geometry persistence suppressed"
            } else {
                "geometry persistence re-enabled"
            },
        );

        if suppress {
            return Vec::new();
        }
        let Some(wb) = &self.workbook else {
            return Vec::new();
        };
        if !wb.probe() || !wb.is_visible().unwrap_or(false) {
            return Vec::new();
        }

        let mut notices = Vec::new();
        let loaded = self.store.load(&self.identifier);
        if let Some(warning) = loaded.warning {
            notices.push(Notice::warning(warning));
        }
        if let Err(e) = apply_geometry(wb.as_ref(), loaded.geometry) {
            app_log::warn("excel", &format!("could not re-apply geometry: {:#}", e));
            notices.push(Notice::warning(format!(
                "Could not position the Excel window: {:#}",
                e
            )));
        }
        notices
    }

    fn acquire(&mut self) -> Result<Box<dyn WorkbookWindow>> {
        match self.host.find_open_workbook(&self.workbook_path) {
            Ok(Some(wb)) => return Ok(wb),
            Ok(None) => {}
            Err(e) => {
                app_log::warn(
                    "excel",
                    &format!("workbook discovery failed ({:#}); opening fresh", e),
                );
            }
        }
        self.host.open_workbook(&self.workbook_path)
    }

    fn show(&self, wb: &dyn WorkbookWindow) -> Result<ToggleOutcome> {
        wb.set_visible(true)?;
        wb.activate()?;

        let mut notices = Vec::new();
        if !self.suppress_persistence {
            let loaded = self.store.load(&self.identifier);
            if let Some(warning) = loaded.warning {
                notices.push(Notice::warning(warning));
            }
            if let Err(e) = apply_geometry(wb, loaded.geometry) {
                app_log::warn("excel", &format!("could not apply geometry: {:#}", e));
                notices.push(Notice::warning(format!(
                    "Could not position the Excel window: {:#}",
                    e
                )));
            }
        }

        Ok(ToggleOutcome {
            state: DockState::OpenVisible,
            notices,
        })
    }

    fn hide(&self, wb: &dyn WorkbookWindow) -> Result<ToggleOutcome> {
        let mut notices = Vec::new();
        if !self.suppress_persistence {
            match wb.bounds() {
                Ok(geom) => {
                    if let Err(e) = self.store.save(&self.identifier, geom) {
                        app_log::error("config", &format!("save failed: {:#}", e));
                        notices.push(Notice::critical(format!(
                            "Could not save the window position: {:#}",
                            e
                        )));
                    }
                }
                Err(e) => {
                    app_log::warn(
                        "excel",
                        &format!("could not read window bounds: {:#}", e),
                    );
                }
            }
        }

        wb.set_visible(false)?;
        Ok(ToggleOutcome {
            state: DockState::OpenHidden,
            notices,
        })
    }
}

/// Left/top/width/height only mean anything for a normal-state window, so a
/// maximized window is restored before the fields are set.
fn apply_geometry(wb: &dyn WorkbookWindow, geometry: WindowGeometry) -> Result<()> {
    if wb.is_maximized()? {
        wb.restore()?;
    }
    wb.set_bounds(geometry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::excel::{ExcelHost, WorkbookWindow};
    use crate::models::DEFAULT_GEOMETRY;
    use anyhow::anyhow;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    #[derive(Debug)]
    struct WindowState {
        alive: bool,
        visible: bool,
        maximized: bool,
        bounds: WindowGeometry,
        calls: Vec<String>,
    }

    impl WindowState {
        fn new() -> Self {
            Self {
                alive: true,
                visible: false,
                maximized: false,
                bounds: WindowGeometry::new(0, 0, 100, 100),
                calls: Vec::new(),
            }
        }
    }

    #[derive(Clone)]
    struct FakeWindow {
        state: Arc<Mutex<WindowState>>,
    }

    impl FakeWindow {
        fn check_alive(&self) -> Result<()> {
            if self.state.lock().alive {
                Ok(())
            } else {
                Err(anyhow!("RPC server unavailable"))
            }
        }
    }

    impl WorkbookWindow for FakeWindow {
        fn probe(&self) -> bool {
            self.state.lock().alive
        }

        fn is_visible(&self) -> Result<bool> {
            self.check_alive()?;
            Ok(self.state.lock().visible)
        }

        fn set_visible(&self, visible: bool) -> Result<()> {
            self.check_alive()?;
            let mut state = self.state.lock();
            state.visible = visible;
            state.calls.push(format!("set_visible({})", visible));
            Ok(())
        }

        fn activate(&self) -> Result<()> {
            self.check_alive()?;
            self.state.lock().calls.push("activate".into());
            Ok(())
        }

        fn bounds(&self) -> Result<WindowGeometry> {
            self.check_alive()?;
            Ok(self.state.lock().bounds)
        }

        fn set_bounds(&self, geometry: WindowGeometry) -> Result<()> {
            self.check_alive()?;
            let mut state = self.state.lock();
            state.bounds = geometry;
            state.calls.push("set_bounds".into());
            Ok(())
        }

        fn is_maximized(&self) -> Result<bool> {
            self.check_alive()?;
            Ok(self.state.lock().maximized)
        }

        fn restore(&self) -> Result<()> {
            self.check_alive()?;
            let mut state = self.state.lock();
            state.maximized = false;
            state.calls.push("restore".into());
            Ok(())
        }

        fn close(&self) -> Result<()> {
            let mut state = self.state.lock();
            state.alive = false;
            state.calls.push("close".into());
            Ok(())
        }
    }

    /// Scripted host: `running` holds (full path, window) pairs standing in
    /// for workbooks already open across Excel instances.
    struct FakeHost {
        running: Vec<(PathBuf, Arc<Mutex<WindowState>>)>,
        opened: Arc<Mutex<Vec<Arc<Mutex<WindowState>>>>>,
    }

    impl FakeHost {
        fn empty() -> Self {
            Self {
                running: Vec::new(),
                opened: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl ExcelHost for FakeHost {
        fn find_open_workbook(&self, path: &Path) -> Result<Option<Box<dyn WorkbookWindow>>> {
            let target = path.to_string_lossy().to_lowercase();
            for (candidate, state) in &self.running {
                if candidate.to_string_lossy().to_lowercase() == target {
                    return Ok(Some(Box::new(FakeWindow {
                        state: Arc::clone(state),
                    })));
                }
            }
            Ok(None)
        }

        fn open_workbook(&self, _path: &Path) -> Result<Box<dyn WorkbookWindow>> {
            let state = Arc::new(Mutex::new(WindowState::new()));
            self.opened.lock().push(Arc::clone(&state));
            Ok(Box::new(FakeWindow { state }))
        }
    }

    struct Fixture {
        _dir: TempDir,
        controller: WorkbookController,
        opened: Arc<Mutex<Vec<Arc<Mutex<WindowState>>>>>,
        store_path: PathBuf,
    }

    fn fixture_with_host(mut host: FakeHost, running_paths: &[&str]) -> Fixture {
        let dir = TempDir::new().unwrap();
        for path in running_paths {
            host.running
                .push((PathBuf::from(path), Arc::new(Mutex::new(WindowState::new()))));
        }
        let workbook_path = dir.path().join("TradingData.xlsm");
        fs::write(&workbook_path, b"stub").unwrap();
        let store_path = dir.path().join("config").join("window_settings.xml");
        let opened = Arc::clone(&host.opened);
        let controller = WorkbookController::new(
            GeometryStore::new(store_path.clone()),
            Box::new(host),
            workbook_path,
            "TradingData",
        );
        Fixture {
            _dir: dir,
            controller,
            opened,
            store_path,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_host(FakeHost::empty(), &[])
    }

    fn last_opened(fixture: &Fixture) -> Arc<Mutex<WindowState>> {
        let opened = fixture.opened.lock();
        Arc::clone(opened.last().expect("no workbook was opened"))
    }

    #[test]
    fn toggle_from_closed_opens_visible_with_saved_geometry() {
        let mut fx = fixture();
        let saved = WindowGeometry::new(-100, 10, 640, 900);
        fx.controller.store.save("TradingData", saved).unwrap();

        let outcome = fx.controller.toggle().unwrap();
        assert_eq!(outcome.state, DockState::OpenVisible);
        assert!(outcome.notices.is_empty());

        let window = last_opened(&fx);
        let state = window.lock();
        assert!(state.visible);
        assert_eq!(state.bounds, saved);
    }

    #[test]
    fn toggle_from_closed_falls_back_to_default_geometry() {
        let mut fx = fixture();
        fx.controller.toggle().unwrap();
        assert_eq!(last_opened(&fx).lock().bounds, DEFAULT_GEOMETRY);
    }

    #[test]
    fn corrupt_settings_file_yields_warning_notice_on_show() {
        let mut fx = fixture();
        fs::create_dir_all(fx.store_path.parent().unwrap()).unwrap();
        fs::write(&fx.store_path, "<config><excel_window></config>").unwrap();

        let outcome = fx.controller.toggle().unwrap();
        assert_eq!(outcome.state, DockState::OpenVisible);
        assert_eq!(outcome.notices.len(), 1);
        assert_eq!(outcome.notices[0].level, NoticeLevel::Warning);
        // the window still opens, on the default placement
        assert_eq!(last_opened(&fx).lock().bounds, DEFAULT_GEOMETRY);
    }

    #[test]
    fn second_toggle_hides_and_persists_current_bounds() {
        let mut fx = fixture();
        fx.controller.toggle().unwrap();

        let moved = WindowGeometry::new(50, 60, 700, 800);
        last_opened(&fx).lock().bounds = moved;

        let outcome = fx.controller.toggle().unwrap();
        assert_eq!(outcome.state, DockState::OpenHidden);
        assert!(!last_opened(&fx).lock().visible);
        assert_eq!(fx.controller.store.load("TradingData").geometry, moved);
    }

    #[test]
    fn third_toggle_reshows_without_reopening() {
        let mut fx = fixture();
        fx.controller.toggle().unwrap();
        fx.controller.toggle().unwrap();
        let outcome = fx.controller.toggle().unwrap();
        assert_eq!(outcome.state, DockState::OpenVisible);
        assert_eq!(fx.opened.lock().len(), 1);
    }

    #[test]
    fn suppression_skips_both_save_and_load() {
        let mut fx = fixture();
        fx.controller.set_suppress_persistence(true);

        fx.controller.toggle().unwrap();
        let window = last_opened(&fx);
        // no load-and-apply: the window keeps whatever bounds it opened with
        assert_eq!(window.lock().bounds, WindowGeometry::new(0, 0, 100, 100));

        window.lock().bounds = WindowGeometry::new(9, 9, 9, 9);
        fx.controller.toggle().unwrap();
        assert!(!fx.store_path.exists(), "suppressed save must not touch disk");
    }

    #[test]
    fn unsuppressing_while_visible_reapplies_saved_geometry() {
        let mut fx = fixture();
        let saved = WindowGeometry::new(11, 22, 333, 444);
        fx.controller.store.save("TradingData", saved).unwrap();

        fx.controller.set_suppress_persistence(true);
        fx.controller.toggle().unwrap();
        let window = last_opened(&fx);
        assert_ne!(window.lock().bounds, saved);

        let notices = fx.controller.set_suppress_persistence(false);
        assert!(notices.is_empty());
        assert_eq!(window.lock().bounds, saved);
    }

    #[test]
    fn maximized_window_is_restored_before_bounds_are_set() {
        let mut fx = fixture();
        fx.controller.toggle().unwrap();
        let window = last_opened(&fx);
        {
            let mut state = window.lock();
            state.maximized = true;
            state.calls.clear();
        }

        fx.controller.toggle().unwrap(); // hide
        fx.controller.toggle().unwrap(); // show again, now maximized

        let state = window.lock();
        let restore_at = state.calls.iter().position(|c| c == "restore");
        let bounds_at = state.calls.iter().position(|c| c == "set_bounds");
        assert!(restore_at.is_some(), "maximized window was never restored");
        assert!(restore_at < bounds_at);
        assert!(!state.maximized);
    }

    #[test]
    fn matches_running_workbook_by_full_path_not_name() {
        let mut fx = fixture_with_host(
            FakeHost::empty(),
            &["/other/folder/TradingData.xlsm"],
        );
        // same display name, different folder: must not be picked up
        fx.controller.toggle().unwrap();
        assert_eq!(fx.opened.lock().len(), 1, "expected a fresh open");
    }

    #[test]
    fn connects_to_running_instance_when_full_path_matches() {
        let dir = TempDir::new().unwrap();
        let workbook_path = dir.path().join("TradingData.xlsm");
        fs::write(&workbook_path, b"stub").unwrap();

        let mut host = FakeHost::empty();
        let running = Arc::new(Mutex::new(WindowState::new()));
        host.running.push((
            PathBuf::from("/other/folder/TradingData.xlsm"),
            Arc::new(Mutex::new(WindowState::new())),
        ));
        host.running.push((workbook_path.clone(), Arc::clone(&running)));
        let opened = Arc::clone(&host.opened);

        let mut controller = WorkbookController::new(
            GeometryStore::new(dir.path().join("window_settings.xml")),
            Box::new(host),
            workbook_path,
            "TradingData",
        );

        let outcome = controller.toggle().unwrap();
        assert_eq!(outcome.state, DockState::OpenVisible);
        assert!(running.lock().visible, "matching instance was not used");
        assert!(opened.lock().is_empty(), "no fresh open expected");
    }

    #[test]
    fn case_differences_in_path_still_match() {
        let dir = TempDir::new().unwrap();
        let workbook_path = dir.path().join("TradingData.xlsm");
        fs::write(&workbook_path, b"stub").unwrap();

        let mut host = FakeHost::empty();
        let running = Arc::new(Mutex::new(WindowState::new()));
        let upper = PathBuf::from(workbook_path.to_string_lossy().to_uppercase());
        host.running.push((upper, Arc::clone(&running)));
        let opened = Arc::clone(&host.opened);

        let mut controller = WorkbookController::new(
            GeometryStore::new(dir.path().join("window_settings.xml")),
            Box::new(host),
            workbook_path,
            "TradingData",
        );

        controller.toggle().unwrap();
        assert!(running.lock().visible);
        assert!(opened.lock().is_empty());
    }

    #[test]
    fn stale_handle_is_reacquired_transparently() {
        let mut fx = fixture();
        fx.controller.toggle().unwrap();
        last_opened(&fx).lock().alive = false;

        let outcome = fx.controller.toggle().unwrap();
        assert_eq!(outcome.state, DockState::OpenVisible);
        assert_eq!(fx.opened.lock().len(), 2, "a new handle should be opened");
    }

    #[test]
    fn missing_workbook_file_fails_the_toggle() {
        let mut fx = fixture();
        fs::remove_file(fx.controller.workbook_path.clone()).unwrap();
        assert!(fx.controller.toggle().is_err());
        assert_eq!(fx.controller.state(), DockState::Closed);
    }

    #[test]
    fn shutdown_persists_visible_window_and_closes_it() {
        let mut fx = fixture();
        fx.controller.toggle().unwrap();
        let moved = WindowGeometry::new(1, 2, 3, 4);
        let window = last_opened(&fx);
        window.lock().bounds = moved;

        fx.controller.shutdown();

        assert_eq!(fx.controller.store.load("TradingData").geometry, moved);
        let state = window.lock();
        assert!(state.calls.iter().any(|c| c == "close"));
        assert_eq!(fx.controller.state(), DockState::Closed);
    }

    #[test]
    fn shutdown_with_suppression_leaves_store_untouched() {
        let mut fx = fixture();
        fx.controller.toggle().unwrap();
        fx.controller.set_suppress_persistence(true);
        last_opened(&fx).lock().bounds = WindowGeometry::new(5, 6, 7, 8);

        fx.controller.shutdown();
        assert!(!fx.store_path.exists());
    }

    #[test]
    fn state_reports_visibility() {
        let mut fx = fixture();
        assert_eq!(fx.controller.state(), DockState::Closed);
        fx.controller.toggle().unwrap();
        assert_eq!(fx.controller.state(), DockState::OpenVisible);
        fx.controller.toggle().unwrap();
        assert_eq!(fx.controller.state(), DockState::OpenHidden);
    }
}
