use crate::models::WindowGeometry;
use anyhow::Result;
use std::path::Path;

#[cfg(target_os = "windows")]
pub mod com;
#[cfg(not(target_os = "windows"))]
pub mod unsupported;

/// Live connection to one open workbook and the Excel window hosting it.
///
/// The handle can go stale at any time (Excel quit, workbook closed behind
/// our back); `probe` must be checked before trusting it.
pub trait WorkbookWindow: Send {
    /// Cheap liveness probe. `false` means the handle is stale and must be
    /// discarded and re-acquired.
    fn probe(&self) -> bool;
    fn is_visible(&self) -> Result<bool>;
    fn set_visible(&self, visible: bool) -> Result<()>;
    /// Brings the workbook window to the foreground.
    fn activate(&self) -> Result<()>;
    fn bounds(&self) -> Result<WindowGeometry>;
    fn set_bounds(&self, geometry: WindowGeometry) -> Result<()>;
    fn is_maximized(&self) -> Result<bool>;
    /// Leaves the maximized state, returning the window to normal sizing.
    fn restore(&self) -> Result<()>;
    /// Closes the workbook, discarding unsaved changes.
    fn close(&self) -> Result<()>;
}

/// Entry point to the host spreadsheet application.
pub trait ExcelHost: Send {
    /// Scans every running Excel instance for an open workbook whose full
    /// file path equals `path`, compared case-insensitively. First match
    /// wins. Matching by display name alone is not enough: two workbooks in
    /// different folders can share a name.
    fn find_open_workbook(&self, path: &Path) -> Result<Option<Box<dyn WorkbookWindow>>>;

    /// Asks Excel to open the workbook fresh, starting the application when
    /// no instance is running.
    fn open_workbook(&self, path: &Path) -> Result<Box<dyn WorkbookWindow>>;
}

/// Create the platform-appropriate Excel host.
pub fn create_host() -> Box<dyn ExcelHost> {
    #[cfg(target_os = "windows")]
    {
        Box::new(com::ComExcelHost::new())
    }
    #[cfg(not(target_os = "windows"))]
    {
        Box::new(unsupported::UnsupportedHost)
    }
}
