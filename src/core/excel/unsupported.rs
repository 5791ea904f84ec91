//! Fallback host for platforms without Excel COM automation.
//!
//! Discovery finds nothing and opening fails with a clear error, so the UI
//! reports the limitation instead of crashing.

use super::{ExcelHost, WorkbookWindow};
use anyhow::{bail, Result};
use std::path::Path;

pub struct UnsupportedHost;

impl ExcelHost for UnsupportedHost {
    fn find_open_workbook(&self, _path: &Path) -> Result<Option<Box<dyn WorkbookWindow>>> {
        Ok(None)
    }

    fn open_workbook(&self, _path: &Path) -> Result<Box<dyn WorkbookWindow>> {
        bail!("Excel automation is only available on Windows")
    }
}
