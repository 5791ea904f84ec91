//! Late-bound COM automation of Excel.
//!
//! Everything goes through `IDispatch` so no type library import is needed.
//! Running workbooks are discovered through the Running Object Table, where
//! Excel registers each open workbook under a file moniker whose display
//! name is the workbook's full path.

use super::{ExcelHost, WorkbookWindow};
use crate::core::app_log;
use crate::models::WindowGeometry;
use anyhow::{anyhow, Context, Result};
use std::cell::Cell;
use std::path::Path;
use windows::core::{Interface, BSTR, GUID, PCWSTR, VARIANT};
use windows::Win32::Globalization::GetUserDefaultLCID;
use windows::Win32::System::Com::{
    CLSIDFromProgID, CoCreateInstance, CoInitializeEx, CoTaskMemFree, CreateBindCtx,
    GetRunningObjectTable, IDispatch, IMoniker, CLSCTX_LOCAL_SERVER, COINIT_APARTMENTTHREADED,
    DISPATCH_METHOD, DISPATCH_PROPERTYGET, DISPATCH_PROPERTYPUT, DISPPARAMS,
};
use windows::Win32::System::Ole::DISPID_PROPERTYPUT;

// Excel XlWindowState constants.
const XL_MAXIMIZED: i32 = -4137;
const XL_NORMAL: i32 = -4143;

const EXCEL_PROG_ID: &str = "Excel.Application";

thread_local! {
    static COM_READY: Cell<bool> = const { Cell::new(false) };
}

fn ensure_com() {
    COM_READY.with(|ready| {
        if !ready.get() {
            // An error here usually means the thread already holds a COM
            // apartment with a different model, which is fine for our use.
            unsafe {
                let _ = CoInitializeEx(None, COINIT_APARTMENTTHREADED);
            }
            ready.set(true);
        }
    });
}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn dispid_of(disp: &IDispatch, name: &str) -> Result<i32> {
    let wide = to_wide(name);
    let names = [PCWSTR(wide.as_ptr())];
    let mut dispid = 0i32;
    unsafe {
        disp.GetIDsOfNames(
            &GUID::zeroed(),
            names.as_ptr(),
            1,
            GetUserDefaultLCID(),
            &mut dispid,
        )
    }
    .with_context(|| format!("Excel does not expose '{}'", name))?;
    Ok(dispid)
}

fn invoke(
    disp: &IDispatch,
    name: &str,
    flags: windows::Win32::System::Com::DISPATCH_FLAGS,
    args: &[VARIANT],
) -> Result<VARIANT> {
    let dispid = dispid_of(disp, name)?;

    // IDispatch expects arguments in reverse order.
    let mut rgvarg: Vec<VARIANT> = args.iter().rev().cloned().collect();
    let mut named_put = DISPID_PROPERTYPUT;
    let mut params = DISPPARAMS {
        rgvarg: rgvarg.as_mut_ptr(),
        rgdispidNamedArgs: std::ptr::null_mut(),
        cArgs: rgvarg.len() as u32,
        cNamedArgs: 0,
    };
    if flags == DISPATCH_PROPERTYPUT {
        params.rgdispidNamedArgs = &mut named_put;
        params.cNamedArgs = 1;
    }

    let mut result = VARIANT::default();
    unsafe {
        disp.Invoke(
            dispid,
            &GUID::zeroed(),
            GetUserDefaultLCID(),
            flags,
            &params,
            Some(&mut result),
            None,
            None,
        )
    }
    .with_context(|| format!("Excel call '{}' failed", name))?;
    Ok(result)
}

fn get_property(disp: &IDispatch, name: &str) -> Result<VARIANT> {
    invoke(disp, name, DISPATCH_PROPERTYGET, &[])
}

fn put_property(disp: &IDispatch, name: &str, value: VARIANT) -> Result<()> {
    invoke(disp, name, DISPATCH_PROPERTYPUT, &[value]).map(|_| ())
}

fn call_method(disp: &IDispatch, name: &str, args: &[VARIANT]) -> Result<VARIANT> {
    invoke(disp, name, DISPATCH_METHOD, args)
}

fn variant_to_dispatch(value: &VARIANT) -> Result<IDispatch> {
    IDispatch::try_from(value).context("Excel returned a non-object value")
}

fn variant_to_i32(value: &VARIANT) -> Result<i32> {
    if let Ok(v) = i32::try_from(value) {
        return Ok(v);
    }
    // Window metrics come back as VT_R8 points.
    let v = f64::try_from(value).context("Excel returned a non-numeric value")?;
    Ok(v as i32)
}

fn variant_to_bool(value: &VARIANT) -> Result<bool> {
    bool::try_from(value).context("Excel returned a non-boolean value")
}

pub struct ComExcelHost;

impl ComExcelHost {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ComExcelHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ExcelHost for ComExcelHost {
    fn find_open_workbook(&self, path: &Path) -> Result<Option<Box<dyn WorkbookWindow>>> {
        ensure_com();
        let target = path.to_string_lossy();

        unsafe {
            let rot = GetRunningObjectTable(0).context("open running object table")?;
            let bind_ctx = CreateBindCtx(0).context("create bind context")?;
            let enum_moniker = rot.EnumRunning().context("enumerate running objects")?;

            let mut monikers: [Option<IMoniker>; 1] = [None];
            loop {
                let mut fetched = 0u32;
                if enum_moniker
                    .Next(&mut monikers, Some(&mut fetched))
                    .is_err()
                    || fetched == 0
                {
                    break;
                }
                let Some(moniker) = monikers[0].take() else {
                    break;
                };

                let Ok(name) = moniker.GetDisplayName(&bind_ctx, None) else {
                    continue;
                };
                let display = name.to_string().unwrap_or_default();
                CoTaskMemFree(Some(name.as_ptr() as _));
                if !display.eq_ignore_ascii_case(&target) {
                    continue;
                }

                let Ok(unknown) = rot.GetObject(&moniker) else {
                    continue;
                };
                let Ok(workbook) = unknown.cast::<IDispatch>() else {
                    continue;
                };

                app_log::info(
                    "excel",
                    &format!("found '{}' open in a running Excel instance", display),
                );
                return Ok(Some(Box::new(ComWorkbook { workbook })));
            }
        }

        Ok(None)
    }

    fn open_workbook(&self, path: &Path) -> Result<Box<dyn WorkbookWindow>> {
        ensure_com();

        let app: IDispatch = unsafe {
            let prog_id = to_wide(EXCEL_PROG_ID);
            let clsid = CLSIDFromProgID(PCWSTR(prog_id.as_ptr()))
                .context("Excel is not registered on this machine")?;
            CoCreateInstance(&clsid, None, CLSCTX_LOCAL_SERVER).context("start Excel")?
        };

        let workbooks = variant_to_dispatch(&get_property(&app, "Workbooks")?)?;
        let name = BSTR::from(path.to_string_lossy().as_ref());
        let opened = call_method(&workbooks, "Open", &[VARIANT::from(name)])
            .with_context(|| format!("open workbook {}", path.display()))?;
        let workbook = variant_to_dispatch(&opened)?;

        app_log::info("excel", &format!("opened {}", path.display()));
        Ok(Box::new(ComWorkbook { workbook }))
    }
}

struct ComWorkbook {
    workbook: IDispatch,
}

impl ComWorkbook {
    /// The Excel `Application` object owning this workbook; window geometry
    /// and visibility live there, not on the workbook itself.
    fn app(&self) -> Result<IDispatch> {
        variant_to_dispatch(&get_property(&self.workbook, "Application")?)
    }
}

impl WorkbookWindow for ComWorkbook {
    fn probe(&self) -> bool {
        get_property(&self.workbook, "Name").is_ok()
    }

    fn is_visible(&self) -> Result<bool> {
        variant_to_bool(&get_property(&self.app()?, "Visible")?)
    }

    fn set_visible(&self, visible: bool) -> Result<()> {
        put_property(&self.app()?, "Visible", VARIANT::from(visible))
    }

    fn activate(&self) -> Result<()> {
        call_method(&self.workbook, "Activate", &[]).map(|_| ())
    }

    fn bounds(&self) -> Result<WindowGeometry> {
        let app = self.app()?;
        Ok(WindowGeometry {
            left: variant_to_i32(&get_property(&app, "Left")?)?,
            top: variant_to_i32(&get_property(&app, "Top")?)?,
            width: variant_to_i32(&get_property(&app, "Width")?)?,
            height: variant_to_i32(&get_property(&app, "Height")?)?,
        })
    }

    fn set_bounds(&self, geometry: WindowGeometry) -> Result<()> {
        let app = self.app()?;
        put_property(&app, "Left", VARIANT::from(geometry.left as f64))?;
        put_property(&app, "Top", VARIANT::from(geometry.top as f64))?;
        put_property(&app, "Width", VARIANT::from(geometry.width as f64))?;
        put_property(&app, "Height", VARIANT::from(geometry.height as f64))?;
        Ok(())
    }

    fn is_maximized(&self) -> Result<bool> {
        let state = variant_to_i32(&get_property(&self.app()?, "WindowState")?)?;
        Ok(state == XL_MAXIMIZED)
    }

    fn restore(&self) -> Result<()> {
        put_property(&self.app()?, "WindowState", VARIANT::from(XL_NORMAL))
    }

    fn close(&self) -> Result<()> {
        // SaveChanges:=False; the workbook is someone else's data, we never
        // prompt on its behalf.
        call_method(&self.workbook, "Close", &[VARIANT::from(false)])
            .map(|_| ())
            .map_err(|e| anyhow!("close workbook: {:#}", e))
    }
}
