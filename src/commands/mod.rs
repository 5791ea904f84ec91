pub mod logs;
pub mod workbook;
