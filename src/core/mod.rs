pub mod app_log;
pub mod controller;
pub mod excel;
pub mod geometry_store;
pub mod paths;

pub use controller::WorkbookController;
pub use geometry_store::GeometryStore;
