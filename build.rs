fn main() {
    // Only needed for the desktop binary target; headless core builds skip
    // the Tauri asset pipeline entirely.
    #[cfg(feature = "desktop")]
    tauri_build::build()
}
