use crate::core::app_log;
use crate::models::{WindowGeometry, DEFAULT_GEOMETRY};
use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const ROOT_ELEMENT: &str = "config";
const GROUP_ELEMENT: &str = "excel_window";

/// File-backed store of named window geometries.
///
/// The whole file is read into memory, mutated, and rewritten on every save;
/// there is no partial update and no locking (a single running instance of
/// the app is assumed).
pub struct GeometryStore {
    path: PathBuf,
}

/// Result of a load: the geometry to use, plus a user-facing warning when
/// the settings file exists but could not be read.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub geometry: WindowGeometry,
    pub warning: Option<String>,
}

impl GeometryStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Looks up the geometry saved under `identifier`. Every failure mode
    /// (missing file, malformed XML, absent identifier or field) degrades to
    /// the default geometry; the caller never sees an error. Structural
    /// failures additionally carry a warning for the UI to report.
    pub fn load(&self, identifier: &str) -> LoadOutcome {
        match self.try_load(identifier) {
            Ok(Some(geom)) => {
                app_log::info_with(
                    "config",
                    &format!("loaded geometry for '{}'", identifier),
                    serde_json::json!(geom),
                );
                LoadOutcome {
                    geometry: geom,
                    warning: None,
                }
            }
            Ok(None) => {
                app_log::info(
                    "config",
                    &format!("no saved geometry for '{}', using defaults", identifier),
                );
                LoadOutcome {
                    geometry: DEFAULT_GEOMETRY,
                    warning: None,
                }
            }
            Err(e) => {
                app_log::warn(
                    "config",
                    &format!(
                        "failed to read {} for '{}': {:#}; using defaults",
                        self.path.display(),
                        identifier,
                        e
                    ),
                );
                LoadOutcome {
                    geometry: DEFAULT_GEOMETRY,
                    warning: Some(format!(
                        "Could not load the saved geometry for '{}': {:#}. Using defaults.",
                        identifier, e
                    )),
                }
            }
        }
    }

    fn try_load(&self, identifier: &str) -> Result<Option<WindowGeometry>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        let doc = roxmltree::Document::parse(&text).context("parse settings xml")?;

        let Some(group) = doc
            .root_element()
            .children()
            .find(|n| n.has_tag_name(GROUP_ELEMENT))
        else {
            return Ok(None);
        };
        let Some(entry) = group.children().find(|n| n.has_tag_name(identifier)) else {
            return Ok(None);
        };

        Ok(Some(parse_entry(&entry)?))
    }

    /// Writes/overwrites the geometry stored under `identifier`, preserving
    /// every other identifier in the file. A corrupt existing file is
    /// discarded and the store recreated from scratch; an unreadable file is
    /// an error, so an I/O hiccup never silently drops existing records.
    pub fn save(&self, identifier: &str, geometry: WindowGeometry) -> Result<()> {
        let mut entries = self.load_all()?;
        entries.insert(identifier.to_string(), geometry);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config dir {}", parent.display()))?;
        }

        let xml = render(&entries)?;

        // tmp + rename so a failed write never truncates the existing file
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, xml).with_context(|| format!("write {}", tmp.display()))?;
        let _ = fs::remove_file(&self.path);
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;

        app_log::info_with(
            "config",
            &format!("saved geometry for '{}'", identifier),
            serde_json::json!(geometry),
        );
        Ok(())
    }

    /// All well-formed records currently in the file. A missing or
    /// unparsable file yields an empty map (the store will be recreated);
    /// a file that exists but cannot be read is an error.
    fn load_all(&self) -> Result<BTreeMap<String, WindowGeometry>> {
        let mut entries = BTreeMap::new();
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => {
                return Err(e).with_context(|| format!("read {}", self.path.display()));
            }
        };
        let doc = match roxmltree::Document::parse(&text) {
            Ok(doc) => doc,
            Err(e) => {
                app_log::warn(
                    "config",
                    &format!("{} is corrupt ({}); recreating", self.path.display(), e),
                );
                return Ok(entries);
            }
        };

        let Some(group) = doc
            .root_element()
            .children()
            .find(|n| n.has_tag_name(GROUP_ELEMENT))
        else {
            return Ok(entries);
        };

        for entry in group.children().filter(|n| n.is_element()) {
            if let Ok(geom) = parse_entry(&entry) {
                entries.insert(entry.tag_name().name().to_string(), geom);
            }
        }
        Ok(entries)
    }
}

fn parse_entry(entry: &roxmltree::Node<'_, '_>) -> Result<WindowGeometry> {
    Ok(WindowGeometry {
        left: parse_field(entry, "left")?,
        top: parse_field(entry, "top")?,
        width: parse_field(entry, "width")?,
        height: parse_field(entry, "height")?,
    })
}

fn parse_field(entry: &roxmltree::Node<'_, '_>, name: &str) -> Result<i32> {
    let text = entry
        .children()
        .find(|n| n.has_tag_name(name))
        .and_then(|n| n.text())
        .with_context(|| format!("missing <{}> under <{}>", name, entry.tag_name().name()))?;
    parse_int(text).with_context(|| format!("bad <{}> value {:?}", name, text))
}

/// Integer fields are read permissively: a trailing `.0` floating form
/// (written by older revisions of the settings file) is accepted.
fn parse_int(text: &str) -> Result<i32> {
    let text = text.trim();
    if let Ok(v) = text.parse::<i32>() {
        return Ok(v);
    }
    let v = text.parse::<f64>()?;
    Ok(v as i32)
}

fn render(entries: &BTreeMap<String, WindowGeometry>) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new(ROOT_ELEMENT)))?;
    writer.write_event(Event::Start(BytesStart::new(GROUP_ELEMENT)))?;

    for (identifier, geom) in entries {
        writer.write_event(Event::Start(BytesStart::new(identifier.as_str())))?;
        write_field(&mut writer, "left", geom.left)?;
        write_field(&mut writer, "top", geom.top)?;
        write_field(&mut writer, "width", geom.width)?;
        write_field(&mut writer, "height", geom.height)?;
        writer.write_event(Event::End(BytesEnd::new(identifier.as_str())))?;
    }

    writer.write_event(Event::End(BytesEnd::new(GROUP_ELEMENT)))?;
    writer.write_event(Event::End(BytesEnd::new(ROOT_ELEMENT)))?;

    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_field<W: std::io::Write>(writer: &mut Writer<W>, name: &str, value: i32) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(&value.to_string())))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> GeometryStore {
        GeometryStore::new(dir.path().join("config").join("window_settings.xml"))
    }

    #[test]
    fn load_without_file_returns_defaults_without_warning() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let loaded = store.load("TradingData");
        assert_eq!(loaded.geometry, DEFAULT_GEOMETRY);
        assert!(loaded.warning.is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let geom = WindowGeometry::new(-120, 42, 800, 600);
        store.save("TradingData", geom).unwrap();
        assert_eq!(store.load("TradingData").geometry, geom);
    }

    #[test]
    fn save_creates_missing_directories() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save("TradingData", DEFAULT_GEOMETRY).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn load_of_unknown_identifier_returns_defaults_without_warning() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store
            .save("TradingData", WindowGeometry::new(1, 2, 3, 4))
            .unwrap();
        let loaded = store.load("Other");
        assert_eq!(loaded.geometry, DEFAULT_GEOMETRY);
        assert!(loaded.warning.is_none());
    }

    #[test]
    fn saving_one_identifier_preserves_others() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let a = WindowGeometry::new(10, 20, 300, 400);
        let b = WindowGeometry::new(-5, 0, 640, 480);
        store.save("A", a).unwrap();
        store.save("B", b).unwrap();
        assert_eq!(store.load("A").geometry, a);
        assert_eq!(store.load("B").geometry, b);
    }

    #[test]
    fn corrupt_file_warns_on_load_and_is_recreated_on_save() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "<config><excel_window></config>").unwrap();

        let loaded = store.load("TradingData");
        assert_eq!(loaded.geometry, DEFAULT_GEOMETRY);
        assert!(loaded.warning.is_some());

        let geom = WindowGeometry::new(7, 8, 9, 10);
        store.save("TradingData", geom).unwrap();
        assert_eq!(store.load("TradingData").geometry, geom);
    }

    #[test]
    fn unreadable_file_fails_save_instead_of_dropping_records() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        // a directory where the file should be: reads fail, but not with
        // NotFound, so the save must not pretend the store is empty
        fs::create_dir_all(store.path()).unwrap();
        assert!(store.save("TradingData", DEFAULT_GEOMETRY).is_err());
    }

    #[test]
    fn float_formatted_fields_are_coerced() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            concat!(
                "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n",
                "<config><excel_window><TradingData>",
                "<left>-120.0</left><top>42.0</top>",
                "<width>488.0</width><height>1049.0</height>",
                "</TradingData></excel_window></config>"
            ),
        )
        .unwrap();
        assert_eq!(
            store.load("TradingData").geometry,
            WindowGeometry::new(-120, 42, 488, 1049)
        );
    }

    #[test]
    fn missing_field_degrades_to_defaults_with_warning() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            "<config><excel_window><TradingData><left>1</left></TradingData></excel_window></config>",
        )
        .unwrap();
        let loaded = store.load("TradingData");
        assert_eq!(loaded.geometry, DEFAULT_GEOMETRY);
        assert!(loaded.warning.is_some());
    }

    #[test]
    fn written_file_carries_declaration_and_structure() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save("TradingData", DEFAULT_GEOMETRY).unwrap();
        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(text.contains("<excel_window>"));
        assert!(text.contains("<left>3355</left>"));
    }
}
