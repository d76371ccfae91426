//! Zip container around the structured store.
//!
//! The database entry is extracted into a private temp directory so SQLite can open it as a
//! regular file. Preferences and the optional settings blob are carried through untouched.

use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use tempfile::TempDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{BridgeError, Result};
use crate::newpipe_db::NewPipeDb;
use crate::util::write_atomic;

pub(crate) const DB_ENTRY: &str = "newpipe.db";
pub(crate) const PREFERENCES_ENTRY: &str = "preferences.json";
pub(crate) const SETTINGS_ENTRY: &str = "newpipe.settings";

pub(crate) struct NewPipeArchive {
    _workdir: TempDir,
    db_path: PathBuf,
    preferences: Vec<u8>,
    settings: Option<Vec<u8>>,
}

fn default_preferences() -> Result<Vec<u8>> {
    let prefs = serde_json::json!({
        "enable_watch_history": true,
        "enable_search_history": true,
        "enable_playback_resume": true,
        "enable_playback_state_lists": true
    });
    Ok(serde_json::to_vec_pretty(&prefs)?)
}

fn workdir() -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix("backup-bridge-")
        .tempdir()
        .map_err(BridgeError::from)
}

fn read_entry<R: Read + std::io::Seek>(
    zip: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>> {
    let mut entry = match zip.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes)?;
    Ok(Some(bytes))
}

impl NewPipeArchive {
    /// Read an existing backup. A missing database entry is fatal; everything else is optional.
    pub(crate) fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| BridgeError::io(e, path))?;
        let mut zip = ZipArchive::new(file)?;

        let db_bytes = read_entry(&mut zip, DB_ENTRY)?.ok_or_else(|| BridgeError::MissingEntry {
            archive: path.to_path_buf(),
            entry: DB_ENTRY.to_string(),
        })?;
        let preferences = match read_entry(&mut zip, PREFERENCES_ENTRY)? {
            Some(bytes) => bytes,
            None => {
                debug!("{} has no {PREFERENCES_ENTRY}; using defaults", path.display());
                default_preferences()?
            }
        };
        let settings = read_entry(&mut zip, SETTINGS_ENTRY)?;

        let workdir = workdir()?;
        let db_path = workdir.path().join(DB_ENTRY);
        std::fs::write(&db_path, &db_bytes).map_err(|e| BridgeError::io(e, &db_path))?;
        info!(
            "read {} ({} byte database, settings blob: {})",
            path.display(),
            db_bytes.len(),
            if settings.is_some() { "yes" } else { "no" }
        );

        Ok(Self {
            _workdir: workdir,
            db_path,
            preferences,
            settings,
        })
    }

    /// A new backup with an empty canonical store and default preferences.
    pub(crate) fn create_empty() -> Result<Self> {
        let workdir = workdir()?;
        let db_path = workdir.path().join(DB_ENTRY);
        NewPipeDb::create(&db_path)?.close()?;
        Ok(Self {
            _workdir: workdir,
            db_path,
            preferences: default_preferences()?,
            settings: None,
        })
    }

    /// Open the extracted store. Only one handle may be open at a time; hand it back to
    /// [`NewPipeArchive::write`] (or drop it) before opening another.
    pub(crate) fn open_db(&self) -> Result<NewPipeDb> {
        NewPipeDb::open(&self.db_path)
    }

    /// Close `db` and write the archive to `out`.
    pub(crate) fn write(&self, db: NewPipeDb, out: &Path) -> Result<Vec<u8>> {
        db.close()?;
        let db_bytes = std::fs::read(&self.db_path).map_err(|e| BridgeError::io(e, &self.db_path))?;

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file(DB_ENTRY, options)?;
        zip.write_all(&db_bytes)?;
        zip.start_file(PREFERENCES_ENTRY, options)?;
        zip.write_all(&self.preferences)?;
        if let Some(settings) = &self.settings {
            zip.start_file(SETTINGS_ENTRY, options)?;
            zip.write_all(settings)?;
        }
        let bytes = zip.finish()?.into_inner();

        write_atomic(out, &bytes)?;
        info!("wrote {} ({} bytes)", out.display(), bytes.len());
        Ok(bytes)
    }
}
