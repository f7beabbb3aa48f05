//! Durable backing for the state document.
//!
//! The document lives in `state.json` under the state directory. Every
//! mutation writes the whole document to `state.json.tmp` and renames it over
//! the live file, so readers never observe a partial write.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

use super::StoreError;
use super::document::StateDocument;

/// File name of the persisted state document.
pub const STATE_FILE: &str = "state.json";
/// File name used while a replacement document is being written.
pub const TEMP_FILE: &str = "state.json.tmp";

pub(crate) struct FileBacking {
    root: Utf8PathBuf,
    dir: Dir,
}

impl FileBacking {
    /// Opens (creating when absent) the state directory and loads the current
    /// document.
    pub(crate) fn open(root: &Utf8Path) -> Result<(Self, StateDocument), StoreError> {
        Dir::create_ambient_dir_all(root, ambient_authority())
            .map_err(|err| io_error(root, &err))?;
        let dir =
            Dir::open_ambient_dir(root, ambient_authority()).map_err(|err| io_error(root, &err))?;
        let backing = Self {
            root: root.to_path_buf(),
            dir,
        };
        let document = backing.load()?;
        Ok((backing, document))
    }

    pub(crate) fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn load(&self) -> Result<StateDocument, StoreError> {
        let path = self.root.join(STATE_FILE);
        let contents = match self.dir.read_to_string(STATE_FILE) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(StateDocument::default());
            }
            Err(err) => return Err(io_error(&path, &err)),
        };
        if contents.trim().is_empty() {
            return Ok(StateDocument::default());
        }
        serde_json::from_str(&contents).map_err(|err| StoreError::Parse {
            path,
            message: err.to_string(),
        })
    }

    pub(crate) fn persist(&self, document: &StateDocument) -> Result<(), StoreError> {
        let rendered = serde_json::to_string_pretty(document).map_err(|err| StoreError::Encode {
            message: err.to_string(),
        })?;
        let temp_path = self.root.join(TEMP_FILE);
        self.dir
            .write(TEMP_FILE, rendered)
            .map_err(|err| io_error(&temp_path, &err))?;
        self.dir
            .rename(TEMP_FILE, &self.dir, STATE_FILE)
            .map_err(|err| io_error(&self.root.join(STATE_FILE), &err))?;
        tracing::trace!(path = %self.root.join(STATE_FILE), "persisted state document");
        Ok(())
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
