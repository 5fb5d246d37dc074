//! One file per session under the save path, named `sess_<id>`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{debug, info};

use super::SaveHandler;
use crate::error::SaveHandlerError;

const FILE_PREFIX: &str = "sess_";

#[derive(Debug, Clone, Default)]
pub struct FileSaveHandler {
    dir: Option<PathBuf>,
}

impl FileSaveHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn dir(&self) -> Result<&Path, SaveHandlerError> {
        self.dir.as_deref().ok_or(SaveHandlerError::NotOpen)
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, SaveHandlerError> {
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == ',')
        {
            return Err(SaveHandlerError::InvalidId(id.to_string()));
        }
        Ok(self.dir()?.join(format!("{}{}", FILE_PREFIX, id)))
    }

    /// Ids of every session file in the save path.
    pub fn list(&self) -> Result<Vec<String>, SaveHandlerError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.dir()?)? {
            let entry = entry?;
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix(FILE_PREFIX))
            {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl SaveHandler for FileSaveHandler {
    fn open(&mut self, save_path: &str, _session_name: &str) -> Result<bool, SaveHandlerError> {
        fs::create_dir_all(save_path)?;
        self.dir = Some(PathBuf::from(save_path));
        Ok(true)
    }

    fn close(&mut self) -> Result<bool, SaveHandlerError> {
        Ok(true)
    }

    fn read(&mut self, id: &str) -> Result<String, SaveHandlerError> {
        match fs::read_to_string(self.path_for(id)?) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, id: &str, data: &str) -> Result<bool, SaveHandlerError> {
        fs::write(self.path_for(id)?, data)?;
        Ok(true)
    }

    fn destroy(&mut self, id: &str) -> Result<bool, SaveHandlerError> {
        match fs::remove_file(self.path_for(id)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    fn gc(&mut self, max_lifetime: u64) -> Result<bool, SaveHandlerError> {
        let max_age = Duration::from_secs(max_lifetime);
        let now = SystemTime::now();
        let mut removed = 0usize;

        for entry in fs::read_dir(self.dir()?)? {
            let entry = entry?;
            let is_session = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(FILE_PREFIX));
            if !is_session {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            let stale = now
                .duration_since(modified)
                .is_ok_and(|age| age > max_age);
            if stale {
                debug!("Removing stale session file {:?}", entry.path());
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }

        info!("File gc removed {} sessions", removed);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::{OsRng, RngCore};

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("sessionkit-file-{:016x}", OsRng.next_u64()))
    }

    #[test]
    fn test_write_read_destroy() {
        let dir = scratch_dir();
        let mut handler = FileSaveHandler::new();
        handler.open(dir.to_str().unwrap(), "SESSID").unwrap();

        assert_eq!(handler.read("abc123").unwrap(), "");
        handler.write("abc123", "{\"a\":1}").unwrap();
        assert_eq!(handler.read("abc123").unwrap(), "{\"a\":1}");
        assert_eq!(handler.list().unwrap(), vec!["abc123".to_string()]);

        handler.destroy("abc123").unwrap();
        assert_eq!(handler.read("abc123").unwrap(), "");
        assert!(handler.destroy("abc123").unwrap());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let dir = scratch_dir();
        let mut handler = FileSaveHandler::new();
        handler.open(dir.to_str().unwrap(), "SESSID").unwrap();
        assert!(matches!(
            handler.read("../etc/passwd"),
            Err(SaveHandlerError::InvalidId(_))
        ));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_requires_open() {
        let mut handler = FileSaveHandler::new();
        assert!(matches!(handler.read("abc"), Err(SaveHandlerError::NotOpen)));
    }

    #[test]
    fn test_gc_keeps_fresh_files() {
        let dir = scratch_dir();
        let mut handler = FileSaveHandler::new();
        handler.open(dir.to_str().unwrap(), "SESSID").unwrap();
        handler.write("fresh", "{}").unwrap();
        fs::write(dir.join("unrelated.txt"), "keep").unwrap();

        handler.gc(3600).unwrap();
        assert_eq!(handler.read("fresh").unwrap(), "{}");
        assert!(dir.join("unrelated.txt").exists());

        fs::remove_dir_all(dir).unwrap();
    }
}
