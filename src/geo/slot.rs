use crate::geo::{Decoder, LoadError, SlotKind};

use hyper::http::Uri;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct SlotState<D> {
    handle: Option<Arc<D>>,
    closed: bool,
}

/// One logical database: where it lives, where it comes from and which handle is live.
///
/// The lock guards nothing but the handle pointer. Readers copy the [Arc] out and decode without
/// holding the lock, writers only hold it for the swap itself. A displaced handle is dropped
/// (and so closed) once the last reader that captured it is done.
pub struct DatabaseSlot<D> {
    kind: SlotKind,
    path: PathBuf,
    uri: Uri,
    state: RwLock<SlotState<D>>,
}

impl<D: Decoder> DatabaseSlot<D> {
    pub fn new(kind: SlotKind, path: impl Into<PathBuf>, uri: Uri) -> Self {
        Self {
            kind,
            path: path.into(),
            uri,
            state: RwLock::new(SlotState {
                handle: None,
                closed: false,
            }),
        }
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Download target, colocated with [Self::path] so that the final rename stays atomic
    pub fn tmp_path(&self) -> PathBuf {
        let mut path = self.path.clone().into_os_string();
        path.push(".tmp");
        path.into()
    }

    // The state is a single pointer which is always consistent, so poisoning is ignored
    fn read(&self) -> RwLockReadGuard<'_, SlotState<D>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SlotState<D>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the slot's file and makes it live
    pub fn load(&self) -> Result<(), LoadError> {
        self.load_from(&self.path)
    }

    /// Opens `path` and makes it live. On failure the current handle keeps serving.
    pub fn load_from(&self, path: &Path) -> Result<(), LoadError> {
        if self.read().closed {
            return Err(LoadError::Closed);
        }
        let handle = D::open(path)?;
        self.replace(handle)?;
        log::info!(r#"{} database loaded from "{}""#, self.kind, path.display());
        Ok(())
    }

    pub fn replace(&self, handle: D) -> Result<(), LoadError> {
        let previous = {
            let mut state = self.write();
            if state.closed {
                return Err(LoadError::Closed);
            }
            state.handle.replace(Arc::new(handle))
        };
        // Released outside of the lock, readers holding a copy keep it alive
        drop(previous);
        Ok(())
    }

    /// Current handle, `None` until the first successful load or after [Self::close]
    pub fn snapshot(&self) -> Option<Arc<D>> {
        self.read().handle.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.read().handle.is_some()
    }

    /// Releases the live handle, the slot accepts no loads afterwards
    pub fn close(&self) {
        let previous = {
            let mut state = self.write();
            state.closed = true;
            state.handle.take()
        };
        if previous.is_some() {
            log::debug!("{} database closed", self.kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::testing::{write_db, TextDb};
    use std::net::IpAddr;

    fn slot(dir: &Path) -> DatabaseSlot<TextDb> {
        DatabaseSlot::new(
            SlotKind::Country,
            dir.join("country.mmdb"),
            Uri::from_static("http://127.0.0.1/country.mmdb"),
        )
    }

    fn country(handle: &TextDb, ip: &str) -> Option<String> {
        let ip: IpAddr = ip.parse().unwrap();
        handle.decode(ip).unwrap().and_then(|r| r.country_code)
    }

    #[test]
    fn tmp_path_is_colocated() {
        let slot = slot(Path::new("/data"));
        assert_eq!(slot.tmp_path(), Path::new("/data/country.mmdb.tmp"));
    }

    #[test]
    fn empty_before_load() {
        let dir = tempfile::tempdir().unwrap();
        let slot = slot(dir.path());
        assert!(slot.snapshot().is_none());
        assert!(!slot.is_loaded());
    }

    #[test]
    fn load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let slot = slot(dir.path());
        assert!(matches!(slot.load(), Err(LoadError::Open(_))));
        assert!(slot.snapshot().is_none());
    }

    #[test]
    fn failed_load_keeps_previous_handle() {
        let dir = tempfile::tempdir().unwrap();
        let slot = slot(dir.path());
        write_db(slot.path(), &["8.8.8.8 US"]);
        slot.load().unwrap();

        let broken = dir.path().join("broken.mmdb");
        std::fs::write(&broken, "garbage").unwrap();
        assert!(matches!(slot.load_from(&broken), Err(LoadError::Open(_))));

        let handle = slot.snapshot().unwrap();
        assert_eq!(country(&handle, "8.8.8.8").as_deref(), Some("US"));
    }

    #[test]
    fn displaced_handle_outlives_swap() {
        let dir = tempfile::tempdir().unwrap();
        let slot = slot(dir.path());
        write_db(slot.path(), &["8.8.8.8 US"]);
        slot.load().unwrap();
        let old = slot.snapshot().unwrap();

        write_db(slot.path(), &["8.8.8.8 CA"]);
        slot.load().unwrap();

        // The slot no longer references the old handle, but our copy is still usable
        assert_eq!(Arc::strong_count(&old), 1);
        assert_eq!(country(&old, "8.8.8.8").as_deref(), Some("US"));
        let new = slot.snapshot().unwrap();
        assert_eq!(country(&new, "8.8.8.8").as_deref(), Some("CA"));
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let dir = tempfile::tempdir().unwrap();
        let slot = slot(dir.path());
        write_db(slot.path(), &["8.8.8.8 US"]);
        slot.load().unwrap();

        slot.close();
        assert!(slot.snapshot().is_none());
        slot.close();
        assert!(slot.snapshot().is_none());
        assert!(matches!(slot.load(), Err(LoadError::Closed)));
        assert!(slot.snapshot().is_none());
    }

    #[test]
    fn readers_never_see_torn_state() {
        let dir = tempfile::tempdir().unwrap();
        let slot = slot(dir.path());
        let v1 = dir.path().join("v1.mmdb");
        let v2 = dir.path().join("v2.mmdb");
        write_db(&v1, &["8.8.8.8 US"]);
        write_db(&v2, &["8.8.8.8 CA"]);
        slot.load_from(&v1).unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..200 {
                    let path = if i % 2 == 0 { &v2 } else { &v1 };
                    slot.load_from(path).unwrap();
                }
            });
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..1000 {
                        let handle = slot.snapshot().expect("slot was loaded before readers");
                        let code = country(&handle, "8.8.8.8");
                        assert!(matches!(code.as_deref(), Some("US") | Some("CA")));
                    }
                });
            }
        });
    }
}
