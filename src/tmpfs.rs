//! Scratch directories for tests, cleaned up on drop.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::Rng;

const CREATE_ATTEMPTS: usize = 16;

pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    /// Creates a fresh directory under the system temp root. The name
    /// carries a random token; a collision with a concurrent test simply
    /// retries with a new one, so creation itself is the uniqueness check.
    pub fn new() -> io::Result<Self> {
        let root = std::env::temp_dir();
        let mut rng = rand::thread_rng();
        for _ in 0..CREATE_ATTEMPTS {
            let token: u64 = rng.gen();
            let path = root.join(format!("cinderdb-{token:016x}"));
            match fs::create_dir(&path) {
                Ok(()) => return Ok(TempDir { path }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "could not find an unused scratch directory name",
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}
