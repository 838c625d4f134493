//! Platform filesystem abstraction.
//!
//! The engine never touches `std::fs` directly; it goes through [`Env`],
//! which is injected via options. Production uses the process-wide
//! [`default_env`], tests wrap it to count reads or inject failures.
//! The default environment is created once and never torn down.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};
use crate::flock::FileLock;

/// Sequential read access, used by the WAL reader.
pub trait SequentialFile: Send {
    /// Reads up to `buf.len()` bytes; returns the number read, 0 at EOF.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn skip(&mut self, n: u64) -> Result<()>;
}

/// Positioned read access, used by table readers. Implementations must be
/// usable from multiple threads at once.
pub trait RandomAccessFile: Send + Sync {
    /// Reads up to `len` bytes at `offset`; short results signal EOF.
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>>;
}

/// Append-only write access, used by the WAL and table builders.
pub trait WritableFile: Send {
    fn append(&mut self, data: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    /// Durably persists everything appended so far.
    fn sync(&mut self) -> Result<()>;
}

pub trait Env: Send + Sync {
    fn new_sequential_file(&self, path: &Path) -> Result<Box<dyn SequentialFile>>;
    fn new_random_access_file(&self, path: &Path) -> Result<Arc<dyn RandomAccessFile>>;
    /// Creates or truncates `path` for writing.
    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>>;
    /// Opens `path` for appending, preserving existing content (log reuse).
    fn new_appendable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>>;
    fn file_exists(&self, path: &Path) -> bool;
    /// Names (not paths) of the entries in `dir`.
    fn children(&self, dir: &Path) -> Result<Vec<String>>;
    fn remove_file(&self, path: &Path) -> Result<()>;
    fn create_dir(&self, dir: &Path) -> Result<()>;
    fn remove_dir(&self, dir: &Path) -> Result<()>;
    fn file_size(&self, path: &Path) -> Result<u64>;
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    /// Takes the advisory whole-file lock; fails if another holder exists.
    fn lock_file(&self, path: &Path) -> Result<FileLock>;
}

/// The default `std::fs`-backed environment.
pub struct StdEnv;

struct StdSequentialFile {
    reader: BufReader<File>,
}

impl SequentialFile for StdSequentialFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.reader.read(buf)?)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        std::io::copy(&mut self.reader.by_ref().take(n), &mut std::io::sink())?;
        Ok(())
    }
}

struct StdRandomAccessFile {
    file: File,
}

impl RandomAccessFile for StdRandomAccessFile {
    #[cfg(unix)]
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        use std::os::unix::fs::FileExt;
        let mut buf = vec![0u8; len];
        let mut read = 0;
        while read < len {
            let n = self.file.read_at(&mut buf[read..], offset + read as u64)?;
            if n == 0 {
                break;
            }
            read += n;
        }
        buf.truncate(read);
        Ok(buf)
    }

    #[cfg(not(unix))]
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        use std::io::{Seek, SeekFrom};
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        let mut read = 0;
        while read < len {
            let n = file.read(&mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        buf.truncate(read);
        Ok(buf)
    }
}

struct StdWritableFile {
    writer: BufWriter<File>,
}

impl WritableFile for StdWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

impl Env for StdEnv {
    fn new_sequential_file(&self, path: &Path) -> Result<Box<dyn SequentialFile>> {
        let file = File::open(path).map_err(|e| Error::Io(format!("{}: {e}", path.display())))?;
        Ok(Box::new(StdSequentialFile {
            reader: BufReader::new(file),
        }))
    }

    fn new_random_access_file(&self, path: &Path) -> Result<Arc<dyn RandomAccessFile>> {
        let file = File::open(path).map_err(|e| Error::Io(format!("{}: {e}", path.display())))?;
        Ok(Arc::new(StdRandomAccessFile { file }))
    }

    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Error::Io(format!("{}: {e}", path.display())))?;
        Ok(Box::new(StdWritableFile {
            writer: BufWriter::new(file),
        }))
    }

    fn new_appendable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::Io(format!("{}: {e}", path.display())))?;
        Ok(Box::new(StdWritableFile {
            writer: BufWriter::new(file),
        }))
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn children(&self, dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| Error::Io(format!("{}: {e}", dir.display())))? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|e| Error::Io(format!("{}: {e}", path.display())))
    }

    fn create_dir(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| Error::Io(format!("{}: {e}", dir.display())))
    }

    fn remove_dir(&self, dir: &Path) -> Result<()> {
        fs::remove_dir(dir).map_err(|e| Error::Io(format!("{}: {e}", dir.display())))
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(path)
            .map_err(|e| Error::Io(format!("{}: {e}", path.display())))?
            .len())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).map_err(|e| Error::Io(format!("{}: {e}", from.display())))
    }

    fn lock_file(&self, path: &Path) -> Result<FileLock> {
        FileLock::lock(path).map_err(|e| {
            Error::InvalidArgument(format!("lock {} held or unavailable: {e}", path.display()))
        })
    }
}

/// Process-wide default environment; created on first use, never dropped.
pub fn default_env() -> Arc<dyn Env> {
    static ENV: OnceLock<Arc<StdEnv>> = OnceLock::new();
    ENV.get_or_init(|| Arc::new(StdEnv)).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::TempDir;

    #[test]
    fn test_writable_then_sequential() {
        let dir = TempDir::new().unwrap();
        let env = default_env();
        let path = dir.path().join("data");

        let mut f = env.new_writable_file(&path).unwrap();
        f.append(b"hello ").unwrap();
        f.append(b"world").unwrap();
        f.sync().unwrap();
        drop(f);

        let mut r = env.new_sequential_file(&path).unwrap();
        let mut buf = [0u8; 6];
        assert_eq!(r.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf, b"hello ");
        r.skip(2).unwrap();
        let mut rest = [0u8; 16];
        let n = r.read(&mut rest).unwrap();
        assert_eq!(&rest[..n], b"rld");
    }

    #[test]
    fn test_random_access_reads() {
        let dir = TempDir::new().unwrap();
        let env = default_env();
        let path = dir.path().join("blob");

        let mut f = env.new_writable_file(&path).unwrap();
        f.append(b"0123456789").unwrap();
        f.sync().unwrap();
        drop(f);

        let r = env.new_random_access_file(&path).unwrap();
        assert_eq!(r.read_at(2, 4).unwrap(), b"2345");
        assert_eq!(r.read_at(8, 10).unwrap(), b"89"); // short read at EOF
        assert_eq!(r.read_at(20, 4).unwrap(), b"");
    }

    #[test]
    fn test_appendable_preserves_content() {
        let dir = TempDir::new().unwrap();
        let env = default_env();
        let path = dir.path().join("log");

        let mut f = env.new_writable_file(&path).unwrap();
        f.append(b"first").unwrap();
        f.sync().unwrap();
        drop(f);

        let mut f = env.new_appendable_file(&path).unwrap();
        f.append(b"|second").unwrap();
        f.sync().unwrap();
        drop(f);

        assert_eq!(env.file_size(&path).unwrap(), 12);
    }

    #[test]
    fn test_children_and_remove() {
        let dir = TempDir::new().unwrap();
        let env = default_env();
        for name in ["a", "b", "c"] {
            let mut f = env.new_writable_file(&dir.path().join(name)).unwrap();
            f.append(b"x").unwrap();
            f.flush().unwrap();
        }
        let mut names = env.children(dir.path()).unwrap();
        names.sort();
        assert_eq!(names, vec!["a", "b", "c"]);
        env.remove_file(&dir.path().join("b")).unwrap();
        assert!(!env.file_exists(&dir.path().join("b")));
    }
}
