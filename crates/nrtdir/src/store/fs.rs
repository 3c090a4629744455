use std::{
    fmt::Debug,
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use culprit::{Culprit, ResultExt};

use crate::err::{DirErr, Result};

use super::{Directory, IndexInput, IndexOutput};

/// A stable store backed by a directory on the local filesystem.
#[derive(Debug)]
pub struct FsDirectory {
    root: PathBuf,
    closed: AtomicBool,
}

impl FsDirectory {
    /// Opens the directory at `path`, creating it if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        fs::create_dir_all(path.as_ref()).or_into_ctx()?;
        let root = fs::canonicalize(path).or_into_ctx()?;
        tracing::debug!("opened filesystem directory at {:?}", root);
        Ok(Self { root, closed: AtomicBool::new(false) })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        if self.closed.load(Ordering::Acquire) {
            return DirErr::AlreadyClosed.into();
        }
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\', '\0']);
        if !valid {
            return DirErr::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid file name `{name}`"),
            ))
            .into();
        }
        Ok(self.root.join(name))
    }

    fn sync_dir(&self) -> Result<()> {
        // fsync on a directory handle is not supported on windows
        #[cfg(unix)]
        File::open(&self.root).and_then(|dir| dir.sync_all()).or_into_ctx()?;
        Ok(())
    }
}

/// Maps missing and duplicate files onto their named variants and everything
/// else onto `Io`.
fn io_err(name: &str) -> impl FnOnce(io::Error) -> Culprit<DirErr> + '_ {
    move |err| {
        Culprit::new(match err.kind() {
            io::ErrorKind::NotFound => DirErr::NotFound(name.into()),
            io::ErrorKind::AlreadyExists => DirErr::AlreadyExists(name.into()),
            _ => DirErr::Io(err),
        })
    }
}

impl Directory for FsDirectory {
    fn create_output(&self, name: &str) -> Result<Box<dyn IndexOutput>> {
        let path = self.resolve(name)?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(io_err(name))?;
        Ok(Box::new(FsOutput {
            name: name.into(),
            writer: Some(BufWriter::new(file)),
            written: 0,
        }))
    }

    fn open_input(&self, name: &str) -> Result<Box<dyn IndexInput>> {
        let path = self.resolve(name)?;
        let file = File::open(path).map_err(io_err(name))?;
        let len = file.metadata().or_into_ctx()?.len();
        Ok(Box::new(FsInput { name: name.into(), file, len, pos: 0 }))
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        fs::remove_file(path).map_err(io_err(name))
    }

    fn sync(&self, names: &[String]) -> Result<()> {
        for name in names {
            let path = self.resolve(name)?;
            match File::open(path).and_then(|file| file.sync_all()) {
                Ok(()) => (),
                // deleted since it was written; nothing left to make durable
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    tracing::trace!(name, "skipping sync of missing file");
                }
                Err(err) => return Err(io_err(name)(err)),
            }
        }
        if !names.is_empty() {
            self.sync_dir()?;
        }
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        fs::rename(src, dst).map_err(io_err(from))?;
        self.sync_dir()
    }

    fn list_all(&self) -> Result<Vec<String>> {
        if self.closed.load(Ordering::Acquire) {
            return DirErr::AlreadyClosed.into();
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root).or_into_ctx()? {
            let entry = entry.or_into_ctx()?;
            if entry.file_type().or_into_ctx()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        let path = self.resolve(name)?;
        let meta = fs::metadata(path).map_err(io_err(name))?;
        Ok(meta.len())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct FsOutput {
    name: String,
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl Debug for FsOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsOutput")
            .field("name", &self.name)
            .field("written", &self.written)
            .finish()
    }
}

impl IndexOutput for FsOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return DirErr::ClosedStream(self.name.clone()).into();
        };
        writer.write_all(data).or_into_ctx()?;
        self.written += data.len() as u64;
        Ok(())
    }

    fn file_pointer(&self) -> u64 {
        self.written
    }

    fn close(&mut self) -> Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer.flush().or_into_ctx(),
            None => Ok(()),
        }
    }
}

impl Drop for FsOutput {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!("failed to close output `{}`: {err}", self.name);
        }
    }
}

#[derive(Debug)]
struct FsInput {
    name: String,
    file: File,
    len: u64,
    pos: u64,
}

impl IndexInput for FsInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.len {
            return DirErr::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("seek past end of `{}`: {pos} > {}", self.name, self.len),
            ))
            .into();
        }
        self.file.seek(SeekFrom::Start(pos)).or_into_ctx()?;
        self.pos = pos;
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact(buf).or_into_ctx()?;
        self.pos += buf.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_fs_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FsDirectory::open(tmp.path()).unwrap();

        let mut out = dir.create_output("_0.fdt").unwrap();
        for i in 0..10 {
            out.write_i32(i).unwrap();
        }
        assert_eq!(out.file_pointer(), 40);
        out.close().unwrap();
        assert_matches!(out.write_u8(0).unwrap_err().ctx(), DirErr::ClosedStream(_));

        assert_matches!(
            dir.create_output("_0.fdt").unwrap_err().ctx(),
            DirErr::AlreadyExists(_)
        );

        dir.sync(&["_0.fdt".into()]).unwrap();
        assert_eq!(dir.file_length("_0.fdt").unwrap(), 40);

        let mut input = dir.open_input("_0.fdt").unwrap();
        input.seek(36).unwrap();
        assert_eq!(input.read_i32().unwrap(), 9);
        assert!(input.read_u8().is_err());

        dir.rename("_0.fdt", "_1.fdt").unwrap();
        assert_eq!(dir.list_all().unwrap(), vec!["_1.fdt".to_string()]);

        dir.delete_file("_1.fdt").unwrap();
        assert_matches!(dir.delete_file("_1.fdt").unwrap_err().ctx(), DirErr::NotFound(_));
        assert!(!dir.file_exists("_1.fdt").unwrap());
    }

    #[test]
    fn test_sync_skips_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FsDirectory::open(tmp.path()).unwrap();
        let mut out = dir.create_output("_0.cfs").unwrap();
        out.write_i32(1).unwrap();
        out.close().unwrap();

        dir.sync(&["_0.si".into(), "_0.cfs".into()]).unwrap();
        assert_matches!(
            dir.sync(&["../_0.si".into()]).unwrap_err().ctx(),
            DirErr::Io(_)
        );
    }

    #[test]
    fn test_rejects_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FsDirectory::open(tmp.path()).unwrap();
        assert!(dir.create_output("../escape").is_err());
        assert!(dir.create_output("").is_err());
    }
}
