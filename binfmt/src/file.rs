//! # Image Files
//!
//! The storage seam consumed by format handlers: a seekable, readable file
//! with `stat`, opened through a [`FileSystem`].

use crate::error::IoError;
use alloc::sync::Arc;
use embedded_io::Error as _;

pub use embedded_io::{ErrorKind, ErrorType, Read, Seek, SeekFrom};

/// Kind of a file system node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Plain file
    Regular,
    /// Directory
    Directory,
    /// Character device
    CharDevice,
    /// Block device
    BlockDevice,
    /// Anything else (FIFO, socket, ...)
    Other,
}

/// Result of [`ImageFile::stat`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Node kind
    pub kind: FileKind,
    /// Length in bytes
    pub size: u64,
}

impl FileStat {
    /// Is this a plain file?
    pub fn is_regular(&self) -> bool {
        self.kind == FileKind::Regular
    }
}

/// An open, seekable binary file
///
/// Reads failing with [`ErrorKind::Interrupted`] are retried by
/// [`read_at`] and never reach the caller.
pub trait ImageFile: Read + Seek {
    /// Query the node kind and length
    fn stat(&mut self) -> Result<FileStat, Self::Error>;
}

/// Opens image files by absolute path
pub trait FileSystem: Send + Sync {
    /// File handle type
    type File: ImageFile;

    /// Open the file at `path` for reading
    fn open(&self, path: &str) -> Result<Self::File, ErrorKind>;
}

impl<T: FileSystem + ?Sized> FileSystem for &T {
    type File = T::File;

    fn open(&self, path: &str) -> Result<Self::File, ErrorKind> {
        (**self).open(path)
    }
}

impl<T: FileSystem + ?Sized> FileSystem for Arc<T> {
    type File = T::File;

    fn open(&self, path: &str) -> Result<Self::File, ErrorKind> {
        (**self).open(path)
    }
}

/// Read exactly `buf.len()` bytes starting at `offset`
///
/// Interrupted reads are retried. On error the contents of `buf` are
/// unspecified.
pub fn read_at<F: ImageFile + ?Sized>(file: &mut F, buf: &mut [u8], offset: u64) -> Result<(), IoError> {
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| IoError::SeekFailed(e.kind()))?;

    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => return Err(IoError::UnexpectedEndOfFile),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(IoError::ReadFailed(e.kind())),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// Scripted file: each read returns the next scripted outcome
    struct ScriptedFile {
        data: Vec<u8>,
        pos: usize,
        script: Vec<Result<usize, ErrorKind>>,
        seek_error: Option<ErrorKind>,
    }

    impl ScriptedFile {
        fn new(data: &[u8], script: Vec<Result<usize, ErrorKind>>) -> Self {
            Self { data: data.to_vec(), pos: 0, script, seek_error: None }
        }
    }

    impl ErrorType for ScriptedFile {
        type Error = ErrorKind;
    }

    impl Read for ScriptedFile {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, ErrorKind> {
            let step = if self.script.is_empty() { Ok(buf.len()) } else { self.script.remove(0) };
            let n = step?.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    impl Seek for ScriptedFile {
        fn seek(&mut self, pos: SeekFrom) -> Result<u64, ErrorKind> {
            if let Some(kind) = self.seek_error {
                return Err(kind);
            }
            match pos {
                SeekFrom::Start(off) => self.pos = off as usize,
                _ => return Err(ErrorKind::Unsupported),
            }
            Ok(self.pos as u64)
        }
    }

    impl ImageFile for ScriptedFile {
        fn stat(&mut self) -> Result<FileStat, ErrorKind> {
            Ok(FileStat { kind: FileKind::Regular, size: self.data.len() as u64 })
        }
    }

    #[test]
    fn test_read_at_offset() {
        let mut file = ScriptedFile::new(b"0123456789", vec![]);
        let mut buf = [0u8; 4];
        read_at(&mut file, &mut buf, 3).unwrap();
        assert_eq!(&buf, b"3456");
    }

    #[test]
    fn test_short_reads_are_continued() {
        let mut file = ScriptedFile::new(b"abcdefgh", vec![Ok(1), Ok(2), Ok(1)]);
        let mut buf = [0u8; 6];
        read_at(&mut file, &mut buf, 0).unwrap();
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn test_interrupted_reads_are_retried() {
        let script = vec![Err(ErrorKind::Interrupted), Ok(2), Err(ErrorKind::Interrupted)];
        let mut file = ScriptedFile::new(b"abcdefgh", script);
        let mut buf = [0u8; 4];
        read_at(&mut file, &mut buf, 4).unwrap();
        assert_eq!(&buf, b"efgh");
    }

    #[test]
    fn test_read_failure_is_reported() {
        let mut file = ScriptedFile::new(b"abcdefgh", vec![Ok(1), Err(ErrorKind::PermissionDenied)]);
        let mut buf = [0u8; 4];
        assert_eq!(
            read_at(&mut file, &mut buf, 0),
            Err(IoError::ReadFailed(ErrorKind::PermissionDenied))
        );
    }

    #[test]
    fn test_end_of_file() {
        let mut file = ScriptedFile::new(b"abc", vec![]);
        let mut buf = [0u8; 4];
        assert_eq!(read_at(&mut file, &mut buf, 1), Err(IoError::UnexpectedEndOfFile));
    }

    #[test]
    fn test_seek_failure() {
        let mut file = ScriptedFile::new(b"abc", vec![]);
        file.seek_error = Some(ErrorKind::InvalidInput);
        let mut buf = [0u8; 1];
        assert_eq!(
            read_at(&mut file, &mut buf, 0),
            Err(IoError::SeekFailed(ErrorKind::InvalidInput))
        );
    }

    #[test]
    fn test_empty_read_touches_nothing() {
        let mut file = ScriptedFile::new(b"", vec![Err(ErrorKind::Other)]);
        read_at(&mut file, &mut [], 0).unwrap();
    }
}
