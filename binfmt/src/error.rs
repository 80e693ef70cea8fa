//! # Load Errors
//!
//! Error taxonomy shared by the orchestrator, the registry and every
//! format handler, plus the errno mapping used by syscall-style callers.

use alloc::string::String;
use core::fmt;
use embedded_io::ErrorKind;

/// Result type for loader operations
pub type LoadResult<T> = Result<T, LoadError>;

/// POSIX errno values reported by [`LoadError::errno`]
pub mod errno {
    /// No such file or directory
    pub const ENOENT: i32 = 2;
    /// Interrupted system call
    pub const EINTR: i32 = 4;
    /// I/O error
    pub const EIO: i32 = 5;
    /// Exec format error
    pub const ENOEXEC: i32 = 8;
    /// Out of memory
    pub const ENOMEM: i32 = 12;
    /// Permission denied
    pub const EACCES: i32 = 13;
    /// File exists
    pub const EEXIST: i32 = 17;
    /// Invalid argument
    pub const EINVAL: i32 = 22;
    /// Illegal seek
    pub const ESPIPE: i32 = 29;
    /// Result out of range
    pub const ERANGE: i32 = 34;
    /// Function not implemented
    pub const ENOSYS: i32 = 38;
    /// No data available
    pub const ENODATA: i32 = 61;
    /// Connection timed out
    pub const ETIMEDOUT: i32 = 110;
}

/// Failure of a positioned read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// Seeking to the requested offset failed
    SeekFailed(ErrorKind),
    /// The underlying read failed
    ReadFailed(ErrorKind),
    /// The file ended before the requested length was read
    UnexpectedEndOfFile,
}

/// Loader errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The request is unusable (empty path, image not loaded, ...)
    InvalidArgument,
    /// No path candidate could be loaded, or no such handler
    NotFound,
    /// Every registered handler declined the file
    NoMatchingFormat,
    /// The file is not in this handler's format
    UnsupportedFormat,
    /// A handler with the same name is already registered
    AlreadyRegistered,
    /// Opening the file failed
    OpenFailed(ErrorKind),
    /// Querying the file failed
    StatFailed(ErrorKind),
    /// The path does not name a regular file
    NotRegularFile,
    /// A header table extends past the end of the file
    TruncatedFile,
    /// The image has no section headers
    NoSections,
    /// The ELF header is internally inconsistent
    MalformedHeader,
    /// Seek failed
    SeekFailed(ErrorKind),
    /// Read failed
    ReadFailed(ErrorKind),
    /// Unexpected end of file
    UnexpectedEndOfFile,
    /// Reading the contents of a section failed
    SectionReadFailed {
        /// Section header index
        index: usize,
        /// Underlying read failure
        cause: IoError,
    },
    /// A memory allocation could not be satisfied
    OutOfMemory,
    /// A section header references something that does not exist
    BadSection(usize),
    /// A symbol table entry cannot be used for binding
    BadSymbol(usize),
    /// An undefined symbol is not exported to the image
    UndefinedSymbol(String),
    /// A relocation entry patches memory outside its target section
    BadRelocation {
        /// Relocation section index
        section: usize,
        /// Entry index within the relocation section
        entry: usize,
    },
    /// Relocation type not supported for the image's machine
    UnsupportedRelocation(u32),
    /// Relocated value does not fit the relocated field
    RelocationOverflow(u32),
    /// The entry point is not inside any loaded section
    BadEntryPoint,
}

impl LoadError {
    /// Positive errno value describing this error
    pub fn errno(&self) -> i32 {
        match self {
            Self::InvalidArgument
            | Self::NoSections
            | Self::MalformedHeader
            | Self::NotRegularFile
            | Self::BadSection(_)
            | Self::BadSymbol(_)
            | Self::BadRelocation { .. } => errno::EINVAL,
            Self::NotFound | Self::UndefinedSymbol(_) => errno::ENOENT,
            Self::NoMatchingFormat | Self::UnsupportedFormat | Self::BadEntryPoint => {
                errno::ENOEXEC
            }
            Self::AlreadyRegistered => errno::EEXIST,
            Self::OpenFailed(kind)
            | Self::StatFailed(kind)
            | Self::SeekFailed(kind)
            | Self::ReadFailed(kind) => kind_errno(*kind),
            Self::TruncatedFile => errno::ESPIPE,
            Self::UnexpectedEndOfFile => errno::ENODATA,
            Self::SectionReadFailed { cause, .. } => LoadError::from(*cause).errno(),
            Self::OutOfMemory => errno::ENOMEM,
            Self::UnsupportedRelocation(_) => errno::ENOSYS,
            Self::RelocationOverflow(_) => errno::ERANGE,
        }
    }
}

/// Map an I/O error kind onto the closest errno value
fn kind_errno(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::NotFound => errno::ENOENT,
        ErrorKind::PermissionDenied => errno::EACCES,
        ErrorKind::Interrupted => errno::EINTR,
        ErrorKind::OutOfMemory => errno::ENOMEM,
        ErrorKind::InvalidInput | ErrorKind::InvalidData => errno::EINVAL,
        ErrorKind::Unsupported => errno::ENOSYS,
        ErrorKind::TimedOut => errno::ETIMEDOUT,
        ErrorKind::AlreadyExists => errno::EEXIST,
        _ => errno::EIO,
    }
}

impl From<IoError> for LoadError {
    fn from(err: IoError) -> Self {
        match err {
            IoError::SeekFailed(kind) => Self::SeekFailed(kind),
            IoError::ReadFailed(kind) => Self::ReadFailed(kind),
            IoError::UnexpectedEndOfFile => Self::UnexpectedEndOfFile,
        }
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SeekFailed(kind) => write!(f, "seek failed: {:?}", kind),
            Self::ReadFailed(kind) => write!(f, "read failed: {:?}", kind),
            Self::UnexpectedEndOfFile => f.write_str("unexpected end of file"),
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::NotFound => f.write_str("not found"),
            Self::NoMatchingFormat => f.write_str("no handler recognised the format"),
            Self::UnsupportedFormat => f.write_str("unsupported format"),
            Self::AlreadyRegistered => f.write_str("handler already registered"),
            Self::OpenFailed(kind) => write!(f, "open failed: {:?}", kind),
            Self::StatFailed(kind) => write!(f, "stat failed: {:?}", kind),
            Self::NotRegularFile => f.write_str("not a regular file"),
            Self::TruncatedFile => f.write_str("header table extends past end of file"),
            Self::NoSections => f.write_str("image has no sections"),
            Self::MalformedHeader => f.write_str("malformed ELF header"),
            Self::SeekFailed(kind) => write!(f, "seek failed: {:?}", kind),
            Self::ReadFailed(kind) => write!(f, "read failed: {:?}", kind),
            Self::UnexpectedEndOfFile => f.write_str("unexpected end of file"),
            Self::SectionReadFailed { index, cause } => {
                write!(f, "failed to read section {}: {}", index, cause)
            }
            Self::OutOfMemory => f.write_str("out of memory"),
            Self::BadSection(index) => write!(f, "bad section header {}", index),
            Self::BadSymbol(index) => write!(f, "bad symbol {}", index),
            Self::UndefinedSymbol(name) => write!(f, "undefined symbol `{}`", name),
            Self::BadRelocation { section, entry } => {
                write!(f, "relocation {} in section {} is out of range", entry, section)
            }
            Self::UnsupportedRelocation(kind) => write!(f, "unsupported relocation type {}", kind),
            Self::RelocationOverflow(kind) => write!(f, "relocation type {} overflows", kind),
            Self::BadEntryPoint => f.write_str("entry point outside loaded sections"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(LoadError::InvalidArgument.errno(), errno::EINVAL);
        assert_eq!(LoadError::NotFound.errno(), errno::ENOENT);
        assert_eq!(LoadError::TruncatedFile.errno(), errno::ESPIPE);
        assert_eq!(LoadError::UnexpectedEndOfFile.errno(), errno::ENODATA);
        assert_eq!(LoadError::OutOfMemory.errno(), errno::ENOMEM);
        assert_eq!(LoadError::UnsupportedRelocation(99).errno(), errno::ENOSYS);
        assert_eq!(LoadError::ReadFailed(ErrorKind::PermissionDenied).errno(), errno::EACCES);
        assert_eq!(LoadError::SeekFailed(ErrorKind::Other).errno(), errno::EIO);
    }

    #[test]
    fn test_section_read_errno_follows_cause() {
        let err = LoadError::SectionReadFailed {
            index: 3,
            cause: IoError::UnexpectedEndOfFile,
        };
        assert_eq!(err.errno(), errno::ENODATA);
        assert_eq!(err.to_string(), "failed to read section 3: unexpected end of file");
    }

    #[test]
    fn test_io_error_conversion() {
        assert_eq!(
            LoadError::from(IoError::ReadFailed(ErrorKind::TimedOut)),
            LoadError::ReadFailed(ErrorKind::TimedOut)
        );
        assert_eq!(
            LoadError::from(IoError::UnexpectedEndOfFile),
            LoadError::UnexpectedEndOfFile
        );
    }
}
