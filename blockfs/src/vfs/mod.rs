use crate::block::BlockError;

pub type INodeNum = u32;
pub type Path = str;

/// Index into the open file table
pub type FileDescriptor = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// path is empty, relative, has a trailing slash or an empty/invalid component
    InvalidPath,
    /// path component longer than the directory entry can hold
    NameTooLong,
    /// directory entry not found
    NotFound,
    /// operation expecting directory called with something that isn't a directory
    NotDirectory,
    /// operation expecting file called with a directory
    IsDirectory,
    /// argument that is not a path is unacceptable (e.g. removing `/`)
    InvalidArgument,
    /// no space left on device
    NoSpace,
    /// every inode record is in use
    NoFreeINodes,
    /// directory already holds the maximum number of entries
    DirectoryFull,
    /// Too many hard links to file
    TooManyLinks,
    /// Too many open files
    TooManyOpenFiles,
    /// Invalid file descriptor
    BadFd,
    /// Called remove on non-empty directory
    NotEmpty,
    /// Target destination already exists
    Exists,
    /// move would place a directory inside itself
    InvalidMove,
    /// I/O error or inconsistent on-disk data
    IO(String),
}

/// Broad category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Conflict,
    ResourceExhausted,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPath
            | Self::NameTooLong
            | Self::NotDirectory
            | Self::IsDirectory
            | Self::InvalidArgument
            | Self::BadFd => ErrorKind::InvalidArgument,
            Self::NotFound => ErrorKind::NotFound,
            Self::Exists | Self::NotEmpty | Self::InvalidMove => ErrorKind::Conflict,
            Self::NoSpace
            | Self::NoFreeINodes
            | Self::DirectoryFull
            | Self::TooManyLinks
            | Self::TooManyOpenFiles => ErrorKind::ResourceExhausted,
            Self::IO(_) => ErrorKind::Io,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPath => write!(f, "invalid path"),
            Self::NameTooLong => write!(f, "file name too long"),
            Self::NotFound => write!(f, "not found"),
            Self::NotDirectory => write!(f, "not a directory"),
            Self::IsDirectory => write!(f, "is a directory"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::NoSpace => write!(f, "no space left on device"),
            Self::NoFreeINodes => write!(f, "no free inodes"),
            Self::DirectoryFull => write!(f, "directory full"),
            Self::TooManyLinks => write!(f, "too many hard links to file"),
            Self::TooManyOpenFiles => write!(f, "too many open files"),
            Self::BadFd => write!(f, "bad file descriptor"),
            Self::NotEmpty => write!(f, "directory not empty"),
            Self::Exists => write!(f, "destination already exists"),
            Self::InvalidMove => write!(f, "cannot move a directory into itself"),
            Self::IO(s) => write!(f, "I/O error: {s}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<BlockError> for Error {
    fn from(e: BlockError) -> Self {
        Self::IO(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum INodeType {
    /// Regular file
    File,
    /// Directory
    Directory,
}

/// File or directory information, as returned by stat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Whether this is a file or a directory
    pub r#type: INodeType,
    /// inode number
    pub inode: INodeNum,
    /// Size in bytes
    pub size: u64,
    /// Number of hard links
    pub nlink: u8,
    /// Owner recorded when the inode was created
    pub owner: String,
    /// Creation time, in seconds since the Unix epoch
    pub created: u64,
    /// Last modification time, in seconds since the Unix epoch
    pub modified: u64,
}

/// Directory listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub name: String,
    pub r#type: INodeType,
}

/// Possible places to seek from
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SeekFrom {
    Start,
    Current,
    End,
}
