//! Metadata I/O adapter.
//!
//! Every operation offloads its blocking syscall onto the runtime's shared
//! worker-thread pool, so the single-threaded async core can keep thousands
//! of high-latency NFS round-trips in flight at once.

use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tokio::task;

/// One entry from a directory read. The no-follow classification is cached
/// from the read itself so the scanner never re-stats entries.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub path: PathBuf,
    pub is_file: bool,
    pub is_dir: bool,
    pub is_symlink: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct FileMeta {
    /// Last modification time in fractional epoch seconds; negative for
    /// mtimes before the epoch.
    pub mtime: f64,
    pub size: u64,
}

fn join_err(err: task::JoinError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

async fn run_blocking<T, F>(op: F) -> io::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    task::spawn_blocking(op).await.map_err(join_err)?
}

/// Read a directory once, capturing each entry's no-follow type.
pub async fn scan_dir(path: &Path) -> io::Result<Vec<DirEntryInfo>> {
    let path = path.to_path_buf();
    run_blocking(move || {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&path)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            entries.push(DirEntryInfo {
                path: entry.path(),
                is_file: file_type.is_file(),
                is_dir: file_type.is_dir(),
                is_symlink: file_type.is_symlink(),
            });
        }
        Ok(entries)
    })
    .await
}

pub async fn stat(path: &Path) -> io::Result<FileMeta> {
    let path = path.to_path_buf();
    run_blocking(move || {
        let meta = std::fs::symlink_metadata(&path)?;
        let mtime = match meta.modified()?.duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_secs_f64(),
            Err(err) => -err.duration().as_secs_f64(),
        };
        Ok(FileMeta {
            mtime,
            size: meta.len(),
        })
    })
    .await
}

pub async fn unlink(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    run_blocking(move || std::fs::remove_file(&path)).await
}

pub async fn rmdir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    run_blocking(move || std::fs::remove_dir(&path)).await
}

pub async fn is_symlink(path: &Path) -> io::Result<bool> {
    let path = path.to_path_buf();
    run_blocking(move || Ok(std::fs::symlink_metadata(&path)?.file_type().is_symlink())).await
}

pub async fn exists(path: &Path) -> bool {
    let path = path.to_path_buf();
    task::spawn_blocking(move || path.exists())
        .await
        .unwrap_or(false)
}

pub async fn canonicalize(path: &Path) -> io::Result<PathBuf> {
    let path = path.to_path_buf();
    run_blocking(move || std::fs::canonicalize(&path)).await
}

/// Filesystem type of the purge root, reported once at startup so operators
/// can confirm they are pointed at the network mount they expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemType {
    Local,
    Nfs,
    Smb,
    Unknown,
}

impl FilesystemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilesystemType::Local => "local",
            FilesystemType::Nfs => "nfs",
            FilesystemType::Smb => "smb",
            FilesystemType::Unknown => "unknown",
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, FilesystemType::Nfs | FilesystemType::Smb)
    }
}

// statfs(2) f_type values for the network filesystems worth calling out;
// EFS mounts present as NFSv4.
const NFS_MAGIC: i64 = 0x6969;
const NFSD_MAGIC: i64 = 0x6E66_7364;
const CIFS_MAGIC: i64 = 0xFF53_4D42;
const SMB_MAGIC: i64 = 0x517B;
const SMB2_MAGIC: i64 = 0xFE53_4D42;

/// Classify the mount holding `path` by its raw statfs magic. Anything not
/// recognized as NFS or SMB/CIFS counts as local; a failed probe (or a
/// non-Unix build) reports unknown rather than guessing.
pub fn detect_filesystem_type(path: &Path) -> FilesystemType {
    match statfs_magic(path) {
        Some(NFS_MAGIC | NFSD_MAGIC) => FilesystemType::Nfs,
        Some(CIFS_MAGIC | SMB_MAGIC | SMB2_MAGIC) => FilesystemType::Smb,
        Some(_) => FilesystemType::Local,
        None => FilesystemType::Unknown,
    }
}

#[cfg(unix)]
fn statfs_magic(path: &Path) -> Option<i64> {
    use std::os::unix::ffi::OsStrExt;

    let raw = std::ffi::CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut out = std::mem::MaybeUninit::<libc::statfs>::uninit();
    if unsafe { libc::statfs(raw.as_ptr(), out.as_mut_ptr()) } != 0 {
        return None;
    }
    Some(unsafe { out.assume_init() }.f_type as i64)
}

#[cfg(not(unix))]
fn statfs_magic(_path: &Path) -> Option<i64> {
    None
}
