use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use fs2::FileExt;
use memmap2::{Mmap, MmapMut};

use crate::persist::header::{HEADER_SIZE, Header, MAGIC};

/// A snapshot file on disk, exclusively locked for as long as it is open.
///
/// The lock lives on a sidecar `<path>.lock` file so that snapshots can be
/// replaced by rename without dropping it.
#[derive(Debug)]
pub struct SnapshotFile {
    path: PathBuf,

    /// Lock file handle (owns the lock)
    lock: File,
}

impl SnapshotFile {
    /// Lock the snapshot at `path`. The snapshot itself need not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The lock file cannot be opened or created
    /// - The snapshot is already open in this or another process
    pub fn lock<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock_path = sidecar(&path, "lock");

        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

        lock.try_lock_exclusive()
            .with_context(|| format!("Keel database is already open: {}", path.display()))?;

        Ok(Self { path, lock })
    }

    /// Path of the snapshot.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot payload, or `None` if no snapshot exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be mapped, the header is invalid
    /// or the payload is shorter than the header claims.
    pub fn read(&self) -> Result<Option<(Header, Vec<u8>)>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open snapshot: {}", self.path.display()));
            }
        };

        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(None);
        }
        if len < HEADER_SIZE as u64 {
            bail!("Snapshot is shorter than its header: {} bytes", len);
        }

        // SAFETY: the sidecar lock keeps other Keel handles from replacing
        // the file while it is mapped, and the mapping is dropped before return.
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to map snapshot: {}", self.path.display()))?;

        if &mmap[..MAGIC.len()] != MAGIC {
            bail!("File is not a Keel snapshot: {}", self.path.display());
        }

        let header = Header::from_bytes(&mmap).context("Snapshot header truncated")?;
        if !header.is_valid() {
            bail!("Corrupted or incompatible snapshot header at {}", self.path.display());
        }

        let payload_len = usize::try_from(header.payload_len).context("Payload too large")?;
        let end = HEADER_SIZE.checked_add(payload_len).context("Payload length overflow")?;
        let payload = mmap
            .get(HEADER_SIZE..end)
            .with_context(|| format!("Snapshot payload truncated: expected {payload_len} bytes"))?
            .to_vec();

        Ok(Some((header, payload)))
    }

    /// Atomically replace the snapshot with `header` + `payload`.
    ///
    /// The data is written to `<path>.tmp` through a writable map, flushed
    /// and synced, then renamed over the snapshot.
    ///
    /// # Performance
    ///
    /// Always writes the whole snapshot and forces it to the device
    /// (1-50ms depending on storage).
    pub fn write(&self, header: &Header, payload: &[u8]) -> Result<()> {
        let tmp_path = sidecar(&self.path, "tmp");
        let total = HEADER_SIZE + payload.len();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .with_context(|| format!("Failed to create snapshot: {}", tmp_path.display()))?;
        file.set_len(total as u64)?;

        // SAFETY: the temp file is private to this handle until the rename.
        let mut mmap = unsafe { MmapMut::map_mut(&file) }
            .with_context(|| format!("Failed to map snapshot: {}", tmp_path.display()))?;
        mmap[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        mmap[HEADER_SIZE..].copy_from_slice(payload);
        mmap.flush()?;
        drop(mmap);

        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!("Failed to replace snapshot {} with {}", self.path.display(), tmp_path.display())
        })?;
        Ok(())
    }
}

impl Drop for SnapshotFile {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.lock) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release snapshot lock");
        }
    }
}

fn sidecar(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}
