//! Segment lifecycle: publish, attach, release.
//!
//! Segments are files in a shared directory (by default `/dev/shm`, the
//! tmpfs that backs POSIX shared memory on Linux). The arena that publishes a
//! segment owns it until the matching [`ReleaseToken`] is released or dropped;
//! attachers only ever map segments read-only.

use dashmap::DashMap;
use memmap2::Mmap;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use xp_types::{
    validation_error, Buffer, BufferHandle, Dataset, DatasetHandle, ElementType, SharedMemoryError,
    XpError, XpResult,
};

use crate::view::{BufferView, DatasetView};

/// Prefix of every segment name created by an arena.
pub const SEGMENT_PREFIX: &str = "xp-";

/// Directory segments are created in when none is configured.
pub fn default_segment_root() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.to_path_buf()
    } else {
        std::env::temp_dir().join("xp-shm")
    }
}

#[derive(Debug)]
struct SegmentRecord {
    path: PathBuf,
    bytes: usize,
}

#[derive(Debug)]
struct ArenaInner {
    root: PathBuf,
    capacity: Option<u64>,
    reserved: Mutex<u64>,
    segments: DashMap<String, SegmentRecord>,
}

impl ArenaInner {
    fn reserve(&self, segment: &str, bytes: usize) -> XpResult<()> {
        let mut reserved = self.reserved.lock();
        let wanted = *reserved + bytes as u64;

        if let Some(capacity) = self.capacity {
            if wanted > capacity {
                return Err(SharedMemoryError::ResourceExhausted {
                    segment: segment.to_string(),
                    bytes,
                    message: format!(
                        "arena capacity {capacity} bytes, {} already reserved",
                        *reserved
                    ),
                }
                .into());
            }
        }

        *reserved = wanted;
        Ok(())
    }

    fn unreserve(&self, bytes: usize) {
        let mut reserved = self.reserved.lock();
        *reserved = reserved.saturating_sub(bytes as u64);
    }

    /// Unlink every named segment, continuing past failures.
    fn unlink_all(&self, names: Vec<String>) -> XpResult<()> {
        let mut first_error = None;

        for name in names {
            let Some((_, record)) = self.segments.remove(&name) else {
                continue;
            };
            debug!(segment = %name, "Unlinking segment");

            match fs::remove_file(&record.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(segment = %name, "Segment already removed");
                }
                Err(e) => {
                    warn!(segment = %name, error = %e, "Failed to unlink segment");
                    first_error.get_or_insert(e);
                }
            }
            self.unreserve(record.bytes);
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

/// Owner of named shared segments.
///
/// Cloning is cheap; clones share the same registry. An arena opened on the
/// same directory from another process can attach any handle published here.
#[derive(Debug, Clone)]
pub struct SharedArena {
    inner: Arc<ArenaInner>,
}

impl SharedArena {
    pub fn new<P: AsRef<Path>>(root: P) -> XpResult<Self> {
        Self::build(root.as_ref(), None)
    }

    /// Arena that refuses to hold more than `capacity_bytes` at once.
    pub fn with_capacity<P: AsRef<Path>>(root: P, capacity_bytes: u64) -> XpResult<Self> {
        Self::build(root.as_ref(), Some(capacity_bytes))
    }

    pub fn in_default_root() -> XpResult<Self> {
        Self::new(default_segment_root())
    }

    fn build(root: &Path, capacity: Option<u64>) -> XpResult<Self> {
        fs::create_dir_all(root)?;

        Ok(Self {
            inner: Arc::new(ArenaInner {
                root: root.to_path_buf(),
                capacity,
                reserved: Mutex::new(0),
                segments: DashMap::new(),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Bytes currently held by segments this arena published.
    pub fn reserved_bytes(&self) -> u64 {
        *self.inner.reserved.lock()
    }

    /// Names of segments published by this arena and not yet released.
    pub fn live_segments(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .segments
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Copy each buffer of `dataset` into its own new segment.
    ///
    /// If any allocation fails, the segments already created by this call are
    /// unlinked before the error is returned.
    pub fn publish(&self, dataset: &Dataset) -> XpResult<(DatasetHandle, ReleaseToken)> {
        let mut token = ReleaseToken::new(self.inner.clone());

        let handle = DatasetHandle {
            train_inputs: self.allocate(&dataset.train_inputs, &mut token)?,
            train_labels: self.allocate(&dataset.train_labels, &mut token)?,
            test_inputs: self.allocate(&dataset.test_inputs, &mut token)?,
            test_labels: self.allocate(&dataset.test_labels, &mut token)?,
        };

        info!(
            segments = token.segment_names().len(),
            bytes = dataset.byte_len(),
            "Published dataset"
        );
        Ok((handle, token))
    }

    fn allocate(&self, buffer: &Buffer, token: &mut ReleaseToken) -> XpResult<BufferHandle> {
        self.allocate_bytes(buffer.element_type(), buffer.shape(), buffer.as_bytes(), token)
    }

    fn allocate_bytes(
        &self,
        element_type: ElementType,
        shape: &[usize],
        bytes: &[u8],
        token: &mut ReleaseToken,
    ) -> XpResult<BufferHandle> {
        let name = format!("{SEGMENT_PREFIX}{}", Uuid::new_v4().simple());
        let handle = BufferHandle::new(name.clone(), element_type, shape.to_vec());

        // the handle must describe the segment exactly
        let expected = handle
            .byte_len()
            .ok_or_else(|| validation_error!("shape {:?} overflows", shape))?;
        if expected != bytes.len() {
            return Err(SharedMemoryError::LayoutMismatch {
                segment: name,
                expected,
                actual: bytes.len(),
            }
            .into());
        }

        self.inner.reserve(&name, bytes.len())?;

        let path = self.inner.root.join(&name);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) => {
                self.inner.unreserve(bytes.len());
                return Err(allocation_error(&name, bytes.len(), e));
            }
        };

        // From here on the token owns the segment, so a failed write is unlinked.
        self.inner.segments.insert(
            name.clone(),
            SegmentRecord {
                path,
                bytes: bytes.len(),
            },
        );
        token.segments.push(name.clone());

        file.write_all(bytes)
            .and_then(|()| file.sync_data())
            .map_err(|e| allocation_error(&name, bytes.len(), e))?;

        debug!(segment = %name, bytes = bytes.len(), "Allocated segment");
        Ok(handle)
    }

    /// Map an existing segment read-only.
    pub fn attach(&self, handle: &BufferHandle) -> XpResult<BufferView> {
        validate_segment_name(&handle.segment_name)?;
        let expected = handle.byte_len().ok_or_else(|| {
            validation_error!("shape {:?} of {} overflows", handle.shape, handle.segment_name)
        })?;

        let path = self.inner.root.join(&handle.segment_name);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SharedMemoryError::SegmentNotFound {
                    segment: handle.segment_name.clone(),
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        };

        let actual = file.metadata()?.len() as usize;
        if actual != expected {
            return Err(SharedMemoryError::LayoutMismatch {
                segment: handle.segment_name.clone(),
                expected,
                actual,
            }
            .into());
        }

        let map = if expected == 0 {
            None
        } else {
            // SAFETY: published segments are written once before their handle
            // exists and never modified afterwards; the map is read-only.
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(BufferView::new(handle.clone(), map))
    }

    pub fn attach_dataset(&self, handle: &DatasetHandle) -> XpResult<DatasetView> {
        Ok(DatasetView {
            train_inputs: self.attach(&handle.train_inputs)?,
            train_labels: self.attach(&handle.train_labels)?,
            test_inputs: self.attach(&handle.test_inputs)?,
            test_labels: self.attach(&handle.test_labels)?,
        })
    }

    /// Unlink every segment owned by `token`.
    pub fn release(&self, token: ReleaseToken) -> XpResult<()> {
        token.release()
    }
}

/// Out-of-space conditions are `ResourceExhausted`; anything else stays an IO error.
fn allocation_error(segment: &str, bytes: usize, e: io::Error) -> XpError {
    match e.kind() {
        io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded | io::ErrorKind::FileTooLarge => {
            SharedMemoryError::ResourceExhausted {
                segment: segment.to_string(),
                bytes,
                message: e.to_string(),
            }
            .into()
        }
        _ => e.into(),
    }
}

fn validate_segment_name(name: &str) -> XpResult<()> {
    let plain = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if plain {
        Ok(())
    } else {
        Err(SharedMemoryError::InvalidSegmentName {
            segment: name.to_string(),
        }
        .into())
    }
}

/// Ownership of the segments created by one `publish` call.
///
/// Releasing consumes the token; dropping an unreleased token releases it.
#[derive(Debug)]
#[must_use = "dropping a ReleaseToken unlinks its segments immediately"]
pub struct ReleaseToken {
    arena: Arc<ArenaInner>,
    segments: Vec<String>,
}

impl ReleaseToken {
    fn new(arena: Arc<ArenaInner>) -> Self {
        Self {
            arena,
            segments: Vec::new(),
        }
    }

    pub fn segment_names(&self) -> &[String] {
        &self.segments
    }

    pub fn release(mut self) -> XpResult<()> {
        let names = std::mem::take(&mut self.segments);
        self.arena.unlink_all(names)
    }
}

impl Drop for ReleaseToken {
    fn drop(&mut self) {
        if self.segments.is_empty() {
            return;
        }
        let names = std::mem::take(&mut self.segments);
        if let Err(e) = self.arena.unlink_all(names) {
            warn!(error = %e, "Release on drop left segments behind");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use tempfile::TempDir;

    fn sample_dataset(samples: usize, features: usize) -> Dataset {
        let mut rng = rand::rng();
        let inputs: Vec<f32> = (0..samples * features).map(|_| rng.random()).collect();
        let labels: Vec<i64> = (0..samples).map(|i| (i % 3) as i64).collect();
        let test_inputs: Vec<f64> = (0..samples).map(|_| rng.random()).collect();

        Dataset::new(
            Buffer::new(vec![samples, features], inputs).unwrap(),
            Buffer::vector(labels.clone()),
            Buffer::new(vec![samples, 1], test_inputs).unwrap(),
            Buffer::vector(labels),
        )
    }

    fn native_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    fn files_in(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn publish_then_attach_is_bit_identical() {
        let dir = TempDir::new().unwrap();
        let arena = SharedArena::new(dir.path()).unwrap();
        let dataset = sample_dataset(50, 4);

        let (handle, token) = arena.publish(&dataset).unwrap();
        assert_eq!(token.segment_names().len(), 4);
        assert_eq!(arena.reserved_bytes(), dataset.byte_len() as u64);

        let view = arena.attach_dataset(&handle).unwrap();
        let original = dataset.train_inputs.as_buffer_ref().as_slice::<f32>().unwrap();
        let shared = view.train_inputs.as_slice::<f32>().unwrap();
        assert_eq!(original.len(), shared.len());
        assert!(original
            .iter()
            .zip(shared)
            .all(|(a, b)| a.to_bits() == b.to_bits()));
        assert_ne!(original.as_ptr(), shared.as_ptr());

        let shared_ref = view.as_dataset_ref();
        assert_eq!(shared_ref.train_inputs.shape(), &[50, 4]);
        assert_eq!(
            shared_ref.test_labels.as_slice::<i64>().unwrap(),
            dataset.test_labels.as_buffer_ref().as_slice::<i64>().unwrap()
        );
        let array = shared_ref.test_inputs.array::<f64>().unwrap();
        assert_eq!(array.shape(), &[50, 1]);

        drop(view);
        token.release().unwrap();
    }

    #[test]
    fn handles_carry_type_and_shape() {
        let dir = TempDir::new().unwrap();
        let arena = SharedArena::new(dir.path()).unwrap();
        let dataset = sample_dataset(10, 2);

        let (handle, _token) = arena.publish(&dataset).unwrap();
        assert_eq!(handle.train_inputs.element_type, ElementType::F32);
        assert_eq!(handle.train_inputs.shape, vec![10, 2]);
        assert_eq!(handle.train_labels.element_type, ElementType::I64);
        assert!(handle
            .segment_names()
            .iter()
            .all(|name| name.starts_with(SEGMENT_PREFIX)));
    }

    #[test]
    fn release_unlinks_every_segment() {
        let dir = TempDir::new().unwrap();
        let arena = SharedArena::new(dir.path()).unwrap();

        let (handle, token) = arena.publish(&sample_dataset(20, 3)).unwrap();
        assert_eq!(files_in(dir.path()), 4);

        arena.release(token).unwrap();

        assert!(arena.live_segments().is_empty());
        assert_eq!(arena.reserved_bytes(), 0);
        assert_eq!(files_in(dir.path()), 0);
        let err = arena.attach(&handle.train_inputs).unwrap_err();
        assert!(err.is_segment_not_found());
    }

    #[test]
    fn dropping_token_releases() {
        let dir = TempDir::new().unwrap();
        let arena = SharedArena::new(dir.path()).unwrap();

        {
            let (_handle, _token) = arena.publish(&sample_dataset(5, 5)).unwrap();
            assert_eq!(arena.live_segments().len(), 4);
        }

        assert!(arena.live_segments().is_empty());
        assert_eq!(files_in(dir.path()), 0);
    }

    #[test]
    fn mapping_survives_release() {
        let dir = TempDir::new().unwrap();
        let arena = SharedArena::new(dir.path()).unwrap();
        let dataset = sample_dataset(8, 2);

        let (handle, token) = arena.publish(&dataset).unwrap();
        let view = arena.attach(&handle.train_labels).unwrap();
        token.release().unwrap();

        // unlinked names stay readable through existing maps
        assert_eq!(view.as_slice::<i64>().unwrap().len(), 8);
    }

    #[test]
    fn capacity_overflow_rolls_back_partial_publish() {
        let dir = TempDir::new().unwrap();
        let dataset = sample_dataset(100, 4);
        let first_two = dataset.train_inputs.byte_len() + dataset.train_labels.byte_len();
        let arena = SharedArena::with_capacity(dir.path(), first_two as u64 + 16).unwrap();

        let err = arena.publish(&dataset).unwrap_err();

        assert!(matches!(
            err,
            XpError::Shared(SharedMemoryError::ResourceExhausted { .. })
        ));
        assert!(arena.live_segments().is_empty());
        assert_eq!(arena.reserved_bytes(), 0);
        assert_eq!(files_in(dir.path()), 0);
    }

    #[test]
    fn allocation_refuses_shape_that_disagrees_with_bytes() {
        let dir = TempDir::new().unwrap();
        let arena = SharedArena::new(dir.path()).unwrap();
        let mut token = ReleaseToken::new(arena.inner.clone());
        let bytes: Vec<u8> = native_bytes(&[1.0f32, 2.0, 3.0]);

        let err = arena
            .allocate_bytes(ElementType::F32, &[5], &bytes, &mut token)
            .unwrap_err();

        assert!(matches!(
            err,
            XpError::Shared(SharedMemoryError::LayoutMismatch {
                expected: 20,
                actual: 12,
                ..
            })
        ));
        assert_eq!(arena.reserved_bytes(), 0);
        assert!(token.segment_names().is_empty());
        assert_eq!(files_in(dir.path()), 0);

        let handle = arena
            .allocate_bytes(ElementType::F32, &[3], &bytes, &mut token)
            .unwrap();
        assert_eq!(arena.attach(&handle).unwrap().as_slice::<f32>().unwrap(), &[1.0, 2.0, 3.0]);
        token.release().unwrap();
    }

    #[test]
    fn only_out_of_space_counts_as_exhaustion() {
        let full = allocation_error("xp-a", 64, io::Error::from(io::ErrorKind::StorageFull));
        assert!(matches!(
            full,
            XpError::Shared(SharedMemoryError::ResourceExhausted { bytes: 64, .. })
        ));

        let denied = allocation_error("xp-a", 64, io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(denied, XpError::Io(_)));
        let taken = allocation_error("xp-a", 64, io::Error::from(io::ErrorKind::AlreadyExists));
        assert!(matches!(taken, XpError::Io(_)));
    }

    #[test]
    fn vanished_root_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("segments");
        let arena = SharedArena::new(&root).unwrap();
        fs::remove_dir(&root).unwrap();

        let err = arena.publish(&sample_dataset(4, 2)).unwrap_err();

        assert!(matches!(err, XpError::Io(_)));
        assert_eq!(arena.reserved_bytes(), 0);
        assert!(arena.live_segments().is_empty());
    }

    #[test]
    fn attach_rejects_wrong_layout() {
        let dir = TempDir::new().unwrap();
        let arena = SharedArena::new(dir.path()).unwrap();

        let (handle, _token) = arena.publish(&sample_dataset(10, 2)).unwrap();
        let mut wrong = handle.train_inputs.clone();
        wrong.element_type = ElementType::F64;

        let err = arena.attach(&wrong).unwrap_err();
        assert!(matches!(
            err,
            XpError::Shared(SharedMemoryError::LayoutMismatch {
                expected: 160,
                actual: 80,
                ..
            })
        ));
    }

    #[test]
    fn attach_rejects_path_like_names() {
        let dir = TempDir::new().unwrap();
        let arena = SharedArena::new(dir.path()).unwrap();
        let handle = BufferHandle::new("../etc/passwd", ElementType::U8, vec![4]);

        let err = arena.attach(&handle).unwrap_err();
        assert!(matches!(
            err,
            XpError::Shared(SharedMemoryError::InvalidSegmentName { .. })
        ));
    }

    #[test]
    fn empty_buffers_publish_and_attach() {
        let dir = TempDir::new().unwrap();
        let arena = SharedArena::new(dir.path()).unwrap();
        let empty = Buffer::new::<f64>(vec![0, 3], Vec::new()).unwrap();
        let dataset = Dataset::new(
            empty.clone(),
            Buffer::vector::<i64>(Vec::new()),
            empty,
            Buffer::vector::<i64>(Vec::new()),
        );

        let (handle, token) = arena.publish(&dataset).unwrap();
        let view = arena.attach(&handle.train_inputs).unwrap();
        assert!(view.as_slice::<f64>().unwrap().is_empty());
        token.release().unwrap();
    }

    #[test]
    fn concurrent_attachers_read_same_segment() {
        let dir = TempDir::new().unwrap();
        let arena = SharedArena::new(dir.path()).unwrap();
        let values: Vec<u64> = (0..10_000).collect();
        let expected: u64 = values.iter().sum();
        let buffer = Buffer::vector(values);
        let dataset = Dataset::new(buffer.clone(), buffer.clone(), buffer.clone(), buffer);

        let (handle, token) = arena.publish(&dataset).unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let arena = arena.clone();
                let handle = &handle;
                scope.spawn(move || {
                    let view = arena.attach(&handle.test_inputs).unwrap();
                    let sum: u64 = view.as_slice::<u64>().unwrap().iter().sum();
                    assert_eq!(sum, expected);
                });
            }
        });

        token.release().unwrap();
    }

    #[test]
    fn separate_arena_on_same_root_can_attach() {
        let dir = TempDir::new().unwrap();
        let publisher = SharedArena::new(dir.path()).unwrap();
        let attacher = SharedArena::new(dir.path()).unwrap();
        let dataset = sample_dataset(12, 3);

        let (handle, token) = publisher.publish(&dataset).unwrap();
        let view = attacher.attach_dataset(&handle).unwrap();

        assert_eq!(view.train_inputs.bytes(), dataset.train_inputs.as_bytes());
        assert!(attacher.live_segments().is_empty());
        drop(view);
        token.release().unwrap();
    }

    #[test]
    fn ndarray_buffers_round_trip() {
        let dir = TempDir::new().unwrap();
        let arena = SharedArena::new(dir.path()).unwrap();
        let grid = ndarray::Array3::from_shape_fn((2, 3, 4), |(i, j, k)| (i * 100 + j * 10 + k) as i32);
        let buffer = Buffer::from_array(grid.clone().into_dyn());
        let dataset = Dataset::new(buffer.clone(), buffer.clone(), buffer.clone(), buffer);

        let (handle, _token) = arena.publish(&dataset).unwrap();
        let view = arena.attach(&handle.train_inputs).unwrap();
        let shared = view.as_buffer_ref().array::<i32>().unwrap();
        assert_eq!(shared, grid.into_dyn().view());
    }
}
