//! Read-only views over attached segments.

use memmap2::Mmap;

use xp_types::{BufferHandle, BufferRef, DatasetRef, Element, XpResult};

/// A mapped, read-only segment. Detaches when dropped; never deallocates.
#[derive(Debug)]
pub struct BufferView {
    handle: BufferHandle,
    // zero-length segments cannot be mapped
    map: Option<Mmap>,
}

impl BufferView {
    pub(crate) fn new(handle: BufferHandle, map: Option<Mmap>) -> Self {
        Self { handle, map }
    }

    pub fn handle(&self) -> &BufferHandle {
        &self.handle
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.map {
            Some(map) => &map[..],
            None => &[],
        }
    }

    pub fn as_buffer_ref(&self) -> BufferRef<'_> {
        BufferRef::new(self.handle.element_type, &self.handle.shape, self.bytes())
    }

    pub fn as_slice<T: Element>(&self) -> XpResult<&[T]> {
        self.as_buffer_ref().as_slice()
    }
}

/// The four attached buffers of one published dataset.
#[derive(Debug)]
pub struct DatasetView {
    pub train_inputs: BufferView,
    pub train_labels: BufferView,
    pub test_inputs: BufferView,
    pub test_labels: BufferView,
}

impl DatasetView {
    pub fn as_dataset_ref(&self) -> DatasetRef<'_> {
        DatasetRef {
            train_inputs: self.train_inputs.as_buffer_ref(),
            train_labels: self.train_labels.as_buffer_ref(),
            test_inputs: self.test_inputs.as_buffer_ref(),
            test_labels: self.test_labels.as_buffer_ref(),
        }
    }
}
