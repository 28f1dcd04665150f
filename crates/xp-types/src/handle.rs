//! Addressing metadata for published segments.

use serde::{Deserialize, Serialize};

use crate::buffer::{element_count, ElementType};

/// Everything needed to attach to one published segment. Carries no data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferHandle {
    pub segment_name: String,
    pub element_type: ElementType,
    pub shape: Vec<usize>,
}

impl BufferHandle {
    pub fn new(segment_name: impl Into<String>, element_type: ElementType, shape: Vec<usize>) -> Self {
        Self {
            segment_name: segment_name.into(),
            element_type,
            shape,
        }
    }

    /// Byte length implied by element type and shape; must equal the segment size.
    pub fn byte_len(&self) -> Option<usize> {
        element_count(&self.shape)?.checked_mul(self.element_type.size_of())
    }
}

/// Handles for the four buffers of one published dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetHandle {
    pub train_inputs: BufferHandle,
    pub train_labels: BufferHandle,
    pub test_inputs: BufferHandle,
    pub test_labels: BufferHandle,
}

impl DatasetHandle {
    pub fn buffers(&self) -> [&BufferHandle; 4] {
        [
            &self.train_inputs,
            &self.train_labels,
            &self.test_inputs,
            &self.test_labels,
        ]
    }

    pub fn segment_names(&self) -> Vec<&str> {
        self.buffers()
            .iter()
            .map(|h| h.segment_name.as_str())
            .collect()
    }
}
