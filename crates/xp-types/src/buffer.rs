//! Typed numeric buffers and the four-buffer train/test [`Dataset`].
//!
//! Owned buffers ([`Buffer`]) and mapped segments both expose the same
//! borrowed [`BufferRef`], so evaluators see one view type regardless of
//! where the bytes live.

use ndarray::{ArrayD, ArrayViewD, IxDyn};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{SharedMemoryError, XpError, XpResult};
use crate::{internal_error, validation_error};

/// Scalar type stored in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    F32,
    F64,
    I32,
    I64,
    U8,
    U64,
}

impl ElementType {
    /// Size in bytes of one element.
    pub fn size_of(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::F32 | Self::I32 => 4,
            Self::F64 | Self::I64 | Self::U64 => 8,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U64 => "u64",
        };
        f.write_str(name)
    }
}

/// A Rust scalar that can live in a shared buffer.
pub trait Element: bytemuck::Pod + Send + Sync {
    const TYPE: ElementType;

    fn into_data(values: Vec<Self>) -> BufferData;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const TYPE: ElementType = ElementType::$variant;

            fn into_data(values: Vec<Self>) -> BufferData {
                BufferData::$variant(values)
            }
        }
    };
}

impl_element!(f32, F32);
impl_element!(f64, F64);
impl_element!(i32, I32);
impl_element!(i64, I64);
impl_element!(u8, U8);
impl_element!(u64, U64);

/// Typed element storage for an owned buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BufferData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U64(Vec<u64>),
}

impl BufferData {
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::F32(_) => ElementType::F32,
            Self::F64(_) => ElementType::F64,
            Self::I32(_) => ElementType::I32,
            Self::I64(_) => ElementType::I64,
            Self::U8(_) => ElementType::U8,
            Self::U64(_) => ElementType::U64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::U8(v) => v.len(),
            Self::U64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw native-endian bytes of the elements.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::F32(v) => bytemuck::cast_slice(v),
            Self::F64(v) => bytemuck::cast_slice(v),
            Self::I32(v) => bytemuck::cast_slice(v),
            Self::I64(v) => bytemuck::cast_slice(v),
            Self::U8(v) => v.as_slice(),
            Self::U64(v) => bytemuck::cast_slice(v),
        }
    }
}

/// Number of elements implied by `shape`, or `None` on overflow.
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

/// An owned n-dimensional numeric buffer.
///
/// The shape always covers exactly the stored elements, including buffers
/// decoded from serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBuffer")]
pub struct Buffer {
    shape: Vec<usize>,
    data: BufferData,
}

/// Unchecked wire form of [`Buffer`].
#[derive(Deserialize)]
struct RawBuffer {
    shape: Vec<usize>,
    data: BufferData,
}

impl TryFrom<RawBuffer> for Buffer {
    type Error = XpError;

    fn try_from(raw: RawBuffer) -> XpResult<Self> {
        Buffer::from_data(raw.shape, raw.data)
    }
}

impl Buffer {
    /// Build a buffer, checking that `shape` covers exactly `values.len()` elements.
    pub fn new<T: Element>(shape: Vec<usize>, values: Vec<T>) -> XpResult<Self> {
        Self::from_data(shape, T::into_data(values))
    }

    pub fn from_data(shape: Vec<usize>, data: BufferData) -> XpResult<Self> {
        let expected = element_count(&shape)
            .ok_or_else(|| validation_error!("shape {:?} overflows usize", shape))?;
        if expected != data.len() {
            return Err(validation_error!(
                "shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            ));
        }

        Ok(Self { shape, data })
    }

    /// One-dimensional buffer.
    pub fn vector<T: Element>(values: Vec<T>) -> Self {
        Self {
            shape: vec![values.len()],
            data: T::into_data(values),
        }
    }

    pub fn from_array<T: Element>(array: ArrayD<T>) -> Self {
        let shape = array.shape().to_vec();
        let values: Vec<T> = array.iter().copied().collect();
        Self {
            shape,
            data: T::into_data(values),
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn byte_len(&self) -> usize {
        self.data.as_bytes().len()
    }

    pub fn data(&self) -> &BufferData {
        &self.data
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    pub fn as_buffer_ref(&self) -> BufferRef<'_> {
        BufferRef::new(self.element_type(), &self.shape, self.as_bytes())
    }
}

/// Borrowed, typed view over buffer bytes.
#[derive(Debug, Clone, Copy)]
pub struct BufferRef<'a> {
    element_type: ElementType,
    shape: &'a [usize],
    bytes: &'a [u8],
}

impl<'a> BufferRef<'a> {
    pub fn new(element_type: ElementType, shape: &'a [usize], bytes: &'a [u8]) -> Self {
        Self {
            element_type,
            shape,
            bytes,
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn shape(&self) -> &'a [usize] {
        self.shape
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.bytes.len() / self.element_type.size_of()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reinterpret the bytes as `T` without copying.
    pub fn as_slice<T: Element>(&self) -> XpResult<&'a [T]> {
        if T::TYPE != self.element_type {
            return Err(SharedMemoryError::TypeMismatch {
                actual: self.element_type.to_string(),
                requested: T::TYPE.to_string(),
            }
            .into());
        }
        // empty byte slices carry no alignment guarantee
        if self.bytes.is_empty() {
            return Ok(&[]);
        }

        bytemuck::try_cast_slice(self.bytes).map_err(|e| internal_error!("cannot view bytes as {}: {e}", T::TYPE))
    }

    /// Shaped n-dimensional view, still borrowing the original bytes.
    pub fn array<T: Element>(&self) -> XpResult<ArrayViewD<'a, T>> {
        let values = self.as_slice::<T>()?;
        ArrayViewD::from_shape(IxDyn(self.shape), values)
            .map_err(|e| validation_error!("shape {:?} does not fit buffer: {e}", self.shape))
    }
}

/// One train/test split. Immutable once handed to a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub train_inputs: Buffer,
    pub train_labels: Buffer,
    pub test_inputs: Buffer,
    pub test_labels: Buffer,
}

impl Dataset {
    pub fn new(
        train_inputs: Buffer,
        train_labels: Buffer,
        test_inputs: Buffer,
        test_labels: Buffer,
    ) -> Self {
        Self {
            train_inputs,
            train_labels,
            test_inputs,
            test_labels,
        }
    }

    /// Buffers in field order.
    pub fn buffers(&self) -> [&Buffer; 4] {
        [
            &self.train_inputs,
            &self.train_labels,
            &self.test_inputs,
            &self.test_labels,
        ]
    }

    pub fn byte_len(&self) -> usize {
        self.buffers().iter().map(|b| b.byte_len()).sum()
    }

    pub fn as_dataset_ref(&self) -> DatasetRef<'_> {
        DatasetRef {
            train_inputs: self.train_inputs.as_buffer_ref(),
            train_labels: self.train_labels.as_buffer_ref(),
            test_inputs: self.test_inputs.as_buffer_ref(),
            test_labels: self.test_labels.as_buffer_ref(),
        }
    }
}

/// Borrowed view of a dataset, as handed to evaluators.
#[derive(Debug, Clone, Copy)]
pub struct DatasetRef<'a> {
    pub train_inputs: BufferRef<'a>,
    pub train_labels: BufferRef<'a>,
    pub test_inputs: BufferRef<'a>,
    pub test_labels: BufferRef<'a>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn buffer_rejects_mismatched_shape() {
        let err = Buffer::new(vec![2, 3], vec![1.0f32; 5]).unwrap_err();
        assert!(matches!(err, XpError::Validation(_)));

        let ok = Buffer::new(vec![2, 3], vec![1.0f32; 6]).unwrap();
        assert_eq!(ok.len(), 6);
        assert_eq!(ok.byte_len(), 24);
        assert_eq!(ok.element_type(), ElementType::F32);
    }

    #[test]
    fn zero_sized_dimension_is_empty() {
        let buffer = Buffer::new::<f64>(vec![0, 4], Vec::new()).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(buffer.byte_len(), 0);
        assert!(buffer.as_buffer_ref().as_slice::<f64>().unwrap().is_empty());
    }

    #[test]
    fn buffer_ref_views_without_copy() {
        let buffer = Buffer::new(vec![2, 2], vec![1i64, 2, 3, 4]).unwrap();
        let view = buffer.as_buffer_ref();

        let slice = view.as_slice::<i64>().unwrap();
        assert_eq!(slice, &[1, 2, 3, 4]);
        assert_eq!(slice.as_ptr() as *const u8, buffer.as_bytes().as_ptr());

        let array = view.array::<i64>().unwrap();
        assert_eq!(array.shape(), &[2, 2]);
        assert_eq!(array[[1, 0]], 3);
    }

    #[test]
    fn buffer_ref_rejects_wrong_type() {
        let buffer = Buffer::vector(vec![1u8, 2, 3]);
        let err = buffer.as_buffer_ref().as_slice::<f32>().unwrap_err();
        assert!(matches!(
            err,
            XpError::Shared(SharedMemoryError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn from_array_keeps_logical_order() {
        let array = Array2::from_shape_vec((2, 3), vec![0.0f64, 1.0, 2.0, 3.0, 4.0, 5.0])
            .unwrap()
            .reversed_axes()
            .into_dyn();
        let buffer = Buffer::from_array(array.clone());

        assert_eq!(buffer.shape(), &[3, 2]);
        let view = buffer.as_buffer_ref();
        assert_eq!(view.array::<f64>().unwrap(), array.view());
    }

    #[test]
    fn decoding_checks_shape_against_data() {
        let err = serde_json::from_str::<Buffer>(r#"{"shape":[5],"data":{"F32":[1.0,2.0,3.0]}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("needs 5 elements, got 3"));

        let buffer: Buffer =
            serde_json::from_str(r#"{"shape":[3],"data":{"F32":[1.0,2.0,3.0]}}"#).unwrap();
        assert_eq!(buffer.shape(), &[3]);
        assert_eq!(buffer.byte_len(), 12);

        let encoded = serde_json::to_string(&buffer).unwrap();
        assert_eq!(serde_json::from_str::<Buffer>(&encoded).unwrap(), buffer);
    }

    #[test]
    fn element_count_detects_overflow() {
        assert_eq!(element_count(&[3, 4, 5]), Some(60));
        assert_eq!(element_count(&[]), Some(1));
        assert_eq!(element_count(&[usize::MAX, 2]), None);
    }
}
