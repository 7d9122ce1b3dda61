#![forbid(unsafe_code)]

use std::fmt::Debug;

use bytemuck::Pod;
use num_traits::Float;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F64,
}

/// Real scalar kinds a [`Blob`] can store.
///
/// `Pod` lets the storage be reinterpreted without copying (for example as
/// interleaved complex pairs).
pub trait Real: Float + Pod + Default + Debug + Send + Sync + 'static {
    const DTYPE: DType;
}

impl Real for f32 {
    const DTYPE: DType = DType::F32;
}

impl Real for f64 {
    const DTYPE: DType = DType::F64;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    #[error("axis {axis} out of range for blob of rank {rank}")]
    AxisOutOfRange { axis: isize, rank: usize },
    #[error("element count overflows usize for shape {shape:?}")]
    CountOverflow { shape: Vec<usize> },
    #[error("buffer of length {actual} does not fit shape {shape:?} (expected {expected})")]
    LengthMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },
}

/// N-dimensional real tensor with a value buffer and a gradient buffer of
/// identical shape. Storage is always contiguous in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob<T: Real> {
    shape: Vec<usize>,
    strides: Vec<usize>,
    data: Vec<T>,
    diff: Vec<T>,
}

impl<T: Real> Blob<T> {
    /// Zero-filled blob of the given shape.
    pub fn new(shape: Vec<usize>) -> Result<Self, BlobError> {
        let count = checked_count(&shape)?;
        Ok(Self {
            strides: contiguous_strides(&shape),
            shape,
            data: vec![T::zero(); count],
            diff: vec![T::zero(); count],
        })
    }

    pub fn from_data(shape: Vec<usize>, data: Vec<T>) -> Result<Self, BlobError> {
        let count = checked_count(&shape)?;
        if data.len() != count {
            return Err(BlobError::LengthMismatch {
                shape,
                expected: count,
                actual: data.len(),
            });
        }
        Ok(Self {
            strides: contiguous_strides(&shape),
            shape,
            data,
            diff: vec![T::zero(); count],
        })
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    #[must_use]
    pub fn num_axes(&self) -> usize {
        self.shape.len()
    }

    /// Number of real scalars held in each buffer.
    #[must_use]
    pub fn count(&self) -> usize {
        self.data.len()
    }

    /// Maps a possibly negative axis (`-1` is the last axis) to its position.
    pub fn canonical_axis(&self, axis: isize) -> Result<usize, BlobError> {
        let rank = self.shape.len();
        let resolved = if axis < 0 {
            rank.checked_sub(axis.unsigned_abs())
        } else {
            Some(axis.unsigned_abs())
        };
        match resolved {
            Some(index) if index < rank => Ok(index),
            _ => Err(BlobError::AxisOutOfRange { axis, rank }),
        }
    }

    pub fn shape_at(&self, axis: isize) -> Result<usize, BlobError> {
        let index = self.canonical_axis(axis)?;
        Ok(self.shape[index])
    }

    /// Resizes both buffers to `shape` in place.
    ///
    /// Values survive when the element count is unchanged; new elements are
    /// zero.
    pub fn reshape(&mut self, shape: Vec<usize>) -> Result<(), BlobError> {
        let count = checked_count(&shape)?;
        self.data.resize(count, T::zero());
        self.diff.resize(count, T::zero());
        self.strides = contiguous_strides(&shape);
        self.shape = shape;
        Ok(())
    }

    pub fn reshape_like(&mut self, other: &Self) -> Result<(), BlobError> {
        self.reshape(other.shape.clone())
    }

    #[must_use]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    #[must_use]
    pub fn diff(&self) -> &[T] {
        &self.diff
    }

    pub fn diff_mut(&mut self) -> &mut [T] {
        &mut self.diff
    }

    /// Borrows the value buffer for reading and the gradient buffer for
    /// writing at the same time.
    pub fn data_and_diff_mut(&mut self) -> (&[T], &mut [T]) {
        (&self.data, &mut self.diff)
    }

    pub fn set_data(&mut self, values: &[T]) -> Result<(), BlobError> {
        copy_checked(&self.shape, values, &mut self.data)
    }

    pub fn set_diff(&mut self, values: &[T]) -> Result<(), BlobError> {
        copy_checked(&self.shape, values, &mut self.diff)
    }

    pub fn fill_diff(&mut self, value: T) {
        self.diff.fill(value);
    }
}

fn copy_checked<T: Real>(shape: &[usize], values: &[T], dst: &mut [T]) -> Result<(), BlobError> {
    if values.len() != dst.len() {
        return Err(BlobError::LengthMismatch {
            shape: shape.to_vec(),
            expected: dst.len(),
            actual: values.len(),
        });
    }
    dst.copy_from_slice(values);
    Ok(())
}

/// Element count of `shape`; a rank-0 shape holds one element.
pub fn checked_count(shape: &[usize]) -> Result<usize, BlobError> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| BlobError::CountOverflow {
            shape: shape.to_vec(),
        })
}

#[must_use]
pub fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    if shape.is_empty() {
        return Vec::new();
    }

    let mut strides = vec![1; shape.len()];
    let mut running = 1usize;
    for idx in (0..shape.len()).rev() {
        strides[idx] = running;
        running = running.saturating_mul(shape[idx]);
    }
    strides
}
