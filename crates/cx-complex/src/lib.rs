#![forbid(unsafe_code)]

//! Reinterprets real blob storage whose trailing axis has size 2
//! (`[.., 0]` real part, `[.., 1]` imaginary part) as a sequence of complex
//! scalars with that axis removed.
//!
//! Views alias the blob's buffers; nothing is copied. Writers call the
//! matching [`ComplexSync`] hook once they are done so that storage which
//! cannot alias still ends up holding the latest values.

use bytemuck::PodCastError;
use cx_core::{Blob, BlobError, Real};
use log::trace;
use num_complex::Complex;
use thiserror::Error;

/// Size of the trailing axis holding the real and imaginary parts.
pub const COMPLEX_AXIS_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComplexViewError {
    #[error("blob {index} with shape {shape:?} is not complex: trailing axis must be 2")]
    NotComplex { index: usize, shape: Vec<usize> },
    #[error("{what}: element count {lhs} does not match {rhs}")]
    CountMismatch {
        what: &'static str,
        lhs: usize,
        rhs: usize,
    },
    #[error("blob {index} storage cannot be viewed as complex: {reason:?}")]
    Cast { index: usize, reason: PodCastError },
    #[error(transparent)]
    Blob(#[from] BlobError),
}

/// How a layer derives its output shape from a complex input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRule {
    /// One real scalar per complex input element.
    DropComplexAxis,
    /// One complex scalar per complex input element.
    KeepComplexAxis,
}

/// Write-back hooks called after writing through a complex view.
pub trait ComplexSync<T: Real> {
    fn commit_complex_output(
        &self,
        top: &mut Blob<T>,
        index: usize,
    ) -> Result<(), ComplexViewError>;

    fn commit_complex_diff(
        &self,
        bottom: &mut Blob<T>,
        index: usize,
    ) -> Result<(), ComplexViewError>;
}

/// Host storage where complex views alias the real buffers, so both hooks
/// have nothing to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AliasedStorage;

impl<T: Real> ComplexSync<T> for AliasedStorage {
    fn commit_complex_output(
        &self,
        top: &mut Blob<T>,
        index: usize,
    ) -> Result<(), ComplexViewError> {
        trace!("commit complex output top[{index}] count={}", top.count());
        Ok(())
    }

    fn commit_complex_diff(
        &self,
        bottom: &mut Blob<T>,
        index: usize,
    ) -> Result<(), ComplexViewError> {
        trace!("commit complex diff bottom[{index}] count={}", bottom.count());
        Ok(())
    }
}

#[must_use]
pub fn is_complex_shape(shape: &[usize]) -> bool {
    shape.last() == Some(&COMPLEX_AXIS_LEN)
}

pub fn ensure_complex<T: Real>(blob: &Blob<T>, index: usize) -> Result<(), ComplexViewError> {
    if !is_complex_shape(blob.shape()) {
        return Err(ComplexViewError::NotComplex {
            index,
            shape: blob.shape().to_vec(),
        });
    }
    Ok(())
}

/// Number of complex elements held by a complex blob.
pub fn complex_count<T: Real>(blob: &Blob<T>, index: usize) -> Result<usize, ComplexViewError> {
    ensure_complex(blob, index)?;
    Ok(blob.count() / COMPLEX_AXIS_LEN)
}

pub fn ensure_same_count(
    what: &'static str,
    lhs: usize,
    rhs: usize,
) -> Result<(), ComplexViewError> {
    if lhs != rhs {
        return Err(ComplexViewError::CountMismatch { what, lhs, rhs });
    }
    Ok(())
}

/// Output shape for a complex input of shape `input_shape`.
pub fn complex_output_shape(
    input_shape: &[usize],
    rule: OutputRule,
    index: usize,
) -> Result<Vec<usize>, ComplexViewError> {
    if !is_complex_shape(input_shape) {
        return Err(ComplexViewError::NotComplex {
            index,
            shape: input_shape.to_vec(),
        });
    }
    let mut shape = input_shape.to_vec();
    if rule == OutputRule::DropComplexAxis {
        shape.pop();
    }
    Ok(shape)
}

/// Resizes `top` in place to the output shape implied by `bottom` and `rule`.
pub fn reshape_top<T: Real>(
    bottom: &Blob<T>,
    top: &mut Blob<T>,
    rule: OutputRule,
    index: usize,
) -> Result<(), ComplexViewError> {
    let shape = complex_output_shape(bottom.shape(), rule, index)?;
    top.reshape(shape)?;
    Ok(())
}

fn as_complex<T: Real>(values: &[T], index: usize) -> Result<&[Complex<T>], ComplexViewError> {
    bytemuck::try_cast_slice(values).map_err(|reason| ComplexViewError::Cast { index, reason })
}

fn as_complex_mut<T: Real>(
    values: &mut [T],
    index: usize,
) -> Result<&mut [Complex<T>], ComplexViewError> {
    bytemuck::try_cast_slice_mut(values).map_err(|reason| ComplexViewError::Cast { index, reason })
}

/// Read-only complex view of the value buffer.
pub fn complex_data<T: Real>(
    blob: &Blob<T>,
    index: usize,
) -> Result<&[Complex<T>], ComplexViewError> {
    ensure_complex(blob, index)?;
    as_complex(blob.data(), index)
}

/// Writable complex view of the value buffer, for layers with complex output.
pub fn complex_data_mut<T: Real>(
    blob: &mut Blob<T>,
    index: usize,
) -> Result<&mut [Complex<T>], ComplexViewError> {
    ensure_complex(blob, index)?;
    as_complex_mut(blob.data_mut(), index)
}

/// Read-only complex view of the gradient buffer.
pub fn complex_diff<T: Real>(
    blob: &Blob<T>,
    index: usize,
) -> Result<&[Complex<T>], ComplexViewError> {
    ensure_complex(blob, index)?;
    as_complex(blob.diff(), index)
}

/// Writable complex view of the gradient buffer.
pub fn complex_diff_mut<T: Real>(
    blob: &mut Blob<T>,
    index: usize,
) -> Result<&mut [Complex<T>], ComplexViewError> {
    ensure_complex(blob, index)?;
    as_complex_mut(blob.diff_mut(), index)
}

/// Complex values for reading together with the complex gradient for writing,
/// as needed by a backward pass over the same input blob.
pub fn complex_data_and_diff_mut<T: Real>(
    blob: &mut Blob<T>,
    index: usize,
) -> Result<(&[Complex<T>], &mut [Complex<T>]), ComplexViewError> {
    ensure_complex(blob, index)?;
    let (data, diff) = blob.data_and_diff_mut();
    Ok((as_complex(data, index)?, as_complex_mut(diff, index)?))
}
