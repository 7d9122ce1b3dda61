#![forbid(unsafe_code)]

//! Complex-valued elementwise activation layers.
//!
//! Inputs are real blobs whose trailing axis of size 2 holds the real and
//! imaginary parts. Backward passes deposit the Wirtinger derivative with
//! respect to the conjugate input, `∂L/∂z̄ = ½(∂L/∂x + i·∂L/∂y)`, into the
//! input gradient viewed as complex.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use cx_complex::{
    AliasedStorage, ComplexSync, ComplexViewError, OutputRule, complex_data,
    complex_data_and_diff_mut, ensure_same_count, reshape_top,
};
use cx_core::{Blob, Real};
use cx_kernel_cpu::{KernelError, VmlElement, axpby, vexp};
use cx_serialize::LayerParameter;
use log::{debug, trace};
use num_complex::Complex;
use num_traits::NumCast;
use thiserror::Error;

pub const COMPLEX_IGAUSSIAN: &str = "ComplexIGaussian";
pub const COMPLEX_SIGLOG: &str = "ComplexSiglog";

/// Real scalar kinds the complex layers run on.
pub trait LayerScalar: Real + VmlElement {}

impl<T: Real + VmlElement> LayerScalar for T {}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LayerError {
    #[error("{layer}: missing parameter block '{block}'")]
    MissingParameter {
        layer: &'static str,
        block: &'static str,
    },
    #[error("{layer}: parameter {name}={value} is invalid: {reason}")]
    InvalidParameter {
        layer: &'static str,
        name: &'static str,
        value: f64,
        reason: &'static str,
    },
    #[error("{layer}: definition names type '{found}'")]
    TypeMismatch { layer: &'static str, found: String },
    #[error("{layer}: used before setup")]
    NotSetUp { layer: &'static str },
    #[error("{layer}: expected {expected} {side} blob(s), got {actual}")]
    BlobCount {
        layer: &'static str,
        side: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{layer}: propagate_down has {actual} entries for {expected} bottom blob(s)")]
    PropagateDownLength {
        layer: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{layer}: no formula installed")]
    FormulaUnavailable { layer: &'static str },
    #[error("unknown layer type '{layer_type}'")]
    UnknownType { layer_type: String },
    #[error("layer type '{layer_type}' is already registered")]
    DuplicateType { layer_type: String },
    #[error(transparent)]
    View(#[from] ComplexViewError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// Capability interface every layer exposes to the executor.
///
/// The executor calls [`setup`](Layer::setup) once, [`reshape`](Layer::reshape)
/// whenever input shapes change, then alternates `forward` and `backward`.
/// Any error is terminal for the network; none of these calls is retried.
pub trait Layer<T: LayerScalar> {
    /// Stable type name used for registration.
    fn layer_type(&self) -> &'static str;

    fn exact_num_bottom_blobs(&self) -> usize {
        1
    }

    fn exact_num_top_blobs(&self) -> usize {
        1
    }

    /// Reads the layer's scalar parameters once.
    fn setup(&mut self, param: &LayerParameter) -> Result<(), LayerError>;

    fn reshape(&self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<(), LayerError>;

    fn forward(&self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<(), LayerError>;

    /// Inputs whose `propagate_down` entry is false keep their gradient
    /// buffers untouched.
    fn backward(
        &self,
        top: &[Blob<T>],
        propagate_down: &[bool],
        bottom: &mut [Blob<T>],
    ) -> Result<(), LayerError>;
}

fn check_blob_counts(
    layer: &'static str,
    expected_bottom: usize,
    bottom: usize,
    expected_top: usize,
    top: usize,
) -> Result<(), LayerError> {
    if bottom != expected_bottom {
        return Err(LayerError::BlobCount {
            layer,
            side: "bottom",
            expected: expected_bottom,
            actual: bottom,
        });
    }
    if top != expected_top {
        return Err(LayerError::BlobCount {
            layer,
            side: "top",
            expected: expected_top,
            actual: top,
        });
    }
    Ok(())
}

fn check_propagate_down(
    layer: &'static str,
    propagate_down: &[bool],
    bottom: usize,
) -> Result<(), LayerError> {
    if propagate_down.len() != bottom {
        return Err(LayerError::PropagateDownLength {
            layer,
            expected: bottom,
            actual: propagate_down.len(),
        });
    }
    Ok(())
}

fn ensure_layer_type(layer: &'static str, param: &LayerParameter) -> Result<(), LayerError> {
    if param.layer_type != layer {
        return Err(LayerError::TypeMismatch {
            layer,
            found: param.layer_type.clone(),
        });
    }
    Ok(())
}

fn cast_param<T: LayerScalar>(
    layer: &'static str,
    name: &'static str,
    value: f64,
) -> Result<T, LayerError> {
    match <T as NumCast>::from(value) {
        Some(cast) if cast.is_finite() => Ok(cast),
        _ => Err(LayerError::InvalidParameter {
            layer,
            name,
            value,
            reason: "not representable as a finite value",
        }),
    }
}

/// Energy activation: `f(z) = 1 − exp(−|z|² / 2σ²)`, one real output per
/// complex input, in `[0, 1)`.
///
/// The backward pass reuses the stored output instead of re-evaluating the
/// exponential: `∂f/∂z̄ = (1 − f)·z / 2σ²`.
pub struct ComplexIGaussian<T: LayerScalar, S = AliasedStorage> {
    sigma_sq: Option<T>,
    sync: S,
}

impl<T: LayerScalar> ComplexIGaussian<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_sync(AliasedStorage)
    }

    /// Builds an already set-up layer.
    pub fn with_sigma_sq(sigma_sq: f64) -> Result<Self, LayerError> {
        let mut layer = Self::new();
        layer.sigma_sq = Some(validate_sigma_sq(sigma_sq)?);
        Ok(layer)
    }
}

impl<T: LayerScalar> Default for ComplexIGaussian<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: LayerScalar, S: ComplexSync<T>> ComplexIGaussian<T, S> {
    pub fn with_sync(sync: S) -> Self {
        Self {
            sigma_sq: None,
            sync,
        }
    }

    #[must_use]
    pub fn sigma_sq(&self) -> Option<T> {
        self.sigma_sq
    }

    fn two_sigma_sq(&self) -> Result<T, LayerError> {
        let sigma_sq = self.sigma_sq.ok_or(LayerError::NotSetUp {
            layer: COMPLEX_IGAUSSIAN,
        })?;
        Ok(sigma_sq + sigma_sq)
    }
}

impl<T: LayerScalar, S> fmt::Debug for ComplexIGaussian<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComplexIGaussian")
            .field("sigma_sq", &self.sigma_sq)
            .finish_non_exhaustive()
    }
}

fn validate_sigma_sq<T: LayerScalar>(sigma_sq: f64) -> Result<T, LayerError> {
    let cast: T = cast_param(COMPLEX_IGAUSSIAN, "sigma_sq", sigma_sq)?;
    if cast <= <T as VmlElement>::zero() {
        return Err(LayerError::InvalidParameter {
            layer: COMPLEX_IGAUSSIAN,
            name: "sigma_sq",
            value: sigma_sq,
            reason: "must be positive",
        });
    }
    Ok(cast)
}

impl<T: LayerScalar, S: ComplexSync<T>> Layer<T> for ComplexIGaussian<T, S> {
    fn layer_type(&self) -> &'static str {
        COMPLEX_IGAUSSIAN
    }

    fn setup(&mut self, param: &LayerParameter) -> Result<(), LayerError> {
        ensure_layer_type(COMPLEX_IGAUSSIAN, param)?;
        let block = param
            .complex_igaussian_param
            .ok_or(LayerError::MissingParameter {
                layer: COMPLEX_IGAUSSIAN,
                block: "complex_igaussian_param",
            })?;
        self.sigma_sq = Some(validate_sigma_sq(block.sigma_sq)?);
        debug!(
            "{COMPLEX_IGAUSSIAN} '{}' set up with sigma_sq={}",
            param.name, block.sigma_sq
        );
        Ok(())
    }

    fn reshape(&self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<(), LayerError> {
        check_blob_counts(COMPLEX_IGAUSSIAN, 1, bottom.len(), 1, top.len())?;
        reshape_top(&bottom[0], &mut top[0], OutputRule::DropComplexAxis, 0)?;
        debug!(
            "{COMPLEX_IGAUSSIAN} reshape bottom={:?} -> top={:?}",
            bottom[0].shape(),
            top[0].shape()
        );
        Ok(())
    }

    fn forward(&self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<(), LayerError> {
        check_blob_counts(COMPLEX_IGAUSSIAN, 1, bottom.len(), 1, top.len())?;
        let two_sigma_sq = self.two_sigma_sq()?;
        let z = complex_data(&bottom[0], 0)?;
        let count = top[0].count();
        ensure_same_count("ComplexIGaussian top vs bottom", count, z.len())?;
        trace!("{COMPLEX_IGAUSSIAN} forward count={count}");

        if count > 0 {
            let one = <T as VmlElement>::one();
            // conj(z)·z is the real |z|², so the exponential is real too.
            let exponent: Vec<T> = z.iter().map(|v| -v.norm_sqr() / two_sigma_sq).collect();
            let mut gauss = vec![<T as VmlElement>::zero(); count];
            vexp(&exponent, &mut gauss)?;

            let top_data = top[0].data_mut();
            top_data.fill(one);
            axpby(-one, &gauss, one, top_data)?;
        }

        self.sync.commit_complex_output(&mut top[0], 0)?;
        Ok(())
    }

    fn backward(
        &self,
        top: &[Blob<T>],
        propagate_down: &[bool],
        bottom: &mut [Blob<T>],
    ) -> Result<(), LayerError> {
        check_blob_counts(COMPLEX_IGAUSSIAN, 1, bottom.len(), 1, top.len())?;
        check_propagate_down(COMPLEX_IGAUSSIAN, propagate_down, bottom.len())?;
        trace!(
            "{COMPLEX_IGAUSSIAN} backward propagate_down={}",
            propagate_down[0]
        );
        if !propagate_down[0] {
            return Ok(());
        }

        let two_sigma_sq = self.two_sigma_sq()?;
        let one = <T as VmlElement>::one();
        let top_data = top[0].data();
        let top_diff = top[0].diff();
        let (z, dz) = complex_data_and_diff_mut(&mut bottom[0], 0)?;
        ensure_same_count("ComplexIGaussian top vs bottom", top_data.len(), z.len())?;

        for (((grad, value), out), out_grad) in dz.iter_mut().zip(z).zip(top_data).zip(top_diff) {
            *grad = *value * (*out_grad * (one - *out) / two_sigma_sq);
        }

        self.sync.commit_complex_diff(&mut bottom[0], 0)?;
        Ok(())
    }
}

/// The four shape-control scalars of [`ComplexSiglog`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiglogParams<T> {
    pub s: T,
    pub d: T,
    pub r: T,
    pub c: T,
}

/// Forward formula and conjugate derivative for [`ComplexSiglog`].
///
/// No formula ships with the layer; one must be installed with
/// [`ComplexSiglog::with_formula`] before the layer can run.
pub trait SiglogFormula<T: LayerScalar>: Send + Sync {
    fn name(&self) -> &str;

    fn value(&self, z: Complex<T>, params: &SiglogParams<T>) -> T;

    /// `∂f/∂z̄` at `z`, given the already computed `value = f(z)`.
    fn conj_derivative(&self, z: Complex<T>, value: T, params: &SiglogParams<T>) -> Complex<T>;
}

/// Four-parameter sigmoid-log activation producing one real output per
/// complex input.
pub struct ComplexSiglog<T: LayerScalar, S = AliasedStorage> {
    params: Option<SiglogParams<T>>,
    formula: Option<Arc<dyn SiglogFormula<T>>>,
    sync: S,
}

impl<T: LayerScalar> ComplexSiglog<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_sync(AliasedStorage)
    }
}

impl<T: LayerScalar> Default for ComplexSiglog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: LayerScalar, S: ComplexSync<T>> ComplexSiglog<T, S> {
    pub fn with_sync(sync: S) -> Self {
        Self {
            params: None,
            formula: None,
            sync,
        }
    }

    #[must_use]
    pub fn with_formula(mut self, formula: Arc<dyn SiglogFormula<T>>) -> Self {
        self.formula = Some(formula);
        self
    }

    #[must_use]
    pub fn params(&self) -> Option<&SiglogParams<T>> {
        self.params.as_ref()
    }

    fn ready(&self) -> Result<(&SiglogParams<T>, &dyn SiglogFormula<T>), LayerError> {
        let params = self.params.as_ref().ok_or(LayerError::NotSetUp {
            layer: COMPLEX_SIGLOG,
        })?;
        let formula = self
            .formula
            .as_deref()
            .ok_or(LayerError::FormulaUnavailable {
                layer: COMPLEX_SIGLOG,
            })?;
        Ok((params, formula))
    }
}

impl<T: LayerScalar, S> fmt::Debug for ComplexSiglog<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComplexSiglog")
            .field("params", &self.params)
            .field("formula", &self.formula.as_ref().map(|formula| formula.name()))
            .finish_non_exhaustive()
    }
}

impl<T: LayerScalar, S: ComplexSync<T>> Layer<T> for ComplexSiglog<T, S> {
    fn layer_type(&self) -> &'static str {
        COMPLEX_SIGLOG
    }

    fn setup(&mut self, param: &LayerParameter) -> Result<(), LayerError> {
        ensure_layer_type(COMPLEX_SIGLOG, param)?;
        let block = param
            .complex_siglog_param
            .ok_or(LayerError::MissingParameter {
                layer: COMPLEX_SIGLOG,
                block: "complex_siglog_param",
            })?;
        self.params = Some(SiglogParams {
            s: cast_param(COMPLEX_SIGLOG, "s", block.s)?,
            d: cast_param(COMPLEX_SIGLOG, "d", block.d)?,
            r: cast_param(COMPLEX_SIGLOG, "r", block.r)?,
            c: cast_param(COMPLEX_SIGLOG, "c", block.c)?,
        });
        debug!(
            "{COMPLEX_SIGLOG} '{}' set up with s={} d={} r={} c={}",
            param.name, block.s, block.d, block.r, block.c
        );
        Ok(())
    }

    fn reshape(&self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<(), LayerError> {
        check_blob_counts(COMPLEX_SIGLOG, 1, bottom.len(), 1, top.len())?;
        reshape_top(&bottom[0], &mut top[0], OutputRule::DropComplexAxis, 0)?;
        debug!(
            "{COMPLEX_SIGLOG} reshape bottom={:?} -> top={:?}",
            bottom[0].shape(),
            top[0].shape()
        );
        Ok(())
    }

    fn forward(&self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<(), LayerError> {
        check_blob_counts(COMPLEX_SIGLOG, 1, bottom.len(), 1, top.len())?;
        let (params, formula) = self.ready()?;
        let z = complex_data(&bottom[0], 0)?;
        ensure_same_count("ComplexSiglog top vs bottom", top[0].count(), z.len())?;
        trace!(
            "{COMPLEX_SIGLOG} forward count={} formula={}",
            z.len(),
            formula.name()
        );

        for (out, value) in top[0].data_mut().iter_mut().zip(z) {
            *out = formula.value(*value, params);
        }

        self.sync.commit_complex_output(&mut top[0], 0)?;
        Ok(())
    }

    fn backward(
        &self,
        top: &[Blob<T>],
        propagate_down: &[bool],
        bottom: &mut [Blob<T>],
    ) -> Result<(), LayerError> {
        check_blob_counts(COMPLEX_SIGLOG, 1, bottom.len(), 1, top.len())?;
        check_propagate_down(COMPLEX_SIGLOG, propagate_down, bottom.len())?;
        if !propagate_down[0] {
            return Ok(());
        }

        let (params, formula) = self.ready()?;
        let top_data = top[0].data();
        let top_diff = top[0].diff();
        let (z, dz) = complex_data_and_diff_mut(&mut bottom[0], 0)?;
        ensure_same_count("ComplexSiglog top vs bottom", top_data.len(), z.len())?;

        for (((grad, value), out), out_grad) in dz.iter_mut().zip(z).zip(top_data).zip(top_diff) {
            *grad = formula.conj_derivative(*value, *out, params) * *out_grad;
        }

        self.sync.commit_complex_diff(&mut bottom[0], 0)?;
        Ok(())
    }
}

type LayerCreator<T> = Box<dyn Fn() -> Box<dyn Layer<T>> + Send + Sync>;

/// Explicit table from layer type name to constructor, built once at start
/// up.
pub struct LayerRegistry<T: LayerScalar> {
    creators: BTreeMap<String, LayerCreator<T>>,
}

impl<T: LayerScalar> LayerRegistry<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            creators: BTreeMap::new(),
        }
    }

    /// Registry holding `ComplexIGaussian` and `ComplexSiglog`.
    #[must_use]
    pub fn with_builtin_layers() -> Self {
        let mut creators: BTreeMap<String, LayerCreator<T>> = BTreeMap::new();
        creators.insert(
            COMPLEX_IGAUSSIAN.to_string(),
            Box::new(|| Box::new(ComplexIGaussian::<T>::new())),
        );
        creators.insert(
            COMPLEX_SIGLOG.to_string(),
            Box::new(|| Box::new(ComplexSiglog::<T>::new())),
        );
        debug!("layer registry built with {} builtin types", creators.len());
        Self { creators }
    }

    pub fn register<F>(&mut self, layer_type: &str, creator: F) -> Result<(), LayerError>
    where
        F: Fn() -> Box<dyn Layer<T>> + Send + Sync + 'static,
    {
        if self.creators.contains_key(layer_type) {
            return Err(LayerError::DuplicateType {
                layer_type: layer_type.to_string(),
            });
        }
        self.creators
            .insert(layer_type.to_string(), Box::new(creator));
        debug!("registered layer type '{layer_type}'");
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, layer_type: &str) -> bool {
        self.creators.contains_key(layer_type)
    }

    #[must_use]
    pub fn layer_types(&self) -> Vec<&str> {
        self.creators.keys().map(String::as_str).collect()
    }

    /// Instantiates the layer named by `param.layer_type` and runs its setup.
    pub fn create(&self, param: &LayerParameter) -> Result<Box<dyn Layer<T>>, LayerError> {
        let creator =
            self.creators
                .get(&param.layer_type)
                .ok_or_else(|| LayerError::UnknownType {
                    layer_type: param.layer_type.clone(),
                })?;
        let mut layer = creator();
        layer.setup(param)?;
        debug!("created layer '{}' of type '{}'", param.name, param.layer_type);
        Ok(layer)
    }
}

impl<T: LayerScalar> Default for LayerRegistry<T> {
    fn default() -> Self {
        Self::with_builtin_layers()
    }
}
