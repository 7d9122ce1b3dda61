#![forbid(unsafe_code)]

//! Elementwise vector math with vendor VML/BLAS naming (`vsqr`, `vexp`,
//! `axpby`, ...) for `f32`, `f64`, [`Complex32`] and [`Complex64`].
//!
//! Every routine is a single pass over caller-owned slices with no blocking
//! or threading; it stands in for an accelerated library when none is linked.

use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Sub};

use num_complex::Complex;
pub use num_complex::{Complex32, Complex64};
use num_traits::Float;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("{op}: element count must be positive")]
    Empty { op: &'static str },
    #[error("{op}: {side} has {actual} elements, expected {expected}")]
    LengthMismatch {
        op: &'static str,
        side: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Scalar kinds the shim operates on.
pub trait VmlElement:
    Copy
    + Debug
    + PartialEq
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
{
    fn zero() -> Self;
    fn one() -> Self;

    fn sqr(self) -> Self {
        self * self
    }

    fn exp(self) -> Self;
    fn ln(self) -> Self;

    /// Magnitude. Complex kinds carry it in the real part with a zero
    /// imaginary part.
    fn abs(self) -> Self;

    fn powx(self, exponent: Self) -> Self;
}

impl VmlElement for f32 {
    fn zero() -> Self {
        0.0
    }

    fn one() -> Self {
        1.0
    }

    fn exp(self) -> Self {
        f32::exp(self)
    }

    fn ln(self) -> Self {
        f32::ln(self)
    }

    fn abs(self) -> Self {
        f32::abs(self)
    }

    fn powx(self, exponent: Self) -> Self {
        f32::powf(self, exponent)
    }
}

impl VmlElement for f64 {
    fn zero() -> Self {
        0.0
    }

    fn one() -> Self {
        1.0
    }

    fn exp(self) -> Self {
        f64::exp(self)
    }

    fn ln(self) -> Self {
        f64::ln(self)
    }

    fn abs(self) -> Self {
        f64::abs(self)
    }

    fn powx(self, exponent: Self) -> Self {
        f64::powf(self, exponent)
    }
}

impl<T> VmlElement for Complex<T>
where
    T: Float + Debug + Send + Sync + 'static,
{
    fn zero() -> Self {
        Complex::new(T::zero(), T::zero())
    }

    fn one() -> Self {
        Complex::new(T::one(), T::zero())
    }

    fn exp(self) -> Self {
        Complex::exp(self)
    }

    fn ln(self) -> Self {
        Complex::ln(self)
    }

    fn abs(self) -> Self {
        Complex::new(self.norm(), T::zero())
    }

    fn powx(self, exponent: Self) -> Self {
        self.powc(exponent)
    }
}

fn ensure_len(
    op: &'static str,
    side: &'static str,
    expected: usize,
    actual: usize,
) -> Result<(), KernelError> {
    if expected != actual {
        return Err(KernelError::LengthMismatch {
            op,
            side,
            expected,
            actual,
        });
    }
    Ok(())
}

fn unary<T, F>(op: &'static str, a: &[T], y: &mut [T], f: F) -> Result<(), KernelError>
where
    T: VmlElement,
    F: Fn(T) -> T,
{
    if a.is_empty() {
        return Err(KernelError::Empty { op });
    }
    ensure_len(op, "y", a.len(), y.len())?;
    for (out, value) in y.iter_mut().zip(a) {
        *out = f(*value);
    }
    Ok(())
}

fn binary<T, F>(op: &'static str, a: &[T], b: &[T], y: &mut [T], f: F) -> Result<(), KernelError>
where
    T: VmlElement,
    F: Fn(T, T) -> T,
{
    if a.is_empty() {
        return Err(KernelError::Empty { op });
    }
    ensure_len(op, "b", a.len(), b.len())?;
    ensure_len(op, "y", a.len(), y.len())?;
    for ((out, lhs), rhs) in y.iter_mut().zip(a).zip(b) {
        *out = f(*lhs, *rhs);
    }
    Ok(())
}

/// `y[i] = a[i] * a[i]`
pub fn vsqr<T: VmlElement>(a: &[T], y: &mut [T]) -> Result<(), KernelError> {
    unary("vsqr", a, y, T::sqr)
}

/// `y[i] = exp(a[i])`
pub fn vexp<T: VmlElement>(a: &[T], y: &mut [T]) -> Result<(), KernelError> {
    unary("vexp", a, y, T::exp)
}

/// `y[i] = ln(a[i])`
pub fn vln<T: VmlElement>(a: &[T], y: &mut [T]) -> Result<(), KernelError> {
    unary("vln", a, y, T::ln)
}

/// `y[i] = |a[i]|`
pub fn vabs<T: VmlElement>(a: &[T], y: &mut [T]) -> Result<(), KernelError> {
    unary("vabs", a, y, T::abs)
}

/// `y[i] = a[i] ^ b`
pub fn vpowx<T: VmlElement>(a: &[T], b: T, y: &mut [T]) -> Result<(), KernelError> {
    unary("vpowx", a, y, |value| value.powx(b))
}

pub fn vadd<T: VmlElement>(a: &[T], b: &[T], y: &mut [T]) -> Result<(), KernelError> {
    binary("vadd", a, b, y, |lhs, rhs| lhs + rhs)
}

pub fn vsub<T: VmlElement>(a: &[T], b: &[T], y: &mut [T]) -> Result<(), KernelError> {
    binary("vsub", a, b, y, |lhs, rhs| lhs - rhs)
}

pub fn vmul<T: VmlElement>(a: &[T], b: &[T], y: &mut [T]) -> Result<(), KernelError> {
    binary("vmul", a, b, y, |lhs, rhs| lhs * rhs)
}

pub fn vdiv<T: VmlElement>(a: &[T], b: &[T], y: &mut [T]) -> Result<(), KernelError> {
    binary("vdiv", a, b, y, |lhs, rhs| lhs / rhs)
}

/// `x[i] = alpha * x[i]`
pub fn scal<T: VmlElement>(alpha: T, x: &mut [T]) -> Result<(), KernelError> {
    if x.is_empty() {
        return Err(KernelError::Empty { op: "scal" });
    }
    for value in x.iter_mut() {
        *value = alpha * *value;
    }
    Ok(())
}

/// `y[i] = alpha * x[i] + y[i]`
pub fn axpy<T: VmlElement>(alpha: T, x: &[T], y: &mut [T]) -> Result<(), KernelError> {
    if x.is_empty() {
        return Err(KernelError::Empty { op: "axpy" });
    }
    ensure_len("axpy", "y", x.len(), y.len())?;
    for (out, value) in y.iter_mut().zip(x) {
        *out = alpha * *value + *out;
    }
    Ok(())
}

/// `y[i] = alpha * x[i] + beta * y[i]`, synthesized as `scal` then `axpy`
/// since there is no fused primitive to fall back on.
pub fn axpby<T: VmlElement>(alpha: T, x: &[T], beta: T, y: &mut [T]) -> Result<(), KernelError> {
    if x.is_empty() {
        return Err(KernelError::Empty { op: "axpby" });
    }
    ensure_len("axpby", "y", x.len(), y.len())?;
    scal(beta, y)?;
    axpy(alpha, x, y)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    use super::{
        Complex32, Complex64, KernelError, VmlElement, axpby, axpy, scal, vabs, vadd, vdiv, vexp,
        vln, vmul, vpowx, vsqr, vsub,
    };

    fn sample(i: usize) -> f64 {
        // Stays away from zero so division is always defined.
        1.0 + ((i * 37) % 101) as f64 / 25.0
    }

    fn check_arithmetic<T: VmlElement>(
        n: usize,
        make: impl Fn(f64, f64) -> T,
        close: impl Fn(T, T) -> bool,
    ) {
        let a: Vec<T> = (0..n).map(|i| make(sample(i), sample(i + 3))).collect();
        let b: Vec<T> = (0..n).map(|i| make(sample(i + 7), -sample(i + 11))).collect();
        let mut y = vec![T::zero(); n];

        vadd(&a, &b, &mut y).expect("vadd");
        for i in 0..n {
            assert!(close(y[i], a[i] + b[i]), "vadd mismatch at {i}");
        }
        vsub(&a, &b, &mut y).expect("vsub");
        for i in 0..n {
            assert!(close(y[i], a[i] - b[i]), "vsub mismatch at {i}");
        }
        vmul(&a, &b, &mut y).expect("vmul");
        for i in 0..n {
            assert!(close(y[i], a[i] * b[i]), "vmul mismatch at {i}");
        }
        vdiv(&a, &b, &mut y).expect("vdiv");
        for i in 0..n {
            assert!(close(y[i] * b[i], a[i]), "vdiv mismatch at {i}");
        }
    }

    fn close_f32(lhs: f32, rhs: f32) -> bool {
        (lhs - rhs).abs() <= 1e-4 * rhs.abs().max(1.0)
    }

    fn close_f64(lhs: f64, rhs: f64) -> bool {
        (lhs - rhs).abs() <= 1e-10 * rhs.abs().max(1.0)
    }

    fn close_c32(lhs: Complex32, rhs: Complex32) -> bool {
        (lhs - rhs).norm() <= 1e-4 * rhs.norm().max(1.0)
    }

    fn close_c64(lhs: Complex64, rhs: Complex64) -> bool {
        (lhs - rhs).norm() <= 1e-10 * rhs.norm().max(1.0)
    }

    #[test]
    fn square_of_small_reals() {
        let a = [1.0f32, 4.0, 9.0];
        let mut y = [0.0f32; 3];
        vsqr(&a, &mut y).expect("vsqr");
        assert_eq!(y, [1.0, 16.0, 81.0]);
    }

    #[test]
    fn powx_two_matches_square() {
        let a = [1.0f64, 4.0, 9.0];
        let mut squared = [0.0; 3];
        let mut powered = [0.0; 3];
        vsqr(&a, &mut squared).expect("vsqr");
        vpowx(&a, 2.0, &mut powered).expect("vpowx");
        for (p, s) in powered.iter().zip(&squared) {
            assert_relative_eq!(*p, *s, max_relative = 1e-12);
        }

        let c = [
            Complex64::new(1.0, 0.0),
            Complex64::new(0.0, 2.0),
            Complex64::new(3.0, -1.0),
        ];
        let mut csq = [Complex64::zero(); 3];
        let mut cpow = [Complex64::zero(); 3];
        vsqr(&c, &mut csq).expect("complex vsqr");
        vpowx(&c, Complex64::new(2.0, 0.0), &mut cpow).expect("complex vpowx");
        for (p, s) in cpow.iter().zip(&csq) {
            assert!(close_c64(*p, *s), "{p} vs {s}");
        }
    }

    #[test]
    fn exp_and_ln_are_inverse_on_positive_reals() {
        let a: Vec<f64> = (1..=50).map(|i| i as f64 * 0.37).collect();
        let mut e = vec![0.0; a.len()];
        let mut back = vec![0.0; a.len()];
        vexp(&a, &mut e).expect("vexp");
        vln(&e, &mut back).expect("vln");
        for (orig, round) in a.iter().zip(&back) {
            assert_relative_eq!(*orig, *round, max_relative = 1e-12);
        }

        let mut lnf = [0.0f32; 3];
        let mut expf = [0.0f32; 3];
        vln(&[0.5f32, 1.0, 20.0], &mut lnf).expect("vln f32");
        vexp(&lnf, &mut expf).expect("vexp f32");
        assert_relative_eq!(expf[0], 0.5, max_relative = 1e-5);
        assert_relative_eq!(expf[1], 1.0, max_relative = 1e-5);
        assert_relative_eq!(expf[2], 20.0, max_relative = 1e-5);
    }

    #[test]
    fn complex_exp_follows_euler() {
        let a = [Complex64::new(0.0, std::f64::consts::PI)];
        let mut y = [Complex64::zero()];
        vexp(&a, &mut y).expect("vexp");
        assert!(close_c64(y[0], Complex64::new(-1.0, 0.0)), "{}", y[0]);
    }

    #[test]
    fn abs_of_complex_is_magnitude_in_real_part() {
        let a = [Complex32::new(3.0, 4.0), Complex32::new(0.0, -2.0)];
        let mut y = [Complex32::zero(); 2];
        vabs(&a, &mut y).expect("vabs");
        assert_eq!(y, [Complex32::new(5.0, 0.0), Complex32::new(2.0, 0.0)]);

        let mut r = [0.0f64; 2];
        vabs(&[-1.5f64, 2.5], &mut r).expect("real vabs");
        assert_eq!(r, [1.5, 2.5]);
    }

    #[test]
    fn arithmetic_holds_for_all_scalar_kinds() {
        for n in [1usize, 3, 4096] {
            check_arithmetic::<f32>(n, |re, _| re as f32, close_f32);
            check_arithmetic::<f64>(n, |re, _| re, close_f64);
            check_arithmetic::<Complex32>(
                n,
                |re, im| Complex32::new(re as f32, im as f32),
                close_c32,
            );
            check_arithmetic::<Complex64>(n, Complex64::new, close_c64);
        }
    }

    #[test]
    fn axpby_identity_and_copy() {
        let x = [1.0f32, -2.0, 3.5];
        let mut y = [4.0f32, 5.0, -6.0];
        axpby(0.0, &x, 1.0, &mut y).expect("identity");
        assert_eq!(y, [4.0, 5.0, -6.0]);

        axpby(1.0, &x, 0.0, &mut y).expect("copy");
        assert_eq!(y, x);
    }

    #[test]
    fn complex_axpby_combines_scal_and_axpy() {
        let alpha = Complex64::new(0.0, 1.0);
        let beta = Complex64::new(2.0, 0.0);
        let x = [Complex64::new(1.0, 1.0), Complex64::new(-3.0, 0.5)];
        let mut y = [Complex64::new(0.5, -1.0), Complex64::new(2.0, 2.0)];
        let expected: Vec<Complex64> = x
            .iter()
            .zip(&y)
            .map(|(xi, yi)| alpha * *xi + beta * *yi)
            .collect();

        axpby(alpha, &x, beta, &mut y).expect("complex axpby");
        for (got, want) in y.iter().zip(&expected) {
            assert!(close_c64(*got, *want));
        }
    }

    #[test]
    fn scal_and_axpy_match_blas_semantics() {
        let mut x = [1.0f64, 2.0, 3.0];
        scal(-2.0, &mut x).expect("scal");
        assert_eq!(x, [-2.0, -4.0, -6.0]);

        let mut y = [1.0f64, 1.0, 1.0];
        axpy(0.5, &x, &mut y).expect("axpy");
        assert_eq!(y, [0.0, -1.0, -2.0]);
    }

    #[test]
    fn empty_inputs_fail_closed() {
        let empty: [f32; 0] = [];
        let mut out: [f32; 0] = [];
        assert_eq!(vexp(&empty, &mut out), Err(KernelError::Empty { op: "vexp" }));
        assert_eq!(vadd(&empty, &empty, &mut out), Err(KernelError::Empty { op: "vadd" }));
        assert_eq!(scal(1.0, &mut out), Err(KernelError::Empty { op: "scal" }));
        assert_eq!(
            axpby(1.0, &empty, 1.0, &mut out),
            Err(KernelError::Empty { op: "axpby" })
        );
    }

    #[test]
    fn mismatched_lengths_fail_closed() {
        let a = [1.0f64, 2.0];
        let b = [1.0f64];
        let mut y = [0.0f64; 2];
        let err = vmul(&a, &b, &mut y).expect_err("short rhs must fail");
        assert_eq!(
            err,
            KernelError::LengthMismatch {
                op: "vmul",
                side: "b",
                expected: 2,
                actual: 1
            }
        );

        let mut short = [0.0f64; 1];
        assert!(matches!(
            vsqr(&a, &mut short),
            Err(KernelError::LengthMismatch { side: "y", .. })
        ));
        assert!(axpby(1.0, &a, 1.0, &mut short).is_err());
    }

    proptest! {
        #[test]
        fn prop_axpby_identity(y in prop::collection::vec(-1.0e3f64..1.0e3, 1..64)) {
            let x = vec![7.0f64; y.len()];
            let mut out = y.clone();
            axpby(0.0, &x, 1.0, &mut out).expect("axpby");
            prop_assert_eq!(out, y);
        }

        #[test]
        fn prop_sqr_matches_mul(a in prop::collection::vec(-1.0e3f64..1.0e3, 1..64)) {
            let mut sq = vec![0.0; a.len()];
            let mut prod = vec![0.0; a.len()];
            vsqr(&a, &mut sq).expect("vsqr");
            vmul(&a, &a, &mut prod).expect("vmul");
            prop_assert_eq!(sq, prod);
        }
    }
}
