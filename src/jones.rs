// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Code for 2x2 Jones matrix math.

It's not ideal to use LAPACK for matrix multiplies or inverses, because it is
not possible to optimise only for 2x2 matrices. Here, we supply the math for
these special cases.

The elements are stored in row-major order, which matches the order of the
correlation products (xx, xy, yx, yy).
 */

use crate::c64;

#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub struct Jones([c64; 4]);

const JONES_ZERO: Jones = Jones([c64::new(0.0, 0.0); 4]);

const JONES_IDENTITY: Jones = Jones([
    c64::new(1.0, 0.0),
    c64::new(0.0, 0.0),
    c64::new(0.0, 0.0),
    c64::new(1.0, 0.0),
]);

impl Jones {
    pub fn identity() -> Self {
        JONES_IDENTITY
    }

    pub fn zero() -> Self {
        JONES_ZERO
    }

    pub fn nan() -> Self {
        Jones([c64::new(f64::NAN, f64::NAN); 4])
    }

    /// A diagonal Jones matrix, i.e. one with no leakage terms.
    pub fn diagonal(x: c64, y: c64) -> Self {
        Jones([x, c64::new(0.0, 0.0), c64::new(0.0, 0.0), y])
    }

    /// From an input Jones matrix, get a copy that has been Hermitian
    /// conjugated (J^H).
    ///
    /// # Examples
    ///
    /// ```
    /// # use stefcal::{c64, Jones};
    /// # use approx::assert_abs_diff_eq;
    /// let j = Jones::from([
    ///     c64::new(1.0, 2.0),
    ///     c64::new(3.0, 4.0),
    ///     c64::new(5.0, 6.0),
    ///     c64::new(7.0, 8.0),
    /// ]);
    /// let jh = j.h();
    /// let expected = Jones::from([
    ///     c64::new(1.0, -2.0),
    ///     c64::new(5.0, -6.0),
    ///     c64::new(3.0, -4.0),
    ///     c64::new(7.0, -8.0),
    /// ]);
    /// assert_abs_diff_eq!(jh, expected, epsilon = 1e-10);
    /// ```
    #[inline(always)]
    pub fn h(&self) -> Self {
        Self::from([
            self[0].conj(),
            self[2].conj(),
            self[1].conj(),
            self[3].conj(),
        ])
    }

    /// Multiply by a Jones matrix which gets Hermitian conjugated (J^H).
    #[inline(always)]
    pub fn mul_hermitian(&self, b: &Self) -> Self {
        *self * b.h()
    }

    /// Get the inverse of the Jones matrix (J^I).
    ///
    /// Ideally, J^I . J = I. However it's possible that J is singular, in which
    /// case the contents of J^I are all NaN.
    #[inline(always)]
    pub fn inv(&self) -> Self {
        let mut inv = JONES_ZERO;
        let a = self;
        let inv_det = 1.0 / (a[0] * a[3] - a[1] * a[2]);
        inv[0] = inv_det * a[3];
        inv[1] = -inv_det * a[1];
        inv[2] = -inv_det * a[2];
        inv[3] = inv_det * a[0];
        inv
    }

    /// Calculate J1 . A . J2^H.
    #[inline(always)]
    pub fn sandwich(j1: &Jones, a: &Jones, j2: &Jones) -> Jones {
        (*j1 * a).mul_hermitian(j2)
    }

    /// Are any of the elements NaN (or infinite)?
    #[inline]
    pub fn any_nan(&self) -> bool {
        self.iter().any(|e| !e.re.is_finite() || !e.im.is_finite())
    }

    /// The largest absolute value of any element.
    #[inline]
    pub fn norm_max(&self) -> f64 {
        self.iter().fold(0.0_f64, |acc, e| acc.max(e.norm()))
    }
}

impl std::ops::Deref for Jones {
    type Target = [c64; 4];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for Jones {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<[c64; 4]> for Jones {
    fn from(arr: [c64; 4]) -> Self {
        Self(arr)
    }
}

impl std::ops::Add<Jones> for Jones {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: Jones) -> Self {
        let a = self.0;
        Jones([a[0] + rhs[0], a[1] + rhs[1], a[2] + rhs[2], a[3] + rhs[3]])
    }
}

impl std::ops::AddAssign<Jones> for Jones {
    #[inline(always)]
    fn add_assign(&mut self, rhs: Jones) {
        self[0] += rhs[0];
        self[1] += rhs[1];
        self[2] += rhs[2];
        self[3] += rhs[3];
    }
}

impl std::ops::Sub<Jones> for Jones {
    type Output = Self;

    #[inline(always)]
    fn sub(self, rhs: Jones) -> Self {
        let a = self.0;
        Jones([a[0] - rhs[0], a[1] - rhs[1], a[2] - rhs[2], a[3] - rhs[3]])
    }
}

impl std::ops::SubAssign<Jones> for Jones {
    #[inline(always)]
    fn sub_assign(&mut self, rhs: Jones) {
        self[0] -= rhs[0];
        self[1] -= rhs[1];
        self[2] -= rhs[2];
        self[3] -= rhs[3];
    }
}

impl std::ops::Mul<Jones> for Jones {
    type Output = Self;

    #[inline(always)]
    fn mul(self, rhs: Jones) -> Self {
        self * &rhs
    }
}

impl std::ops::Mul<&Jones> for Jones {
    type Output = Self;

    #[inline(always)]
    fn mul(self, rhs: &Jones) -> Self {
        let mut c = JONES_ZERO;
        let a = self.0;
        let b = rhs;
        c[0] = a[0] * b[0] + a[1] * b[2];
        c[1] = a[0] * b[1] + a[1] * b[3];
        c[2] = a[2] * b[0] + a[3] * b[2];
        c[3] = a[2] * b[1] + a[3] * b[3];
        c
    }
}

impl std::ops::MulAssign<Jones> for Jones {
    #[inline(always)]
    fn mul_assign(&mut self, rhs: Jones) {
        *self = *self * &rhs;
    }
}

impl std::ops::Mul<f64> for Jones {
    type Output = Self;

    #[inline(always)]
    fn mul(self, rhs: f64) -> Self {
        let mut a = self.0;
        a[0] *= rhs;
        a[1] *= rhs;
        a[2] *= rhs;
        a[3] *= rhs;
        Jones(a)
    }
}

impl std::ops::Mul<c64> for Jones {
    type Output = Self;

    #[inline(always)]
    fn mul(self, rhs: c64) -> Self {
        let mut a = self.0;
        a[0] *= rhs;
        a[1] *= rhs;
        a[2] *= rhs;
        a[3] *= rhs;
        Jones(a)
    }
}

/// "Divide" by a Jones matrix, i.e. multiply by its inverse.
impl std::ops::Div<&Jones> for Jones {
    type Output = Self;

    #[inline(always)]
    fn div(self, rhs: &Jones) -> Self {
        self * rhs.inv()
    }
}

impl num_traits::Zero for Jones {
    #[inline]
    fn zero() -> Self {
        Jones::zero()
    }

    #[inline]
    fn is_zero(&self) -> bool {
        *self == Jones::zero()
    }
}

impl approx::AbsDiffEq for Jones {
    type Epsilon = f64;

    fn default_epsilon() -> f64 {
        f64::EPSILON
    }

    #[inline]
    fn abs_diff_eq(&self, other: &Self, epsilon: f64) -> bool {
        (self[0] - other[0]).norm() <= epsilon
            && (self[1] - other[1]).norm() <= epsilon
            && (self[2] - other[2]).norm() <= epsilon
            && (self[3] - other[3]).norm() <= epsilon
    }
}
