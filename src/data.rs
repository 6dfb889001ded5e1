use std::fmt::{Debug, Display};
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::BinId;

/// Element type for gradient/hessian pairs. Implemented for `f32` and `f64`;
/// scoring always happens in `f64`.
pub trait FloatData:
    Copy
    + Debug
    + Display
    + PartialOrd
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + AddAssign
    + SubAssign
    + Sum
    + Serialize
    + DeserializeOwned
    + 'static
{
    const ZERO: Self;

    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;
}

impl FloatData for f64 {
    const ZERO: f64 = 0.0;

    #[inline]
    fn from_f64(v: f64) -> f64 {
        v
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }
}

impl FloatData for f32 {
    const ZERO: f32 = 0.0;

    #[inline]
    fn from_f64(v: f64) -> f32 {
        v as f32
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }
}

/// A single training instance after discretization: the loss derivatives at
/// the current prediction plus one bin per selected column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance<H> {
    pub grad: H,
    pub hess: H,
    pub bins: Vec<BinId>,
}

impl<H: FloatData> Instance<H> {
    pub fn new(grad: H, hess: H, bins: Vec<BinId>) -> Self {
        Instance { grad, hess, bins }
    }
}

/// Raw values that are NaN or infinite map to the reserved missing bin.
#[inline]
pub fn is_missing(v: f64) -> bool {
    v.is_nan() || v.is_infinite()
}
