//! Observed values that may be missing.
//!
//! A [`Metric`] is either a value that was actually read from the device, or
//! [`Metric::Unknown`]. Samplers never default an unobserved field to zero:
//! "0 % GPU load" and "no GPU load counter" must stay distinguishable all the
//! way to the wire.
//!
//! On the wire, unknown numbers are `-1`, unknown strings are `"Unknown"` and
//! unknown booleans are `null`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};

/// Text reported for any string field that could not be observed.
pub const UNKNOWN: &str = "Unknown";

/// A value together with its observability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric<T> {
    Known(T),
    Unknown,
}

impl<T> Default for Metric<T> {
    fn default() -> Self {
        Self::Unknown
    }
}

impl<T> From<Option<T>> for Metric<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::Known(v),
            None => Self::Unknown,
        }
    }
}

impl<T> Metric<T> {
    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    pub fn as_ref(&self) -> Metric<&T> {
        match self {
            Self::Known(v) => Metric::Known(v),
            Self::Unknown => Metric::Unknown,
        }
    }

    pub fn known(self) -> Option<T> {
        match self {
            Self::Known(v) => Some(v),
            Self::Unknown => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Metric<U> {
        match self {
            Self::Known(v) => Metric::Known(f(v)),
            Self::Unknown => Metric::Unknown,
        }
    }

    pub fn and_then<U>(self, f: impl FnOnce(T) -> Metric<U>) -> Metric<U> {
        match self {
            Self::Known(v) => f(v),
            Self::Unknown => Metric::Unknown,
        }
    }

    /// Keep `self` when known, otherwise fall back to `other`.
    pub fn or(self, other: Metric<T>) -> Metric<T> {
        match self {
            Self::Known(_) => self,
            Self::Unknown => other,
        }
    }

    pub fn or_else(self, f: impl FnOnce() -> Metric<T>) -> Metric<T> {
        match self {
            Self::Known(_) => self,
            Self::Unknown => f(),
        }
    }

    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Self::Known(v) => v,
            Self::Unknown => default,
        }
    }
}

impl Metric<f64> {
    /// A known value only when it is finite.
    pub fn finite(value: f64) -> Self {
        if value.is_finite() {
            Self::Known(value)
        } else {
            Self::Unknown
        }
    }

    /// Round a known value to `decimals` places.
    pub fn rounded(self, decimals: i32) -> Self {
        self.map(|v| round_to(v, decimals))
    }
}

/// Round `value` to `decimals` decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Milliseconds since the Unix epoch.
pub fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ---------------------------------------------------------------------------
// Wire encoding
// ---------------------------------------------------------------------------

/// How a type spells "unknown" when serialized.
pub trait Sentinel {
    fn serialize_unknown<S: Serializer>(serializer: S) -> Result<S::Ok, S::Error>;
}

macro_rules! numeric_sentinel {
    ($($ty:ty),*) => {
        $(
            impl Sentinel for $ty {
                fn serialize_unknown<S: Serializer>(serializer: S) -> Result<S::Ok, S::Error> {
                    serializer.serialize_i64(-1)
                }
            }
        )*
    };
}

numeric_sentinel!(i32, i64, u32, u64, usize, f64);

impl Sentinel for String {
    fn serialize_unknown<S: Serializer>(serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(UNKNOWN)
    }
}

impl Sentinel for bool {
    fn serialize_unknown<S: Serializer>(serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_none()
    }
}

impl<T: Serialize + Sentinel> Serialize for Metric<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Known(v) => v.serialize(serializer),
            Self::Unknown => T::serialize_unknown(serializer),
        }
    }
}
