//! Vector and kernel math.
//!
//! Single-precision 3-vectors plus the two SPH kernels the constraint
//! solver needs (Poly6 for density, Spiky for its gradient).

use serde::{Deserialize, Serialize};

/// A 3D vector of single-precision floats.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    #[inline]
    pub fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    #[inline]
    pub fn scale(self, s: f32) -> Vec3 {
        Vec3::new(self.x * s, self.y * s, self.z * s)
    }

    #[inline]
    pub fn dot(self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    #[inline]
    pub fn length_sq(self) -> f32 {
        self.dot(self)
    }

    #[inline]
    pub fn length(self) -> f32 {
        self.length_sq().sqrt()
    }

    /// Returns the zero vector when `self` is (near) zero-length, rather than NaN.
    #[inline]
    pub fn normalized(self) -> Vec3 {
        let len = self.length();
        if len > 0.0 {
            self.scale(1.0 / len)
        } else {
            Vec3::ZERO
        }
    }

    /// Projects `self` onto the plane whose normal is `normal` (assumed unit length).
    #[inline]
    pub fn project_on_plane(self, normal: Vec3) -> Vec3 {
        self.sub(normal.scale(self.dot(normal)))
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Default for Vec3 {
    fn default() -> Self {
        Vec3::ZERO
    }
}

/// Returns `b.powi(exp)` via repeated squaring, O(log exp).
///
/// Kept as an explicit helper (rather than `f32::powi`) because the original
/// source hand-rolls it and the solver's hot loop calls it with small,
/// compile-time-known exponents (3 and 9) where this is measurably cheaper
/// than the general `powf`.
#[inline]
pub fn pow_int(b: f32, mut exp: u32) -> f32 {
    let mut power = b;
    let mut accum = 1.0_f32;
    loop {
        if exp % 2 == 1 {
            accum *= power;
        }
        exp /= 2;
        if exp == 0 {
            return accum;
        }
        power *= power;
    }
}

/// Poly6 smoothing kernel: `W(dp, h) = (h^2 - |dp|^2)^3 * 315 / (64 pi h^9)` for `|dp| < h`.
#[inline]
pub fn poly6(dp: Vec3, h: f32) -> f32 {
    let len_sq = dp.length_sq();
    if len_sq < h * h {
        pow_int(h * h - len_sq, 3) * (315.0 / 64.0 / std::f32::consts::PI / pow_int(h, 9))
    } else {
        0.0
    }
}

/// Spiky kernel gradient: `grad W(dp, h) = dp * (h - |dp|)^2 / |dp|` for `0 < |dp| < h`.
#[inline]
pub fn spiky_grad(dp: Vec3, h: f32) -> Vec3 {
    let len = dp.length();
    if len > 0.0 && len < h {
        dp.scale(pow_int(h - len, 2) / len)
    } else {
        Vec3::ZERO
    }
}
