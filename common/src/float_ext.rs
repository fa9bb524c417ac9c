pub trait FloatExt: Copy {
    /// Absolute difference below [`crate::EPSILON`].
    fn approximately_eq(self, other: Self) -> bool;

    /// Absolute difference below `eps`.
    fn approx_eq_eps(self, other: Self, eps: Self) -> bool;

    /// Difference below `rel` times the larger magnitude, or below `eps` near zero.
    fn approx_eq_rel(self, other: Self, rel: Self, eps: Self) -> bool;
}

impl FloatExt for f32 {
    fn approximately_eq(self, other: Self) -> bool {
        (self - other).abs() < crate::EPSILON as f32
    }

    fn approx_eq_eps(self, other: Self, eps: Self) -> bool {
        (self - other).abs() < eps
    }

    fn approx_eq_rel(self, other: Self, rel: Self, eps: Self) -> bool {
        let diff = (self - other).abs();
        diff < eps || diff <= rel * self.abs().max(other.abs())
    }
}

impl FloatExt for f64 {
    fn approximately_eq(self, other: Self) -> bool {
        (self - other).abs() < crate::EPSILON
    }

    fn approx_eq_eps(self, other: Self, eps: Self) -> bool {
        (self - other).abs() < eps
    }

    fn approx_eq_rel(self, other: Self, rel: Self, eps: Self) -> bool {
        let diff = (self - other).abs();
        diff < eps || diff <= rel * self.abs().max(other.abs())
    }
}
