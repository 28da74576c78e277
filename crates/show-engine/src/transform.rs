//! 2D affine transforms for animated element geometry.
//!
//! Stored as a 3x2 matrix (the bottom row [0, 0, 1] is implicit):
//! ```text
//! | a  c  tx |
//! | b  d  ty |
//! | 0  0  1  |
//! ```

use serde::{Deserialize, Serialize};

/// A 2D affine transformation matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform2D {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform2D {
    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn translate(tx: f64, ty: f64) -> Self {
        Self { tx, ty, ..Self::identity() }
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::identity()
        }
    }

    /// Rotation by `angle_rad` radians, counterclockwise.
    pub fn rotate(angle_rad: f64) -> Self {
        let cos = angle_rad.cos();
        let sin = angle_rad.sin();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Horizontal shear by `angle_rad`.
    pub fn skew_x(angle_rad: f64) -> Self {
        Self {
            c: angle_rad.tan(),
            ..Self::identity()
        }
    }

    /// Vertical shear by `angle_rad`.
    pub fn skew_y(angle_rad: f64) -> Self {
        Self {
            b: angle_rad.tan(),
            ..Self::identity()
        }
    }

    /// Matrix product `self * other` (apply `other` first, then `self`).
    pub fn multiply(&self, other: &Transform2D) -> Transform2D {
        Transform2D {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            tx: self.a * other.tx + self.c * other.ty + self.tx,
            ty: self.b * other.tx + self.d * other.ty + self.ty,
        }
    }

    /// Apply the transform to a point.
    pub fn apply_point(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.tx,
            self.b * x + self.d * y + self.ty,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: (f64, f64), expected: (f64, f64)) {
        assert!(
            (actual.0 - expected.0).abs() < 1e-9 && (actual.1 - expected.1).abs() < 1e-9,
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn test_translate_then_scale() {
        // multiply applies the right operand first.
        let m = Transform2D::translate(10.0, 0.0).multiply(&Transform2D::scale(2.0, 2.0));
        assert_close(m.apply_point(3.0, 4.0), (16.0, 8.0));
    }

    #[test]
    fn test_rotate_quarter_turn() {
        let m = Transform2D::rotate(std::f64::consts::FRAC_PI_2);
        assert_close(m.apply_point(1.0, 0.0), (0.0, 1.0));
    }

    #[test]
    fn test_identity_is_neutral() {
        let m = Transform2D::rotate(0.7).multiply(&Transform2D::identity());
        assert_eq!(m, Transform2D::rotate(0.7));
    }
}
