use crate::vector::*;

/// Column-major 4x4 matrix.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, PartialOrd, Default, Debug)]
pub struct Matrix4f32 {
    pub cols: [Vector4f32; 4],
}

impl Matrix4f32 {
    pub fn identity() -> Self {
        Self::from_cols([
            [1.0, 0.0, 0.0, 0.0].into(),
            [0.0, 1.0, 0.0, 0.0].into(),
            [0.0, 0.0, 1.0, 0.0].into(),
            [0.0, 0.0, 0.0, 1.0].into(),
        ])
    }

    pub fn from_cols(cols: [Vector4f32; 4]) -> Self {
        Self { cols }
    }

    pub fn from_rows(rows: [Vector4f32; 4]) -> Self {
        Self { cols: rows }.transposed()
    }

    pub fn from_rows_components(rows: [f32; 16]) -> Self {
        Self::from_rows([
            [rows[0], rows[1], rows[2], rows[3]].into(),
            [rows[4], rows[5], rows[6], rows[7]].into(),
            [rows[8], rows[9], rows[10], rows[11]].into(),
            [rows[12], rows[13], rows[14], rows[15]].into(),
        ])
    }

    pub fn from_translation(v: Vector3f32) -> Self {
        Self::from_cols([
            Vector4f32::new(1.0, 0.0, 0.0, 0.0),
            Vector4f32::new(0.0, 1.0, 0.0, 0.0),
            Vector4f32::new(0.0, 0.0, 1.0, 0.0),
            Vector4f32::new(v.x, v.y, v.z, 1.0),
        ])
    }

    pub fn from_scale(v: Vector3f32) -> Self {
        Self::from_cols([
            Vector4f32::new(v.x, 0.0, 0.0, 0.0),
            Vector4f32::new(0.0, v.y, 0.0, 0.0),
            Vector4f32::new(0.0, 0.0, v.z, 0.0),
            Vector4f32::new(0.0, 0.0, 0.0, 1.0),
        ])
    }

    /// Rotation about `axis` (unit length) by `angle` radians.
    pub fn from_rotation(axis: Vector3f32, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        let mul = 1.0 - cos;

        let x_sin = axis.x * sin;
        let y_sin = axis.y * sin;
        let z_sin = axis.z * sin;

        let xy_mul = axis.x * axis.y * mul;
        let xz_mul = axis.x * axis.z * mul;
        let yz_mul = axis.y * axis.z * mul;

        let m00 = (axis.x * axis.x).mul_add(mul, cos);
        let m10 = xy_mul + z_sin;
        let m20 = xz_mul - y_sin;
        let m01 = xy_mul - z_sin;
        let m11 = (axis.y * axis.y).mul_add(mul, cos);
        let m21 = yz_mul + x_sin;
        let m02 = xz_mul + y_sin;
        let m12 = yz_mul - x_sin;
        let m22 = (axis.z * axis.z).mul_add(mul, cos);
        Self::from_cols([
            Vector4f32::new(m00, m10, m20, 0.0),
            Vector4f32::new(m01, m11, m21, 0.0),
            Vector4f32::new(m02, m12, m22, 0.0),
            Vector4f32::new(0.0, 0.0, 0.0, 1.0),
        ])
    }

    /// Camera-to-world transform with +z pointing from `origin` towards
    /// `target`.
    pub fn look_at(origin: Point3f32, target: Point3f32, up: Vector3f32) -> Self {
        let fwd = (target - origin).normalized();
        let left = up.cross(fwd).normalized();
        let alt_up = fwd.cross(left).normalized();
        Self::from_cols([
            left.extend_w(0.0),
            alt_up.extend_w(0.0),
            fwd.extend_w(0.0),
            origin.extend_w(1.0),
        ])
    }

    pub fn as_arrays(self) -> [[f32; 4]; 4] {
        [
            self.cols[0].array(),
            self.cols[1].array(),
            self.cols[2].array(),
            self.cols[3].array(),
        ]
    }

    pub fn transposed(self) -> Self {
        let [[m00, m01, m02, m03], [m10, m11, m12, m13], [m20, m21, m22, m23], [m30, m31, m32, m33]] =
            self.as_arrays();
        Self::from_cols([
            Vector4f32::new(m00, m10, m20, m30),
            Vector4f32::new(m01, m11, m21, m31),
            Vector4f32::new(m02, m12, m22, m32),
            Vector4f32::new(m03, m13, m23, m33),
        ])
    }

    pub fn has_nan(self) -> bool {
        self.cols
            .iter()
            .any(|c| c.array().iter().any(|v| v.is_nan()))
    }
}

impl std::ops::Mul<Self> for Matrix4f32 {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        let sa = self.cols[0];
        let sb = self.cols[1];
        let sc = self.cols[2];
        let sd = self.cols[3];
        Self::from_cols([
            sa * rhs.cols[0].x + sb * rhs.cols[0].y + sc * rhs.cols[0].z + sd * rhs.cols[0].w,
            sa * rhs.cols[1].x + sb * rhs.cols[1].y + sc * rhs.cols[1].z + sd * rhs.cols[1].w,
            sa * rhs.cols[2].x + sb * rhs.cols[2].y + sc * rhs.cols[2].z + sd * rhs.cols[2].w,
            sa * rhs.cols[3].x + sb * rhs.cols[3].y + sc * rhs.cols[3].z + sd * rhs.cols[3].w,
        ])
    }
}

impl std::ops::Mul<Vector4f32> for Matrix4f32 {
    type Output = Vector4f32;
    fn mul(self, rhs: Vector4f32) -> Vector4f32 {
        let t = self.transposed();
        Vector4f32::new(
            t.cols[0].dot(rhs),
            t.cols[1].dot(rhs),
            t.cols[2].dot(rhs),
            t.cols[3].dot(rhs),
        )
    }
}

impl std::ops::Mul<Vector3f32> for Matrix4f32 {
    type Output = Vector3f32;
    fn mul(self, rhs: Vector3f32) -> Vector3f32 {
        (self * rhs.extend_w(0.0)).xyz()
    }
}

impl std::ops::Mul<Point3f32> for Matrix4f32 {
    type Output = Point3f32;
    fn mul(self, rhs: Point3f32) -> Point3f32 {
        (self * rhs.extend_w(1.0)).xyz().to_point()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_then_scale_composes_left_to_right() {
        let t = Matrix4f32::from_scale(Vector3f32::splat(2.0))
            * Matrix4f32::from_translation(Vector3f32::new(1.0, 0.0, 0.0));
        let p = t * Point3f32::ZERO;
        assert_eq!(p, Point3f32::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn rotation_quarter_turn_about_z() {
        let r = Matrix4f32::from_rotation(
            Vector3f32::new(0.0, 0.0, 1.0),
            std::f32::consts::FRAC_PI_2,
        );
        let v = r * Vector3f32::new(1.0, 0.0, 0.0);
        assert!((v.x - 0.0).abs() < 1e-6);
        assert!((v.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn from_rows_components_is_row_major() {
        let m = Matrix4f32::from_rows_components([
            1.0, 0.0, 0.0, 7.0, //
            0.0, 1.0, 0.0, 8.0, //
            0.0, 0.0, 1.0, 9.0, //
            0.0, 0.0, 0.0, 1.0,
        ]);
        assert_eq!(m * Point3f32::ZERO, Point3f32::new(7.0, 8.0, 9.0));
    }

    #[test]
    fn look_at_maps_forward_to_target_direction() {
        let m = Matrix4f32::look_at(
            Point3f32::new(0.0, 0.0, -5.0),
            Point3f32::ZERO,
            Vector3f32::new(0.0, 1.0, 0.0),
        );
        assert!(!m.has_nan());
        let fwd = m * Vector3f32::new(0.0, 0.0, 1.0);
        assert!((fwd.z - 1.0).abs() < 1e-6);
        assert_eq!(m * Point3f32::ZERO, Point3f32::new(0.0, 0.0, -5.0));
    }

    #[test]
    fn degenerate_look_at_produces_nan() {
        let m = Matrix4f32::look_at(
            Point3f32::ZERO,
            Point3f32::ZERO,
            Vector3f32::new(0.0, 1.0, 0.0),
        );
        assert!(m.has_nan());
    }
}
