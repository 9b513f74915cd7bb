/// Placement matrices, their components and grid snapping
///
/// Convention: column vectors. A point is placed with `M * p`, and a child
/// placement `C` inside a parent placement `P` composes as `P * C`. The 3x3
/// block of `M` is LDraw's `a b c / d e f / g h i` in row order, and the last
/// column is the `x y z` position.
///
/// All internal Euler triples use X-Y-Z order: rotate about X first, then Y,
/// then Z, which is the matrix `Rz * Ry * Rx`. ROTSTEP angles are Z-Y-X
/// (`Rx * Ry * Rz`) and live in [`RotationAngles`].
use std::f64::consts::FRAC_PI_2;

use nalgebra::{Matrix3, Matrix4, Point3, Unit, Vector3};

use crate::config::GridConfig;

/// Below this a basis vector is treated as collapsed.
const DEGENERATE_EPSILON: f64 = 1e-12;

/// `|sin(y)|` above this is gimbal lock; the Z angle is pinned to zero.
const GIMBAL_LIMIT: f64 = 1.0 - 1e-12;

/// Rotation around three axes in X-Y-Z order (in radians)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationState {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl RotationState {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    pub fn from_degrees(x: f64, y: f64, z: f64) -> Self {
        Self::new(x.to_radians(), y.to_radians(), z.to_radians())
    }

    pub fn to_degrees(&self) -> Vector3<f64> {
        Vector3::new(self.x.to_degrees(), self.y.to_degrees(), self.z.to_degrees())
    }
}

impl Default for RotationState {
    fn default() -> Self {
        Self::zero()
    }
}

/// Shear factors left over after removing scale from the basis.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Shear {
    pub xy: f64,
    pub xz: f64,
    pub yz: f64,
}

/// A placement split into parts a person can edit.
///
/// Recomposes as `T * R * Shear * Scale`. Decomposition is not unique, so
/// edits should always start from [`Transform::decompose`] of the current
/// matrix rather than from stored components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformComponents {
    pub scale: Vector3<f64>,
    pub shear: Shear,
    pub rotation: RotationState,
    pub translation: Vector3<f64>,
}

impl TransformComponents {
    pub fn identity() -> Self {
        Self {
            scale: Vector3::new(1.0, 1.0, 1.0),
            shear: Shear::default(),
            rotation: RotationState::zero(),
            translation: Vector3::zeros(),
        }
    }
}

impl Default for TransformComponents {
    fn default() -> Self {
        Self::identity()
    }
}

/// ROTSTEP angles in degrees, as written in the file.
///
/// The three numbers are applied Z first, then Y, then X (`Rx * Ry * Rz`).
/// Use [`RotationAngles::to_xyz_order`] to get an internal rotation; never
/// feed these numbers straight into a [`RotationState`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RotationAngles {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl RotationAngles {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The rotation these angles describe.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        axis_rotation(Vector3::x_axis(), self.x.to_radians())
            * axis_rotation(Vector3::y_axis(), self.y.to_radians())
            * axis_rotation(Vector3::z_axis(), self.z.to_radians())
    }

    /// The equivalent X-Y-Z rotation.
    pub fn to_xyz_order(&self) -> RotationState {
        euler_xyz(&self.rotation_matrix())
    }

    /// The Z-Y-X angles producing the same orientation as `rotation`.
    pub fn from_xyz_order(rotation: &RotationState) -> Self {
        // Rx(a) Ry(b) Rz(c) transposed is Rz(-c) Ry(-b) Rx(-a), an X-Y-Z form.
        let inverse = euler_xyz(&Transform::rotation_matrix3(rotation).transpose());
        Self {
            x: clean_zero(-inverse.x.to_degrees()),
            y: clean_zero(-inverse.y.to_degrees()),
            z: clean_zero(-inverse.z.to_degrees()),
        }
    }
}

/// Transform builder for LDraw placements
pub struct Transform;

impl Transform {
    /// Create a rotation matrix from a rotation state
    pub fn rotation_matrix(rotation: &RotationState) -> Matrix4<f64> {
        let rx = Matrix4::new_rotation(Vector3::new(rotation.x, 0.0, 0.0));
        let ry = Matrix4::new_rotation(Vector3::new(0.0, rotation.y, 0.0));
        let rz = Matrix4::new_rotation(Vector3::new(0.0, 0.0, rotation.z));

        // Apply rotations in order: X, then Y, then Z
        rz * ry * rx
    }

    pub fn rotation_matrix3(rotation: &RotationState) -> Matrix3<f64> {
        Self::rotation_matrix(rotation).fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// Create a translation matrix
    pub fn translation_matrix(x: f64, y: f64, z: f64) -> Matrix4<f64> {
        Matrix4::new_translation(&Vector3::new(x, y, z))
    }

    /// Create a scale matrix
    pub fn scale_matrix(sx: f64, sy: f64, sz: f64) -> Matrix4<f64> {
        Matrix4::new_nonuniform_scaling(&Vector3::new(sx, sy, sz))
    }

    /// Build a placement from the twelve numbers of a type 1 line, in file
    /// order: `x y z a b c d e f g h i`.
    pub fn from_ldraw_fields(fields: &[f64; 12]) -> Matrix4<f64> {
        let [x, y, z, a, b, c, d, e, f, g, h, i] = *fields;
        Matrix4::new(
            a, b, c, x, //
            d, e, f, y, //
            g, h, i, z, //
            0.0, 0.0, 0.0, 1.0,
        )
    }

    /// The twelve numbers of a type 1 line, in file order.
    pub fn to_ldraw_fields(matrix: &Matrix4<f64>) -> [f64; 12] {
        let m = matrix;
        [
            m[(0, 3)],
            m[(1, 3)],
            m[(2, 3)],
            m[(0, 0)],
            m[(0, 1)],
            m[(0, 2)],
            m[(1, 0)],
            m[(1, 1)],
            m[(1, 2)],
            m[(2, 0)],
            m[(2, 1)],
            m[(2, 2)],
        ]
    }

    /// Column-major array for immediate-mode rendering (`glMultMatrixf`).
    pub fn to_gl_array(matrix: &Matrix4<f64>) -> [f32; 16] {
        let mut out = [0.0f32; 16];
        for (slot, value) in out.iter_mut().zip(matrix.as_slice()) {
            *slot = *value as f32;
        }
        out
    }

    pub fn from_gl_array(values: &[f32; 16]) -> Matrix4<f64> {
        let mut matrix = Matrix4::from_iterator(values.iter().map(|v| f64::from(*v)));
        Self::force_affine(&mut matrix);
        matrix
    }

    /// Drop any projective component so the bottom row reads `0 0 0 1`.
    pub fn force_affine(matrix: &mut Matrix4<f64>) {
        matrix[(3, 0)] = 0.0;
        matrix[(3, 1)] = 0.0;
        matrix[(3, 2)] = 0.0;
        matrix[(3, 3)] = 1.0;
    }

    /// Build a matrix from components.
    pub fn compose(components: &TransformComponents) -> Matrix4<f64> {
        let shear = &components.shear;
        #[rustfmt::skip]
        let shear_matrix = Matrix3::new(
            1.0, shear.xy, shear.xz,
            0.0, 1.0, shear.yz,
            0.0, 0.0, 1.0,
        );
        let block = Self::rotation_matrix3(&components.rotation)
            * shear_matrix
            * Matrix3::from_diagonal(&components.scale);

        let mut matrix = block.to_homogeneous();
        matrix[(0, 3)] = components.translation.x;
        matrix[(1, 3)] = components.translation.y;
        matrix[(2, 3)] = components.translation.z;
        matrix
    }

    /// Split a matrix into scale, shear, rotation and translation.
    ///
    /// Scale comes from the basis magnitudes after Gram-Schmidt removes
    /// shear; a left-handed basis is treated as a mirror and negates all
    /// three scale factors.
    pub fn decompose(matrix: &Matrix4<f64>) -> TransformComponents {
        let translation = Vector3::new(matrix[(0, 3)], matrix[(1, 3)], matrix[(2, 3)]);
        let basis: Matrix3<f64> = matrix.fixed_view::<3, 3>(0, 0).into_owned();

        let col0 = basis.column(0).into_owned();
        let col1 = basis.column(1).into_owned();
        let col2 = basis.column(2).into_owned();

        let (mut sx, mut n0) = normalize_or(col0, Vector3::x());

        let mut xy = n0.dot(&col1);
        let (mut sy, mut n1) = normalize_or(col1 - n0 * xy, n0.cross(&Vector3::z()));
        xy = divide_or_zero(xy, sy);

        let mut xz = n0.dot(&col2);
        let rest = col2 - n0 * xz;
        let mut yz = n1.dot(&rest);
        let (mut sz, mut n2) = normalize_or(rest - n1 * yz, n0.cross(&n1));
        xz = divide_or_zero(xz, sz);
        yz = divide_or_zero(yz, sz);

        if n0.dot(&n1.cross(&n2)) < 0.0 {
            sx = -sx;
            sy = -sy;
            sz = -sz;
            n0 = -n0;
            n1 = -n1;
            n2 = -n2;
        }

        let rotation = Matrix3::from_columns(&[n0, n1, n2]);
        TransformComponents {
            scale: Vector3::new(sx, sy, sz),
            shear: Shear { xy, xz, yz },
            rotation: euler_xyz(&rotation),
            translation,
        }
    }

    /// Spin a placement about its own origin, along world axes.
    ///
    /// The rotation is applied X, then Y, then Z. The current matrix is the
    /// starting point, never previously stored components.
    pub fn rotate_by_degrees(matrix: &Matrix4<f64>, degrees: Vector3<f64>) -> Matrix4<f64> {
        let delta = Self::rotation_matrix(&RotationState::from_degrees(
            degrees.x, degrees.y, degrees.z,
        ));
        let origin = Vector3::new(matrix[(0, 3)], matrix[(1, 3)], matrix[(2, 3)]);
        Matrix4::new_translation(&origin) * delta * Matrix4::new_translation(&-origin) * matrix
    }

    /// Rotate a placement about an arbitrary world point and axis.
    pub fn rotate_about(
        matrix: &Matrix4<f64>,
        center: &Point3<f64>,
        axis: &Vector3<f64>,
        degrees: f64,
    ) -> Matrix4<f64> {
        let Some(axis) = Unit::try_new(*axis, DEGENERATE_EPSILON) else {
            return *matrix;
        };
        let rotation = nalgebra::Rotation3::from_axis_angle(&axis, degrees.to_radians());
        Matrix4::new_translation(&center.coords)
            * rotation.to_homogeneous()
            * Matrix4::new_translation(&-center.coords)
            * matrix
    }

    /// Move a placement by `delta` in world coordinates.
    pub fn translate_by(matrix: &Matrix4<f64>, delta: &Vector3<f64>) -> Matrix4<f64> {
        Matrix4::new_translation(delta) * matrix
    }

    /// `None` when the matrix is singular, as for a flattened part.
    pub fn inverse(matrix: &Matrix4<f64>) -> Option<Matrix4<f64>> {
        matrix.try_inverse()
    }

    pub fn transform_point(matrix: &Matrix4<f64>, point: &Point3<f64>) -> Point3<f64> {
        matrix.transform_point(point)
    }

    /// Round a placement onto the editing grid.
    ///
    /// Rotation snaps to the nearest multiple of the minimum angle first.
    /// The world axis most aligned with the part's local Y axis then uses the
    /// vertical pitch, and each position component rounds to its axis pitch.
    pub fn snap_to_grid(matrix: &Matrix4<f64>, grid: &GridConfig) -> Matrix4<f64> {
        let mut components = Self::decompose(matrix);
        components.rotation = snap_rotation(&components.rotation, grid.minimum_angle);

        let rotated = Self::compose(&components);
        let vertical_axis = dominant_axis(&rotated.fixed_view::<3, 1>(0, 1).into_owned());

        let mut spacing = Vector3::repeat(grid.spacing);
        spacing[vertical_axis] = grid.vertical_spacing();

        for axis in 0..3 {
            components.translation[axis] = snap_value(components.translation[axis], spacing[axis]);
        }
        Self::compose(&components)
    }
}

fn axis_rotation(axis: Unit<Vector3<f64>>, angle: f64) -> Matrix3<f64> {
    nalgebra::Rotation3::from_axis_angle(&axis, angle).into_inner()
}

/// Extract X-Y-Z angles from a pure rotation (`Rz * Ry * Rx`).
fn euler_xyz(r: &Matrix3<f64>) -> RotationState {
    let sin_y = (-r[(2, 0)]).clamp(-1.0, 1.0);

    if sin_y.abs() < GIMBAL_LIMIT {
        RotationState {
            x: r[(2, 1)].atan2(r[(2, 2)]),
            y: sin_y.asin(),
            z: r[(1, 0)].atan2(r[(0, 0)]),
        }
    } else if sin_y > 0.0 {
        // Only x - z is recoverable
        RotationState {
            x: r[(0, 1)].atan2(r[(1, 1)]),
            y: FRAC_PI_2,
            z: 0.0,
        }
    } else {
        // Only x + z is recoverable
        RotationState {
            x: (-r[(0, 1)]).atan2(r[(1, 1)]),
            y: -FRAC_PI_2,
            z: 0.0,
        }
    }
}

fn normalize_or(v: Vector3<f64>, fallback: Vector3<f64>) -> (f64, Vector3<f64>) {
    let length = v.norm();
    if length > DEGENERATE_EPSILON {
        (length, v / length)
    } else {
        let fallback_length = fallback.norm();
        if fallback_length > DEGENERATE_EPSILON {
            (0.0, fallback / fallback_length)
        } else {
            (0.0, Vector3::y())
        }
    }
}

fn divide_or_zero(value: f64, divisor: f64) -> f64 {
    if divisor.abs() > DEGENERATE_EPSILON {
        value / divisor
    } else {
        0.0
    }
}

fn clean_zero(value: f64) -> f64 {
    if value == 0.0 {
        0.0
    } else {
        value
    }
}

fn snap_value(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    clean_zero((value / step).round() * step)
}

fn snap_rotation(rotation: &RotationState, minimum_angle: f64) -> RotationState {
    if minimum_angle <= 0.0 {
        return *rotation;
    }
    let snap = |radians: f64| snap_value(radians.to_degrees(), minimum_angle).to_radians();
    RotationState::new(snap(rotation.x), snap(rotation.y), snap(rotation.z))
}

/// Index of the world axis a direction points along most.
fn dominant_axis(direction: &Vector3<f64>) -> usize {
    let abs = direction.abs();
    if abs.y >= abs.x && abs.y >= abs.z {
        1
    } else if abs.x >= abs.z {
        0
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample_matrix() -> Matrix4<f64> {
        let components = TransformComponents {
            scale: Vector3::new(1.5, 0.5, 2.0),
            shear: Shear {
                xy: 0.2,
                xz: -0.1,
                yz: 0.3,
            },
            rotation: RotationState::from_degrees(30.0, -20.0, 75.0),
            translation: Vector3::new(10.0, -24.0, 35.5),
        };
        Transform::compose(&components)
    }

    #[test]
    fn test_identity_rotation() {
        let rotation = RotationState::zero();
        let matrix = Transform::rotation_matrix(&rotation);
        assert!((matrix - Matrix4::identity()).norm() < 1e-9);
    }

    #[test]
    fn test_ldraw_fields_layout() {
        let fields = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let matrix = Transform::from_ldraw_fields(&fields);
        // Row convention: first row of the block is a b c
        assert_eq!(matrix[(0, 0)], 4.0);
        assert_eq!(matrix[(0, 1)], 5.0);
        assert_eq!(matrix[(0, 2)], 6.0);
        assert_eq!(matrix[(1, 3)], 2.0);
        assert_eq!(Transform::to_ldraw_fields(&matrix), fields);

        let point = matrix.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_abs_diff_eq!(point, Point3::new(5.0, 9.0, 13.0), epsilon = 1e-12);
    }

    #[test]
    fn test_gl_array_is_transposed() {
        let fields = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let matrix = Transform::from_ldraw_fields(&fields);
        let gl = Transform::to_gl_array(&matrix);
        assert_eq!(
            gl,
            [4.0, 7.0, 10.0, 0.0, 5.0, 8.0, 11.0, 0.0, 6.0, 9.0, 12.0, 0.0, 1.0, 2.0, 3.0, 1.0]
        );
        assert_abs_diff_eq!(Transform::from_gl_array(&gl), matrix, epsilon = 1e-6);
    }

    #[test]
    fn test_decompose_recompose_reproduces_matrix() {
        let matrix = sample_matrix();
        let components = Transform::decompose(&matrix);
        assert_abs_diff_eq!(Transform::compose(&components), matrix, epsilon = 1e-9);
        assert_abs_diff_eq!(components.scale.x, 1.5, epsilon = 1e-9);
        assert_abs_diff_eq!(components.shear.yz, 0.3, epsilon = 1e-9);
    }

    #[test]
    fn test_decompose_mirrored_matrix() {
        let fields = [0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        let matrix = Transform::from_ldraw_fields(&fields);
        let components = Transform::decompose(&matrix);
        assert!(components.scale.x < 0.0);
        assert_abs_diff_eq!(Transform::compose(&components), matrix, epsilon = 1e-9);
    }

    #[test]
    fn test_decompose_gimbal_lock() {
        let matrix = Transform::compose(&TransformComponents {
            rotation: RotationState::from_degrees(40.0, 90.0, 25.0),
            ..TransformComponents::identity()
        });
        let components = Transform::decompose(&matrix);
        assert_abs_diff_eq!(components.rotation.z, 0.0);
        assert_abs_diff_eq!(Transform::compose(&components), matrix, epsilon = 1e-9);
    }

    #[test]
    fn test_degenerate_basis_does_not_panic() {
        let matrix = Transform::scale_matrix(0.0, 1.0, 1.0);
        let components = Transform::decompose(&matrix);
        assert_abs_diff_eq!(Transform::compose(&components), matrix, epsilon = 1e-9);
    }

    #[test]
    fn test_rotstep_order_round_trip() {
        let angles = RotationAngles::new(45.0, 90.0, 0.0);
        let internal = angles.to_xyz_order();
        let back = RotationAngles::from_xyz_order(&internal);
        assert_abs_diff_eq!(back.x, 45.0, epsilon = 1e-9);
        assert_abs_diff_eq!(back.y, 90.0, epsilon = 1e-9);
        assert_abs_diff_eq!(back.z, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rotstep_order_is_not_a_reinterpretation() {
        let angles = RotationAngles::new(30.0, 40.0, 50.0);
        let internal = angles.to_xyz_order();
        let as_is = RotationState::from_degrees(30.0, 40.0, 50.0);
        assert!((internal.x - as_is.x).abs() > 1e-3);
        assert_abs_diff_eq!(
            Transform::rotation_matrix3(&internal),
            angles.rotation_matrix(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_rotate_by_degrees_keeps_position() {
        let start = Transform::translation_matrix(20.0, -8.0, 40.0);
        let rotated = Transform::rotate_by_degrees(&start, Vector3::new(0.0, 90.0, 0.0));
        let origin = rotated.transform_point(&Point3::origin());
        assert_abs_diff_eq!(origin, Point3::new(20.0, -8.0, 40.0), epsilon = 1e-9);
        let x_axis = rotated.transform_vector(&Vector3::x());
        assert_abs_diff_eq!(x_axis, Vector3::new(0.0, 0.0, -1.0), epsilon = 1e-9);
    }

    #[test]
    fn test_rotate_about_point() {
        let start = Transform::translation_matrix(10.0, 0.0, 0.0);
        let rotated =
            Transform::rotate_about(&start, &Point3::origin(), &Vector3::new(0.0, 0.0, 1.0), 90.0);
        let origin = rotated.transform_point(&Point3::origin());
        assert_abs_diff_eq!(origin, Point3::new(0.0, 10.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_snap_to_grid() {
        let grid = GridConfig::coarse();
        let matrix = Transform::compose(&TransformComponents {
            rotation: RotationState::from_degrees(0.0, 87.0, 0.0),
            translation: Vector3::new(31.0, -30.0, 9.0),
            ..TransformComponents::identity()
        });
        let snapped = Transform::snap_to_grid(&matrix, &grid);
        let components = Transform::decompose(&snapped);

        assert_abs_diff_eq!(components.rotation.y.to_degrees(), 90.0, epsilon = 1e-9);
        // Upright part: world Y uses the 24 LDU brick pitch.
        assert_abs_diff_eq!(components.translation, Vector3::new(40.0, -24.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_snap_on_side_uses_vertical_pitch_on_other_axis() {
        let grid = GridConfig::coarse();
        let matrix = Transform::compose(&TransformComponents {
            rotation: RotationState::from_degrees(0.0, 0.0, 90.0),
            translation: Vector3::new(30.0, 30.0, 0.0),
            ..TransformComponents::identity()
        });
        let snapped = Transform::snap_to_grid(&matrix, &grid);
        let components = Transform::decompose(&snapped);
        // Local Y now points along world X.
        assert_abs_diff_eq!(components.translation.x, 24.0, epsilon = 1e-9);
        assert_abs_diff_eq!(components.translation.y, 40.0, epsilon = 1e-9);
    }

    #[test]
    fn test_snap_is_idempotent() {
        let grid = GridConfig {
            spacing: 10.0,
            minimum_angle: 15.0,
        };
        let once = Transform::snap_to_grid(&sample_matrix(), &grid);
        let twice = Transform::snap_to_grid(&once, &grid);
        assert_abs_diff_eq!(once, twice, epsilon = 1e-9);
    }

    #[test]
    fn test_translate_by_moves_in_world_space() {
        let turned = Transform::rotate_by_degrees(
            &Transform::translation_matrix(20.0, 0.0, 0.0),
            Vector3::new(0.0, 90.0, 0.0),
        );
        let moved = Transform::translate_by(&turned, &Vector3::new(0.0, -24.0, 10.0));
        let fields = Transform::to_ldraw_fields(&moved);
        assert_abs_diff_eq!(fields[0], 20.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fields[1], -24.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fields[2], 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(
            moved.fixed_view::<3, 3>(0, 0).into_owned(),
            turned.fixed_view::<3, 3>(0, 0).into_owned(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_inverse_undoes_placement() {
        let matrix = sample_matrix();
        let inverse = Transform::inverse(&matrix).unwrap();
        assert_abs_diff_eq!(inverse * matrix, Matrix4::identity(), epsilon = 1e-9);
        assert!(Transform::inverse(&Transform::scale_matrix(1.0, 0.0, 1.0)).is_none());
    }
}
