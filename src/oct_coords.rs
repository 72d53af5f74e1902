use crate::GridMode;
use bevy::prelude::*;

/// Maps a grid coordinate in `[-1, 1]²` to a unit direction.
///
/// Spherical mode folds the lower half of the octahedron over the diagonals,
/// hemispherical mode rotates the grid by 45° so the whole square covers the
/// upper half only.
pub fn decode(coord: Vec2, mode: GridMode) -> Vec3 {
    octahedron_point(coord, mode).normalize()
}

/// Same as [`decode`] but without the final normalization: the result lies on
/// the unit octahedron (`|x| + |y| + |z| == 1`).
pub fn octahedron_point(coord: Vec2, mode: GridMode) -> Vec3 {
    match mode {
        GridMode::Spherical => {
            let mut n = Vec3::new(coord.x, 1.0 - coord.x.abs() - coord.y.abs(), coord.y);
            let t = (-n.y).clamp(0.0, 1.0);
            n.x += if n.x >= 0.0 { -t } else { t };
            n.z += if n.z >= 0.0 { -t } else { t };
            n
        }
        GridMode::Hemispherical => {
            let c = Vec2::new(coord.x + coord.y, coord.x - coord.y) * 0.5;
            Vec3::new(c.x, 1.0 - (c.x.abs() + c.y.abs()), c.y)
        }
    }
}

/// Inverse of [`decode`].
pub fn encode(dir: Vec3, mode: GridMode) -> Vec2 {
    let p = dir / (dir.x.abs() + dir.y.abs() + dir.z.abs());
    match mode {
        GridMode::Spherical => {
            if p.y >= 0.0 {
                Vec2::new(p.x, p.z)
            } else {
                Vec2::new(
                    (1.0 - p.z.abs()) * sign_not_zero(p.x),
                    (1.0 - p.x.abs()) * sign_not_zero(p.z),
                )
            }
        }
        GridMode::Hemispherical => Vec2::new(p.x + p.z, p.x - p.z),
    }
}

/// Up vector to orient a camera looking back along `dir`.
pub fn view_up(dir: Vec3) -> Vec3 {
    if dir.y.abs() > 0.5 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

fn sign_not_zero(v: f32) -> f32 {
    if v >= 0.0 {
        1.0
    } else {
        -1.0
    }
}
