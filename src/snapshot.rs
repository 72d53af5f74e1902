use bevy::prelude::*;

use crate::{
    oct_coords::{decode, view_up},
    GridMode,
};

/// A capture camera pose on the sampling sphere.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Snapshot {
    pub position: Vec3,
    /// Unit vector pointing from `position` back toward the origin.
    pub view_direction: Vec3,
}

impl Snapshot {
    pub fn transform(&self) -> Transform {
        Transform::from_translation(self.position)
            .looking_to(self.view_direction, view_up(self.view_direction))
    }
}

/// `frames * frames` snapshots, row major over the octahedral grid.
#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotSet {
    pub frames: u32,
    pub radius: f32,
    pub origin: Vec3,
    pub mode: GridMode,
    snapshots: Vec<Snapshot>,
}

impl SnapshotSet {
    pub fn generate(frames: u32, radius: f32, origin: Vec3, mode: GridMode) -> Self {
        let frames_minus_one = frames.saturating_sub(1).max(1) as f32;
        let mut snapshots = Vec::with_capacity((frames * frames) as usize);
        for y in 0..frames {
            for x in 0..frames {
                let coord = Vec2::new(x as f32, y as f32) / frames_minus_one * 2.0 - 1.0;
                let dir = decode(coord, mode).normalize();
                snapshots.push(Snapshot {
                    position: origin + dir * radius,
                    view_direction: -dir,
                });
            }
        }

        Self {
            frames,
            radius,
            origin,
            mode,
            snapshots,
        }
    }

    /// Same grid, new radius.
    pub fn with_radius(&self, radius: f32) -> Self {
        Self::generate(self.frames, radius, self.origin, self.mode)
    }

    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.snapshots.get(index)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    #[cfg(test)]
    pub(crate) fn truncate(&mut self, len: usize) {
        self.snapshots.truncate(len);
    }
}

/// Grid cell of a flattened frame index.
pub fn index_to_cell(index: u32, frames: u32) -> UVec2 {
    let x = index % frames;
    let y = (index - x) / frames;
    UVec2::new(x, y)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn hemisphere_snapshots_on_sphere() {
        let set = SnapshotSet::generate(4, 2.0, Vec3::ZERO, GridMode::Hemispherical);
        assert_eq!(set.len(), 16);
        for snap in set.iter() {
            assert!((snap.position.length() - 2.0).abs() < 1e-5);
            assert!(snap
                .view_direction
                .abs_diff_eq(-snap.position.normalize(), 1e-5));
            assert!(snap.position.y >= -1e-6);
        }
    }

    #[test]
    fn offset_origin() {
        let origin = Vec3::new(3.0, -1.0, 0.5);
        let set = SnapshotSet::generate(6, 1.5, origin, GridMode::Spherical);
        assert_eq!(set.len(), 36);
        for snap in set.iter() {
            assert!(((snap.position - origin).length() - 1.5).abs() < 1e-5);
            let forward = snap.transform().forward();
            assert!(forward.abs_diff_eq(snap.view_direction, 1e-4));
        }
    }

    #[test]
    fn regenerate_only_changes_radius() {
        let set = SnapshotSet::generate(8, 1.0, Vec3::ONE, GridMode::Spherical);
        let tighter = set.with_radius(0.5);
        for (a, b) in set.iter().zip(tighter.iter()) {
            assert_eq!(a.view_direction, b.view_direction);
            assert!((b.position - Vec3::ONE).abs_diff_eq((a.position - Vec3::ONE) * 0.5, 1e-5));
        }
        assert_eq!(set, set.with_radius(1.0));
    }

    #[test]
    fn cell_mapping_is_bijective() {
        for frames in [2, 4, 12, 32] {
            let cells: HashSet<_> = (0..frames * frames)
                .map(|i| index_to_cell(i, frames))
                .collect();
            assert_eq!(cells.len(), (frames * frames) as usize);
            assert!(cells.iter().all(|c| c.x < frames && c.y < frames));
        }
        assert_eq!(index_to_cell(13, 4), UVec2::new(1, 3));
    }
}
