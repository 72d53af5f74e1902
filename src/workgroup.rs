use bevy::math::UVec3;

/// Threads per workgroup.
pub const GROUP_SIZE: u32 = 256;
/// Maximum number of groups along a single dispatch dimension.
pub const MAX_DIM_GROUPS: u32 = 1024;
pub const MAX_DIM_THREADS: u32 = GROUP_SIZE * MAX_DIM_GROUPS;

/// Dispatch dimensions covering a one dimensional range of work items.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl WorkgroupSize {
    pub const SINGLE: Self = Self { x: 1, y: 1, z: 1 };

    /// Smallest dispatch covering `element_count` items without exceeding
    /// [`MAX_DIM_GROUPS`] along x. Trailing threads of the last group are inert
    /// and must be bounds checked by the kernel.
    pub fn for_elements(element_count: u32) -> Self {
        if element_count <= MAX_DIM_THREADS {
            Self {
                x: element_count.div_ceil(GROUP_SIZE).max(1),
                y: 1,
                z: 1,
            }
        } else {
            Self {
                x: MAX_DIM_GROUPS,
                y: element_count.div_ceil(MAX_DIM_THREADS),
                z: 1,
            }
        }
    }

    pub fn group_count(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }

    pub fn thread_count(&self) -> u64 {
        self.group_count() * GROUP_SIZE as u64
    }

    /// Flattened index of thread `local` in workgroup `group`.
    pub fn global_index(group: UVec3, local: u32) -> u64 {
        group.z as u64 * MAX_DIM_THREADS as u64 * MAX_DIM_GROUPS as u64
            + group.y as u64 * MAX_DIM_THREADS as u64
            + group.x as u64 * GROUP_SIZE as u64
            + local as u64
    }
}
