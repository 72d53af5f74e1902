use bevy::prelude::Entity;

use crate::backend::{BufferHandle, Kernel, Slot, SurfaceHandle};

/// Failures reported by a render or compute backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("unknown surface {0:?}")]
    UnknownSurface(SurfaceHandle),

    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferHandle),

    #[error("{kernel:?} has nothing bound to {slot:?}")]
    Unbound { kernel: Kernel, slot: Slot },

    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("region at {x},{y} does not fit in the destination surface")]
    OutOfBounds { x: u32, y: u32 },

    #[error("{0}")]
    Device(String),
}

/// Reasons a bake stops without producing an asset.
#[derive(Debug, thiserror::Error)]
pub enum BakeError {
    #[error("no renderable geometry under {0:?}")]
    NoGeometry(Entity),

    #[error("backend does not provide {0}")]
    ResourceUnavailable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("bake cancelled after {completed} of {total} snapshots")]
    Cancelled { completed: usize, total: usize },

    #[error(transparent)]
    Backend(#[from] BackendError),
}
