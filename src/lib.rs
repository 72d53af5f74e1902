pub mod asset;
pub mod asset_loader;
pub mod backend;
pub mod batch;
pub mod bounds;
pub mod capture;
pub mod compositor;
pub mod config;
pub mod error;
pub mod kernels;
pub mod mesh;
pub mod oct_coords;
pub mod scene;
pub mod snapshot;
pub mod software;
pub mod workgroup;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GridMode {
    Spherical,
    #[default]
    Hemispherical,
}

impl GridMode {
    pub fn from_hemisphere(hemisphere: bool) -> Self {
        if hemisphere {
            GridMode::Hemispherical
        } else {
            GridMode::Spherical
        }
    }

    pub fn is_hemisphere(self) -> bool {
        self == GridMode::Hemispherical
    }
}

pub use asset::ImposterAsset;
pub use asset_loader::ImposterAssetPlugin;
pub use backend::{ComputeBackend, RenderBackend};
pub use batch::bake_batch;
pub use bounds::{estimate_bounds, BoundingSphere};
pub use capture::{BakeRequest, CaptureController};
pub use config::{AtlasResolution, ImposterConfig};
pub use error::{BackendError, BakeError};
pub use software::SoftwareBackend;
