use std::path::{Path, PathBuf};

use bevy::{prelude::*, render::render_asset::RenderAssetUsages};
use image::Rgba32FImage;
use wgpu::{Extent3d, TextureDimension, TextureFormat};

use crate::{
    config::{AtlasResolution, ImposterConfig},
    GridMode,
};

/// Result of a bake: the two atlases and what is needed to sample them.
#[derive(Asset, TypePath, Clone, Debug)]
pub struct ImposterAsset {
    pub name: String,
    /// Color with distance field alpha.
    pub base: Rgba32FImage,
    /// World normal in rgb, depth in alpha.
    pub pack: Rgba32FImage,
    /// Radius of the capture sphere after cropping.
    pub radius: f32,
    pub frames: u32,
    pub mode: GridMode,
    /// Capture sphere center relative to the baked entity.
    pub offset: Vec3,
    pub atlas_resolution: AtlasResolution,
    pub suffix: String,
    /// Scene file the baked entity was loaded from, if any.
    pub source: Option<PathBuf>,
}

impl ImposterAsset {
    /// Blank atlases sized for `config`.
    pub fn new(name: impl Into<String>, config: &ImposterConfig) -> Self {
        let size = config.atlas_resolution.pixels();
        Self {
            name: name.into(),
            base: Rgba32FImage::new(size, size),
            pack: Rgba32FImage::new(size, size),
            radius: 0.0,
            frames: config.normalized_frames(),
            mode: config.mode,
            offset: Vec3::ZERO,
            atlas_resolution: config.atlas_resolution,
            suffix: config.suffix.clone(),
            source: None,
        }
    }

    pub fn cell_resolution(&self) -> u32 {
        self.atlas_resolution.pixels() / self.frames.max(1)
    }

    /// Name with the configured suffix appended.
    pub fn prefab_name(&self) -> String {
        if self.suffix.is_empty() {
            self.name.clone()
        } else {
            format!("{}_{}", self.name, self.suffix)
        }
    }

    /// `<dir>/<stem>_Imposter.imp` next to the source when known, otherwise
    /// the suffixed name inside `fallback_dir`.
    pub fn output_path(&self, fallback_dir: impl AsRef<Path>) -> PathBuf {
        match &self.source {
            Some(source) => {
                let stem = source
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| self.name.clone());
                source
                    .parent()
                    .unwrap_or_else(|| Path::new(""))
                    .join(format!("{stem}_Imposter.imp"))
            }
            None => fallback_dir
                .as_ref()
                .join(format!("{}.imp", self.prefab_name())),
        }
    }

    pub fn base_image(&self) -> Image {
        atlas_image(&self.base)
    }

    pub fn pack_image(&self) -> Image {
        atlas_image(&self.pack)
    }
}

fn atlas_image(atlas: &Rgba32FImage) -> Image {
    Image::new(
        Extent3d {
            width: atlas.width(),
            height: atlas.height(),
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        bytemuck::cast_slice(atlas.as_raw()).to_vec(),
        TextureFormat::Rgba32Float,
        RenderAssetUsages::default(),
    )
}
