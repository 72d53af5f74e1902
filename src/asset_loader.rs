use std::{
    io::{Cursor, Read, Write},
    path::Path,
};

use anyhow::anyhow;
use bevy::{
    asset::{AssetLoader, AsyncReadExt},
    prelude::*,
};
use image::{DynamicImage, ImageFormat, Rgba32FImage};
use serde::{Deserialize, Serialize};

use crate::{asset::ImposterAsset, config::AtlasResolution, GridMode};

pub const EXTENSION: &str = "imp";

const BASE_ENTRY: &str = "base.png";
const PACK_ENTRY: &str = "pack.png";
const SETTINGS_ENTRY: &str = "settings.ron";

pub struct ImposterAssetPlugin;

impl Plugin for ImposterAssetPlugin {
    fn build(&self, app: &mut App) {
        app.init_asset::<ImposterAsset>()
            .register_asset_loader(ImposterLoader);
    }
}

/// Everything but the atlases, stored as `settings.ron` inside the archive.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct ImposterSettings {
    pub name: String,
    pub frames: u32,
    pub radius: f32,
    pub mode: GridMode,
    pub offset: [f32; 3],
    pub atlas_resolution: AtlasResolution,
    pub suffix: String,
}

pub struct ImposterLoader;

impl AssetLoader for ImposterLoader {
    type Asset = ImposterAsset;

    type Settings = ();

    type Error = anyhow::Error;

    fn load<'a>(
        &'a self,
        reader: &'a mut bevy::asset::io::Reader,
        _: &'a Self::Settings,
        load_context: &'a mut bevy::asset::LoadContext,
    ) -> impl bevy::utils::ConditionalSendFuture<Output = Result<Self::Asset, Self::Error>> {
        Box::pin(async move {
            let mut bytes = Vec::new();
            reader
                .read_to_end(&mut bytes)
                .await
                .map_err(|_| anyhow!("read failed"))?;
            let mut asset = read_archive(&bytes)?;
            asset.source = Some(load_context.path().to_owned());
            load_context.add_labeled_asset("base".to_owned(), asset.base_image());
            load_context.add_labeled_asset("pack".to_owned(), asset.pack_image());
            Ok(asset)
        })
    }

    fn extensions(&self) -> &[&str] {
        &[EXTENSION]
    }
}

fn encode_png(atlas: &Rgba32FImage) -> Result<Vec<u8>, anyhow::Error> {
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgba32F(atlas.clone())
        .to_rgba8()
        .write_to(&mut bytes, ImageFormat::Png)?;
    Ok(bytes.into_inner())
}

fn decode_png(bytes: &[u8]) -> Result<Rgba32FImage, anyhow::Error> {
    Ok(image::load_from_memory_with_format(bytes, ImageFormat::Png)?.to_rgba32f())
}

pub fn write_asset(path: impl AsRef<Path>, asset: &ImposterAsset) -> Result<(), anyhow::Error> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);

    zip.start_file(BASE_ENTRY, options)?;
    zip.write_all(&encode_png(&asset.base)?)?;
    zip.start_file(PACK_ENTRY, options)?;
    zip.write_all(&encode_png(&asset.pack)?)?;

    let settings = ImposterSettings {
        name: asset.name.clone(),
        frames: asset.frames,
        radius: asset.radius,
        mode: asset.mode,
        offset: asset.offset.to_array(),
        atlas_resolution: asset.atlas_resolution,
        suffix: asset.suffix.clone(),
    };
    zip.start_file(SETTINGS_ENTRY, options)?;
    zip.write_all(ron::ser::to_string_pretty(&settings, default())?.as_bytes())?;
    zip.finish()?;
    info!("imposter saved to {}", path.display());
    Ok(())
}

pub fn read_archive(bytes: &[u8]) -> Result<ImposterAsset, anyhow::Error> {
    let mut zip = zip::ZipArchive::new(Cursor::new(bytes))?;

    let mut text = String::new();
    zip.by_name(SETTINGS_ENTRY)?.read_to_string(&mut text)?;
    let settings: ImposterSettings = ron::from_str(&text)?;

    let mut entry = |name: &str| -> Result<Rgba32FImage, anyhow::Error> {
        let mut png = Vec::new();
        zip.by_name(name)?.read_to_end(&mut png)?;
        decode_png(&png)
    };
    let base = entry(BASE_ENTRY)?;
    let pack = entry(PACK_ENTRY)?;

    let size = settings.atlas_resolution.pixels();
    if base.dimensions() != (size, size) || pack.dimensions() != (size, size) {
        anyhow::bail!(
            "atlas size {:?} does not match resolution {size}",
            base.dimensions()
        );
    }

    Ok(ImposterAsset {
        name: settings.name,
        base,
        pack,
        radius: settings.radius,
        frames: settings.frames,
        mode: settings.mode,
        offset: Vec3::from_array(settings.offset),
        atlas_resolution: settings.atlas_resolution,
        suffix: settings.suffix,
        source: None,
    })
}

pub fn read_asset(path: impl AsRef<Path>) -> Result<ImposterAsset, anyhow::Error> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let mut asset = read_archive(&bytes)?;
    asset.source = Some(path.to_owned());
    Ok(asset)
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;
    use crate::config::ImposterConfig;

    #[test]
    fn archive_round_trip() {
        let config = ImposterConfig {
            atlas_resolution: AtlasResolution::R1024,
            frames: 16,
            mode: GridMode::Spherical,
            ..Default::default()
        };
        let mut asset = ImposterAsset::new("rock", &config);
        asset.radius = 1.25;
        asset.offset = Vec3::new(0.0, 0.5, -0.25);
        asset.base.put_pixel(3, 7, Rgba([1.0, 0.0, 0.5, 1.0]));
        asset.pack.put_pixel(1000, 2, Rgba([0.5, 0.5, 1.0, 0.25]));

        let path = std::env::temp_dir()
            .join(format!("imposter_archive_{}", std::process::id()))
            .join("rock.imp");
        write_asset(&path, &asset).unwrap();
        let loaded = read_asset(&path).unwrap();
        std::fs::remove_dir_all(path.parent().unwrap()).ok();

        assert_eq!(loaded.name, "rock");
        assert_eq!(loaded.frames, 16);
        assert_eq!(loaded.radius, 1.25);
        assert_eq!(loaded.mode, GridMode::Spherical);
        assert_eq!(loaded.offset, asset.offset);
        assert_eq!(loaded.suffix, "IMP");
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));

        // 8 bit quantization
        let texel = loaded.base.get_pixel(3, 7).0;
        assert_eq!(texel[0], 1.0);
        assert!((texel[2] - 0.5).abs() < 1.0 / 255.0);
        let texel = loaded.pack.get_pixel(1000, 2).0;
        assert!((texel[3] - 0.25).abs() < 1.0 / 255.0);
        assert_eq!(loaded.base.get_pixel(0, 0).0, [0.0; 4]);
    }

    #[test]
    fn loads_through_asset_server() {
        let dir = std::env::temp_dir().join(format!("imposter_server_{}", std::process::id()));
        let config = ImposterConfig {
            atlas_resolution: AtlasResolution::R1024,
            frames: 8,
            ..Default::default()
        };
        let mut asset = ImposterAsset::new("crate", &config);
        asset.radius = 2.0;
        asset.base.put_pixel(5, 5, Rgba([1.0, 1.0, 1.0, 1.0]));
        write_asset(dir.join("crate.imp"), &asset).unwrap();

        let mut app = App::new();
        app.add_plugins((
            MinimalPlugins,
            AssetPlugin {
                file_path: dir.to_string_lossy().into_owned(),
                meta_check: bevy::asset::AssetMetaCheck::Never,
                ..Default::default()
            },
            ImposterAssetPlugin,
        ))
        .init_asset::<Image>();

        let server = app.world().resource::<AssetServer>().clone();
        let handle = server.load::<ImposterAsset>("crate.imp");
        let base = server.load::<Image>("crate.imp#base");
        for _ in 0..2000 {
            app.update();
            if server.is_loaded_with_dependencies(&handle)
                || matches!(server.load_state(&handle), bevy::asset::LoadState::Failed(_))
            {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        std::fs::remove_dir_all(&dir).ok();

        let loaded = app
            .world()
            .resource::<Assets<ImposterAsset>>()
            .get(&handle)
            .unwrap();
        assert_eq!(loaded.name, "crate");
        assert_eq!(loaded.radius, 2.0);
        assert!(loaded.source.as_deref().unwrap().ends_with("crate.imp"));
        let image = app.world().resource::<Assets<Image>>().get(&base).unwrap();
        assert_eq!(image.width(), 1024);
        assert_eq!(image.texture_descriptor.format, wgpu::TextureFormat::Rgba32Float);

        assert_eq!(ImposterLoader.extensions(), &[EXTENSION]);
    }

    #[test]
    fn rejects_missing_entries() {
        let mut bytes = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut bytes);
            zip.start_file(SETTINGS_ENTRY, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"(name: \"x\")").unwrap();
            zip.finish().unwrap();
        }
        assert!(read_archive(bytes.get_ref()).is_err());
        assert!(read_archive(b"not a zip").is_err());
    }
}
