//! Two pass capture of a target entity into impostor atlases.
//!
//! The measurement pass accumulates the silhouette of every snapshot into one
//! surface to find how much of the view the target actually covers, then the
//! capture sphere is shrunk to fit. The final pass renders color, coverage and
//! normal/depth per snapshot, composites them and copies the result into the
//! snapshot's atlas cell.

use std::ops::ControlFlow;

use bevy::{prelude::*, render::view::RenderLayers};

use crate::{
    asset::ImposterAsset,
    backend::{
        Backend, CaptureCamera, Kernel, OverrideShader, SurfaceDescriptor, TransientResources,
    },
    bounds::estimate_bounds,
    compositor::{FrameCompositor, RawFrame, NORMAL_DEPTH_CLEAR},
    config::ImposterConfig,
    error::BakeError,
    kernels,
    scene::SceneOverrides,
    snapshot::{index_to_cell, SnapshotSet},
};

/// Texels added to each side of the measured coverage box.
pub const MEASURE_PADDING: f32 = 2.0;

/// What to bake: the root of the target hierarchy and optionally the root of
/// a light rig to render it with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BakeRequest {
    pub target: Entity,
    pub lighting_rig: Option<Entity>,
}

impl BakeRequest {
    pub fn new(target: Entity) -> Self {
        Self {
            target,
            lighting_rig: None,
        }
    }

    pub fn with_lighting_rig(mut self, rig: Entity) -> Self {
        self.lighting_rig = Some(rig);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapturePass {
    Measure,
    Final,
}

/// Sent after every captured snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureProgress {
    pub pass: CapturePass,
    pub index: usize,
    pub total: usize,
}

pub struct CaptureController {
    config: ImposterConfig,
}

impl CaptureController {
    /// Takes its own normalized copy of `config`; later changes to the
    /// caller's config do not affect bakes run by this controller.
    pub fn new(config: &ImposterConfig) -> Self {
        Self {
            config: config.clone().normalized(),
        }
    }

    pub fn config(&self) -> &ImposterConfig {
        &self.config
    }

    pub fn frame_count(&self) -> usize {
        let frames = self.config.frames as usize;
        frames * frames
    }

    pub fn bake<B: Backend>(
        &self,
        world: &mut World,
        backend: &mut B,
        request: BakeRequest,
    ) -> Result<ImposterAsset, BakeError> {
        self.bake_with_progress(world, backend, request, |_| ControlFlow::Continue(()))
    }

    /// Like [`Self::bake`], calling `observer` after every snapshot. Returning
    /// `ControlFlow::Break` cancels the bake; the scene and the backend are
    /// restored either way.
    pub fn bake_with_progress<B: Backend>(
        &self,
        world: &mut World,
        backend: &mut B,
        request: BakeRequest,
        mut observer: impl FnMut(CaptureProgress) -> ControlFlow<()>,
    ) -> Result<ImposterAsset, BakeError> {
        let target = request.target;
        let lighting_rig = request.lighting_rig.or(self.config.lighting_rig);
        if world.get_entity(target).is_none() {
            return Err(BakeError::InvalidConfig(format!(
                "target {target:?} does not exist"
            )));
        }
        if let Some(rig) = lighting_rig.filter(|rig| world.get_entity(*rig).is_none()) {
            return Err(BakeError::InvalidConfig(format!(
                "lighting rig {rig:?} does not exist"
            )));
        }
        check_backend(backend, lighting_rig.is_some())?;

        let bounds = estimate_bounds(world, target)
            .filter(|bounds| bounds.radius > f32::EPSILON)
            .ok_or(BakeError::NoGeometry(target))?;
        let root = world
            .get::<GlobalTransform>(target)
            .map(GlobalTransform::translation)
            .unwrap_or(Vec3::ZERO);
        let name = world
            .get::<Name>(target)
            .map(|name| name.as_str().to_owned())
            .unwrap_or_else(|| format!("imposter_{}", target.index()));
        let mut asset = ImposterAsset::new(name, &self.config);
        info!(
            "baking {} ({}x{} frames into {}px atlases)",
            asset.name,
            self.config.frames,
            self.config.frames,
            self.config.atlas_resolution.pixels()
        );

        let scene = SceneOverrides::apply(world, target, self.config.capture_layer, lighting_rig);
        let mut resources = TransientResources::new(backend);
        let mut camera = CaptureCamera::new(
            bounds.radius,
            RenderLayers::layer(self.config.capture_layer),
        );
        let snapshots = SnapshotSet::generate(
            self.config.frames,
            bounds.radius,
            bounds.center,
            self.config.mode,
        );

        let ratio = self
            .measure(
                &scene,
                &mut resources,
                &mut camera,
                &snapshots,
                root,
                &mut observer,
            )?
            .ok_or(BakeError::NoGeometry(target))?;
        let radius = bounds.radius * ratio;
        camera.set_radius(radius);
        let snapshots = snapshots.with_radius(radius);
        debug!("radius {} cropped to {radius}", bounds.radius);

        let color_shader = match lighting_rig {
            Some(_) => None,
            None => Some(OverrideShader::Albedo),
        };
        self.capture(
            &scene,
            &mut resources,
            &mut camera,
            &snapshots,
            color_shader,
            &mut asset,
            &mut observer,
        )?;

        asset.radius = radius;
        asset.offset = bounds.offset;
        info!("baked {}", asset.name);
        Ok(asset)
    }

    /// Returns the factor the capture radius can shrink by while still
    /// containing the target from every snapshot, or `None` when nothing was
    /// drawn from any of them.
    fn measure<B: Backend>(
        &self,
        scene: &World,
        resources: &mut TransientResources<'_, B>,
        camera: &mut CaptureCamera,
        snapshots: &SnapshotSet,
        root: Vec3,
        observer: &mut impl FnMut(CaptureProgress) -> ControlFlow<()>,
    ) -> Result<Option<f32>, BakeError> {
        let resolution = self.config.cell_resolution();
        let size = resolution as f32;
        let surface = resources.surface(SurfaceDescriptor::square(
            "imposter_measure",
            resolution,
            false,
        ))?;
        resources.clear(surface, [0.0; 4])?;

        let mut min = Vec2::splat(size);
        let mut max = Vec2::ZERO;
        let total = self.frame_count();
        for index in 0..total {
            let Some(snapshot) = snapshots.get(index) else {
                warn!("no snapshot for frame {index} of {total}, skipping");
                continue;
            };
            camera.transform = snapshot.transform();
            resources.render(scene, camera, surface, Some(OverrideShader::Silhouette))?;

            // keep the root in frame even where it is outside the geometry
            let (viewport, _) = camera.world_to_viewport(root);
            let root_texel = (viewport * size).clamp(Vec2::ZERO, Vec2::splat(size));
            min = min.min(root_texel);
            max = max.max(root_texel);

            report(observer, CapturePass::Measure, index, total)?;
        }

        let coverage = resources.readback(surface)?;
        let mut covered = false;
        for (x, y, texel) in coverage.enumerate_pixels() {
            if kernels::is_covered(texel[3]) {
                let p = Vec2::new(x as f32, y as f32);
                min = min.min(p);
                max = max.max(p);
                covered = true;
            }
        }
        if !covered {
            warn!("target produced no coverage in any snapshot");
            return Ok(None);
        }

        let extent = max - min + MEASURE_PADDING;
        let ratio = extent.max_element() / size;
        debug!("coverage {min} to {max}, crop ratio {ratio}");
        Ok(Some(ratio))
    }

    #[allow(clippy::too_many_arguments)]
    fn capture<B: Backend>(
        &self,
        scene: &World,
        resources: &mut TransientResources<'_, B>,
        camera: &mut CaptureCamera,
        snapshots: &SnapshotSet,
        color_shader: Option<OverrideShader>,
        asset: &mut ImposterAsset,
        observer: &mut impl FnMut(CaptureProgress) -> ControlFlow<()>,
    ) -> Result<(), BakeError> {
        let cell = self.config.cell_resolution();
        let working = self.config.working_resolution();
        let atlas = self.config.atlas_resolution.pixels();

        let base_atlas =
            resources.surface(SurfaceDescriptor::square("imposter_base_atlas", atlas, true))?;
        let pack_atlas =
            resources.surface(SurfaceDescriptor::square("imposter_pack_atlas", atlas, true))?;
        resources.clear(base_atlas, [0.0; 4])?;
        resources.clear(pack_atlas, [0.0; 4])?;

        let raw = RawFrame {
            color: resources.surface(SurfaceDescriptor::square(
                "imposter_raw_color",
                working,
                false,
            ))?,
            alpha: resources.surface(SurfaceDescriptor::square(
                "imposter_raw_alpha",
                working,
                false,
            ))?,
            normal_depth: resources.surface(SurfaceDescriptor::square(
                "imposter_raw_normal_depth",
                working,
                false,
            ))?,
        };
        let compositor = FrameCompositor::new(resources, cell, working)?;

        let total = self.frame_count();
        for index in 0..total {
            let Some(snapshot) = snapshots.get(index) else {
                warn!("no snapshot for frame {index} of {total}, leaving its cell empty");
                continue;
            };
            camera.transform = snapshot.transform();

            resources.clear(raw.color, [0.0; 4])?;
            resources.render(scene, camera, raw.color, color_shader)?;
            resources.clear(raw.alpha, [0.0; 4])?;
            resources.render(scene, camera, raw.alpha, Some(OverrideShader::Silhouette))?;
            resources.clear(raw.normal_depth, NORMAL_DEPTH_CLEAR)?;
            resources.render(
                scene,
                camera,
                raw.normal_depth,
                Some(OverrideShader::NormalDepth),
            )?;

            let frame = compositor.process(&mut **resources, raw)?;
            let origin = index_to_cell(index as u32, self.config.frames) * cell;
            resources.copy_region(frame.base, base_atlas, origin)?;
            resources.copy_region(frame.pack, pack_atlas, origin)?;

            report(observer, CapturePass::Final, index, total)?;
        }

        asset.base = resources.readback(base_atlas)?;
        asset.pack = resources.readback(pack_atlas)?;
        Ok(())
    }
}

/// Fails before anything is rendered when the backend lacks a shader or
/// kernel the bake needs.
fn check_backend<B: Backend>(backend: &B, lit: bool) -> Result<(), BakeError> {
    let mut shaders = vec![OverrideShader::Silhouette, OverrideShader::NormalDepth];
    if !lit {
        shaders.push(OverrideShader::Albedo);
    }
    if let Some(shader) = shaders.into_iter().find(|s| !backend.has_override(*s)) {
        error!("imposter bake needs the {shader:?} override shader");
        return Err(BakeError::ResourceUnavailable(format!(
            "{shader:?} override shader"
        )));
    }
    if let Some(kernel) = Kernel::ALL.into_iter().find(|k| !backend.has_kernel(*k)) {
        error!("imposter bake needs the {kernel:?} kernel");
        return Err(BakeError::ResourceUnavailable(format!("{kernel:?} kernel")));
    }
    Ok(())
}

fn report(
    observer: &mut impl FnMut(CaptureProgress) -> ControlFlow<()>,
    pass: CapturePass,
    index: usize,
    total: usize,
) -> Result<(), BakeError> {
    match observer(CaptureProgress { pass, index, total }) {
        ControlFlow::Continue(()) => Ok(()),
        ControlFlow::Break(()) => {
            info!("bake cancelled during {pass:?} pass");
            Err(BakeError::Cancelled {
                completed: index + 1,
                total,
            })
        }
    }
}
