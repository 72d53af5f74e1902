use bevy::log::debug;

use crate::{
    backend::{
        Backend, BlitOp, BufferHandle, Kernel, Slot, SurfaceDescriptor, SurfaceHandle,
        TransientResources, Uniform,
    },
    error::BackendError,
    workgroup::WorkgroupSize,
};

/// Clear value of the normal and depth frame: no normal, mid depth.
pub const NORMAL_DEPTH_CLEAR: [f32; 4] = [0.0, 0.0, 0.0, 0.5];

/// Raw captures of one snapshot at working resolution.
#[derive(Clone, Copy, Debug)]
pub struct RawFrame {
    pub color: SurfaceHandle,
    pub alpha: SurfaceHandle,
    pub normal_depth: SurfaceHandle,
}

/// Finished cell images, valid until the next call to
/// [`FrameCompositor::process`].
#[derive(Clone, Copy, Debug)]
pub struct CompositedFrame {
    pub base: SurfaceHandle,
    pub pack: SurfaceHandle,
}

/// Turns raw captures into atlas cells: solidified coverage, box downsample,
/// edge dilation and a distance field in the base alpha.
pub struct FrameCompositor {
    cell_resolution: u32,
    super_frame: SurfaceHandle,
    super_temp: SurfaceHandle,
    frame: SurfaceHandle,
    pack_frame: SurfaceHandle,
    temp_frame: SurfaceHandle,
    min_distances: BufferHandle,
    max_distance: BufferHandle,
}

impl FrameCompositor {
    /// Allocates the working surfaces through `resources`, which releases them.
    pub fn new<B: Backend>(
        resources: &mut TransientResources<'_, B>,
        cell_resolution: u32,
        working_resolution: u32,
    ) -> Result<Self, BackendError> {
        let texels = (cell_resolution * cell_resolution) as usize;
        Ok(Self {
            cell_resolution,
            super_frame: resources.surface(SurfaceDescriptor::square(
                "imposter_super_frame",
                working_resolution,
                false,
            ))?,
            super_temp: resources.surface(SurfaceDescriptor::square(
                "imposter_super_temp",
                working_resolution,
                false,
            ))?,
            frame: resources.surface(SurfaceDescriptor::square(
                "imposter_frame",
                cell_resolution,
                true,
            ))?,
            pack_frame: resources.surface(SurfaceDescriptor::square(
                "imposter_pack_frame",
                cell_resolution,
                true,
            ))?,
            temp_frame: resources.surface(SurfaceDescriptor::square(
                "imposter_temp_frame",
                cell_resolution,
                true,
            ))?,
            min_distances: resources.buffer(texels)?,
            max_distance: resources.buffer(1)?,
        })
    }

    pub fn process<B: Backend>(
        &self,
        backend: &mut B,
        raw: RawFrame,
    ) -> Result<CompositedFrame, BackendError> {
        let texels = self.cell_resolution * self.cell_resolution;
        let groups = WorkgroupSize::for_elements(texels);

        // binary coverage with the raw color underneath
        backend.blit(raw.alpha, self.super_temp, BlitOp::Solidify)?;
        backend.blit(
            raw.color,
            self.super_frame,
            BlitOp::Combine {
                alpha: self.super_temp,
            },
        )?;

        backend.blit(self.super_frame, self.frame, BlitOp::Copy)?;
        backend.blit(raw.normal_depth, self.pack_frame, BlitOp::Copy)?;

        // normals first, masked by the downsampled coverage
        backend.set_bool(Uniform::AllChannels, true);
        self.dilate(backend, self.pack_frame, groups)?;
        backend.blit(self.temp_frame, self.pack_frame, BlitOp::Copy)?;

        backend.set_bool(Uniform::AllChannels, false);
        self.dilate(backend, self.frame, groups)?;

        backend.bind_surface(Kernel::MinDistance, Slot::Mask, self.temp_frame);
        backend.bind_buffer(Kernel::MinDistance, Slot::MinDistances, self.min_distances);
        backend.dispatch(Kernel::MinDistance, groups)?;

        backend.bind_buffer(Kernel::MaxDistance, Slot::MinDistances, self.min_distances);
        backend.bind_buffer(Kernel::MaxDistance, Slot::MaxDistance, self.max_distance);
        backend.set_uint(Uniform::ElementCount, texels);
        backend.dispatch(Kernel::MaxDistance, WorkgroupSize::SINGLE)?;

        backend.bind_surface(Kernel::DistanceAlpha, Slot::Source, self.temp_frame);
        backend.bind_buffer(Kernel::DistanceAlpha, Slot::MinDistances, self.min_distances);
        backend.bind_buffer(Kernel::DistanceAlpha, Slot::MaxDistance, self.max_distance);
        backend.bind_surface(Kernel::DistanceAlpha, Slot::Result, self.frame);
        backend.dispatch(Kernel::DistanceAlpha, groups)?;

        debug!("composited {texels} texels");
        Ok(CompositedFrame {
            base: self.frame,
            pack: self.pack_frame,
        })
    }

    /// Dilates `source` into the temp frame, masked by the base frame.
    fn dilate<B: Backend>(
        &self,
        backend: &mut B,
        source: SurfaceHandle,
        groups: WorkgroupSize,
    ) -> Result<(), BackendError> {
        backend.bind_surface(Kernel::Dilate, Slot::Source, source);
        backend.bind_surface(Kernel::Dilate, Slot::Mask, self.frame);
        backend.bind_surface(Kernel::Dilate, Slot::Result, self.temp_frame);
        backend.dispatch(Kernel::Dilate, groups)
    }
}
