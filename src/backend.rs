//! Interfaces to the renderer and compute device that produce the captured
//! frames. The bake treats both as opaque: it only configures cameras,
//! schedules passes and moves pixels between surfaces.

use std::ops::{Deref, DerefMut};

use bevy::{prelude::*, render::view::RenderLayers};
use image::Rgba32FImage;
use wgpu::TextureFormat;

use crate::{error::BackendError, workgroup::WorkgroupSize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceDescriptor {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Surface may be bound as a compute kernel output.
    pub storage: bool,
}

impl SurfaceDescriptor {
    pub fn square(label: &'static str, size: u32, storage: bool) -> Self {
        Self {
            label,
            width: size,
            height: size,
            format: TextureFormat::Rgba8Unorm,
            storage,
        }
    }
}

/// Shader swapped in for every material slot during a render.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OverrideShader {
    /// Unlit material base color with alpha.
    Albedo,
    /// Opaque white wherever geometry covers the pixel.
    Silhouette,
    /// World space normal in rgb, linear depth in alpha.
    NormalDepth,
}

/// Fixed function processing applied while copying one surface into another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlitOp {
    /// Resample to the destination size (box filter when shrinking).
    Copy,
    /// Replace every channel with `step(>0, alpha)`.
    Solidify,
    /// Source rgb with the alpha of `alpha`.
    Combine { alpha: SurfaceHandle },
}

/// Orthographic projector looking down its local -Z.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureCamera {
    pub transform: Transform,
    pub near: f32,
    pub far: f32,
    /// Half the height (and width) of the view volume.
    pub half_height: f32,
    pub layers: RenderLayers,
}

impl CaptureCamera {
    pub fn new(radius: f32, layers: RenderLayers) -> Self {
        Self {
            transform: Transform::default(),
            near: 0.0,
            far: radius * 2.0,
            half_height: radius,
            layers,
        }
    }

    pub fn set_radius(&mut self, radius: f32) {
        self.far = radius * 2.0;
        self.half_height = radius;
    }

    pub fn view_from_world(&self) -> Mat4 {
        self.transform.compute_matrix().inverse()
    }

    /// Position in `[0, 1]²` viewport space (origin top left) and the view
    /// depth of a world point.
    pub fn world_to_viewport(&self, point: Vec3) -> (Vec2, f32) {
        let view = self.view_from_world().transform_point3(point);
        let ndc = view.truncate() / self.half_height;
        (
            Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5),
            -view.z,
        )
    }
}

pub trait RenderBackend {
    fn allocate_surface(
        &mut self,
        descriptor: &SurfaceDescriptor,
    ) -> Result<SurfaceHandle, BackendError>;

    fn release_surface(&mut self, surface: SurfaceHandle);

    fn clear(&mut self, surface: SurfaceHandle, color: [f32; 4]) -> Result<(), BackendError>;

    /// Renders the entities on `camera.layers` into `target` without clearing
    /// it. `None` renders with the scene's own materials and lights.
    fn render(
        &mut self,
        scene: &World,
        camera: &CaptureCamera,
        target: SurfaceHandle,
        shader: Option<OverrideShader>,
    ) -> Result<(), BackendError>;

    fn has_override(&self, shader: OverrideShader) -> bool;

    fn readback(&self, surface: SurfaceHandle) -> Result<Rgba32FImage, BackendError>;

    fn blit(
        &mut self,
        source: SurfaceHandle,
        destination: SurfaceHandle,
        op: BlitOp,
    ) -> Result<(), BackendError>;

    /// Copies the whole of `source` into `destination` at `offset`, no blending.
    fn copy_region(
        &mut self,
        source: SurfaceHandle,
        destination: SurfaceHandle,
        offset: UVec2,
    ) -> Result<(), BackendError>;
}

/// Post processing kernels of the frame compositor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kernel {
    Dilate,
    MinDistance,
    MaxDistance,
    DistanceAlpha,
}

impl Kernel {
    pub const ALL: [Kernel; 4] = [
        Kernel::Dilate,
        Kernel::MinDistance,
        Kernel::MaxDistance,
        Kernel::DistanceAlpha,
    ];
}

/// Named binding points of the kernels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    Source,
    Mask,
    Result,
    MinDistances,
    MaxDistance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Uniform {
    /// Dilation copies alpha as well as rgb.
    AllChannels,
    /// Number of entries in the min distance buffer.
    ElementCount,
}

pub trait ComputeBackend {
    /// Allocates a zeroed buffer of `len` floats.
    fn allocate_buffer(&mut self, len: usize) -> Result<BufferHandle, BackendError>;

    fn release_buffer(&mut self, buffer: BufferHandle);

    fn has_kernel(&self, kernel: Kernel) -> bool;

    fn bind_surface(&mut self, kernel: Kernel, slot: Slot, surface: SurfaceHandle);

    fn bind_buffer(&mut self, kernel: Kernel, slot: Slot, buffer: BufferHandle);

    fn set_bool(&mut self, uniform: Uniform, value: bool);

    fn set_uint(&mut self, uniform: Uniform, value: u32);

    /// Runs `kernel` to completion before returning.
    fn dispatch(&mut self, kernel: Kernel, groups: WorkgroupSize) -> Result<(), BackendError>;
}

/// A device able to both render and run the post processing kernels.
pub trait Backend: RenderBackend + ComputeBackend {}

impl<T: RenderBackend + ComputeBackend> Backend for T {}

/// Owns every transient surface and buffer allocated through it and releases
/// them when dropped, whichever way the bake exits.
pub struct TransientResources<'a, B: Backend> {
    backend: &'a mut B,
    surfaces: Vec<SurfaceHandle>,
    buffers: Vec<BufferHandle>,
}

impl<'a, B: Backend> TransientResources<'a, B> {
    pub fn new(backend: &'a mut B) -> Self {
        Self {
            backend,
            surfaces: Vec::new(),
            buffers: Vec::new(),
        }
    }

    pub fn surface(
        &mut self,
        descriptor: SurfaceDescriptor,
    ) -> Result<SurfaceHandle, BackendError> {
        let surface = self.backend.allocate_surface(&descriptor)?;
        self.surfaces.push(surface);
        Ok(surface)
    }

    pub fn buffer(&mut self, len: usize) -> Result<BufferHandle, BackendError> {
        let buffer = self.backend.allocate_buffer(len)?;
        self.buffers.push(buffer);
        Ok(buffer)
    }
}

impl<B: Backend> Deref for TransientResources<'_, B> {
    type Target = B;

    fn deref(&self) -> &Self::Target {
        self.backend
    }
}

impl<B: Backend> DerefMut for TransientResources<'_, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.backend
    }
}

impl<B: Backend> Drop for TransientResources<'_, B> {
    fn drop(&mut self) {
        for surface in self.surfaces.drain(..) {
            self.backend.release_surface(surface);
        }
        for buffer in self.buffers.drain(..) {
            self.backend.release_buffer(buffer);
        }
        debug!("released transient imposter surfaces");
    }
}
