//! CPU reference implementation of both backends. Surfaces are float images,
//! meshes are rasterized orthographically with a depth buffer and kernels run
//! one task per workgroup on the compute task pool.

use bevy::{
    prelude::*,
    render::{render_resource::PrimitiveTopology, view::RenderLayers},
    tasks::{ComputeTaskPool, TaskPool},
    utils::{HashMap, HashSet},
};
use image::{imageops, Rgba, Rgba32FImage};

use crate::{
    backend::{
        BlitOp, BufferHandle, CaptureCamera, ComputeBackend, Kernel, OverrideShader,
        RenderBackend, Slot, SurfaceDescriptor, SurfaceHandle, Uniform,
    },
    error::BackendError,
    kernels,
    workgroup::{WorkgroupSize, GROUP_SIZE, MAX_DIM_GROUPS},
};

pub struct SoftwareBackend {
    surfaces: HashMap<SurfaceHandle, Rgba32FImage>,
    buffers: HashMap<BufferHandle, Vec<f32>>,
    surface_bindings: HashMap<(Kernel, Slot), SurfaceHandle>,
    buffer_bindings: HashMap<(Kernel, Slot), BufferHandle>,
    bools: HashMap<Uniform, bool>,
    uints: HashMap<Uniform, u32>,
    overrides: HashSet<OverrideShader>,
    kernels: HashSet<Kernel>,
    next_handle: u32,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self {
            surfaces: default(),
            buffers: default(),
            surface_bindings: default(),
            buffer_bindings: default(),
            bools: default(),
            uints: default(),
            overrides: [
                OverrideShader::Albedo,
                OverrideShader::Silhouette,
                OverrideShader::NormalDepth,
            ]
            .into_iter()
            .collect(),
            kernels: Kernel::ALL.into_iter().collect(),
            next_handle: 0,
        }
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops advertising `shader`, as a device missing the shader would.
    pub fn disable_override(&mut self, shader: OverrideShader) {
        self.overrides.remove(&shader);
    }

    pub fn disable_kernel(&mut self, kernel: Kernel) {
        self.kernels.remove(&kernel);
    }

    /// Replaces the contents of `surface`, which must have the same size.
    pub fn upload(&mut self, surface: SurfaceHandle, image: Rgba32FImage) -> Result<(), BackendError> {
        let target = self.surface_mut(surface)?;
        if target.dimensions() != image.dimensions() {
            return Err(BackendError::SizeMismatch {
                expected: texel_count(target),
                actual: texel_count(&image),
            });
        }
        *target = image;
        Ok(())
    }

    pub fn live_surfaces(&self) -> usize {
        self.surfaces.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    fn next_handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    fn surface(&self, surface: SurfaceHandle) -> Result<&Rgba32FImage, BackendError> {
        self.surfaces
            .get(&surface)
            .ok_or(BackendError::UnknownSurface(surface))
    }

    fn surface_mut(&mut self, surface: SurfaceHandle) -> Result<&mut Rgba32FImage, BackendError> {
        self.surfaces
            .get_mut(&surface)
            .ok_or(BackendError::UnknownSurface(surface))
    }

    fn buffer(&self, buffer: BufferHandle) -> Result<&[f32], BackendError> {
        self.buffers
            .get(&buffer)
            .map(Vec::as_slice)
            .ok_or(BackendError::UnknownBuffer(buffer))
    }

    fn bound_surface(&self, kernel: Kernel, slot: Slot) -> Result<SurfaceHandle, BackendError> {
        self.surface_bindings
            .get(&(kernel, slot))
            .copied()
            .ok_or(BackendError::Unbound { kernel, slot })
    }

    fn bound_buffer(&self, kernel: Kernel, slot: Slot) -> Result<BufferHandle, BackendError> {
        self.buffer_bindings
            .get(&(kernel, slot))
            .copied()
            .ok_or(BackendError::Unbound { kernel, slot })
    }

    /// Detaches `surface` from the map while `body` writes it, so kernel
    /// inputs can still be read through `self`.
    fn with_detached_surface(
        &mut self,
        surface: SurfaceHandle,
        body: impl FnOnce(&Self, &mut Rgba32FImage) -> Result<(), BackendError>,
    ) -> Result<(), BackendError> {
        let mut output = self
            .surfaces
            .remove(&surface)
            .ok_or(BackendError::UnknownSurface(surface))?;
        let outcome = body(self, &mut output);
        self.surfaces.insert(surface, output);
        outcome
    }

    fn dispatch_dilate(&mut self, groups: WorkgroupSize) -> Result<(), BackendError> {
        let kernel = Kernel::Dilate;
        let source = self.bound_surface(kernel, Slot::Source)?;
        let mask = self.bound_surface(kernel, Slot::Mask)?;
        let result = self.bound_surface(kernel, Slot::Result)?;
        let all_channels = self
            .bools
            .get(&Uniform::AllChannels)
            .copied()
            .unwrap_or(false);

        self.with_detached_surface(result, |backend, output| {
            let source = backend.surface(source)?;
            let mask = backend.surface(mask)?;
            let len = texel_count(output);
            check_len(source, len)?;
            check_len(mask, len)?;
            let data: &mut [f32] = output;
            invoke(data, 4, groups, |index, texel| {
                texel.copy_from_slice(&kernels::dilate(index, source, mask, all_channels));
            });
            Ok(())
        })
    }

    fn dispatch_distance_alpha(&mut self, groups: WorkgroupSize) -> Result<(), BackendError> {
        let kernel = Kernel::DistanceAlpha;
        let source = self.bound_surface(kernel, Slot::Source)?;
        let min_distances = self.bound_buffer(kernel, Slot::MinDistances)?;
        let max_distance = self.bound_buffer(kernel, Slot::MaxDistance)?;
        let result = self.bound_surface(kernel, Slot::Result)?;

        self.with_detached_surface(result, |backend, output| {
            let source = backend.surface(source)?;
            let min_distances = backend.buffer(min_distances)?;
            let max = backend.buffer(max_distance)?.first().copied().unwrap_or(0.0);
            let len = texel_count(output);
            check_len(source, len)?;
            if min_distances.len() < len {
                return Err(BackendError::SizeMismatch {
                    expected: len,
                    actual: min_distances.len(),
                });
            }
            let data: &mut [f32] = output;
            invoke(data, 4, groups, |index, texel| {
                texel.copy_from_slice(&kernels::distance_alpha(
                    index,
                    source,
                    min_distances,
                    max,
                ));
            });
            Ok(())
        })
    }

    fn dispatch_min_distance(&mut self, groups: WorkgroupSize) -> Result<(), BackendError> {
        let kernel = Kernel::MinDistance;
        let mask = self.bound_surface(kernel, Slot::Mask)?;
        let result = self.bound_buffer(kernel, Slot::MinDistances)?;

        let mut output = self
            .buffers
            .remove(&result)
            .ok_or(BackendError::UnknownBuffer(result))?;
        let outcome = self.surface(mask).and_then(|mask| {
            let len = texel_count(mask);
            if output.len() < len {
                return Err(BackendError::SizeMismatch {
                    expected: len,
                    actual: output.len(),
                });
            }
            invoke(&mut output[..len], 1, groups, |index, out| {
                out[0] = kernels::min_distance(index, mask);
            });
            Ok(())
        });
        self.buffers.insert(result, output);
        outcome
    }

    fn dispatch_max_distance(&mut self) -> Result<(), BackendError> {
        let kernel = Kernel::MaxDistance;
        let min_distances = self.bound_buffer(kernel, Slot::MinDistances)?;
        let result = self.bound_buffer(kernel, Slot::MaxDistance)?;
        let count = self.uints.get(&Uniform::ElementCount).copied().unwrap_or(0) as usize;

        let max = kernels::max_distance(self.buffer(min_distances)?, count);
        let output = self
            .buffers
            .get_mut(&result)
            .ok_or(BackendError::UnknownBuffer(result))?;
        match output.first_mut() {
            Some(slot) => *slot = max,
            None => {
                return Err(BackendError::SizeMismatch {
                    expected: 1,
                    actual: 0,
                })
            }
        }
        Ok(())
    }
}

/// Averages each `(src / dst)²` block. Sizes must divide evenly.
fn box_downsample(src: &Rgba32FImage, width: u32, height: u32) -> Rgba32FImage {
    let (fx, fy) = (src.width() / width, src.height() / height);
    let count = f64::from(fx * fy);
    Rgba32FImage::from_fn(width, height, |x, y| {
        let mut sum = [0.0f64; 4];
        for sy in y * fy..(y + 1) * fy {
            for sx in x * fx..(x + 1) * fx {
                for (total, channel) in sum.iter_mut().zip(src.get_pixel(sx, sy).0) {
                    *total += f64::from(channel);
                }
            }
        }
        Rgba(sum.map(|total| (total / count) as f32))
    })
}

fn texel_count(image: &Rgba32FImage) -> usize {
    (image.width() * image.height()) as usize
}

fn check_len(image: &Rgba32FImage, len: usize) -> Result<(), BackendError> {
    let actual = texel_count(image);
    if actual != len {
        return Err(BackendError::SizeMismatch {
            expected: len,
            actual,
        });
    }
    Ok(())
}

/// Runs `body` once per work item of `data` (`stride` values each), one task
/// per workgroup. Items whose workgroup falls outside `groups` are left as is.
fn invoke<T: Send>(
    data: &mut [T],
    stride: usize,
    groups: WorkgroupSize,
    body: impl Fn(usize, &mut [T]) + Sync,
) {
    let group_len = GROUP_SIZE as usize * stride;
    let body = &body;
    let chunks = data.chunks_mut(group_len);
    let pool = ComputeTaskPool::get_or_init(TaskPool::default);
    pool.scope(|scope| {
        for (group, chunk) in chunks.enumerate() {
            let x = group as u32 % MAX_DIM_GROUPS;
            let y = group as u32 / MAX_DIM_GROUPS;
            if x >= groups.x || y >= groups.y || groups.z == 0 {
                continue;
            }
            scope.spawn(async move {
                let first = WorkgroupSize::global_index(UVec3::new(x, y, 0), 0) as usize;
                for (local, item) in chunk.chunks_exact_mut(stride).enumerate() {
                    body(first + local, item);
                }
            });
        }
    });
}

/// A mesh instance flattened for rasterization.
struct DrawItem {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    indices: Vec<usize>,
    albedo: LinearRgba,
}

enum SceneLight {
    Directional { to_light: Vec3, color: LinearRgba },
    Point { position: Vec3, color: LinearRgba },
}

fn collect_draw_items(scene: &World, layers: &RenderLayers) -> Vec<DrawItem> {
    let Some(meshes) = scene.get_resource::<Assets<Mesh>>() else {
        return Vec::new();
    };
    let materials = scene.get_resource::<Assets<StandardMaterial>>();

    let mut items = Vec::new();
    for entity in scene.iter_entities() {
        let Some(handle) = entity.get::<Handle<Mesh>>() else {
            continue;
        };
        if entity.get::<Visibility>() == Some(&Visibility::Hidden) {
            continue;
        }
        let entity_layers = entity.get::<RenderLayers>().cloned().unwrap_or_default();
        if !layers.intersects(&entity_layers) {
            continue;
        }
        let Some(mesh) = meshes.get(handle) else {
            continue;
        };
        if mesh.primitive_topology() != PrimitiveTopology::TriangleList {
            continue;
        }
        let Some(positions) = mesh
            .attribute(Mesh::ATTRIBUTE_POSITION)
            .and_then(|attr| attr.as_float3())
        else {
            continue;
        };

        let transform = entity.get::<GlobalTransform>().copied().unwrap_or_default();
        let affine = transform.affine();
        let normal_matrix = affine.matrix3.inverse().transpose();
        let normals = mesh
            .attribute(Mesh::ATTRIBUTE_NORMAL)
            .and_then(|attr| attr.as_float3())
            .filter(|normals| normals.len() == positions.len())
            .map(|normals| {
                normals
                    .iter()
                    .map(|n| (normal_matrix * Vec3::from(*n)).normalize_or_zero())
                    .collect()
            })
            .unwrap_or_default();
        let indices = match mesh.indices() {
            Some(indices) => indices.iter().collect(),
            None => (0..positions.len()).collect(),
        };
        let albedo = entity
            .get::<Handle<StandardMaterial>>()
            .and_then(|handle| materials.and_then(|materials| materials.get(handle)))
            .map(|material| material.base_color.to_linear())
            .unwrap_or(LinearRgba::WHITE);

        items.push(DrawItem {
            positions: positions
                .iter()
                .map(|p| affine.transform_point3(Vec3::from(*p)))
                .collect(),
            normals,
            indices,
            albedo,
        });
    }
    items
}

fn collect_lights(scene: &World) -> Vec<SceneLight> {
    let enabled = |entity: &EntityRef| entity.get::<Visibility>() != Some(&Visibility::Hidden);
    let mut lights = Vec::new();
    for entity in scene.iter_entities() {
        if !enabled(&entity) {
            continue;
        }
        let transform = entity.get::<GlobalTransform>().copied().unwrap_or_default();
        if let Some(light) = entity.get::<DirectionalLight>() {
            lights.push(SceneLight::Directional {
                to_light: -*transform.forward(),
                color: light.color.to_linear(),
            });
        }
        if let Some(light) = entity.get::<PointLight>() {
            lights.push(SceneLight::Point {
                position: transform.translation(),
                color: light.color.to_linear(),
            });
        }
    }
    lights
}

fn lambert(lights: &[SceneLight], position: Vec3, normal: Vec3) -> Vec3 {
    lights
        .iter()
        .map(|light| {
            let (to_light, color) = match light {
                SceneLight::Directional { to_light, color } => (*to_light, color),
                SceneLight::Point { position: p, color } => ((*p - position).normalize_or_zero(), color),
            };
            Vec3::new(color.red, color.green, color.blue) * normal.dot(to_light).max(0.0)
        })
        .sum()
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

impl RenderBackend for SoftwareBackend {
    fn allocate_surface(
        &mut self,
        descriptor: &SurfaceDescriptor,
    ) -> Result<SurfaceHandle, BackendError> {
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(BackendError::Device(format!(
                "cannot allocate empty surface `{}`",
                descriptor.label
            )));
        }
        let handle = SurfaceHandle(self.next_handle());
        self.surfaces.insert(
            handle,
            Rgba32FImage::new(descriptor.width, descriptor.height),
        );
        debug!(
            "allocated {} ({}x{}) as {handle:?}",
            descriptor.label, descriptor.width, descriptor.height
        );
        Ok(handle)
    }

    fn release_surface(&mut self, surface: SurfaceHandle) {
        self.surfaces.remove(&surface);
        self.surface_bindings.retain(|_, bound| *bound != surface);
    }

    fn clear(&mut self, surface: SurfaceHandle, color: [f32; 4]) -> Result<(), BackendError> {
        for pixel in self.surface_mut(surface)?.pixels_mut() {
            *pixel = Rgba(color);
        }
        Ok(())
    }

    fn render(
        &mut self,
        scene: &World,
        camera: &CaptureCamera,
        target: SurfaceHandle,
        shader: Option<OverrideShader>,
    ) -> Result<(), BackendError> {
        let items = collect_draw_items(scene, &camera.layers);
        let lights = match shader {
            None => collect_lights(scene),
            Some(_) => Vec::new(),
        };
        let image = self.surface_mut(target)?;
        let (width, height) = image.dimensions();
        let size = Vec2::new(width as f32, height as f32);
        let mut depth_buffer = vec![f32::INFINITY; (width * height) as usize];

        for item in &items {
            let projected: Vec<(Vec2, f32)> = item
                .positions
                .iter()
                .map(|p| {
                    let (viewport, depth) = camera.world_to_viewport(*p);
                    (viewport * size, depth)
                })
                .collect();

            for triangle in item.indices.chunks_exact(3) {
                let [i0, i1, i2] = [triangle[0], triangle[1], triangle[2]];
                if i0.max(i1).max(i2) >= projected.len() {
                    continue;
                }
                let (a, b, c) = (projected[i0], projected[i1], projected[i2]);
                let area = edge(a.0, b.0, c.0);
                if area.abs() < f32::EPSILON {
                    continue;
                }

                let face_normal = (item.positions[i1] - item.positions[i0])
                    .cross(item.positions[i2] - item.positions[i0])
                    .normalize_or_zero();

                let lo = a.0.min(b.0).min(c.0).floor().max(Vec2::ZERO);
                let hi = a.0.max(b.0).max(c.0).ceil().min(size);
                for y in lo.y as u32..hi.y as u32 {
                    for x in lo.x as u32..hi.x as u32 {
                        let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                        let w = Vec3::new(edge(b.0, c.0, p), edge(c.0, a.0, p), edge(a.0, b.0, p))
                            / area;
                        if w.min_element() < 0.0 {
                            continue;
                        }
                        let depth = w.x * a.1 + w.y * b.1 + w.z * c.1;
                        if depth < camera.near || depth > camera.far {
                            continue;
                        }
                        let slot = (y * width + x) as usize;
                        if depth >= depth_buffer[slot] {
                            continue;
                        }
                        depth_buffer[slot] = depth;

                        let normal = if item.normals.is_empty() {
                            face_normal
                        } else {
                            (item.normals[i0] * w.x + item.normals[i1] * w.y + item.normals[i2] * w.z)
                                .try_normalize()
                                .unwrap_or(face_normal)
                        };
                        let albedo = item.albedo;
                        let texel = match shader {
                            Some(OverrideShader::Silhouette) => [1.0; 4],
                            Some(OverrideShader::Albedo) => {
                                [albedo.red, albedo.green, albedo.blue, albedo.alpha]
                            }
                            Some(OverrideShader::NormalDepth) => {
                                let n = normal * 0.5 + 0.5;
                                [n.x, n.y, n.z, 1.0 - depth / camera.far]
                            }
                            None => {
                                let position = w.x * item.positions[i0]
                                    + w.y * item.positions[i1]
                                    + w.z * item.positions[i2];
                                let light = lambert(&lights, position, normal);
                                [
                                    albedo.red * light.x,
                                    albedo.green * light.y,
                                    albedo.blue * light.z,
                                    albedo.alpha,
                                ]
                            }
                        };
                        image.put_pixel(x, y, Rgba(texel));
                    }
                }
            }
        }
        Ok(())
    }

    fn has_override(&self, shader: OverrideShader) -> bool {
        self.overrides.contains(&shader)
    }

    fn readback(&self, surface: SurfaceHandle) -> Result<Rgba32FImage, BackendError> {
        self.surface(surface).cloned()
    }

    fn blit(
        &mut self,
        source: SurfaceHandle,
        destination: SurfaceHandle,
        op: BlitOp,
    ) -> Result<(), BackendError> {
        let (width, height) = self.surface(destination)?.dimensions();
        let src = self.surface(source)?;

        let output = match op {
            BlitOp::Copy if src.dimensions() == (width, height) => src.clone(),
            BlitOp::Copy if src.width() % width == 0 && src.height() % height == 0 => {
                box_downsample(src, width, height)
            }
            BlitOp::Copy => imageops::resize(src, width, height, imageops::FilterType::Triangle),
            BlitOp::Solidify => {
                check_len(src, (width * height) as usize)?;
                Rgba32FImage::from_fn(width, height, |x, y| {
                    Rgba(kernels::solidify(src.get_pixel(x, y).0))
                })
            }
            BlitOp::Combine { alpha } => {
                let alpha = self.surface(alpha)?;
                check_len(src, (width * height) as usize)?;
                check_len(alpha, (width * height) as usize)?;
                Rgba32FImage::from_fn(width, height, |x, y| {
                    Rgba(kernels::combine(
                        src.get_pixel(x, y).0,
                        alpha.get_pixel(x, y).0,
                    ))
                })
            }
        };

        *self.surface_mut(destination)? = output;
        Ok(())
    }

    fn copy_region(
        &mut self,
        source: SurfaceHandle,
        destination: SurfaceHandle,
        offset: UVec2,
    ) -> Result<(), BackendError> {
        let src = self.surface(source)?.clone();
        let dst = self.surface_mut(destination)?;
        if offset.x + src.width() > dst.width() || offset.y + src.height() > dst.height() {
            return Err(BackendError::OutOfBounds {
                x: offset.x,
                y: offset.y,
            });
        }
        imageops::replace(dst, &src, offset.x as i64, offset.y as i64);
        Ok(())
    }
}

impl ComputeBackend for SoftwareBackend {
    fn allocate_buffer(&mut self, len: usize) -> Result<BufferHandle, BackendError> {
        let handle = BufferHandle(self.next_handle());
        self.buffers.insert(handle, vec![0.0; len]);
        Ok(handle)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
        self.buffer_bindings.retain(|_, bound| *bound != buffer);
    }

    fn has_kernel(&self, kernel: Kernel) -> bool {
        self.kernels.contains(&kernel)
    }

    fn bind_surface(&mut self, kernel: Kernel, slot: Slot, surface: SurfaceHandle) {
        self.surface_bindings.insert((kernel, slot), surface);
    }

    fn bind_buffer(&mut self, kernel: Kernel, slot: Slot, buffer: BufferHandle) {
        self.buffer_bindings.insert((kernel, slot), buffer);
    }

    fn set_bool(&mut self, uniform: Uniform, value: bool) {
        self.bools.insert(uniform, value);
    }

    fn set_uint(&mut self, uniform: Uniform, value: u32) {
        self.uints.insert(uniform, value);
    }

    fn dispatch(&mut self, kernel: Kernel, groups: WorkgroupSize) -> Result<(), BackendError> {
        if !self.has_kernel(kernel) {
            return Err(BackendError::Device(format!("{kernel:?} is not available")));
        }
        match kernel {
            Kernel::Dilate => self.dispatch_dilate(groups),
            Kernel::MinDistance => self.dispatch_min_distance(groups),
            Kernel::MaxDistance => self.dispatch_max_distance(),
            Kernel::DistanceAlpha => self.dispatch_distance_alpha(groups),
        }
    }
}
