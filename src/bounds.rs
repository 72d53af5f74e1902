use bevy::{prelude::*, render::primitives::Aabb};

/// Sphere enclosing the target's vertices.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
    /// `center` relative to the root entity's position.
    pub offset: Vec3,
}

/// Entities in the subtree rooted at `root`, root first.
pub fn descendants(world: &World, root: Entity) -> Vec<Entity> {
    let mut entities = Vec::new();
    let mut stack = vec![root];
    while let Some(entity) = stack.pop() {
        entities.push(entity);
        if let Some(children) = world.get::<Children>(entity) {
            stack.extend(children.iter().rev().copied());
        }
    }
    entities
}

/// Grows a box (seeded at the root position) over every enabled mesh vertex
/// below `root`. Returns `None` when nothing contributed.
pub fn estimate_bounds(world: &World, root: Entity) -> Option<BoundingSphere> {
    let meshes = world.get_resource::<Assets<Mesh>>()?;
    let root_position = world
        .get::<GlobalTransform>(root)
        .map(GlobalTransform::translation)
        .unwrap_or(Vec3::ZERO);

    let mut min = root_position;
    let mut max = root_position;
    let mut contributed = false;

    for entity in descendants(world, root) {
        let Some(handle) = world.get::<Handle<Mesh>>(entity) else {
            continue;
        };
        if world.get::<Visibility>(entity) == Some(&Visibility::Hidden) {
            continue;
        }
        let Some(positions) = meshes
            .get(handle)
            .and_then(|mesh| mesh.attribute(Mesh::ATTRIBUTE_POSITION))
            .and_then(|attr| attr.as_float3())
        else {
            continue;
        };
        if positions.is_empty() {
            continue;
        }

        let world_from_local = world
            .get::<GlobalTransform>(entity)
            .copied()
            .unwrap_or_default()
            .affine();
        for position in positions {
            let p = world_from_local.transform_point3(Vec3::from(*position));
            min = min.min(p);
            max = max.max(p);
        }
        contributed = true;
    }

    if !contributed {
        return None;
    }

    let aabb = Aabb::from_min_max(min, max);
    let center = Vec3::from(aabb.center);
    let sphere = BoundingSphere {
        center,
        radius: min.distance(max) * 0.5,
        offset: center - root_position,
    };
    debug!("bounds for {root:?}: {sphere:?}");
    Some(sphere)
}

#[cfg(test)]
mod tests {
    use bevy::render::{render_asset::RenderAssetUsages, render_resource::PrimitiveTopology};

    use super::*;

    fn world_with_meshes() -> World {
        let mut world = World::new();
        world.init_resource::<Assets<Mesh>>();
        world
    }

    fn add_mesh(world: &mut World, mesh: Mesh) -> Handle<Mesh> {
        world.resource_mut::<Assets<Mesh>>().add(mesh)
    }

    fn spawn_at(world: &mut World, transform: Transform) -> Entity {
        world
            .spawn((transform, GlobalTransform::from(transform)))
            .id()
    }

    #[test]
    fn cube_at_root() {
        let mut world = world_with_meshes();
        let cube = add_mesh(&mut world, Cuboid::new(2.0, 2.0, 2.0).into());
        let root = spawn_at(&mut world, Transform::default());
        let child = world
            .spawn((cube, Transform::default(), GlobalTransform::default()))
            .id();
        world.entity_mut(root).add_child(child);

        let sphere = estimate_bounds(&world, root).unwrap();
        assert!((sphere.radius - 3f32.sqrt()).abs() < 1e-5);
        assert!(sphere.offset.abs_diff_eq(Vec3::ZERO, 1e-5));
    }

    #[test]
    fn offset_follows_geometry() {
        let mut world = world_with_meshes();
        let cube = add_mesh(&mut world, Cuboid::new(1.0, 1.0, 1.0).into());
        let root = spawn_at(&mut world, Transform::from_xyz(10.0, 0.0, 0.0));
        let child_transform = Transform::from_xyz(12.0, 0.0, 0.0);
        let child = world
            .spawn((cube, child_transform, GlobalTransform::from(child_transform)))
            .id();
        world.entity_mut(root).add_child(child);

        let sphere = estimate_bounds(&world, root).unwrap();
        // box grows from the root position (10) to the far cube face (12.5)
        assert!(sphere.center.abs_diff_eq(Vec3::new(11.25, 0.0, 0.0), 1e-5));
        assert!(sphere.offset.abs_diff_eq(Vec3::new(1.25, 0.0, 0.0), 1e-5));
        let expected = Vec3::new(2.5, 1.0, 1.0).length() * 0.5;
        assert!((sphere.radius - expected).abs() < 1e-5);
    }

    #[test]
    fn skips_hidden_and_empty_meshes() {
        let mut world = world_with_meshes();
        let cube = add_mesh(&mut world, Cuboid::new(2.0, 2.0, 2.0).into());
        let big = add_mesh(&mut world, Cuboid::new(50.0, 50.0, 50.0).into());
        let empty = add_mesh(
            &mut world,
            Mesh::new(PrimitiveTopology::TriangleList, RenderAssetUsages::default()),
        );

        let root = spawn_at(&mut world, Transform::default());
        let visible = world.spawn((cube, GlobalTransform::default())).id();
        let hidden = world
            .spawn((big, GlobalTransform::default(), Visibility::Hidden))
            .id();
        let no_data = world.spawn((empty, GlobalTransform::default())).id();
        world
            .entity_mut(root)
            .push_children(&[visible, hidden, no_data]);

        let sphere = estimate_bounds(&world, root).unwrap();
        assert!((sphere.radius - 3f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn nothing_to_bound() {
        let mut world = world_with_meshes();
        let root = spawn_at(&mut world, Transform::default());
        let child = spawn_at(&mut world, Transform::from_xyz(1.0, 0.0, 0.0));
        world.entity_mut(root).add_child(child);
        assert_eq!(estimate_bounds(&world, root), None);
    }
}
