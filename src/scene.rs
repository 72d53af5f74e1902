//! Scoped scene changes made for the duration of a bake.

use std::ops::Deref;

use bevy::{prelude::*, render::view::RenderLayers, utils::HashSet};

use crate::bounds::descendants;

/// Moves the target onto the capture layer and, with a lighting rig, leaves
/// only the rig's lights enabled. Everything touched is restored exactly as it
/// was when the guard drops.
pub struct SceneOverrides<'w> {
    world: &'w mut World,
    layers: Vec<(Entity, Option<RenderLayers>)>,
    lights: Vec<(Entity, Option<Visibility>)>,
}

impl<'w> SceneOverrides<'w> {
    pub fn apply(
        world: &'w mut World,
        target: Entity,
        capture_layer: usize,
        lighting_rig: Option<Entity>,
    ) -> Self {
        let mut overrides = Self {
            world,
            layers: Vec::new(),
            lights: Vec::new(),
        };

        for entity in descendants(overrides.world, target) {
            let Some(mut entity_mut) = overrides.world.get_entity_mut(entity) else {
                continue;
            };
            let prior = entity_mut.get::<RenderLayers>().cloned();
            entity_mut.insert(RenderLayers::layer(capture_layer));
            overrides.layers.push((entity, prior));
        }

        if let Some(rig) = lighting_rig {
            let rig: HashSet<Entity> = descendants(overrides.world, rig).into_iter().collect();
            let lights: Vec<(Entity, Option<Visibility>)> = overrides
                .world
                .iter_entities()
                .filter(|entity| {
                    entity.contains::<DirectionalLight>()
                        || entity.contains::<PointLight>()
                        || entity.contains::<SpotLight>()
                })
                .map(|entity| (entity.id(), entity.get::<Visibility>().copied()))
                .collect();

            for (light, prior) in lights {
                let visibility = if rig.contains(&light) {
                    Visibility::Visible
                } else {
                    Visibility::Hidden
                };
                overrides.world.entity_mut(light).insert(visibility);
                overrides.lights.push((light, prior));
            }
        }

        debug!(
            "scene overrides: {} layer changes, {} light changes",
            overrides.layers.len(),
            overrides.lights.len()
        );
        overrides
    }
}

impl Deref for SceneOverrides<'_> {
    type Target = World;

    fn deref(&self) -> &Self::Target {
        self.world
    }
}

impl Drop for SceneOverrides<'_> {
    fn drop(&mut self) {
        for (entity, prior) in self.layers.drain(..) {
            let Some(mut entity_mut) = self.world.get_entity_mut(entity) else {
                continue;
            };
            match prior {
                Some(layers) => {
                    entity_mut.insert(layers);
                }
                None => {
                    entity_mut.remove::<RenderLayers>();
                }
            }
        }

        for (light, prior) in self.lights.drain(..) {
            let Some(mut entity_mut) = self.world.get_entity_mut(light) else {
                continue;
            };
            match prior {
                Some(visibility) => {
                    entity_mut.insert(visibility);
                }
                None => {
                    entity_mut.remove::<Visibility>();
                }
            }
        }
        debug!("scene overrides restored");
    }
}
