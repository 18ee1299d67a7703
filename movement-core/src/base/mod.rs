//! Movement bases: the surfaces a character can stand on.
//!
//! The character never owns its base. It holds a [`BaseHandle`], an index
//! plus generation into a [`BaseArena`]. Removing a surface bumps the slot
//! generation, so stale handles resolve to `None` instead of dangling.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// Generational handle into a [`BaseArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaseHandle {
    pub index: u32,
    pub generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mobility {
    /// World geometry; floors on it may be cached between ticks
    Static,
    /// May move every frame; characters on it follow its transform
    Movable,
}

/// Read-only view of a surface for movement purposes
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    pub location: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub mobility: Mobility,
    /// Overrides the character's walkable floor z for hits on this surface
    pub walkable_floor_z: Option<f32>,
    pub can_step_up_on: bool,
}

impl Surface {
    pub fn fixed() -> Self {
        Self {
            location: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            mobility: Mobility::Static,
            walkable_floor_z: None,
            can_step_up_on: true,
        }
    }

    pub fn movable(location: Vec3) -> Self {
        Self {
            location,
            mobility: Mobility::Movable,
            ..Self::fixed()
        }
    }

    pub fn is_movable(&self) -> bool {
        self.mobility == Mobility::Movable
    }

    pub fn yaw_degrees(&self) -> f32 {
        let (yaw, _, _) = self.rotation.to_euler(EulerRot::ZYX);
        yaw.to_degrees()
    }
}

#[derive(Debug, Clone, Default)]
struct Slot {
    generation: u32,
    surface: Option<Surface>,
}

/// Slot storage for every surface that can act as a movement base
#[derive(Resource, Debug, Clone, Default)]
pub struct BaseArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl BaseArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, surface: Surface) -> BaseHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.surface = Some(surface);
            return BaseHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            surface: Some(surface),
        });
        BaseHandle { index, generation: 0 }
    }

    /// Destroys the surface; every outstanding handle to it stops resolving
    pub fn remove(&mut self, handle: BaseHandle) -> Option<Surface> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let surface = slot.surface.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Some(surface)
    }

    pub fn resolve(&self, handle: BaseHandle) -> Option<&Surface> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.surface.as_ref())
    }

    pub fn resolve_mut(&mut self, handle: BaseHandle) -> Option<&mut Surface> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.surface.as_mut())
    }

    pub fn is_alive(&self, handle: BaseHandle) -> bool {
        self.resolve(handle).is_some()
    }

    /// Whether positions on this base are tracked relative to it
    pub fn use_relative_position(&self, handle: Option<BaseHandle>) -> bool {
        handle
            .and_then(|h| self.resolve(h))
            .map(Surface::is_movable)
            .unwrap_or(false)
    }

    /// Bases are "dynamic" when they could move between ticks
    pub fn is_dynamic(&self, handle: Option<BaseHandle>) -> bool {
        self.use_relative_position(handle)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.surface.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
