//! Analytic collision scene: half-spaces, oriented boxes and water volumes.
//!
//! Distances are signed distance fields. For a convex primitive the capsule
//! distance along a straight sweep is a convex function of sweep time, so a
//! sweep is a golden-section minimum search followed by a bisection for the
//! first contact. Results are exact contacts; pulling back from the surface
//! is the mover's job.

use bevy::prelude::*;

use super::{Capsule, GeometryQuery, HitResult, MoveContext, PhysicsVolume};
use crate::base::{BaseArena, BaseHandle, Surface};

const GOLDEN_ITERATIONS: usize = 48;
const BISECT_ITERATIONS: usize = 48;
const OVERLAP_TOLERANCE: f32 = 1.0e-3;
const INV_PHI: f32 = 0.618_034;

#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    /// Solid on the side opposite `normal`
    HalfSpace { point: Vec3, normal: Vec3 },
    Cuboid {
        center: Vec3,
        half_extents: Vec3,
        rotation: Quat,
    },
}

impl Primitive {
    pub fn signed_distance(&self, p: Vec3) -> f32 {
        match self {
            Primitive::HalfSpace { point, normal } => normal.dot(p - *point),
            Primitive::Cuboid {
                center,
                half_extents,
                rotation,
            } => {
                let q = rotation.inverse() * (p - *center);
                let d = q.abs() - *half_extents;
                d.max(Vec3::ZERO).length() + d.max_element().min(0.0)
            }
        }
    }

    /// Closest surface point to `p` and the outward normal there
    pub fn closest_point(&self, p: Vec3) -> (Vec3, Vec3) {
        match self {
            Primitive::HalfSpace { point, normal } => {
                let d = normal.dot(p - *point);
                (p - *normal * d, *normal)
            }
            Primitive::Cuboid {
                center,
                half_extents,
                rotation,
            } => {
                let q = rotation.inverse() * (p - *center);
                let d = q.abs() - *half_extents;
                let (local_point, local_normal) = if d.max_element() > 0.0 {
                    let clamped = q.clamp(-*half_extents, *half_extents);
                    (clamped, (q - clamped).normalize_or_zero())
                } else {
                    // Inside: leave through the face with least penetration
                    let axis = if d.x >= d.y && d.x >= d.z {
                        0
                    } else if d.y >= d.z {
                        1
                    } else {
                        2
                    };
                    let sign = if q[axis] < 0.0 { -1.0 } else { 1.0 };
                    let mut point = q;
                    point[axis] = sign * half_extents[axis];
                    let mut normal = Vec3::ZERO;
                    normal[axis] = sign;
                    (point, normal)
                };
                (*center + *rotation * local_point, *rotation * local_normal)
            }
        }
    }

    fn bounds(&self) -> Option<(Vec3, Vec3)> {
        match self {
            Primitive::HalfSpace { .. } => None,
            Primitive::Cuboid {
                center,
                half_extents,
                rotation,
            } => {
                let m = Mat3::from_quat(*rotation);
                let extent = Vec3::new(
                    m.row(0).abs().dot(*half_extents),
                    m.row(1).abs().dot(*half_extents),
                    m.row(2).abs().dot(*half_extents),
                );
                Some((*center - extent, *center + extent))
            }
        }
    }

    fn translate(&mut self, delta: Vec3) {
        match self {
            Primitive::HalfSpace { point, .. } => *point += delta,
            Primitive::Cuboid { center, .. } => *center += delta,
        }
    }

    fn rotate_about(&mut self, pivot: Vec3, rot: Quat) {
        match self {
            Primitive::HalfSpace { point, normal } => {
                *point = pivot + rot * (*point - pivot);
                *normal = (rot * *normal).normalize();
            }
            Primitive::Cuboid {
                center, rotation, ..
            } => {
                *center = pivot + rot * (*center - pivot);
                *rotation = (rot * *rotation).normalize();
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Collider {
    pub primitive: Primitive,
    pub base: Option<BaseHandle>,
}

impl Collider {
    /// Smallest signed distance from the capsule at `center`, and the segment offset achieving it
    fn capsule_distance(&self, shape: &Capsule, center: Vec3) -> (f32, f32) {
        let half = shape.segment_half_length();
        match &self.primitive {
            Primitive::HalfSpace { normal, .. } => {
                let s = if normal.z > 0.0 {
                    -half
                } else if normal.z < 0.0 {
                    half
                } else {
                    0.0
                };
                let d = self.primitive.signed_distance(center + Vec3::Z * s);
                (d - shape.radius, s)
            }
            Primitive::Cuboid { .. } => {
                if half <= 0.0 {
                    return (self.primitive.signed_distance(center) - shape.radius, 0.0);
                }
                let f = |s: f32| self.primitive.signed_distance(center + Vec3::Z * s);
                let (s, d) = golden_min(f, -half, half);
                let s = flat_region_midpoint(f, s, d, -half, half);
                (f(s) - shape.radius, s)
            }
        }
    }
}

/// Golden-section minimum of a convex function on [lo, hi]
fn golden_min(f: impl Fn(f32) -> f32, mut lo: f32, mut hi: f32) -> (f32, f32) {
    let mut x1 = hi - INV_PHI * (hi - lo);
    let mut x2 = lo + INV_PHI * (hi - lo);
    let mut f1 = f(x1);
    let mut f2 = f(x2);
    for _ in 0..GOLDEN_ITERATIONS {
        if f1 <= f2 {
            hi = x2;
            x2 = x1;
            f2 = f1;
            x1 = hi - INV_PHI * (hi - lo);
            f1 = f(x1);
        } else {
            lo = x1;
            x1 = x2;
            f1 = f2;
            x2 = lo + INV_PHI * (hi - lo);
            f2 = f(x2);
        }
    }
    // Endpoints matter for monotone functions
    let mut best = if f1 <= f2 { (x1, f1) } else { (x2, f2) };
    for x in [lo, hi] {
        let fx = f(x);
        if fx < best.1 {
            best = (x, fx);
        }
    }
    best
}

/// Center of the plateau around a convex minimum, so flat contacts report their middle
fn flat_region_midpoint(f: impl Fn(f32) -> f32, s: f32, min: f32, lo: f32, hi: f32) -> f32 {
    const PLATEAU: f32 = 1.0e-3;
    let within = |x: f32| f(x) <= min + PLATEAU;
    let edge = |inside: f32, outside: f32| {
        if within(outside) {
            return outside;
        }
        let (mut a, mut b) = (inside, outside);
        for _ in 0..24 {
            let m = 0.5 * (a + b);
            if within(m) {
                a = m;
            } else {
                b = m;
            }
        }
        a
    };
    0.5 * (edge(s, lo) + edge(s, hi))
}

/// Axis-aligned water volume; the surface is the top face
#[derive(Debug, Clone)]
pub struct WaterVolume {
    pub min: Vec3,
    pub max: Vec3,
    pub fluid_friction: f32,
    pub terminal_velocity: f32,
}

impl WaterVolume {
    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }
}

/// Reference [`GeometryQuery`] over analytic primitives
#[derive(Debug, Clone, Default)]
pub struct CollisionWorld {
    colliders: Vec<Collider>,
    water: Vec<WaterVolume>,
}

struct Candidate {
    time: f32,
    penetration: f32,
    collider: usize,
}

impl CollisionWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, primitive: Primitive, base: Option<BaseHandle>) {
        self.colliders.push(Collider { primitive, base });
    }

    pub fn add_water(&mut self, volume: WaterVolume) {
        self.water.push(volume);
    }

    pub fn colliders(&self) -> &[Collider] {
        &self.colliders
    }

    pub fn translate_base(&mut self, base: BaseHandle, delta: Vec3) {
        for c in self.colliders.iter_mut().filter(|c| c.base == Some(base)) {
            c.primitive.translate(delta);
        }
    }

    pub fn rotate_base(&mut self, base: BaseHandle, pivot: Vec3, rot: Quat) {
        for c in self.colliders.iter_mut().filter(|c| c.base == Some(base)) {
            c.primitive.rotate_about(pivot, rot);
        }
    }

    pub fn remove_base(&mut self, base: BaseHandle) {
        self.colliders.retain(|c| c.base != Some(base));
    }

    fn may_touch(collider: &Collider, shape: &Capsule, start: Vec3, end: Vec3) -> bool {
        match collider.primitive.bounds() {
            None => true,
            Some((min, max)) => {
                let pad = Vec3::new(shape.radius, shape.radius, shape.half_height) + Vec3::splat(0.5);
                let lo = start.min(end) - pad;
                let hi = start.max(end) + pad;
                lo.cmple(max).all() && hi.cmpge(min).all()
            }
        }
    }

    /// First contact of `shape` moving from `start` by `delta` against one collider
    fn sweep_collider(collider: &Collider, shape: &Capsule, start: Vec3, delta: Vec3) -> Option<Candidate> {
        let g = |t: f32| collider.capsule_distance(shape, start + delta * t).0;
        let g0 = g(0.0);
        if g0 < -OVERLAP_TOLERANCE {
            let (_, s) = collider.capsule_distance(shape, start);
            let (_, normal) = collider.primitive.closest_point(start + Vec3::Z * s);
            if normal.dot(delta) > 0.0 {
                // Moving out of the overlap
                return None;
            }
            return Some(Candidate {
                time: 0.0,
                penetration: -g0,
                collider: 0,
            });
        }
        if delta.length_squared() <= f32::EPSILON {
            return None;
        }
        if g0 <= 0.0 {
            // Touching at start: only blocks if the move goes further in
            return if g(1.0e-3) < g0 {
                Some(Candidate {
                    time: 0.0,
                    penetration: 0.0,
                    collider: 0,
                })
            } else {
                None
            };
        }
        let (t_min, g_min) = golden_min(g, 0.0, 1.0);
        if g_min > 0.0 {
            return None;
        }
        let (mut lo, mut hi) = (0.0_f32, t_min);
        for _ in 0..BISECT_ITERATIONS {
            let mid = 0.5 * (lo + hi);
            if g(mid) > 0.0 {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        Some(Candidate {
            time: lo,
            penetration: 0.0,
            collider: 0,
        })
    }

    fn sweep_impl(&self, shape: &Capsule, start: Vec3, end: Vec3) -> HitResult {
        let delta = end - start;
        let mut best: Option<Candidate> = None;
        for (index, collider) in self.colliders.iter().enumerate() {
            if !Self::may_touch(collider, shape, start, end) {
                continue;
            }
            if let Some(mut candidate) = Self::sweep_collider(collider, shape, start, delta) {
                candidate.collider = index;
                let better = match &best {
                    None => true,
                    Some(b) => {
                        candidate.time < b.time
                            || (candidate.time == b.time && candidate.penetration > b.penetration)
                    }
                };
                if better {
                    best = Some(candidate);
                }
            }
        }

        let Some(found) = best else {
            return HitResult::miss(start, end);
        };
        let collider = &self.colliders[found.collider];
        let location = start + delta * found.time;
        let (_, s) = collider.capsule_distance(shape, location);
        let (impact_point, normal) = collider.primitive.closest_point(location + Vec3::Z * s);
        HitResult {
            blocking_hit: true,
            start_penetrating: found.penetration > 0.0,
            time: found.time,
            location,
            impact_point,
            normal,
            impact_normal: normal,
            trace_start: start,
            trace_end: end,
            penetration_depth: found.penetration,
            component: collider.base,
        }
    }
}

impl GeometryQuery for CollisionWorld {
    fn sweep(&self, shape: &Capsule, start: Vec3, end: Vec3) -> HitResult {
        self.sweep_impl(shape, start, end)
    }

    fn line_trace(&self, start: Vec3, end: Vec3) -> HitResult {
        let mut hit = self.sweep_impl(&Capsule::new(0.0, 0.0), start, end);
        // A ray that begins inside geometry reports no blocking hit
        if hit.start_penetrating {
            hit = HitResult::miss(start, end);
        }
        hit
    }

    fn overlap_test(&self, shape: &Capsule, location: Vec3) -> bool {
        self.colliders.iter().any(|c| {
            Self::may_touch(c, shape, location, location)
                && c.capsule_distance(shape, location).0 < -OVERLAP_TOLERANCE
        })
    }

    fn physics_volume(&self, location: Vec3) -> PhysicsVolume {
        self.water
            .iter()
            .find(|w| w.contains(location))
            .map(|w| PhysicsVolume {
                water: true,
                fluid_friction: w.fluid_friction,
                terminal_velocity: w.terminal_velocity,
                surface_z: w.max.z,
            })
            .unwrap_or_default()
    }
}

/// Collision world plus the base arena its colliders belong to
#[derive(Resource, Debug, Clone, Default)]
pub struct MovementScene {
    pub world: CollisionWorld,
    pub bases: BaseArena,
}

impl MovementScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(&self) -> MoveContext<'_> {
        MoveContext::new(&self.world, &self.bases)
    }

    /// Infinite static floor at height `z`
    pub fn add_floor(&mut self, z: f32) -> BaseHandle {
        let handle = self.bases.insert(Surface::fixed());
        self.world.add(
            Primitive::HalfSpace {
                point: Vec3::new(0.0, 0.0, z),
                normal: Vec3::Z,
            },
            Some(handle),
        );
        handle
    }

    pub fn add_box(&mut self, center: Vec3, half_extents: Vec3) -> BaseHandle {
        self.add_oriented_box(center, half_extents, Quat::IDENTITY)
    }

    pub fn add_oriented_box(&mut self, center: Vec3, half_extents: Vec3, rotation: Quat) -> BaseHandle {
        let handle = self.bases.insert(Surface::fixed());
        self.world.add(
            Primitive::Cuboid {
                center,
                half_extents,
                rotation,
            },
            Some(handle),
        );
        handle
    }

    /// Static box tilted about the Y axis so its top face rises along +X by `slope_degrees`
    pub fn add_ramp(&mut self, center: Vec3, half_extents: Vec3, slope_degrees: f32) -> BaseHandle {
        self.add_oriented_box(center, half_extents, Quat::from_rotation_y(-slope_degrees.to_radians()))
    }

    /// Movable box that characters standing on it ride along with
    pub fn add_platform(&mut self, center: Vec3, half_extents: Vec3) -> BaseHandle {
        let handle = self.bases.insert(Surface::movable(center));
        self.world.add(
            Primitive::Cuboid {
                center,
                half_extents,
                rotation: Quat::IDENTITY,
            },
            Some(handle),
        );
        handle
    }

    pub fn add_water(&mut self, min: Vec3, max: Vec3, fluid_friction: f32) {
        self.world.add_water(WaterVolume {
            min,
            max,
            fluid_friction,
            terminal_velocity: 4000.0,
        });
    }

    /// Moves a base and its colliders, recording the implied velocity
    pub fn move_base(&mut self, handle: BaseHandle, delta: Vec3, delta_seconds: f32) -> bool {
        let Some(surface) = self.bases.resolve_mut(handle) else {
            return false;
        };
        surface.location += delta;
        surface.velocity = if delta_seconds > 0.0 {
            delta / delta_seconds
        } else {
            Vec3::ZERO
        };
        self.world.translate_base(handle, delta);
        true
    }

    pub fn rotate_base(&mut self, handle: BaseHandle, delta_yaw_degrees: f32) -> bool {
        let Some(surface) = self.bases.resolve_mut(handle) else {
            return false;
        };
        let rot = Quat::from_rotation_z(delta_yaw_degrees.to_radians());
        surface.rotation = (rot * surface.rotation).normalize();
        let pivot = surface.location;
        self.world.rotate_base(handle, pivot, rot);
        true
    }

    pub fn remove_base(&mut self, handle: BaseHandle) {
        self.world.remove_base(handle);
        self.bases.remove(handle);
    }
}
