//! Constraint solver.
//!
//! The per-step pipeline: integrate gravity, rebuild the spatial index over
//! predicted positions, run `NUM_ITER` Gauss-Seidel passes applying every
//! generated constraint's gradient, enforce chunk walls and the world floor
//! after each pass, then derive the step's velocities from the position
//! delta. Shadow grains (appended by the caller before `resolve_step` runs)
//! participate in constraint generation but are never written back past
//! `owned_count` - see `chunk.rs`.
//!
//! Wall and floor handling is purely positional: it only ever adjusts
//! `scratch`, never `velocity`, because velocity is always re-derived from
//! the net `scratch - position` delta at the very end of the step. A
//! collision that also tried to patch `velocity` directly would just have
//! its work silently overwritten down there.

use crate::constraints::{consts::*, density_constraint, granular_constraints};
use crate::error::ChunkError;
use crate::grain::Grain;
use crate::spatial_index::SpatialIndex;
use crate::vecmath::Vec3;

/// Which sides of a chunk are a real simulation boundary (no neighbor chunk
/// across that edge) rather than an inter-chunk crossing. X wraps around the
/// cylinder and so is almost never walled; Y is walled at the topology's
/// north/south edges.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChunkWall {
    pub x_minus: bool,
    pub x_plus: bool,
    pub y_minus: bool,
    pub y_plus: bool,
}

/// The chunk's local coordinate extent, used only to place walls when `ChunkWall`
/// marks a side as real. Z has no upper wall; the floor at `z = 0` is global.
#[derive(Clone, Copy, Debug)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

/// `scratch = position + velocity * dt + 0.5 * gravity * dt^2` for every
/// grain. `velocity` itself is left untouched here: the solver only ever
/// derives a grain's velocity from its net position delta, at the very end
/// of `resolve_step`.
pub fn integrate_gravity(grains: &mut [Grain], gravity: Vec3) {
    for grain in grains.iter_mut() {
        grain.scratch = grain.position.add(grain.velocity.scale(DT)).add(gravity.scale(0.5 * DT * DT));
    }
}

fn apply_grad(grains: &mut [Grain], index: usize, grad: Vec3, scale: f32) {
    grains[index].scratch = grains[index].scratch.add(grad.scale(scale));
}

/// Applies one constraint's correction to every grain index it touches:
/// `scratch += grad * (-C / (|grad_total|^2 + epsilon))`.
fn resolve_constraint(grains: &mut [Grain], value: f32, grads: &[crate::constraints::CGrad]) {
    let grad_len_sq: f32 = grads.iter().map(|g| g.grad.length_sq()).sum();
    if grad_len_sq <= 0.0 {
        return;
    }
    let scale = -value / (grad_len_sq + CFM_EPSILON);
    for g in grads {
        apply_grad(grains, g.index, g.grad, scale);
    }
}

/// Reflects `scratch` off the chunk's lateral bounds wherever `wall` marks
/// that side real, penetration-proportional rather than a hard clamp: a
/// grain that overshoots a wall by `d` ends up `d * REFLECTION_COEFF` back
/// inside it. No floor handling - used for the final, floor-less wall pass
/// after the K main iterations (which already enforce walls and floor every
/// pass via `enforce_bounds` below).
pub fn enforce_walls_only(grains: &mut [Grain], wall: ChunkWall, bounds: Bounds) {
    for grain in grains.iter_mut() {
        if wall.x_minus && grain.scratch.x < bounds.min.x {
            grain.scratch.x = bounds.min.x - (grain.scratch.x - bounds.min.x) * REFLECTION_COEFF;
        } else if wall.x_plus && grain.scratch.x > bounds.max.x {
            grain.scratch.x = bounds.max.x - (grain.scratch.x - bounds.max.x) * REFLECTION_COEFF;
        }
        if wall.y_minus && grain.scratch.y < bounds.min.y {
            grain.scratch.y = bounds.min.y - (grain.scratch.y - bounds.min.y) * REFLECTION_COEFF;
        } else if wall.y_plus && grain.scratch.y > bounds.max.y {
            grain.scratch.y = bounds.max.y - (grain.scratch.y - bounds.max.y) * REFLECTION_COEFF;
        }
    }
}

/// Reflects `scratch` off the floor (`z = 0`) and, where `wall` marks a side
/// real, off the chunk's lateral bounds - both purely as position
/// corrections. Floor friction is also position-based: the grain's
/// tangential displacement this step (`scratch - position`, projected onto
/// the floor plane) either sticks in place (within the static-friction cone)
/// or is capped to the dynamic-friction limit. Called after every one of the
/// K main iterations.
pub fn enforce_bounds(grains: &mut [Grain], wall: ChunkWall, bounds: Bounds) {
    enforce_walls_only(grains, wall, bounds);

    for grain in grains.iter_mut() {
        if grain.scratch.z < 0.0 {
            let dz = -grain.scratch.z * (1.0 + REFLECTION_COEFF);
            grain.scratch.z += dz;

            let dxy = grain.scratch.sub(grain.position).project_on_plane(Vec3::new(0.0, 0.0, 1.0));
            let dxy_len = dxy.length();
            if dxy_len < dz * FLOOR_STATIC {
                grain.scratch.x = grain.position.x;
                grain.scratch.y = grain.position.y;
            } else {
                let capped_len = dxy_len.min(dz * FLOOR_DYNAMIC);
                let adjust = dxy.normalized().scale(capped_len);
                grain.scratch = grain.scratch.sub(adjust);
            }
        }
    }
}

/// Runs `NUM_ITER` Gauss-Seidel passes: rebuild neighbor lists once over the
/// predicted (`scratch`) positions, then for every owned grain (indices
/// `0..owned_count`; shadow grains beyond that only ever appear on the
/// right-hand side of a constraint, never as `target`) generate and resolve
/// its constraints, re-enforcing bounds after every pass.
///
/// Returns an error if a grain's position/velocity goes non-finite, or a
/// dynamic-friction branch would exceed the pair's relative velocity - both
/// are treated as fatal internal-invariant violations.
pub fn resolve_step(
    grains: &mut Vec<Grain>,
    owned_count: usize,
    wall: ChunkWall,
    bounds: Bounds,
    tick: u64,
) -> Result<(), ChunkError> {
    for _ in 0..NUM_ITER {
        let index = SpatialIndex::build(grains, H);

        for target in 0..owned_count {
            if grains[target].kind.is_water() {
                let neighbors = index.neighbors_of(target).to_vec();
                let c = density_constraint(grains, target, &neighbors);
                resolve_constraint(grains, c.value, &c.grads);
            } else {
                let neighbors = index.neighbors_of(target).to_vec();
                for other in neighbors {
                    if other == target || grains[other].kind.is_water() {
                        continue;
                    }
                    let outcome = granular_constraints(grains, target, other).map_err(|e| {
                        ChunkError::DynamicFrictionBreach {
                            a: e.a,
                            b: e.b,
                            tick,
                            f_t: e.f_t,
                            dv_len: e.dv_len,
                        }
                    })?;
                    if let Some((normal, friction)) = outcome {
                        resolve_constraint(grains, normal.value, &normal.grads);
                        if let Some(friction) = friction {
                            resolve_constraint(grains, friction.value, &friction.grads);
                        }
                    }
                }
            }
        }

        enforce_bounds(grains, wall, bounds);
    }

    // Re-apply wall reflection only, without the floor's friction handling,
    // once more before deriving the step's velocity from the net position
    // delta.
    enforce_walls_only(grains, wall, bounds);

    for grain in grains.iter_mut().take(owned_count) {
        grain.velocity = grain.scratch.sub(grain.position).scale(1.0 / DT);
        grain.position = grain.scratch;
        if !grain.is_finite() {
            return Err(ChunkError::NonFinite { grain: grain.id, tick, phase: "post-step" });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::GrainIdGen;

    fn unwalled_bounds() -> (ChunkWall, Bounds) {
        (ChunkWall::default(), Bounds { min: Vec3::ZERO, max: Vec3::new(10.0, 10.0, 10.0) })
    }

    #[test]
    fn gravity_integration_moves_scratch_down() {
        let mut gen = GrainIdGen::new(1);
        let mut grains = vec![Grain::water(gen.next(), Vec3::new(0.0, 0.0, 5.0))];
        integrate_gravity(&mut grains, Vec3::new(0.0, 0.0, -9.8));
        assert!(grains[0].scratch.z < 5.0);
    }

    #[test]
    fn floor_bounces_a_grain_back_above_zero() {
        let mut gen = GrainIdGen::new(1);
        let mut grains = vec![Grain::soil(gen.next(), Vec3::new(0.0, 0.0, 0.001))];
        grains[0].velocity = Vec3::new(0.0, 0.0, -5.0);
        grains[0].scratch = Vec3::new(0.0, 0.0, -0.2);
        let (wall, bounds) = unwalled_bounds();
        enforce_bounds(&mut grains, wall, bounds);
        assert!(grains[0].scratch.z > 0.0);
    }

    #[test]
    fn floor_friction_sticks_a_small_slide_in_place() {
        let mut gen = GrainIdGen::new(1);
        let mut grains = vec![Grain::soil(gen.next(), Vec3::new(0.5, 0.5, 0.001))];
        grains[0].scratch = Vec3::new(0.501, 0.5, -0.01);
        let (wall, bounds) = unwalled_bounds();
        enforce_bounds(&mut grains, wall, bounds);
        assert_eq!(grains[0].scratch.x, grains[0].position.x);
        assert_eq!(grains[0].scratch.y, grains[0].position.y);
    }

    #[test]
    fn wall_reflection_never_touches_velocity() {
        let mut gen = GrainIdGen::new(1);
        let mut grains = vec![Grain::water(gen.next(), Vec3::new(0.5, 0.5, 0.5))];
        grains[0].velocity = Vec3::new(3.0, 0.0, 0.0);
        grains[0].scratch = Vec3::new(-0.1, 0.5, 0.5);
        let wall = ChunkWall { x_minus: true, x_plus: true, y_minus: true, y_plus: true };
        let bounds = Bounds { min: Vec3::ZERO, max: Vec3::new(1.0, 1.0, 1.0) };
        enforce_walls_only(&mut grains, wall, bounds);
        assert_eq!(grains[0].velocity.x, 3.0);
        assert!(grains[0].scratch.x > 0.0);
    }

    #[test]
    fn single_grain_step_is_stable() {
        let mut gen = GrainIdGen::new(1);
        let mut grains = vec![Grain::water(gen.next(), Vec3::new(1.0, 1.0, 1.0))];
        integrate_gravity(&mut grains, Vec3::new(0.0, 0.0, -9.8));
        let (wall, bounds) = unwalled_bounds();
        let result = resolve_step(&mut grains, 1, wall, bounds, 0);
        assert!(result.is_ok());
        assert!(grains[0].is_finite());
    }
}
