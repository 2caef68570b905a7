//! Constraint generation.
//!
//! Builds the per-grain position constraints the Gauss-Seidel loop in
//! `solver.rs` resolves each iteration: one SPH incompressibility constraint
//! for water, and a pair of granular (collision + tangential friction)
//! constraints between any two non-water grains closer than two sand radii.

use crate::grain::{Grain, Kind};
use crate::ids::GrainId;
use crate::vecmath::{poly6, spiky_grad, Vec3};

/// Centralized physical constants.
pub mod consts {
    /// Fixed timestep, seconds.
    pub const DT: f32 = 1.0 / 30.0;
    /// SPH smoothing radius.
    pub const H: f32 = 0.1;
    /// Per-grain mass (water-equivalent units).
    pub const MASS: f32 = 0.1 * 113.0 / 20.0;
    /// Rest density for the incompressibility constraint.
    pub const RHO_0: f32 = 1000.0;
    /// Gauss-Seidel iterations per step.
    pub const NUM_ITER: u32 = 3;
    /// Constraint-force-mixing regularization added to `|grad|^2` denominators.
    pub const CFM_EPSILON: f32 = 1e-2;
    /// Velocity-reflection coefficient on wall/floor bounce.
    pub const REFLECTION_COEFF: f32 = 0.3;
    /// Floor friction coefficients.
    pub const FLOOR_STATIC: f32 = 0.7;
    pub const FLOOR_DYNAMIC: f32 = 0.5;
    /// Sand grain collision radius.
    pub const SAND_RADIUS: f32 = 0.05;
    /// Penetration-resolution stiffness for the granular normal constraint.
    pub const SAND_STIFFNESS: f32 = 2e-2;
    /// Granular (soil/cell) friction coefficients; static exceeds dynamic.
    pub const FRICTION_STATIC: f32 = 1.5;
    pub const FRICTION_DYNAMIC: f32 = 0.7;
    /// Cohesive pressure between touching granular grains, in Pa.
    pub const COHESION: f32 = 45.0;
}

use consts::*;

/// A gradient of a constraint with respect to one grain's position.
#[derive(Clone, Copy, Debug)]
pub struct CGrad {
    pub index: usize,
    pub grad: Vec3,
}

/// One scalar position constraint and its gradients against every grain it touches.
#[derive(Clone, Debug)]
pub struct Constraint {
    pub value: f32,
    pub grads: Vec<CGrad>,
}

/// Raised when a dynamic-friction branch would imply a friction impulse
/// larger than the relative velocity it's supposed to arrest - treated as a
/// fatal internal-invariant violation, not a value to clamp.
#[derive(Debug)]
pub struct DynamicFrictionBreach {
    pub a: GrainId,
    pub b: GrainId,
    pub f_t: f32,
    pub dv_len: f32,
}

/// Water-equivalent mass factor for grain `grains[ix]`.
#[inline]
fn eq(grains: &[Grain], ix: usize) -> f32 {
    grains[ix].kind.water_equiv()
}

/// The SPH incompressibility constraint for a water grain at `target`,
/// generated over `neighbors` (its own spatial-index neighbor list, which
/// always includes `target` itself).
///
/// `C = density / RHO_0 - 1`, with gradients:
/// - w.r.t. `target` itself: `(1/RHO_0) * sum_{n != target} grad W(p_t - p_n) * eq(n)`
/// - w.r.t. any other neighbor `d`: `-(1/RHO_0) * grad W(p_d - p_t) * eq(d)`
pub fn density_constraint(grains: &[Grain], target: usize, neighbors: &[usize]) -> Constraint {
    let p_t = grains[target].scratch;

    let mut density = 0.0_f32;
    for &n in neighbors {
        density += poly6(p_t.sub(grains[n].scratch), H) * MASS * eq(grains, n);
    }
    let value = density / RHO_0 - 1.0;

    let mut grads = Vec::with_capacity(neighbors.len());
    let mut self_grad = Vec3::ZERO;
    for &n in neighbors {
        if n == target {
            continue;
        }
        self_grad = self_grad.add(spiky_grad(p_t.sub(grains[n].scratch), H).scale(eq(grains, n)));
        let other_grad = spiky_grad(grains[n].scratch.sub(p_t), H).scale(-eq(grains, n) / RHO_0);
        grads.push(CGrad { index: n, grad: other_grad });
    }
    grads.push(CGrad { index: target, grad: self_grad.scale(1.0 / RHO_0) });

    Constraint { value, grads }
}

/// Granular collision + tangential-friction constraints between `target` and
/// one other non-water neighbor `other`, if the two grains' sand-radii
/// overlap. Returns `None` when they don't overlap (nothing to constrain).
///
/// The normal constraint resists penetration with a cohesive pressure term;
/// the friction constraint resists relative tangential motion, switching
/// from static to dynamic the same way Coulomb friction does on a solid
/// surface.
pub fn granular_constraints(
    grains: &[Grain],
    target: usize,
    other: usize,
) -> Result<Option<(Constraint, Option<Constraint>)>, DynamicFrictionBreach> {
    let p_t = grains[target].scratch;
    let p_o = grains[other].scratch;
    let dp = p_t.sub(p_o);
    let dist = dp.length();
    if dist <= 0.0 {
        return Ok(None);
    }

    let penetration = 2.0 * SAND_RADIUS - dist;
    if penetration <= 0.0 {
        return Ok(None);
    }

    let n_hat = dp.scale(1.0 / dist);
    let r = SAND_RADIUS;
    let rel = penetration / r - 1.0;
    let area = std::f32::consts::PI * r * r * (1.0 - rel * rel);
    let area_prime = -2.0 * std::f32::consts::PI * (2.0 * r - penetration);
    let dt2_over_m = DT * DT / MASS;

    let f_n = penetration * SAND_STIFFNESS - dt2_over_m * COHESION * area;
    let grad_coeff = SAND_STIFFNESS - COHESION * dt2_over_m * area_prime;

    let normal = Constraint {
        value: f_n,
        grads: vec![
            CGrad { index: other, grad: n_hat.scale(grad_coeff) },
            CGrad { index: target, grad: n_hat.scale(-grad_coeff) },
        ],
    };

    let dv = (grains[target].scratch.sub(grains[target].position))
        .sub(grains[other].scratch.sub(grains[other].position));
    let dv_tan = dv.project_on_plane(n_hat);
    let dv_len = dv.length();
    let cohesion_term = dt2_over_m * COHESION * area;

    let friction = if dv_tan.length() > 1e-6 && dv_len > 1e-6 {
        let tangent = dv_tan.normalized();
        let mut f_t = dv_len;
        if f_t >= f_n * FRICTION_STATIC {
            f_t = f_n * FRICTION_DYNAMIC;
            if f_t >= dv_len {
                return Err(DynamicFrictionBreach {
                    a: grains[target].id,
                    b: grains[other].id,
                    f_t,
                    dv_len,
                });
            }
        }
        let value = f_t + cohesion_term;
        Some(Constraint {
            value,
            grads: vec![
                CGrad { index: other, grad: tangent.scale(value) },
                CGrad { index: target, grad: tangent.scale(-value) },
            ],
        })
    } else {
        None
    };

    Ok(Some((normal, friction)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::GrainIdGen;

    #[test]
    fn density_constraint_is_negative_below_rest_density() {
        let mut gen = GrainIdGen::new(1);
        let grains = vec![Grain::water(gen.next(), Vec3::new(0.5, 0.5, 0.5))];
        let c = density_constraint(&grains, 0, &[0]);
        assert!(c.value < 0.0);
        assert_eq!(c.grads.len(), 1);
        assert_eq!(c.grads[0].index, 0);
    }

    #[test]
    fn density_constraint_neighbor_gradients_are_populated() {
        let mut gen = GrainIdGen::new(1);
        let grains = vec![
            Grain::water(gen.next(), Vec3::new(0.50, 0.5, 0.5)),
            Grain::water(gen.next(), Vec3::new(0.52, 0.5, 0.5)),
        ];
        let c = density_constraint(&grains, 0, &[0, 1]);
        assert_eq!(c.grads.len(), 2);
        let other = c.grads.iter().find(|g| g.index == 1).unwrap();
        assert!(other.grad.length() > 0.0);
    }

    #[test]
    fn no_constraint_when_grains_dont_overlap() {
        let mut gen = GrainIdGen::new(1);
        let grains = vec![
            Grain::soil(gen.next(), Vec3::new(0.0, 0.0, 0.0)),
            Grain::soil(gen.next(), Vec3::new(1.0, 0.0, 0.0)),
        ];
        let result = granular_constraints(&grains, 0, 1).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn overlapping_grains_get_normal_constraint_with_positive_penetration_value() {
        let mut gen = GrainIdGen::new(1);
        let grains = vec![
            Grain::soil(gen.next(), Vec3::new(0.0, 0.0, 0.0)),
            Grain::soil(gen.next(), Vec3::new(0.06, 0.0, 0.0)),
        ];
        let (normal, _friction) = granular_constraints(&grains, 0, 1).unwrap().unwrap();
        assert!(normal.value > 0.0);
        assert_eq!(normal.grads.len(), 2);
    }

    #[test]
    fn friction_constraint_is_none_when_relative_velocity_is_negligible() {
        let mut gen = GrainIdGen::new(1);
        let grains = vec![
            Grain::soil(gen.next(), Vec3::new(0.0, 0.0, 0.0)),
            Grain::soil(gen.next(), Vec3::new(0.06, 0.0, 0.0)),
        ];
        let (_normal, friction) = granular_constraints(&grains, 0, 1).unwrap().unwrap();
        assert!(friction.is_none());
    }
}
