use serde::{Deserialize, Serialize};

use crate::field::{CellField, FaceField};
use crate::index_space::Axis;




/// Convex-combination weights for one explicit sub-stage:
/// `R_new = a0*R_old + a1*R_cur + a2*dt*(-div F + S)`.
///
/// Consistency of the weights with a valid SSP scheme (for instance
/// `a0 + a1 = 1` on mass-conserving stages) is the caller's contract; the
/// stepper applies whatever it is given.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageCoefficients {
    pub a0: f64,
    pub a1: f64,
    pub a2: f64,
}




// ============================================================================
impl StageCoefficients {


    pub fn new(a0: f64, a1: f64, a2: f64) -> Self {
        Self { a0, a1, a2 }
    }


    /// Forward Euler as a single SSP stage.
    pub fn ssp_rk1() -> Vec<Self> {
        vec![Self::new(0.0, 1.0, 1.0)]
    }


    /// Two-stage SSP scheme (Heun).
    pub fn ssp_rk2() -> Vec<Self> {
        vec![
            Self::new(0.0, 1.0, 1.0),
            Self::new(0.5, 0.5, 0.5),
        ]
    }


    /// Three-stage SSP scheme in Shu-Osher form.
    pub fn ssp_rk3() -> Vec<Self> {
        vec![
            Self::new(0.0, 1.0, 1.0),
            Self::new(0.75, 0.25, 0.25),
            Self::new(1.0 / 3.0, 2.0 / 3.0, 2.0 / 3.0),
        ]
    }
}




/// The face-flux difference quotient of one cell for an arbitrary per-face
/// flux. Face `(i, j)` on an axis is the lower face of cell `(i, j)`.
fn divergence<F>(index: (i64, i64), spacing: (f64, f64), flux: F) -> f64
where
    F: Fn(Axis, (i64, i64)) -> f64,
{
    let (i, j) = index;
    let (dx, dy) = spacing;
    (flux(Axis::I, (i + 1, j)) - flux(Axis::I, (i, j))) / dx +
    (flux(Axis::J, (i, j + 1)) - flux(Axis::J, (i, j))) / dy
}




/// Assemble the conservative convective derivative
/// `N = div(u * rho * Cp * T)` over the interior of `n`. All four factors
/// are evaluated at the face center, so summing `N * volume` over adjacent
/// cells telescopes to a boundary term.
pub fn convective_derivative(
    n: &mut CellField,
    u_adv: &FaceField,
    rho_half: &FaceField,
    cp_half: &FaceField,
    t_half: &FaceField,
    spacing: (f64, f64),
) {
    for index in n.interior().clone().iter() {
        let value = divergence(index, spacing, |axis, face| {
            u_adv.at(axis, face)
                * rho_half.at(axis, face)
                * cp_half.at(axis, face)
                * t_half.at(axis, face)
        });
        n.set(index, value);
    }
}




/// Store the per-face mass flux `u * rho_half`, which the coarse-fine
/// corrector reads back when reconciling interface fluxes.
pub fn mass_flux(flux: &mut FaceField, u_adv: &FaceField, rho_half: &FaceField) {
    for axis in Axis::all().iter().copied() {
        for face in flux.face_space(axis).iter() {
            flux.set(axis, face, u_adv.at(axis, face) * rho_half.at(axis, face));
        }
    }
}




/// Advance the density field one explicit sub-stage:
/// `R_new = a0*R_old + a1*R_cur - a2*dt*div(u rho_half) + a2*dt*S`.
///
/// `r_new` may alias the storage that `r_cur` was read into by the caller's
/// bookkeeping, because the update of each cell reads only that cell from
/// `r_old`/`r_cur` and the already-reconstructed face values.
pub fn density_update(
    r_new: &mut CellField,
    coefficients: StageCoefficients,
    r_old: &CellField,
    r_cur: &CellField,
    u_adv: &FaceField,
    rho_half: &FaceField,
    source: Option<&CellField>,
    dt: f64,
    spacing: (f64, f64),
) {
    let StageCoefficients { a0, a1, a2 } = coefficients;

    for index in r_new.interior().clone().iter() {
        let div = divergence(index, spacing, |axis, face| {
            u_adv.at(axis, face) * rho_half.at(axis, face)
        });
        let s = source.map_or(0.0, |s| s.at(index));
        let value = a0 * r_old.at(index) + a1 * r_cur.at(index) + a2 * dt * (s - div);
        r_new.set(index, value);
    }
}




/// Fill the optional mass-conservation diagnostic
/// `M = |(R_new - R_old)/dt + div(u rho_half)|`. Zero to roundoff wherever
/// the final stage was a clean forward-Euler-composite update; nonzero
/// where the coarse-fine corrector adjusted the result. Diagnostic only:
/// nothing reads it back.
pub fn mass_conservation_magnitude(
    m: &mut CellField,
    r_new: &CellField,
    r_old: &CellField,
    u_adv: &FaceField,
    rho_half: &FaceField,
    dt: f64,
    spacing: (f64, f64),
) {
    for index in m.interior().clone().iter() {
        let div = divergence(index, spacing, |axis, face| {
            u_adv.at(axis, face) * rho_half.at(axis, face)
        });
        let rate = (r_new.at(index) - r_old.at(index)) / dt;
        m.set(index, (rate + div).abs());
    }
}
