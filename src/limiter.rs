use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::field::{CellField, FaceField};
use crate::index_space::Axis;




/// The face reconstruction scheme used when interpolating a cell quantity
/// onto the faces of its control volumes. Each variant knows the ghost ring
/// width its stencil requires; scratch variables and fill schedules are
/// sized from it, so the width is part of the scheme's contract, not a
/// tuning knob.
///
/// `Upwind` and `Central` are the classical low-order schemes. `Minmod`,
/// `VanLeer`, `Mc` and `Superbee` are slope-limited MUSCL reconstructions.
/// `Cui`, `Fbics` and `MGamma` are the bounded normalized-variable schemes
/// of Patel and Natarajan; outside the monotone interval they all degrade
/// to first-order upwind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimiterType {
    Upwind,
    Central,
    Minmod,
    VanLeer,
    Mc,
    Superbee,
    Cui,
    Fbics,
    MGamma,
}




// ============================================================================
impl LimiterType {


    /// The ghost ring width required by this scheme's stencil.
    pub fn ghost_cell_width(self) -> i64 {
        match self {
            LimiterType::Upwind => 1,
            LimiterType::Central => 1,
            LimiterType::Minmod => 2,
            LimiterType::VanLeer => 2,
            LimiterType::Mc => 2,
            LimiterType::Superbee => 2,
            LimiterType::Cui => 2,
            LimiterType::Fbics => 3,
            LimiterType::MGamma => 3,
        }
    }


    fn uses_far_upwind(self) -> bool {
        !matches!(self, LimiterType::Upwind | LimiterType::Central)
    }


    /// Reconstruct the face value from the far-upwind, upwind and downwind
    /// cell values. `q_far_up` is ignored by the two-point schemes.
    pub fn face_value(self, q_far_up: f64, q_up: f64, q_down: f64) -> f64 {
        match self {
            LimiterType::Upwind => q_up,

            LimiterType::Central => 0.5 * (q_up + q_down),

            LimiterType::Minmod |
            LimiterType::VanLeer |
            LimiterType::Mc |
            LimiterType::Superbee => {
                let dc = q_down - q_up;
                if dc == 0.0 {
                    return q_up;
                }
                let r = (q_up - q_far_up) / dc;
                q_up + 0.5 * self.phi(r) * dc
            }

            LimiterType::Cui |
            LimiterType::Fbics |
            LimiterType::MGamma => {
                let den = q_down - q_far_up;
                if den == 0.0 {
                    return q_up;
                }
                let qhat = (q_up - q_far_up) / den;
                if qhat <= 0.0 || qhat >= 1.0 {
                    return q_up;
                }
                q_far_up + self.normalized_face_value(qhat) * den
            }
        }
    }


    /// The slope limiter function of the gradient ratio `r` for the MUSCL
    /// family.
    fn phi(self, r: f64) -> f64 {
        match self {
            LimiterType::Minmod => r.min(1.0).max(0.0),
            LimiterType::VanLeer => (r + r.abs()) / (1.0 + r.abs()),
            LimiterType::Mc => (2.0 * r).min(0.5 * (1.0 + r)).min(2.0).max(0.0),
            LimiterType::Superbee => (2.0 * r).min(1.0).max(r.min(2.0)).max(0.0),
            _ => unreachable!(),
        }
    }


    /// The normalized face value for the NVD family, valid for normalized
    /// upwind values strictly inside (0, 1).
    fn normalized_face_value(self, qhat: f64) -> f64 {
        match self {
            LimiterType::Cui => (3.0 * qhat).min(0.375 + 0.75 * qhat).min(1.0),
            LimiterType::Fbics => (2.0 * qhat).min(0.375 + 0.75 * qhat).min(1.0),
            LimiterType::MGamma => {
                let beta = 0.5;
                if qhat < beta {
                    let gamma = qhat / beta;
                    qhat + 0.5 * gamma * (1.0 - qhat)
                } else {
                    0.5 * (1.0 + qhat)
                }
            }
            _ => unreachable!(),
        }
    }
}


impl FromStr for LimiterType {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Error> {
        match name {
            "UPWIND" => Ok(LimiterType::Upwind),
            "CENTRAL" => Ok(LimiterType::Central),
            "MINMOD" => Ok(LimiterType::Minmod),
            "VAN_LEER" => Ok(LimiterType::VanLeer),
            "MC" => Ok(LimiterType::Mc),
            "SUPERBEE" => Ok(LimiterType::Superbee),
            "CUI" => Ok(LimiterType::Cui),
            "FBICS" => Ok(LimiterType::Fbics),
            "MGAMMA" => Ok(LimiterType::MGamma),
            _ => Err(Error::UnknownLimiterType(name.to_string())),
        }
    }
}

impl fmt::Display for LimiterType {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let name = match self {
            LimiterType::Upwind => "UPWIND",
            LimiterType::Central => "CENTRAL",
            LimiterType::Minmod => "MINMOD",
            LimiterType::VanLeer => "VAN_LEER",
            LimiterType::Mc => "MC",
            LimiterType::Superbee => "SUPERBEE",
            LimiterType::Cui => "CUI",
            LimiterType::Fbics => "FBICS",
            LimiterType::MGamma => "MGAMMA",
        };
        write!(fmt, "{}", name)
    }
}




/// Interpolate a cell quantity onto the faces of its control volumes. The
/// upwind direction at each face is taken from the sign of the face-normal
/// advection velocity (ties go to the positive side). The cell field's
/// ghost ring must be at least as wide as the limiter's stencil and must
/// have been filled by the caller; reading an unfilled or missing ghost
/// index is a precondition violation.
pub fn interpolate_cell_quantity(
    q_half: &mut FaceField,
    u_adv: &FaceField,
    q: &CellField,
    limiter: LimiterType,
) {
    assert!(
        q.ghost_width() >= limiter.ghost_cell_width(),
        "ghost width {} is too small for the {} limiter",
        q.ghost_width(),
        limiter);

    for axis in Axis::all().iter().copied() {
        for face in q_half.face_space(axis).iter() {
            let cell = |offset: i64| match axis {
                Axis::I => (face.0 + offset, face.1),
                Axis::J => (face.0, face.1 + offset),
            };
            let (far_up, up, down) = if u_adv.at(axis, face) >= 0.0 {
                (cell(-2), cell(-1), cell(0))
            } else {
                (cell(1), cell(0), cell(-1))
            };
            let q_far_up = if limiter.uses_far_upwind() { q.at(far_up) } else { 0.0 };
            q_half.set(axis, face, limiter.face_value(q_far_up, q.at(up), q.at(down)));
        }
    }
}
