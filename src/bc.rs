use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::index_space::Axis;




/// Which end of an axis a physical boundary face sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Lower,
    Upper,
}




/// Robin coefficients `a*q + b*dq/dn = g` for one physical boundary face,
/// with `n` the outward normal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RobinBcCoefs {
    pub acoef: f64,
    pub bcoef: f64,
    pub gcoef: f64,
}




/// Strategy object queried per boundary face during ghost fill. The
/// integrator borrows these (`&dyn`) and never owns them; they must outlive
/// the integrator, which the borrow checker enforces.
pub trait BcCoefStrategy: Sync {
    fn coefficients(&self, axis: Axis, side: Side, position: (f64, f64), time: f64) -> RobinBcCoefs;
}




/// Fixed-value (Dirichlet) boundary condition.
pub struct DirichletBc(pub f64);

impl BcCoefStrategy for DirichletBc {
    fn coefficients(&self, _: Axis, _: Side, _: (f64, f64), _: f64) -> RobinBcCoefs {
        RobinBcCoefs { acoef: 1.0, bcoef: 0.0, gcoef: self.0 }
    }
}




/// Fixed-normal-gradient (Neumann) boundary condition.
pub struct NeumannBc(pub f64);

impl BcCoefStrategy for NeumannBc {
    fn coefficients(&self, _: Axis, _: Side, _: (f64, f64), _: f64) -> RobinBcCoefs {
        RobinBcCoefs { acoef: 0.0, bcoef: 1.0, gcoef: self.0 }
    }
}




/// How ghost layers beyond the first are populated at physical boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtrapolationType {
    Constant,
    Linear,
}

impl FromStr for ExtrapolationType {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Error> {
        match name {
            "CONSTANT" => Ok(ExtrapolationType::Constant),
            "LINEAR" => Ok(ExtrapolationType::Linear),
            _ => Err(Error::UnknownExtrapolationType(name.to_string())),
        }
    }
}




/// Solve the Robin closure for the first ghost value. The boundary face
/// value is approximated by the interior/ghost average and the normal
/// derivative by their difference over one mesh spacing `dh`.
pub fn ghost_from_robin(coefs: RobinBcCoefs, interior: f64, dh: f64) -> f64 {
    let RobinBcCoefs { acoef: a, bcoef: b, gcoef: g } = coefs;
    let denom = 0.5 * a + b / dh;
    assert!(denom != 0.0, "degenerate Robin coefficients: a = {}, b = {}", a, b);
    (g - interior * (0.5 * a - b / dh)) / denom
}




// ============================================================================
#[cfg(test)]
mod test {

    use crate::index_space::Axis;
    use super::{ghost_from_robin, BcCoefStrategy, DirichletBc, ExtrapolationType, NeumannBc, Side};

    #[test]
    fn dirichlet_ghost_mirrors_through_the_boundary_value() {
        let bc = DirichletBc(3.0);
        let coefs = bc.coefficients(Axis::I, Side::Lower, (0.0, 0.5), 0.0);
        let ghost = ghost_from_robin(coefs, 2.0, 1.0);
        assert_eq!(ghost, 4.0);
        assert_eq!(0.5 * (ghost + 2.0), 3.0);
    }

    #[test]
    fn zero_neumann_ghost_copies_the_interior() {
        let bc = NeumannBc(0.0);
        let coefs = bc.coefficients(Axis::J, Side::Upper, (0.5, 1.0), 0.0);
        assert_eq!(ghost_from_robin(coefs, 7.25, 0.5), 7.25);
    }

    #[test]
    fn nonzero_neumann_ghost_has_the_requested_gradient() {
        let bc = NeumannBc(2.0);
        let coefs = bc.coefficients(Axis::I, Side::Upper, (1.0, 0.5), 0.0);
        let ghost = ghost_from_robin(coefs, 1.0, 0.25);
        assert!(((ghost - 1.0) / 0.25 - 2.0).abs() < 1e-14);
    }

    #[test]
    fn extrapolation_type_parses_its_database_names() {
        assert_eq!("CONSTANT".parse::<ExtrapolationType>().unwrap(), ExtrapolationType::Constant);
        assert_eq!("LINEAR".parse::<ExtrapolationType>().unwrap(), ExtrapolationType::Linear);
        assert!("QUADRATIC".parse::<ExtrapolationType>().is_err());
    }
}
