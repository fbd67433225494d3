//! Gridflux implements the conservative mass/energy transport subsystem of
//! an incompressible flow solver on block-structured AMR grids, in the
//! style of Berger-Oliger: structured, rectilinear grid patches placed at
//! nested refinement levels. The core is an explicit multi-stage (SSP
//! Runge-Kutta) integrator for the cell-centered density continuity
//! equation, coupled to a conservative discretization of the convective
//! operator `div(rho Cp u T)` with flux-limited face reconstruction, and a
//! coarse-fine flux reconciliation that keeps the density integral
//! conserved across refinement levels.

pub mod bc;
pub mod coarse_fine;
pub mod config;
pub mod error;
pub mod exchange;
pub mod field;
pub mod ghost_fill;
pub mod hierarchy;
pub mod index_space;
pub mod limiter;
pub mod registry;
pub mod stepper;
pub mod transport;
