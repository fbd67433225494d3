use log::{debug, info};
use rayon::prelude::*;

use crate::bc::{BcCoefStrategy, ExtrapolationType};
use crate::coarse_fine::enforce_conservation;
use crate::config::InputDatabase;
use crate::error::Error;
use crate::field::CellField;
use crate::ghost_fill::{GhostFillSchedule, TransactionComponent};
use crate::hierarchy::{Patch, PatchHierarchy};
use crate::limiter::{interpolate_cell_quantity, LimiterType};
use crate::registry::{PatchDataIndex, VariableRegistry};
use crate::stepper;
use crate::stepper::StageCoefficients;




/// The old/current/new patch data index triplet of an externally owned
/// quantity (velocity, specific heat, temperature). `old` is the state at
/// step n-1, `current` at n, `new` the partially converged state at n+1
/// once a companion fluid solve has produced one.
///
/// An unset `old` or `new` silently resolves to `current`: on the very
/// first time step there is no old state, and before an INS cycle has run
/// there is no new one. That degeneration is a documented contract, not an
/// error. An unset `current` is a configuration error and fatal.
#[derive(Clone, Copy, Debug, Default)]
pub struct TemporalBufferSet {
    old: Option<PatchDataIndex>,
    current: Option<PatchDataIndex>,
    new: Option<PatchDataIndex>,
}




// ============================================================================
impl TemporalBufferSet {


    pub fn set_indices(
        &mut self,
        old: Option<PatchDataIndex>,
        current: PatchDataIndex,
        new: Option<PatchDataIndex>,
    ) {
        self.old = old;
        self.current = Some(current);
        self.new = new;
    }


    pub fn set_current(&mut self, current: PatchDataIndex) {
        self.current = Some(current);
    }


    pub fn current(&self, what: &str) -> PatchDataIndex {
        self.current
            .unwrap_or_else(|| panic!("the current {} patch data index has not been set", what))
    }


    pub fn resolve_old(&self, what: &str) -> PatchDataIndex {
        self.old.unwrap_or_else(|| self.current(what))
    }


    pub fn resolve_new(&self, what: &str) -> PatchDataIndex {
        self.new.unwrap_or_else(|| self.current(what))
    }


    pub fn has_new(&self) -> bool {
        self.new.is_some()
    }
}




/// A prescribed source term for the density continuity equation, evaluated
/// patch by patch at each stage.
pub trait SourceTerm: Sync {
    fn set_data_on_patch(&self, source: &mut CellField, spacing: (f64, f64), time: f64);
}




/// Everything that exists only between `initialize_time_integrator` and
/// `deallocate_time_integrator`: the scratch variable indexes and the
/// cached ghost-fill schedules, keyed to the hierarchy generation they were
/// built against.
struct ScratchContext<'a> {
    rho_scratch: PatchDataIndex,
    rho_new: PatchDataIndex,
    cp_scratch: PatchDataIndex,
    t_scratch: PatchDataIndex,
    u_adv: PatchDataIndex,
    rho_half: PatchDataIndex,
    cp_half: PatchDataIndex,
    t_half: PatchDataIndex,
    mass_flux: PatchDataIndex,
    n_cc: PatchDataIndex,
    source: PatchDataIndex,
    rho_fill: GhostFillSchedule<'a>,
    cp_fill: GhostFillSchedule<'a>,
    t_fill: GhostFillSchedule<'a>,
    generation: u64,
}

impl<'a> ScratchContext<'a> {
    fn all_indexes(&self) -> [PatchDataIndex; 11] {
        [
            self.rho_scratch,
            self.rho_new,
            self.cp_scratch,
            self.t_scratch,
            self.u_adv,
            self.rho_half,
            self.cp_half,
            self.t_half,
            self.mass_flux,
            self.n_cc,
            self.source,
        ]
    }
}




/// Integrates the cell-centered density field
///
/// ```text
/// d rho / dt + div(rho u) = S(x, t)
/// ```
///
/// with an explicit multi-stage SSP update, and assembles the conservative
/// convective derivative `N = div(rho Cp u T)` used by the variable
/// coefficient energy equation. Face states are reconstructed with the
/// bounded limiters of Patel and Natarajan (or the classical TVD family);
/// the density integral is kept conservative across coarse-fine interfaces
/// by a per-stage flux reconciliation.
///
/// Lifecycle: configure (setters, all before the first `integrate`), then
/// `initialize_time_integrator`, any number of `integrate(dt)` calls, then
/// `deallocate_time_integrator`. The integrator references the hierarchy
/// and the boundary condition strategies without owning them; a regrid
/// invalidates the initialized state and requires re-initialization.
pub struct ConservativeMassTransportIntegrator<'a> {
    object_name: String,
    density_limiter: LimiterType,
    specific_heat_limiter: LimiterType,
    temperature_limiter: LimiterType,
    bdry_extrap: ExtrapolationType,
    stages: Vec<StageCoefficients>,
    rho_current: Option<PatchDataIndex>,
    velocity: TemporalBufferSet,
    specific_heat: TemporalBufferSet,
    temperature: TemporalBufferSet,
    mass_conservation: Option<PatchDataIndex>,
    rho_bc: Option<&'a dyn BcCoefStrategy>,
    cp_bc: Option<&'a dyn BcCoefStrategy>,
    t_bc: Option<&'a dyn BcCoefStrategy>,
    source_fcn: Option<&'a dyn SourceTerm>,
    solution_time: f64,
    scratch: Option<ScratchContext<'a>>,
}




// ============================================================================
impl<'a> ConservativeMassTransportIntegrator<'a> {


    pub fn new(object_name: &str) -> Self {
        Self {
            object_name: object_name.to_string(),
            density_limiter: LimiterType::Cui,
            specific_heat_limiter: LimiterType::Cui,
            temperature_limiter: LimiterType::Cui,
            bdry_extrap: ExtrapolationType::Constant,
            stages: StageCoefficients::ssp_rk3(),
            rho_current: None,
            velocity: TemporalBufferSet::default(),
            specific_heat: TemporalBufferSet::default(),
            temperature: TemporalBufferSet::default(),
            mass_conservation: None,
            rho_bc: None,
            cp_bc: None,
            t_bc: None,
            source_fcn: None,
            solution_time: 0.0,
            scratch: None,
        }
    }


    /// Construct from the external input database. Recognized keys:
    /// `"limiter type for T"`, `"limiter type for Cp"`,
    /// `"limiter type for rho"`, `"bdry extrapolation type"`.
    pub fn from_database(object_name: &str, database: &InputDatabase) -> Result<Self, Error> {
        let mut integrator = Self::new(object_name);

        if let Some(name) = database.get("limiter type for T") {
            integrator.temperature_limiter = name.parse()?;
        }
        if let Some(name) = database.get("limiter type for Cp") {
            integrator.specific_heat_limiter = name.parse()?;
        }
        if let Some(name) = database.get("limiter type for rho") {
            integrator.density_limiter = name.parse()?;
        }
        if let Some(name) = database.get("bdry extrapolation type") {
            integrator.bdry_extrap = name.parse()?;
        }
        Ok(integrator)
    }


    pub fn temperature_convective_limiter(&self) -> LimiterType {
        self.temperature_limiter
    }


    pub fn specific_heat_convective_limiter(&self) -> LimiterType {
        self.specific_heat_limiter
    }


    pub fn density_convective_limiter(&self) -> LimiterType {
        self.density_limiter
    }


    pub fn is_initialized(&self) -> bool {
        self.scratch.is_some()
    }


    /// Override the limiter selection. Limiters size the scratch ghost
    /// rings and the fill schedules, so they are immutable once the
    /// integrator is initialized.
    pub fn set_convective_limiters(&mut self, rho: LimiterType, cp: LimiterType, t: LimiterType) {
        assert!(
            self.scratch.is_none(),
            "{}: limiters cannot change while the integrator is initialized",
            self.object_name);
        self.density_limiter = rho;
        self.specific_heat_limiter = cp;
        self.temperature_limiter = t;
    }


    /// Override the stage coefficients. The default is three-stage SSP-RK3
    /// in Shu-Osher form; the integrator applies whatever stages it is
    /// given and leaves their SSP validity to the caller.
    pub fn set_stage_coefficients(&mut self, stages: Vec<StageCoefficients>) {
        assert!(!stages.is_empty(), "{}: at least one stage is required", self.object_name);
        self.stages = stages;
    }


    pub fn set_cell_centered_density_patch_data_index(&mut self, rho_cc_idx: PatchDataIndex) {
        self.rho_current = Some(rho_cc_idx);
    }


    /// Set the current specific heat index alone, leaving any old/new
    /// companions in place.
    pub fn set_cell_centered_specific_heat_patch_data_index(&mut self, cp_cc_idx: PatchDataIndex) {
        self.specific_heat.set_current(cp_cc_idx);
    }


    /// Set the current temperature index alone, leaving any old/new
    /// companions in place.
    pub fn set_cell_centered_temperature_patch_data_index(&mut self, t_cc_idx: PatchDataIndex) {
        self.temperature.set_current(t_cc_idx);
    }


    pub fn set_specific_heat_patch_data_indices(
        &mut self,
        cp_old_idx: Option<PatchDataIndex>,
        cp_current_idx: PatchDataIndex,
        cp_new_idx: Option<PatchDataIndex>,
    ) {
        self.specific_heat.set_indices(cp_old_idx, cp_current_idx, cp_new_idx);
    }


    pub fn set_temperature_patch_data_indices(
        &mut self,
        t_old_idx: Option<PatchDataIndex>,
        t_current_idx: PatchDataIndex,
        t_new_idx: Option<PatchDataIndex>,
    ) {
        self.temperature.set_indices(t_old_idx, t_current_idx, t_new_idx);
    }


    pub fn set_fluid_velocity_patch_data_indices(
        &mut self,
        u_old_idx: Option<PatchDataIndex>,
        u_current_idx: PatchDataIndex,
        u_new_idx: Option<PatchDataIndex>,
    ) {
        self.velocity.set_indices(u_old_idx, u_current_idx, u_new_idx);
    }


    pub fn set_mass_conservation_patch_data_index(&mut self, m_idx: PatchDataIndex) {
        self.mass_conservation = Some(m_idx);
    }


    pub fn set_cell_centered_density_boundary_conditions(&mut self, bc: &'a dyn BcCoefStrategy) {
        self.rho_bc = Some(bc);
    }


    pub fn set_cell_centered_specific_heat_boundary_conditions(&mut self, bc: &'a dyn BcCoefStrategy) {
        self.cp_bc = Some(bc);
    }


    pub fn set_cell_centered_temperature_boundary_conditions(&mut self, bc: &'a dyn BcCoefStrategy) {
        self.t_bc = Some(bc);
    }


    pub fn set_density_source_term(&mut self, source: &'a dyn SourceTerm) {
        self.source_fcn = Some(source);
    }


    pub fn set_solution_time(&mut self, time: f64) {
        self.solution_time = time;
    }


    /// The index of the density state produced by the latest `integrate`.
    /// This is the field the INS solver's variable-coefficient operator
    /// reads.
    pub fn updated_cell_centered_density_patch_data_index(&self) -> PatchDataIndex {
        self.scratch
            .as_ref()
            .unwrap_or_else(|| panic!("{}: the integrator is not initialized", self.object_name))
            .rho_new
    }


    /// The index of the assembled convective derivative
    /// `N = div(rho Cp u T)`.
    pub fn convective_derivative_patch_data_index(&self) -> PatchDataIndex {
        self.scratch
            .as_ref()
            .unwrap_or_else(|| panic!("{}: the integrator is not initialized", self.object_name))
            .n_cc
    }


    /// Register and allocate the scratch variables and build the
    /// ghost-fill schedules for the current hierarchy configuration.
    /// Calling while already initialized rebuilds everything (it is not
    /// guaranteed to be a no-op); re-initialization after a deallocation or
    /// a regrid rebuilds the schedules from the new configuration.
    pub fn initialize_time_integrator(
        &mut self,
        registry: &mut VariableRegistry,
        hierarchy: &mut PatchHierarchy,
    ) {
        if self.scratch.is_some() {
            self.deallocate_time_integrator(hierarchy);
        }
        info!(
            "{}: initializing over {} levels (limiters: rho = {}, Cp = {}, T = {})",
            self.object_name,
            hierarchy.num_levels(),
            self.density_limiter,
            self.specific_heat_limiter,
            self.temperature_limiter);

        let name = |suffix: &str| format!("{}::{}", self.object_name, suffix);

        let rho_scratch = registry.register_cell_variable(
            &name("rho_scratch"), self.density_limiter.ghost_cell_width());
        let cp_scratch = registry.register_cell_variable(
            &name("cp_scratch"), self.specific_heat_limiter.ghost_cell_width());
        let t_scratch = registry.register_cell_variable(
            &name("T_scratch"), self.temperature_limiter.ghost_cell_width());
        let rho_new = registry.register_cell_variable(&name("rho_new"), 0);
        let n_cc = registry.register_cell_variable(&name("N"), 0);
        let source = registry.register_cell_variable(&name("S"), 0);
        let u_adv = registry.register_face_variable(&name("u_adv"));
        let rho_half = registry.register_face_variable(&name("rho_half"));
        let cp_half = registry.register_face_variable(&name("cp_half"));
        let t_half = registry.register_face_variable(&name("T_half"));
        let mass_flux = registry.register_face_variable(&name("mass_flux"));

        let context = ScratchContext {
            rho_scratch,
            rho_new,
            cp_scratch,
            t_scratch,
            u_adv,
            rho_half,
            cp_half,
            t_half,
            mass_flux,
            n_cc,
            source,
            rho_fill: GhostFillSchedule::new(hierarchy, registry, TransactionComponent {
                data_index: rho_scratch,
                extrapolation: self.bdry_extrap,
                bc: self.rho_bc,
            }),
            cp_fill: GhostFillSchedule::new(hierarchy, registry, TransactionComponent {
                data_index: cp_scratch,
                extrapolation: self.bdry_extrap,
                bc: self.cp_bc,
            }),
            t_fill: GhostFillSchedule::new(hierarchy, registry, TransactionComponent {
                data_index: t_scratch,
                extrapolation: self.bdry_extrap,
                bc: self.t_bc,
            }),
            generation: hierarchy.generation(),
        };

        for index in context.all_indexes().iter().copied() {
            hierarchy.allocate_data(registry, index);
        }
        self.scratch = Some(context);
    }


    /// Release the scratch storage and the cached schedules. Safe to call
    /// when the integrator is already deallocated.
    pub fn deallocate_time_integrator(&mut self, hierarchy: &mut PatchHierarchy) {
        match self.scratch.take() {
            Some(context) => {
                info!("{}: deallocating time integrator", self.object_name);
                for index in context.all_indexes().iter().copied() {
                    hierarchy.deallocate_data(index);
                }
            }
            None => debug!("{}: deallocate on an already-deallocated integrator", self.object_name),
        }
    }


    /// Advance the density field by one time step and assemble the
    /// convective derivative. Must be called between
    /// `initialize_time_integrator` and `deallocate_time_integrator`
    /// against the same hierarchy configuration.
    pub fn integrate(&mut self, hierarchy: &mut PatchHierarchy, dt: f64) {
        let context = self
            .scratch
            .as_ref()
            .unwrap_or_else(|| panic!(
                "{}: integrate() called outside the initialize/deallocate window",
                self.object_name));
        if context.generation != hierarchy.generation() {
            panic!(
                "{}: the patch hierarchy was regridded since initialization",
                self.object_name);
        }
        assert!(dt > 0.0, "{}: the time step must be positive, got {}", self.object_name, dt);

        let rho_current = self
            .rho_current
            .unwrap_or_else(|| panic!("{}: the density patch data index has not been set", self.object_name));
        let time = self.solution_time;
        debug!(
            "{}: advancing density, {} stages, dt = {}",
            self.object_name,
            self.stages.len(),
            dt);

        for (stage, coefficients) in self.stages.clone().into_iter().enumerate() {
            let stage_source = if stage == 0 { rho_current } else { context.rho_new };

            for n in 0..hierarchy.num_levels() {
                let level = hierarchy.level_mut(n);
                let spacing = level.spacing();
                level.patches_mut().par_iter_mut().for_each(|patch| {
                    self.prepare_stage_data(patch, context, stage_source, spacing, time);
                });
            }

            context.rho_fill.fill_data(hierarchy, time);
            context.cp_fill.fill_data(hierarchy, time);
            context.t_fill.fill_data(hierarchy, time);

            for n in 0..hierarchy.num_levels() {
                let level = hierarchy.level_mut(n);
                let spacing = level.spacing();
                level.patches_mut().par_iter_mut().for_each(|patch| {
                    self.compute_stage_update(patch, context, coefficients, rho_current, dt, spacing);
                });
            }

            enforce_conservation(
                hierarchy,
                context.mass_flux,
                context.rho_new,
                coefficients.a2,
                dt);
        }

        if let Some(m_idx) = self.mass_conservation {
            for n in 0..hierarchy.num_levels() {
                let level = hierarchy.level_mut(n);
                let spacing = level.spacing();
                level.patches_mut().par_iter_mut().for_each(|patch| {
                    let mut m = patch.take_cell_data(m_idx);
                    stepper::mass_conservation_magnitude(
                        &mut m,
                        patch.cell_data(context.rho_new),
                        patch.cell_data(rho_current),
                        patch.face_data(context.u_adv),
                        patch.face_data(context.rho_half),
                        dt,
                        spacing);
                    patch.put_cell_data(m_idx, m);
                });
            }
        }

        self.solution_time += dt;
    }


    /// Assemble the stage inputs on one patch: the stage advection
    /// velocity, the specific heat and temperature composites, the stage
    /// density copy awaiting its ghost fill, and the source term.
    ///
    /// The advection velocity is the midpoint of current and new when a new
    /// velocity exists, and otherwise the extrapolation
    /// `3/2 u_current - 1/2 u_old`; with neither companion set, both rules
    /// collapse to `u_current`.
    fn prepare_stage_data(
        &self,
        patch: &mut Patch,
        context: &ScratchContext,
        stage_source: PatchDataIndex,
        spacing: (f64, f64),
        time: f64,
    ) {
        let u_current = self.velocity.current("velocity");
        let mut u_adv = patch.take_face_data(context.u_adv);
        if self.velocity.has_new() {
            let u_new = self.velocity.resolve_new("velocity");
            u_adv.assign_linear(0.5, patch.face_data(u_current), 0.5, patch.face_data(u_new));
        } else {
            let u_old = self.velocity.resolve_old("velocity");
            u_adv.assign_linear(1.5, patch.face_data(u_current), -0.5, patch.face_data(u_old));
        }
        patch.put_face_data(context.u_adv, u_adv);

        let cp_current = self.specific_heat.current("specific heat");
        let mut cp_scratch = patch.take_cell_data(context.cp_scratch);
        if self.specific_heat.has_new() {
            let cp_new = self.specific_heat.resolve_new("specific heat");
            cp_scratch.assign_linear_interior(
                0.5, patch.cell_data(cp_current), 0.5, patch.cell_data(cp_new));
        } else {
            cp_scratch.copy_interior_from(patch.cell_data(cp_current));
        }
        patch.put_cell_data(context.cp_scratch, cp_scratch);

        let t_current = self.temperature.current("temperature");
        let mut t_scratch = patch.take_cell_data(context.t_scratch);
        if self.temperature.has_new() {
            let t_new = self.temperature.resolve_new("temperature");
            t_scratch.assign_linear_interior(
                0.5, patch.cell_data(t_current), 0.5, patch.cell_data(t_new));
        } else {
            t_scratch.copy_interior_from(patch.cell_data(t_current));
        }
        patch.put_cell_data(context.t_scratch, t_scratch);

        let mut rho_scratch = patch.take_cell_data(context.rho_scratch);
        rho_scratch.copy_interior_from(patch.cell_data(stage_source));
        patch.put_cell_data(context.rho_scratch, rho_scratch);

        if let Some(source_fcn) = self.source_fcn {
            let mut source = patch.take_cell_data(context.source);
            source_fcn.set_data_on_patch(&mut source, spacing, time);
            patch.put_cell_data(context.source, source);
        }
    }


    /// Run the stage kernels on one patch: face reconstruction of density,
    /// specific heat and temperature, the per-face mass flux, the
    /// convective derivative, and the density update itself.
    fn compute_stage_update(
        &self,
        patch: &mut Patch,
        context: &ScratchContext,
        coefficients: StageCoefficients,
        rho_current: PatchDataIndex,
        dt: f64,
        spacing: (f64, f64),
    ) {
        let mut rho_half = patch.take_face_data(context.rho_half);
        interpolate_cell_quantity(
            &mut rho_half,
            patch.face_data(context.u_adv),
            patch.cell_data(context.rho_scratch),
            self.density_limiter);
        patch.put_face_data(context.rho_half, rho_half);

        let mut cp_half = patch.take_face_data(context.cp_half);
        interpolate_cell_quantity(
            &mut cp_half,
            patch.face_data(context.u_adv),
            patch.cell_data(context.cp_scratch),
            self.specific_heat_limiter);
        patch.put_face_data(context.cp_half, cp_half);

        let mut t_half = patch.take_face_data(context.t_half);
        interpolate_cell_quantity(
            &mut t_half,
            patch.face_data(context.u_adv),
            patch.cell_data(context.t_scratch),
            self.temperature_limiter);
        patch.put_face_data(context.t_half, t_half);

        let mut mass_flux = patch.take_face_data(context.mass_flux);
        stepper::mass_flux(
            &mut mass_flux,
            patch.face_data(context.u_adv),
            patch.face_data(context.rho_half));
        patch.put_face_data(context.mass_flux, mass_flux);

        let mut n_cc = patch.take_cell_data(context.n_cc);
        stepper::convective_derivative(
            &mut n_cc,
            patch.face_data(context.u_adv),
            patch.face_data(context.rho_half),
            patch.face_data(context.cp_half),
            patch.face_data(context.t_half),
            spacing);
        patch.put_cell_data(context.n_cc, n_cc);

        let mut rho_new = patch.take_cell_data(context.rho_new);
        let source = if self.source_fcn.is_some() {
            Some(patch.cell_data(context.source))
        } else {
            None
        };
        stepper::density_update(
            &mut rho_new,
            coefficients,
            patch.cell_data(rho_current),
            patch.cell_data(context.rho_scratch),
            patch.face_data(context.u_adv),
            patch.face_data(context.rho_half),
            source,
            dt,
            spacing);
        patch.put_cell_data(context.rho_new, rho_new);
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use crate::bc::DirichletBc;
    use crate::field::FaceField;
    use crate::hierarchy::PatchHierarchy;
    use crate::index_space::{range2d, Axis, IndexSpace};
    use crate::limiter::LimiterType;
    use crate::registry::{PatchDataIndex, VariableRegistry};
    use crate::stepper::StageCoefficients;
    use super::ConservativeMassTransportIntegrator;

    struct External {
        rho: PatchDataIndex,
        cp: PatchDataIndex,
        t: PatchDataIndex,
        u: PatchDataIndex,
    }

    fn register_externals(registry: &mut VariableRegistry) -> External {
        External {
            rho: registry.register_cell_variable("rho::current", 0),
            cp: registry.register_cell_variable("cp::current", 0),
            t: registry.register_cell_variable("T::current", 0),
            u: registry.register_face_variable("u::current"),
        }
    }

    /// Zero on every physical boundary face, `u0` on every interior face:
    /// a closed domain with nonzero transport inside.
    fn closed_velocity(domain: &IndexSpace, u0: f64) -> impl Fn(Axis, (i64, i64)) -> f64 {
        let domain = domain.clone();
        move |axis, face| {
            let boundary = match axis {
                Axis::I => face.0 == domain.range(Axis::I).start || face.0 == domain.range(Axis::I).end,
                Axis::J => face.1 == domain.range(Axis::J).start || face.1 == domain.range(Axis::J).end,
            };
            if boundary { 0.0 } else { u0 }
        }
    }

    fn fill_external_data(hierarchy: &mut PatchHierarchy, external: &External, u0: f64) {
        for n in 0..hierarchy.num_levels() {
            let level_domain = hierarchy.level(n).domain().clone();
            let ratio = (level_domain.dim().0 / hierarchy.level(0).domain().dim().0) as i64;
            for patch in hierarchy.level_mut(n).patches_mut() {
                let interior = patch.interior().clone();
                for index in interior.iter() {
                    // piecewise-smooth positive profiles, expressed on the
                    // level-0 lattice so levels agree where they overlap
                    let (x, y) = (index.0 as f64 / ratio as f64, index.1 as f64 / ratio as f64);
                    patch.cell_data_mut(external.rho).set(index, 1.0 + 0.25 * (0.7 * x).sin().powi(2));
                    patch.cell_data_mut(external.cp).set(index, 2.0 + 0.1 * (0.3 * y).cos());
                    patch.cell_data_mut(external.t).set(index, 300.0 + x + y);
                }
                let velocity = closed_velocity(&level_domain, u0);
                let u = patch.face_data_mut(external.u);
                for axis in Axis::all().iter().copied() {
                    for face in u.face_space(axis).iter() {
                        u.set(axis, face, velocity(axis, face));
                    }
                }
            }
        }
    }

    fn one_level_hierarchy() -> PatchHierarchy {
        PatchHierarchy::new(
            range2d(0..8, 0..8),
            (1.0, 1.0),
            vec![range2d(0..4, 0..8), range2d(4..8, 0..8)],
        )
    }

    #[test]
    fn mass_is_conserved_on_a_closed_two_level_domain() {
        let mut hierarchy = one_level_hierarchy();
        hierarchy.add_finer_level(vec![range2d(4..12, 4..12)], 2);
        let mut registry = VariableRegistry::new();
        let external = register_externals(&mut registry);
        for index in [external.rho, external.cp, external.t].iter().copied() {
            hierarchy.allocate_data(&registry, index);
        }
        hierarchy.allocate_data(&registry, external.u);
        fill_external_data(&mut hierarchy, &external, 0.4);

        let bc = DirichletBc(1.0);
        let mut integrator = ConservativeMassTransportIntegrator::new("mass_transport");
        integrator.set_cell_centered_density_patch_data_index(external.rho);
        integrator.set_specific_heat_patch_data_indices(None, external.cp, None);
        integrator.set_temperature_patch_data_indices(None, external.t, None);
        integrator.set_fluid_velocity_patch_data_indices(None, external.u, None);
        integrator.set_cell_centered_density_boundary_conditions(&bc);
        integrator.set_cell_centered_specific_heat_boundary_conditions(&bc);
        integrator.set_cell_centered_temperature_boundary_conditions(&bc);
        integrator.initialize_time_integrator(&mut registry, &mut hierarchy);

        let before = hierarchy.integrate_cell_quantity(external.rho);
        integrator.integrate(&mut hierarchy, 0.05);
        let after = hierarchy
            .integrate_cell_quantity(integrator.updated_cell_centered_density_patch_data_index());

        assert!(
            (after - before).abs() < 1e-10 * before.abs(),
            "mass drifted from {} to {}",
            before,
            after);
        integrator.deallocate_time_integrator(&mut hierarchy);
    }

    #[test]
    fn mass_is_conserved_across_a_regrid() {
        let mut hierarchy = one_level_hierarchy();
        let mut registry = VariableRegistry::new();
        let external = register_externals(&mut registry);
        for index in [external.rho, external.cp, external.t].iter().copied() {
            hierarchy.allocate_data(&registry, index);
        }
        hierarchy.allocate_data(&registry, external.u);
        fill_external_data(&mut hierarchy, &external, 0.4);

        let bc = DirichletBc(1.0);
        let mut integrator = ConservativeMassTransportIntegrator::new("mass_transport");
        integrator.set_cell_centered_density_patch_data_index(external.rho);
        integrator.set_specific_heat_patch_data_indices(None, external.cp, None);
        integrator.set_temperature_patch_data_indices(None, external.t, None);
        integrator.set_fluid_velocity_patch_data_indices(None, external.u, None);
        integrator.set_cell_centered_density_boundary_conditions(&bc);
        integrator.set_cell_centered_specific_heat_boundary_conditions(&bc);
        integrator.set_cell_centered_temperature_boundary_conditions(&bc);
        integrator.initialize_time_integrator(&mut registry, &mut hierarchy);

        let start = hierarchy.integrate_cell_quantity(external.rho);
        integrator.integrate(&mut hierarchy, 0.05);

        // commit the update, then refine part of the domain
        let updated = integrator.updated_cell_centered_density_patch_data_index();
        for n in 0..hierarchy.num_levels() {
            for patch in hierarchy.level_mut(n).patches_mut() {
                let update = patch.cell_data(updated).clone();
                patch.cell_data_mut(external.rho).copy_interior_from(&update);
            }
        }
        integrator.deallocate_time_integrator(&mut hierarchy);
        hierarchy.add_finer_level(vec![range2d(4..12, 4..12)], 2);
        for index in [external.rho, external.cp, external.t].iter().copied() {
            hierarchy.allocate_data(&registry, index);
            hierarchy.fill_level_from_coarser(1, index);
        }
        hierarchy.allocate_data(&registry, external.u);
        let fine_domain = hierarchy.level(1).domain().clone();
        for patch in hierarchy.level_mut(1).patches_mut() {
            let velocity = closed_velocity(&fine_domain, 0.4);
            let u = patch.face_data_mut(external.u);
            for axis in Axis::all().iter().copied() {
                for face in u.face_space(axis).iter() {
                    u.set(axis, face, velocity(axis, face));
                }
            }
        }

        let mid = hierarchy.integrate_cell_quantity(external.rho);
        assert!(
            (mid - start).abs() < 1e-10 * start.abs(),
            "mass drifted across the first step and the regrid");

        integrator.initialize_time_integrator(&mut registry, &mut hierarchy);
        integrator.integrate(&mut hierarchy, 0.05);
        let after = hierarchy
            .integrate_cell_quantity(integrator.updated_cell_centered_density_patch_data_index());

        assert!(
            (after - mid).abs() < 1e-10 * mid.abs(),
            "mass drifted from {} to {} after the regrid",
            mid,
            after);
    }

    #[test]
    fn unset_old_velocity_degenerates_to_current() {
        let run = |set_old_explicitly: bool| {
            let mut hierarchy = one_level_hierarchy();
            let mut registry = VariableRegistry::new();
            let external = register_externals(&mut registry);
            let u_old = registry.register_face_variable("u::old");
            for index in [external.rho, external.cp, external.t].iter().copied() {
                hierarchy.allocate_data(&registry, index);
            }
            hierarchy.allocate_data(&registry, external.u);
            hierarchy.allocate_data(&registry, u_old);
            fill_external_data(&mut hierarchy, &external, 0.4);
            for patch in hierarchy.level_mut(0).patches_mut() {
                let current: FaceField = patch.face_data(external.u).clone();
                *patch.face_data_mut(u_old) = current;
            }

            let bc = DirichletBc(1.0);
            let mut integrator = ConservativeMassTransportIntegrator::new("mass_transport");
            integrator.set_cell_centered_density_patch_data_index(external.rho);
            integrator.set_specific_heat_patch_data_indices(None, external.cp, None);
            integrator.set_temperature_patch_data_indices(None, external.t, None);
            integrator.set_fluid_velocity_patch_data_indices(
                if set_old_explicitly { Some(u_old) } else { None },
                external.u,
                None);
            integrator.set_cell_centered_density_boundary_conditions(&bc);
            integrator.set_cell_centered_specific_heat_boundary_conditions(&bc);
            integrator.set_cell_centered_temperature_boundary_conditions(&bc);
            integrator.initialize_time_integrator(&mut registry, &mut hierarchy);
            integrator.integrate(&mut hierarchy, 0.05);

            let updated = integrator.updated_cell_centered_density_patch_data_index();
            let mut values = Vec::new();
            for patch in hierarchy.level(0).patches() {
                for (_, value) in patch.cell_data(updated).iter_interior() {
                    values.push(value);
                }
            }
            values
        };

        assert_eq!(run(false), run(true));
    }

    #[test]
    fn deallocation_is_idempotent() {
        let mut hierarchy = one_level_hierarchy();
        let mut registry = VariableRegistry::new();
        let external = register_externals(&mut registry);
        for index in [external.rho, external.cp, external.t].iter().copied() {
            hierarchy.allocate_data(&registry, index);
        }
        hierarchy.allocate_data(&registry, external.u);

        let mut integrator = ConservativeMassTransportIntegrator::new("mass_transport");
        integrator.set_cell_centered_density_patch_data_index(external.rho);
        integrator.initialize_time_integrator(&mut registry, &mut hierarchy);
        assert!(integrator.is_initialized());

        integrator.deallocate_time_integrator(&mut hierarchy);
        assert!(!integrator.is_initialized());
        integrator.deallocate_time_integrator(&mut hierarchy);
        assert!(!integrator.is_initialized());
    }

    #[test]
    #[should_panic]
    fn integrating_before_initialization_is_fatal() {
        let mut hierarchy = one_level_hierarchy();
        let mut integrator = ConservativeMassTransportIntegrator::new("mass_transport");
        integrator.integrate(&mut hierarchy, 0.1);
    }

    #[test]
    #[should_panic]
    fn integrating_across_a_regrid_is_fatal() {
        let mut hierarchy = one_level_hierarchy();
        let mut registry = VariableRegistry::new();
        let external = register_externals(&mut registry);
        for index in [external.rho, external.cp, external.t].iter().copied() {
            hierarchy.allocate_data(&registry, index);
        }
        hierarchy.allocate_data(&registry, external.u);
        fill_external_data(&mut hierarchy, &external, 0.0);

        let mut integrator = ConservativeMassTransportIntegrator::new("mass_transport");
        integrator.set_cell_centered_density_patch_data_index(external.rho);
        integrator.set_specific_heat_patch_data_indices(None, external.cp, None);
        integrator.set_temperature_patch_data_indices(None, external.t, None);
        integrator.set_fluid_velocity_patch_data_indices(None, external.u, None);
        integrator.initialize_time_integrator(&mut registry, &mut hierarchy);
        hierarchy.add_finer_level(vec![range2d(0..4, 0..4)], 2);
        integrator.integrate(&mut hierarchy, 0.1);
    }

    #[test]
    fn two_stage_update_of_a_constant_state_is_the_identity() {
        let mut hierarchy = one_level_hierarchy();
        let mut registry = VariableRegistry::new();
        let external = register_externals(&mut registry);
        for index in [external.rho, external.cp, external.t].iter().copied() {
            hierarchy.allocate_data(&registry, index);
        }
        hierarchy.allocate_data(&registry, external.u);
        for patch in hierarchy.level_mut(0).patches_mut() {
            patch.cell_data_mut(external.rho).fill(2.0);
            patch.cell_data_mut(external.cp).fill(1.0);
            patch.cell_data_mut(external.t).fill(300.0);
            patch.face_data_mut(external.u).fill(0.0);
        }

        let bc = DirichletBc(2.0);
        let mut integrator = ConservativeMassTransportIntegrator::new("mass_transport");
        integrator.set_convective_limiters(LimiterType::Upwind, LimiterType::Upwind, LimiterType::Upwind);
        integrator.set_stage_coefficients(vec![
            StageCoefficients::new(0.0, 1.0, 1.0),
            StageCoefficients::new(0.5, 0.5, 0.5),
        ]);
        integrator.set_cell_centered_density_patch_data_index(external.rho);
        integrator.set_specific_heat_patch_data_indices(None, external.cp, None);
        integrator.set_temperature_patch_data_indices(None, external.t, None);
        integrator.set_fluid_velocity_patch_data_indices(None, external.u, None);
        integrator.set_cell_centered_density_boundary_conditions(&bc);
        integrator.set_cell_centered_specific_heat_boundary_conditions(&bc);
        integrator.set_cell_centered_temperature_boundary_conditions(&bc);
        integrator.initialize_time_integrator(&mut registry, &mut hierarchy);
        integrator.integrate(&mut hierarchy, 0.1);

        let updated = integrator.updated_cell_centered_density_patch_data_index();
        for patch in hierarchy.level(0).patches() {
            for (_, value) in patch.cell_data(updated).iter_interior() {
                assert_eq!(value, 2.0);
            }
        }
    }

    #[test]
    fn mass_conservation_diagnostic_vanishes_for_a_single_stage() {
        let mut hierarchy = one_level_hierarchy();
        let mut registry = VariableRegistry::new();
        let external = register_externals(&mut registry);
        let m = registry.register_cell_variable("M", 0);
        for index in [external.rho, external.cp, external.t, m].iter().copied() {
            hierarchy.allocate_data(&registry, index);
        }
        hierarchy.allocate_data(&registry, external.u);
        fill_external_data(&mut hierarchy, &external, 0.4);

        let bc = DirichletBc(1.0);
        let mut integrator = ConservativeMassTransportIntegrator::new("mass_transport");
        integrator.set_stage_coefficients(StageCoefficients::ssp_rk1());
        integrator.set_cell_centered_density_patch_data_index(external.rho);
        integrator.set_specific_heat_patch_data_indices(None, external.cp, None);
        integrator.set_temperature_patch_data_indices(None, external.t, None);
        integrator.set_fluid_velocity_patch_data_indices(None, external.u, None);
        integrator.set_mass_conservation_patch_data_index(m);
        integrator.set_cell_centered_density_boundary_conditions(&bc);
        integrator.set_cell_centered_specific_heat_boundary_conditions(&bc);
        integrator.set_cell_centered_temperature_boundary_conditions(&bc);
        integrator.initialize_time_integrator(&mut registry, &mut hierarchy);
        integrator.integrate(&mut hierarchy, 0.05);

        // single-level, single-stage: the update is exactly the discrete
        // continuity equation, so the residual is roundoff
        for patch in hierarchy.level(0).patches() {
            for (_, value) in patch.cell_data(m).iter_interior() {
                assert!(value < 1e-11);
            }
        }
    }
}
