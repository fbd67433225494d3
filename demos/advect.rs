use clap::Parser;
use log::info;

use gridflux::bc::NeumannBc;
use gridflux::config::InputDatabase;
use gridflux::field::CellField;
use gridflux::hierarchy::PatchHierarchy;
use gridflux::index_space::{range2d, Axis, IndexSpace};
use gridflux::registry::VariableRegistry;
use gridflux::transport::ConservativeMassTransportIntegrator;




#[derive(Debug, Parser)]
#[clap(version = "0.1.0", about = "advect a density blob on a two-level AMR grid")]
struct Opts {
    /// Zones per side on the coarse level (must be divisible by 4)
    #[clap(short = 'n', long, default_value = "32")]
    num_zones: i64,

    /// Time step size
    #[clap(short = 'd', long, default_value = "0.005")]
    dt: f64,

    /// Number of time steps
    #[clap(short = 's', long, default_value = "100")]
    num_steps: u64,

    /// Limiter used for every reconstructed quantity
    #[clap(short = 'l', long, default_value = "CUI")]
    limiter: String,

    /// Refine the center of the domain with a second level
    #[clap(short = 'r', long)]
    refine: bool,
}




#[derive(serde::Serialize)]

/**
 * The solution state written to disk when the run completes.
 */
struct Snapshot {
    iteration: u64,
    time: f64,
    density: Vec<CellField>,
}




// ============================================================================
fn fill_initial_data(
    hierarchy: &mut PatchHierarchy,
    rho: gridflux::registry::PatchDataIndex,
    cp: gridflux::registry::PatchDataIndex,
    t: gridflux::registry::PatchDataIndex,
    u: gridflux::registry::PatchDataIndex,
) {
    for n in 0..hierarchy.num_levels() {
        let spacing = hierarchy.level(n).spacing();
        let domain = hierarchy.level(n).domain().clone();
        for patch in hierarchy.level_mut(n).patches_mut() {
            let interior = patch.interior().clone();
            for index in interior.iter() {
                let x = (index.0 as f64 + 0.5) * spacing.0;
                let y = (index.1 as f64 + 0.5) * spacing.1;
                let r2 = (x - 0.3).powi(2) + (y - 0.5).powi(2);
                patch.cell_data_mut(rho).set(index, 1.0 + f64::exp(-1e2 * r2));
                patch.cell_data_mut(cp).set(index, 4.2);
                patch.cell_data_mut(t).set(index, 300.0 + 20.0 * f64::exp(-1e2 * r2));
            }
            let velocity = closed_velocity(&domain);
            let field = patch.face_data_mut(u);
            for axis in Axis::all().iter().copied() {
                for face in field.face_space(axis).iter() {
                    field.set(axis, face, velocity(axis, face));
                }
            }
        }
    }
}


/**
 * A uniform rightward wind, cut to zero on the domain boundary faces so the
 * box is closed and the density integral is an invariant of the run.
 */
fn closed_velocity(domain: &IndexSpace) -> impl Fn(Axis, (i64, i64)) -> f64 + '_ {
    move |axis, face| {
        let boundary = match axis {
            Axis::I => face.0 == domain.range(Axis::I).start || face.0 == domain.range(Axis::I).end,
            Axis::J => face.1 == domain.range(Axis::J).start || face.1 == domain.range(Axis::J).end,
        };
        match (boundary, axis) {
            (true, _) => 0.0,
            (false, Axis::I) => 0.6,
            (false, Axis::J) => 0.2,
        }
    }
}




// ============================================================================
fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    let opts = Opts::parse();
    assert!(opts.num_zones % 4 == 0, "the number of zones must be divisible by 4");

    let n = opts.num_zones;
    let dx = 1.0 / n as f64;
    let mut hierarchy = PatchHierarchy::new(
        range2d(0..n, 0..n),
        (dx, dx),
        vec![range2d(0..n / 2, 0..n), range2d(n / 2..n, 0..n)],
    );
    if opts.refine {
        hierarchy.add_finer_level(vec![range2d(n / 2..3 * n / 2, n / 2..3 * n / 2)], 2);
    }

    let mut registry = VariableRegistry::new();
    let rho = registry.register_cell_variable("rho::current", 0);
    let cp = registry.register_cell_variable("cp::current", 0);
    let t = registry.register_cell_variable("T::current", 0);
    let u = registry.register_face_variable("u::current");
    for index in [rho, cp, t].iter().copied() {
        hierarchy.allocate_data(&registry, index);
    }
    hierarchy.allocate_data(&registry, u);
    fill_initial_data(&mut hierarchy, rho, cp, t, u);

    let database = InputDatabase::from_pairs(vec![
        ("limiter type for T", opts.limiter.as_str()),
        ("limiter type for Cp", opts.limiter.as_str()),
        ("limiter type for rho", opts.limiter.as_str()),
        ("bdry extrapolation type", "CONSTANT"),
    ]);
    let bc = NeumannBc(0.0);
    let mut integrator = ConservativeMassTransportIntegrator::from_database("advect", &database)
        .unwrap_or_else(|e| panic!("bad configuration: {}", e));
    integrator.set_cell_centered_density_patch_data_index(rho);
    integrator.set_specific_heat_patch_data_indices(None, cp, None);
    integrator.set_temperature_patch_data_indices(None, t, None);
    integrator.set_fluid_velocity_patch_data_indices(None, u, None);
    integrator.set_cell_centered_density_boundary_conditions(&bc);
    integrator.set_cell_centered_specific_heat_boundary_conditions(&bc);
    integrator.set_cell_centered_temperature_boundary_conditions(&bc);
    integrator.initialize_time_integrator(&mut registry, &mut hierarchy);

    let mass_0 = hierarchy.integrate_cell_quantity(rho);
    info!("initial mass {:.12}", mass_0);

    let mut iteration = 0;
    let mut time = 0.0;

    while iteration < opts.num_steps {
        integrator.integrate(&mut hierarchy, opts.dt);

        let updated = integrator.updated_cell_centered_density_patch_data_index();
        for n in 0..hierarchy.num_levels() {
            for patch in hierarchy.level_mut(n).patches_mut() {
                let update = patch.cell_data(updated).clone();
                patch.cell_data_mut(rho).copy_interior_from(&update);
            }
        }

        iteration += 1;
        time += opts.dt;
        let mass = hierarchy.integrate_cell_quantity(rho);
        println!("[{}] t={:.4} mass drift {:+.3e}", iteration, time, mass - mass_0);
    }
    integrator.deallocate_time_integrator(&mut hierarchy);

    let mut density = Vec::new();
    for n in 0..hierarchy.num_levels() {
        for patch in hierarchy.level(n).patches() {
            density.push(patch.cell_data(rho).clone());
        }
    }
    let snapshot = Snapshot { iteration, time, density };

    let file = std::fs::File::create("density.cbor").unwrap();
    let mut buffer = std::io::BufWriter::new(file);
    ciborium::ser::into_writer(&snapshot, &mut buffer).unwrap();
    info!("wrote density.cbor");
}
