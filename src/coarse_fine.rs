use crate::hierarchy::PatchHierarchy;
use crate::index_space::Axis;
use crate::registry::PatchDataIndex;




/// Reconcile the density update at every coarse-fine interface so the
/// composite-grid integral of the density is conserved.
///
/// Each boundary face of a fine patch that overlies a coarse face (rather
/// than a fine sibling or the physical boundary) carries `ratio` fine mass
/// fluxes; the coarse cell on the other side of the interface was updated
/// with its own coarse flux. Replacing that coarse flux contribution with
/// the mean of the overlying fine fluxes makes the flux sum leaving the
/// fine region equal the flux entering from the coarse region, which is
/// exactly the telescoping property a conservative scheme needs across
/// level boundaries.
///
/// Runs after every stage's density update, scaled by that stage's
/// `a2 * dt`. Mutates only coarse cells immediately adjacent to a
/// coarse-fine boundary; interior cells and all fine cells are untouched.
pub fn enforce_conservation(
    hierarchy: &mut PatchHierarchy,
    flux_index: PatchDataIndex,
    density_index: PatchDataIndex,
    a2: f64,
    dt: f64,
) {
    for n in 1..hierarchy.num_levels() {
        let (coarse, fine) = hierarchy.level_pair_mut(n);
        let ratio = fine.ratio();
        let (dxc, dyc) = coarse.spacing();

        // Corrections are gathered before they are applied, since finding
        // the coarse flux borrows the coarse level immutably.
        let mut corrections: Vec<(usize, (i64, i64), f64)> = Vec::new();

        for patch in fine.patches() {
            let interior = patch.interior().clone();
            let flux = patch.face_data(flux_index);

            for axis in Axis::all().iter().copied() {
                let (t0, t1) = {
                    let transverse = match axis {
                        Axis::I => interior.range(Axis::J),
                        Axis::J => interior.range(Axis::I),
                    };
                    (transverse.start, transverse.end)
                };
                let normal = interior.range(axis).clone();
                let spacing = match axis {
                    Axis::I => dxc,
                    Axis::J => dyc,
                };

                // lower and upper boundary faces along this axis; `sign`
                // is +1 when the replaced coarse flux sits on the coarse
                // cell's upper face
                for &(face_n, probe_n, sign) in [
                    (normal.start, normal.start - 1, 1.0),
                    (normal.end, normal.end, -1.0),
                ].iter() {
                    if probe_n < fine.domain().range(axis).start
                        || probe_n >= fine.domain().range(axis).end
                    {
                        continue;
                    }

                    let mut t = t0;
                    while t < t1 {
                        let probe = index_on(axis, probe_n, t);
                        if fine.patch_containing(probe).is_some() {
                            t += ratio;
                            continue;
                        }

                        let mut sum = 0.0;
                        for k in 0..ratio {
                            sum += flux.at(axis, index_on(axis, face_n, t + k));
                        }
                        let fine_mean = sum / ratio as f64;

                        let face_c = face_n.div_euclid(ratio);
                        let tc = t.div_euclid(ratio);
                        let cell_c = if sign > 0.0 {
                            index_on(axis, face_c - 1, tc)
                        } else {
                            index_on(axis, face_c, tc)
                        };
                        let p = coarse
                            .patch_containing(cell_c)
                            .expect("no coarse cell adjacent to a coarse-fine interface");
                        let coarse_flux =
                            coarse.patches()[p].face_data(flux_index).at(axis, index_on(axis, face_c, tc));

                        let delta = sign * a2 * dt * (coarse_flux - fine_mean) / spacing;
                        corrections.push((p, cell_c, delta));
                        t += ratio;
                    }
                }
            }
        }

        for (p, cell, delta) in corrections {
            let field = coarse.patches_mut()[p].cell_data_mut(density_index);
            let value = field.at(cell) + delta;
            field.set(cell, value);
        }
    }
}


/// Compose a 2D index from a normal-axis component and a transverse one.
fn index_on(axis: Axis, normal: i64, transverse: i64) -> (i64, i64) {
    match axis {
        Axis::I => (normal, transverse),
        Axis::J => (transverse, normal),
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use crate::hierarchy::PatchHierarchy;
    use crate::index_space::{range2d, Axis};
    use crate::registry::VariableRegistry;
    use super::enforce_conservation;

    /// An 8x8 coarse grid split in two patches, with a single refined patch
    /// over the coarse region 2..6 x 2..6.
    fn setup() -> (PatchHierarchy, VariableRegistry) {
        let mut hierarchy = PatchHierarchy::new(
            range2d(0..8, 0..8),
            (1.0, 1.0),
            vec![range2d(0..4, 0..8), range2d(4..8, 0..8)],
        );
        hierarchy.add_finer_level(vec![range2d(4..12, 4..12)], 2);
        (hierarchy, VariableRegistry::new())
    }

    #[test]
    fn coarse_cells_adjacent_to_the_interface_absorb_the_flux_mismatch() {
        let (mut hierarchy, mut registry) = setup();
        let flux = registry.register_face_variable("mass flux");
        let rho = registry.register_cell_variable("density", 0);
        hierarchy.allocate_data(&registry, flux);
        hierarchy.allocate_data(&registry, rho);

        // coarse flux 1 on every I-face, zero on J-faces; fine fluxes 2
        for patch in hierarchy.level_mut(0).patches_mut() {
            let field = patch.face_data_mut(flux);
            let space = field.face_space(Axis::I);
            for face in space.iter() {
                field.set(Axis::I, face, 1.0);
            }
        }
        for patch in hierarchy.level_mut(1).patches_mut() {
            let field = patch.face_data_mut(flux);
            let space = field.face_space(Axis::I);
            for face in space.iter() {
                field.set(Axis::I, face, 2.0);
            }
        }

        enforce_conservation(&mut hierarchy, flux, rho, 1.0, 0.1);

        let level = hierarchy.level(0);
        // left of the fine region: coarse cell (1, 2); its upper I-face
        // flux 1 is replaced by the fine mean 2: delta = 0.1 * (1 - 2)
        let p = level.patch_containing((1, 2)).unwrap();
        let got = level.patches()[p].cell_data(rho).at((1, 2));
        assert!((got - (-0.1)).abs() < 1e-14);

        // right of the fine region: coarse cell (6, 3); its lower I-face
        // flux is replaced: delta = -0.1 * (1 - 2)
        let p = level.patch_containing((6, 3)).unwrap();
        let got = level.patches()[p].cell_data(rho).at((6, 3));
        assert!((got - 0.1).abs() < 1e-14);

        // away from the interface nothing moves
        let p = level.patch_containing((0, 0)).unwrap();
        assert_eq!(level.patches()[p].cell_data(rho).at((0, 0)), 0.0);

        // J-faces carried no flux mismatch, so cells above and below the
        // fine region are untouched
        let p = level.patch_containing((3, 1)).unwrap();
        assert_eq!(level.patches()[p].cell_data(rho).at((3, 1)), 0.0);
    }
}
