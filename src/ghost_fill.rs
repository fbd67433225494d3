use log::debug;

use crate::bc::{ghost_from_robin, BcCoefStrategy, ExtrapolationType, Side};
use crate::exchange::{self, Exchange, Status};
use crate::field::CellField;
use crate::hierarchy::PatchHierarchy;
use crate::index_space::{Axis, IndexSpace};
use crate::registry::{Centering, PatchDataIndex, VariableRegistry};




/// One quantity to be ghost-filled: the destination variable (whose
/// interior is assumed valid when the schedule executes), the physical
/// boundary strategy queried per face, and the extrapolation rule for ghost
/// layers beyond the first. A missing strategy degrades to zero-gradient.
pub struct TransactionComponent<'a> {
    pub data_index: PatchDataIndex,
    pub extrapolation: ExtrapolationType,
    pub bc: Option<&'a dyn BcCoefStrategy>,
}




/// Precomputed exchange topology for one patch: where its valid data must
/// be sent, how many sibling slabs it waits for, and which of its ghost
/// indexes are filled from the next coarser level instead.
struct PatchRoute {
    outgoing: Vec<(IndexSpace, IndexSpace)>,
    expected: usize,
    coarse_fill: Vec<(i64, i64)>,
}




/// A cached ghost-fill schedule for one cell-centered variable. Routes are
/// derived from the hierarchy configuration once, at construction; the
/// schedule is keyed to the hierarchy generation and refuses to run against
/// a regridded hierarchy. Rebuilding after a regrid is the integrator's
/// responsibility.
pub struct GhostFillSchedule<'a> {
    component: TransactionComponent<'a>,
    ghost: i64,
    routes: Vec<Vec<PatchRoute>>,
    generation: u64,
}




// ============================================================================
impl<'a> GhostFillSchedule<'a> {


    pub fn new(
        hierarchy: &PatchHierarchy,
        registry: &VariableRegistry,
        component: TransactionComponent<'a>,
    ) -> Self {
        let spec = registry.spec(component.data_index);
        if spec.centering != Centering::Cell {
            panic!("ghost fill requires a cell-centered variable, got '{}'", spec.name);
        }
        let ghost = spec.ghost_width;
        assert!(ghost >= 1, "variable '{}' has no ghost ring to fill", spec.name);

        let mut routes = Vec::new();

        for n in 0..hierarchy.num_levels() {
            let level = hierarchy.level(n);
            let mut level_routes = Vec::new();

            for (p, patch) in level.patches().iter().enumerate() {
                let gbox = patch.interior().extend_all(ghost);
                let mut outgoing = Vec::new();
                let mut expected = 0;

                for (q, sibling) in level.patches().iter().enumerate() {
                    if p == q {
                        continue;
                    }
                    let send = patch.interior().intersect(&sibling.interior().extend_all(ghost));
                    if !send.is_empty() {
                        outgoing.push((sibling.interior().clone(), send));
                    }
                    if !sibling.interior().intersect(&gbox).is_empty() {
                        expected += 1;
                    }
                }

                let coarse_fill = if n > 0 {
                    gbox.iter()
                        .filter(|&index| {
                            !patch.interior().contains(index)
                                && level.domain().contains(index)
                                && level.patch_containing(index).is_none()
                        })
                        .collect()
                } else {
                    Vec::new()
                };

                level_routes.push(PatchRoute { outgoing, expected, coarse_fill });
            }
            routes.push(level_routes);
        }

        Self {
            component,
            ghost,
            routes,
            generation: hierarchy.generation(),
        }
    }


    pub fn ghost_width(&self) -> i64 {
        self.ghost
    }


    /// Execute the schedule: sibling slab exchange, coarse-fine injection,
    /// then physical boundary fills, level by level from coarse to fine.
    /// Patch interiors of the component's variable must be valid on entry.
    pub fn fill_data(&self, hierarchy: &mut PatchHierarchy, time: f64) {
        if self.generation != hierarchy.generation() {
            panic!("ghost-fill schedule is stale: the hierarchy was regridded after it was built");
        }
        let index = self.component.data_index;

        for n in 0..hierarchy.num_levels() {

            // Values injected from the coarser level are sampled up front,
            // while the level below is still borrowed immutably.
            let coarse_values: Vec<Vec<((i64, i64), f64)>> = if n == 0 {
                self.routes[n].iter().map(|_| Vec::new()).collect()
            } else {
                let (coarse, fine) = hierarchy.level_pair(n);
                let ratio = fine.ratio();
                self.routes[n]
                    .iter()
                    .map(|route| {
                        route
                            .coarse_fill
                            .iter()
                            .map(|&fi| {
                                let ci = (fi.0.div_euclid(ratio), fi.1.div_euclid(ratio));
                                let p = coarse
                                    .patch_containing(ci)
                                    .expect("no coarse patch under a fine ghost region");
                                (fi, coarse.patches()[p].cell_data(index).at(ci))
                            })
                            .collect()
                    })
                    .collect()
            };

            let level = hierarchy.level_mut(n);
            let spacing = level.spacing();
            let domain = level.domain().clone();
            let mut tasks = Vec::new();

            for (p, coarse) in level.patches_mut().iter_mut().zip(coarse_values) {
                let route = &self.routes[n][tasks.len()];
                tasks.push(PatchFill {
                    key: p.interior().clone(),
                    field: p.take_cell_data(index),
                    outgoing: route.outgoing.clone(),
                    expected: route.expected,
                    slabs: Vec::new(),
                    coarse,
                    bc: self.component.bc,
                    extrapolation: self.component.extrapolation,
                    spacing,
                    domain: domain.clone(),
                    time,
                });
            }
            debug!("filling {} ghost cells on level {} ({} patches)", self.ghost, n, tasks.len());

            let results = if rayon::current_num_threads() > 1 {
                exchange::execute_par(tasks)
            } else {
                exchange::execute(tasks)
            };

            for (key, field) in results {
                let p = level
                    .patch_with_interior(&key)
                    .expect("exchange returned a field for an unknown patch");
                level.patches_mut()[p].put_cell_data(index, field);
            }
        }
    }
}




/// The per-patch exchange task: owns the destination field, ships slabs of
/// its valid interior to neighbors, and once every sibling slab has arrived
/// applies them together with the coarse-level injections and the physical
/// boundary closure.
struct PatchFill<'a> {
    key: IndexSpace,
    field: CellField,
    outgoing: Vec<(IndexSpace, IndexSpace)>,
    expected: usize,
    slabs: Vec<CellField>,
    coarse: Vec<((i64, i64), f64)>,
    bc: Option<&'a dyn BcCoefStrategy>,
    extrapolation: ExtrapolationType,
    spacing: (f64, f64),
    domain: IndexSpace,
    time: f64,
}

impl<'a> Exchange for PatchFill<'a> {
    type Key = IndexSpace;
    type Message = CellField;
    type Value = (IndexSpace, CellField);

    fn key(&self) -> IndexSpace {
        self.key.clone()
    }

    fn ready(&self) -> Status {
        Status::eligible_if(self.expected == 0)
    }

    fn messages(&self) -> Vec<(IndexSpace, CellField)> {
        self.outgoing
            .iter()
            .map(|(dest, region)| (dest.clone(), self.field.extract(region)))
            .collect()
    }

    fn receive(&mut self, slab: CellField) -> Status {
        self.slabs.push(slab);
        Status::eligible_if(self.slabs.len() == self.expected)
    }

    fn value(mut self) -> (IndexSpace, CellField) {
        for slab in &self.slabs {
            self.field.paste(slab);
        }
        for &(index, value) in &self.coarse {
            self.field.set(index, value);
        }
        self.apply_physical(Axis::I);
        self.apply_physical(Axis::J);
        (self.key, self.field)
    }
}

impl<'a> PatchFill<'a> {

    /// Fill ghost layers lying outside the physical domain on both sides of
    /// the given axis. The I sweep runs over in-domain rows only; the J
    /// sweep then covers the full ghost-box width, so domain corners build
    /// on the columns the I sweep produced.
    fn apply_physical(&mut self, axis: Axis) {
        let gbox = self.field.space();
        let (dx, dy) = self.spacing;
        let dh = match axis {
            Axis::I => dx,
            Axis::J => dy,
        };

        for side in [Side::Lower, Side::Upper].iter().copied() {
            let (outside, edge, face) = match side {
                Side::Lower => (
                    self.domain.range(axis).start - gbox.range(axis).start,
                    self.domain.range(axis).start,
                    self.domain.range(axis).start as f64 * dh,
                ),
                Side::Upper => (
                    gbox.range(axis).end - self.domain.range(axis).end,
                    self.domain.range(axis).end - 1,
                    self.domain.range(axis).end as f64 * dh,
                ),
            };
            if outside <= 0 {
                continue;
            }

            let transverse = match axis {
                Axis::I => {
                    let t0 = gbox.range(Axis::J).start.max(self.domain.range(Axis::J).start);
                    let t1 = gbox.range(Axis::J).end.min(self.domain.range(Axis::J).end);
                    t0..t1
                }
                Axis::J => gbox.range(Axis::I).clone(),
            };

            for t in transverse {
                let (edge_index, position) = match axis {
                    Axis::I => ((edge, t), (face, (t as f64 + 0.5) * dy)),
                    Axis::J => ((t, edge), ((t as f64 + 0.5) * dx, face)),
                };
                let interior = self.field.at(edge_index);
                let first = match self.bc {
                    Some(bc) => {
                        let coefs = bc.coefficients(axis, side, position, self.time);
                        ghost_from_robin(coefs, interior, dh)
                    }
                    None => interior,
                };
                for layer in 1..=outside {
                    let offset = match side {
                        Side::Lower => -layer,
                        Side::Upper => layer,
                    };
                    let index = match axis {
                        Axis::I => (edge + offset, t),
                        Axis::J => (t, edge + offset),
                    };
                    let value = match self.extrapolation {
                        ExtrapolationType::Constant => first,
                        ExtrapolationType::Linear => interior + (first - interior) * layer as f64,
                    };
                    self.field.set(index, value);
                }
            }
        }
    }
}
