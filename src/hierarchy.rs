use log::info;

use crate::field::{CellField, FaceField};
use crate::index_space::IndexSpace;
use crate::registry::{Centering, PatchDataIndex, VariableRegistry, VariableSpec};




/// Storage behind one patch data index on one patch.
#[derive(Clone, Debug)]
pub enum PatchData {
    Cell(CellField),
    Face(FaceField),
}




/// A single rectangular block of the computational grid at one refinement
/// level, holding the storage for every variable currently allocated on it.
/// Data access panics on centering mismatches and unallocated indexes;
/// those are programming errors, not runtime conditions.
pub struct Patch {
    interior: IndexSpace,
    data: Vec<Option<PatchData>>,
}




// ============================================================================
impl Patch {


    pub fn new(interior: IndexSpace) -> Self {
        Self { interior, data: Vec::new() }
    }


    pub fn interior(&self) -> &IndexSpace {
        &self.interior
    }


    pub fn allocate(&mut self, index: PatchDataIndex, spec: &VariableSpec) {
        let n = index.ordinal();
        if self.data.len() <= n {
            self.data.resize_with(n + 1, || None);
        }
        if self.data[n].is_some() {
            return;
        }
        self.data[n] = Some(match spec.centering {
            Centering::Cell => PatchData::Cell(CellField::new(self.interior.clone(), spec.ghost_width)),
            Centering::Face => PatchData::Face(FaceField::new(self.interior.clone())),
        });
    }


    /// Release the storage behind an index. A no-op when the index was
    /// never allocated on this patch.
    pub fn deallocate(&mut self, index: PatchDataIndex) {
        if let Some(slot) = self.data.get_mut(index.ordinal()) {
            *slot = None;
        }
    }


    pub fn is_allocated(&self, index: PatchDataIndex) -> bool {
        matches!(self.data.get(index.ordinal()), Some(Some(_)))
    }


    pub fn cell_data(&self, index: PatchDataIndex) -> &CellField {
        match self.slot(index) {
            PatchData::Cell(field) => field,
            PatchData::Face(_) => panic!("patch data {} is not cell-centered", index.ordinal()),
        }
    }


    pub fn cell_data_mut(&mut self, index: PatchDataIndex) -> &mut CellField {
        match self.slot_mut(index) {
            PatchData::Cell(field) => field,
            PatchData::Face(_) => panic!("patch data {} is not cell-centered", index.ordinal()),
        }
    }


    pub fn face_data(&self, index: PatchDataIndex) -> &FaceField {
        match self.slot(index) {
            PatchData::Face(field) => field,
            PatchData::Cell(_) => panic!("patch data {} is not face-centered", index.ordinal()),
        }
    }


    pub fn face_data_mut(&mut self, index: PatchDataIndex) -> &mut FaceField {
        match self.slot_mut(index) {
            PatchData::Face(field) => field,
            PatchData::Cell(_) => panic!("patch data {} is not face-centered", index.ordinal()),
        }
    }


    /// Move a cell field out of the patch, leaving the slot unallocated.
    /// Used by exchange tasks, which need to own their payload; the caller
    /// is responsible for putting the field back.
    pub fn take_cell_data(&mut self, index: PatchDataIndex) -> CellField {
        let n = index.ordinal();
        match self.data.get_mut(n).and_then(|slot| slot.take()) {
            Some(PatchData::Cell(field)) => field,
            Some(PatchData::Face(_)) => panic!("patch data {} is not cell-centered", n),
            None => panic!("patch data {} is not allocated on this patch", n),
        }
    }


    pub fn put_cell_data(&mut self, index: PatchDataIndex, field: CellField) {
        let n = index.ordinal();
        if self.data.len() <= n {
            self.data.resize_with(n + 1, || None);
        }
        self.data[n] = Some(PatchData::Cell(field));
    }


    /// Move a face field out of the patch, leaving the slot unallocated.
    pub fn take_face_data(&mut self, index: PatchDataIndex) -> FaceField {
        let n = index.ordinal();
        match self.data.get_mut(n).and_then(|slot| slot.take()) {
            Some(PatchData::Face(field)) => field,
            Some(PatchData::Cell(_)) => panic!("patch data {} is not face-centered", n),
            None => panic!("patch data {} is not allocated on this patch", n),
        }
    }


    pub fn put_face_data(&mut self, index: PatchDataIndex, field: FaceField) {
        let n = index.ordinal();
        if self.data.len() <= n {
            self.data.resize_with(n + 1, || None);
        }
        self.data[n] = Some(PatchData::Face(field));
    }


    fn slot(&self, index: PatchDataIndex) -> &PatchData {
        self.data
            .get(index.ordinal())
            .and_then(|slot| slot.as_ref())
            .unwrap_or_else(|| panic!("patch data {} is not allocated on this patch", index.ordinal()))
    }


    fn slot_mut(&mut self, index: PatchDataIndex) -> &mut PatchData {
        let n = index.ordinal();
        self.data
            .get_mut(n)
            .and_then(|slot| slot.as_mut())
            .unwrap_or_else(|| panic!("patch data {} is not allocated on this patch", n))
    }
}




/// One refinement level: a set of disjoint patches, the level's mesh
/// spacing, its refinement ratio to the next coarser level (1 on the
/// coarsest), and the physical domain box expressed in this level's index
/// space.
pub struct PatchLevel {
    ratio: i64,
    spacing: (f64, f64),
    domain: IndexSpace,
    patches: Vec<Patch>,
}




// ============================================================================
impl PatchLevel {


    pub fn ratio(&self) -> i64 {
        self.ratio
    }


    pub fn spacing(&self) -> (f64, f64) {
        self.spacing
    }


    pub fn domain(&self) -> &IndexSpace {
        &self.domain
    }


    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }


    pub fn patches_mut(&mut self) -> &mut Vec<Patch> {
        &mut self.patches
    }


    /// Return the ordinal of the patch whose interior contains the given
    /// index, if one exists. A linear scan is fine at the patch counts a
    /// single process owns.
    pub fn patch_containing(&self, index: (i64, i64)) -> Option<usize> {
        self.patches.iter().position(|p| p.interior.contains(index))
    }


    /// Return the ordinal of the patch with the given interior box.
    pub fn patch_with_interior(&self, interior: &IndexSpace) -> Option<usize> {
        self.patches.iter().position(|p| &p.interior == interior)
    }
}




/// A hierarchy of nested refinement levels. The hierarchy owns all patch
/// data storage; integrators reference it per call and key their cached
/// schedules to the generation counter, which is bumped by every regrid.
pub struct PatchHierarchy {
    levels: Vec<PatchLevel>,
    generation: u64,
}




// ============================================================================
impl PatchHierarchy {


    /// Build a hierarchy from its coarsest level. The level-zero boxes must
    /// tile the domain exactly: ghost exchange relies on every in-domain
    /// ghost index being covered by a sibling patch.
    pub fn new(domain: IndexSpace, spacing: (f64, f64), boxes: Vec<IndexSpace>) -> Self {
        assert_disjoint(&boxes);
        let covered: usize = boxes.iter().map(|b| b.len()).sum();
        for b in &boxes {
            assert!(domain.contains_space(b), "patch box extends outside the domain");
        }
        assert!(
            covered == domain.len(),
            "level 0 patch boxes must tile the domain");

        let patches = boxes.into_iter().map(Patch::new).collect();
        let level = PatchLevel { ratio: 1, spacing, domain, patches };
        Self { levels: vec![level], generation: 0 }
    }


    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }


    pub fn level(&self, n: usize) -> &PatchLevel {
        &self.levels[n]
    }


    pub fn level_mut(&mut self, n: usize) -> &mut PatchLevel {
        &mut self.levels[n]
    }


    /// Borrow a level together with its next coarser level.
    pub fn level_pair(&self, n: usize) -> (&PatchLevel, &PatchLevel) {
        assert!(n >= 1, "level 0 has no coarser level");
        (&self.levels[n - 1], &self.levels[n])
    }


    /// Borrow a level immutably together with its next coarser level
    /// mutably, for transfer operators that write coarse data from fine.
    pub fn level_pair_mut(&mut self, n: usize) -> (&mut PatchLevel, &PatchLevel) {
        assert!(n >= 1, "level 0 has no coarser level");
        let (coarse, fine) = self.levels.split_at_mut(n);
        (coarse.last_mut().unwrap(), &fine[0])
    }


    pub fn generation(&self) -> u64 {
        self.generation
    }


    /// Append a finer level. Boxes are in the fine index space and must be
    /// aligned to the refinement ratio, properly nested in the level below,
    /// and pairwise disjoint. Bumps the generation: any schedule built
    /// against the previous configuration becomes unusable.
    pub fn add_finer_level(&mut self, boxes: Vec<IndexSpace>, ratio: i64) {
        assert!(ratio >= 2, "refinement ratio must be at least 2");
        assert_disjoint(&boxes);

        let coarsest = self.levels.last().unwrap();
        let domain = coarsest.domain.refine(ratio);
        let spacing = (coarsest.spacing.0 / ratio as f64, coarsest.spacing.1 / ratio as f64);

        for b in &boxes {
            let (i0, j0) = b.start();
            let (i1, j1) = b.end();
            assert!(
                [i0, j0, i1, j1].iter().all(|x| x.rem_euclid(ratio) == 0),
                "fine patch boxes must be aligned to the refinement ratio");
            assert!(domain.contains_space(b), "patch box extends outside the domain");
            for index in b.coarsen(ratio).iter() {
                assert!(
                    coarsest.patch_containing(index).is_some(),
                    "fine patch box is not nested in the coarser level");
            }
        }

        info!("adding level {} with {} patches", self.levels.len(), boxes.len());
        let patches = boxes.into_iter().map(Patch::new).collect();
        self.levels.push(PatchLevel { ratio, spacing, domain, patches });
        self.generation += 1;
    }


    /// Drop the finest level. Data living only there is lost; callers
    /// average down first when they mean to keep it.
    pub fn remove_finest_level(&mut self) {
        assert!(self.levels.len() > 1, "cannot remove the coarsest level");
        info!("removing level {}", self.levels.len() - 1);
        self.levels.pop();
        self.generation += 1;
    }


    /// Allocate storage for a registered variable on every patch.
    pub fn allocate_data(&mut self, registry: &VariableRegistry, index: PatchDataIndex) {
        let spec = registry.spec(index).clone();
        for level in &mut self.levels {
            for patch in &mut level.patches {
                patch.allocate(index, &spec);
            }
        }
    }


    /// Release storage for a registered variable on every patch.
    pub fn deallocate_data(&mut self, index: PatchDataIndex) {
        for level in &mut self.levels {
            for patch in &mut level.patches {
                patch.deallocate(index);
            }
        }
    }


    /// Populate a cell variable's interior on the given level by
    /// piecewise-constant injection from the level below. Used after a
    /// regrid introduces a level with no data of its own.
    pub fn fill_level_from_coarser(&mut self, n: usize, index: PatchDataIndex) {
        assert!(n >= 1, "level 0 has no coarser level");
        let (coarse, fine) = self.levels.split_at_mut(n);
        let coarse = coarse.last().unwrap();
        let fine = &mut fine[0];
        let ratio = fine.ratio;

        for patch in &mut fine.patches {
            let interior = patch.interior.clone();
            let field = patch.cell_data_mut(index);
            for fi in interior.iter() {
                let ci = (fi.0.div_euclid(ratio), fi.1.div_euclid(ratio));
                let p = coarse
                    .patch_containing(ci)
                    .expect("fine patch is not nested in the coarser level");
                field.set(fi, coarse.patches[p].cell_data(index).at(ci));
            }
        }
    }


    /// Replace coarse cell values under every fine patch with the mean of
    /// the overlying fine cells, finest level first. Conserves the discrete
    /// integral of the variable.
    pub fn average_down(&mut self, index: PatchDataIndex) {
        for n in (1..self.levels.len()).rev() {
            let (coarse, fine) = self.levels.split_at_mut(n);
            let coarse = coarse.last_mut().unwrap();
            let fine = &fine[0];
            let ratio = fine.ratio;
            let weight = 1.0 / (ratio * ratio) as f64;

            for patch in &fine.patches {
                for ci in patch.interior.coarsen(ratio).iter() {
                    let mut sum = 0.0;
                    for di in 0..ratio {
                        for dj in 0..ratio {
                            sum += patch.cell_data(index).at((ci.0 * ratio + di, ci.1 * ratio + dj));
                        }
                    }
                    let p = coarse
                        .patch_containing(ci)
                        .expect("fine patch is not nested in the coarser level");
                    coarse.patches[p].cell_data_mut(index).set(ci, sum * weight);
                }
            }
        }
    }


    /// Integrate a cell variable over the composite grid: each cell counts
    /// with its own volume, and coarse cells covered by a finer level are
    /// excluded. This is the conservation diagnostic used by callers.
    pub fn integrate_cell_quantity(&self, index: PatchDataIndex) -> f64 {
        let mut total = 0.0;

        for (n, level) in self.levels.iter().enumerate() {
            let volume = level.spacing.0 * level.spacing.1;
            let covered: Vec<IndexSpace> = if n + 1 < self.levels.len() {
                let finer = &self.levels[n + 1];
                finer.patches.iter().map(|p| p.interior.coarsen(finer.ratio)).collect()
            } else {
                Vec::new()
            };

            for patch in &level.patches {
                for (ci, value) in patch.cell_data(index).iter_interior() {
                    if !covered.iter().any(|b| b.contains(ci)) {
                        total += value * volume;
                    }
                }
            }
        }
        total
    }
}


fn assert_disjoint(boxes: &[IndexSpace]) {
    for (n, a) in boxes.iter().enumerate() {
        for b in boxes.iter().skip(n + 1) {
            assert!(a.intersect(b).is_empty(), "patch boxes overlap");
        }
    }
}
