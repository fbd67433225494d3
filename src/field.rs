use serde::{Deserialize, Serialize};

use crate::index_space::{Axis, IndexSpace};




/**
 * A cell-centered scalar field over a rectangular patch interior, padded by
 * a ghost ring of configurable width. The backing array is a flat row-major
 * `Vec<f64>` covering the ghost box. Ghost values are undefined until a
 * ghost-fill schedule (or a test fixture) populates them; stencil kernels
 * are entitled to assume they are valid.
 */
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CellField {
    interior: IndexSpace,
    ghost: i64,
    data: Vec<f64>,
}




// ============================================================================
impl CellField {


    pub fn new(interior: IndexSpace, ghost: i64) -> Self {
        assert!(ghost >= 0, "ghost width must be non-negative");
        let data = vec![0.0; interior.extend_all(ghost).len()];
        Self { interior, ghost, data }
    }


    /**
     * Generate a field with values defined from a closure, evaluated over
     * the whole ghost box.
     */
    pub fn from_function<F>(interior: IndexSpace, ghost: i64, f: F) -> Self
    where
        F: Fn((i64, i64)) -> f64
    {
        let space = interior.extend_all(ghost);
        let data = space.iter().map(f).collect();
        Self { interior, ghost, data }
    }


    pub fn interior(&self) -> &IndexSpace {
        &self.interior
    }


    pub fn ghost_width(&self) -> i64 {
        self.ghost
    }


    /**
     * Return the ghost box: the index space of the backing array.
     */
    pub fn space(&self) -> IndexSpace {
        self.interior.extend_all(self.ghost)
    }


    /**
     * Sample the field at the given index, which may lie in the ghost ring.
     */
    pub fn at(&self, index: (i64, i64)) -> f64 {
        self.validate_index(index);
        self.data[self.space().row_major_offset(index)]
    }


    pub fn set(&mut self, index: (i64, i64), value: f64) {
        self.validate_index(index);
        let offset = self.space().row_major_offset(index);
        self.data[offset] = value;
    }


    pub fn fill(&mut self, value: f64) {
        for x in &mut self.data {
            *x = value;
        }
    }


    /**
     * Sample the value of the coarse cell underlying the given fine index,
     * where this field lives on the next coarser level (piecewise-constant
     * injection).
     */
    pub fn coarse_sample(&self, fine_index: (i64, i64), ratio: i64) -> f64 {
        self.at((fine_index.0.div_euclid(ratio), fine_index.1.div_euclid(ratio)))
    }


    /**
     * Extract a rectangular slab of this field's data. The region must lie
     * within the ghost box. The result carries no ghost ring of its own.
     */
    pub fn extract(&self, region: &IndexSpace) -> CellField {
        assert!(
            self.space().contains_space(region),
            "extraction region exceeds the ghost box");
        CellField::from_function(region.clone(), 0, |index| self.at(index))
    }


    /**
     * Copy another field's data into the overlapping part of this one.
     */
    pub fn paste(&mut self, slab: &CellField) {
        for index in self.space().intersect(&slab.space()).iter() {
            self.set(index, slab.at(index));
        }
    }


    /**
     * Overwrite this field's interior with another field's values at the
     * same indexes. The other field must cover this interior.
     */
    pub fn copy_interior_from(&mut self, other: &CellField) {
        for index in self.interior.clone().iter() {
            self.set(index, other.at(index));
        }
    }


    /**
     * Assign `ca * a + cb * b` over the interior. Ghost values are left
     * untouched; they are refilled by the next schedule execution.
     */
    pub fn assign_linear_interior(&mut self, ca: f64, a: &CellField, cb: f64, b: &CellField) {
        for index in self.interior.clone().iter() {
            self.set(index, ca * a.at(index) + cb * b.at(index));
        }
    }


    pub fn iter_interior(&self) -> impl Iterator<Item = ((i64, i64), f64)> + '_ {
        self.interior.iter().map(move |index| (index, self.at(index)))
    }


    fn validate_index(&self, index: (i64, i64)) {
        if !self.space().contains(index) {
            panic!("index ({} {}) outside the ghost box of patch ({}..{} {}..{}) with {} ghost cells",
                index.0,
                index.1,
                self.interior.range(Axis::I).start,
                self.interior.range(Axis::I).end,
                self.interior.range(Axis::J).start,
                self.interior.range(Axis::J).end,
                self.ghost);
        }
    }
}




/**
 * A face-normal-centered field: one array per axis, covering the faces of a
 * patch interior. Face `(i, j)` on axis `I` is the lower `I`-face of cell
 * `(i, j)`. Face fields are scratch-only (advection velocities and
 * half-time reconstructions) and carry no ghost ring.
 */
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FaceField {
    interior: IndexSpace,
    data_i: Vec<f64>,
    data_j: Vec<f64>,
}




// ============================================================================
impl FaceField {


    pub fn new(interior: IndexSpace) -> Self {
        let data_i = vec![0.0; interior.extend_upper(1, Axis::I).len()];
        let data_j = vec![0.0; interior.extend_upper(1, Axis::J).len()];
        Self { interior, data_i, data_j }
    }


    /**
     * Generate a face field from a closure of the axis and the face index.
     */
    pub fn from_function<F>(interior: IndexSpace, f: F) -> Self
    where
        F: Fn(Axis, (i64, i64)) -> f64
    {
        let mut field = Self::new(interior);
        for axis in Axis::all().iter().copied() {
            for index in field.face_space(axis).iter() {
                field.set(axis, index, f(axis, index));
            }
        }
        field
    }


    pub fn interior(&self) -> &IndexSpace {
        &self.interior
    }


    pub fn face_space(&self, axis: Axis) -> IndexSpace {
        self.interior.extend_upper(1, axis)
    }


    pub fn at(&self, axis: Axis, index: (i64, i64)) -> f64 {
        let offset = self.face_space(axis).row_major_offset(index);
        match axis {
            Axis::I => self.data_i[offset],
            Axis::J => self.data_j[offset],
        }
    }


    pub fn set(&mut self, axis: Axis, index: (i64, i64), value: f64) {
        let offset = self.face_space(axis).row_major_offset(index);
        match axis {
            Axis::I => self.data_i[offset] = value,
            Axis::J => self.data_j[offset] = value,
        }
    }


    pub fn fill(&mut self, value: f64) {
        for x in self.data_i.iter_mut().chain(self.data_j.iter_mut()) {
            *x = value;
        }
    }


    /**
     * Assign `ca * a + cb * b` face-by-face on both axes.
     */
    pub fn assign_linear(&mut self, ca: f64, a: &FaceField, cb: f64, b: &FaceField) {
        for (x, (u, v)) in self.data_i.iter_mut().zip(a.data_i.iter().zip(&b.data_i)) {
            *x = ca * u + cb * v;
        }
        for (x, (u, v)) in self.data_j.iter_mut().zip(a.data_j.iter().zip(&b.data_j)) {
            *x = ca * u + cb * v;
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use crate::index_space::{range2d, Axis};
    use super::{CellField, FaceField};

    #[test]
    fn cell_field_indexes_its_ghost_box() {
        let field = CellField::from_function(range2d(0..4, 0..4), 2, |(i, j)| (i + 10 * j) as f64);
        assert_eq!(field.at((0, 0)), 0.0);
        assert_eq!(field.at((-2, 3)), 28.0);
        assert_eq!(field.at((5, -1)), -5.0);
    }

    #[test]
    #[should_panic]
    fn cell_field_rejects_out_of_range_indexes() {
        let field = CellField::new(range2d(0..4, 0..4), 1);
        field.at((6, 0));
    }

    #[test]
    fn extract_and_paste_transfer_a_slab() {
        let source = CellField::from_function(range2d(4..8, 0..4), 0, |(i, j)| (i * j) as f64);
        let slab = source.extract(&range2d(4..6, 0..4));
        let mut target = CellField::new(range2d(0..4, 0..4), 2);
        target.paste(&slab);
        assert_eq!(target.at((4, 3)), 12.0);
        assert_eq!(target.at((5, 2)), 10.0);
        assert_eq!(target.at((3, 3)), 0.0);
    }

    #[test]
    fn coarse_sample_uses_the_underlying_coarse_cell() {
        let coarse = CellField::from_function(range2d(0..4, 0..4), 0, |(i, j)| (i + 10 * j) as f64);
        assert_eq!(coarse.coarse_sample((7, 0), 2), 3.0);
        assert_eq!(coarse.coarse_sample((6, 5), 2), 23.0);
    }

    #[test]
    fn face_field_has_one_extra_face_per_axis() {
        let field = FaceField::new(range2d(0..4, 0..2));
        assert_eq!(field.face_space(Axis::I).dim(), (5, 2));
        assert_eq!(field.face_space(Axis::J).dim(), (4, 3));
    }

    #[test]
    fn face_field_linear_combination() {
        let space = range2d(0..2, 0..2);
        let a = FaceField::from_function(space.clone(), |_, _| 2.0);
        let b = FaceField::from_function(space.clone(), |_, _| 4.0);
        let mut c = FaceField::new(space);
        c.assign_linear(1.5, &a, -0.5, &b);
        assert_eq!(c.at(Axis::I, (1, 0)), 1.0);
        assert_eq!(c.at(Axis::J, (0, 2)), 1.0);
    }
}
