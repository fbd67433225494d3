use serde::{Deserialize, Serialize};




/// Opaque handle identifying a registered patch data variable. The
/// underlying storage lives in the patch hierarchy and may be reallocated
/// between integrator calls; holders of an index must always go back
/// through a patch to reach the data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatchDataIndex(usize);

impl PatchDataIndex {
    pub(crate) fn ordinal(self) -> usize {
        self.0
    }
}




/// Mesh centering of a registered variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Centering {
    Cell,
    Face,
}




/// Descriptor for a registered variable: its name, centering, and the ghost
/// ring width its stencil consumers require. Face variables never carry
/// ghosts.
#[derive(Clone, Debug)]
pub struct VariableSpec {
    pub name: String,
    pub centering: Centering,
    pub ghost_width: i64,
}




/// Registry of named, typed patch data variables. Registration hands out
/// the opaque indexes used everywhere else; the registry itself never
/// allocates field storage. Registering a name twice with an identical spec
/// returns the existing index, so integrator re-initialization is cheap;
/// re-registering with a different spec is a configuration error.
pub struct VariableRegistry {
    specs: Vec<VariableSpec>,
}




// ============================================================================
impl VariableRegistry {


    pub fn new() -> Self {
        Self { specs: Vec::new() }
    }


    pub fn register_cell_variable(&mut self, name: &str, ghost_width: i64) -> PatchDataIndex {
        self.register(VariableSpec {
            name: name.to_string(),
            centering: Centering::Cell,
            ghost_width,
        })
    }


    pub fn register_face_variable(&mut self, name: &str) -> PatchDataIndex {
        self.register(VariableSpec {
            name: name.to_string(),
            centering: Centering::Face,
            ghost_width: 0,
        })
    }


    fn register(&mut self, spec: VariableSpec) -> PatchDataIndex {
        if let Some(n) = self.specs.iter().position(|s| s.name == spec.name) {
            let existing = &self.specs[n];
            if existing.centering != spec.centering || existing.ghost_width != spec.ghost_width {
                panic!(
                    "variable '{}' is already registered with a different centering or ghost width",
                    spec.name);
            }
            return PatchDataIndex(n);
        }
        self.specs.push(spec);
        PatchDataIndex(self.specs.len() - 1)
    }


    pub fn spec(&self, index: PatchDataIndex) -> &VariableSpec {
        &self.specs[index.0]
    }


    pub fn len(&self) -> usize {
        self.specs.len()
    }


    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl Default for VariableRegistry {
    fn default() -> Self {
        Self::new()
    }
}
