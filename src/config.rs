use std::collections::HashMap;

use serde::{Deserialize, Serialize};




/// A flat string key-value store standing in for the external input
/// database the solver framework hands to each integrator. Only the keys an
/// integrator recognizes are read; everything else is ignored.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InputDatabase {
    entries: HashMap<String, String>,
}




// ============================================================================
impl InputDatabase {


    pub fn new() -> Self {
        Self::default()
    }


    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let entries = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self { entries }
    }


    pub fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }


    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|v| v.as_str())
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::InputDatabase;

    #[test]
    fn lookup_returns_what_was_stored() {
        let db = InputDatabase::from_pairs(vec![
            ("limiter type for T", "CUI"),
            ("bdry extrapolation type", "LINEAR"),
        ]);
        assert_eq!(db.get("limiter type for T"), Some("CUI"));
        assert_eq!(db.get("limiter type for Cp"), None);
    }
}
