use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellPresence {
    pub cell_id: String,
    pub rep_address: String,
    #[serde(default)]
    pub zone: String,
}

impl CellPresence {
    pub fn new(cell_id: &str, rep_address: &str, zone: &str) -> Self {
        Self {
            cell_id: cell_id.to_string(),
            rep_address: rep_address.to_string(),
            zone: zone.to_string(),
        }
    }
}

/// Registered cells at the moment a sweep starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellSet {
    cells: BTreeMap<String, CellPresence>,
}

impl CellSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, presence: CellPresence) {
        self.cells.insert(presence.cell_id.clone(), presence);
    }

    pub fn has_cell_id(&self, cell_id: &str) -> bool {
        self.cells.contains_key(cell_id)
    }

    pub fn cell_ids(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl FromIterator<CellPresence> for CellSet {
    fn from_iter<I: IntoIterator<Item = CellPresence>>(iter: I) -> Self {
        let mut set = CellSet::new();
        for presence in iter {
            set.add(presence);
        }
        set
    }
}
