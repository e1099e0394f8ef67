use crate::storage::{ActualLrpRow, TaskRow};

/// Narrows actual-LRP queries; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActualLrpFilter {
    pub domain: Option<String>,
    pub cell_id: Option<String>,
    pub process_guid: Option<String>,
    pub index: Option<i32>,
}

impl ActualLrpFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn cell_id(mut self, cell_id: &str) -> Self {
        self.cell_id = Some(cell_id.to_string());
        self
    }

    pub fn process_guid(mut self, process_guid: &str) -> Self {
        self.process_guid = Some(process_guid.to_string());
        self
    }

    pub fn index(mut self, index: i32) -> Self {
        self.index = Some(index);
        self
    }

    pub(crate) fn matches(&self, row: &ActualLrpRow) -> bool {
        self.domain.as_ref().is_none_or(|d| *d == row.domain)
            && self.cell_id.as_ref().is_none_or(|c| *c == row.cell_id)
            && self
                .process_guid
                .as_ref()
                .is_none_or(|p| *p == row.process_guid)
            && self.index.is_none_or(|i| i == row.instance_index)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub domain: Option<String>,
    pub cell_id: Option<String>,
}

impl TaskFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn cell_id(mut self, cell_id: &str) -> Self {
        self.cell_id = Some(cell_id.to_string());
        self
    }

    pub(crate) fn matches(&self, row: &TaskRow) -> bool {
        self.domain.as_ref().is_none_or(|d| *d == row.domain)
            && self.cell_id.as_ref().is_none_or(|c| *c == row.cell_id)
    }
}
