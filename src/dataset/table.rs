//! Per-invocation dataset table.
//!
//! Index 0 is always the output, inputs follow in caller order. Interpreted
//! backends append an empty-name sentinel: lookups scan linearly and stop at
//! the first empty name, so an empty name anywhere else is rejected.

use super::{Dataset, ElementType};
use crate::config::types::{Result, UdfError};
use crate::observability::audit::events;
use std::collections::HashSet;

/// One row of the table, as exposed to a running UDF
#[derive(Debug, Clone)]
pub struct TableEntry {
    pub name: String,
    pub dims: Vec<u64>,
    pub dims_text: String,
    /// `None` only for the sentinel
    pub element_type: Option<ElementType>,
    pub cast: String,
    /// Grid memory. Inputs are read-only by contract.
    pub data: *mut u8,
}

impl TableEntry {
    fn from_dataset(dataset: &Dataset, data: *mut u8, cast: ElementType) -> Self {
        Self {
            name: dataset.name().to_string(),
            dims: dataset.shape().to_vec(),
            dims_text: dataset.dims_text(),
            element_type: Some(dataset.element_type()),
            cast: cast.cast_declaration().to_string(),
            data,
        }
    }

    fn sentinel() -> Self {
        Self {
            name: String::new(),
            dims: Vec::new(),
            dims_text: String::new(),
            element_type: None,
            cast: String::new(),
            data: std::ptr::null_mut(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.name.is_empty()
    }

    pub fn type_name(&self) -> &str {
        self.element_type.map(ElementType::name).unwrap_or("")
    }
}

#[derive(Debug, Clone)]
pub struct DatasetTable {
    entries: Vec<TableEntry>,
}

impl DatasetTable {
    /// Build the table for one invocation.
    ///
    /// `output_data` is where the UDF writes the output grid: the caller's
    /// buffer for in-process runs, a shared mapping for isolated ones.
    /// `cast_type` overrides the cast declaration of the output entry.
    pub fn build(
        output: &Dataset,
        output_data: *mut u8,
        inputs: &[Dataset],
        cast_type: Option<ElementType>,
    ) -> Result<Self> {
        let mut entries = Vec::with_capacity(inputs.len() + 2);
        entries.push(TableEntry::from_dataset(
            output,
            output_data,
            cast_type.unwrap_or(output.element_type()),
        ));
        for input in inputs {
            entries.push(TableEntry::from_dataset(
                input,
                input.as_ptr() as *mut u8,
                input.element_type(),
            ));
        }

        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.name.is_empty() {
                return Err(UdfError::Dataset(
                    "dataset names must not be empty".to_string(),
                ));
            }
            if !seen.insert(entry.name.as_str()) {
                log::warn!(
                    "Dataset {} appears more than once; lookups resolve to the first entry",
                    entry.name
                );
            }
        }

        Ok(Self { entries })
    }

    /// Append the end-of-list sentinel
    pub fn with_sentinel(mut self) -> Self {
        if !self.entries.last().is_some_and(TableEntry::is_sentinel) {
            self.entries.push(TableEntry::sentinel());
        }
        self
    }

    /// Entries including the sentinel, if any
    pub fn entries(&self) -> &[TableEntry] {
        &self.entries
    }

    /// Entries visible to the UDF (everything before the sentinel)
    pub fn datasets(&self) -> impl Iterator<Item = &TableEntry> {
        self.entries.iter().take_while(|e| !e.is_sentinel())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn output(&self) -> &TableEntry {
        &self.entries[0]
    }

    pub fn get(&self, index: usize) -> Option<&TableEntry> {
        self.entries.get(index).filter(|e| !e.is_sentinel())
    }

    /// Index of the first entry named `name`. A miss is logged and audited;
    /// callers must check before dereferencing anything.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        let found = self
            .entries
            .iter()
            .take_while(|e| !e.is_sentinel())
            .position(|e| e.name == name);
        if found.is_none() {
            log::error!("Dataset {} not found", name);
            events::lookup_miss(name);
        }
        found
    }

    pub fn lookup(&self, name: &str) -> Option<&TableEntry> {
        self.index_of(name).map(|i| &self.entries[i])
    }

    pub fn data_ptr(&self, name: &str) -> Option<*mut u8> {
        self.lookup(name).map(|e| e.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> Vec<Dataset> {
        vec![
            Dataset::from_values("A", vec![2, 2], &[1i32, 2, 3, 4]).unwrap(),
            Dataset::from_values("B", vec![4], &[1.5f32, 2.5, 3.5, 4.5]).unwrap(),
        ]
    }

    #[test]
    fn output_is_first_inputs_follow() {
        let mut output = Dataset::new("C", ElementType::Int32, vec![2, 2]).unwrap();
        let ptr = output.as_mut_ptr();
        let inputs = inputs();
        let table = DatasetTable::build(&output, ptr, &inputs, None).unwrap();

        let names: Vec<&str> = table.datasets().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["C", "A", "B"]);
        assert_eq!(table.output().data, ptr);
        assert_eq!(table.index_of("B"), Some(2));
        assert_eq!(table.lookup("B").unwrap().type_name(), "float");
        assert_eq!(table.lookup("A").unwrap().dims_text, "2x2");
    }

    #[test]
    fn sentinel_terminates_lookup() {
        let mut output = Dataset::new("C", ElementType::Int32, vec![1]).unwrap();
        let ptr = output.as_mut_ptr();
        let table = DatasetTable::build(&output, ptr, &inputs(), None)
            .unwrap()
            .with_sentinel()
            .with_sentinel();

        assert_eq!(table.len(), 4);
        assert!(table.entries()[3].is_sentinel());
        assert_eq!(table.index_of(""), None);
        assert_eq!(table.index_of("missing"), None);
        assert!(table.get(3).is_none());
    }

    #[test]
    fn empty_names_are_rejected() {
        let mut output = Dataset::new("C", ElementType::Int8, vec![1]).unwrap();
        let ptr = output.as_mut_ptr();
        let bad = vec![Dataset::new("", ElementType::Int8, vec![1]).unwrap()];
        assert!(DatasetTable::build(&output, ptr, &bad, None).is_err());
    }

    #[test]
    fn duplicate_names_resolve_to_first_entry() {
        let mut output = Dataset::new("A", ElementType::Int32, vec![2, 2]).unwrap();
        let ptr = output.as_mut_ptr();
        let table = DatasetTable::build(&output, ptr, &inputs(), None).unwrap();
        assert_eq!(table.index_of("A"), Some(0));
    }

    #[test]
    fn cast_override_applies_to_output_only() {
        let mut output = Dataset::new("C", ElementType::Int32, vec![2]).unwrap();
        let ptr = output.as_mut_ptr();
        let table =
            DatasetTable::build(&output, ptr, &inputs(), Some(ElementType::Uint32)).unwrap();
        assert_eq!(table.output().cast, "uint32_t*");
        assert_eq!(table.output().type_name(), "int32");
        assert_eq!(table.lookup("A").unwrap().cast, "int32_t*");
    }
}
