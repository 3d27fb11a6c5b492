//! Readers for the files produced by a harvest

use catalog_harvester::ProductRecord;
use std::path::Path;

/// Records stored in a JSON output file
pub fn read_json_records(path: &Path) -> Vec<ProductRecord> {
    let content = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()));
    serde_json::from_str(&content)
        .unwrap_or_else(|e| panic!("{} is not a JSON record array: {e}", path.display()))
}

/// Number of `<product>` elements in an XML output file
pub fn count_xml_products(path: &Path) -> usize {
    let content = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()));
    content.matches("<product>").count()
}

/// Sorted ids of the given records
pub fn sorted_ids(records: &[ProductRecord]) -> Vec<String> {
    let mut ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
    ids.sort();
    ids
}
