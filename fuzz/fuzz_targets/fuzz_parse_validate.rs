#![no_main]

use libfuzzer_sys::fuzz_target;
use nfe_ingest::config::IngestConfig;
use nfe_ingest::core::allocate_discount;
use nfe_ingest::nfe;

fuzz_target!(|data: &[u8]| {
    // Errors are fine, panics are bugs.
    let Ok(tree) = nfe::parse_tree(data) else {
        return;
    };
    let config = IngestConfig::default();
    let report = nfe::validate_structure(&tree, &config);
    let mut doc = nfe::extract_document(&tree, "fuzz", &config).document;
    assert_eq!(report.info.line_count as usize, doc.lines.len());
    allocate_discount(&mut doc.lines, doc.declared_net_total);
});
