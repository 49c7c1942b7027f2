//! Hash vectors exported as JSON for comparison across implementations.

use objnet_testkit::vectors::{all_vectors, VectorReport};

#[test]
fn vectors_pass_and_export() {
    let reports: Vec<VectorReport> = all_vectors().iter().map(|v| v.report()).collect();
    for report in &reports {
        assert!(report.passed, "vector '{}' failed", report.name);
    }

    let json = serde_json::to_string_pretty(&reports).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.as_array().map(Vec::len), Some(reports.len()));

    // Equal vectors export equal hashes.
    for entry in parsed.as_array().into_iter().flatten() {
        if entry["expectation"] == "equal" {
            assert_eq!(entry["left_hash"], entry["right_hash"]);
        } else {
            assert_ne!(entry["left_hash"], entry["right_hash"]);
        }
    }
}
