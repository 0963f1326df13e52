//! Runs the backend-agnostic conformance suite against `MemoryStore`.

use helpdesk_storage::conformance::run_conformance_suite;
use helpdesk_storage::MemoryStore;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_store_conformance() {
    let report = run_conformance_suite(|| async { MemoryStore::new() }).await;
    assert!(report.total > 30, "suite unexpectedly small: {report}");
    assert_eq!(report.failed, 0, "{report}");
}
