//! Test assertions for digest records and the request ledger.

use crate::core::{DigestRecord, Environment, RequestStatus, Source};
use crate::requests::RequestLedger;

/// Asserts that `record` holds `digest` with the given provenance and revision.
pub fn assert_recorded(record: Option<&DigestRecord>, digest: &str, source: Source, revision: u64) {
    let Some(record) = record else {
        panic!("Expected a record holding {digest}, found none");
    };
    assert_eq!(
        record.digest.as_str(),
        digest,
        "Expected {} to hold {digest}, found {}",
        record.environment,
        record.digest
    );
    assert_eq!(
        record.source, source,
        "Expected {} source {source}, found {}",
        record.environment, record.source
    );
    assert_eq!(
        record.revision, revision,
        "Expected {} revision {revision}, found {}",
        record.environment, record.revision
    );
}

/// Asserts that no target has more than one pending request.
pub fn assert_at_most_one_pending(ledger: &RequestLedger) {
    let pending = ledger.pending();
    for env in Environment::ALL {
        let count = pending.iter().filter(|r| r.to == env).count();
        assert!(count <= 1, "Expected at most one pending request into {env}, found {count}");
    }
}

/// Asserts that the pending request into `to` carries `digest`.
pub fn assert_pending(ledger: &RequestLedger, to: Environment, digest: &str) {
    let pending = ledger.pending_for(to);
    assert_eq!(
        pending.as_ref().map(|r| r.digest.as_str()),
        Some(digest),
        "Expected pending request into {to} for {digest}, found {:?}",
        pending.as_ref().map(|r| (r.digest.as_str(), r.status))
    );
}

/// Asserts how many requests into `to` are in `status`.
pub fn assert_request_count(ledger: &RequestLedger, to: Environment, status: RequestStatus, expected: usize) {
    let count = ledger.history(to).iter().filter(|r| r.status == status).count();
    assert_eq!(
        count, expected,
        "Expected {expected} {status} requests into {to}, found {count}"
    );
}
