//! Promotion requests: the ledger and the emitters that open change
//! proposals for them.

mod emitter;
mod ledger;
mod outbox;

pub use emitter::{proposal_key, InMemoryRequestEmitter, OpenProposal, RequestEmitter};
pub use ledger::RequestLedger;
pub use outbox::{OutboxRequestEmitter, ProposalDocument};
