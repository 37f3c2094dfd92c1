//! Shared primitive types used across the pipeline.

/// Identifier of a fractioned-transaction cluster.
/// Issued strictly increasing for the lifetime of a store; 0 means "none yet".
pub type ClusterLabel = u64;

/// Opaque transaction identifier (primary key).
pub type TransactionId = String;

/// Identifier of one pipeline pass in the audit trail.
pub type RunId = String;
