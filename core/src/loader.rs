//! Loader — label under the write lock, then append atomically.
//!
//! The commit is the only transactional boundary. The label counter is read
//! inside it, so two passes against one store can never issue the same
//! label. Aggregation runs after the commit as a separate step (see
//! `aggregate::refresh`): if it fails, these rows stay committed.

use crate::{
    error::EtlResult,
    labeler::{label_batch, LabeledBatch},
    model::Transaction,
    store::{EtlStore, LoadCounts},
    types::ClusterLabel,
};

#[derive(Debug, Clone)]
pub struct Committed {
    pub batch: LabeledBatch,
    pub counts: LoadCounts,
    /// Highest label on record when the batch was labeled.
    pub base_label: ClusterLabel,
}

impl Committed {
    pub fn clusters(&self) -> u64 {
        self.batch.cluster_count(self.base_label)
    }

    /// First label issued by this batch, None if no cluster was found.
    pub fn first_label(&self) -> Option<ClusterLabel> {
        (self.clusters() > 0).then_some(self.base_label + 1)
    }
}

pub fn commit(store: &mut EtlStore, rows: Vec<Transaction>) -> EtlResult<Committed> {
    let mut base = 0;
    let (batch, counts) = store.load_labeled(|last_label| {
        base = last_label;
        label_batch(rows, last_label)
    })?;
    log::info!(
        "committed {} transactions, {} fractioned rows (labels after {base})",
        counts.transactions,
        counts.fractioned
    );
    Ok(Committed {
        batch,
        counts,
        base_label: base,
    })
}
