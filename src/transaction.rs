// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::history::{DiffSummary, EditInverse};
use crate::Error;

/// Groups edits into a single revision boundary.
///
/// Transactions nest by a depth counter; only the outermost commit seals
/// the pending inverse log into a revision. Edits outside any explicit
/// transaction get an implicit depth-1 wrapper per operation.
#[derive(Debug, Default)]
pub(crate) struct TransactionController {
    depth: u32,
    name: Option<String>,
    pending: Vec<EditInverse>,
    summary: DiffSummary,
}

/// Everything the outermost commit hands to the revision graph.
pub(crate) type SealedTransaction = (Option<String>, Vec<EditInverse>, DiffSummary);

impl TransactionController {
    pub fn in_progress(&self) -> bool {
        self.depth > 0
    }

    pub fn begin(&mut self, name: Option<&str>) {
        self.depth += 1;

        if self.depth == 1 {
            self.name = name.map(Into::into);
            self.pending.clear();
            self.summary = DiffSummary::default();
        }
    }

    /// Appends one edit's inverse to the pending log.
    pub fn push(&mut self, inverse: EditInverse, bytes_added: u64, bytes_removed: u64) {
        debug_assert!(self.in_progress(), "edit outside transaction scope");

        self.pending.push(inverse);
        self.summary.edits += 1;
        self.summary.bytes_added += bytes_added;
        self.summary.bytes_removed += bytes_removed;
    }

    /// Decrements depth; at depth 0 the sealed transaction is returned for
    /// recording.
    pub fn commit(&mut self) -> crate::Result<Option<SealedTransaction>> {
        if self.depth == 0 {
            return Err(Error::NoActiveTransaction);
        }

        self.depth -= 1;

        if self.depth > 0 {
            return Ok(None);
        }

        let name = self.name.take();
        let pending = std::mem::take(&mut self.pending);
        let summary = std::mem::take(&mut self.summary);

        Ok(Some((name, pending, summary)))
    }

    /// Aborts at any depth. The returned log must be replayed in reverse
    /// by the caller; depth returns to 0.
    pub fn take_rollback(&mut self) -> crate::Result<Vec<EditInverse>> {
        if self.depth == 0 {
            return Err(Error::NoActiveTransaction);
        }

        self.depth = 0;
        self.name = None;
        self.summary = DiffSummary::default();

        Ok(std::mem::take(&mut self.pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_outermost_commit_seals() {
        let mut txn = TransactionController::default();

        txn.begin(Some("outer"));
        txn.begin(None);

        txn.push(EditInverse::Insert { at: 0, len: 3 }, 3, 0);

        assert!(txn.commit().unwrap().is_none());

        let (name, pending, summary) = txn.commit().unwrap().unwrap();
        assert_eq!(Some("outer".into()), name);
        assert_eq!(1, pending.len());
        assert_eq!(3, summary.bytes_added);
        assert_eq!(1, summary.edits);

        assert!(!txn.in_progress());
    }

    #[test]
    fn commit_without_start_fails() {
        let mut txn = TransactionController::default();
        assert!(matches!(txn.commit(), Err(Error::NoActiveTransaction)));
        assert!(matches!(
            txn.take_rollback(),
            Err(Error::NoActiveTransaction)
        ));
    }

    #[test]
    fn rollback_resets_depth() {
        let mut txn = TransactionController::default();

        txn.begin(None);
        txn.begin(None);
        txn.push(EditInverse::Insert { at: 0, len: 1 }, 1, 0);

        let pending = txn.take_rollback().unwrap();
        assert_eq!(1, pending.len());
        assert!(!txn.in_progress());
    }
}
