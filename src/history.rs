// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::cursor::CursorId;
use crate::segment::Segment;
use crate::store::BlobId;
use crate::{Commit, Error};

/// Fork identifier, assigned monotonically per garland
pub type ForkId = u64;

/// Revision identifier within a fork; revision 0 is the fork's root state
pub type RevisionId = u64;

/// Forward description of what a revision changed
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Bytes inserted by the revision
    pub bytes_added: u64,

    /// Bytes removed by the revision
    pub bytes_removed: u64,

    /// Number of edit operations grouped into the revision
    pub edits: u32,
}

/// Metadata of one revision
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevisionInfo {
    /// Fork the revision lives on
    pub fork: ForkId,

    /// Revision id within the fork
    pub revision: RevisionId,

    /// Transaction name, if one was given
    pub name: Option<String>,

    /// Forward diff summary
    pub summary: DiffSummary,
}

/// Metadata of one fork
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ForkInfo {
    /// Fork id
    pub id: ForkId,

    /// Branch point on the parent fork; `None` for the origin fork
    pub parent: Option<(ForkId, RevisionId)>,

    /// Highest revision id on the fork
    pub head_revision: RevisionId,
}

/// One reversible operation of a revision payload.
///
/// Replaying an inverse against the live state yields its own inverse,
/// which replaces the stored payload; a revision therefore toggles between
/// holding its undo and its redo operations.
#[derive(Clone, Debug)]
pub(crate) enum EditInverse {
    /// Reverses an insertion by deleting the inserted range
    Insert {
        at: u64,
        len: u64,
    },

    /// Reverses a deletion by re-inserting the removed segments.
    ///
    /// `cursors` and `decorations` hold the pre-delete offsets of entries
    /// that the deletion clamped or removed; bare translation cannot
    /// recover them.
    Delete {
        at: u64,
        old: Vec<Segment>,
        cursors: Vec<(CursorId, u64)>,
        decorations: Vec<(String, u64)>,
    },

    /// Reverses an overwrite by deleting the new range and re-inserting
    /// the old segments
    Overwrite {
        at: u64,
        old: Vec<Segment>,
        new_len: u64,
        cursors: Vec<(CursorId, u64)>,
        decorations: Vec<(String, u64)>,
    },

    /// Restores a decoration to its prior address (`None`: absent)
    Decoration {
        key: String,
        prior: Option<u64>,
    },
}

#[derive(Debug)]
pub(crate) struct Revision {
    pub name: Option<String>,
    pub payload: Vec<EditInverse>,
    pub summary: DiffSummary,
}

#[derive(Debug)]
pub(crate) struct Fork {
    pub parent: Option<(ForkId, RevisionId)>,
    pub revisions: Vec<Revision>,
}

impl Fork {
    fn highest(&self) -> RevisionId {
        self.revisions.len() as RevisionId
    }
}

/// Replay schedule produced by a seek: revisions to revert, then revisions
/// to apply, in execution order.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct SeekPlan {
    pub revert: Vec<(ForkId, RevisionId)>,
    pub apply: Vec<(ForkId, RevisionId)>,
}

/// An append-only forest of revisions grouped into forks.
///
/// Fork 0 always exists and roots at the origin (revision 0 is the empty
/// pre-load state). Seeking moves HEAD without creating forks; committing
/// while HEAD is below the fork's highest revision branches automatically.
#[derive(Debug)]
pub(crate) struct RevisionGraph {
    forks: Vec<Fork>,
    head: Commit,
}

impl RevisionGraph {
    pub fn new() -> Self {
        Self {
            forks: vec![Fork {
                parent: None,
                revisions: Vec::new(),
            }],
            head: Commit::default(),
        }
    }

    pub fn head(&self) -> Commit {
        self.head
    }

    pub fn set_head(&mut self, head: Commit) {
        debug_assert!(self.contains(head));
        self.head = head;
    }

    fn contains(&self, at: Commit) -> bool {
        self.forks
            .get(at.fork as usize)
            .is_some_and(|fork| at.revision <= fork.highest())
    }

    fn fork(&self, id: ForkId) -> crate::Result<&Fork> {
        self.forks.get(id as usize).ok_or(Error::OutOfRange(id))
    }

    pub fn revision(&self, fork: ForkId, revision: RevisionId) -> crate::Result<&Revision> {
        self.fork(fork)?
            .revisions
            .get(revision.wrapping_sub(1) as usize)
            .ok_or(Error::OutOfRange(revision))
    }

    pub fn revision_mut(
        &mut self,
        fork: ForkId,
        revision: RevisionId,
    ) -> crate::Result<&mut Revision> {
        self.forks
            .get_mut(fork as usize)
            .ok_or(Error::OutOfRange(fork))?
            .revisions
            .get_mut(revision.wrapping_sub(1) as usize)
            .ok_or(Error::OutOfRange(revision))
    }

    /// Appends a committed revision, branching first if HEAD is not at the
    /// top of its fork. Returns the new HEAD.
    pub fn record(
        &mut self,
        name: Option<String>,
        payload: Vec<EditInverse>,
        summary: DiffSummary,
    ) -> Commit {
        #[allow(clippy::expect_used)]
        let current = self
            .forks
            .get(self.head.fork as usize)
            .expect("head fork exists");

        if self.head.revision < current.highest() {
            let id = self.forks.len() as ForkId;

            self.forks.push(Fork {
                parent: Some((self.head.fork, self.head.revision)),
                revisions: Vec::new(),
            });

            log::debug!(
                "history: diverging edit, fork {id} branched at ({}, {})",
                self.head.fork,
                self.head.revision,
            );

            self.head = Commit {
                fork: id,
                revision: 0,
            };
        }

        #[allow(clippy::expect_used)]
        let fork = self
            .forks
            .get_mut(self.head.fork as usize)
            .expect("head fork exists");

        fork.revisions.push(Revision {
            name,
            payload,
            summary,
        });

        self.head.revision += 1;
        self.head
    }

    /// Plans a seek to `target` within the current fork.
    pub fn plan_undo_seek(&self, target: RevisionId) -> crate::Result<SeekPlan> {
        let fork = self.fork(self.head.fork)?;

        if target > fork.highest() {
            return Err(Error::OutOfRange(target));
        }

        let mut plan = SeekPlan::default();

        if target < self.head.revision {
            plan.revert
                .extend((target + 1..=self.head.revision).rev().map(|r| (self.head.fork, r)));
        } else {
            plan.apply
                .extend((self.head.revision + 1..=target).map(|r| (self.head.fork, r)));
        }

        Ok(plan)
    }

    /// Plans a seek to the highest revision of `target`, routed through the
    /// common ancestor of the current and the target fork.
    pub fn plan_fork_seek(&self, target: ForkId) -> crate::Result<SeekPlan> {
        let target_head = Commit {
            fork: target,
            revision: self.fork(target)?.highest(),
        };

        let from = self.chain(self.head);
        let to = self.chain(target_head);

        // the first fork of `from` that also appears in `to` is the
        // common ancestor
        #[allow(clippy::expect_used)]
        let (lca_idx, (lca, from_rev)) = from
            .iter()
            .enumerate()
            .find(|(_, (fork, _))| to.iter().any(|(f, _)| f == fork))
            .map(|(idx, &entry)| (idx, entry))
            .expect("all forks share the origin");

        #[allow(clippy::expect_used)]
        let (to_idx, &(_, to_rev)) = to
            .iter()
            .enumerate()
            .find(|(_, (fork, _))| *fork == lca)
            .expect("common ancestor is on both chains");

        let mut plan = SeekPlan::default();

        // climb out of the current fork's branch line
        for &(fork, rev) in from.iter().take(lca_idx) {
            plan.revert.extend((1..=rev).rev().map(|r| (fork, r)));
        }

        // move within the common ancestor
        if from_rev > to_rev {
            plan.revert
                .extend((to_rev + 1..=from_rev).rev().map(|r| (lca, r)));
        } else {
            plan.apply.extend((from_rev + 1..=to_rev).map(|r| (lca, r)));
        }

        // descend into the target's branch line
        for &(fork, rev) in to.iter().take(to_idx).rev() {
            plan.apply.extend((1..=rev).map(|r| (fork, r)));
        }

        Ok(plan)
    }

    /// Branch line from `at` up to the origin: the node itself, then every
    /// ancestor fork with the revision at which the line left it.
    fn chain(&self, at: Commit) -> Vec<(ForkId, RevisionId)> {
        let mut out = vec![(at.fork, at.revision)];
        let mut fork = at.fork;

        while let Some(&Fork {
            parent: Some((parent, rev)),
            ..
        }) = self.forks.get(fork as usize)
        {
            out.push((parent, rev));
            fork = parent;
        }

        out
    }

    pub fn fork_info(&self, id: ForkId) -> crate::Result<ForkInfo> {
        let fork = self.fork(id)?;

        Ok(ForkInfo {
            id,
            parent: fork.parent,
            head_revision: fork.highest(),
        })
    }

    pub fn list_forks(&self) -> Vec<ForkInfo> {
        (0..self.forks.len() as ForkId)
            .map(|id| {
                #[allow(clippy::expect_used)]
                let info = self.fork_info(id).expect("fork id is valid");
                info
            })
            .collect()
    }

    pub fn revision_info(&self, fork: ForkId, revision: RevisionId) -> crate::Result<RevisionInfo> {
        let rev = self.revision(fork, revision)?;

        Ok(RevisionInfo {
            fork,
            revision,
            name: rev.name.clone(),
            summary: rev.summary,
        })
    }

    pub fn revision_range(
        &self,
        fork: ForkId,
        lo: RevisionId,
        hi: RevisionId,
    ) -> crate::Result<Vec<RevisionInfo>> {
        let highest = self.fork(fork)?.highest();

        if lo == 0 || lo > hi || hi > highest {
            return Err(Error::OutOfRange(hi));
        }

        (lo..=hi).map(|r| self.revision_info(fork, r)).collect()
    }

    /// Blob ids referenced by old-bytes payloads of revisions more than
    /// `distance` revisions below their fork's highest.
    pub fn cold_payload_blobs(&self, distance: u64) -> Vec<BlobId> {
        let mut out = Vec::new();

        for fork in &self.forks {
            let highest = fork.highest();

            for (idx, rev) in fork.revisions.iter().enumerate() {
                let id = idx as RevisionId + 1;

                if id + distance > highest {
                    continue;
                }

                for inverse in &rev.payload {
                    match inverse {
                        EditInverse::Delete { old, .. } | EditInverse::Overwrite { old, .. } => {
                            out.extend(old.iter().map(|seg| seg.blob));
                        }
                        EditInverse::Insert { .. } | EditInverse::Decoration { .. } => {}
                    }
                }
            }
        }

        out.sort_unstable();
        out.dedup();
        out
    }
}
