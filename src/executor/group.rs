//! Cross-batch group tracking for hash-based set operators.
//!
//! A [`Group`] stands for one distinct key value seen on the build side. It
//! is anchored at the first row that produced the value and collects every
//! later row with the same value, across all buffered batches. Groups live in
//! an arena owned by the [`GroupTracker`] and are addressed by [`GroupId`];
//! both the hash chains and the per-batch enumeration lists hold ids only.
//!
//! Hash equality is never taken as key equality: every fold compares the
//! key columns of the candidate row with the group's anchor row.

use rustc_hash::FxHashMap;

use super::vectorized::{Batch, Vector};

/// `sel` value of a group that the probe side has matched.
pub const MATCHED: i64 = -1;

/// Position of a row among the buffered build batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowLocation {
    /// Index of the batch in arrival order.
    pub batch: usize,
    /// Physical row index inside the batch.
    pub row: i64,
}

/// Identifier of a group inside its tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(usize);

impl GroupId {
    /// Returns the position of the group in creation order.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// One distinct key value of the build relation.
#[derive(Debug, Clone)]
pub struct Group {
    anchor: RowLocation,
    sel: i64,
    members: Vec<RowLocation>,
}

impl Group {
    fn new(anchor: RowLocation) -> Self {
        Self {
            anchor,
            sel: anchor.row,
            members: Vec::new(),
        }
    }

    /// Representative (first) row of the group.
    #[must_use]
    pub fn anchor(&self) -> RowLocation {
        self.anchor
    }

    /// Anchor row index while unmatched, [`MATCHED`] once matched.
    #[must_use]
    pub fn sel(&self) -> i64 {
        self.sel
    }

    /// Returns true until the probe side matches the group.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.sel >= 0
    }

    /// Every row folded into the group, anchor included.
    #[must_use]
    pub fn members(&self) -> &[RowLocation] {
        &self.members
    }
}

/// Counters reported by a [`GroupTracker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Groups created on the build side.
    pub created: usize,
    /// Groups matched by the probe side.
    pub matched: usize,
    /// Rows folded into groups.
    pub rows_folded: usize,
}

/// Hash table from hash code to its chain of live groups.
#[derive(Debug, Default)]
pub struct GroupTracker {
    /// All groups ever created, in creation order.
    groups: Vec<Group>,
    /// Live groups per hash code; empty chains are removed.
    chains: FxHashMap<u64, Vec<GroupId>>,
    /// Groups created per buffered batch, used only to enumerate survivors.
    batch_groups: Vec<Vec<GroupId>>,
    stats: GroupStats,
}

impl GroupTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly buffered batch and returns its index.
    pub fn add_batch(&mut self) -> usize {
        self.batch_groups.push(Vec::new());
        self.batch_groups.len() - 1
    }

    /// Returns true if no live group remains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Number of live groups.
    #[must_use]
    pub fn live_groups(&self) -> usize {
        self.chains.values().map(Vec::len).sum()
    }

    /// Number of groups ever created.
    #[must_use]
    pub fn total_groups(&self) -> usize {
        self.groups.len()
    }

    /// Returns a group by id.
    #[must_use]
    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[id.0]
    }

    /// Iterates all groups in creation order.
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter()
    }

    /// Live groups registered under `hash`.
    #[must_use]
    pub fn chain(&self, hash: u64) -> &[GroupId] {
        self.chains.get(&hash).map_or(&[], Vec::as_slice)
    }

    /// Returns the tracker counters.
    #[must_use]
    pub fn stats(&self) -> GroupStats {
        self.stats
    }

    /// Folds the build rows of one hash bucket into groups.
    ///
    /// `remaining` holds row indices of batch `batch` that share `hash`;
    /// `vecs` are that batch's key vectors. Rows equal to an existing group
    /// are consumed into it. Whatever is left starts new groups, one per
    /// distinct value. `remaining` is empty on return.
    pub fn fold_build(
        &mut self,
        hash: u64,
        remaining: &mut Vec<i64>,
        batch: usize,
        vecs: &[Vector],
        batches: &[Option<Batch>],
    ) {
        if remaining.is_empty() {
            return;
        }

        let chain = self.chains.get(&hash).cloned().unwrap_or_default();
        for id in &chain {
            if remaining.is_empty() {
                break;
            }
            self.fill(*id, remaining, batch, vecs, batches);
        }

        while let Some(&first) = remaining.first() {
            let id = GroupId(self.groups.len());
            self.groups.push(Group::new(RowLocation { batch, row: first }));
            self.chains.entry(hash).or_default().push(id);
            self.batch_groups[batch].push(id);
            self.stats.created += 1;
            self.fill(id, remaining, batch, vecs, batches);
        }
    }

    /// Moves rows equal to group `id` out of `remaining` into its members.
    fn fill(
        &mut self,
        id: GroupId,
        remaining: &mut Vec<i64>,
        batch: usize,
        vecs: &[Vector],
        batches: &[Option<Batch>],
    ) {
        let anchor = self.groups[id.0].anchor;
        let Some(anchor_vecs) = anchor_vectors(batches, anchor, batch, vecs) else {
            return;
        };

        let mut kept = 0;
        for k in 0..remaining.len() {
            let row = remaining[k];
            if rows_equal(vecs, row, anchor_vecs, anchor.row) {
                self.groups[id.0].members.push(RowLocation { batch, row });
                self.stats.rows_folded += 1;
            } else {
                remaining[kept] = row;
                kept += 1;
            }
        }
        remaining.truncate(kept);
    }

    /// Matches probe rows of one hash bucket against the live groups.
    ///
    /// Every group whose anchor equals one of `rows` is marked [`MATCHED`]
    /// and unlinked from its chain. Matching rows are removed from `rows`.
    /// Returns the number of groups matched.
    pub fn probe(
        &mut self,
        hash: u64,
        rows: &mut Vec<i64>,
        vecs: &[Vector],
        batches: &[Option<Batch>],
    ) -> usize {
        let Some(chain) = self.chains.get_mut(&hash) else {
            return 0;
        };

        let mut matched = 0;
        let mut k = 0;
        while k < chain.len() && !rows.is_empty() {
            let group = &mut self.groups[chain[k].0];
            let anchor = group.anchor;
            let Some(anchor_vecs) = batches
                .get(anchor.batch)
                .and_then(Option::as_ref)
                .map(Batch::vectors)
            else {
                k += 1;
                continue;
            };

            let before = rows.len();
            rows.retain(|&row| !rows_equal(vecs, row, anchor_vecs, anchor.row));
            if rows.len() < before {
                group.sel = MATCHED;
                chain.remove(k);
                matched += 1;
            } else {
                k += 1;
            }
        }

        if chain.is_empty() {
            self.chains.remove(&hash);
        }
        self.stats.matched += matched;
        matched
    }

    /// Anchor rows of the live groups created in batch `batch`, in creation order.
    pub fn surviving(&self, batch: usize) -> impl Iterator<Item = i64> + '_ {
        self.batch_groups
            .get(batch)
            .into_iter()
            .flatten()
            .map(|id| &self.groups[id.0])
            .filter(|g| g.is_live())
            .map(Group::sel)
    }

    /// Forgets the enumeration list of a drained batch.
    pub fn release_batch(&mut self, batch: usize) {
        if let Some(list) = self.batch_groups.get_mut(batch) {
            list.clear();
            list.shrink_to_fit();
        }
    }

    /// Drops every group.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.chains.clear();
        self.batch_groups.clear();
    }
}

/// Key vectors holding the anchor row. The batch being built may not be
/// reachable through `batches` yet, so `current` is used for it.
fn anchor_vectors<'a>(
    batches: &'a [Option<Batch>],
    anchor: RowLocation,
    current_batch: usize,
    current: &'a [Vector],
) -> Option<&'a [Vector]> {
    if anchor.batch == current_batch {
        return Some(current);
    }
    let found = batches
        .get(anchor.batch)
        .and_then(Option::as_ref)
        .map(Batch::vectors);
    debug_assert!(found.is_some(), "group anchored in a released batch");
    found
}

/// Compares row `a_row` of `a` with row `b_row` of `b` across all columns.
#[must_use]
pub fn rows_equal(a: &[Vector], a_row: i64, b: &[Vector], b_row: i64) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| x.row_eq(a_row as usize, y, b_row as usize))
}
