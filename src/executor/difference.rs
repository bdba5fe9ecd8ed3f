//! Hash-based set difference over two batch streams.
//!
//! [`Difference`] emits the distinct rows of its build input `R` whose key
//! does not occur in its probe input `S`. Every column of a batch is a key
//! column. Execution moves through four phases:
//!
//! 1. **Building**: every batch of `R` is cut into units, bucketed by hash
//!    in a [`HashSlotMap`] and folded into the [`GroupTracker`]. Batches are
//!    buffered until drain.
//! 2. **Probing**: batches of `S` go through the same bucketing; each group
//!    equal to a probe row is marked matched and unlinked. Once no live group
//!    remains, the rest of `S` is received, acknowledged and released
//!    without hashing.
//! 3. **Draining**: buffered batches are revisited in arrival order. The
//!    anchor rows of their surviving groups become the batch's selection.
//! 4. **Done**: the slot map is back in its pool and both inputs are closed,
//!    so later sends hand their batch back; `next()` keeps returning `None`.
//!
//! Any error aborts the operator. All buffered batches, queued and in-flight
//! input and the slot map are given back before the error is returned.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::{ExecError, Result};
use crate::types::DataType;

use super::context::ExecutionContext;
use super::group::GroupTracker;
use super::slot_map::HashSlotMap;
use super::stream::{BatchReceiver, Message};
use super::vectorized::{
    Batch, FxKeyHasher, KeyHasher, SelectionBuilder, SelectionVector, Vector, HASH_SEED,
};
use super::BatchOperator;

/// Execution phase of a [`Difference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Consuming the build input.
    Building,
    /// Consuming the probe input.
    Probing,
    /// Emitting surviving rows.
    Draining,
    /// Finished or aborted.
    Done,
}

/// Counters describing one [`Difference`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DifferenceStats {
    /// Distinct build keys.
    pub groups_created: usize,
    /// Build keys found on the probe side.
    pub groups_matched: usize,
    /// Build batches retained for drain.
    pub batches_buffered: usize,
    /// Output batches emitted.
    pub batches_emitted: usize,
    /// Probe batches received, hashed or not.
    pub probe_batches: usize,
    /// True if probe input was skipped because no live group remained.
    pub short_circuited: bool,
}

/// Set difference `R - S`.
pub struct Difference {
    ctx: ExecutionContext,
    build: BatchReceiver,
    probe: BatchReceiver,
    hasher: Arc<dyn KeyHasher>,
    phase: Phase,
    /// Borrowed from the context pool until the operator finishes.
    slots: Option<HashSlotMap>,
    tracker: GroupTracker,
    /// Build batches in arrival order; `None` once drained.
    batches: Vec<Option<Batch>>,
    /// Column types of the first build batch.
    schema: Option<Vec<DataType>>,
    /// Running hashes of the current unit.
    hashes: Vec<u64>,
    drain_cursor: usize,
    stats: DifferenceStats,
}

impl Difference {
    /// Creates the operator over a build stream and a probe stream.
    #[must_use]
    pub fn new(ctx: &ExecutionContext, build: BatchReceiver, probe: BatchReceiver) -> Self {
        Self {
            ctx: ctx.clone(),
            build,
            probe,
            hasher: Arc::new(FxKeyHasher),
            phase: Phase::Building,
            slots: Some(ctx.slot_maps().get()),
            tracker: GroupTracker::new(),
            batches: Vec::new(),
            schema: None,
            hashes: Vec::with_capacity(ctx.config().unit_size),
            drain_cursor: 0,
            stats: DifferenceStats::default(),
        }
    }

    /// Replaces the row hasher.
    #[must_use]
    pub fn with_hasher(mut self, hasher: Arc<dyn KeyHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of build keys not matched so far.
    #[must_use]
    pub fn live_groups(&self) -> usize {
        self.tracker.live_groups()
    }

    /// Returns run counters.
    #[must_use]
    pub fn stats(&self) -> DifferenceStats {
        let groups = self.tracker.stats();
        DifferenceStats {
            groups_created: groups.created,
            groups_matched: groups.matched,
            ..self.stats
        }
    }

    fn build_step(&mut self) -> Result<()> {
        let message = self.build.recv()?;
        let result = match message {
            Message::Batch(batch) => self.build_batch(batch),
            Message::Error(e) => Err(e),
            Message::End => {
                self.start_probe();
                Ok(())
            }
        };
        self.build.done();
        result
    }

    fn probe_step(&mut self) -> Result<()> {
        let message = self.probe.recv()?;
        let result = match message {
            Message::Batch(batch) => self.probe_batch(batch),
            Message::Error(e) => Err(e),
            Message::End => {
                self.phase = Phase::Draining;
                debug!(
                    operator = %self,
                    live_groups = self.tracker.live_groups(),
                    matched = self.tracker.stats().matched,
                    "probe finished"
                );
                Ok(())
            }
        };
        self.probe.done();
        result
    }

    fn start_probe(&mut self) {
        self.phase = Phase::Probing;
        if self.tracker.is_empty() {
            self.stats.short_circuited = true;
        }
        debug!(
            operator = %self,
            groups = self.tracker.total_groups(),
            batches = self.batches.len(),
            short_circuit = self.stats.short_circuited,
            "build finished"
        );
    }

    fn build_batch(&mut self, batch: Batch) -> Result<()> {
        let arena = Arc::clone(self.ctx.arena());
        if batch.is_placeholder() || batch.num_rows() == 0 {
            batch.release(&arena);
            return Ok(());
        }
        let types = batch.data_types();
        match self
            .schema
            .as_deref()
            .map(|expected| check_types(expected, &types))
        {
            None => self.schema = Some(types),
            Some(Err(e)) => {
                batch.release(&arena);
                return Err(e);
            }
            Some(Ok(())) => {}
        }

        let unit_size = self.ctx.config().unit_size;
        let Self {
            hasher,
            slots,
            tracker,
            batches,
            hashes,
            ..
        } = self;
        let Some(slots) = slots.as_mut() else {
            batch.release(&arena);
            return Err(slot_map_gone());
        };

        let index = tracker.add_batch();
        batches.push(None);
        let sels = batch.selection().map(SelectionVector::to_vec);
        let rows = batch.num_rows();
        let vecs = batch.vectors();

        let mut start = 0;
        while start < rows {
            let len = unit_size.min(rows - start);
            bucket_unit(&**hasher, slots, hashes, vecs, sels.as_deref(), start, len);
            for slot in 0..slots.len() {
                let hash = slots.hash(slot);
                tracker.fold_build(hash, slots.rows_mut(slot), index, vecs, batches);
            }
            start += len;
        }
        batches[index] = Some(batch);

        trace!(batch = index, rows, groups = self.tracker.total_groups(), "build batch folded");
        self.stats.batches_buffered += 1;
        Ok(())
    }

    fn probe_batch(&mut self, batch: Batch) -> Result<()> {
        let arena = Arc::clone(self.ctx.arena());
        self.stats.probe_batches += 1;
        if self.tracker.is_empty() {
            if !self.stats.short_circuited {
                self.stats.short_circuited = true;
                debug!(operator = %self, "no live groups left, skipping probe input");
            }
            batch.release(&arena);
            return Ok(());
        }
        if batch.is_placeholder() || batch.num_rows() == 0 {
            batch.release(&arena);
            return Ok(());
        }
        if let Some(expected) = &self.schema {
            if let Err(e) = check_types(expected, &batch.data_types()) {
                batch.release(&arena);
                return Err(e);
            }
        }

        let unit_size = self.ctx.config().unit_size;
        let Self {
            hasher,
            slots,
            tracker,
            batches,
            hashes,
            ..
        } = self;
        let Some(slots) = slots.as_mut() else {
            batch.release(&arena);
            return Err(slot_map_gone());
        };

        let sels = batch.selection().map(SelectionVector::to_vec);
        let rows = batch.num_rows();
        let vecs = batch.vectors();

        let mut matched = 0;
        let mut start = 0;
        while start < rows && !tracker.is_empty() {
            let len = unit_size.min(rows - start);
            bucket_unit(&**hasher, slots, hashes, vecs, sels.as_deref(), start, len);
            for slot in 0..slots.len() {
                let hash = slots.hash(slot);
                matched += tracker.probe(hash, slots.rows_mut(slot), vecs, batches);
            }
            start += len;
        }
        trace!(rows, matched, "probe batch processed");

        batch.release(&arena);
        Ok(())
    }

    /// Emits the next buffered batch that still has surviving rows.
    fn drain_step(&mut self) -> Result<Option<Batch>> {
        let arena = Arc::clone(self.ctx.arena());
        while self.drain_cursor < self.batches.len() {
            let index = self.drain_cursor;
            self.drain_cursor += 1;
            let Some(mut batch) = self.batches[index].take() else {
                continue;
            };

            let mut builder = SelectionBuilder::new();
            for row in self.tracker.surviving(index) {
                if let Err(e) = builder.push(&arena, row) {
                    builder.release(&arena);
                    batch.release(&arena);
                    return Err(e);
                }
            }
            self.tracker.release_batch(index);

            match builder.finish() {
                None => batch.release(&arena),
                Some(selection) => {
                    if let Err(e) = batch.set_selection(&arena, selection) {
                        batch.release(&arena);
                        return Err(e);
                    }
                    self.stats.batches_emitted += 1;
                    return Ok(Some(batch));
                }
            }
        }

        debug!(
            operator = %self,
            emitted = self.stats.batches_emitted,
            "drain finished"
        );
        self.finish();
        Ok(None)
    }

    /// Returns the slot map, drops all tracking state and closes both
    /// inputs. Returns the number of input messages discarded.
    fn finish(&mut self) -> usize {
        if let Some(slots) = self.slots.take() {
            self.ctx.slot_maps().put(slots);
        }
        self.tracker.clear();
        self.batches.clear();
        self.phase = Phase::Done;
        let arena = self.ctx.arena();
        self.build.close(arena) + self.probe.close(arena)
    }

    /// Releases every held resource after a failure.
    fn abort(&mut self) {
        let arena = Arc::clone(self.ctx.arena());
        let mut released = 0;
        for batch in self.batches.iter_mut().filter_map(Option::take) {
            batch.release(&arena);
            released += 1;
        }
        let discarded = self.finish();
        debug!(operator = %self, released, discarded, "difference aborted");
    }
}

impl BatchOperator for Difference {
    fn next(&mut self) -> Result<Option<Batch>> {
        loop {
            let step = match self.phase {
                Phase::Building => self.build_step().map(|()| None),
                Phase::Probing => self.probe_step().map(|()| None),
                Phase::Draining => self.drain_step(),
                Phase::Done => return Ok(None),
            };
            match step {
                Ok(Some(batch)) => return Ok(Some(batch)),
                Ok(None) => {}
                Err(e) => {
                    self.abort();
                    return Err(e);
                }
            }
        }
    }
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.build.name(), self.probe.name())
    }
}

impl fmt::Debug for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Difference")
            .field("build", &self.build.name())
            .field("probe", &self.probe.name())
            .field("phase", &self.phase)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Drop for Difference {
    fn drop(&mut self) {
        if self.phase != Phase::Done {
            warn!(
                operator = %self,
                phase = ?self.phase,
                held = self.batches.iter().flatten().count(),
                "difference dropped before completion"
            );
            self.abort();
        }
    }
}

/// Hashes one unit and buckets its rows into `slots`.
///
/// With a selection, the unit covers `sels[start..start + len]`; otherwise
/// physical rows `start..start + len`.
fn bucket_unit(
    hasher: &dyn KeyHasher,
    slots: &mut HashSlotMap,
    hashes: &mut Vec<u64>,
    vecs: &[Vector],
    sels: Option<&[i64]>,
    start: usize,
    len: usize,
) {
    hashes.clear();
    hashes.resize(len, HASH_SEED);
    slots.reset();
    match sels {
        Some(sels) => {
            let unit = &sels[start..start + len];
            for vec in vecs {
                hasher.rehash_selected(unit, hashes, vec);
            }
            for (&row, &hash) in unit.iter().zip(hashes.iter()) {
                slots.bucket_row(hash, row);
            }
        }
        None => {
            for vec in vecs {
                hasher.rehash(start, hashes, vec);
            }
            for (i, &hash) in hashes.iter().enumerate() {
                slots.bucket_row(hash, (start + i) as i64);
            }
        }
    }
}

fn check_types(expected: &[DataType], actual: &[DataType]) -> Result<()> {
    if expected.len() != actual.len() {
        return Err(ExecError::SchemaMismatch(format!(
            "expected {} columns, got {}",
            expected.len(),
            actual.len()
        )));
    }
    match expected.iter().zip(actual).find(|(e, a)| e != a) {
        Some((e, a)) => Err(ExecError::TypeError {
            expected: e.name().to_string(),
            actual: a.name().to_string(),
        }),
        None => Ok(()),
    }
}

fn slot_map_gone() -> ExecError {
    ExecError::ExecutionError("slot map already returned to its pool".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use crate::executor::stream::{channel, BatchSender};
    use crate::memory::Arena;
    use crate::types::Value;

    fn pairs(arena: &Arena, ids: &[i64], names: &[&str]) -> Batch {
        let a = Vector::from_i64s(arena, ids).unwrap();
        let b = Vector::from_strs(arena, names).unwrap();
        Batch::try_new(arena, vec!["id".into(), "name".into()], vec![a, b]).unwrap()
    }

    fn feed(tx: &BatchSender, batches: Vec<Batch>) {
        for batch in batches {
            tx.batch(batch).unwrap();
        }
        tx.finish().unwrap();
    }

    fn run(op: &mut Difference, arena: &Arena) -> Vec<Vec<Value>> {
        let mut rows = Vec::new();
        while let Some(batch) = op.next().unwrap() {
            rows.extend(batch.rows());
            batch.release(arena);
        }
        rows.sort_by_key(|r| format!("{r:?}"));
        rows
    }

    fn row(id: i64, name: &str) -> Vec<Value> {
        vec![Value::Int64(id), Value::String(name.into())]
    }

    fn setup(unit_size: usize) -> (ExecutionContext, BatchSender, BatchSender, Difference) {
        let ctx = ExecutionContext::new(ExecutorConfig::new().with_unit_size(unit_size)).unwrap();
        let (r_tx, r_rx) = channel("R", 16);
        let (s_tx, s_rx) = channel("S", 16);
        let op = Difference::new(&ctx, r_rx, s_rx);
        (ctx, r_tx, s_tx, op)
    }

    /// Groups that always land in the same bucket.
    struct ConstantHasher;

    impl KeyHasher for ConstantHasher {
        fn rehash(&self, _start: usize, hashes: &mut [u64], _vec: &Vector) {
            hashes.fill(42);
        }

        fn rehash_selected(&self, _sels: &[i64], hashes: &mut [u64], _vec: &Vector) {
            hashes.fill(42);
        }
    }

    #[test]
    fn test_duplicate_key_fully_matched() {
        let (ctx, r_tx, s_tx, mut op) = setup(256);
        let arena = Arc::clone(ctx.arena());
        feed(&r_tx, vec![pairs(&arena, &[1, 2, 2], &["a", "b", "b"])]);
        feed(&s_tx, vec![pairs(&arena, &[2], &["b"])]);

        assert_eq!(run(&mut op, &arena), vec![row(1, "a")]);
        let stats = op.stats();
        assert_eq!(stats.groups_created, 2);
        assert_eq!(stats.groups_matched, 1);
        assert_eq!(stats.batches_emitted, 1);
        assert_eq!(op.phase(), Phase::Done);
        assert_eq!(r_tx.pending(), 0);
        assert_eq!(s_tx.pending(), 0);
        assert_eq!(arena.stats().outstanding(), 0);
        assert_eq!(ctx.slot_maps().borrowed(), 0);
    }

    #[test]
    fn test_empty_probe_keeps_distinct_rows() {
        let (ctx, r_tx, s_tx, mut op) = setup(2);
        let arena = Arc::clone(ctx.arena());
        feed(
            &r_tx,
            vec![
                pairs(&arena, &[1, 2, 1], &["a", "b", "a"]),
                pairs(&arena, &[3, 2], &["c", "b"]),
            ],
        );
        feed(&s_tx, vec![]);

        assert_eq!(
            run(&mut op, &arena),
            vec![row(1, "a"), row(2, "b"), row(3, "c")]
        );
        assert_eq!(arena.stats().outstanding(), 0);
    }

    #[test]
    fn test_empty_build_short_circuits() {
        let (ctx, r_tx, s_tx, mut op) = setup(256);
        let arena = Arc::clone(ctx.arena());
        feed(&r_tx, vec![]);
        feed(
            &s_tx,
            vec![pairs(&arena, &[1], &["a"]), pairs(&arena, &[2], &["b"])],
        );

        assert!(run(&mut op, &arena).is_empty());
        let stats = op.stats();
        assert!(stats.short_circuited);
        assert_eq!(stats.probe_batches, 2);
        assert_eq!(s_tx.pending(), 0);
        assert_eq!(arena.stats().outstanding(), 0);
    }

    #[test]
    fn test_forced_collisions() {
        let (ctx, r_tx, s_tx, op) = setup(4);
        let mut op = op.with_hasher(Arc::new(ConstantHasher));
        let arena = Arc::clone(ctx.arena());
        feed(
            &r_tx,
            vec![
                pairs(&arena, &[1, 2, 1], &["a", "b", "a"]),
                pairs(&arena, &[3, 2], &["c", "b"]),
            ],
        );
        feed(&s_tx, vec![pairs(&arena, &[2, 9], &["b", "z"])]);

        assert_eq!(run(&mut op, &arena), vec![row(1, "a"), row(3, "c")]);
        assert_eq!(op.stats().groups_created, 3);
        assert_eq!(arena.stats().outstanding(), 0);
    }

    #[test]
    fn test_build_selection_respected() {
        let (ctx, r_tx, s_tx, mut op) = setup(256);
        let arena = Arc::clone(ctx.arena());
        let mut batch = pairs(&arena, &[1, 2, 3], &["a", "b", "c"]);
        let sel = SelectionVector::from_indices(&arena, &[2, 0]).unwrap();
        batch.set_selection(&arena, sel).unwrap();
        feed(&r_tx, vec![batch]);
        feed(&s_tx, vec![pairs(&arena, &[3], &["c"])]);

        assert_eq!(run(&mut op, &arena), vec![row(1, "a")]);
        assert_eq!(arena.stats().outstanding(), 0);
    }

    #[test]
    fn test_upstream_error_aborts() {
        let (ctx, r_tx, s_tx, mut op) = setup(256);
        let arena = Arc::clone(ctx.arena());
        feed(&r_tx, vec![pairs(&arena, &[1], &["a"])]);
        s_tx.fail(ExecError::Upstream("scan failed".into())).unwrap();

        let err = op.next().unwrap_err();
        assert_eq!(err.to_string(), "scan failed");
        assert_eq!(op.phase(), Phase::Done);
        assert!(op.next().unwrap().is_none());
        assert_eq!(arena.stats().outstanding(), 0);
        assert_eq!(ctx.slot_maps().borrowed(), 0);
    }

    #[test]
    fn test_type_mismatch_between_inputs() {
        let (ctx, r_tx, s_tx, mut op) = setup(256);
        let arena = Arc::clone(ctx.arena());
        feed(&r_tx, vec![pairs(&arena, &[1], &["a"])]);
        let a = Vector::from_strs(&arena, &["x"]).unwrap();
        let b = Vector::from_strs(&arena, &["a"]).unwrap();
        let wrong = Batch::try_new(&arena, vec!["id".into(), "name".into()], vec![a, b]).unwrap();
        feed(&s_tx, vec![wrong]);

        let err = op.next().unwrap_err();
        assert!(matches!(err, ExecError::TypeError { .. }));
        assert_eq!(arena.stats().outstanding(), 0);
    }

    #[test]
    fn test_drop_mid_build_releases() {
        let (ctx, r_tx, _s_tx, op) = setup(256);
        let arena = Arc::clone(ctx.arena());
        r_tx.batch(pairs(&arena, &[1], &["a"])).unwrap();
        r_tx.batch(pairs(&arena, &[2], &["b"])).unwrap();
        drop(op);
        assert_eq!(arena.stats().outstanding(), 0);
        assert_eq!(ctx.slot_maps().borrowed(), 0);
    }

    #[test]
    fn test_display() {
        let (_ctx, _r, _s, op) = setup(256);
        assert_eq!(op.to_string(), "R - S");
    }
}
