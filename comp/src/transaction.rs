//! The transaction engine.
//!
//! A transaction is a set of per-surface entries that must land together:
//! each entry carries the surface's sealed state, optionally a subsurface
//! position, and the link to the surface's next committed transaction.
//! Uncommitted transactions double as the caches accumulating synchronized
//! subsurface commits; committing assigns a global sequence number, chains
//! the transaction behind each entry surface's earlier ones, and queues it:
//!
//! ```text
//!   commit ──▶ [seq 7]──[seq 9]──▶ ...   per-surface chains (Entry::next)
//!                 │
//!                 ▼
//!   queue: 7, 8, 9, ...                  applied oldest-first, a
//!                                        transaction only when it is every
//!                                        entry surface's oldest
//! ```
//!
//! Apply itself is two passes over the entry surfaces: ancestors before
//! descendants for the state landing, then the reverse order to push
//! derived position and map state back down the tree.

use rustc_hash::FxHashMap;
use slotmap::new_key_type;
use tracing::debug;

use crate::{
    error::ProtocolError,
    event::Event,
    geometry::Point,
    state::Patina,
    subsurface::PlacementOp,
    surface::{Surface, SurfaceId},
    surface_state::SurfaceState,
};

new_key_type! {
    /// Key of a transaction in the engine arena.
    pub struct TransactionId;
}

#[derive(Debug, Default)]
pub(crate) struct Transaction {
    /// Assigned at commit; `None` while the transaction is still a cache
    /// accumulating synchronized commits.
    pub sequence: Option<u64>,
    pub entries: FxHashMap<SurfaceId, Entry>,
}

#[derive(Debug, Default)]
pub(crate) struct Entry {
    /// The sealed state to land on the surface. `None` for entries that
    /// exist only to pin placement references.
    pub state: Option<Box<SurfaceState>>,

    /// Subsurface position to adopt, from `set_position`.
    pub position: Option<Point>,

    /// The surface's next committed transaction, forming its chain.
    pub next: Option<TransactionId>,
}

impl Patina {
    /// Seals the surface's pending state into a transaction and, unless the
    /// surface is effectively synchronized, commits it.
    pub fn commit(&mut self, id: SurfaceId) -> Result<(), ProtocolError> {
        self.surface(id)?.check_pending_content(id)?;

        {
            let surface = self.surface_mut(id)?;
            let Surface { role, pending, .. } = surface;
            if let Some(role) = role.as_mut() {
                role.commit_state(id, pending)?;
            }
        }

        let synchronized = self.is_effectively_synchronized(id);
        let target = if synchronized {
            self.ensure_cached_transaction(id)
        } else {
            self.transactions.insert(Transaction::default())
        };

        let pending = std::mem::take(&mut self.surface_mut(id)?.pending);
        self.merge_into_entry(target, id, pending);

        // Every direct child's cache folds in, synchronized or not; a
        // nested cascade moves one level per commit.
        for child in self.committed_children(id) {
            let cached = self
                .surfaces
                .get_mut(child)
                .and_then(Surface::subsurface_mut)
                .and_then(|sub| sub.cached.take());
            if let Some(cached) = cached {
                self.merge_transaction_into(target, cached);
            }
        }

        debug!(?id, synchronized, "commit");

        if !synchronized {
            self.commit_transaction(target);
        }

        Ok(())
    }

    /// The surface's cache, created on demand. Callers guarantee the
    /// surface holds the subsurface role.
    pub(crate) fn ensure_cached_transaction(&mut self, id: SurfaceId) -> TransactionId {
        let cached = self
            .surfaces
            .get(id)
            .and_then(Surface::subsurface)
            .and_then(|sub| sub.cached);
        if let Some(cached) = cached {
            return cached;
        }

        let transaction = self.transactions.insert(Transaction::default());
        if let Some(sub) = self.surfaces.get_mut(id).and_then(Surface::subsurface_mut) {
            sub.cached = Some(transaction);
        }
        transaction
    }

    /// Makes sure `transaction` has an entry for `id`, pinning the surface
    /// while the entry lives.
    pub(crate) fn ensure_entry(&mut self, transaction: TransactionId, id: SurfaceId) {
        let Some(txn) = self.transactions.get_mut(transaction) else {
            return;
        };
        if txn.entries.contains_key(&id) {
            return;
        }

        txn.entries.insert(id, Entry::default());
        if let Some(surface) = self.surfaces.get_mut(id) {
            surface.entry_refs += 1;
        }
    }

    /// Folds a sealed state into the surface's entry, creating it when
    /// needed. Feedback already staged in the entry is superseded.
    pub(crate) fn merge_into_entry(&mut self, transaction: TransactionId, id: SurfaceId, state: SurfaceState) {
        self.ensure_entry(transaction, id);

        let mut discarded = Vec::new();
        if let Some(entry) = self
            .transactions
            .get_mut(transaction)
            .and_then(|txn| txn.entries.get_mut(&id))
        {
            match entry.state.as_mut() {
                None => entry.state = Some(Box::new(state)),
                Some(existing) => existing.merge_from(state, &mut discarded),
            }
        }

        for feedback in discarded {
            self.events.push(Event::FeedbackDiscarded { surface: id, feedback });
        }
    }

    /// Records a subsurface position on the surface's entry.
    pub(crate) fn stage_entry_position(&mut self, transaction: TransactionId, id: SurfaceId, position: Point) {
        self.ensure_entry(transaction, id);
        if let Some(entry) = self
            .transactions
            .get_mut(transaction)
            .and_then(|txn| txn.entries.get_mut(&id))
        {
            entry.position = Some(position);
        }
    }

    /// Queues a restack on the entry of the parent it belongs to.
    pub(crate) fn push_entry_placement_op(&mut self, transaction: TransactionId, parent: SurfaceId, op: PlacementOp) {
        self.ensure_entry(transaction, parent);
        if let Some(entry) = self
            .transactions
            .get_mut(transaction)
            .and_then(|txn| txn.entries.get_mut(&parent))
        {
            entry
                .state
                .get_or_insert_with(Default::default)
                .placement_ops
                .push(op);
        }
    }

    /// Scrubs what an uncommitted transaction knows about a subsurface
    /// that left `parent`: its staged position, and any of the parent's
    /// restacks that move it or use it as the reference. Content state
    /// stays; it applies to a surface that is no longer shown.
    pub(crate) fn drop_subsurface_state(&mut self, transaction: TransactionId, child: SurfaceId, parent: SurfaceId) {
        let Some(txn) = self.transactions.get_mut(transaction) else {
            return;
        };
        if let Some(entry) = txn.entries.get_mut(&child) {
            entry.position = None;
        }
        if let Some(state) = txn
            .entries
            .get_mut(&parent)
            .and_then(|entry| entry.state.as_deref_mut())
        {
            state
                .placement_ops
                .retain(|op| op.subsurface != child && op.sibling != Some(child));
        }
    }

    /// Moves every entry of the uncommitted `source` into `target`,
    /// merging states where both sides touched a surface. `source` is
    /// freed.
    pub(crate) fn merge_transaction_into(&mut self, target: TransactionId, source: TransactionId) {
        if target == source {
            return;
        }
        let Some(from) = self.transactions.remove(source) else {
            return;
        };
        debug_assert!(from.sequence.is_none(), "committed transactions never merge");

        for (id, entry) in from.entries {
            // Transfer before un-pinning so the surface cannot get reaped
            // in between.
            self.ensure_entry(target, id);
            if let Some(position) = entry.position {
                self.stage_entry_position(target, id, position);
            }
            if let Some(state) = entry.state {
                self.merge_into_entry(target, id, *state);
            }

            if let Some(surface) = self.surfaces.get_mut(id) {
                debug_assert!(surface.entry_refs > 0);
                surface.entry_refs = surface.entry_refs.saturating_sub(1);
            }
            self.reap_if_unreferenced(id);
        }
    }

    /// Frees an uncommitted transaction without applying it. Buffer uses
    /// release, staged feedback is announced as discarded.
    pub(crate) fn discard_transaction(&mut self, transaction: TransactionId) {
        let Some(txn) = self.transactions.remove(transaction) else {
            return;
        };
        debug_assert!(txn.sequence.is_none(), "committed transactions are applied, not discarded");

        for (id, entry) in txn.entries {
            if let Some(state) = entry.state {
                for feedback in state.feedback.iter() {
                    self.events.push(Event::FeedbackDiscarded {
                        surface: id,
                        feedback: *feedback,
                    });
                }
            }
            if let Some(surface) = self.surfaces.get_mut(id) {
                debug_assert!(surface.entry_refs > 0);
                surface.entry_refs = surface.entry_refs.saturating_sub(1);
            }
            self.reap_if_unreferenced(id);
        }
    }

    /// Assigns the next sequence number, chains the transaction behind each
    /// entry surface's earlier commits, queues it and applies whatever the
    /// queue allows.
    pub(crate) fn commit_transaction(&mut self, transaction: TransactionId) {
        // Placement references are pinned with (possibly empty) entries so
        // the surfaces cannot vanish and the ordering sees them.
        let mut referenced = Vec::new();
        if let Some(txn) = self.transactions.get(transaction) {
            for entry in txn.entries.values() {
                if let Some(state) = entry.state.as_deref() {
                    for op in &state.placement_ops {
                        referenced.push(op.subsurface);
                        if let Some(sibling) = op.sibling {
                            referenced.push(sibling);
                        }
                    }
                }
            }
        }
        for id in referenced {
            self.ensure_entry(transaction, id);
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let entry_surfaces: Vec<SurfaceId> = match self.transactions.get_mut(transaction) {
            Some(txn) => {
                txn.sequence = Some(sequence);
                txn.entries.keys().copied().collect()
            }
            None => return,
        };

        for id in entry_surfaces {
            // Dead surfaces chain too; their entries still release buffers
            // in order.
            let Some(surface) = self.surfaces.get_mut(id) else {
                continue;
            };
            match surface.last_committed.replace(transaction) {
                None => surface.first_committed = Some(transaction),
                Some(last) => {
                    if let Some(entry) = self
                        .transactions
                        .get_mut(last)
                        .and_then(|txn| txn.entries.get_mut(&id))
                    {
                        entry.next = Some(transaction);
                    }
                }
            }
        }

        debug!(txn = ?transaction, sequence, "committed transaction");
        self.queue.push_back(transaction);
        self.maybe_apply_pending();
    }

    /// Whether some entry surface has an older committed transaction that
    /// must land first.
    fn transaction_blocked(&self, transaction: TransactionId) -> bool {
        let Some(txn) = self.transactions.get(transaction) else {
            return false;
        };
        txn.entries.keys().any(|&id| {
            self.surfaces
                .get(id)
                .is_some_and(|surface| surface.first_committed != Some(transaction))
        })
    }

    /// Applies committed transactions from the head of the queue until one
    /// is blocked. With synchronous buffer import nothing blocks today; the
    /// loop is what keeps ordering honest if that ever changes.
    pub(crate) fn maybe_apply_pending(&mut self) {
        while let Some(&head) = self.queue.front() {
            if self.transaction_blocked(head) {
                break;
            }
            self.queue.pop_front();
            self.apply_transaction(head);
        }
    }

    fn apply_transaction(&mut self, transaction: TransactionId) {
        let Some(mut txn) = self.transactions.remove(transaction) else {
            return;
        };
        debug_assert!(txn.sequence.is_some());
        debug!(txn = ?transaction, sequence = txn.sequence, entries = txn.entries.len(), "applying transaction");

        let mut changed: Vec<SurfaceId> = Vec::new();

        // Hierarchy pre-pass: positions and restacks land first so the
        // ordering below sees the post-placement tree.
        for (&id, entry) in txn.entries.iter_mut() {
            if let Some(position) = entry.position.take() {
                if self.adopt_subsurface_position(id, position) {
                    changed.push(id);
                }
            }
        }
        let mut restacks = Vec::new();
        for (&id, entry) in txn.entries.iter_mut() {
            if let Some(state) = entry.state.as_deref_mut() {
                if !state.placement_ops.is_empty() {
                    restacks.push((id, std::mem::take(&mut state.placement_ops)));
                }
            }
        }
        for (parent, ops) in restacks {
            for op in ops {
                self.apply_placement_op(parent, op);
            }
            changed.push(parent);
        }

        // Ancestors before descendants; unrelated surfaces order by their
        // creation serials, stable across runs.
        let mut order: Vec<(SurfaceId, Entry)> = txn.entries.drain().collect();
        order.sort_by_key(|&(id, _)| self.apply_sort_key(id));

        for (id, entry) in order.iter_mut() {
            if let Some(state) = entry.state.take() {
                if self.apply_surface_state(*id, *state) {
                    changed.push(*id);
                }
            }
        }

        // Resync pass, descendants first: push derived absolute position
        // and map state down, recompute window geometry.
        for (id, _) in order.iter().rev() {
            self.sync_child_states(*id);
        }

        // Advance the chains and drop the entries; the last entry naming a
        // dead surface reaps it.
        for (id, entry) in order.drain(..) {
            if let Some(surface) = self.surfaces.get_mut(id) {
                debug_assert_eq!(surface.first_committed, Some(transaction));
                surface.first_committed = entry.next;
                if entry.next.is_none() {
                    surface.last_committed = None;
                }
                debug_assert!(surface.entry_refs > 0);
                surface.entry_refs = surface.entry_refs.saturating_sub(1);
            }
            self.reap_if_unreferenced(id);
        }

        changed.sort_unstable();
        changed.dedup();
        for id in changed {
            self.repaint.schedule_repaint(id);
        }
    }

    /// `(root serial, depth, own serial)` over the applied tree: ancestors
    /// sort before descendants, everything else falls back to stable
    /// creation order.
    fn apply_sort_key(&self, id: SurfaceId) -> (u64, u32, u64) {
        let own = self.surfaces.get(id).map_or(0, |surface| surface.serial.get());

        let mut root = id;
        let mut depth = 0u32;
        while let Some(parent) = self.surfaces.get(root).and_then(|surface| surface.applied.parent) {
            root = parent;
            depth += 1;
            if depth as usize > self.options.max_tree_depth {
                break;
            }
        }
        let root_serial = self.surfaces.get(root).map_or(0, |surface| surface.serial.get());

        (root_serial, depth, own)
    }

    fn adopt_subsurface_position(&mut self, id: SurfaceId, position: Point) -> bool {
        let Some(sub) = self.surfaces.get_mut(id).and_then(Surface::subsurface_mut) else {
            return false;
        };
        if sub.position == position {
            return false;
        }
        sub.position = position;
        true
    }
}

#[cfg(test)]
mod tests {
    use crate::buffer::BufferBacking;
    use crate::event::Event;
    use crate::state::tests::{engine, importer_log};

    use euclid::size2;

    #[test]
    fn commits_on_one_surface_apply_in_order() {
        let mut patina = engine();
        let id = patina.create_surface(6);

        let first = patina.create_buffer(size2(4, 4), BufferBacking::Direct);
        let second = patina.create_buffer(size2(8, 8), BufferBacking::Direct);

        patina.attach(id, Some(&first), 0, 0).unwrap();
        patina.commit(id).unwrap();
        patina.attach(id, Some(&second), 0, 0).unwrap();
        patina.commit(id).unwrap();

        assert_eq!(patina.surface_size(id), Some(size2(8, 8)));
        assert_eq!(importer_log(&mut patina), vec![first.id(), second.id()]);

        // Replacing the buffer released the first one's use.
        assert_eq!(first.use_count(), 0);
        assert_eq!(second.use_count(), 1);
        assert!(patina
            .drain_events()
            .contains(&Event::BufferReleased { buffer: first.id() }));
    }

    #[test]
    fn empty_commit_changes_nothing() {
        let mut patina = engine();
        let id = patina.create_surface(6);

        patina.commit(id).unwrap();

        assert!(patina.drain_events().is_empty());
        assert_eq!(patina.repaints(), 0);
    }

    /// ```text
    ///        T            one transaction holding {T, A, B}: T lands
    ///      /   \          first, then A and B in creation order.
    ///     A     B
    /// ```
    #[test]
    fn shared_transaction_applies_ancestors_then_creation_order() {
        let mut patina = engine();
        let toplevel = patina.map_test_toplevel();
        let a = patina.create_surface(6);
        let b = patina.create_surface(6);
        patina.get_subsurface(a, toplevel).unwrap();
        patina.get_subsurface(b, toplevel).unwrap();

        let buffer_a = patina.create_buffer(size2(2, 2), BufferBacking::Direct);
        let buffer_b = patina.create_buffer(size2(2, 2), BufferBacking::Direct);
        let buffer_t = patina.create_buffer(size2(2, 2), BufferBacking::Direct);

        patina.attach(a, Some(&buffer_a), 0, 0).unwrap();
        patina.commit(a).unwrap();
        patina.attach(b, Some(&buffer_b), 0, 0).unwrap();
        patina.commit(b).unwrap();

        // Nothing imported while the children are cached.
        assert_eq!(importer_log(&mut patina), vec![]);

        patina.attach(toplevel, Some(&buffer_t), 0, 0).unwrap();
        patina.commit(toplevel).unwrap();

        assert_eq!(
            importer_log(&mut patina),
            vec![buffer_t.id(), buffer_a.id(), buffer_b.id()]
        );
    }

    #[test]
    fn destroying_a_cached_subsurface_discards_its_state() {
        let mut patina = engine();
        let toplevel = patina.map_test_toplevel();
        let child = patina.create_surface(6);
        patina.get_subsurface(child, toplevel).unwrap();

        let buffer = patina.create_buffer(size2(4, 4), BufferBacking::Direct);
        patina.attach(child, Some(&buffer), 0, 0).unwrap();
        let feedback = patina.presentation_feedback(child).unwrap();
        patina.commit(child).unwrap();

        assert_eq!(buffer.use_count(), 1);

        patina.destroy_surface(child).unwrap();

        // The cache was freed, not committed: the buffer never reached the
        // surface and the feedback never reached the screen.
        assert_eq!(buffer.use_count(), 0);
        let events = patina.drain_events();
        assert!(events.contains(&Event::FeedbackDiscarded {
            surface: child,
            feedback,
        }));
        assert!(events.contains(&Event::BufferReleased { buffer: buffer.id() }));
    }
}
