//! Subsurface trees and the synchronization cascade.
//!
//! Every surface keeps two node trees: the committed tree changes as soon
//! as requests come in, the applied tree only moves when a transaction
//! lands. Each surface contributes a branch and a leaf per tree:
//!
//! ```text
//!                Branch(p)
//!               /    |    \
//!         Leaf(p) Branch(a) Branch(b)      back to front
//!                    |
//!                 Leaf(a)
//! ```
//!
//! A branch holds the surface's whole subtree; the leaf marks where the
//! surface's own content sits among its children. Stacking a child below
//! its parent therefore means splicing the child's branch before the
//! parent's leaf, and a renderer gets its paint order by collecting leaves
//! in preorder.

use std::collections::VecDeque;

use tracing::debug;

use crate::{
    error::ProtocolError,
    forest::{Index, Node},
    geometry::{LogicalRect, Point},
    role::Role,
    state::Patina,
    surface::{Surface, SurfaceId},
    transaction::{Transaction, TransactionId},
};

/// What a node in a subsurface tree stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TreeNode {
    /// A surface's subtree: its leaf plus the branches of its children,
    /// back to front.
    Branch(SurfaceId),
    /// A surface's own content within its branch.
    Leaf(SurfaceId),
}

impl TreeNode {
    pub(crate) fn surface(self) -> SurfaceId {
        match self {
            TreeNode::Branch(id) | TreeNode::Leaf(id) => id,
        }
    }
}

/// Role bookkeeping for a surface linked under another.
///
/// The role outlives the control handle: once a subsurface, always a
/// subsurface. `handle_alive` tracks the handle itself; an orphaned
/// surface keeps the role slot and may be given a fresh handle and a new
/// parent later.
#[derive(Debug)]
pub struct SubsurfaceRole {
    /// Position relative to the parent, as last applied.
    pub position: Point,
    /// The surface's own synchronization flag. The effective mode also
    /// depends on its ancestors.
    pub synchronous: bool,
    /// State committed while synchronized, waiting on the parent.
    pub cached: Option<TransactionId>,
    /// Whether the control handle still exists.
    pub handle_alive: bool,
}

impl SubsurfaceRole {
    pub(crate) fn new() -> Self {
        SubsurfaceRole {
            position: Point::zero(),
            synchronous: true,
            cached: None,
            handle_alive: true,
        }
    }
}

/// Where to splice a subsurface relative to its reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    Above,
    Below,
}

/// A queued restack of `subsurface`.
///
/// `sibling` is the shared parent itself when stacking against the
/// parent's own content, and `None` to unlink the subsurface from the
/// tree entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementOp {
    pub(crate) placement: Placement,
    pub(crate) subsurface: SurfaceId,
    pub(crate) sibling: Option<SurfaceId>,
}

impl Patina {
    /// Makes `id` a subsurface of `parent`.
    ///
    /// The new subsurface starts out synchronized and stacked on top of
    /// the parent's other children. A surface that lost its handle
    /// earlier may be adopted again, by any parent.
    pub fn get_subsurface(&mut self, id: SurfaceId, parent: SurfaceId) -> Result<(), ProtocolError> {
        self.surface(parent)?;

        match self.surface(id)?.role() {
            None => {}
            Some(Role::Subsurface(sub)) if !sub.handle_alive => {}
            Some(Role::Subsurface(_)) => return Err(ProtocolError::SubsurfaceExists(id)),
            Some(role) => {
                return Err(ProtocolError::RoleTaken {
                    surface: id,
                    existing: role.name(),
                })
            }
        }

        // The new link must not close a loop, and the chain must stay
        // short enough for the parent walks during apply.
        let mut depth = 1_usize;
        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current == id {
                return Err(ProtocolError::CircularHierarchy { surface: id, parent });
            }
            if depth >= self.options.max_tree_depth {
                return Err(ProtocolError::NestingTooDeep {
                    surface: id,
                    limit: self.options.max_tree_depth,
                });
            }
            depth += 1;
            cursor = self
                .surfaces
                .get(current)
                .and_then(|surface| surface.committed.parent);
        }

        {
            let surface = self.surface_mut(id)?;
            match surface.role.as_mut() {
                Some(Role::Subsurface(sub)) => {
                    sub.handle_alive = true;
                    sub.synchronous = true;
                    sub.position = Point::zero();
                }
                _ => surface.role = Some(Role::Subsurface(SubsurfaceRole::new())),
            }
            surface.committed.parent = Some(parent);
        }

        // Stack on top, above the parent's topmost committed entry (the
        // parent's own content when there are no other children). The
        // committed tree changes right away; the applied tree follows
        // when the parent's state lands.
        let sibling = self.topmost_committed_entry(parent);
        let op = PlacementOp {
            placement: Placement::Above,
            subsurface: id,
            sibling: Some(sibling),
        };
        self.splice_committed(parent, op);
        self.surface_mut(parent)?.pending.placement_ops.push(op);

        debug!(?id, ?parent, "created subsurface");
        Ok(())
    }

    /// Destroys the subsurface handle of `id`.
    ///
    /// The surface is permanently unmapped: it leaves both trees and its
    /// content will not come back, but the role slot stays occupied and
    /// the surface itself lives on.
    pub fn subsurface_destroy(&mut self, id: SurfaceId) -> Result<(), ProtocolError> {
        if !self.surface(id)?.subsurface().map_or(false, |sub| sub.handle_alive) {
            return Err(ProtocolError::NotASubsurface(id));
        }

        self.permanently_unmap(id);
        if let Some(sub) = self.surface_mut(id)?.subsurface_mut() {
            sub.handle_alive = false;
        }
        debug!(?id, "destroyed subsurface handle");
        Ok(())
    }

    /// Schedules a new position for the subsurface, relative to its
    /// parent. Like the rest of a subsurface's placement this is parent
    /// state: it lands when the parent's state applies.
    pub fn set_position(&mut self, id: SurfaceId, x: i32, y: i32) -> Result<(), ProtocolError> {
        if !self.surface(id)?.subsurface().map_or(false, |sub| sub.handle_alive) {
            return Err(ProtocolError::NotASubsurface(id));
        }

        let transaction = self.ensure_cached_transaction(id);
        self.stage_entry_position(transaction, id, Point::new(x, y));
        Ok(())
    }

    /// Stacks `id` directly above `sibling` when the parent's state next
    /// applies. The protocol-visible order changes immediately.
    pub fn place_above(&mut self, id: SurfaceId, sibling: SurfaceId) -> Result<(), ProtocolError> {
        self.place(id, sibling, Placement::Above)
    }

    /// Stacks `id` directly below `sibling` when the parent's state next
    /// applies. The protocol-visible order changes immediately.
    pub fn place_below(&mut self, id: SurfaceId, sibling: SurfaceId) -> Result<(), ProtocolError> {
        self.place(id, sibling, Placement::Below)
    }

    fn place(&mut self, id: SurfaceId, sibling: SurfaceId, placement: Placement) -> Result<(), ProtocolError> {
        if !self.surface(id)?.subsurface().map_or(false, |sub| sub.handle_alive) {
            return Err(ProtocolError::NotASubsurface(id));
        }

        // The reference must be the parent itself or share it with `id`.
        let Some(parent) = self
            .surfaces
            .get(id)
            .and_then(|surface| surface.committed.parent)
        else {
            return Err(ProtocolError::InvalidSibling { subsurface: id, sibling });
        };
        let related = sibling != id
            && (sibling == parent
                || self
                    .surface(sibling)
                    .map_or(false, |surface| surface.committed.parent == Some(parent)));
        if !related {
            return Err(ProtocolError::InvalidSibling { subsurface: id, sibling });
        }

        let op = PlacementOp {
            placement,
            subsurface: id,
            sibling: Some(sibling),
        };
        self.splice_committed(parent, op);
        self.surface_mut(parent)?.pending.placement_ops.push(op);

        debug!(?id, ?sibling, ?placement, "restacked subsurface");
        Ok(())
    }

    /// Puts the subsurface in synchronized mode: its commits go to its
    /// cache until the parent's state lands.
    pub fn set_sync(&mut self, id: SurfaceId) -> Result<(), ProtocolError> {
        match self.surface_mut(id)?.subsurface_mut() {
            Some(sub) if sub.handle_alive => {
                sub.synchronous = true;
                Ok(())
            }
            _ => Err(ProtocolError::NotASubsurface(id)),
        }
    }

    /// Puts the subsurface in desynchronized mode.
    ///
    /// If no ancestor keeps it synchronized this flushes the cascade:
    /// the surface's cache commits right away, and so do the caches of
    /// descendants that were only waiting on it.
    pub fn set_desync(&mut self, id: SurfaceId) -> Result<(), ProtocolError> {
        match self.surface_mut(id)?.subsurface_mut() {
            Some(sub) if sub.handle_alive => sub.synchronous = false,
            _ => return Err(ProtocolError::NotASubsurface(id)),
        }

        if !self.is_effectively_synchronized(id) {
            self.flush_cached(id);
        }
        Ok(())
    }

    /// Commits the cached transactions of `root` and every descendant no
    /// longer held back, top down. The descent stops at children that ask
    /// for synchronization themselves.
    fn flush_cached(&mut self, root: SurfaceId) {
        let mut pending = VecDeque::from([root]);
        while let Some(id) = pending.pop_front() {
            let Some(sub) = self.surfaces.get(id).and_then(Surface::subsurface) else {
                continue;
            };
            if sub.synchronous {
                continue;
            }

            if let Some(cached) = self
                .surfaces
                .get_mut(id)
                .and_then(Surface::subsurface_mut)
                .and_then(|sub| sub.cached.take())
            {
                self.commit_transaction(cached);
            }
            pending.extend(self.committed_children(id));
        }
    }

    /// Whether commits on `id` are deferred by subsurface
    /// synchronization.
    ///
    /// True when the surface's own flag says so or any ancestor's does.
    /// An orphaned subsurface counts as synchronized: its state keeps
    /// caching with nowhere to go.
    pub fn is_effectively_synchronized(&self, id: SurfaceId) -> bool {
        let mut cursor = id;
        let mut steps = 0_usize;
        loop {
            let Some(surface) = self.surfaces.get(cursor) else {
                return false;
            };
            let Some(sub) = surface.subsurface() else {
                return false;
            };
            if sub.synchronous {
                return true;
            }
            match surface.committed.parent {
                Some(parent) => cursor = parent,
                None => return true,
            }
            steps += 1;
            if steps > self.options.max_tree_depth {
                return true;
            }
        }
    }

    /// The parent `id` is linked under, as the client sees it.
    pub fn committed_parent(&self, id: SurfaceId) -> Option<SurfaceId> {
        self.surfaces.get(id).and_then(|surface| surface.committed.parent)
    }

    /// The parent `id` is shown under, as of the last applied state.
    pub fn applied_parent(&self, id: SurfaceId) -> Option<SurfaceId> {
        self.surfaces.get(id).and_then(|surface| surface.applied.parent)
    }

    /// The committed subsurfaces of `id`, bottom to top.
    pub fn subsurfaces_of(&self, id: SurfaceId) -> Vec<SurfaceId> {
        self.committed_children(id)
    }

    /// The surfaces a renderer would paint for the tree rooted at
    /// `root`, bottom to top. Content that is not mapped is skipped.
    pub fn paint_order(&self, root: SurfaceId) -> Vec<SurfaceId> {
        let Some(surface) = self.surfaces.get(root) else {
            return Vec::new();
        };
        let Some(descend) = self.forest.dfs_descend(surface.applied.branch) else {
            return Vec::new();
        };

        descend
            .filter_map(|index| match self.forest.get(index).map(|node| **node) {
                Some(TreeNode::Leaf(id))
                    if self.surfaces.get(id).map_or(false, |surface| surface.mapped) =>
                {
                    Some(id)
                }
                _ => None,
            })
            .collect()
    }

    pub(crate) fn committed_children(&self, id: SurfaceId) -> Vec<SurfaceId> {
        match self.surfaces.get(id) {
            Some(surface) => self.branch_children(surface.committed.branch),
            None => Vec::new(),
        }
    }

    pub(crate) fn applied_children(&self, id: SurfaceId) -> Vec<SurfaceId> {
        match self.surfaces.get(id) {
            Some(surface) => self.branch_children(surface.applied.branch),
            None => Vec::new(),
        }
    }

    /// The surfaces whose branches hang off `branch`, bottom to top,
    /// skipping the owner's own leaf.
    fn branch_children(&self, branch: Index) -> Vec<SurfaceId> {
        self.forest
            .children(branch)
            .filter_map(|index| match self.forest.get(index).map(|node| **node) {
                Some(TreeNode::Branch(id)) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// The surface owning the topmost node of `parent`'s committed
    /// branch, `parent` itself when only its own content is there.
    fn topmost_committed_entry(&self, parent: SurfaceId) -> SurfaceId {
        self.surfaces
            .get(parent)
            .and_then(|surface| self.forest.get(surface.committed.branch))
            .and_then(Node::last_child)
            .and_then(|last| self.forest.get(last))
            .map_or(parent, |node| node.surface())
    }

    /// Splices the committed branch of `op.subsurface` to where the op
    /// says. The client-visible order changes at request time; the
    /// applied tree follows when the op's transaction lands.
    fn splice_committed(&mut self, parent: SurfaceId, op: PlacementOp) {
        let Some(branch) = self
            .surfaces
            .get(op.subsurface)
            .map(|surface| surface.committed.branch)
        else {
            return;
        };
        let Some(sibling) = op.sibling else {
            let detached = self.forest.detach(branch);
            debug_assert!(detached.is_ok());
            return;
        };
        let Some(reference) = self.committed_reference(parent, sibling) else {
            return;
        };

        let spliced = match op.placement {
            Placement::Above => self.forest.insert_after(reference, branch),
            Placement::Below => self.forest.insert_before(reference, branch),
        };
        debug_assert!(spliced.is_ok());
    }

    /// The committed-tree node a restack against `sibling` refers to:
    /// the parent's own leaf, or the sibling's whole branch.
    fn committed_reference(&self, parent: SurfaceId, sibling: SurfaceId) -> Option<Index> {
        let surface = self.surfaces.get(sibling)?;
        Some(if sibling == parent {
            surface.committed.leaf
        } else {
            surface.committed.branch
        })
    }

    /// Replays a restack in the applied tree.
    ///
    /// Ops hold ids, not nodes, so a subsurface that left the parent (or
    /// a reference that went away) since the op was queued degrades
    /// gracefully instead of corrupting the tree.
    pub(crate) fn apply_placement_op(&mut self, parent: SurfaceId, op: PlacementOp) {
        let Some(surface) = self.surfaces.get(op.subsurface) else {
            return;
        };
        // A restack is stale once the subsurface left this parent;
        // unlinks always go through.
        if op.sibling.is_some() && surface.committed.parent != Some(parent) {
            return;
        }
        let branch = surface.applied.branch;

        let detached = self.forest.detach(branch);
        debug_assert!(detached.is_ok());

        let Some(sibling) = op.sibling else {
            if let Some(surface) = self.surfaces.get_mut(op.subsurface) {
                surface.applied.parent = None;
            }
            return;
        };

        let reference = self.surfaces.get(sibling).map(|surface| {
            if sibling == parent {
                surface.applied.leaf
            } else {
                surface.applied.branch
            }
        });
        let linked = match reference {
            Some(reference) => match op.placement {
                Placement::Above => self.forest.insert_after(reference, branch).is_ok(),
                Placement::Below => self.forest.insert_before(reference, branch).is_ok(),
            },
            None => false,
        };
        // The reference is gone or detached; keep the subsurface in the
        // tree by stacking it topmost.
        let linked = linked
            || match self.surfaces.get(parent).map(|surface| surface.applied.branch) {
                Some(top) => self.forest.append_child(top, branch).is_ok(),
                None => false,
            };

        if let Some(surface) = self.surfaces.get_mut(op.subsurface) {
            surface.applied.parent = if linked { Some(parent) } else { None };
        }
    }

    /// Pushes derived state down the applied subtree of `id`: absolute
    /// positions, the mapped flag, and the aggregate geometry of the
    /// tree's shell root.
    ///
    /// Runs after every state application, ancestors last, so a surface
    /// whose parent moved in the same transaction settles once the
    /// parent's pass runs.
    pub(crate) fn sync_child_states(&mut self, id: SurfaceId) {
        let mut pending = VecDeque::from([id]);
        while let Some(current) = pending.pop_front() {
            let (mapped, position) = self.derive_presentation(current);
            if let Some(surface) = self.surfaces.get_mut(current) {
                surface.mapped = mapped;
                surface.position = position;
            }
            pending.extend(self.applied_children(current));
        }

        let root = self.applied_root(id);
        let geometry = self.aggregate_geometry(root);
        if let Some(window) = self
            .surfaces
            .get_mut(root)
            .and_then(|surface| surface.role.as_mut())
            .and_then(Role::window_mut)
        {
            window.set_geometry(geometry);
        }
    }

    /// What the applied trees say about one surface: whether it is shown
    /// and where, relative to the tree's root.
    fn derive_presentation(&self, id: SurfaceId) -> (bool, Point) {
        let Some(surface) = self.surfaces.get(id) else {
            return (false, Point::zero());
        };

        if let Some(parent) = surface.applied.parent {
            let (parent_mapped, origin) = self
                .surfaces
                .get(parent)
                .map_or((false, Point::zero()), |parent| (parent.mapped, parent.position));
            let position = surface.subsurface().map_or(Point::zero(), |sub| sub.position);
            let mapped = parent_mapped && surface.alive && surface.buffer.is_some();
            return (mapped, origin + position.to_vector());
        }

        let mapped = surface.alive
            && match surface.role.as_ref() {
                Some(Role::Toplevel(window)) => window.is_mapped(),
                Some(Role::Popup(popup)) => popup.window.is_mapped(),
                Some(Role::Cursor) => surface.buffer.is_some(),
                // An orphaned subsurface stays unmapped for good.
                Some(Role::Subsurface(_)) | None => false,
            };
        (mapped, Point::zero())
    }

    fn applied_root(&self, id: SurfaceId) -> SurfaceId {
        let mut current = id;
        let mut steps = 0_usize;
        while let Some(parent) = self
            .surfaces
            .get(current)
            .and_then(|surface| surface.applied.parent)
        {
            current = parent;
            steps += 1;
            if steps > self.options.max_tree_depth {
                break;
            }
        }
        current
    }

    /// Unions the extents of everything with content in `root`'s applied
    /// tree. `None` when no surface has a buffer.
    fn aggregate_geometry(&self, root: SurfaceId) -> Option<LogicalRect> {
        let mut geometry: Option<LogicalRect> = None;
        let mut pending = VecDeque::from([(root, Point::zero())]);
        while let Some((id, origin)) = pending.pop_front() {
            let Some(surface) = self.surfaces.get(id) else {
                continue;
            };
            let position = origin
                + surface
                    .subsurface()
                    .map_or(Point::zero(), |sub| sub.position)
                    .to_vector();
            if surface.buffer.is_some() {
                if let Some(size) = surface.size() {
                    let rect = LogicalRect::new(position, size);
                    geometry = Some(geometry.map_or(rect, |whole| whole.union(&rect)));
                }
            }
            for child in self.applied_children(id) {
                pending.push_back((child, position));
            }
        }
        geometry
    }

    /// Removes `id` from its parent's trees for good: the content
    /// disappears, the position resets, and every trace of the
    /// subsurface is scrubbed from caches up the chain. The role slot
    /// stays.
    pub(crate) fn permanently_unmap(&mut self, id: SurfaceId) {
        let Some(parent) = self
            .surfaces
            .get(id)
            .and_then(|surface| surface.committed.parent)
        else {
            return;
        };

        // Leaving the applied tree goes through a transaction of its
        // own, so the disappearance stays atomic with whatever else is
        // in flight.
        let op = PlacementOp {
            placement: Placement::Below,
            subsurface: id,
            sibling: None,
        };
        let transaction = self.transactions.insert(Transaction::default());
        self.push_entry_placement_op(transaction, parent, op);
        self.stage_entry_position(transaction, id, Point::zero());
        self.commit_transaction(transaction);

        // The surface's own cache is where `set_position` stages, and the
        // parent's pending state may still hold restacks referencing the
        // surface; scrub both so a revival starts from a clean slate.
        if let Some(cached) = self
            .surfaces
            .get(id)
            .and_then(Surface::subsurface)
            .and_then(|sub| sub.cached)
        {
            self.drop_subsurface_state(cached, id, parent);
        }
        if let Some(surface) = self.surfaces.get_mut(parent) {
            surface
                .pending
                .placement_ops
                .retain(|op| op.subsurface != id && op.sibling != Some(id));
        }

        // Ancestor caches may still hold the surface's position or
        // restacks naming it; scrub those so a later commit cannot
        // resurrect it.
        let mut cursor = Some(parent);
        let mut steps = 0_usize;
        while let Some(current) = cursor {
            let Some(surface) = self.surfaces.get(current) else {
                break;
            };
            let cached = surface.subsurface().and_then(|sub| sub.cached);
            let next = surface.committed.parent;
            if let Some(cached) = cached {
                self.drop_subsurface_state(cached, id, parent);
            }
            cursor = next;
            steps += 1;
            if steps > self.options.max_tree_depth {
                break;
            }
        }

        let Some(surface) = self.surfaces.get_mut(id) else {
            return;
        };
        surface.committed.parent = None;
        let branch = surface.committed.branch;
        let detached = self.forest.detach(branch);
        debug_assert!(detached.is_ok());

        debug!(?id, ?parent, "permanently unmapped subsurface");
    }
}
