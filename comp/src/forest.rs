//! Generic arena tree used for the subsurface node trees.
//!
//! Nodes are owned by a slotmap and refer to each other through indices, so
//! parent links cannot keep subtrees alive and stale indices fail loudly
//! instead of dangling. A node carries its parent, its previous and next
//! sibling, and the bounds of its child list. Every structural operation is
//! a move: attaching a node that is already linked somewhere detaches it
//! first, subtree included.

use std::ops::{Deref, DerefMut};

use slotmap::{new_key_type, SlotMap};

/// An error from using a [`Forest`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0:?} is not present in the forest")]
    NotPresent(Index),

    #[error("{0:?} has no parent to insert relative to")]
    NoParent(Index),

    #[error("linking would make the forest cyclic")]
    Cycle,
}

new_key_type! {
    /// The index of a node in a [`Forest`].
    ///
    /// This type is raw: modules storing specific node kinds wrap it in
    /// their own index types.
    pub struct Index;
}

#[derive(Debug)]
pub struct Forest<T> {
    inner: SlotMap<Index, Node<T>>,
}

impl<T> Forest<T> {
    pub fn new() -> Self {
        Self {
            inner: SlotMap::with_key(),
        }
    }

    /// Inserts a value into the forest, returning the index of the value.
    ///
    /// The new node has no parent, siblings or children.
    pub fn insert(&mut self, value: T) -> Index {
        self.insert_with(|_| value)
    }

    pub fn insert_with<F>(&mut self, f: F) -> Index
    where
        F: FnOnce(Index) -> T,
    {
        self.inner.insert_with_key(|index| Node {
            value: f(index),
            index,
            parent: None,
            prev: None,
            next: None,
            children: None,
        })
    }

    pub fn get(&self, index: Index) -> Option<&Node<T>> {
        self.inner.get(index)
    }

    pub fn get_mut(&mut self, index: Index) -> Option<&mut Node<T>> {
        self.inner.get_mut(index)
    }

    pub fn contains_index(&self, index: Index) -> bool {
        self.inner.contains_key(index)
    }

    /// Removes the node, returning its value.
    ///
    /// The node's children are detached first and stay in the forest as
    /// roots of their own subtrees.
    pub fn remove(&mut self, index: Index) -> Result<T, Error> {
        self.detach(index)?;

        while let Some(child) = self.get(index).and_then(Node::first_child) {
            self.detach(child)?;
        }

        let node = self.inner.remove(index).unwrap();
        Ok(node.value)
    }

    /// Makes `child` the last child of `parent`, detaching it from its
    /// current position first.
    pub fn append_child(&mut self, parent: Index, child: Index) -> Result<(), Error> {
        self.ensure_present(parent)?;
        self.ensure_present(child)?;
        self.ensure_acyclic(parent, child)?;
        self.detach(child)?;

        let last = Node::last_child(self.get(parent).unwrap());
        self.link(parent, child, last, None);
        Ok(())
    }

    /// Moves `index` directly after `reference` in the child list of
    /// `reference`'s parent. The subtree below `index` moves with it.
    pub fn insert_after(&mut self, reference: Index, index: Index) -> Result<(), Error> {
        self.ensure_present(reference)?;
        self.ensure_present(index)?;

        if reference == index {
            return Err(Error::Cycle);
        }

        let reference_node = self.get(reference).unwrap();
        let parent = Node::parent(reference_node).ok_or(Error::NoParent(reference))?;
        self.ensure_acyclic(parent, index)?;
        self.detach(index)?;

        // The reference's links may have changed if `index` was its sibling.
        let next = Node::next_sibling(self.get(reference).unwrap());
        self.link(parent, index, Some(reference), next);
        Ok(())
    }

    /// Moves `index` directly before `reference` in the child list of
    /// `reference`'s parent. The subtree below `index` moves with it.
    pub fn insert_before(&mut self, reference: Index, index: Index) -> Result<(), Error> {
        self.ensure_present(reference)?;
        self.ensure_present(index)?;

        if reference == index {
            return Err(Error::Cycle);
        }

        let reference_node = self.get(reference).unwrap();
        let parent = Node::parent(reference_node).ok_or(Error::NoParent(reference))?;
        self.ensure_acyclic(parent, index)?;
        self.detach(index)?;

        let prev = Node::prev_sibling(self.get(reference).unwrap());
        self.link(parent, index, prev, Some(reference));
        Ok(())
    }

    /// Detaches the node from its parent and siblings.
    ///
    /// The children of the node are not detached. Detaching a root is a
    /// no-op.
    pub fn detach(&mut self, index: Index) -> Result<(), Error> {
        self.ensure_present(index)?;

        let node = self.get_mut(index).unwrap();
        let parent = node.parent.take();
        let prev = node.prev.take();
        let next = node.next.take();

        if let Some(prev) = prev {
            self.get_mut(prev).unwrap().next = next;
        }

        if let Some(next) = next {
            self.get_mut(next).unwrap().prev = prev;
        }

        if let Some(parent) = parent {
            let parent_node = self.get_mut(parent).unwrap();

            parent_node.children = match parent_node.children {
                Some((first, last)) if first == index && last == index => None,
                Some((first, last)) if first == index => Some((next.unwrap(), last)),
                Some((first, last)) if last == index => Some((first, prev.unwrap())),
                bounds => bounds,
            };
        }

        Ok(())
    }

    pub fn preorder_traverse(&self, index: Index) -> Option<PreorderTraverse<'_, T>> {
        if !self.contains_index(index) {
            return None;
        }

        Some(PreorderTraverse {
            forest: self,
            root: index,
            next: Some(Edge::Enter(index)),
        })
    }

    /// Iterates the indices of the subtree rooted at `index` in descending
    /// depth-first order, `index` itself first.
    pub fn dfs_descend(&self, index: Index) -> Option<DfsDescend<'_, T>> {
        self.preorder_traverse(index).map(DfsDescend)
    }

    pub fn children(&self, index: Index) -> Children<'_, T> {
        let (first, last) = self
            .get(index)
            .map(|node| (Node::first_child(node), Node::last_child(node)))
            .unzip();

        Children {
            forest: self,
            next: first.flatten(),
            last: last.flatten(),
        }
    }

    /// Links a detached `index` under `parent` between `prev` and `next`.
    ///
    /// `prev` and `next` must be adjacent children of `parent` (or the
    /// respective end of the child list when `None`).
    fn link(&mut self, parent: Index, index: Index, prev: Option<Index>, next: Option<Index>) {
        {
            let node = self.get_mut(index).unwrap();
            node.parent = Some(parent);
            node.prev = prev;
            node.next = next;
        }

        if let Some(prev) = prev {
            self.get_mut(prev).unwrap().next = Some(index);
        }

        if let Some(next) = next {
            self.get_mut(next).unwrap().prev = Some(index);
        }

        let parent_node = self.get_mut(parent).unwrap();
        parent_node.children = match parent_node.children {
            None => Some((index, index)),
            Some((first, last)) => Some((
                if next == Some(first) { index } else { first },
                if prev == Some(last) { index } else { last },
            )),
        };
    }

    fn ensure_present(&self, index: Index) -> Result<(), Error> {
        if !self.contains_index(index) {
            return Err(Error::NotPresent(index));
        }

        Ok(())
    }

    /// Walks up from `parent` to its root; finding `inserting` on the way
    /// means `inserting` would become its own ancestor.
    fn ensure_acyclic(&self, parent: Index, inserting: Index) -> Result<(), Error> {
        let mut current = Some(parent);

        while let Some(index) = current {
            if index == inserting {
                return Err(Error::Cycle);
            }

            current = Node::parent(self.get(index).unwrap());
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct Node<T> {
    value: T,
    index: Index,
    parent: Option<Index>,
    prev: Option<Index>,
    next: Option<Index>,
    /// The first and last children of the node, in that order.
    children: Option<(Index, Index)>,
}

// Accessors take `self_` so they cannot shadow methods of the value type
// reachable through `Deref`.
impl<T> Node<T> {
    /// ```
    /// use patina_comp::forest::{Forest, Node};
    ///
    /// let mut forest = Forest::new();
    /// let index = forest.insert(());
    ///
    /// let node = forest.get(index).unwrap();
    /// assert_eq!(index, Node::index(node));
    /// ```
    pub fn index(self_: &Self) -> Index {
        self_.index
    }

    pub fn parent(self_: &Self) -> Option<Index> {
        self_.parent
    }

    pub fn prev_sibling(self_: &Self) -> Option<Index> {
        self_.prev
    }

    pub fn next_sibling(self_: &Self) -> Option<Index> {
        self_.next
    }

    pub fn first_child(self_: &Self) -> Option<Index> {
        self_.children.map(|(first, _)| first)
    }

    pub fn last_child(self_: &Self) -> Option<Index> {
        self_.children.map(|(_, last)| last)
    }
}

impl<T> Deref for Node<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T> DerefMut for Node<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

/// Marks whether a traversal is entering or leaving a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    /// The node is entered, before any of its children.
    Enter(Index),

    /// The node is left, after all of its children.
    Leave(Index),
}

/// A pre-order depth first iterator over nodes in a [`Forest`], yielding an
/// [`Edge`] on both sides of every node.
pub struct PreorderTraverse<'f, T> {
    forest: &'f Forest<T>,
    root: Index,
    next: Option<Edge>,
}

impl<T> PreorderTraverse<'_, T> {
    fn advance(&self, current: Edge) -> Option<Edge> {
        match current {
            // Descend into the first child if there is one.
            Edge::Enter(index) => match Node::first_child(self.forest.get(index).unwrap()) {
                Some(first_child) => Some(Edge::Enter(first_child)),
                None => Some(Edge::Leave(index)),
            },

            // Move over to the next sibling, or back up to the parent.
            Edge::Leave(index) => {
                if index == self.root {
                    return None;
                }

                let node = self.forest.get(index).unwrap();

                match Node::next_sibling(node) {
                    Some(next_sibling) => Some(Edge::Enter(next_sibling)),
                    None => node.parent.map(Edge::Leave),
                }
            }
        }
    }
}

impl<T> Iterator for PreorderTraverse<'_, T> {
    type Item = Edge;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.next.take()?;
        self.next = self.advance(next);
        Some(next)
    }
}

impl<T> Clone for PreorderTraverse<'_, T> {
    fn clone(&self) -> Self {
        Self {
            forest: self.forest,
            root: self.root,
            next: self.next,
        }
    }
}

pub struct DfsDescend<'f, T>(PreorderTraverse<'f, T>);

impl<T> Iterator for DfsDescend<'_, T> {
    type Item = Index;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.find_map(|edge| match edge {
            Edge::Enter(index) => Some(index),
            Edge::Leave(_) => None,
        })
    }
}

impl<T> Clone for DfsDescend<'_, T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[derive(Clone)]
pub struct Children<'f, T> {
    forest: &'f Forest<T>,
    next: Option<Index>,
    last: Option<Index>,
}

impl<T> Iterator for Children<'_, T> {
    type Item = Index;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.next.take()?;

        if Some(next) != self.last {
            self.next = Node::next_sibling(self.forest.get(next).unwrap());
        }

        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::{Edge, Error, Forest, Node};

    /// Ensure a node cannot become its own child.
    #[test]
    fn self_cyclic_node() {
        let mut forest = Forest::new();
        let a = forest.insert(());

        assert!(matches!(forest.append_child(a, a), Err(Error::Cycle)));
    }

    /// Ensure a node does not form a parent-child loop, directly or through
    /// a deeper ancestor.
    #[test]
    fn ancestor_cycle() {
        let mut forest = Forest::new();
        let a = forest.insert(());
        let b = forest.insert(());
        let c = forest.insert(());

        // a -> b -> c
        forest.append_child(a, b).unwrap();
        forest.append_child(b, c).unwrap();

        assert!(matches!(forest.append_child(b, a), Err(Error::Cycle)));
        assert!(matches!(forest.append_child(c, a), Err(Error::Cycle)));
        assert!(matches!(forest.insert_after(c, a), Err(Error::Cycle)));
    }

    /// a -> b -> c
    #[test]
    fn preorder_traverse_line() {
        let mut forest = Forest::new();
        let a = forest.insert(0);
        let b = forest.insert(1);
        let c = forest.insert(2);

        forest.append_child(a, b).unwrap();
        forest.append_child(b, c).unwrap();

        let mut iter = forest.preorder_traverse(a).unwrap();
        assert_eq!(iter.next(), Some(Edge::Enter(a)));
        assert_eq!(iter.next(), Some(Edge::Enter(b)));
        assert_eq!(iter.next(), Some(Edge::Enter(c)));
        assert_eq!(iter.next(), Some(Edge::Leave(c)));
        assert_eq!(iter.next(), Some(Edge::Leave(b)));
        assert_eq!(iter.next(), Some(Edge::Leave(a)));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn triangle() {
        let mut forest = Forest::new();
        let a = forest.insert(0);
        let b = forest.insert(1);
        let c = forest.insert(2);

        //    a
        //  /   \
        // b <-> c
        forest.append_child(a, b).unwrap();
        forest.append_child(a, c).unwrap();

        let node_a = forest.get(a).unwrap();
        assert_eq!(Node::first_child(node_a), Some(b));
        assert_eq!(Node::last_child(node_a), Some(c));

        let node_b = forest.get(b).unwrap();
        assert_eq!(Node::parent(node_b), Some(a));
        assert_eq!(Node::prev_sibling(node_b), None);
        assert_eq!(Node::next_sibling(node_b), Some(c));

        let node_c = forest.get(c).unwrap();
        assert_eq!(Node::parent(node_c), Some(a));
        assert_eq!(Node::prev_sibling(node_c), Some(b));
        assert_eq!(Node::next_sibling(node_c), None);

        let children: Vec<_> = forest.children(a).collect();
        assert_eq!(children, [b, c]);
    }

    /// Detaching from the middle of a child list relinks the remaining
    /// siblings on both sides.
    #[test]
    fn detach_relinks_siblings() {
        let mut forest = Forest::new();
        let root = forest.insert(());
        let a = forest.insert(());
        let b = forest.insert(());
        let c = forest.insert(());

        forest.append_child(root, a).unwrap();
        forest.append_child(root, b).unwrap();
        forest.append_child(root, c).unwrap();

        forest.detach(b).unwrap();

        let children: Vec<_> = forest.children(root).collect();
        assert_eq!(children, [a, c]);

        let node_a = forest.get(a).unwrap();
        assert_eq!(Node::next_sibling(node_a), Some(c));
        let node_c = forest.get(c).unwrap();
        assert_eq!(Node::prev_sibling(node_c), Some(a));

        let node_b = forest.get(b).unwrap();
        assert_eq!(Node::parent(node_b), None);
        assert_eq!(Node::prev_sibling(node_b), None);
        assert_eq!(Node::next_sibling(node_b), None);

        // Detaching the last remaining children clears the bounds.
        forest.detach(a).unwrap();
        forest.detach(c).unwrap();
        assert_eq!(forest.children(root).count(), 0);
    }

    /// Relative insertion works at both ends and in the middle, and moves
    /// already-linked nodes instead of duplicating them.
    ///
    ///        root
    ///    /    |    \
    ///   a <-> b <-> c
    #[test]
    fn insert_relative() {
        let mut forest = Forest::new();
        let root = forest.insert(());
        let a = forest.insert(());
        let b = forest.insert(());
        let c = forest.insert(());

        forest.append_child(root, a).unwrap();
        forest.append_child(root, b).unwrap();
        forest.append_child(root, c).unwrap();

        // Move c below a: [c, a, b]
        forest.insert_before(a, c).unwrap();
        let children: Vec<_> = forest.children(root).collect();
        assert_eq!(children, [c, a, b]);

        // Move c above a: [a, c, b]
        forest.insert_after(a, c).unwrap();
        let children: Vec<_> = forest.children(root).collect();
        assert_eq!(children, [a, c, b]);

        // Move b above itself is rejected, relative to a detached node too.
        assert!(matches!(forest.insert_after(b, b), Err(Error::Cycle)));
        let detached = forest.insert(());
        assert!(matches!(
            forest.insert_after(detached, b),
            Err(Error::NoParent(_))
        ));

        // End bounds stay coherent after the splices.
        let node_root = forest.get(root).unwrap();
        assert_eq!(Node::first_child(node_root), Some(a));
        assert_eq!(Node::last_child(node_root), Some(b));
    }

    /// A subtree moves with its root across parents.
    #[test]
    fn subtree_moves_with_root() {
        let mut forest = Forest::new();
        let p = forest.insert("p");
        let q = forest.insert("q");
        let child = forest.insert("child");
        let grandchild = forest.insert("grandchild");

        forest.append_child(p, child).unwrap();
        forest.append_child(child, grandchild).unwrap();

        forest.append_child(q, child).unwrap();

        assert_eq!(forest.children(p).count(), 0);
        let descendants: Vec<_> = forest.dfs_descend(q).unwrap().collect();
        assert_eq!(descendants, [q, child, grandchild]);
    }

    /// Removing a node detaches its children rather than leaking links to a
    /// freed index.
    #[test]
    fn remove_detaches_children() {
        let mut forest = Forest::new();
        let a = forest.insert(0);
        let b = forest.insert(1);
        let c = forest.insert(2);

        forest.append_child(a, b).unwrap();
        forest.append_child(a, c).unwrap();

        assert_eq!(forest.remove(a).unwrap(), 0);

        let node_b = forest.get(b).unwrap();
        assert_eq!(Node::parent(node_b), None);
        assert_eq!(Node::next_sibling(node_b), None);

        let node_c = forest.get(c).unwrap();
        assert_eq!(Node::parent(node_c), None);
        assert_eq!(Node::prev_sibling(node_c), None);
    }
}
