//! Client buffers, their use counting, and the importer seam.
//!
//! A [`Buffer`] is the engine-side record of a client pixel source. The
//! engine never touches pixels; turning a buffer into something the
//! renderer can sample is the [`BufferImporter`]'s job, producing a
//! [`Texture`].
//!
//! Use counting is carried by [`BufferUse`] tokens rather than paired
//! increment/decrement calls: creating a token takes a use, dropping it
//! returns the use, and when the last one drops the buffer id is queued so
//! the embedder can send `wl_buffer.release`. State buffers and surfaces
//! own tokens, so a use travels with the state it belongs to.

use std::{
    cell::{Cell, RefCell},
    num::NonZeroU64,
    rc::Rc,
};

use downcast_rs::{impl_downcast, Downcast};

use crate::geometry::BufferSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub NonZeroU64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub NonZeroU64);

/// Buffer ids whose last use dropped, awaiting a `wl_buffer.release`.
pub(crate) type Releases = Rc<RefCell<Vec<BufferId>>>;

/// How the contents of a buffer reach the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferBacking {
    /// Contents are copied out when the buffer is realized (shm style);
    /// the client gets the buffer back right after apply.
    Copied,

    /// Contents are sampled in place (dma-buf style); the surface keeps a
    /// use on the buffer for as long as it is displayed.
    Direct,
}

#[derive(Debug)]
pub struct Buffer {
    id: BufferId,
    size: BufferSize,
    backing: BufferBacking,
    use_count: Cell<u32>,
    /// Whether the client-side buffer object still exists. Releases are
    /// only announced for live objects.
    resource_alive: Cell<bool>,
    releases: Releases,
}

impl Buffer {
    pub(crate) fn new(id: BufferId, size: BufferSize, backing: BufferBacking, releases: Releases) -> Rc<Self> {
        Rc::new(Self {
            id,
            size,
            backing,
            use_count: Cell::new(0),
            resource_alive: Cell::new(true),
            releases,
        })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn size(&self) -> BufferSize {
        self.size
    }

    pub fn backing(&self) -> BufferBacking {
        self.backing
    }

    /// The number of engine-side uses currently keeping this buffer from
    /// the client.
    pub fn use_count(&self) -> u32 {
        self.use_count.get()
    }

    pub fn is_destroyed(&self) -> bool {
        !self.resource_alive.get()
    }

    pub(crate) fn mark_destroyed(&self) {
        self.resource_alive.set(false);
    }
}

/// An owned use of a [`Buffer`].
///
/// Holding one keeps the buffer out of the client's hands; dropping the
/// last one queues the release notification.
#[derive(Debug)]
pub struct BufferUse {
    buffer: Rc<Buffer>,
}

impl BufferUse {
    pub(crate) fn acquire(buffer: &Rc<Buffer>) -> Self {
        buffer.use_count.set(buffer.use_count.get() + 1);

        Self {
            buffer: buffer.clone(),
        }
    }

    pub fn buffer(&self) -> &Rc<Buffer> {
        &self.buffer
    }
}

impl Drop for BufferUse {
    fn drop(&mut self) {
        let count = self.buffer.use_count.get();
        debug_assert!(count > 0, "buffer use count underflow");

        let count = count.saturating_sub(1);
        self.buffer.use_count.set(count);

        if count == 0 && !self.buffer.is_destroyed() {
            self.buffer.releases.borrow_mut().push(self.buffer.id);
        }
    }
}

/// A realized, renderer-side image produced from a [`Buffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texture {
    pub id: TextureId,
    pub size: BufferSize,
}

/// An error reported by the [`BufferImporter`] when a buffer cannot be
/// realized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("buffer format is not supported")]
    UnsupportedFormat,

    #[error("buffer dimensions {0:?} cannot be imported")]
    BadDimensions(BufferSize),

    #[error("buffer storage is gone")]
    Destroyed,

    #[error("import failed: {0}")]
    Backend(String),
}

/// The renderer-side collaborator that turns buffers into textures.
///
/// Called during transaction apply for every newly attached buffer. The
/// embedder can recover its concrete importer through [`Downcast`].
pub trait BufferImporter: Downcast {
    fn realize(&mut self, buffer: &Buffer) -> Result<Texture, BufferError>;
}

impl_downcast!(BufferImporter);

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, num::NonZeroU64, rc::Rc};

    use euclid::size2;

    use super::{Buffer, BufferBacking, BufferId, BufferUse, Releases};

    fn buffer(releases: &Releases) -> Rc<Buffer> {
        let id = BufferId(NonZeroU64::new(1).unwrap());
        Buffer::new(id, size2(16, 16), BufferBacking::Direct, releases.clone())
    }

    #[test]
    fn last_use_queues_release() {
        let releases: Releases = Rc::new(RefCell::new(Vec::new()));
        let buffer = buffer(&releases);

        let first = BufferUse::acquire(&buffer);
        let second = BufferUse::acquire(&buffer);
        assert_eq!(buffer.use_count(), 2);

        drop(first);
        assert_eq!(buffer.use_count(), 1);
        assert!(releases.borrow().is_empty());

        drop(second);
        assert_eq!(buffer.use_count(), 0);
        assert_eq!(releases.borrow().as_slice(), [buffer.id()]);
    }

    /// Each attach cycle re-arms the release: a buffer used again after a
    /// release announces another one when it drops to zero again.
    #[test]
    fn release_per_cycle() {
        let releases: Releases = Rc::new(RefCell::new(Vec::new()));
        let buffer = buffer(&releases);

        drop(BufferUse::acquire(&buffer));
        drop(BufferUse::acquire(&buffer));

        assert_eq!(releases.borrow().len(), 2);
    }

    /// No release is announced for a destroyed buffer object.
    #[test]
    fn destroyed_buffers_do_not_release() {
        let releases: Releases = Rc::new(RefCell::new(Vec::new()));
        let buffer = buffer(&releases);

        let token = BufferUse::acquire(&buffer);
        buffer.mark_destroyed();
        drop(token);

        assert_eq!(buffer.use_count(), 0);
        assert!(releases.borrow().is_empty());
    }
}
