//! Client-attributable protocol errors.
//!
//! Every request-shaped engine operation returns one of these when the
//! request is malformed; the dispatch layer turns them into fatal errors on
//! the offending client connection. Apply-time failures that cannot be
//! returned from a request (buffer import, viewport bounds) are delivered
//! as [`Event::SurfaceError`](crate::event::Event::SurfaceError) instead.
//!
//! Internal invariant breaches (arena misses, tree cycles) are not protocol
//! errors and never leave the crate as one.

use crate::{
    buffer::{BufferError, BufferId},
    geometry::{BufferSize, Size, SrcRect},
    surface::SurfaceId,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("{0:?} does not exist or was destroyed")]
    DeadSurface(SurfaceId),

    #[error("{surface:?} already has the {existing} role")]
    RoleTaken {
        surface: SurfaceId,
        existing: &'static str,
    },

    #[error("{0:?} is not a subsurface")]
    NotASubsurface(SurfaceId),

    #[error("{0:?} has no window role")]
    NotAWindow(SurfaceId),

    #[error("{0:?} already has a subsurface handle")]
    SubsurfaceExists(SurfaceId),

    #[error("{surface:?} is an ancestor of {parent:?}, the relationship would be circular")]
    CircularHierarchy { surface: SurfaceId, parent: SurfaceId },

    #[error("subsurface nesting under {surface:?} exceeds {limit} levels")]
    NestingTooDeep { surface: SurfaceId, limit: usize },

    #[error("{sibling:?} is not a sibling or the parent of {subsurface:?}")]
    InvalidSibling {
        subsurface: SurfaceId,
        sibling: SurfaceId,
    },

    #[error("attach must not carry an offset ({dx}, {dy}) on this interface version")]
    InvalidOffset { dx: i32, dy: i32 },

    #[error("buffer scale {0} is not positive")]
    InvalidScale(i32),

    #[error("{0} is not a valid buffer transform")]
    InvalidTransform(i32),

    #[error("buffer size {size:?} is not an integer multiple of the buffer scale {scale}")]
    InvalidSize { size: BufferSize, scale: i32 },

    #[error("viewport source rectangle {0:?} is malformed")]
    InvalidViewportSource(SrcRect),

    #[error("viewport destination size {0:?} is malformed")]
    InvalidViewportDestination(Size),

    #[error("viewport source {src:?} extends beyond the buffer ({buffer:?} at scale {scale})")]
    ViewportOutOfBuffer {
        src: SrcRect,
        buffer: BufferSize,
        scale: i32,
    },

    #[error("{0:?} committed content before acking its first configure")]
    NotConfigured(SurfaceId),

    #[error("buffer {buffer:?} could not be realized")]
    ImportFailed {
        buffer: BufferId,
        #[source]
        source: BufferError,
    },
}
