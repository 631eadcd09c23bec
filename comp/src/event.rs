//! Events the engine queues for the embedder.
//!
//! The engine never talks to the wire; anything a client must hear about
//! ends up here and is collected with
//! [`Patina::drain_events`](crate::Patina::drain_events).

use crate::{
    buffer::BufferId,
    error::ProtocolError,
    surface::SurfaceId,
    surface_state::{CallbackId, FeedbackId},
};

#[derive(Debug, PartialEq)]
pub enum Event {
    /// A frame callback completed; send `wl_callback.done(time_ms)`.
    Frame {
        surface: SurfaceId,
        callback: CallbackId,
        time_ms: u32,
    },

    /// Presentation feedback resolved: the content update reached the
    /// screen at `time_ms`.
    FeedbackPresented {
        surface: SurfaceId,
        feedback: FeedbackId,
        time_ms: u32,
    },

    /// Presentation feedback resolved: the content update was superseded
    /// or thrown away before it was ever shown.
    FeedbackDiscarded {
        surface: SurfaceId,
        feedback: FeedbackId,
    },

    /// The buffer's last engine-side use dropped; send
    /// `wl_buffer.release`.
    BufferReleased { buffer: BufferId },

    /// A failure during transaction apply attributable to one surface;
    /// post the error on that surface's connection.
    SurfaceError {
        surface: SurfaceId,
        error: ProtocolError,
    },

    /// A toplevel or popup gained content and is now shown.
    WindowMapped { surface: SurfaceId },

    /// A toplevel or popup lost its content and is no longer shown.
    WindowUnmapped { surface: SurfaceId },
}
