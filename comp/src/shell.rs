//! Shell window records and the map state machine.
//!
//! The engine carries just enough shell state to gate content on the
//! configure handshake and to report map changes; layout policy belongs to
//! the embedder.
//!
//! # Map state machine
//!
//! A window starts in the `New` state: the client performs an initial
//! commit without a buffer, the embedder sends a configure, and the client
//! acks it. Only then may a commit carry content; attaching a buffer before
//! the first configure was acked is a protocol error. Once content applies
//! the window is `Mapped` and stays mapped across further commits. Applying
//! a null buffer unmaps it, and the window becomes new again with the
//! handshake starting over.
//!
//! ```text
//! /---> New ---> Configured ---> Mapped ---\
//! |      ^   |               |    ^    |   |
//! |      \---/               |    \----/   |
//! |  (commits w/o content)   |  (commits)  |
//! |                          |             |
//! |         (content commit applies)       |
//! \----------------------------------------/
//!           (null buffer applies)
//! ```

use crate::{error::ProtocolError, geometry::LogicalRect, surface::SurfaceId};

/// A configure handshake serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Serial(pub u32);

/// How a window's visibility changed when a commit applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapChange {
    Mapped,
    Unmapped,
}

/// Map progress of a window.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum MapState {
    /// No configure acked yet; content commits are rejected.
    #[default]
    New,

    /// A configure was acked; the next content commit maps the window.
    Configured,

    /// The window has content on screen.
    Mapped,
}

/// Per-window shell record backing the toplevel and popup roles.
#[derive(Debug, Default)]
pub struct Window {
    state: MapState,

    /// Serial of the last configure handed to the embedder, if any.
    sent: Option<Serial>,

    /// Serial of the last configure the client acked.
    acked: Option<Serial>,

    /// Monotonic well for configure serials. Survives unmapping so serials
    /// stay unique across remap cycles.
    next_serial: u32,

    /// Aggregate geometry of the window's applied surface tree, refreshed
    /// after every apply that touches the window.
    geometry: Option<LogicalRect>,
}

impl Window {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the serial for a configure the embedder is about to send.
    pub fn send_configure(&mut self) -> Serial {
        self.next_serial = self.next_serial.wrapping_add(1);
        let serial = Serial(self.next_serial);
        self.sent = Some(serial);
        serial
    }

    /// Records an acked configure. Acks arriving while nothing was ever
    /// sent (including after an unmap reset the handshake) are dropped.
    pub(crate) fn ack(&mut self, id: SurfaceId, serial: Serial) {
        if self.sent.is_none() {
            tracing::warn!(?id, ?serial, "ignoring ack for a configure that was never sent");
            return;
        }

        self.acked = Some(serial);

        if self.state == MapState::New {
            self.state = MapState::Configured;
        }
    }

    /// Rejects content commits made before the first configure was acked.
    pub(crate) fn check_content(&self, id: SurfaceId, has_content: bool) -> Result<(), ProtocolError> {
        if has_content && self.acked.is_none() {
            return Err(ProtocolError::NotConfigured(id));
        }

        Ok(())
    }

    /// Advances the map state after a commit applied; `has_buffer` is the
    /// surface's post-apply content state.
    pub(crate) fn applied(&mut self, has_buffer: bool) -> Option<MapChange> {
        match (self.state, has_buffer) {
            (MapState::Configured, true) => {
                self.state = MapState::Mapped;
                Some(MapChange::Mapped)
            }
            (MapState::Mapped, false) => {
                // Unmapping resets the handshake; the window is new again.
                *self = Window {
                    next_serial: self.next_serial,
                    ..Default::default()
                };
                Some(MapChange::Unmapped)
            }
            _ => None,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.state == MapState::Mapped
    }

    /// The last configure serial the client acked, if any.
    pub fn acked_configure(&self) -> Option<Serial> {
        self.acked
    }

    pub fn geometry(&self) -> Option<LogicalRect> {
        self.geometry
    }

    pub(crate) fn set_geometry(&mut self, geometry: Option<LogicalRect>) {
        self.geometry = geometry;
    }
}
