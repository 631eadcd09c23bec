//! Surface roles.
//!
//! A role is the purpose a surface serves. At most one role is ever
//! assigned and the slot is permanent: once a surface has been a toplevel
//! it can never become a subsurface, though re-assigning the same shell
//! role is a no-op. The engine consults the role twice per content cycle,
//! when a commit seals the pending state ([`Role::commit_state`]) and when
//! an entry's state lands on the surface ([`Role::apply_state`]); the
//! subsurface role additionally carries the synchronization bookkeeping
//! driving the cascade in [`subsurface`](crate::subsurface).

use crate::{
    error::ProtocolError,
    shell::{MapChange, Window},
    subsurface::SubsurfaceRole,
    surface::SurfaceId,
    surface_state::SurfaceState,
};

#[derive(Debug)]
pub enum Role {
    Toplevel(Window),
    Popup(Popup),
    Cursor,
    Subsurface(SubsurfaceRole),
}

/// A popup window. Its map handshake is the toplevel's; the parent only
/// matters to the embedder's positioning policy.
#[derive(Debug)]
pub struct Popup {
    pub parent: SurfaceId,
    pub window: Window,
}

impl Role {
    /// Short name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Role::Toplevel(_) => "toplevel",
            Role::Popup(_) => "popup",
            Role::Cursor => "cursor",
            Role::Subsurface(_) => "subsurface",
        }
    }

    /// Hook run while a commit seals the pending state, before it enters a
    /// transaction. Shell roles consume the staged ack and gate content on
    /// the configure handshake.
    pub(crate) fn commit_state(
        &mut self,
        id: SurfaceId,
        pending: &mut SurfaceState,
    ) -> Result<(), ProtocolError> {
        match self {
            Role::Toplevel(window) | Role::Popup(Popup { window, .. }) => {
                if let Some(serial) = pending.acked_serial.take() {
                    window.ack(id, serial);
                }

                let attaches_content = pending.newly_attached && pending.buffer.is_some();
                window.check_content(id, attaches_content)
            }
            Role::Cursor | Role::Subsurface(_) => Ok(()),
        }
    }

    /// Hook run after a transaction entry's state landed on the surface;
    /// `has_buffer` reflects the post-apply content.
    pub(crate) fn apply_state(&mut self, has_buffer: bool) -> Option<MapChange> {
        match self {
            Role::Toplevel(window) | Role::Popup(Popup { window, .. }) => window.applied(has_buffer),
            Role::Cursor | Role::Subsurface(_) => None,
        }
    }

    /// Cursor surfaces may carry buffers whose size is not a multiple of
    /// the scale; for every other role that is a protocol error.
    pub(crate) fn tolerates_odd_buffer_size(&self) -> bool {
        matches!(self, Role::Cursor)
    }

    pub fn window(&self) -> Option<&Window> {
        match self {
            Role::Toplevel(window) => Some(window),
            Role::Popup(popup) => Some(&popup.window),
            Role::Cursor | Role::Subsurface(_) => None,
        }
    }

    pub(crate) fn window_mut(&mut self) -> Option<&mut Window> {
        match self {
            Role::Toplevel(window) => Some(window),
            Role::Popup(popup) => Some(&mut popup.window),
            Role::Cursor | Role::Subsurface(_) => None,
        }
    }

    pub fn subsurface(&self) -> Option<&SubsurfaceRole> {
        match self {
            Role::Subsurface(sub) => Some(sub),
            _ => None,
        }
    }

    pub(crate) fn subsurface_mut(&mut self) -> Option<&mut SubsurfaceRole> {
        match self {
            Role::Subsurface(sub) => Some(sub),
            _ => None,
        }
    }
}
