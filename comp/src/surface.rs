//! Surfaces: request staging, the applied record, and lifecycle.
//!
//! A surface accumulates client requests in its pending [`SurfaceState`]
//! until a commit seals them into a transaction; when that transaction
//! applies, the state lands here and becomes what the renderer sees. A
//! protocol destroy does not necessarily free the surface: transaction
//! entries keep it in the arena (dead, `alive = false`) until the last
//! one drops.

use std::num::NonZeroU64;
use std::rc::Rc;

use slotmap::new_key_type;
use tracing::{debug, warn};

use crate::{
    buffer::{Buffer, BufferBacking, BufferId, BufferUse, Texture},
    error::ProtocolError,
    event::Event,
    forest::{Forest, Index},
    geometry::{BufferRect, BufferSize, Logical, LogicalRect, Point, Region, Size, SrcRect, Transform},
    role::Role,
    shell::{MapChange, Serial},
    state::Patina,
    subsurface::TreeNode,
    surface_state::{CallbackId, FeedbackId, SurfaceState},
    transaction::TransactionId,
};

new_key_type! {
    /// Key of a surface in the engine arena.
    pub struct SurfaceId;
}

/// Interface version from which `attach` must not carry an offset.
const ATTACH_OFFSET_REMOVED: u32 = 5;

/// The content a surface currently presents.
#[derive(Debug)]
pub struct AttachedBuffer {
    id: BufferId,

    /// Use token pinning the client's buffer. `None` once the import has
    /// copied the content out; the texture owns it from then on.
    token: Option<BufferUse>,

    texture: Rc<Texture>,
}

impl AttachedBuffer {
    pub(crate) fn new(token: BufferUse, texture: Texture) -> Self {
        let id = token.buffer().id();
        let token = match token.buffer().backing() {
            // The copy is done; releasing now lets the client reuse the
            // buffer before the next repaint.
            BufferBacking::Copied => None,
            BufferBacking::Direct => Some(token),
        };

        AttachedBuffer {
            id,
            token,
            texture: Rc::new(texture),
        }
    }

    pub fn buffer_id(&self) -> BufferId {
        self.id
    }

    pub fn texture(&self) -> &Rc<Texture> {
        &self.texture
    }

    /// Whether the client buffer is still pinned for scanout.
    pub fn holds_use(&self) -> bool {
        self.token.is_some()
    }
}

/// A surface's links into one of the two subsurface trees.
#[derive(Debug)]
pub(crate) struct SubState {
    pub parent: Option<SurfaceId>,
    pub branch: Index,
    pub leaf: Index,
}

impl SubState {
    fn new(id: SurfaceId, forest: &mut Forest<TreeNode>) -> Self {
        let branch = forest.insert(TreeNode::Branch(id));
        let leaf = forest.insert(TreeNode::Leaf(id));
        // A fresh branch holds exactly the surface's own leaf.
        let linked = forest.append_child(branch, leaf);
        debug_assert!(linked.is_ok());

        SubState {
            parent: None,
            branch,
            leaf,
        }
    }
}

#[derive(Debug)]
pub struct Surface {
    /// Monotonic identity, independent of arena slot reuse. Doubles as the
    /// deterministic ordering key for unrelated surfaces sharing a
    /// transaction.
    pub(crate) serial: NonZeroU64,

    version: u32,

    /// Cleared on protocol destruction. Dead surfaces stay in the arena
    /// while transaction entries still name them.
    pub(crate) alive: bool,

    pub(crate) role: Option<Role>,
    pub(crate) pending: SurfaceState,

    // What the renderer sees.
    pub(crate) buffer: Option<AttachedBuffer>,
    pub(crate) offset: Point,
    pub(crate) transform: Transform,
    pub(crate) scale: i32,
    pub(crate) viewport_src: Option<SrcRect>,
    pub(crate) viewport_dst: Option<Size>,
    /// `None` is the protocol default: nothing opaque.
    pub(crate) opaque_region: Option<Region<Logical>>,
    /// `None` is the protocol default: the whole surface accepts input.
    pub(crate) input_region: Option<Region<Logical>>,

    pub(crate) committed: SubState,
    pub(crate) applied: SubState,

    /// Head and tail of this surface's committed-but-unapplied transaction
    /// chain, oldest first.
    pub(crate) first_committed: Option<TransactionId>,
    pub(crate) last_committed: Option<TransactionId>,

    /// Transaction entries currently naming this surface.
    pub(crate) entry_refs: u32,

    // Derived by the resync pass after every apply.
    pub(crate) mapped: bool,
    pub(crate) position: Point,
}

impl Surface {
    fn new(id: SurfaceId, serial: NonZeroU64, version: u32, forest: &mut Forest<TreeNode>) -> Self {
        Surface {
            serial,
            version,
            alive: true,
            role: None,
            pending: SurfaceState::default(),
            buffer: None,
            offset: Point::zero(),
            transform: Transform::Normal,
            scale: 1,
            viewport_src: None,
            viewport_dst: None,
            opaque_region: None,
            input_region: None,
            committed: SubState::new(id, forest),
            applied: SubState::new(id, forest),
            first_committed: None,
            last_committed: None,
            entry_refs: 0,
            mapped: false,
            position: Point::zero(),
        }
    }

    fn stage_attach(
        &mut self,
        id: SurfaceId,
        buffer: Option<&Rc<Buffer>>,
        dx: i32,
        dy: i32,
    ) -> Result<(), ProtocolError> {
        if self.version >= ATTACH_OFFSET_REMOVED && (dx, dy) != (0, 0) {
            return Err(ProtocolError::InvalidOffset { dx, dy });
        }

        if let Some(buffer) = buffer {
            if buffer.is_destroyed() {
                warn!(?id, buffer = ?buffer.id(), "attach of a destroyed buffer, treating as null");
                self.pending.newly_attached = true;
                self.pending.buffer = None;
                return Ok(());
            }
        }

        self.pending.newly_attached = true;
        self.pending.buffer = buffer.map(BufferUse::acquire);
        self.pending.offset += euclid::vec2(dx, dy);
        Ok(())
    }

    /// Commit-time validation of staged content against the staged or
    /// applied scale.
    pub(crate) fn check_pending_content(&self, id: SurfaceId) -> Result<(), ProtocolError> {
        let Some(token) = self.pending.buffer.as_ref() else {
            return Ok(());
        };

        let size = token.buffer().size();
        let scale = self.pending.scale.unwrap_or(self.scale);
        if size.width % scale != 0 || size.height % scale != 0 {
            let tolerated = self
                .role
                .as_ref()
                .is_some_and(|role| role.tolerates_odd_buffer_size());
            if !tolerated {
                return Err(ProtocolError::InvalidSize { size, scale });
            }
            warn!(?id, ?size, scale, "cursor buffer size is not a multiple of its scale");
        }

        Ok(())
    }

    /// The surface's size in logical coordinates: the viewport destination
    /// if set, else the viewport source extent, else the buffer dimensions
    /// (swapped under 90/270 transforms) divided by the scale.
    pub fn size(&self) -> Option<Size> {
        if let Some(dst) = self.viewport_dst {
            return Some(dst);
        }

        if let Some(src) = self.viewport_src {
            return Some(euclid::size2(
                src.size.width.ceil() as i32,
                src.size.height.ceil() as i32,
            ));
        }

        let texture = &self.buffer.as_ref()?.texture;
        let (width, height) = if self.transform.is_rotated() {
            (texture.size.height, texture.size.width)
        } else {
            (texture.size.width, texture.size.height)
        };

        Some(euclid::size2(width / self.scale, height / self.scale))
    }

    pub fn role(&self) -> Option<&Role> {
        self.role.as_ref()
    }

    pub(crate) fn subsurface(&self) -> Option<&crate::subsurface::SubsurfaceRole> {
        self.role.as_ref().and_then(Role::subsurface)
    }

    pub(crate) fn subsurface_mut(&mut self) -> Option<&mut crate::subsurface::SubsurfaceRole> {
        self.role.as_mut().and_then(Role::subsurface_mut)
    }
}

fn viewport_src_in_bounds(src: &SrcRect, buffer: BufferSize, scale: i32, transform: Transform) -> bool {
    let (width, height) = if transform.is_rotated() {
        (buffer.height, buffer.width)
    } else {
        (buffer.width, buffer.height)
    };

    let max_x = f64::from(width / scale);
    let max_y = f64::from(height / scale);
    src.origin.x >= 0.0 && src.origin.y >= 0.0 && src.max_x() <= max_x && src.max_y() <= max_y
}

/// What a state's attach resolves to once the buffer was (or failed to
/// be) realized.
enum Attach {
    /// No attach this cycle, or the import failed and the previous
    /// content stays.
    Keep,
    /// Null attach: the surface loses its content.
    Detach,
    Replace(AttachedBuffer),
}

impl Patina {
    /// Looks up a live surface.
    pub(crate) fn surface(&self, id: SurfaceId) -> Result<&Surface, ProtocolError> {
        self.surfaces
            .get(id)
            .filter(|surface| surface.alive)
            .ok_or(ProtocolError::DeadSurface(id))
    }

    pub(crate) fn surface_mut(&mut self, id: SurfaceId) -> Result<&mut Surface, ProtocolError> {
        self.surfaces
            .get_mut(id)
            .filter(|surface| surface.alive)
            .ok_or(ProtocolError::DeadSurface(id))
    }

    pub fn create_surface(&mut self, version: u32) -> SurfaceId {
        let serial = self.surface_serials.next();
        let id = self
            .surfaces
            .insert_with_key(|id| Surface::new(id, serial, version, &mut self.forest));
        debug!(?id, serial = serial.get(), version, "created surface");
        id
    }

    /// Protocol destruction. The surface unmaps, its pending state is
    /// discarded, and its committed subsurface children are orphaned; the
    /// record itself is reaped once no transaction entry names it.
    pub fn destroy_surface(&mut self, id: SurfaceId) -> Result<(), ProtocolError> {
        self.surface(id)?;

        // A subsurface leaves both trees before its record goes away.
        if self.surface(id)?.subsurface().is_some() {
            self.permanently_unmap(id);
        }

        if let Some(cached) = self.surface_mut(id)?.subsurface_mut().and_then(|sub| sub.cached.take()) {
            self.discard_transaction(cached);
        }

        // Children cached on the committed tree are orphaned, not freed:
        // they keep their role and may be re-parented later.
        for child in self.committed_children(id) {
            self.permanently_unmap(child);
        }

        let surface = self.surface_mut(id)?;
        surface.alive = false;
        let pending = std::mem::take(&mut surface.pending);
        for feedback in pending.feedback {
            self.events.push(Event::FeedbackDiscarded { surface: id, feedback });
        }
        drop(pending.buffer);

        // Scheduled callbacks die silently; scheduled feedback is
        // announced as discarded, the content never reached the screen.
        self.scheduled_callbacks.retain(|(owner, _)| *owner != id);
        let events = &mut self.events;
        self.scheduled_feedback.retain(|(owner, feedback)| {
            if *owner == id {
                events.push(Event::FeedbackDiscarded {
                    surface: id,
                    feedback: *feedback,
                });
                return false;
            }
            true
        });

        debug!(?id, "destroyed surface");
        self.reap_if_unreferenced(id);
        Ok(())
    }

    /// Frees a dead surface once the last transaction entry naming it has
    /// dropped.
    pub(crate) fn reap_if_unreferenced(&mut self, id: SurfaceId) {
        let Some(surface) = self.surfaces.get(id) else {
            return;
        };
        if surface.alive || surface.entry_refs != 0 {
            return;
        }

        let Some(surface) = self.surfaces.remove(id) else {
            return;
        };
        // Dropping the nodes detaches them from whatever tree still
        // holds them; dropping the buffer releases its use.
        for node in [
            surface.committed.branch,
            surface.committed.leaf,
            surface.applied.branch,
            surface.applied.leaf,
        ] {
            let removed = self.forest.remove(node);
            debug_assert!(removed.is_ok());
        }
        debug!(?id, "reaped surface");
    }

    pub fn attach(
        &mut self,
        id: SurfaceId,
        buffer: Option<&Rc<Buffer>>,
        dx: i32,
        dy: i32,
    ) -> Result<(), ProtocolError> {
        self.surface_mut(id)?.stage_attach(id, buffer, dx, dy)
    }

    pub fn offset(&mut self, id: SurfaceId, dx: i32, dy: i32) -> Result<(), ProtocolError> {
        self.surface_mut(id)?.pending.offset += euclid::vec2(dx, dy);
        Ok(())
    }

    pub fn damage(&mut self, id: SurfaceId, rect: LogicalRect) -> Result<(), ProtocolError> {
        self.surface_mut(id)?.pending.surface_damage.add(rect);
        Ok(())
    }

    pub fn damage_buffer(&mut self, id: SurfaceId, rect: BufferRect) -> Result<(), ProtocolError> {
        self.surface_mut(id)?.pending.buffer_damage.add(rect);
        Ok(())
    }

    pub fn set_opaque_region(
        &mut self,
        id: SurfaceId,
        region: Option<Region<Logical>>,
    ) -> Result<(), ProtocolError> {
        self.surface_mut(id)?.pending.opaque_region = Some(region);
        Ok(())
    }

    pub fn set_input_region(
        &mut self,
        id: SurfaceId,
        region: Option<Region<Logical>>,
    ) -> Result<(), ProtocolError> {
        self.surface_mut(id)?.pending.input_region = Some(region);
        Ok(())
    }

    pub fn set_buffer_transform(&mut self, id: SurfaceId, raw: i32) -> Result<(), ProtocolError> {
        let Some(transform) = Transform::from_raw(raw) else {
            self.surface(id)?;
            return Err(ProtocolError::InvalidTransform(raw));
        };
        self.surface_mut(id)?.pending.transform = Some(transform);
        Ok(())
    }

    pub fn set_buffer_scale(&mut self, id: SurfaceId, scale: i32) -> Result<(), ProtocolError> {
        if scale <= 0 {
            self.surface(id)?;
            return Err(ProtocolError::InvalidScale(scale));
        }
        self.surface_mut(id)?.pending.scale = Some(scale);
        Ok(())
    }

    pub fn set_viewport_src(&mut self, id: SurfaceId, src: Option<SrcRect>) -> Result<(), ProtocolError> {
        if let Some(rect) = src {
            let malformed = !rect.origin.x.is_finite()
                || !rect.origin.y.is_finite()
                || !(rect.size.width > 0.0)
                || !(rect.size.height > 0.0);
            if malformed {
                self.surface(id)?;
                return Err(ProtocolError::InvalidViewportSource(rect));
            }
        }
        self.surface_mut(id)?.pending.viewport_src = Some(src);
        Ok(())
    }

    pub fn set_viewport_dst(&mut self, id: SurfaceId, dst: Option<Size>) -> Result<(), ProtocolError> {
        if let Some(size) = dst {
            if size.width <= 0 || size.height <= 0 {
                self.surface(id)?;
                return Err(ProtocolError::InvalidViewportDestination(size));
            }
        }
        self.surface_mut(id)?.pending.viewport_dst = Some(dst);
        Ok(())
    }

    /// Registers a frame callback; it fires on the first repaint after
    /// the cycle containing it applies.
    pub fn frame(&mut self, id: SurfaceId) -> Result<CallbackId, ProtocolError> {
        self.surface(id)?;
        let callback = CallbackId(self.callback_ids.next());
        // The lookup above makes this infallible.
        self.surface_mut(id)?.pending.frame_callbacks.push(callback);
        Ok(callback)
    }

    /// Registers presentation feedback for the current cycle.
    pub fn presentation_feedback(&mut self, id: SurfaceId) -> Result<FeedbackId, ProtocolError> {
        self.surface(id)?;
        let feedback = FeedbackId(self.feedback_ids.next());
        self.surface_mut(id)?.pending.feedback.push(feedback);
        Ok(feedback)
    }

    /// Stages a configure ack; the shell role consumes it at commit.
    pub fn ack_configure(&mut self, id: SurfaceId, serial: Serial) -> Result<(), ProtocolError> {
        self.surface_mut(id)?.pending.acked_serial = Some(serial);
        Ok(())
    }

    /// Lands one transaction entry's state on its surface. Returns whether
    /// anything the renderer can observe changed.
    ///
    /// Placement ops were already consumed by the hierarchy pre-pass;
    /// everything else in `state` lands here. A buffer that fails to
    /// realize aborts only the content adoption of this surface, reported
    /// as a [`Event::SurfaceError`]; the rest of the state still applies.
    pub(crate) fn apply_surface_state(&mut self, id: SurfaceId, mut state: SurfaceState) -> bool {
        let visible = !state.is_empty();

        let alive = self.surfaces.get(id).is_some_and(|surface| surface.alive);
        if !alive {
            // Dropping the state is the bookkeeping: its buffer token
            // releases, its callbacks and feedback die with the surface.
            return false;
        }

        // Import before touching the surface so a failed realize leaves
        // the previous content in place.
        let mut attach = Attach::Keep;
        if state.newly_attached {
            attach = match state.buffer.take() {
                Some(token) => match self.importer.realize(token.buffer()) {
                    Ok(texture) => Attach::Replace(AttachedBuffer::new(token, texture)),
                    Err(source) => {
                        let buffer = token.buffer().id();
                        warn!(?id, ?buffer, %source, "buffer import failed, dropping the attach");
                        self.events.push(Event::SurfaceError {
                            surface: id,
                            error: ProtocolError::ImportFailed { buffer, source },
                        });
                        Attach::Keep
                    }
                },
                None => Attach::Detach,
            };
        }

        let Some(surface) = self.surfaces.get_mut(id) else {
            return false;
        };

        match attach {
            Attach::Keep => {}
            Attach::Detach => surface.buffer = None,
            Attach::Replace(buffer) => surface.buffer = Some(buffer),
        }

        surface.offset += state.offset.to_vector();

        if let Some(region) = state.opaque_region.take() {
            surface.opaque_region = region;
        }
        if let Some(region) = state.input_region.take() {
            surface.input_region = region;
        }
        if let Some(transform) = state.transform {
            surface.transform = transform;
        }
        if let Some(scale) = state.scale {
            surface.scale = scale;
        }
        if let Some(dst) = state.viewport_dst.take() {
            surface.viewport_dst = dst;
        }
        if let Some(src) = state.viewport_src.take() {
            surface.viewport_src = src;
        }

        // The source rectangle is validated against whatever buffer the
        // surface now shows; an out-of-range one falls back to the full
        // buffer rather than poisoning the surface.
        if let (Some(buffer), Some(src)) = (surface.buffer.as_ref(), surface.viewport_src) {
            if !viewport_src_in_bounds(&src, buffer.texture.size, surface.scale, surface.transform) {
                let error = ProtocolError::ViewportOutOfBuffer {
                    src,
                    buffer: buffer.texture.size,
                    scale: surface.scale,
                };
                warn!(?id, %error, "ignoring viewport source");
                surface.viewport_src = None;
                self.events.push(Event::SurfaceError { surface: id, error });
            }
        }

        for callback in state.frame_callbacks.drain(..) {
            self.scheduled_callbacks.push((id, callback));
        }
        for feedback in state.feedback.drain(..) {
            self.scheduled_feedback.push((id, feedback));
        }

        let surface = match self.surfaces.get_mut(id) {
            Some(surface) => surface,
            None => return visible,
        };
        let has_buffer = surface.buffer.is_some();
        if let Some(role) = surface.role.as_mut() {
            match role.apply_state(has_buffer) {
                Some(MapChange::Mapped) => self.events.push(Event::WindowMapped { surface: id }),
                Some(MapChange::Unmapped) => self.events.push(Event::WindowUnmapped { surface: id }),
                None => {}
            }
        }

        visible
    }
}

#[cfg(test)]
mod tests {
    use crate::buffer::BufferBacking;
    use crate::state::tests::{engine, engine_with_importer, FailingImporter};
    use crate::{error::ProtocolError, event::Event};

    use euclid::{rect, size2};

    #[test]
    fn attach_offset_rejected_on_new_versions() {
        let mut patina = engine();
        let old = patina.create_surface(4);
        let new = patina.create_surface(5);

        let buffer = patina.create_buffer(size2(16, 16), BufferBacking::Direct);

        assert!(patina.attach(old, Some(&buffer), 1, 2).is_ok());
        assert!(matches!(
            patina.attach(new, Some(&buffer), 1, 2),
            Err(ProtocolError::InvalidOffset { dx: 1, dy: 2 })
        ));
        assert!(patina.attach(new, Some(&buffer), 0, 0).is_ok());
    }

    #[test]
    fn scale_and_viewport_validated_at_request_time() {
        let mut patina = engine();
        let id = patina.create_surface(6);

        assert!(matches!(
            patina.set_buffer_scale(id, 0),
            Err(ProtocolError::InvalidScale(0))
        ));
        assert!(matches!(
            patina.set_buffer_transform(id, 8),
            Err(ProtocolError::InvalidTransform(8))
        ));
        assert!(matches!(
            patina.set_viewport_dst(id, Some(size2(0, 4))),
            Err(ProtocolError::InvalidViewportDestination(_))
        ));
        assert!(matches!(
            patina.set_viewport_src(id, Some(rect(0.0, 0.0, -1.0, 4.0))),
            Err(ProtocolError::InvalidViewportSource(_))
        ));

        assert!(patina.set_buffer_scale(id, 2).is_ok());
        assert!(patina.set_viewport_dst(id, Some(size2(10, 10))).is_ok());
        assert!(patina.set_viewport_src(id, Some(rect(0.0, 0.0, 4.0, 4.0))).is_ok());
    }

    #[test]
    fn surface_size_follows_viewport_then_buffer() {
        let mut patina = engine();
        let id = patina.create_surface(6);
        let buffer = patina.create_buffer(size2(64, 32), BufferBacking::Direct);

        patina.attach(id, Some(&buffer), 0, 0).unwrap();
        patina.set_buffer_scale(id, 2).unwrap();
        patina.commit(id).unwrap();
        assert_eq!(patina.surface_size(id), Some(size2(32, 16)));

        // Raw value 1 is the 90 degree rotation; width and height swap.
        patina.set_buffer_transform(id, 1).unwrap();
        patina.commit(id).unwrap();
        assert_eq!(patina.surface_size(id), Some(size2(16, 32)));

        patina.set_viewport_src(id, Some(rect(0.0, 0.0, 2.5, 3.0))).unwrap();
        patina.commit(id).unwrap();
        assert_eq!(patina.surface_size(id), Some(size2(3, 3)));

        patina.set_viewport_dst(id, Some(size2(7, 9))).unwrap();
        patina.commit(id).unwrap();
        assert_eq!(patina.surface_size(id), Some(size2(7, 9)));
    }

    #[test]
    fn failed_import_keeps_previous_content() {
        let mut patina = engine_with_importer(FailingImporter::after(1));
        let id = patina.create_surface(6);

        let first = patina.create_buffer(size2(8, 8), BufferBacking::Direct);
        patina.attach(id, Some(&first), 0, 0).unwrap();
        patina.commit(id).unwrap();
        assert_eq!(patina.surface_size(id), Some(size2(8, 8)));

        // The second import fails; the first buffer stays visible and the
        // rejected attach's use is released.
        let second = patina.create_buffer(size2(4, 4), BufferBacking::Direct);
        patina.attach(id, Some(&second), 0, 0).unwrap();
        patina.commit(id).unwrap();

        assert_eq!(patina.surface_size(id), Some(size2(8, 8)));
        assert_eq!(second.use_count(), 0);

        let events = patina.drain_events();
        assert!(events.iter().any(|event| matches!(
            event,
            Event::SurfaceError {
                surface,
                error: ProtocolError::ImportFailed { .. },
            } if *surface == id
        )));
        assert!(events
            .iter()
            .any(|event| matches!(event, Event::BufferReleased { buffer } if *buffer == second.id())));
    }

    #[test]
    fn out_of_buffer_viewport_source_is_dropped_at_apply() {
        let mut patina = engine();
        let id = patina.create_surface(6);
        let buffer = patina.create_buffer(size2(8, 8), BufferBacking::Direct);

        patina.attach(id, Some(&buffer), 0, 0).unwrap();
        patina.set_viewport_src(id, Some(rect(0.0, 0.0, 16.0, 16.0))).unwrap();
        patina.commit(id).unwrap();

        // Falls back to the full buffer.
        assert_eq!(patina.surface_size(id), Some(size2(8, 8)));
        assert!(patina.drain_events().iter().any(|event| matches!(
            event,
            Event::SurfaceError {
                error: ProtocolError::ViewportOutOfBuffer { .. },
                ..
            }
        )));
    }

    #[test]
    fn destroy_discards_pending_feedback() {
        let mut patina = engine();
        let id = patina.create_surface(6);

        let feedback = patina.presentation_feedback(id).unwrap();
        patina.destroy_surface(id).unwrap();

        assert!(matches!(
            patina.attach(id, None, 0, 0),
            Err(ProtocolError::DeadSurface(_))
        ));
        assert!(patina
            .drain_events()
            .contains(&Event::FeedbackDiscarded { surface: id, feedback }));
    }
}
