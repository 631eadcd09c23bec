//! The engine: arenas, the apply queue, and the seams to the embedder.
//!
//! One [`Patina`] owns every surface, transaction, and tree node. It talks
//! to its embedder through three narrow channels: the [`BufferImporter`]
//! it pulls textures from while applying state, the [`RepaintDriver`] it
//! pokes when applied state changes, and the [`Event`]s it queues for the
//! embedder to drain after each batch of requests. Everything runs on the
//! caller's thread; none of it is `Send`.

use std::{collections::VecDeque, num::NonZeroU64, rc::Rc};

use downcast_rs::{impl_downcast, Downcast};
use slotmap::SlotMap;
use static_assertions::assert_not_impl_any;

use crate::{
    buffer::{Buffer, BufferBacking, BufferId, BufferImporter, Releases},
    error::ProtocolError,
    event::Event,
    forest::Forest,
    geometry::{BufferSize, LogicalRect, Point, Size},
    role::{Popup, Role},
    shell::{Serial, Window},
    subsurface::TreeNode,
    surface::{Surface, SurfaceId},
    surface_state::{CallbackId, FeedbackId},
    transaction::{Transaction, TransactionId},
};

/// Receiver for repaint scheduling.
///
/// Applying state never paints; the engine marks the surfaces whose
/// applied state changed and leaves the frame timing to the driver.
pub trait RepaintDriver: Downcast {
    /// Called once per surface whose applied state changed.
    fn schedule_repaint(&mut self, surface: SurfaceId);
}
impl_downcast!(RepaintDriver);

/// A well of ids, handed out in creation order starting at 1.
#[derive(Debug)]
pub(crate) struct IdWell(NonZeroU64);

impl IdWell {
    fn new() -> Self {
        IdWell(NonZeroU64::MIN)
    }

    /// The next id. Saturates at the end of the space rather than
    /// wrapping into ids that may still be alive.
    pub(crate) fn next(&mut self) -> NonZeroU64 {
        let id = self.0;
        self.0 = self.0.saturating_add(1);
        id
    }
}

/// Tunables of the engine.
#[derive(Debug, Clone)]
pub struct Options {
    /// Longest subsurface chain the engine will link up. The parent
    /// walks during commit and apply are bounded by this.
    pub max_tree_depth: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options { max_tree_depth: 512 }
    }
}

/// The whole surface state machine of a compositor.
pub struct Patina {
    pub(crate) surfaces: SlotMap<SurfaceId, Surface>,
    pub(crate) transactions: SlotMap<TransactionId, Transaction>,
    pub(crate) forest: Forest<TreeNode>,

    /// Committed transactions in commit order, applied from the front.
    pub(crate) queue: VecDeque<TransactionId>,
    pub(crate) next_sequence: u64,

    pub(crate) events: Vec<Event>,
    /// Frame callbacks from applied state, waiting for a painted frame.
    pub(crate) scheduled_callbacks: Vec<(SurfaceId, CallbackId)>,
    /// Presentation feedback from applied state, same wait.
    pub(crate) scheduled_feedback: Vec<(SurfaceId, FeedbackId)>,

    pub(crate) importer: Box<dyn BufferImporter>,
    pub(crate) repaint: Box<dyn RepaintDriver>,
    pub(crate) options: Options,

    pub(crate) surface_serials: IdWell,
    pub(crate) callback_ids: IdWell,
    pub(crate) feedback_ids: IdWell,
    pub(crate) buffer_ids: IdWell,
    pub(crate) releases: Releases,
}

impl Patina {
    pub fn new(importer: Box<dyn BufferImporter>, repaint: Box<dyn RepaintDriver>) -> Self {
        Self::with_options(importer, repaint, Options::default())
    }

    pub fn with_options(
        importer: Box<dyn BufferImporter>,
        repaint: Box<dyn RepaintDriver>,
        options: Options,
    ) -> Self {
        Patina {
            surfaces: SlotMap::with_key(),
            transactions: SlotMap::with_key(),
            forest: Forest::new(),
            queue: VecDeque::new(),
            next_sequence: 1,
            events: Vec::new(),
            scheduled_callbacks: Vec::new(),
            scheduled_feedback: Vec::new(),
            importer,
            repaint,
            options,
            surface_serials: IdWell::new(),
            callback_ids: IdWell::new(),
            feedback_ids: IdWell::new(),
            buffer_ids: IdWell::new(),
            releases: Releases::default(),
        }
    }

    /// Registers a client buffer with the engine.
    pub fn create_buffer(&mut self, size: BufferSize, backing: BufferBacking) -> Rc<Buffer> {
        let id = BufferId(self.buffer_ids.next());
        Buffer::new(id, size, backing, self.releases.clone())
    }

    /// Marks the buffer's client resource as gone. Uses still in flight
    /// keep the storage alive, but no release will be announced for it.
    pub fn buffer_destroyed(&mut self, buffer: &Buffer) {
        buffer.mark_destroyed();
    }

    /// Gives the surface the toplevel role. Re-assigning the same role is
    /// a no-op; any other role refuses.
    pub fn assign_toplevel(&mut self, id: SurfaceId) -> Result<(), ProtocolError> {
        let surface = self.surface_mut(id)?;
        match surface.role.as_ref() {
            None => {
                surface.role = Some(Role::Toplevel(Window::new()));
                Ok(())
            }
            Some(Role::Toplevel(_)) => Ok(()),
            Some(role) => Err(ProtocolError::RoleTaken {
                surface: id,
                existing: role.name(),
            }),
        }
    }

    /// Gives the surface the popup role, anchored to `parent`.
    pub fn assign_popup(&mut self, id: SurfaceId, parent: SurfaceId) -> Result<(), ProtocolError> {
        self.surface(parent)?;
        let surface = self.surface_mut(id)?;
        match surface.role.as_ref() {
            None => {
                surface.role = Some(Role::Popup(Popup {
                    parent,
                    window: Window::new(),
                }));
                Ok(())
            }
            Some(Role::Popup(popup)) if popup.parent == parent => Ok(()),
            Some(role) => Err(ProtocolError::RoleTaken {
                surface: id,
                existing: role.name(),
            }),
        }
    }

    /// Gives the surface the cursor role.
    pub fn assign_cursor(&mut self, id: SurfaceId) -> Result<(), ProtocolError> {
        let surface = self.surface_mut(id)?;
        match surface.role.as_ref() {
            None => {
                surface.role = Some(Role::Cursor);
                Ok(())
            }
            Some(Role::Cursor) => Ok(()),
            Some(role) => Err(ProtocolError::RoleTaken {
                surface: id,
                existing: role.name(),
            }),
        }
    }

    /// Sends a configure for a shell surface, returning the serial the
    /// client has to ack before attaching content.
    pub fn send_configure(&mut self, id: SurfaceId) -> Result<Serial, ProtocolError> {
        match self.surface_mut(id)?.role.as_mut().and_then(Role::window_mut) {
            Some(window) => Ok(window.send_configure()),
            None => Err(ProtocolError::NotAWindow(id)),
        }
    }

    /// Announces a painted frame. Every frame callback and presentation
    /// feedback scheduled by applied state fires with `time_ms`.
    pub fn frame_presented(&mut self, time_ms: u32) {
        for (surface, callback) in self.scheduled_callbacks.drain(..) {
            self.events.push(Event::Frame {
                surface,
                callback,
                time_ms,
            });
        }
        for (surface, feedback) in self.scheduled_feedback.drain(..) {
            self.events.push(Event::FeedbackPresented {
                surface,
                feedback,
                time_ms,
            });
        }
    }

    /// Takes everything the engine wants the embedder to hear, in the
    /// order it happened. Buffer releases queued by dropped uses surface
    /// here too.
    #[must_use]
    pub fn drain_events(&mut self) -> Vec<Event> {
        self.pump_buffer_releases();
        std::mem::take(&mut self.events)
    }

    fn pump_buffer_releases(&mut self) {
        let released = std::mem::take(&mut *self.releases.borrow_mut());
        for buffer in released {
            self.events.push(Event::BufferReleased { buffer });
        }
    }

    /// The buffer importer, for downcasting by the embedder.
    pub fn importer_mut(&mut self) -> &mut dyn BufferImporter {
        self.importer.as_mut()
    }

    /// The repaint driver, for downcasting by the embedder.
    pub fn repaint_mut(&mut self) -> &mut dyn RepaintDriver {
        self.repaint.as_mut()
    }

    /// The size the surface's content covers, `None` while nothing is
    /// attached.
    pub fn surface_size(&self, id: SurfaceId) -> Option<Size> {
        self.surfaces.get(id).and_then(Surface::size)
    }

    /// The window geometry of a shell surface, aggregated from its
    /// applied tree.
    pub fn window_geometry(&self, id: SurfaceId) -> Option<LogicalRect> {
        self.surfaces
            .get(id)?
            .role
            .as_ref()?
            .window()?
            .geometry()
    }

    /// Where the surface sits relative to its tree's root, as of the
    /// last applied state.
    pub fn absolute_position(&self, id: SurfaceId) -> Option<Point> {
        self.surfaces.get(id).map(|surface| surface.position)
    }

    /// Whether the surface currently shows, per the applied trees and
    /// its role's lifecycle.
    pub fn is_mapped(&self, id: SurfaceId) -> bool {
        self.surfaces.get(id).map_or(false, |surface| surface.mapped)
    }
}

// Buffer bookkeeping runs through `Rc`; the engine stays on one thread.
assert_not_impl_any!(Patina: Send, Sync);

#[cfg(test)]
pub(crate) mod tests {
    use std::num::NonZeroU64;

    use euclid::size2;

    use super::*;
    use crate::buffer::{BufferError, Texture, TextureId};

    /// Importer that records every realized buffer and mints textures
    /// the size of the source.
    #[derive(Default)]
    pub(crate) struct TestImporter {
        pub(crate) log: Vec<BufferId>,
        next_texture: u64,
    }

    impl BufferImporter for TestImporter {
        fn realize(&mut self, buffer: &Buffer) -> Result<Texture, BufferError> {
            self.log.push(buffer.id());
            self.next_texture += 1;
            let id = TextureId(NonZeroU64::new(self.next_texture).unwrap());
            Ok(Texture {
                id,
                size: buffer.size(),
            })
        }
    }

    /// Importer that refuses every realize after the first `n`.
    pub(crate) struct FailingImporter {
        remaining: usize,
        inner: TestImporter,
    }

    impl FailingImporter {
        pub(crate) fn after(n: usize) -> Self {
            FailingImporter {
                remaining: n,
                inner: TestImporter::default(),
            }
        }
    }

    impl BufferImporter for FailingImporter {
        fn realize(&mut self, buffer: &Buffer) -> Result<Texture, BufferError> {
            if self.remaining == 0 {
                return Err(BufferError::Backend("import refused".into()));
            }
            self.remaining -= 1;
            self.inner.realize(buffer)
        }
    }

    #[derive(Default)]
    pub(crate) struct TestRepaint {
        scheduled: Vec<SurfaceId>,
    }

    impl RepaintDriver for TestRepaint {
        fn schedule_repaint(&mut self, surface: SurfaceId) {
            self.scheduled.push(surface);
        }
    }

    pub(crate) fn engine() -> Patina {
        engine_with_importer(TestImporter::default())
    }

    pub(crate) fn engine_with_importer(importer: impl BufferImporter) -> Patina {
        init_logging();
        Patina::new(Box::new(importer), Box::new(TestRepaint::default()))
    }

    /// The order buffers were realized in since the last call.
    pub(crate) fn importer_log(patina: &mut Patina) -> Vec<BufferId> {
        let importer = patina.importer_mut();
        if let Some(importer) = importer.downcast_mut::<TestImporter>() {
            return std::mem::take(&mut importer.log);
        }
        importer
            .downcast_mut::<FailingImporter>()
            .map(|importer| std::mem::take(&mut importer.inner.log))
            .unwrap_or_default()
    }

    fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    impl Patina {
        /// A mapped 64x64 toplevel with the configure handshake done and
        /// the setup noise drained.
        pub(crate) fn map_test_toplevel(&mut self) -> SurfaceId {
            let id = self.create_surface(6);
            self.assign_toplevel(id).unwrap();
            self.commit(id).unwrap();
            let serial = self.send_configure(id).unwrap();
            self.ack_configure(id, serial).unwrap();
            let buffer = self.create_buffer(size2(64, 64), BufferBacking::Direct);
            self.attach(id, Some(&buffer), 0, 0).unwrap();
            self.commit(id).unwrap();
            let _ = self.drain_events();
            let _ = importer_log(self);
            let _ = self.repaints();
            id
        }

        /// Repaint requests since the last call.
        pub(crate) fn repaints(&mut self) -> usize {
            self.repaint_mut()
                .downcast_mut::<TestRepaint>()
                .map(|repaint| std::mem::take(&mut repaint.scheduled).len())
                .unwrap_or_default()
        }
    }

    #[test]
    fn frame_callbacks_fire_on_presentation() {
        let mut patina = engine();
        let toplevel = patina.map_test_toplevel();

        let callback = patina.frame(toplevel).unwrap();
        let feedback = patina.presentation_feedback(toplevel).unwrap();
        patina.commit(toplevel).unwrap();

        // Nothing fires until a frame actually paints.
        assert!(patina.drain_events().is_empty());

        patina.frame_presented(16);
        let events = patina.drain_events();
        assert_eq!(
            events,
            vec![
                Event::Frame {
                    surface: toplevel,
                    callback,
                    time_ms: 16,
                },
                Event::FeedbackPresented {
                    surface: toplevel,
                    feedback,
                    time_ms: 16,
                },
            ],
        );

        // They are one-shot.
        patina.frame_presented(32);
        assert!(patina.drain_events().is_empty());
    }

    #[test]
    fn content_requires_an_acked_configure() {
        let mut patina = engine();
        let id = patina.create_surface(6);
        patina.assign_toplevel(id).unwrap();
        patina.commit(id).unwrap();

        let buffer = patina.create_buffer(size2(16, 16), BufferBacking::Direct);
        patina.attach(id, Some(&buffer), 0, 0).unwrap();
        assert_eq!(patina.commit(id), Err(ProtocolError::NotConfigured(id)));

        let serial = patina.send_configure(id).unwrap();
        patina.ack_configure(id, serial).unwrap();
        patina.commit(id).unwrap();
        assert!(patina.is_mapped(id));
        assert!(patina
            .drain_events()
            .contains(&Event::WindowMapped { surface: id }));
    }

    #[test]
    fn unmap_and_remap_announce_themselves() {
        let mut patina = engine();
        let toplevel = patina.map_test_toplevel();

        patina.attach(toplevel, None, 0, 0).unwrap();
        patina.commit(toplevel).unwrap();
        assert!(!patina.is_mapped(toplevel));
        assert!(patina
            .drain_events()
            .contains(&Event::WindowUnmapped { surface: toplevel }));

        // Mapping again starts the handshake over.
        let buffer = patina.create_buffer(size2(16, 16), BufferBacking::Direct);
        patina.attach(toplevel, Some(&buffer), 0, 0).unwrap();
        assert_eq!(
            patina.commit(toplevel),
            Err(ProtocolError::NotConfigured(toplevel)),
        );
        let serial = patina.send_configure(toplevel).unwrap();
        patina.ack_configure(toplevel, serial).unwrap();
        patina.commit(toplevel).unwrap();
        assert!(patina.is_mapped(toplevel));
    }

    #[test]
    fn role_slots_are_exclusive_but_reassignable() {
        let mut patina = engine();
        let toplevel = patina.map_test_toplevel();
        let id = patina.create_surface(6);

        patina.assign_popup(id, toplevel).unwrap();
        patina.assign_popup(id, toplevel).unwrap();
        let taken = Err(ProtocolError::RoleTaken {
            surface: id,
            existing: "popup",
        });
        assert_eq!(patina.assign_toplevel(id), taken);
        assert_eq!(patina.assign_cursor(id), taken);
        assert_eq!(patina.get_subsurface(id, toplevel), taken);

        let cursor = patina.create_surface(6);
        patina.assign_cursor(cursor).unwrap();
        assert_eq!(
            patina.send_configure(cursor),
            Err(ProtocolError::NotAWindow(cursor)),
        );
    }

    #[test]
    fn copied_buffers_release_at_apply_direct_ones_when_replaced() {
        let mut patina = engine();
        let id = patina.create_surface(6);

        let copied = patina.create_buffer(size2(8, 8), BufferBacking::Copied);
        patina.attach(id, Some(&copied), 0, 0).unwrap();
        patina.commit(id).unwrap();
        assert_eq!(copied.use_count(), 0);
        assert!(patina
            .drain_events()
            .contains(&Event::BufferReleased { buffer: copied.id() }));

        let direct = patina.create_buffer(size2(8, 8), BufferBacking::Direct);
        patina.attach(id, Some(&direct), 0, 0).unwrap();
        patina.commit(id).unwrap();
        assert_eq!(direct.use_count(), 1);
        assert!(patina.drain_events().is_empty());

        // Replacing the shown content is what lets go of the use.
        let next = patina.create_buffer(size2(8, 8), BufferBacking::Direct);
        patina.attach(id, Some(&next), 0, 0).unwrap();
        patina.commit(id).unwrap();
        assert_eq!(direct.use_count(), 0);
        assert!(patina
            .drain_events()
            .contains(&Event::BufferReleased { buffer: direct.id() }));
    }

    #[test]
    fn destroyed_buffers_never_announce_release() {
        let mut patina = engine();
        let id = patina.create_surface(6);

        let buffer = patina.create_buffer(size2(8, 8), BufferBacking::Direct);
        patina.attach(id, Some(&buffer), 0, 0).unwrap();
        patina.commit(id).unwrap();
        patina.buffer_destroyed(&buffer);

        patina.attach(id, None, 0, 0).unwrap();
        patina.commit(id).unwrap();
        assert_eq!(buffer.use_count(), 0);
        assert!(!patina
            .drain_events()
            .iter()
            .any(|event| matches!(event, Event::BufferReleased { .. })));
    }
}
