//! Surface commit and transaction machinery for a Wayland compositor.
//!
//! Clients stage surface state piece by piece and seal it with a commit.
//! Sealed state travels as a transaction that lands atomically, spanning
//! whole subsurface trees when synchronization asks for it, and never
//! reordering against other state of the same surface. [`Patina`] owns
//! the surfaces, the trees, and the queue, and leans on its embedder for
//! exactly three things: realizing buffers into textures, scheduling
//! repaints, and draining [`Event`]s.
//!
//! ```
//! use std::num::NonZeroU64;
//!
//! use patina_comp::{
//!     buffer::{Buffer, BufferBacking, BufferError, BufferImporter, Texture, TextureId},
//!     geometry::{BufferSize, Size},
//!     Patina, RepaintDriver, SurfaceId,
//! };
//!
//! struct NullImporter(u64);
//!
//! impl BufferImporter for NullImporter {
//!     fn realize(&mut self, buffer: &Buffer) -> Result<Texture, BufferError> {
//!         self.0 += 1;
//!         Ok(Texture {
//!             id: TextureId(NonZeroU64::new(self.0).unwrap()),
//!             size: buffer.size(),
//!         })
//!     }
//! }
//!
//! struct NullRepaint;
//!
//! impl RepaintDriver for NullRepaint {
//!     fn schedule_repaint(&mut self, _surface: SurfaceId) {}
//! }
//!
//! let mut patina = Patina::new(Box::new(NullImporter(0)), Box::new(NullRepaint));
//!
//! let surface = patina.create_surface(6);
//! let buffer = patina.create_buffer(BufferSize::new(64, 64), BufferBacking::Direct);
//! patina.attach(surface, Some(&buffer), 0, 0)?;
//! patina.commit(surface)?;
//!
//! assert_eq!(patina.surface_size(surface), Some(Size::new(64, 64)));
//! # let _ = patina.drain_events();
//! # Ok::<(), patina_comp::ProtocolError>(())
//! ```

pub mod buffer;
pub mod error;
pub mod event;
pub mod forest;
pub mod geometry;
pub mod role;
pub mod shell;
pub mod state;
pub mod subsurface;
pub mod surface;
pub mod surface_state;
pub mod transaction;

pub use crate::{
    buffer::{Buffer, BufferBacking, BufferError, BufferImporter, Texture, TextureId},
    error::ProtocolError,
    event::Event,
    state::{Options, Patina, RepaintDriver},
    surface::SurfaceId,
};
