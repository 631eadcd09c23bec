//! The double-buffered surface state and its merge rules.
//!
//! Requests stage changes into a surface's pending [`SurfaceState`]; commit
//! seals it into a transaction entry; apply moves it onto the surface. Each
//! field is individually flagged as set-or-unset so that merging a later
//! state over an earlier one only touches what the client actually changed:
//!
//! ```text
//!   pending ──commit──▶ entry ──apply──▶ surface
//!                         ▲
//!      later commits ─────┘ (merge, field rules on merge_from)
//! ```

use std::num::NonZeroU64;

use crate::{
    buffer::BufferUse,
    geometry::{BufferCoords, Logical, Point, Region, Size, SrcRect, Transform},
    shell::Serial,
    subsurface::PlacementOp,
};

/// Identity of a `wl_surface.frame` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(pub NonZeroU64);

/// Identity of a presentation feedback request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedbackId(pub NonZeroU64);

/// One cycle's worth of staged surface changes.
///
/// `Default` is the empty state: nothing flagged, nothing staged.
#[derive(Debug, Default)]
pub struct SurfaceState {
    /// Whether an attach happened this cycle. `true` with `buffer: None`
    /// is a null attach, which unmaps on apply.
    pub newly_attached: bool,
    pub buffer: Option<BufferUse>,

    /// Accumulated attach/offset deltas.
    pub offset: Point,

    pub surface_damage: Region<Logical>,
    pub buffer_damage: Region<BufferCoords>,

    /// Outer `Option`: was the region set this cycle. Inner: set to a
    /// region, or cleared back to the protocol default.
    pub opaque_region: Option<Option<Region<Logical>>>,
    pub input_region: Option<Option<Region<Logical>>>,

    pub transform: Option<Transform>,
    pub scale: Option<i32>,

    pub viewport_src: Option<Option<SrcRect>>,
    pub viewport_dst: Option<Option<Size>>,

    pub frame_callbacks: Vec<CallbackId>,
    pub feedback: Vec<FeedbackId>,

    /// Restack requests for this surface's subsurfaces, in request order.
    pub placement_ops: Vec<PlacementOp>,

    pub acked_serial: Option<Serial>,
}

impl SurfaceState {
    /// Whether nothing was staged this cycle.
    pub fn is_empty(&self) -> bool {
        !self.newly_attached
            && self.offset == Point::zero()
            && self.surface_damage.is_empty()
            && self.buffer_damage.is_empty()
            && self.opaque_region.is_none()
            && self.input_region.is_none()
            && self.transform.is_none()
            && self.scale.is_none()
            && self.viewport_src.is_none()
            && self.viewport_dst.is_none()
            && self.frame_callbacks.is_empty()
            && self.feedback.is_empty()
            && self.placement_ops.is_empty()
            && self.acked_serial.is_none()
    }

    /// Merges a later state over this one. Unset fields of `from` leave
    /// this state untouched; the rules per field are:
    ///
    /// - buffer: a new attach replaces ours, dropping our use (the client
    ///   may get a release if that was the last one)
    /// - damage: union
    /// - offset: accumulate
    /// - regions, transform, scale, viewport, acked serial: last write wins
    /// - frame callbacks, placement ops: append in order
    /// - presentation feedback: ours is superseded and discarded, `from`'s
    ///   is adopted
    ///
    /// Superseded feedback ids are pushed to `discarded` for the caller to
    /// announce. Merging is associative in effect: folding states A, B, C
    /// together leaves the same result as applying them one by one.
    pub fn merge_from(&mut self, mut from: SurfaceState, discarded: &mut Vec<FeedbackId>) {
        if from.newly_attached {
            self.newly_attached = true;
            self.buffer = from.buffer.take();
        }

        self.offset += from.offset.to_vector();
        self.surface_damage.union(&from.surface_damage);
        self.buffer_damage.union(&from.buffer_damage);

        if let Some(region) = from.opaque_region.take() {
            self.opaque_region = Some(region);
        }

        if let Some(region) = from.input_region.take() {
            self.input_region = Some(region);
        }

        if let Some(transform) = from.transform {
            self.transform = Some(transform);
        }

        if let Some(scale) = from.scale {
            self.scale = Some(scale);
        }

        if let Some(src) = from.viewport_src.take() {
            self.viewport_src = Some(src);
        }

        if let Some(dst) = from.viewport_dst.take() {
            self.viewport_dst = Some(dst);
        }

        self.frame_callbacks.append(&mut from.frame_callbacks);

        // A new commit is a new content update; the one staged here never
        // went on screen.
        discarded.append(&mut self.feedback);
        self.feedback = std::mem::take(&mut from.feedback);

        self.placement_ops.append(&mut from.placement_ops);

        if let Some(serial) = from.acked_serial {
            self.acked_serial = Some(serial);
        }
    }
}
