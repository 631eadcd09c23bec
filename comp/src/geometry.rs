//! Typed geometry for the two coordinate spaces the engine deals in.
//!
//! `Logical` is the surface-local space requests like `damage` and
//! subsurface positions are expressed in; `BufferCoords` is the raw buffer
//! pixel space of `damage_buffer` and texture sizes. The euclid unit tags
//! keep the two from mixing silently.

use std::fmt;

use euclid::{Point2D, Rect, Size2D};

/// Surface-local logical coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Logical;

/// Buffer pixel coordinates, before scale and transform are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferCoords;

pub type Point = Point2D<i32, Logical>;
pub type Size = Size2D<i32, Logical>;
pub type LogicalRect = Rect<i32, Logical>;
pub type BufferRect = Rect<i32, BufferCoords>;
pub type BufferSize = Size2D<i32, BufferCoords>;

/// The viewport source rectangle, fractional per the protocol.
pub type SrcRect = Rect<f64, Logical>;

/// The orientation of a buffer relative to the output, as set by
/// `set_buffer_transform`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    #[default]
    Normal,
    Rotated90,
    Rotated180,
    Rotated270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

impl Transform {
    /// Decodes the wire enum (`wl_output.transform`). Out-of-range values
    /// are a protocol error, not a clamp.
    pub fn from_raw(raw: i32) -> Option<Transform> {
        Some(match raw {
            0 => Transform::Normal,
            1 => Transform::Rotated90,
            2 => Transform::Rotated180,
            3 => Transform::Rotated270,
            4 => Transform::Flipped,
            5 => Transform::Flipped90,
            6 => Transform::Flipped180,
            7 => Transform::Flipped270,
            _ => return None,
        })
    }

    /// Whether the transform swaps the buffer's width and height.
    pub fn is_rotated(self) -> bool {
        matches!(
            self,
            Transform::Rotated90 | Transform::Rotated270 | Transform::Flipped90 | Transform::Flipped270
        )
    }
}

/// An accumulated set of rectangles.
///
/// This is a carrier, not a region algebra: union appends and coverage may
/// overlap. Consumers that need normalized regions (the renderer, input
/// routing) run their own algebra over [`Region::rects`].
pub struct Region<U = Logical> {
    rects: Vec<Rect<i32, U>>,
}

impl<U> Region<U> {
    pub fn new() -> Self {
        Self { rects: Vec::new() }
    }

    pub fn from_rects(rects: impl IntoIterator<Item = Rect<i32, U>>) -> Self {
        Self {
            rects: rects.into_iter().collect(),
        }
    }

    /// Adds a rectangle to the covered area. Empty rectangles are dropped.
    pub fn add(&mut self, rect: Rect<i32, U>) {
        if rect.size.width > 0 && rect.size.height > 0 {
            self.rects.push(rect);
        }
    }

    /// Unions another region into this one, preserving its rect order.
    pub fn union(&mut self, other: &Region<U>) {
        self.rects.extend(other.rects.iter().copied());
    }

    pub fn take(&mut self) -> Region<U> {
        Region {
            rects: std::mem::take(&mut self.rects),
        }
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[Rect<i32, U>] {
        &self.rects
    }

    /// The bounding rectangle of the covered area, `None` when empty.
    pub fn bounds(&self) -> Option<Rect<i32, U>> {
        let mut iter = self.rects.iter();
        let first = *iter.next()?;
        Some(iter.fold(first, |bounds, rect| bounds.union(rect)))
    }
}

impl<U> Default for Region<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U> Clone for Region<U> {
    fn clone(&self) -> Self {
        Self {
            rects: self.rects.clone(),
        }
    }
}

impl<U> PartialEq for Region<U> {
    fn eq(&self, other: &Self) -> bool {
        self.rects == other.rects
    }
}

impl<U> fmt::Debug for Region<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.rects.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use euclid::rect;

    use super::{LogicalRect, Region, Transform};

    #[test]
    fn union_appends_in_order() {
        let mut region: Region = Region::new();
        region.add(rect(0, 0, 10, 10));

        let mut other: Region = Region::new();
        other.add(rect(5, 5, 10, 10));
        other.add(rect(0, 0, 0, 0)); // dropped, empty

        region.union(&other);

        let rects: Vec<LogicalRect> = region.rects().to_vec();
        assert_eq!(rects, [rect(0, 0, 10, 10), rect(5, 5, 10, 10)]);
        assert_eq!(region.bounds(), Some(rect(0, 0, 15, 15)));
    }

    #[test]
    fn rotation() {
        assert!(!Transform::Normal.is_rotated());
        assert!(!Transform::Flipped180.is_rotated());
        assert!(Transform::Rotated90.is_rotated());
        assert!(Transform::Flipped270.is_rotated());
    }
}
