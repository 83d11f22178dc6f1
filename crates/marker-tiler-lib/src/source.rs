//! Item source interface consumed by the tiler
//!
//! The tiler never owns marker data. It asks an [`ItemSource`] for the position and
//! selection state of opaque item references, and it is kept in sync through the
//! [`SourceEvent`]s the source emits while it changes.

use crate::Coordinate;
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::Range;

/// An ordered, mutable sequence of geolocated items
pub trait ItemSource {
    /// Stable handle of one item, valid until that item is removed
    type ItemRef: Copy + Eq + Hash + Debug;

    /// Opaque key forwarded to [`ItemSource::choose_representative`]
    type SortKey;

    /// Number of items currently available
    fn count(&self) -> usize;

    /// Item at `position` in the ordered sequence
    fn item_at(&self, position: usize) -> Option<Self::ItemRef>;

    /// Location of `item`, `None` when it has no usable location
    fn coordinate_of(&self, item: Self::ItemRef) -> Option<Coordinate>;

    fn is_selected(&self, item: Self::ItemRef) -> bool;

    /// Pick the marker that stands for a whole tile
    fn choose_representative(
        &self,
        candidates: &[Self::ItemRef],
        _sort_key: &Self::SortKey,
    ) -> Option<Self::ItemRef> {
        candidates.first().copied()
    }
}

impl<T: ItemSource + ?Sized> ItemSource for Box<T> {
    type ItemRef = T::ItemRef;
    type SortKey = T::SortKey;

    fn count(&self) -> usize {
        (**self).count()
    }

    fn item_at(&self, position: usize) -> Option<Self::ItemRef> {
        (**self).item_at(position)
    }

    fn coordinate_of(&self, item: Self::ItemRef) -> Option<Coordinate> {
        (**self).coordinate_of(item)
    }

    fn is_selected(&self, item: Self::ItemRef) -> bool {
        (**self).is_selected(item)
    }

    fn choose_representative(
        &self,
        candidates: &[Self::ItemRef],
        sort_key: &Self::SortKey,
    ) -> Option<Self::ItemRef> {
        (**self).choose_representative(candidates, sort_key)
    }
}

/// Change notification emitted by an item source
///
/// Events must be applied in the order they are emitted. Positional ranges refer to
/// the sequence as it is when the event is handled: after the insertion for
/// `ItemsInserted`, before the removal for `ItemsAboutToBeRemoved`.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent<R> {
    /// Items were inserted at these positions
    ItemsInserted(Range<usize>),
    /// Items at these positions are about to be removed
    ItemsAboutToBeRemoved(Range<usize>),
    /// Selection flags changed
    SelectionChanged { selected: Vec<R>, deselected: Vec<R> },
    /// One item moved; `previous` is where it was located before
    ItemCoordinatesChanged {
        item: R,
        previous: Option<Coordinate>,
    },
    /// The whole sequence was replaced
    StructuralReset,
    /// Many coordinates changed without individual notifications
    CoordinatesChangedDrastically,
}
