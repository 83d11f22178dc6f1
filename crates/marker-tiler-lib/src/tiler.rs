//! MarkerTiler - Lazily materialized marker pyramid
//!
//! The tiler keeps a tree of [`Tile`]s rooted at a tile covering the whole world.
//! New markers are appended to the first fringe tile met on their path, and fringe
//! tiles are only split into children when a query or an iterator needs to look
//! below them. Every tile carries the number of markers (and selected markers)
//! below it, so counts for any tile are answered without touching the markers.
//!
//! The tree is kept in sync with an [`ItemSource`] through [`SourceEvent`]s. When the
//! source changes too much to be tracked incrementally, the tree is dropped and
//! rebuilt on the next query.

use crate::coord::{Level, MAX_LEVEL, TileIndex};
use crate::iter::{BoundedIterator, NonEmptyIterator};
use crate::source::{ItemSource, SourceEvent};
use crate::tile::{Tile, TileContent, empty_slots};
use crate::Coordinate;

use geo::Rect;
use std::collections::HashSet;
use std::fmt;

/// Selection summary of one tile
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GroupState {
    /// No marker below the tile is selected (or the tile is empty)
    None,
    /// Some but not all markers are selected
    Some,
    /// Every marker below the tile is selected
    All,
}

impl GroupState {
    pub fn from_counts(marker_count: usize, selected_count: usize) -> Self {
        if marker_count == 0 || selected_count == 0 {
            GroupState::None
        } else if selected_count >= marker_count {
            GroupState::All
        } else {
            GroupState::Some
        }
    }
}

type ChangeListener = Box<dyn FnMut(u64)>;

/// Hierarchical marker index over an [`ItemSource`]
pub struct MarkerTiler<S: ItemSource> {
    source: S,
    root: Tile<S::ItemRef>,
    /// The tree no longer reflects the source and is rebuilt before the next query
    dirty: bool,
    /// Bumped after every handled change
    revision: u64,
    listeners: Vec<ChangeListener>,
    /// Selected items removed without selection adjustment, whose deselection
    /// notification is still to come
    pending_deselect: HashSet<S::ItemRef>,
}

impl<S: ItemSource> fmt::Debug for MarkerTiler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkerTiler")
            .field("marker_count", &self.root.marker_count())
            .field("selected_count", &self.root.selected_count())
            .field("dirty", &self.dirty)
            .field("revision", &self.revision)
            .field("listeners", &self.listeners.len())
            .field("pending_deselect", &self.pending_deselect.len())
            .finish()
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<S: ItemSource> MarkerTiler<S> {
    /// Create a tiler over `source`
    ///
    /// The tree is built lazily by the first query.
    pub fn new(source: S) -> Self {
        let dirty = source.count() > 0;
        Self {
            source,
            root: Tile::new(),
            dirty,
            revision: 0,
            listeners: Vec::new(),
            pending_deselect: HashSet::new(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Mutable access to the source
    ///
    /// Every change made through this reference must be reported back with
    /// [`MarkerTiler::handle_event`], otherwise the tree goes out of sync.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Drop the tree; it is rebuilt from the source before the next query
    pub fn set_dirty(&mut self) {
        self.mark_dirty();
        self.notify();
    }

    /// Revision of the tiles and selection, bumped on every change
    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Register a callback receiving the new revision after every change
    pub fn on_change(&mut self, listener: impl FnMut(u64) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Rebuild the tree from scratch using the current source contents
    pub fn regenerate(&mut self) {
        #[cfg(feature = "profiling")]
        profiling::scope!("tiler::regenerate");

        self.root = Tile::new();
        self.dirty = false;
        self.pending_deselect.clear();
        let mut skipped = 0usize;
        for position in 0..self.source.count() {
            let inserted = match self.source.item_at(position) {
                Some(item) => self.insert_marker(item),
                None => false,
            };
            if !inserted {
                skipped += 1;
            }
        }
        tracing::debug!(
            markers = self.root.marker_count(),
            selected = self.root.selected_count(),
            skipped,
            "Regenerated marker tiles"
        );
    }

    pub(crate) fn ensure_clean(&mut self) {
        if self.dirty {
            self.regenerate();
        }
    }

    /// Tile at `path`, pushing down fringe tiles met on the way
    ///
    /// With `stop_if_empty` a missing tile yields `None` and nothing is created.
    /// Otherwise missing tiles are created as empty placeholders.
    pub fn get_tile(&mut self, path: &TileIndex, stop_if_empty: bool) -> Option<&Tile<S::ItemRef>> {
        self.ensure_clean();
        let (tile, stale) = resolve(&mut self.root, &self.source, path, stop_if_empty);
        if stale {
            tracing::warn!(%path, "Marker lost its coordinate without notification, tiles will be rebuilt");
            self.dirty = true;
        }
        tile.map(|tile| &*tile)
    }

    pub fn get_tile_marker_count(&mut self, path: &TileIndex) -> usize {
        self.get_tile(path, true).map_or(0, Tile::marker_count)
    }

    pub fn get_tile_selected_count(&mut self, path: &TileIndex) -> usize {
        self.get_tile(path, true).map_or(0, Tile::selected_count)
    }

    pub fn get_tile_group_state(&mut self, path: &TileIndex) -> GroupState {
        self.get_tile(path, true).map_or(GroupState::None, |tile| {
            GroupState::from_counts(tile.marker_count(), tile.selected_count())
        })
    }

    /// Group state of the whole world
    pub fn global_group_state(&mut self) -> GroupState {
        self.get_tile_group_state(&TileIndex::root())
    }

    /// Every marker below the tile at `path`
    pub fn get_tile_markers(&mut self, path: &TileIndex) -> Vec<S::ItemRef> {
        let mut markers = Vec::new();
        if let Some(tile) = self.get_tile(path, true) {
            markers.reserve(tile.marker_count());
            tile.collect_markers(&mut markers);
        }
        markers
    }

    /// The marker chosen by the source to stand for the tile at `path`
    pub fn get_tile_representative_marker(
        &mut self,
        path: &TileIndex,
        sort_key: &S::SortKey,
    ) -> Option<S::ItemRef> {
        let candidates = self.get_tile_markers(path);
        if candidates.is_empty() {
            return None;
        }
        self.source.choose_representative(&candidates, sort_key)
    }

    /// Add `item` at its current coordinate
    ///
    /// Items without a coordinate are ignored. Nothing happens while the tree is
    /// dirty, the rebuild picks the item up.
    pub fn add_marker(&mut self, item: S::ItemRef) {
        if self.insert_marker(item) {
            self.notify();
        }
    }

    /// Remove `item` using its current coordinate
    ///
    /// With `ignore_selection_adjustment` the source is expected to report the
    /// deselection of a selected item separately. The counts are corrected right
    /// away and that later deselection is absorbed instead of applied twice.
    pub fn remove_marker(&mut self, item: S::ItemRef, ignore_selection_adjustment: bool) {
        if let Some(coordinate) = self.source.coordinate_of(item) {
            self.remove_marker_at(item, coordinate, ignore_selection_adjustment);
        }
    }

    /// Remove `item` from the path of `coordinate`, where it was inserted
    pub fn remove_marker_at(
        &mut self,
        item: S::ItemRef,
        coordinate: Coordinate,
        ignore_selection_adjustment: bool,
    ) {
        if self.delete_marker(item, coordinate, ignore_selection_adjustment) {
            self.notify();
        }
    }

    /// Apply selection changes of items already present in the tree
    pub fn update_selection(&mut self, selected: &[S::ItemRef], deselected: &[S::ItemRef]) {
        if self.apply_selection(selected, deselected) {
            self.notify();
        }
    }

    /// Apply one change notification of the source
    pub fn handle_event(&mut self, event: SourceEvent<S::ItemRef>) {
        match event {
            SourceEvent::ItemsInserted(range) => {
                for position in range {
                    if let Some(item) = self.source.item_at(position) {
                        self.insert_marker(item);
                    }
                }
            }
            SourceEvent::ItemsAboutToBeRemoved(range) => {
                for position in range {
                    let Some(item) = self.source.item_at(position) else {
                        continue;
                    };
                    if let Some(coordinate) = self.source.coordinate_of(item) {
                        self.delete_marker(item, coordinate, false);
                    }
                }
            }
            SourceEvent::SelectionChanged {
                selected,
                deselected,
            } => {
                self.apply_selection(&selected, &deselected);
            }
            SourceEvent::ItemCoordinatesChanged { item, previous } => {
                if let Some(previous) = previous {
                    self.delete_marker(item, previous, false);
                }
                self.insert_marker(item);
            }
            SourceEvent::StructuralReset | SourceEvent::CoordinatesChangedDrastically => {
                self.mark_dirty();
            }
        }
        self.notify();
    }

    /// Iterate over non-empty tiles at `level`
    pub fn non_empty_tiles(&mut self, level: Level) -> NonEmptyIterator<'_, S> {
        NonEmptyIterator::new(self, level)
    }

    /// Iterate over non-empty tiles at `level` intersecting any of `regions`
    pub fn tiles_in_regions(
        &mut self,
        level: Level,
        regions: impl IntoIterator<Item = Rect<f64>>,
    ) -> BoundedIterator<'_, S> {
        BoundedIterator::new(self, level, regions.into_iter().collect())
    }

    /// Cells of the non-empty children of the tile at `path`
    ///
    /// The tile itself is pushed down when it still holds raw markers.
    pub(crate) fn expand(&mut self, path: &TileIndex) -> Vec<u8> {
        let (tile, mut stale) = resolve(&mut self.root, &self.source, path, true);
        let cells = match tile {
            Some(tile) => {
                if path.len() < MAX_LEVEL {
                    stale |= push_down(tile, path.len(), &self.source);
                }
                tile.non_empty_child_cells()
            }
            None => Vec::new(),
        };
        if stale {
            tracing::warn!(%path, "Marker lost its coordinate without notification, tiles will be rebuilt");
            self.dirty = true;
        }
        cells
    }

    pub(crate) fn root(&self) -> &Tile<S::ItemRef> {
        &self.root
    }

    fn mark_dirty(&mut self) {
        if !self.dirty {
            tracing::debug!("Marker tiles marked dirty");
        }
        self.root = Tile::new();
        self.pending_deselect.clear();
        self.dirty = true;
    }

    fn notify(&mut self) {
        self.revision += 1;
        for listener in &mut self.listeners {
            listener(self.revision);
        }
    }

    /// Returns whether the item was added to the tree
    fn insert_marker(&mut self, item: S::ItemRef) -> bool {
        if self.dirty {
            return false;
        }
        let Some(coordinate) = self.source.coordinate_of(item) else {
            return false;
        };
        let selected = self.source.is_selected(item);
        let path = TileIndex::from_coordinates(coordinate, Level::MAX);
        self.pending_deselect.remove(&item);

        let mut tile = &mut self.root;
        for &cell in path.cells() {
            if tile.is_fringe() {
                break;
            }
            tile.count_marker(selected);
            tile = tile.child_or_insert(cell);
        }
        tile.push_marker(item, selected);
        true
    }

    /// Returns whether the item was found and removed
    fn delete_marker(
        &mut self,
        item: S::ItemRef,
        coordinate: Coordinate,
        ignore_selection_adjustment: bool,
    ) -> bool {
        if self.dirty {
            return false;
        }
        let selected = self.source.is_selected(item);
        let path = TileIndex::from_coordinates(coordinate, Level::MAX);
        let removed = remove_from(&mut self.root, path.cells(), item, selected);
        if !removed {
            tracing::trace!(?item, %path, "Marker to remove is not in the tile tree");
        } else if selected && ignore_selection_adjustment {
            self.pending_deselect.insert(item);
        }
        removed
    }

    /// Returns whether any count was touched
    fn apply_selection(&mut self, selected: &[S::ItemRef], deselected: &[S::ItemRef]) -> bool {
        if self.dirty {
            return false;
        }
        let mut changed = false;
        for (items, select) in [(selected, true), (deselected, false)] {
            for &item in items {
                if self.pending_deselect.contains(&item) {
                    // Already uncounted on removal
                    if !select {
                        self.pending_deselect.remove(&item);
                    }
                    continue;
                }
                let Some(coordinate) = self.source.coordinate_of(item) else {
                    continue;
                };
                let path = TileIndex::from_coordinates(coordinate, Level::MAX);
                adjust_selection(&mut self.root, path.cells(), select);
                changed = true;
            }
        }
        changed
    }
}

/// Walk `path` from `root`, pushing down fringe tiles that hold markers
///
/// The flag is set when some marker had no coordinate during a push-down.
fn resolve<'a, S: ItemSource>(
    root: &'a mut Tile<S::ItemRef>,
    source: &S,
    path: &TileIndex,
    stop_if_empty: bool,
) -> (Option<&'a mut Tile<S::ItemRef>>, bool) {
    let mut stale = false;
    let mut tile = root;
    for (depth, &cell) in path.cells().iter().enumerate() {
        stale |= push_down(tile, depth, source);
        if stop_if_empty && tile.get_child(cell).is_none() {
            return (None, stale);
        }
        tile = tile.child_or_insert(cell);
    }
    (Some(tile), stale)
}

/// Distribute the raw markers of a fringe tile at `depth` into children
///
/// Returns `true` when a marker had to be dropped because it has no coordinate.
fn push_down<S: ItemSource>(tile: &mut Tile<S::ItemRef>, depth: usize, source: &S) -> bool {
    let markers = match tile.content_mut() {
        TileContent::Fringe(markers) if !markers.is_empty() => std::mem::take(markers),
        _ => return false,
    };
    tracing::trace!(depth, markers = markers.len(), "Pushing down fringe tile");

    let mut children = empty_slots();
    let mut stale = false;
    for item in markers {
        let Some(coordinate) = source.coordinate_of(item) else {
            stale = true;
            continue;
        };
        let cell = TileIndex::cell_at(coordinate, depth);
        children[cell as usize]
            .get_or_insert_with(Tile::new)
            .push_marker(item, source.is_selected(item));
    }
    *tile.content_mut() = TileContent::Interior(children);
    tile.collapse_if_childless();
    stale
}

/// Remove `item` below `tile` following `cells`, detaching tiles left empty
fn remove_from<R: Copy + Eq>(tile: &mut Tile<R>, cells: &[u8], item: R, deselect: bool) -> bool {
    let found = match tile.content_mut() {
        TileContent::Fringe(markers) => match markers.iter().position(|m| *m == item) {
            Some(position) => {
                markers.remove(position);
                true
            }
            None => false,
        },
        TileContent::Interior(children) => {
            let Some((&cell, rest)) = cells.split_first() else {
                return false;
            };
            let slot = &mut children[cell as usize];
            let found = slot
                .as_mut()
                .is_some_and(|child| remove_from(child, rest, item, deselect));
            if found && slot.as_ref().is_some_and(|child| child.marker_count() == 0) {
                *slot = None;
            }
            found
        }
    };
    if found {
        tile.uncount_marker(deselect);
        tile.collapse_if_childless();
    }
    found
}

/// Adjust selected counts on the materialized tiles along `cells`
fn adjust_selection<R>(root: &mut Tile<R>, cells: &[u8], select: bool) {
    let mut tile = root;
    let mut cells = cells.iter();
    loop {
        if select {
            tile.select_one();
        } else {
            tile.deselect_one();
        }
        let Some(&cell) = cells.next() else {
            break;
        };
        match tile.get_child_mut(cell) {
            Some(child) => tile = child,
            None => break,
        }
    }
}
