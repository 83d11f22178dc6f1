//! Tile nodes of the marker pyramid
//!
//! A tile is either a fringe, holding raw marker references that were not yet
//! distributed to children, or an interior node holding only children. Counts are
//! kept on every tile; the tiler is responsible for keeping them consistent.

use crate::coord::CHILD_COUNT;
use crate::{DataError, Result};

/// Child slots of an interior tile, indexed by cell
pub type ChildSlots<R> = Box<[Option<Tile<R>>; CHILD_COUNT]>;

/// Payload of a tile
#[derive(Debug, Clone)]
pub enum TileContent<R> {
    /// Marker references not yet pushed down into children
    Fringe(Vec<R>),
    /// Materialized children, at least one slot occupied
    Interior(ChildSlots<R>),
}

/// A single node of the tile tree
#[derive(Debug, Clone)]
pub struct Tile<R> {
    /// Markers below this tile
    marker_count: usize,
    /// Selected markers below this tile
    selected_count: usize,
    content: TileContent<R>,
}

impl<R> Default for Tile<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Tile<R> {
    /// Create an empty fringe tile
    pub fn new() -> Self {
        Self {
            marker_count: 0,
            selected_count: 0,
            content: TileContent::Fringe(Vec::new()),
        }
    }

    #[inline]
    pub fn marker_count(&self) -> usize {
        self.marker_count
    }

    #[inline]
    pub fn selected_count(&self) -> usize {
        self.selected_count
    }

    #[inline]
    pub fn content(&self) -> &TileContent<R> {
        &self.content
    }

    /// Whether this tile holds raw markers instead of children
    #[inline]
    pub fn is_fringe(&self) -> bool {
        matches!(self.content, TileContent::Fringe(_))
    }

    /// Markers held directly by this tile (empty for interior tiles)
    pub fn fringe_markers(&self) -> &[R] {
        match &self.content {
            TileContent::Fringe(markers) => markers,
            TileContent::Interior(_) => &[],
        }
    }

    /// Child in slot `cell`, if materialized
    pub fn get_child(&self, cell: u8) -> Option<&Tile<R>> {
        match &self.content {
            TileContent::Interior(children) => children.get(cell as usize)?.as_ref(),
            TileContent::Fringe(_) => None,
        }
    }

    /// Attach `tile` in slot `cell`
    ///
    /// An empty fringe becomes an interior tile. Fails with
    /// [`DataError::FringeNotEmpty`] while this tile still holds raw markers and
    /// with [`DataError::ChildOccupied`] when the slot is taken. The child's counts
    /// are added to this tile's counts.
    pub fn add_child(&mut self, cell: u8, tile: Tile<R>) -> Result<()> {
        if cell as usize >= CHILD_COUNT {
            return Err(DataError::CellOutOfRange(cell));
        }
        if let TileContent::Fringe(markers) = &self.content {
            if !markers.is_empty() {
                return Err(DataError::FringeNotEmpty(markers.len()));
            }
            self.content = TileContent::Interior(empty_slots());
        }
        let TileContent::Interior(children) = &mut self.content else {
            unreachable!("fringe tiles were converted above");
        };

        let slot = &mut children[cell as usize];
        if slot.is_some() {
            return Err(DataError::ChildOccupied(cell));
        }
        self.marker_count += tile.marker_count;
        self.selected_count += tile.selected_count;
        *slot = Some(tile);
        Ok(())
    }

    /// Whether no child is materialized
    pub fn children_empty(&self) -> bool {
        self.child_count() == 0
    }

    /// Number of materialized children
    pub fn child_count(&self) -> usize {
        match &self.content {
            TileContent::Interior(children) => children.iter().flatten().count(),
            TileContent::Fringe(_) => 0,
        }
    }

    /// Cells of materialized children holding at least one marker, in cell order
    pub fn non_empty_child_cells(&self) -> Vec<u8> {
        match &self.content {
            TileContent::Interior(children) => children
                .iter()
                .enumerate()
                .filter(|(_, child)| child.as_ref().is_some_and(|c| c.marker_count > 0))
                .map(|(cell, _)| cell as u8)
                .collect(),
            TileContent::Fringe(_) => Vec::new(),
        }
    }

    pub(crate) fn content_mut(&mut self) -> &mut TileContent<R> {
        &mut self.content
    }

    pub(crate) fn get_child_mut(&mut self, cell: u8) -> Option<&mut Tile<R>> {
        match &mut self.content {
            TileContent::Interior(children) => children.get_mut(cell as usize)?.as_mut(),
            TileContent::Fringe(_) => None,
        }
    }

    /// Store `item` in this fringe and count it
    pub(crate) fn push_marker(&mut self, item: R, selected: bool) {
        debug_assert!(self.is_fringe(), "markers are only stored on fringe tiles");
        self.count_marker(selected);
        if let TileContent::Fringe(markers) = &mut self.content {
            markers.push(item);
        }
    }

    /// Child in slot `cell`, created as an empty fringe when missing
    ///
    /// Must not be called on a fringe that still holds markers.
    pub(crate) fn child_or_insert(&mut self, cell: u8) -> &mut Tile<R> {
        if let TileContent::Fringe(markers) = &self.content {
            debug_assert!(markers.is_empty(), "fringe must be pushed down first");
            self.content = TileContent::Interior(empty_slots());
        }
        match &mut self.content {
            TileContent::Interior(children) => {
                children[cell as usize].get_or_insert_with(Tile::new)
            }
            TileContent::Fringe(_) => unreachable!("fringe tiles were converted above"),
        }
    }

    /// Count one more marker below this tile
    pub(crate) fn count_marker(&mut self, selected: bool) {
        self.marker_count += 1;
        if selected {
            self.selected_count += 1;
        }
    }

    /// Count one marker less below this tile, `deselect` when it was selected
    pub(crate) fn uncount_marker(&mut self, deselect: bool) {
        debug_assert!(self.marker_count > 0, "marker count underflow");
        self.marker_count = self.marker_count.saturating_sub(1);
        if deselect {
            self.deselect_one();
        }
    }

    pub(crate) fn select_one(&mut self) {
        self.selected_count += 1;
        debug_assert!(
            self.selected_count <= self.marker_count,
            "selected count {} exceeds marker count {}",
            self.selected_count,
            self.marker_count
        );
        self.selected_count = self.selected_count.min(self.marker_count);
    }

    pub(crate) fn deselect_one(&mut self) {
        debug_assert!(self.selected_count > 0, "selected count underflow");
        self.selected_count = self.selected_count.saturating_sub(1);
    }

    /// Replace the content with an empty fringe when no child is left
    pub(crate) fn collapse_if_childless(&mut self) {
        let childless = match &self.content {
            TileContent::Interior(children) => children.iter().all(Option::is_none),
            TileContent::Fringe(_) => false,
        };
        if childless {
            self.content = TileContent::Fringe(Vec::new());
        }
    }
}

impl<R: Copy> Tile<R> {
    /// Append every marker reference below this tile to `out`
    pub fn collect_markers(&self, out: &mut Vec<R>) {
        match &self.content {
            TileContent::Fringe(markers) => out.extend_from_slice(markers),
            TileContent::Interior(children) => {
                for child in children.iter().flatten() {
                    child.collect_markers(out);
                }
            }
        }
    }
}

pub(crate) fn empty_slots<R>() -> ChildSlots<R> {
    Box::new(std::array::from_fn(|_| None))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fringe(markers: &[u32], selected: usize) -> Tile<u32> {
        let mut tile = Tile::new();
        for (i, &m) in markers.iter().enumerate() {
            tile.push_marker(m, i < selected);
        }
        tile
    }

    #[test]
    fn test_new_tile_is_empty_fringe() {
        let tile: Tile<u32> = Tile::new();
        assert!(tile.is_fringe());
        assert!(tile.children_empty());
        assert_eq!(tile.marker_count(), 0);
        assert_eq!(tile.selected_count(), 0);
        assert!(tile.fringe_markers().is_empty());
    }

    #[test]
    fn test_add_child() {
        let mut parent = Tile::new();
        parent.add_child(2, fringe(&[7, 8], 1)).unwrap();

        assert!(!parent.is_fringe());
        assert_eq!(parent.child_count(), 1);
        assert_eq!(parent.marker_count(), 2);
        assert_eq!(parent.selected_count(), 1);
        assert_eq!(parent.get_child(2).unwrap().fringe_markers(), &[7, 8]);
        assert!(parent.get_child(0).is_none());
    }

    #[test]
    fn test_add_child_rejects_occupied_slot() {
        let mut parent = Tile::new();
        parent.add_child(1, fringe(&[1], 0)).unwrap();
        assert!(matches!(
            parent.add_child(1, fringe(&[2], 0)),
            Err(DataError::ChildOccupied(1))
        ));
        assert_eq!(parent.marker_count(), 1);
    }

    #[test]
    fn test_add_child_rejects_non_empty_fringe_and_bad_cell() {
        let mut parent = fringe(&[1, 2], 0);
        assert!(matches!(
            parent.add_child(0, Tile::new()),
            Err(DataError::FringeNotEmpty(2))
        ));
        assert_eq!(parent.fringe_markers(), &[1, 2]);

        let mut parent: Tile<u32> = Tile::new();
        assert!(matches!(
            parent.add_child(CHILD_COUNT as u8, Tile::new()),
            Err(DataError::CellOutOfRange(_))
        ));
    }

    #[test]
    fn test_non_empty_child_cells() {
        let mut parent = Tile::new();
        parent.add_child(3, fringe(&[1], 0)).unwrap();
        parent.add_child(0, Tile::new()).unwrap();
        parent.add_child(1, fringe(&[2, 3], 0)).unwrap();
        assert_eq!(parent.non_empty_child_cells(), vec![1, 3]);
        assert_eq!(parent.child_count(), 3);
    }

    #[test]
    fn test_collect_markers() {
        let mut inner = Tile::new();
        inner.add_child(0, fringe(&[4], 0)).unwrap();
        let mut parent = Tile::new();
        parent.add_child(0, fringe(&[1, 2], 0)).unwrap();
        parent.add_child(3, inner).unwrap();

        let mut out = Vec::new();
        parent.collect_markers(&mut out);
        assert_eq!(out, vec![1, 2, 4]);
    }

    #[test]
    fn test_collapse_if_childless() {
        let mut parent: Tile<u32> = Tile::new();
        parent.child_or_insert(2);
        assert!(!parent.is_fringe());

        if let TileContent::Interior(children) = parent.content_mut() {
            children[2] = None;
        }
        parent.collapse_if_childless();
        assert!(parent.is_fringe());
    }
}
