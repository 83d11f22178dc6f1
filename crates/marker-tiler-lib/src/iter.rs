//! Depth-first iteration over non-empty tiles at one level

use crate::coord::{Level, TileIndex};
use crate::source::ItemSource;
use crate::tiler::MarkerTiler;

use geo::{Intersects, Rect};

/// Non-empty tiles at a fixed level, restricted to tiles touching some region
///
/// Tiles are yielded depth-first in cell order. Subtrees without markers or outside
/// every region are never visited, and fringe tiles are pushed down on demand.
/// A tile touching several regions is yielded once.
pub struct BoundedIterator<'a, S: ItemSource> {
    tiler: &'a mut MarkerTiler<S>,
    level: Level,
    /// `None` means the whole world
    regions: Option<Vec<Rect<f64>>>,
    stack: Vec<TileIndex>,
}

impl<'a, S: ItemSource> BoundedIterator<'a, S> {
    pub fn new(tiler: &'a mut MarkerTiler<S>, level: Level, regions: Vec<Rect<f64>>) -> Self {
        Self::start(tiler, level, Some(regions))
    }

    fn start(tiler: &'a mut MarkerTiler<S>, level: Level, regions: Option<Vec<Rect<f64>>>) -> Self {
        tiler.ensure_clean();
        let mut iter = Self {
            tiler,
            level,
            regions,
            stack: Vec::new(),
        };
        let root = TileIndex::root();
        if iter.tiler.root().marker_count() > 0 && iter.overlaps(&root) {
            iter.stack.push(root);
        }
        iter
    }

    fn overlaps(&self, index: &TileIndex) -> bool {
        match &self.regions {
            Some(regions) => {
                let bounds = index.bounds();
                regions.iter().any(|region| region.intersects(&bounds))
            }
            None => true,
        }
    }
}

impl<S: ItemSource> Iterator for BoundedIterator<'_, S> {
    type Item = TileIndex;

    fn next(&mut self) -> Option<TileIndex> {
        while let Some(index) = self.stack.pop() {
            if index.level() >= self.level {
                return Some(index);
            }
            for cell in self.tiler.expand(&index).into_iter().rev() {
                let Ok(child) = index.child(cell) else {
                    continue;
                };
                if self.overlaps(&child) {
                    self.stack.push(child);
                }
            }
        }
        None
    }
}

/// Every non-empty tile at a fixed level, depth-first in cell order
pub struct NonEmptyIterator<'a, S: ItemSource> {
    inner: BoundedIterator<'a, S>,
}

impl<'a, S: ItemSource> NonEmptyIterator<'a, S> {
    pub fn new(tiler: &'a mut MarkerTiler<S>, level: Level) -> Self {
        Self {
            inner: BoundedIterator::start(tiler, level, None),
        }
    }
}

impl<S: ItemSource> Iterator for NonEmptyIterator<'_, S> {
    type Item = TileIndex;

    fn next(&mut self) -> Option<TileIndex> {
        self.inner.next()
    }
}
