//! Marker Tiler Library - Hierarchical Tile Index for Map Markers
//!
//! This library groups large numbers of geolocated markers into a pyramid of map
//! tiles, so a map view can ask how many markers (and how many selected markers) lie
//! below any tile without visiting them. Tiles are materialized lazily: markers stay
//! in the first tile reached on their path until a query needs to look deeper.
//!
//! # Architecture
//!
//! - **[`TileIndex`]**: Path of cells addressing one tile, derived from a [`Coordinate`]
//! - **[`Tile`]**: Node of the pyramid, either a fringe of raw markers or an interior node
//! - **[`ItemSource`]**: Interface to the ordered marker data and its [`SourceEvent`]s
//! - **[`MarkerTiler`]**: The pyramid itself, kept in sync with a source
//! - **[`MarkerCollection`]**: Ready-made source backed by memory, with GPX import
//!
//! # Performance Characteristics
//!
//! - **Insert / Remove / Select**: O(D) where D=`MAX_LEVEL`
//! - **Count queries**: O(D) plus a one-time push-down of the fringe tiles on the path
//! - **Iteration**: proportional to the non-empty tiles visited

mod collection;
mod coord;
mod iter;
mod source;
mod tile;
mod tiler;

// Public API exports
pub use collection::{Marker, MarkerCollection, MarkerId, SortKey};
pub use coord::{CHILD_COUNT, Coordinate, Level, MAX_LEVEL, TILING, TileIndex, split_viewport};
pub use iter::{BoundedIterator, NonEmptyIterator};
pub use source::{ItemSource, SourceEvent};
pub use tile::{ChildSlots, Tile, TileContent};
pub use tiler::{GroupState, MarkerTiler};

/// Error types for the marker tiler
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("GPX parsing error: {0}")]
    GpxParse(#[from] gpx::errors::GpxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid coordinate: lat {lat}, lon {lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("Level {0} is deeper than the maximum level {max}", max = MAX_LEVEL)]
    LevelOutOfRange(usize),

    #[error("Cell {0} is out of range, tiles have {count} children", count = CHILD_COUNT)]
    CellOutOfRange(u8),

    #[error("Child slot {0} is already occupied")]
    ChildOccupied(u8),

    #[error("Tile still holds {0} markers that were not pushed down")]
    FringeNotEmpty(usize),

    #[error("No markers loaded")]
    EmptyCollection,
}

pub type Result<T> = std::result::Result<T, DataError>;
