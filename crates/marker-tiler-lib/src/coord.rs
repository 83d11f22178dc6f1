//! Coordinates and tile addressing
//!
//! Every tile of the marker pyramid covers a latitude/longitude box. Descending one
//! level splits that box into a `TILING` × `TILING` grid, and a [`TileIndex`] records
//! which cell was taken at each level. Cells are numbered `lat_index * TILING + lon_index`.
//!
//! Positions are resolved on an integer grid of `TILING^MAX_LEVEL` cells per axis, so
//! the path computed for a shallow level is always a prefix of the path computed for
//! a deeper one.

use crate::{DataError, Result};
use geo::{Coord, Point, Rect};
use smallvec::SmallVec;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of cells per axis when a tile is subdivided
pub const TILING: usize = 2;

/// Number of child slots of a tile
pub const CHILD_COUNT: usize = TILING * TILING;

/// Deepest level of the pyramid (length of the longest tile path)
pub const MAX_LEVEL: usize = 20;

const _: () = assert!(CHILD_COUNT <= u8::MAX as usize + 1);

/// Cells per axis at `MAX_LEVEL`
const GRID_SIZE: u64 = (TILING as u64).pow(MAX_LEVEL as u32);

const MIN_LAT: f64 = -90.0;
const MAX_LAT: f64 = 90.0;
const MIN_LON: f64 = -180.0;
const MAX_LON: f64 = 180.0;

/// A geographic position in degrees
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "RawCoordinate")
)]
pub struct Coordinate {
    lat: f64,
    lon: f64,
}

/// Unchecked serialized form of a [`Coordinate`]
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct RawCoordinate {
    lat: f64,
    lon: f64,
}

#[cfg(feature = "serde")]
impl TryFrom<RawCoordinate> for Coordinate {
    type Error = DataError;

    fn try_from(raw: RawCoordinate) -> Result<Self> {
        Coordinate::new(raw.lat, raw.lon)
    }
}

impl Coordinate {
    /// Create a coordinate, rejecting values outside `[-90, 90]` × `[-180, 180]`
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !(MIN_LAT..=MAX_LAT).contains(&lat) || !(MIN_LON..=MAX_LON).contains(&lon) {
            return Err(DataError::InvalidCoordinate { lat, lon });
        }
        Ok(Self { lat, lon })
    }

    /// Create a coordinate from arbitrary finite degrees
    ///
    /// Longitude is wrapped into `[-180, 180)` and latitude is clamped to the poles.
    pub fn wrapped(lat: f64, lon: f64) -> Result<Self> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(DataError::InvalidCoordinate { lat, lon });
        }
        Ok(Self {
            lat: lat.clamp(MIN_LAT, MAX_LAT),
            lon: (lon - MIN_LON).rem_euclid(MAX_LON - MIN_LON) + MIN_LON,
        })
    }

    #[inline]
    pub fn lat(&self) -> f64 {
        self.lat
    }

    #[inline]
    pub fn lon(&self) -> f64 {
        self.lon
    }

    /// Position on the `MAX_LEVEL` grid as `(lat_cell, lon_cell)`
    fn grid_position(&self) -> (u64, u64) {
        let to_cell = |fraction: f64| -> u64 {
            // Casting saturates at zero; the upper edge belongs to the last cell
            ((fraction * GRID_SIZE as f64).floor() as u64).min(GRID_SIZE - 1)
        };
        (
            to_cell((self.lat - MIN_LAT) / (MAX_LAT - MIN_LAT)),
            to_cell((self.lon - MIN_LON) / (MAX_LON - MIN_LON)),
        )
    }
}

impl From<Coordinate> for Point<f64> {
    fn from(coordinate: Coordinate) -> Self {
        Point::new(coordinate.lon, coordinate.lat)
    }
}

impl TryFrom<Point<f64>> for Coordinate {
    type Error = DataError;

    fn try_from(point: Point<f64>) -> Result<Self> {
        Coordinate::new(point.y(), point.x())
    }
}

/// A depth in the pyramid, guaranteed to be within `0..=MAX_LEVEL`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "usize", into = "usize")
)]
pub struct Level(u8);

impl Level {
    /// The root level, a single tile covering the whole world
    pub const ROOT: Level = Level(0);

    /// The deepest level
    pub const MAX: Level = Level(MAX_LEVEL as u8);

    /// Returns `None` when `level` is deeper than `MAX_LEVEL`
    pub const fn new(level: usize) -> Option<Self> {
        if level <= MAX_LEVEL {
            Some(Level(level as u8))
        } else {
            None
        }
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0 as usize
    }

    /// The next level down, if any
    pub const fn deeper(self) -> Option<Self> {
        Self::new(self.get() + 1)
    }

    /// All levels from the root to `MAX_LEVEL`
    pub fn all() -> impl DoubleEndedIterator<Item = Level> {
        (0..=MAX_LEVEL as u8).map(Level)
    }
}

impl TryFrom<usize> for Level {
    type Error = DataError;

    fn try_from(level: usize) -> Result<Self> {
        Level::new(level).ok_or(DataError::LevelOutOfRange(level))
    }
}

impl From<Level> for usize {
    fn from(level: Level) -> Self {
        level.get()
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Path of cell indices from the root to one tile
///
/// The empty path is the root. A path never holds more than `MAX_LEVEL` cells and
/// every cell is below `CHILD_COUNT`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "Vec<u8>", into = "Vec<u8>")
)]
pub struct TileIndex {
    cells: SmallVec<[u8; MAX_LEVEL]>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TileIndex {
    /// The root tile
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a path from raw cells, validating length and cell range
    pub fn from_cells(cells: &[u8]) -> Result<Self> {
        let mut index = Self::root();
        for &cell in cells {
            index.push(cell)?;
        }
        Ok(index)
    }

    /// Path of the tile at `level` that contains `coordinate`
    pub fn from_coordinates(coordinate: Coordinate, level: Level) -> Self {
        let (lat_cell, lon_cell) = coordinate.grid_position();
        let cells = (0..level.get())
            .map(|depth| grid_cell(lat_cell, lon_cell, depth))
            .collect();
        Self { cells }
    }

    /// Cell containing `coordinate` when descending from level `depth`
    pub(crate) fn cell_at(coordinate: Coordinate, depth: usize) -> u8 {
        let (lat_cell, lon_cell) = coordinate.grid_position();
        grid_cell(lat_cell, lon_cell, depth)
    }

    /// Center of the addressed tile
    pub fn to_coordinates(&self) -> Coordinate {
        let center = self.bounds().center();
        Coordinate {
            lat: center.y,
            lon: center.x,
        }
    }

    /// Bounding box of the addressed tile (x = longitude, y = latitude)
    pub fn bounds(&self) -> Rect<f64> {
        let mut lat_cell = 0u64;
        let mut lon_cell = 0u64;
        for &cell in &self.cells {
            lat_cell = lat_cell * TILING as u64 + (cell as usize / TILING) as u64;
            lon_cell = lon_cell * TILING as u64 + (cell as usize % TILING) as u64;
        }

        let cells_per_axis = (TILING as u64).pow(self.cells.len() as u32) as f64;
        let lat_step = (MAX_LAT - MIN_LAT) / cells_per_axis;
        let lon_step = (MAX_LON - MIN_LON) / cells_per_axis;
        let min = Coord {
            x: MIN_LON + lon_cell as f64 * lon_step,
            y: MIN_LAT + lat_cell as f64 * lat_step,
        };
        Rect::new(
            min,
            Coord {
                x: min.x + lon_step,
                y: min.y + lat_step,
            },
        )
    }

    /// Sub-path covering levels `[start, start + length)`, clamped to this path
    pub fn mid(&self, start: usize, length: usize) -> Self {
        let end = start.saturating_add(length).min(self.cells.len());
        let start = start.min(end);
        Self {
            cells: SmallVec::from_slice(&self.cells[start..end]),
        }
    }

    /// Append one cell, descending one level
    pub fn push(&mut self, cell: u8) -> Result<()> {
        if cell as usize >= CHILD_COUNT {
            return Err(DataError::CellOutOfRange(cell));
        }
        if self.cells.len() >= MAX_LEVEL {
            return Err(DataError::LevelOutOfRange(self.cells.len() + 1));
        }
        self.cells.push(cell);
        Ok(())
    }

    /// Path of the child in slot `cell`
    pub fn child(&self, cell: u8) -> Result<Self> {
        let mut child = self.clone();
        child.push(cell)?;
        Ok(child)
    }

    /// Path of the enclosing tile, `None` for the root
    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.cells.split_last()?;
        Some(Self {
            cells: SmallVec::from_slice(parent),
        })
    }

    /// Depth of the addressed tile
    #[inline]
    pub fn level(&self) -> Level {
        Level(self.cells.len() as u8)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    /// Cell taken when descending from level `depth` to `depth + 1`
    #[inline]
    pub fn at(&self, depth: usize) -> Option<u8> {
        self.cells.get(depth).copied()
    }

    #[inline]
    pub fn last_cell(&self) -> Option<u8> {
        self.cells.last().copied()
    }

    /// Latitude row of the cell at `depth`
    pub fn lat_index(&self, depth: usize) -> Option<usize> {
        self.at(depth).map(|cell| cell as usize / TILING)
    }

    /// Longitude column of the cell at `depth`
    pub fn lon_index(&self, depth: usize) -> Option<usize> {
        self.at(depth).map(|cell| cell as usize % TILING)
    }
}

/// Digit of a `MAX_LEVEL` grid position at `depth`
fn grid_cell(lat_cell: u64, lon_cell: u64, depth: usize) -> u8 {
    let divisor = (TILING as u64).pow((MAX_LEVEL - depth - 1) as u32);
    let lat_index = (lat_cell / divisor) % TILING as u64;
    let lon_index = (lon_cell / divisor) % TILING as u64;
    (lat_index * TILING as u64 + lon_index) as u8
}

impl TryFrom<Vec<u8>> for TileIndex {
    type Error = DataError;

    fn try_from(cells: Vec<u8>) -> Result<Self> {
        TileIndex::from_cells(&cells)
    }
}

impl From<TileIndex> for Vec<u8> {
    fn from(index: TileIndex) -> Self {
        index.cells.into_vec()
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cells.is_empty() {
            return f.write_str("/");
        }
        for (i, cell) in self.cells.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{cell}")?;
        }
        Ok(())
    }
}

/// Express a viewport as the regions to pass to a bounded tile iterator
///
/// A viewport whose western edge lies east of its eastern edge straddles the
/// anti-meridian and is split into two boxes, one on each side.
pub fn split_viewport(south: f64, west: f64, north: f64, east: f64) -> SmallVec<[Rect<f64>; 2]> {
    let south = south.clamp(MIN_LAT, MAX_LAT);
    let north = north.clamp(MIN_LAT, MAX_LAT);
    let region = |west: f64, east: f64| {
        Rect::new(Coord { x: west, y: south }, Coord { x: east, y: north })
    };

    let mut regions = SmallVec::new();
    if west <= east {
        regions.push(region(west, east));
    } else {
        regions.push(region(west, MAX_LON));
        regions.push(region(MIN_LON, east));
    }
    regions
}
