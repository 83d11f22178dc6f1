use clap::{Parser, ValueEnum};
use geo::Rect;
use marker_tiler_lib::{SortKey, split_viewport};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Marker Tiler - Group GPX points into map tiles and report counts per tile
pub struct Settings {
    /// GPX files to load
    #[clap(short, long, value_name = "FILE", required = true)]
    pub gpx_files: Vec<PathBuf>,

    /// Tile level to report (0 = whole world, max 20)
    #[clap(short, long, default_value = "8")]
    pub level: usize,

    /// Only report tiles touching this box, as "south,west,north,east" in degrees.
    /// West may be greater than east for boxes crossing the antimeridian. Repeatable.
    #[clap(short, long, value_name = "S,W,N,E")]
    pub region: Vec<Region>,

    /// Which marker represents a tile
    #[clap(short, long, value_enum, default_value = "first")]
    pub sort: SortOrder,

    /// Select the N most recent markers before reporting
    #[clap(long, default_value = "0")]
    pub select_newest: usize,

    /// Maximum number of tiles to print
    #[clap(long)]
    pub max_tiles: Option<usize>,
}

impl Settings {
    /// Parse settings from the process arguments, exiting on error
    pub fn from_cli() -> Self {
        match Settings::try_parse() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    /// Requested regions as lon/lat rectangles, `None` for the whole world
    pub fn regions(&self) -> Option<Vec<Rect<f64>>> {
        if self.region.is_empty() {
            return None;
        }
        Some(self.region.iter().flat_map(Region::to_rects).collect())
    }
}

/// Representative marker choice, as accepted on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    First,
    Newest,
    Oldest,
}

impl From<SortOrder> for SortKey {
    fn from(order: SortOrder) -> Self {
        match order {
            SortOrder::First => SortKey::First,
            SortOrder::Newest => SortKey::Newest,
            SortOrder::Oldest => SortKey::Oldest,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegionError {
    #[error("expected 4 comma separated numbers, got {0}")]
    WrongArity(usize),

    #[error("invalid number {0:?}")]
    InvalidNumber(String),

    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("south {south} is above north {north}")]
    Inverted { south: f64, north: f64 },
}

/// A geographic box given as south, west, north and east bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl Region {
    /// Rectangles covering the box, split at the antimeridian when needed
    pub fn to_rects(&self) -> impl Iterator<Item = Rect<f64>> {
        split_viewport(self.south, self.west, self.north, self.east).into_iter()
    }
}

impl FromStr for Region {
    type Err = RegionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|part| {
                let part = part.trim();
                part.parse::<f64>()
                    .ok()
                    .filter(|value| value.is_finite())
                    .ok_or_else(|| RegionError::InvalidNumber(part.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let [south, west, north, east] = values[..] else {
            return Err(RegionError::WrongArity(values.len()));
        };
        for lat in [south, north] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(RegionError::LatitudeOutOfRange(lat));
            }
        }
        if south > north {
            return Err(RegionError::Inverted { south, north });
        }
        Ok(Region {
            south,
            west,
            north,
            east,
        })
    }
}
