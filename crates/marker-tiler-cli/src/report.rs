//! Tile report printed by the command line driver

use crate::settings::Settings;
use geo::Rect;
use marker_tiler_lib::{Level, MarkerCollection, MarkerId, MarkerTiler, Result, SortKey, TileIndex};
use std::cmp::Reverse;
use std::io::Write;

/// What to print for one report
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub level: Level,
    pub regions: Option<Vec<Rect<f64>>>,
    pub sort_key: SortKey,
    pub max_tiles: Option<usize>,
}

impl ReportOptions {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            level: Level::try_from(settings.level)?,
            regions: settings.regions(),
            sort_key: settings.sort.into(),
            max_tiles: settings.max_tiles,
        })
    }
}

/// Load the configured files and print the tile report to stdout
pub fn run(settings: &Settings) -> Result<()> {
    #[cfg(feature = "profiling")]
    profiling::scope!("report::run");

    let options = ReportOptions::from_settings(settings)?;
    let collection = MarkerCollection::load_from_files(settings.gpx_files.clone())?;
    let mut tiler = MarkerTiler::new(collection);
    select_newest(&mut tiler, settings.select_newest);

    let stdout = std::io::stdout();
    write_report(&mut tiler, &options, &mut stdout.lock())
}

/// Select the `count` markers with the latest timestamps
///
/// Markers without a timestamp are considered oldest.
pub fn select_newest(tiler: &mut MarkerTiler<MarkerCollection>, count: usize) {
    if count == 0 {
        return;
    }
    let collection = tiler.source();
    let mut ids: Vec<MarkerId> = collection.ids().to_vec();
    ids.sort_by_key(|&id| Reverse(collection.get(id).and_then(|marker| marker.time)));
    ids.truncate(count);

    let event = tiler.source_mut().set_selected(&ids, true);
    tiler.handle_event(event);
    tracing::debug!(selected = ids.len(), "Selected newest markers");
}

/// Write one line per non-empty tile at the requested level
pub fn write_report(
    tiler: &mut MarkerTiler<MarkerCollection>,
    options: &ReportOptions,
    out: &mut impl Write,
) -> Result<()> {
    let tiles: Vec<_> = match &options.regions {
        Some(regions) => tiler
            .tiles_in_regions(options.level, regions.iter().copied())
            .collect(),
        None => tiler.non_empty_tiles(options.level).collect(),
    };
    tracing::info!(level = %options.level, tiles = tiles.len(), "Collected tiles");

    let total = tiler.get_tile_marker_count(&TileIndex::root());
    let selected = tiler.get_tile_selected_count(&TileIndex::root());
    writeln!(
        out,
        "# {} markers, {} selected ({:?}), {} tiles at level {}",
        total,
        selected,
        tiler.global_group_state(),
        tiles.len(),
        options.level
    )?;
    writeln!(out, "tile\tlat\tlon\tmarkers\tselected\tstate\trepresentative")?;

    let shown = options.max_tiles.unwrap_or(tiles.len());
    for tile in tiles.iter().take(shown) {
        let center = tile.to_coordinates();
        let representative = tiler
            .get_tile_representative_marker(tile, &options.sort_key)
            .map(|id| describe(tiler.source(), id))
            .unwrap_or_default();
        writeln!(
            out,
            "{}\t{:.5}\t{:.5}\t{}\t{}\t{:?}\t{}",
            tile,
            center.lat(),
            center.lon(),
            tiler.get_tile_marker_count(tile),
            tiler.get_tile_selected_count(tile),
            tiler.get_tile_group_state(tile),
            representative
        )?;
    }
    if tiles.len() > shown {
        writeln!(out, "# {} more tiles not shown", tiles.len() - shown)?;
    }
    Ok(())
}

fn describe(collection: &MarkerCollection, id: MarkerId) -> String {
    let Some(marker) = collection.get(id) else {
        return String::new();
    };
    match (&marker.label, marker.coordinate) {
        (Some(label), _) => label.clone(),
        (None, Some(coordinate)) => format!("#{} @ {:.5},{:.5}", id.get(), coordinate.lat(), coordinate.lon()),
        (None, None) => format!("#{}", id.get()),
    }
}
