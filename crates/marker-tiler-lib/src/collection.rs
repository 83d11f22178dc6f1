//! MarkerCollection - In-memory marker store feeding a tiler
//!
//! The collection owns the marker data and hands out stable [`MarkerId`]s. Every
//! mutation returns the [`SourceEvent`] describing it, so the owner can forward it to
//! the [`MarkerTiler`](crate::MarkerTiler) driving the map.

use crate::source::{ItemSource, SourceEvent};
use crate::{Coordinate, DataError, Result};

use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;

/// Stable handle of a marker, never reused within a collection
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MarkerId(u64);

impl MarkerId {
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// A single point of interest
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Marker {
    /// `None` for markers that cannot be placed on the map
    pub coordinate: Option<Coordinate>,
    /// Unix timestamp in seconds
    pub time: Option<i64>,
    pub label: Option<String>,
}

impl Marker {
    /// A marker at `coordinate` without time or label
    pub fn at(coordinate: Coordinate) -> Self {
        Self {
            coordinate: Some(coordinate),
            ..Self::default()
        }
    }
}

/// Which marker stands for a group of markers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SortKey {
    /// Earliest in collection order
    #[default]
    First,
    /// Latest timestamp, markers without time lose
    Newest,
    /// Earliest timestamp, markers without time lose
    Oldest,
}

#[derive(Clone, Debug)]
struct Entry {
    marker: Marker,
    selected: bool,
}

/// Ordered collection of markers with selection flags
#[derive(Clone, Debug, Default)]
pub struct MarkerCollection {
    /// Collection order
    order: Vec<MarkerId>,
    entries: HashMap<MarkerId, Entry>,
    next_id: u64,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl MarkerCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a collection from the waypoints and track points of a GPX document
    pub fn from_gpx(gpx: &gpx::Gpx) -> Self {
        let mut collection = Self::new();
        collection.append_gpx(gpx);
        collection
    }

    /// Load GPX files in parallel into a single collection
    ///
    /// Files keep the order of `paths`. Fails on the first unreadable file, or with
    /// [`DataError::EmptyCollection`] when the files hold no point at all.
    pub fn load_from_files<P: AsRef<Path> + Send + Sync>(paths: Vec<P>) -> Result<Self> {
        #[cfg(feature = "profiling")]
        profiling::scope!("collection::load_from_files");

        let file_count = paths.len();
        let documents: Result<Vec<gpx::Gpx>> = paths
            .into_par_iter()
            .map(|path| {
                let file = std::fs::File::open(path.as_ref())?;
                let reader = std::io::BufReader::new(file);
                Ok(gpx::read(reader)?)
            })
            .collect();

        let mut collection = Self::new();
        for document in documents? {
            collection.append_gpx(&document);
        }
        if collection.is_empty() {
            return Err(DataError::EmptyCollection);
        }
        tracing::info!(
            files = file_count,
            markers = collection.len(),
            "Loaded markers from GPX files"
        );
        Ok(collection)
    }

    /// Append the points of a GPX document
    ///
    /// Points outside the valid coordinate range are kept without a coordinate.
    /// Returns the insertion event, or `None` when the document holds no point.
    pub fn append_gpx(&mut self, gpx: &gpx::Gpx) -> Option<SourceEvent<MarkerId>> {
        let waypoints = gpx.waypoints.iter().map(|waypoint| (waypoint, None));
        let track_points = gpx.tracks.iter().flat_map(|track| {
            track
                .segments
                .iter()
                .flat_map(|segment| segment.points.iter())
                .map(move |point| (point, track.name.as_deref()))
        });

        let markers: Vec<Marker> = waypoints
            .chain(track_points)
            .map(|(waypoint, track_name)| marker_from_waypoint(waypoint, track_name))
            .collect();
        self.extend(markers)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids in collection order
    pub fn ids(&self) -> &[MarkerId] {
        &self.order
    }

    pub fn get(&self, id: MarkerId) -> Option<&Marker> {
        self.entries.get(&id).map(|entry| &entry.marker)
    }

    pub fn position_of(&self, id: MarkerId) -> Option<usize> {
        self.order.iter().position(|&other| other == id)
    }

    /// Selected ids in collection order
    pub fn selected_ids(&self) -> Vec<MarkerId> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.entries.get(id).is_some_and(|entry| entry.selected))
            .collect()
    }

    /// Append a marker
    pub fn push(&mut self, marker: Marker) -> (MarkerId, SourceEvent<MarkerId>) {
        self.insert(self.len(), marker)
    }

    /// Insert a marker at `position`, clamped to the end of the collection
    pub fn insert(&mut self, position: usize, marker: Marker) -> (MarkerId, SourceEvent<MarkerId>) {
        let position = position.min(self.len());
        let id = self.allocate(marker);
        self.order.insert(position, id);
        (id, SourceEvent::ItemsInserted(position..position + 1))
    }

    /// Append several markers, returning a single event for all of them
    pub fn extend(&mut self, markers: impl IntoIterator<Item = Marker>) -> Option<SourceEvent<MarkerId>> {
        let start = self.len();
        for marker in markers {
            let id = self.allocate(marker);
            self.order.push(id);
        }
        let end = self.len();
        (end > start).then_some(SourceEvent::ItemsInserted(start..end))
    }

    /// Event to deliver before [`MarkerCollection::remove`] is called with `range`
    pub fn removal_event(&self, range: Range<usize>) -> SourceEvent<MarkerId> {
        SourceEvent::ItemsAboutToBeRemoved(self.clamp(range))
    }

    /// Remove the markers at `range` and return them
    pub fn remove(&mut self, range: Range<usize>) -> Vec<Marker> {
        let range = self.clamp(range);
        self.order
            .drain(range)
            .collect::<Vec<_>>()
            .into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .map(|entry| entry.marker)
            .collect()
    }

    /// Move a marker, returning `None` when the id is unknown
    pub fn set_coordinate(
        &mut self,
        id: MarkerId,
        coordinate: Option<Coordinate>,
    ) -> Option<SourceEvent<MarkerId>> {
        let entry = self.entries.get_mut(&id)?;
        let previous = std::mem::replace(&mut entry.marker.coordinate, coordinate);
        Some(SourceEvent::ItemCoordinatesChanged { item: id, previous })
    }

    /// Set the selection flag of `ids`
    ///
    /// The event only lists markers whose flag actually changed.
    pub fn set_selected(&mut self, ids: &[MarkerId], selected: bool) -> SourceEvent<MarkerId> {
        let mut changed = Vec::new();
        for &id in ids {
            if let Some(entry) = self.entries.get_mut(&id) {
                if entry.selected != selected {
                    entry.selected = selected;
                    changed.push(id);
                }
            }
        }
        if selected {
            SourceEvent::SelectionChanged {
                selected: changed,
                deselected: Vec::new(),
            }
        } else {
            SourceEvent::SelectionChanged {
                selected: Vec::new(),
                deselected: changed,
            }
        }
    }

    /// Remove every marker. Ids are not reused afterwards.
    pub fn clear(&mut self) -> SourceEvent<MarkerId> {
        self.order.clear();
        self.entries.clear();
        SourceEvent::StructuralReset
    }

    fn allocate(&mut self, marker: Marker) -> MarkerId {
        let id = MarkerId(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            id,
            Entry {
                marker,
                selected: false,
            },
        );
        id
    }

    fn clamp(&self, range: Range<usize>) -> Range<usize> {
        let end = range.end.min(self.len());
        range.start.min(end)..end
    }
}

impl ItemSource for MarkerCollection {
    type ItemRef = MarkerId;
    type SortKey = SortKey;

    fn count(&self) -> usize {
        self.len()
    }

    fn item_at(&self, position: usize) -> Option<MarkerId> {
        self.order.get(position).copied()
    }

    fn coordinate_of(&self, item: MarkerId) -> Option<Coordinate> {
        self.entries.get(&item)?.marker.coordinate
    }

    fn is_selected(&self, item: MarkerId) -> bool {
        self.entries.get(&item).is_some_and(|entry| entry.selected)
    }

    fn choose_representative(&self, candidates: &[MarkerId], sort_key: &SortKey) -> Option<MarkerId> {
        let time_of = |id: &&MarkerId| self.get(**id).and_then(|marker| marker.time);
        let timed = candidates.iter().filter(|id| time_of(id).is_some());
        let chosen = match sort_key {
            SortKey::First => None,
            // `max_by_key` keeps the last maximum, reverse to keep the first one
            SortKey::Newest => timed.rev().max_by_key(time_of),
            SortKey::Oldest => timed.min_by_key(time_of),
        };
        chosen.or(candidates.first()).copied()
    }
}

fn marker_from_waypoint(waypoint: &gpx::Waypoint, track_name: Option<&str>) -> Marker {
    let point = waypoint.point();
    let coordinate = match Coordinate::try_from(point) {
        Ok(coordinate) => Some(coordinate),
        Err(err) => {
            tracing::warn!(%err, "Skipping invalid GPX point");
            None
        }
    };
    Marker {
        coordinate,
        time: waypoint
            .time
            .map(|time| time::OffsetDateTime::from(time).unix_timestamp()),
        label: waypoint
            .name
            .clone()
            .or_else(|| track_name.map(str::to_owned)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpx::{Gpx, Track, TrackSegment, Waypoint};

    fn create_test_waypoint(lat: f64, lon: f64) -> Waypoint {
        Waypoint::new(geo::Point::new(lon, lat))
    }

    fn create_test_gpx() -> Gpx {
        let mut gpx = Gpx::default();
        let mut named = create_test_waypoint(46.5, 8.0);
        named.name = Some("Summit".to_string());
        gpx.waypoints.push(named);

        let mut track = Track::default();
        track.name = Some("Morning ride".to_string());
        let mut segment = TrackSegment::default();
        for i in 0..10 {
            segment
                .points
                .push(create_test_waypoint(46.0 + i as f64 * 0.01, 7.0 + i as f64 * 0.01));
        }
        // Out of range latitude
        segment.points.push(create_test_waypoint(123.0, 7.0));
        track.segments.push(segment);
        gpx.tracks.push(track);
        gpx
    }

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    #[test]
    fn test_collection_creation() {
        let collection = MarkerCollection::new();
        assert!(collection.is_empty());
        assert_eq!(collection.count(), 0);
        assert_eq!(collection.item_at(0), None);
    }

    #[test]
    fn test_from_gpx() {
        let collection = MarkerCollection::from_gpx(&create_test_gpx());
        assert_eq!(collection.len(), 12);

        let first = collection.get(collection.ids()[0]).unwrap();
        assert_eq!(first.label.as_deref(), Some("Summit"));
        assert_eq!(first.coordinate, Some(coord(46.5, 8.0)));

        let track_point = collection.get(collection.ids()[1]).unwrap();
        assert_eq!(track_point.label.as_deref(), Some("Morning ride"));

        let invalid = collection.ids()[11];
        assert_eq!(collection.coordinate_of(invalid), None);
    }

    #[test]
    fn test_load_from_missing_file() {
        let result = MarkerCollection::load_from_files(vec!["/nonexistent/markers.gpx"]);
        assert!(matches!(result, Err(DataError::Io(_))));
    }

    #[test]
    fn test_load_from_no_files() {
        let result = MarkerCollection::load_from_files(Vec::<&str>::new());
        assert!(matches!(result, Err(DataError::EmptyCollection)));
    }

    #[test]
    fn test_push_and_insert_events() {
        let mut collection = MarkerCollection::new();
        let (a, event) = collection.push(Marker::at(coord(1.0, 1.0)));
        assert_eq!(event, SourceEvent::ItemsInserted(0..1));
        let (b, event) = collection.insert(0, Marker::at(coord(2.0, 2.0)));
        assert_eq!(event, SourceEvent::ItemsInserted(0..1));
        let (c, event) = collection.insert(99, Marker::default());
        assert_eq!(event, SourceEvent::ItemsInserted(2..3));

        assert_eq!(collection.ids(), &[b, a, c]);
        assert_eq!(collection.position_of(c), Some(2));
    }

    #[test]
    fn test_extend() {
        let mut collection = MarkerCollection::new();
        collection.push(Marker::default());
        let event = collection.extend(vec![Marker::default(), Marker::default()]);
        assert_eq!(event, Some(SourceEvent::ItemsInserted(1..3)));
        assert_eq!(collection.extend(Vec::new()), None);
    }

    #[test]
    fn test_remove_range() {
        let mut collection = MarkerCollection::new();
        let ids: Vec<_> = (0..5)
            .map(|i| collection.push(Marker::at(coord(i as f64, 0.0))).0)
            .collect();

        assert_eq!(
            collection.removal_event(1..3),
            SourceEvent::ItemsAboutToBeRemoved(1..3)
        );
        let removed = collection.remove(1..3);
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].coordinate, Some(coord(1.0, 0.0)));
        assert_eq!(collection.ids(), &[ids[0], ids[3], ids[4]]);
        assert_eq!(collection.get(ids[1]), None);

        assert_eq!(
            collection.removal_event(2..10),
            SourceEvent::ItemsAboutToBeRemoved(2..3)
        );
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut collection = MarkerCollection::new();
        let (first, _) = collection.push(Marker::default());
        collection.clear();
        let (second, _) = collection.push(Marker::default());
        assert_ne!(first, second);
    }

    #[test]
    fn test_set_coordinate() {
        let mut collection = MarkerCollection::new();
        let (id, _) = collection.push(Marker::at(coord(1.0, 2.0)));
        let event = collection.set_coordinate(id, Some(coord(3.0, 4.0)));
        assert_eq!(
            event,
            Some(SourceEvent::ItemCoordinatesChanged {
                item: id,
                previous: Some(coord(1.0, 2.0)),
            })
        );
        assert_eq!(collection.coordinate_of(id), Some(coord(3.0, 4.0)));

        collection.clear();
        assert_eq!(collection.set_coordinate(id, None), None);
    }

    #[test]
    fn test_set_selected_reports_changes_only() {
        let mut collection = MarkerCollection::new();
        let (a, _) = collection.push(Marker::default());
        let (b, _) = collection.push(Marker::default());

        collection.set_selected(&[a], true);
        let event = collection.set_selected(&[a, b], true);
        assert_eq!(
            event,
            SourceEvent::SelectionChanged {
                selected: vec![b],
                deselected: vec![],
            }
        );
        assert_eq!(collection.selected_ids(), vec![a, b]);

        let event = collection.set_selected(&[b], false);
        assert_eq!(
            event,
            SourceEvent::SelectionChanged {
                selected: vec![],
                deselected: vec![b],
            }
        );
        assert!(collection.is_selected(a));
        assert!(!collection.is_selected(b));
    }

    #[test]
    fn test_choose_representative() {
        let mut collection = MarkerCollection::new();
        let mut ids = Vec::new();
        for time in [None, Some(20), Some(10), Some(20)] {
            let marker = Marker {
                coordinate: Some(coord(0.0, 0.0)),
                time,
                label: None,
            };
            ids.push(collection.push(marker).0);
        }

        assert_eq!(collection.choose_representative(&ids, &SortKey::First), Some(ids[0]));
        assert_eq!(collection.choose_representative(&ids, &SortKey::Newest), Some(ids[1]));
        assert_eq!(collection.choose_representative(&ids, &SortKey::Oldest), Some(ids[2]));
        assert_eq!(collection.choose_representative(&ids[..1], &SortKey::Newest), Some(ids[0]));
        assert_eq!(collection.choose_representative(&[], &SortKey::First), None);
    }
}
