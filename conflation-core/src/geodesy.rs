//! Geodesic measurements shared by the eligibility checks and the aligner.
//!
//! Coordinates are WGS84 with `x = longitude` and `y = latitude`. Distances
//! are metres on the WGS84 ellipsoid; bearings are compass degrees in
//! `[0, 360)`.

use geo::{
    Bearing, Coord, Densify, Distance, Euclidean, Geodesic, LineString, Point, Validation,
};

/// Samples per buffer width when testing line containment.
const BUFFER_SAMPLES: f64 = 20.0;

/// Geodesic distance between two coordinates in metres.
#[must_use]
pub fn distance_m(from: Coord, to: Coord) -> f64 {
    Geodesic.distance(Point::from(from), Point::from(to))
}

/// Initial geodesic bearing from `from` towards `to`, normalised to `[0, 360)`.
#[must_use]
pub fn initial_bearing(from: Coord, to: Coord) -> f64 {
    Geodesic
        .bearing(Point::from(from), Point::from(to))
        .rem_euclid(360.0)
}

/// Smallest absolute difference between two compass bearings.
#[must_use]
pub fn bearing_difference(first: f64, second: f64) -> f64 {
    let raw = (first - second).rem_euclid(360.0);
    raw.min(360.0 - raw)
}

/// How a source line's endpoints pair with a candidate's endpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndpointPairing {
    /// The larger of the two endpoint-pair distances, in metres.
    pub distance_m: f64,
    /// Whether the source must be reversed to follow the candidate.
    pub reverse: bool,
}

/// Pair the candidate's first node with the nearer source endpoint and
/// measure the remaining pair.
///
/// Ties keep the original direction. Returns `None` when either line is
/// empty.
#[must_use]
pub fn endpoint_pairing(candidate: &LineString, source: &LineString) -> Option<EndpointPairing> {
    let candidate_first = *candidate.0.first()?;
    let candidate_last = *candidate.0.last()?;
    let source_first = *source.0.first()?;
    let source_last = *source.0.last()?;

    let to_first = distance_m(candidate_first, source_first);
    let to_last = distance_m(candidate_first, source_last);
    let reverse = to_last < to_first;
    let head = to_first.min(to_last);
    let tail = if reverse {
        distance_m(candidate_last, source_first)
    } else {
        distance_m(candidate_last, source_last)
    };
    Some(EndpointPairing {
        distance_m: head.max(tail),
        reverse,
    })
}

/// Return `line` in its original or reversed order.
#[must_use]
pub fn oriented(line: &LineString, reverse: bool) -> LineString {
    if reverse {
        line.coords().rev().copied().collect()
    } else {
        line.clone()
    }
}

/// Whether two lines describe the same geometry within `tolerance_m`.
///
/// Both lines must agree on closure and node count, both endpoint pairs must
/// be within tolerance after direction normalisation, and so must every
/// corresponding node pair.
#[must_use]
pub fn is_same_geometry(candidate: &LineString, source: &LineString, tolerance_m: f64) -> bool {
    if candidate.is_closed() != source.is_closed() || candidate.0.len() != source.0.len() {
        return false;
    }
    let Some(pairing) = endpoint_pairing(candidate, source) else {
        return false;
    };
    if pairing.distance_m > tolerance_m {
        return false;
    }
    let aligned = oriented(source, pairing.reverse);
    candidate
        .coords()
        .zip(aligned.coords())
        .all(|(left, right)| distance_m(*left, *right) <= tolerance_m)
}

/// Whether `line` is a usable open or closed polyline.
#[must_use]
pub fn is_valid_line(line: &LineString) -> bool {
    line.0.len() >= 2
        && line.coords().all(|coord| {
            coord.x.is_finite()
                && coord.y.is_finite()
                && (-180.0..=180.0).contains(&coord.x)
                && (-90.0..=90.0).contains(&coord.y)
        })
        && line.is_valid()
}

/// Whether the whole `source` line lies within `buffer_deg` planar degrees
/// of `candidate`.
///
/// The source is densified to a small fraction of the buffer width first, so
/// a straight segment whose endpoints touch the candidate still fails when
/// the candidate wanders away between them.
#[must_use]
pub fn within_buffer(source: &LineString, candidate: &LineString, buffer_deg: f64) -> bool {
    if buffer_deg.is_nan() || buffer_deg <= 0.0 {
        return false;
    }
    let sampled = Euclidean.densify(source, buffer_deg / BUFFER_SAMPLES);
    sampled
        .coords()
        .all(|coord| Euclidean.distance(&Point::from(*coord), candidate) <= buffer_deg)
}

/// Initial bearing from the first to the last coordinate of `line`.
#[must_use]
pub fn overall_bearing(line: &LineString) -> Option<f64> {
    let first = *line.0.first()?;
    let last = *line.0.last()?;
    Some(initial_bearing(first, last))
}
