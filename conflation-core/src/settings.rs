//! Tunables for a conflation run.

use std::time::Duration;

/// Default tag carrying the cadastre reference on source relations.
pub const DEFAULT_SOURCE_REFERENCE_KEY: &str = "level9_id";

/// Largest source way accepted, exclusive.
pub const DEFAULT_MAX_SOURCE_NODES: usize = 2000;

/// Distance under which two nodes count as the same point.
pub const DEFAULT_EQUALITY_TOLERANCE_M: f64 = 1.0;

/// Default endpoint-distance threshold.
pub const DEFAULT_MAX_ENDPOINT_DISTANCE_M: f64 = 50.0;

/// Planar buffer used by the similarity heuristic.
pub const DEFAULT_HEURISTIC_BUFFER_DEG: f64 = 0.005;

/// Bearing tolerance used by the similarity heuristic.
pub const DEFAULT_HEURISTIC_BEARING_DEG: f64 = 5.0;

/// Configuration for the conflation pipeline.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use conflation_core::ConflationSettings;
///
/// let settings = ConflationSettings::default()
///     .with_dry_run(true)
///     .with_way_pause(Duration::ZERO);
/// assert!(settings.dry_run);
/// assert_eq!(settings.max_source_nodes, 2000);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ConflationSettings {
    /// Tag on cadastre relations holding the entity reference.
    pub source_reference_key: String,
    /// Source ways with this many nodes or more are rejected.
    pub max_source_nodes: usize,
    /// Node distance treated as identical, in metres.
    pub equality_tolerance_m: f64,
    /// Endpoint pairs further apart than this are rejected, in metres.
    pub max_endpoint_distance_m: f64,
    /// Try separating shared nodes from non-boundary ways.
    pub unglue_ways_as_needed: bool,
    /// Compute edits without writing them.
    pub dry_run: bool,
    /// Planar buffer for the similarity heuristic, in degrees.
    pub heuristic_buffer_deg: f64,
    /// Bearing tolerance for the similarity heuristic, in degrees.
    pub heuristic_bearing_deg: f64,
    /// Pause between ways.
    pub way_pause: Duration,
    /// Pause after each committed batch.
    pub flush_pause: Duration,
}

impl Default for ConflationSettings {
    fn default() -> Self {
        Self {
            source_reference_key: DEFAULT_SOURCE_REFERENCE_KEY.to_owned(),
            max_source_nodes: DEFAULT_MAX_SOURCE_NODES,
            equality_tolerance_m: DEFAULT_EQUALITY_TOLERANCE_M,
            max_endpoint_distance_m: DEFAULT_MAX_ENDPOINT_DISTANCE_M,
            unglue_ways_as_needed: false,
            dry_run: false,
            heuristic_buffer_deg: DEFAULT_HEURISTIC_BUFFER_DEG,
            heuristic_bearing_deg: DEFAULT_HEURISTIC_BEARING_DEG,
            way_pause: Duration::from_secs(2),
            flush_pause: Duration::from_secs(5),
        }
    }
}

impl ConflationSettings {
    /// Set the cadastre reference tag key.
    #[must_use]
    pub fn with_source_reference_key(mut self, key: impl Into<String>) -> Self {
        self.source_reference_key = key.into();
        self
    }

    /// Set the endpoint-distance threshold in metres.
    #[must_use]
    pub const fn with_max_endpoint_distance_m(mut self, meters: f64) -> Self {
        self.max_endpoint_distance_m = meters;
        self
    }

    /// Enable or disable unglueing.
    #[must_use]
    pub const fn with_unglue_ways_as_needed(mut self, enabled: bool) -> Self {
        self.unglue_ways_as_needed = enabled;
        self
    }

    /// Enable or disable dry-run mode.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the pause between ways.
    #[must_use]
    pub const fn with_way_pause(mut self, pause: Duration) -> Self {
        self.way_pause = pause;
        self
    }

    /// Set the pause after each committed batch.
    #[must_use]
    pub const fn with_flush_pause(mut self, pause: Duration) -> Self {
        self.flush_pause = pause;
        self
    }

    /// Settings with every pause removed, for tests and local services.
    #[must_use]
    pub const fn without_pauses(self) -> Self {
        self.with_way_pause(Duration::ZERO)
            .with_flush_pause(Duration::ZERO)
    }
}
