//! Separates nodes that a boundary way shares with an unrelated way.
//!
//! Each shared interior node is duplicated at the same position and the
//! copy replaces the original in the boundary way. The other way keeps the
//! original node, so the two ways no longer touch there. Endpoints of
//! either way are never separated.

use std::collections::BTreeSet;

use log::info;

use crate::element::{Tags, Way};
use crate::error::ConflateError;
use crate::gate::ConfirmationRequest;
use crate::services::Services;
use crate::settings::ConflationSettings;

/// Nodes shared by `boundary` and `other` that are an endpoint of neither
/// way, in boundary order without repeats.
#[must_use]
pub fn shared_interior_nodes(boundary: &Way, other: &Way) -> Vec<i64> {
    let endpoints: BTreeSet<i64> = [boundary, other]
        .into_iter()
        .flat_map(|way| way.nodes.first().into_iter().chain(way.nodes.last()))
        .copied()
        .collect();
    let other_nodes: BTreeSet<i64> = other.nodes.iter().copied().collect();
    let mut seen = BTreeSet::new();
    boundary
        .nodes
        .iter()
        .copied()
        .filter(|id| !endpoints.contains(id) && other_nodes.contains(id))
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Separate `other_way_id` from `boundary_way_id`.
///
/// Returns whether any node was (or, in dry-run mode, would be) separated.
/// Untagged ways are left alone because they may be boundaries in disguise.
///
/// # Errors
///
/// Returns [`ConflateError::Service`] when a read or write fails permanently.
pub fn unglue_ways(
    services: &mut Services<'_>,
    settings: &ConflationSettings,
    boundary_way_id: i64,
    other_way_id: i64,
) -> Result<bool, ConflateError> {
    let retry = services.retry;
    let boundary = retry.run("read boundary way", || services.edit.way(boundary_way_id))?;
    let other = retry.run("read glued way", || services.edit.way(other_way_id))?;
    if boundary.tags.is_empty() || other.tags.is_empty() {
        info!("way {boundary_way_id} or {other_way_id} has no tags; not unglueing");
        return Ok(false);
    }

    let shared = shared_interior_nodes(&boundary, &other);
    if shared.is_empty() {
        return Ok(false);
    }
    let request = ConfirmationRequest::Unglue {
        boundary_way: boundary_way_id,
        other_way: other_way_id,
        nodes: shared.clone(),
    };
    if !services.gate.confirm(&request) {
        return Ok(false);
    }

    let mut detachable = Vec::with_capacity(shared.len());
    for node_id in shared {
        let node = retry.run("read shared node", || services.edit.node(node_id))?;
        if node.tags.is_empty() {
            detachable.push(node);
        } else {
            info!("shared node {node_id} has tags; leaving it glued");
        }
    }
    if detachable.is_empty() {
        return Ok(false);
    }

    info!(
        "unglueing {} nodes of way {other_way_id} from boundary {boundary_way_id}",
        detachable.len()
    );
    if settings.dry_run {
        return Ok(true);
    }

    let mut updated = boundary;
    for node in &detachable {
        let replacement = retry.run("create node", || {
            services.edit.create_node(node.location, Tags::new())
        })?;
        for slot in updated.nodes.iter_mut().filter(|slot| **slot == node.id) {
            *slot = replacement;
        }
    }
    retry.run("update boundary way", || services.edit.update_way(&updated))?;
    retry.run("commit unglue", || services.edit.flush())?;
    Ok(true)
}
