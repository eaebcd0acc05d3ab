//! Human-in-the-loop confirmation policies.

use log::info;

/// A decision the pipeline cannot take on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationRequest {
    /// The candidate failed the geometric similarity heuristic.
    GeometryMatch {
        /// Cadastre way being conflated.
        source_way: i64,
        /// Map way proposed as its counterpart.
        candidate_way: i64,
    },
    /// Shared nodes would be separated between two map ways.
    Unglue {
        /// Way receiving the new nodes.
        boundary_way: i64,
        /// Way keeping the original nodes.
        other_way: i64,
        /// Nodes to separate.
        nodes: Vec<i64>,
    },
    /// A way finished; continue with the next one.
    ContinueWithNextWay {
        /// Way that just finished.
        finished_way: i64,
    },
}

/// Decides [`ConfirmationRequest`]s.
pub trait ConfirmationGate {
    /// Return `true` to proceed.
    fn confirm(&self, request: &ConfirmationRequest) -> bool;
}

/// Approves every request. Used for unattended runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

impl ConfirmationGate for AutoApprove {
    fn confirm(&self, _request: &ConfirmationRequest) -> bool {
        true
    }
}

/// Rejects geometry and unglue requests but keeps the run going.
///
/// Uncertain ways end up in `ERROR_GEOMETRY_WRONG` or
/// `ERROR_NODE_IN_OTHER_WAYS` for later manual review.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectUnconfirmed;

impl ConfirmationGate for RejectUnconfirmed {
    fn confirm(&self, request: &ConfirmationRequest) -> bool {
        match request {
            ConfirmationRequest::ContinueWithNextWay { .. } => true,
            ConfirmationRequest::GeometryMatch {
                source_way,
                candidate_way,
            } => {
                info!("geometry of way {candidate_way} needs review against source way {source_way}; rejecting");
                false
            }
            ConfirmationRequest::Unglue {
                boundary_way,
                other_way,
                ..
            } => {
                info!("unglueing way {other_way} from {boundary_way} needs review; rejecting");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ConfirmationRequest::GeometryMatch { source_way: -1, candidate_way: 2 }, false)]
    #[case(ConfirmationRequest::Unglue { boundary_way: 2, other_way: 3, nodes: vec![4] }, false)]
    #[case(ConfirmationRequest::ContinueWithNextWay { finished_way: -1 }, true)]
    fn reject_policy_only_continues(#[case] request: ConfirmationRequest, #[case] approved: bool) {
        assert_eq!(RejectUnconfirmed.confirm(&request), approved);
        assert!(AutoApprove.confirm(&request));
    }
}
