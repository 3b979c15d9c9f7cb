use std::fmt;

use crate::entities::{DistrictId, SchoolId};

/// Errors raised by the redistricting core.
///
/// Most variants are fatal per the design's error policy: they indicate a
/// caller/data bug rather than something the engine can recover from.
/// `HeapEmpty` is the exception -- it is a normal control-flow signal that
/// `GreedyEngine::run` routes to holdout-refill/termination rather than
/// surfacing to its own caller.
#[derive(Debug)]
pub enum EngineError {
    /// A school was assigned to a district it does not currently border.
    NotBordering { school: SchoolId, district: DistrictId },
    /// An adjacency query was made before every school received an initial
    /// district assignment.
    NotInitialized,
    /// `LazyHeap::push` would exceed `max_elems` even after pruning
    /// tombstones. Fatal for the run; callers may retry with a larger bound.
    HeapCapacity,
    /// `LazyHeap::pop` found no live entries.
    HeapEmpty,
    /// A district's total student count is zero where a per-student value is
    /// required. Per-school data anomalies are expected to be filtered
    /// upstream; this is the fatal arithmetic error if one leaks through.
    ZeroStudents { district: DistrictId },
    /// A record referenced a school id that isn't present in the school
    /// table.
    UnknownSchool(SchoolId),
    /// A record referenced a district id that isn't present in the district
    /// table.
    UnknownDistrict(DistrictId),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::NotBordering { school, district } => write!(
                f,
                "school '{school}' is not at the border of district '{district}'"
            ),
            EngineError::NotInitialized => {
                write!(f, "adjacency query made before every school had an initial district")
            }
            EngineError::HeapCapacity => write!(f, "heap capacity exceeded even after pruning tombstones"),
            EngineError::HeapEmpty => write!(f, "heap has no live entries"),
            EngineError::ZeroStudents { district } => {
                write!(f, "district '{district}' has zero students")
            }
            EngineError::UnknownSchool(sid) => write!(f, "unknown school id '{sid}'"),
            EngineError::UnknownDistrict(did) => write!(f, "unknown district id '{did}'"),
        }
    }
}

impl std::error::Error for EngineError {}
