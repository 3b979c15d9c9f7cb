//! Main loop: pick the district most out of line with the state mean,
//! greedily reassign its border schools, repeat until the heap and holdout
//! queue are jointly exhausted or the early stopper fires.

use ordered_float::NotNan;
use rustc_hash::FxHashMap;

use crate::entities::{District, DistrictId, EntityGraph, SchoolId};
use crate::error::EngineError;
use crate::holdout::HoldoutQueue;
use crate::early_stopper::EarlyStopper;
use crate::lazy_heap::LazyHeap;
use crate::lookup::Lookup;

#[derive(Debug, Clone, Copy)]
pub struct GreedyParams {
    pub min_schools_per_district: u32,
    pub max_schools_per_district: u32,
}

impl Default for GreedyParams {
    fn default() -> Self {
        GreedyParams {
            min_schools_per_district: 1,
            max_schools_per_district: 500,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EarlyStopperParams {
    pub max_stale_iterations: u32,
    pub tolerance: f64,
}

impl Default for EarlyStopperParams {
    fn default() -> Self {
        EarlyStopperParams {
            max_stale_iterations: 1000,
            tolerance: 0.1,
        }
    }
}

/// A single accepted school reassignment.
#[derive(Debug, Clone)]
pub struct Move {
    pub sid: SchoolId,
    pub from: DistrictId,
    pub to: DistrictId,
}

/// Read-only lifecycle observer. Implementations must not mutate the engine
/// through the references they're handed; nothing stops them at the type
/// level, but the engine only ever calls these with shared references.
pub trait RunObserver {
    fn on_init(&mut self, _graph: &EntityGraph, _lookup: &Lookup) {}
    fn on_update(&mut self, _graph: &EntityGraph, _lookup: &Lookup) {}
    fn on_move(&mut self, _iteration: u64, _moves: &[Move]) {}
    fn on_end(&mut self, _graph: &EntityGraph, _lookup: &Lookup) {}
}

pub struct NoopObserver;
impl RunObserver for NoopObserver {}

fn per_student_funding(district: &District) -> Result<f64, EngineError> {
    district.per_student_funding()
}

fn district_key(district: &District, state_mean: f64) -> Result<NotNan<f64>, EngineError> {
    let y = per_student_funding(district)?;
    Ok(NotNan::new((y - state_mean).abs()).expect("funding/student counts are finite"))
}

/// `I` from the district table and its `Lookup` adjacency.
pub fn inequality(graph: &EntityGraph, lookup: &Lookup) -> Result<f64, EngineError> {
    let mut overall = 0.0;
    let mut normalization = 0.0;
    for (did, district) in graph.districts() {
        let y_d = per_student_funding(district)?;
        let neighbors = lookup.neighbor_districts(did)?;
        let mut gap_sum = 0.0;
        for n_did in &neighbors {
            let neighbor = graph
                .district(n_did)
                .ok_or_else(|| EngineError::UnknownDistrict(n_did.clone()))?;
            gap_sum += (y_d - per_student_funding(neighbor)?).abs();
        }
        overall += gap_sum / (neighbors.len() + 1) as f64;
        normalization += y_d;
    }
    Ok(overall / normalization)
}

struct LocalAcc {
    n_schools: u32,
    total_students: u32,
    total_funding: f64,
}

impl LocalAcc {
    fn from_district(district: &District) -> Self {
        LocalAcc {
            n_schools: district.member_count() as u32,
            total_students: district.total_students(),
            total_funding: district.total_funding(),
        }
    }

    fn y(&self) -> f64 {
        self.total_funding / self.total_students as f64
    }
}

/// Greedily picks all schools to move out of `d0`, simulating each candidate
/// against a local accumulator covering `d0` and its current neighbors. Each
/// school is moved at most once; `d0`'s own border set order is the
/// iteration order (arbitrary, but stable for one call).
fn pick_moves(
    graph: &EntityGraph,
    lookup: &Lookup,
    d0: &DistrictId,
    params: &GreedyParams,
) -> Result<Vec<Move>, EngineError> {
    let neighbor_dids = lookup.neighbor_districts(d0)?;
    let mut acc: FxHashMap<DistrictId, LocalAcc> = FxHashMap::default();
    acc.insert(
        d0.clone(),
        LocalAcc::from_district(
            graph
                .district(d0)
                .ok_or_else(|| EngineError::UnknownDistrict(d0.clone()))?,
        ),
    );
    for did in &neighbor_dids {
        let district = graph
            .district(did)
            .ok_or_else(|| EngineError::UnknownDistrict(did.clone()))?;
        acc.insert(did.clone(), LocalAcc::from_district(district));
    }

    let border_schools: Vec<SchoolId> = lookup.border(d0)?.iter().cloned().collect();
    let mut moves = Vec::new();

    for sid in border_schools {
        let school = graph
            .school(&sid)
            .ok_or_else(|| EngineError::UnknownSchool(sid.clone()))?;
        let students = school.total_students();
        let funding = school.total_funding();

        let mut tried: Vec<DistrictId> = Vec::new();
        for neighbor_sid in school.neighbors() {
            let Some(d1) = lookup.district_of(neighbor_sid) else {
                continue;
            };
            if d1 == d0 || tried.contains(d1) {
                continue;
            }
            tried.push(d1.clone());

            let good = {
                let from = acc.get(d0).expect("d0 seeded above");
                let to = acc.get(d1).expect("neighbor districts seeded above");
                if from.n_schools <= params.min_schools_per_district
                    || to.n_schools >= params.max_schools_per_district
                {
                    false
                } else if from.n_schools == 1 {
                    true
                } else {
                    let before = (from.y() - to.y()).abs();
                    let new_from_students = from.total_students - students;
                    let new_from_funding = from.total_funding - funding;
                    let new_to_students = to.total_students + students;
                    let new_to_funding = to.total_funding + funding;
                    let after = (new_from_funding / new_from_students as f64
                        - new_to_funding / new_to_students as f64)
                        .abs();
                    after < before
                }
            };

            if good {
                let d1 = d1.clone();
                {
                    let from = acc.get_mut(d0).unwrap();
                    from.n_schools -= 1;
                    from.total_students -= students;
                    from.total_funding -= funding;
                }
                {
                    let to = acc.get_mut(&d1).unwrap();
                    to.n_schools += 1;
                    to.total_students += students;
                    to.total_funding += funding;
                }
                moves.push(Move {
                    sid: sid.clone(),
                    from: d0.clone(),
                    to: d1,
                });
                break;
            }
        }
    }

    Ok(moves)
}

/// Applies a batch of accepted moves to the real graph/lookup, then tries to
/// refresh the heap key of every district touched. A district currently
/// parked in the holdout queue isn't in the heap; that's a silent no-op, not
/// an error, mirroring `attempt_heap_update`'s swallowed `KeyError`.
fn apply_moves(
    graph: &mut EntityGraph,
    lookup: &mut Lookup,
    heap: &mut LazyHeap<DistrictId, NotNan<f64>>,
    moves: &[Move],
    state_mean: f64,
) -> Result<(), EngineError> {
    for mv in moves {
        graph.move_school(&mv.sid, &mv.from, &mv.to)?;
        lookup.assign(graph, &mv.sid, &mv.to)?;
        for did in [&mv.from, &mv.to] {
            if heap.contains(did) {
                if let Some(district) = graph.district(did) {
                    let key = district_key(district, state_mean)?;
                    heap.update(did.clone(), key)?;
                }
            }
        }
    }
    Ok(())
}

pub struct GreedyEngine {
    graph: EntityGraph,
    lookup: Lookup,
    heap: LazyHeap<DistrictId, NotNan<f64>>,
    holdout: HoldoutQueue<DistrictId>,
    early_stopper: EarlyStopper,
    params: GreedyParams,
    state_mean: f64,
}

impl GreedyEngine {
    pub fn new(
        graph: EntityGraph,
        lookup: Lookup,
        params: GreedyParams,
        early_stopper_params: EarlyStopperParams,
    ) -> Result<Self, EngineError> {
        let total_students: u32 = graph.districts().map(|(_, d)| d.total_students()).sum();
        let total_funding: f64 = graph.districts().map(|(_, d)| d.total_funding()).sum();
        let state_mean = if total_students == 0 {
            0.0
        } else {
            total_funding / total_students as f64
        };

        let mut heap = LazyHeap::new(Some(graph.district_count() * 2));
        for (did, district) in graph.districts() {
            let key = district_key(district, state_mean)?;
            heap.push(did.clone(), key)?;
        }

        Ok(GreedyEngine {
            graph,
            lookup,
            heap,
            holdout: HoldoutQueue::new(),
            early_stopper: EarlyStopper::new(
                early_stopper_params.max_stale_iterations,
                early_stopper_params.tolerance,
            ),
            params,
            state_mean,
        })
    }

    pub fn graph(&self) -> &EntityGraph {
        &self.graph
    }

    pub fn lookup(&self) -> &Lookup {
        &self.lookup
    }

    pub fn run(&mut self, observer: &mut dyn RunObserver) -> Result<f64, EngineError> {
        observer.on_init(&self.graph, &self.lookup);

        let mut retrying = false;
        let mut iteration: u64 = 0;
        loop {
            iteration += 1;
            observer.on_update(&self.graph, &self.lookup);

            let d0 = match self.heap.pop() {
                Ok(d0) => d0,
                Err(EngineError::HeapEmpty) => {
                    if retrying {
                        break;
                    }
                    self.refill_heap()?;
                    retrying = true;
                    continue;
                }
                Err(e) => return Err(e),
            };
            retrying = false;

            let moves = pick_moves(&self.graph, &self.lookup, &d0, &self.params)?;
            if moves.is_empty() {
                let tag = self.lookup.changes(&d0)?;
                self.holdout.enqueue(d0, tag);
                continue;
            }

            apply_moves(&mut self.graph, &mut self.lookup, &mut self.heap, &moves, self.state_mean)?;
            observer.on_move(iteration, &moves);

            let still_has_members = self.graph.district(&d0).map(|d| !d.is_empty()).unwrap_or(false);
            if still_has_members {
                let key = district_key(self.graph.district(&d0).unwrap(), self.state_mean)?;
                self.heap.push(d0, key)?;
            } else {
                self.graph.remove_district(&d0);
            }

            let current_inequality = inequality(&self.graph, &self.lookup)?;
            if self.early_stopper.update(current_inequality) {
                break;
            }
        }

        observer.on_end(&self.graph, &self.lookup);
        inequality(&self.graph, &self.lookup)
    }

    fn refill_heap(&mut self) -> Result<(), EngineError> {
        loop {
            let lookup = &self.lookup;
            let next = self.holdout.dequeue(|d| lookup.changes(d).unwrap_or(0));
            match next {
                Some(did) => {
                    let district = self
                        .graph
                        .district(&did)
                        .ok_or_else(|| EngineError::UnknownDistrict(did.clone()))?;
                    let key = district_key(district, self.state_mean)?;
                    self.heap.push(did, key)?;
                }
                None => {
                    self.holdout.recycle();
                    break;
                }
            }
        }
        Ok(())
    }
}
