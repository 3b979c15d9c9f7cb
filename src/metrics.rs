//! Per-run observer that accumulates the fields emitted to the JSON report:
//! before/after district-assignment and per-student-funding snapshots, and
//! the percentage-redistricted and inequality time series sampled each
//! iteration.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::engine::{inequality, Move, RunObserver};
use crate::entities::{DistrictId, EntityGraph, SchoolId};
use crate::lookup::Lookup;

#[derive(Debug, Clone, Serialize)]
pub struct RunMetrics {
    pub spatial_inequality: Vec<f64>,
    pub percentage_of_schools_redistricted: Vec<f64>,
    pub number_of_districts: Vec<usize>,
    pub move_history: Vec<(u64, SchoolId, DistrictId, DistrictId)>,
    pub district_assignment_by_school_id: BeforeAfter<HashMap<SchoolId, DistrictId>>,
    pub per_student_funding_by_district_id: BeforeAfter<HashMap<DistrictId, f64>>,
    pub per_student_funding_whole_state: f64,
    pub time_elapsed: Duration,

    #[serde(skip)]
    start: Option<Instant>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BeforeAfter<T: Default> {
    pub before: T,
    pub after: T,
}

impl Default for RunMetrics {
    fn default() -> Self {
        RunMetrics {
            spatial_inequality: Vec::new(),
            percentage_of_schools_redistricted: Vec::new(),
            number_of_districts: Vec::new(),
            move_history: Vec::new(),
            district_assignment_by_school_id: BeforeAfter::default(),
            per_student_funding_by_district_id: BeforeAfter::default(),
            per_student_funding_whole_state: 0.0,
            time_elapsed: Duration::default(),
            start: None,
        }
    }
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn district_of_school(graph: &EntityGraph, sid: &SchoolId) -> Option<DistrictId> {
        graph
            .districts()
            .find(|(_, d)| d.members().contains(sid))
            .map(|(did, _)| did.clone())
    }

    fn checkpoint(&mut self, graph: &EntityGraph, label: Checkpoint) {
        let assignment: HashMap<SchoolId, DistrictId> = graph
            .schools()
            .filter_map(|(sid, _)| Self::district_of_school(graph, sid).map(|did| (sid.clone(), did)))
            .collect();
        let funding: HashMap<DistrictId, f64> = graph
            .districts()
            .filter_map(|(did, d)| d.per_student_funding().ok().map(|y| (did.clone(), y)))
            .collect();
        match label {
            Checkpoint::Before => {
                self.district_assignment_by_school_id.before = assignment;
                self.per_student_funding_by_district_id.before = funding;
            }
            Checkpoint::After => {
                self.district_assignment_by_school_id.after = assignment;
                self.per_student_funding_by_district_id.after = funding;
            }
        }
    }

    fn percentage_redistricted(&self, graph: &EntityGraph) -> f64 {
        let before = &self.district_assignment_by_school_id.before;
        if before.is_empty() {
            return 0.0;
        }
        let redistricted = before
            .iter()
            .filter(|(sid, original_did)| Self::district_of_school(graph, sid).as_ref() != Some(original_did))
            .count();
        100.0 * redistricted as f64 / before.len() as f64
    }
}

enum Checkpoint {
    Before,
    After,
}

impl RunObserver for RunMetrics {
    fn on_init(&mut self, graph: &EntityGraph, _lookup: &Lookup) {
        let total_funding: f64 = graph.districts().map(|(_, d)| d.total_funding()).sum();
        let total_students: u32 = graph.districts().map(|(_, d)| d.total_students()).sum();
        self.per_student_funding_whole_state = total_funding / total_students as f64;
        self.checkpoint(graph, Checkpoint::Before);
        self.start = Some(Instant::now());
    }

    fn on_update(&mut self, graph: &EntityGraph, lookup: &Lookup) {
        if let Ok(value) = inequality(graph, lookup) {
            self.spatial_inequality.push(value);
        }
        self.percentage_of_schools_redistricted.push(self.percentage_redistricted(graph));
        self.number_of_districts.push(graph.district_count());
    }

    fn on_move(&mut self, iteration: u64, moves: &[Move]) {
        for mv in moves {
            self.move_history.push((iteration, mv.sid.clone(), mv.from.clone(), mv.to.clone()));
        }
    }

    fn on_end(&mut self, graph: &EntityGraph, lookup: &Lookup) {
        self.checkpoint(graph, Checkpoint::After);
        self.on_update(graph, lookup);
        if let Some(start) = self.start {
            self.time_elapsed = start.elapsed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::School;

    #[test]
    fn on_end_chains_into_on_update_and_stamps_duration() {
        let mut graph = EntityGraph::new();
        let school = School::new(SchoolId::from("s1"), 10, 100.0);
        graph.insert_school(school.clone());
        let mut district = crate::entities::District::new(DistrictId::from("d0"));
        district.add_school(&school);
        graph.insert_district(district);

        let mut lookup = Lookup::new(1);
        lookup.assign(&graph, &SchoolId::from("s1"), &DistrictId::from("d0")).unwrap();

        let mut metrics = RunMetrics::new();
        metrics.on_init(&graph, &lookup);
        metrics.on_end(&graph, &lookup);

        assert_eq!(metrics.number_of_districts.len(), 1);
        assert_eq!(metrics.per_student_funding_whole_state, 10.0);
        assert_eq!(metrics.district_assignment_by_school_id.after[&SchoolId::from("s1")], DistrictId::from("d0"));
    }
}
