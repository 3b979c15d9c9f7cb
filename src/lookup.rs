//! Incremental index over an [`EntityGraph`]: school->district, per-district
//! border sets, district-district edge multiplicities, and change counters.
//!
//! `Lookup` deliberately doesn't duplicate `EntityGraph`'s own school/district
//! tables. Every method that needs graph data takes `&EntityGraph`
//! explicitly, keeping "the data" and "the index over the data" as two
//! separate types rather than folding one into the other.

use std::sync::OnceLock;

use indexmap::IndexSet;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::entities::{DistrictId, EntityGraph, SchoolId};
use crate::error::EngineError;

fn empty_school_set() -> &'static FxHashSet<SchoolId> {
    static EMPTY: OnceLock<FxHashSet<SchoolId>> = OnceLock::new();
    EMPTY.get_or_init(FxHashSet::default)
}

#[derive(Default)]
pub struct Lookup {
    assignment: FxHashMap<SchoolId, DistrictId>,
    border: FxHashMap<DistrictId, FxHashSet<SchoolId>>,
    district_index: IndexSet<DistrictId>,
    edges: Vec<i64>,
    changes: FxHashMap<DistrictId, u64>,
    total_schools: usize,
    all_schools_assigned: bool,
}

impl Lookup {
    pub fn new(total_schools: usize) -> Self {
        Lookup {
            total_schools,
            ..Default::default()
        }
    }

    fn ensure_initialized(&self) -> Result<(), EngineError> {
        if self.all_schools_assigned {
            Ok(())
        } else {
            Err(EngineError::NotInitialized)
        }
    }

    fn n_districts(&self) -> usize {
        self.district_index.len()
    }

    fn edge_idx(&self, i: usize, j: usize) -> usize {
        i * self.n_districts() + j
    }

    fn edge(&self, a: &DistrictId, b: &DistrictId) -> i64 {
        let (i, j) = (
            self.district_index.get_index_of(a).unwrap(),
            self.district_index.get_index_of(b).unwrap(),
        );
        self.edges[self.edge_idx(i, j)]
    }

    fn set_edge(&mut self, a: &DistrictId, b: &DistrictId, value: i64) {
        let (i, j) = (
            self.district_index.get_index_of(a).unwrap(),
            self.district_index.get_index_of(b).unwrap(),
        );
        let n = self.n_districts();
        self.edges[i * n + j] = value;
    }

    fn add_edge(&mut self, a: &DistrictId, b: &DistrictId, delta: i64) {
        let v = self.edge(a, b) + delta;
        self.set_edge(a, b, v);
    }

    pub fn district_of(&self, sid: &SchoolId) -> Option<&DistrictId> {
        self.assignment.get(sid)
    }

    pub fn border(&self, did: &DistrictId) -> Result<&FxHashSet<SchoolId>, EngineError> {
        self.ensure_initialized()?;
        Ok(self.border.get(did).unwrap_or_else(|| empty_school_set()))
    }

    /// Districts `D'` with `E[D, D'] > 0`, via a row scan of the dense
    /// adjacency matrix.
    pub fn neighbor_districts(&self, did: &DistrictId) -> Result<Vec<DistrictId>, EngineError> {
        self.ensure_initialized()?;
        let i = self
            .district_index
            .get_index_of(did)
            .ok_or_else(|| EngineError::UnknownDistrict(did.clone()))?;
        let n = self.n_districts();
        let row = &self.edges[i * n..i * n + n];
        Ok(row
            .iter()
            .enumerate()
            .filter(|(_, &count)| count > 0)
            .map(|(j, _)| self.district_index[j].clone())
            .collect())
    }

    pub fn changes(&self, did: &DistrictId) -> Result<u64, EngineError> {
        self.ensure_initialized()?;
        Ok(*self.changes.get(did).unwrap_or(&0))
    }

    fn is_school_in_border(
        &self,
        graph: &EntityGraph,
        sid: &SchoolId,
        with_district: Option<&DistrictId>,
    ) -> bool {
        let Some(school) = graph.school(sid) else {
            return false;
        };
        let Some(own_district) = self.assignment.get(sid) else {
            return false;
        };
        for neighbor in school.neighbors() {
            let Some(neighbor_district) = self.assignment.get(neighbor) else {
                continue;
            };
            if neighbor_district != own_district {
                match with_district {
                    None => return true,
                    Some(target) if target == neighbor_district => return true,
                    Some(_) => continue,
                }
            }
        }
        false
    }

    /// Assigns `sid` to `new_did`. Before every school has an initial
    /// district, this is a plain write that may trigger one-shot
    /// initialization; after, it is an incremental move that requires `sid`
    /// to currently border `new_did`.
    pub fn assign(
        &mut self,
        graph: &EntityGraph,
        sid: &SchoolId,
        new_did: &DistrictId,
    ) -> Result<(), EngineError> {
        if self.all_schools_assigned {
            let old_did = self
                .assignment
                .get(sid)
                .cloned()
                .ok_or_else(|| EngineError::UnknownSchool(sid.clone()))?;
            if !self.is_school_in_border(graph, sid, Some(new_did)) {
                return Err(EngineError::NotBordering {
                    school: sid.clone(),
                    district: new_did.clone(),
                });
            }
            self.assignment.insert(sid.clone(), new_did.clone());
            self.update_border(graph, sid, &old_did, new_did);
            self.update_edges(graph, sid, &old_did, new_did);
            self.update_change_counters(&old_did, new_did)?;
            Ok(())
        } else {
            self.assignment.insert(sid.clone(), new_did.clone());
            self.handle_incomplete_assignment(graph);
            Ok(())
        }
    }

    fn handle_incomplete_assignment(&mut self, graph: &EntityGraph) {
        self.all_schools_assigned = self.assignment.len() == self.total_schools;
        if !self.all_schools_assigned {
            return;
        }

        self.district_index = graph.districts().map(|(did, _)| did.clone()).collect();
        let n = self.district_index.len();
        self.edges = vec![0; n * n];

        for (did, district) in graph.districts() {
            for sid in district.members() {
                if self.is_school_in_border(graph, sid, None) {
                    self.border.entry(did.clone()).or_default().insert(sid.clone());
                }
            }
        }

        // Per-district neighbor edge counts. Overwrites both E[D,D'] and
        // E[D',D] from whichever district is processed last for that pair,
        // rather than accumulating across districts -- last-writer-wins by
        // iteration order, not a sum.
        for (did, district) in graph.districts() {
            let mut counts: FxHashMap<DistrictId, i64> = FxHashMap::default();
            for sid in district.members() {
                let Some(school) = graph.school(sid) else {
                    continue;
                };
                for neighbor in school.neighbors() {
                    if let Some(neighbor_did) = self.assignment.get(neighbor) {
                        *counts.entry(neighbor_did.clone()).or_insert(0) += 1;
                    }
                }
            }
            for (neighbor_did, count) in counts {
                if &neighbor_did == did {
                    continue;
                }
                self.set_edge(did, &neighbor_did, count);
                self.set_edge(&neighbor_did, did, count);
            }
        }
    }

    fn update_border(&mut self, graph: &EntityGraph, sid: &SchoolId, old_did: &DistrictId, new_did: &DistrictId) {
        self.border.entry(old_did.clone()).or_default().remove(sid);

        let Some(school) = graph.school(sid) else { return };
        let mut touched: Vec<SchoolId> = school.neighbors().iter().cloned().collect();
        touched.push(sid.clone());

        for touched_sid in touched {
            let Some(touched_did) = self.assignment.get(&touched_sid).cloned() else {
                continue;
            };
            if touched_did != *old_did && touched_did != *new_did {
                continue;
            }
            let is_border = self.is_school_in_border(graph, &touched_sid, None);
            let set = self.border.entry(touched_did).or_default();
            if is_border {
                set.insert(touched_sid);
            } else {
                set.remove(&touched_sid);
            }
        }
    }

    fn update_edges(&mut self, graph: &EntityGraph, sid: &SchoolId, old_did: &DistrictId, new_did: &DistrictId) {
        let Some(school) = graph.school(sid) else { return };
        let mut counts: FxHashMap<DistrictId, i64> = FxHashMap::default();
        for neighbor in school.neighbors() {
            if let Some(neighbor_did) = self.assignment.get(neighbor) {
                *counts.entry(neighbor_did.clone()).or_insert(0) += 1;
            }
        }

        for (neighbor_did, count) in counts {
            if neighbor_did == *old_did {
                self.add_edge(new_did, old_did, count);
                self.add_edge(old_did, new_did, count);
            } else if neighbor_did == *new_did {
                self.add_edge(old_did, new_did, -count);
                self.add_edge(new_did, old_did, -count);
            } else {
                self.add_edge(old_did, &neighbor_did, -count);
                self.add_edge(&neighbor_did, old_did, -count);
                self.add_edge(new_did, &neighbor_did, count);
                self.add_edge(&neighbor_did, new_did, count);
            }
        }
    }

    fn update_change_counters(&mut self, old_did: &DistrictId, new_did: &DistrictId) -> Result<(), EngineError> {
        let mut touched: FxHashSet<DistrictId> = FxHashSet::default();
        touched.insert(old_did.clone());
        touched.insert(new_did.clone());
        for d in self.neighbor_districts(old_did)? {
            touched.insert(d);
        }
        for d in self.neighbor_districts(new_did)? {
            touched.insert(d);
        }
        for d in touched {
            *self.changes.entry(d).or_insert(0) += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{District, School};

    fn three_school_graph() -> (EntityGraph, Lookup) {
        // A-B, B-C; A,B in D0, C in D1.
        let mut graph = EntityGraph::new();
        let mut a = School::new(SchoolId::from("A"), 1, 10.0);
        let mut b = School::new(SchoolId::from("B"), 1, 30.0);
        let mut c = School::new(SchoolId::from("C"), 1, 20.0);
        a.add_neighbor(SchoolId::from("B"));
        b.add_neighbor(SchoolId::from("A"));
        b.add_neighbor(SchoolId::from("C"));
        c.add_neighbor(SchoolId::from("B"));
        graph.insert_school(a);
        graph.insert_school(b);
        graph.insert_school(c);
        graph.insert_district(District::new(DistrictId::from("D0")));
        graph.insert_district(District::new(DistrictId::from("D1")));

        let mut lookup = Lookup::new(3);
        for (sid, did) in [("A", "D0"), ("B", "D0"), ("C", "D1")] {
            let sid = SchoolId::from(sid);
            let did = DistrictId::from(did);
            let school = graph.school(&sid).unwrap().clone();
            graph.district_mut(&did).unwrap().add_school(&school);
            lookup.assign(&graph, &sid, &did).unwrap();
        }
        (graph, lookup)
    }

    #[test]
    fn border_and_edges_after_init() {
        let (_, lookup) = three_school_graph();
        let border_d0 = lookup.border(&DistrictId::from("D0")).unwrap();
        assert!(border_d0.contains(&SchoolId::from("B")));
        assert!(!border_d0.contains(&SchoolId::from("A")));
        let border_d1 = lookup.border(&DistrictId::from("D1")).unwrap();
        assert!(border_d1.contains(&SchoolId::from("C")));

        assert_eq!(lookup.edge(&DistrictId::from("D0"), &DistrictId::from("D1")), 1);
        assert_eq!(lookup.edge(&DistrictId::from("D1"), &DistrictId::from("D0")), 1);
    }

    #[test]
    fn queries_before_full_init_fail() {
        let mut lookup = Lookup::new(3);
        let graph = EntityGraph::new();
        lookup.assignment.insert(SchoolId::from("A"), DistrictId::from("D0"));
        assert!(matches!(lookup.border(&DistrictId::from("D0")), Err(EngineError::NotInitialized)));
        let _ = graph;
    }

    #[test]
    fn edge_multiplicity_bookkeeping_after_move() {
        // a,b in D0; c,d in D1; edges a-c, a-d, b-c. Moving a: D0 -> D1
        // leaves only the b-c cross edge, so E[D0,D1] should drop from 3 to 1.
        let mut graph = EntityGraph::new();
        let mut a = School::new(SchoolId::from("a"), 1, 10.0);
        let mut b = School::new(SchoolId::from("b"), 1, 10.0);
        let mut c = School::new(SchoolId::from("c"), 1, 10.0);
        let mut d = School::new(SchoolId::from("d"), 1, 10.0);
        a.add_neighbor(SchoolId::from("c"));
        a.add_neighbor(SchoolId::from("d"));
        b.add_neighbor(SchoolId::from("c"));
        c.add_neighbor(SchoolId::from("a"));
        c.add_neighbor(SchoolId::from("b"));
        d.add_neighbor(SchoolId::from("a"));
        graph.insert_school(a);
        graph.insert_school(b);
        graph.insert_school(c);
        graph.insert_school(d);
        graph.insert_district(District::new(DistrictId::from("D0")));
        graph.insert_district(District::new(DistrictId::from("D1")));

        let mut lookup = Lookup::new(4);
        for (sid, did) in [("a", "D0"), ("b", "D0"), ("c", "D1"), ("d", "D1")] {
            let sid = SchoolId::from(sid);
            let did = DistrictId::from(did);
            let school = graph.school(&sid).unwrap().clone();
            graph.district_mut(&did).unwrap().add_school(&school);
            lookup.assign(&graph, &sid, &did).unwrap();
        }
        assert_eq!(lookup.edge(&DistrictId::from("D0"), &DistrictId::from("D1")), 3);

        graph
            .move_school(&SchoolId::from("a"), &DistrictId::from("D0"), &DistrictId::from("D1"))
            .unwrap();
        lookup
            .assign(&graph, &SchoolId::from("a"), &DistrictId::from("D1"))
            .unwrap();

        assert_eq!(lookup.edge(&DistrictId::from("D0"), &DistrictId::from("D1")), 1);
        assert_eq!(lookup.edge(&DistrictId::from("D1"), &DistrictId::from("D0")), 1);
    }
}
