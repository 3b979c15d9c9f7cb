//! Flat, id-indexed owner tables for schools and districts.
//!
//! Schools and districts never hold references to each other directly;
//! everything is addressed by id through [`EntityGraph`]. This avoids a
//! cyclic-reference graph (school <-> neighbor school, district <-> member
//! school).

use std::fmt;

use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchoolId(pub Box<str>);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DistrictId(pub Box<str>);

macro_rules! impl_id {
    ($ty:ident) => {
        impl From<&str> for $ty {
            fn from(s: &str) -> Self {
                $ty(s.into())
            }
        }
        impl From<String> for $ty {
            fn from(s: String) -> Self {
                $ty(s.into_boxed_str())
            }
        }
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}
impl_id!(SchoolId);
impl_id!(DistrictId);

/// A single public school: immutable totals, a deduplicated neighbor set.
#[derive(Debug, Clone)]
pub struct School {
    id: SchoolId,
    total_students: u32,
    total_funding: f64,
    neighbors: FxHashSet<SchoolId>,
}

impl School {
    pub fn new(id: SchoolId, total_students: u32, total_funding: f64) -> Self {
        School {
            id,
            total_students,
            total_funding,
            neighbors: FxHashSet::default(),
        }
    }

    pub fn id(&self) -> &SchoolId {
        &self.id
    }

    pub fn total_students(&self) -> u32 {
        self.total_students
    }

    pub fn total_funding(&self) -> f64 {
        self.total_funding
    }

    pub fn neighbors(&self) -> &FxHashSet<SchoolId> {
        &self.neighbors
    }

    pub fn add_neighbor(&mut self, neighbor: SchoolId) {
        self.neighbors.insert(neighbor);
    }
}

/// A district: derived totals, kept as an exact sum over current members.
#[derive(Debug, Clone)]
pub struct District {
    id: DistrictId,
    total_students: u32,
    total_funding: f64,
    members: FxHashSet<SchoolId>,
}

impl District {
    pub fn new(id: DistrictId) -> Self {
        District {
            id,
            total_students: 0,
            total_funding: 0.0,
            members: FxHashSet::default(),
        }
    }

    pub fn id(&self) -> &DistrictId {
        &self.id
    }

    pub fn total_students(&self) -> u32 {
        self.total_students
    }

    pub fn total_funding(&self) -> f64 {
        self.total_funding
    }

    pub fn members(&self) -> &FxHashSet<SchoolId> {
        &self.members
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn per_student_funding(&self) -> Result<f64, EngineError> {
        if self.total_students == 0 {
            return Err(EngineError::ZeroStudents {
                district: self.id.clone(),
            });
        }
        Ok(self.total_funding / self.total_students as f64)
    }

    /// Adds `school`'s totals and membership. Callers are expected to have
    /// already confirmed `school` isn't a current member; this keeps the hot
    /// path branchless -- violating the precondition silently corrupts
    /// `total_*`.
    pub fn add_school(&mut self, school: &School) {
        self.add_totals(school.total_students(), school.total_funding(), school.id().clone());
    }

    /// Removes `school`'s totals and membership. Unlike `add_school`, removing
    /// a school that isn't currently a member is a silent no-op.
    pub fn remove_school(&mut self, school: &School) {
        self.remove_totals(school.total_students(), school.total_funding(), school.id());
    }

    pub(crate) fn add_totals(&mut self, students: u32, funding: f64, sid: SchoolId) {
        self.total_students += students;
        self.total_funding += funding;
        self.members.insert(sid);
    }

    pub(crate) fn remove_totals(&mut self, students: u32, funding: f64, sid: &SchoolId) {
        if self.members.remove(sid) {
            self.total_students -= students;
            self.total_funding -= funding;
        }
    }
}

/// Owner tables for every school and every *live* district.
#[derive(Debug, Default)]
pub struct EntityGraph {
    schools: IndexMap<SchoolId, School>,
    districts: IndexMap<DistrictId, District>,
}

impl EntityGraph {
    pub fn new() -> Self {
        EntityGraph::default()
    }

    pub fn insert_school(&mut self, school: School) {
        self.schools.insert(school.id().clone(), school);
    }

    pub fn insert_district(&mut self, district: District) {
        self.districts.insert(district.id().clone(), district);
    }

    pub fn school(&self, sid: &SchoolId) -> Option<&School> {
        self.schools.get(sid)
    }

    pub fn school_mut(&mut self, sid: &SchoolId) -> Option<&mut School> {
        self.schools.get_mut(sid)
    }

    pub fn district(&self, did: &DistrictId) -> Option<&District> {
        self.districts.get(did)
    }

    pub fn district_mut(&mut self, did: &DistrictId) -> Option<&mut District> {
        self.districts.get_mut(did)
    }

    pub fn schools(&self) -> impl Iterator<Item = (&SchoolId, &School)> {
        self.schools.iter()
    }

    pub fn districts(&self) -> impl Iterator<Item = (&DistrictId, &District)> {
        self.districts.iter()
    }

    pub fn school_count(&self) -> usize {
        self.schools.len()
    }

    pub fn district_count(&self) -> usize {
        self.districts.len()
    }

    /// Removes an emptied district from the live set.
    pub fn remove_district(&mut self, did: &DistrictId) -> Option<District> {
        self.districts.shift_remove(did)
    }

    /// Moves a school between two already-live districts, updating both
    /// sides' totals atomically. `self.schools` and `self.districts` are
    /// disjoint fields, so borrowing one immutably and the other mutably at
    /// once is fine -- no cloning of the (potentially large) neighbor set
    /// required for what is otherwise just an `add_school`/`remove_school`.
    pub fn move_school(
        &mut self,
        sid: &SchoolId,
        from: &DistrictId,
        to: &DistrictId,
    ) -> Result<(), EngineError> {
        let (students, funding) = {
            let school = self
                .schools
                .get(sid)
                .ok_or_else(|| EngineError::UnknownSchool(sid.clone()))?;
            (school.total_students(), school.total_funding())
        };
        if let Some(district) = self.districts.get_mut(from) {
            district.remove_totals(students, funding, sid);
        }
        if let Some(district) = self.districts.get_mut(to) {
            district.add_totals(students, funding, sid.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_remove_restores_totals() {
        let school = School::new(SchoolId::from("s1"), 10, 100.0);
        let mut district = District::new(DistrictId::from("d1"));
        district.add_school(&school);
        assert_eq!(district.total_students(), 10);
        assert_eq!(district.total_funding(), 100.0);
        district.remove_school(&school);
        assert!(district.is_empty());
        assert_eq!(district.total_students(), 0);
        assert_eq!(district.total_funding(), 0.0);
    }

    #[test]
    fn remove_of_non_member_is_a_silent_no_op() {
        let member = School::new(SchoolId::from("s1"), 10, 100.0);
        let stranger = School::new(SchoolId::from("s2"), 5, 50.0);
        let mut district = District::new(DistrictId::from("d1"));
        district.add_school(&member);
        district.remove_school(&stranger);
        assert_eq!(district.total_students(), 10);
        assert_eq!(district.total_funding(), 100.0);
    }

    #[test]
    fn move_school_updates_both_sides() {
        let mut graph = EntityGraph::new();
        let school = School::new(SchoolId::from("s1"), 10, 100.0);
        graph.insert_school(school.clone());
        let mut d0 = District::new(DistrictId::from("d0"));
        d0.add_school(&school);
        let d1 = District::new(DistrictId::from("d1"));
        graph.insert_district(d0);
        graph.insert_district(d1);

        graph
            .move_school(&SchoolId::from("s1"), &DistrictId::from("d0"), &DistrictId::from("d1"))
            .unwrap();

        assert!(graph.district(&DistrictId::from("d0")).unwrap().is_empty());
        assert_eq!(graph.district(&DistrictId::from("d1")).unwrap().total_students(), 10);
    }
}
