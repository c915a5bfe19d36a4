// Copyright 2024 by Michael Thies <mail@mhthies.de>
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except in compliance with
// the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! The immutable problem model. An `Instance` is built once from the parsed records of an
//! instance file and shared read-only (via `Arc`) between all nodes of the search tree.
//!
//! Besides the plain exam/period/room/constraint lists, the instance owns the derived
//! structures every other component queries: the student clash matrix, the transitive
//! closure of EXAM_COINCIDENCE constraints, the per-exam AFTER constraint lists and the
//! per-exam list of rooms that could seat the exam on their own.

use std::collections::HashMap;

use ndarray::Array2;
use thiserror::Error;
use union_find::{QuickUnionUf, UnionBySize, UnionFind};

use crate::{Exam, Period, PeriodConstraint, PeriodConstraintKind, Room, RoomConstraint, Weighting};

/// Schema or structural errors detected while reading an instance file or building the
/// `Instance`. All of these are fatal; the solver cannot start on a broken instance.
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("could not read instance file: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("{context} references exam {index}, but there are only {count} exams")]
    ExamIndexOutOfRange {
        context: &'static str,
        index: usize,
        count: usize,
    },
    #[error("period constraint references exam {0} twice")]
    SelfReference(usize),
    #[error("duplicate institutional weighting {0}")]
    DuplicateWeighting(&'static str),
    #[error("period {0} starts earlier than its predecessor")]
    NonChronologicalPeriods(usize),
}

/// The immutable examination timetabling problem
pub struct Instance {
    /// All exams, indexed by exam id
    pub exams: Vec<Exam>,
    /// All periods in chronological order, indexed by period id
    pub periods: Vec<Period>,
    /// All rooms, indexed by room id
    pub rooms: Vec<Room>,
    /// The period hard constraints (COINCIDENCE, EXCLUSION, AFTER) as given
    pub period_constraints: Vec<PeriodConstraint>,
    /// The ROOM_EXCLUSIVE constraints as given
    pub room_constraints: Vec<RoomConstraint>,
    /// The institutional weightings, at most one of each kind
    pub weightings: Vec<Weighting>,
    /// Symmetric matrix of the number of students shared between two exams. EXCLUSION
    /// constraints add +1 in both directions, so clash(i, j) > 0 whenever i and j must
    /// not share a period.
    clash: Array2<u32>,
    /// Equivalence classes of exams connected by COINCIDENCE constraints
    coincidence_groups: Vec<Vec<usize>>,
    /// Maps each exam to its index in `coincidence_groups`
    class_of: Vec<usize>,
    /// For each exam, the AFTER constraints (first, second) it appears in
    after_by_exam: Vec<Vec<(usize, usize)>>,
    /// For each exam, the rooms whose capacity alone could seat it. Used as a pruning
    /// list when searching for a single room.
    pub eligible_rooms: Vec<Vec<usize>>,
    /// Total seat capacity available in any single period
    pub total_period_capacity: u32,
}

impl Instance {
    /// Build the full problem model from parsed records.
    ///
    /// Computes the clash matrix, the coincidence closure and the room eligibility lists,
    /// and marks exclusive exams. Returns an `InstanceError` for out-of-range exam
    /// references, self-referencing constraints, duplicate weighting kinds or periods
    /// out of chronological order.
    pub fn new(
        mut exams: Vec<Exam>,
        periods: Vec<Period>,
        rooms: Vec<Room>,
        period_constraints: Vec<PeriodConstraint>,
        room_constraints: Vec<RoomConstraint>,
        weightings: Vec<Weighting>,
    ) -> Result<Instance, InstanceError> {
        let num_exams = exams.len();
        let check_exam = |index: usize, context: &'static str| {
            if index >= num_exams {
                Err(InstanceError::ExamIndexOutOfRange {
                    context,
                    index,
                    count: num_exams,
                })
            } else {
                Ok(())
            }
        };

        for constraint in period_constraints.iter() {
            check_exam(constraint.first, "period constraint")?;
            check_exam(constraint.second, "period constraint")?;
            if constraint.first == constraint.second {
                return Err(InstanceError::SelfReference(constraint.first));
            }
        }
        for constraint in room_constraints.iter() {
            check_exam(constraint.exam, "room constraint")?;
        }
        let mut seen_kinds = Vec::<&'static str>::new();
        for weighting in weightings.iter() {
            if seen_kinds.contains(&weighting.name()) {
                return Err(InstanceError::DuplicateWeighting(weighting.name()));
            }
            seen_kinds.push(weighting.name());
        }
        for window in periods.windows(2) {
            if window[1].datetime() < window[0].datetime() {
                return Err(InstanceError::NonChronologicalPeriods(window[1].id));
            }
        }

        // Clash matrix: count shared students via a student -> exams index, then add the
        // synthetic +1 per EXCLUSION constraint.
        let mut clash = Array2::<u32>::zeros([num_exams, num_exams]);
        let mut exams_of_student = HashMap::<u32, Vec<usize>>::new();
        for exam in exams.iter() {
            for student in exam.students.iter() {
                exams_of_student.entry(*student).or_default().push(exam.id);
            }
        }
        for exam_ids in exams_of_student.values() {
            for (k, i) in exam_ids.iter().enumerate() {
                for j in exam_ids[k + 1..].iter() {
                    clash[[*i, *j]] += 1;
                    clash[[*j, *i]] += 1;
                }
            }
        }
        for constraint in period_constraints.iter() {
            if constraint.kind == PeriodConstraintKind::Exclusion {
                clash[[constraint.first, constraint.second]] += 1;
                clash[[constraint.second, constraint.first]] += 1;
            }
        }

        // Coincidence closure by union-find over the COINCIDENCE edges
        let mut uf = QuickUnionUf::<UnionBySize>::new(num_exams);
        for constraint in period_constraints.iter() {
            if constraint.kind == PeriodConstraintKind::Coincidence {
                uf.union(constraint.first, constraint.second);
            }
        }
        let mut group_of_root = HashMap::<usize, usize>::new();
        let mut coincidence_groups = Vec::<Vec<usize>>::new();
        let mut class_of = vec![0usize; num_exams];
        for exam in 0..num_exams {
            let root = uf.find(exam);
            let group = *group_of_root.entry(root).or_insert_with(|| {
                coincidence_groups.push(Vec::new());
                coincidence_groups.len() - 1
            });
            coincidence_groups[group].push(exam);
            class_of[exam] = group;
        }

        let mut after_by_exam = vec![Vec::new(); num_exams];
        for constraint in period_constraints.iter() {
            if constraint.kind == PeriodConstraintKind::After {
                after_by_exam[constraint.first].push((constraint.first, constraint.second));
                after_by_exam[constraint.second].push((constraint.first, constraint.second));
            }
        }

        for constraint in room_constraints.iter() {
            exams[constraint.exam].exclusive = true;
        }

        let eligible_rooms = exams
            .iter()
            .map(|exam| {
                rooms
                    .iter()
                    .filter(|room| room.capacity as usize >= exam.size())
                    .map(|room| room.id)
                    .collect()
            })
            .collect();

        let total_period_capacity = rooms.iter().map(|room| room.capacity).sum();

        Ok(Instance {
            exams,
            periods,
            rooms,
            period_constraints,
            room_constraints,
            weightings,
            clash,
            coincidence_groups,
            class_of,
            after_by_exam,
            eligible_rooms,
            total_period_capacity,
        })
    }

    /// Number of students shared between two exams (incl. the EXCLUSION increment)
    pub fn clash(&self, exam_a: usize, exam_b: usize) -> u32 {
        self.clash[[exam_a, exam_b]]
    }

    /// All exams that must share a period with the given exam, incl. the exam itself
    pub fn coincidence_class(&self, exam: usize) -> &[usize] {
        &self.coincidence_groups[self.class_of[exam]]
    }

    /// The AFTER constraints (first, second) involving the given exam
    pub fn after_constraints(&self, exam: usize) -> &[(usize, usize)] {
        &self.after_by_exam[exam]
    }

    pub fn two_in_a_row_weight(&self) -> Option<u32> {
        self.weightings.iter().find_map(|w| match w {
            Weighting::TwoInARow(weight) => Some(*weight),
            _ => None,
        })
    }

    pub fn two_in_a_day_weight(&self) -> Option<u32> {
        self.weightings.iter().find_map(|w| match w {
            Weighting::TwoInADay(weight) => Some(*weight),
            _ => None,
        })
    }

    pub fn period_spread_gap(&self) -> Option<u32> {
        self.weightings.iter().find_map(|w| match w {
            Weighting::PeriodSpread(gap) => Some(*gap),
            _ => None,
        })
    }

    pub fn non_mixed_durations_weight(&self) -> Option<u32> {
        self.weightings.iter().find_map(|w| match w {
            Weighting::NonMixedDurations(weight) => Some(*weight),
            _ => None,
        })
    }

    pub fn frontload(&self) -> Option<(usize, usize, u32)> {
        self.weightings.iter().find_map(|w| match w {
            Weighting::FrontLoad {
                largest,
                last,
                penalty,
            } => Some((*largest, *last, *penalty)),
            _ => None,
        })
    }
}
