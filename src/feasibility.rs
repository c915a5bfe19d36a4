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

//! Stateless admissibility predicates over (instance, partial assignment), used by branch
//! generation, rollouts and the scenario tests. Whether a complete booking actually is
//! feasible is decided by the evaluator; these predicates only filter candidate
//! placements against the current partial state.

use crate::assignment::Assignment;
use crate::instance::Instance;

/// Admissibility tester for candidate (period) and (period, room) placements
pub struct FeasibilityTester<'a> {
    instance: &'a Instance,
}

impl<'a> FeasibilityTester<'a> {
    pub fn new(instance: &'a Instance) -> FeasibilityTester<'a> {
        FeasibilityTester { instance }
    }

    /// Check whether an exam may be booked into a period, given the current partial
    /// assignment:
    /// * every exam of its coincidence class must fit the period's duration,
    /// * already-booked members of the class pin the period,
    /// * no exam with a positive clash count may already sit in the period,
    /// * AFTER constraints involving the exam must be respected w.r.t. period ids.
    pub fn feasible_period(&self, assignment: &Assignment, exam: usize, period: usize) -> bool {
        let period_data = &self.instance.periods[period];
        for member in self.instance.coincidence_class(exam) {
            if self.instance.exams[*member].duration > period_data.duration {
                return false;
            }
            if *member != exam {
                if let Some(booked_period) = assignment.period_of(*member) {
                    if booked_period != period {
                        return false;
                    }
                }
            }
        }

        for other in assignment.exams_in_period(period) {
            if self.instance.clash(exam, other) > 0 {
                return false;
            }
        }

        for (first, second) in self.instance.after_constraints(exam) {
            if *first == exam {
                // `exam` must come strictly after `second`
                if let Some(other_period) = assignment.period_of(*second) {
                    if other_period >= period {
                        return false;
                    }
                }
            } else {
                // `first` must come strictly after `exam`
                if let Some(other_period) = assignment.period_of(*first) {
                    if other_period <= period {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Check whether a single room can take the whole exam in the given period
    pub fn feasible_room(
        &self,
        assignment: &Assignment,
        exam: usize,
        period: usize,
        room: usize,
    ) -> bool {
        let capacity = self.current_room_capacity(assignment, period, room);
        if (self.instance.exams[exam].size() as i64) > capacity {
            return false;
        }
        self.room_shareable(assignment, exam, period, room, capacity)
    }

    /// Check whether a room may take part of the exam in a multi-room split. Unlike
    /// `feasible_room` there is no capacity threshold; only the exclusivity rules apply.
    pub fn feasible_rooms(
        &self,
        assignment: &Assignment,
        exam: usize,
        period: usize,
        room: usize,
    ) -> bool {
        let capacity = self.current_room_capacity(assignment, period, room);
        self.room_shareable(assignment, exam, period, room, capacity)
    }

    /// Seats left in a room during a period, under the current partial assignment
    pub fn current_room_capacity(&self, assignment: &Assignment, period: usize, room: usize) -> i64 {
        let mut capacity = self.instance.rooms[room].capacity as i64;
        for other in assignment.exams_in_room(period, room) {
            capacity -= self.instance.exams[*other].size() as i64;
        }
        capacity
    }

    fn room_shareable(
        &self,
        assignment: &Assignment,
        exam: usize,
        period: usize,
        room: usize,
        capacity: i64,
    ) -> bool {
        // A room-exclusive exam needs the room empty
        if self.instance.exams[exam].exclusive
            && capacity != self.instance.rooms[room].capacity as i64
        {
            return false;
        }
        // A room already hosting a room-exclusive exam cannot be shared
        for other in assignment.exams_in_room(period, room) {
            if self.instance.exams[*other].exclusive {
                return false;
            }
        }
        true
    }
}

// =============================================================================
// Tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Exam, Period, PeriodConstraint, PeriodConstraintKind, Room, RoomConstraint};
    use chrono::{NaiveDate, NaiveTime};

    fn make_instance(
        period_constraints: Vec<PeriodConstraint>,
        room_constraints: Vec<RoomConstraint>,
    ) -> Instance {
        let exams = vec![
            // Exams 0 and 1 share student 1
            Exam {
                id: 0,
                duration: 120,
                students: vec![1, 2],
                exclusive: false,
            },
            Exam {
                id: 1,
                duration: 120,
                students: vec![1, 3],
                exclusive: false,
            },
            Exam {
                id: 2,
                duration: 200,
                students: vec![4],
                exclusive: false,
            },
            Exam {
                id: 3,
                duration: 60,
                students: vec![5, 6, 7],
                exclusive: false,
            },
        ];
        let periods = (0..3)
            .map(|id| Period {
                id,
                date: NaiveDate::from_ymd_opt(2024, 6, 1 + id as u32).unwrap(),
                time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                duration: 180,
                penalty: 0,
            })
            .collect();
        let rooms = vec![
            Room {
                id: 0,
                capacity: 4,
                penalty: 0,
            },
            Room {
                id: 1,
                capacity: 2,
                penalty: 0,
            },
        ];
        Instance::new(exams, periods, rooms, period_constraints, room_constraints, vec![]).unwrap()
    }

    #[test]
    fn test_clashing_exams_rejected() {
        let instance = make_instance(vec![], vec![]);
        let tester = FeasibilityTester::new(&instance);
        let mut assignment = Assignment::new(&instance);
        assignment.place(&instance, 0, 1, &[0]);

        assert!(!tester.feasible_period(&assignment, 1, 1));
        assert!(tester.feasible_period(&assignment, 1, 0));
        assert!(tester.feasible_period(&assignment, 1, 2));
        // Exam 3 shares no students with exam 0
        assert!(tester.feasible_period(&assignment, 3, 1));
    }

    #[test]
    fn test_period_duration_respected() {
        let instance = make_instance(vec![], vec![]);
        let tester = FeasibilityTester::new(&instance);
        let assignment = Assignment::new(&instance);
        // Exam 2 takes 200 minutes, the periods only offer 180
        assert!(!tester.feasible_period(&assignment, 2, 0));
    }

    #[test]
    fn test_coincidence_pins_period() {
        let instance = make_instance(
            vec![PeriodConstraint {
                first: 2,
                kind: PeriodConstraintKind::Coincidence,
                second: 3,
            }],
            vec![],
        );
        let tester = FeasibilityTester::new(&instance);
        let mut assignment = Assignment::new(&instance);
        assignment.place(&instance, 3, 1, &[0]);

        // Exam 2 itself is too long for any period, so its whole class is stuck; use the
        // other direction: booking exam 3 elsewhere than a booked class member.
        assert!(!tester.feasible_period(&assignment, 2, 1));

        let instance = make_instance(
            vec![PeriodConstraint {
                first: 0,
                kind: PeriodConstraintKind::Coincidence,
                second: 3,
            }],
            vec![],
        );
        let tester = FeasibilityTester::new(&instance);
        let mut assignment = Assignment::new(&instance);
        assignment.place(&instance, 0, 2, &[0]);
        assert!(!tester.feasible_period(&assignment, 3, 0));
        assert!(tester.feasible_period(&assignment, 3, 2));
    }

    #[test]
    fn test_after_constraint_orientation() {
        let instance = make_instance(
            vec![PeriodConstraint {
                first: 0,
                kind: PeriodConstraintKind::After,
                second: 3,
            }],
            vec![],
        );
        let tester = FeasibilityTester::new(&instance);
        let mut assignment = Assignment::new(&instance);
        assignment.place(&instance, 3, 1, &[0]);
        // Exam 0 must come strictly after exam 3 (booked to period 1)
        assert!(!tester.feasible_period(&assignment, 0, 0));
        assert!(!tester.feasible_period(&assignment, 0, 1));
        assert!(tester.feasible_period(&assignment, 0, 2));

        let mut assignment = Assignment::new(&instance);
        assignment.place(&instance, 0, 1, &[0]);
        // Exam 3 must come strictly before exam 0 (booked to period 1)
        assert!(tester.feasible_period(&assignment, 3, 0));
        assert!(!tester.feasible_period(&assignment, 3, 1));
        assert!(!tester.feasible_period(&assignment, 3, 2));
    }

    #[test]
    fn test_room_capacity() {
        let instance = make_instance(vec![], vec![]);
        let tester = FeasibilityTester::new(&instance);
        let mut assignment = Assignment::new(&instance);
        // Exam 3 (3 students) only fits room 0
        assert!(tester.feasible_room(&assignment, 3, 0, 0));
        assert!(!tester.feasible_room(&assignment, 3, 0, 1));

        assignment.place(&instance, 0, 0, &[0]);
        assert_eq!(tester.current_room_capacity(&assignment, 0, 0), 2);
        // Two seats left, three needed
        assert!(!tester.feasible_room(&assignment, 3, 0, 0));
        // But the room may still take part in a split
        assert!(tester.feasible_rooms(&assignment, 3, 0, 0));
    }

    #[test]
    fn test_room_exclusivity() {
        let instance = make_instance(vec![], vec![RoomConstraint { exam: 2 }]);
        let tester = FeasibilityTester::new(&instance);
        let mut assignment = Assignment::new(&instance);
        assignment.place(&instance, 0, 0, &[0]);

        // The exclusive exam 2 needs an untouched room
        assert!(!tester.feasible_room(&assignment, 2, 0, 0));
        assert!(tester.feasible_room(&assignment, 2, 0, 1));

        // And nobody may join a room an exclusive exam occupies
        let mut assignment = Assignment::new(&instance);
        assignment.place(&instance, 2, 0, &[0]);
        assert!(!tester.feasible_room(&assignment, 3, 0, 0));
        assert!(!tester.feasible_rooms(&assignment, 3, 0, 0));
    }
}
