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

//! Scoring of complete or partial bookings: the five hard-violation counters whose sum is
//! the distance to feasibility, and the seven soft penalty components. Constraints with an
//! unbooked endpoint are skipped, so the same functions serve full solutions, rollout
//! results and partial-assignment lower bounds.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::instance::Instance;
use crate::mcts::SolutionValue;
use crate::Booking;

/// All hard and soft score components of one booking, as produced by `evaluate()`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScoreBreakdown {
    /// Ordered pairs of clashing exams sharing a period
    pub conflicting_exams: u32,
    /// Bookings whose combined room capacity is below the exam size
    pub overbooked_periods: u32,
    /// Bookings whose exam takes longer than the period allows
    pub too_short_periods: u32,
    /// Broken COINCIDENCE/EXCLUSION/AFTER constraints with both exams booked
    pub period_constraint_violations: u32,
    /// ROOM_EXCLUSIVE exams sharing one of their rooms with another exam
    pub room_constraint_violations: u32,
    pub two_in_a_row: u64,
    pub two_in_a_day: u64,
    pub period_spread: u64,
    pub mixed_durations: u64,
    pub frontload: u64,
    pub period_penalty: u64,
    pub room_penalty: u64,
}

impl ScoreBreakdown {
    /// Number of hard constraint violations ("distance to feasibility")
    pub fn hard(&self) -> u32 {
        self.conflicting_exams
            + self.overbooked_periods
            + self.too_short_periods
            + self.period_constraint_violations
            + self.room_constraint_violations
    }

    /// Total soft constraint penalty
    pub fn soft(&self) -> u64 {
        self.two_in_a_row
            + self.two_in_a_day
            + self.period_spread
            + self.mixed_durations
            + self.frontload
            + self.period_penalty
            + self.room_penalty
    }

    /// The two-tier objective value for the search engine
    pub fn value(&self) -> SolutionValue {
        SolutionValue::new(self.hard(), self.soft())
    }
}

impl fmt::Display for ScoreBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Hard constraints -> {}
Conflicting exams -> {}
Overbooked periods -> {}
Short Periods -> {}
Period constraints -> {}
Room constraints -> {}
Soft constraints -> {}
Two in a row -> {}
Two in a day -> {}
Period spread -> {}
Mixed durations -> {}
Frontload -> {}
Period penalty -> {}
Room penalty -> {}",
            self.hard(),
            self.conflicting_exams,
            self.overbooked_periods,
            self.too_short_periods,
            self.period_constraint_violations,
            self.room_constraint_violations,
            self.soft(),
            self.two_in_a_row,
            self.two_in_a_day,
            self.period_spread,
            self.mixed_durations,
            self.frontload,
            self.period_penalty,
            self.room_penalty,
        )
    }
}

/// Score a list of bookings against the instance. The booking list may be partial; every
/// counter only considers constraints whose exams are all booked.
pub fn evaluate(instance: &Instance, bookings: &[Booking]) -> ScoreBreakdown {
    let mut booking_of: Vec<Option<&Booking>> = vec![None; instance.exams.len()];
    for booking in bookings {
        booking_of[booking.exam] = Some(booking);
    }

    let mut score = ScoreBreakdown::default();

    for booking_a in bookings {
        for booking_b in bookings {
            if booking_a.exam != booking_b.exam
                && booking_a.period == booking_b.period
                && instance.clash(booking_a.exam, booking_b.exam) > 0
            {
                score.conflicting_exams += 1;
            }
        }
    }

    for booking in bookings {
        let total_capacity: u64 = booking
            .rooms
            .iter()
            .map(|room| instance.rooms[*room].capacity as u64)
            .sum();
        if instance.exams[booking.exam].size() as u64 > total_capacity {
            score.overbooked_periods += 1;
        }
        if instance.exams[booking.exam].duration > instance.periods[booking.period].duration {
            score.too_short_periods += 1;
        }
        score.period_penalty += instance.periods[booking.period].penalty as u64;
        score.room_penalty += booking
            .rooms
            .iter()
            .map(|room| instance.rooms[*room].penalty as u64)
            .sum::<u64>();
    }

    for constraint in instance.period_constraints.iter() {
        let (booking_a, booking_b) = match (
            booking_of[constraint.first],
            booking_of[constraint.second],
        ) {
            (Some(a), Some(b)) => (a, b),
            _ => continue,
        };
        let violated = match constraint.kind {
            crate::PeriodConstraintKind::Coincidence => booking_a.period != booking_b.period,
            crate::PeriodConstraintKind::Exclusion => booking_a.period == booking_b.period,
            crate::PeriodConstraintKind::After => {
                instance.periods[booking_a.period].datetime()
                    <= instance.periods[booking_b.period].datetime()
            }
        };
        if violated {
            score.period_constraint_violations += 1;
        }
    }

    for constraint in instance.room_constraints.iter() {
        let booking = match booking_of[constraint.exam] {
            Some(b) => b,
            None => continue,
        };
        let not_alone = bookings.iter().any(|other| {
            other.exam != booking.exam
                && other.period == booking.period
                && other.rooms.iter().any(|room| booking.rooms.contains(room))
        });
        if not_alone {
            score.room_constraint_violations += 1;
        }
    }

    let row_weight = instance.two_in_a_row_weight();
    let day_weight = instance.two_in_a_day_weight();
    if row_weight.is_some() || day_weight.is_some() {
        for (i, booking_a) in bookings.iter().enumerate() {
            for booking_b in bookings[i + 1..].iter() {
                if instance.periods[booking_a.period].date
                    != instance.periods[booking_b.period].date
                {
                    continue;
                }
                let clash = instance.clash(booking_a.exam, booking_b.exam) as u64;
                let distance = (booking_a.period as i64 - booking_b.period as i64).abs();
                if distance == 1 {
                    if let Some(weight) = row_weight {
                        score.two_in_a_row += weight as u64 * clash;
                    }
                } else if distance > 1 {
                    if let Some(weight) = day_weight {
                        score.two_in_a_day += weight as u64 * clash;
                    }
                }
            }
        }
    }

    if let Some(gap) = instance.period_spread_gap() {
        for booking_a in bookings {
            for booking_b in bookings {
                let spread = booking_b.period as i64 - booking_a.period as i64;
                if spread > 0 && spread <= gap as i64 {
                    score.period_spread +=
                        instance.clash(booking_a.exam, booking_b.exam) as u64;
                }
            }
        }
    }

    if let Some(weight) = instance.non_mixed_durations_weight() {
        let mut durations = HashMap::<(usize, usize), Vec<u32>>::new();
        for booking in bookings {
            for room in booking.rooms.iter() {
                let entry = durations.entry((booking.period, *room)).or_default();
                let duration = instance.exams[booking.exam].duration;
                if !entry.contains(&duration) {
                    entry.push(duration);
                }
            }
        }
        for distinct in durations.values() {
            score.mixed_durations += (distinct.len() as u64 - 1) * weight as u64;
        }
    }

    if let Some((largest, last, penalty)) = instance.frontload() {
        let mut by_size: Vec<usize> = (0..instance.exams.len()).collect();
        by_size.sort_by_key(|exam| std::cmp::Reverse(instance.exams[*exam].size()));
        let first_late_period = instance.periods.len().saturating_sub(last);
        for exam in by_size.into_iter().take(largest) {
            if let Some(booking) = booking_of[exam] {
                if booking.period >= first_late_period {
                    score.frontload += penalty as u64;
                }
            }
        }
    }

    score
}

// =============================================================================
// Tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Exam, Period, PeriodConstraint, PeriodConstraintKind, Room, RoomConstraint, Weighting};
    use chrono::{NaiveDate, NaiveTime};

    /// Four exams, four periods on two days, three rooms. Exams 0 and 1 share two
    /// students, exam 3 is room-exclusive.
    fn make_instance(weightings: Vec<Weighting>) -> Instance {
        let exams = vec![
            Exam {
                id: 0,
                duration: 120,
                students: vec![1, 2, 3],
                exclusive: false,
            },
            Exam {
                id: 1,
                duration: 90,
                students: vec![1, 2],
                exclusive: false,
            },
            Exam {
                id: 2,
                duration: 120,
                students: (10..110).collect(),
                exclusive: false,
            },
            Exam {
                id: 3,
                duration: 60,
                students: vec![4],
                exclusive: false,
            },
        ];
        let periods = vec![
            Period {
                id: 0,
                date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                duration: 180,
                penalty: 7,
            },
            Period {
                id: 1,
                date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                time: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                duration: 180,
                penalty: 0,
            },
            Period {
                id: 2,
                date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
                duration: 100,
                penalty: 0,
            },
            Period {
                id: 3,
                date: NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
                time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                duration: 180,
                penalty: 0,
            },
        ];
        let rooms = vec![
            Room {
                id: 0,
                capacity: 80,
                penalty: 0,
            },
            Room {
                id: 1,
                capacity: 60,
                penalty: 2,
            },
            Room {
                id: 2,
                capacity: 60,
                penalty: 0,
            },
        ];
        Instance::new(
            exams,
            periods,
            rooms,
            vec![PeriodConstraint {
                first: 0,
                kind: PeriodConstraintKind::After,
                second: 3,
            }],
            vec![RoomConstraint { exam: 3 }],
            weightings,
        )
        .unwrap()
    }

    fn booking(exam: usize, period: usize, rooms: Vec<usize>) -> Booking {
        Booking {
            exam,
            period,
            rooms,
        }
    }

    #[test]
    fn test_conflicting_exams_counts_ordered_pairs() {
        let instance = make_instance(vec![]);
        let score = evaluate(
            &instance,
            &[booking(0, 1, vec![0]), booking(1, 1, vec![1])],
        );
        assert_eq!(score.conflicting_exams, 2);
        assert!(score.hard() >= 2);

        let score = evaluate(
            &instance,
            &[booking(0, 1, vec![0]), booking(1, 3, vec![1])],
        );
        assert_eq!(score.conflicting_exams, 0);
    }

    #[test]
    fn test_overbooked_periods() {
        let instance = make_instance(vec![]);
        // Exam 2 has 100 students; room 0 seats 80
        let score = evaluate(&instance, &[booking(2, 1, vec![0])]);
        assert_eq!(score.overbooked_periods, 1);
        // Split across two rooms of 60 seats each, it fits
        let score = evaluate(&instance, &[booking(2, 1, vec![1, 2])]);
        assert_eq!(score.overbooked_periods, 0);
    }

    #[test]
    fn test_too_short_periods() {
        let instance = make_instance(vec![]);
        // Period 2 only offers 100 minutes, exam 0 takes 120
        let score = evaluate(&instance, &[booking(0, 2, vec![0])]);
        assert_eq!(score.too_short_periods, 1);
        let score = evaluate(&instance, &[booking(0, 1, vec![0])]);
        assert_eq!(score.too_short_periods, 0);
    }

    #[test]
    fn test_after_constraint_violations() {
        let instance = make_instance(vec![]);
        // Exam 0 must come after exam 3
        let score = evaluate(
            &instance,
            &[booking(0, 3, vec![0]), booking(3, 1, vec![1])],
        );
        assert_eq!(score.period_constraint_violations, 0);
        let score = evaluate(
            &instance,
            &[booking(0, 1, vec![0]), booking(3, 3, vec![1])],
        );
        assert_eq!(score.period_constraint_violations, 1);
        // Equal datetimes count as violated as well
        let score = evaluate(
            &instance,
            &[booking(0, 1, vec![0]), booking(3, 1, vec![1])],
        );
        assert_eq!(score.period_constraint_violations, 1);
        // Unbooked endpoint: constraint is skipped
        let score = evaluate(&instance, &[booking(0, 1, vec![0])]);
        assert_eq!(score.period_constraint_violations, 0);
    }

    #[test]
    fn test_coincidence_and_exclusion_violations() {
        let exams = (0..2)
            .map(|id| Exam {
                id,
                duration: 60,
                students: vec![id as u32],
                exclusive: false,
            })
            .collect();
        let periods = (0..2)
            .map(|id| Period {
                id,
                date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                time: NaiveTime::from_hms_opt(9 + 5 * id as u32, 0, 0).unwrap(),
                duration: 180,
                penalty: 0,
            })
            .collect();
        let rooms = vec![Room {
            id: 0,
            capacity: 10,
            penalty: 0,
        }];
        let instance = Instance::new(
            exams,
            periods,
            rooms,
            vec![PeriodConstraint {
                first: 0,
                kind: PeriodConstraintKind::Coincidence,
                second: 1,
            }],
            vec![],
            vec![],
        )
        .unwrap();
        let score = evaluate(
            &instance,
            &[booking(0, 0, vec![0]), booking(1, 1, vec![0])],
        );
        assert_eq!(score.period_constraint_violations, 1);
        let score = evaluate(
            &instance,
            &[booking(0, 0, vec![0]), booking(1, 0, vec![0])],
        );
        assert_eq!(score.period_constraint_violations, 0);
    }

    #[test]
    fn test_room_constraint_violations() {
        let instance = make_instance(vec![]);
        // Exam 3 is room-exclusive and shares room 1 with exam 1
        let score = evaluate(
            &instance,
            &[booking(3, 1, vec![1]), booking(1, 1, vec![1])],
        );
        assert_eq!(score.room_constraint_violations, 1);
        // Different rooms in the same period are fine
        let score = evaluate(
            &instance,
            &[booking(3, 1, vec![1]), booking(1, 1, vec![0])],
        );
        assert_eq!(score.room_constraint_violations, 0);
    }

    #[test]
    fn test_two_in_a_row_and_day() {
        let instance = make_instance(vec![Weighting::TwoInARow(7), Weighting::TwoInADay(5)]);
        // Exams 0 and 1 share 2 students; periods 0 and 1 are adjacent on one day
        let score = evaluate(
            &instance,
            &[booking(0, 0, vec![0]), booking(1, 1, vec![0])],
        );
        assert_eq!(score.two_in_a_row, 7 * 2);
        assert_eq!(score.two_in_a_day, 0);
        // Periods 0 and 2 are on the same day but not adjacent
        let score = evaluate(
            &instance,
            &[booking(0, 0, vec![0]), booking(1, 2, vec![0])],
        );
        assert_eq!(score.two_in_a_row, 0);
        assert_eq!(score.two_in_a_day, 5 * 2);
        // Periods 2 and 3 are adjacent but on different days
        let score = evaluate(
            &instance,
            &[booking(0, 3, vec![0]), booking(1, 2, vec![0])],
        );
        assert_eq!(score.two_in_a_row, 0);
        assert_eq!(score.two_in_a_day, 0);
    }

    #[test]
    fn test_period_spread() {
        let instance = make_instance(vec![Weighting::PeriodSpread(2)]);
        let score = evaluate(
            &instance,
            &[booking(0, 0, vec![0]), booking(1, 2, vec![0])],
        );
        assert_eq!(score.period_spread, 2);
        let score = evaluate(
            &instance,
            &[booking(0, 0, vec![0]), booking(1, 3, vec![0])],
        );
        assert_eq!(score.period_spread, 0);
    }

    #[test]
    fn test_mixed_durations() {
        let instance = make_instance(vec![Weighting::NonMixedDurations(10)]);
        // Durations 120 and 90 in room 0 of period 1
        let score = evaluate(
            &instance,
            &[booking(0, 1, vec![0]), booking(1, 1, vec![0])],
        );
        assert_eq!(score.mixed_durations, 10);
        let score = evaluate(
            &instance,
            &[booking(0, 1, vec![0]), booking(1, 1, vec![1])],
        );
        assert_eq!(score.mixed_durations, 0);
    }

    #[test]
    fn test_frontload() {
        let instance = make_instance(vec![Weighting::FrontLoad {
            largest: 1,
            last: 1,
            penalty: 5,
        }]);
        // Exam 2 is the largest; period 3 is the single "late" period
        let score = evaluate(&instance, &[booking(2, 3, vec![0])]);
        assert_eq!(score.frontload, 5);
        let score = evaluate(&instance, &[booking(2, 1, vec![0])]);
        assert_eq!(score.frontload, 0);
        // Small exams go late without penalty
        let score = evaluate(&instance, &[booking(3, 3, vec![0])]);
        assert_eq!(score.frontload, 0);
    }

    #[test]
    fn test_room_and_period_penalties() {
        let instance = make_instance(vec![]);
        let score = evaluate(&instance, &[booking(3, 0, vec![1])]);
        assert_eq!(score.period_penalty, 7);
        assert_eq!(score.room_penalty, 2);
        // A split booking pays every room's penalty
        let score = evaluate(&instance, &[booking(2, 1, vec![1, 2])]);
        assert_eq!(score.room_penalty, 2);
        assert_eq!(score.period_penalty, 0);
    }

    #[test]
    fn test_soft_total_independent_of_booking_order() {
        let instance = make_instance(vec![
            Weighting::TwoInARow(7),
            Weighting::TwoInADay(5),
            Weighting::PeriodSpread(2),
            Weighting::NonMixedDurations(10),
        ]);
        let mut bookings = vec![
            booking(0, 0, vec![0]),
            booking(1, 1, vec![0]),
            booking(2, 3, vec![1, 2]),
            booking(3, 1, vec![1]),
        ];
        let forward = evaluate(&instance, &bookings);
        bookings.reverse();
        let backward = evaluate(&instance, &bookings);
        assert_eq!(forward.soft(), backward.soft());
        assert_eq!(forward.hard(), backward.hard());
    }

    #[test]
    fn test_report_lines() {
        let instance = make_instance(vec![]);
        let score = evaluate(&instance, &[booking(0, 1, vec![0])]);
        let report = score.to_string();
        assert!(report.starts_with("Hard constraints -> 0\n"));
        assert!(report.contains("\nRoom penalty -> 0"));
    }
}
