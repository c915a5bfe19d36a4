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

//! The mutable booking state of one search node: the exam -> (period, rooms) map and the
//! derived indexes kept in sync with it (per-(period, room) occupancy lists, remaining
//! seat capacity per period and the sticky room-saturation flags).
//!
//! Each tree node owns its own `Assignment`; `clone()` copies the mutable tables only,
//! the `Instance` itself is shared by reference.

use crate::instance::Instance;
use crate::Booking;

/// A (partial) booking of exams into periods and rooms.
///
/// The saturation flags `full` are an accelerator for room search: once a (period, room)
/// pair is marked, room scans skip it. The flags are never consulted by the evaluator,
/// so a stale mark can cost search quality but not correctness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// For each exam, its booking (period id, room ids) or None while unassigned
    booked: Vec<Option<(usize, Vec<usize>)>>,
    /// For each (period, room), the exams occupying the room in that period
    occupancy: Vec<Vec<Vec<usize>>>,
    /// For each period, the total seat capacity minus the students already booked into
    /// it. Can go negative on overbooked infeasible bookings.
    remaining: Vec<i64>,
    /// Sticky saturation flag per (period, room), indexed period * num_rooms + room
    full: Vec<bool>,
    num_rooms: usize,
    num_booked: usize,
}

impl Assignment {
    /// An empty assignment for the given instance
    pub fn new(instance: &Instance) -> Assignment {
        let num_periods = instance.periods.len();
        let num_rooms = instance.rooms.len();
        Assignment {
            booked: vec![None; instance.exams.len()],
            occupancy: vec![vec![Vec::new(); num_rooms]; num_periods],
            remaining: vec![instance.total_period_capacity as i64; num_periods],
            full: vec![false; num_periods * num_rooms],
            num_rooms,
            num_booked: 0,
        }
    }

    /// Book an exam into a period and a non-empty list of rooms.
    ///
    /// Booking an exam twice is a programmer error and aborts the process.
    pub fn place(&mut self, instance: &Instance, exam: usize, period: usize, rooms: &[usize]) {
        assert!(
            self.booked[exam].is_none(),
            "Exam {} is already booked",
            exam
        );
        assert!(!rooms.is_empty(), "Booking of exam {} without rooms", exam);
        for room in rooms {
            self.occupancy[period][*room].push(exam);
        }
        self.remaining[period] -= instance.exams[exam].size() as i64;
        self.booked[exam] = Some((period, rooms.to_vec()));
        self.num_booked += 1;
        if instance.exams[exam].exclusive {
            for room in rooms {
                self.full[period * self.num_rooms + room] = true;
            }
        }
    }

    /// Undo a `place()` call. Clears the saturation flags of the booking's rooms; marks
    /// made by room scans in the meantime are not reconstructed.
    pub fn unplace(&mut self, instance: &Instance, exam: usize) {
        let (period, rooms) = self
            .booked[exam]
            .take()
            .unwrap_or_else(|| panic!("Exam {} is not booked", exam));
        for room in rooms.iter() {
            self.occupancy[period][*room].retain(|e| *e != exam);
            self.full[period * self.num_rooms + room] = false;
        }
        self.remaining[period] += instance.exams[exam].size() as i64;
        self.num_booked -= 1;
    }

    /// The period and rooms an exam is booked into, if any
    pub fn booking_of(&self, exam: usize) -> Option<&(usize, Vec<usize>)> {
        self.booked[exam].as_ref()
    }

    /// The period an exam is booked into, if any
    pub fn period_of(&self, exam: usize) -> Option<usize> {
        self.booked[exam].as_ref().map(|(period, _)| *period)
    }

    /// The exams occupying a room in a period
    pub fn exams_in_room(&self, period: usize, room: usize) -> &[usize] {
        &self.occupancy[period][room]
    }

    /// All exams booked into a period. Exams split over multiple rooms appear once per
    /// room, which is harmless for the clash checks this feeds.
    pub fn exams_in_period(&self, period: usize) -> impl Iterator<Item = usize> + '_ {
        self.occupancy[period].iter().flatten().copied()
    }

    /// Remaining seat capacity of a period
    pub fn remaining(&self, period: usize) -> i64 {
        self.remaining[period]
    }

    /// Whether the (period, room) pair has been marked saturated
    pub fn is_full(&self, period: usize, room: usize) -> bool {
        self.full[period * self.num_rooms + room]
    }

    /// Mark a (period, room) pair saturated, excluding it from future room scans
    pub fn mark_full(&mut self, period: usize, room: usize) {
        self.full[period * self.num_rooms + room] = true;
    }

    /// Number of booked exams
    pub fn num_booked(&self) -> usize {
        self.num_booked
    }

    /// True iff every exam of the instance is booked
    pub fn is_complete(&self) -> bool {
        self.num_booked == self.booked.len()
    }

    /// Export the bookings in exam-id order (unbooked exams are skipped)
    pub fn bookings(&self) -> Vec<Booking> {
        self.booked
            .iter()
            .enumerate()
            .filter_map(|(exam, booking)| {
                booking.as_ref().map(|(period, rooms)| Booking {
                    exam,
                    period: *period,
                    rooms: rooms.clone(),
                })
            })
            .collect()
    }
}
