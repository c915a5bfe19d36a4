use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

pub mod assignment;
pub mod dsatur;
pub mod ettmcts;
pub mod evaluator;
pub mod feasibility;
pub mod instance;
pub mod io;
pub mod mcts;
mod util;

/// Representation of a single examination's data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exam {
    /// id/index of the Exam in the list of exams
    pub id: usize,
    /// Duration of the exam in minutes
    pub duration: u32,
    /// Ids of the students sitting the exam
    pub students: Vec<u32>,
    /// True iff a ROOM_EXCLUSIVE constraint references this exam. Filled in by
    /// `Instance::new()`, so it may be left false when building the raw exam list.
    pub exclusive: bool,
}

impl Exam {
    /// Number of seats this exam requires
    pub fn size(&self) -> usize {
        self.students.len()
    }
}

/// Representation of a single time period's data.
///
/// Period ids define the chronological order: `Instance::new()` rejects period lists
/// whose (date, time) values are not non-decreasing in id order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    /// id/index of the Period in the list of periods
    pub id: usize,
    /// Date of the period
    pub date: NaiveDate,
    /// Start time of the period
    pub time: NaiveTime,
    /// Length of the period in minutes
    pub duration: u32,
    /// Soft penalty for booking any exam into this period
    pub penalty: u32,
}

impl Period {
    /// Combined date and start time, used for ordering AFTER constraints
    pub fn datetime(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }
}

/// Representation of a single room's data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    /// id/index of the Room in the list of rooms
    pub id: usize,
    /// Number of seats in the room
    pub capacity: u32,
    /// Soft penalty for booking any exam into this room
    pub penalty: u32,
}

/// Kind of a hard constraint between two exams' periods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodConstraintKind {
    /// Both exams must be booked into the same period
    Coincidence,
    /// The exams must not share a period
    Exclusion,
    /// The first exam must take place strictly after the second
    After,
}

/// Hard constraint relating the periods of two exams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodConstraint {
    /// id of the first exam
    pub first: usize,
    /// Kind of the constraint
    pub kind: PeriodConstraintKind,
    /// id of the second exam
    pub second: usize,
}

/// Hard constraint requiring an exam to be alone in its room(s). ROOM_EXCLUSIVE is the
/// only kind of room hard constraint in the ITC-2007 formulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomConstraint {
    /// id of the exclusive exam
    pub exam: usize,
}

/// One institutional weighting for the soft constraint components. An instance carries
/// at most one weighting of each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weighting {
    /// Penalty per student with two exams in adjacent periods on one day
    TwoInARow(u32),
    /// Penalty per student with two exams in non-adjacent periods on one day
    TwoInADay(u32),
    /// Period window within which clashing exams are penalized
    PeriodSpread(u32),
    /// Penalty per extra distinct exam duration in one (period, room)
    NonMixedDurations(u32),
    /// Penalty for booking one of the `largest` biggest exams into the `last` periods
    FrontLoad {
        largest: usize,
        last: usize,
        penalty: u32,
    },
}

impl Weighting {
    /// Name of the weighting kind, as spelled in the instance file format
    pub fn name(&self) -> &'static str {
        match self {
            Weighting::TwoInARow(_) => "TWOINAROW",
            Weighting::TwoInADay(_) => "TWOINADAY",
            Weighting::PeriodSpread(_) => "PERIODSPREAD",
            Weighting::NonMixedDurations(_) => "NONMIXEDDURATIONS",
            Weighting::FrontLoad { .. } => "FRONTLOAD",
        }
    }
}

/// A single booking: one exam into one period and one or more rooms.
///
/// The room list is non-empty; it has more than one entry only when no single room
/// could seat the exam and the exam has been split across rooms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Booking {
    /// id of the booked exam
    pub exam: usize,
    /// id of the period the exam is booked into
    pub period: usize,
    /// ids of the rooms seating the exam
    pub rooms: Vec<usize>,
}
