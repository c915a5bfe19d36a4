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

//! A specialization of the generic Monte-Carlo tree search from `mcts` for the ITC-2007
//! examination timetabling problem.
//!
//! The module provides the tree node type with its branch generation (DSatur-ordered exam
//! selection, capacity-ordered period enumeration, best-fit/split/random room choice) and
//! the heuristic rollout, as well as the `solve()` driver that wires an instance to the
//! engine and surfaces the incumbent.

use std::cmp::Reverse;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time;

use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::assignment::Assignment;
use crate::dsatur::DsaturState;
use crate::evaluator::{evaluate, ScoreBreakdown};
use crate::feasibility::FeasibilityTester;
use crate::instance::Instance;
use crate::mcts::{self, SearchLimits, SearchNode, Solution, SolutionValue, Termination};
use crate::Booking;

/// Configuration of a solver run
pub struct SolverConfig {
    /// Wall clock budget for the search
    pub time_limit: Option<time::Duration>,
    /// Maximum number of search iterations
    pub iter_limit: Option<u64>,
    /// Seed of the search RNG. Identical seeds on identical instances reproduce the
    /// incumbent sequence exactly.
    pub seed: u64,
    /// Bound-based discarding of children and tree sweeps on incumbent improvements
    pub pruning: bool,
    /// Stop as soon as a feasible solution is found
    pub stop_on_feasible: bool,
    /// Children created per search iteration
    pub expansion_limit: usize,
    /// Iterations between progress log lines
    pub log_iter_interval: u64,
    /// Cooperative cancellation flag
    pub interrupt: Option<Arc<AtomicBool>>,
}

impl Default for SolverConfig {
    fn default() -> SolverConfig {
        SolverConfig {
            time_limit: None,
            iter_limit: None,
            seed: 42,
            pruning: true,
            stop_on_feasible: false,
            expansion_limit: 1,
            log_iter_interval: 1000,
            interrupt: None,
        }
    }
}

/// The best timetable observed during a solver run
pub struct SolveResult {
    /// Bookings of the best solution, in exam-id order
    pub bookings: Vec<Booking>,
    /// Full score breakdown of the best solution
    pub score: ScoreBreakdown,
    /// Values of all incumbents in order of discovery
    pub incumbents: Vec<SolutionValue>,
    /// Why the search stopped
    pub termination: Termination,
}

/// Main method of the module: solve an examination timetabling instance with the
/// Monte-Carlo tree search, returning the best (possibly still infeasible) timetable
/// observed within the budget and the search statistics.
pub fn solve(
    instance: Arc<Instance>,
    config: &SolverConfig,
) -> (Option<SolveResult>, mcts::Statistics) {
    info!("Seeding RNG with {}...", config.seed);
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let root = ExamNode::root(instance.clone());
    let limits = SearchLimits {
        time_limit: config.time_limit,
        iter_limit: config.iter_limit,
        pruning: config.pruning,
        stop_on_feasible: config.stop_on_feasible,
        expansion_limit: config.expansion_limit,
        log_iter_interval: config.log_iter_interval,
        interrupt: config.interrupt.clone(),
    };

    let outcome = mcts::run(root, &limits, &mut rng);
    let statistics = outcome.statistics;
    let incumbents = outcome.incumbents;
    let termination = outcome.termination;

    let result = outcome.best.map(|best| {
        let bookings = best.data.clone();
        let score = evaluate(&instance, &bookings);
        debug!("Best solution: {}", score.value());
        SolveResult {
            bookings,
            score,
            incumbents,
            termination,
        }
    });
    (result, statistics)
}

/// One (period, rooms) decision for one exam, descending one level in the search tree
#[derive(Debug, Clone, PartialEq, Eq)]
struct BranchDecision {
    exam: usize,
    period: usize,
    rooms: Vec<usize>,
}

/// State of one search tree node: the partial booking plus the DSatur scratch driving
/// exam selection. The instance is shared, the mutable tables are owned per node.
#[derive(Clone)]
struct ExamNode {
    instance: Arc<Instance>,
    assignment: Assignment,
    dsatur: DsaturState,
    cached_bound: Option<SolutionValue>,
}

impl ExamNode {
    fn root(instance: Arc<Instance>) -> ExamNode {
        let assignment = Assignment::new(&instance);
        let dsatur = DsaturState::new(&instance);
        ExamNode {
            instance,
            assignment,
            dsatur,
            cached_bound: None,
        }
    }

    /// Best-fit single room for the exam in the period: prefer an exact fit, otherwise
    /// the smallest remaining capacity that still seats the whole exam. Rooms observed
    /// at zero capacity are marked saturated along the way.
    fn find_single_room(&mut self, exam: usize, period: usize) -> Option<usize> {
        let instance = self.instance.clone();
        let tester = FeasibilityTester::new(&instance);
        let students = instance.exams[exam].size() as i64;
        let mut candidates = Vec::new();

        for room in instance.eligible_rooms[exam].iter() {
            if self.assignment.is_full(period, *room) {
                continue;
            }
            let capacity = tester.current_room_capacity(&self.assignment, period, *room);
            if capacity == 0 {
                self.assignment.mark_full(period, *room);
                continue;
            }
            if capacity < students {
                continue;
            }
            if tester.feasible_room(&self.assignment, exam, period, *room) {
                if capacity == students {
                    return Some(*room);
                }
                candidates.push((*room, capacity));
            }
        }

        candidates.sort_by_key(|(_room, capacity)| *capacity);
        candidates.first().map(|(room, _capacity)| *room)
    }

    /// Multi-room split: gather all shareable rooms with seats left, largest first, and
    /// accumulate until the exam fits. None if even all rooms together are too small.
    fn find_multiple_rooms(&mut self, exam: usize, period: usize) -> Option<Vec<usize>> {
        let instance = self.instance.clone();
        let tester = FeasibilityTester::new(&instance);
        let students = instance.exams[exam].size() as i64;
        let mut candidates = Vec::new();

        for room in 0..instance.rooms.len() {
            if self.assignment.is_full(period, room) {
                continue;
            }
            let capacity = tester.current_room_capacity(&self.assignment, period, room);
            if capacity > 0 && tester.feasible_rooms(&self.assignment, exam, period, room) {
                candidates.push((room, capacity));
            }
        }

        candidates.sort_by_key(|(_room, capacity)| Reverse(*capacity));
        let mut combined_rooms = Vec::new();
        let mut combined_capacity = 0i64;
        for (room, capacity) in candidates {
            combined_rooms.push(room);
            combined_capacity += capacity;
            if combined_capacity >= students {
                return Some(combined_rooms);
            }
        }
        None
    }

    /// Room choice for a fixed period: single best fit, then multi-room split, then a
    /// uniformly random room. The random fallback keeps the branch alive and leaves the
    /// overbooking to the evaluator.
    fn room_branch(&mut self, exam: usize, period: usize, rng: &mut ChaCha8Rng) -> BranchDecision {
        if let Some(room) = self.find_single_room(exam, period) {
            return BranchDecision {
                exam,
                period,
                rooms: vec![room],
            };
        }
        if let Some(rooms) = self.find_multiple_rooms(exam, period) {
            return BranchDecision {
                exam,
                period,
                rooms,
            };
        }
        let room = rng.gen_range(0..self.instance.rooms.len());
        BranchDecision {
            exam,
            period,
            rooms: vec![room],
        }
    }

    fn place(&mut self, exam: usize, period: usize, rooms: &[usize]) {
        let instance = self.instance.clone();
        self.assignment.place(&instance, exam, period, rooms);
        self.dsatur.record(&instance, exam, period);
        self.cached_bound = None;
    }
}

impl SearchNode for ExamNode {
    type Branch = BranchDecision;
    type Data = Vec<Booking>;

    /// Branches for the next exam by DSatur order: if the exam's coincidence class is
    /// already pinned to a period, only that period is offered; otherwise all feasible
    /// periods in descending order of remaining capacity, each paired with its room
    /// choice. With no feasible period at all, a single random-period branch keeps the
    /// subtree alive.
    fn branches(&mut self, rng: &mut ChaCha8Rng) -> Vec<BranchDecision> {
        let instance = self.instance.clone();
        let exam = match self.dsatur.next_exam(&instance) {
            Some(exam) => exam,
            None => return Vec::new(),
        };

        let mut actions = Vec::new();

        let pinned_period = instance
            .coincidence_class(exam)
            .iter()
            .filter(|member| **member != exam)
            .find_map(|member| self.assignment.period_of(*member));
        if let Some(period) = pinned_period {
            actions.push(self.room_branch(exam, period, rng));
            return actions;
        }

        let mut periods: Vec<usize> = (0..instance.periods.len()).collect();
        periods.sort_by_key(|period| Reverse(self.assignment.remaining(*period)));
        {
            let tester = FeasibilityTester::new(&instance);
            periods.retain(|period| tester.feasible_period(&self.assignment, exam, *period));
        }
        for period in periods {
            let branch = self.room_branch(exam, period, rng);
            actions.push(branch);
        }

        if actions.is_empty() {
            debug!(
                "No feasible period for exam {}, branching to a random one",
                exam
            );
            let period = rng.gen_range(0..instance.periods.len());
            actions.push(self.room_branch(exam, period, rng));
        }

        actions
    }

    fn apply(&mut self, branch: &BranchDecision, _rng: &mut ChaCha8Rng) {
        self.place(branch.exam, branch.period, &branch.rooms);
    }

    /// DSatur-guided randomized rollout: place the remaining exams one by one into their
    /// least-conflicting feasible period (ties resolved towards spare capacity), with a
    /// random period as last resort, then score the completed booking.
    fn simulate(&self, rng: &mut ChaCha8Rng) -> Solution<Vec<Booking>> {
        let mut node = self.clone();
        let instance = node.instance.clone();

        while let Some(exam) = node.dsatur.next_exam(&instance) {
            let students = instance.exams[exam].size();
            let feasible_periods: Vec<usize> = {
                let tester = FeasibilityTester::new(&instance);
                (0..instance.periods.len())
                    .filter(|period| tester.feasible_period(&node.assignment, exam, *period))
                    .collect()
            };

            let period = if feasible_periods.is_empty() {
                rng.gen_range(0..instance.periods.len())
            } else {
                let mut best_period = feasible_periods[0];
                let mut best_score = f64::INFINITY;
                for period in feasible_periods {
                    let conflicts = (0..instance.exams.len())
                        .filter(|other| {
                            instance.clash(exam, *other) > 0
                                && node.assignment.period_of(*other) == Some(period)
                        })
                        .count();
                    let capacity_score = node.assignment.remaining(period) as f64
                        / std::cmp::max(1, students) as f64;
                    let score = conflicts as f64 - 0.1 * capacity_score;
                    if score < best_score {
                        best_score = score;
                        best_period = period;
                    }
                }
                best_period
            };

            let branch = node.room_branch(exam, period, rng);
            node.place(exam, period, &branch.rooms);
        }

        let bookings = node.assignment.bookings();
        let score = evaluate(&instance, &bookings);
        Solution {
            value: score.value(),
            data: bookings,
        }
    }

    /// Violations and penalties of the partial booking. Both components only grow as
    /// more exams are placed, so the pair is a valid lower bound for the subtree.
    fn bound(&mut self) -> SolutionValue {
        if let Some(bound) = self.cached_bound {
            return bound;
        }
        let score = evaluate(&self.instance, &self.assignment.bookings());
        let bound = score.value();
        self.cached_bound = Some(bound);
        bound
    }
}
