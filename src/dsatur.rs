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

//! Degree-of-saturation bookkeeping for the next-exam heuristic: exams are vertices of the
//! clash graph, periods are colors. The next exam to schedule is the unassigned exam whose
//! clashing neighbors already occupy the most distinct periods.

use crate::instance::Instance;

/// Per-node scratch state for DSatur-ordered exam selection
#[derive(Debug, Clone)]
pub struct DsaturState {
    unassigned: Vec<bool>,
    num_unassigned: usize,
    /// Number of distinct periods used by clashing neighbors, per exam
    sat_degree: Vec<u32>,
    /// Which periods are used by clashing neighbors, per exam
    adj_periods: Vec<Vec<bool>>,
}

impl DsaturState {
    pub fn new(instance: &Instance) -> DsaturState {
        let num_exams = instance.exams.len();
        DsaturState {
            unassigned: vec![true; num_exams],
            num_unassigned: num_exams,
            sat_degree: vec![0; num_exams],
            adj_periods: vec![vec![false; instance.periods.len()]; num_exams],
        }
    }

    /// The next exam to schedule: maximum saturation degree, ties broken by the number of
    /// clashing neighbors still unassigned (highest wins), further ties by smallest exam
    /// id. Returns None when every exam is assigned.
    pub fn next_exam(&self, instance: &Instance) -> Option<usize> {
        let mut max_saturation = -1i64;
        let mut max_conflicts = -1i64;
        let mut selected = None;

        for exam in 0..instance.exams.len() {
            if !self.unassigned[exam] {
                continue;
            }
            let saturation = self.sat_degree[exam] as i64;
            if saturation > max_saturation {
                max_saturation = saturation;
                max_conflicts = -1;
                selected = Some(exam);
            }
            if saturation == max_saturation {
                let conflicts = (0..instance.exams.len())
                    .filter(|other| {
                        *other != exam
                            && self.unassigned[*other]
                            && instance.clash(exam, *other) > 0
                    })
                    .count() as i64;
                if conflicts > max_conflicts {
                    max_conflicts = conflicts;
                    selected = Some(exam);
                }
            }
        }

        selected
    }

    /// Mark an exam as placed into a period and raise the saturation of its still
    /// unassigned neighbors in the clash graph.
    pub fn record(&mut self, instance: &Instance, exam: usize, period: usize) {
        assert!(self.unassigned[exam], "Exam {} is already assigned", exam);
        self.unassigned[exam] = false;
        self.num_unassigned -= 1;

        for other in 0..instance.exams.len() {
            if self.unassigned[other]
                && instance.clash(exam, other) > 0
                && !self.adj_periods[other][period]
            {
                self.adj_periods[other][period] = true;
                self.sat_degree[other] += 1;
            }
        }
    }

    pub fn saturation(&self, exam: usize) -> u32 {
        self.sat_degree[exam]
    }

    pub fn is_unassigned(&self, exam: usize) -> bool {
        self.unassigned[exam]
    }

    pub fn num_unassigned(&self) -> usize {
        self.num_unassigned
    }
}
