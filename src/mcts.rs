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

//! This module provides a generic implementation of an anytime Monte-Carlo tree search for
//! minimization problems.
//!
//! The search tree is an arena of nodes addressed by index: children are a `Vec` of
//! indices, the parent an `Option` of one, and deleted subtrees go to a free list. Each
//! iteration selects a leaf by a UCB-like score, expands up to `expansion_limit` children
//! by applying one branch each to a copy of the node's state, completes every new child
//! with a randomized rollout and backpropagates the result along the stored root path.
//! The best solution seen so far (the incumbent) is kept in a solution pool together with
//! the statistics that normalize the selection score.
//!
//! Solution values are two-tier: the hard violation count strictly dominates, the soft
//! penalty decides between solutions of equal hard count. A solution with hard count zero
//! is feasible and therefore precedes every infeasible one in the ordering.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time;

use log::{debug, info};
use num_traits::Bounded;
use ordered_float::NotNan;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::util::max_elems_by_key;

/// The two-tier objective value of a (complete) booking: number of hard violations first,
/// soft penalty second. The derived lexicographic order makes every feasible value
/// (hard == 0) compare less than every infeasible one, and ranks infeasible values by
/// their degree of infeasibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SolutionValue {
    hard: u32,
    soft: u64,
}

impl SolutionValue {
    pub fn new(hard: u32, soft: u64) -> SolutionValue {
        SolutionValue { hard, soft }
    }

    pub fn hard(&self) -> u32 {
        self.hard
    }

    pub fn soft(&self) -> u64 {
        self.soft
    }

    pub fn is_feasible(&self) -> bool {
        self.hard == 0
    }
}

impl Bounded for SolutionValue {
    fn min_value() -> SolutionValue {
        SolutionValue::new(0, 0)
    }

    fn max_value() -> SolutionValue {
        SolutionValue::new(u32::MAX, u64::MAX)
    }
}

impl fmt::Display for SolutionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_feasible() {
            write!(f, "feasible(soft={})", self.soft)
        } else {
            write!(f, "infeasible(hard={}, soft={})", self.hard, self.soft)
        }
    }
}

/// A scored solution with its attached solution data (e.g. the complete booking list).
/// Solutions are shared between tree nodes and the pool via `Rc`; the search is strictly
/// single-threaded.
#[derive(Debug)]
pub struct Solution<D> {
    pub value: SolutionValue,
    pub data: D,
}

/// Keeps track of the best and worst feasible and infeasible solutions seen so far, the
/// best overall solution and the trail of incumbent values. The counts and extremes feed
/// the normalized exploitation term of the selection score.
pub struct SolutionPool<D> {
    best: Option<Rc<Solution<D>>>,
    incumbents: Vec<SolutionValue>,
    feas_count: u64,
    infeas_count: u64,
    feas_best: Option<SolutionValue>,
    feas_worst: Option<SolutionValue>,
    infeas_best: Option<SolutionValue>,
    infeas_worst: Option<SolutionValue>,
}

impl<D> SolutionPool<D> {
    fn new() -> SolutionPool<D> {
        SolutionPool {
            best: None,
            incumbents: Vec::new(),
            feas_count: 0,
            infeas_count: 0,
            feas_best: None,
            feas_worst: None,
            infeas_best: None,
            infeas_worst: None,
        }
    }

    /// Account for a new simulation result. Returns true iff the solution improves the
    /// incumbent.
    fn update(&mut self, sol: &Rc<Solution<D>>) -> bool {
        let value = sol.value;
        if value.is_feasible() {
            self.feas_count += 1;
            if self.feas_best.map_or(true, |best| value < best) {
                debug!("New best feasible solution: {}", value);
                self.feas_best = Some(value);
            }
            if self.feas_worst.map_or(true, |worst| value > worst) {
                self.feas_worst = Some(value);
            }
        } else {
            self.infeas_count += 1;
            if self.infeas_best.map_or(true, |best| value < best) {
                debug!("New best infeasible solution: {}", value);
                self.infeas_best = Some(value);
            }
            if self.infeas_worst.map_or(true, |worst| value > worst) {
                self.infeas_worst = Some(value);
            }
        }
        let improved = self
            .best
            .as_ref()
            .map_or(true, |best| value < best.value);
        if improved {
            info!(
                "New best solution: {} -> {}",
                match &self.best {
                    Some(best) => best.value.to_string(),
                    None => "none".to_string(),
                },
                value
            );
            self.best = Some(sol.clone());
            self.incumbents.push(value);
        }
        improved
    }

    pub fn best(&self) -> Option<&Rc<Solution<D>>> {
        self.best.as_ref()
    }

    fn best_value(&self) -> Option<SolutionValue> {
        self.best.as_ref().map(|best| best.value)
    }
}

impl<D> fmt::Display for SolutionPool<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.feas_count + self.infeas_count;
        let feas_pct = if total == 0 {
            0.0
        } else {
            self.feas_count as f64 / total as f64 * 100.0
        };
        write!(
            f,
            "feas_pct={:.0}, best={}",
            feas_pct,
            match &self.best {
                Some(best) => best.value.to_string(),
                None => "none".to_string(),
            }
        )
    }
}

/// Interface of the domain-specific state attached to every tree node. The engine is
/// generic over this trait; implementations provide branch enumeration, branch
/// application and the randomized rollout.
pub trait SearchNode: Clone {
    /// A single decision descending one level in the tree
    type Branch;
    /// Solution data attached to rollout results
    type Data;

    /// Produce the ordered collection of branches available from this node, most
    /// promising first. Called once per node; the engine consumes the result lazily, one
    /// branch per expansion step.
    fn branches(&mut self, rng: &mut ChaCha8Rng) -> Vec<Self::Branch>;

    /// Mutate the state by applying a branch. The engine calls this on a fresh copy of
    /// the parent node's state.
    fn apply(&mut self, branch: &Self::Branch, rng: &mut ChaCha8Rng);

    /// Complete the node's partial state with a randomized rollout and score the result
    fn simulate(&self, rng: &mut ChaCha8Rng) -> Solution<Self::Data>;

    /// Lower bound on the values reachable in this subtree, for branch-and-bound style
    /// pruning. The default makes pruning a no-op.
    fn bound(&mut self) -> SolutionValue {
        SolutionValue::min_value()
    }
}

/// Search limits and tuning knobs of the anytime loop
pub struct SearchLimits {
    /// Wall clock budget; None runs until another limit strikes
    pub time_limit: Option<time::Duration>,
    /// Maximum number of iterations
    pub iter_limit: Option<u64>,
    /// Discard children whose lower bound cannot beat the incumbent and sweep the tree
    /// after every incumbent improvement
    pub pruning: bool,
    /// Return as soon as a feasible solution is found instead of improving its soft
    /// penalty further
    pub stop_on_feasible: bool,
    /// Maximum number of children created per iteration
    pub expansion_limit: usize,
    /// Interval, in iterations, between progress log lines
    pub log_iter_interval: u64,
    /// Cooperative cancellation flag, checked at the top of every iteration
    pub interrupt: Option<Arc<AtomicBool>>,
}

impl Default for SearchLimits {
    fn default() -> SearchLimits {
        SearchLimits {
            time_limit: None,
            iter_limit: None,
            pruning: true,
            stop_on_feasible: false,
            expansion_limit: 1,
            log_iter_interval: 1000,
            interrupt: None,
        }
    }
}

/// Why the anytime loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A feasible solution was found and `stop_on_feasible` was set
    FeasibleFound,
    /// Every node of the tree has been expanded and evaluated
    TreeExhausted,
    /// The time or iteration budget ran out
    BudgetExhausted,
    /// The cooperative interrupt flag was raised
    Interrupted,
}

/// A struct to collect statistics about the tree search execution.
#[derive(Default)]
pub struct Statistics {
    /// Number of iterations of the anytime loop
    pub iterations: u64,
    /// Number of rollouts (one per created node, plus one for the root)
    pub simulations: u64,
    /// Number of rollouts that ended in a feasible solution
    pub num_feasible: u64,
    /// Number of rollouts that ended in an infeasible solution
    pub num_infeasible: u64,
    /// Number of times the incumbent has been improved
    pub num_new_best: u64,
    /// Number of children discarded at expansion because of their bound
    pub num_bound_branches: u64,
    /// Number of nodes removed by pruning sweeps
    pub num_pruned_nodes: u64,
    /// Total time of the search
    pub total_time: time::Duration,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Search statistics:
Iterations:            {: >6}
Simulations:           {: >6}
    ... feasible:      {: >6}
    ... infeasible:    {: >6}
         ... new best: {: >6}
Bound branches:        {: >6}
Pruned nodes:          {: >6}

Total time: {:.3}s\n",
            self.iterations,
            self.simulations,
            self.num_feasible,
            self.num_infeasible,
            self.num_new_best,
            self.num_bound_branches,
            self.num_pruned_nodes,
            self.total_time.as_millis() as f32 / 1000f32,
        )
    }
}

/// Result of a tree search run
pub struct SearchOutcome<D> {
    /// The best solution observed, if any rollout ran at all
    pub best: Option<Rc<Solution<D>>>,
    /// The values of all incumbents in order of discovery
    pub incumbents: Vec<SolutionValue>,
    pub statistics: Statistics,
    pub termination: Termination,
}

/// Main function of this module: run the Monte-Carlo tree search from the given root
/// state until a limit strikes, and return the best solution observed together with the
/// incumbent trail and statistics.
pub fn run<N: SearchNode>(
    root: N,
    limits: &SearchLimits,
    rng: &mut ChaCha8Rng,
) -> SearchOutcome<N::Data> {
    info!(
        "Pruning is {}.",
        if limits.pruning { "enabled" } else { "disabled" }
    );
    let tic = time::Instant::now();
    let mut statistics = Statistics::default();
    let mut pool = SolutionPool::new();
    let mut tree = Tree::new(root);

    // Initial rollout from the root, so every node of the tree carries a solution
    let sol = Rc::new(tree.slot(tree.root).node.simulate(rng));
    record_simulation(&mut statistics, &sol);
    tree.backpropagate(tree.root, &sol);
    if pool.update(&sol) {
        statistics.num_new_best += 1;
    }

    let termination = loop {
        if let Some(interrupt) = &limits.interrupt {
            if interrupt.load(Ordering::Relaxed) {
                info!("Search interrupted.");
                break Termination::Interrupted;
            }
        }
        let elapsed = tic.elapsed();
        if limits.time_limit.map_or(false, |limit| elapsed >= limit) {
            break Termination::BudgetExhausted;
        }
        if limits
            .iter_limit
            .map_or(false, |limit| statistics.iterations >= limit)
        {
            break Termination::BudgetExhausted;
        }
        if limits.stop_on_feasible
            && pool.best_value().map_or(false, |value| value.is_feasible())
        {
            info!("Search complete, solution is feasible.");
            break Termination::FeasibleFound;
        }
        if statistics.iterations % limits.log_iter_interval == 0 {
            info!(
                "[i={:<5} t={:3.02}] {}",
                statistics.iterations,
                elapsed.as_secs_f64(),
                pool
            );
        }

        let node = match tree.select(&pool, rng) {
            Some(node) => node,
            None => {
                info!("Search complete, tree is exhausted.");
                break Termination::TreeExhausted;
            }
        };

        let new_children = tree.expand(node, limits, &pool, &mut statistics, rng);
        if new_children.is_empty() && tree.is_exhausted(node) {
            tree.delete(node);
        } else {
            let incumbent_before = pool.best_value();
            for child in new_children {
                let sol = Rc::new(tree.slot(child).node.simulate(rng));
                record_simulation(&mut statistics, &sol);
                tree.backpropagate(child, &sol);
                if pool.update(&sol) {
                    statistics.num_new_best += 1;
                }
            }
            if limits.pruning && pool.best_value() < incumbent_before {
                let size_before = tree.size();
                tree.prune(pool.best_value().unwrap(), &mut statistics);
                debug!(
                    "Pruning removed {} nodes ({} => {})",
                    size_before - tree.size(),
                    size_before,
                    tree.size()
                );
            }
        }
        statistics.iterations += 1;
    };

    statistics.total_time = tic.elapsed();
    info!(
        "Finished at iteration {} ({:.02}s): {}",
        statistics.iterations,
        statistics.total_time.as_secs_f64(),
        pool
    );
    SearchOutcome {
        best: pool.best.clone(),
        incumbents: pool.incumbents,
        statistics,
        termination,
    }
}

fn record_simulation<D>(statistics: &mut Statistics, sol: &Rc<Solution<D>>) {
    statistics.simulations += 1;
    if sol.value.is_feasible() {
        statistics.num_feasible += 1;
    } else {
        statistics.num_infeasible += 1;
    }
}

type NodeId = usize;

/// Lazy cursor over a node's branch list
struct Expansion<B> {
    branches: Vec<B>,
    next: usize,
}

impl<B> Expansion<B> {
    fn is_finished(&self) -> bool {
        self.next >= self.branches.len()
    }
}

/// One arena entry of the search tree
struct Slot<N: SearchNode> {
    node: N,
    parent: Option<NodeId>,
    /// Ancestors from the root down to, but excluding, this node
    path: Vec<NodeId>,
    children: Vec<NodeId>,
    visits: u64,
    /// Solution of this node's own rollout
    sim_sol: Option<Rc<Solution<N::Data>>>,
    /// Best solution of all rollouts in this subtree
    sim_best: Option<Rc<Solution<N::Data>>>,
    /// None until the first expansion step computed the branch list
    expansion: Option<Expansion<N::Branch>>,
}

/// The arena-allocated search tree
struct Tree<N: SearchNode> {
    slots: Vec<Option<Slot<N>>>,
    free: Vec<NodeId>,
    root: NodeId,
}

impl<N: SearchNode> Tree<N> {
    fn new(root: N) -> Tree<N> {
        Tree {
            slots: vec![Some(Slot {
                node: root,
                parent: None,
                path: Vec::new(),
                children: Vec::new(),
                visits: 0,
                sim_sol: None,
                sim_best: None,
                expansion: None,
            })],
            free: Vec::new(),
            root: 0,
        }
    }

    fn slot(&self, id: NodeId) -> &Slot<N> {
        self.slots[id].as_ref().expect("Access to deleted tree node")
    }

    fn slot_mut(&mut self, id: NodeId) -> &mut Slot<N> {
        self.slots[id].as_mut().expect("Access to deleted tree node")
    }

    fn insert(&mut self, slot: Slot<N>) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(slot);
                id
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        }
    }

    /// Number of live nodes
    fn size(&self) -> u64 {
        self.slots.iter().filter(|slot| slot.is_some()).count() as u64
    }

    /// True iff the node is fully expanded and all its children have been removed
    fn is_exhausted(&self, id: NodeId) -> bool {
        let slot = self.slot(id);
        slot.expansion
            .as_ref()
            .map_or(false, |expansion| expansion.is_finished())
            && slot.children.is_empty()
    }

    /// Pick the most favorable node for the next expansion step.
    ///
    /// Descends from the root, at each level moving to the child with the best selection
    /// score. While a node is still expanding, the node itself competes with its children
    /// ("expand me"), so the search can deepen without fully expanding all ancestors.
    /// Ties are resolved by a uniform random choice.
    fn select<D>(&self, pool: &SolutionPool<D>, rng: &mut ChaCha8Rng) -> Option<NodeId> {
        if self.is_exhausted(self.root) {
            return None;
        }
        let mut current = self.root;
        loop {
            let slot = self.slot(current);
            let expansion = match &slot.expansion {
                None => return Some(current),
                Some(expansion) => expansion,
            };
            let mut candidates = slot.children.clone();
            if !expansion.is_finished() {
                candidates.push(current);
            }
            let best = max_elems_by_key(candidates, |id| self.selection_score(pool, *id));
            let next = if best.len() == 1 {
                best[0]
            } else {
                best[rng.gen_range(0..best.len())]
            };
            if next == current {
                return Some(current);
            }
            current = next;
        }
    }

    /// Selection score using an UCT formula adapted to the optimization context: the
    /// exploitation term normalizes the node's best value within the pool of feasible
    /// (resp. infeasible) solutions seen so far, an exploration term rewards rarely
    /// visited nodes and a small regularizer favors shallow nodes.
    fn selection_score<D>(&self, pool: &SolutionPool<D>, id: NodeId) -> NotNan<f64> {
        let slot = self.slot(id);
        if slot.visits == 0 {
            return NotNan::new(f64::INFINITY).unwrap();
        }
        let value = slot
            .sim_best
            .as_ref()
            .expect("Visited node without simulation result")
            .value;
        let (z_node, z_best, z_worst, min_exploit, max_exploit) = if value.is_feasible() {
            (
                value.soft() as f64,
                pool.feas_best.unwrap().soft() as f64,
                pool.feas_worst.unwrap().soft() as f64,
                pool.infeas_count as f64 / (pool.feas_count + pool.infeas_count) as f64,
                1.0,
            )
        } else {
            (
                value.hard() as f64,
                pool.infeas_best.unwrap().hard() as f64,
                pool.infeas_worst.unwrap().hard() as f64,
                0.0,
                pool.infeas_count as f64 / (1 + pool.feas_count + pool.infeas_count) as f64,
            )
        };
        let raw_exploit = if z_best == z_worst {
            0.0
        } else {
            (z_worst - z_node) / (z_worst - z_best)
        };
        let exploit = min_exploit + raw_exploit * (max_exploit - min_exploit);
        let explore = match slot.parent {
            None => f64::INFINITY,
            Some(parent) => {
                (2.0 * (self.slot(parent).visits as f64).ln() / slot.visits as f64).sqrt()
            }
        };
        let expand = 1.0 / (1.0 + slot.path.len() as f64);
        NotNan::new(exploit + explore + expand).expect("Selection score is NaN")
    }

    /// Generate and link up to `expansion_limit` children of this node. Children whose
    /// lower bound cannot beat the incumbent are discarded when pruning is enabled.
    fn expand<D>(
        &mut self,
        id: NodeId,
        limits: &SearchLimits,
        pool: &SolutionPool<D>,
        statistics: &mut Statistics,
        rng: &mut ChaCha8Rng,
    ) -> Vec<NodeId> {
        if self.slot(id).expansion.is_none() {
            let slot = self.slot_mut(id);
            let branches = slot.node.branches(rng);
            slot.expansion = Some(Expansion { branches, next: 0 });
        }

        let cutoff = pool.best_value();
        let mut new_children = Vec::new();
        while new_children.len() < limits.expansion_limit {
            let mut child_node = {
                let slot = self.slot_mut(id);
                let expansion = slot.expansion.as_mut().unwrap();
                if expansion.is_finished() {
                    break;
                }
                let branch_index = expansion.next;
                expansion.next += 1;
                let mut child = slot.node.clone();
                child.apply(&expansion.branches[branch_index], rng);
                child
            };
            if limits.pruning {
                if let Some(cutoff) = cutoff {
                    if child_node.bound() >= cutoff {
                        statistics.num_bound_branches += 1;
                        continue;
                    }
                }
            }
            let mut path = self.slot(id).path.clone();
            path.push(id);
            let child_id = self.insert(Slot {
                node: child_node,
                parent: Some(id),
                path,
                children: Vec::new(),
                visits: 0,
                sim_sol: None,
                sim_best: None,
                expansion: None,
            });
            self.slot_mut(id).children.push(child_id);
            new_children.push(child_id);
        }
        new_children
    }

    /// Integrate a rollout result into the node and all its ancestors
    fn backpropagate(&mut self, id: NodeId, sol: &Rc<Solution<N::Data>>) {
        let path = {
            let slot = self.slot_mut(id);
            assert_eq!(slot.visits, 0, "Node has already been simulated");
            slot.visits = 1;
            slot.sim_sol = Some(sol.clone());
            slot.sim_best = Some(sol.clone());
            slot.path.clone()
        };
        for ancestor in path {
            let slot = self.slot_mut(ancestor);
            slot.visits += 1;
            if slot
                .sim_best
                .as_ref()
                .map_or(true, |best| best.value > sol.value)
            {
                slot.sim_best = Some(sol.clone());
            }
        }
    }

    /// Remove a leaf or an entire subtree from the tree, patching the ancestors'
    /// `sim_best` in bottom-up order and propagating the deletion to parents that become
    /// exhausted. The root itself is never freed; its exhaustion is detected by
    /// `select()`.
    fn delete(&mut self, id: NodeId) {
        let mut id = id;
        loop {
            if id == self.root {
                break;
            }
            let (path, parent) = {
                let slot = self.slot(id);
                (slot.path.clone(), slot.parent)
            };
            if let Some(parent) = parent {
                self.slot_mut(parent).children.retain(|child| *child != id);
            }
            let deleted_best = self.slot(id).sim_best.clone();
            for ancestor in path.iter().rev() {
                let needs_patching = match (&self.slot(*ancestor).sim_best, &deleted_best) {
                    (Some(ancestor_best), Some(deleted_best)) => {
                        Rc::ptr_eq(ancestor_best, deleted_best)
                    }
                    _ => false,
                };
                if !needs_patching {
                    break;
                }
                // New sim_best is the best of the children's sim_best or the own rollout
                let mut best = self.slot(*ancestor).sim_sol.clone().unwrap();
                for child in self.slot(*ancestor).children.clone() {
                    let child_best = self.slot(child).sim_best.clone().unwrap();
                    if child_best.value < best.value {
                        best = child_best;
                    }
                }
                self.slot_mut(*ancestor).sim_best = Some(best);
            }
            self.free_subtree(id);
            match parent {
                Some(parent) if self.is_exhausted(parent) => id = parent,
                _ => break,
            }
        }
    }

    /// Return all slots of a subtree to the free list
    fn free_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let children = self.slot(current).children.clone();
            stack.extend(children);
            self.slots[current] = None;
            self.free.push(current);
        }
    }

    /// Sweep the tree and detach every subtree whose lower bound cannot beat the cutoff
    fn prune(&mut self, cutoff: SolutionValue, statistics: &mut Statistics) {
        let mut stack = self.slot(self.root).children.clone();
        while let Some(id) = stack.pop() {
            if self.slots[id].is_none() {
                // Already removed while deleting an exhausted relative
                continue;
            }
            if self.slot_mut(id).node.bound() >= cutoff {
                statistics.num_pruned_nodes += self.subtree_size(id);
                self.delete(id);
            } else {
                let slot = self.slot(id);
                if slot
                    .expansion
                    .as_ref()
                    .map_or(false, |expansion| expansion.is_finished())
                {
                    stack.extend(slot.children.iter().copied());
                }
            }
        }
    }

    fn subtree_size(&self, id: NodeId) -> u64 {
        let mut stack = vec![id];
        let mut count = 0;
        while let Some(current) = stack.pop() {
            count += 1;
            stack.extend(self.slot(current).children.iter().copied());
        }
        count
    }
}
