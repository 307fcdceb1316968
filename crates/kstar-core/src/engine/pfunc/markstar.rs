use super::{ENERGY_TOLERANCE, MAX_ATTEMPTS, PfuncState, PfuncStatus, settled_status};
use crate::core::boltzmann::{LogSum, RT, ZBounds, ln_weight};
use crate::core::matrix::EnergyMatrix;
use crate::core::sequence::RcSet;
use crate::core::space::ConfSpace;
use crate::engine::config::EstimatorSettings;
use crate::engine::context::StateContext;
use crate::engine::pool::{MinimizationOutcome, MinimizationPool, MinimizationQueue};
use crate::engine::scoring::{BoundSide, NodeScorer};
use slotmap::{SlotMap, new_key_type};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

new_key_type! {
    struct BoundNodeKey;
}

/// A subtree of the conformation tree with bounds on the energy of each of its leaves.
#[derive(Debug, Clone)]
struct BoundNode {
    assignment: Vec<Option<usize>>,
    depth: usize,
    lower: f64,
    upper: f64,
    count: f64,
    serial: u64,
    attempts: u8,
    scored: bool,
}

impl BoundNode {
    /// `(ln Z_lo, ln Z_hi)` contribution to the partition function.
    #[inline]
    fn ln_contribution(&self) -> (f64, f64) {
        let ln_count = self.count.ln();
        (ln_count + ln_weight(self.upper), ln_count + ln_weight(self.lower))
    }

    /// Natural log of `count * (w(lower) - w(upper))`.
    fn ln_gap(&self) -> f64 {
        let spread = self.upper - self.lower;
        if spread <= 0.0 {
            return f64::NEG_INFINITY;
        }
        self.count.ln() + ln_weight(self.lower) + (-(-spread / RT).exp_m1()).ln()
    }

    fn conformation(&self) -> Vec<usize> {
        self.assignment.iter().flatten().copied().collect()
    }
}

#[derive(Debug)]
struct GapEntry {
    ln_gap: f64,
    serial: u64,
    key: BoundNodeKey,
}

impl PartialEq for GapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GapEntry {}

impl PartialOrd for GapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GapEntry {
    // Largest gap first; older nodes first among equal gaps.
    fn cmp(&self, other: &Self) -> Ordering {
        self.ln_gap
            .total_cmp(&other.ln_gap)
            .then_with(|| other.serial.cmp(&self.serial))
    }
}

/// MARK* bound on the partition function of one sequence.
///
/// The estimator keeps a bounding tree whose frontier covers every conformation exactly
/// once. Each frontier node contributes `count * w(upper)` to `Z_lo` and
/// `count * w(lower)` to `Z_hi`, with `lower` from the minimized matrix and `upper` from
/// the rigid matrix. Work always goes to the node with the largest contribution gap:
/// internal nodes are split into their children, leaves are minimized and then
/// contribute their exact weight to both sides.
pub struct MarkStarPfunc {
    space: Arc<ConfSpace>,
    minimized_matrix: Arc<EnergyMatrix>,
    rigid_matrix: Arc<EnergyMatrix>,
    rcs: RcSet,
    suffix_counts: Vec<f64>,
    settings: EstimatorSettings,
    nodes: SlotMap<BoundNodeKey, BoundNode>,
    frontier: BinaryHeap<GapEntry>,
    dispatched: HashSet<BoundNodeKey>,
    requeued: Vec<BoundNodeKey>,
    queue: MinimizationQueue<BoundNodeKey>,
    lower_sum: LogSum,
    upper_sum: LogSum,
    minimized: HashMap<Vec<usize>, f64>,
    next_serial: u64,
    state: PfuncState,
    stability: Option<f64>,
}

impl MarkStarPfunc {
    pub fn new(context: &StateContext, rcs: RcSet, settings: &EstimatorSettings) -> Self {
        let space = Arc::clone(context.space());
        let queue = MinimizationQueue::new(Arc::clone(&space), Arc::clone(context.calculator()));
        let mut pfunc = Self {
            space,
            minimized_matrix: Arc::clone(context.minimized_matrix()),
            rigid_matrix: Arc::clone(context.rigid_matrix()),
            suffix_counts: rcs.suffix_counts(),
            rcs,
            settings: settings.clone(),
            nodes: SlotMap::with_key(),
            frontier: BinaryHeap::new(),
            dispatched: HashSet::new(),
            requeued: Vec::new(),
            queue,
            lower_sum: LogSum::new(),
            upper_sum: LogSum::new(),
            minimized: HashMap::new(),
            next_serial: 0,
            state: PfuncState::unstarted(),
            stability: None,
        };

        if pfunc.rcs.has_empty_position() {
            pfunc.state.bounds = ZBounds::empty();
            pfunc.state.status = PfuncStatus::Converged;
            return pfunc;
        }

        let root = vec![None; pfunc.rcs.num_positions()];
        let lower = NodeScorer::new(&pfunc.minimized_matrix, &pfunc.rcs).score(&root, BoundSide::Lower);
        let upper = NodeScorer::new(&pfunc.rigid_matrix, &pfunc.rcs).score(&root, BoundSide::Upper);
        pfunc.insert_node(root, 0, lower, upper);
        pfunc.publish();
        pfunc
    }

    pub fn state(&self) -> &PfuncState {
        &self.state
    }

    pub fn set_stability_threshold(&mut self, ln_threshold: Option<f64>) {
        self.stability = ln_threshold;
    }

    pub fn minimized_energy(&self, conformation: &[usize]) -> Option<f64> {
        self.minimized.get(conformation).copied()
    }

    pub fn refine(&mut self, pool: &MinimizationPool) -> PfuncStatus {
        if !self.state.status.can_continue() {
            return self.state.status;
        }
        let parallelism = pool.parallelism().max(1);
        let mut merged = 0;
        loop {
            self.fill(pool, parallelism);
            if let Some(status) = self.check_settled() {
                return self.finish(status);
            }
            if self.queue.in_flight() == 0 {
                // Frontier empty or budget spent with nothing left running.
                self.recompute_totals();
                self.publish();
                let status = settled_status(&self.state.bounds, self.settings.epsilon, self.stability)
                    .unwrap_or(PfuncStatus::Exhausted);
                return self.finish(status);
            }
            let Some(outcome) = self.queue.wait() else {
                warn!(space = %self.space.id(), "Minimization results channel closed unexpectedly.");
                return self.finish(PfuncStatus::Failed);
            };
            self.merge(pool, outcome);
            if self.state.status == PfuncStatus::Failed {
                return self.finish(PfuncStatus::Failed);
            }
            merged += 1;
            if merged >= self.settings.confs_per_batch {
                break;
            }
        }
        match self.check_settled() {
            Some(status) => self.finish(status),
            None => self.state.status,
        }
    }

    pub fn abandon(&mut self) {
        self.queue.abandon();
        let mut keys: Vec<BoundNodeKey> = self.dispatched.drain().collect();
        // Popped from the back, so the oldest leaf is resubmitted first.
        keys.sort_by_key(|key| std::cmp::Reverse(self.nodes.get(*key).map(|n| n.serial)));
        for key in &keys {
            if let Some(node) = self.nodes.get_mut(*key) {
                node.attempts = 0;
            }
        }
        self.requeued.extend(keys);
    }

    fn fill(&mut self, pool: &MinimizationPool, parallelism: usize) {
        while self.queue.in_flight() < parallelism {
            // Abandoned leaves were already scored, so the budget does not hold them back.
            if let Some(key) = self.requeued.pop() {
                self.dispatch(pool, key);
                continue;
            }
            if self.budget_spent() || self.current_bounds().is_within(self.settings.epsilon) {
                break;
            }
            let Some(entry) = self.frontier.pop() else {
                break;
            };
            let Some(node) = self.nodes.get(entry.key) else {
                continue;
            };
            if node.depth == self.rcs.num_positions() {
                self.dispatch(pool, entry.key);
            } else {
                self.expand(entry.key);
            }
        }
    }

    fn budget_spent(&self) -> bool {
        self.settings
            .max_minimizations
            .is_some_and(|max| self.state.num_scored >= max)
    }

    fn insert_node(&mut self, assignment: Vec<Option<usize>>, depth: usize, lower: f64, upper: f64) {
        assert!(
            upper >= lower - ENERGY_TOLERANCE,
            "energy bounds crossed in '{}' at depth {depth}: lower {lower} > upper {upper}",
            self.space.id()
        );
        let serial = self.next_serial;
        self.next_serial += 1;
        let node = BoundNode {
            assignment,
            depth,
            lower,
            upper: upper.max(lower),
            count: self.suffix_counts[depth],
            serial,
            attempts: 0,
            scored: false,
        };
        let (lo, hi) = node.ln_contribution();
        self.lower_sum.add_ln(lo);
        self.upper_sum.add_ln(hi);
        let ln_gap = node.ln_gap();
        let key = self.nodes.insert(node);
        self.frontier.push(GapEntry { ln_gap, serial, key });
    }

    fn expand(&mut self, key: BoundNodeKey) {
        let Some(node) = self.nodes.remove(key) else {
            return;
        };

        let pos = node.depth;
        let children: Vec<(Vec<Option<usize>>, f64, f64)> = {
            let lower_scorer = NodeScorer::new(&self.minimized_matrix, &self.rcs);
            let upper_scorer = NodeScorer::new(&self.rigid_matrix, &self.rcs);
            self.rcs
                .get(pos)
                .iter()
                .map(|&rc| {
                    let mut assignment = node.assignment.clone();
                    assignment[pos] = Some(rc);
                    let lower = lower_scorer
                        .score(&assignment, BoundSide::Lower)
                        .max(node.lower);
                    let upper = upper_scorer
                        .score(&assignment, BoundSide::Upper)
                        .min(node.upper);
                    (assignment, lower, upper)
                })
                .collect()
        };
        for (assignment, lower, upper) in children {
            self.insert_node(assignment, pos + 1, lower, upper);
        }
        // Children go in before the parent comes out so no total dips below its true value.
        let (lo, hi) = node.ln_contribution();
        self.lower_sum.sub_ln(lo);
        self.upper_sum.sub_ln(hi);
        self.resum_if_degraded();
    }

    fn dispatch(&mut self, pool: &MinimizationPool, key: BoundNodeKey) {
        let Some(node) = self.nodes.get_mut(key) else {
            return;
        };
        node.attempts += 1;
        if !node.scored {
            node.scored = true;
            self.state.num_scored += 1;
        }
        let conformation = node.conformation();
        self.dispatched.insert(key);
        self.queue.submit(pool, key, conformation);
    }

    fn merge(&mut self, pool: &MinimizationPool, outcome: MinimizationOutcome<BoundNodeKey>) {
        let key = outcome.tag;
        self.dispatched.remove(&key);
        let Some(node) = self.nodes.get(key) else {
            return;
        };

        match outcome.result {
            Ok(evaluation) => {
                let energy = evaluation.energy;
                assert!(
                    energy >= node.lower - ENERGY_TOLERANCE && energy <= node.upper + ENERGY_TOLERANCE,
                    "minimized energy {energy} of {:?} in '{}' lies outside its bounds [{}, {}]",
                    outcome.conformation,
                    self.space.id(),
                    node.lower,
                    node.upper
                );
                let energy = energy.clamp(node.lower, node.upper);
                let (lo, hi) = node.ln_contribution();
                self.nodes.remove(key);
                self.lower_sum.add_ln(ln_weight(energy));
                self.upper_sum.add_ln(ln_weight(energy));
                self.lower_sum.sub_ln(lo);
                self.upper_sum.sub_ln(hi);
                self.resum_if_degraded();
                self.minimized.insert(outcome.conformation, energy);
                self.state.num_minimized += 1;
                self.state.cost += evaluation.cost;
            }
            Err(failure) if node.attempts < MAX_ATTEMPTS => {
                warn!(space = %self.space.id(), error = %failure, "Minimization failed; retrying.");
                self.dispatch(pool, key);
            }
            Err(failure) => {
                warn!(
                    space = %self.space.id(),
                    error = %failure,
                    attempts = node.attempts,
                    "Minimization failed repeatedly; abandoning this partition function."
                );
                self.state.status = PfuncStatus::Failed;
            }
        }
    }

    fn current_bounds(&self) -> ZBounds {
        ZBounds::new(self.lower_sum.ln_value(), self.upper_sum.ln_value())
    }

    fn publish(&mut self) {
        let bounds = self.current_bounds();
        self.state.bounds.tighten(bounds);
    }

    fn resum_if_degraded(&mut self) {
        if self.lower_sum.is_degraded() || self.upper_sum.is_degraded() {
            self.recompute_totals();
        }
    }

    /// Resums every contribution smallest first, discarding accumulated drift.
    fn recompute_totals(&mut self) {
        let mut lower = Vec::with_capacity(self.nodes.len() + self.minimized.len());
        let mut upper = Vec::with_capacity(lower.capacity());
        for node in self.nodes.values() {
            let (lo, hi) = node.ln_contribution();
            lower.push(lo);
            upper.push(hi);
        }
        for &energy in self.minimized.values() {
            lower.push(ln_weight(energy));
            upper.push(ln_weight(energy));
        }
        self.lower_sum = LogSum::from_ln_terms(&lower);
        self.upper_sum = LogSum::from_ln_terms(&upper);
    }

    fn check_settled(&mut self) -> Option<PfuncStatus> {
        let running = self.current_bounds();
        if settled_status(&running, self.settings.epsilon, self.stability).is_some() {
            self.recompute_totals();
        }
        self.publish();
        settled_status(&self.state.bounds, self.settings.epsilon, self.stability)
    }

    fn finish(&mut self, status: PfuncStatus) -> PfuncStatus {
        self.state.status = status;
        if !status.can_continue() {
            self.queue.abandon();
            self.dispatched.clear();
            self.requeued.clear();
            debug!(
                space = %self.space.id(),
                status = %status,
                bounds = %self.state.bounds,
                minimized = self.state.num_minimized,
                "Partition function estimate finished."
            );
        }
        status
    }
}
