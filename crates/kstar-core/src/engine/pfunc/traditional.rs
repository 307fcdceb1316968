use super::{ENERGY_TOLERANCE, MAX_ATTEMPTS, PfuncState, PfuncStatus, settled_status};
use crate::core::boltzmann::{LogSum, ZBounds, ln_weight, log_sum_exp};
use crate::core::sequence::RcSet;
use crate::core::space::ConfSpace;
use crate::engine::config::EstimatorSettings;
use crate::engine::context::StateContext;
use crate::engine::pool::{MinimizationOutcome, MinimizationPool, MinimizationQueue};
use crate::engine::search::ConfAStar;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct PendingConf {
    conformation: Vec<usize>,
    lower_bound: f64,
    attempts: u8,
}

/// Partition function bound from minimizing conformations in A* order.
///
/// `Z_lo` is the sum of minimized weights. `Z_hi` adds the lower-bound weights of
/// conformations still being minimized and, for every conformation the search has not
/// returned yet, the weight of the search frontier's lowest bound.
pub struct TraditionalPfunc {
    space: Arc<ConfSpace>,
    search: ConfAStar,
    settings: EstimatorSettings,
    queue: MinimizationQueue<usize>,
    pending: HashMap<usize, PendingConf>,
    requeued: Vec<usize>,
    next_id: usize,
    num_enumerated: f64,
    minimized_sum: LogSum,
    pending_sum: LogSum,
    minimized: HashMap<Vec<usize>, f64>,
    state: PfuncState,
    stability: Option<f64>,
}

impl TraditionalPfunc {
    pub fn new(context: &StateContext, rcs: RcSet, settings: &EstimatorSettings) -> Self {
        let space = Arc::clone(context.space());
        let search = ConfAStar::new(Arc::clone(context.minimized_matrix()), rcs);
        let is_empty = search.peek_lower_bound().is_none();
        let mut pfunc = Self {
            queue: MinimizationQueue::new(Arc::clone(&space), Arc::clone(context.calculator())),
            space,
            search,
            settings: settings.clone(),
            pending: HashMap::new(),
            requeued: Vec::new(),
            next_id: 0,
            num_enumerated: 0.0,
            minimized_sum: LogSum::new(),
            pending_sum: LogSum::new(),
            minimized: HashMap::new(),
            state: PfuncState::unstarted(),
            stability: None,
        };
        if is_empty {
            pfunc.state.bounds = ZBounds::empty();
            pfunc.state.status = PfuncStatus::Converged;
        } else {
            pfunc.publish();
        }
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
        self.requeued = self.pending.keys().copied().collect();
        // Popped from the back, so the oldest conformation is resubmitted first.
        self.requeued.sort_unstable_by(|a, b| b.cmp(a));
    }

    fn fill(&mut self, pool: &MinimizationPool, parallelism: usize) {
        while self.queue.in_flight() < parallelism {
            if let Some(id) = self.requeued.pop() {
                if let Some(pending) = self.pending.get_mut(&id) {
                    pending.attempts = 1;
                    let conformation = pending.conformation.clone();
                    self.queue.submit(pool, id, conformation);
                }
                continue;
            }
            if self.budget_spent() || self.current_bounds().is_within(self.settings.epsilon) {
                break;
            }
            let Some(conf) = self.search.next() else {
                break;
            };
            self.num_enumerated += 1.0;
            self.state.num_scored += 1;
            self.pending_sum.add_ln(ln_weight(conf.score));

            let id = self.next_id;
            self.next_id += 1;
            self.pending.insert(
                id,
                PendingConf {
                    conformation: conf.assignment.clone(),
                    lower_bound: conf.score,
                    attempts: 1,
                },
            );
            self.queue.submit(pool, id, conf.assignment);
        }
    }

    fn budget_spent(&self) -> bool {
        self.settings
            .max_minimizations
            .is_some_and(|max| self.state.num_scored >= max)
    }

    fn merge(&mut self, pool: &MinimizationPool, outcome: MinimizationOutcome<usize>) {
        let id = outcome.tag;
        let Some(pending) = self.pending.get(&id) else {
            return;
        };
        match outcome.result {
            Ok(evaluation) => {
                let energy = evaluation.energy;
                assert!(
                    energy >= pending.lower_bound - ENERGY_TOLERANCE,
                    "minimized energy {energy} of {:?} in '{}' is below its lower bound {}",
                    outcome.conformation,
                    self.space.id(),
                    pending.lower_bound
                );
                let energy = energy.max(pending.lower_bound);
                let lower_bound = pending.lower_bound;
                self.pending.remove(&id);
                self.minimized_sum.add_ln(ln_weight(energy));
                self.pending_sum.sub_ln(ln_weight(lower_bound));
                if self.pending_sum.is_degraded() {
                    self.recompute_totals();
                }
                self.minimized.insert(outcome.conformation, energy);
                self.state.num_minimized += 1;
                self.state.cost += evaluation.cost;
            }
            Err(failure) if pending.attempts < MAX_ATTEMPTS => {
                warn!(space = %self.space.id(), error = %failure, "Minimization failed; retrying.");
                if let Some(pending) = self.pending.get_mut(&id) {
                    pending.attempts += 1;
                }
                self.queue.submit(pool, id, outcome.conformation);
            }
            Err(failure) => {
                warn!(
                    space = %self.space.id(),
                    error = %failure,
                    attempts = pending.attempts,
                    "Minimization failed repeatedly; abandoning this partition function."
                );
                self.state.status = PfuncStatus::Failed;
            }
        }
    }

    fn current_bounds(&self) -> ZBounds {
        let ln_lower = self.minimized_sum.ln_value();
        let remaining = self.search.num_conformations() - self.num_enumerated;
        let ln_tail = match self.search.peek_lower_bound() {
            Some(bound) if remaining > 0.0 => remaining.ln() + ln_weight(bound),
            _ => f64::NEG_INFINITY,
        };
        let ln_upper = log_sum_exp(log_sum_exp(ln_lower, self.pending_sum.ln_value()), ln_tail);
        ZBounds::new(ln_lower, ln_upper)
    }

    fn publish(&mut self) {
        let bounds = self.current_bounds();
        self.state.bounds.tighten(bounds);
    }

    fn recompute_totals(&mut self) {
        let minimized: Vec<f64> = self.minimized.values().map(|&e| ln_weight(e)).collect();
        let pending: Vec<f64> = self.pending.values().map(|p| ln_weight(p.lower_bound)).collect();
        self.minimized_sum = LogSum::from_ln_terms(&minimized);
        self.pending_sum = LogSum::from_ln_terms(&pending);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::energy::{EnergyBounds, TabulatedEnergies};
    use crate::core::space::Strand;
    use crate::core::space::tests::position;
    use crate::engine::context::tests::context_for;
    use crate::engine::pfunc::tests::{exact_ln_z, wide_design};

    fn space() -> ConfSpace {
        ConfSpace::new(
            "trad",
            vec![
                position("A", Strand::Protein, &[("ALA", "a0"), ("ALA", "a1"), ("ALA", "a2")]),
                position("B", Strand::Protein, &[("ALA", "b0"), ("ALA", "b1")]),
            ],
        )
        .unwrap()
    }

    fn energies() -> TabulatedEnergies {
        let mut e = TabulatedEnergies::new(0.3);
        e.set_single("A", "a0", EnergyBounds::new(-1.0, -2.0));
        e.set_single("A", "a1", EnergyBounds::new(0.0, -1.5));
        e.set_single("A", "a2", EnergyBounds::new(2.0, 1.0));
        e.set_single("B", "b1", EnergyBounds::new(0.5, 0.2));
        e.set_pair("A", "a1", "B", "b0", EnergyBounds::new(0.4, -0.6));
        e
    }

    fn settings(epsilon: f64) -> EstimatorSettings {
        EstimatorSettings {
            epsilon,
            confs_per_batch: 2,
            max_minimizations: None,
        }
    }

    #[test]
    fn converges_around_exact_value() {
        let space = space();
        let energies = energies();
        let exact = exact_ln_z(&space, &energies);
        let context = context_for(space, Arc::new(energies));
        let pool = MinimizationPool::new(2).unwrap();
        let mut pfunc = TraditionalPfunc::new(&context, context.space().all_rcs(), &settings(0.1));
        let mut previous = pfunc.state().bounds;
        while pfunc.refine(&pool).can_continue() {
            let bounds = pfunc.state().bounds;
            assert!(bounds.ln_lower >= previous.ln_lower && bounds.ln_upper <= previous.ln_upper);
            previous = bounds;
        }
        let state = pfunc.state();
        assert_eq!(state.status, PfuncStatus::Converged);
        assert!(state.bounds.ln_lower <= exact + 1e-9 && exact <= state.bounds.ln_upper + 1e-9);
        assert!(state.bounds.effective_epsilon() <= 0.1 + 1e-12);
    }

    #[test]
    fn full_enumeration_is_exact() {
        let space = space();
        let energies = energies();
        let exact = exact_ln_z(&space, &energies);
        let context = context_for(space, Arc::new(energies));
        let pool = MinimizationPool::new(1).unwrap();
        let mut pfunc = TraditionalPfunc::new(&context, context.space().all_rcs(), &settings(1e-12));
        while pfunc.refine(&pool).can_continue() {}
        let state = pfunc.state();
        assert_eq!(state.num_minimized, 6);
        assert!((state.bounds.ln_lower - exact).abs() < 1e-9);
        assert!((state.bounds.ln_upper - exact).abs() < 1e-9);
    }

    #[test]
    fn wide_energy_spread_converges_around_exact_z() {
        let (space, energies) = wide_design(7, 7, 3);
        let exact = exact_ln_z(&space, &energies);
        let context = context_for(space, Arc::new(energies));
        let pool = MinimizationPool::new(2).unwrap();
        let mut pfunc = TraditionalPfunc::new(&context, context.space().all_rcs(), &settings(0.1));
        while pfunc.refine(&pool).can_continue() {
            let bounds = pfunc.state().bounds;
            assert!(bounds.ln_lower <= exact + 1e-9 && exact <= bounds.ln_upper + 1e-9);
        }
        let state = pfunc.state();
        assert_eq!(state.status, PfuncStatus::Converged);
        assert!(state.num_minimized > 0);
        assert!(state.bounds.ln_lower.is_finite() && state.bounds.ln_upper.is_finite());
        assert!(state.bounds.ln_lower <= exact + 1e-9 && exact <= state.bounds.ln_upper + 1e-9);
    }

    #[test]
    fn budget_ends_in_exhausted() {
        let context = context_for(space(), Arc::new(energies()));
        let pool = MinimizationPool::new(1).unwrap();
        let settings = EstimatorSettings {
            epsilon: 1e-9,
            confs_per_batch: 1,
            max_minimizations: Some(1),
        };
        let mut pfunc = TraditionalPfunc::new(&context, context.space().all_rcs(), &settings);
        while pfunc.refine(&pool).can_continue() {}
        assert_eq!(pfunc.state().status, PfuncStatus::Exhausted);
        assert_eq!(pfunc.state().num_minimized, 1);
    }

    #[test]
    fn abandoned_conformations_are_resubmitted() {
        let context = context_for(space(), Arc::new(energies()));
        let pool = MinimizationPool::new(2).unwrap();
        let mut pfunc = TraditionalPfunc::new(&context, context.space().all_rcs(), &settings(1e-12));
        pfunc.fill(&pool, 2);
        assert_eq!(pfunc.pending.len(), 2);
        pfunc.abandon();
        while pfunc.refine(&pool).can_continue() {}
        assert_eq!(pfunc.state().status, PfuncStatus::Converged);
        assert_eq!(pfunc.state().num_minimized, 6);
    }
}
