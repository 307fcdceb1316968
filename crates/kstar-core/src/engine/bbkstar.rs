use super::config::{BbkStarConfig, ConfigError, TieBreak};
use super::context::StateContexts;
use super::error::EngineError;
use super::kstar::KStarBound;
use super::pfunc::{PfuncEstimator, PfuncState, PfuncStatus};
use super::pool::MinimizationPool;
use super::progress::{Progress, ProgressReporter};
use super::sequence_bounds::SequenceBounds;
use super::state::{ScoredSequence, SequenceSnapshot, SequenceStatus};
use crate::core::boltzmann::RT;
use crate::core::sequence::{PartialSequence, Sequence, count_sequences};
use crate::core::space::{DesignSpace, StateKind};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::f64::consts::LN_10;
use tracing::{debug, info, instrument, warn};

/// Indices into the driver's estimator arena, one per state.
#[derive(Debug, Clone, Copy)]
struct StateEstimators {
    protein: usize,
    ligand: usize,
    complex: usize,
}

impl StateEstimators {
    fn in_refinement_order(&self) -> [usize; 3] {
        [self.protein, self.ligand, self.complex]
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    sequence: Sequence,
    protein_sequence: Sequence,
    ligand_sequence: Sequence,
    /// Creation order across sequences and groups, used for tie-breaks.
    serial: usize,
    /// Upper bound on `ln K*` inherited from the sequence tree.
    ln_bound: f64,
    /// The tree bounds alone put an unbound state below its stability threshold.
    below_threshold: bool,
    estimators: Option<StateEstimators>,
    status: SequenceStatus,
    kstar: KStarBound,
}

/// An unexpanded inner node of the sequence tree: every sequence extending `sequence`.
#[derive(Debug, Clone)]
struct SequenceGroup {
    sequence: PartialSequence,
    serial: usize,
    /// Upper bound on `ln K*` of every sequence in the group.
    ln_upper: f64,
}

impl SequenceGroup {
    fn kstar(&self) -> KStarBound {
        KStarBound {
            ln_lower: f64::NEG_INFINITY,
            ln_upper: self.ln_upper,
        }
    }
}

/// What a step works on next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    /// Refine the candidate at this index.
    Sequence(usize),
    /// Expand the open group at this index.
    Group(usize),
}

/// Why the driver stopped refining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The top sequences are separated from the rest.
    Certified,
    /// No candidate that could change the ranking is left to refine.
    NothingRefinable,
    /// The configured step limit was reached.
    StepLimit,
}

/// Ranking of the viable candidates and the separation it achieves.
struct Ranking {
    top: Vec<usize>,
    rest: Vec<usize>,
    /// Lowest K* lower bound among the top sequences, in log10 units.
    top_lower: f64,
    /// Highest K* upper bound among the rest and the open groups, in log10 units.
    rest_upper: f64,
    certified: bool,
}

/// Sequence-level branch and bound over the K* scores of a design.
///
/// Sequences are reached through a tree whose inner nodes fix a prefix of the mutable
/// positions. Each step either expands the open group or refines the candidate whose
/// interval most threatens the current top ranking. Groups and unstarted candidates are
/// ranked by bounds shared with every sequence below them, so whole subtrees that cannot
/// reach the top are never enumerated. Protein and ligand estimators are shared by every
/// candidate with the same projected sequence.
pub struct BbkStar<'a> {
    design: DesignSpace,
    contexts: StateContexts,
    config: &'a BbkStarConfig,
    pool: &'a MinimizationPool,
    reporter: &'a ProgressReporter<'a>,
    estimators: Vec<PfuncEstimator>,
    index: HashMap<(StateKind, Sequence), usize>,
    candidates: Vec<Candidate>,
    groups: Vec<SequenceGroup>,
    bounds: SequenceBounds,
    num_sequences: u128,
    next_serial: usize,
    stability: Option<[Option<f64>; 2]>,
    steps: usize,
    expansions: usize,
    pruned: usize,
}

impl<'a> BbkStar<'a> {
    pub fn new(
        design: &DesignSpace,
        contexts: StateContexts,
        config: &'a BbkStarConfig,
        pool: &'a MinimizationPool,
        reporter: &'a ProgressReporter<'a>,
    ) -> Result<Self, EngineError> {
        let num_sequences = count_sequences(design.complex(), config.max_simultaneous_mutations);
        check_num_best(config.num_best_sequences, num_sequences)?;

        let mut driver = Self {
            design: design.clone(),
            contexts,
            config,
            pool,
            reporter,
            estimators: Vec::new(),
            index: HashMap::new(),
            candidates: Vec::new(),
            groups: Vec::new(),
            bounds: SequenceBounds::default(),
            num_sequences,
            next_serial: 0,
            stability: None,
            steps: 0,
            expansions: 0,
            pruned: 0,
        };
        let root = PartialSequence::open(design.complex().num_positions());
        driver.add_node(root);
        Ok(driver)
    }

    pub fn design(&self) -> &DesignSpace {
        &self.design
    }

    pub fn contexts(&self) -> &StateContexts {
        &self.contexts
    }

    /// Sequences reached so far; the rest are still inside open groups or pruned.
    pub fn num_candidates(&self) -> usize {
        self.candidates.len()
    }

    /// Sequences the design allows under the mutation limit.
    pub fn num_sequences(&self) -> u128 {
        self.num_sequences
    }

    pub fn num_open_groups(&self) -> usize {
        self.groups.len()
    }

    /// Groups dropped because every sequence in them is certainly unstable.
    pub fn num_pruned(&self) -> usize {
        self.pruned
    }

    pub fn num_steps(&self) -> usize {
        self.steps
    }

    pub fn num_expansions(&self) -> usize {
        self.expansions
    }

    /// Refines candidates until the ranking is settled and returns the top sequences.
    #[instrument(skip_all, name = "bbkstar")]
    pub fn run(&mut self) -> Vec<ScoredSequence> {
        info!(
            sequences = self.num_sequences,
            num_best = self.config.num_best_sequences,
            method = ?self.config.method,
            "Starting BBK* search."
        );
        self.prepare_stability();

        self.reporter.report(Progress::PhaseStart { name: "BBK* Search" });
        let reason = loop {
            if let Some(reason) = self.step() {
                break reason;
            }
        };
        for estimator in &mut self.estimators {
            estimator.abandon();
        }
        self.reporter.report(Progress::PhaseFinish);

        let ranked = self.ranked();
        info!(
            steps = self.steps,
            expansions = self.expansions,
            reached = self.candidates.len(),
            pruned = self.pruned,
            reason = ?reason,
            ranked = ranked.len(),
            "BBK* search finished."
        );
        ranked
    }

    /// Performs one sequence refinement or group expansion, or returns why the search
    /// should stop. Only refinements count toward the step limit.
    pub fn step(&mut self) -> Option<StopReason> {
        self.prepare_stability();
        if self
            .config
            .confidence
            .max_steps
            .is_some_and(|max| self.steps >= max)
        {
            return Some(StopReason::StepLimit);
        }
        let ranking = self.rank();
        let target = match self.select(&ranking) {
            Ok(target) => target,
            Err(reason) => {
                debug!(
                    reason = ?reason,
                    top_lower = ranking.top_lower,
                    rest_upper = ranking.rest_upper,
                    "No further refinement needed."
                );
                return Some(reason);
            }
        };
        match target {
            Target::Sequence(i) => self.refine(i),
            Target::Group(g) => self.expand(g),
        }
        None
    }

    /// Read-only view of every candidate reached so far, in the order reached.
    pub fn snapshot(&self) -> Vec<SequenceSnapshot> {
        (0..self.candidates.len()).map(|i| self.snapshot_of(i)).collect()
    }

    /// The viable candidates with the highest K* lower bounds, best first.
    pub fn ranked(&self) -> Vec<ScoredSequence> {
        let mut viable: Vec<usize> = (0..self.candidates.len())
            .filter(|&i| self.candidates[i].status.is_viable())
            .collect();
        viable.sort_by(|&a, &b| {
            let (ka, kb) = (&self.candidates[a].kstar, &self.candidates[b].kstar);
            kb.ln_lower
                .total_cmp(&ka.ln_lower)
                .then_with(|| kb.ln_upper.total_cmp(&ka.ln_upper))
                .then_with(|| a.cmp(&b))
        });
        viable
            .into_iter()
            .take(self.config.num_best_sequences)
            .enumerate()
            .map(|(rank, i)| {
                let candidate = &self.candidates[i];
                let state = |kind: StateKind| {
                    self.candidate_state(i, kind)
                        .cloned()
                        .unwrap_or_else(PfuncState::unstarted)
                };
                ScoredSequence {
                    rank: rank + 1,
                    sequence: candidate.sequence.clone(),
                    protein_sequence: candidate.protein_sequence.clone(),
                    ligand_sequence: candidate.ligand_sequence.clone(),
                    kstar: candidate.kstar,
                    status: candidate.status,
                    protein: state(StateKind::Protein),
                    ligand: state(StateKind::Ligand),
                    complex: state(StateKind::Complex),
                }
            })
            .collect()
    }

    /// The estimator of `sequence` in `kind`, if one was ever created.
    ///
    /// `sequence` is given in the positions of `kind`.
    pub fn estimator_for(&self, kind: StateKind, sequence: &Sequence) -> Option<&PfuncEstimator> {
        self.index
            .get(&(kind, sequence.clone()))
            .map(|&i| &self.estimators[i])
    }

    fn snapshot_of(&self, i: usize) -> SequenceSnapshot {
        let candidate = &self.candidates[i];
        SequenceSnapshot {
            index: i,
            sequence: candidate.sequence.clone(),
            status: candidate.status,
            kstar: candidate.kstar,
            protein: self.candidate_state(i, StateKind::Protein).cloned(),
            ligand: self.candidate_state(i, StateKind::Ligand).cloned(),
            complex: self.candidate_state(i, StateKind::Complex).cloned(),
        }
    }

    fn candidate_state(&self, i: usize, kind: StateKind) -> Option<&PfuncState> {
        let candidate = &self.candidates[i];
        let sequence = match kind {
            StateKind::Protein => &candidate.protein_sequence,
            StateKind::Ligand => &candidate.ligand_sequence,
            StateKind::Complex => &candidate.sequence,
        };
        self.estimator_for(kind, sequence).map(PfuncEstimator::state)
    }

    /// Bounds the wild-type unbound states to completion and derives the stability
    /// thresholds from them. Runs once.
    fn prepare_stability(&mut self) {
        if self.stability.is_some() {
            return;
        }
        let Some(threshold) = self.config.stability_threshold else {
            self.stability = Some([None, None]);
            return;
        };

        self.reporter.report(Progress::PhaseStart {
            name: "Wild-Type Stability",
        });
        let wild_type = self.design.complex().wild_type_sequence();
        let mut thresholds = [None, None];
        for (slot, kind) in [StateKind::Protein, StateKind::Ligand].into_iter().enumerate() {
            let sequence = self.design.project(&wild_type, kind);
            let index = self.estimator_index(kind, &sequence);
            let status = self.estimators[index].refine_to_completion(self.pool);
            let bounds = self.estimators[index].bounds();
            if status != PfuncStatus::Converged {
                warn!(state = %kind, status = %status, "Wild-type partition function did not converge.");
            }
            let ln_threshold = bounds.ln_lower - threshold / RT;
            info!(
                state = %kind,
                log10_z = bounds.log10_lower(),
                ln_threshold,
                "Stability threshold set from wild type."
            );
            thresholds[slot] = Some(ln_threshold);
        }
        self.reporter.report(Progress::PhaseFinish);

        self.stability = Some(thresholds);
        for ((kind, _), &i) in &self.index {
            if let Some(slot) = stability_slot(*kind) {
                self.estimators[i].set_stability_threshold(thresholds[slot]);
            }
        }
        self.refresh();
    }

    /// Assigns every next position that has a single residue type, and fills the rest
    /// with wild type once the mutation limit is reached.
    fn settle(&self, mut sequence: PartialSequence) -> PartialSequence {
        let complex = self.design.complex();
        if self
            .config
            .max_simultaneous_mutations
            .is_some_and(|max| sequence.count_mutations(complex) >= max)
        {
            return PartialSequence::from(&sequence.fill_wild_type(complex));
        }
        while let Some(pos) = sequence.next_open() {
            match complex.position(pos).res_types() {
                [only] => sequence = sequence.assign(pos, only),
                _ => break,
            }
        }
        sequence
    }

    /// Bounds shared by every sequence extending `sequence`: the upper bound on `ln K*`
    /// and whether an unbound state certainly falls below its stability threshold.
    fn tree_bound(&mut self, sequence: &PartialSequence) -> (f64, bool) {
        let thresholds = self.stability.unwrap_or([None, None]);
        let mut ln_unbound_lower = 0.0;
        let mut below_threshold = false;
        for (slot, kind) in [StateKind::Protein, StateKind::Ligand].into_iter().enumerate() {
            let projected = self.design.project_partial(sequence, kind);
            let context = self.contexts.get(kind);
            ln_unbound_lower += self.bounds.ln_lower(context, &projected);
            if let Some(threshold) = thresholds[slot] {
                if self.bounds.ln_upper(context, &projected) < threshold {
                    below_threshold = true;
                }
            }
        }
        let ln_complex_upper = self
            .bounds
            .ln_upper(self.contexts.get(StateKind::Complex), sequence);
        let ln_upper = ln_complex_upper - ln_unbound_lower;
        // inf - inf: nothing is known
        let ln_upper = if ln_upper.is_nan() { f64::INFINITY } else { ln_upper };
        (ln_upper, below_threshold)
    }

    /// Adds a tree node: a candidate once every position is fixed, an open group otherwise.
    fn add_node(&mut self, sequence: PartialSequence) {
        let sequence = self.settle(sequence);
        let (ln_bound, below_threshold) = self.tree_bound(&sequence);
        let serial = self.next_serial;
        self.next_serial += 1;

        if !sequence.is_complete() {
            if below_threshold {
                self.pruned += 1;
                debug!(group = %sequence, "Pruned group: unbound state is unstable throughout.");
                return;
            }
            self.groups.push(SequenceGroup {
                sequence,
                serial,
                ln_upper: ln_bound,
            });
            return;
        }

        let sequence = sequence.fill_wild_type(self.design.complex());
        let status = if below_threshold {
            info!(sequence = %sequence, "Sequence dropped: unbound state is unstable.");
            SequenceStatus::Unstable
        } else {
            SequenceStatus::Unstarted
        };
        self.candidates.push(Candidate {
            protein_sequence: self.design.project(&sequence, StateKind::Protein),
            ligand_sequence: self.design.project(&sequence, StateKind::Ligand),
            sequence,
            serial,
            ln_bound,
            below_threshold,
            estimators: None,
            status,
            kstar: KStarBound {
                ln_lower: f64::NEG_INFINITY,
                ln_upper: ln_bound,
            },
        });
    }

    /// Replaces the open group `g` by one child per residue type at its next open position.
    fn expand(&mut self, g: usize) {
        let group = self.groups.swap_remove(g);
        let Some(pos) = group.sequence.next_open() else {
            return;
        };
        let res_types = self.design.complex().position(pos).res_types().to_vec();
        let max = self.config.max_simultaneous_mutations;
        for res_type in &res_types {
            let child = group.sequence.assign(pos, res_type);
            if max.is_some_and(|max| child.count_mutations(self.design.complex()) > max) {
                continue;
            }
            self.add_node(child);
        }
        self.expansions += 1;
        debug!(
            group = %group.sequence,
            open = self.groups.len(),
            reached = self.candidates.len(),
            "Expanded sequence group."
        );
    }

    fn estimator_index(&mut self, kind: StateKind, sequence: &Sequence) -> usize {
        let key = (kind, sequence.clone());
        if let Some(&i) = self.index.get(&key) {
            return i;
        }
        let context = self.contexts.get(kind);
        let mut estimator =
            context.make_estimator(sequence, self.config.method, &self.config.estimator);
        if let (Some(slot), Some(thresholds)) = (stability_slot(kind), self.stability) {
            estimator.set_stability_threshold(thresholds[slot]);
        }
        debug!(state = %kind, sequence = %sequence, "Created partition function estimator.");
        let i = self.estimators.len();
        self.estimators.push(estimator);
        self.index.insert(key, i);
        i
    }

    fn start(&mut self, i: usize) -> StateEstimators {
        if let Some(estimators) = self.candidates[i].estimators {
            return estimators;
        }
        let protein_sequence = self.candidates[i].protein_sequence.clone();
        let ligand_sequence = self.candidates[i].ligand_sequence.clone();
        let sequence = self.candidates[i].sequence.clone();
        let estimators = StateEstimators {
            protein: self.estimator_index(StateKind::Protein, &protein_sequence),
            ligand: self.estimator_index(StateKind::Ligand, &ligand_sequence),
            complex: self.estimator_index(StateKind::Complex, &sequence),
        };
        self.candidates[i].estimators = Some(estimators);
        estimators
    }

    fn refine(&mut self, i: usize) {
        let estimators = self.start(i);
        for index in estimators.in_refinement_order() {
            let estimator = &mut self.estimators[index];
            if estimator.status().can_continue() {
                estimator.refine(self.pool);
            }
        }
        self.steps += 1;
        self.refresh();

        let candidate = &self.candidates[i];
        debug!(
            step = self.steps,
            sequence = %candidate.sequence,
            status = %candidate.status,
            kstar = %candidate.kstar,
            "Refined sequence."
        );
        self.reporter
            .report(Progress::SequenceUpdate(Box::new(self.snapshot_of(i))));
    }

    /// Recomputes the status and K* bound of every candidate from its estimators.
    fn refresh(&mut self) {
        for i in 0..self.candidates.len() {
            let previous = self.candidates[i].status;
            let (status, kstar) = self.evaluate(i);
            let candidate = &mut self.candidates[i];
            candidate.status = status;
            candidate.kstar = kstar;
            if status == previous {
                continue;
            }
            match status {
                SequenceStatus::Failed => {
                    warn!(sequence = %candidate.sequence, "Sequence dropped: a partition function failed.")
                }
                SequenceStatus::Unstable => {
                    info!(sequence = %candidate.sequence, "Sequence dropped: unbound state is unstable.")
                }
                _ => {}
            }
            if !status.is_viable() {
                if let Some(estimators) = candidate.estimators {
                    self.estimators[estimators.complex].abandon();
                }
            }
        }
    }

    fn evaluate(&self, i: usize) -> (SequenceStatus, KStarBound) {
        let candidate = &self.candidates[i];
        let Some(estimators) = candidate.estimators else {
            let bound = KStarBound {
                ln_lower: f64::NEG_INFINITY,
                ln_upper: candidate.ln_bound,
            };
            if candidate.below_threshold {
                return (SequenceStatus::Unstable, bound);
            }
            // Shared unbound estimators can already rule out an unstarted sequence.
            let shared = [
                self.candidate_state(i, StateKind::Protein),
                self.candidate_state(i, StateKind::Ligand),
            ];
            let status = shared
                .iter()
                .flatten()
                .map(|s| match s.status {
                    PfuncStatus::Failed => SequenceStatus::Failed,
                    PfuncStatus::Unstable => SequenceStatus::Unstable,
                    _ => SequenceStatus::Unstarted,
                })
                .find(|s| *s != SequenceStatus::Unstarted)
                .unwrap_or(SequenceStatus::Unstarted);
            return (status, bound);
        };
        let [protein, ligand, complex] =
            estimators.in_refinement_order().map(|e| self.estimators[e].state());
        let status = SequenceStatus::aggregate([protein.status, ligand.status, complex.status]);
        let mut kstar = KStarBound::from_bounds(&protein.bounds, &ligand.bounds, &complex.bounds);
        kstar.ln_upper = kstar.ln_upper.min(candidate.ln_bound).max(kstar.ln_lower);
        (status, kstar)
    }

    /// Orders two creation serials by the configured tie-break, preferred first.
    fn tie_order(&self, a: usize, b: usize) -> Ordering {
        match self.config.confidence.tie_break {
            TieBreak::Forward => a.cmp(&b),
            TieBreak::Reverse => b.cmp(&a),
        }
    }

    fn rank(&self) -> Ranking {
        let mut viable: Vec<usize> = (0..self.candidates.len())
            .filter(|&i| self.candidates[i].status.is_viable())
            .collect();
        viable.sort_by(|&a, &b| {
            let (ca, cb) = (&self.candidates[a], &self.candidates[b]);
            cb.kstar
                .ln_lower
                .total_cmp(&ca.kstar.ln_lower)
                .then_with(|| self.tie_order(ca.serial, cb.serial))
        });
        let split = self.config.num_best_sequences.min(viable.len());
        let rest = viable.split_off(split);
        let top = viable;

        // A short top list is not final while groups may still hold better sequences.
        let top_lower = if top.len() < self.config.num_best_sequences && !self.groups.is_empty() {
            f64::NEG_INFINITY
        } else {
            top.iter()
                .map(|&i| self.candidates[i].kstar.log10_lower())
                .fold(f64::INFINITY, f64::min)
        };
        let rest_upper = rest
            .iter()
            .map(|&i| self.candidates[i].kstar.log10_upper())
            .chain(self.groups.iter().map(|g| g.ln_upper / LN_10))
            .fold(f64::NEG_INFINITY, f64::max);
        let certified = (rest.is_empty() && self.groups.is_empty())
            || top_lower >= rest_upper + self.config.confidence.margin_log10;

        Ranking {
            top,
            rest,
            top_lower,
            rest_upper,
            certified,
        }
    }

    fn select(&self, ranking: &Ranking) -> Result<Target, StopReason> {
        if !ranking.certified {
            let band_lo = ranking.top_lower;
            let band_hi = ranking.rest_upper + self.config.confidence.margin_log10;
            let sequences = ranking
                .top
                .iter()
                .chain(&ranking.rest)
                .copied()
                .filter(|&i| self.candidates[i].status.is_refinable())
                .map(|i| {
                    let candidate = &self.candidates[i];
                    (Target::Sequence(i), candidate.kstar, candidate.serial)
                });
            let groups = self
                .groups
                .iter()
                .enumerate()
                .map(|(g, group)| (Target::Group(g), group.kstar(), group.serial));
            let contested = sequences
                .chain(groups)
                .map(|(target, kstar, serial)| {
                    (target, kstar.overlap_width(band_lo, band_hi), kstar, serial)
                })
                .filter(|&(_, overlap, _, _)| overlap > 0.0)
                .max_by(|a, b| {
                    a.1.total_cmp(&b.1)
                        .then_with(|| a.2.ln_upper.total_cmp(&b.2.ln_upper))
                        .then_with(|| a.2.width().total_cmp(&b.2.width()))
                        .then_with(|| self.tie_order(b.3, a.3))
                });
            if let Some((target, _, _, _)) = contested {
                return Ok(target);
            }
        }

        let stop = if ranking.certified {
            StopReason::Certified
        } else {
            StopReason::NothingRefinable
        };
        if !self.config.confidence.require_converged_top {
            return Err(stop);
        }
        ranking
            .top
            .iter()
            .copied()
            .filter(|&i| self.candidates[i].status.is_refinable())
            .max_by(|&a, &b| {
                let (ca, cb) = (&self.candidates[a], &self.candidates[b]);
                ca.kstar
                    .width()
                    .total_cmp(&cb.kstar.width())
                    .then_with(|| self.tie_order(cb.serial, ca.serial))
            })
            .map(Target::Sequence)
            .ok_or(stop)
    }
}

fn stability_slot(kind: StateKind) -> Option<usize> {
    match kind {
        StateKind::Protein => Some(0),
        StateKind::Ligand => Some(1),
        StateKind::Complex => None,
    }
}

/// Rejects a request for more top sequences than the design can produce.
pub fn check_num_best(num_best: usize, num_sequences: u128) -> Result<(), ConfigError> {
    if num_best as u128 > num_sequences {
        return Err(ConfigError::InvalidParameter {
            name: "num_best_sequences",
            reason: format!("requested {num_best} but the design has only {num_sequences} sequences"),
        });
    }
    Ok(())
}
