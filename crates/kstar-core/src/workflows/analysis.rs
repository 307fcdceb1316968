use crate::core::sequence::Sequence;
use crate::core::space::StateKind;
use crate::engine::bbkstar::BbkStar;
use crate::engine::search::ScoringStrategy;

/// One low-energy conformation of a sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleConf {
    /// `position:rotamer` for every position of the state.
    pub labels: Vec<String>,
    pub assignment: Vec<usize>,
    /// Lower bound from the minimized energy matrix.
    pub lower_bound: f64,
    /// Minimized energy, if the estimator of this sequence already computed it.
    pub minimized_energy: Option<f64>,
}

/// The `k` conformations of `sequence` with the lowest energy bounds in `kind`.
///
/// `sequence` is a complex sequence; it is projected onto the positions of `kind`.
pub fn ensemble(driver: &BbkStar, sequence: &Sequence, kind: StateKind, k: usize) -> Vec<EnsembleConf> {
    let projected = driver.design().project(sequence, kind);
    let context = driver.contexts().get(kind);
    let space = context.space();
    let estimator = driver.estimator_for(kind, &projected);

    context
        .make_search(&projected, ScoringStrategy::TraditionalBound)
        .take(k)
        .map(|conf| {
            let labels = conf
                .assignment
                .iter()
                .enumerate()
                .map(|(pos, &rc)| {
                    let position = space.position(pos);
                    format!("{}:{}", position.name(), position.rc(rc).rotamer)
                })
                .collect();
            EnsembleConf {
                labels,
                minimized_energy: estimator.and_then(|e| e.minimized_energy(&conf.assignment)),
                assignment: conf.assignment,
                lower_bound: conf.score,
            }
        })
        .collect()
}
