use super::error::EngineError;
use crate::core::energy::{ConfEnergyCalculator, EnergyEvaluation, EnergyModel, MinimizationFailure};
use crate::core::space::ConfSpace;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::debug;

/// Worker threads that run full-conformation minimizations.
///
/// Created once and lent to every estimator that dispatches work.
pub struct MinimizationPool {
    pool: rayon::ThreadPool,
}

impl MinimizationPool {
    pub fn new(num_threads: usize) -> Result<Self, EngineError> {
        if num_threads == 0 {
            return Err(EngineError::ThreadPool(
                "at least one worker thread is required".to_string(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("minimizer-{i}"))
            .build()
            .map_err(|e| EngineError::ThreadPool(e.to_string()))?;
        debug!(threads = num_threads, "Minimization pool started.");
        Ok(Self { pool })
    }

    /// Number of minimizations that may usefully be in flight at once.
    pub fn parallelism(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.spawn(job);
    }
}

/// A finished minimization, tagged with whatever the submitter used to identify it.
#[derive(Debug)]
pub(crate) struct MinimizationOutcome<T> {
    pub tag: T,
    pub conformation: Vec<usize>,
    pub result: Result<EnergyEvaluation, MinimizationFailure>,
}

/// The submission side and private result channel of one estimator.
pub(crate) struct MinimizationQueue<T> {
    space: Arc<ConfSpace>,
    calculator: Arc<dyn ConfEnergyCalculator>,
    sender: Sender<MinimizationOutcome<T>>,
    receiver: Receiver<MinimizationOutcome<T>>,
    in_flight: usize,
}

impl<T: Send + 'static> MinimizationQueue<T> {
    pub fn new(space: Arc<ConfSpace>, calculator: Arc<dyn ConfEnergyCalculator>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            space,
            calculator,
            sender,
            receiver,
            in_flight: 0,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn submit(&mut self, pool: &MinimizationPool, tag: T, conformation: Vec<usize>) {
        let space = Arc::clone(&self.space);
        let calculator = Arc::clone(&self.calculator);
        let sender = self.sender.clone();
        self.in_flight += 1;
        pool.spawn(move || {
            let result = minimize(&*calculator, &space, &conformation);
            // The receiver is gone once the estimator abandons its work.
            let _ = sender.send(MinimizationOutcome {
                tag,
                conformation,
                result,
            });
        });
    }

    /// Blocks until any in-flight minimization completes.
    pub fn wait(&mut self) -> Option<MinimizationOutcome<T>> {
        if self.in_flight == 0 {
            return None;
        }
        let outcome = self.receiver.recv().ok()?;
        self.in_flight -= 1;
        Some(outcome)
    }

    /// Forgets every in-flight minimization; their results are dropped on arrival.
    pub fn abandon(&mut self) {
        let (sender, receiver) = mpsc::channel();
        self.sender = sender;
        self.receiver = receiver;
        self.in_flight = 0;
    }
}

fn minimize(
    calculator: &dyn ConfEnergyCalculator,
    space: &ConfSpace,
    conformation: &[usize],
) -> Result<EnergyEvaluation, MinimizationFailure> {
    let evaluation = panic::catch_unwind(AssertUnwindSafe(|| {
        calculator.evaluate(space, conformation, EnergyModel::Minimized)
    }))
    .unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(MinimizationFailure::new(
            space.id(),
            conformation,
            format!("energy calculator panicked: {reason}"),
        ))
    })?;
    if !evaluation.energy.is_finite() {
        return Err(MinimizationFailure::new(
            space.id(),
            conformation,
            format!("non-finite energy {}", evaluation.energy),
        ));
    }
    Ok(evaluation)
}
