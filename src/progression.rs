//! Capture of intermediate reconstructions during the restoration loop.

use ndarray::{Array3, Array4, ArrayView3};
use std::collections::BTreeSet;

/// Which iterations are captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapturePolicy {
    #[default]
    Disabled,
    /// After every iteration.
    All,
    /// At `N - j²` for `j = 0..=floor(log2 N)`, dense towards the end of the run.
    Logarithmic,
}

impl CapturePolicy {
    /// Iteration indices captured in a run of `iterations` iterations, ascending.
    ///
    /// Index 0 is the initial estimate, index `k` the estimate after the `k`-th
    /// update.
    pub fn capture_indices(&self, iterations: usize) -> BTreeSet<usize> {
        match self {
            CapturePolicy::Disabled => BTreeSet::new(),
            CapturePolicy::All => (1..=iterations).collect(),
            CapturePolicy::Logarithmic => {
                if iterations == 0 {
                    return BTreeSet::from([0]);
                }
                let steps = iterations.ilog2() as usize;
                (0..=steps)
                    .filter_map(|j| iterations.checked_sub(j * j))
                    .collect()
            }
        }
    }
}

/// Owned copies of the estimate taken at the iterations selected by a policy.
#[derive(Debug, Clone)]
pub struct ProgressionRecorder {
    policy: CapturePolicy,
    indices: BTreeSet<usize>,
    shape: [usize; 3],
    captured: Vec<usize>,
    snapshots: Vec<Array3<f64>>,
}

impl ProgressionRecorder {
    pub fn new(policy: CapturePolicy, iterations: usize, shape: [usize; 3]) -> Self {
        ProgressionRecorder {
            policy,
            indices: policy.capture_indices(iterations),
            shape,
            captured: Vec::new(),
            snapshots: Vec::new(),
        }
    }

    pub fn disabled(shape: [usize; 3]) -> Self {
        Self::new(CapturePolicy::Disabled, 0, shape)
    }

    pub fn policy(&self) -> CapturePolicy {
        self.policy
    }

    pub fn is_enabled(&self) -> bool {
        self.policy != CapturePolicy::Disabled
    }

    pub fn wants(&self, iteration: usize) -> bool {
        self.indices.contains(&iteration)
    }

    /// Copies `estimate` if `iteration` is selected. Returns whether it was.
    pub fn record(&mut self, iteration: usize, estimate: ArrayView3<f64>) -> bool {
        if !self.wants(iteration) {
            return false;
        }
        log::debug!("capturing progression snapshot at iteration {iteration}");
        self.captured.push(iteration);
        self.snapshots.push(estimate.to_owned());
        true
    }

    /// Iterations captured so far, in capture order.
    pub fn captured_iterations(&self) -> &[usize] {
        &self.captured
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Stacks the snapshots along a new leading axis.
    pub fn into_stack(self) -> Array4<f64> {
        let [s0, s1, s2] = self.shape;
        let mut stack = Array4::zeros((self.snapshots.len(), s0, s1, s2));
        for (mut slot, snapshot) in stack.outer_iter_mut().zip(&self.snapshots) {
            slot.assign(snapshot);
        }
        stack
    }
}
