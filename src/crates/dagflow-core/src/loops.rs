//! Loop strategies for fan-out expansion
//!
//! When a node has loop edges, the executor collects the sequences bound to
//! its loop kwargs and asks the node's [`LoopStrategy`] to turn them into a
//! list of call tuples - one tuple per invocation, one child scope per
//! invocation. The emission order is user-visible: child scopes are inserted
//! in exactly this order and [`Scope::collect`](crate::Scope::collect)
//! preserves it.
//!
//! Two strategies are first-class:
//!
//! - [`LoopStrategy::Product`] (default) - the Cartesian product, earlier
//!   sequences varying slowest.
//! - [`LoopStrategy::Zip`] - element-wise pairing, truncated to the shortest
//!   sequence.
//!
//! A [`LoopStrategy::Custom`] closure can implement anything else. Strategies
//! must be deterministic and total: they are plain functions of their input
//! and may not fail.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Function type for user-supplied strategies.
pub type StrategyFn = Arc<dyn Fn(&[Vec<Value>]) -> Vec<Vec<Value>> + Send + Sync>;

/// Maps the sequences bound to a node's loop kwargs to the list of call
/// tuples, in emission order.
#[derive(Clone)]
pub enum LoopStrategy {
    /// Cartesian product of all sequences (default)
    Product,
    /// Element-wise pairing, truncated to the shortest sequence
    Zip,
    /// User-supplied strategy
    Custom(StrategyFn),
}

impl LoopStrategy {
    /// Create a custom strategy from a closure.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&[Vec<Value>]) -> Vec<Vec<Value>> + Send + Sync + 'static,
    {
        LoopStrategy::Custom(Arc::new(f))
    }

    /// Expand the loop sequences into call tuples. `seqs` is never empty when
    /// called by the executor.
    pub fn expand(&self, seqs: &[Vec<Value>]) -> Vec<Vec<Value>> {
        match self {
            LoopStrategy::Product => product(seqs),
            LoopStrategy::Zip => zip_shortest(seqs),
            LoopStrategy::Custom(f) => f(seqs),
        }
    }
}

impl Default for LoopStrategy {
    fn default() -> Self {
        LoopStrategy::Product
    }
}

impl fmt::Debug for LoopStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopStrategy::Product => f.write_str("Product"),
            LoopStrategy::Zip => f.write_str("Zip"),
            LoopStrategy::Custom(_) => f.write_str("Custom(<function>)"),
        }
    }
}

/// Cartesian product; the first sequence varies slowest.
fn product(seqs: &[Vec<Value>]) -> Vec<Vec<Value>> {
    let mut combos: Vec<Vec<Value>> = vec![Vec::new()];
    for seq in seqs {
        let mut next = Vec::with_capacity(combos.len() * seq.len());
        for combo in &combos {
            for item in seq {
                let mut extended = combo.clone();
                extended.push(item.clone());
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

/// Element-wise pairing truncated to the shortest sequence.
fn zip_shortest(seqs: &[Vec<Value>]) -> Vec<Vec<Value>> {
    let len = seqs.iter().map(Vec::len).min().unwrap_or(0);
    (0..len)
        .map(|i| seqs.iter().map(|seq| seq[i].clone()).collect())
        .collect()
}
