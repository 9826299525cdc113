//! Potential module - trainable potentials and their batched evaluation.

mod traits;
mod pair;
mod evaluator;

pub use traits::{State, Parameter, EvalMode, PotentialOutput, Potential};
pub use pair::BeadPairPotential;
pub use evaluator::{Evaluation, evaluate_states};
