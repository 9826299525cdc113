//! Systems module - coarse-grained molecular systems.

mod protein;

pub use protein::{ideal_helix, residue_code, sequence_embeddings, BeadKind, N_EMBEDDING_TYPES};
