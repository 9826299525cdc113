//! Coarse-grained protein chains: residue embeddings and reference structures.

use nalgebra::Vector3;
use crate::error::{CgweError, Result};
use crate::potential::State;

/// Bead kinds with their own embedding table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BeadKind {
    /// Alpha carbon
    CA,
    /// Beta carbon
    CB,
}

impl std::str::FromStr for BeadKind {
    type Err = CgweError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CA" => Ok(BeadKind::CA),
            "CB" => Ok(BeadKind::CB),
            other => Err(CgweError::config(format!("unknown bead name '{}'", other))),
        }
    }
}

const CA_CODES: [(&str, usize); 23] = [
    ("ALA", 1), ("GLY", 2), ("PHE", 3), ("TYR", 4), ("ASP", 5), ("GLU", 6),
    ("TRP", 7), ("PRO", 8), ("ASN", 9), ("GLN", 10), ("HIS", 11), ("HSD", 11),
    ("HSE", 11), ("SER", 12), ("THR", 13), ("VAL", 14), ("MET", 15), ("CYS", 16),
    ("NLE", 17), ("ARG", 18), ("LYS", 19), ("LEU", 20), ("ILE", 21),
];

const CB_CODES: [(&str, usize); 23] = [
    ("ALA", 22), ("GLY", 23), ("PHE", 24), ("TYR", 25), ("ASP", 26), ("GLU", 27),
    ("TRP", 28), ("PRO", 29), ("ASN", 30), ("GLN", 31), ("HIS", 32), ("HSD", 33),
    ("HSE", 34), ("SER", 35), ("THR", 36), ("VAL", 37), ("MET", 38), ("CYS", 39),
    ("NLE", 40), ("ARG", 41), ("LYS", 42), ("LEU", 43), ("ILE", 44),
];

/// Number of distinct embedding codes (0 is unused).
pub const N_EMBEDDING_TYPES: usize = 45;

/// Embedding code of one residue for the given bead kind.
pub fn residue_code(kind: BeadKind, residue: &str) -> Result<usize> {
    let table = match kind {
        BeadKind::CA => &CA_CODES,
        BeadKind::CB => &CB_CODES,
    };
    table
        .iter()
        .find(|(name, _)| *name == residue)
        .map(|&(_, code)| code)
        .ok_or_else(|| CgweError::config(format!("unknown residue '{}' for {:?} bead", residue, kind)))
}

/// One embedding code per residue.
pub fn sequence_embeddings<S: AsRef<str>>(kind: BeadKind, sequence: &[S]) -> Result<Vec<usize>> {
    sequence.iter().map(|r| residue_code(kind, r.as_ref())).collect()
}

/// CA trace of an ideal right-handed α-helix along z.
///
/// 3.6 residues per turn, 1.5 Å rise and 2.3 Å radius give the
/// familiar ≈3.8 Å CA-CA distance.
pub fn ideal_helix(n_residues: usize, radius: f64, rise: f64, residues_per_turn: f64) -> State {
    let dtheta = 2.0 * std::f64::consts::PI / residues_per_turn;
    (0..n_residues)
        .map(|i| {
            let theta = dtheta * i as f64;
            Vector3::new(radius * theta.cos(), radius * theta.sin(), rise * i as f64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_embedding_codes() {
        assert_eq!(residue_code(BeadKind::CA, "ALA").unwrap(), 1);
        assert_eq!(residue_code(BeadKind::CA, "HSE").unwrap(), 11);
        assert_eq!(residue_code(BeadKind::CB, "HSE").unwrap(), 34);
        assert_eq!(residue_code(BeadKind::CB, "ILE").unwrap(), 44);
        let emb = sequence_embeddings(BeadKind::CA, &["GLY", "LYS", "LEU"][..]).unwrap();
        assert_eq!(emb, vec![2, 19, 20]);
        assert!(emb.iter().all(|&c| c < N_EMBEDDING_TYPES));
    }

    #[test]
    fn test_unknown_residue_or_bead() {
        assert!(matches!(residue_code(BeadKind::CA, "XYZ"), Err(CgweError::Config(_))));
        assert!(matches!(residue_code(BeadKind::CA, ""), Err(CgweError::Config(_))));
        assert!(matches!("CG".parse::<BeadKind>(), Err(CgweError::Config(_))));
        assert_eq!("CB".parse::<BeadKind>().unwrap(), BeadKind::CB);
    }

    #[test]
    fn test_ideal_helix_geometry() {
        let helix = ideal_helix(10, 2.3, 1.5, 3.6);
        assert_eq!(helix.len(), 10);
        let d0 = (helix[1] - helix[0]).norm();
        for w in helix.windows(2) {
            assert_relative_eq!((w[1] - w[0]).norm(), d0, epsilon = 1e-12);
        }
        assert!(d0 > 3.6 && d0 < 4.0);
    }
}
