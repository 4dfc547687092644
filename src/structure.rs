//! Core molecular structure data model.
//!
//! This module provides the fundamental chemical data types shared by every
//! engine in the crate:
//!
//! - [`Atom`]: element symbol (or placeholder label), 3D position, and an
//!   optional per-atom scalar property bag
//! - [`Bond`]: undirected connection between two atom indices with an
//!   optional order/stereo label
//! - [`Structure`]: ordered atom list plus bond list and a free-text title
//!
//! Atom index within a [`Structure`] is the canonical atom identity: all
//! mappings, constraints, and bond endpoints refer to it. Coordinates are in
//! Angstroms.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Error type for structure construction and editing.
#[derive(Error, Debug)]
pub enum StructureError {
    /// A bond referenced an atom index outside the structure.
    #[error("bond endpoint {index} out of range for structure with {num_atoms} atoms")]
    InvalidBondEndpoint {
        /// Offending atom index.
        index: usize,
        /// Number of atoms in the structure.
        num_atoms: usize,
    },
}

/// A single atom: identity label, Cartesian position, optional properties.
///
/// The label is normally an element symbol ("C", "Fe") but placeholder labels
/// ("Du", "X1") are accepted; matching engines compare labels verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atom {
    /// Element symbol or placeholder label.
    pub label: String,
    /// Cartesian position `[x, y, z]` in Angstroms.
    pub position: [f64; 3],
    /// Optional per-atom scalar properties (partial charge, mass override, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, f64>,
}

impl Atom {
    /// Creates an atom with the given label and position.
    pub fn new(label: &str, x: f64, y: f64, z: f64) -> Self {
        Self {
            label: label.to_string(),
            position: [x, y, z],
            properties: HashMap::new(),
        }
    }

    /// Position as a nalgebra vector, for geometric computations.
    pub fn position_vector(&self) -> Vector3<f64> {
        Vector3::new(self.position[0], self.position[1], self.position[2])
    }

    /// Overwrites the position from a nalgebra vector.
    pub fn set_position_vector(&mut self, v: &Vector3<f64>) {
        self.position = [v.x, v.y, v.z];
    }
}

/// An undirected bond between two atom indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bond {
    /// First endpoint (atom index).
    pub i: usize,
    /// Second endpoint (atom index).
    pub j: usize,
    /// Optional bond order or stereo label ("1", "2", "ar", "up", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
}

/// An ordered molecular structure: atoms, bonds, and a free-text title.
///
/// Bond endpoints always reference valid atom indices; [`Structure::add_bond`]
/// enforces this at insertion time. Cloning a structure deep-copies all atoms
/// and bonds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Structure {
    /// Free-text title carried through readers and serializers.
    pub title: String,
    atoms: Vec<Atom>,
    bonds: Vec<Bond>,
}

// Deserialization must uphold the same bond-endpoint invariant that
// `add_bond` enforces, so it goes through a validating shadow type.
#[derive(Deserialize)]
struct RawStructure {
    #[serde(default)]
    title: String,
    #[serde(default)]
    atoms: Vec<Atom>,
    #[serde(default)]
    bonds: Vec<Bond>,
}

impl<'de> Deserialize<'de> for Structure {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawStructure::deserialize(deserializer)?;
        let n = raw.atoms.len();
        if let Some(index) = raw
            .bonds
            .iter()
            .flat_map(|b| [b.i, b.j])
            .find(|&index| index >= n)
        {
            return Err(serde::de::Error::custom(format!(
                "bond endpoint {} out of range for structure with {} atoms",
                index, n
            )));
        }
        Ok(Structure {
            title: raw.title,
            atoms: raw.atoms,
            bonds: raw.bonds,
        })
    }
}

impl Structure {
    /// Creates an empty structure with the given title.
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            atoms: Vec::new(),
            bonds: Vec::new(),
        }
    }

    /// Number of atoms.
    pub fn num_atoms(&self) -> usize {
        self.atoms.len()
    }

    /// Atoms in insertion order.
    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    /// Mutable access to the atoms.
    pub fn atoms_mut(&mut self) -> &mut [Atom] {
        &mut self.atoms
    }

    /// Bonds in insertion order.
    pub fn bonds(&self) -> &[Bond] {
        &self.bonds
    }

    /// Appends an atom and returns its index.
    pub fn add_atom(&mut self, atom: Atom) -> usize {
        self.atoms.push(atom);
        self.atoms.len() - 1
    }

    /// Adds a bond between atoms `i` and `j`.
    ///
    /// Fails with [`StructureError::InvalidBondEndpoint`] if either index is
    /// out of range.
    pub fn add_bond(&mut self, i: usize, j: usize, order: Option<&str>) -> Result<(), StructureError> {
        let n = self.atoms.len();
        for index in [i, j] {
            if index >= n {
                return Err(StructureError::InvalidBondEndpoint { index, num_atoms: n });
            }
        }
        self.bonds.push(Bond {
            i,
            j,
            order: order.map(str::to_string),
        });
        Ok(())
    }

    /// Returns true if atoms `i` and `j` share a bond.
    pub fn are_bonded(&self, i: usize, j: usize) -> bool {
        self.bonds
            .iter()
            .any(|b| (b.i == i && b.j == j) || (b.i == j && b.j == i))
    }

    /// Adjacency lists: `adj[i]` holds the neighbors of atom `i` in ascending
    /// order.
    pub fn adjacency(&self) -> Vec<Vec<usize>> {
        let mut adj = vec![Vec::new(); self.atoms.len()];
        for bond in &self.bonds {
            adj[bond.i].push(bond.j);
            adj[bond.j].push(bond.i);
        }
        for neighbors in &mut adj {
            neighbors.sort_unstable();
            neighbors.dedup();
        }
        adj
    }

    /// All atom positions as nalgebra vectors, in atom order.
    pub fn positions(&self) -> Vec<Vector3<f64>> {
        self.atoms.iter().map(Atom::position_vector).collect()
    }

    /// Strips bond order and stereo labels from every bond.
    ///
    /// Topological matching must not be blocked by resonance or aromaticity
    /// notation, so matching engines normalize all bonds to plain connections
    /// first. This is destructive; callers keep the original by cloning.
    pub fn normalize_bond_orders(&mut self) {
        for bond in &mut self.bonds {
            bond.order = None;
        }
    }

    /// Translates every atom by `shift`.
    pub fn translate(&mut self, shift: &Vector3<f64>) {
        for atom in &mut self.atoms {
            let p = atom.position_vector() + shift;
            atom.set_position_vector(&p);
        }
    }
}
