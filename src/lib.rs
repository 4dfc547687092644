#![deny(missing_docs)]

//! qcflow - Computational-Chemistry Workflow Toolkit
//!
//! qcflow compares and superposes molecular structures and translates a
//! software-agnostic job representation into native quantum-chemistry input
//! files, exemplified by a Gaussian input writer and an output-driven restart
//! mechanism.
//!
//! # Overview
//!
//! Three engines share one data model:
//!
//! - **Geometry alignment and atom mapping**: candidate atom correspondences
//!   from a maximum-common-substructure search, least-squares Kabsch
//!   superposition, and connectivity-guided 3D refinement of mappings that
//!   topology alone cannot disambiguate.
//! - **Directive-tree translation**: a generic, order-preserving job tree
//!   serialized into Gaussian's rigid section-ordered input grammar, with
//!   structural violations rejected at serialization time.
//! - **Failure-driven restart**: a classified job failure plus the original
//!   multi-step job yields a new job, with checkpoint pointers, charge and
//!   spin, and the starting geometry kept consistent across steps.
//!
//! # Quick Start
//!
//! ```no_run
//! use qcflow::align::best_atom_mapping;
//! use qcflow::io::read_xyz;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let reference = read_xyz("reference.xyz")?;
//!     let candidate = read_xyz("candidate.xyz")?;
//!     let mapping = best_atom_mapping(&reference, &candidate)?;
//!     println!("{} atoms mapped", mapping.len());
//!     Ok(())
//! }
//! ```

pub mod align;
pub mod directive;
pub mod gaussian;
pub mod geometry;
pub mod io;
pub mod kabsch;
pub mod mcs;
pub mod refine;
pub mod restart;
pub mod structure;

pub use align::{align_geometries, best_atom_mapping, AlignOptions, AlignmentResult};
pub use directive::{Directive, Job, Keyword, Step};
pub use gaussian::GaussianWriter;
pub use mcs::AtomMapping;
pub use restart::{restart, ErrorClassification};
pub use structure::{Atom, Structure};
