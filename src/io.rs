//! XYZ file reading and writing.
//!
//! The XYZ format: an atom count line, a title/comment line, then one
//! `element x y z` line per atom. Coordinates are in Angstrom. Connectivity
//! is not part of the format; callers add bonds separately when alignment
//! needs them.

use crate::structure::{Atom, Structure};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use thiserror::Error;

/// Error type for XYZ file handling.
#[derive(Error, Debug)]
pub enum XyzError {
    /// Underlying file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The file content does not follow the XYZ grammar.
    #[error("malformed XYZ file: {0}")]
    Malformed(String),
}

/// Reads a structure from an XYZ file.
pub fn read_xyz<P: AsRef<Path>>(path: P) -> Result<Structure, XyzError> {
    let file = File::open(path.as_ref())?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let count_line = lines
        .next()
        .ok_or_else(|| XyzError::Malformed("empty file".to_string()))??;
    let count: usize = count_line
        .trim()
        .parse()
        .map_err(|_| XyzError::Malformed(format!("invalid atom count '{}'", count_line.trim())))?;

    let title = lines
        .next()
        .ok_or_else(|| XyzError::Malformed("missing title line".to_string()))??;

    let mut structure = Structure::new(title.trim());
    for i in 0..count {
        let line = lines
            .next()
            .ok_or_else(|| {
                XyzError::Malformed(format!("expected {} atoms, found {}", count, i))
            })??;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(XyzError::Malformed(format!(
                "atom line {} has {} fields, expected at least 4",
                i + 1,
                fields.len()
            )));
        }
        let coords: Result<Vec<f64>, _> = fields[1..4].iter().map(|f| f.parse()).collect();
        let coords = coords.map_err(|_| {
            XyzError::Malformed(format!("invalid coordinates on atom line {}", i + 1))
        })?;
        structure.add_atom(Atom::new(fields[0], coords[0], coords[1], coords[2]));
    }

    Ok(structure)
}

/// Writes a structure to an XYZ file.
pub fn write_xyz<P: AsRef<Path>>(structure: &Structure, path: P) -> Result<(), XyzError> {
    let mut file = File::create(path.as_ref())?;
    writeln!(file, "{}", structure.num_atoms())?;
    writeln!(file, "{}", structure.title)?;
    for atom in structure.atoms() {
        writeln!(
            file,
            "{:<4}{:>14.8}{:>16.8}{:>16.8}",
            atom.label, atom.position[0], atom.position[1], atom.position[2]
        )?;
    }
    Ok(())
}
