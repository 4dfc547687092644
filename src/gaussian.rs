//! Gaussian input writer: serializes a [`Job`] into Gaussian's
//! section-ordered input grammar.
//!
//! The grammar is rigid and position-sensitive: a Link-0 pre-section
//! (`%`-lines), a route header (`#`-lines), a title, the charge/spin line and
//! molecule specification, then trailing option blocks (ModRedundant
//! constraints, custom basis/ECP, solvent), each section closed by a blank
//! line. Multi-step jobs are separated by a literal `--Link1--` line.
//!
//! Per-section cardinality and type constraints live here, not in the
//! directive tree: a tree shape the grammar cannot express aborts
//! serialization with [`TranslateError::StructureViolation`]. A malformed
//! tree is a job-assembly bug, not a runtime condition to recover from.
//!
//! Serialization is deterministic: the same tree always yields byte-identical
//! output.

use crate::directive::{
    BasisCenter, BasisSet, ConstraintKind, CoordValue, Directive, GeometryConstraint,
    InternalCoordTable, Job, Payload, Step,
};
use crate::structure::Structure;
use thiserror::Error;

/// Error type for directive-to-input translation.
#[derive(Error, Debug)]
pub enum TranslateError {
    /// The directive tree has a shape the Gaussian grammar cannot express.
    #[error("directive tree violates the input grammar: {0}")]
    StructureViolation(String),
}

/// Separator line between the steps of a multi-step input file.
pub const STEP_SEPARATOR: &str = "--Link1--";

/// Route keyword holding the print level (`#P`, `#N`, ...).
pub const KEY_PRINT: &str = "print";
/// Route keyword holding the method (functional/wavefunction) name.
pub const KEY_METHOD: &str = "method";
/// Route keyword holding the basis-set name joined to the method with `/`.
pub const KEY_BASIS: &str = "basisset";
/// Molecule-section keyword holding the total charge.
pub const KEY_CHARGE: &str = "charge";
/// Molecule-section keyword holding the spin multiplicity.
pub const KEY_SPIN: &str = "spin";

/// Options-section data block rendered first (ModRedundant constraints).
pub const DATA_CONSTRAINTS: &str = "constraints";
/// Options-section data block rendered second (custom basis/ECP).
pub const DATA_BASIS: &str = "basis";
/// Options-section data block rendered third (implicit solvent).
pub const DATA_SOLVENT: &str = "solvent";

const PLACEHOLDER_TITLE: &str = "No title";

/// Serializer from the generic job representation to Gaussian input text.
#[derive(Debug, Clone)]
pub struct GaussianWriter {
    /// Digits after the decimal point in basis-set/ECP scientific notation.
    pub basis_precision: usize,
}

impl Default for GaussianWriter {
    fn default() -> Self {
        Self { basis_precision: 10 }
    }
}

impl GaussianWriter {
    /// Renders a complete multi-step job, steps separated by
    /// [`STEP_SEPARATOR`] lines.
    pub fn render_job(&self, job: &Job) -> Result<Vec<String>, TranslateError> {
        let mut lines = Vec::new();
        for (i, step) in job.steps.iter().enumerate() {
            if i > 0 {
                lines.push(STEP_SEPARATOR.to_string());
            }
            lines.extend(self.render_step(step)?);
        }
        Ok(lines)
    }

    /// Renders one step as its ordered sequence of input lines.
    pub fn render_step(&self, step: &Step) -> Result<Vec<String>, TranslateError> {
        let mut lines = Vec::new();
        self.render_link(step.link.as_ref(), &mut lines)?;
        self.render_route(step.route.as_ref(), &mut lines)?;
        self.render_title(step.title.as_ref(), &mut lines)?;
        self.render_molecule(step.molecule.as_ref(), &mut lines)?;
        self.render_options(step.options.as_ref(), &mut lines)?;
        Ok(lines)
    }

    // Link-0 section: keyword-only by grammar rule.
    fn render_link(
        &self,
        link: Option<&Directive>,
        lines: &mut Vec<String>,
    ) -> Result<(), TranslateError> {
        let Some(link) = link else { return Ok(()) };
        if !link.data().is_empty() || !link.subdirectives().is_empty() {
            return Err(TranslateError::StructureViolation(
                "link section accepts keywords only".to_string(),
            ));
        }
        for kw in link.keywords() {
            if kw.loud {
                lines.push(format!("%{}={}", kw.name, kw.value));
            } else {
                lines.push(format!("%{}", kw.value));
            }
        }
        Ok(())
    }

    fn render_route(
        &self,
        route: Option<&Directive>,
        lines: &mut Vec<String>,
    ) -> Result<(), TranslateError> {
        let empty = Directive::new("route");
        let route = route.unwrap_or(&empty);
        if !route.data().is_empty() {
            return Err(TranslateError::StructureViolation(
                "route section accepts no data blocks".to_string(),
            ));
        }

        // First line: print level, then method/basisset joined with '/'.
        let mut first = String::from("#");
        if let Some(print) = route.keyword(KEY_PRINT) {
            first.push_str(&print.value);
        }
        let method = route.keyword(KEY_METHOD).map(|k| k.value.as_str());
        let basis = route.keyword(KEY_BASIS).map(|k| k.value.as_str());
        match (method, basis) {
            (Some(m), Some(b)) => {
                first.push(' ');
                first.push_str(m);
                first.push('/');
                first.push_str(b);
            }
            (Some(m), None) => {
                first.push(' ');
                first.push_str(m);
            }
            (None, Some(b)) => {
                first.push(' ');
                first.push_str(b);
            }
            (None, None) => {}
        }
        lines.push(first);

        for kw in route.keywords() {
            let name = kw.name.to_ascii_lowercase();
            if name == KEY_PRINT || name == KEY_METHOD || name == KEY_BASIS {
                continue;
            }
            if kw.loud {
                lines.push(format!("# {}={}", kw.name, kw.value));
            } else {
                lines.push(format!("# {}", kw.value));
            }
        }

        // One nesting level: # name=(k1,k2,...). Deeper nesting does not
        // exist in the grammar.
        for sub in route.subdirectives() {
            if !sub.subdirectives().is_empty() || !sub.data().is_empty() {
                return Err(TranslateError::StructureViolation(format!(
                    "route subdirective '{}' must hold keywords only",
                    sub.name
                )));
            }
            let inner: Vec<String> = sub
                .keywords()
                .iter()
                .map(|kw| {
                    if kw.loud {
                        format!("{}={}", kw.name, kw.value)
                    } else {
                        kw.value.clone()
                    }
                })
                .collect();
            lines.push(format!("# {}=({})", sub.name, inner.join(",")));
        }

        lines.push(String::new());
        Ok(())
    }

    fn render_title(
        &self,
        title: Option<&Directive>,
        lines: &mut Vec<String>,
    ) -> Result<(), TranslateError> {
        let text = match title {
            None => PLACEHOLDER_TITLE.to_string(),
            Some(title) => {
                if !title.data().is_empty() || !title.subdirectives().is_empty() {
                    return Err(TranslateError::StructureViolation(
                        "title section accepts a single keyword only".to_string(),
                    ));
                }
                match title.keywords() {
                    [] => PLACEHOLDER_TITLE.to_string(),
                    [kw] => kw.value.clone(),
                    more => {
                        return Err(TranslateError::StructureViolation(format!(
                            "title section holds {} keywords, expected at most 1",
                            more.len()
                        )))
                    }
                }
            }
        };
        lines.push(text);
        lines.push(String::new());
        Ok(())
    }

    fn render_molecule(
        &self,
        molecule: Option<&Directive>,
        lines: &mut Vec<String>,
    ) -> Result<(), TranslateError> {
        let Some(molecule) = molecule else {
            return Err(TranslateError::StructureViolation(
                "molecule section is required".to_string(),
            ));
        };
        if !molecule.subdirectives().is_empty() {
            return Err(TranslateError::StructureViolation(
                "molecule section accepts no subdirectives".to_string(),
            ));
        }
        let charge = molecule.keyword(KEY_CHARGE);
        let spin = molecule.keyword(KEY_SPIN);
        let (Some(charge), Some(spin)) = (charge, spin) else {
            return Err(TranslateError::StructureViolation(
                "molecule section requires charge and spin keywords".to_string(),
            ));
        };
        if molecule.keywords().len() != 2 {
            return Err(TranslateError::StructureViolation(format!(
                "molecule section holds {} keywords, expected exactly charge and spin",
                molecule.keywords().len()
            )));
        }
        lines.push(format!("{} {}", charge.value, spin.value));

        for block in molecule.data() {
            match &block.payload {
                Payload::Geometry(structure) => render_geometry(structure, lines),
                Payload::InternalCoords(table) => render_internal_coords(table, lines),
                _ => {
                    return Err(TranslateError::StructureViolation(format!(
                        "molecule data block '{}' must be a geometry or internal coordinates",
                        block.name
                    )))
                }
            }
        }

        lines.push(String::new());
        Ok(())
    }

    fn render_options(
        &self,
        options: Option<&Directive>,
        lines: &mut Vec<String>,
    ) -> Result<(), TranslateError> {
        let Some(options) = options else { return Ok(()) };

        // The grammar is position-sensitive between option blocks:
        // ModRedundant constraints come before a custom basis, which comes
        // before solvent input, then everything else in insertion order.
        let priority = |name: &str| -> usize {
            if name.eq_ignore_ascii_case(DATA_CONSTRAINTS) {
                0
            } else if name.eq_ignore_ascii_case(DATA_BASIS) {
                1
            } else if name.eq_ignore_ascii_case(DATA_SOLVENT) {
                2
            } else {
                3
            }
        };
        let mut ordered: Vec<&crate::directive::DirectiveData> = options.data().iter().collect();
        ordered.sort_by_key(|d| priority(&d.name));

        for block in ordered {
            match &block.payload {
                Payload::Constraints(constraints) => {
                    render_constraints(constraints, lines)?;
                }
                Payload::Basis(basis) => {
                    self.render_basis(basis, lines);
                }
                Payload::Text(text) => {
                    for line in text.lines() {
                        lines.push(line.to_string());
                    }
                }
                Payload::Geometry(_) | Payload::InternalCoords(_) => {
                    return Err(TranslateError::StructureViolation(format!(
                        "options data block '{}' cannot hold a geometry payload",
                        block.name
                    )))
                }
            }
            lines.push(String::new());
        }

        for kw in options.keywords() {
            if kw.loud {
                lines.push(format!("{}={}", kw.name, kw.value));
            } else {
                lines.push(kw.value.clone());
            }
            lines.push(String::new());
        }
        for sub in options.subdirectives() {
            if !sub.subdirectives().is_empty() || !sub.data().is_empty() {
                return Err(TranslateError::StructureViolation(format!(
                    "options subdirective '{}' must hold keywords only",
                    sub.name
                )));
            }
            let inner: Vec<String> = sub
                .keywords()
                .iter()
                .map(|kw| {
                    if kw.loud {
                        format!("{}={}", kw.name, kw.value)
                    } else {
                        kw.value.clone()
                    }
                })
                .collect();
            lines.push(format!("{}=({})", sub.name, inner.join(",")));
            lines.push(String::new());
        }

        lines.push(String::new());
        Ok(())
    }

    fn render_basis(&self, basis: &BasisSet, lines: &mut Vec<String>) {
        for section in &basis.sections {
            lines.push(format!("{} 0", center_label(&section.center)));
            for shell in &section.shells {
                lines.push(format!(
                    "{} {} {:.2}",
                    shell.shell_type,
                    shell.primitives.len(),
                    shell.scale
                ));
                for p in &shell.primitives {
                    lines.push(format!(
                        "{:>22}{:>22}",
                        sci(p.exponent, self.basis_precision),
                        sci(p.coefficient, self.basis_precision)
                    ));
                }
            }
            lines.push("****".to_string());
        }
        if !basis.ecp_sections.is_empty() {
            lines.push(String::new());
            for ecp in &basis.ecp_sections {
                lines.push(format!("{} 0", center_label(&ecp.center)));
                lines.push(format!(
                    "{} {} {}",
                    ecp.name, ecp.max_angular_momentum, ecp.core_electrons
                ));
                for channel in &ecp.channels {
                    lines.push(channel.label.clone());
                    lines.push(format!("{}", channel.terms.len()));
                    for term in &channel.terms {
                        lines.push(format!(
                            "{} {} {}",
                            term.power,
                            sci(term.exponent, self.basis_precision),
                            sci(term.coefficient, self.basis_precision)
                        ));
                    }
                }
            }
        }
    }
}

fn center_label(center: &BasisCenter) -> String {
    match center {
        BasisCenter::Element(element) => element.clone(),
        BasisCenter::AtomIndex(index) => format!("{}", index + 1),
    }
}

fn render_geometry(structure: &Structure, lines: &mut Vec<String>) {
    for atom in structure.atoms() {
        lines.push(format!(
            "{:<4}{:>12.6}{:>14.6}{:>14.6}",
            atom.label, atom.position[0], atom.position[1], atom.position[2]
        ));
    }
}

fn coord_value(value: &CoordValue) -> String {
    match value {
        CoordValue::Literal(v) => format!("{:.6}", v),
        CoordValue::Symbol(name) => name.clone(),
    }
}

fn render_internal_coords(table: &InternalCoordTable, lines: &mut Vec<String>) {
    for entry in &table.entries {
        let mut line = entry.element.clone();
        for reference in [&entry.bond, &entry.angle, &entry.dihedral]
            .into_iter()
            .flatten()
        {
            line.push_str(&format!(" {} {}", reference.0 + 1, coord_value(&reference.1)));
        }
        lines.push(line);
    }
    if table.has_symbols() {
        let variables: Vec<_> = table.variables.iter().filter(|v| !v.constant).collect();
        let constants: Vec<_> = table.variables.iter().filter(|v| v.constant).collect();
        if !variables.is_empty() {
            lines.push("Variables:".to_string());
            for v in variables {
                lines.push(format!(" {} {:.6}", v.name, v.value));
            }
        }
        if !constants.is_empty() {
            lines.push("Constants:".to_string());
            for v in constants {
                lines.push(format!(" {} {:.6}", v.name, v.value));
            }
        }
    }
}

fn render_constraints(
    constraints: &[GeometryConstraint],
    lines: &mut Vec<String>,
) -> Result<(), TranslateError> {
    for constraint in constraints {
        let (code, expected) = match constraint.kind {
            ConstraintKind::Distance => ("B", 2),
            ConstraintKind::Angle => ("A", 3),
            ConstraintKind::Dihedral => ("D", 4),
            ConstraintKind::Frozen => ("X", 1),
        };
        if constraint.atoms.len() != expected {
            return Err(TranslateError::StructureViolation(format!(
                "{} constraint references {} atoms, expected {}",
                code,
                constraint.atoms.len(),
                expected
            )));
        }
        let mut line = code.to_string();
        for &atom in &constraint.atoms {
            line.push_str(&format!(" {}", atom + 1));
        }
        if let Some(annotation) = &constraint.annotation {
            line.push(' ');
            line.push_str(annotation);
        }
        lines.push(line);
    }
    Ok(())
}

/// Scientific notation with a normalized mantissa in [1, 10) and a fixed,
/// signed two-digit exponent, matching basis-set file conventions.
fn sci(value: f64, precision: usize) -> String {
    if value == 0.0 {
        return format!("{:.*}E+00", precision, 0.0);
    }
    let mut exponent = value.abs().log10().floor() as i32;
    let mut mantissa = value / 10f64.powi(exponent);
    // Rounding at the requested precision can carry the mantissa to 10.
    let scale = 10f64.powi(precision as i32);
    if (mantissa.abs() * scale).round() >= 10.0 * scale {
        mantissa /= 10.0;
        exponent += 1;
    }
    format!("{:.*}E{:+03}", precision, mantissa, exponent)
}
