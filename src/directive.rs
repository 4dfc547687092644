//! Software-agnostic job representation: directives, steps, jobs.
//!
//! A [`Job`] is an ordered list of [`Step`]s; each step holds up to five
//! top-level [`Directive`]s keyed by section role (link, route, title,
//! molecule, options). A directive is a named tree node carrying ordered
//! [`Keyword`]s, ordered [`DirectiveData`] payload blocks, and ordered child
//! directives.
//!
//! This module is a grammar-agnostic data holder: insertion order is
//! preserved everywhere because it is semantically meaningful to the
//! serializers, and per-section cardinality or type constraints are enforced
//! at serialization time (see the `gaussian` module), not here.
//!
//! Jobs round-trip through JSON; that text form is both the on-disk job
//! definition and the embedded-job encoding consumed by the restart engine.

use crate::structure::Structure;
use serde::{Deserialize, Serialize};

/// A named key/value pair inside a directive.
///
/// The loudness flag controls rendering: a "loud" keyword prints its name
/// and value, a "mute" keyword prints the value only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyword {
    /// Keyword name, used for lookup and (when loud) rendering.
    pub name: String,
    /// Whether the name is rendered alongside the value.
    pub loud: bool,
    /// Keyword value, rendered verbatim.
    pub value: String,
}

impl Keyword {
    /// A keyword rendered as `name=value`.
    pub fn loud(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            loud: true,
            value: value.to_string(),
        }
    }

    /// A keyword rendered as its value only.
    pub fn mute(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            loud: false,
            value: value.to_string(),
        }
    }
}

/// A symbolic or literal value inside an internal-coordinate entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoordValue {
    /// A plain numeric value.
    Literal(f64),
    /// A named variable, resolved by the table's variable list.
    Symbol(String),
}

/// A named variable backing symbolic internal coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordVariable {
    /// Variable name referenced by [`CoordValue::Symbol`].
    pub name: String,
    /// Current numeric value.
    pub value: f64,
    /// Constants are listed separately from optimizable variables.
    pub constant: bool,
}

/// One internal-coordinate entry: an atom defined relative to up to three
/// previously defined atoms (bond, angle, dihedral). Atom references are
/// 0-based here and rendered 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalCoord {
    /// Element symbol of the defined atom.
    pub element: String,
    /// Bond reference atom and length.
    pub bond: Option<(usize, CoordValue)>,
    /// Angle reference atom and value.
    pub angle: Option<(usize, CoordValue)>,
    /// Dihedral reference atom and value.
    pub dihedral: Option<(usize, CoordValue)>,
}

/// An internal-coordinates table, optionally with named variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InternalCoordTable {
    /// Entries in definition order.
    pub entries: Vec<InternalCoord>,
    /// Named variables referenced by symbolic entries.
    pub variables: Vec<CoordVariable>,
}

impl InternalCoordTable {
    /// True when any entry references a named variable, which switches the
    /// serializer to the three-part (coordinates / Variables / Constants)
    /// block form.
    pub fn has_symbols(&self) -> bool {
        self.entries.iter().any(|e| {
            [&e.bond, &e.angle, &e.dihedral]
                .into_iter()
                .flatten()
                .any(|(_, v)| matches!(v, CoordValue::Symbol(_)))
        })
    }
}

/// Kind of a geometric constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Interatomic distance (two atoms).
    Distance,
    /// Angle (three atoms).
    Angle,
    /// Dihedral or improper torsion (four atoms).
    Dihedral,
    /// A single frozen atom.
    Frozen,
}

/// One geometric constraint over atom indices (0-based here, rendered
/// 1-based).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryConstraint {
    /// What is constrained.
    pub kind: ConstraintKind,
    /// Atom indices, count fixed by the kind.
    pub atoms: Vec<usize>,
    /// Optional suffix annotation appended to the rendered line.
    pub annotation: Option<String>,
}

/// Where a custom basis/ECP block applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BasisCenter {
    /// All atoms of an element.
    Element(String),
    /// A single atom by index (0-based here, rendered 1-based).
    AtomIndex(usize),
}

/// A single Gaussian primitive: exponent and contraction coefficient.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Primitive {
    /// Orbital exponent.
    pub exponent: f64,
    /// Contraction coefficient.
    pub coefficient: f64,
}

/// A contracted shell of primitives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shell {
    /// Shell type label ("S", "P", "SP", "D", ...).
    pub shell_type: String,
    /// Scale factor, almost always 1.0.
    pub scale: f64,
    /// Primitives in contraction order.
    pub primitives: Vec<Primitive>,
}

/// Basis functions for one center.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasisSection {
    /// The center the shells apply to.
    pub center: BasisCenter,
    /// Shells in declaration order.
    pub shells: Vec<Shell>,
}

/// One term of an effective-core-potential channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EcpTerm {
    /// Power of r.
    pub power: i32,
    /// Exponent.
    pub exponent: f64,
    /// Coefficient.
    pub coefficient: f64,
}

/// One angular-momentum channel of an ECP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcpChannel {
    /// Channel label line (for example "d potential").
    pub label: String,
    /// Terms in declaration order.
    pub terms: Vec<EcpTerm>,
}

/// An effective-core-potential definition for one center.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcpSection {
    /// The center the potential applies to.
    pub center: BasisCenter,
    /// ECP name rendered on the header line.
    pub name: String,
    /// Maximum angular momentum of the potential.
    pub max_angular_momentum: u32,
    /// Number of core electrons replaced.
    pub core_electrons: u32,
    /// Channels in declaration order.
    pub channels: Vec<EcpChannel>,
}

/// A complete custom basis-set payload: per-center shell blocks plus
/// optional ECP blocks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasisSet {
    /// Basis sections in declaration order.
    pub sections: Vec<BasisSection>,
    /// ECP sections, rendered after a blank separator line.
    pub ecp_sections: Vec<EcpSection>,
}

/// Type-tagged payload of a [`DirectiveData`] block.
///
/// Serializers match exhaustively on the tag; a payload type that a given
/// section's grammar does not accept is a structural violation there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    /// Opaque text, rendered line by line.
    Text(String),
    /// A 3D structure, rendered as coordinate lines.
    Geometry(Structure),
    /// An internal-coordinates table.
    InternalCoords(InternalCoordTable),
    /// Geometric constraints.
    Constraints(Vec<GeometryConstraint>),
    /// A custom basis set with optional ECPs.
    Basis(BasisSet),
}

/// A named, type-tagged data block attached to a directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectiveData {
    /// Block name; serializers use it for ordering between blocks.
    pub name: String,
    /// The payload.
    pub payload: Payload,
}

/// A named tree node: ordered keywords, data blocks, and child directives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Directive {
    /// Directive name.
    pub name: String,
    keywords: Vec<Keyword>,
    data: Vec<DirectiveData>,
    subdirectives: Vec<Directive>,
}

impl Directive {
    /// Creates an empty directive.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            keywords: Vec::new(),
            data: Vec::new(),
            subdirectives: Vec::new(),
        }
    }

    /// Keywords in insertion order.
    pub fn keywords(&self) -> &[Keyword] {
        &self.keywords
    }

    /// Data blocks in insertion order.
    pub fn data(&self) -> &[DirectiveData] {
        &self.data
    }

    /// Child directives in insertion order.
    pub fn subdirectives(&self) -> &[Directive] {
        &self.subdirectives
    }

    /// Looks up a keyword by name (case-insensitive).
    pub fn keyword(&self, name: &str) -> Option<&Keyword> {
        self.keywords
            .iter()
            .find(|k| k.name.eq_ignore_ascii_case(name))
    }

    /// Appends a keyword, preserving insertion order.
    pub fn add_keyword(&mut self, keyword: Keyword) {
        self.keywords.push(keyword);
    }

    /// Replaces the keyword with the same name, or appends it.
    pub fn set_keyword(&mut self, keyword: Keyword) {
        match self
            .keywords
            .iter_mut()
            .find(|k| k.name.eq_ignore_ascii_case(&keyword.name))
        {
            Some(existing) => *existing = keyword,
            None => self.keywords.push(keyword),
        }
    }

    /// Looks up a data block by name (case-insensitive).
    pub fn data_block(&self, name: &str) -> Option<&DirectiveData> {
        self.data.iter().find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Appends a data block, preserving insertion order.
    pub fn add_data(&mut self, data: DirectiveData) {
        self.data.push(data);
    }

    /// Looks up a child directive by name (case-insensitive).
    pub fn subdirective(&self, name: &str) -> Option<&Directive> {
        self.subdirectives
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Appends a child directive, preserving insertion order.
    pub fn add_subdirective(&mut self, directive: Directive) {
        self.subdirectives.push(directive);
    }
}

/// Section role of a top-level directive within a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Section {
    /// Link/resource pre-section (checkpoint, memory, processors).
    Link,
    /// Route/options header.
    Route,
    /// Title/comment section.
    Title,
    /// Molecule specification (charge, spin, geometry).
    Molecule,
    /// Trailing options section (constraints, basis, solvent, ...).
    Options,
}

impl Section {
    /// All sections in their fixed serialization order.
    pub const ALL: [Section; 5] = [
        Section::Link,
        Section::Route,
        Section::Title,
        Section::Molecule,
        Section::Options,
    ];
}

/// One step of a multi-step job: top-level directives keyed by section role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Step {
    /// Link/resource section.
    pub link: Option<Directive>,
    /// Route section.
    pub route: Option<Directive>,
    /// Title section.
    pub title: Option<Directive>,
    /// Molecule specification section.
    pub molecule: Option<Directive>,
    /// Extra options section.
    pub options: Option<Directive>,
}

impl Step {
    /// The directive filling the given section, if any.
    pub fn section(&self, section: Section) -> Option<&Directive> {
        match section {
            Section::Link => self.link.as_ref(),
            Section::Route => self.route.as_ref(),
            Section::Title => self.title.as_ref(),
            Section::Molecule => self.molecule.as_ref(),
            Section::Options => self.options.as_ref(),
        }
    }

    /// Mutable access to the directive filling the given section, creating
    /// an empty one when absent.
    pub fn section_mut(&mut self, section: Section) -> &mut Directive {
        let (slot, name) = match section {
            Section::Link => (&mut self.link, "link"),
            Section::Route => (&mut self.route, "route"),
            Section::Title => (&mut self.title, "title"),
            Section::Molecule => (&mut self.molecule, "molecule"),
            Section::Options => (&mut self.options, "options"),
        };
        slot.get_or_insert_with(|| Directive::new(name))
    }
}

/// An ordered multi-step job.
///
/// Step order is meaningful: later steps may depend on artifacts
/// (wavefunction, checkpoint) produced by earlier ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Job {
    /// Steps in execution order.
    pub steps: Vec<Step>,
}

impl Job {
    /// Creates an empty job.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes the job to its round-trippable JSON text form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Reconstructs a job from its JSON text form.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_order_is_preserved() {
        let mut d = Directive::new("route");
        d.add_keyword(Keyword::loud("zeta", "1"));
        d.add_keyword(Keyword::loud("alpha", "2"));
        let names: Vec<&str> = d.keywords().iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_set_keyword_replaces_in_place() {
        let mut d = Directive::new("link");
        d.add_keyword(Keyword::loud("mem", "4000MB"));
        d.add_keyword(Keyword::loud("chk", "run.chk"));
        d.set_keyword(Keyword::loud("MEM", "3000MB"));
        assert_eq!(d.keywords().len(), 2);
        assert_eq!(d.keyword("mem").map(|k| k.value.as_str()), Some("3000MB"));
        assert_eq!(d.keywords()[0].name, "MEM");
    }

    #[test]
    fn test_internal_coord_table_symbol_detection() {
        let mut table = InternalCoordTable::default();
        table.entries.push(InternalCoord {
            element: "O".to_string(),
            bond: None,
            angle: None,
            dihedral: None,
        });
        table.entries.push(InternalCoord {
            element: "H".to_string(),
            bond: Some((0, CoordValue::Literal(0.96))),
            angle: None,
            dihedral: None,
        });
        assert!(!table.has_symbols());
        table.entries.push(InternalCoord {
            element: "H".to_string(),
            bond: Some((0, CoordValue::Symbol("roh".to_string()))),
            angle: Some((1, CoordValue::Literal(104.5))),
            dihedral: None,
        });
        assert!(table.has_symbols());
    }

    #[test]
    fn test_job_json_round_trip() {
        let mut step = Step::default();
        step.section_mut(Section::Link)
            .add_keyword(Keyword::loud("chk", "job.chk"));
        step.section_mut(Section::Molecule)
            .add_keyword(Keyword::loud("charge", "0"));
        let job = Job { steps: vec![step] };

        let text = job.to_json().unwrap();
        let back = Job::from_json(&text).unwrap();
        assert_eq!(back.steps.len(), 1);
        let link = back.steps[0].section(Section::Link).unwrap();
        assert_eq!(link.keyword("chk").map(|k| k.value.as_str()), Some("job.chk"));
    }
}
