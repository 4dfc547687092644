//! Failure-driven job mutation: rewrites a multi-step job after a classified
//! failure.
//!
//! The entry point is a state machine keyed by a fix-action identifier. The
//! input state is always "most recent job definition, index of the failed
//! step, error classification"; the output is a new, complete job ready for
//! re-submission. Four transitions exist:
//!
//! - adjust resources: rerun from the failed step, optionally shrinking the
//!   memory allocation,
//! - adjust route: rerun from the failed step with route/title overlays on
//!   the first retained step,
//! - prepend steps: insert a caller-supplied recovery job before the failed
//!   step, copying selected values forward from the failing step,
//! - skip step: drop the failed step and continue with the rest.
//!
//! Every transition finishes with the same bookkeeping: the checkpoint
//! pointer is rewritten to the new base name on every step, charge and spin
//! are propagated from the first retained step, and the original starting
//! geometry is re-injected when no step would otherwise provide one.
//!
//! Unrecognized fix actions, keep targets, or memory units are fatal; the
//! mutator never guesses a remediation it cannot fully interpret.

use crate::directive::{Directive, Job, Keyword, Payload, Section, Step};
use crate::gaussian::{GaussianWriter, TranslateError, KEY_CHARGE, KEY_SPIN};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

lazy_static! {
    static ref MEMORY_RE: Regex = Regex::new(r"(?i)^\s*(\d+)\s*(MB|GB)\s*$").unwrap();
    static ref COUNTER_RE: Regex = Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)=(\d+)$").unwrap();
}

/// Link-section keyword holding the checkpoint file name.
pub const KEY_CHECKPOINT: &str = "chk";
/// Link-section keyword holding the memory allocation.
pub const KEY_MEMORY: &str = "mem";

/// A classified failure: error name, fix action, and action parameters.
///
/// Produced by an external output evaluator; parameter values may embed
/// multi-line sub-definitions (overlay lists, an entire extra job in its
/// JSON text form).
#[derive(Debug, Clone)]
pub struct ErrorClassification {
    /// Name of the recognized error category.
    pub error_name: String,
    /// Fix-action identifier, parsed by [`FixAction::parse`].
    pub action: String,
    /// String-keyed fix-action parameters.
    pub params: HashMap<String, String>,
}

/// The four remediations the mutator knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixAction {
    /// Rerun from the failed step with changed resource settings.
    AdjustResources,
    /// Rerun from the failed step with route/title overlays.
    AdjustRoute,
    /// Prepend caller-supplied recovery steps before the failed step.
    PrependSteps,
    /// Drop the failed step and continue with the remainder.
    SkipStep,
}

impl FixAction {
    /// Parses a fix-action identifier (case-insensitive).
    pub fn parse(name: &str) -> Result<Self, RestartError> {
        match name.to_ascii_lowercase().as_str() {
            "adjust_resources" => Ok(FixAction::AdjustResources),
            "adjust_route" => Ok(FixAction::AdjustRoute),
            "prepend_steps" => Ok(FixAction::PrependSteps),
            "skip_step" => Ok(FixAction::SkipStep),
            other => Err(RestartError::UnknownFixAction(other.to_string())),
        }
    }
}

/// Error type for job mutation.
#[derive(Error, Debug)]
pub enum RestartError {
    /// The classification named a fix action this mutator does not know.
    #[error("unknown fix action '{0}'")]
    UnknownFixAction(String),
    /// A keep entry targeted a section outside link/route/molecule.
    #[error("unsupported keep target '{0}'; expected link, route, or molecule")]
    UnsupportedKeepTarget(String),
    /// A memory quantity did not match `<number><MB|GB>`.
    #[error("cannot parse memory quantity '{0}'; expected <number><MB|GB>")]
    UnitParse(String),
    /// The requested memory reduction leaves nothing to run with.
    #[error("memory reduction of {reduction}MB exhausts the available {available}MB")]
    MemoryExhausted {
        /// Memory available before the reduction, in MB.
        available: i64,
        /// Requested reduction, in MB.
        reduction: i64,
    },
    /// The failed-step index lies outside the job.
    #[error("failed step index {index} out of range for a job with {steps} steps")]
    BadStepIndex {
        /// Offending step index.
        index: usize,
        /// Number of steps in the job.
        steps: usize,
    },
    /// A fix action required a parameter the classification did not carry.
    #[error("fix action requires missing parameter '{0}'")]
    MissingParameter(String),
    /// The embedded extra job could not be parsed.
    #[error("cannot parse embedded job: {0}")]
    EmbeddedJob(String),
    /// An overlay line did not carry a recognized section prefix.
    #[error("malformed overlay line '{0}'; expected route:... or title:...")]
    MalformedOverlay(String),
    /// Skipping the failed step left no steps to run.
    #[error("skipping failed step {0} leaves an empty job")]
    EmptySkip(usize),
    /// Rendering the mutated job failed.
    #[error(transparent)]
    Translate(#[from] TranslateError),
    /// Serializing the mutated job to its text form failed.
    #[error("cannot serialize job definition: {0}")]
    Serialize(String),
}

/// Builds a new job remediating the classified failure of `job`'s step
/// `failed_step`. `new_base` is the base name of the re-submission's output
/// files; the checkpoint pointer of every step is rewritten to it.
pub fn restart(
    job: &Job,
    failed_step: usize,
    classification: &ErrorClassification,
    new_base: &str,
) -> Result<Job, RestartError> {
    if failed_step >= job.steps.len() {
        return Err(RestartError::BadStepIndex {
            index: failed_step,
            steps: job.steps.len(),
        });
    }
    let action = FixAction::parse(&classification.action)?;
    log::info!(
        "restarting after '{}' at step {}: applying {:?}",
        classification.error_name,
        failed_step,
        action
    );

    let mut new_job = match action {
        FixAction::AdjustResources => adjust_resources(job, failed_step, classification)?,
        FixAction::AdjustRoute => adjust_route(job, failed_step, classification)?,
        FixAction::PrependSteps => prepend_steps(job, failed_step, classification)?,
        FixAction::SkipStep => skip_step(job, failed_step)?,
    };

    update_checkpoints(&mut new_job, new_base);
    propagate_charge_spin(&mut new_job);
    reinject_geometry(job, &mut new_job);
    Ok(new_job)
}

/// Renders a mutated job into its two external text forms: the Gaussian
/// input file and the round-trippable job-definition JSON.
pub fn restart_texts(job: &Job) -> Result<(String, String), RestartError> {
    let writer = GaussianWriter::default();
    let input = writer.render_job(job)?.join("\n");
    let definition = job
        .to_json()
        .map_err(|e| RestartError::Serialize(e.to_string()))?;
    Ok((input, definition))
}

fn adjust_resources(
    job: &Job,
    failed_step: usize,
    classification: &ErrorClassification,
) -> Result<Job, RestartError> {
    let mut new_job = Job {
        steps: job.steps[failed_step..].to_vec(),
    };
    if let Some(reduction) = classification.params.get("memory_reduction") {
        let reduction_mb = parse_memory_mb(reduction)?;
        for step in &mut new_job.steps {
            reduce_memory(step, reduction_mb)?;
        }
    }
    Ok(new_job)
}

fn adjust_route(
    job: &Job,
    failed_step: usize,
    classification: &ErrorClassification,
) -> Result<Job, RestartError> {
    let mut new_job = Job {
        steps: job.steps[failed_step..].to_vec(),
    };
    let overlays = classification
        .params
        .get("overlays")
        .ok_or_else(|| RestartError::MissingParameter("overlays".to_string()))?;

    let first = &mut new_job.steps[0];
    for line in overlays.lines().filter(|l| !l.trim().is_empty()) {
        if let Some(rest) = line.strip_prefix("route:") {
            let keyword = match rest.split_once('=') {
                Some((name, value)) => Keyword::loud(name, value),
                None => Keyword::mute(rest, rest),
            };
            first.section_mut(Section::Route).set_keyword(keyword);
        } else if let Some(rest) = line.strip_prefix("title:") {
            // Replace the whole title directive: matching by keyword name
            // would append alongside a differently-named existing keyword
            // and break the one-keyword title grammar.
            let mut title = Directive::new("title");
            title.add_keyword(Keyword::mute("title", rest));
            first.title = Some(title);
        } else {
            return Err(RestartError::MalformedOverlay(line.to_string()));
        }
    }
    increment_title_counters(first);
    Ok(new_job)
}

fn prepend_steps(
    job: &Job,
    failed_step: usize,
    classification: &ErrorClassification,
) -> Result<Job, RestartError> {
    let embedded = classification
        .params
        .get("new_steps")
        .ok_or_else(|| RestartError::MissingParameter("new_steps".to_string()))?;
    let extra = Job::from_json(embedded).map_err(|e| RestartError::EmbeddedJob(e.to_string()))?;

    let mut inserted = extra.steps;
    if let Some(keep) = classification.params.get("keep") {
        let failed = &job.steps[failed_step];
        for line in keep.lines().filter(|l| !l.trim().is_empty()) {
            apply_keep(failed, &mut inserted, line)?;
        }
    }

    let mut steps = inserted;
    steps.extend_from_slice(&job.steps[failed_step..]);
    Ok(Job { steps })
}

fn skip_step(job: &Job, failed_step: usize) -> Result<Job, RestartError> {
    let steps = job.steps[failed_step + 1..].to_vec();
    if steps.is_empty() {
        return Err(RestartError::EmptySkip(failed_step));
    }
    Ok(Job { steps })
}

/// Copies one `section keyword` value from the failing step onto every
/// inserted step. A missing keyword is a warning; a section outside
/// link/route/molecule is fatal.
fn apply_keep(failed: &Step, inserted: &mut [Step], line: &str) -> Result<(), RestartError> {
    let mut parts = line.split_whitespace();
    let (Some(section_name), Some(key)) = (parts.next(), parts.next()) else {
        return Err(RestartError::UnsupportedKeepTarget(line.to_string()));
    };
    let section = match section_name.to_ascii_lowercase().as_str() {
        "link" => Section::Link,
        "route" => Section::Route,
        "molecule" => Section::Molecule,
        other => return Err(RestartError::UnsupportedKeepTarget(other.to_string())),
    };
    let Some(keyword) = failed
        .section(section)
        .and_then(|d| d.keyword(key))
        .cloned()
    else {
        log::warn!(
            "keep target '{} {}' not present in the failing step; skipping",
            section_name,
            key
        );
        return Ok(());
    };
    for step in inserted {
        step.section_mut(section).set_keyword(keyword.clone());
    }
    Ok(())
}

/// Parses `<number><MB|GB>` into MB. Gaussian treats these units as
/// decimal, so 1GB is 1000MB.
fn parse_memory_mb(text: &str) -> Result<i64, RestartError> {
    let captures = MEMORY_RE
        .captures(text)
        .ok_or_else(|| RestartError::UnitParse(text.to_string()))?;
    let amount: i64 = captures[1]
        .parse()
        .map_err(|_| RestartError::UnitParse(text.to_string()))?;
    let scale = if captures[2].eq_ignore_ascii_case("GB") {
        1000
    } else {
        1
    };
    Ok(amount * scale)
}

fn reduce_memory(step: &mut Step, reduction_mb: i64) -> Result<(), RestartError> {
    let Some(current) = step
        .section(Section::Link)
        .and_then(|d| d.keyword(KEY_MEMORY))
        .map(|k| k.value.clone())
    else {
        log::warn!("step carries no memory keyword; leaving resources unchanged");
        return Ok(());
    };
    let available = parse_memory_mb(&current)?;
    let remaining = available - reduction_mb;
    if remaining <= 0 {
        return Err(RestartError::MemoryExhausted {
            available,
            reduction: reduction_mb,
        });
    }
    step.section_mut(Section::Link)
        .set_keyword(Keyword::loud(KEY_MEMORY, &format!("{}MB", remaining)));
    Ok(())
}

/// Increments every `name=number` token in the step's title, preserving all
/// other tokens verbatim. Restart attempts are counted this way in the
/// title line.
fn increment_title_counters(step: &mut Step) {
    let Some(title) = step.title.as_mut() else { return };
    let Some(keyword) = title.keywords().first().cloned() else {
        return;
    };
    let updated: Vec<String> = keyword
        .value
        .split_whitespace()
        .map(|token| match COUNTER_RE.captures(token) {
            Some(captures) => match captures[2].parse::<u64>() {
                Ok(n) => format!("{}={}", &captures[1], n + 1),
                Err(_) => token.to_string(),
            },
            None => token.to_string(),
        })
        .collect();
    let mut keyword = keyword;
    keyword.value = updated.join(" ");
    title.set_keyword(keyword);
}

/// Points every step's checkpoint at the new output base name.
fn update_checkpoints(job: &mut Job, new_base: &str) {
    let value = format!("{}.chk", new_base);
    for step in &mut job.steps {
        step.section_mut(Section::Link)
            .set_keyword(Keyword::loud(KEY_CHECKPOINT, &value));
    }
}

/// Propagates charge and spin from the first retained step to all steps.
fn propagate_charge_spin(job: &mut Job) {
    let Some(first) = job.steps.first() else { return };
    let Some(molecule) = first.section(Section::Molecule) else {
        return;
    };
    let charge = molecule.keyword(KEY_CHARGE).cloned();
    let spin = molecule.keyword(KEY_SPIN).cloned();
    for step in &mut job.steps[1..] {
        let molecule = step.section_mut(Section::Molecule);
        if let Some(charge) = &charge {
            molecule.set_keyword(charge.clone());
        }
        if let Some(spin) = &spin {
            molecule.set_keyword(spin.clone());
        }
    }
}

/// Re-injects the original starting geometry into the new first step when
/// its route names no prior wavefunction/geometry source and its molecule
/// section carries no geometry of its own.
fn reinject_geometry(original: &Job, new_job: &mut Job) {
    let Some(first) = new_job.steps.first_mut() else { return };
    if route_references_prior_data(first.route.as_ref()) {
        return;
    }
    if has_geometry_payload(first.molecule.as_ref()) {
        return;
    }
    let Some(geometry) = original
        .steps
        .iter()
        .flat_map(|s| s.molecule.iter())
        .flat_map(|d| d.data().iter())
        .find(|d| matches!(d.payload, Payload::Geometry(_)))
        .cloned()
    else {
        return;
    };
    log::debug!("re-injecting starting geometry into the first restart step");
    first.section_mut(Section::Molecule).add_data(geometry);
}

fn route_references_prior_data(route: Option<&Directive>) -> bool {
    let Some(route) = route else { return false };
    let names = route
        .keywords()
        .iter()
        .map(|k| k.name.as_str())
        .chain(route.subdirectives().iter().map(|d| d.name.as_str()));
    for name in names {
        let name = name.to_ascii_lowercase();
        if name.contains("geom") || name.contains("guess") {
            return true;
        }
    }
    false
}

fn has_geometry_payload(molecule: Option<&Directive>) -> bool {
    molecule.is_some_and(|d| {
        d.data()
            .iter()
            .any(|b| matches!(b.payload, Payload::Geometry(_)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::DirectiveData;
    use crate::structure::{Atom, Structure};

    fn step(title: &str, charge: &str, spin: &str) -> Step {
        let mut step = Step::default();
        step.section_mut(Section::Link)
            .add_keyword(Keyword::loud(KEY_MEMORY, "4000MB"));
        step.section_mut(Section::Link)
            .add_keyword(Keyword::loud(KEY_CHECKPOINT, "old.chk"));
        step.section_mut(Section::Route)
            .add_keyword(Keyword::loud("method", "B3LYP"));
        step.section_mut(Section::Title)
            .add_keyword(Keyword::mute("title", title));
        step.section_mut(Section::Molecule)
            .add_keyword(Keyword::loud(KEY_CHARGE, charge));
        step.section_mut(Section::Molecule)
            .add_keyword(Keyword::loud(KEY_SPIN, spin));
        step
    }

    fn three_step_job() -> Job {
        Job {
            steps: vec![
                step("step one", "0", "1"),
                step("step two", "0", "1"),
                step("step three", "-1", "2"),
            ],
        }
    }

    fn classification(action: &str, params: &[(&str, &str)]) -> ErrorClassification {
        ErrorClassification {
            error_name: "test_error".to_string(),
            action: action.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_unknown_fix_action_is_fatal() {
        let job = three_step_job();
        let err = restart(&job, 0, &classification("reticulate", &[]), "run2");
        assert!(matches!(err, Err(RestartError::UnknownFixAction(_))));
    }

    #[test]
    fn test_bad_step_index() {
        let job = three_step_job();
        let err = restart(&job, 5, &classification("skip_step", &[]), "run2");
        assert!(matches!(
            err,
            Err(RestartError::BadStepIndex { index: 5, steps: 3 })
        ));
    }

    #[test]
    fn test_skip_step_keeps_only_later_steps() {
        let job = three_step_job();
        let new_job = restart(&job, 1, &classification("skip_step", &[]), "run2").unwrap();
        assert_eq!(new_job.steps.len(), 1);

        let kept = &new_job.steps[0];
        let title = kept.section(Section::Title).unwrap().keywords()[0]
            .value
            .clone();
        assert_eq!(title, "step three");
        let link = kept.section(Section::Link).unwrap();
        assert_eq!(
            link.keyword(KEY_CHECKPOINT).map(|k| k.value.as_str()),
            Some("run2.chk")
        );
        let molecule = kept.section(Section::Molecule).unwrap();
        assert_eq!(molecule.keyword(KEY_CHARGE).map(|k| k.value.as_str()), Some("-1"));
        assert_eq!(molecule.keyword(KEY_SPIN).map(|k| k.value.as_str()), Some("2"));
    }

    #[test]
    fn test_skip_last_step_is_fatal() {
        let job = three_step_job();
        let err = restart(&job, 2, &classification("skip_step", &[]), "run2");
        assert!(matches!(err, Err(RestartError::EmptySkip(2))));
    }

    #[test]
    fn test_memory_reduction_applies_to_every_step() {
        let job = three_step_job();
        let fix = classification("adjust_resources", &[("memory_reduction", "1GB")]);
        let new_job = restart(&job, 0, &fix, "run2").unwrap();
        assert_eq!(new_job.steps.len(), 3);
        for step in &new_job.steps {
            let link = step.section(Section::Link).unwrap();
            assert_eq!(link.keyword(KEY_MEMORY).map(|k| k.value.as_str()), Some("3000MB"));
        }
    }

    #[test]
    fn test_memory_exhaustion_is_fatal() {
        let job = three_step_job();
        let fix = classification("adjust_resources", &[("memory_reduction", "4GB")]);
        let err = restart(&job, 0, &fix, "run2");
        assert!(matches!(
            err,
            Err(RestartError::MemoryExhausted {
                available: 4000,
                reduction: 4000
            })
        ));
    }

    #[test]
    fn test_unknown_memory_unit_is_fatal() {
        assert!(matches!(
            parse_memory_mb("12TB"),
            Err(RestartError::UnitParse(_))
        ));
        assert_eq!(parse_memory_mb("2gb").unwrap(), 2000);
        assert_eq!(parse_memory_mb(" 512 MB ").unwrap(), 512);
    }

    #[test]
    fn test_route_overlay_and_title_counter() {
        let mut job = three_step_job();
        job.steps[1]
            .section_mut(Section::Title)
            .set_keyword(Keyword::mute("title", "restart=1 scf fix"));
        let fix = classification(
            "adjust_route",
            &[("overlays", "route:scf=xqc\ntitle:restart=1 scf fix")],
        );
        let new_job = restart(&job, 1, &fix, "run2").unwrap();

        let first = &new_job.steps[0];
        let route = first.section(Section::Route).unwrap();
        assert_eq!(route.keyword("scf").map(|k| k.value.as_str()), Some("xqc"));
        let title = first.section(Section::Title).unwrap().keywords()[0]
            .value
            .clone();
        assert_eq!(title, "restart=2 scf fix");
    }

    #[test]
    fn test_title_overlay_replaces_differently_named_keyword() {
        let mut job = three_step_job();
        let mut title = Directive::new("title");
        title.add_keyword(Keyword::mute("comment", "old comment attempt=1"));
        job.steps[1].title = Some(title);

        let fix = classification("adjust_route", &[("overlays", "title:fresh start attempt=1")]);
        let new_job = restart(&job, 1, &fix, "run2").unwrap();

        let title = new_job.steps[0].section(Section::Title).unwrap();
        assert_eq!(title.keywords().len(), 1);
        assert_eq!(title.keywords()[0].value, "fresh start attempt=2");
    }

    #[test]
    fn test_malformed_overlay_is_fatal() {
        let job = three_step_job();
        let fix = classification("adjust_route", &[("overlays", "banana")]);
        let err = restart(&job, 0, &fix, "run2");
        assert!(matches!(err, Err(RestartError::MalformedOverlay(_))));
    }

    #[test]
    fn test_prepend_steps_with_keep_list() {
        let job = three_step_job();
        let extra = Job {
            steps: vec![step("stabilize", "0", "1")],
        };
        let embedded = extra.to_json().unwrap();
        let fix = classification(
            "prepend_steps",
            &[
                ("new_steps", embedded.as_str()),
                ("keep", "route method\nlink mem\nroute missing_key"),
            ],
        );
        let new_job = restart(&job, 1, &fix, "run2").unwrap();
        assert_eq!(new_job.steps.len(), 3);

        let inserted = &new_job.steps[0];
        let route = inserted.section(Section::Route).unwrap();
        assert_eq!(route.keyword("method").map(|k| k.value.as_str()), Some("B3LYP"));
        let link = inserted.section(Section::Link).unwrap();
        assert_eq!(link.keyword(KEY_MEMORY).map(|k| k.value.as_str()), Some("4000MB"));
    }

    #[test]
    fn test_unsupported_keep_target_is_fatal() {
        let job = three_step_job();
        let extra = Job {
            steps: vec![step("stabilize", "0", "1")],
        };
        let embedded = extra.to_json().unwrap();
        let fix = classification(
            "prepend_steps",
            &[("new_steps", embedded.as_str()), ("keep", "options solvent")],
        );
        let err = restart(&job, 1, &fix, "run2");
        assert!(matches!(err, Err(RestartError::UnsupportedKeepTarget(_))));
    }

    #[test]
    fn test_geometry_reinjection() {
        let mut job = three_step_job();
        let mut geometry = Structure::new("start");
        geometry.add_atom(Atom::new("He", 0.0, 0.0, 0.0));
        job.steps[0]
            .section_mut(Section::Molecule)
            .add_data(DirectiveData {
                name: "geometry".to_string(),
                payload: Payload::Geometry(geometry),
            });

        // Restart from step 1, whose molecule carries no geometry and whose
        // route names no checkpoint source.
        let new_job = restart(&job, 1, &classification("skip_step", &[]), "run2").unwrap();
        let molecule = new_job.steps[0].section(Section::Molecule).unwrap();
        assert!(molecule
            .data()
            .iter()
            .any(|b| matches!(b.payload, Payload::Geometry(_))));
    }

    #[test]
    fn test_geometry_not_reinjected_when_route_reads_checkpoint() {
        let mut job = three_step_job();
        let mut geometry = Structure::new("start");
        geometry.add_atom(Atom::new("He", 0.0, 0.0, 0.0));
        job.steps[0]
            .section_mut(Section::Molecule)
            .add_data(DirectiveData {
                name: "geometry".to_string(),
                payload: Payload::Geometry(geometry),
            });
        for step in &mut job.steps {
            step.section_mut(Section::Route)
                .add_keyword(Keyword::mute("geom", "geom=check"));
        }

        let new_job = restart(&job, 1, &classification("skip_step", &[]), "run2").unwrap();
        let molecule = new_job.steps[0].section(Section::Molecule).unwrap();
        assert!(!molecule
            .data()
            .iter()
            .any(|b| matches!(b.payload, Payload::Geometry(_))));
    }
}
