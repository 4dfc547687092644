//! Integration tests for the failure-driven restart engine, exercising the
//! mutation and the rendering of the mutated job together.

use qcflow::directive::{DirectiveData, Job, Keyword, Payload, Section, Step};
use qcflow::gaussian::{KEY_BASIS, KEY_CHARGE, KEY_METHOD, KEY_PRINT, KEY_SPIN};
use qcflow::restart::{restart, restart_texts, ErrorClassification, RestartError};
use qcflow::structure::{Atom, Structure};
use std::collections::HashMap;

fn optimization_step(title: &str) -> Step {
    let mut step = Step::default();
    step.section_mut(Section::Link)
        .add_keyword(Keyword::loud("chk", "run1.chk"));
    step.section_mut(Section::Link)
        .add_keyword(Keyword::loud("mem", "4000MB"));

    let route = step.section_mut(Section::Route);
    route.add_keyword(Keyword::loud(KEY_PRINT, "P"));
    route.add_keyword(Keyword::loud(KEY_METHOD, "B3LYP"));
    route.add_keyword(Keyword::loud(KEY_BASIS, "6-31G*"));

    step.section_mut(Section::Title)
        .add_keyword(Keyword::mute("title", title));
    step.section_mut(Section::Molecule)
        .add_keyword(Keyword::loud(KEY_CHARGE, "0"));
    step.section_mut(Section::Molecule)
        .add_keyword(Keyword::loud(KEY_SPIN, "1"));
    step
}

fn job_with_geometry() -> Job {
    let mut first = optimization_step("optimization");
    let mut geometry = Structure::new("water");
    geometry.add_atom(Atom::new("O", 0.0, 0.0, 0.117));
    geometry.add_atom(Atom::new("H", 0.0, 0.757, -0.468));
    geometry.add_atom(Atom::new("H", 0.0, -0.757, -0.468));
    first.section_mut(Section::Molecule).add_data(DirectiveData {
        name: "geometry".to_string(),
        payload: Payload::Geometry(geometry),
    });

    Job {
        steps: vec![
            first,
            optimization_step("frequencies"),
            optimization_step("single point"),
        ],
    }
}

fn classification(action: &str, params: &[(&str, &str)]) -> ErrorClassification {
    ErrorClassification {
        error_name: "scf_convergence".to_string(),
        action: action.to_string(),
        params: params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
    }
}

#[test]
fn test_skip_step_scenario() {
    let job = job_with_geometry();
    let new_job = restart(&job, 1, &classification("skip_step", &[]), "run2").unwrap();

    assert_eq!(new_job.steps.len(), 1);
    let step = &new_job.steps[0];
    let title = &step.section(Section::Title).unwrap().keywords()[0].value;
    assert_eq!(title, "single point");
    let link = step.section(Section::Link).unwrap();
    assert_eq!(link.keyword("chk").map(|k| k.value.as_str()), Some("run2.chk"));
    let molecule = step.section(Section::Molecule).unwrap();
    assert_eq!(molecule.keyword(KEY_CHARGE).map(|k| k.value.as_str()), Some("0"));
    assert_eq!(molecule.keyword(KEY_SPIN).map(|k| k.value.as_str()), Some("1"));
}

#[test]
fn test_memory_reduction_scenario() {
    let job = job_with_geometry();
    let fix = classification("adjust_resources", &[("memory_reduction", "1GB")]);
    let new_job = restart(&job, 0, &fix, "run2").unwrap();

    assert_eq!(new_job.steps.len(), 3);
    for step in &new_job.steps {
        let link = step.section(Section::Link).unwrap();
        assert_eq!(link.keyword("mem").map(|k| k.value.as_str()), Some("3000MB"));
        assert_eq!(link.keyword("chk").map(|k| k.value.as_str()), Some("run2.chk"));
    }
}

#[test]
fn test_restarted_job_renders_and_round_trips() {
    let job = job_with_geometry();
    let fix = classification("adjust_resources", &[("memory_reduction", "500MB")]);
    let new_job = restart(&job, 0, &fix, "run2").unwrap();

    let (input, definition) = restart_texts(&new_job).unwrap();
    assert!(input.contains("%mem=3500MB"));
    assert!(input.contains("#P B3LYP/6-31G*"));
    assert!(input.contains("--Link1--"));

    let reparsed = Job::from_json(&definition).unwrap();
    assert_eq!(reparsed.steps.len(), new_job.steps.len());
    let (again, _) = restart_texts(&reparsed).unwrap();
    assert_eq!(input, again);
}

#[test]
fn test_restart_from_middle_reinjects_geometry() {
    let job = job_with_geometry();
    // Step 1 has no geometry of its own and no geom/guess route keyword.
    let new_job = restart(&job, 1, &classification("adjust_route", &[("overlays", "route:scf=xqc")]), "run2")
        .unwrap();

    let molecule = new_job.steps[0].section(Section::Molecule).unwrap();
    let has_geometry = molecule
        .data()
        .iter()
        .any(|b| matches!(b.payload, Payload::Geometry(_)));
    assert!(has_geometry);
}

#[test]
fn test_route_overlay_only_touches_first_step() {
    let job = job_with_geometry();
    let fix = classification("adjust_route", &[("overlays", "route:scf=xqc")]);
    let new_job = restart(&job, 0, &fix, "run2").unwrap();

    let first_route = new_job.steps[0].section(Section::Route).unwrap();
    assert_eq!(first_route.keyword("scf").map(|k| k.value.as_str()), Some("xqc"));
    let second_route = new_job.steps[1].section(Section::Route).unwrap();
    assert!(second_route.keyword("scf").is_none());
}

#[test]
fn test_prepended_recovery_job_comes_first() {
    let job = job_with_geometry();
    let recovery = Job {
        steps: vec![optimization_step("stability analysis")],
    };
    let embedded = recovery.to_json().unwrap();
    let fix = classification(
        "prepend_steps",
        &[("new_steps", embedded.as_str()), ("keep", "link mem")],
    );
    let new_job = restart(&job, 2, &fix, "run2").unwrap();

    assert_eq!(new_job.steps.len(), 2);
    let title = &new_job.steps[0].section(Section::Title).unwrap().keywords()[0].value;
    assert_eq!(title, "stability analysis");
    let title = &new_job.steps[1].section(Section::Title).unwrap().keywords()[0].value;
    assert_eq!(title, "single point");
}

#[test]
fn test_unknown_action_never_guesses() {
    let job = job_with_geometry();
    let err = restart(&job, 0, &classification("do_something", &[]), "run2");
    assert!(matches!(err, Err(RestartError::UnknownFixAction(_))));
}

#[test]
fn test_bad_unit_is_fatal() {
    let job = job_with_geometry();
    let fix = classification("adjust_resources", &[("memory_reduction", "1TiB")]);
    let err = restart(&job, 0, &fix, "run2");
    assert!(matches!(err, Err(RestartError::UnitParse(_))));
}
