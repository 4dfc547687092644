//! qcflow Command-Line Interface
//!
//! # Usage
//!
//! qcflow supports three commands:
//!
//! 1. **Alignment** (`qcflow align <reference.xyz> <structure.xyz>`):
//!    Superposes the second structure onto the first and reports the RMSD.
//!
//! 2. **Atom mapping** (`qcflow map <reference.xyz> <structure.xyz>`):
//!    Prints the best atom-index correspondence between the two structures.
//!
//! 3. **Input rendering** (`qcflow render <job.json>`):
//!    Translates a job definition into a Gaussian input file on stdout.

use qcflow::align::{align_geometries, best_atom_mapping, AlignOptions};
use qcflow::directive::Job;
use qcflow::gaussian::GaussianWriter;
use qcflow::io::read_xyz;
use std::env;
use std::fs;
use std::process;

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .target(env_logger::Target::Stdout)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        process::exit(1);
    }

    let command = args[1].as_str();
    let result = match command {
        "align" => run_align(&args),
        "map" => run_map(&args),
        "render" => run_render(&args),
        "--help" | "-h" => {
            print_usage(&args[0]);
            return;
        }
        _ => {
            eprintln!("Error: unknown command: {}", command);
            print_usage(&args[0]);
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run_align(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let [reference, structure] = two_files(args)?;
    let reference = read_xyz(&reference)?;
    let structure = read_xyz(&structure)?;
    let result = align_geometries(&reference, &structure, &AlignOptions::default())?;
    println!(
        "Aligned '{}' onto '{}' over {} atoms",
        result.aligned.title,
        result.reference.title,
        result.mapping.len()
    );
    println!("RMSD: {:.6}", result.rmsd);
    println!(
        "RMS deviation of intramolecular distances: {:.6}",
        result.rms_intramolecular
    );
    Ok(())
}

fn run_map(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let [reference, structure] = two_files(args)?;
    let reference = read_xyz(&reference)?;
    let structure = read_xyz(&structure)?;
    let mapping = best_atom_mapping(&reference, &structure)?;
    for (r, q) in &mapping {
        println!("{} -> {}", r, q);
    }
    Ok(())
}

fn run_render(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    if args.len() < 3 {
        return Err("render requires a job definition file".into());
    }
    let text = fs::read_to_string(&args[2])?;
    let job = Job::from_json(&text)?;
    let lines = GaussianWriter::default().render_job(&job)?;
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

fn two_files(args: &[String]) -> Result<[String; 2], Box<dyn std::error::Error>> {
    if args.len() < 4 {
        return Err(format!("{} requires two geometry files", args[1]).into());
    }
    Ok([args[2].clone(), args[3].clone()])
}

fn print_usage(program: &str) {
    println!("Usage:");
    println!("  {} align <reference.xyz> <structure.xyz>", program);
    println!("  {} map <reference.xyz> <structure.xyz>", program);
    println!("  {} render <job.json>", program);
}
