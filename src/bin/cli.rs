#![cfg(not(tarpaulin_include))]

use checksheet::field::FieldType;
use checksheet::field_config::FieldConfigPatch;
use checksheet::formula::parse_reference;
use checksheet::loader::load_template_file;
use checksheet::session::FormSession;
use log::warn;
use std::env;
use std::time::Instant;

fn usage(program: &str) {
    eprintln!(
        "Usage: {} <template.html|template.zip> [S1F1=value ...] [--formula S1F3=SUM(S1F1:S1F2) ...] [--html]",
        program
    );
}

fn split_assignment(arg: &str) -> Option<(&str, &str)> {
    let eq = arg.find('=')?;
    Some((arg[..eq].trim(), arg[eq + 1..].trim()))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let start = Instant::now();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage(&args[0]);
        return Ok(());
    }

    let mut formulas = Vec::new();
    let mut assignments = Vec::new();
    let mut show_html = false;
    let mut rest = args[2..].iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--html" => show_html = true,
            "--formula" => match rest.next().and_then(|a| split_assignment(a)) {
                Some(pair) => formulas.push(pair),
                None => {
                    usage(&args[0]);
                    return Ok(());
                }
            },
            other => match split_assignment(other) {
                Some(pair) => assignments.push(pair),
                None => {
                    eprintln!("Error: expected <reference>=<value>, got '{}'", other);
                    return Ok(());
                }
            },
        }
    }

    let mut session = FormSession::new();
    let ticket = session.begin_load();
    session.complete_upload(ticket, load_template_file(&args[1]))?;

    // Formulas first so assigned values flow into them.
    for (target, formula) in formulas {
        let base_key = parse_reference(target)
            .and_then(|r| session.find_instance(r))
            .map(|d| d.base_key.clone());
        match base_key {
            Some(base_key) => session.save_field_config(
                &base_key,
                &FieldConfigPatch {
                    field_type: Some(FieldType::Calculation),
                    formula: Some(formula.to_string()),
                    ..FieldConfigPatch::default()
                },
            ),
            None => warn!("no field at {}", target),
        }
    }

    for (target, value) in assignments {
        let status = match parse_reference(target) {
            Some(reference) => match session.set_value_at(reference, value) {
                Ok(()) => "ok".to_string(),
                Err(e) => e.to_string(),
            },
            None => "invalid reference".to_string(),
        };
        println!("{}={} ({})", target, value, status);
    }

    println!("{:<8} {:<24} {:<12} {}", "REF", "LABEL", "TYPE", "VALUE");
    for field in session.resolved_fields() {
        let value = session
            .value(&field.instance_key)
            .map(|v| v.to_string())
            .unwrap_or_default();
        let value = match session.error(&field.instance_key) {
            Some(e) => format!("{} [{}]", value, e),
            None => value,
        };
        println!(
            "{:<8} {:<24} {:<12} {}",
            field.reference.to_string(),
            field.label,
            field.field_type.as_str(),
            value
        );
    }

    for miss in session.image_misses() {
        warn!("unresolved image '{}'", miss.src);
    }

    if show_html {
        println!("{}", session.render()?.to_html());
    }

    println!("Total elapsed time: {:.1} seconds", start.elapsed().as_secs_f64());
    Ok(())
}
