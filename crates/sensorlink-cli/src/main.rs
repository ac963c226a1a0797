//! # sensorlink CLI
//!
//! Command-line utilities for inspecting stanzas and checking values.

use anyhow::{bail, Context, Result};
use sensorlink_core::control::ParameterType;
use sensorlink_core::field::FieldType;
use sensorlink_core::syntax::validate;
use sensorlink_proto::{Element, Stanza};
use std::env;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "inspect" => {
            if args.len() < 3 {
                eprintln!("Usage: sensorlink inspect <file>");
                std::process::exit(1);
            }
            inspect(&args[2])?;
        }
        "check" => {
            if args.len() < 4 {
                eprintln!("Usage: sensorlink check <type-code> <value>");
                std::process::exit(1);
            }
            check(&args[2], &args[3])?;
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn inspect(path: &str) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {path}"))?;
    let element = Element::from_cbor(&bytes).context("Not a CBOR element tree")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&element).context("Failed to render element")?
    );

    match Stanza::from_element(&element) {
        Ok(stanza) => {
            println!("kind: {}", stanza.envelope.kind());
            if let Some(id) = stanza.envelope.request_id() {
                println!("request: {id}");
            }
        }
        Err(err) => println!("invalid stanza: {err}"),
    }
    Ok(())
}

fn check(code: &str, value: &str) -> Result<()> {
    let (kind, syntax) = if let Ok(field) = FieldType::from_code(code) {
        (format!("field {field}"), field.syntax())
    } else if let Ok(parameter) = ParameterType::from_code(code) {
        (format!("parameter {parameter}"), parameter.syntax())
    } else {
        bail!("Unknown type code '{code}'");
    };

    validate(&kind, syntax, value)?;
    println!("ok: {value} is a valid {kind}");
    Ok(())
}

fn print_help() {
    println!(
        r#"sensorlink CLI

USAGE:
    sensorlink <COMMAND> [OPTIONS]

COMMANDS:
    inspect <file>         Decode a CBOR stanza and print its element tree
    check <code> <value>   Validate a value for a field or parameter type code
    help                   Show this help message

EXAMPLES:
    sensorlink inspect request.cbor
    sensorlink check q 21.5
    sensorlink check cl FF00FF
"#
    );
}
