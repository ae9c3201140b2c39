use std::fs;
use std::process::ExitCode;

use clap::Parser;
use policy_syntax::{atom, var, Atom, Formula, Literal, Program, Rule, Term};
use policy_engine::runtime::{Runtime, CLASSIFY_THEORY};

/// Load a policy file of ground facts/rules and run a query against
/// CLASSIFY_THEORY, the way spec.md's `load_file`/`select` pair is meant
/// to be driven from a shell. Not a general Datalog parser: each line is
/// either `table(arg, ...)` or `head(arg, ...) :- lit, not lit, ...`, with
/// bareword arguments read as strings and numeric ones as integers.
#[derive(Parser)]
#[command(about = "Query a policy file")]
struct Cli {
    /// Path to a policy file, one fact or rule per line.
    policy: String,

    /// Query atom, e.g. `reaches(1, y)`.
    query: String,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let text = match fs::read_to_string(&cli.policy) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("reading {}: {}", cli.policy, err);
            return ExitCode::FAILURE;
        }
    };

    let mut formulas = vec![];
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_formula(line) {
            Ok(formula) => formulas.push(formula),
            Err(err) => {
                eprintln!("{}:{}: {}", cli.policy, lineno + 1, err);
                return ExitCode::FAILURE;
            }
        }
    }

    let mut runtime = Runtime::new();
    if let Err(err) = runtime.load_program(Program::new(formulas), CLASSIFY_THEORY) {
        eprintln!("{}: {}", cli.policy, err);
        return ExitCode::FAILURE;
    }

    let query = match parse_atom(cli.query.trim()) {
        Ok(atom) => atom,
        Err(err) => {
            eprintln!("query: {}", err);
            return ExitCode::FAILURE;
        }
    };

    match runtime.select(&query, CLASSIFY_THEORY) {
        Ok(results) => {
            for result in results {
                println!("{:?}", result);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn parse_formula(line: &str) -> Result<Formula, String> {
    match line.split_once(":-") {
        Some((head, body)) => {
            let head = parse_atom(head.trim())?;
            let body = body
                .split(',')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(parse_literal)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Rule::new(head, body).into())
        }
        None => Ok(parse_atom(line.trim())?.into()),
    }
}

fn parse_literal(text: &str) -> Result<Literal, String> {
    match text.strip_prefix("not ") {
        Some(rest) => Ok(Literal::negative(parse_atom(rest.trim())?)),
        None => Ok(Literal::positive(parse_atom(text)?)),
    }
}

fn parse_atom(text: &str) -> Result<Atom, String> {
    let (table, rest) = text
        .split_once('(')
        .ok_or_else(|| format!("expected `table(arg, ...)`, got `{}`", text))?;
    let rest = rest
        .strip_suffix(')')
        .ok_or_else(|| format!("unterminated argument list in `{}`", text))?;
    let arguments = if rest.trim().is_empty() {
        vec![]
    } else {
        rest.split(',').map(str::trim).map(parse_term).collect()
    };
    Ok(atom(table.trim(), arguments))
}

fn parse_term(text: &str) -> Term {
    if let Ok(n) = text.parse::<i64>() {
        return n.into();
    }
    if let Ok(f) = text.parse::<f64>() {
        return f.into();
    }
    if text.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
        return var(text);
    }
    text.trim_matches('"').into()
}
