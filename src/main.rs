// ABOUTME: Front-end-only diagnostic CLI — lexes, parses, and compiles a
// ABOUTME: single source file; never constructs an execution loop

use clap::Parser as ClapParser;
use serde::Serialize;
use smile_core::diagnostics::Diagnostic;
use smile_core::lexer::Lexer;
use smile_core::parser::{ParseResult, Parser};
use smile_core::runtime::Runtime;
use smile_core::token::TokenKind;
use std::cell::RefCell;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

/// Lex, parse, and compile a single Smile source file, reporting diagnostics.
/// Performs no execution — there is no bytecode interpreter here.
#[derive(ClapParser, Debug)]
#[command(name = "smile-core")]
#[command(version)]
#[command(about = "Lexer/parser/compiler front end for the Smile language")]
struct Args {
    /// Source file to process
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Print the token stream only; skip parsing and compilation
    #[arg(long)]
    tokens_only: bool,

    /// Render diagnostics as a JSON array instead of plain text
    #[arg(long)]
    json: bool,

    /// Raise tracing verbosity to debug
    #[arg(long)]
    trace: bool,
}

#[derive(Serialize)]
struct JsonDiagnostic<'a> {
    severity: &'a str,
    position: Option<String>,
    message: &'a str,
}

fn severity_str(severity: smile_core::diagnostics::Severity) -> &'static str {
    use smile_core::diagnostics::Severity;
    match severity {
        Severity::Info => "info",
        Severity::Warning => "warning",
        Severity::Error => "error",
        Severity::Fatal => "fatal",
    }
}

fn print_diagnostics(diagnostics: &[Diagnostic], json: bool) {
    if json {
        let rendered: Vec<JsonDiagnostic> = diagnostics
            .iter()
            .map(|d| JsonDiagnostic {
                severity: severity_str(d.severity),
                position: d.position.as_ref().map(|p| p.to_string()),
                message: &d.message,
            })
            .collect();
        match serde_json::to_string_pretty(&rendered) {
            Ok(text) => println!("{text}"),
            Err(err) => eprintln!("error: failed to render diagnostics as JSON: {err}"),
        }
    } else {
        for d in diagnostics {
            eprintln!("{d}");
        }
    }
}

fn run(args: &Args) -> Result<bool, smile_core::error::SmileCoreError> {
    let source = std::fs::read(&args.file).map_err(|source| smile_core::error::SmileCoreError::Io {
        path: args.file.display().to_string(),
        source,
    })?;
    let filename: Rc<str> = Rc::from(args.file.display().to_string());

    let runtime = Runtime::new();
    let _session = runtime.begin_session();
    let symbols = Rc::new(RefCell::new(smile_core::symbol::SymbolTable::new()));
    let known = {
        let mut table = symbols.borrow_mut();
        smile_core::symbol::KnownSymbols::new(&mut table)
    };

    if args.tokens_only {
        let mut lexer = Lexer::new(&source, 0, source.len(), filename, 1, Rc::clone(&symbols));
        loop {
            let token = lexer.next();
            println!("{:?} {:?} {:?}", token.kind, token.position, token.text);
            if token.kind == TokenKind::Eoi || token.kind == TokenKind::Error {
                break;
            }
        }
        return Ok(true);
    }

    let lexer = Lexer::new(&source, 0, source.len(), filename, 1, Rc::clone(&symbols));
    let mut parser = Parser::new(lexer, Rc::clone(&symbols), &known);
    let parse_result = parser.parse_program();

    let ast = match parse_result {
        ParseResult::Expr(ast) => ast,
        ParseResult::Recovery => {
            print_diagnostics(parser.diagnostics.as_slice(), args.json);
            return Ok(false);
        }
        ParseResult::Error(message) => {
            eprintln!("error: {message}");
            return Ok(false);
        }
    };

    let mut compiler = smile_core::compiler::Compiler::new(&known);
    compiler.enter_function(0);
    let block = compiler.compile(&ast, false);
    let (segment, label_pcs) = block.linearize_with_labels();
    compiler.tables.resolve_till_branch_targets(&label_pcs);
    compiler.exit_function();

    let mut diagnostics: Vec<Diagnostic> = parser.diagnostics.as_slice().to_vec();
    diagnostics.extend(compiler.diagnostics.as_slice().iter().cloned());

    if !compiler.diagnostics.has_errors() {
        for (pc, instruction) in segment.instructions.iter().enumerate() {
            println!("{pc:>4}: {:?} {:?}", instruction.opcode, instruction.operand);
        }
    }

    let ok = diagnostics.iter().all(|d| !matches!(d.severity, smile_core::diagnostics::Severity::Error | smile_core::diagnostics::Severity::Fatal));
    print_diagnostics(&diagnostics, args.json);
    Ok(ok)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.trace { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
