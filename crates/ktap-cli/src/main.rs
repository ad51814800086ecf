//! `ktap` — script compiler front door
//!
//! Only argument parsing, initialisation (logger, colour) and delegation to
//! `ktap_cli` (lib) happen here.

#![forbid(unsafe_code)]

use std::{path::PathBuf, process::ExitCode};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use ktap_core::Prototype;

use ktap_cli as cli;

// ──────────────────────────── CLI (clap) ────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "ktap", version, about = "ktap script compiler: list, dump or load bytecode chunks", long_about = None)]
struct Opt {
    /// Write the compiled chunk to FILE and exit
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Compile the given program text instead of a file
    #[arg(short = 'e', long = "program", value_name = "SCRIPT")]
    program: Option<String>,

    /// Only trace process PID
    #[arg(short = 'p', long = "pid", value_name = "PID")]
    pid: Option<i32>,

    /// Only trace cpu CPU
    #[arg(short = 'C', long = "cpu", value_name = "CPU")]
    cpu: Option<i32>,

    /// Show a timestamp for each event
    #[arg(short = 'T', long = "time")]
    time: bool,

    /// List bytecode instead of running it
    #[arg(short = 'b', long = "list-bc")]
    list_bc: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Only report errors
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Colour status lines (when the `color` feature is built)
    #[arg(long = "color", value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,

    /// Script or compiled chunk
    file: Option<PathBuf>,

    /// Arguments passed to the script
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

// ──────────────────────────── Options → task ────────────────────────────

fn task_from_opt(opt: Opt) -> Result<cli::CompileTask> {
    let mut args = opt.args;
    let input = match (opt.program, opt.file) {
        (Some(text), first) => {
            // with -e every positional belongs to the script
            if let Some(first) = first {
                args.insert(0, first.to_string_lossy().into_owned());
            }
            cli::Input::Inline(text)
        },
        (None, Some(path)) => cli::Input::Path(path),
        (None, None) => bail!("no script given (pass a FILE or -e SCRIPT)"),
    };

    Ok(cli::CompileTask {
        input,
        output: opt.output,
        list_bc: opt.list_bc,
        args,
        trace_pid: opt.pid,
        trace_cpu: opt.cpu,
        print_timestamp: opt.time,
        verbose: opt.verbose,
    })
}

// ──────────────────────────── Hooks ────────────────────────────

/// Front end used by the binary: the listing assembler.
fn parse_listing(source: &[u8], chunk_name: &str) -> Result<Prototype> {
    let text = std::str::from_utf8(source).context("source is not UTF-8")?;
    Ok(ktap_core::asm::assemble(text, chunk_name)?)
}

fn make_hooks() -> cli::Hooks {
    // The kernel-side loader lives outside this workspace.
    cli::Hooks { parse: Some(parse_listing), load: None }
}

// ──────────────────────────── Logger / verbosity ────────────────────────────

fn init_telemetry(verbose: u8, quiet: bool) {
    #[cfg(feature = "trace")]
    {
        let level = if quiet {
            "error"
        } else {
            match verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            }
        };
        std::env::set_var("RUST_LOG", std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string()));
        cli::init_logger();
    }
    #[cfg(not(feature = "trace"))]
    {
        let _ = (verbose, quiet);
    }
}

fn init_color(choice: ColorChoice) {
    match choice {
        ColorChoice::Auto => {},
        ColorChoice::Always => {
            std::env::set_var("CLICOLOR_FORCE", "1");
            std::env::remove_var("NO_COLOR");
        },
        ColorChoice::Never => {
            std::env::set_var("NO_COLOR", "1");
            std::env::remove_var("CLICOLOR_FORCE");
        },
    }
}

// ──────────────────────────── main ────────────────────────────

fn main() -> ExitCode {
    match real_main() {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        },
    }
}

fn real_main() -> Result<i32> {
    let opt = Opt::parse();

    init_color(opt.color);
    init_telemetry(opt.verbose, opt.quiet);

    let task = task_from_opt(opt)?;
    cli::execute(&task, make_hooks())
}

// ──────────────────────────── Tests ────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn task(argv: &[&str]) -> Result<cli::CompileTask> {
        task_from_opt(Opt::try_parse_from(std::iter::once("ktap").chain(argv.iter().copied()))?)
    }

    #[test]
    fn inline_program_takes_every_positional_as_argument() {
        let t = task(&["-e", "RETURN 0 1", "a", "b"]).unwrap();
        assert_eq!(t.input, cli::Input::Inline("RETURN 0 1".into()));
        assert_eq!(t.args, vec!["a".to_string(), "b".to_string()]);

        let cli::Outcome::Handoff(h) = cli::CompileDriver::new(make_hooks()).run(&t).unwrap() else {
            panic!("expected a hand-off")
        };
        assert_eq!(h.argv, vec!["oneline", "a", "b"]);
    }

    #[test]
    fn file_then_script_arguments() {
        let t = task(&["-b", "-p", "7", "s.kp", "x", "-y"]).unwrap();
        assert_eq!(t.input, cli::Input::Path(PathBuf::from("s.kp")));
        assert_eq!(t.args, vec!["x".to_string(), "-y".to_string()]);
        assert!(t.list_bc);
        assert_eq!(t.trace_pid, Some(7));
    }

    #[test]
    fn no_script_is_an_error() {
        let err = task(&["-b"]).unwrap_err();
        assert!(err.to_string().contains("no script given"));
    }
}
