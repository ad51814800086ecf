//! ktap-cli — library side of the `ktap` binary
//!
//! Keeps argument parsing in `main.rs` and exposes the compile pipeline as a
//! testable API:
//! - `CompileDriver`: parse → {disassemble | dump → write file | VM hand-off}
//! - `Hooks`: seams for the script front end and the kernel-side loader
//! - I/O helpers (single-call atomic file write, status lines)
//! - Logging (`feature = "trace"`) and colours (`feature = "color"`) optional

#![deny(unused_must_use)]
#![forbid(unsafe_code)]

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use ktap_chunk::{dump, is_chunk, read_chunk, TrunkBuffer};
use ktap_core::{disasm::Disassembler, helpers::validate_proto, Prototype};
use log::{debug, info};

#[cfg(feature = "color")]
use owo_colors::OwoColorize;

/// Chunk name used for programs given with `-e`.
pub const ONELINE_CHUNK: &str = "oneline";

// ───────────────────────────── Public types ─────────────────────────────

/// Front end: source bytes and chunk name → root prototype.
pub type ParseFn = fn(source: &[u8], chunk_name: &str) -> Result<Prototype>;
/// Loader: hands a serialized chunk to the VM and returns its exit status.
pub type LoadFn = fn(handoff: &VmHandoff) -> Result<i32>;

/// Pluggable implementations.
#[derive(Clone, Copy, Default)]
pub struct Hooks {
    /// Script front end. Without it only existing chunk files are accepted.
    pub parse: Option<ParseFn>,
    /// VM loader. Without it the hand-off path is an error.
    pub load: Option<LoadFn>,
}

/// Where the program comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    /// Script or chunk file.
    Path(PathBuf),
    /// Program text given on the command line (`-e`).
    Inline(String),
}

/// One compiler invocation.
#[derive(Clone, Debug)]
pub struct CompileTask {
    /// Program source.
    pub input: Input,
    /// Write the chunk here and stop (`-o`).
    pub output: Option<PathBuf>,
    /// Print the listing instead of dumping (`-b`).
    pub list_bc: bool,
    /// Arguments forwarded to the script.
    pub args: Vec<String>,
    /// Trace only this process (`-p`).
    pub trace_pid: Option<i32>,
    /// Trace only this cpu (`-C`).
    pub trace_cpu: Option<i32>,
    /// Timestamp each event (`-T`).
    pub print_timestamp: bool,
    /// Verbosity passed down to the VM.
    pub verbose: u8,
}

impl CompileTask {
    /// Task compiling `input` with everything else left at its default.
    pub fn new(input: Input) -> Self {
        Self {
            input,
            output: None,
            list_bc: false,
            args: Vec::new(),
            trace_pid: None,
            trace_cpu: None,
            print_timestamp: false,
            verbose: 0,
        }
    }

    /// Chunk name: the path as given, or `oneline` for `-e`.
    pub fn chunk_name(&self) -> String {
        match &self.input {
            Input::Path(p) => p.to_string_lossy().into_owned(),
            Input::Inline(_) => ONELINE_CHUNK.to_owned(),
        }
    }
}

/// Everything the VM loader receives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmHandoff {
    /// Serialized chunk.
    pub trunk: Vec<u8>,
    /// Script arguments, `argv[0]` being the chunk name.
    pub argv: Vec<String>,
    /// Verbosity.
    pub verbose: u8,
    /// Process filter.
    pub trace_pid: Option<i32>,
    /// Cpu filter.
    pub trace_cpu: Option<i32>,
    /// Event timestamps.
    pub print_timestamp: bool,
}

/// Progress of a [`CompileDriver`]. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Nothing done yet.
    Idle,
    /// Root prototype obtained.
    Parsed,
    /// Listing produced (terminal).
    Disassembled,
    /// Chunk bytes produced.
    Serialized,
    /// Chunk written to the output file (terminal).
    Written,
}

/// Result of a successful run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Human-readable listing.
    Listed(String),
    /// Chunk persisted.
    Written {
        /// Destination file.
        path: PathBuf,
        /// Chunk size.
        bytes: usize,
    },
    /// Chunk kept in memory for the loader.
    Handoff(VmHandoff),
}

// ───────────────────────────── Driver ─────────────────────────────

/// Linear compile pipeline, usable once.
#[derive(Clone, Copy)]
pub struct CompileDriver {
    hooks: Hooks,
    stage: Stage,
}

impl CompileDriver {
    /// Driver using `hooks`.
    pub const fn new(hooks: Hooks) -> Self { Self { hooks, stage: Stage::Idle } }

    /// Current stage.
    pub const fn stage(&self) -> Stage { self.stage }

    fn advance(&mut self, next: Stage) {
        debug!("driver: {:?} -> {:?}", self.stage, next);
        self.stage = next;
    }

    /// Runs `task` to completion.
    pub fn run(&mut self, task: &CompileTask) -> Result<Outcome> {
        if self.stage != Stage::Idle {
            bail!("compile driver already used (stage {:?})", self.stage);
        }
        let name = task.chunk_name();
        let proto = self.parse(task, &name)?;
        validate_proto(&proto).with_context(|| format!("invalid bytecode for {name}"))?;
        self.advance(Stage::Parsed);

        if task.list_bc {
            let listing = Disassembler::new().render(&proto, 1);
            self.advance(Stage::Disassembled);
            return Ok(Outcome::Listed(listing));
        }

        let mut trunk = TrunkBuffer::new();
        let size = dump(&proto, &mut trunk).context("dumping chunk")?;
        debug!("chunk: {size} bytes, {} reallocations", trunk.reallocations());
        self.advance(Stage::Serialized);

        if let Some(path) = &task.output {
            write_bytes_atomic(path, trunk.as_slice())
                .with_context(|| format!("writing {}", display(path)))?;
            self.advance(Stage::Written);
            return Ok(Outcome::Written { path: path.clone(), bytes: size });
        }

        let mut argv = Vec::with_capacity(task.args.len() + 1);
        argv.push(name);
        argv.extend(task.args.iter().cloned());
        Ok(Outcome::Handoff(VmHandoff {
            trunk: trunk.into_vec(),
            argv,
            verbose: task.verbose,
            trace_pid: task.trace_pid,
            trace_cpu: task.trace_cpu,
            print_timestamp: task.print_timestamp,
        }))
    }

    fn parse(&self, task: &CompileTask, name: &str) -> Result<Prototype> {
        let source = match &task.input {
            Input::Path(p) => fs::read(p).with_context(|| format!("reading {}", display(p)))?,
            Input::Inline(text) => text.clone().into_bytes(),
        };
        if is_chunk(&source) {
            info!("{name}: already compiled, loading chunk");
            return read_chunk(&source).with_context(|| format!("loading chunk {name}"));
        }
        let parse = self.hooks.parse.ok_or_else(|| anyhow!("no script front end available (hook `parse` missing)"))?;
        parse(&source, name).with_context(|| format!("compiling {name}"))
    }
}

// ───────────────────────────── Entry point ─────────────────────────────

/// Initialises the logger according to the `trace` feature.
pub fn init_logger() {
    #[cfg(feature = "trace")]
    {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
            .format_timestamp_secs()
            .try_init();
    }
}

/// Runs `task` and reports the outcome. Returns the process exit code.
pub fn execute(task: &CompileTask, hooks: Hooks) -> Result<i32> {
    match CompileDriver::new(hooks).run(task)? {
        Outcome::Listed(text) => {
            let mut w = BufWriter::new(io::stdout().lock());
            w.write_all(text.as_bytes())?;
            w.flush()?;
            Ok(0)
        },
        Outcome::Written { path, bytes } => {
            status_ok("WRITE", &format!("{} ({bytes} bytes)", display(&path)));
            Ok(0)
        },
        Outcome::Handoff(handoff) => {
            let load = hooks
                .load
                .ok_or_else(|| anyhow!("no VM loader available; use -o to save the chunk or -b to list it"))?;
            status_info("LOAD", &format!("{} ({} bytes)", handoff.argv[0], handoff.trunk.len()));
            load(&handoff).context("running chunk")
        },
    }
}

// ───────────────────────────── I/O helpers ─────────────────────────────

/// Writes `bytes` to a sibling temp file in one call, then renames it over
/// `path`.
fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| anyhow!("output path has no parent: {}", display(path)))?;
    let tmp = unique_tmp_path(parent, path.file_name().unwrap_or_default());
    {
        let mut f = File::create(&tmp).with_context(|| format!("creating {}", display(&tmp)))?;
        f.write_all(bytes)?;
        f.flush()?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

fn unique_tmp_path(dir: &Path, base: &std::ffi::OsStr) -> PathBuf {
    let mut i = 0u32;
    loop {
        let candidate = dir.join(format!("{}.tmp{}", base.to_string_lossy(), i));
        if !candidate.exists() {
            return candidate;
        }
        i = i.wrapping_add(1);
    }
}

fn display(p: &Path) -> String { p.to_string_lossy().to_string() }

// ───────────────────────────── Status lines ─────────────────────────────

fn status_ok(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {}", tag.green().bold(), msg);
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{} {}", tag, msg);
    }
}

fn status_info(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {}", tag.blue().bold(), msg);
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{} {}", tag, msg);
    }
}

// ───────────────────────────── Tests ─────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ktap_core::asm::assemble;
    use pretty_assertions::assert_eq;

    const PROGRAM: &str = ".vararg\n.const \"print\"\nGETTABUP 0 0 k:0\nLOADK 1 \"hi\"\nCALL 0 2 1\nRETURN 0 1\n";

    fn parse_listing(src: &[u8], name: &str) -> Result<Prototype> {
        Ok(assemble(std::str::from_utf8(src)?, name)?)
    }

    fn hooks() -> Hooks { Hooks { parse: Some(parse_listing), load: None } }

    #[test]
    fn list_mode_stops_after_disassembly() {
        let mut task = CompileTask::new(Input::Inline(PROGRAM.into()));
        task.list_bc = true;
        let mut d = CompileDriver::new(hooks());
        let Outcome::Listed(text) = d.run(&task).unwrap() else { panic!("expected a listing") };
        assert_eq!(d.stage(), Stage::Disassembled);
        assert!(text.contains("function 0 [level 1]:"));
        assert!(text.contains("source: oneline"));
        assert!(text.contains("base + 1 <- \"hi\""));
    }

    #[test]
    fn output_file_receives_the_whole_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("prog.kpc");
        let mut task = CompileTask::new(Input::Inline(PROGRAM.into()));
        task.output = Some(out.clone());

        let mut d = CompileDriver::new(hooks());
        let outcome = d.run(&task).unwrap();
        assert_eq!(d.stage(), Stage::Written);

        let bytes = fs::read(&out).unwrap();
        assert_eq!(outcome, Outcome::Written { path: out, bytes: bytes.len() });
        let back = read_chunk(&bytes).unwrap();
        assert_eq!(back, assemble(PROGRAM, ONELINE_CHUNK).unwrap());
        // no temp file left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn handoff_forwards_argv_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("s.kp");
        fs::write(&script, PROGRAM).unwrap();

        let mut task = CompileTask::new(Input::Path(script.clone()));
        task.args = vec!["one".into(), "two".into()];
        task.trace_pid = Some(42);
        task.print_timestamp = true;

        let mut d = CompileDriver::new(hooks());
        let Outcome::Handoff(h) = d.run(&task).unwrap() else { panic!("expected a hand-off") };
        assert_eq!(d.stage(), Stage::Serialized);
        assert_eq!(h.argv, vec![script.to_string_lossy().into_owned(), "one".into(), "two".into()]);
        assert_eq!(h.trace_pid, Some(42));
        assert!(h.print_timestamp);
        assert!(is_chunk(&h.trunk));
    }

    #[test]
    fn compiled_chunk_can_be_listed_without_a_front_end() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("prog.kpc");
        let mut task = CompileTask::new(Input::Inline(PROGRAM.into()));
        task.output = Some(out.clone());
        CompileDriver::new(hooks()).run(&task).unwrap();

        let mut list = CompileTask::new(Input::Path(out));
        list.list_bc = true;
        let Outcome::Listed(text) = CompileDriver::new(Hooks::default()).run(&list).unwrap() else {
            panic!("expected a listing")
        };
        assert!(text.contains("GETTABUP"));
    }

    #[test]
    fn parse_failure_is_fatal() {
        let task = CompileTask::new(Input::Inline("BOGUS 1 2\n".into()));
        let mut d = CompileDriver::new(hooks());
        let err = d.run(&task).unwrap_err();
        assert!(format!("{err:#}").starts_with("compiling oneline"));
        assert_eq!(d.stage(), Stage::Idle);
    }

    #[test]
    fn driver_is_single_use() {
        let mut task = CompileTask::new(Input::Inline(PROGRAM.into()));
        task.list_bc = true;
        let mut d = CompileDriver::new(hooks());
        d.run(&task).unwrap();
        assert!(d.run(&task).is_err());
    }

    #[test]
    fn missing_loader_is_reported() {
        let task = CompileTask::new(Input::Inline(PROGRAM.into()));
        let err = execute(&task, hooks()).unwrap_err();
        assert!(err.to_string().contains("no VM loader"));
    }
}
