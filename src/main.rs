//! Thin CLI shell (§4.N, §6): flag wiring, file-system walking and the
//! top-level scan -> translate -> (optional) distill -> pack loop. No core
//! logic lives here.

#[macro_use]
extern crate tracesynth;

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use structopt::StructOpt;

use tracesynth::config::{DistillConfig, DistillKind, ImplicitDeps};
use tracesynth::corpus;
use tracesynth::distill::{self, DistillInput, SourceProgram};
use tracesynth::error::{FatalKind, Result};
use tracesynth::log::LogLevel;
use tracesynth::prog::Prog;
use tracesynth::scanner;
use tracesynth::seed::Seeds;
use tracesynth::target::{StaticTarget, Target};
use tracesynth::textlexer::SimpleTextLexer;
use tracesynth::trace_tree::TraceTree;
use tracesynth::translate::translate_trace;
use tracesynth::variant::{static_selectors, VariantResolver};

/// Per-program exec-buffer budget a real syscall-description library would
/// enforce on `serialize_for_exec` output (§6 "Program output").
const MAX_SERIALIZED_SIZE: usize = 128 * 1024;

#[derive(Debug, StructOpt)]
#[structopt(name = "tracesynth", about = "Kernel syscall trace to fuzzing corpus")]
struct Cli {
    /// Parse a single trace file.
    #[structopt(long, parse(from_os_str))]
    file: Option<PathBuf>,

    /// Parse every file in a directory of traces.
    #[structopt(long, parse(from_os_str))]
    dir: Option<PathBuf>,

    /// Enable distillation, using the JSON config at this path.
    #[structopt(long, parse(from_os_str))]
    distill: Option<PathBuf>,
}

fn main() {
    let cli = Cli::from_args();
    if let Err(e) = run(&cli) {
        log!(LogLevel::LogError, "{}", e);
        process::exit(1);
    }
}

fn trace_paths(cli: &Cli) -> Result<Vec<PathBuf>> {
    if let Some(file) = &cli.file {
        return Ok(vec![file.clone()]);
    }
    if let Some(dir) = &cli.dir {
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(|source| FatalKind::Io {
            path: dir.clone(),
            source,
        })? {
            let entry = entry.map_err(|source| FatalKind::Io {
                path: dir.clone(),
                source,
            })?;
            if entry.path().is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();
        return Ok(paths);
    }
    Err(FatalKind::LexerFailure {
        line: 0,
        message: "one of --file or --dir is required".to_string(),
    }
    .into())
}

/// Scans and translates every per-PID program out of one trace file.
fn translate_file(path: &Path, target: &dyn Target, resolver: &VariantResolver) -> Result<Vec<tracesynth::translate::TranslateOutput>> {
    let text = fs::read_to_string(path).map_err(|source| FatalKind::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut lexer = SimpleTextLexer::new();
    let calls = scanner::scan(&text, &mut lexer)?;

    let mut tree = TraceTree::new();
    for call in calls {
        tree.add(call);
    }

    let mut outputs = Vec::new();
    let mut pids: Vec<_> = tree.per_pid_trace.keys().copied().collect();
    pids.sort();
    for pid in pids {
        let traced = tree.calls_for(pid);
        if traced.is_empty() {
            continue;
        }
        // §5: a fatal translation error aborts only the current per-PID
        // program; the enclosing loop drops it and moves on to the next.
        match translate_trace(traced, target, resolver) {
            Ok(output) => outputs.push(output),
            Err(e) => {
                log!(
                    LogLevel::LogWarn,
                    "dropping program for pid {} in {}: {}",
                    pid,
                    path.display(),
                    e
                );
                continue;
            }
        }
    }
    Ok(outputs)
}

/// Validates and size-checks one program before it's handed to the corpus
/// packer (§6: "any program whose `serialize_for_exec` exceeds the
/// library's per-program size budget is dropped with a stderr notice").
fn serialize_for_exec(prog: &Prog, target: &dyn Target) -> std::result::Result<Vec<u8>, String> {
    target.validate(prog)?;
    let bytes = format!("{:#?}\n", prog).into_bytes();
    if bytes.len() > MAX_SERIALIZED_SIZE {
        return Err(format!(
            "serialised program exceeds the {}-byte exec buffer budget ({} bytes)",
            MAX_SERIALIZED_SIZE,
            bytes.len()
        ));
    }
    Ok(bytes)
}

fn write_accepted(out_dir: &Path, index: usize, prog: &Prog, target: &dyn Target) -> Result<()> {
    match serialize_for_exec(prog, target) {
        Ok(bytes) => {
            let path = out_dir.join(format!("prog-{:06}", index));
            fs::write(&path, bytes).map_err(|source| FatalKind::Io { path, source })?;
            Ok(())
        }
        Err(message) => {
            log!(LogLevel::LogWarn, "dropping program {}: {}", index, message);
            Ok(())
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let target = StaticTarget::new();
    let resolver = VariantResolver::build(&target, &static_selectors());

    let paths = trace_paths(cli)?;
    let out_dir = PathBuf::from("deserialized");
    fs::create_dir_all(&out_dir).map_err(|source| FatalKind::Io {
        path: out_dir.clone(),
        source,
    })?;

    let mut programs = Vec::new();
    let mut seeds = Seeds::new();
    for path in &paths {
        log!(LogLevel::LogInfo, "scanning {}", path.display());
        let outputs = match translate_file(path, &target, &resolver) {
            Ok(o) => o,
            Err(e) if !e.is_fatal() => {
                log!(LogLevel::LogWarn, "dropping trace {}: {}", path.display(), e);
                continue;
            }
            Err(e) => return Err(e),
        };
        for output in outputs {
            let prog_id = programs.len();
            seeds.extract_from(prog_id, &output);
            programs.push(SourceProgram {
                id: prog_id,
                prog: output.prog,
                memtrack: output.memtrack,
            });
        }
    }

    log!(LogLevel::LogInfo, "{} programs, {} seeds", programs.len(), seeds.len());

    let accepted: Vec<Prog> = match &cli.distill {
        None => programs.into_iter().map(|p| p.prog).collect(),
        Some(config_path) => {
            let config = DistillConfig::load(config_path)?;
            let implicit_deps = match &config.implicit_dependencies {
                Some(path) => ImplicitDeps::load(path)?,
                None => ImplicitDeps::default(),
            };
            let input = DistillInput { programs, seeds };
            let out = match config.kind {
                DistillKind::Explicit => distill::explicit::distill(&input, &target),
                DistillKind::Implicit => distill::implicit::distill(&input, &target, &implicit_deps),
                DistillKind::Weak => distill::weak::distill(&input, &target),
                DistillKind::Trace => distill::trace_distill::distill(&input, &target),
                DistillKind::Random => distill::random::distill(&input, &target),
            };
            if let Some(stats_path) = &config.stats {
                let summary = format!("seeds={}\ndistilled_programs={}\n", input.seeds.len(), out.len());
                fs::write(stats_path, summary).map_err(|source| FatalKind::Io {
                    path: stats_path.clone(),
                    source,
                })?;
            }
            out
        }
    };

    for (index, prog) in accepted.iter().enumerate() {
        write_accepted(&out_dir, index, prog, &target)?;
    }

    let db_path = PathBuf::from("corpus.db");
    let count = corpus::pack(&out_dir, &db_path)?;
    log!(LogLevel::LogInfo, "packed {} entries into {}", count, db_path.display());

    Ok(())
}
