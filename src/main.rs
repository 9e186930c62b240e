/*!
# Looptrace CLI

Command-line interface for recording, inspecting and reconstructing
compressed loop execution traces.
*/

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;

use looptrace::calls::StreamedCallTrace;
use looptrace::loops::StreamedLoopTrace;
use looptrace::parser::{CallTraceReader, CallTraceScan, LoopTraceReader, LoopTraceScan};
use looptrace::record::{RecorderConfig, TraceRecorder};
use looptrace::{LoopId, Symbol};

#[derive(Parser)]
#[command(
    name = "looptrace",
    version = env!("CARGO_PKG_VERSION"),
    about = "Inspect and reconstruct compressed loop execution traces"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short = 'f', long, default_value = "text")]
    format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize the loops, instructions and call sites in a trace
    Scan {
        /// Trace output directory
        dir: PathBuf,
    },

    /// Reconstruct the instruction stream of loop invocations
    Decompress {
        /// Trace output directory
        dir: PathBuf,

        /// Loop to reconstruct
        #[arg(long)]
        loop_id: LoopId,

        /// Single invocation to expand (all of them if omitted)
        #[arg(long)]
        invocation: Option<u64>,

        /// Write the streams to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Attribute an instruction's dynamic instances to call instances
    Calls {
        /// Trace output directory
        dir: PathBuf,

        /// Loop owning the invocation
        #[arg(long)]
        loop_id: LoopId,

        /// Sub-instruction to attribute
        #[arg(long)]
        instruction: Symbol,

        /// Loop invocation to inspect
        #[arg(long, default_value = "0")]
        invocation: u64,
    },

    /// Check that the trace files parse and agree with each other
    Selfcheck {
        /// Trace output directory
        dir: PathBuf,
    },

    /// Record a small synthetic trace into a directory
    Demo {
        /// Directory to write the trace into
        dir: PathBuf,

        /// Invocations to record
        #[arg(long, default_value = "16")]
        invocations: u64,

        /// Iterations per invocation
        #[arg(long, default_value = "8")]
        iterations: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("looptrace={log_level}"))
        .init();

    match cli.command {
        Commands::Scan { dir } => scan_command(dir, &cli.format),
        Commands::Decompress {
            dir,
            loop_id,
            invocation,
            output,
        } => decompress_command(dir, loop_id, invocation, output),
        Commands::Calls {
            dir,
            loop_id,
            instruction,
            invocation,
        } => calls_command(dir, loop_id, instruction, invocation),
        Commands::Selfcheck { dir } => selfcheck_command(dir),
        Commands::Demo {
            dir,
            invocations,
            iterations,
        } => demo_command(dir, invocations, iterations),
    }
}

#[derive(Serialize)]
struct ScanReport {
    scanned_at: String,
    loops: LoopTraceScan,
    calls: CallTraceScan,
}

fn scan_command(dir: PathBuf, format: &str) -> Result<()> {
    let start = Instant::now();
    let loops = LoopTraceReader::from_dir(&dir)
        .and_then(|reader| reader.scan())
        .with_context(|| format!("scanning loop trace in {}", dir.display()))?;
    let calls = CallTraceReader::from_dir(&dir)
        .and_then(|reader| reader.scan())
        .with_context(|| format!("scanning call trace in {}", dir.display()))?;

    if format == "json" {
        let report = ScanReport {
            scanned_at: Local::now().to_rfc3339(),
            loops,
            calls,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let term = Term::stdout();
    term.write_line(&format!(
        "{} {}",
        style("Trace scan").bold().cyan(),
        style(dir.display()).dim()
    ))?;
    term.write_line(&format!("   Dumps: {}", style(loops.dumps).green()))?;
    term.write_line("")?;

    term.write_line(&format!("{}", style("Loops").bold()))?;
    for (loop_id, summary) in &loops.loops {
        term.write_line(&format!(
            "   loop {}: {} invocations, {} entries, {} instructions",
            style(loop_id).cyan(),
            summary.num_invocations,
            summary.num_entries,
            summary.instructions.len()
        ))?;
    }

    term.write_line("")?;
    term.write_line(&format!(
        "{} ({} infos)",
        style("Call sites").bold(),
        calls.num_infos
    ))?;
    for (call_id, summary) in &calls.call_sites {
        term.write_line(&format!(
            "   site {}: {} instances, {} groups, {} sub-instructions",
            style(call_id).cyan(),
            summary.num_instances,
            summary.num_groups,
            summary.sub_instructions.len()
        ))?;
    }

    term.write_line("")?;
    term.write_line(&format!(
        "Scan time: {}",
        style(format!("{:.2?}", start.elapsed())).dim()
    ))?;
    Ok(())
}

fn decompress_command(
    dir: PathBuf,
    loop_id: LoopId,
    invocation: Option<u64>,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut sink: Box<dyn Write> = match &output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout().lock()),
    };

    if let Some(invocation) = invocation {
        let stream = looptrace::expand_invocation(&dir, loop_id, invocation)?;
        write_stream(&mut sink, invocation, &stream)?;
        return Ok(());
    }

    let mut reader = LoopTraceReader::from_dir(&dir)
        .with_context(|| format!("opening loop trace in {}", dir.display()))?;
    let mut expanded = 0u64;
    while let Some((id, mut entry)) = reader.next_entry()? {
        if id != loop_id {
            continue;
        }
        entry.group_mut().build_iteration_lut();
        let mut stream = Vec::new();
        entry.group().expand_into(&mut stream);
        for invocation in entry.invocations().instances() {
            write_stream(&mut sink, invocation, &stream)?;
            expanded += 1;
        }
    }
    sink.flush()?;
    info!(loop_id, expanded, "decompression finished");
    if expanded == 0 {
        anyhow::bail!("loop {loop_id} does not appear in the trace");
    }
    Ok(())
}

fn write_stream(sink: &mut dyn Write, invocation: u64, stream: &[Symbol]) -> Result<()> {
    write!(sink, "{invocation}:")?;
    for sym in stream {
        write!(sink, " {sym}")?;
    }
    writeln!(sink)?;
    Ok(())
}

fn calls_command(dir: PathBuf, loop_id: LoopId, instruction: Symbol, invocation: u64) -> Result<()> {
    let term = Term::stdout();

    let call_sites: BTreeSet<Symbol> = CallTraceReader::from_dir(&dir)
        .and_then(|reader| reader.scan())
        .with_context(|| format!("scanning call trace in {}", dir.display()))?
        .call_sites
        .keys()
        .copied()
        .collect();

    let mut loop_trace = StreamedLoopTrace::from_dir(&dir, loop_id)?;
    let Some(entry) = loop_trace.entry_for_invocation(invocation)? else {
        anyhow::bail!("loop {loop_id} has no invocation {invocation}");
    };
    let mut call_trace = StreamedCallTrace::from_dir(&dir)?;
    let mut running_counts = std::collections::BTreeMap::new();
    let Some(info) = call_trace.info_for_invocation_mut(invocation)? else {
        anyhow::bail!("no call info covers invocation {invocation}");
    };
    if !info.is_cache_built() {
        info.build_call_trace_cache(entry.group(), &mut running_counts, &call_sites);
    }

    let spans = info.call_spans(instruction);
    if spans.is_empty() {
        term.write_line(&format!(
            "instruction {} has no call records in invocation {}",
            style(instruction).cyan(),
            invocation
        ))?;
        return Ok(());
    }

    term.write_line(&format!(
        "{} instruction {} in loop {} invocation {}",
        style("Call attribution for").bold().cyan(),
        style(instruction).bold(),
        loop_id,
        invocation
    ))?;
    if info.is_constant_call_site(instruction) {
        term.write_line(&format!(
            "   every instance comes from call site {}",
            style(spans[0].call_id).green()
        ))?;
    }
    for span in spans {
        let iteration = entry.group().iteration_number(span.call_id, span.call_instance);
        term.write_line(&format!(
            "   instances {}-{}: call site {} instance {} (iteration {})",
            span.first_instance,
            span.last_instance,
            style(span.call_id).cyan(),
            span.call_instance,
            iteration
        ))?;
    }
    term.write_line(&format!(
        "   {} instances total",
        style(info.num_instances(instruction)).green()
    ))?;
    Ok(())
}

fn selfcheck_command(dir: PathBuf) -> Result<()> {
    let term = Term::stdout();
    let mut failures = 0u32;
    let mut check = |name: &str, ok: bool, detail: String| {
        let mark = if ok {
            style("ok").green()
        } else {
            style("FAIL").red()
        };
        let _ = term.write_line(&format!("   [{mark}] {name}: {detail}"));
        if !ok {
            failures += 1;
        }
    };

    term.write_line(&format!(
        "{} {}",
        style("Trace selfcheck").bold().cyan(),
        style(dir.display()).dim()
    ))?;

    // Token-level pass over both files.
    let loop_scan = LoopTraceReader::from_dir(&dir)
        .and_then(|reader| reader.scan())
        .with_context(|| format!("scanning loop trace in {}", dir.display()))?;
    let call_scan = CallTraceReader::from_dir(&dir)
        .and_then(|reader| reader.scan())
        .with_context(|| format!("scanning call trace in {}", dir.display()))?;
    check(
        "scan",
        true,
        format!(
            "{} loops, {} call infos, {} dumps",
            loop_scan.loops.len(),
            call_scan.num_infos,
            loop_scan.dumps
        ),
    );
    check(
        "dump counts",
        loop_scan.dumps == call_scan.dumps,
        format!("loop file {} vs call file {}", loop_scan.dumps, call_scan.dumps),
    );

    // Merged pass: every entry must parse and precompute, and each loop's
    // invocation numbering must be contiguous from zero.
    let mut reader = LoopTraceReader::from_dir(&dir)?;
    let mut next_invocation: std::collections::BTreeMap<LoopId, u64> = Default::default();
    let mut entries = 0u64;
    while let Some((loop_id, mut entry)) = reader.next_entry()? {
        entries += 1;
        entry.precompute();
        let expected = next_invocation.entry(loop_id).or_insert(0);
        for n in entry.invocations().instances() {
            if n != *expected {
                check(
                    "loop numbering",
                    false,
                    format!("loop {loop_id} jumps from invocation {expected} to {n}"),
                );
            }
            *expected = n + 1;
        }
    }
    check("loop entries", true, format!("{entries} merged entries"));

    let mut reader = CallTraceReader::from_dir(&dir)?;
    let mut covered = 0u64;
    let mut infos = 0u64;
    while let Some(info) = reader.next_entry()? {
        infos += 1;
        covered += info.num_invocations();
    }
    check("call infos", true, format!("{infos} merged infos"));

    // With a single traced loop every invocation carries one call info.
    if loop_scan.loops.len() == 1 {
        let total: u64 = loop_scan.loops.values().map(|s| s.num_invocations).sum();
        check(
            "call info coverage",
            covered == total,
            format!("{covered} covered vs {total} invocations"),
        );
    }

    term.write_line("")?;
    if failures > 0 {
        term.write_line(&format!(
            "{} {failures} check(s) failed",
            style("FAILED:").bold().red()
        ))?;
        std::process::exit(1);
    }
    term.write_line(&format!("{}", style("All checks passed").bold().green()))?;
    Ok(())
}

/// Synthetic workload: a loop with a two-instruction body and a call every
/// other iteration, so the trace exercises all three dedup levels.
fn demo_command(dir: PathBuf, invocations: u64, iterations: u64) -> Result<()> {
    let term = Term::stdout();
    let config = RecorderConfig::default().with_output_dir(&dir);
    let mut recorder = TraceRecorder::new(config)?;

    let pb = ProgressBar::new(invocations);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{bar:30.cyan} {pos}/{len} invocations")
            .context("setting progress style")?,
    );
    for _ in 0..invocations {
        recorder.loop_invocation_start(1)?;
        for iteration in 0..iterations {
            recorder.loop_iteration_start()?;
            recorder.instruction(10)?;
            recorder.instruction(11)?;
            if iteration % 2 == 0 {
                recorder.call_start(100)?;
                recorder.instruction(7)?;
                recorder.instruction(8)?;
                recorder.call_end()?;
            }
        }
        recorder.loop_invocation_end()?;
        pb.inc(1);
    }
    recorder.finish()?;
    pb.finish_and_clear();

    term.write_line(&format!(
        "{} {} invocations x {} iterations into {}",
        style("Recorded").bold().green(),
        invocations,
        iterations,
        style(dir.display()).cyan()
    ))?;
    term.write_line(&looptrace::scan_trace_dir(&dir)?)?;
    Ok(())
}
