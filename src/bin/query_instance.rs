//! One-shot query tool: map a dynamic instruction instance back to the
//! iteration that executed it and, for call-produced instructions, the call
//! instance that produced it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use looptrace::calls::StreamedCallTrace;
use looptrace::loops::StreamedLoopTrace;
use looptrace::parser::CallTraceReader;
use looptrace::{LoopId, Symbol};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Map a dynamic instruction instance to its iteration and call",
    long_about = None
)]
struct Args {
    /// Trace output directory
    dir: PathBuf,

    /// Loop whose invocations are walked
    #[arg(short, long)]
    loop_id: LoopId,

    /// Instruction id to look up
    #[arg(short, long)]
    instruction: Symbol,

    /// Dynamic instance number, counted across the whole trace
    #[arg(short = 'n', long)]
    instance: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Suppress logging for query tool
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let call_sites: BTreeSet<Symbol> = CallTraceReader::from_dir(&args.dir)
        .and_then(|reader| reader.scan())
        .context("scanning call trace")?
        .call_sites
        .keys()
        .copied()
        .collect();

    let mut loop_trace = StreamedLoopTrace::from_dir(&args.dir, args.loop_id)?;
    let mut call_trace = StreamedCallTrace::from_dir(&args.dir)?;
    let mut running_counts: BTreeMap<Symbol, u64> = BTreeMap::new();

    let mut remaining = args.instance;
    let mut seen = 0u64;
    let mut loop_cursor = loop_trace.first_invocation()?;
    let mut call_cursor = call_trace.first_invocation()?;

    while let Some(cursor) = loop_cursor {
        let invocation = cursor.invocation();
        let group = loop_trace.entry(cursor).group();

        if group.contains_instruction(args.instruction) {
            // Recorded directly in the loop body.
            let count = group.num_instances(args.instruction);
            if remaining < count {
                let iteration = group.iteration_number(args.instruction, remaining);
                println!(
                    "instance {} of instruction {}: invocation {}, iteration {}",
                    args.instance, args.instruction, invocation, iteration
                );
                println!("recorded directly in the loop body");
                return Ok(());
            }
            remaining -= count;
            seen += count;
        } else {
            let Some(ccursor) = call_cursor else {
                bail!("no call info covers invocation {invocation}");
            };
            let info = call_trace.info_mut(ccursor);
            if !info.is_cache_built() {
                info.build_call_trace_cache(group, &mut running_counts, &call_sites);
            }
            let count = info.num_instances(args.instruction);
            if remaining < count {
                let span = *info.call_for_instance(args.instruction, remaining);
                let iteration = group.iteration_number(span.call_id, span.call_instance);
                println!(
                    "instance {} of instruction {}: invocation {}, iteration {}",
                    args.instance, args.instruction, invocation, iteration
                );
                println!(
                    "produced by call site {} instance {}",
                    span.call_id, span.call_instance
                );
                return Ok(());
            }
            remaining -= count;
            seen += count;
        }

        loop_cursor = loop_trace.advance(cursor)?;
        call_cursor = match call_cursor {
            Some(c) => call_trace.advance(c)?,
            None => None,
        };
    }

    bail!(
        "instruction {} has only {} instances in loop {}",
        args.instruction,
        seen,
        args.loop_id
    )
}
