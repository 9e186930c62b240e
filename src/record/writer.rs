/*!
# Trace Dump Writer

Serializes dumps into the two trace files. Each dump becomes one gzip
member appended to the file, so a trace grows member by member and the
readers decode the concatenation transparently.
*/

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::info;

use crate::calls::CallInvocationGroup;
use crate::core::{LoopId, Result, CALL_TRACE_FILE, LOOP_TRACE_FILE};
use crate::loops::LoopEntry;
use crate::parser::EntryStatus;

/// Appends dumps to the trace files of one output directory.
#[derive(Debug)]
pub struct TraceWriter {
    loop_path: PathBuf,
    call_path: PathBuf,
}

impl TraceWriter {
    /// Creates the output directory if needed. Existing trace files are
    /// appended to, so a fresh recording wants a fresh directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(TraceWriter {
            loop_path: dir.join(LOOP_TRACE_FILE),
            call_path: dir.join(CALL_TRACE_FILE),
        })
    }

    /// Write one dump: a loop file member holding the sections in the
    /// given order and a call file member holding the infos, both closed
    /// by the same footer.
    pub fn write_dump(
        &mut self,
        sections: &[(LoopId, Vec<LoopEntry>)],
        infos: &[CallInvocationGroup],
        status: EntryStatus,
    ) -> Result<()> {
        let entries: usize = sections.iter().map(|(_, e)| e.len()).sum();
        info!(
            sections = sections.len(),
            entries,
            infos = infos.len(),
            %status,
            "writing trace dump"
        );

        let mut w = self.appender(&self.loop_path)?;
        for (loop_id, entries) in sections {
            writeln!(w, "{} {}", loop_id, entries.len())?;
            for (idx, entry) in entries.iter().enumerate() {
                write!(w, "{entry}")?;
                if idx + 1 < entries.len() {
                    write!(w, "\nCOMPLETE\n")?;
                }
            }
        }
        write!(w, "\n{status}\n")?;
        w.finish()?.flush()?;

        let mut w = self.appender(&self.call_path)?;
        writeln!(w, "{}", infos.len())?;
        for (idx, info) in infos.iter().enumerate() {
            write!(w, "{info}")?;
            if idx + 1 < infos.len() {
                write!(w, "\nCOMPLETE\n")?;
            }
        }
        write!(w, "\n{status}\n")?;
        w.finish()?.flush()?;

        Ok(())
    }

    fn appender(&self, path: &Path) -> Result<GzEncoder<BufWriter<File>>> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(GzEncoder::new(BufWriter::new(file), Compression::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::compress::Pattern;
    use crate::loops::IterationGroup;
    use crate::parser::{CallTraceReader, LoopTraceReader};

    fn entry(invocation: u64, iteration_syms: &[u64]) -> LoopEntry {
        let patterns = iteration_syms.iter().map(|&s| Pattern::leaf(s)).collect();
        let mut e = LoopEntry::new();
        e.add_invocation(invocation);
        e.group_mut()
            .push_iteration_group(IterationGroup::single(0, patterns));
        e
    }

    fn info(invocation: u64, site: u64, body_sym: u64) -> CallInvocationGroup {
        let mut i = CallInvocationGroup::new();
        i.add_invocation(invocation);
        let call = i.call_mut(site);
        call.start_instance_group();
        call.add_instance(0);
        call.push_control_flow(Pattern::leaf(body_sym));
        i
    }

    #[test]
    fn dump_round_trips_through_the_readers() {
        let dir = TempDir::new().unwrap();
        let mut writer = TraceWriter::new(dir.path()).unwrap();

        writer
            .write_dump(
                &[(9, vec![entry(0, &[1, 2]), entry(1, &[1])])],
                &[info(0, 100, 7)],
                EntryStatus::Complete,
            )
            .unwrap();

        let mut loops = LoopTraceReader::from_dir(dir.path()).unwrap();
        let (id, first) = loops.next_entry().unwrap().unwrap();
        assert_eq!(id, 9);
        assert_eq!(first.invocations().pairs(), &[(0, 0)]);
        let (_, second) = loops.next_entry().unwrap().unwrap();
        assert_eq!(second.invocations().pairs(), &[(1, 1)]);
        assert!(loops.next_entry().unwrap().is_none());
        assert_eq!(loops.dumps_seen(), 1);

        let mut calls = CallTraceReader::from_dir(dir.path()).unwrap();
        let parsed = calls.next_entry().unwrap().unwrap();
        assert_eq!(parsed.invocations().pairs(), &[(0, 0)]);
        assert_eq!(parsed.calls()[&100].num_instance_groups(), 1);
        assert!(calls.next_entry().unwrap().is_none());
    }

    #[test]
    fn appended_dumps_become_gzip_members() {
        let dir = TempDir::new().unwrap();
        let mut writer = TraceWriter::new(dir.path()).unwrap();

        writer
            .write_dump(&[(3, vec![entry(0, &[5])])], &[], EntryStatus::Complete)
            .unwrap();
        writer
            .write_dump(&[(3, vec![entry(1, &[6])])], &[], EntryStatus::Complete)
            .unwrap();

        let mut loops = LoopTraceReader::from_dir(dir.path()).unwrap();
        assert!(loops.next_entry().unwrap().is_some());
        assert!(loops.next_entry().unwrap().is_some());
        assert!(loops.next_entry().unwrap().is_none());
        assert_eq!(loops.dumps_seen(), 2);
    }
}
