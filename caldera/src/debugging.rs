//! Operator console: read-only process diagnostics.
//!
//! Two commands, both diagnostic only: [`dump_processes`] enumerates every
//! registered process, [`dump_current`] prints the calling context's own
//! process. Neither mutates state. The registry lock is held only long
//! enough to snapshot owned references; per-process fields read here are
//! atomics or short spinlock sections.

use crate::{
    process::{self, Process},
    thread,
};
use std::{
    fmt::{self, Write},
    sync::Arc,
};

/// Writes the state of one process: title, pid, state, address space,
/// thread count, reference count, next descriptor.
pub fn dump_process(proc: &Arc<Process>, out: &mut dyn Write) -> fmt::Result {
    writeln!(out, "title      {}", proc.title)?;
    writeln!(out, "pid        {}", proc.pid)?;
    writeln!(out, "state      {}", proc.state())?;
    writeln!(out, "space      {:016x}", proc.address_space_id().unwrap_or(0))?;
    writeln!(out, "threads    {}", proc.thread_count())?;
    writeln!(out, "refcount   {}", Arc::strong_count(proc))?;
    writeln!(
        out,
        "next fd    {}",
        proc.with_descriptors(|d| d.next_fd()).unwrap_or(0)
    )
}

/// The `processes` console command: every registry entry, in pid order.
pub fn dump_processes(out: &mut dyn Write) -> fmt::Result {
    for proc in process::table::snapshot() {
        writeln!(out, "Process: {} ({:p})", proc.pid, Arc::as_ptr(&proc))?;
        dump_process(&proc, out)?;
    }
    Ok(())
}

/// The `procinfo` console command: the calling context's own process.
pub fn dump_current(out: &mut dyn Write) -> fmt::Result {
    thread::with_current(|th| match th.owner_pid() {
        0 => writeln!(out, "current thread belongs to no process"),
        pid => match Process::lookup(pid) {
            Some(proc) => {
                writeln!(out, "Current Process State:")?;
                dump_process(&proc, out)
            }
            None => writeln!(out, "process {pid} is gone"),
        },
    })
}
