//! Asynchronous child-status handling and keyboard signal routing.
//!
//! Three handlers are registered, all running on the shell's only thread in
//! the gaps where the job-table mask is open: SIGCHLD drains every pending
//! child-status change into the table, SIGINT terminates the foreground
//! job, SIGTSTP suspends it. The shell itself never dies from a keyboard
//! interrupt.

use crate::jobs::{JobError, JobTable};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use signal_hook::consts::{SIGCHLD, SIGINT, SIGTSTP};
use signal_hook::low_level;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether notification lines (background acks, `Suspended` reports) are
/// printed. Set once at startup from the tty/script detection.
static INTERACTIVE: AtomicBool = AtomicBool::new(false);

pub fn set_interactive(interactive: bool) {
    INTERACTIVE.store(interactive, Ordering::SeqCst);
}

pub fn is_interactive() -> bool {
    INTERACTIVE.load(Ordering::SeqCst)
}

/// Install the SIGCHLD reaper and the SIGINT/SIGTSTP routers.
pub fn install(table: &'static JobTable) -> anyhow::Result<()> {
    // The actions only call job-table operations, which mask all signals
    // internally, so a handler can never interrupt a mutation of its own.
    unsafe {
        low_level::register(SIGCHLD, move || reap_children(table))?;
        low_level::register(SIGINT, move || interrupt_foreground(table))?;
        low_level::register(SIGTSTP, move || suspend_foreground(table))?;
    }
    Ok(())
}

/// Drain all pending child-status changes and route each to the table:
/// stopped and continued reports flip the owning job's state, terminations
/// mark the member reaped. Deliveries coalesce, so one invocation may
/// process many events; the loop runs to exhaustion so none are lost.
pub fn reap_children(table: &JobTable) {
    // The wait calls below clobber errno; whatever the interrupted code
    // was doing must not see that.
    let saved = Errno::last_raw();
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    loop {
        match waitpid(None, Some(flags)) {
            Ok(WaitStatus::Stopped(pid, _)) => {
                let _ = table.stop_pid(pid);
            }
            Ok(WaitStatus::Continued(pid)) => {
                let _ = table.cont_pid(pid);
            }
            Ok(WaitStatus::Exited(pid, _)) | Ok(WaitStatus::Signaled(pid, _, _)) => {
                let _ = table.delete_pid(pid);
            }
            Ok(WaitStatus::StillAlive) => break,
            Ok(_) => continue,
            // ECHILD: no children left to report on.
            Err(_) => break,
        }
    }
    Errno::set_raw(saved);
}

/// SIGINT: forward to the foreground job, if any.
pub fn interrupt_foreground(table: &JobTable) {
    if let Some(id) = table.get_fg() {
        let _ = table.term(id);
    }
}

/// SIGTSTP: suspend the foreground job, if any, and report it.
pub fn suspend_foreground(table: &JobTable) {
    let Some(id) = table.get_fg() else {
        return;
    };
    match table.stop(id) {
        Ok(()) => {
            if is_interactive() {
                if let (Some(pgid), Some(cmd)) = (table.get_pgid(id), table.get_cmd(id)) {
                    println!("\n[{}] {}  Suspended  {}", id, pgid, cmd);
                }
            }
        }
        Err(JobError::AlreadyInTargetState) => eprintln!("stop: Job already stopped"),
        Err(_) => eprintln!("stop: No such job"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interactive_flag() {
        set_interactive(true);
        assert!(is_interactive());
        set_interactive(false);
        assert!(!is_interactive());
    }

    #[test]
    fn test_routers_without_foreground_are_noops() {
        let table = JobTable::new();
        interrupt_foreground(&table);
        suspend_foreground(&table);
        assert_eq!(table.get_fg(), None);
    }
}
