//! Pipeline launcher: one forked child per stage, wired together with
//! pipes, every stage adopted into the first child's process group, the
//! whole group registered as a job.

use crate::builtins;
use crate::jobs::mask::SignalMask;
use crate::jobs::JobTable;
use crate::parser::CommandLine;
use anyhow::{Context, Result};
use log::debug;
use nix::fcntl::{open, OFlag};
use nix::sys::signal::{
    sigaction, sigprocmask, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal,
};
use nix::sys::stat::Mode;
use nix::unistd::{close, dup2, execvp, fork, setpgid, ForkResult, Pid};
use os_pipe::{PipeReader, PipeWriter};
use std::ffi::CString;
use std::os::fd::{AsRawFd, RawFd};
use std::process;

/// Fork and wire one child per stage, register the group as a job, then
/// wait for it if it runs in the foreground.
///
/// All signals stay masked from before the first fork until after the job
/// is registered, so the reaper can never be handed a status change for a
/// PID the table does not know yet.
pub fn launch(cmd: &CommandLine, table: &JobTable, interactive: bool) -> Result<()> {
    let n = cmd.seq.len();
    if n == 0 {
        return Ok(());
    }

    let mask = SignalMask::block_all();

    let mut pids: Vec<Pid> = Vec::with_capacity(n);
    let mut prev: Option<(PipeReader, PipeWriter)>;
    let mut curr: Option<(PipeReader, PipeWriter)> = None;

    for i in 0..n {
        prev = curr.take();
        if i + 1 < n {
            curr = Some(os_pipe::pipe().context("cannot create pipe")?);
        }

        match unsafe { fork() }.context("cannot fork")? {
            ForkResult::Child => run_stage(cmd, i, &pids, prev.as_ref(), curr.as_ref(), table),
            ForkResult::Parent { child } => {
                pids.push(child);
                // Adopt every stage into the leader's group. The child
                // races the same call on itself; both converge on the
                // first PID.
                let _ = setpgid(child, pids[0]);
            }
        }

        if i > 0 {
            // Stage i has inherited the pipe feeding it; closing the
            // parent copies lets EOF propagate through the pipeline.
            drop(prev.take());
        }
    }

    let id = table.add(&cmd.raw, &pids);
    debug!(
        "job event=launch id={} pgid={} stages={} bg={}",
        id, pids[0], n, cmd.background
    );
    if !cmd.background {
        let _ = table.set_fg(id);
    } else if interactive {
        println!("[{}] {}", id, pids[0]);
    }

    drop(mask);
    table.wait_fg();
    Ok(())
}

/// Child side of a stage: process group, fd wiring, signal reset, then
/// builtin execution or exec. Never returns.
fn run_stage(
    cmd: &CommandLine,
    i: usize,
    pids: &[Pid],
    prev: Option<&(PipeReader, PipeWriter)>,
    curr: Option<&(PipeReader, PipeWriter)>,
    table: &JobTable,
) -> ! {
    // Stage 0 founds the group; later stages join it via the leader PID
    // they inherited in `pids`.
    let pgid = pids.first().copied().unwrap_or_else(|| Pid::from_raw(0));
    let _ = setpgid(Pid::from_raw(0), pgid);

    let n = cmd.seq.len();
    if i == 0 {
        if let Some(path) = &cmd.input {
            redirect_file(path, libc::STDIN_FILENO, OFlag::O_RDONLY);
        }
    }
    if let Some((reader, _)) = prev {
        dup_over(reader.as_raw_fd(), libc::STDIN_FILENO);
    }
    if i + 1 < n {
        if let Some((_, writer)) = curr {
            dup_over(writer.as_raw_fd(), libc::STDOUT_FILENO);
        }
    }
    if i == n - 1 {
        if let Some(path) = &cmd.output {
            redirect_file(
                path,
                libc::STDOUT_FILENO,
                OFlag::O_CREAT | OFlag::O_WRONLY | OFlag::O_TRUNC,
            );
        }
    }

    // The parent's job inventory means nothing in this process.
    table.release();
    restore_default_signals();

    let stage = &cmd.seq[i];
    // A builtin inside a pipeline runs here, in the child, so e.g. `cd`
    // cannot move the parent shell.
    if builtins::dispatch(stage, table) {
        process::exit(0);
    }
    exec_external(stage);
}

fn redirect_file(path: &str, target: RawFd, flags: OFlag) {
    match open(path, flags, Mode::from_bits_truncate(0o644)) {
        Ok(fd) => {
            dup_over(fd, target);
            let _ = close(fd);
        }
        Err(e) => {
            eprintln!("{}: {}", path, e.desc());
            process::exit(1);
        }
    }
}

fn dup_over(fd: RawFd, target: RawFd) {
    if let Err(e) = dup2(fd, target) {
        eprintln!("jsh: dup2: {}", e.desc());
        process::exit(1);
    }
}

/// Put every catchable signal back to its default disposition and clear
/// the inherited mask, so the exec'd program sees ordinary semantics.
fn restore_default_signals() {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for sig in Signal::iterator() {
        if matches!(sig, Signal::SIGKILL | Signal::SIGSTOP) {
            continue;
        }
        unsafe {
            let _ = sigaction(sig, &default);
        }
    }
    let _ = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None);
}

fn exec_external(stage: &[String]) -> ! {
    let argv: Vec<CString> = stage
        .iter()
        .filter_map(|arg| CString::new(arg.as_str()).ok())
        .collect();
    if argv.len() != stage.len() {
        eprintln!("{}: invalid argument", stage[0]);
        process::exit(1);
    }
    // execvp only returns on failure.
    let err = execvp(&argv[0], &argv).unwrap_err();
    eprintln!("{}: {}", stage[0], err.desc());
    process::exit(127);
}
