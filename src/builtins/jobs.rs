//! The job-control builtins: `jobs`, `fg`, `bg`, `stop`.

use crate::jobs::{JobError, JobTable};
use log::debug;
use nix::unistd::Pid;

pub fn run_jobs(argv: &[String], table: &JobTable) {
    if argv.len() > 1 {
        eprintln!("{}: too many arguments", argv[0]);
        return;
    }
    table.print_all();
}

/// `fg [%id | pid]`: resume the target if needed, make it the foreground
/// job, and block until it finishes or stops.
pub fn run_fg(argv: &[String], table: &JobTable) {
    let Ok(id) = resolve_target(argv, table) else {
        return;
    };
    debug!("job event=fg id={id}");
    // Resuming a job that already runs is not an error here.
    let _ = table.cont(id);
    match table.set_fg(id) {
        Ok(()) => {
            if let Some(cmd) = table.get_cmd(id) {
                println!("{cmd}");
            }
            table.wait_fg();
        }
        Err(JobError::ForegroundBusy) => eprintln!("{}: Job already in foreground", argv[0]),
        Err(_) => eprintln!("{}: No such job", argv[0]),
    }
}

/// `bg [%id | pid]`: resume the target in the background.
pub fn run_bg(argv: &[String], table: &JobTable) {
    let Ok(id) = resolve_target(argv, table) else {
        return;
    };
    debug!("job event=bg id={id}");
    match table.cont(id) {
        Ok(()) => print_state_line(table, id, "Running"),
        Err(JobError::AlreadyInTargetState) => {
            eprintln!("{}: Job already in background", argv[0])
        }
        Err(_) => eprintln!("{}: No such job", argv[0]),
    }
}

/// `stop [%id | pid]`: suspend the target.
pub fn run_stop(argv: &[String], table: &JobTable) {
    let Ok(id) = resolve_target(argv, table) else {
        return;
    };
    debug!("job event=stop id={id}");
    match table.stop(id) {
        Ok(()) => print_state_line(table, id, "Suspended"),
        Err(JobError::AlreadyInTargetState) => eprintln!("{}: Job already stopped", argv[0]),
        Err(_) => eprintln!("{}: No such job", argv[0]),
    }
}

/// Resolve `[%id | pid]` to a job id, defaulting to the most recently
/// created job. Prints the specific diagnostic itself; the returned error
/// only classifies it.
fn resolve_target(argv: &[String], table: &JobTable) -> Result<usize, JobError> {
    let name = &argv[0];
    if argv.len() > 2 {
        eprintln!("{name}: too many arguments");
        return Err(JobError::InvalidArgument);
    }
    match argv.get(1) {
        None => table.get_last().ok_or_else(|| {
            eprintln!("{name}: No such job");
            JobError::NotFound
        }),
        Some(arg) if arg.starts_with('%') => arg[1..].parse::<usize>().map_err(|_| {
            eprintln!("{name}: invalid job id");
            JobError::InvalidArgument
        }),
        Some(arg) if arg.starts_with(|c: char| c.is_ascii_digit()) => {
            let pid = arg.parse::<i32>().map_err(|_| {
                eprintln!("{name}: invalid pid");
                JobError::InvalidArgument
            })?;
            table.get_job(Pid::from_raw(pid)).ok_or_else(|| {
                eprintln!("{name}: No such job");
                JobError::NotFound
            })
        }
        Some(_) => {
            eprintln!("{name}: invalid job id");
            Err(JobError::InvalidArgument)
        }
    }
}

fn print_state_line(table: &JobTable, id: usize, state: &str) {
    if let (Some(pgid), Some(cmd)) = (table.get_pgid(id), table.get_cmd(id)) {
        println!("[{}] {}  {:<9}  {}", id, pgid, state, cmd);
    }
}
