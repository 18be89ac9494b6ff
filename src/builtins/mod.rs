//! Built-in commands: the job-control family (`jobs`, `fg`, `bg`, `stop`),
//! shell control (`exit`/`quit`), `cd`, and `#` comment lines.
//!
//! A builtin runs in the shell process when the command line is a single
//! stage; inside a pipeline it runs in the forked child instead, so e.g.
//! `cd` there cannot move the parent.

pub mod exit_builtin;
mod jobs;

use crate::jobs::JobTable;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;

type BuiltinFn = fn(&[String], &JobTable);

/// Process-global builtin table, initialized once on first access.
static BUILTIN_MAP: LazyLock<HashMap<&'static str, BuiltinFn>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, BuiltinFn> = HashMap::with_capacity(7);
    m.insert("exit", exit_builtin::run as BuiltinFn);
    m.insert("quit", exit_builtin::run);
    m.insert("jobs", jobs::run_jobs);
    m.insert("fg", jobs::run_fg);
    m.insert("bg", jobs::run_bg);
    m.insert("stop", jobs::run_stop);
    m.insert("cd", builtin_cd);
    m
});

pub fn is_builtin(name: &str) -> bool {
    name.starts_with('#') || BUILTIN_MAP.contains_key(name)
}

/// Execute argv if it names a builtin; reports whether it was handled.
/// Diagnostics go straight to stderr, matching the launched-command path.
pub fn dispatch(argv: &[String], table: &JobTable) -> bool {
    let Some(name) = argv.first() else {
        return true;
    };
    if name.starts_with('#') {
        return true;
    }
    match BUILTIN_MAP.get(name.as_str()) {
        Some(run) => {
            run(argv, table);
            true
        }
        None => false,
    }
}

fn builtin_cd(argv: &[String], _table: &JobTable) {
    if argv.len() > 2 {
        eprintln!("{}: too many arguments", argv[0]);
        return;
    }
    let target = argv.get(1).map(PathBuf::from).or_else(dirs::home_dir);
    let Some(target) = target else {
        eprintln!("{}: no home directory", argv[0]);
        return;
    };
    match std::env::set_current_dir(&target) {
        Ok(()) => {
            if let Ok(pwd) = std::env::current_dir() {
                std::env::set_var("PWD", &pwd);
            }
        }
        Err(e) => eprintln!("{}: {}", argv[0], e),
    }
}
