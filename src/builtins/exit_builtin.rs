use crate::jobs::JobTable;
use log::debug;

/// `exit`/`quit [code]`: kill every remaining job, then leave the shell.
/// A non-numeric code falls back to 0.
pub fn run(argv: &[String], table: &JobTable) {
    if argv.len() > 2 {
        eprintln!("{}: too many arguments", argv[0]);
        return;
    }
    let code = argv
        .get(1)
        .and_then(|arg| arg.parse::<i32>().ok())
        .unwrap_or(0);
    debug!("shell event=exit code={code}");
    table.kill_all();
    std::process::exit(code);
}
