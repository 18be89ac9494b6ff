#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use jsh::builtins;
use jsh::executor;
use jsh::jobs::JobTable;
use jsh::parser;
use jsh::prompt;
use jsh::signal;
use std::env;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    // With a filename argument the shell runs it as a script; prompts and
    // notification lines are also suppressed whenever stdin is not a tty.
    let args: Vec<String> = env::args().collect();
    let mut reader: Box<dyn BufRead> = match args.get(1) {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("cannot open {path}"))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(io::stdin())),
    };
    let interactive = args.len() < 2 && atty::is(atty::Stream::Stdin);
    signal::set_interactive(interactive);

    let table = JobTable::global();
    signal::install(table)?;

    let mut line = String::new();
    loop {
        if interactive {
            print!("{}", prompt::render());
            let _ = io::stdout().flush();
        }

        line.clear();
        if reader.read_line(&mut line)? == 0 {
            // EOF: no zombie may outlive the shell.
            if interactive {
                println!();
            }
            table.kill_all();
            return Ok(());
        }

        let cmd = match parser::parse(&line) {
            Ok(cmd) => cmd,
            Err(e) => {
                eprintln!("syntax error: {e}");
                continue;
            }
        };
        if cmd.is_empty() {
            continue;
        }

        // Builtins run in the shell itself only outside pipelines; a
        // piped builtin executes in its forked stage instead.
        if cmd.seq.len() == 1 && builtins::dispatch(&cmd.seq[0], table) {
            continue;
        }

        if let Err(e) = executor::launch(&cmd, table, interactive) {
            eprintln!("jsh: {e}");
        }
    }
}
