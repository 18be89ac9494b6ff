//! The interactive prompt: `user@host:cwd$ ` with the home prefix
//! collapsed to `~`.

use nu_ansi_term::Color;
use std::path::Path;

pub fn render() -> String {
    let user = whoami::username();
    let host = whoami::fallible::hostname().unwrap_or_else(|_| String::from("localhost"));
    let cwd = std::env::current_dir()
        .map(|p| display_dir(&p))
        .unwrap_or_else(|_| String::from("?"));
    format!(
        "{}:{}$ ",
        Color::Green.bold().paint(format!("{user}@{host}")),
        Color::Blue.bold().paint(cwd),
    )
}

fn display_dir(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(rest) = path.strip_prefix(&home) {
            return if rest.as_os_str().is_empty() {
                String::from("~")
            } else {
                format!("~/{}", rest.display())
            };
        }
    }
    path.display().to_string()
}
