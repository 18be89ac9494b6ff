//! Command-line lexing and splitting.
//!
//! Turns one input line into the record the launcher consumes: the stage
//! argv vectors, optional endpoint redirections, the background flag, and
//! the raw text kept for job listings.

use logos::Logos;
use thiserror::Error;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t]+")]
enum Token {
    #[token("|")]
    Pipe,
    #[token("<")]
    RedirectIn,
    #[token(">")]
    RedirectOut,
    #[token("&")]
    Background,
    #[regex(r"[^ \t|<>&]+", |lex| lex.slice().to_owned())]
    Word(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected input near `{0}`")]
    Unexpected(String),
    #[error("missing command")]
    MissingCommand,
    #[error("missing file name after `{0}`")]
    MissingRedirectTarget(char),
    #[error("duplicate input redirection")]
    DuplicateInput,
    #[error("duplicate output redirection")]
    DuplicateOutput,
    #[error("`&` must end the command")]
    BackgroundNotLast,
}

/// A parsed command line. `input` redirects the first stage's stdin,
/// `output` the last stage's stdout, wherever they appeared in the line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandLine {
    pub seq: Vec<Vec<String>>,
    pub input: Option<String>,
    pub output: Option<String>,
    pub background: bool,
    pub raw: String,
}

impl CommandLine {
    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }
}

pub fn parse(line: &str) -> Result<CommandLine, ParseError> {
    let mut seq: Vec<Vec<String>> = Vec::new();
    let mut stage: Vec<String> = Vec::new();
    let mut input = None;
    let mut output = None;
    let mut background = false;

    let mut lex = Token::lexer(line);
    while let Some(tok) = lex.next() {
        let tok = tok.map_err(|_| ParseError::Unexpected(lex.slice().to_string()))?;
        if background {
            return Err(ParseError::BackgroundNotLast);
        }
        match tok {
            Token::Word(word) => stage.push(word),
            Token::Pipe => {
                if stage.is_empty() {
                    return Err(ParseError::MissingCommand);
                }
                seq.push(std::mem::take(&mut stage));
            }
            Token::RedirectIn => {
                if input.is_some() {
                    return Err(ParseError::DuplicateInput);
                }
                input = Some(expect_word(&mut lex, '<')?);
            }
            Token::RedirectOut => {
                if output.is_some() {
                    return Err(ParseError::DuplicateOutput);
                }
                output = Some(expect_word(&mut lex, '>')?);
            }
            Token::Background => background = true,
        }
    }

    if !stage.is_empty() {
        seq.push(stage);
    } else if !seq.is_empty() {
        // Trailing `|` with nothing after it.
        return Err(ParseError::MissingCommand);
    }

    Ok(CommandLine {
        seq,
        input,
        output,
        background,
        raw: line.trim().to_string(),
    })
}

fn expect_word(lex: &mut logos::Lexer<Token>, redirect: char) -> Result<String, ParseError> {
    match lex.next() {
        Some(Ok(Token::Word(word))) => Ok(word),
        _ => Err(ParseError::MissingRedirectTarget(redirect)),
    }
}
