//! Console commands read from stdin

use thiserror::Error;

use crate::vision::normalize_plate;

/// A parsed console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Set the plate to look for (raw user text)
    SetTarget(String),
    ClearTarget,
    History,
    Stats,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("`target` needs a plate, e.g. `target ABC1234`")]
    MissingTarget,
    #[error("unknown command `{0}` (type `help`)")]
    Unknown(String),
}

pub const HELP: &str = "\
commands:
  target <PLATE>  look for PLATE (a bare plate works too)
  clear           stop looking for a plate
  history         show the latest readings
  stats           show pipeline counters
  help            show this text
  quit            stop and exit";

impl Command {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "target" | "t" => {
                if normalize_plate(rest).is_empty() {
                    return Err(CommandError::MissingTarget);
                }
                Command::SetTarget(rest.to_string())
            }
            "clear" => Command::ClearTarget,
            "history" => Command::History,
            "stats" => Command::Stats,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            // A bare plate, possibly typed with a separator ("ABC 1234")
            _ if line.chars().any(|c| c.is_ascii_digit()) => Command::SetTarget(line.to_string()),
            _ => return Err(CommandError::Unknown(word.to_string())),
        };
        Ok(Some(command))
    }
}
