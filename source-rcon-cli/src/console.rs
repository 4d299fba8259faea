use crossterm::tty::IsTty;
use rustyline_async::{Readline, ReadlineError, SharedWriter};
use std::io::{self, Stderr, Stdout, Write};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::debug;

/// One read from the console.
pub enum Input {
    Line(String),
    /// Ctrl-D at the prompt, or the end of piped input.
    Eof,
    /// Ctrl-C at the prompt.
    Interrupted,
}

/// Where REPL commands come from and where responses go.
///
/// A line editor with history is used when stdout is a terminal. Otherwise lines are read from
/// stdin as they come, so a file of commands can be piped in.
pub struct Console {
    source: Source,
    sink: Sink,
}

enum Source {
    Editor { editor: Readline, prompt: String },
    Piped(Lines<BufReader<Stdin>>),
}

enum Sink {
    Editor(SharedWriter),
    Plain { stdout: Stdout, stderr: Stderr },
}

impl Console {
    pub fn open(prompt: String, plain: bool) -> Console {
        if !plain && io::stdout().is_tty() {
            match Readline::new(prompt.clone()) {
                Ok((editor, writer)) => {
                    return Console {
                        source: Source::Editor { editor, prompt },
                        sink: Sink::Editor(writer),
                    }
                }
                Err(err) => debug!(error = ?err, "line editor unavailable, reading stdin"),
            }
        }

        Console {
            source: Source::Piped(BufReader::new(tokio::io::stdin()).lines()),
            sink: Sink::Plain {
                stdout: io::stdout(),
                stderr: io::stderr(),
            },
        }
    }

    pub async fn read(&mut self) -> io::Result<Input> {
        match &mut self.source {
            Source::Editor { editor, prompt } => {
                let line = match editor.readline().await {
                    Ok(line) => line,
                    Err(ReadlineError::Eof | ReadlineError::Closed) => return Ok(Input::Eof),
                    Err(ReadlineError::Interrupted) => return Ok(Input::Interrupted),
                    Err(ReadlineError::IO(err)) => return Err(err),
                };
                editor.add_history_entry(line.clone());

                // the editor clears the submitted line, keep it in the scrollback
                writeln!(self.sink.out(), "{}{}", prompt, line)?;
                Ok(Input::Line(line))
            }
            Source::Piped(lines) => Ok(match lines.next_line().await? {
                Some(line) => Input::Line(line),
                None => Input::Eof,
            }),
        }
    }

    pub fn out(&mut self) -> &mut dyn Write {
        self.sink.out()
    }

    pub fn err(&mut self) -> &mut dyn Write {
        match &mut self.sink {
            Sink::Editor(writer) => writer,
            Sink::Plain { stderr, .. } => stderr,
        }
    }
}

impl Sink {
    fn out(&mut self) -> &mut dyn Write {
        match self {
            Sink::Editor(writer) => writer,
            Sink::Plain { stdout, .. } => stdout,
        }
    }
}
