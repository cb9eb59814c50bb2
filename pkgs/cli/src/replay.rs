use log::{info, warn};
use memmap2::Mmap;
use pageheap_core::{ExpiryQueue, HeapConfig, HeapError, TimerId};
use std::{
    collections::HashMap,
    error::Error,
    fs::File,
    io,
    path::{Path, PathBuf},
};

use crate::line_up::{LineError, LineUp};

#[derive(thiserror::Error, Debug)]
pub enum ReplayError {
    #[error("line {line}: {msg}")]
    Parse { line: usize, msg: String },
    #[error("line {line}: no pending timer named {name:?}")]
    UnknownTimer { line: usize, name: String },
    #[error("line {line}: timer {name:?} is already pending")]
    DuplicateTimer { line: usize, name: String },
    #[error(transparent)]
    Heap(#[from] HeapError),
}

/// One statement of a replay script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Schedule { name: &'a str, deadline: u64 },
    Reschedule { name: &'a str, deadline: u64 },
    Cancel { name: &'a str },
    Expire { now: u64 },
    Peek,
}

/// Parses one script line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<Command<'_>>, ReplayError> {
    let line = line.split('#').next().unwrap_or("").trim();
    if line.is_empty() {
        return Ok(None);
    }

    let parse_err = |msg: String| ReplayError::Parse { line: line_no, msg };
    let number = |s: Option<&str>, what: &str| -> Result<u64, ReplayError> {
        let s = s.ok_or_else(|| parse_err(format!("missing {}", what)))?;
        s.parse::<u64>()
            .map_err(|e| parse_err(format!("invalid {} {:?}: {}", what, s, e)))
    };

    let mut words = line.split_ascii_whitespace();
    let verb = words.next().unwrap_or("");
    let command = match verb {
        "schedule" | "reschedule" => {
            let name = words
                .next()
                .ok_or_else(|| parse_err("missing timer name".to_string()))?;
            let deadline = number(words.next(), "deadline")?;
            if verb == "schedule" {
                Command::Schedule { name, deadline }
            } else {
                Command::Reschedule { name, deadline }
            }
        }
        "cancel" => Command::Cancel {
            name: words
                .next()
                .ok_or_else(|| parse_err("missing timer name".to_string()))?,
        },
        "expire" => Command::Expire {
            now: number(words.next(), "time")?,
        },
        "peek" => Command::Peek,
        other => return Err(parse_err(format!("unknown command {:?}", other))),
    };

    if let Some(extra) = words.next() {
        return Err(parse_err(format!("unexpected argument {:?}", extra)));
    }
    Ok(Some(command))
}

/// Applies replay script lines to an [`ExpiryQueue`] of named timers.
pub struct Replay {
    queue: ExpiryQueue<String>,
    names: HashMap<String, TimerId>,
    line_no: usize,
    output: Vec<String>,
}

impl Replay {
    pub fn new(config: HeapConfig) -> Result<Self, ReplayError> {
        Ok(Replay {
            queue: ExpiryQueue::with_config(config)?,
            names: HashMap::new(),
            line_no: 0,
            output: Vec::new(),
        })
    }

    /// Number of pending timers.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Lines produced so far.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    pub fn apply_line(&mut self, raw: &[u8]) -> Result<(), ReplayError> {
        self.line_no += 1;
        let line_no = self.line_no;

        let text = std::str::from_utf8(raw).map_err(|e| ReplayError::Parse {
            line: line_no,
            msg: format!("invalid UTF-8: {}", e),
        })?;
        let Some(command) = parse_line(text, line_no)? else {
            return Ok(());
        };

        match command {
            Command::Schedule { name, deadline } => {
                if self.names.contains_key(name) {
                    return Err(ReplayError::DuplicateTimer {
                        line: line_no,
                        name: name.to_string(),
                    });
                }
                let id = self.queue.schedule(deadline, name.to_string())?;
                self.names.insert(name.to_string(), id);
            }
            Command::Reschedule { name, deadline } => {
                let id = self.lookup(name, line_no)?;
                self.queue.reschedule(id, deadline)?;
            }
            Command::Cancel { name } => {
                let id = self.lookup(name, line_no)?;
                self.queue.cancel(id);
                self.names.remove(name);
            }
            Command::Expire { now } => {
                while let Some((_, deadline, name)) = self.queue.pop_expired(now) {
                    self.names.remove(&name);
                    self.output.push(format!("expired {} {}", name, deadline));
                }
            }
            Command::Peek => {
                let line = match self.queue.next_deadline() {
                    Some(deadline) => format!("next {}", deadline),
                    None => "next none".to_string(),
                };
                self.output.push(line);
            }
        }
        Ok(())
    }

    fn lookup(&self, name: &str, line_no: usize) -> Result<TimerId, ReplayError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| ReplayError::UnknownTimer {
                line: line_no,
                name: name.to_string(),
            })
    }
}

/// Runs a replay script from `path`, or from stdin when `path` is `-`.
pub fn replay(path: PathBuf, config: HeapConfig, bufsize: usize) -> Result<(), Box<dyn Error>> {
    crate::cli::init_logging();

    let mut replay = Replay::new(config)?;
    let mut handler = |line: &[u8]| -> Result<(), ReplayError> {
        replay.apply_line(line)?;
        for out in replay.take_output() {
            println!("{}", out);
        }
        Ok(())
    };

    if path == Path::new("-") {
        info!("Replaying from stdin");
        LineUp::process_reader(&mut io::stdin().lock(), bufsize, &mut handler)
            .map_err(flatten)?;
    } else {
        info!("Replaying {:?}", path);
        let file = File::open(&path)?;
        // SAFETY: mapping a file is safe as long as the file isn't modified concurrently.
        let mmap = unsafe { Mmap::map(&file)? };

        let mut lines = LineUp::new(bufsize);
        lines.feed(&mmap, &mut handler).map_err(flatten)?;
        lines.finish(&mut handler).map_err(flatten)?;
    }

    if replay.pending() > 0 {
        warn!("{} timer(s) still pending at end of script", replay.pending());
    }
    Ok(())
}

fn flatten(e: LineError<ReplayError>) -> Box<dyn Error> {
    match e {
        LineError::Handler(e) => Box::new(e),
        other => Box::new(other),
    }
}
