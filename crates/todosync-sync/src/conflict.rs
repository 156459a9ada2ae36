//! Conflict resolution capability.
//!
//! The merge asks a [`ConflictResolver`] whenever both sides changed the same
//! item, or one side deleted what the other still has. Answers are binary:
//! keep the local version or take the server's.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, BufRead, BufReader, Stdin, Stdout, Write};

use todosync_core::{ItemId, TodoRecord};

use crate::error::ResolveError;

/// Answer to a conflict prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    KeepLocal,
    TakeRemote,
}

/// Shape of a conflict, without the records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Diverged,
    RemoteDeleted,
    LocalDeleted,
}

/// A conflict the merge cannot settle on its own.
#[derive(Debug, Clone, Copy)]
pub enum Conflict<'a> {
    /// Same revision on both sides, different content.
    Diverged {
        local: &'a TodoRecord,
        remote: &'a TodoRecord,
    },
    /// The server no longer has an item that is still live locally.
    ///
    /// `KeepLocal` re-sends it; `TakeRemote` deletes it locally.
    RemoteDeleted { local: &'a TodoRecord },
    /// The item was deleted locally while the server holds a different
    /// version at the same revision.
    ///
    /// `KeepLocal` confirms the deletion; `TakeRemote` restores the server copy.
    LocalDeleted {
        local: &'a TodoRecord,
        remote: &'a TodoRecord,
    },
}

impl Conflict<'_> {
    pub fn id(&self) -> ItemId {
        match self {
            Conflict::Diverged { local, .. }
            | Conflict::RemoteDeleted { local }
            | Conflict::LocalDeleted { local, .. } => local.id,
        }
    }

    pub fn kind(&self) -> ConflictKind {
        match self {
            Conflict::Diverged { .. } => ConflictKind::Diverged,
            Conflict::RemoteDeleted { .. } => ConflictKind::RemoteDeleted,
            Conflict::LocalDeleted { .. } => ConflictKind::LocalDeleted,
        }
    }
}

/// Something that can settle conflicts.
pub trait ConflictResolver: Send {
    fn resolve(&mut self, conflict: &Conflict<'_>) -> Result<Choice, ResolveError>;
}

impl<R: ConflictResolver + ?Sized> ConflictResolver for &mut R {
    fn resolve(&mut self, conflict: &Conflict<'_>) -> Result<Choice, ResolveError> {
        (**self).resolve(conflict)
    }
}

impl<R: ConflictResolver + ?Sized> ConflictResolver for Box<R> {
    fn resolve(&mut self, conflict: &Conflict<'_>) -> Result<Choice, ResolveError> {
        (**self).resolve(conflict)
    }
}

/// Always gives the same answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedResolver(pub Choice);

impl ConflictResolver for FixedResolver {
    fn resolve(&mut self, _conflict: &Conflict<'_>) -> Result<Choice, ResolveError> {
        Ok(self.0)
    }
}

/// Resolver backed by a closure.
pub struct FnResolver<F>(pub F);

impl<F> FnResolver<F>
where
    F: FnMut(&Conflict<'_>) -> Choice + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ConflictResolver for FnResolver<F>
where
    F: FnMut(&Conflict<'_>) -> Choice + Send,
{
    fn resolve(&mut self, conflict: &Conflict<'_>) -> Result<Choice, ResolveError> {
        Ok((self.0)(conflict))
    }
}

/// Replays a fixed list of answers and records what it was asked.
///
/// Fails with [`ResolveError::Exhausted`] once the answers run out.
#[derive(Debug, Clone, Default)]
pub struct ScriptedResolver {
    answers: VecDeque<Choice>,
    asked: Vec<(ItemId, ConflictKind)>,
}

impl ScriptedResolver {
    pub fn new(answers: impl IntoIterator<Item = Choice>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            asked: Vec::new(),
        }
    }

    /// Conflicts seen so far, in order.
    pub fn asked(&self) -> &[(ItemId, ConflictKind)] {
        &self.asked
    }

    /// Answers not yet used.
    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl ConflictResolver for ScriptedResolver {
    fn resolve(&mut self, conflict: &Conflict<'_>) -> Result<Choice, ResolveError> {
        self.asked.push((conflict.id(), conflict.kind()));
        self.answers
            .pop_front()
            .ok_or(ResolveError::Exhausted(conflict.id()))
    }
}

/// Asks on a terminal-like reader/writer pair.
///
/// Answers are `L` (keep local) or `R` (take remote), case-insensitive.
/// Anything else re-prompts; end of input is an error.
pub struct ConsoleResolver<R, W> {
    input: R,
    output: W,
}

impl ConsoleResolver<BufReader<Stdin>, Stdout> {
    /// Prompt on standard input and output.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsoleResolver<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Give back the reader and writer.
    pub fn into_inner(self) -> (R, W) {
        (self.input, self.output)
    }

    fn describe(&mut self, conflict: &Conflict<'_>) -> io::Result<()> {
        match conflict {
            Conflict::Diverged { local, remote } => {
                writeln!(self.output, "Item {} was changed on both sides.", local.id)?;
                writeln!(self.output, "  local:  {}", Summary(local))?;
                writeln!(self.output, "  remote: {}", Summary(remote))?;
                write!(self.output, "Keep [L]ocal or take [R]emote? ")?;
            }
            Conflict::RemoteDeleted { local } => {
                writeln!(self.output, "Item {} was deleted on the server.", local.id)?;
                writeln!(self.output, "  local:  {}", Summary(local))?;
                write!(self.output, "[L] keep local copy or [R] delete it? ")?;
            }
            Conflict::LocalDeleted { local, remote } => {
                writeln!(
                    self.output,
                    "Item {} was deleted here but changed on the server.",
                    local.id
                )?;
                writeln!(self.output, "  remote: {}", Summary(remote))?;
                write!(self.output, "[L] delete it or [R] restore server copy? ")?;
            }
        }
        self.output.flush()
    }
}

impl<R, W> ConflictResolver for ConsoleResolver<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn resolve(&mut self, conflict: &Conflict<'_>) -> Result<Choice, ResolveError> {
        self.describe(conflict)?;

        let mut line = String::new();
        loop {
            line.clear();
            if self.input.read_line(&mut line)? == 0 {
                return Err(ResolveError::InputClosed);
            }

            match line.trim() {
                "l" | "L" => return Ok(Choice::KeepLocal),
                "r" | "R" => return Ok(Choice::TakeRemote),
                _ => {
                    write!(self.output, "Please answer L or R: ")?;
                    self.output.flush()?;
                }
            }
        }
    }
}

/// One-line rendering of an item for prompts.
struct Summary<'a>(&'a TodoRecord);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.0.content;
        write!(
            f,
            "[rev {}] {} | due {} | prio {} | {} | {}",
            self.0.revision, c.title, c.deadline, c.priority, c.status, c.description
        )
    }
}
