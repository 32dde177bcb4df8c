//! The navigation shell.
//!
//! Interactive sessions read lines through `rustyline`, which also drives tab
//! completion; builds without the `repl-rustyline` feature read plain stdin.
//!
//! The only state is the stack of entities from the top-level entity down to
//! the current one; an empty stack is the root. Every command resolves
//! completely before the next line is read, and a failed command leaves the
//! stack as it was.

use crate::render;
use crate::viewer::Viewer;
use anyhow::{anyhow, Result};
use colored::Colorize;
use insdb_core::path::{ancestry, check_name, entity_path, resolve, resolve_location, Location};
use insdb_core::{kind_mismatch, Attributes, Backend, ChildKind, InsDbError, Object, ObjectKind};
use std::io::{self, Write};
use std::sync::Arc;
use uuid::Uuid;

pub struct Shell<W: Write> {
    backend: Arc<dyn Backend>,
    stack: Vec<Uuid>,
    viewer: Box<dyn Viewer>,
    out: W,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplControl {
    Continue,
    Exit,
}

impl<W: Write> Shell<W> {
    pub fn new(backend: Arc<dyn Backend>, viewer: Box<dyn Viewer>, out: W) -> Self {
        Self {
            backend,
            stack: Vec::new(),
            viewer,
            out,
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Current entity; `None` at the root.
    pub fn current(&self) -> Option<Uuid> {
        self.stack.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn prompt(&self) -> String {
        match entity_path(self.backend.as_ref(), self.current()) {
            Ok(path) => format!("{path}> "),
            Err(_) => "?> ".to_string(),
        }
    }

    /// Makes `path` the current entity, as `cd` does.
    pub fn enter(&mut self, path: &str) -> Result<()> {
        self.cmd_cd(&[path.to_string()])
    }

    /// Tokenizes and runs one command line.
    pub fn execute(&mut self, line: &str) -> Result<ReplControl> {
        let tokens = split_command_line(line);
        self.dispatch(&tokens)
    }

    fn dispatch(&mut self, tokens: &[String]) -> Result<ReplControl> {
        let Some((cmd, args)) = tokens.split_first() else {
            return Ok(ReplControl::Continue);
        };
        tracing::debug!(command = cmd.as_str(), ?args, "dispatch");

        match cmd.as_str() {
            "quit" | "exit" => return Ok(ReplControl::Exit),
            "help" | "?" => self.cmd_help(args)?,
            "ls" => self.cmd_ls(args)?,
            "cd" => self.cmd_cd(args)?,
            "pwd" => {
                let path = entity_path(self.backend.as_ref(), self.current())?;
                writeln!(self.out, "{path}")?;
            }
            "show" => self.cmd_show(args)?,
            "tree" => {
                let entity = match args {
                    [] => self.current(),
                    [target] => self.entity_at(target)?,
                    _ => return Err(anyhow!("usage: tree [path]")),
                };
                render::tree(&mut self.out, self.backend.as_ref(), entity)?;
            }
            "metadata" => {
                let data_file = match self.single_object("metadata", args)? {
                    Object::DataFile(data_file) => data_file,
                    other => return Err(kind_mismatch(&other, ObjectKind::DataFile).into()),
                };
                render::metadata(&mut self.out, &data_file)?;
            }
            "open" => self.cmd_open(args)?,
            "releases" => self.cmd_releases(args)?,
            "download" => {
                let uuid = match self.single_object("download", args)? {
                    Object::DataFile(data_file) => data_file.uuid,
                    other => return Err(kind_mismatch(&other, ObjectKind::DataFile).into()),
                };
                let path = self.backend.download(uuid)?;
                writeln!(self.out, "downloaded {uuid} to {}", path.display())?;
            }
            "mkdir" => self.cmd_mkdir(args)?,
            "rm" => self.cmd_rm(args)?,
            "set" => self.cmd_set(args)?,
            other => {
                return Err(anyhow!(
                    "unknown command '{other}' (type `help` for a list)"
                ))
            }
        }
        Ok(ReplControl::Continue)
    }

    /// Resolves an entity-or-root argument against the current entity.
    fn entity_at(&self, input: &str) -> Result<Option<Uuid>> {
        match resolve_location(self.backend.as_ref(), input, self.current())? {
            Location::Root => Ok(None),
            Location::Object(Object::Entity(entity)) => Ok(Some(entity.uuid)),
            Location::Object(_) => Err(InsDbError::NotAnEntity(input.to_string()).into()),
        }
    }

    fn single_object(&self, cmd: &str, args: &[String]) -> Result<Object> {
        let [target] = args else {
            return Err(anyhow!("usage: {cmd} <uuid>"));
        };
        Ok(resolve(self.backend.as_ref(), target, self.current())?)
    }

    fn require_writable(&self, cmd: &str) -> Result<()> {
        if self.backend.capabilities().writable {
            Ok(())
        } else {
            Err(InsDbError::read_only(cmd).into())
        }
    }

    fn cmd_ls(&mut self, args: &[String]) -> Result<()> {
        let mut show_uuids = true;
        let mut entities_only = false;
        let mut target = None;
        for arg in args {
            match arg.as_str() {
                "-s" => show_uuids = false,
                "-e" => entities_only = true,
                "-se" | "-es" => {
                    show_uuids = false;
                    entities_only = true;
                }
                flag if flag.starts_with('-') => {
                    return Err(anyhow!("usage: ls [-s] [-e] [path]"))
                }
                path if target.is_none() => target = Some(path),
                _ => return Err(anyhow!("usage: ls [-s] [-e] [path]")),
            }
        }

        let entity = match target {
            Some(path) => self.entity_at(path)?,
            None => self.current(),
        };
        let mut entries = self.backend.children(entity)?;
        if entities_only {
            entries.retain(|entry| entry.kind == ChildKind::Entity);
        }
        render::children(&mut self.out, &entries, show_uuids)
    }

    fn cmd_cd(&mut self, args: &[String]) -> Result<()> {
        let target = match args {
            [] => "/",
            [target] => target.as_str(),
            _ => return Err(anyhow!("usage: cd <path>")),
        };
        if target == ".." {
            self.stack.pop();
            return Ok(());
        }

        let entity = self.entity_at(target).map_err(|e| -> anyhow::Error {
            match e.downcast::<InsDbError>() {
                Ok(InsDbError::NotFound(uuid)) => {
                    InsDbError::invalid_path(target, format!("no object with UUID {uuid}")).into()
                }
                Ok(other) => other.into(),
                Err(other) => other,
            }
        })?;
        // Compute the whole new stack before touching the current one.
        let stack = match entity {
            Some(uuid) => ancestry(self.backend.as_ref(), uuid)?,
            None => Vec::new(),
        };
        self.stack = stack;
        Ok(())
    }

    fn cmd_show(&mut self, args: &[String]) -> Result<()> {
        let object = match args {
            [] => match self.current() {
                Some(uuid) => self.backend.resolve_uuid(uuid)?,
                None => return Err(anyhow!("usage: show <path|uuid>")),
            },
            [target] => resolve(self.backend.as_ref(), target, self.current())?,
            _ => return Err(anyhow!("usage: show <path|uuid>")),
        };
        render::object(&mut self.out, self.backend.as_ref(), &object)
    }

    fn cmd_open(&mut self, args: &[String]) -> Result<()> {
        let uuid = match self.single_object("open", args)? {
            Object::DataFile(data_file) => data_file.uuid,
            Object::FormatSpec(spec) => spec.uuid,
            other => return Err(kind_mismatch(&other, ObjectKind::DataFile).into()),
        };
        let path = self.backend.local_copy(uuid)?;
        writeln!(self.out, "opening {}", path.display())?;
        self.viewer.open(&path)
    }

    fn cmd_releases(&mut self, args: &[String]) -> Result<()> {
        match args {
            [] => {
                let releases = self.backend.releases()?;
                render::releases(&mut self.out, &releases)
            }
            [tag] => {
                let release = self
                    .backend
                    .release(tag)?
                    .ok_or_else(|| InsDbError::invalid_path(tag.as_str(), "no such release"))?;
                render::release(&mut self.out, self.backend.as_ref(), &release)
            }
            _ => Err(anyhow!("usage: releases [tag]")),
        }
    }

    fn cmd_mkdir(&mut self, args: &[String]) -> Result<()> {
        self.require_writable("mkdir")?;
        let [name] = args else {
            return Err(anyhow!("usage: mkdir <name>"));
        };
        if let Err(reason) = check_name(name, self.current().is_none()) {
            return Err(InsDbError::invalid_path(name.as_str(), reason).into());
        }

        let parent = self
            .current()
            .map(|uuid| uuid.to_string())
            .unwrap_or_else(|| "/".to_string());
        let mut attributes = Attributes::new();
        attributes.insert("name".to_string(), serde_json::Value::String(name.clone()));
        let uuid = self.backend.create(ObjectKind::Entity, &parent, &attributes)?;
        writeln!(self.out, "created {name} ({uuid})")?;
        Ok(())
    }

    fn cmd_rm(&mut self, args: &[String]) -> Result<()> {
        self.require_writable("rm")?;
        let object = self.single_object("rm", args)?;
        let uuid = object.uuid();
        self.backend.delete(uuid)?;
        if let Some(position) = self.stack.iter().position(|entry| *entry == uuid) {
            self.stack.truncate(position);
        }
        writeln!(self.out, "removed {} {} ({uuid})", object.kind(), object.name())?;
        Ok(())
    }

    fn cmd_set(&mut self, args: &[String]) -> Result<()> {
        self.require_writable("set")?;
        let parts = args.split_first().filter(|(_, rest)| !rest.is_empty());
        let Some((target, assignments)) = parts else {
            return Err(anyhow!("usage: set <uuid> <key>=<value>..."));
        };
        let attributes = parse_assignments(assignments)?;
        let object = resolve(self.backend.as_ref(), target, self.current())?;
        self.backend.patch(object.uuid(), &attributes)?;
        writeln!(self.out, "updated {} {}", object.kind(), object.uuid())?;
        Ok(())
    }

    fn cmd_help(&mut self, args: &[String]) -> Result<()> {
        match args {
            [] => {
                writeln!(self.out, "{}", "Commands:".bold())?;
                for (name, usage, about) in COMMAND_HELP {
                    writeln!(self.out, "  {:<28} {about}", usage.replace("{}", name))?;
                }
            }
            [name] => {
                let (_, usage, about) = COMMAND_HELP
                    .iter()
                    .find(|(candidate, _, _)| *candidate == name.as_str())
                    .ok_or_else(|| anyhow!("no help for '{name}'"))?;
                writeln!(self.out, "{}", usage.replace("{}", name))?;
                writeln!(self.out, "  {about}")?;
            }
            _ => return Err(anyhow!("usage: help [command]")),
        }
        Ok(())
    }
}

/// `(command, usage, description)`; `{}` in the usage stands for the command name.
const COMMAND_HELP: &[(&str, &str, &str)] = &[
    ("ls", "{} [-s] [-e] [path]", "list children (-s: no UUIDs, -e: entities only)"),
    ("cd", "{} [path|uuid|..]", "change the current entity"),
    ("pwd", "{}", "print the path of the current entity"),
    ("show", "{} <path|uuid>", "show an object and its relationships"),
    ("tree", "{} [path]", "print the subtree under an entity"),
    ("metadata", "{} <uuid>", "print the metadata of a data file"),
    ("open", "{} <uuid>", "open a data file or format document"),
    ("releases", "{} [tag]", "list releases, or the contents of one"),
    ("download", "{} <uuid>", "fetch a data file into the download directory"),
    ("mkdir", "{} <name>", "create an entity under the current one"),
    ("rm", "{} <path|uuid>", "delete an object"),
    ("set", "{} <uuid> <key>=<value>...", "update attributes of an object"),
    ("help", "{} [command]", "show this help"),
    ("quit", "{}", "leave the shell (also `exit`, Ctrl-D)"),
];

/// `key=value` pairs; values that parse as JSON keep their type, anything else is a string.
fn parse_assignments(assignments: &[String]) -> Result<Attributes> {
    let mut attributes = Attributes::new();
    for assignment in assignments {
        let (key, value) = assignment
            .split_once('=')
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| anyhow!("expected <key>=<value>, got '{assignment}'"))?;
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        attributes.insert(key.to_string(), value);
    }
    Ok(attributes)
}

/// Runs each command in order; the first failure stops the run.
pub fn cmd_repl_script<W: Write>(shell: &mut Shell<W>, commands: &[String]) -> Result<()> {
    for line in commands {
        if shell.execute(line)? == ReplControl::Exit {
            break;
        }
    }
    Ok(())
}

pub fn cmd_repl(shell: Shell<io::Stdout>) -> Result<()> {
    #[cfg(feature = "repl-rustyline")]
    {
        cmd_repl_rustyline(shell)
    }
    #[cfg(not(feature = "repl-rustyline"))]
    {
        cmd_repl_simple(shell)
    }
}

fn print_banner(shell: &Shell<io::Stdout>) {
    println!("{} {}", "InstrumentDB".green().bold(), shell.backend().describe());
    println!("Type `help` for commands. Type `quit` to leave.\n");
}

#[cfg(not(feature = "repl-rustyline"))]
fn cmd_repl_simple(mut shell: Shell<io::Stdout>) -> Result<()> {
    print_banner(&shell);

    let stdin = io::stdin();
    loop {
        print!("{}", shell.prompt().cyan().bold());
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match shell.execute(line) {
            Ok(ReplControl::Continue) => {}
            Ok(ReplControl::Exit) => break,
            Err(e) => eprintln!("{} {e}", "error:".red().bold()),
        }
    }

    Ok(())
}

#[cfg(feature = "repl-rustyline")]
fn cmd_repl_rustyline(mut shell: Shell<io::Stdout>) -> Result<()> {
    use crate::complete::ReplLineHelper;
    use rustyline::error::ReadlineError;
    use rustyline::{CompletionType, Config, Editor};

    print_banner(&shell);

    let config = Config::builder()
        .completion_type(CompletionType::List)
        .auto_add_history(false)
        .build();
    let helper = ReplLineHelper::new(Arc::clone(shell.backend()));
    let mut rl: Editor<ReplLineHelper, rustyline::history::DefaultHistory> =
        Editor::with_config(config).map_err(|e| anyhow!("failed to init rustyline: {e}"))?;
    rl.set_helper(Some(helper));

    loop {
        if let Some(helper) = rl.helper() {
            helper.set_current(shell.current());
        }

        let line = match rl.readline(&shell.prompt()) {
            Ok(l) => l,
            Err(ReadlineError::Eof) => break,
            Err(ReadlineError::Interrupted) => continue,
            Err(e) => return Err(anyhow!("readline error: {e}")),
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        rl.add_history_entry(line)
            .map_err(|e| anyhow!("failed to record history: {e}"))?;

        match shell.execute(line) {
            Ok(ReplControl::Continue) => {}
            Ok(ReplControl::Exit) => break,
            Err(e) => eprintln!("{} {e}", "error:".red().bold()),
        }
    }

    Ok(())
}

/// Splits on whitespace; double quotes group, backslash escapes the next character.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() || quoted {
                    out.push(std::mem::take(&mut current));
                }
                quoted = false;
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() || quoted {
        out.push(current);
    }

    out
}
