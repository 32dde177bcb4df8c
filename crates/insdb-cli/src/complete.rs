//! Tab completion: candidate lookup and the completion policy.
//!
//! Zero matches leave the input alone, one match completes it fully, several
//! matches complete their longest common prefix and are all listed.

use insdb_core::path::{resolve_location, Location};
use insdb_core::{Backend, ChildKind, ObjectKind};
use uuid::Uuid;

pub const COMMANDS: &[&str] = &[
    "cd", "download", "exit", "help", "ls", "metadata", "mkdir", "open", "pwd", "quit",
    "releases", "rm", "set", "show", "tree",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Unchanged,
    Complete(String),
    Partial { prefix: String, candidates: Vec<String> },
}

pub fn complete_token(token: &str, candidates: &[String]) -> Completion {
    let mut matches: Vec<String> = candidates
        .iter()
        .filter(|candidate| candidate.starts_with(token))
        .cloned()
        .collect();
    matches.sort();
    matches.dedup();

    match matches.len() {
        0 => Completion::Unchanged,
        1 => Completion::Complete(matches.remove(0)),
        _ => Completion::Partial {
            prefix: longest_common_prefix(&matches),
            candidates: matches,
        },
    }
}

pub fn longest_common_prefix(items: &[String]) -> String {
    let Some((first, rest)) = items.split_first() else {
        return String::new();
    };
    let mut end = first.len();
    for item in rest {
        end = first
            .char_indices()
            .zip(item.chars())
            .take_while(|((_, a), b)| a == b)
            .map(|((i, a), _)| i + a.len_utf8())
            .last()
            .unwrap_or(0)
            .min(end);
    }
    first[..end].to_string()
}

/// What a command expects as its argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgKind {
    Command,
    EntityPath,
    AnyPath,
    Uuids(&'static [ObjectKind]),
    ReleaseTag,
    Nothing,
}

fn arg_kind(command: &str) -> ArgKind {
    match command {
        "help" => ArgKind::Command,
        "cd" | "ls" | "tree" => ArgKind::EntityPath,
        "show" | "rm" => ArgKind::AnyPath,
        "metadata" => ArgKind::Uuids(&[ObjectKind::DataFile]),
        "open" | "download" => ArgKind::Uuids(&[ObjectKind::DataFile, ObjectKind::FormatSpec]),
        "set" => ArgKind::Uuids(&ObjectKind::ALL),
        "releases" => ArgKind::ReleaseTag,
        _ => ArgKind::Nothing,
    }
}

/// Candidates for the token being typed; `previous` holds the tokens before it.
pub fn candidates_for(
    backend: &dyn Backend,
    current: Option<Uuid>,
    previous: &[&str],
    token: &str,
) -> Vec<String> {
    let Some(command) = previous.first() else {
        return COMMANDS.iter().map(|c| c.to_string()).collect();
    };
    if previous.len() > 1 && *command != "ls" {
        return Vec::new();
    }
    match arg_kind(command) {
        ArgKind::Command => COMMANDS.iter().map(|c| c.to_string()).collect(),
        ArgKind::EntityPath => path_candidates(backend, current, token, false),
        ArgKind::AnyPath => {
            let mut candidates = path_candidates(backend, current, token, true);
            candidates.extend(uuid_candidates(backend, &ObjectKind::ALL, token));
            candidates
        }
        ArgKind::Uuids(kinds) => uuid_candidates(backend, kinds, token),
        ArgKind::ReleaseTag => backend
            .releases()
            .map(|releases| releases.into_iter().map(|r| r.tag).collect())
            .unwrap_or_default(),
        ArgKind::Nothing => Vec::new(),
    }
}

/// Children of the directory part of `token`, spelled with that directory part.
fn path_candidates(
    backend: &dyn Backend,
    current: Option<Uuid>,
    token: &str,
    with_quantities: bool,
) -> Vec<String> {
    let (dir, shown) = match token.rfind('/') {
        Some(0) => ("/", "/".to_string()),
        Some(i) => (&token[..i], format!("{}/", &token[..i])),
        None => ("", String::new()),
    };
    let entity = if dir.is_empty() {
        current
    } else {
        match resolve_location(backend, dir, current) {
            Ok(Location::Root) => None,
            Ok(Location::Object(object)) if object.kind() == ObjectKind::Entity => {
                Some(object.uuid())
            }
            Ok(_) => return Vec::new(),
            Err(e) => {
                tracing::debug!(dir, error = %e, "no completion for directory");
                return Vec::new();
            }
        }
    };
    match backend.children(entity) {
        Ok(children) => children
            .into_iter()
            .filter(|child| with_quantities || child.kind == ChildKind::Entity)
            .map(|child| format!("{shown}{}", child.name))
            .collect(),
        Err(e) => {
            tracing::debug!(error = %e, "no completion for children");
            Vec::new()
        }
    }
}

/// Known UUIDs; hyphen-less tokens longer than the first group match the simple form.
fn uuid_candidates(backend: &dyn Backend, kinds: &[ObjectKind], token: &str) -> Vec<String> {
    let simple = !token.contains('-') && token.len() > 8;
    kinds
        .iter()
        .flat_map(|kind| backend.known_uuids(*kind))
        .map(|uuid| {
            if simple {
                uuid.simple().to_string()
            } else {
                uuid.hyphenated().to_string()
            }
        })
        .collect()
}

#[cfg(feature = "repl-rustyline")]
pub use line_helper::ReplLineHelper;

#[cfg(feature = "repl-rustyline")]
mod line_helper {
    use super::{candidates_for, complete_token, Completion};
    use insdb_core::Backend;
    use parking_lot::RwLock;
    use rustyline::completion::{Completer, Pair};
    use rustyline::Context;
    use std::sync::Arc;
    use uuid::Uuid;

    /// Shell state the completer needs; refreshed before each prompt.
    #[derive(Debug, Default, Clone)]
    pub struct CompletionData {
        pub current: Option<Uuid>,
    }

    pub struct ReplLineHelper {
        backend: Arc<dyn Backend>,
        data: Arc<RwLock<CompletionData>>,
    }

    impl ReplLineHelper {
        pub fn new(backend: Arc<dyn Backend>) -> Self {
            Self {
                backend,
                data: Arc::new(RwLock::new(CompletionData::default())),
            }
        }

        pub fn set_current(&self, current: Option<Uuid>) {
            self.data.write().current = current;
        }

        fn pairs(items: Vec<String>) -> Vec<Pair> {
            items
                .into_iter()
                .map(|item| Pair {
                    display: item.clone(),
                    replacement: item,
                })
                .collect()
        }
    }

    impl rustyline::Helper for ReplLineHelper {}

    impl rustyline::highlight::Highlighter for ReplLineHelper {}

    impl rustyline::hint::Hinter for ReplLineHelper {
        type Hint = String;
        fn hint(&self, _line: &str, _pos: usize, _ctx: &Context<'_>) -> Option<String> {
            None
        }
    }

    impl rustyline::validate::Validator for ReplLineHelper {}

    impl Completer for ReplLineHelper {
        type Candidate = Pair;

        fn complete(
            &self,
            line: &str,
            pos: usize,
            _ctx: &Context<'_>,
        ) -> rustyline::Result<(usize, Vec<Pair>)> {
            let start = line[..pos]
                .rfind(|c: char| c.is_whitespace())
                .map(|i| i + 1)
                .unwrap_or(0);
            let word = &line[start..pos];
            let previous: Vec<&str> = line[..start].split_whitespace().collect();
            let current = self.data.read().current;

            let candidates = candidates_for(self.backend.as_ref(), current, &previous, word);
            let pairs = match complete_token(word, &candidates) {
                Completion::Unchanged => Vec::new(),
                Completion::Complete(full) => Self::pairs(vec![full]),
                Completion::Partial { candidates, .. } => Self::pairs(candidates),
            };
            Ok((start, pairs))
        }
    }
}
