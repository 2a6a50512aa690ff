//! Checks run before a batch starts: an existing image directory or output
//! file must be explicitly kept, replaced or refused.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use crate::config::Config;
use crate::fetch::image_dir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    ImageDirExists(PathBuf),
    OutputExists(PathBuf),
}

impl Conflict {
    pub fn path(&self) -> &PathBuf {
        match self {
            Conflict::ImageDirExists(p) | Conflict::OutputExists(p) => p,
        }
    }

    fn describe(&self) -> String {
        match self {
            Conflict::ImageDirExists(p) => format!("The directory '{}' already exists", p.display()),
            Conflict::OutputExists(p) => format!("The output file '{}' already exists", p.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Keep what is there
    Proceed,
    Abort,
    /// Delete it, then continue
    OverwriteRequested,
}

/// Decides what to do about a conflict
pub trait ConflictResolver {
    fn resolve(&self, conflict: &Conflict) -> Decision;
}

/// Answers every conflict the same way (`--force` / `--resume`)
pub struct FixedDecision(pub Decision);

impl ConflictResolver for FixedDecision {
    fn resolve(&self, _conflict: &Conflict) -> Decision {
        self.0
    }
}

/// Asks on the terminal. Anything but `y` aborts.
pub struct Prompt;

impl ConflictResolver for Prompt {
    fn resolve(&self, conflict: &Conflict) -> Decision {
        print!("{}. Delete it and proceed? [y/N] ", conflict.describe());
        let _ = io::stdout().flush();

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(n) if n > 0 && answer.trim().eq_ignore_ascii_case("y") => {
                Decision::OverwriteRequested
            }
            _ => Decision::Abort,
        }
    }
}

pub fn find_conflicts(config: &Config) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    let dir = image_dir(&config.storage_root, &config.imagedir);
    if dir.is_dir() {
        conflicts.push(Conflict::ImageDirExists(dir));
    }
    if config.output.exists() {
        conflicts.push(Conflict::OutputExists(config.output.clone()));
    }
    conflicts
}

/// Resolve every conflict, deleting what the resolver asks to replace.
/// Fails with `Operation Aborted` as soon as one is refused.
pub fn run_preflight(config: &Config, resolver: &dyn ConflictResolver) -> Result<()> {
    for conflict in find_conflicts(config) {
        match resolver.resolve(&conflict) {
            Decision::Proceed => {
                tracing::info!(path = %conflict.path().display(), "keeping existing files");
            }
            Decision::Abort => bail!("Operation Aborted: {}", conflict.describe()),
            Decision::OverwriteRequested => {
                let removed = match &conflict {
                    Conflict::ImageDirExists(dir) => fs::remove_dir_all(dir),
                    Conflict::OutputExists(file) => fs::remove_file(file),
                };
                removed.with_context(|| format!("Failed to delete '{}'", conflict.path().display()))?;
                tracing::info!(path = %conflict.path().display(), "deleted before run");
            }
        }
    }
    Ok(())
}
