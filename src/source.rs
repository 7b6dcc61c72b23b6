//! Cloned source trees and the run-wide clone cache
//!
//! A [`ClonePlan`] names a repository and a ref. The ref is tried as a
//! branch, then a tag, then a raw commit; the first success wins and every
//! attempt writes to the same target. Shared clones are cached per plan for
//! the whole run and serialised on a per-plan lock; scenarios get their own
//! copy through [`SourceStore::checkout`] so builds never touch the cache.
//!
//! # Example
//!
//! ```ignore
//! use kogito_bdd::source::{ClonePlan, GitCli, SourceStore};
//!
//! let store = SourceStore::new(Arc::new(GitCli::new()), run_dir.join("sources"));
//! let plan = ClonePlan::new("https://github.com/kiegroup/kogito-examples", "main");
//! let tree = store.checkout(&plan, &workspace.join("examples")).await?;
//! ```

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::command::{Command, CommandError};

/// How a ref is interpreted for one clone attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// Remote default branch, used when no ref is given
    Default,
    Branch,
    Tag,
    Commit,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RefKind::Default => "default branch",
            RefKind::Branch => "branch",
            RefKind::Tag => "tag",
            RefKind::Commit => "commit",
        })
    }
}

/// Repository and ref to materialise
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClonePlan {
    pub uri: String,
    pub reference: String,
}

impl ClonePlan {
    pub fn new(uri: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            reference: reference.into(),
        }
    }

    /// Stable content hash of the plan, used as cache directory name
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.uri.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.reference.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }

    fn attempts(&self) -> &'static [RefKind] {
        if self.reference.is_empty() {
            &[RefKind::Default]
        } else {
            &[RefKind::Branch, RefKind::Tag, RefKind::Commit]
        }
    }
}

/// One failed resolution attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneAttempt {
    pub kind: RefKind,
    pub error: String,
}

/// Errors from cloning
#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    #[error("cannot clone {uri} at '{reference}':{}", render_attempts(.attempts))]
    AllAttemptsFailed {
        uri: String,
        reference: String,
        attempts: Vec<CloneAttempt>,
    },

    #[error("cannot prepare {path}: {reason}")]
    Workspace { path: PathBuf, reason: String },

    #[error("clone of {uri} cancelled")]
    Cancelled { uri: String },
}

fn render_attempts(attempts: &[CloneAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("\n  as {}: {}", a.kind, a.error.lines().next().unwrap_or_default()))
        .collect()
}

fn workspace_error(path: &Path, err: impl fmt::Display) -> CloneError {
    CloneError::Workspace {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Fetches one ref interpretation into an empty target
#[async_trait]
pub trait Cloner: Send + Sync {
    async fn clone_ref(
        &self,
        uri: &str,
        kind: RefKind,
        reference: &str,
        target: &Path,
    ) -> Result<(), CommandError>;
}

/// [`Cloner`] shelling out to the git CLI
#[derive(Debug, Clone)]
pub struct GitCli {
    git: Command,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            git: Command::git(),
        }
    }

    /// Use a preconfigured git command (deadline, cancellation, env)
    pub fn with_command(git: Command) -> Self {
        Self { git }
    }

    async fn git(&self, args: Vec<String>) -> Result<(), CommandError> {
        self.git.execute(args).await.map(|_| ())
    }
}

fn strings<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl Cloner for GitCli {
    async fn clone_ref(
        &self,
        uri: &str,
        kind: RefKind,
        reference: &str,
        target: &Path,
    ) -> Result<(), CommandError> {
        let target = target.display().to_string();
        match kind {
            RefKind::Default => self.git(strings(["clone", uri, &target])).await,
            RefKind::Branch => {
                let head = format!("refs/heads/{reference}");
                self.git(strings(["ls-remote", "--exit-code", "--heads", uri, &head]))
                    .await?;
                self.git(strings(["clone", "--single-branch", "--branch", reference, uri, &target]))
                    .await
            }
            RefKind::Tag => {
                let tag = format!("refs/tags/{reference}");
                self.git(strings(["ls-remote", "--exit-code", "--tags", uri, &tag]))
                    .await?;
                self.git(strings(["clone", "--branch", reference, uri, &target]))
                    .await
            }
            RefKind::Commit => {
                self.git(strings(["clone", "--no-checkout", uri, &target]))
                    .await?;
                self.git(strings(["-C", &target, "checkout", "--detach", reference]))
                    .await
            }
        }
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<PathBuf>>>;

/// Owner of every cloned tree in a run
pub struct SourceStore {
    cloner: Arc<dyn Cloner>,
    root: PathBuf,
    slots: Mutex<HashMap<String, Slot>>,
}

impl fmt::Debug for SourceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl SourceStore {
    pub fn new(cloner: Arc<dyn Cloner>, root: impl Into<PathBuf>) -> Self {
        Self {
            cloner,
            root: root.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot(&self, key: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(key.to_string()).or_default().clone()
    }

    /// Shared clone of `plan`, cloned at most once per run
    ///
    /// The returned tree belongs to the store. Read it, do not modify it.
    #[instrument(skip(self), fields(uri = %plan.uri, reference = %plan.reference))]
    pub async fn clone_shared(&self, plan: &ClonePlan) -> Result<PathBuf, CloneError> {
        let key = plan.cache_key();
        let slot = self.slot(&key);
        let mut cached = slot.lock().await;

        if let Some(path) = cached.as_ref() {
            debug!(path = %path.display(), "Using cached clone");
            return Ok(path.clone());
        }

        let target = self.root.join(&key);
        self.resolve(plan, &target).await?;
        *cached = Some(target.clone());
        Ok(target)
    }

    /// Private copy of `plan` at `target`, for a single scenario
    pub async fn checkout(&self, plan: &ClonePlan, target: &Path) -> Result<PathBuf, CloneError> {
        let shared = self.clone_shared(plan).await?;
        reset_dir(target).await?;

        let (from, to) = (shared.clone(), target.to_path_buf());
        tokio::task::spawn_blocking(move || copy_tree(&from, &to))
            .await
            .map_err(|e| workspace_error(target, e))?
            .map_err(|e| workspace_error(target, e))?;

        info!(from = %shared.display(), to = %target.display(), "Checked out source tree");
        Ok(target.to_path_buf())
    }

    /// Number of plans cloned so far
    ///
    /// Failed clones and clones still in flight are not counted.
    pub fn cached(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|slot| slot.try_lock().is_ok_and(|path| path.is_some()))
            .count()
    }

    /// Remove every shared clone
    pub async fn prune(&self) -> Result<(), CloneError> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).clear();
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(workspace_error(&self.root, e)),
        }
    }

    async fn resolve(&self, plan: &ClonePlan, target: &Path) -> Result<(), CloneError> {
        let mut attempts = Vec::new();

        for &kind in plan.attempts() {
            // every attempt starts from the same empty target
            reset_dir(target).await?;
            match self
                .cloner
                .clone_ref(&plan.uri, kind, &plan.reference, target)
                .await
            {
                Ok(()) => {
                    info!(uri = %plan.uri, reference = %plan.reference, as_kind = %kind, "Cloned");
                    return Ok(());
                }
                Err(e) if e.is_cancelled() => {
                    let _ = tokio::fs::remove_dir_all(target).await;
                    return Err(CloneError::Cancelled {
                        uri: plan.uri.clone(),
                    });
                }
                Err(e) => {
                    debug!(as_kind = %kind, error = %e, "Clone attempt failed");
                    attempts.push(CloneAttempt {
                        kind,
                        error: e.to_string(),
                    });
                }
            }
        }

        let _ = tokio::fs::remove_dir_all(target).await;
        warn!(uri = %plan.uri, reference = %plan.reference, "Every clone attempt failed");
        Err(CloneError::AllAttemptsFailed {
            uri: plan.uri.clone(),
            reference: plan.reference.clone(),
            attempts,
        })
    }
}

/// Leave `path` absent with its parent present
async fn reset_dir(path: &Path) -> Result<(), CloneError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(workspace_error(path, e)),
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| workspace_error(parent, e))?;
    }
    Ok(())
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dest = to.join(entry.file_name());
        if file_type.is_dir() {
            copy_tree(&entry.path(), &dest)?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            std::os::unix::fs::symlink(std::fs::read_link(entry.path())?, &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// In-process remote for tests: serves fixed branches, tags and commits
///
/// Each successful clone writes the configured files into the target plus
/// a `.ref` file naming how the ref was resolved.
#[derive(Default)]
pub struct MemoryRemote {
    branches: BTreeSet<String>,
    tags: BTreeSet<String>,
    commits: BTreeSet<String>,
    files: BTreeMap<String, String>,
    calls: Mutex<Vec<(RefKind, String, PathBuf)>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn branch(mut self, name: &str) -> Self {
        self.branches.insert(name.to_string());
        self
    }

    #[must_use]
    pub fn tag(mut self, name: &str) -> Self {
        self.tags.insert(name.to_string());
        self
    }

    #[must_use]
    pub fn commit(mut self, sha: &str) -> Self {
        self.commits.insert(sha.to_string());
        self
    }

    /// File present in every checkout, path relative to the repo root
    #[must_use]
    pub fn file(mut self, path: &str, contents: &str) -> Self {
        self.files.insert(path.to_string(), contents.to_string());
        self
    }

    /// Recorded `(kind, reference, target)` triples
    pub fn calls(&self) -> Vec<(RefKind, String, PathBuf)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Cloner for MemoryRemote {
    async fn clone_ref(
        &self,
        uri: &str,
        kind: RefKind,
        reference: &str,
        target: &Path,
    ) -> Result<(), CommandError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((kind, reference.to_string(), target.to_path_buf()));

        let known = match kind {
            RefKind::Default => true,
            RefKind::Branch => self.branches.contains(reference),
            RefKind::Tag => self.tags.contains(reference),
            RefKind::Commit => self.commits.contains(reference),
        };
        if !known {
            return Err(CommandError::NonZeroExit {
                program: "git".to_string(),
                code: Some(128),
                tail: format!("fatal: {kind} '{reference}' not found in {uri}"),
            });
        }

        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(target)?;
            for (path, contents) in &self.files {
                let dest = target.join(path);
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(dest, contents)?;
            }
            std::fs::write(target.join(".ref"), format!("{kind} {reference}"))
        };
        write().map_err(|e| CommandError::Spawn {
            program: "git".to_string(),
            reason: e.to_string(),
        })
    }
}
