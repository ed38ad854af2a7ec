//! git
//!
//! Single interface for all Git operations.
//!
//! # Architecture
//!
//! This module is the only doorway to Git. The orchestrator needs a
//! narrow surface: dirty detection, stage-all, the atomic completion
//! commit, HEAD resolution, and worktree creation for parallel mode.
//! No other module imports `git2`.
//!
//! # Invariants
//!
//! - A missing repository is not an error for callers that only want to
//!   know whether commits are possible ([`Repo::try_open`])
//! - The completion commit stages everything (`add --all` semantics)
//!   and reports the new HEAD id

use std::path::Path;

use git2::{IndexAddOption, Repository, Signature, WorktreeAddOptions};
use thiserror::Error;

/// Errors from Git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Not inside a Git repository.
    #[error("not a git repository: {path}")]
    NotARepo { path: String },

    /// Underlying git2 failure.
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
}

/// A repository handle.
pub struct Repo {
    inner: Repository,
}

impl Repo {
    /// Open the repository containing `path`.
    pub fn open(path: &Path) -> Result<Self, GitError> {
        let inner = Repository::discover(path).map_err(|_| GitError::NotARepo {
            path: path.display().to_string(),
        })?;
        Ok(Self { inner })
    }

    /// Open the repository containing `path`, or `None` when there is
    /// no repository (commits are then skipped, not failed).
    pub fn try_open(path: &Path) -> Option<Self> {
        Repository::discover(path).ok().map(|inner| Self { inner })
    }

    /// Whether the worktree has any uncommitted changes (including
    /// untracked files).
    pub fn is_dirty(&self) -> Result<bool, GitError> {
        let mut options = git2::StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = self.inner.statuses(Some(&mut options))?;
        Ok(!statuses.is_empty())
    }

    /// Stage every change in the worktree (`git add --all -- .`).
    pub fn stage_all(&self) -> Result<(), GitError> {
        let mut index = self.inner.index()?;
        index.add_all(["."].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["."].iter(), None)?;
        index.write()?;
        Ok(())
    }

    /// Commit the staged tree on HEAD and return the new commit id.
    pub fn commit(&self, message: &str) -> Result<String, GitError> {
        let mut index = self.inner.index()?;
        let tree_id = index.write_tree()?;
        let tree = self.inner.find_tree(tree_id)?;

        let signature = self
            .inner
            .signature()
            .or_else(|_| Signature::now("conveyor", "conveyor@localhost"))?;

        let parent = match self.inner.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None, // unborn branch
        };
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        let oid = self
            .inner
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        Ok(oid.to_string())
    }

    /// The current HEAD commit id (`git rev-parse HEAD`).
    pub fn head_id(&self) -> Result<String, GitError> {
        let head = self.inner.head()?;
        let commit = head.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    /// Create a worktree on a fresh branch for parallel plan execution.
    ///
    /// The branch is created from the current HEAD when it does not
    /// already exist.
    pub fn add_worktree(
        &self,
        name: &str,
        path: &Path,
        branch: &str,
    ) -> Result<(), GitError> {
        let head = self.inner.head()?.peel_to_commit()?;
        let branch_ref = match self.inner.find_branch(branch, git2::BranchType::Local) {
            Ok(existing) => existing,
            Err(_) => self.inner.branch(branch, &head, false)?,
        };
        let reference = branch_ref.into_reference();
        let mut options = WorktreeAddOptions::new();
        options.reference(Some(&reference));
        self.inner.worktree(name, path, Some(&options))?;
        Ok(())
    }
}
