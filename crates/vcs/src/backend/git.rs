//! Git backend using the `git` command line.
//!
//! Every remote is kept as a bare mirror under the cache directory. Revision
//! lookups fetch the mirror before answering, so tips and dates are resolved
//! against the remote as it is now; checkout, merge and revno reuse the last
//! fetch. A location of the form `url#branch` selects a branch, a plain
//! `url` follows the remote's `HEAD`.

use crate::backend::Backend;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::types::{MergeOutcome, RevisionId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Settings for [`GitBackend`].
#[derive(Debug, Clone)]
pub struct GitOptions {
    /// The `git` executable
    pub binary: PathBuf,
    /// Directory holding bare mirrors of remote branches
    pub cache_dir: PathBuf,
    /// Committer name for merge commits
    pub committer_name: String,
    /// Committer email for merge commits
    pub committer_email: String,
}

impl Default for GitOptions {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("git"),
            cache_dir: std::env::temp_dir().join("recipebuild-mirrors"),
            committer_name: "recipebuild".to_string(),
            committer_email: "recipebuild@localhost".to_string(),
        }
    }
}

/// Split `url#branch` into its parts.
pub fn split_location(location: &str) -> (&str, Option<&str>) {
    match location.rsplit_once('#') {
        Some((url, branch)) if !url.is_empty() && !branch.is_empty() => (url, Some(branch)),
        _ => (location, None),
    }
}

/// Name of the mirror directory for `url`.
pub fn mirror_name(url: &str) -> String {
    blake3::hash(url.as_bytes()).to_hex().to_string()
}

fn branch_ref(branch: Option<&str>) -> String {
    match branch {
        Some(name) => format!("refs/heads/{name}"),
        None => "HEAD".to_string(),
    }
}

/// How up to date a mirror must be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    /// Fetched after the call started
    Current,
    /// Fetched at least once by this backend
    Cached,
}

struct GitOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

impl GitOutput {
    fn success(&self) -> bool {
        self.status.success()
    }

    fn trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Backend that executes real `git` commands.
pub struct GitBackend {
    options: GitOptions,
    /// One slot per url holding when its last fetch started; holding the
    /// slot serializes fetches of that url
    mirrors: Mutex<HashMap<String, Arc<Mutex<Option<Instant>>>>>,
}

impl GitBackend {
    /// Create a backend with the given options.
    pub fn new(options: GitOptions) -> Self {
        Self {
            options,
            mirrors: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the configured `git` can be executed.
    pub fn is_available(&self) -> bool {
        Command::new(&self.options.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    /// Run git in `cwd`, killing it if `cancel` fires.
    fn run<I, S>(&self, cwd: Option<&Path>, args: I, cancel: &CancelToken) -> Result<GitOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        cancel.check()?;

        let mut command = Command::new(&self.options.binary);
        command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        log::trace!("running {command:?}");

        let mut child = command.spawn().map_err(|e| Error::CommandFailed {
            message: format!("failed to execute {}: {e}", self.options.binary.display()),
            stderr: String::new(),
        })?;

        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());
        let status = wait_or_kill(&mut child, cancel)?;

        Ok(GitOutput {
            status,
            stdout: String::from_utf8_lossy(&stdout.join().unwrap_or_default()).into_owned(),
            stderr: String::from_utf8_lossy(&stderr.join().unwrap_or_default()).into_owned(),
        })
    }

    /// Run git and fail on a non-zero exit.
    fn run_checked<I, S>(
        &self,
        cwd: Option<&Path>,
        args: I,
        location: &str,
        cancel: &CancelToken,
    ) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.run(cwd, args, cancel)?;
        if !output.success() {
            return Err(Error::from_git_output(&output.stderr, location, cwd));
        }
        Ok(output.stdout)
    }

    /// Bare mirror of the url in `location`, fetched as `freshness` requires.
    ///
    /// Concurrent lookups of one url share a fetch that started after they
    /// were made.
    fn mirror(
        &self,
        location: &str,
        freshness: Freshness,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        let requested = Instant::now();
        let (url, _) = split_location(location);
        let path = self.options.cache_dir.join(mirror_name(url));

        let slot = {
            let mut mirrors = self.mirrors.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(mirrors.entry(url.to_string()).or_default())
        };
        let mut last_fetch = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let fresh = match (*last_fetch, freshness) {
            (None, _) => false,
            (Some(_), Freshness::Cached) => true,
            (Some(started), Freshness::Current) => started >= requested,
        };
        if fresh {
            return Ok(path);
        }

        let started = Instant::now();

        if path.join("HEAD").exists() {
            log::debug!("Updating mirror of {url}");
            self.run_checked(
                Some(&path),
                ["fetch", "--quiet", "--prune", "--tags", "origin"],
                location,
                cancel,
            )?;
        } else {
            log::debug!("Mirroring {url} into {}", path.display());
            std::fs::create_dir_all(&self.options.cache_dir)?;
            let args: [&OsStr; 5] = [
                "clone".as_ref(),
                "--quiet".as_ref(),
                "--mirror".as_ref(),
                url.as_ref(),
                path.as_os_str(),
            ];
            if let Err(e) = self.run_checked(None, args, location, cancel) {
                // Drop the half-written mirror.
                let _ = std::fs::remove_dir_all(&path);
                return Err(e);
            }
        }

        *last_fetch = Some(started);
        Ok(path)
    }

    /// Full commit id of `rev` in the mirror, `None` if it does not exist.
    fn rev_parse(&self, mirror: &Path, rev: &str, cancel: &CancelToken) -> Result<Option<String>> {
        let commit = format!("{rev}^{{commit}}");
        let output = self.run(
            Some(mirror),
            ["rev-parse", "--verify", "--quiet", commit.as_str()],
            cancel,
        )?;
        Ok(output
            .success()
            .then(|| output.trimmed().to_string())
            .filter(|id| !id.is_empty()))
    }

    /// Whether `ancestor` is reachable from `descendant` in the repository at `dir`.
    fn is_ancestor(
        &self,
        dir: &Path,
        ancestor: &str,
        descendant: &str,
        cancel: &CancelToken,
    ) -> Result<bool> {
        let output = self.run(
            Some(dir),
            ["merge-base", "--is-ancestor", ancestor, descendant],
            cancel,
        )?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(Error::CommandFailed {
                message: format!("merge-base failed in {}", dir.display()),
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }

    /// Tip of the branch in `location`, resolved in its mirror.
    fn tip_in(&self, mirror: &Path, location: &str, cancel: &CancelToken) -> Result<String> {
        let (_, branch) = split_location(location);
        self.rev_parse(mirror, &branch_ref(branch), cancel)?
            .ok_or_else(|| Error::BranchNotFound {
                branch: location.to_string(),
            })
    }

    fn conflicted_paths(&self, tree: &Path, cancel: &CancelToken) -> Result<Vec<PathBuf>> {
        let output = self.run(
            Some(tree),
            ["diff", "--name-only", "--diff-filter=U"],
            cancel,
        )?;
        Ok(output
            .stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(PathBuf::from)
            .collect())
    }
}

impl Backend for GitBackend {
    fn branch_tip(&self, branch: &str, cancel: &CancelToken) -> Result<RevisionId> {
        let mirror = self.mirror(branch, Freshness::Current, cancel)?;
        self.tip_in(&mirror, branch, cancel).map(RevisionId::from)
    }

    fn resolve_revision_id(
        &self,
        branch: &str,
        id: &str,
        cancel: &CancelToken,
    ) -> Result<RevisionId> {
        let not_found = || Error::RevisionNotFound {
            branch: branch.to_string(),
            spec: format!("revid:{id}"),
        };

        let mirror = self.mirror(branch, Freshness::Current, cancel)?;
        let tip = self.tip_in(&mirror, branch, cancel)?;
        let full = self.rev_parse(&mirror, id, cancel)?.ok_or_else(not_found)?;
        if !self.is_ancestor(&mirror, &full, &tip, cancel)? {
            return Err(not_found());
        }
        Ok(RevisionId::from(full))
    }

    fn resolve_tag(&self, branch: &str, tag: &str, cancel: &CancelToken) -> Result<RevisionId> {
        let mirror = self.mirror(branch, Freshness::Current, cancel)?;
        self.rev_parse(&mirror, &format!("refs/tags/{tag}"), cancel)?
            .map(RevisionId::from)
            .ok_or_else(|| Error::RevisionNotFound {
                branch: branch.to_string(),
                spec: format!("tag:{tag}"),
            })
    }

    fn revision_at_or_before(
        &self,
        branch: &str,
        when: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<RevisionId> {
        let mirror = self.mirror(branch, Freshness::Current, cancel)?;
        let tip = self.tip_in(&mirror, branch, cancel)?;
        let output = self.run_checked(
            Some(&mirror),
            [
                "rev-list".to_string(),
                "-1".to_string(),
                "--date-order".to_string(),
                format!("--before={}", when.timestamp()),
                tip,
            ],
            branch,
            cancel,
        )?;

        let id = output.trim();
        if id.is_empty() {
            return Err(Error::RevisionNotFound {
                branch: branch.to_string(),
                spec: format!("date:{}", when.to_rfc3339()),
            });
        }
        Ok(RevisionId::new(id))
    }

    fn checkout(
        &self,
        branch: &str,
        revision: &RevisionId,
        target: &Path,
        cancel: &CancelToken,
    ) -> Result<()> {
        if target.exists() && std::fs::read_dir(target)?.next().is_some() {
            return Err(Error::Other(format!(
                "{} exists and is not empty",
                target.display()
            )));
        }

        let mirror = self.mirror(branch, Freshness::Cached, cancel)?;
        log::debug!("Checking out {branch} at {} into {}", revision.short(), target.display());

        let clone: [&OsStr; 5] = [
            "clone".as_ref(),
            "--quiet".as_ref(),
            "--no-checkout".as_ref(),
            mirror.as_os_str(),
            target.as_os_str(),
        ];
        self.run_checked(None, clone, branch, cancel)?;

        self.run_checked(
            Some(target),
            ["checkout", "--quiet", "--detach", revision.as_str()],
            branch,
            cancel,
        )?;
        Ok(())
    }

    fn merge(
        &self,
        tree: &Path,
        branch: &str,
        revision: &RevisionId,
        message: &str,
        cancel: &CancelToken,
    ) -> Result<MergeOutcome> {
        if !tree.join(".git").exists() {
            return Err(Error::NoWorkingTree(tree.to_path_buf()));
        }

        let mirror = self.mirror(branch, Freshness::Cached, cancel)?;
        let namespace = format!("+refs/*:refs/recipe/{}/*", mirror_name(split_location(branch).0));
        let fetch: [&OsStr; 5] = [
            "fetch".as_ref(),
            "--quiet".as_ref(),
            "--no-tags".as_ref(),
            mirror.as_os_str(),
            namespace.as_ref(),
        ];
        self.run_checked(Some(tree), fetch, branch, cancel)?;

        if self.is_ancestor(tree, revision.as_str(), "HEAD", cancel)? {
            log::debug!("{branch} at {} is already merged", revision.short());
            return Ok(MergeOutcome::UpToDate);
        }

        let name = format!("user.name={}", self.options.committer_name);
        let email = format!("user.email={}", self.options.committer_email);
        let output = self.run(
            Some(tree),
            [
                "-c",
                name.as_str(),
                "-c",
                email.as_str(),
                "merge",
                "--quiet",
                "--no-ff",
                "--no-edit",
                "--allow-unrelated-histories",
                "-m",
                message,
                revision.as_str(),
            ],
            cancel,
        )?;
        if output.success() {
            return Ok(MergeOutcome::Merged);
        }

        let paths = self.conflicted_paths(tree, cancel)?;
        // Leave the tree as it was before the merge.
        self.run(Some(tree), ["merge", "--abort"], cancel)?;
        if paths.is_empty() {
            return Err(Error::from_git_output(&output.stderr, branch, Some(tree)));
        }
        Err(Error::Conflict {
            branch: branch.to_string(),
            paths,
        })
    }

    fn revno(
        &self,
        branch: &str,
        revision: &RevisionId,
        cancel: &CancelToken,
    ) -> Result<Option<u64>> {
        let mirror = self.mirror(branch, Freshness::Cached, cancel)?;
        let output = self.run(
            Some(&mirror),
            ["rev-list", "--count", "--first-parent", revision.as_str()],
            cancel,
        )?;
        if !output.success() {
            return Ok(None);
        }
        Ok(output.trimmed().parse().ok())
    }
}

fn spawn_reader<R: Read + Send + 'static>(source: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut source) = source {
            let _ = source.read_to_end(&mut buffer);
        }
        buffer
    })
}

fn wait_or_kill(child: &mut Child, cancel: &CancelToken) -> Result<ExitStatus> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if cancel.is_cancelled() {
            log::debug!("Killing git process {}", child.id());
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Cancelled);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
