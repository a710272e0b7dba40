//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::future::Future;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::{Mutex, MutexGuard};

use crate::config::{DEFAULT_WATCH_LATENCY_SECS, SessionConfig};
use crate::process::{
    CommandOutput, CommandRunner, Launcher, ProcessError, ProcessExit, ProcessFuture,
};

const CALL_POLL_INTERVAL: Duration = Duration::from_millis(10);
const CALL_WAIT_LIMIT: Duration = Duration::from_secs(10);

/// Records a single invocation made through a scripted fake.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the fake.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    fn new(program: &str, args: &[OsString]) -> Self {
        Self {
            program: program.to_owned(),
            args: args.to_vec(),
        }
    }

    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Clones share their queue and invocation log, so a clone handed to a
/// spawned task stays observable from the test.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<StdMutex<VecDeque<CommandOutput>>>,
    invocations: Arc<StdMutex<Vec<CommandInvocation>>>,
    remote: Option<RemoteTree>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies every successful mirror invocation to `remote` before it is
    /// recorded.
    #[must_use]
    pub fn with_remote(self, remote: RemoteTree) -> Self {
        Self {
            remote: Some(remote),
            ..self
        }
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits until at least `count` invocations were recorded. Returns
    /// `false` if that does not happen within a generous limit.
    pub async fn wait_for_calls(&self, count: usize) -> bool {
        wait_for(|| self.invocations().len() >= count).await
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(CommandOutput {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
    ) -> ProcessFuture<'a, CommandOutput> {
        let response = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let mirrored = match &response {
            Some(output) if output.is_success() => mirror_into(self.remote.as_ref(), program, args),
            _ => Ok(()),
        };
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CommandInvocation::new(program, args));
        Box::pin(async move {
            mirrored?;
            response.ok_or_else(|| ProcessError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
        })
    }
}

type Gate = Pin<Box<dyn Future<Output = ()> + Send>>;

enum LaunchResponse {
    Exit(i32),
    SpawnFailure,
    ExitAfter(i32, Gate),
}

/// Scripted launcher standing in for terminal-attached children.
#[derive(Clone, Default)]
pub struct ScriptedLauncher {
    responses: Arc<StdMutex<VecDeque<LaunchResponse>>>,
    invocations: Arc<StdMutex<Vec<CommandInvocation>>>,
    remote: Option<RemoteTree>,
}

impl fmt::Debug for ScriptedLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedLauncher")
            .field("invocations", &self.invocations())
            .finish_non_exhaustive()
    }
}

impl ScriptedLauncher {
    /// Creates a launcher with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies every mirror invocation that exits 0 to `remote`.
    #[must_use]
    pub fn with_remote(self, remote: RemoteTree) -> Self {
        Self {
            remote: Some(remote),
            ..self
        }
    }

    /// Queues an exit with `code`.
    pub fn push_exit(&self, code: i32) {
        self.push(LaunchResponse::Exit(code));
    }

    /// Queues a spawn failure.
    pub fn push_spawn_failure(&self) {
        self.push(LaunchResponse::SpawnFailure);
    }

    /// Queues an exit with `code` that is only reported once `gate`
    /// completes. Models a long-running interactive shell.
    pub fn push_exit_after<F>(&self, code: i32, gate: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.push(LaunchResponse::ExitAfter(code, Box::pin(gate)));
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns every invocation rendered by
    /// [`CommandInvocation::command_string`].
    #[must_use]
    pub fn command_strings(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .map(CommandInvocation::command_string)
            .collect()
    }

    fn push(&self, response: LaunchResponse) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }
}

impl Launcher for ScriptedLauncher {
    fn launch<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
    ) -> ProcessFuture<'a, ProcessExit> {
        let response = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let mirrored = match &response {
            Some(LaunchResponse::Exit(0)) => mirror_into(self.remote.as_ref(), program, args),
            _ => Ok(()),
        };
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CommandInvocation::new(program, args));
        Box::pin(async move {
            mirrored?;
            let spawn_failure = |message: &str| ProcessError::Spawn {
                program: program.to_owned(),
                message: message.to_owned(),
            };
            match response {
                Some(LaunchResponse::Exit(code)) => Ok(ProcessExit::from_code(code)),
                Some(LaunchResponse::ExitAfter(code, gate)) => {
                    gate.await;
                    Ok(ProcessExit::from_code(code))
                }
                Some(LaunchResponse::SpawnFailure) => Err(spawn_failure("simulated spawn failure")),
                None => Err(spawn_failure("no scripted response available")),
            }
        })
    }
}

fn mirror_into(
    remote: Option<&RemoteTree>,
    program: &str,
    args: &[OsString],
) -> Result<(), ProcessError> {
    let Some(tree) = remote else {
        return Ok(());
    };
    let is_mirror = args
        .iter()
        .any(|arg| arg.to_string_lossy().starts_with("--rsh="));
    if !is_mirror {
        return Ok(());
    }
    tree.apply(args).map_err(|err| ProcessError::Spawn {
        program: program.to_owned(),
        message: err.to_string(),
    })
}

#[derive(Clone, Debug, Default)]
struct ExcludeRules {
    dirs: HashSet<String>,
    names: HashSet<String>,
}

impl ExcludeRules {
    fn from_args(args: &[String]) -> Self {
        let mut rules = Self::default();
        for pattern in args.iter().filter_map(|arg| arg.strip_prefix("--exclude=")) {
            match pattern.strip_suffix('/') {
                Some(dir) => rules.dirs.insert(dir.to_owned()),
                None => rules.names.insert(pattern.to_owned()),
            };
        }
        rules
    }

    fn excludes(&self, name: &str, is_dir: bool) -> bool {
        self.names.contains(name) || (is_dir && self.dirs.contains(name))
    }
}

/// A local directory standing in for the remote filesystem.
///
/// [`RemoteTree::apply`] performs what `rsync -r` with the given
/// `--delete-during` and `--exclude=` flags would do to the destination:
/// a source without a trailing `/` lands under its own name, excluded
/// entries are neither copied nor deleted, and with `--delete-during`
/// everything else missing from the source is removed. Relative remote
/// paths, `.` included, are taken relative to the tree's root.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteTree {
    root: Utf8PathBuf,
}

impl RemoteTree {
    /// Creates `root` if needed and wraps it.
    ///
    /// # Errors
    ///
    /// Returns the I/O error when `root` cannot be created.
    pub fn create(root: impl Into<Utf8PathBuf>) -> io::Result<Self> {
        let tree = Self { root: root.into() };
        fs::create_dir_all(&tree.root)?;
        Ok(tree)
    }

    /// Returns the directory standing in for the remote home.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Maps a remote path onto the tree.
    #[must_use]
    pub fn resolve(&self, remote_path: &str) -> Utf8PathBuf {
        self.root.join(remote_path.trim_start_matches('/'))
    }

    /// Applies the rsync argument vector `args` to the tree.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the argv has no source or destination, or
    /// when copying or pruning fails.
    pub fn apply(&self, args: &[OsString]) -> io::Result<()> {
        let argv = strings(args);
        let (source, destination) = match argv.as_slice() {
            [.., source, destination] => (Utf8Path::new(source), destination.as_str()),
            _ => return Err(io::Error::other("missing source or destination argument")),
        };
        let rules = ExcludeRules::from_args(&argv);
        let delete = argv.iter().any(|arg| arg == "--delete-during");

        let remote_path = remote_path_of(destination)?;
        let mut target = self.resolve(remote_path);
        if !source.as_str().ends_with('/') {
            let name = source
                .file_name()
                .ok_or_else(|| io::Error::other(format!("source {source} has no name")))?;
            target.push(name);
        }
        fs::create_dir_all(&target)?;
        copy_tree(source, &target, &rules)?;
        if delete {
            prune_tree(source, &target, &rules)?;
        }
        Ok(())
    }

    /// Returns every file under the tree keyed by its relative path, with
    /// its contents.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while walking the tree.
    pub fn files(&self) -> io::Result<BTreeMap<String, String>> {
        let mut files = BTreeMap::new();
        collect_files(&self.root, &self.root, &mut files)?;
        Ok(files)
    }
}

fn remote_path_of(destination: &str) -> io::Result<&str> {
    let split = destination
        .find("]:")
        .map(|bracket| bracket + 1)
        .or_else(|| destination.find(':'))
        .ok_or_else(|| io::Error::other(format!("destination {destination} has no path")))?;
    Ok(destination.get(split + 1..).unwrap_or_default())
}

fn utf8_entry(entry: &fs::DirEntry) -> io::Result<(String, Utf8PathBuf)> {
    let path = Utf8PathBuf::from_path_buf(entry.path())
        .map_err(|path| io::Error::other(format!("non-UTF-8 path {}", path.display())))?;
    let name = path.file_name().unwrap_or_default().to_owned();
    Ok((name, path))
}

fn copy_tree(source: &Utf8Path, target: &Utf8Path, rules: &ExcludeRules) -> io::Result<()> {
    for item in fs::read_dir(source)? {
        let entry = item?;
        let is_dir = entry.file_type()?.is_dir();
        let (name, path) = utf8_entry(&entry)?;
        if rules.excludes(&name, is_dir) {
            continue;
        }
        let destination = target.join(&name);
        if is_dir {
            if destination.is_file() {
                fs::remove_file(&destination)?;
            }
            fs::create_dir_all(&destination)?;
            copy_tree(&path, &destination, rules)?;
        } else {
            if destination.is_dir() {
                fs::remove_dir_all(&destination)?;
            }
            fs::copy(&path, &destination)?;
        }
    }
    Ok(())
}

fn prune_tree(source: &Utf8Path, target: &Utf8Path, rules: &ExcludeRules) -> io::Result<()> {
    for item in fs::read_dir(target)? {
        let entry = item?;
        let is_dir = entry.file_type()?.is_dir();
        let (name, path) = utf8_entry(&entry)?;
        if rules.excludes(&name, is_dir) {
            continue;
        }
        let counterpart = source.join(&name);
        match (counterpart.exists(), is_dir) {
            (true, true) => prune_tree(&counterpart, &path, rules)?,
            (true, false) => {}
            (false, true) => fs::remove_dir_all(&path)?,
            (false, false) => fs::remove_file(&path)?,
        }
    }
    Ok(())
}

fn collect_files(
    root: &Utf8Path,
    dir: &Utf8Path,
    files: &mut BTreeMap<String, String>,
) -> io::Result<()> {
    for item in fs::read_dir(dir)? {
        let entry = item?;
        let (_, path) = utf8_entry(&entry)?;
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, files)?;
        } else {
            let relative = path.strip_prefix(root).map_err(io::Error::other)?;
            files.insert(relative.to_string(), fs::read_to_string(&path)?);
        }
    }
    Ok(())
}

/// Returns a configuration naming the stock tools with default settings.
#[must_use]
pub fn session_config() -> SessionConfig {
    SessionConfig {
        provider_bin: String::from("gcloud"),
        ssh_bin: String::from("ssh"),
        rsync_bin: String::from("rsync"),
        watcher_bin: String::from("fswatch"),
        watch_latency_secs: DEFAULT_WATCH_LATENCY_SECS,
        control_dir: None,
        provider_zone: None,
        provider_project: None,
    }
}

/// Converts an argument vector to owned strings for assertions.
#[must_use]
pub fn strings(args: &[OsString]) -> Vec<String> {
    args.iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

/// Writes an executable `/bin/sh` script named `name` into `dir` and returns
/// its path. Used to stand in for the file watcher.
///
/// # Errors
///
/// Returns the I/O error when the script cannot be written or marked
/// executable.
pub fn write_script(dir: &Utf8Path, name: &str, body: &str) -> std::io::Result<Utf8PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

/// Polls `condition` until it holds or a generous limit elapses.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + CALL_WAIT_LIMIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(CALL_POLL_INTERVAL).await;
    }
    condition()
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets or removes environment variables while holding a global mutex.
    /// A `None` value removes the variable.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
