//! Default process/filesystem-backed port implementations, plus in-memory
//! doubles for embedding and testing.

use crate::output::{OUTPUT_TAIL_LIMIT, read_tail};
use crate::ports::{CommandOutput, CommandRunner, EnvSource, Invocation, WritePort};
use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Extra time given to the output readers once the process group is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Runs invocations as real child processes with a deadline.
///
/// On unix the child leads its own process group. When the child exits or
/// the deadline passes, the whole group is killed (cargo spawns rustc,
/// build scripts, ...), and output collection is bounded by the same
/// deadline, so no descendant can hold a run open past its timeout.
#[derive(Debug, Clone)]
pub struct ProcessCommandRunner {
    pub tail_limit: usize,
}

impl Default for ProcessCommandRunner {
    fn default() -> Self {
        Self {
            tail_limit: OUTPUT_TAIL_LIMIT,
        }
    }
}

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, invocation: &Invocation) -> anyhow::Result<CommandOutput> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(invocation.working_dir.as_std_path())
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        debug!(command = %invocation.display(), cwd = %invocation.working_dir, "spawn");
        let started = Instant::now();
        let mut child = command
            .spawn()
            .with_context(|| format!("spawn {}", invocation.program))?;

        let stdout = spawn_tail_reader(child.stdout.take(), self.tail_limit);
        let stderr = spawn_tail_reader(child.stderr.take(), self.tail_limit);

        let status = child
            .wait_timeout(invocation.timeout)
            .with_context(|| format!("wait for {}", invocation.program))?;
        let timed_out = status.is_none();
        if timed_out {
            warn!(
                command = %invocation.display(),
                timeout_secs = invocation.timeout.as_secs(),
                "invocation timed out, killing"
            );
        }
        // Descendants still holding the output pipes go too.
        kill_group(&mut child);
        if timed_out {
            let _ = child.kill();
            let _ = child.wait();
        }

        // Readers get what is left of the timeout, and at least a short
        // grace once the group is gone.
        let grace_end = Instant::now() + DRAIN_GRACE;
        let drain_until = started
            .checked_add(invocation.timeout)
            .map_or(grace_end, |deadline| deadline.max(grace_end));

        Ok(CommandOutput {
            exit_code: status.and_then(|s| s.code()),
            timed_out,
            stdout: collect_tail(stdout, drain_until, "stdout")?,
            stderr: collect_tail(stderr, drain_until, "stderr")?,
        })
    }
}

type TailReceiver = mpsc::Receiver<std::io::Result<Vec<u8>>>;

fn spawn_tail_reader<R>(pipe: Option<R>, limit: usize) -> Option<TailReceiver>
where
    R: Read + Send + 'static,
{
    let pipe = pipe?;
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(read_tail(pipe, limit));
    });
    Some(rx)
}

fn collect_tail(
    receiver: Option<TailReceiver>,
    until: Instant,
    stream: &str,
) -> anyhow::Result<String> {
    let Some(receiver) = receiver else {
        return Ok(String::new());
    };
    match receiver.recv_timeout(until.saturating_duration_since(Instant::now())) {
        Ok(bytes) => {
            let bytes = bytes.with_context(|| format!("read subprocess {stream}"))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            warn!(stream, "subprocess output still open after the deadline, dropping it");
            Ok(String::new())
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            anyhow::bail!("{stream} reader thread panicked")
        }
    }
}

#[cfg(unix)]
fn kill_group(child: &mut Child) {
    use rustix::process::{Pid, Signal, kill_process_group};

    // The child was spawned with process_group(0), so its pid is also its
    // process group id. ESRCH just means the group is already gone.
    if let Some(pgid) = i32::try_from(child.id()).ok().and_then(Pid::from_raw) {
        let _ = kill_process_group(pgid, Signal::KILL);
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    let _ = child.kill();
}

/// Test double backed by a closure.
pub struct FnCommandRunner<F>(pub F);

impl<F> CommandRunner for FnCommandRunner<F>
where
    F: Fn(&Invocation) -> anyhow::Result<CommandOutput> + Send + Sync,
{
    fn run(&self, invocation: &Invocation) -> anyhow::Result<CommandOutput> {
        (self.0)(invocation)
    }
}

/// The real process environment.
#[derive(Debug, Clone, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn vars(&self) -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        vars.sort();
        vars
    }
}

/// Fixed environment for embedding and testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEnv {
    vars: BTreeMap<String, String>,
}

impl InMemoryEnv {
    pub fn new<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl EnvSource for InMemoryEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }

    fn vars(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Filesystem write operations; every file write goes through a temp file
/// in the destination directory followed by a rename.
#[derive(Debug, Clone, Default)]
pub struct FsWritePort;

impl WritePort for FsWritePort {
    fn write_file(&self, path: &Utf8Path, contents: &[u8]) -> anyhow::Result<()> {
        write_atomic(path, contents)
    }

    fn create_dir_all(&self, path: &Utf8Path) -> anyhow::Result<()> {
        fs::create_dir_all(path).with_context(|| format!("create_dir_all {}", path))
    }

    fn remove_file(&self, path: &Utf8Path) -> anyhow::Result<()> {
        match fs::remove_file(path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                Err(err).with_context(|| format!("remove {}", path))
            }
            _ => Ok(()),
        }
    }
}

/// Atomically replace `path` with `contents`.
pub fn write_atomic(path: &Utf8Path, contents: &[u8]) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_str().is_empty() => p.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    };
    fs::create_dir_all(&parent).with_context(|| format!("create parent dir for {}", path))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent.as_std_path())
        .with_context(|| format!("create temp file in {}", parent))?;
    tmp.write_all(contents)
        .with_context(|| format!("write temp file for {}", path))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("sync temp file for {}", path))?;
    tmp.persist(path.as_std_path())
        .map_err(|e| e.error)
        .with_context(|| format!("rename temp file onto {}", path))?;
    Ok(())
}

/// Records writes in memory instead of touching the filesystem.
#[derive(Debug, Default)]
pub struct InMemoryWritePort {
    files: Mutex<BTreeMap<Utf8PathBuf, Vec<u8>>>,
}

impl InMemoryWritePort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Utf8Path) -> Option<Vec<u8>> {
        self.files
            .lock()
            .ok()
            .and_then(|files| files.get(path).cloned())
    }

    pub fn paths(&self) -> Vec<Utf8PathBuf> {
        self.files
            .lock()
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl WritePort for InMemoryWritePort {
    fn write_file(&self, path: &Utf8Path, contents: &[u8]) -> anyhow::Result<()> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| anyhow::anyhow!("in-memory write port poisoned"))?;
        files.insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn create_dir_all(&self, _path: &Utf8Path) -> anyhow::Result<()> {
        Ok(())
    }

    fn remove_file(&self, path: &Utf8Path) -> anyhow::Result<()> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| anyhow::anyhow!("in-memory write port poisoned"))?;
        files.remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_root() -> (TempDir, Utf8PathBuf) {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, root)
    }

    #[cfg(unix)]
    fn sh(script: &str, cwd: &Utf8Path, timeout: Duration) -> Invocation {
        Invocation {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            working_dir: cwd.to_path_buf(),
            env: BTreeMap::from([("GREETING".to_string(), "hi".to_string())]),
            timeout,
        }
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_captures_exit_and_streams() {
        let (_temp, root) = temp_root();
        let runner = ProcessCommandRunner::default();
        let out = runner
            .run(&sh(
                "echo \"$GREETING\"; echo oops >&2; pwd; exit 3",
                &root,
                Duration::from_secs(30),
            ))
            .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.timed_out);
        assert!(!out.success());
        assert!(out.stdout.starts_with("hi\n"));
        assert_eq!(out.stderr, "oops\n");
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_kills_on_timeout() {
        let (_temp, root) = temp_root();
        let runner = ProcessCommandRunner::default();
        let started = Instant::now();
        let out = runner
            .run(&sh("sleep 30 & sleep 30", &root, Duration::from_millis(300)))
            .unwrap();
        assert!(out.timed_out);
        assert_eq!(out.exit_code, None);
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[cfg(unix)]
    #[test]
    fn background_child_holding_output_does_not_outlive_run() {
        let (_temp, root) = temp_root();
        let runner = ProcessCommandRunner::default();
        let started = Instant::now();
        let out = runner
            .run(&sh("sleep 30 & echo done; exit 0", &root, Duration::from_secs(60)))
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!out.timed_out);
        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.stdout, "done\n");
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_bounds_output() {
        let (_temp, root) = temp_root();
        let runner = ProcessCommandRunner {
            tail_limit: 64,
            ..ProcessCommandRunner::default()
        };
        let out = runner
            .run(&sh(
                "i=0; while [ $i -lt 500 ]; do echo line$i; i=$((i+1)); done",
                &root,
                Duration::from_secs(30),
            ))
            .unwrap();
        assert!(out.success());
        assert!(out.stdout.len() <= 64);
        assert!(out.stdout.ends_with("line499\n"));
    }

    #[test]
    fn process_runner_reports_missing_program() {
        let (_temp, root) = temp_root();
        let err = ProcessCommandRunner::default()
            .run(&Invocation {
                program: "reprobuild-definitely-not-a-program".to_string(),
                args: vec![],
                working_dir: root,
                env: BTreeMap::new(),
                timeout: Duration::from_secs(5),
            })
            .unwrap_err();
        assert!(err.to_string().contains("spawn"));
    }

    #[test]
    fn write_atomic_replaces_contents() {
        let (_temp, root) = temp_root();
        let path = root.join("nested").join("out.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let leftovers: Vec<_> = std::fs::read_dir(root.join("nested"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1, "temp files must not linger");
    }

    #[test]
    fn write_atomic_fails_when_parent_is_a_file() {
        let (_temp, root) = temp_root();
        std::fs::write(root.join("blocker"), b"x").unwrap();
        let err = write_atomic(&root.join("blocker").join("out.json"), b"data").unwrap_err();
        assert!(err.to_string().contains("create parent dir"));
    }

    #[test]
    fn in_memory_env_is_sorted_and_isolated() {
        let env = InMemoryEnv::new([("B", "2"), ("A", "1")]);
        assert_eq!(env.var("A").as_deref(), Some("1"));
        assert_eq!(env.var("PATH"), None);
        assert_eq!(
            env.vars(),
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn in_memory_write_port_records_files() {
        let port = InMemoryWritePort::new();
        port.write_file(Utf8Path::new("out/a.wasm"), b"\0asm").unwrap();
        assert_eq!(port.get(Utf8Path::new("out/a.wasm")).unwrap(), b"\0asm");
        assert_eq!(port.paths(), vec![Utf8PathBuf::from("out/a.wasm")]);
        port.remove_file(Utf8Path::new("out/a.wasm")).unwrap();
        port.remove_file(Utf8Path::new("out/a.wasm")).unwrap();
        assert!(port.paths().is_empty());
    }

    #[test]
    fn fs_remove_file_tolerates_missing() {
        let (_temp, root) = temp_root();
        let path = root.join("a.wasm");
        std::fs::write(&path, b"x").unwrap();
        FsWritePort.remove_file(&path).unwrap();
        assert!(!path.exists());
        FsWritePort.remove_file(&path).unwrap();
    }

    #[test]
    fn fn_runner_delegates() {
        let runner = FnCommandRunner(|inv: &Invocation| {
            Ok(CommandOutput {
                exit_code: Some(if inv.program == "ok" { 0 } else { 1 }),
                ..CommandOutput::default()
            })
        });
        let mut inv = Invocation {
            program: "ok".to_string(),
            args: vec![],
            working_dir: Utf8PathBuf::from("."),
            env: BTreeMap::new(),
            timeout: Duration::from_secs(1),
        };
        assert!(runner.run(&inv).unwrap().success());
        inv.program = "bad".to_string();
        assert!(!runner.run(&inv).unwrap().success());
    }
}
