use std::env;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::analyzer::{AnalyzerPolicy, ApprovedRequest};
use super::capture::{Captured, read_capped};
use super::{ExecutionResult, Executor, ExitReason, elapsed_ms};
use crate::config::ExecutionConfig;

const SNIPPET_FILE: &str = "snippet.py";
const READER_GRACE: Duration = Duration::from_secs(2);

/// Runs the snippet with a restricted builtins table: `open` may only write
/// inside the scratch directory and `__import__` refuses denied roots. Both
/// guards are also installed on the real `builtins`, `io` and `_io` modules, and
/// an audit hook refuses process creation, sockets and out-of-scratch writes
/// however the snippet reaches them. Frames belonging to this prelude are
/// dropped from tracebacks.
const BOOTSTRAP: &str = r#"
import builtins, io, os, sys
import _io

def _main(path, root, denied):
    real_import = builtins.__import__
    real_open = builtins.open
    root = os.path.realpath(root)
    denied = frozenset(name for name in denied.split(',') if name)
    snippet_globals = {'__name__': '__main__'}

    def inside(file):
        if isinstance(file, int):
            return True
        target = os.path.realpath(os.path.join(root, os.fsdecode(os.fspath(file))))
        return target == root or target.startswith(root + os.sep)

    def guarded_import(name, globals=None, locals=None, fromlist=(), level=0):
        if globals is None or globals is snippet_globals:
            if level or name.partition('.')[0] in denied:
                raise ImportError(f"import of '{name}' is blocked in the sandbox")
        return real_import(name, globals, locals, fromlist, level)

    def guarded_open(file, mode='r', *args, **kwargs):
        if isinstance(file, int):
            raise PermissionError('opening raw file descriptors is blocked in the sandbox')
        if not inside(file) and any(flag in str(mode) for flag in 'wax+'):
            raise PermissionError('writes are restricted to the scratch directory')
        return real_open(os.path.join(root, os.fsdecode(os.fspath(file))), mode, *args, **kwargs)

    blocked = frozenset({
        'os.system', 'os.exec', 'os.posix_spawn', 'os.spawn', 'os.fork', 'os.forkpty',
        'os.kill', 'os.killpg', 'subprocess.Popen', 'socket.__new__', 'ctypes.dlopen',
    })
    path_events = {
        'os.remove': (0,), 'os.rmdir': (0,), 'os.mkdir': (0,), 'os.rename': (0, 1),
        'os.link': (0, 1), 'os.symlink': (0, 1), 'os.chmod': (0,), 'os.chown': (0,),
        'os.truncate': (0,), 'os.utime': (0,), 'shutil.rmtree': (0,), 'sqlite3.connect': (0,),
    }
    write_flags = os.O_WRONLY | os.O_RDWR | os.O_APPEND | os.O_CREAT | os.O_TRUNC

    def audit(event, args):
        if event in blocked:
            raise PermissionError(f"'{event}' is blocked in the sandbox")
        if event == 'open':
            file, mode, flags = (tuple(args) + (None, None, None))[:3]
            writing = isinstance(mode, str) and any(flag in mode for flag in 'wax+')
            writing = writing or bool((flags or 0) & write_flags)
            if writing and not inside(file):
                raise PermissionError('writes are restricted to the scratch directory')
        elif event in path_events:
            if not all(inside(args[index]) for index in path_events[event]):
                raise PermissionError(f"'{event}' outside the scratch directory is blocked")

    safe = dict(vars(builtins))
    for name in ('exec', 'eval', 'compile', 'breakpoint', 'input', 'globals', 'locals', 'vars', 'help'):
        safe.pop(name, None)
    safe['__import__'] = guarded_import
    safe['open'] = guarded_open
    snippet_globals['__builtins__'] = safe

    with real_open(path, encoding='utf-8') as handle:
        code = compile(handle.read(), '<snippet>', 'exec')
    builtins.__import__ = guarded_import
    builtins.open = io.open = _io.open = guarded_open
    sys.addaudithook(audit)
    try:
        exec(code, snippet_globals)
    except SystemExit:
        raise
    except BaseException as exc:
        import traceback
        tb = exc.__traceback__
        while tb is not None and tb.tb_frame.f_code.co_filename != '<snippet>':
            tb = tb.tb_next
        traceback.print_exception(type(exc), exc, tb)
        sys.exit(1)

_main(*sys.argv[1:4])
"#;

/// Production executor: one fresh `python3` process per call, in its own
/// process group, under rlimits, inside a throwaway scratch directory.
#[derive(Clone, Debug)]
pub struct ProcessExecutor {
    config: ExecutionConfig,
    denied_roots: String,
}

impl ProcessExecutor {
    pub fn new(config: ExecutionConfig, policy: &AnalyzerPolicy) -> Self {
        let denied_roots = policy.denied_module_names().collect::<Vec<_>>().join(",");
        Self {
            config,
            denied_roots,
        }
    }

    fn command(&self, scratch: &Path, script: &Path, limits: Rlimits) -> Command {
        let mut command = Command::new(&self.config.interpreter);
        command
            .args(["-I", "-B", "-X", "utf8", "-c", BOOTSTRAP])
            .arg(script)
            .arg(scratch)
            .arg(&self.denied_roots)
            .current_dir(scratch)
            .env_clear()
            .env("HOME", scratch)
            .env("TMPDIR", scratch)
            .env("LANG", "C.UTF-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = env::var_os("PATH") {
            command.env("PATH", path);
        }

        #[cfg(unix)]
        {
            command.process_group(0);
            // SAFETY: the hook only calls async-signal-safe setrlimit.
            unsafe {
                command.pre_exec(move || limits.apply());
            }
        }
        #[cfg(not(unix))]
        let _ = limits;

        command
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, approved: &ApprovedRequest) -> ExecutionResult {
        let started = Instant::now();
        let request = approved.request();

        let scratch = match tempfile::Builder::new().prefix("assist-run-").tempdir() {
            Ok(scratch) => scratch,
            Err(err) => return ExecutionResult::failed_to_start(err, started),
        };
        let script = scratch.path().join(SNIPPET_FILE);
        if let Err(err) = std::fs::write(&script, &request.source_code) {
            return ExecutionResult::failed_to_start(err, started);
        }

        let limits = Rlimits {
            memory_bytes: request.memory_limit_mb.saturating_mul(1024 * 1024),
            cpu_seconds: request.timeout_seconds.saturating_add(1),
            file_bytes: self.config.max_file_bytes,
        };
        let mut child = match self.command(scratch.path(), &script, limits).spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(interpreter = %self.config.interpreter, error = %err, "failed to spawn interpreter");
                return ExecutionResult::failed_to_start(err, started);
            }
        };
        let pid = child.id();
        debug!(?pid, scratch = %scratch.path().display(), "spawned snippet process");

        let limit = self.config.max_output_bytes;
        let stdout_task = tokio::spawn(capture(child.stdout.take(), limit));
        let stderr_task = tokio::spawn(capture(child.stderr.take(), limit));

        let deadline = Duration::from_secs(request.timeout_seconds);
        let (status, timed_out) = match tokio::time::timeout(deadline, child.wait()).await {
            Ok(Ok(status)) => (Some(status), false),
            Ok(Err(err)) => {
                warn!(error = %err, "failed waiting on snippet process");
                kill_group(pid);
                let _ = child.start_kill();
                (child.wait().await.ok(), false)
            }
            Err(_) => {
                kill_group(pid);
                let _ = child.start_kill();
                (child.wait().await.ok(), true)
            }
        };

        let stdout = join_capture(stdout_task).await;
        let stderr = join_capture(stderr_task).await;
        let truncated = stdout.truncated() || stderr.truncated();
        let stdout = stdout.into_text();
        let stderr = stderr.into_text();
        let exit_reason = classify(status, timed_out, &stderr);

        ExecutionResult {
            stdout,
            stderr,
            success: exit_reason == ExitReason::Completed,
            exit_reason,
            exit_code: status.and_then(|status| status.code()),
            truncated,
            elapsed_ms: elapsed_ms(started),
            saved_path: None,
        }
    }
}

async fn capture<R>(stream: Option<R>, limit: usize) -> Captured
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return Captured::default();
    };
    match read_capped(stream, limit).await {
        Ok(captured) => captured,
        Err(err) => {
            warn!(error = %err, "failed reading snippet output");
            Captured::default()
        }
    }
}

async fn join_capture(mut task: JoinHandle<Captured>) -> Captured {
    match tokio::time::timeout(READER_GRACE, &mut task).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(err)) => {
            warn!(error = %err, "output reader task failed");
            Captured::default()
        }
        Err(_) => {
            task.abort();
            warn!("output reader did not finish after the process exited");
            Captured::default()
        }
    }
}

fn classify(status: Option<ExitStatus>, timed_out: bool, stderr: &str) -> ExitReason {
    if timed_out {
        return ExitReason::Timeout;
    }
    let Some(status) = status else {
        return ExitReason::RuntimeError;
    };
    if status.success() {
        return ExitReason::Completed;
    }
    if stderr.contains("MemoryError") || stderr.contains("Cannot allocate memory") {
        return ExitReason::MemoryExceeded;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        match status.signal() {
            Some(libc::SIGXCPU) => return ExitReason::Timeout,
            Some(libc::SIGKILL | libc::SIGSEGV | libc::SIGABRT) => {
                return ExitReason::MemoryExceeded;
            }
            _ => {}
        }
    }
    ExitReason::RuntimeError
}

#[derive(Clone, Copy, Debug)]
struct Rlimits {
    memory_bytes: u64,
    cpu_seconds: u64,
    file_bytes: u64,
}

#[cfg(unix)]
impl Rlimits {
    /// The soft limit delivers SIGXCPU; the hard one a second later is SIGKILL.
    fn cpu_limits(&self) -> (u64, u64) {
        (self.cpu_seconds, self.cpu_seconds.saturating_add(1))
    }

    fn apply(&self) -> std::io::Result<()> {
        unsafe {
            let memory = libc::rlimit {
                rlim_cur: self.memory_bytes as libc::rlim_t,
                rlim_max: self.memory_bytes as libc::rlim_t,
            };
            if libc::setrlimit(libc::RLIMIT_AS, &memory) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            let (soft, hard) = self.cpu_limits();
            let cpu = libc::rlimit {
                rlim_cur: soft as libc::rlim_t,
                rlim_max: hard as libc::rlim_t,
            };
            if libc::setrlimit(libc::RLIMIT_CPU, &cpu) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            let fsize = libc::rlimit {
                rlim_cur: self.file_bytes as libc::rlim_t,
                rlim_max: self.file_bytes as libc::rlim_t,
            };
            if libc::setrlimit(libc::RLIMIT_FSIZE, &fsize) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            let core = libc::rlimit {
                rlim_cur: 0,
                rlim_max: 0,
            };
            if libc::setrlimit(libc::RLIMIT_CORE, &core) != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }
        Ok(())
    }
}

fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    {
        // The child leads its own group, so this also reaches anything it forked.
        if let Some(pgid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) {
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{ExecutionRequest, StaticAnalyzer};

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_ok_and(|output| output.status.success())
    }

    async fn run(source: &str, timeout_seconds: u64, config: ExecutionConfig) -> ExecutionResult {
        let analyzer = StaticAnalyzer::default();
        let executor = ProcessExecutor::new(config, analyzer.policy());
        let approved = analyzer
            .approve(ExecutionRequest::new(source, timeout_seconds, 256))
            .expect("snippet should pass analysis");
        executor.execute(&approved).await
    }

    async fn run_unchecked(executor: &ProcessExecutor, source: &str, timeout_seconds: u64) -> ExecutionResult {
        let approved = ApprovedRequest::unchecked(ExecutionRequest::new(source, timeout_seconds, 256));
        executor.execute(&approved).await
    }

    #[tokio::test]
    async fn runs_a_clean_snippet() {
        if !python_available() {
            eprintln!("python3 not found; skipping");
            return;
        }
        let result = run(
            "def add(a,b): return a+b\nprint(add(2,3))",
            5,
            ExecutionConfig::default(),
        )
        .await;
        assert_eq!(result.exit_reason, ExitReason::Completed);
        assert!(result.success);
        assert_eq!(result.stdout, "5\n");
        assert_eq!(result.exit_code, Some(0));
    }

    #[tokio::test]
    async fn uncaught_exception_is_a_runtime_error() {
        if !python_available() {
            eprintln!("python3 not found; skipping");
            return;
        }
        let result = run("print('before')\n1/0", 5, ExecutionConfig::default()).await;
        assert_eq!(result.exit_reason, ExitReason::RuntimeError);
        assert!(!result.success);
        assert_eq!(result.stdout, "before\n");
        assert!(result.stderr.contains("ZeroDivisionError"));
        assert!(!result.stderr.contains("_main"));
    }

    #[tokio::test]
    async fn infinite_loop_is_killed_at_the_deadline() {
        if !python_available() {
            eprintln!("python3 not found; skipping");
            return;
        }
        let started = Instant::now();
        let result = run("while True:\n    pass", 1, ExecutionConfig::default()).await;
        assert_eq!(result.exit_reason, ExitReason::Timeout);
        assert!(!result.success);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn print_flood_is_truncated() {
        if !python_available() {
            eprintln!("python3 not found; skipping");
            return;
        }
        let config = ExecutionConfig {
            max_output_bytes: 1024,
            ..ExecutionConfig::default()
        };
        let result = run("for i in range(100000):\n    print('x' * 80)", 10, config).await;
        assert_eq!(result.exit_reason, ExitReason::Completed);
        assert!(result.truncated);
        assert!(result.stdout.contains("[output truncated:"));
        assert!(result.stdout.len() < 2048);
    }

    #[tokio::test]
    async fn scratch_writes_work_and_computed_paths_are_refused() {
        if !python_available() {
            eprintln!("python3 not found; skipping");
            return;
        }
        let source = "target = '/tmp/' + 'assist-escape.txt'\nmode = 'w'\nopen(target, mode)";
        let result = StaticAnalyzer::default().analyze(source);
        assert!(!result.is_allowed());

        let inside = run(
            "open('notes.txt', 'w').write('hi')\nprint(open('notes.txt').read())",
            5,
            ExecutionConfig::default(),
        )
        .await;
        assert_eq!(inside.stdout, "hi\n");
    }

    #[tokio::test]
    async fn real_builtins_are_guarded_too() {
        if !python_available() {
            eprintln!("python3 not found; skipping");
            return;
        }
        let outside = tempfile::tempdir().unwrap();
        let target = outside.path().join("escape.txt");
        let executor = ProcessExecutor::new(ExecutionConfig::default(), &AnalyzerPolicy::default());

        let source = format!("print.__self__.open({:?}, 'w').write('x')", target.display().to_string());
        let result = run_unchecked(&executor, &source, 5).await;
        assert_eq!(result.exit_reason, ExitReason::RuntimeError);
        assert!(result.stderr.contains("PermissionError"), "{}", result.stderr);
        assert!(!target.exists());

        let result = run_unchecked(&executor, "print.__self__.__import__('os').system('true')", 5).await;
        assert_eq!(result.exit_reason, ExitReason::RuntimeError);
        assert!(result.stderr.contains("blocked in the sandbox"), "{}", result.stderr);
    }

    #[tokio::test]
    async fn audit_hook_refuses_processes_sockets_and_outside_writes() {
        if !python_available() {
            eprintln!("python3 not found; skipping");
            return;
        }
        let outside = tempfile::tempdir().unwrap();
        let target = outside.path().join("escape.txt");
        let executor = ProcessExecutor {
            config: ExecutionConfig::default(),
            denied_roots: String::new(),
        };

        let sources = [
            "import os\nos.system('true')".to_owned(),
            "import socket\nsocket.socket()".to_owned(),
            format!(
                "import os\nos.open({:?}, os.O_WRONLY | os.O_CREAT)",
                target.display().to_string()
            ),
        ];
        for source in &sources {
            let result = run_unchecked(&executor, source, 5).await;
            assert_eq!(result.exit_reason, ExitReason::RuntimeError, "{source}");
            assert!(result.stderr.contains("PermissionError"), "{source}: {}", result.stderr);
        }
        assert!(!target.exists());

        let result = run_unchecked(&executor, "import os\nfd = os.open('notes.txt', os.O_WRONLY | os.O_CREAT)\nos.write(fd, b'ok')\nos.close(fd)\nprint(open('notes.txt').read())", 5).await;
        assert_eq!(result.stdout, "ok\n", "{}", result.stderr);
    }

    #[cfg(target_os = "linux")]
    fn is_running(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next())
                .is_some_and(|state| state != "Z" && state != "X"),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_leaves_no_process_behind() {
        use std::os::unix::fs::PermissionsExt;

        // Stands in for the interpreter: backgrounds a long sleep, reports its
        // pid, then spins until the deadline.
        let dir = tempfile::tempdir().unwrap();
        let interpreter = dir.path().join("forking-interpreter");
        std::fs::write(&interpreter, "#!/bin/sh\nsleep 300 &\necho $!\nwhile :; do :; done\n").unwrap();
        std::fs::set_permissions(&interpreter, std::fs::Permissions::from_mode(0o755)).unwrap();
        let config = ExecutionConfig {
            interpreter: interpreter.display().to_string(),
            ..ExecutionConfig::default()
        };
        let executor = ProcessExecutor::new(config, &AnalyzerPolicy::default());

        let mut result = run_unchecked(&executor, "pass", 1).await;
        for _ in 0..5 {
            if !result.stderr.contains("Text file busy") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            result = run_unchecked(&executor, "pass", 1).await;
        }
        assert_eq!(result.exit_reason, ExitReason::Timeout, "{}", result.stderr);
        assert!(result.elapsed_ms < 5_000);

        let pid: i32 = result.stdout.trim().parse().unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while is_running(pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!is_running(pid), "background process {pid} outlived the timeout");
    }

    #[cfg(unix)]
    #[test]
    fn cpu_limit_signals_before_the_hard_kill() {
        use std::os::unix::process::{CommandExt, ExitStatusExt};

        let limits = Rlimits {
            memory_bytes: 512 * 1024 * 1024,
            cpu_seconds: 1,
            file_bytes: 1024,
        };
        assert_eq!(limits.cpu_limits(), (1, 2));

        let mut command = std::process::Command::new("/bin/sh");
        command.args(["-c", "while :; do :; done"]);
        // SAFETY: the hook only calls async-signal-safe setrlimit.
        unsafe {
            command.pre_exec(move || limits.apply());
        }
        let status = command.status().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGXCPU));
        assert_eq!(classify(Some(status), false, ""), ExitReason::Timeout);
    }

    #[tokio::test]
    async fn missing_interpreter_is_a_runtime_error() {
        let config = ExecutionConfig {
            interpreter: "assist-no-such-interpreter".to_owned(),
            ..ExecutionConfig::default()
        };
        let result = run("print(1)", 5, config).await;
        assert_eq!(result.exit_reason, ExitReason::RuntimeError);
        assert!(result.stderr.starts_with("failed to start interpreter"));
    }

    #[test]
    fn timeout_wins_over_exit_status() {
        assert_eq!(classify(None, true, ""), ExitReason::Timeout);
        assert_eq!(classify(None, false, ""), ExitReason::RuntimeError);
    }
}
