//! End-to-end daemonization through the `wardend` binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use daemon_warden::control;
use tempfile::TempDir;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

struct Scratch {
    dir: TempDir,
}

impl Scratch {
    fn new() -> Self {
        Scratch {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn lock_file(&self) -> PathBuf {
        self.dir.path().join("svc.lock")
    }

    fn pid_file(&self) -> PathBuf {
        self.dir.path().join("svc.pid")
    }

    fn log_file(&self) -> PathBuf {
        self.dir.path().join("svc.log")
    }

    fn log(&self) -> String {
        fs::read_to_string(self.log_file()).unwrap_or_default()
    }

    /// `wardend` pointed at the scratch lock and pid files, without a log
    /// target of its own.
    fn command(&self, directory: &Path) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_wardend"));
        command
            .env_remove("NOTIFY_SOCKET")
            .env_remove("RUST_LOG")
            .env_remove("WARDEN_USER")
            .env_remove("WARDEN_GROUP")
            .arg("--name")
            .arg("svc")
            .arg("--directory")
            .arg(directory)
            .arg("--lock-file")
            .arg(self.lock_file())
            .arg("--pid-file")
            .arg(self.pid_file())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
    }

    fn launch(&self, directory: &Path, extra: &[&str]) -> ExitStatus {
        self.command(directory)
            .arg("--log-file")
            .arg(self.log_file())
            .args(extra)
            .status()
            .unwrap()
    }

    /// Starts a daemon that is terminated when the returned guard drops.
    fn start(&self) -> Running {
        let status = self.launch(self.dir.path(), &[]);
        assert!(status.success(), "daemon failed to start:\n{}", self.log());
        let pid = control::read_pid(self.pid_file()).unwrap();
        Running {
            pid,
            pid_file: self.pid_file(),
        }
    }
}

struct Running {
    pid: u32,
    pid_file: PathBuf,
}

impl Drop for Running {
    fn drop(&mut self) {
        if self.pid_file.exists() {
            let _ = control::terminate(self.pid);
            wait_until(SHUTDOWN_TIMEOUT, || !self.pid_file.exists());
        }
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}

#[test]
fn pid_file_names_the_running_daemon() {
    let scratch = Scratch::new();
    let daemon = scratch.start();

    let content = fs::read_to_string(scratch.pid_file()).unwrap();
    assert_eq!(content, format!("{}\n", daemon.pid));
    assert!(control::is_alive(daemon.pid));
    assert!(scratch.lock_file().exists());
}

#[test]
fn sigterm_cleans_up_both_files() {
    let scratch = Scratch::new();
    let daemon = scratch.start();

    control::terminate(daemon.pid).unwrap();
    assert!(wait_until(SHUTDOWN_TIMEOUT, || {
        !scratch.pid_file().exists() && !scratch.lock_file().exists()
    }));

    assert!(wait_until(SHUTDOWN_TIMEOUT, || scratch.log().contains("SIGTERM")));
    let log = scratch.log();
    assert!(log.contains("received termination signal"), "{log}");
    assert!(log.contains("finished"), "{log}");
}

#[test]
fn second_instance_reports_already_running() {
    let scratch = Scratch::new();
    let first = scratch.start();

    let status = scratch.launch(scratch.dir.path(), &[]);
    assert!(!status.success());

    // The live daemon keeps its pid record and lock.
    assert_eq!(
        fs::read_to_string(scratch.pid_file()).unwrap(),
        format!("{}\n", first.pid)
    );
    assert!(control::is_alive(first.pid));
    assert!(scratch.log().contains("another instance is running"));
}

#[test]
fn missing_working_directory_leaves_nothing_behind() {
    let scratch = Scratch::new();
    let missing = scratch.dir.path().join("does-not-exist");

    let status = scratch.launch(&missing, &[]);
    assert!(!status.success());
    assert!(!scratch.pid_file().exists());
    assert!(!scratch.lock_file().exists());
    assert!(scratch.log().contains("failed to change directory"));

    // Neither the lock nor the pid record survived the aborted attempt.
    let daemon = scratch.start();
    assert!(control::is_alive(daemon.pid));
}

#[test]
fn restart_after_clean_shutdown() {
    let scratch = Scratch::new();

    let first = scratch.start();
    assert!(control::stop(scratch.pid_file(), SHUTDOWN_TIMEOUT).unwrap());
    assert!(wait_until(SHUTDOWN_TIMEOUT, || !scratch.lock_file().exists()));
    drop(first);

    let second = scratch.start();
    assert_eq!(
        control::read_pid(scratch.pid_file()).unwrap(),
        second.pid
    );
}

#[test]
fn extra_arguments_are_echoed() {
    let scratch = Scratch::new();
    let status = scratch.launch(scratch.dir.path(), &["--", "alpha", "-b"]);
    assert!(status.success(), "{}", scratch.log());
    let daemon = Running {
        pid: control::read_pid(scratch.pid_file()).unwrap(),
        pid_file: scratch.pid_file(),
    };

    assert!(wait_until(SHUTDOWN_TIMEOUT, || scratch.log().contains("1: -b")));
    let log = scratch.log();
    assert!(log.contains("0: alpha"), "{log}");
    drop(daemon);
}

#[test]
fn default_log_outlives_detaching() {
    let scratch = Scratch::new();
    // The default log lands in the temp dir, named after the daemon.
    let status = scratch
        .command(scratch.dir.path())
        .env("TMPDIR", scratch.dir.path())
        .status()
        .unwrap();
    assert!(status.success(), "daemon failed to start:\n{}", scratch.log());
    let pid = control::read_pid(scratch.pid_file()).unwrap();

    control::terminate(pid).unwrap();
    assert!(wait_until(SHUTDOWN_TIMEOUT, || !scratch.pid_file().exists()));
    let finished = |line: &str| line.contains("finished") && line.contains(&format!("pid={pid} "));
    assert!(wait_until(SHUTDOWN_TIMEOUT, || scratch.log().lines().any(finished)));

    let log = scratch.log();
    let shutdown = log
        .lines()
        .find(|line| line.contains("received termination signal"))
        .unwrap_or_else(|| panic!("no shutdown line in:\n{log}"));
    assert!(
        shutdown.contains(&format!("daemon{{name=svc pid={pid}}}")),
        "{shutdown}"
    );
}

#[cfg(target_os = "linux")]
#[test]
fn supervisor_receives_ready_and_stopping() {
    use std::os::unix::net::UnixDatagram;

    let scratch = Scratch::new();
    let socket_path = scratch.dir.path().join("notify.sock");
    let socket = UnixDatagram::bind(&socket_path).unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let receive = || {
        let mut buf = [0u8; 256];
        let len = socket.recv(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..len]).into_owned()
    };

    let mut child = scratch
        .command(scratch.dir.path())
        .arg("--log-file")
        .arg(scratch.log_file())
        .env("NOTIFY_SOCKET", &socket_path)
        .spawn()
        .unwrap();

    let ready = receive();
    assert!(ready.contains("READY=1"), "{ready}");

    // No fork: the supervised process itself owns the pid record.
    assert_eq!(control::read_pid(scratch.pid_file()).unwrap(), child.id());
    assert!(scratch.lock_file().exists());
    assert!(scratch.log().contains("supervisor detected"));

    control::terminate(child.id()).unwrap();
    let stopping = receive();
    assert!(stopping.contains("STOPPING=1"), "{stopping}");

    assert!(child.wait().unwrap().success());
    assert!(!scratch.pid_file().exists());
    assert!(!scratch.lock_file().exists());
}

#[cfg(target_os = "linux")]
#[test]
fn lost_supervisor_socket_is_logged_on_shutdown() {
    use std::os::unix::net::UnixDatagram;

    let scratch = Scratch::new();
    let socket_path = scratch.dir.path().join("notify.sock");
    let socket = UnixDatagram::bind(&socket_path).unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let mut child = scratch
        .command(scratch.dir.path())
        .arg("--log-file")
        .arg(scratch.log_file())
        .env("NOTIFY_SOCKET", &socket_path)
        .spawn()
        .unwrap();
    let mut buf = [0u8; 256];
    socket.recv(&mut buf).unwrap();

    drop(socket);
    fs::remove_file(&socket_path).unwrap();

    control::terminate(child.id()).unwrap();
    assert!(child.wait().unwrap().success());
    assert!(!scratch.pid_file().exists());
    let log = scratch.log();
    assert!(log.contains("failed to notify supervisor of shutdown"), "{log}");
}
