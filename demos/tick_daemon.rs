use daemon_warden::{Daemon, LogTarget, Options};
use std::env;
use std::process::ExitCode;
use std::time::{Duration, Instant};

fn main() -> ExitCode {
    // 1. Paths next to the current directory
    let pwd = match env::current_dir() {
        Ok(pwd) => pwd,
        Err(err) => {
            eprintln!("cannot resolve current directory: {err}");
            return ExitCode::FAILURE;
        }
    };
    let log_path = pwd.join("ticker.log");

    println!("Launching a simple ticker daemon...");
    println!("Logs will be written to: {:?}", log_path);
    println!("Stop it with: kill $(cat {:?})", pwd.join("ticker.pid"));

    // 2. Configure and start. Only the detached child gets past this point.
    let daemon = Daemon::new("tick_daemon")
        .lock_file(pwd.join("ticker.lock"))
        .pid_file(pwd.join("ticker.pid"))
        .run_directory(&pwd)
        .log_target(LogTarget::File(log_path))
        .start();

    let mut daemon = match daemon {
        Ok(daemon) => daemon,
        Err(err) => {
            eprintln!("failed to start: {err}");
            return ExitCode::FAILURE;
        }
    };
    daemon.init_options(Options::from_env());

    // 3. Tick every three seconds until SIGTERM
    let phrases = ["They're alive", "Hello world", "Goodbye world"];
    let mut count = 0usize;
    let mut last = Instant::now();

    daemon.run_with(move |process| {
        if last.elapsed() < Duration::from_secs(3) {
            return;
        }
        last = Instant::now();
        tracing::info!(pid = process.pid(), "[Ticker] Ping #{} - {}", count, phrases[count % phrases.len()]);
        count += 1;
    })
}
