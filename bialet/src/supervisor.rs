//! C6: startup sequence, the debounced reload trigger, the Linux file
//! watcher and cron runner, and worker-process supervision under resource
//! limits.

use crate::config::{BialetConfig, SCRIPT_EXTENSION};
use crate::db::Db;
use crate::runtime::Driver;
use crate::shell::{self, yellow};
use crate::util::fs::read_optional;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Minimum time between reload-trigger runs.
const DEBOUNCE_WINDOW: Duration = Duration::from_secs(3);

/// Cron hook period.
const CRON_INTERVAL: Duration = Duration::from_secs(60);

/// Debounce window the file-watcher itself applies before handing off a
/// batch of change events (kept short; the reload trigger has its own,
/// longer debounce on top).
const WATCHER_DEBOUNCE: Duration = Duration::from_millis(200);

/// Shared state backing the reload trigger and the cached cron source.
/// Plain `std::sync::Mutex` rather than `tokio::sync::Mutex`: every caller
/// either already holds a blocking context (the file watcher's dedicated
/// thread) or is willing to run this on one (`spawn_blocking`), and lock
/// durations here are always short.
pub struct ReloadState {
    last_run: StdMutex<Option<Instant>>,
    cron_source: StdMutex<Option<String>>,
    reload_tx: broadcast::Sender<()>,
}

impl ReloadState {
    pub fn new() -> Arc<ReloadState> {
        let (reload_tx, _rx) = broadcast::channel(16);
        Arc::new(ReloadState {
            last_run: StdMutex::new(None),
            cron_source: StdMutex::new(None),
            reload_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.reload_tx.subscribe()
    }

    /// Runs the migration hook (or `Db.init`) and reinstalls the cron
    /// source, unless the last run was inside the debounce window.
    /// Synchronous: callers on the async side should run this via
    /// `spawn_blocking`.
    pub fn fire(&self, config: &BialetConfig, db: &Arc<Db>) {
        {
            let mut last = self.last_run.lock().expect("reload state poisoned");
            let now = Instant::now();
            if let Some(prev) = *last {
                if now.duration_since(prev) < DEBOUNCE_WINDOW {
                    return;
                }
            }
            *last = Some(now);
        }

        run_migration(config, db);
        self.install_cron(config);
        let _ = self.reload_tx.send(());
    }

    fn install_cron(&self, config: &BialetConfig) {
        let source = cron_candidates(config)
            .into_iter()
            .find_map(read_optional);

        if source.is_some() {
            shell::Shell::println(yellow("Installing cron"));
        }

        *self.cron_source.lock().expect("reload state poisoned") = source;
    }

    pub fn cron_source(&self) -> Option<String> {
        self.cron_source
            .lock()
            .expect("reload state poisoned")
            .clone()
    }
}

fn migration_candidates(config: &BialetConfig) -> [PathBuf; 2] {
    [
        config.root_dir.join(format!("_migration.{SCRIPT_EXTENSION}")),
        config
            .root_dir
            .join("_app")
            .join(format!("migration.{SCRIPT_EXTENSION}")),
    ]
}

fn cron_candidates(config: &BialetConfig) -> [PathBuf; 2] {
    [
        config.root_dir.join(format!("_cron.{SCRIPT_EXTENSION}")),
        config
            .root_dir
            .join("_app")
            .join(format!("cron.{SCRIPT_EXTENSION}")),
    ]
}

fn run_migration(config: &BialetConfig, db: &Arc<Db>) {
    let driver = Driver::new(Arc::new(config.clone()), Arc::clone(db));

    let found = migration_candidates(config)
        .into_iter()
        .find_map(|path| read_optional(&path).map(|source| (path, source)));

    match found {
        Some((path, source)) => {
            let response = driver.run(&source, &path, None);
            shell::Shell::println(format!(
                "{} {}",
                yellow("Running migration"),
                String::from_utf8_lossy(&response.body)
            ));
        }
        None => {
            driver.run("Db.init", &config.root_dir, None);
        }
    }
}

/// Runs the cached cron source (if any) in a request-less driver.
fn run_cron(config: &BialetConfig, db: &Arc<Db>, state: &ReloadState) {
    if let Some(source) = state.cron_source() {
        let driver = Driver::new(Arc::new(config.clone()), Arc::clone(db));
        driver.run(&source, &config.root_dir, None);
    }
}

/// Spawns the dedicated cron task, ticking every 60 seconds starting at
/// process startup, on every platform (the spec's "or an in-loop timer"
/// fallback collapses to the same `tokio::time::interval` task since
/// Bialet is async end to end).
pub fn spawn_cron_task(config: Arc<BialetConfig>, db: Arc<Db>, state: Arc<ReloadState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CRON_INTERVAL);
        loop {
            ticker.tick().await;
            let config = Arc::clone(&config);
            let db = Arc::clone(&db);
            let state = Arc::clone(&state);
            let _ = tokio::task::spawn_blocking(move || run_cron(&config, &db, &state)).await;
        }
    });
}

/// Runs the reload trigger once, synchronously, at startup.
pub fn run_initial_reload(config: &BialetConfig, db: &Arc<Db>, state: &ReloadState) {
    state.fire(config, db);
}

/// Linux-only inotify-backed watcher: fires the reload trigger on any
/// modification to a script-extension file under `root_dir`.
#[cfg(target_os = "linux")]
pub fn spawn_file_watcher(config: Arc<BialetConfig>, db: Arc<Db>, state: Arc<ReloadState>) {
    use notify_debouncer_mini::{new_debouncer, DebounceEventResult};

    std::thread::spawn(move || {
        let (tx, rx) = std::sync::mpsc::channel::<DebounceEventResult>();

        let mut debouncer = match new_debouncer(WATCHER_DEBOUNCE, tx) {
            Ok(d) => d,
            Err(e) => {
                log::error!("failed to start file watcher: {e}");
                return;
            }
        };

        if let Err(e) = debouncer
            .watcher()
            .watch(&config.root_dir, notify::RecursiveMode::Recursive)
        {
            log::error!("failed to watch '{}': {e}", config.root_dir.display());
            return;
        }

        for result in rx {
            let Ok(events) = result else { continue };
            let touched_script = events.iter().any(|event| {
                event
                    .path
                    .extension()
                    .map(|ext| ext == SCRIPT_EXTENSION)
                    .unwrap_or(false)
            });
            if touched_script {
                state.fire(&config, &db);
            }
        }
    });
}

#[cfg(not(target_os = "linux"))]
pub fn spawn_file_watcher(_config: Arc<BialetConfig>, _db: Arc<Db>, _state: Arc<ReloadState>) {
    log::warn!("file watching is only supported on Linux; dev-mode reload is manual-only here");
}

/// Flag flipped by the signal handler; the accept loop checks it between
/// requests so shutdown is observed promptly without a cooperative cancel
/// token inside the VM.
pub static SHUTTING_DOWN: AtomicBool = AtomicBool::new(false);

pub fn install_signal_handlers() {
    #[cfg(unix)]
    {
        tokio::spawn(async {
            let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
            SHUTTING_DOWN.store(true, Ordering::SeqCst);
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async {
            let _ = tokio::signal::ctrl_c().await;
            SHUTTING_DOWN.store(true, Ordering::SeqCst);
        });
    }
}

/// Linux-only worker supervision: re-exec the current binary with
/// `--worker`, applying `RLIMIT_AS`/`RLIMIT_CPU` to the child before it
/// execs, and restart it on abnormal exit. A clean exit (status 0) — the
/// worker observed `SHUTTING_DOWN` and stopped the listener — takes the
/// supervisor down with it.
#[cfg(target_os = "linux")]
pub async fn supervise_worker(config: &BialetConfig) -> std::io::Result<()> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe()?;
    let mem_hard = config.mem_hard_limit;
    let cpu_hard = config.cpu_hard_limit;

    loop {
        let mut cmd = tokio::process::Command::new(&exe);
        cmd.args(std::env::args().skip(1));
        cmd.arg("--worker");

        unsafe {
            cmd.pre_exec(move || set_rlimits(mem_hard, cpu_hard));
        }

        let status = cmd.status().await;

        match status {
            Ok(status) if status.success() => {
                log::info!("worker exited cleanly, shutting down");
                return Ok(());
            }
            Ok(status) => {
                shell::Shell::eprintln(format!("{}: worker exited with {status}", yellow("Restarting")));
            }
            Err(e) => {
                log::error!("failed to spawn worker: {e}");
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn set_rlimits(mem_hard_mb: u64, cpu_hard_secs: u64) -> std::io::Result<()> {
    use nix::sys::resource::{setrlimit, Resource};

    let mem_bytes = mem_hard_mb * 1024 * 1024;
    setrlimit(Resource::RLIMIT_AS, mem_bytes, mem_bytes)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    setrlimit(Resource::RLIMIT_CPU, cpu_hard_secs, cpu_hard_secs)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::color_choice::ColorChoice;
    use std::fs;
    use tempfile::tempdir;

    fn test_config(root: PathBuf) -> BialetConfig {
        BialetConfig {
            root_dir: root,
            host: "127.0.0.1".into(),
            port: 7001,
            log_file: None,
            production: false,
            color: ColorChoice::Never,
            mem_soft_limit: 50,
            mem_hard_limit: 100,
            cpu_soft_limit: 15,
            cpu_hard_limit: 30,
            db_path: PathBuf::from(":memory:"),
            ignored_files: vec![],
            wal: false,
        }
    }

    #[test]
    fn reload_trigger_debounces_within_window() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let db = Db::open_in_memory();
        let state = ReloadState::new();

        state.fire(&config, &db);
        let first = *state.last_run.lock().unwrap();

        state.fire(&config, &db);
        let second = *state.last_run.lock().unwrap();

        assert_eq!(first, second, "second call within the debounce window must be a no-op");
    }

    #[test]
    fn missing_cron_file_clears_cached_source() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let db = Db::open_in_memory();
        let state = ReloadState::new();

        state.fire(&config, &db);
        assert_eq!(state.cron_source(), None);
    }

    #[test]
    fn present_cron_file_is_cached() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("_cron.wren"), "Db.log(\"tick\")").unwrap();
        let config = test_config(dir.path().to_path_buf());
        let db = Db::open_in_memory();
        let state = ReloadState::new();

        state.fire(&config, &db);
        assert_eq!(state.cron_source().as_deref(), Some("Db.log(\"tick\")"));
    }
}
