mod cli;
mod config;
mod db;
mod error;
mod http;
mod log_bridge;
mod module_loader;
mod pages;
mod resolver;
mod response;
mod runtime;
mod server;
mod shell;
mod sse;
mod supervisor;
mod util;

use clap::Parser;
use config::BialetConfig;
use env_logger::Env;
use runtime::Driver;
use server::AppState;
use shell::color_choice::ColorChoice;
use shell::{yellow, Shell};
use std::process::ExitCode;
use std::sync::Arc;

/// Distinct exit code for "could not open the database", so supervising
/// process managers can tell it apart from a generic script/config failure.
const DB_OPEN_FAILURE: u8 = 11;

fn init_logging() -> Result<(), log::SetLoggerError> {
    let env = Env::new().filter("BIALET_LOG").write_style("BIALET_LOG_STYLE");
    let logger = env_logger::Builder::from_env(env).build();
    log_bridge::LogWrapper(logger).try_init()
}

fn main() -> ExitCode {
    let args = cli::Args::parse();

    if args.version {
        println!("bialet {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let color = ColorChoice::for_log_file(args.log_file.is_some());
    let color = if args.color == ColorChoice::Auto { color } else { args.color };
    Shell::init(color);

    if let Err(e) = init_logging() {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let config = match BialetConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            Shell::eprintln(format!("error: {e}"));
            return ExitCode::FAILURE;
        }
    };

    if let Some(code) = &args.run_code {
        return run_one_shot(&config, code);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            Shell::eprintln(format!("failed to start async runtime: {e}"));
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async_main(config, args.worker))
}

/// `-r CODE`: run `code` once in a request-less driver against the
/// already-migrated database, print the body, and exit. Exit code mirrors
/// the script's HTTP status: non-500 is success.
fn run_one_shot(config: &BialetConfig, code: &str) -> ExitCode {
    let db = match db::Db::open(&config.db_path, config.wal) {
        Ok(db) => db,
        Err(e) => {
            Shell::eprintln(format!("error: {e}"));
            return ExitCode::from(DB_OPEN_FAILURE);
        }
    };

    let driver = Driver::new(Arc::new(config.clone()), db);
    let response = driver.run(code, &config.root_dir, None);
    println!("{}", String::from_utf8_lossy(&response.body));

    if response.status == 500 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn async_main(config: BialetConfig, is_worker: bool) -> ExitCode {
    let config = Arc::new(config);

    let db = match db::Db::open(&config.db_path, config.wal) {
        Ok(db) => db,
        Err(e) => {
            Shell::eprintln(format!("error: {e}"));
            return ExitCode::from(DB_OPEN_FAILURE);
        }
    };

    let reload_state = supervisor::ReloadState::new();

    // On Linux, the top-level invocation only supervises a child worker
    // process under RLIMIT_AS/RLIMIT_CPU; it never touches the database or
    // the reload/cron/watcher machinery itself, since the worker
    // re-invocation (`--worker`) does all of that. Every invocation on
    // non-Linux platforms, and the worker re-invocation itself, falls
    // through to set those up and run the server directly.
    #[cfg(target_os = "linux")]
    if !is_worker {
        return match supervisor::supervise_worker(&config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                Shell::eprintln(format!("worker supervision failed: {e}"));
                ExitCode::FAILURE
            }
        };
    }
    #[cfg(not(target_os = "linux"))]
    let _ = is_worker;

    supervisor::run_initial_reload(&config, &db, &reload_state);
    supervisor::install_signal_handlers();
    supervisor::spawn_cron_task(Arc::clone(&config), Arc::clone(&db), Arc::clone(&reload_state));

    if !config.production {
        supervisor::spawn_file_watcher(Arc::clone(&config), Arc::clone(&db), Arc::clone(&reload_state));
    }

    run_server(config, db, reload_state).await
}

async fn run_server(
    config: Arc<BialetConfig>,
    db: Arc<db::Db>,
    reload_state: Arc<supervisor::ReloadState>,
) -> ExitCode {
    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        db,
        reload: reload_state,
    });

    let router = server::build_router(state);

    let listener = match tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            Shell::eprintln(format!("failed to bind {}:{}: {e}", config.host, config.port));
            return ExitCode::FAILURE;
        }
    };

    Shell::println(format!(
        "{} Bialet is serving {} at {}",
        yellow("*"),
        config.root_dir.display(),
        config.server_url()
    ));

    let shutdown = async {
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            if supervisor::SHUTTING_DOWN.load(std::sync::atomic::Ordering::SeqCst) {
                break;
            }
        }
    };

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
    {
        log::error!("server error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
