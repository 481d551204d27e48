//! Data structures for Bialet's command-line interface.

use crate::shell::color_choice::ColorChoice;

/// 🚲 bialet — a self-contained application server.
#[derive(Debug, clap::Parser)]
#[command(name = "bialet", about, version, disable_version_flag = true, long_about = None)]
pub struct Args {
    /// print version and exit
    #[arg(short = 'v', long = "version")]
    pub version: bool,

    /// listen host
    #[arg(short = 'h', long = "host", default_value = "127.0.0.1")]
    pub host: String,

    /// listen port
    #[arg(short = 'p', long = "port", default_value_t = 7001)]
    pub port: u16,

    /// log to FILE instead of the console (disables colour)
    #[arg(short = 'l', long = "log", value_name = "FILE")]
    pub log_file: Option<String>,

    /// database file (default _db.sqlite3 under root_dir)
    #[arg(short = 'd', long = "database", value_name = "PATH")]
    pub db_path: Option<String>,

    /// production mode: no live-reload, no dev warnings
    #[arg(short = 'P', long = "production")]
    pub production: bool,

    /// enable WAL journal mode
    #[arg(short = 'w', long = "wal")]
    pub wal: bool,

    /// comma-separated ignored-files glob list
    #[arg(
        short = 'i',
        long = "ignore",
        value_name = "GLOBS",
        default_value = "README*,LICENSE*,*.json,*.yml,*.yaml"
    )]
    pub ignored_files: String,

    /// memory soft limit, in MB
    #[arg(short = 'm', long = "mem-soft", default_value_t = 50)]
    pub mem_soft_limit: u64,

    /// memory hard limit, in MB
    #[arg(short = 'M', long = "mem-hard", default_value_t = 100)]
    pub mem_hard_limit: u64,

    /// CPU soft limit, in seconds
    #[arg(short = 'c', long = "cpu-soft", default_value_t = 15)]
    pub cpu_soft_limit: u64,

    /// CPU hard limit, in seconds
    #[arg(short = 'C', long = "cpu-hard", default_value_t = 30)]
    pub cpu_hard_limit: u64,

    /// run CODE as a one-shot CLI script and exit
    #[arg(short = 'r', long = "run", value_name = "CODE")]
    pub run_code: Option<String>,

    /// selection of whether output should use colour
    #[arg(long = "color", value_enum, default_value_t = ColorChoice::Auto, hide = true)]
    pub color: ColorChoice,

    /// the root directory of the script tree to serve
    #[arg(value_name = "root_dir")]
    pub root_dir: Option<String>,

    /// internal: run as the supervised worker process (Linux only)
    #[arg(long = "worker", hide = true)]
    pub worker: bool,
}
