//! Process-wide, immutable configuration, built once from CLI flags at
//! startup and shared read-only through the rest of the process.

use crate::cli::Args;
use crate::config_error;
use crate::error::Result;
use crate::shell::color_choice::ColorChoice;
use std::path::PathBuf;

/// The fixed extension distinguishing scripts from static files.
pub const SCRIPT_EXTENSION: &str = "wren";

pub const DEFAULT_DB_FILE: &str = "_db.sqlite3";

#[derive(Debug, Clone)]
pub struct BialetConfig {
    pub root_dir: PathBuf,
    pub host: String,
    pub port: u16,

    pub log_file: Option<PathBuf>,
    pub production: bool,
    pub color: ColorChoice,

    pub mem_soft_limit: u64,
    pub mem_hard_limit: u64,
    pub cpu_soft_limit: u64,
    pub cpu_hard_limit: u64,

    pub db_path: PathBuf,
    pub ignored_files: Vec<String>,
    pub wal: bool,
}

impl BialetConfig {
    pub fn from_args(args: &Args) -> Result<BialetConfig> {
        let root_dir = args
            .root_dir
            .as_ref()
            .ok_or_else(|| config_error!("root_dir is required"))?;
        let root_dir = PathBuf::from(root_dir);

        if !root_dir.is_dir() {
            return Err(config_error!(
                "root_dir '{}' does not exist or is not a directory",
                root_dir.display()
            ));
        }

        let db_path = match &args.db_path {
            Some(p) => PathBuf::from(p),
            None => root_dir.join(DEFAULT_DB_FILE),
        };

        let ignored_files = args
            .ignored_files
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(BialetConfig {
            root_dir,
            host: args.host.clone(),
            port: args.port,
            log_file: args.log_file.as_ref().map(PathBuf::from),
            production: args.production,
            color: args.color,
            mem_soft_limit: args.mem_soft_limit,
            mem_hard_limit: args.mem_hard_limit,
            cpu_soft_limit: args.cpu_soft_limit,
            cpu_hard_limit: args.cpu_hard_limit,
            db_path,
            ignored_files,
            wal: args.wal,
        })
    }

    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Whether a path's file name matches one of the configured ignore
    /// globs. Only `*`-prefix/suffix globs are needed for the default list
    /// (`README*`, `LICENSE*`, `*.json`, `*.yml`, `*.yaml`).
    pub fn is_ignored(&self, file_name: &str) -> bool {
        self.ignored_files
            .iter()
            .any(|pattern| glob_match(pattern, file_name))
    }
}

fn glob_match(pattern: &str, name: &str) -> bool {
    match (pattern.strip_suffix('*'), pattern.strip_prefix('*')) {
        (Some(prefix), _) => name.starts_with(prefix),
        (None, Some(suffix)) => name.ends_with(suffix),
        (None, None) => pattern == name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_match_prefix_and_suffix() {
        assert!(glob_match("README*", "README.md"));
        assert!(glob_match("*.json", "package.json"));
        assert!(!glob_match("*.json", "package.toml"));
    }
}
