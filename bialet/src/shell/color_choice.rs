//! Whether console output should use colour.

/// Selection of whether the CLI output should use colour.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, clap::ValueEnum)]
pub enum ColorChoice {
    /// Always use colour output
    Always,
    /// Never use colour output
    Never,
    /// Guess whether to use colour output
    #[default]
    Auto,
}

impl ColorChoice {
    /// A log file destination always disables colour, matching the CLI's
    /// `-l FILE` flag.
    pub fn for_log_file(has_log_file: bool) -> ColorChoice {
        if has_log_file {
            ColorChoice::Never
        } else {
            ColorChoice::Auto
        }
    }

    pub fn enabled(self) -> bool {
        match self {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => console::colors_enabled(),
        }
    }
}
