//! Colored console output for startup/shutdown messages.
//!
//! Bialet's request path never prints to the console directly (it logs via
//! [`crate::log_bridge`]); this module only serves the handful of
//! human-facing lines the supervisor prints at startup, reload, and worker
//! restart, echoing the original `message()`/`welcome()` helpers.

pub mod color_choice;

use color_choice::ColorChoice;
use console::Style;
use std::sync::OnceLock;

static GLOBAL_SHELL: OnceLock<Shell> = OnceLock::new();

pub struct Shell {
    color: ColorChoice,
}

impl Shell {
    /// Initialize the global shell. Panics if called more than once.
    pub fn init(color: ColorChoice) {
        console::set_colors_enabled(color.enabled());
        console::set_colors_enabled_stderr(color.enabled());

        GLOBAL_SHELL
            .set(Shell { color })
            .unwrap_or_else(|_| panic!("Shell::init called more than once"));
    }

    pub fn is_init() -> bool {
        GLOBAL_SHELL.get().is_some()
    }

    fn get() -> &'static Shell {
        GLOBAL_SHELL
            .get()
            .expect("Shell::init must be called before use")
    }

    pub fn colors_enabled() -> bool {
        Shell::get().color.enabled()
    }

    /// Print a line to standard output.
    pub fn println(msg: impl std::fmt::Display) {
        println!("{msg}");
    }

    /// Print a line to standard error.
    pub fn eprintln(msg: impl std::fmt::Display) {
        eprintln!("{msg}");
    }
}

pub fn green(s: impl std::fmt::Display) -> impl std::fmt::Display {
    Style::new().green().apply_to(s.to_string())
}

pub fn yellow(s: impl std::fmt::Display) -> impl std::fmt::Display {
    Style::new().yellow().apply_to(s.to_string())
}

pub fn red(s: impl std::fmt::Display) -> impl std::fmt::Display {
    Style::new().red().apply_to(s.to_string())
}

pub fn blue(s: impl std::fmt::Display) -> impl std::fmt::Display {
    Style::new().blue().apply_to(s.to_string())
}
