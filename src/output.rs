//! Plain or decorated summary lines.
//!
//! Command summaries start with an emoji when the output is a color
//! terminal and with a bracketed tag (`[MAIN]`, `[FROZEN]`...) otherwise,
//! which keeps them greppable in logs and CI output.
//!
//! `--color=always|never` wins. With `auto`, `NO_COLOR` (even empty) and
//! `CLICOLOR=0` turn decorations off, `CLICOLOR_FORCE` turns them on, and
//! the terminal decides in the remaining cases.
//!
//! ```
//! use recipe_sources::output::{emoji, OutputConfig};
//!
//! let config = OutputConfig::from_env_and_flag("never");
//! assert_eq!(emoji(&config, "📌", "[FROZEN]"), "[FROZEN]");
//! ```

use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputConfig {
    pub use_color: bool,
}

impl OutputConfig {
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_ascii_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::terminal_wants_color(),
        };
        Self { use_color }
    }

    fn terminal_wants_color() -> bool {
        if env::var_os("NO_COLOR").is_some() || env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }
        if env::var("CLICOLOR_FORCE").is_ok_and(|v| !v.is_empty() && v != "0") {
            return true;
        }
        // `console` already treats TERM=dumb as colorless
        console::Term::stdout().features().colors_supported()
    }
}

/// `decorated` on a color terminal, `plain` otherwise.
pub fn emoji<'a>(config: &OutputConfig, decorated: &'a str, plain: &'a str) -> &'a str {
    if config.use_color {
        decorated
    } else {
        plain
    }
}
