//! Output formatter for human-readable and JSON output
//!
//! JSON mode prints one pretty-printed document per command on stdout and
//! never mixes in colors, spinners or status lines.

use std::time::Duration;

use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::{ContentArrangement, Table};
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use super::OutputConfig;

/// Color theme for styled output
#[derive(Debug, Clone)]
pub struct Theme {
    /// Resource names - bold
    pub name: Style,
    /// Object and stream sizes - green
    pub size: Style,
    /// Timestamps - dim
    pub date: Style,
    /// Attribute keys - cyan
    pub key: Style,
    /// ARNs and endpoints - cyan + underline
    pub arn: Style,
    pub success: Style,
    pub error: Style,
    pub warning: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            name: Style::new().bold(),
            size: Style::new().green(),
            date: Style::new().dim(),
            key: Style::new().cyan(),
            arn: Style::new().cyan().underlined(),
            success: Style::new().green(),
            error: Style::new().red(),
            warning: Style::new().yellow(),
        }
    }
}

impl Theme {
    /// Returns a theme with no styling (for no-color mode)
    pub fn plain() -> Self {
        Self {
            name: Style::new(),
            size: Style::new(),
            date: Style::new(),
            key: Style::new(),
            arn: Style::new(),
            success: Style::new(),
            error: Style::new(),
            warning: Style::new(),
        }
    }
}

/// Formatter for CLI output
///
/// Handles both human-readable and JSON output formats based on configuration.
#[derive(Debug, Clone)]
pub struct Formatter {
    config: OutputConfig,
    theme: Theme,
}

impl Formatter {
    pub fn new(config: OutputConfig) -> Self {
        let theme = if config.no_color || config.json {
            Theme::plain()
        } else {
            Theme::default()
        };
        Self { config, theme }
    }

    pub fn is_json(&self) -> bool {
        self.config.json
    }

    pub fn is_quiet(&self) -> bool {
        self.config.quiet
    }

    pub fn colors_enabled(&self) -> bool {
        !self.config.no_color && !self.config.json
    }

    // ========== Style helper methods ==========

    pub fn style_name(&self, text: &str) -> String {
        self.theme.name.apply_to(text).to_string()
    }

    pub fn style_size(&self, text: &str) -> String {
        self.theme.size.apply_to(text).to_string()
    }

    pub fn style_date(&self, text: &str) -> String {
        self.theme.date.apply_to(text).to_string()
    }

    pub fn style_key(&self, text: &str) -> String {
        self.theme.key.apply_to(text).to_string()
    }

    pub fn style_arn(&self, text: &str) -> String {
        self.theme.arn.apply_to(text).to_string()
    }

    // ========== Output methods ==========

    /// Output a success message (human mode only)
    pub fn success(&self, message: &str) {
        if self.config.quiet || self.config.json {
            return;
        }
        let checkmark = self.theme.success.apply_to("✓");
        println!("{checkmark} {message}");
    }

    /// Output an error message
    ///
    /// Errors are always printed, even in quiet mode.
    pub fn error(&self, message: &str) {
        if self.config.json {
            let error = serde_json::json!({
                "error": message
            });
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&error).unwrap_or_else(|_| message.to_string())
            );
        } else {
            let cross = self.theme.error.apply_to("✗");
            eprintln!("{cross} {message}");
        }
    }

    /// Output a warning message
    pub fn warning(&self, message: &str) {
        if self.config.quiet || self.config.json {
            return;
        }
        let warn_icon = self.theme.warning.apply_to("⚠");
        eprintln!("{warn_icon} {message}");
    }

    /// Output JSON directly
    pub fn json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Error serializing output: {e}"),
        }
    }

    /// Print a line of text (respects quiet mode)
    pub fn println(&self, message: &str) {
        if self.config.quiet {
            return;
        }
        println!("{message}");
    }

    /// Print rows as a bordered table (respects quiet mode)
    pub fn table(&self, headers: &[&str], rows: Vec<Vec<String>>) {
        if self.config.quiet {
            return;
        }
        println!("{}", self.render_table(headers, rows));
    }

    fn render_table(&self, headers: &[&str], rows: Vec<Vec<String>>) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_BORDERS_ONLY)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(headers.iter().map(|h| self.style_key(h)));
        if !self.colors_enabled() {
            table.force_no_tty();
        }
        for row in rows {
            table.add_row(row);
        }
        table
    }

    /// Spinner on stderr for a long-running step; `None` in JSON or quiet mode
    pub fn spinner(&self, message: &str) -> Option<ProgressBar> {
        if self.is_quiet() || self.is_json() {
            return None;
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        Some(spinner)
    }
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new(OutputConfig::default())
    }
}

/// Human-readable size, binary units
pub fn human_size(bytes: i64) -> String {
    humansize::format_size(bytes.max(0) as u64, humansize::BINARY)
}
