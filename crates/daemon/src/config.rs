//! Configuration file loading with all-or-nothing reload semantics.
//!
//! The source is plain text, one `key value` directive per line:
//!
//! ```text
//! low_temp        29
//! trigger_temp    33
//! hysteresis_drop 2
//! update_interval 5
//! output_pin      17
//! stay_on_at_exit true
//! ```
//!
//! Directives are parsed into a staged copy of the active configuration; the
//! staged copy replaces the active one only when the whole source parses.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::parse::{parse_bool, parse_uint, ParseError};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const LOW_TEMP_DEFAULT: u32 = 25;
pub const TRIGGER_TEMP_DEFAULT: u32 = 45;
pub const HYSTERESIS_DROP_DEFAULT: u32 = 10;
pub const UPDATE_INTERVAL_DEFAULT: u32 = 5;

/// Shortest wait between control steps. An `update_interval` of 0 would turn
/// the readiness wait into a busy loop.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub low_temp: u32,
    pub trigger_temp: u32,
    pub hysteresis_drop: u32,
    /// Control loop cadence in seconds.
    pub update_interval: u32,
    /// BCM pin driving the fan; `None` until configured.
    pub output_pin: Option<u32>,
    pub stay_on_at_exit: bool,
    /// Freezes automatic phase transitions.
    pub stopped: bool,
    pub invert_output: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            low_temp: LOW_TEMP_DEFAULT,
            trigger_temp: TRIGGER_TEMP_DEFAULT,
            hysteresis_drop: HYSTERESIS_DROP_DEFAULT,
            update_interval: UPDATE_INTERVAL_DEFAULT,
            output_pin: None,
            stay_on_at_exit: false,
            stopped: false,
            invert_output: false,
        }
    }
}

impl Config {
    /// How long the event loop waits for a command before the next step.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.update_interval)).max(MIN_POLL_INTERVAL)
    }

    /// Threshold combinations that are accepted but probably unintended.
    /// Arithmetic on the thresholds saturates, so none of these is fatal.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.low_temp >= self.trigger_temp {
            warnings.push(format!(
                "low_temp ({}) is not below trigger_temp ({})",
                self.low_temp, self.trigger_temp
            ));
        }
        if self.hysteresis_drop > self.trigger_temp {
            warnings.push(format!(
                "hysteresis_drop ({}) exceeds trigger_temp ({}); release point clamps to 0",
                self.hysteresis_drop, self.trigger_temp
            ));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Directive table
// ---------------------------------------------------------------------------

/// One recognized key, paired with the decoder its value needs and the field
/// it writes.
#[derive(Clone, Copy)]
pub enum Directive {
    Uint(&'static str, fn(&mut Config, u32)),
    Bool(&'static str, fn(&mut Config, bool)),
}

impl Directive {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uint(name, _) | Self::Bool(name, _) => name,
        }
    }

    /// Decode the value at the start of `input` into `config`, returning the
    /// number of bytes consumed.
    fn apply(&self, input: &[u8], config: &mut Config) -> Result<usize, ParseError> {
        match self {
            Self::Uint(_, set) => {
                let (value, consumed) = parse_uint(input)?;
                set(config, value);
                Ok(consumed)
            }
            Self::Bool(_, set) => {
                let (value, consumed) = parse_bool(input)?;
                set(config, value);
                Ok(consumed)
            }
        }
    }
}

fn set_low_temp(c: &mut Config, v: u32) {
    c.low_temp = v;
}
fn set_trigger_temp(c: &mut Config, v: u32) {
    c.trigger_temp = v;
}
fn set_hysteresis_drop(c: &mut Config, v: u32) {
    c.hysteresis_drop = v;
}
fn set_update_interval(c: &mut Config, v: u32) {
    c.update_interval = v;
}
fn set_output_pin(c: &mut Config, v: u32) {
    c.output_pin = Some(v);
}
fn set_stay_on_at_exit(c: &mut Config, v: bool) {
    c.stay_on_at_exit = v;
}
fn set_stopped(c: &mut Config, v: bool) {
    c.stopped = v;
}
fn set_invert_output(c: &mut Config, v: bool) {
    c.invert_output = v;
}

/// Recognized keys in match order. The index of a key in this table is the
/// entry id reported when its value is malformed.
pub const DIRECTIVES: [Directive; 8] = [
    Directive::Uint("low_temp", set_low_temp),
    Directive::Uint("trigger_temp", set_trigger_temp),
    Directive::Uint("hysteresis_drop", set_hysteresis_drop),
    Directive::Uint("update_interval", set_update_interval),
    Directive::Uint("output_pin", set_output_pin),
    Directive::Bool("stay_on_at_exit", set_stay_on_at_exit),
    Directive::Bool("stopped", set_stopped),
    Directive::Bool("invert_output", set_invert_output),
];

/// Entry id reported for a key that is not in [`DIRECTIVES`].
pub const ENTRY_UNRECOGNIZED: i32 = DIRECTIVES.len() as i32;

/// Entry id reported when the load failed before any directive was looked at.
pub const ENTRY_NONE: i32 = -1;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// The source could not be read at all.
    Unavailable,
    UnknownKey,
    BadValue(ParseError),
}

/// Where and why a load failed. `line` and `entry` are sent verbatim to
/// remote callers in a CERR response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigError {
    pub line: i32,
    pub entry: i32,
    pub kind: ConfigErrorKind,
}

impl ConfigError {
    pub fn unavailable() -> Self {
        Self {
            line: 0,
            entry: ENTRY_NONE,
            kind: ConfigErrorKind::Unavailable,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ConfigErrorKind::Unavailable => write!(f, "config source unavailable"),
            ConfigErrorKind::UnknownKey => write!(f, "line {}: unrecognized directive", self.line),
            ConfigErrorKind::BadValue(e) => {
                let key = usize::try_from(self.entry)
                    .ok()
                    .and_then(|i| DIRECTIVES.get(i))
                    .map_or("?", Directive::name);
                write!(f, "line {}: invalid value for `{key}`: {e}", self.line)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// True when `input` starts with `name` followed by whitespace, a newline or
/// the end of the buffer.
fn key_matches(input: &[u8], name: &str) -> bool {
    input.starts_with(name.as_bytes())
        && matches!(input.get(name.len()), None | Some(b' ' | b'\t' | b'\r' | b'\n'))
}

/// Parse every directive in `source` into `config`. Stops at the first
/// failure; `config` may be partially written in that case, so callers pass a
/// scratch copy.
pub fn parse_into(source: &[u8], config: &mut Config) -> Result<(), ConfigError> {
    let mut pos = 0;
    let mut line: i32 = 1;

    loop {
        while pos < source.len() && matches!(source[pos], b' ' | b'\t' | b'\r') {
            pos += 1;
        }
        let Some(&next) = source.get(pos) else {
            return Ok(());
        };
        if next == b'\n' {
            pos += 1;
            line += 1;
            continue;
        }

        let rest = &source[pos..];
        let Some((index, directive)) = DIRECTIVES
            .iter()
            .enumerate()
            .find(|(_, d)| key_matches(rest, d.name()))
        else {
            return Err(ConfigError {
                line,
                entry: ENTRY_UNRECOGNIZED,
                kind: ConfigErrorKind::UnknownKey,
            });
        };

        pos += directive.name().len();
        while pos < source.len() && matches!(source[pos], b' ' | b'\t') {
            pos += 1;
        }

        let consumed = directive
            .apply(&source[pos..], config)
            .map_err(|e| ConfigError {
                line,
                entry: index as i32,
                kind: ConfigErrorKind::BadValue(e),
            })?;
        pos += consumed;
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Active configuration plus the staging copy used while a reload is
/// validated.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    active: Config,
    staged: Config,
}

impl ConfigStore {
    pub fn new(active: Config) -> Self {
        Self {
            staged: active.clone(),
            active,
        }
    }

    pub fn active(&self) -> &Config {
        &self.active
    }

    /// Parse `source` on top of the active configuration and commit it only
    /// if every directive is valid. An empty source is a successful no-op.
    pub fn reload(&mut self, source: &[u8]) -> Result<(), ConfigError> {
        self.staged.clone_from(&self.active);
        parse_into(source, &mut self.staged)?;
        self.active.clone_from(&self.staged);
        Ok(())
    }

    /// Read a full snapshot of `path` and [`reload`](Self::reload) from it.
    /// The snapshot buffer is dropped before returning on every path.
    pub fn reload_from(&mut self, path: &Path) -> Result<(), ConfigError> {
        let source = std::fs::read(path).map_err(|e| {
            tracing::warn!(path = %path.display(), "config read failed: {e}");
            ConfigError::unavailable()
        })?;
        self.reload(&source)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn load(source: &str) -> Result<Config, ConfigError> {
        let mut store = ConfigStore::default();
        store.reload(source.as_bytes())?;
        Ok(store.active().clone())
    }

    /// Assert loading fails at `line` with `entry`.
    fn assert_load_err(source: &str, line: i32, entry: i32) {
        let err = load(source).unwrap_err();
        assert_eq!(
            (err.line, err.entry),
            (line, entry),
            "unexpected error position for {source:?}: {err}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_full_config() {
        let cfg = load(
            "low_temp 29\n\
             trigger_temp 33\n\
             hysteresis_drop 2\n\
             update_interval 10\n\
             output_pin 17\n\
             stay_on_at_exit true\n\
             stopped false\n\
             invert_output true\n",
        )
        .unwrap();

        assert_eq!(
            cfg,
            Config {
                low_temp: 29,
                trigger_temp: 33,
                hysteresis_drop: 2,
                update_interval: 10,
                output_pin: Some(17),
                stay_on_at_exit: true,
                stopped: false,
                invert_output: true,
            }
        );
    }

    #[test]
    fn parse_empty_source_keeps_defaults() {
        assert_eq!(load("").unwrap(), Config::default());
    }

    #[test]
    fn parse_blank_lines_and_indentation() {
        let cfg = load("\n   \n\t low_temp\t 20\n\n").unwrap();
        assert_eq!(cfg.low_temp, 20);
    }

    #[test]
    fn parse_without_trailing_newline() {
        assert_eq!(load("trigger_temp 50").unwrap().trigger_temp, 50);
    }

    #[test]
    fn parse_crlf_line_endings() {
        let cfg = load("low_temp 20\r\nstopped true\r\n").unwrap();
        assert_eq!(cfg.low_temp, 20);
        assert!(cfg.stopped);
    }

    #[test]
    fn parse_numeric_separators() {
        let cfg = load("update_interval 1_0\nlow_temp 2 5\n").unwrap();
        assert_eq!(cfg.update_interval, 10);
        assert_eq!(cfg.low_temp, 25);
    }

    #[test]
    fn parse_trailing_content_starts_next_directive() {
        let cfg = load("low_temp 29 trigger_temp 33\n").unwrap();
        assert_eq!(cfg.low_temp, 29);
        assert_eq!(cfg.trigger_temp, 33);
    }

    #[test]
    fn parse_later_directive_wins() {
        assert_eq!(load("low_temp 1\nlow_temp 2\n").unwrap().low_temp, 2);
    }

    #[test]
    fn partial_source_keeps_other_active_fields() {
        let mut store = ConfigStore::new(Config {
            output_pin: Some(4),
            ..Config::default()
        });
        store.reload(b"trigger_temp 60\n").unwrap();
        assert_eq!(store.active().trigger_temp, 60);
        assert_eq!(store.active().output_pin, Some(4));
    }

    // -- Errors -----------------------------------------------------------

    #[test]
    fn unrecognized_key_reports_table_length() {
        assert_load_err("low_temp 20\nfan_speed 3\n", 2, ENTRY_UNRECOGNIZED);
        assert_eq!(ENTRY_UNRECOGNIZED, 8);
    }

    #[test]
    fn key_prefix_is_not_a_match() {
        assert_load_err("low_temperature 20\n", 1, ENTRY_UNRECOGNIZED);
    }

    #[test]
    fn bad_value_reports_line_and_entry() {
        // blank lines count towards the line number
        assert_load_err("low_temp 20\n\ntrigger_temp hot\n", 3, 1);
    }

    #[test]
    fn missing_value_reports_entry() {
        assert_load_err("hysteresis_drop\n", 1, 2);
        assert_load_err("stopped", 1, 6);
    }

    #[test]
    fn bad_boolean_reports_entry() {
        assert_load_err("stay_on_at_exit yes\n", 1, 5);
        assert_load_err("invert_output TRUE\n", 1, 7);
    }

    #[test]
    fn overflow_is_a_bad_value() {
        let err = load("output_pin 99999999999\n").unwrap_err();
        assert_eq!(err.entry, 4);
        assert_eq!(err.kind, ConfigErrorKind::BadValue(ParseError::Overflow));
    }

    #[test]
    fn unknown_trailing_text_is_unrecognized() {
        assert_load_err("stopped true # comment\n", 1, ENTRY_UNRECOGNIZED);
    }

    #[test]
    fn error_display_names_the_key() {
        let err = load("\nupdate_interval soon\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("line 2"), "got: {msg}");
        assert!(msg.contains("update_interval"), "got: {msg}");
    }

    // -- Atomicity --------------------------------------------------------

    #[test]
    fn failed_reload_leaves_active_untouched() {
        let before = Config {
            low_temp: 29,
            trigger_temp: 33,
            hysteresis_drop: 2,
            ..Config::default()
        };
        let mut store = ConfigStore::new(before.clone());

        let err = store
            .reload(b"low_temp 10\ntrigger_temp 90\noutput_pin x\n")
            .unwrap_err();

        assert_eq!(err.line, 3);
        assert_eq!(store.active(), &before);
    }

    #[test]
    fn reload_after_failure_starts_from_active() {
        let mut store = ConfigStore::default();
        store.reload(b"low_temp 10\nbogus 1\n").unwrap_err();
        store.reload(b"trigger_temp 50\n").unwrap();
        // the rejected low_temp must not leak in through the staged copy
        assert_eq!(store.active().low_temp, LOW_TEMP_DEFAULT);
        assert_eq!(store.active().trigger_temp, 50);
    }

    #[test]
    fn missing_file_is_unavailable() {
        let mut store = ConfigStore::default();
        let err = store
            .reload_from(Path::new("/nonexistent/tcctl/tcctl.conf"))
            .unwrap_err();
        assert_eq!(err, ConfigError::unavailable());
        assert_eq!(err.entry, ENTRY_NONE);
        assert_eq!(store.active(), &Config::default());
    }

    #[test]
    fn reload_from_file() {
        let path = std::env::temp_dir().join(format!("tcctl-config-{}.conf", std::process::id()));
        std::fs::write(&path, "low_temp 30\ntrigger_temp 40\n").unwrap();

        let mut store = ConfigStore::default();
        let result = store.reload_from(&path);
        std::fs::remove_file(&path).unwrap();

        result.unwrap();
        assert_eq!(store.active().low_temp, 30);
        assert_eq!(store.active().trigger_temp, 40);
    }

    // -- Derived values ---------------------------------------------------

    #[test]
    fn poll_interval_has_a_floor() {
        let cfg = Config {
            update_interval: 0,
            ..Config::default()
        };
        assert_eq!(cfg.poll_interval(), Duration::from_secs(1));
        assert_eq!(Config::default().poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn defaults_have_no_warnings() {
        assert!(Config::default().warnings().is_empty());
    }

    #[test]
    fn inverted_thresholds_warn() {
        let cfg = Config {
            low_temp: 50,
            trigger_temp: 40,
            hysteresis_drop: 60,
            ..Config::default()
        };
        let warnings = cfg.warnings();
        assert_eq!(warnings.len(), 2, "got: {warnings:?}");
        assert!(warnings[0].contains("low_temp (50)"));
        assert!(warnings[1].contains("hysteresis_drop (60)"));
    }
}
