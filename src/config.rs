//! # Recipe Configuration
//!
//! This module reads and writes the INI-style recipe files that declare what
//! to fetch. The format is deliberately small:
//!
//! - `[section]` headers and `key = value` options;
//! - multi-line values, where any indented line continues the value of the
//!   previous option (one logical entry per physical line);
//! - full-line comments starting with `#` or `;`, and blank lines, ignored.
//!
//! Inline `;` comments are left in values: the source declarations strip
//! them themselves, with their own rules.
//!
//! ## Layering
//!
//! `extends = base.cfg [other.cfg...]` in the `[recipe]` section loads the
//! named files first (relative to the extending file) and overlays the
//! current one option by option. Freeze output relies on this to stay a thin
//! extension of the original recipe.
//!
//! ```
//! use recipe_sources::config::RecipeConfig;
//!
//! let config = RecipeConfig::parse("[odoo]\nversion = local server\naddons =\n    local addons-a\n").unwrap();
//! assert_eq!(config.parts(), vec!["odoo"]);
//! assert_eq!(config.lines("odoo", "addons"), vec!["local addons-a"]);
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::debug;

use crate::error::{Error, Result};

/// Section holding the options that apply to the whole recipe.
pub const RECIPE_SECTION: &str = "recipe";

/// Section holding package version pins.
pub const VERSIONS_SECTION: &str = "versions";

pub type Section = IndexMap<String, String>;

/// A parsed, fully layered recipe configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipeConfig {
    sections: IndexMap<String, Section>,
    path: Option<PathBuf>,
    loaded_files: Vec<PathBuf>,
}

impl RecipeConfig {
    /// Parses a single document, without resolving `extends`.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(Self {
            sections: parse_sections(content, None)?,
            path: None,
            loaded_files: Vec::new(),
        })
    }

    /// Loads `path` and everything it extends.
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut loaded_files = Vec::new();
        let mut stack = Vec::new();
        let sections = load_layered(path, &mut stack, &mut loaded_files)?;
        Ok(Self {
            sections,
            path: Some(path.to_path_buf()),
            loaded_files,
        })
    }

    /// File this configuration was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Every file read while resolving `extends`, bases first.
    pub fn loaded_files(&self) -> &[PathBuf] {
        &self.loaded_files
    }

    /// Directory relative paths are resolved against: the `base-directory`
    /// option, else the directory of the configuration file.
    pub fn base_directory(&self) -> PathBuf {
        let config_dir = self
            .path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let config_dir = if config_dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            config_dir
        };
        match self.get(RECIPE_SECTION, "base-directory") {
            Some(dir) if !dir.trim().is_empty() => config_dir.join(expand_home(dir.trim())),
            _ => config_dir,
        }
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    /// Boolean option, `default` when unset or empty.
    pub fn get_bool(&self, section: &str, key: &str, default: bool) -> Result<bool> {
        match self.get(section, key).map(str::trim) {
            None | Some("") => Ok(default),
            Some(value) => parse_bool(value)
                .ok_or_else(|| Error::config(format!("Invalid boolean for {}:{}: '{}'", section, key, value))),
        }
    }

    /// Non-blank lines of a (possibly multi-line) option, trimmed.
    pub fn lines(&self, section: &str, key: &str) -> Vec<&str> {
        self.get(section, key)
            .map(|v| {
                v.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sections declaring a `version` option, in declaration order.
    pub fn parts(&self) -> Vec<&str> {
        self.sections
            .iter()
            .filter(|(name, section)| name.as_str() != RECIPE_SECTION && section.contains_key("version"))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, section: &str, key: &str) -> Option<String> {
        self.sections
            .get_mut(section)
            .and_then(|s| s.shift_remove(key))
    }

    /// Serializes the flattened configuration (no `extends`).
    pub fn to_writer(&self) -> ConfigWriter {
        let mut writer = ConfigWriter::new();
        for (name, section) in &self.sections {
            let mut out = writer.section(name);
            for (key, value) in section {
                out.option(key, value);
            }
        }
        writer
    }
}

/// Parses `true/false/yes/no/on/off/1/0`, case-insensitively.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Expands a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn load_layered(
    path: &Path,
    stack: &mut Vec<PathBuf>,
    loaded_files: &mut Vec<PathBuf>,
) -> Result<IndexMap<String, Section>> {
    let canonical = path.canonicalize().map_err(|e| {
        Error::config(format!("Cannot read configuration {}: {}", path.display(), e))
    })?;
    if stack.contains(&canonical) {
        return Err(Error::config_with_hint(
            format!("Circular extends involving {}", path.display()),
            "remove one of the extends options forming the cycle",
        ));
    }
    debug!("Loading configuration {}", path.display());
    let content = fs::read_to_string(path)?;
    let mut own = parse_sections(&content, Some(path))?;

    let extends = own
        .get_mut(RECIPE_SECTION)
        .and_then(|s| s.shift_remove("extends"))
        .unwrap_or_default();
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    stack.push(canonical);
    let mut merged: IndexMap<String, Section> = IndexMap::new();
    for base in extends.split_whitespace() {
        let base_sections = load_layered(&base_dir.join(expand_home(base)), stack, loaded_files)?;
        overlay(&mut merged, base_sections);
    }
    stack.pop();

    overlay(&mut merged, own);
    loaded_files.push(path.to_path_buf());
    Ok(merged)
}

fn overlay(target: &mut IndexMap<String, Section>, layer: IndexMap<String, Section>) {
    for (name, section) in layer {
        let existing = target.entry(name).or_default();
        for (key, value) in section {
            existing.insert(key, value);
        }
    }
}

fn parse_sections(content: &str, origin: Option<&Path>) -> Result<IndexMap<String, Section>> {
    let mut sections: IndexMap<String, Section> = IndexMap::new();
    let mut current: Option<String> = None;
    let mut last_key: Option<String> = None;
    let location = |lineno: usize| match origin {
        Some(path) => format!("{}:{}", path.display(), lineno + 1),
        None => format!("line {}", lineno + 1),
    };

    for (lineno, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        let indented = line.starts_with(' ') || line.starts_with('\t');
        if indented {
            if let (Some(section), Some(key)) = (&current, &last_key) {
                if let Some(value) = sections.get_mut(section).and_then(|s| s.get_mut(key)) {
                    if !value.is_empty() {
                        value.push('\n');
                    }
                    value.push_str(trimmed);
                    continue;
                }
            }
        }

        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            let name = trimmed[1..trimmed.len() - 1].trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            last_key = None;
        } else if let Some(pos) = trimmed.find('=') {
            let section = current.as_ref().ok_or_else(|| {
                Error::config(format!(
                    "Option outside of any section at {}: '{}'",
                    location(lineno),
                    trimmed
                ))
            })?;
            let key = trimmed[..pos].trim().to_string();
            let value = trimmed[pos + 1..].trim().to_string();
            if let Some(s) = sections.get_mut(section) {
                s.insert(key.clone(), value);
            }
            last_key = Some(key);
        } else {
            return Err(Error::config(format!(
                "Cannot parse {}: '{}'",
                location(lineno),
                trimmed
            )));
        }
    }

    Ok(sections)
}

/// One line of generated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WriterEntry {
    Option { key: String, value: String },
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct WriterSection {
    name: String,
    entries: Vec<WriterEntry>,
}

/// Builds configuration text, keeping sections in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigWriter {
    sections: Vec<WriterSection>,
}

/// Handle on one section of a [`ConfigWriter`].
pub struct SectionWriter<'a> {
    section: &'a mut WriterSection,
}

impl SectionWriter<'_> {
    /// Sets an option, replacing an earlier value for the same key.
    pub fn option(&mut self, key: &str, value: &str) -> &mut Self {
        let entry = WriterEntry::Option {
            key: key.to_string(),
            value: value.to_string(),
        };
        let existing = self
            .section
            .entries
            .iter()
            .position(|e| matches!(e, WriterEntry::Option { key: k, .. } if k == key));
        match existing {
            Some(pos) => self.section.entries[pos] = entry,
            None => self.section.entries.push(entry),
        }
        self
    }

    /// Sets a multi-line option, one item per line.
    pub fn lines<I, S>(&mut self, key: &str, lines: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let value = lines
            .into_iter()
            .map(|l| l.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        let value = if value.is_empty() { value } else { format!("\n{}", value) };
        self.option(key, &value)
    }

    pub fn comment(&mut self, text: &str) -> &mut Self {
        self.section
            .entries
            .push(WriterEntry::Comment(text.to_string()));
        self
    }
}

impl ConfigWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the named section, creating it at the end if needed.
    pub fn section(&mut self, name: &str) -> SectionWriter<'_> {
        let pos = match self.sections.iter().position(|s| s.name == name) {
            Some(pos) => pos,
            None => {
                self.sections.push(WriterSection {
                    name: name.to_string(),
                    entries: Vec::new(),
                });
                self.sections.len() - 1
            }
        };
        SectionWriter {
            section: &mut self.sections[pos],
        }
    }

    pub fn render(&self) -> String {
        let mut output = String::new();

        for (index, section) in self.sections.iter().enumerate() {
            output.push('[');
            output.push_str(&section.name);
            output.push_str("]\n");

            for entry in &section.entries {
                match entry {
                    WriterEntry::Comment(text) => {
                        for line in text.lines() {
                            output.push_str("# ");
                            output.push_str(line);
                            output.push('\n');
                        }
                    }
                    WriterEntry::Option { key, value } => {
                        output.push_str(key);
                        output.push_str(" =");
                        let mut lines = value.lines();
                        if let Some(first) = lines.next() {
                            if !first.is_empty() {
                                output.push(' ');
                                output.push_str(first);
                            }
                        }
                        output.push('\n');
                        for line in lines {
                            output.push_str("    ");
                            output.push_str(line);
                            output.push('\n');
                        }
                    }
                }
            }

            if index + 1 < self.sections.len() {
                output.push('\n');
            }
        }

        output
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.render())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_sections_and_options() {
        let config = RecipeConfig::parse(
            "# leading comment\n[recipe]\noffline = true\n\n[odoo]\nversion = git http://x odoo 16.0\n",
        )
        .unwrap();
        assert_eq!(config.get("recipe", "offline"), Some("true"));
        assert_eq!(config.get("odoo", "version"), Some("git http://x odoo 16.0"));
        assert_eq!(config.get("odoo", "missing"), None);
    }

    #[test]
    fn test_multiline_values() {
        let config = RecipeConfig::parse(
            "[odoo]\nversion = local server\naddons = local first\n    git http://x b 1.0  ; pinned\n\n    ; commented out\n    local c\n",
        )
        .unwrap();
        assert_eq!(
            config.lines("odoo", "addons"),
            vec!["local first", "git http://x b 1.0  ; pinned", "local c"]
        );
    }

    #[test]
    fn test_value_may_start_on_next_line() {
        let config = RecipeConfig::parse("[odoo]\nrevisions =\n    1234\n    addons-a 42\n").unwrap();
        assert_eq!(config.get("odoo", "revisions"), Some("1234\naddons-a 42"));
    }

    #[test]
    fn test_option_outside_section_is_error() {
        let err = RecipeConfig::parse("offline = true\n").unwrap_err();
        assert!(err.to_string().contains("outside of any section"));
    }

    #[test]
    fn test_garbage_line_is_error_with_location() {
        let err = RecipeConfig::parse("[odoo]\nthis is not an option\n").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("line 2"));
        assert!(message.contains("this is not an option"));
    }

    #[test]
    fn test_get_bool() {
        let config = RecipeConfig::parse("[recipe]\na = Yes\nb = off\nc = maybe\nd =\n").unwrap();
        assert!(config.get_bool("recipe", "a", false).unwrap());
        assert!(!config.get_bool("recipe", "b", true).unwrap());
        assert!(config.get_bool("recipe", "c", false).is_err());
        assert!(config.get_bool("recipe", "d", true).unwrap());
        assert!(!config.get_bool("recipe", "unset", false).unwrap());
    }

    #[test]
    fn test_parts_are_sections_with_version() {
        let config = RecipeConfig::parse(
            "[recipe]\nversion = x\n[versions]\nlxml = 4.9\n[odoo]\nversion = local s\n[other]\nversion = local t\n",
        )
        .unwrap();
        assert_eq!(config.parts(), vec!["odoo", "other"]);
    }

    #[test]
    fn test_extends_layering() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("base.cfg"),
            "[recipe]\noffline = false\nclean = true\n[odoo]\nversion = git http://x odoo 16.0\n",
        )
        .unwrap();
        fs::write(
            temp.path().join("prod.cfg"),
            "[recipe]\nextends = base.cfg\noffline = true\n[odoo]\nrevisions = abc\n",
        )
        .unwrap();

        let config = RecipeConfig::from_file(&temp.path().join("prod.cfg")).unwrap();

        assert_eq!(config.get("recipe", "offline"), Some("true"));
        assert_eq!(config.get("recipe", "clean"), Some("true"));
        assert_eq!(config.get("recipe", "extends"), None);
        assert_eq!(config.get("odoo", "version"), Some("git http://x odoo 16.0"));
        assert_eq!(config.get("odoo", "revisions"), Some("abc"));
        assert_eq!(
            config.loaded_files(),
            &[temp.path().join("base.cfg"), temp.path().join("prod.cfg")]
        );
    }

    #[test]
    fn test_circular_extends_is_config_error() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.cfg"), "[recipe]\nextends = b.cfg\n").unwrap();
        fs::write(temp.path().join("b.cfg"), "[recipe]\nextends = a.cfg\n").unwrap();

        let err = RecipeConfig::from_file(&temp.path().join("a.cfg")).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("Circular extends"));
    }

    #[test]
    fn test_base_directory() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("recipe.cfg");
        fs::write(&path, "[recipe]\n").unwrap();
        let config = RecipeConfig::from_file(&path).unwrap();
        assert_eq!(config.base_directory(), temp.path());

        fs::write(&path, "[recipe]\nbase-directory = srv\n").unwrap();
        let config = RecipeConfig::from_file(&path).unwrap();
        assert_eq!(config.base_directory(), temp.path().join("srv"));
    }

    #[test]
    fn test_writer_renders_multiline_and_comments() {
        let mut writer = ConfigWriter::new();
        writer.section("recipe").option("extends", "recipe.cfg");
        writer
            .section("odoo")
            .comment("frozen revisions")
            .lines("revisions", ["1234", "addons-a 42"]);
        writer.section("recipe").option("offline", "true");

        assert_eq!(
            writer.render(),
            "[recipe]\nextends = recipe.cfg\noffline = true\n\n[odoo]\n# frozen revisions\nrevisions =\n    1234\n    addons-a 42\n"
        );
    }

    #[test]
    fn test_writer_output_parses_back() {
        let mut writer = ConfigWriter::new();
        writer
            .section("odoo")
            .option("version", "local parts/odoo")
            .lines("addons", ["local a", "local b"]);
        let config = RecipeConfig::parse(&writer.render()).unwrap();
        assert_eq!(config.lines("odoo", "addons"), vec!["local a", "local b"]);
        assert_eq!(config.get("odoo", "version"), Some("local parts/odoo"));
    }
}
