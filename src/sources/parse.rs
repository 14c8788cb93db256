//! Line parsers for source declarations.
//!
//! Lines are tokenized like a shell command line (quotes group words),
//! after removing an inline comment: a `;` that follows whitespace starts a
//! comment, a `;` glued to a word does not. Positional tokens come first,
//! `key=value` options last.

use indexmap::IndexMap;

use super::{Location, MergeSpec, Source, SourceKind};
use crate::error::{Error, Result};

/// Backend name of sources already present on disk.
pub const LOCAL: &str = "local";

/// Backend name of downloadable main software archives.
pub const URL: &str = "url";

/// Driver-level options, never handed to backends.
pub const GROUP_OPTION: &str = "group";
pub const SUBDIR_OPTION: &str = "subdir";

/// Removes an inline comment: `;` preceded by whitespace up to end of line.
pub fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with(';') {
        return "";
    }
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b';' && i > 0 && bytes[i - 1].is_ascii_whitespace() {
            return line[..i].trim_end();
        }
    }
    line.trim_end()
}

/// Splits a declaration into tokens, honouring quotes.
pub fn tokenize(line: &str) -> Result<Vec<String>> {
    let stripped = strip_comment(line);
    shlex::split(stripped).ok_or_else(|| {
        Error::config(format!("Unbalanced quotes in line: '{}'", line.trim()))
    })
}

/// Separates `positional` leading tokens from trailing `key=value` options.
fn split_options(
    tokens: &[String],
    positional: usize,
    line: &str,
) -> Result<(Vec<String>, IndexMap<String, String>)> {
    if tokens.len() < positional {
        return Err(Error::config(format!(
            "Expected {} positional values, found {} in line: '{}'",
            positional,
            tokens.len(),
            line.trim()
        )));
    }
    let mut options = IndexMap::new();
    for token in &tokens[positional..] {
        match token.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                options.insert(key.to_string(), value.to_string());
            }
            _ => {
                return Err(Error::config_with_hint(
                    format!("Invalid option '{}' in line: '{}'", token, line.trim()),
                    "options must have the form key=value",
                ))
            }
        }
    }
    Ok((tokens[..positional].to_vec(), options))
}

/// Parses one `addons` line; blank and comment-only lines yield `None`.
///
/// `local <path> [opts]` or `<vcs> <url> <target> <revision> [opts]`.
pub fn parse_addon_line(line: &str) -> Result<Option<(Location, Source)>> {
    let tokens = tokenize(line)?;
    let Some(backend) = tokens.first() else {
        return Ok(None);
    };

    let source = if backend == LOCAL {
        let (positional, options) = split_options(&tokens[1..], 1, line)?;
        if options.contains_key(GROUP_OPTION) {
            return Err(Error::config_with_hint(
                format!("Local addons cannot be grouped: '{}'", line.trim()),
                "move the addons into the group directory yourself and declare it as local",
            ));
        }
        Source {
            kind: SourceKind::Local,
            target: Some(normalize_target(&positional[0])),
            options,
        }
    } else if backend == URL {
        return Err(Error::config(format!(
            "Downloadable archives are only supported for the main software: '{}'",
            line.trim()
        )));
    } else {
        let (positional, options) = split_options(&tokens[1..], 3, line)?;
        Source {
            kind: SourceKind::Vcs {
                backend: backend.clone(),
                url: positional[0].clone(),
                revision: positional[2].clone(),
            },
            target: Some(normalize_target(&positional[1])),
            options,
        }
    };

    if source.options.contains_key(GROUP_OPTION) && source.options.contains_key(SUBDIR_OPTION) {
        return Err(Error::config(format!(
            "The group and subdir options cannot be combined: '{}'",
            line.trim()
        )));
    }

    let location = Location::Addon(source.target.clone().unwrap_or_default());
    Ok(Some((location, source)))
}

/// Parses the main software `version` line.
///
/// `local <path>`, `url <archive-url>` or `<vcs> <url> <target> <revision>`,
/// each followed by options.
pub fn parse_main_line(line: &str) -> Result<Source> {
    let tokens = tokenize(line)?;
    let Some(backend) = tokens.first() else {
        return Err(Error::config("Empty main software declaration"));
    };
    if backend == LOCAL {
        let (positional, options) = split_options(&tokens[1..], 1, line)?;
        return Ok(Source {
            kind: SourceKind::Local,
            target: Some(normalize_target(&positional[0])),
            options,
        });
    }
    if backend == URL {
        let (positional, options) = split_options(&tokens[1..], 1, line)?;
        return Ok(Source {
            kind: SourceKind::Downloadable {
                url: positional[0].clone(),
            },
            target: None,
            options,
        });
    }
    if tokens.len() < 4 {
        return Err(Error::config_with_hint(
            format!("Invalid main software declaration: '{}'", line.trim()),
            "use 'local PATH', 'url URL' or 'VCS URL TARGET REVISION'",
        ));
    }
    let (positional, options) = split_options(&tokens[1..], 3, line)?;
    Ok(Source {
        kind: SourceKind::Vcs {
            backend: backend.clone(),
            url: positional[0].clone(),
            revision: positional[2].clone(),
        },
        target: Some(normalize_target(&positional[1])),
        options,
    })
}

/// Parses a revision override line.
///
/// A single token pins the main software, `<path> <revision>` an addon.
pub fn parse_revision_line(line: &str) -> Result<Option<(Location, String)>> {
    let tokens = tokenize(line)?;
    match tokens.as_slice() {
        [] => Ok(None),
        [revision] => Ok(Some((Location::MainSoftware, revision.clone()))),
        [path, revision] => Ok(Some((Location::Addon(normalize_target(path)), revision.clone()))),
        _ => Err(Error::config(format!(
            "Invalid revision line: '{}' (expected '[PATH] REVISION')",
            line.trim()
        ))),
    }
}

/// Parses one `merges` line: `<vcs> <url> <target> <revision> [opts]`.
pub fn parse_merge_line(line: &str) -> Result<Option<(String, MergeSpec)>> {
    let tokens = tokenize(line)?;
    let Some(backend) = tokens.first() else {
        return Ok(None);
    };
    if backend == LOCAL || backend == URL {
        return Err(Error::config(format!(
            "Merges need a version control system, not '{}': '{}'",
            backend,
            line.trim()
        )));
    }
    let (positional, options) = split_options(&tokens[1..], 3, line)?;
    Ok(Some((
        normalize_target(&positional[1]),
        MergeSpec {
            backend: backend.clone(),
            url: positional[0].clone(),
            revision: positional[2].clone(),
            options,
        },
    )))
}

/// Drops `./` components and trailing slashes so equal paths compare equal.
pub fn normalize_target(target: &str) -> String {
    let parts: Vec<&str> = target
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    let joined = parts.join("/");
    if target.starts_with('/') {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}
