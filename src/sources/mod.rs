//! # Source Resolution Model
//!
//! Where every piece of code comes from. A [`Sources`] value maps each
//! [`Location`] (the main software, or an addon directory) to the
//! [`Source`] it is fetched from, in declaration order, plus the merges to
//! apply on top of version-controlled sources.
//!
//! Declaration order matters: it becomes the addons path order, earlier
//! entries winning on name collisions. Declaring the same location twice
//! replaces the earlier source in place, which is how layered
//! configurations override each other.

pub mod parse;

use std::fmt;

use indexmap::IndexMap;
use log::warn;
use serde::Serialize;

use crate::error::{Error, Result};

/// Key of the source map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Location {
    /// The one main software tree of a part.
    MainSoftware,
    /// An addon directory, as declared (relative to the base directory
    /// unless absolute).
    Addon(String),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::MainSoftware => write!(f, "main software"),
            Location::Addon(path) => write!(f, "{}", path),
        }
    }
}

/// How a source is obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SourceKind {
    /// Already on disk; never fetched, at most cleaned.
    Local,
    /// An archive fetched over HTTP(S).
    Downloadable { url: String },
    /// A working tree managed by a registered version-control backend.
    Vcs {
        backend: String,
        url: String,
        revision: String,
    },
}

impl SourceKind {
    pub fn backend(&self) -> &str {
        match self {
            SourceKind::Local => parse::LOCAL,
            SourceKind::Downloadable { .. } => parse::URL,
            SourceKind::Vcs { backend, .. } => backend,
        }
    }

    pub fn revision(&self) -> Option<&str> {
        match self {
            SourceKind::Vcs { revision, .. } => Some(revision),
            _ => None,
        }
    }

    pub fn is_vcs(&self) -> bool {
        matches!(self, SourceKind::Vcs { .. })
    }
}

/// A declared source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    #[serde(flatten)]
    pub kind: SourceKind,
    /// Declared target path. `None` only for a downloadable main software,
    /// whose directory is named by the archive.
    pub target: Option<String>,
    pub options: IndexMap<String, String>,
}

impl Source {
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Options meant for the backend, without the driver-level ones.
    pub fn backend_options(&self) -> IndexMap<String, String> {
        self.options
            .iter()
            .filter(|(k, _)| k.as_str() != parse::GROUP_OPTION && k.as_str() != parse::SUBDIR_OPTION)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// A merge to apply onto a version-controlled source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeSpec {
    pub backend: String,
    pub url: String,
    pub revision: String,
    pub options: IndexMap<String, String>,
}

/// The ordered source and merge maps of one part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sources {
    entries: IndexMap<Location, Source>,
    merges: IndexMap<Location, Vec<MergeSpec>>,
}

impl Sources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares (or redeclares in place) the source of `location`.
    pub fn insert(&mut self, location: Location, source: Source) {
        self.entries.insert(location, source);
    }

    pub fn get(&self, location: &Location) -> Option<&Source> {
        self.entries.get(location)
    }

    pub fn main_software(&self) -> Option<&Source> {
        self.entries.get(&Location::MainSoftware)
    }

    /// Every source, main software included, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&Location, &Source)> {
        self.entries.iter()
    }

    /// Addon sources in declaration order.
    pub fn addons(&self) -> impl Iterator<Item = (&str, &Source)> {
        self.entries.iter().filter_map(|(location, source)| match location {
            Location::Addon(path) => Some((path.as_str(), source)),
            Location::MainSoftware => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies a revision override.
    ///
    /// Returns `Ok(false)` with a warning for an unknown location, which
    /// is assumed to be leftover configuration. Overriding a non-VCS source
    /// is a configuration error.
    pub fn set_revision(&mut self, location: &Location, revision: &str) -> Result<bool> {
        let Some(source) = self.entries.get_mut(location) else {
            warn!(
                "Revision {} given for {}, which has no declared source; ignoring it",
                revision, location
            );
            return Ok(false);
        };
        match &mut source.kind {
            SourceKind::Vcs { revision: current, .. } => {
                *current = revision.to_string();
                Ok(true)
            }
            other => Err(Error::config(format!(
                "Cannot fix revision '{}' of {}: it is a {} source, not a version-controlled one",
                revision,
                location,
                other.backend()
            ))),
        }
    }

    /// Appends a merge for `location`, which must be a VCS source.
    pub fn add_merge(&mut self, location: Location, merge: MergeSpec) -> Result<()> {
        match self.entries.get(&location) {
            Some(source) if source.kind.is_vcs() => {}
            Some(source) => {
                return Err(Error::config(format!(
                    "Cannot merge {} {} into {}: it is a {} source",
                    merge.url,
                    merge.revision,
                    location,
                    source.kind.backend()
                )))
            }
            None => {
                return Err(Error::config(format!(
                    "Cannot merge {} {} into {}: no version-controlled source is declared there",
                    merge.url, merge.revision, location
                )))
            }
        }
        self.merges.entry(location).or_default().push(merge);
        Ok(())
    }

    pub fn merges_for(&self, location: &Location) -> &[MergeSpec] {
        self.merges
            .get(location)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every merge, grouped by target in declaration order.
    pub fn merges(&self) -> impl Iterator<Item = (&Location, &MergeSpec)> {
        self.merges
            .iter()
            .flat_map(|(location, specs)| specs.iter().map(move |spec| (location, spec)))
    }

    pub fn has_merges(&self) -> bool {
        self.merges.values().any(|m| !m.is_empty())
    }
}
