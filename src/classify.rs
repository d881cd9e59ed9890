//! Archive format detection and multi-part grouping
//!
//! Classification works on file names only. Multi-volume sets (`.partN.rar`,
//! old-style `.rar` + `.rNN`, and numeric `.NNN` splits) collapse into a single
//! [`ArchiveUnit`] whose canonical path is the volume the engine expects as its
//! entry point.

use crate::scanner::FileEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Archive format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArchiveFormat {
    #[serde(rename = "generic-7z")]
    Generic7z,
    #[serde(rename = "zip")]
    Zip,
    #[serde(rename = "rar")]
    Rar,
    #[serde(rename = "rar-multipart")]
    RarMultipart,
    #[serde(rename = "self-extracting-exe")]
    SelfExtractingExe,
}

impl ArchiveFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveFormat::Generic7z => "generic-7z",
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Rar => "rar",
            ArchiveFormat::RarMultipart => "rar-multipart",
            ArchiveFormat::SelfExtractingExe => "self-extracting-exe",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Naming scheme of a multi-volume set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VolumeScheme {
    /// `name.part1.rar`, `name.part2.rar`, ...
    PartRar,
    /// `name.rar`, `name.r00`, `name.r01`, ...
    OldRar,
    /// `name.001`, `name.002`, ...
    NumericSplit,
}

/// Result of classifying one file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// A self-contained archive
    Single(ArchiveFormat),
    /// One volume of a set; `base` is the name with the volume suffix
    /// stripped, `index` orders volumes within the set
    Volume {
        scheme: VolumeScheme,
        base: String,
        index: u32,
    },
}

/// Classify a file by its name. Returns `None` for non-candidates.
///
/// Suffixes match case-insensitively; the base name keeps its case except on
/// Windows, where file names are case-insensitive.
pub fn classify(path: &Path, include_exe: bool) -> Option<Classification> {
    let name = path.file_name()?.to_str()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    let ext = ext.to_ascii_lowercase();

    match ext.as_str() {
        "7z" => Some(Classification::Single(ArchiveFormat::Generic7z)),
        "zip" => Some(Classification::Single(ArchiveFormat::Zip)),
        "exe" if include_exe => Some(Classification::Single(ArchiveFormat::SelfExtractingExe)),
        "rar" => match split_part_suffix(stem) {
            Some((base, index)) => Some(Classification::Volume {
                scheme: VolumeScheme::PartRar,
                base: set_base(base),
                index,
            }),
            // The head of an old-style set sorts before `.r00`
            None => Some(Classification::Volume {
                scheme: VolumeScheme::OldRar,
                base: set_base(stem),
                index: 0,
            }),
        },
        _ => {
            if let Some(digits) = ext.strip_prefix('r') {
                if digits.len() >= 2 {
                    let n = parse_digits(digits)?;
                    return Some(Classification::Volume {
                        scheme: VolumeScheme::OldRar,
                        base: set_base(stem),
                        index: n.checked_add(1)?,
                    });
                }
                return None;
            }

            if ext.len() == 3 {
                let n = parse_digits(&ext)?;
                return Some(Classification::Volume {
                    scheme: VolumeScheme::NumericSplit,
                    base: set_base(stem),
                    index: n,
                });
            }

            None
        }
    }
}

fn set_base(base: &str) -> String {
    if cfg!(windows) {
        base.to_lowercase()
    } else {
        base.to_string()
    }
}

/// Split `name.partN` into (`name`, N)
fn split_part_suffix(stem: &str) -> Option<(&str, u32)> {
    let (base, part) = stem.rsplit_once('.')?;
    let (prefix, digits) = (part.get(..4)?, part.get(4..)?);
    if base.is_empty() || !prefix.eq_ignore_ascii_case("part") {
        return None;
    }
    Some((base, parse_digits(digits)?))
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// A logical verification target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveUnit {
    /// Entry point handed to the verification engine
    pub canonical_path: PathBuf,
    pub format: ArchiveFormat,
    /// Every constituent file, canonical path first
    pub parts: Vec<PathBuf>,
    /// Combined size of all parts
    pub size: u64,
    /// Latest modification time among the parts
    pub modified_ns: i64,
}

impl ArchiveUnit {
    /// Key under which this unit's record is stored
    pub fn key(&self) -> String {
        self.canonical_path.to_string_lossy().into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum GroupKey {
    Single(PathBuf),
    Set {
        dir: PathBuf,
        base: String,
        scheme: VolumeScheme,
    },
}

/// Classify scanned files and collapse volume sets into units.
///
/// Non-candidates are dropped. Units are returned ordered by key.
pub fn group<I>(entries: I, include_exe: bool) -> Vec<ArchiveUnit>
where
    I: IntoIterator<Item = FileEntry>,
{
    let mut groups: BTreeMap<GroupKey, (Option<ArchiveFormat>, Vec<(u32, FileEntry)>)> =
        BTreeMap::new();

    for entry in entries {
        let Some(classification) = classify(&entry.path, include_exe) else {
            continue;
        };

        match classification {
            Classification::Single(format) => {
                groups.insert(
                    GroupKey::Single(entry.path.clone()),
                    (Some(format), vec![(0, entry)]),
                );
            }
            Classification::Volume {
                scheme,
                base,
                index,
            } => {
                let dir = entry
                    .path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                groups
                    .entry(GroupKey::Set { dir, base, scheme })
                    .or_insert_with(|| (None, Vec::new()))
                    .1
                    .push((index, entry));
            }
        }
    }

    let mut units: Vec<ArchiveUnit> = groups
        .into_iter()
        .map(|(key, (format, mut members))| {
            members.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.path.cmp(&b.1.path)));

            let format = format.unwrap_or_else(|| match key {
                // A `.rar` with no `.rNN` siblings is an ordinary archive
                GroupKey::Set {
                    scheme: VolumeScheme::OldRar,
                    ..
                } if members.len() == 1 && members[0].0 == 0 => ArchiveFormat::Rar,
                _ => ArchiveFormat::RarMultipart,
            });

            let size = members.iter().map(|(_, e)| e.size).sum();
            let modified_ns = members
                .iter()
                .map(|(_, e)| e.modified_ns)
                .max()
                .unwrap_or_default();
            let parts: Vec<PathBuf> = members.into_iter().map(|(_, e)| e.path).collect();

            ArchiveUnit {
                canonical_path: parts[0].clone(),
                format,
                parts,
                size,
                modified_ns,
            }
        })
        .collect();

    units.sort_by(|a, b| a.canonical_path.cmp(&b.canonical_path));
    units
}
