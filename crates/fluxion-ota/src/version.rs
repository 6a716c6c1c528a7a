// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Mapping between firmware versions and artifact file names
//!
//! Artifacts are stored as `firmware_<major>_<minor>_<patch>.bin`. Names that do
//! not follow the pattern are still valid registry entries, they just have no
//! derivable version.

use std::cmp::Ordering;

const FILE_PREFIX: &str = "firmware_";
const FILE_SUFFIX: &str = ".bin";

fn is_numeric(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
}

fn three_numeric_parts(s: &str, separator: char) -> Option<[&str; 3]> {
    let mut parts = s.split(separator);
    let major = parts.next()?;
    let minor = parts.next()?;
    let patch = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    [major, minor, patch]
        .iter()
        .all(|p| is_numeric(p))
        .then_some([major, minor, patch])
}

/// Strict `MAJOR.MINOR.PATCH` check after trimming surrounding whitespace.
/// Leading zeros are accepted as-is.
pub fn is_valid_semver_like(input: &str) -> bool {
    three_numeric_parts(input.trim(), '.').is_some()
}

/// Canonical file name for a version that already passed [`is_valid_semver_like`].
pub fn version_to_file_name(version: &str) -> String {
    let safe = version.trim().replace('.', "_");
    format!("{FILE_PREFIX}{safe}{FILE_SUFFIX}")
}

/// Dotted version encoded in a canonical artifact name, if any.
pub fn file_name_to_version(name: &str) -> Option<String> {
    let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    let [major, minor, patch] = three_numeric_parts(stem, '_')?;
    Some(format!("{major}.{minor}.{patch}"))
}

/// Numeric comparison of two digit strings of arbitrary length
fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Component-wise ordering of two dotted versions.
///
/// Components are compared numerically without overflow, so `1.10.0` sorts
/// after `1.9.0` and `01.0.0` equals `1.0.0` numerically (ties fall back to the
/// raw strings to keep the order total). Strings that are not valid versions
/// sort before every valid one.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (three_numeric_parts(a, '.'), three_numeric_parts(b, '.')) {
        (Some(left), Some(right)) => left
            .iter()
            .zip(right.iter())
            .map(|(l, r)| compare_numeric(l, r))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}
