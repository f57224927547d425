// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! Dotted component versions, e.g. `1.2.3.4`.
//!
//! Missing trailing segments compare as zero, so `1.2` == `1.2.0.0`.

use std::fmt;
use std::str::FromStr;

#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Version(pub Vec<u32>);

impl Version {
    /// Compare ignoring trailing zeros.
    fn segments_trimmed(&self) -> &[u32] {
        let mut len = self.0.len();
        while len > 0 && self.0[len - 1] == 0 {
            len -= 1;
        }
        &self.0[..len]
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Version) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Version) -> std::cmp::Ordering {
        self.segments_trimmed().cmp(other.segments_trimmed())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// The version was empty or a segment was not a non-negative integer.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid version string")]
pub struct VersionParseError;

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(VersionParseError);
        }
        let segments = s
            .split('.')
            .map(|part| part.parse::<u32>().map_err(|_| VersionParseError))
            .collect::<Result<Vec<u32>, _>>()?;
        Ok(Version(segments))
    }
}

impl From<Vec<u32>> for Version {
    fn from(segments: Vec<u32>) -> Self {
        Version(segments)
    }
}

impl<const N: usize> From<[u32; N]> for Version {
    fn from(segments: [u32; N]) -> Self {
        Version(segments.to_vec())
    }
}
