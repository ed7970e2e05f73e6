//! Immutable settings for one recorder, built once at startup

use std::{fmt, str::FromStr};

use crate::{
    errors::{Error, Result},
    exfil::MAX_CIRCULAR_IF_SIZE,
    mode::Mode,
};

/// Mapping of the four 2 bit sample codes to signed levels. Must hold -3, -1, 1
/// and 3 once each, in any order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LookupTable([i8; 4]);

impl LookupTable {
    pub fn new(levels: [i8; 4]) -> Result<Self> {
        let mut sorted = levels;
        sorted.sort_unstable();
        if sorted == [-3, -1, 1, 3] {
            Ok(Self(levels))
        } else {
            Err(Error::InvalidLookupTable(format!("{levels:?}")))
        }
    }

    pub fn levels(&self) -> [i8; 4] {
        self.0
    }
}

impl Default for LookupTable {
    fn default() -> Self {
        Self([1, 3, -3, -1])
    }
}

impl FromStr for LookupTable {
    type Err = Error;

    /// Four whitespace separated integers, nothing more
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidLookupTable(s.to_owned());
        let levels = s
            .split_whitespace()
            .map(|tok| tok.parse::<i8>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>>>()?;
        let levels: [i8; 4] = levels.try_into().map_err(|_| invalid())?;
        Self::new(levels).map_err(|_| invalid())
    }
}

impl fmt::Display for LookupTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a} {b} {c} {d}")
    }
}

#[derive(Clone, Debug)]
pub struct RecorderConfig {
    pub mode: Mode,
    /// Prefix of every output file, and tag in the logs
    pub log_name: String,
    pub skip_agc: bool,
    /// `None` writes the IF file linearly
    pub if_ceiling: Option<u64>,
    pub lookup_table: LookupTable,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            log_name: "data/test".to_owned(),
            skip_agc: false,
            if_ceiling: Some(MAX_CIRCULAR_IF_SIZE),
            lookup_table: LookupTable::default(),
        }
    }
}
