//! Multi-value behaviour of a mapping.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a mapping that matches several values is turned into output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiValueBehaviour {
    /// Every match is emitted inline, in the row currently being built.
    Greedy,
    /// One match per row, selected by the mapping's group index.
    Lazy,
    /// Inherit from the nearest ancestor or the configuration default.
    /// Never survives [`crate::mapping::MappingTree::resolve_effective_behaviour`].
    #[default]
    Default,
}

impl MultiValueBehaviour {
    pub fn is_default(self) -> bool {
        self == MultiValueBehaviour::Default
    }
}

impl FromStr for MultiValueBehaviour {
    type Err = String;

    /// Parses the configuration attribute value. Only the explicit values are
    /// accepted; leaving the attribute out is how `Default` is expressed.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "greedy" => Ok(MultiValueBehaviour::Greedy),
            "lazy" => Ok(MultiValueBehaviour::Lazy),
            _ => Err(format!(
                "Invalid behaviour \"{}\", expected \"greedy\" or \"lazy\"",
                s
            )),
        }
    }
}

impl fmt::Display for MultiValueBehaviour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MultiValueBehaviour::Greedy => "greedy",
            MultiValueBehaviour::Lazy => "lazy",
            MultiValueBehaviour::Default => "default",
        };
        f.write_str(s)
    }
}
