// Transient view query: filter text and single active sort key

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Username,
    Cpu,
    Mem,
    Storage,
    Status,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "username" | "user" => Ok(SortKey::Username),
            "cpu" => Ok(SortKey::Cpu),
            "mem" | "memory" => Ok(SortKey::Mem),
            "storage" => Ok(SortKey::Storage),
            "status" => Ok(SortKey::Status),
            other => Err(format!("unknown sort key {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    /// +1 for ascending, -1 for descending.
    pub fn sign(&self) -> i8 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewQuery {
    pub filter_text: String,
    pub sort_key: SortKey,
    pub direction: SortDirection,
}
