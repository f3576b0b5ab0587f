// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_LARGE_COMMIT_THRESHOLD: usize = 10_000;
pub const DEFAULT_SLOW_COMMIT_THRESHOLD: Duration = Duration::from_secs(5);

/// Per-table configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Human readable name of the table, used to tag log output.
    pub name: Option<String>,
    /// Commits with more pending write entries than this are logged as potentially large batches.
    pub large_commit_threshold: usize,
    /// Commits which hold the writer lock for at least this long are logged as slow.
    pub slow_commit_threshold: Duration,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            name: None,
            large_commit_threshold: DEFAULT_LARGE_COMMIT_THRESHOLD,
            slow_commit_threshold: DEFAULT_SLOW_COMMIT_THRESHOLD,
        }
    }
}

impl TableConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub(crate) fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_takes_defaults() {
        let config: TableConfig = serde_json::from_str(r#"{ "name": "accounts" }"#).unwrap();
        assert_eq!(config.name.as_deref(), Some("accounts"));
        assert_eq!(config.large_commit_threshold, DEFAULT_LARGE_COMMIT_THRESHOLD);
        assert_eq!(config.slow_commit_threshold, DEFAULT_SLOW_COMMIT_THRESHOLD);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(TableConfig::default().display_name(), "<anonymous>");
        assert_eq!(TableConfig::named("orders").display_name(), "orders");
    }
}
