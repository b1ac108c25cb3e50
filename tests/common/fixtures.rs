//! Shared fixtures for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared helpers under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/fixtures.rs"]
//! mod fixtures;
//! ```

use camino::Utf8PathBuf;
use flotilla::{Account, ClientConfig, CloudType};
use tempfile::TempDir;

/// Temporary flotilla home removed when dropped.
pub struct TempHome {
    _tmp: TempDir,
    /// UTF-8 path of the home directory.
    pub path: Utf8PathBuf,
}

impl TempHome {
    /// Creates an empty home directory.
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("flotilla"))
            .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
        Self { _tmp: tmp, path }
    }

    /// Client configuration rooted at this home.
    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            home: Some(self.path.to_string()),
            ..ClientConfig::default()
        }
    }
}

/// make-coe account with no derived state.
pub fn make_coe_account() -> Account {
    Account::builder(CloudType::MakeCoe)
        .username("alice")
        .secret("api-key")
        .build()
        .unwrap_or_else(|err| panic!("account should build: {err}"))
}
