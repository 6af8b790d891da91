//! Configuration data model — spec.md §3 ("Backend") and §6
//! ("Configuration"). Loading these shapes from CLI args/TOML files is an
//! external collaborator (spec.md §1); the shapes themselves are core data
//! other components are typed against.

use serde::Deserialize;
use std::path::PathBuf;

/// A mount's access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// Read-only: writes are rejected.
    Ro,
    /// Read-write: writes go through and are pushed back to the store.
    Rw,
    /// Overlay: deletions/modifications persist as tombstones/flags rather
    /// than literal filesystem removals.
    Ol,
}

/// A content-addressed origin store endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Stor {
    pub addr: String,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub passwd: Option<String>,
}

/// Selects which in-memory/persisted implementation backs the meta store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetaStoreKind {
    #[default]
    Tree,
    Sled,
}

/// Selects the change-tracker variant (spec.md §3's "Change tracker").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrackerKind {
    #[default]
    Map,
    Sidecar,
}

/// A backend: the rooted directory under which a mount's mirror lives,
/// plus the store/crypto/cron configuration spec.md §3 attaches to it.
#[derive(Debug, Clone, Deserialize)]
pub struct Backend {
    pub path: PathBuf,
    pub stor: Stor,
    pub namespace: String,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub user_rsa_private_pem: Option<PathBuf>,
    #[serde(default)]
    pub user_rsa_public_pem: Option<PathBuf>,
    #[serde(default)]
    pub store_rsa_public_pem: Option<PathBuf>,
    #[serde(default)]
    pub upload: bool,
    #[serde(default = "default_push_interval")]
    pub push_interval_secs: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_cleanup_older_than")]
    pub cleanup_older_than_hours: u64,
    #[serde(default)]
    pub log: Option<PathBuf>,
    #[serde(default)]
    pub meta_store: MetaStoreKind,
    #[serde(default)]
    pub tracker: TrackerKind,
    #[serde(default = "default_file_timeout")]
    pub file_timeout_secs: u64,
    #[serde(default = "default_max_upload_workers")]
    pub max_upload_workers: usize,
    /// Root of a local-FS cache layer (C3) raced ahead of the origin store
    /// on every `open` — spec.md §4.3/§4.4. `None` means the cache manager
    /// has only the origin layer, the degenerate single-layer case.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// The cache layer's dedupe subpath under `cache_dir` — spec.md's
    /// glossary: `<root>/dedupe/files/<hash>`.
    #[serde(default = "default_cache_dedupe")]
    pub cache_dedupe: String,
}

fn default_cache_dedupe() -> String {
    "dedupe".into()
}

fn default_push_interval() -> u64 {
    60
}
fn default_cleanup_interval() -> u64 {
    3600
}
fn default_cleanup_older_than() -> u64 {
    24
}
fn default_file_timeout() -> u64 {
    15 * 60
}
fn default_max_upload_workers() -> usize {
    10
}

/// Per-mount configuration — spec.md §6.
#[derive(Debug, Clone, Deserialize)]
pub struct MountConfig {
    pub path: PathBuf,
    pub flist: PathBuf,
    pub backend: Backend,
    pub mode: Mode,
    #[serde(default)]
    pub trim_base: String,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_kernel_timeout")]
    pub kernel_attr_timeout_seconds: u64,
    #[serde(default = "default_kernel_timeout")]
    pub kernel_entry_timeout_seconds: u64,
}

fn default_cache_ttl() -> u64 {
    60
}
fn default_kernel_timeout() -> u64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let toml_str = r#"
            path = "/mnt/x"
            flist = "/tmp/x.flist"
            mode = "RW"

            [backend]
            path = "/var/be"
            namespace = "ns"

            [backend.stor]
            addr = "http://localhost:8080"
        "#;
        let cfg: MountConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.mode, Mode::Rw);
        assert_eq!(cfg.backend.namespace, "ns");
        assert_eq!(cfg.backend.push_interval_secs, 60);
    }
}
