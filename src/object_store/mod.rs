//! Object storage backends for raw uploads and converted text.
//!
//! | Backend | Config | Notes |
//! |---------|--------|-------|
//! | `filesystem` | `storage.root` | Keys map to relative paths under the root |
//! | `s3` | `storage.bucket`, `storage.region` | SigV4-signed REST calls; `endpoint_url` for MinIO/LocalStack |

pub mod fs;
pub mod s3;

use std::sync::Arc;

use anyhow::{bail, Context};

use marble_core::objects::ObjectStore;

use crate::config::StorageConfig;

pub use fs::FsObjectStore;
pub use s3::S3ObjectStore;

pub fn create_object_store(config: &StorageConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match config.backend.as_str() {
        "filesystem" => {
            let root = config
                .root
                .clone()
                .context("storage.root is required for the filesystem backend")?;
            Ok(Arc::new(FsObjectStore::new(root)))
        }
        "s3" => Ok(Arc::new(S3ObjectStore::from_config(config)?)),
        other => bail!("Unknown storage backend: {}", other),
    }
}
