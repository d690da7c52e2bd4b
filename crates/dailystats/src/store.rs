// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Object store construction from the target URL

use crate::config::Config;
use crate::error::ConfigError;
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use std::sync::Arc;

/// Build the store that `config.target.url` points at.
///
/// `s3://bucket` uses the configured region and credentials, `memory://` is
/// a throwaway in-process store, and anything else is a local directory
/// (with or without a `file://` scheme) that is created if missing.
pub fn build_object_store(config: &Config) -> Result<Arc<dyn ObjectStore>, ConfigError> {
    let url = config.target.url.as_str();
    let store_error = |reason: String| ConfigError::Store {
        url: url.to_string(),
        reason,
    };

    if let Some(rest) = url.strip_prefix("s3://") {
        let bucket = rest.split('/').next().unwrap_or("");
        if bucket.is_empty() {
            return Err(store_error("missing bucket name".to_string()));
        }
        let (key, secret) = config.credentials.require()?;

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&config.region)
            .with_access_key_id(key)
            .with_secret_access_key(secret);
        if let Some(token) = config.credentials.session_token.as_deref() {
            builder = builder.with_token(token);
        }

        let store = builder
            .build()
            .map_err(|e| store_error(format!("Failed to build S3 store: {e}")))?;
        return Ok(Arc::new(store));
    }

    if url == "memory://" {
        return Ok(Arc::new(InMemory::new()));
    }

    let path = match url::Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "file" => parsed
            .to_file_path()
            .map_err(|()| store_error("not a local path".to_string()))?,
        Ok(parsed) if parsed.scheme().len() > 1 => {
            return Err(store_error(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }
        // Bare paths, including Windows drive letters that parse as a scheme
        _ => std::path::PathBuf::from(url),
    };

    std::fs::create_dir_all(&path)
        .map_err(|e| store_error(format!("Failed to create {}: {e}", path.display())))?;
    let store = LocalFileSystem::new_with_prefix(&path)
        .map_err(|e| store_error(format!("Failed to build local store: {e}")))?;
    Ok(Arc::new(store))
}
