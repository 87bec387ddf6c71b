// 该文件是 Subfig （子图分割） 项目的一部分。
// src/cache/fs_store.rs - 文件系统缓存存储
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  cache::{CacheError, CacheStore},
};

const ENTRY_EXTENSION: &str = "json";

/// 每个键对应目录下的一个 `<key>.json` 文件
#[derive(Debug, Clone)]
pub struct FsCacheStore {
  directory: PathBuf,
}

impl FromUrlWithScheme for FsCacheStore {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for FsCacheStore {
  type Error = CacheError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(CacheError::SchemeMismatch(url.scheme().to_string()));
    }
    let directory =
      crate::decode_url_path(url).map_err(|e| CacheError::InvalidPath(e.to_string()))?;
    let store = Self::new(directory)?;
    info!("使用文件夹缓存: {}", store.directory().display());
    Ok(store)
  }
}

impl FsCacheStore {
  pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self, CacheError> {
    let directory = directory.as_ref().to_path_buf();
    std::fs::create_dir_all(&directory)?;
    Ok(Self { directory })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn entry_path(&self, key: &str) -> PathBuf {
    self.directory.join(format!("{key}.{ENTRY_EXTENSION}"))
  }
}

impl CacheStore for FsCacheStore {
  fn contains(&self, key: &str) -> Result<bool, CacheError> {
    Ok(self.entry_path(key).is_file())
  }

  fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
    match std::fs::read(self.entry_path(key)) {
      Ok(bytes) => Ok(Some(bytes)),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  fn store(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
    // 先写入同目录临时文件，再以不覆盖的方式改名
    let mut file = NamedTempFile::new_in(&self.directory)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;

    match file.persist_noclobber(self.entry_path(key)) {
      Ok(_) => Ok(()),
      Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
        warn!("缓存条目已存在, 保持不变: {}", key);
        Ok(())
      }
      Err(e) => Err(e.error.into()),
    }
  }

  fn remove(&self, key: &str) -> Result<bool, CacheError> {
    match std::fs::remove_file(self.entry_path(key)) {
      Ok(()) => Ok(true),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
      Err(e) => Err(e.into()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn store_writes_one_file_per_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsCacheStore::new(dir.path().join("cache")).unwrap();
    store.store("PMC1_fig2", b"[]").unwrap();

    let path = dir.path().join("cache").join("PMC1_fig2.json");
    assert_eq!(store.entry_path("PMC1_fig2"), path);
    assert_eq!(std::fs::read(&path).unwrap(), b"[]");
    assert!(store.contains("PMC1_fig2").unwrap());
    assert_eq!(store.load("missing").unwrap(), None);
  }

  #[test]
  fn store_does_not_clobber() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsCacheStore::new(dir.path()).unwrap();
    store.store("fig", b"first").unwrap();
    store.store("fig", b"second").unwrap();
    assert_eq!(store.load("fig").unwrap(), Some(b"first".to_vec()));

    // 没有遗留临时文件
    let entries = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(entries, 1);
  }

  #[test]
  fn remove_reports_presence() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsCacheStore::new(dir.path()).unwrap();
    store.store("fig", b"[]").unwrap();
    assert!(store.remove("fig").unwrap());
    assert!(!store.remove("fig").unwrap());
    assert!(!store.contains("fig").unwrap());
  }
}
