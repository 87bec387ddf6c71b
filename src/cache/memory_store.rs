// 该文件是 Subfig （子图分割） 项目的一部分。
// src/cache/memory_store.rs - 内存缓存存储
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

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  cache::{CacheError, CacheStore},
};

/// 进程内存储，克隆后共享同一份数据
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
  entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl FromUrlWithScheme for MemoryCacheStore {
  const SCHEME: &'static str = "memory";
}

impl FromUrl for MemoryCacheStore {
  type Error = CacheError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(CacheError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(Self::default())
  }
}

impl MemoryCacheStore {
  fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<u8>>>, CacheError> {
    self.entries.lock().map_err(|_| CacheError::Poisoned)
  }

  pub fn len(&self) -> usize {
    self.entries().map(|entries| entries.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl CacheStore for MemoryCacheStore {
  fn contains(&self, key: &str) -> Result<bool, CacheError> {
    Ok(self.entries()?.contains_key(key))
  }

  fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
    Ok(self.entries()?.get(key).cloned())
  }

  fn store(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
    self
      .entries()?
      .entry(key.to_string())
      .or_insert_with(|| bytes.to_vec());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<bool, CacheError> {
    Ok(self.entries()?.remove(key).is_some())
  }
}
