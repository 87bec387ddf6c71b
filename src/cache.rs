// 该文件是 Subfig （子图分割） 项目的一部分。
// src/cache.rs - 检测结果缓存
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

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, model::DecodeResult};

mod fs_store;
pub use self::fs_store::FsCacheStore;

mod memory_store;
pub use self::memory_store::MemoryCacheStore;

#[derive(Error, Debug)]
pub enum CacheError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("缓存条目 {key} 格式错误: {source}")]
  Corrupt {
    key: String,
    #[source]
    source: serde_json::Error,
  },
  #[error("序列化缓存条目错误: {0}")]
  Serialize(#[source] serde_json::Error),
  #[error("缓存存储锁已损坏")]
  Poisoned,
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("URI 路径无效: {0}")]
  InvalidPath(String),
}

/// 缓存的底层存储，按键保存字节内容
pub trait CacheStore: Send + Sync {
  fn contains(&self, key: &str) -> Result<bool, CacheError>;

  fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

  /// 原子地创建条目；已存在的条目保持不变
  fn store(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError>;

  /// 删除条目，返回条目此前是否存在
  fn remove(&self, key: &str) -> Result<bool, CacheError>;
}

/// 源图像标识 → 检测结果的记忆化缓存。
///
/// 条目只创建一次，之后不会被更新或自动失效；解码失败的图像同样会写入空结果，
/// 因此不会在后续运行中重试。需要重试时调用 [`DetectionCache::invalidate`]。
pub struct DetectionCache {
  store: Box<dyn CacheStore>,
}

impl DetectionCache {
  pub fn new<S: CacheStore + 'static>(store: S) -> Self {
    Self {
      store: Box::new(store),
    }
  }

  pub fn contains(&self, id: &str) -> Result<bool, CacheError> {
    self.store.contains(id)
  }

  pub fn get(&self, id: &str) -> Result<Option<DecodeResult>, CacheError> {
    let Some(bytes) = self.store.load(id)? else {
      return Ok(None);
    };

    let result = serde_json::from_slice(&bytes).map_err(|source| CacheError::Corrupt {
      key: id.to_string(),
      source,
    })?;
    Ok(Some(result))
  }

  pub fn put(&self, id: &str, result: &DecodeResult) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec(result).map_err(CacheError::Serialize)?;
    self.store.store(id, &bytes)?;
    debug!("写入缓存条目 {} ({} 个区域)", id, result.len());
    Ok(())
  }

  pub fn invalidate(&self, id: &str) -> Result<bool, CacheError> {
    let removed = self.store.remove(id)?;
    if removed {
      info!("已清除缓存条目: {}", id);
    }
    Ok(removed)
  }
}

impl FromUrl for DetectionCache {
  type Error = CacheError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      FsCacheStore::SCHEME => Ok(DetectionCache::new(FsCacheStore::from_url(url)?)),
      MemoryCacheStore::SCHEME => Ok(DetectionCache::new(MemoryCacheStore::from_url(url)?)),
      other => Err(CacheError::SchemeMismatch(other.to_string())),
    }
  }
}
