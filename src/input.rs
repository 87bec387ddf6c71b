// 该文件是 Subfig （子图分割） 项目的一部分。
// src/input.rs - 图像输入
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

use std::path::{Path, PathBuf};

use thiserror::Error;

mod preprocess;
pub use self::preprocess::{ImagePreprocessor, PreparedImage};

mod worklist;
pub use self::worklist::{WorkItem, Worklist, WorklistError};

/// 图像不可用的原因。预处理返回该错误时调用方应跳过图像并计数，而不是中止运行。
#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件不存在: {}", .0.display())]
  Missing(PathBuf),
  #[error("图像文件为空: {}", .0.display())]
  Empty(PathBuf),
  #[error("读取图像文件 {} 错误: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("解码图像文件 {} 错误: {source}", path.display())]
  Decode {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
}

impl InputError {
  pub fn path(&self) -> &Path {
    match self {
      InputError::Missing(path) | InputError::Empty(path) => path,
      InputError::Io { path, .. } | InputError::Decode { path, .. } => path,
    }
  }
}

/// 源图像标识: 去掉扩展名的文件名
pub fn image_id(filename: &str) -> String {
  Path::new(filename)
    .file_stem()
    .map(|stem| stem.to_string_lossy().into_owned())
    .unwrap_or_else(|| filename.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn image_id_strips_extension() {
    assert_eq!(image_id("PMC123_fig1.jpg"), "PMC123_fig1");
    assert_eq!(image_id("archive.tar.gz"), "archive.tar");
    assert_eq!(image_id("noext"), "noext");
  }
}
