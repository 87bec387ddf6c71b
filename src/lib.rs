// 该文件是 Subfig （子图分割） 项目的一部分。
// src/lib.rs - 库主文件
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

pub mod batch;
pub mod cache;
pub mod config;
pub mod frame;
pub mod input;
pub mod model;
pub mod output;
pub mod task;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// URL 中百分号编码的路径解码为本地路径，例如 `folder:///data/my%20cache`
pub(crate) fn decode_url_path(url: &url::Url) -> Result<std::path::PathBuf, std::string::FromUtf8Error> {
  urlencoding::decode(url.path()).map(|path| std::path::PathBuf::from(path.into_owned()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_paths_are_percent_decoded() {
    let url = url::Url::parse("folder:///data/my%20cache/%E5%9B%BE").unwrap();
    assert_eq!(
      decode_url_path(&url).unwrap(),
      std::path::PathBuf::from("/data/my cache/图")
    );
  }
}
