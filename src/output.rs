// 该文件是 Subfig （子图分割） 项目的一部分。
// src/output.rs - 输出定义
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

use std::io::ErrorKind;
use std::path::Path;

use crate::model::DecodeResult;

/// 将一张源图像的检测结果渲染为文件输出
pub trait Render {
  type Output;
  type Error;

  fn render_result(&self, source: &Path, result: &DecodeResult)
  -> Result<Self::Output, Self::Error>;
}

mod subfigure;
pub use self::subfigure::{SplitError, SplitKind, SplitOutput, SubfigureSplitter, WriteStatus};

mod record_set;
pub use self::record_set::{RecordError, RecordSet};

#[cfg(feature = "annotate")]
mod draw;
#[cfg(feature = "annotate")]
pub use self::draw::{AnnotateError, Annotator};

/// 写入同目录临时文件后以不覆盖的方式改名；目标已存在时视为复用
pub(crate) fn write_new<E, F>(dir: &Path, path: &Path, ext: &str, write: F) -> Result<WriteStatus, E>
where
  E: From<std::io::Error>,
  F: FnOnce(&Path) -> Result<(), E>,
{
  let tmp = tempfile::Builder::new()
    .prefix(".subfig")
    .suffix(ext)
    .tempfile_in(dir)?;
  write(tmp.path())?;

  match tmp.persist_noclobber(path) {
    Ok(_) => Ok(WriteStatus::Written),
    Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(WriteStatus::Reused),
    Err(e) => Err(e.error.into()),
  }
}
