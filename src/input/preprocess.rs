// 该文件是 Subfig （子图分割） 项目的一部分。
// src/input/preprocess.rs - 图像预处理
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

use image::{DynamicImage, ImageReader, imageops::FilterType};
use tracing::debug;

use crate::{config::PreprocessConfig, frame::InputTensor, input::InputError};

/// 预处理结果: 检测器输入张量与原始分辨率图像
pub struct PreparedImage {
  pub tensor: InputTensor,
  pub original: DynamicImage,
}

impl PreparedImage {
  pub fn original_dimensions(&self) -> (u32, u32) {
    (self.original.width(), self.original.height())
  }
}

#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
  config: PreprocessConfig,
}

impl ImagePreprocessor {
  pub fn new(config: PreprocessConfig) -> Self {
    Self { config }
  }

  /// 仅检查文件元数据，缺失或长度为 0 的文件视为不可用
  pub fn check_available(path: &Path) -> Result<u64, InputError> {
    let metadata = match std::fs::metadata(path) {
      Ok(metadata) => metadata,
      Err(e) if e.kind() == ErrorKind::NotFound => {
        return Err(InputError::Missing(path.to_path_buf()));
      }
      Err(source) => {
        return Err(InputError::Io {
          path: path.to_path_buf(),
          source,
        });
      }
    };

    if metadata.len() == 0 {
      return Err(InputError::Empty(path.to_path_buf()));
    }
    Ok(metadata.len())
  }

  pub fn load(&self, path: &Path) -> Result<PreparedImage, InputError> {
    let size = Self::check_available(path)?;
    debug!("读取图像文件: {} ({} 字节)", path.display(), size);

    let image = ImageReader::open(path)
      .and_then(|reader| reader.with_guessed_format())
      .map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
      })?
      .decode()
      .map_err(|source| InputError::Decode {
        path: path.to_path_buf(),
        source,
      })?;

    let tensor = self.prepare(&image);
    Ok(PreparedImage {
      tensor,
      original: image,
    })
  }

  /// 缩放到检测器输入尺寸（不保持宽高比）并归一化
  pub fn prepare(&self, image: &DynamicImage) -> InputTensor {
    let rgb = image.to_rgb8();
    let resized = image::imageops::resize(
      &rgb,
      self.config.input_width,
      self.config.input_height,
      FilterType::Triangle,
    );
    InputTensor::from_rgb_image(&resized, self.config.channel_order, self.config.layout)
  }
}
