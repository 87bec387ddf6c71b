// 该文件是 Subfig （子图分割） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use image::{ImageFormat, Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use thiserror::Error;
use tracing::debug;

use crate::{
  model::{DecodeResult, PixelBox},
  output::{Render, WriteStatus, write_new},
};

const BOX_COLOR: [u8; 3] = [255, 0, 0]; // 红色
// 线宽 = (宽 + 高) / 300，至少 1 像素
const THICKNESS_DIVISOR: u32 = 300;

#[derive(Error, Debug)]
pub enum AnnotateError {
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("源图像文件名无效: {}", .0.display())]
  InvalidSource(PathBuf),
}

/// 将检测框绘制在原图副本上，写入预览目录（文件名与源图像相同）。
/// 只绘制边框，不标注置信度。
pub struct Annotator {
  output_dir: PathBuf,
}

impl Annotator {
  pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self, AnnotateError> {
    let output_dir = output_dir.as_ref().to_path_buf();
    std::fs::create_dir_all(&output_dir)?;
    Ok(Self { output_dir })
  }

  pub fn draw_boxes(&self, image: &mut RgbImage, result: &DecodeResult) {
    let thickness = ((image.width() + image.height()) / THICKNESS_DIVISOR).max(1);
    for pixel_box in result {
      self.draw_box(image, pixel_box, thickness);
    }
  }

  // 向内逐层绘制空心矩形以加粗边框
  fn draw_box(&self, image: &mut RgbImage, pixel_box: &PixelBox, thickness: u32) {
    for t in 0..thickness {
      let (Some(width), Some(height)) = (
        pixel_box.width.checked_sub(2 * t),
        pixel_box.height.checked_sub(2 * t),
      ) else {
        break;
      };
      if width == 0 || height == 0 {
        break;
      }

      let rect = Rect::at((pixel_box.left + t) as i32, (pixel_box.top + t) as i32)
        .of_size(width, height);
      draw_hollow_rect_mut(image, rect, Rgb(BOX_COLOR));
    }
  }
}

impl Render for Annotator {
  /// 没有检测框时不写预览；已存在的预览直接复用
  type Output = Option<PathBuf>;
  type Error = AnnotateError;

  fn render_result(&self, source: &Path, result: &DecodeResult) -> Result<Self::Output, Self::Error> {
    if result.is_empty() {
      return Ok(None);
    }
    let Some(filename) = source.file_name() else {
      return Err(AnnotateError::InvalidSource(source.to_path_buf()));
    };

    let path = self.output_dir.join(filename);
    if path.exists() {
      return Ok(Some(path));
    }

    let mut image = image::open(source)?.to_rgb8();
    self.draw_boxes(&mut image, result);

    let format = ImageFormat::from_path(source).unwrap_or(ImageFormat::Png);
    let ext = source
      .extension()
      .map(|ext| format!(".{}", ext.to_string_lossy()))
      .unwrap_or_default();
    let status = write_new::<AnnotateError, _>(&self.output_dir, &path, &ext, |tmp| {
      image.save_with_format(tmp, format)?;
      Ok(())
    })?;
    if status == WriteStatus::Written {
      debug!("写入预览图像: {}", path.display());
    }
    Ok(Some(path))
  }
}
