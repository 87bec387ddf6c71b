// 该文件是 Subfig （子图分割） 项目的一部分。
// src/output/subfigure.rs - 子图裁剪输出
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

use image::{DynamicImage, ImageFormat, ImageReader};
use thiserror::Error;
use tracing::debug;

use crate::{
  config::SplitConfig,
  model::{DecodeResult, PixelBox},
  output::{Render, write_new},
};

/// 少于该数量的检测框不进行裁剪，只输出整图
const MIN_BOXES_TO_SPLIT: usize = 2;

#[derive(Error, Debug)]
pub enum SplitError {
  #[error("读取源图像 {} 错误: {source}", path.display())]
  ImageError {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("源图像文件名无效: {}", .0.display())]
  InvalidSource(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitKind {
  Crop,
  Whole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
  Written,
  /// 目标文件已存在，直接复用
  Reused,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitOutput {
  pub path: PathBuf,
  pub kind: SplitKind,
  pub status: WriteStatus,
}

impl SplitOutput {
  pub fn filename(&self) -> String {
    self
      .path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default()
  }
}

/// 裁剪文件名: `<stem>_<left>x<top>_<right>x<bottom><ext>`，`ext` 含前导点
pub fn crop_name(stem: &str, ext: &str, pixel_box: &PixelBox) -> String {
  format!(
    "{}_{}x{}_{}x{}{}",
    stem,
    pixel_box.left,
    pixel_box.top,
    pixel_box.right(),
    pixel_box.bottom(),
    ext
  )
}

pub struct SubfigureSplitter {
  config: SplitConfig,
  output_dir: PathBuf,
}

impl SubfigureSplitter {
  pub fn new<P: AsRef<Path>>(config: SplitConfig, output_dir: P) -> Result<Self, SplitError> {
    let output_dir = output_dir.as_ref().to_path_buf();
    std::fs::create_dir_all(&output_dir)?;
    Ok(Self { config, output_dir })
  }

  fn is_large_enough(&self, pixel_box: &PixelBox) -> bool {
    pixel_box.width > 0
      && pixel_box.height > 0
      && pixel_box.width >= self.config.min_width
      && pixel_box.height >= self.config.min_height
  }

  /// 输出全部裁剪结果，最后附加整图。已存在的文件直接复用；
  /// 只有存在需要新写入的裁剪时才解码源图像。
  pub fn split(&self, source: &Path, result: &DecodeResult) -> Result<Vec<SplitOutput>, SplitError> {
    let (Some(stem), Some(filename)) = (source.file_stem(), source.file_name()) else {
      return Err(SplitError::InvalidSource(source.to_path_buf()));
    };
    let stem = stem.to_string_lossy();
    let ext = source
      .extension()
      .map(|ext| format!(".{}", ext.to_string_lossy()))
      .unwrap_or_default();

    let mut outputs = Vec::with_capacity(result.len() + 1);

    if result.len() >= MIN_BOXES_TO_SPLIT {
      let mut image: Option<DynamicImage> = None;
      let format = ImageFormat::from_path(source).unwrap_or(ImageFormat::Png);

      for pixel_box in result {
        if !self.is_large_enough(pixel_box) {
          debug!(
            "跳过过小的区域 {}x{} ({})",
            pixel_box.width, pixel_box.height, stem
          );
          continue;
        }

        let path = self.output_dir.join(crop_name(&stem, &ext, pixel_box));
        if path.exists() {
          outputs.push(SplitOutput {
            path,
            kind: SplitKind::Crop,
            status: WriteStatus::Reused,
          });
          continue;
        }

        if image.is_none() {
          image = Some(load_image(source)?);
        }
        let Some(image) = image.as_ref() else {
          continue;
        };
        let crop = image.crop_imm(
          pixel_box.left,
          pixel_box.top,
          pixel_box.width,
          pixel_box.height,
        );
        let status = write_new(&self.output_dir, &path, &ext, |tmp| {
          crop
            .save_with_format(tmp, format)
            .map_err(|source| SplitError::ImageError {
              path: path.clone(),
              source,
            })
        })?;
        outputs.push(SplitOutput {
          path,
          kind: SplitKind::Crop,
          status,
        });
      }
    }

    let path = self.output_dir.join(filename);
    let status = if path.exists() {
      WriteStatus::Reused
    } else {
      write_new::<SplitError, _>(&self.output_dir, &path, &ext, |tmp| {
        std::fs::copy(source, tmp)?;
        Ok(())
      })?
    };
    outputs.push(SplitOutput {
      path,
      kind: SplitKind::Whole,
      status,
    });

    Ok(outputs)
  }
}

impl Render for SubfigureSplitter {
  type Output = Vec<SplitOutput>;
  type Error = SplitError;

  fn render_result(&self, source: &Path, result: &DecodeResult) -> Result<Self::Output, Self::Error> {
    self.split(source, result)
  }
}

fn load_image(path: &Path) -> Result<DynamicImage, SplitError> {
  debug!("解码源图像用于裁剪: {}", path.display());
  ImageReader::open(path)?
    .with_guessed_format()?
    .decode()
    .map_err(|source| SplitError::ImageError {
      path: path.to_path_buf(),
      source,
    })
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  fn pixel_box(left: u32, top: u32, width: u32, height: u32) -> PixelBox {
    PixelBox {
      left,
      top,
      width,
      height,
      confidence: 0.9,
    }
  }

  fn source_image(dir: &Path) -> PathBuf {
    let path = dir.join("PMC1_fig1.png");
    RgbImage::from_fn(600, 300, |x, _| Rgb([(x % 256) as u8, 0, 0]))
      .save(&path)
      .unwrap();
    path
  }

  fn splitter(dir: &Path) -> SubfigureSplitter {
    SubfigureSplitter::new(SplitConfig::default(), dir.join("out")).unwrap()
  }

  #[test]
  fn crop_name_uses_edges() {
    assert_eq!(
      crop_name("PMC1_fig1", ".png", &pixel_box(10, 20, 250, 300)),
      "PMC1_fig1_10x20_260x320.png"
    );
  }

  #[test]
  fn single_box_yields_only_whole_image() {
    let dir = tempfile::tempdir().unwrap();
    let source = source_image(dir.path());
    let result = DecodeResult::from(vec![pixel_box(0, 0, 300, 300)]);

    let outputs = splitter(dir.path()).split(&source, &result).unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].kind, SplitKind::Whole);
    assert_eq!(outputs[0].filename(), "PMC1_fig1.png");
    assert_eq!(
      std::fs::read(&outputs[0].path).unwrap(),
      std::fs::read(&source).unwrap()
    );
  }

  #[test]
  fn crops_large_boxes_and_skips_small_ones() {
    let dir = tempfile::tempdir().unwrap();
    let source = source_image(dir.path());
    let result = DecodeResult::from(vec![
      pixel_box(0, 0, 280, 250),
      pixel_box(300, 10, 200, 250),
      pixel_box(300, 20, 290, 260),
    ]);

    let outputs = splitter(dir.path()).split(&source, &result).unwrap();
    let names: Vec<_> = outputs.iter().map(SplitOutput::filename).collect();
    assert_eq!(
      names,
      [
        "PMC1_fig1_0x0_280x250.png",
        "PMC1_fig1_300x20_590x280.png",
        "PMC1_fig1.png"
      ]
    );
    assert!(
      outputs
        .iter()
        .all(|output| output.status == WriteStatus::Written)
    );

    let crop = image::open(&outputs[1].path).unwrap();
    assert_eq!((crop.width(), crop.height()), (290, 260));
    assert_eq!(crop.to_rgb8().get_pixel(0, 0), &Rgb([(300 % 256) as u8, 0, 0]));
  }

  #[test]
  fn existing_files_are_reused() {
    let dir = tempfile::tempdir().unwrap();
    let source = source_image(dir.path());
    let result = DecodeResult::from(vec![pixel_box(0, 0, 280, 250), pixel_box(300, 0, 250, 250)]);
    let splitter = splitter(dir.path());

    let first = splitter.split(&source, &result).unwrap();
    // 源文件损坏后，所有输出都已存在，不需要再次解码
    std::fs::write(&source, b"broken").unwrap();
    let second = splitter.split(&source, &result).unwrap();

    assert_eq!(first.len(), 3);
    assert!(second.iter().all(|output| output.status == WriteStatus::Reused));
    let paths = |outputs: &[SplitOutput]| outputs.iter().map(|o| o.path.clone()).collect::<Vec<_>>();
    assert_eq!(paths(&first), paths(&second));
  }

  #[test]
  fn empty_result_still_copies_whole_image() {
    let dir = tempfile::tempdir().unwrap();
    let source = source_image(dir.path());
    let outputs = splitter(dir.path())
      .split(&source, &DecodeResult::empty())
      .unwrap();
    assert_eq!(outputs.len(), 1);
    assert!(dir.path().join("out").join("PMC1_fig1.png").is_file());
  }
}
