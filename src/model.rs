// 该文件是 Subfig （子图分割） 项目的一部分。
// src/model.rs - 检测模型边界与检测结果
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

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{config::DetectionGrid, frame::InputTensor};

pub mod decode;
pub mod filter;
pub mod nms;

pub use self::decode::{CandidateBox, DecodeError};

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxDetector, OnnxDetectorBuilder, OnnxDetectorError};

/// 检测器对单张图像的原始输出，长度应为 H·W·B·(5+C)
pub type RawOutput = Vec<f32>;

/// 不透明的批量检测器。`&mut self` 保证同一时刻只有一次推理在进行。
pub trait Detector {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 输入 N 个张量，返回 N 个原始输出，顺序一致
  fn detect_batch(&mut self, batch: &[InputTensor]) -> Result<Vec<RawOutput>, Self::Error>;
}

impl<D: Detector + ?Sized> Detector for &mut D {
  type Error = D::Error;

  fn detect_batch(&mut self, batch: &[InputTensor]) -> Result<Vec<RawOutput>, Self::Error> {
    (**self).detect_batch(batch)
  }
}

/// 原图像素坐标下的矩形框
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelBox {
  #[serde(rename = "x")]
  pub left: u32,
  #[serde(rename = "y")]
  pub top: u32,
  #[serde(rename = "w")]
  pub width: u32,
  #[serde(rename = "h")]
  pub height: u32,
  #[serde(rename = "conf")]
  pub confidence: f32,
}

impl PixelBox {
  pub fn right(&self) -> u32 {
    self.left + self.width
  }

  pub fn bottom(&self) -> u32 {
    self.top + self.height
  }
}

/// 单张源图像的检测结果，即缓存条目的内容。空结果表示“无检测”。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecodeResult {
  boxes: Vec<PixelBox>,
}

impl DecodeResult {
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn boxes(&self) -> &[PixelBox] {
    &self.boxes
  }

  pub fn len(&self) -> usize {
    self.boxes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.boxes.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, PixelBox> {
    self.boxes.iter()
  }
}

impl From<Vec<PixelBox>> for DecodeResult {
  fn from(boxes: Vec<PixelBox>) -> Self {
    Self { boxes }
  }
}

impl<'a> IntoIterator for &'a DecodeResult {
  type Item = &'a PixelBox;
  type IntoIter = std::slice::Iter<'a, PixelBox>;

  fn into_iter(self) -> Self::IntoIter {
    self.boxes.iter()
  }
}

/// 单张图像的完整后处理: 解码、非极大值抑制、阈值过滤与像素化
pub fn decode_image(
  raw: &[f32],
  grid: &DetectionGrid,
  width: u32,
  height: u32,
) -> Result<DecodeResult, DecodeError> {
  let mut candidates = decode::decode(raw, grid)?;
  nms::suppress(&mut candidates, grid.nms_threshold);
  let boxes = filter::to_pixel_boxes(&candidates, grid.confidence_threshold, width, height);
  debug!("检测到 {} 个子图区域", boxes.len());
  Ok(DecodeResult::from(boxes))
}
