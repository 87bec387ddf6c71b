// 该文件是 Subfig （子图分割） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::frame::{ChannelOrder, TensorLayout};

const DEFAULT_GRID_SIZE: usize = 17;
const DEFAULT_NUM_CLASSES: usize = 1;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_NMS_THRESHOLD: f32 = 0.4;
const DEFAULT_INPUT_SIZE: u32 = 544;
const DEFAULT_BATCH_SIZE: usize = 64;
const DEFAULT_MIN_CROP_SIZE: u32 = 214;

/// 每个锚框的 (宽, 高) 先验值，以网格单元为单位
pub const DEFAULT_ANCHORS: [f32; 10] = [
  1.08, 1.19, 3.42, 4.41, 6.63, 11.38, 9.42, 5.11, 16.62, 10.52,
];

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("网格尺寸无效: {height}x{width}")]
  InvalidGrid { height: usize, width: usize },
  #[error("锚框先验数量不匹配: 期望 {expected} (2 x {num_anchors}), 实际 {actual}")]
  AnchorMismatch {
    num_anchors: usize,
    expected: usize,
    actual: usize,
  },
  #[error("锚框先验值必须为正的有限数, 索引 {0}")]
  InvalidAnchor(usize),
  #[error("类别数量必须大于 0")]
  NoClasses,
  #[error("{name} 必须位于 [0, 1] 区间, 实际为 {value}")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
  #[error("检测器输入尺寸无效: {width}x{height}")]
  InvalidInputSize { width: u32, height: u32 },
  #[error("批大小必须大于 0")]
  ZeroBatchSize,
  #[error("读取配置文件错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("解析配置文件错误: {0}")]
  Parse(#[from] serde_json::Error),
}

/// 检测网格的几何与阈值配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionGrid {
  pub grid_height: usize,
  pub grid_width: usize,
  pub num_anchors: usize,
  /// 长度为 2 x num_anchors，依次为每个锚框的宽和高
  pub anchors: Vec<f32>,
  pub num_classes: usize,
  pub confidence_threshold: f32,
  pub nms_threshold: f32,
}

impl Default for DetectionGrid {
  fn default() -> Self {
    Self {
      grid_height: DEFAULT_GRID_SIZE,
      grid_width: DEFAULT_GRID_SIZE,
      num_anchors: DEFAULT_ANCHORS.len() / 2,
      anchors: DEFAULT_ANCHORS.to_vec(),
      num_classes: DEFAULT_NUM_CLASSES,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
    }
  }
}

impl DetectionGrid {
  /// 每个锚框占用的数值个数: x, y, w, h, 目标置信度以及 C 个类别 logit
  pub fn values_per_anchor(&self) -> usize {
    5 + self.num_classes
  }

  pub fn num_candidates(&self) -> usize {
    self.grid_height * self.grid_width * self.num_anchors
  }

  /// 检测器单张图像输出的期望长度 H·W·B·(5+C)
  pub fn tensor_len(&self) -> usize {
    self.num_candidates() * self.values_per_anchor()
  }

  pub fn anchor(&self, index: usize) -> (f32, f32) {
    (self.anchors[2 * index], self.anchors[2 * index + 1])
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.grid_height == 0 || self.grid_width == 0 {
      return Err(ConfigError::InvalidGrid {
        height: self.grid_height,
        width: self.grid_width,
      });
    }

    let expected = 2 * self.num_anchors;
    if self.num_anchors == 0 || self.anchors.len() != expected {
      return Err(ConfigError::AnchorMismatch {
        num_anchors: self.num_anchors,
        expected,
        actual: self.anchors.len(),
      });
    }

    if let Some(index) = self
      .anchors
      .iter()
      .position(|prior| !prior.is_finite() || *prior <= 0.0)
    {
      return Err(ConfigError::InvalidAnchor(index));
    }

    if self.num_classes == 0 {
      return Err(ConfigError::NoClasses);
    }

    check_unit_range("confidence_threshold", self.confidence_threshold)?;
    check_unit_range("nms_threshold", self.nms_threshold)?;
    Ok(())
  }
}

fn check_unit_range(name: &'static str, value: f32) -> Result<(), ConfigError> {
  if (0.0..=1.0).contains(&value) {
    Ok(())
  } else {
    Err(ConfigError::ThresholdOutOfRange { name, value })
  }
}

/// 检测器输入张量的形状
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
  pub input_width: u32,
  pub input_height: u32,
  pub channel_order: ChannelOrder,
  pub layout: TensorLayout,
}

impl Default for PreprocessConfig {
  fn default() -> Self {
    Self {
      input_width: DEFAULT_INPUT_SIZE,
      input_height: DEFAULT_INPUT_SIZE,
      channel_order: ChannelOrder::default(),
      layout: TensorLayout::default(),
    }
  }
}

/// 子图裁剪的最小尺寸
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
  pub min_width: u32,
  pub min_height: u32,
}

impl Default for SplitConfig {
  fn default() -> Self {
    Self {
      min_width: DEFAULT_MIN_CROP_SIZE,
      min_height: DEFAULT_MIN_CROP_SIZE,
    }
  }
}

/// 整条流水线的不可变配置，启动时校验一次
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub grid: DetectionGrid,
  pub preprocess: PreprocessConfig,
  pub split: SplitConfig,
  pub batch: BatchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
  pub batch_size: usize,
}

impl Default for BatchConfig {
  fn default() -> Self {
    Self {
      batch_size: DEFAULT_BATCH_SIZE,
    }
  }
}

impl PipelineConfig {
  /// 从 JSON 文件读取配置，缺省字段取默认值
  pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
    debug!("读取配置文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let config = serde_json::from_str(&text)?;
    Ok(config)
  }

  pub fn grid_size(mut self, height: usize, width: usize) -> Self {
    self.grid.grid_height = height;
    self.grid.grid_width = width;
    self
  }

  pub fn anchors(mut self, anchors: Vec<f32>) -> Self {
    self.grid.num_anchors = anchors.len() / 2;
    self.grid.anchors = anchors;
    self
  }

  pub fn num_classes(mut self, num_classes: usize) -> Self {
    self.grid.num_classes = num_classes;
    self
  }

  pub fn confidence_threshold(mut self, threshold: f32) -> Self {
    self.grid.confidence_threshold = threshold;
    self
  }

  pub fn nms_threshold(mut self, threshold: f32) -> Self {
    self.grid.nms_threshold = threshold;
    self
  }

  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.preprocess.input_width = width;
    self.preprocess.input_height = height;
    self
  }

  pub fn channel_order(mut self, order: ChannelOrder) -> Self {
    self.preprocess.channel_order = order;
    self
  }

  pub fn layout(mut self, layout: TensorLayout) -> Self {
    self.preprocess.layout = layout;
    self
  }

  pub fn batch_size(mut self, batch_size: usize) -> Self {
    self.batch.batch_size = batch_size;
    self
  }

  pub fn min_crop_size(mut self, width: u32, height: u32) -> Self {
    self.split.min_width = width;
    self.split.min_height = height;
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    self.grid.validate()?;

    let PreprocessConfig {
      input_width,
      input_height,
      ..
    } = self.preprocess;
    if input_width == 0 || input_height == 0 {
      return Err(ConfigError::InvalidInputSize {
        width: input_width,
        height: input_height,
      });
    }

    if self.batch.batch_size == 0 {
      return Err(ConfigError::ZeroBatchSize);
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_matches_reference_tensor_length() {
    let config = PipelineConfig::default();
    config.validate().unwrap();
    assert_eq!(config.grid.tensor_len(), 17 * 17 * 5 * 6);
    assert_eq!(config.grid.anchor(4), (16.62, 10.52));
  }

  #[test]
  fn odd_anchor_list_is_rejected() {
    let config = PipelineConfig::default().anchors(vec![1.0, 2.0, 3.0]);
    assert!(matches!(
      config.validate(),
      Err(ConfigError::AnchorMismatch { actual: 3, .. })
    ));
  }

  #[test]
  fn non_positive_anchor_is_rejected() {
    let config = PipelineConfig::default().anchors(vec![1.0, 0.0]);
    assert!(matches!(config.validate(), Err(ConfigError::InvalidAnchor(1))));
  }

  #[test]
  fn thresholds_must_be_unit_range() {
    let config = PipelineConfig::default().nms_threshold(1.5);
    assert!(matches!(
      config.validate(),
      Err(ConfigError::ThresholdOutOfRange {
        name: "nms_threshold",
        ..
      })
    ));
  }

  #[test]
  fn zero_batch_size_is_rejected() {
    let config = PipelineConfig::default().batch_size(0);
    assert!(matches!(config.validate(), Err(ConfigError::ZeroBatchSize)));
  }

  #[test]
  fn partial_json_falls_back_to_defaults() {
    let config: PipelineConfig =
      serde_json::from_str(r#"{"batch": {"batch_size": 8}, "grid": {"nms_threshold": 0.3}}"#)
        .unwrap();
    assert_eq!(config.batch.batch_size, 8);
    assert_eq!(config.grid.nms_threshold, 0.3);
    assert_eq!(config.grid.grid_width, 17);
    assert_eq!(config.split.min_width, 214);
    assert_eq!(config.preprocess.channel_order, ChannelOrder::Rgb);
  }
}
