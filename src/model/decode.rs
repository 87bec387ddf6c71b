// 该文件是 Subfig （子图分割） 项目的一部分。
// src/model/decode.rs - 网格/锚框输出解码
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
use tracing::error;

use crate::config::DetectionGrid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
  #[error("输出张量长度不匹配: 期望 {expected}, 实际 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("输出张量在索引 {index} 处包含非有限值")]
  NonFinite { index: usize },
}

impl DecodeError {
  /// 长度不匹配说明配置与模型不符，无法安全解释张量，必须中止运行
  pub fn is_fatal(&self) -> bool {
    matches!(self, DecodeError::LengthMismatch { .. })
  }
}

/// 归一化坐标下的候选框，仅在一次解码中存在
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateBox {
  /// 中心 x，相对图像宽度
  pub x: f32,
  /// 中心 y，相对图像高度
  pub y: f32,
  pub w: f32,
  pub h: f32,
  /// 目标置信度
  pub confidence: f32,
  /// 每个类别的概率，低于阈值的已置零
  pub probs: Vec<f32>,
}

impl CandidateBox {
  /// 概率最大的类别；并列时取较小的类别索引
  pub fn best_class(&self) -> Option<(usize, f32)> {
    self
      .probs
      .iter()
      .copied()
      .enumerate()
      .fold(None, |best, (index, prob)| match best {
        Some((_, best_prob)) if best_prob >= prob => best,
        _ => Some((index, prob)),
      })
  }
}

/// 将一张图像的原始输出解码为全部 H·W·B 个候选框（抑制之前）。
///
/// 张量按 `[row][col][anchor][5 + C]` 排列，前 5 个值依次为
/// 中心偏移 x、y，宽高对数 w、h 与目标置信度 logit。
pub fn decode(raw: &[f32], grid: &DetectionGrid) -> Result<Vec<CandidateBox>, DecodeError> {
  let expected = grid.tensor_len();
  if raw.len() != expected {
    error!("输出张量长度不匹配: 期望 {}, 实际 {}", expected, raw.len());
    return Err(DecodeError::LengthMismatch {
      expected,
      actual: raw.len(),
    });
  }

  if let Some(index) = raw.iter().position(|value| !value.is_finite()) {
    return Err(DecodeError::NonFinite { index });
  }

  let grid_w = grid.grid_width as f32;
  let grid_h = grid.grid_height as f32;
  let stride = grid.values_per_anchor();
  let threshold = grid.confidence_threshold;

  let mut boxes = Vec::with_capacity(grid.num_candidates());
  let mut cells = raw.chunks_exact(stride);

  for row in 0..grid.grid_height {
    for col in 0..grid.grid_width {
      for b in 0..grid.num_anchors {
        let Some(cell) = cells.next() else {
          break;
        };
        let (anchor_w, anchor_h) = grid.anchor(b);

        let confidence = sigmoid(cell[4]);
        let mut probs = softmax(&cell[5..]);
        for prob in probs.iter_mut() {
          *prob *= confidence;
          if *prob <= threshold {
            *prob = 0.0;
          }
        }

        boxes.push(CandidateBox {
          x: (col as f32 + sigmoid(cell[0])) / grid_w,
          y: (row as f32 + sigmoid(cell[1])) / grid_h,
          w: cell[2].exp() * anchor_w / grid_w,
          h: cell[3].exp() * anchor_h / grid_h,
          confidence,
          probs,
        });
      }
    }
  }

  Ok(boxes)
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

fn softmax(logits: &[f32]) -> Vec<f32> {
  let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exps: Vec<f32> = logits.iter().map(|logit| (logit - max).exp()).collect();
  let sum: f32 = exps.iter().sum();
  exps.into_iter().map(|e| e / sum).collect()
}
