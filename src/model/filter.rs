// 该文件是 Subfig （子图分割） 项目的一部分。
// src/model/filter.rs - 阈值过滤与像素坐标转换
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

use crate::model::{CandidateBox, PixelBox};

/// 保留最佳类别概率高于阈值的候选框，并转换为裁剪到图像范围内的像素矩形
pub fn to_pixel_boxes(
  boxes: &[CandidateBox],
  threshold: f32,
  width: u32,
  height: u32,
) -> Vec<PixelBox> {
  boxes
    .iter()
    .filter_map(|candidate| {
      let (_, prob) = candidate.best_class()?;
      (prob > threshold).then(|| to_pixel_box(candidate, prob, width, height))
    })
    .collect()
}

fn to_pixel_box(candidate: &CandidateBox, confidence: f32, width: u32, height: u32) -> PixelBox {
  let (left, right) = edges(candidate.x, candidate.w, width);
  let (top, bottom) = edges(candidate.y, candidate.h, height);

  PixelBox {
    left,
    top,
    width: right.saturating_sub(left),
    height: bottom.saturating_sub(top),
    confidence,
  }
}

/// 中心 ± 半宽，乘以图像尺寸后四舍五入（偶数舍入），再限制在 [0, dimension - 1]
fn edges(center: f32, extent: f32, dimension: u32) -> (u32, u32) {
  let max = f64::from(dimension.saturating_sub(1));
  let scale = f64::from(dimension);
  let center = f64::from(center);
  let half = f64::from(extent) / 2.0;

  let clamp = |value: f64| value.round_ties_even().clamp(0.0, max) as u32;
  (clamp((center - half) * scale), clamp((center + half) * scale))
}
