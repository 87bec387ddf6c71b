// 该文件是 Subfig （子图分割） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use tracing::debug;

use crate::model::CandidateBox;

/// 两个区间 [x1 - w1/2, x1 + w1/2] 与 [x2 - w2/2, x2 + w2/2] 的重叠长度，可为负
fn overlap(x1: f32, w1: f32, x2: f32, w2: f32) -> f32 {
  let left = (x1 - w1 / 2.0).max(x2 - w2 / 2.0);
  let right = (x1 + w1 / 2.0).min(x2 + w2 / 2.0);
  right - left
}

fn intersection(a: &CandidateBox, b: &CandidateBox) -> f32 {
  let w = overlap(a.x, a.w, b.x, b.w);
  let h = overlap(a.y, a.h, b.y, b.h);
  if w < 0.0 || h < 0.0 {
    return 0.0;
  }
  w * h
}

/// 计算两个中心/尺寸框的 IoU；并集不为正时返回 0
pub fn iou(a: &CandidateBox, b: &CandidateBox) -> f32 {
  let inter = intersection(a, b);
  let union = a.w * a.h + b.w * b.h - inter;
  if union > 0.0 { inter / union } else { 0.0 }
}

/// 逐类别的贪心非极大值抑制，原地将被抑制框在该类别上的概率置零。
///
/// 每个类别按概率降序遍历，概率相同的框保持解码顺序，结果可复现。
pub fn suppress(boxes: &mut [CandidateBox], nms_threshold: f32) {
  let num_classes = boxes.first().map(|b| b.probs.len()).unwrap_or(0);
  let mut suppressed = 0usize;

  for class in 0..num_classes {
    let mut order: Vec<usize> = (0..boxes.len()).collect();
    // sort_by 是稳定排序
    order.sort_by(|&i, &j| boxes[j].probs[class].total_cmp(&boxes[i].probs[class]));

    for (rank, &i) in order.iter().enumerate() {
      if boxes[i].probs[class] == 0.0 {
        continue;
      }
      for &j in &order[rank + 1..] {
        if boxes[j].probs[class] == 0.0 {
          continue;
        }
        if iou(&boxes[i], &boxes[j]) >= nms_threshold {
          boxes[j].probs[class] = 0.0;
          suppressed += 1;
        }
      }
    }
  }

  debug!("非极大值抑制移除 {} 个候选框", suppressed);
}
