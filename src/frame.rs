// 该文件是 Subfig （子图分割） 项目的一部分。
// src/frame.rs - 检测器输入张量定义
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

use image::RgbImage;
use serde::{Deserialize, Serialize};

const RGB_CHANNELS: usize = 3;

/// 检测器期望的通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

impl ChannelOrder {
  /// 目标通道 c 对应的 RGB 源通道
  fn source_channel(self, c: usize) -> usize {
    match self {
      ChannelOrder::Rgb => c,
      ChannelOrder::Bgr => RGB_CHANNELS - 1 - c,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
  #[default]
  Nhwc,
  Nchw,
}

/// 单张图像的归一化输入张量，数值位于 [0, 1]
#[derive(Debug, Clone)]
pub struct InputTensor {
  width: u32,
  height: u32,
  layout: TensorLayout,
  data: Box<[f32]>,
}

impl InputTensor {
  pub fn with_shape(width: u32, height: u32, layout: TensorLayout) -> Self {
    let size = RGB_CHANNELS * (width as usize) * (height as usize);
    Self {
      width,
      height,
      layout,
      data: vec![0.0f32; size].into_boxed_slice(),
    }
  }

  /// 将已缩放的 RGB 图像转为张量，按 `order` 排列通道
  pub fn from_rgb_image(image: &RgbImage, order: ChannelOrder, layout: TensorLayout) -> Self {
    let (width, height) = image.dimensions();
    let mut tensor = Self::with_shape(width, height, layout);

    for (x, y, pixel) in image.enumerate_pixels() {
      for c in 0..RGB_CHANNELS {
        let value = f32::from(pixel[order.source_channel(c)]) / 255.0;
        let index = tensor.index(x as usize, y as usize, c);
        tensor.data[index] = value;
      }
    }
    tensor
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn layout(&self) -> TensorLayout {
    self.layout
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn get(&self, x: usize, y: usize, c: usize) -> f32 {
    self.data[self.index(x, y, c)]
  }

  fn index(&self, x: usize, y: usize, c: usize) -> usize {
    let width = self.width as usize;
    let height = self.height as usize;
    match self.layout {
      TensorLayout::Nhwc => (y * width + x) * RGB_CHANNELS + c,
      TensorLayout::Nchw => c * height * width + y * width + x,
    }
  }
}
