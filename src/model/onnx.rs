// 该文件是 Subfig （子图分割） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 检测器
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

use ndarray::Array4;
use ort::{session::Session, value::TensorRef};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{InputTensor, TensorLayout},
  model::{Detector, RawOutput},
};

#[derive(Error, Debug)]
pub enum OnnxDetectorError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("输入张量形状错误: {0}")]
  ShapeError(#[from] ndarray::ShapeError),
  #[error("批内张量形状不一致: 第 {index} 个张量长度 {actual}, 期望 {expected}")]
  InconsistentBatch {
    index: usize,
    expected: usize,
    actual: usize,
  },
  #[error("模型输出长度 {len} 无法按批大小 {batch} 均分")]
  OutputShape { len: usize, batch: usize },
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

impl From<std::io::Error> for OnnxDetectorError {
  fn from(err: std::io::Error) -> Self {
    OnnxDetectorError::ModelLoadError(err)
  }
}

/// 基于 ONNX Runtime 的批量检测器，输入为单个 float32 张量
pub struct OnnxDetector {
  session: Session,
}

pub struct OnnxDetectorBuilder {
  model_path: String,
  intra_threads: Option<usize>,
}

impl FromUrlWithScheme for OnnxDetectorBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxDetectorBuilder {
  type Error = OnnxDetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxDetectorError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let model_path = crate::decode_url_path(url)
      .map_err(|e| OnnxDetectorError::ModelPathError(e.to_string()))?;
    Ok(OnnxDetectorBuilder {
      model_path: model_path.to_string_lossy().into_owned(),
      intra_threads: None,
    })
  }
}

impl OnnxDetectorBuilder {
  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = Some(threads);
    self
  }

  pub fn build(self) -> Result<OnnxDetector, OnnxDetectorError> {
    info!("加载模型文件: {}", self.model_path);
    let metadata = std::fs::metadata(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      metadata.len() as f64 / (1024.0 * 1024.0)
    );

    let mut builder = Session::builder()?;
    if let Some(threads) = self.intra_threads {
      builder = builder.with_intra_threads(threads)?;
    }
    let session = builder.commit_from_file(&self.model_path)?;
    info!("模型加载完成");

    debug!("模型输入数量: {}", session.inputs.len());
    debug!("模型输出数量: {}", session.outputs.len());

    Ok(OnnxDetector { session })
  }
}

impl Detector for OnnxDetector {
  type Error = OnnxDetectorError;

  fn detect_batch(&mut self, batch: &[InputTensor]) -> Result<Vec<RawOutput>, Self::Error> {
    let Some(first) = batch.first() else {
      return Ok(Vec::new());
    };

    let n = batch.len();
    let (w, h, c) = (
      first.width() as usize,
      first.height() as usize,
      first.channels(),
    );
    let shape = match first.layout() {
      TensorLayout::Nhwc => [n, h, w, c],
      TensorLayout::Nchw => [n, c, h, w],
    };

    let mut data = Vec::with_capacity(n * first.len());
    for (index, tensor) in batch.iter().enumerate() {
      if tensor.len() != first.len() || tensor.layout() != first.layout() {
        return Err(OnnxDetectorError::InconsistentBatch {
          index,
          expected: first.len(),
          actual: tensor.len(),
        });
      }
      data.extend_from_slice(tensor.as_slice());
    }

    debug!("执行模型推理, 批大小 {}", n);
    let input = Array4::from_shape_vec(shape, data)?;
    let outputs = self
      .session
      .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

    let (_, values) = outputs[0].try_extract_tensor::<f32>()?;
    if values.is_empty() || values.len() % n != 0 {
      error!("模型输出长度 {} 无法按批大小 {} 均分", values.len(), n);
      return Err(OnnxDetectorError::OutputShape {
        len: values.len(),
        batch: n,
      });
    }

    Ok(
      values
        .chunks(values.len() / n)
        .map(<[f32]>::to_vec)
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn model_url_path_is_decoded() {
    let url = Url::parse("onnx:///models/figure%20separator.onnx").unwrap();
    let builder = OnnxDetectorBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, "/models/figure separator.onnx");

    let url = Url::parse("file:///models/figure_separator.onnx").unwrap();
    assert!(matches!(
      OnnxDetectorBuilder::from_url(&url),
      Err(OnnxDetectorError::ModelPathError(_))
    ));
  }
}
