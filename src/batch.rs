// 该文件是 Subfig （子图分割） 项目的一部分。
// src/batch.rs - 批量检测
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

//! 预处理线程与检测线程之间通过容量为 1 的有界通道交接批次:
//! 检测器处理当前批次时，下一批次已在 rayon 线程池中预处理，
//! 而检测器本身同一时刻只有一次调用。

use std::path::PathBuf;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, bounded};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  cache::{CacheError, DetectionCache},
  config::DetectionGrid,
  frame::InputTensor,
  input::{ImagePreprocessor, InputError},
  model::{DecodeError, DecodeResult, Detector, decode_image},
};

const HANDOFF_CAPACITY: usize = 1;

#[derive(Error, Debug)]
pub enum BatchError {
  #[error("检测器调用失败: {0}")]
  Detector(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("检测器返回 {actual} 个输出, 期望 {expected} 个")]
  OutputCount { expected: usize, actual: usize },
  #[error("配置与模型不匹配: {0}")]
  ConfigurationMismatch(#[source] DecodeError),
  #[error("缓存错误: {0}")]
  Cache(#[from] CacheError),
  #[error("预处理线程异常退出")]
  ProducerPanicked,
}

/// 有界累积队列: 达到容量或输入结束时整批取出
#[derive(Debug)]
pub struct BatchQueue<T> {
  capacity: usize,
  pending: Vec<T>,
}

impl<T> BatchQueue<T> {
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      capacity,
      pending: Vec::with_capacity(capacity),
    }
  }

  /// 加入一项；队列满时返回整批
  pub fn push(&mut self, item: T) -> Option<Vec<T>> {
    self.pending.push(item);
    if self.pending.len() >= self.capacity {
      Some(self.take())
    } else {
      None
    }
  }

  /// 输入结束，取出剩余项
  pub fn finish(&mut self) -> Option<Vec<T>> {
    if self.pending.is_empty() {
      None
    } else {
      Some(self.take())
    }
  }

  pub fn len(&self) -> usize {
    self.pending.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pending.is_empty()
  }

  fn take(&mut self) -> Vec<T> {
    std::mem::replace(&mut self.pending, Vec::with_capacity(self.capacity))
  }
}

/// 需要检测的源图像
#[derive(Debug, Clone, PartialEq)]
pub struct PendingImage {
  pub id: String,
  pub path: PathBuf,
}

/// 单张图像的检测结果
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
  Decoded(DecodeResult),
  Failed(DecodeError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemReport {
  pub id: String,
  pub path: PathBuf,
  pub outcome: ItemOutcome,
}

#[derive(Debug)]
pub struct UnavailableImage {
  pub id: String,
  pub error: InputError,
}

#[derive(Debug, Default)]
pub struct BatchReport {
  /// 按输入顺序排列的检测结果
  pub items: Vec<ItemReport>,
  pub unavailable: Vec<UnavailableImage>,
  pub detector_calls: usize,
}

impl BatchReport {
  pub fn decoded(&self) -> usize {
    self
      .items
      .iter()
      .filter(|item| matches!(item.outcome, ItemOutcome::Decoded(_)))
      .count()
  }

  pub fn failed(&self) -> usize {
    self.items.len() - self.decoded()
  }
}

struct ReadyImage {
  pending: PendingImage,
  tensor: InputTensor,
  width: u32,
  height: u32,
}

enum Handoff {
  Unavailable(UnavailableImage),
  Batch(Vec<ReadyImage>),
}

pub struct BatchRunner {
  grid: DetectionGrid,
  preprocessor: ImagePreprocessor,
  batch_size: usize,
}

impl BatchRunner {
  pub fn new(grid: DetectionGrid, preprocessor: ImagePreprocessor, batch_size: usize) -> Self {
    Self {
      grid,
      preprocessor,
      batch_size: batch_size.max(1),
    }
  }

  /// 检测全部待处理图像，并为每张可用图像写入一个缓存条目（失败时为空结果）
  pub fn run<D: Detector>(
    &self,
    detector: &mut D,
    cache: &DetectionCache,
    pending: Vec<PendingImage>,
  ) -> Result<BatchReport, BatchError> {
    if pending.is_empty() {
      debug!("没有需要检测的图像");
      return Ok(BatchReport::default());
    }

    info!(
      "开始批量检测: {} 张图像, 批大小 {}",
      pending.len(),
      self.batch_size
    );
    let (tx, rx) = bounded::<Handoff>(HANDOFF_CAPACITY);

    std::thread::scope(|scope| {
      let producer = scope.spawn(move || self.produce(pending, tx));
      let consumed = self.consume(detector, cache, rx);
      producer.join().map_err(|_| BatchError::ProducerPanicked)?;
      consumed
    })
  }

  fn produce(&self, pending: Vec<PendingImage>, tx: Sender<Handoff>) {
    let mut queue = BatchQueue::new(self.batch_size);

    for chunk in pending.chunks(self.batch_size) {
      let loaded: Vec<_> = chunk
        .par_iter()
        .map(|item| (item, self.preprocessor.load(&item.path)))
        .collect();

      for (item, result) in loaded {
        let handoff = match result {
          Ok(prepared) => {
            let (width, height) = prepared.original_dimensions();
            let ready = ReadyImage {
              pending: item.clone(),
              tensor: prepared.tensor,
              width,
              height,
            };
            match queue.push(ready) {
              Some(batch) => Handoff::Batch(batch),
              None => continue,
            }
          }
          Err(error) => Handoff::Unavailable(UnavailableImage {
            id: item.id.clone(),
            error,
          }),
        };

        if tx.send(handoff).is_err() {
          debug!("检测线程已退出, 停止预处理");
          return;
        }
      }
    }

    if let Some(batch) = queue.finish()
      && tx.send(Handoff::Batch(batch)).is_err()
    {
      debug!("检测线程已退出, 丢弃最后一批");
    }
  }

  fn consume<D: Detector>(
    &self,
    detector: &mut D,
    cache: &DetectionCache,
    rx: Receiver<Handoff>,
  ) -> Result<BatchReport, BatchError> {
    let mut report = BatchReport::default();

    for handoff in rx {
      match handoff {
        Handoff::Unavailable(unavailable) => {
          warn!("跳过不可用图像 {}: {}", unavailable.id, unavailable.error);
          report.unavailable.push(unavailable);
        }
        Handoff::Batch(batch) => {
          let items = self.run_batch(detector, cache, batch)?;
          report.detector_calls += 1;
          report.items.extend(items);
        }
      }
    }

    Ok(report)
  }

  fn run_batch<D: Detector>(
    &self,
    detector: &mut D,
    cache: &DetectionCache,
    batch: Vec<ReadyImage>,
  ) -> Result<Vec<ItemReport>, BatchError> {
    let (images, tensors): (Vec<_>, Vec<_>) = batch
      .into_iter()
      .map(|ready| ((ready.pending, ready.width, ready.height), ready.tensor))
      .unzip();

    debug!("执行批次推理: {} 张图像", tensors.len());
    let now = Instant::now();
    let outputs = detector
      .detect_batch(&tensors)
      .map_err(|e| BatchError::Detector(Box::new(e)))?;
    debug!("推理完成，耗时: {:.2?}", now.elapsed());

    if outputs.len() != images.len() {
      error!(
        "检测器返回 {} 个输出, 期望 {} 个",
        outputs.len(),
        images.len()
      );
      return Err(BatchError::OutputCount {
        expected: images.len(),
        actual: outputs.len(),
      });
    }

    let outcomes: Vec<ItemOutcome> = outputs
      .par_iter()
      .zip(images.par_iter())
      .map(
        |(raw, (_, width, height))| match decode_image(raw, &self.grid, *width, *height) {
          Ok(result) => ItemOutcome::Decoded(result),
          Err(e) => ItemOutcome::Failed(e),
        },
      )
      .collect();

    if let Some(fatal) = outcomes.iter().find_map(|outcome| match outcome {
      ItemOutcome::Failed(e) if e.is_fatal() => Some(e.clone()),
      _ => None,
    }) {
      return Err(BatchError::ConfigurationMismatch(fatal));
    }

    let empty = DecodeResult::empty();
    let mut items = Vec::with_capacity(images.len());
    for ((pending, _, _), outcome) in images.into_iter().zip(outcomes) {
      let entry = match &outcome {
        ItemOutcome::Decoded(result) => result,
        ItemOutcome::Failed(e) => {
          warn!("图像 {} 解码失败, 记录为无检测: {}", pending.id, e);
          &empty
        }
      };
      cache.put(&pending.id, entry)?;

      items.push(ItemReport {
        id: pending.id,
        path: pending.path,
        outcome,
      });
    }

    Ok(items)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    cache::MemoryCacheStore,
    config::PreprocessConfig,
    frame::{ChannelOrder, TensorLayout},
    model::RawOutput,
  };
  use image::{Rgb, RgbImage};
  use std::convert::Infallible;
  use std::path::Path;

  fn tiny_grid() -> DetectionGrid {
    DetectionGrid {
      grid_height: 1,
      grid_width: 1,
      num_anchors: 1,
      anchors: vec![0.5, 0.5],
      num_classes: 1,
      confidence_threshold: 0.5,
      nms_threshold: 0.4,
    }
  }

  fn runner(batch_size: usize) -> BatchRunner {
    let preprocessor = ImagePreprocessor::new(PreprocessConfig {
      input_width: 4,
      input_height: 4,
      channel_order: ChannelOrder::Rgb,
      layout: TensorLayout::Nhwc,
    });
    BatchRunner::new(tiny_grid(), preprocessor, batch_size)
  }

  /// 白色图像产生非有限输出，其余图像产生一个居中的框
  struct ColorDetector {
    calls: Vec<usize>,
    output_len: usize,
  }

  impl ColorDetector {
    fn new(output_len: usize) -> Self {
      Self {
        calls: Vec::new(),
        output_len,
      }
    }
  }

  impl Detector for ColorDetector {
    type Error = Infallible;

    fn detect_batch(&mut self, batch: &[InputTensor]) -> Result<Vec<RawOutput>, Self::Error> {
      self.calls.push(batch.len());
      Ok(
        batch
          .iter()
          .map(|tensor| {
            let mut raw = vec![0.0; self.output_len];
            if tensor.get(0, 0, 0) > 0.9 {
              raw[0] = f32::NAN;
            } else if raw.len() > 4 {
              raw[4] = 10.0;
            }
            raw
          })
          .collect(),
      )
    }
  }

  fn write_image(dir: &Path, name: &str, value: u8) -> PendingImage {
    let path = dir.join(name);
    RgbImage::from_pixel(40, 30, Rgb([value, value, value]))
      .save(&path)
      .unwrap();
    PendingImage {
      id: crate::input::image_id(name),
      path,
    }
  }

  #[test]
  fn queue_flushes_on_threshold_and_end() {
    let mut queue = BatchQueue::new(2);
    assert_eq!(queue.push(1), None);
    assert_eq!(queue.push(2), Some(vec![1, 2]));
    assert!(queue.is_empty());
    assert_eq!(queue.push(3), None);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.finish(), Some(vec![3]));
    assert_eq!(queue.finish(), None);
  }

  #[test]
  fn one_detector_call_per_batch_in_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let pending: Vec<_> = (0..5)
      .map(|i| write_image(dir.path(), &format!("fig{i}.png"), 10))
      .collect();
    let cache = DetectionCache::new(MemoryCacheStore::default());
    let mut detector = ColorDetector::new(tiny_grid().tensor_len());

    let report = runner(2).run(&mut detector, &cache, pending).unwrap();
    assert_eq!(detector.calls, vec![2, 2, 1]);
    assert_eq!(report.detector_calls, 3);
    let ids: Vec<_> = report.items.iter().map(|item| item.id.as_str()).collect();
    assert_eq!(ids, ["fig0", "fig1", "fig2", "fig3", "fig4"]);
    assert_eq!(report.decoded(), 5);

    // 40x30 图像上的居中框: top = 7.5 -> 8, bottom = 22.5 -> 22
    let entry = cache.get("fig3").unwrap().unwrap();
    assert_eq!(entry.len(), 1);
    let pixel_box = entry.boxes()[0];
    assert_eq!((pixel_box.left, pixel_box.top), (10, 8));
    assert_eq!((pixel_box.width, pixel_box.height), (20, 14));
  }

  #[test]
  fn decode_failure_is_isolated_and_cached_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let pending = vec![
      write_image(dir.path(), "a.png", 10),
      write_image(dir.path(), "b.png", 255),
      write_image(dir.path(), "c.png", 10),
    ];
    let cache = DetectionCache::new(MemoryCacheStore::default());
    let mut detector = ColorDetector::new(tiny_grid().tensor_len());

    let report = runner(8).run(&mut detector, &cache, pending).unwrap();
    assert_eq!(report.detector_calls, 1);
    assert_eq!(report.decoded(), 2);
    assert_eq!(report.failed(), 1);
    assert!(matches!(
      report.items[1].outcome,
      ItemOutcome::Failed(DecodeError::NonFinite { .. })
    ));
    assert_eq!(cache.get("b").unwrap(), Some(DecodeResult::empty()));
    assert_eq!(cache.get("c").unwrap().unwrap().len(), 1);
  }

  #[test]
  fn unavailable_images_are_reported_without_cache_entry() {
    let dir = tempfile::tempdir().unwrap();
    let empty_path = dir.path().join("empty.png");
    std::fs::write(&empty_path, b"").unwrap();
    let pending = vec![
      PendingImage {
        id: "empty".to_string(),
        path: empty_path,
      },
      write_image(dir.path(), "ok.png", 10),
    ];
    let cache = DetectionCache::new(MemoryCacheStore::default());
    let mut detector = ColorDetector::new(tiny_grid().tensor_len());

    let report = runner(8).run(&mut detector, &cache, pending).unwrap();
    assert_eq!(report.unavailable.len(), 1);
    assert_eq!(report.unavailable[0].id, "empty");
    assert_eq!(detector.calls, vec![1]);
    assert!(!cache.contains("empty").unwrap());
    assert!(cache.contains("ok").unwrap());
  }

  #[test]
  fn tensor_length_mismatch_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let pending = vec![write_image(dir.path(), "a.png", 10)];
    let cache = DetectionCache::new(MemoryCacheStore::default());
    let mut detector = ColorDetector::new(tiny_grid().tensor_len() + 1);

    let err = runner(8).run(&mut detector, &cache, pending).unwrap_err();
    assert!(matches!(err, BatchError::ConfigurationMismatch(_)));
    assert!(!cache.contains("a").unwrap());
  }

  #[test]
  fn wrong_output_count_aborts() {
    struct Silent;
    impl Detector for Silent {
      type Error = Infallible;
      fn detect_batch(&mut self, _: &[InputTensor]) -> Result<Vec<RawOutput>, Self::Error> {
        Ok(Vec::new())
      }
    }

    let dir = tempfile::tempdir().unwrap();
    let pending = vec![write_image(dir.path(), "a.png", 10)];
    let cache = DetectionCache::new(MemoryCacheStore::default());
    let err = runner(8).run(&mut Silent, &cache, pending).unwrap_err();
    assert!(matches!(
      err,
      BatchError::OutputCount {
        expected: 1,
        actual: 0
      }
    ));
  }
}
