// 该文件是 Subfig （子图分割） 项目的一部分。
// src/task.rs - 两阶段分割任务
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

//! 阶段 (a) 检测未缓存的图像并写入缓存；阶段 (b) 仅从缓存读取检测结果，
//! 裁剪子图并生成记录表。两个阶段之间只通过缓存交互。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

#[cfg(feature = "annotate")]
use crate::output::{AnnotateError, Annotator};
use crate::{
  batch::{BatchError, BatchRunner, PendingImage},
  cache::{CacheError, DetectionCache},
  config::{ConfigError, PipelineConfig},
  input::{ImagePreprocessor, WorkItem, Worklist, WorklistError},
  model::Detector,
  output::{
    RecordError, RecordSet, Render, SplitError, SplitKind, SplitOutput, SubfigureSplitter,
    WriteStatus,
  },
};

pub const DEFAULT_SUBFIGURE_COLUMN: &str = "subfigure filename";

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("配置错误: {0}")]
  ConfigError(#[from] ConfigError),
  #[error("图像清单错误: {0}")]
  WorklistError(#[from] WorklistError),
  #[error("批量检测错误: {0}")]
  BatchError(#[from] BatchError),
  #[error("缓存错误: {0}")]
  CacheError(#[from] CacheError),
  #[error("子图输出错误: {0}")]
  SplitError(#[from] SplitError),
  #[error("记录输出错误: {0}")]
  RecordError(#[from] RecordError),
  #[cfg(feature = "annotate")]
  #[error("预览输出错误: {0}")]
  AnnotateError(#[from] AnnotateError),
}

/// 一次运行的计数汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
  /// 清单中不同源图像的数量
  pub images: usize,
  /// 缺失、为空或无法解码的图像
  pub skipped: usize,
  pub cache_hits: usize,
  pub decoded: usize,
  pub decode_failures: usize,
  pub detector_calls: usize,
  pub crops_written: usize,
  pub crops_reused: usize,
  pub whole_copied: usize,
  pub previews: usize,
  pub records: usize,
}

impl PipelineSummary {
  pub fn log(&self) {
    info!(
      "图像 {} 张: 跳过 {}, 命中缓存 {}, 新检测 {}, 解码失败 {}, 检测器调用 {} 次",
      self.images,
      self.skipped,
      self.cache_hits,
      self.decoded,
      self.decode_failures,
      self.detector_calls
    );
    info!(
      "子图: 新写入 {}, 复用 {}, 复制整图 {}, 预览 {}, 记录 {} 行",
      self.crops_written, self.crops_reused, self.whole_copied, self.previews, self.records
    );
  }
}

#[derive(Debug)]
pub struct PipelineOutput {
  pub records: RecordSet,
  pub summary: PipelineSummary,
}

pub struct Pipeline {
  config: PipelineConfig,
  figure_dir: PathBuf,
  cache: DetectionCache,
  subfigure_column: String,
  #[cfg(feature = "annotate")]
  annotator: Option<Annotator>,
}

impl Pipeline {
  /// 配置在此处校验一次
  pub fn new<P: AsRef<Path>>(
    config: PipelineConfig,
    figure_dir: P,
    cache: DetectionCache,
  ) -> Result<Self, TaskError> {
    config.validate()?;
    Ok(Self {
      config,
      figure_dir: figure_dir.as_ref().to_path_buf(),
      cache,
      subfigure_column: DEFAULT_SUBFIGURE_COLUMN.to_string(),
      #[cfg(feature = "annotate")]
      annotator: None,
    })
  }

  pub fn with_subfigure_column(mut self, column: impl Into<String>) -> Self {
    self.subfigure_column = column.into();
    self
  }

  #[cfg(feature = "annotate")]
  pub fn with_annotator(mut self, annotator: Annotator) -> Self {
    self.annotator = Some(annotator);
    self
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn cache(&self) -> &DetectionCache {
    &self.cache
  }

  fn source_path(&self, item: &WorkItem) -> PathBuf {
    self.figure_dir.join(item.filename())
  }

  pub fn run<D: Detector>(
    &self,
    worklist: &Worklist,
    detector: &mut D,
    splitter: &SubfigureSplitter,
  ) -> Result<PipelineOutput, TaskError> {
    info!("开始任务...");
    let now = Instant::now();
    let mut summary = PipelineSummary::default();

    let unavailable = self.detect_stage(worklist, detector, &mut summary)?;
    info!("检测阶段完成，耗时: {:.2?}", now.elapsed());

    let records = self.split_stage(worklist, splitter, &unavailable, &mut summary)?;
    info!("分割阶段完成，耗时: {:.2?}", now.elapsed());

    summary.log();
    Ok(PipelineOutput { records, summary })
  }

  /// 阶段 (a): 检测所有可用且未缓存的图像，返回不可用图像的标识
  pub fn detect_stage<D: Detector>(
    &self,
    worklist: &Worklist,
    detector: &mut D,
    summary: &mut PipelineSummary,
  ) -> Result<HashSet<String>, TaskError> {
    let mut seen = HashSet::new();
    let mut unavailable = HashSet::new();
    let mut pending = Vec::new();

    for item in worklist.items() {
      let id = item.id();
      if !seen.insert(id.clone()) {
        continue;
      }
      summary.images += 1;

      let path = self.source_path(item);
      if let Err(e) = ImagePreprocessor::check_available(&path) {
        warn!("跳过图像 {}: {}", id, e);
        summary.skipped += 1;
        unavailable.insert(id);
        continue;
      }

      if self.cache.contains(&id)? {
        debug!("命中缓存: {}", id);
        summary.cache_hits += 1;
        continue;
      }
      pending.push(PendingImage { id, path });
    }

    info!(
      "共 {} 张图像, {} 张命中缓存, {} 张需要检测",
      summary.images,
      summary.cache_hits,
      pending.len()
    );

    let runner = BatchRunner::new(
      self.config.grid.clone(),
      ImagePreprocessor::new(self.config.preprocess.clone()),
      self.config.batch.batch_size,
    );
    let report = runner.run(detector, &self.cache, pending)?;

    summary.skipped += report.unavailable.len();
    summary.decoded += report.decoded();
    summary.decode_failures += report.failed();
    summary.detector_calls += report.detector_calls;
    unavailable.extend(report.unavailable.into_iter().map(|image| image.id));

    Ok(unavailable)
  }

  /// 阶段 (b): 按清单顺序输出子图记录，每个产出文件一行（先裁剪，后整图）
  pub fn split_stage(
    &self,
    worklist: &Worklist,
    splitter: &SubfigureSplitter,
    unavailable: &HashSet<String>,
    summary: &mut PipelineSummary,
  ) -> Result<RecordSet, TaskError> {
    let rendered = worklist
      .items()
      .par_iter()
      .map(|item| self.render_item(item, splitter, unavailable))
      .collect::<Result<Vec<_>, TaskError>>()?;

    let mut records = RecordSet::new(worklist.headers(), &self.subfigure_column);
    for (item, rendered) in worklist.items().iter().zip(rendered) {
      let Some(rendered) = rendered else {
        continue;
      };

      for output in &rendered.outputs {
        match (output.kind, output.status) {
          (SplitKind::Crop, WriteStatus::Written) => summary.crops_written += 1,
          (SplitKind::Crop, WriteStatus::Reused) => summary.crops_reused += 1,
          (SplitKind::Whole, WriteStatus::Written) => summary.whole_copied += 1,
          (SplitKind::Whole, WriteStatus::Reused) => {}
        }
        records.push(item.row(), &output.filename());
      }
      if rendered.preview {
        summary.previews += 1;
      }
    }

    summary.records = records.len();
    Ok(records)
  }

  fn render_item(
    &self,
    item: &WorkItem,
    splitter: &SubfigureSplitter,
    unavailable: &HashSet<String>,
  ) -> Result<Option<RenderedItem>, TaskError> {
    let id = item.id();
    if unavailable.contains(&id) {
      return Ok(None);
    }
    let Some(result) = self.cache.get(&id)? else {
      warn!("图像 {} 没有缓存的检测结果, 跳过", id);
      return Ok(None);
    };

    let source = self.source_path(item);
    let outputs: Vec<SplitOutput> = splitter.render_result(&source, &result)?;

    #[cfg(feature = "annotate")]
    let preview = match &self.annotator {
      Some(annotator) => annotator.render_result(&source, &result)?.is_some(),
      None => false,
    };
    #[cfg(not(feature = "annotate"))]
    let preview = false;

    Ok(Some(RenderedItem { outputs, preview }))
  }
}

struct RenderedItem {
  outputs: Vec<SplitOutput>,
  preview: bool,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryCacheStore;
  use crate::model::{DecodeResult, PixelBox};

  fn pixel_box(left: u32, width: u32) -> PixelBox {
    PixelBox {
      left,
      top: 0,
      width,
      height: 250,
      confidence: 0.9,
    }
  }

  #[test]
  fn rejects_invalid_config() {
    let config = PipelineConfig::default().confidence_threshold(1.5);
    let cache = DetectionCache::new(MemoryCacheStore::default());
    assert!(matches!(
      Pipeline::new(config, ".", cache),
      Err(TaskError::ConfigError(_))
    ));
  }

  #[test]
  fn split_stage_reads_only_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    image::RgbImage::new(600, 300)
      .save(dir.path().join("a.png"))
      .unwrap();
    image::RgbImage::new(600, 300)
      .save(dir.path().join("b.png"))
      .unwrap();

    let cache = DetectionCache::new(MemoryCacheStore::default());
    cache
      .put(
        "a",
        &DecodeResult::from(vec![pixel_box(0, 250), pixel_box(300, 250)]),
      )
      .unwrap();
    let pipeline = Pipeline::new(PipelineConfig::default(), dir.path(), cache).unwrap();
    let splitter = SubfigureSplitter::new(Default::default(), dir.path().join("out")).unwrap();
    let worklist = Worklist::from_filenames(["a.png", "b.png"], "figure filename");

    let mut summary = PipelineSummary::default();
    let records = pipeline
      .split_stage(&worklist, &splitter, &HashSet::new(), &mut summary)
      .unwrap();

    // b 没有缓存条目，不产生记录
    let names: Vec<_> = records.rows().iter().map(|row| row[1].to_string()).collect();
    assert_eq!(names, ["a_0x0_250x250.png", "a_300x0_550x250.png", "a.png"]);
    assert_eq!(summary.crops_written, 2);
    assert_eq!(summary.whole_copied, 1);
    assert_eq!(summary.records, 3);
  }
}
