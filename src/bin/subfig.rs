// 该文件是 Subfig （子图分割） 项目的一部分。
// src/bin/subfig.rs - 子图分割命令行
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

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::info;
use url::Url;

#[cfg(feature = "annotate")]
use subfig::output::Annotator;
use subfig::{
  FromUrl,
  cache::DetectionCache,
  config::PipelineConfig,
  frame::{ChannelOrder, TensorLayout},
  input::Worklist,
  model::OnnxDetectorBuilder,
  output::SubfigureSplitter,
  task::{DEFAULT_SUBFIGURE_COLUMN, Pipeline},
};

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ChannelOrderArg {
  Rgb,
  Bgr,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum LayoutArg {
  Nhwc,
  Nchw,
}

/// Subfig 子图分割参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型，例如 onnx:///models/figure_separator.onnx
  #[arg(long, value_name = "MODEL")]
  model: Url,
  /// 检测结果缓存，例如 folder:///data/cache 或 memory:
  #[arg(long, value_name = "CACHE")]
  cache: Url,
  /// 源图像目录
  #[arg(long, value_name = "DIR")]
  figure_dir: PathBuf,
  /// 子图输出目录
  #[arg(long, value_name = "DIR")]
  subfigure_dir: PathBuf,
  /// 图像清单 CSV；缺省时处理源图像目录中的全部图像
  #[arg(long, value_name = "CSV")]
  figures: Option<PathBuf>,
  /// 输出记录表 CSV
  #[arg(long, value_name = "CSV")]
  output: PathBuf,
  /// 清单中的图像文件名列
  #[arg(long, default_value = "figure filename", value_name = "COLUMN")]
  filename_column: String,
  /// 记录表中的子图文件名列
  #[arg(long, default_value = DEFAULT_SUBFIGURE_COLUMN, value_name = "COLUMN")]
  subfigure_column: String,
  /// JSON 配置文件，命令行参数优先
  #[arg(long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  confidence: Option<f32>,
  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  nms_threshold: Option<f32>,
  #[arg(long, value_name = "SIZE")]
  batch_size: Option<usize>,
  /// 检测器输入宽高
  #[arg(long, num_args = 2, value_names = ["WIDTH", "HEIGHT"])]
  input_size: Option<Vec<u32>>,
  #[arg(long, value_enum)]
  channel_order: Option<ChannelOrderArg>,
  #[arg(long, value_enum)]
  layout: Option<LayoutArg>,
  /// 子图最小宽高
  #[arg(long, num_args = 2, value_names = ["WIDTH", "HEIGHT"])]
  min_crop_size: Option<Vec<u32>>,
  /// ONNX Runtime 线程数
  #[arg(long, value_name = "COUNT")]
  intra_threads: Option<usize>,

  /// 运行前清除指定图像（文件名去掉扩展名）的缓存条目，可重复
  #[arg(long, value_name = "STEM")]
  invalidate: Vec<String>,
  /// 检测框预览输出目录
  #[cfg(feature = "annotate")]
  #[arg(long, value_name = "DIR")]
  annotate_dir: Option<PathBuf>,
}

impl Args {
  fn pipeline_config(&self) -> Result<PipelineConfig> {
    let mut config = match &self.config {
      Some(path) => PipelineConfig::from_json_file(path)?,
      None => PipelineConfig::default(),
    };

    if let Some(threshold) = self.confidence {
      config = config.confidence_threshold(threshold);
    }
    if let Some(threshold) = self.nms_threshold {
      config = config.nms_threshold(threshold);
    }
    if let Some(batch_size) = self.batch_size {
      config = config.batch_size(batch_size);
    }
    if let Some([width, height]) = self.input_size.as_deref() {
      config = config.input_size(*width, *height);
    }
    if let Some([width, height]) = self.min_crop_size.as_deref() {
      config = config.min_crop_size(*width, *height);
    }
    if let Some(order) = self.channel_order {
      config = config.channel_order(match order {
        ChannelOrderArg::Rgb => ChannelOrder::Rgb,
        ChannelOrderArg::Bgr => ChannelOrder::Bgr,
      });
    }
    if let Some(layout) = self.layout {
      config = config.layout(match layout {
        LayoutArg::Nhwc => TensorLayout::Nhwc,
        LayoutArg::Nchw => TensorLayout::Nchw,
      });
    }

    Ok(config)
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("缓存: {}", args.cache);
  info!("源图像目录: {}", args.figure_dir.display());
  info!("子图输出目录: {}", args.subfigure_dir.display());

  let config = args.pipeline_config()?;

  let cache = DetectionCache::from_url(&args.cache)?;
  for stem in &args.invalidate {
    cache.invalidate(stem)?;
  }

  let worklist = match &args.figures {
    Some(path) => Worklist::from_csv(path, &args.filename_column)?,
    None => Worklist::from_directory(&args.figure_dir, &args.filename_column)?,
  };

  let mut builder = OnnxDetectorBuilder::from_url(&args.model)?;
  if let Some(threads) = args.intra_threads {
    builder = builder.intra_threads(threads);
  }
  let mut detector = builder.build()?;

  let splitter = SubfigureSplitter::new(config.split.clone(), &args.subfigure_dir)?;
  let pipeline = Pipeline::new(config, &args.figure_dir, cache)?
    .with_subfigure_column(args.subfigure_column.as_str());
  #[cfg(feature = "annotate")]
  let pipeline = match &args.annotate_dir {
    Some(dir) => pipeline.with_annotator(Annotator::new(dir)?),
    None => pipeline,
  };

  let output = pipeline.run(&worklist, &mut detector, &splitter)?;
  output.records.write_csv(&args.output)?;

  info!("任务完成，退出");
  Ok(())
}
