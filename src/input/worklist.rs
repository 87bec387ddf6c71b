// 该文件是 Subfig （子图分割） 项目的一部分。
// src/input/worklist.rs - 待处理图像清单
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

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use thiserror::Error;
use tracing::{debug, info};

use crate::input::image_id;

const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "tif", "tiff", "bmp", "gif"];

#[derive(Error, Debug)]
pub enum WorklistError {
  #[error("CSV 错误: {0}")]
  Csv(#[from] csv::Error),
  #[error("CSV 缺少列: {0}")]
  MissingColumn(String),
  #[error("读取目录 {} 错误: {source}", path.display())]
  ReadDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// 一张源图像及其上游元数据行
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
  row: StringRecord,
  filename: String,
}

impl WorkItem {
  pub fn filename(&self) -> &str {
    &self.filename
  }

  pub fn id(&self) -> String {
    image_id(&self.filename)
  }

  pub fn row(&self) -> &StringRecord {
    &self.row
  }
}

#[derive(Debug, Clone)]
pub struct Worklist {
  headers: StringRecord,
  filename_column: usize,
  items: Vec<WorkItem>,
}

impl Worklist {
  pub fn from_csv(path: &Path, column: &str) -> Result<Self, WorklistError> {
    info!("读取图像清单: {}", path.display());
    let reader = csv::ReaderBuilder::new().from_path(path)?;
    Self::from_csv_reader(reader, column)
  }

  pub fn from_reader<R: Read>(reader: R, column: &str) -> Result<Self, WorklistError> {
    Self::from_csv_reader(csv::ReaderBuilder::new().from_reader(reader), column)
  }

  fn from_csv_reader<R: Read>(
    mut reader: csv::Reader<R>,
    column: &str,
  ) -> Result<Self, WorklistError> {
    let headers = reader.headers()?.clone();
    let filename_column = headers
      .iter()
      .position(|header| header == column)
      .ok_or_else(|| WorklistError::MissingColumn(column.to_string()))?;

    let mut items = Vec::new();
    for record in reader.records() {
      let row = record?;
      let filename = row.get(filename_column).unwrap_or_default().to_string();
      items.push(WorkItem { row, filename });
    }

    debug!("图像清单共 {} 行", items.len());
    Ok(Self {
      headers,
      filename_column,
      items,
    })
  }

  /// 没有元数据 CSV 时，按文件名排序列出目录中的所有图像。
  /// 目录中其他图像的子图（`<stem>_<l>x<t>_<r>x<b>.<ext>`）不计入清单，
  /// 子图输出目录与源图像目录相同时重复运行结果不变。
  pub fn from_directory(dir: &Path, column: &str) -> Result<Self, WorklistError> {
    let read_dir_error = |source| WorklistError::ReadDir {
      path: dir.to_path_buf(),
      source,
    };

    let mut filenames = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_dir_error)? {
      let entry = entry.map_err(read_dir_error)?;
      let path = entry.path();
      if !path.is_file() || !has_image_extension(&path) {
        continue;
      }
      if let Some(name) = path.file_name() {
        filenames.push(name.to_string_lossy().into_owned());
      }
    }
    filenames.sort();

    let stems: HashSet<String> = filenames.iter().map(|name| image_id(name)).collect();
    let total = filenames.len();
    filenames.retain(|name| !is_subfigure_of(&image_id(name), &stems));
    if filenames.len() < total {
      debug!("忽略目录中已有的子图 {} 张", total - filenames.len());
    }

    info!("目录 {} 中共有 {} 张图像", dir.display(), filenames.len());
    Ok(Self::from_filenames(filenames, column))
  }

  pub fn from_filenames<I, S>(filenames: I, column: &str) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let items = filenames
      .into_iter()
      .map(|filename| {
        let filename = filename.into();
        WorkItem {
          row: StringRecord::from(vec![filename.as_str()]),
          filename,
        }
      })
      .collect();

    Self {
      headers: StringRecord::from(vec![column]),
      filename_column: 0,
      items,
    }
  }

  pub fn headers(&self) -> &StringRecord {
    &self.headers
  }

  pub fn filename_column(&self) -> usize {
    self.filename_column
  }

  pub fn items(&self) -> &[WorkItem] {
    &self.items
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

fn has_image_extension(path: &Path) -> bool {
  path
    .extension()
    .map(|ext| {
      let ext = ext.to_string_lossy().to_lowercase();
      IMAGE_EXTENSIONS.contains(&ext.as_str())
    })
    .unwrap_or(false)
}

/// 判断 `stem` 是否形如 `<source>_<l>x<t>_<r>x<b>`，且 `<source>` 是清单中的另一张图像
fn is_subfigure_of(stem: &str, stems: &HashSet<String>) -> bool {
  let mut parts = stem.rsplitn(3, '_');
  let (Some(bottom_right), Some(top_left), Some(source)) = (parts.next(), parts.next(), parts.next())
  else {
    return false;
  };
  is_corner(bottom_right) && is_corner(top_left) && stems.contains(source)
}

fn is_corner(part: &str) -> bool {
  let is_number = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
  part
    .split_once('x')
    .map(|(x, y)| is_number(x) && is_number(y))
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn csv_keeps_all_columns() {
    let data = "pmcid,figure filename,caption\nPMC1,a.jpg,first\nPMC2,b.png,second\n";
    let worklist = Worklist::from_reader(data.as_bytes(), "figure filename").unwrap();
    assert_eq!(worklist.len(), 2);
    assert_eq!(worklist.filename_column(), 1);
    assert_eq!(worklist.items()[1].filename(), "b.png");
    assert_eq!(worklist.items()[1].id(), "b");
    assert_eq!(worklist.items()[0].row().get(2), Some("first"));
  }

  #[test]
  fn missing_filename_column_is_an_error() {
    let data = "pmcid,caption\nPMC1,first\n";
    let err = Worklist::from_reader(data.as_bytes(), "figure filename").unwrap_err();
    assert!(matches!(err, WorklistError::MissingColumn(_)));
  }

  #[test]
  fn directory_lists_images_sorted() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.png", "a.JPG", "notes.txt"] {
      std::fs::write(dir.path().join(name), b"x").unwrap();
    }
    let worklist = Worklist::from_directory(dir.path(), "figure filename").unwrap();
    let names: Vec<_> = worklist.items().iter().map(WorkItem::filename).collect();
    assert_eq!(names, ["a.JPG", "b.png"]);
    assert_eq!(worklist.headers().get(0), Some("figure filename"));
  }

  #[test]
  fn directory_skips_subfigures_of_listed_images() {
    let dir = tempfile::tempdir().unwrap();
    for name in [
      "fig.png",
      "fig_0x0_300x299.png",
      "fig_300x0_599x299.jpg",
      "other_1x2_3x4.png",
      "fig_0x0_wide.png",
      "PMC1_fig_2.png",
    ] {
      std::fs::write(dir.path().join(name), b"x").unwrap();
    }
    let worklist = Worklist::from_directory(dir.path(), "figure filename").unwrap();
    let names: Vec<_> = worklist.items().iter().map(WorkItem::filename).collect();
    // other 不在目录中，fig_0x0_wide 不是子图命名
    assert_eq!(
      names,
      ["PMC1_fig_2.png", "fig.png", "fig_0x0_wide.png", "other_1x2_3x4.png"]
    );
  }

  #[test]
  fn subfigure_names_need_both_corners() {
    let stems: HashSet<String> = ["a_b".to_string()].into();
    assert!(is_subfigure_of("a_b_10x20_30x40", &stems));
    assert!(!is_subfigure_of("a_b_10x20", &stems));
    assert!(!is_subfigure_of("a_b_10x_30x40", &stems));
    assert!(!is_subfigure_of("a_b", &stems));
  }
}
