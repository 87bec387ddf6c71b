// 该文件是 Subfig （子图分割） 项目的一部分。
// src/output/record_set.rs - 子图记录表
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

use std::io::Write;
use std::path::Path;

use csv::StringRecord;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum RecordError {
  #[error("CSV 错误: {0}")]
  CsvError(#[from] csv::Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 输出记录表：每个产出文件一行，保留上游全部列，并写入子图文件名列
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet {
  headers: StringRecord,
  subfigure_column: usize,
  rows: Vec<StringRecord>,
}

impl RecordSet {
  /// 上游已有同名列时覆盖该列，否则追加到末尾
  pub fn new(upstream_headers: &StringRecord, subfigure_column: &str) -> Self {
    let mut headers = upstream_headers.clone();
    let subfigure_column = match headers.iter().position(|header| header == subfigure_column) {
      Some(index) => index,
      None => {
        headers.push_field(subfigure_column);
        headers.len() - 1
      }
    };

    Self {
      headers,
      subfigure_column,
      rows: Vec::new(),
    }
  }

  pub fn push(&mut self, upstream: &StringRecord, subfigure_filename: &str) {
    let row: StringRecord = (0..self.headers.len())
      .map(|index| {
        if index == self.subfigure_column {
          subfigure_filename
        } else {
          upstream.get(index).unwrap_or_default()
        }
      })
      .collect();
    self.rows.push(row);
  }

  pub fn headers(&self) -> &StringRecord {
    &self.headers
  }

  pub fn rows(&self) -> &[StringRecord] {
    &self.rows
  }

  pub fn len(&self) -> usize {
    self.rows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  pub fn write_to<W: Write>(&self, writer: W) -> Result<(), RecordError> {
    let mut writer = csv::WriterBuilder::new().from_writer(writer);
    writer.write_record(&self.headers)?;
    for row in &self.rows {
      writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
  }

  pub fn write_csv(&self, path: &Path) -> Result<(), RecordError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    self.write_to(std::fs::File::create(path)?)?;
    info!("写入 {} 条子图记录: {}", self.rows.len(), path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn appends_subfigure_column() {
    let headers = StringRecord::from(vec!["pmcid", "figure filename"]);
    let mut records = RecordSet::new(&headers, "subfigure filename");
    records.push(&StringRecord::from(vec!["PMC1", "a.png"]), "a_0x0_300x300.png");
    records.push(&StringRecord::from(vec!["PMC1", "a.png"]), "a.png");

    let mut out = Vec::new();
    records.write_to(&mut out).unwrap();
    assert_eq!(
      String::from_utf8(out).unwrap(),
      "pmcid,figure filename,subfigure filename\n\
       PMC1,a.png,a_0x0_300x300.png\n\
       PMC1,a.png,a.png\n"
    );
  }

  #[test]
  fn overwrites_existing_column() {
    let headers = StringRecord::from(vec!["subfigure filename", "figure filename"]);
    let mut records = RecordSet::new(&headers, "subfigure filename");
    records.push(&StringRecord::from(vec!["stale", "b.jpg"]), "b.jpg");

    assert_eq!(records.headers().len(), 2);
    assert_eq!(records.rows()[0], StringRecord::from(vec!["b.jpg", "b.jpg"]));
  }

  #[test]
  fn empty_set_writes_headers_only() {
    let headers = StringRecord::from(vec!["figure filename"]);
    let records = RecordSet::new(&headers, "subfigure filename");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("out.csv");
    records.write_csv(&path).unwrap();
    assert_eq!(
      std::fs::read_to_string(&path).unwrap(),
      "figure filename,subfigure filename\n"
    );
  }
}
