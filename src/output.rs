// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output.rs - 输出定义
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

#[cfg(feature = "json_io")]
use std::{
  fs::File,
  io::{BufWriter, Write},
  path::PathBuf,
};

#[cfg(feature = "json_io")]
use serde::Serialize;
use tracing::info;

#[cfg(feature = "json_io")]
use crate::tensor::ImageShape;
use crate::{
  error::{PostprocessError, Result},
  model::{DetectResult, LabelMap},
  tensor::HeadOutputs,
};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> std::result::Result<(), Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json_io", derive(Serialize))]
pub struct DetectionRecord {
  pub score: f32,
  pub bbox: [f32; 4],
  pub class_id: u32,
  pub label: String,
}

/// 将检测结果转换为可序列化的记录
pub fn to_records(result: &DetectResult, labels: &LabelMap) -> Vec<DetectionRecord> {
  result
    .iter()
    .map(|d| DetectionRecord {
      score: d.score,
      bbox: d.bbox,
      class_id: d.class_id,
      label: labels.name(d.class_id).to_string(),
    })
    .collect()
}

/// 以 JSON 格式输出检测结果，每个批次元素一个数组
#[cfg(feature = "json_io")]
pub struct JsonOutput {
  path: Option<PathBuf>,
  labels: LabelMap,
  original: Option<ImageShape>,
}

#[cfg(feature = "json_io")]
impl JsonOutput {
  /// `path` 为 `None` 时写到标准输出
  pub fn new(path: Option<PathBuf>, labels: LabelMap) -> Self {
    Self {
      path,
      labels,
      original: None,
    }
  }

  /// 输出前把边界框映射到原始图像尺寸
  pub fn with_original_shape(mut self, original: Option<ImageShape>) -> Self {
    self.original = original;
    self
  }

  fn records(
    &self,
    frame: &HeadOutputs,
    results: &[DetectResult],
  ) -> Result<Vec<Vec<DetectionRecord>>> {
    results
      .iter()
      .map(|result| match self.original {
        Some(original) => Ok(to_records(
          &result.rescale(frame.image_shape, original)?,
          &self.labels,
        )),
        None => Ok(to_records(result, &self.labels)),
      })
      .collect()
  }
}

#[cfg(feature = "json_io")]
impl Render<HeadOutputs, Vec<DetectResult>> for JsonOutput {
  type Error = PostprocessError;

  fn render_result(&self, frame: &HeadOutputs, result: &Vec<DetectResult>) -> Result<()> {
    let records = self.records(frame, result)?;

    match &self.path {
      Some(path) => {
        info!("写入检测结果: {}", path.display());
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &records)?;
        writer.flush()?;
      }
      None => {
        let stdout = std::io::stdout();
        let mut writer = stdout.lock();
        serde_json::to_writer_pretty(&mut writer, &records)?;
        writeln!(writer)?;
      }
    }

    Ok(())
  }
}

/// 只把检测结果写入日志
pub struct LogOutput {
  labels: LabelMap,
}

impl LogOutput {
  pub fn new(labels: LabelMap) -> Self {
    Self { labels }
  }
}

impl Render<HeadOutputs, Vec<DetectResult>> for LogOutput {
  type Error = PostprocessError;

  fn render_result(&self, _frame: &HeadOutputs, result: &Vec<DetectResult>) -> Result<()> {
    for (index, detections) in result.iter().enumerate() {
      info!("批次 {}: 检测到 {} 个对象", index, detections.len());
      for record in to_records(detections, &self.labels) {
        info!(
          "  - {}: {:.2}% at ({:.0}, {:.0}, {:.0}, {:.0})",
          record.label,
          record.score * 100.0,
          record.bbox[0],
          record.bbox[1],
          record.bbox[2],
          record.bbox[3]
        );
      }
    }
    Ok(())
  }
}
