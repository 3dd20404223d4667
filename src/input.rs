// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input.rs - 检测头输出文件输入
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

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::{
  error::{PostprocessError, Result},
  tensor::{HeadOutputs, HeadTensor, ImageShape, LevelOutput},
};

/// 张量的 JSON 表示，`shape` 为 NCHW 或省略批维度的 CHW
#[derive(Debug, Clone, Deserialize)]
pub struct TensorDump {
  pub shape: Vec<usize>,
  pub data: Vec<f32>,
}

impl TryFrom<TensorDump> for HeadTensor {
  type Error = PostprocessError;

  fn try_from(dump: TensorDump) -> Result<Self> {
    let shape = match dump.shape.as_slice() {
      &[n, c, h, w] => [n, c, h, w],
      &[c, h, w] => [1, c, h, w],
      other => {
        return Err(PostprocessError::shape_mismatch(format!(
          "张量维度必须为 3 或 4, 实际形状 {:?}",
          other
        )));
      }
    };
    HeadTensor::from_shape_vec(shape, dump.data)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LevelDump {
  pub cls: TensorDump,
  #[serde(rename = "box")]
  pub boxes: TensorDump,
}

/// 一次推理的检测头输出，`image_shape` 为 [height, width]
#[derive(Debug, Clone, Deserialize)]
pub struct HeadDump {
  pub image_shape: [usize; 2],
  pub levels: Vec<LevelDump>,
}

impl TryFrom<HeadDump> for HeadOutputs {
  type Error = PostprocessError;

  fn try_from(dump: HeadDump) -> Result<Self> {
    let [height, width] = dump.image_shape;
    let levels = dump
      .levels
      .into_iter()
      .map(|level| LevelOutput::new(level.cls.try_into()?, level.boxes.try_into()?))
      .collect::<Result<Vec<_>>>()?;

    Ok(HeadOutputs::new(ImageShape::new(height, width), levels))
  }
}

/// 从 JSON 文件读取检测头输出，只产生一次
pub struct HeadDumpInput {
  outputs: Option<HeadOutputs>,
}

impl HeadDumpInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    info!("读取检测头输出: {}", path.display());
    let data = std::fs::read_to_string(path)?;
    Self::from_json(&data)
  }

  pub fn from_json(data: &str) -> Result<Self> {
    let dump: HeadDump = serde_json::from_str(data)?;
    let outputs = HeadOutputs::try_from(dump)?;
    debug!(
      "图像尺寸 {}x{}, 共 {} 个金字塔层",
      outputs.image_shape.height,
      outputs.image_shape.width,
      outputs.levels.len()
    );

    Ok(Self {
      outputs: Some(outputs),
    })
  }
}

impl Iterator for HeadDumpInput {
  type Item = HeadOutputs;

  fn next(&mut self) -> Option<Self::Item> {
    self.outputs.take()
  }
}
