// 该文件是 Qianli （千里眼） 项目的一部分。
// src/anchor.rs - 锚框生成与缓存
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

use std::{
  collections::HashMap,
  sync::{Arc, PoisonError, RwLock},
};

use itertools::iproduct;
use ndarray::Array2;
use tracing::debug;

use crate::error::{PostprocessError, Result};

/// 以原点为中心的锚框偏移 `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl Anchor {
  #[inline]
  pub fn width(&self) -> f32 {
    self.x2 - self.x1
  }

  #[inline]
  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }

  #[inline]
  pub fn center(&self) -> (f32, f32) {
    ((self.x1 + self.x2) * 0.5, (self.y1 + self.y2) * 0.5)
  }
}

/// 某一步长下的有序锚框序列，形状为 (num_scales * num_ratios, 4)
///
/// 解码时按位置索引，因此顺序是有意义的：先遍历尺度，再遍历宽高比。
#[derive(Debug, Clone, PartialEq)]
pub struct Anchors {
  stride: u32,
  boxes: Array2<f32>,
}

impl Anchors {
  pub fn stride(&self) -> u32 {
    self.stride
  }

  pub fn len(&self) -> usize {
    self.boxes.nrows()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn get(&self, index: usize) -> Option<Anchor> {
    (index < self.len()).then(|| {
      let row = self.boxes.row(index);
      Anchor {
        x1: row[0],
        y1: row[1],
        x2: row[2],
        y2: row[3],
      }
    })
  }

  pub fn iter(&self) -> impl Iterator<Item = Anchor> + '_ {
    (0..self.len()).filter_map(|i| self.get(i))
  }

  pub fn as_array(&self) -> &Array2<f32> {
    &self.boxes
  }
}

fn check_positive(name: &str, values: &[f32]) -> Result<()> {
  if values.is_empty() {
    return Err(PostprocessError::invalid_config(format!("{} 不能为空", name)));
  }

  if let Some(v) = values.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
    return Err(PostprocessError::invalid_config(format!(
      "{} 必须全部为正数, 实际包含 {}",
      name, v
    )));
  }

  Ok(())
}

/// 生成某一步长下的锚框
///
/// 基础尺寸等于步长，宽高比定义为 宽 / 高：
/// `w = stride * scale * sqrt(ratio)`，`h = stride * scale / sqrt(ratio)`。
pub fn generate_anchors(stride: u32, ratios: &[f32], scales: &[f32]) -> Result<Anchors> {
  if stride == 0 {
    return Err(PostprocessError::invalid_config("步长必须为正整数"));
  }
  check_positive("宽高比", ratios)?;
  check_positive("尺度", scales)?;

  let base = stride as f32;
  let data = iproduct!(scales, ratios)
    .flat_map(|(&scale, &ratio)| {
      let sqrt_ratio = ratio.sqrt();
      let half_w = 0.5 * base * scale * sqrt_ratio;
      let half_h = 0.5 * base * scale / sqrt_ratio;
      [-half_w, -half_h, half_w, half_h]
    })
    .collect::<Vec<_>>();

  let boxes = Array2::from_shape_vec((ratios.len() * scales.len(), 4), data)
    .map_err(|e| PostprocessError::invalid_config(e.to_string()))?;

  Ok(Anchors { stride, boxes })
}

/// 按步长缓存的锚框
///
/// 锚框只依赖于步长，因此并发首次填充同一步长时重复计算是安全的，
/// 后写入者直接丢弃自己的结果。
#[derive(Debug)]
pub struct AnchorCache {
  ratios: Vec<f32>,
  scales: Vec<f32>,
  entries: RwLock<HashMap<u32, Arc<Anchors>>>,
}

impl AnchorCache {
  pub fn new(ratios: Vec<f32>, scales: Vec<f32>) -> Result<Self> {
    check_positive("宽高比", &ratios)?;
    check_positive("尺度", &scales)?;

    Ok(Self {
      ratios,
      scales,
      entries: RwLock::new(HashMap::new()),
    })
  }

  /// 每个位置的锚框数量
  pub fn anchors_per_location(&self) -> usize {
    self.ratios.len() * self.scales.len()
  }

  pub fn get(&self, stride: u32) -> Result<Arc<Anchors>> {
    if let Some(anchors) = self
      .entries
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&stride)
    {
      return Ok(anchors.clone());
    }

    debug!("锚框缓存未命中, 生成步长 {} 的锚框", stride);
    let generated = Arc::new(generate_anchors(stride, &self.ratios, &self.scales)?);

    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    Ok(entries.entry(stride).or_insert(generated).clone())
  }

  pub fn contains(&self, stride: u32) -> bool {
    self
      .entries
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .contains_key(&stride)
  }

  pub fn len(&self) -> usize {
    self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn clear(&self) {
    self
      .entries
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .clear();
  }
}
