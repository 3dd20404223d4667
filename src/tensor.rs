// 该文件是 Qianli （千里眼） 项目的一部分。
// src/tensor.rs - 检测头张量定义
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

use ndarray::{Array4, ArrayView3, ArrayView4, Axis};
use tracing::warn;

use crate::error::{PostprocessError, Result};

/// 原始输入图像的尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageShape {
  pub height: usize,
  pub width: usize,
}

impl ImageShape {
  pub fn new(height: usize, width: usize) -> Self {
    Self { height, width }
  }
}

/// 单个检测头输出张量，布局为 NCHW: (batch, channels, height, width)
#[derive(Debug, Clone)]
pub struct HeadTensor {
  data: Array4<f32>,
}

impl From<Array4<f32>> for HeadTensor {
  fn from(data: Array4<f32>) -> Self {
    Self { data }
  }
}

impl HeadTensor {
  pub fn from_shape_vec(shape: [usize; 4], data: Vec<f32>) -> Result<Self> {
    let expected = shape
      .iter()
      .try_fold(1usize, |acc, &d| acc.checked_mul(d))
      .ok_or_else(|| {
        PostprocessError::shape_mismatch(format!("形状 {:?} 的元素数量溢出", shape))
      })?;
    if data.len() != expected {
      return Err(PostprocessError::shape_mismatch(format!(
        "数据长度不匹配: 形状 {:?} 期望长度 {}, 实际长度 {}",
        shape,
        expected,
        data.len()
      )));
    }

    Array4::from_shape_vec(shape, data)
      .map(Self::from)
      .map_err(|e| PostprocessError::shape_mismatch(e.to_string()))
  }

  pub fn batch(&self) -> usize {
    self.data.dim().0
  }

  pub fn channels(&self) -> usize {
    self.data.dim().1
  }

  pub fn height(&self) -> usize {
    self.data.dim().2
  }

  pub fn width(&self) -> usize {
    self.data.dim().3
  }

  pub fn view(&self) -> ArrayView4<'_, f32> {
    self.data.view()
  }

  /// 取出批次中第 `index` 个元素，形状为 (channels, height, width)
  pub fn item(&self, index: usize) -> Result<ArrayView3<'_, f32>> {
    if index >= self.batch() {
      return Err(PostprocessError::shape_mismatch(format!(
        "批次索引 {} 越界, 批次大小为 {}",
        index,
        self.batch()
      )));
    }
    Ok(self.data.index_axis(Axis(0), index))
  }
}

/// 一个金字塔层的输出：分类头与回归头
#[derive(Debug, Clone)]
pub struct LevelOutput {
  cls: HeadTensor,
  boxes: HeadTensor,
}

impl LevelOutput {
  /// 两个张量的批次与空间尺寸必须一致，回归头通道数必须是 4 的倍数
  pub fn new(cls: HeadTensor, boxes: HeadTensor) -> Result<Self> {
    if cls.batch() != boxes.batch() || cls.height() != boxes.height() || cls.width() != boxes.width()
    {
      return Err(PostprocessError::shape_mismatch(format!(
        "分类头形状 {:?} 与回归头形状 {:?} 不一致",
        cls.view().dim(),
        boxes.view().dim()
      )));
    }

    if boxes.channels() == 0 || boxes.channels() % 4 != 0 {
      return Err(PostprocessError::shape_mismatch(format!(
        "回归头通道数 {} 不是 4 的正整数倍",
        boxes.channels()
      )));
    }

    Ok(Self { cls, boxes })
  }

  pub fn cls(&self) -> &HeadTensor {
    &self.cls
  }

  pub fn boxes(&self) -> &HeadTensor {
    &self.boxes
  }

  pub fn batch(&self) -> usize {
    self.cls.batch()
  }

  /// 该层的特征图尺寸 (height, width)
  pub fn feature_size(&self) -> (usize, usize) {
    (self.cls.height(), self.cls.width())
  }

  /// 步长 = 图像宽度 / 特征图宽度（整数除法，与网络下采样保持一致）
  pub fn stride(&self, image: ImageShape) -> Result<u32> {
    let feature_w = self.cls.width();
    if feature_w == 0 {
      return Err(PostprocessError::shape_mismatch("特征图宽度为 0"));
    }

    let stride = image.width / feature_w;
    if stride == 0 {
      return Err(PostprocessError::shape_mismatch(format!(
        "特征图宽度 {} 大于图像宽度 {}",
        feature_w, image.width
      )));
    }

    if image.width % feature_w != 0 {
      warn!(
        "图像宽度 {} 不能被特征图宽度 {} 整除, 使用向下取整步长 {}",
        image.width, feature_w, stride
      );
    }

    u32::try_from(stride)
      .map_err(|_| PostprocessError::shape_mismatch(format!("步长 {} 过大", stride)))
  }
}

/// 一次推理的全部检测头输出
#[derive(Debug, Clone)]
pub struct HeadOutputs {
  pub image_shape: ImageShape,
  pub levels: Vec<LevelOutput>,
}

impl HeadOutputs {
  pub fn new(image_shape: ImageShape, levels: Vec<LevelOutput>) -> Self {
    Self { image_shape, levels }
  }
}
