// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model.rs - 模型与检测结果
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

use crate::{
  bbox::{self, BBox},
  error::{PostprocessError, Result},
  tensor::ImageShape,
};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> std::result::Result<Self::Output, Self::Error>;
}

impl<M: Model + ?Sized> Model for &M {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> std::result::Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: BBox, // [x_min, y_min, x_max, y_max]
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

impl DetectResult {
  /// 由并行的 (分数, 边界框, 类别) 序列构造
  pub fn from_parts(scores: &[f32], boxes: &[BBox], labels: &[u32]) -> Result<Self> {
    if scores.len() != boxes.len() || scores.len() != labels.len() {
      return Err(PostprocessError::shape_mismatch(format!(
        "分数 {} 个, 边界框 {} 个, 类别 {} 个, 数量不一致",
        scores.len(),
        boxes.len(),
        labels.len()
      )));
    }

    Ok(
      scores
        .iter()
        .zip(boxes)
        .zip(labels)
        .map(|((&score, &bbox), &class_id)| DetectItem {
          class_id,
          score,
          bbox,
        })
        .collect::<Vec<_>>()
        .into(),
    )
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &DetectItem> {
    self.items.iter()
  }

  pub fn scores(&self) -> Vec<f32> {
    self.items.iter().map(|d| d.score).collect()
  }

  pub fn boxes(&self) -> Vec<BBox> {
    self.items.iter().map(|d| d.bbox).collect()
  }

  pub fn labels(&self) -> Vec<u32> {
    self.items.iter().map(|d| d.class_id).collect()
  }

  /// 拆分为 (分数, 边界框, 类别) 三个等长序列
  pub fn into_parts(self) -> (Vec<f32>, Vec<BBox>, Vec<u32>) {
    let mut scores = Vec::with_capacity(self.len());
    let mut boxes = Vec::with_capacity(self.len());
    let mut labels = Vec::with_capacity(self.len());
    for item in self.items.into_vec() {
      scores.push(item.score);
      boxes.push(item.bbox);
      labels.push(item.class_id);
    }
    (scores, boxes, labels)
  }

  /// 将边界框从网络输入分辨率映射到原始图像分辨率
  pub fn rescale(&self, from: ImageShape, to: ImageShape) -> Result<Self> {
    if from.width == 0 || from.height == 0 {
      return Err(PostprocessError::invalid_config(format!(
        "源图像尺寸无效: {}x{}",
        from.width, from.height
      )));
    }

    let x_scale = to.width as f32 / from.width as f32;
    let y_scale = to.height as f32 / from.height as f32;

    Ok(
      self
        .items
        .iter()
        .map(|d| DetectItem {
          bbox: bbox::scaled(&d.bbox, x_scale, y_scale),
          ..d.clone()
        })
        .collect::<Vec<_>>()
        .into(),
    )
  }
}

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

const UNKNOWN_LABEL: &str = "unknown";

/// 类别索引到名称的映射
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
  names: Vec<String>,
}

impl Default for LabelMap {
  fn default() -> Self {
    Self::coco()
  }
}

impl LabelMap {
  pub fn coco() -> Self {
    Self::from_names(COCO_CLASSES)
  }

  pub fn from_names<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  /// 从 JSON 文件读取类别名称，文件内容为字符串数组
  #[cfg(feature = "json_io")]
  pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
    let path = path.as_ref();
    tracing::info!("加载类别文件: {}", path.display());
    let data = std::fs::read_to_string(path)?;
    let names: Vec<String> = serde_json::from_str(&data)?;
    tracing::debug!("共 {} 个类别", names.len());
    Ok(Self { names })
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn name(&self, class_id: u32) -> &str {
    self
      .names
      .get(class_id as usize)
      .map(String::as_str)
      .unwrap_or(UNKNOWN_LABEL)
  }
}
