// 该文件是 Qianli （千里眼） 项目的一部分。
// src/decode.rs - 单层检测头解码
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

use ndarray::ArrayView3;
use tracing::debug;

use crate::{
  anchor::Anchors,
  bbox,
  error::{PostprocessError, Result},
  model::DetectItem,
};

/// 分类分数的激活方式
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ScoreActivation {
  /// 模型已经输出概率
  #[default]
  Identity,
  /// 模型输出 logits，需要先经过 sigmoid
  Sigmoid,
}

impl ScoreActivation {
  #[inline]
  pub fn apply(self, x: f32) -> f32 {
    let y = match self {
      ScoreActivation::Identity => x,
      ScoreActivation::Sigmoid => sigmoid(x),
    };
    y.clamp(0.0, 1.0)
  }
}

impl std::str::FromStr for ScoreActivation {
  type Err = PostprocessError;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "identity" | "none" => Ok(Self::Identity),
      "sigmoid" => Ok(Self::Sigmoid),
      other => Err(PostprocessError::invalid_config(format!(
        "未知的分数激活方式: {}",
        other
      ))),
    }
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

/// 单个金字塔层的解码器
#[derive(Debug, Clone)]
pub struct BoxDecoder {
  pub threshold: f32,
  pub top_n: usize,
  pub activation: ScoreActivation,
  /// 回归量 (tx, ty, tw, th) 的权重
  pub weights: [f32; 4],
  /// tw/th 在求 exp 之前的上限
  pub bbox_xform_clip: f32,
}

impl Default for BoxDecoder {
  fn default() -> Self {
    Self::new(0.05, 1000)
  }
}

impl BoxDecoder {
  /// 创建解码器，`bbox_xform_clip` 默认为 `ln(1000/16)`
  pub fn new(threshold: f32, top_n: usize) -> Self {
    Self {
      threshold,
      top_n,
      activation: ScoreActivation::Identity,
      weights: [1.0; 4],
      bbox_xform_clip: (1000_f32 / 16_f32).ln(),
    }
  }

  pub fn with_activation(mut self, activation: ScoreActivation) -> Self {
    self.activation = activation;
    self
  }

  pub fn with_weights(mut self, weights: [f32; 4]) -> Self {
    self.weights = weights;
    self
  }

  pub fn with_clip(mut self, bbox_xform_clip: f32) -> Self {
    self.bbox_xform_clip = bbox_xform_clip;
    self
  }

  pub fn validate(&self) -> Result<()> {
    if !(self.threshold > 0.0 && self.threshold <= 1.0) {
      return Err(PostprocessError::invalid_config(format!(
        "分数阈值必须在 (0, 1] 之间, 实际为 {}",
        self.threshold
      )));
    }

    if self.weights.iter().any(|w| !(w.is_finite() && *w > 0.0)) {
      return Err(PostprocessError::invalid_config(format!(
        "回归权重必须为正数, 实际为 {:?}",
        self.weights
      )));
    }

    if self.bbox_xform_clip.is_nan() {
      return Err(PostprocessError::invalid_config("回归裁剪值不能为 NaN"));
    }

    Ok(())
  }

  /// 解码单张图像在某一层上的输出
  ///
  /// `cls` 的形状为 (A * C, H, W)，`deltas` 的形状为 (A * 4, H, W)，
  /// 其中 A 为每个位置的锚框数量。每个 (锚框, 位置) 最多产生一个候选框，
  /// 即得分最高的类别。返回的候选框数量不超过 `top_n`。
  pub fn decode(
    &self,
    cls: ArrayView3<'_, f32>,
    deltas: ArrayView3<'_, f32>,
    stride: u32,
    anchors: &Anchors,
  ) -> Result<Vec<DetectItem>> {
    self.validate()?;

    if anchors.stride() != stride {
      return Err(PostprocessError::shape_mismatch(format!(
        "锚框步长 {} 与特征图步长 {} 不一致",
        anchors.stride(),
        stride
      )));
    }

    let num_anchors = anchors.len();
    let (cls_channels, height, width) = cls.dim();

    if num_anchors == 0 || cls_channels == 0 || cls_channels % num_anchors != 0 {
      return Err(PostprocessError::shape_mismatch(format!(
        "分类头通道数 {} 不是锚框数量 {} 的整数倍",
        cls_channels, num_anchors
      )));
    }

    if deltas.dim() != (num_anchors * 4, height, width) {
      return Err(PostprocessError::shape_mismatch(format!(
        "回归头形状 {:?} 与期望 {:?} 不一致",
        deltas.dim(),
        (num_anchors * 4, height, width)
      )));
    }

    let num_classes = cls_channels / num_anchors;
    let spatial = height * width;

    // (原始索引, 分数, 类别)，原始索引按 (锚框, y, x) 展开
    let mut candidates = Vec::new();
    for a in 0..num_anchors {
      for y in 0..height {
        for x in 0..width {
          let mut best = f32::NEG_INFINITY;
          let mut class_id = 0usize;
          for c in 0..num_classes {
            let logit = cls[[a * num_classes + c, y, x]];
            if logit > best {
              best = logit;
              class_id = c;
            }
          }

          let score = self.activation.apply(best);
          if score >= self.threshold {
            candidates.push((a * spatial + y * width + x, score, class_id));
          }
        }
      }
    }

    let above_threshold = candidates.len();
    candidates.sort_by(|l, r| r.1.total_cmp(&l.1).then(l.0.cmp(&r.0)));
    candidates.truncate(self.top_n);

    debug!(
      "步长 {}: 特征图 {}x{}, 锚框 {}, 类别 {}, 阈值以上 {} 个, 保留 {} 个",
      stride,
      height,
      width,
      num_anchors,
      num_classes,
      above_threshold,
      candidates.len()
    );

    let stride_f = stride as f32;
    let max_x = width as f32 * stride_f;
    let max_y = height as f32 * stride_f;
    let [wx, wy, ww, wh] = self.weights;

    let items = candidates
      .into_iter()
      .map(|(index, score, class_id)| {
        let a = index / spatial;
        let y = (index % spatial) / width;
        let x = index % width;

        // a < num_anchors
        let anchor = anchors.get(a).ok_or_else(|| {
          PostprocessError::shape_mismatch(format!("锚框索引 {} 越界", a))
        })?;

        let (offset_x, offset_y) = anchor.center();
        let ctr_x = (x as f32 + 0.5) * stride_f + offset_x;
        let ctr_y = (y as f32 + 0.5) * stride_f + offset_y;
        let anchor_w = anchor.width();
        let anchor_h = anchor.height();

        let dx = deltas[[a * 4, y, x]] / wx;
        let dy = deltas[[a * 4 + 1, y, x]] / wy;
        let dw = (deltas[[a * 4 + 2, y, x]] / ww).min(self.bbox_xform_clip);
        let dh = (deltas[[a * 4 + 3, y, x]] / wh).min(self.bbox_xform_clip);

        let pred_ctr_x = ctr_x + dx * anchor_w;
        let pred_ctr_y = ctr_y + dy * anchor_h;
        let half_w = 0.5 * anchor_w * dw.exp();
        let half_h = 0.5 * anchor_h * dh.exp();

        let bbox = bbox::clamp(
          [
            pred_ctr_x - half_w,
            pred_ctr_y - half_h,
            pred_ctr_x + half_w,
            pred_ctr_y + half_h,
          ],
          max_x,
          max_y,
        );

        // 回归量含 NaN 时丢弃该候选框
        if !bbox.iter().all(|v| v.is_finite()) {
          debug!("丢弃非有限边界框: 位置 ({}, {}), 锚框 {}", x, y, a);
          return Ok(None);
        }

        Ok(Some(DetectItem {
          class_id: class_id as u32,
          score,
          bbox,
        }))
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(items.into_iter().flatten().collect())
  }
}

/// 使用默认激活方式与回归参数解码单层输出
pub fn decode(
  cls: ArrayView3<'_, f32>,
  deltas: ArrayView3<'_, f32>,
  stride: u32,
  threshold: f32,
  top_n: usize,
  anchors: &Anchors,
) -> Result<Vec<DetectItem>> {
  BoxDecoder::new(threshold, top_n).decode(cls, deltas, stride, anchors)
}

#[cfg(test)]
mod tests {
  use ndarray::Array3;

  use super::*;
  use crate::anchor::generate_anchors;

  fn single_anchor() -> Anchors {
    generate_anchors(8, &[1.0], &[1.0]).unwrap()
  }

  #[test]
  fn zero_delta_reproduces_anchor_at_cell() {
    let mut cls = Array3::<f32>::zeros((1, 2, 2));
    cls[[0, 0, 1]] = 0.9;
    let deltas = Array3::<f32>::zeros((4, 2, 2));

    let items = decode(cls.view(), deltas.view(), 8, 0.05, 1000, &single_anchor()).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].class_id, 0);
    assert!((items[0].score - 0.9).abs() < 1e-6);
    assert_eq!(items[0].bbox, [8.0, 0.0, 16.0, 8.0]);
  }

  #[test]
  fn deltas_shift_and_scale_the_anchor() {
    let mut cls = Array3::<f32>::zeros((1, 4, 4));
    cls[[0, 1, 1]] = 0.8;
    let mut deltas = Array3::<f32>::zeros((4, 4, 4));
    deltas[[0, 1, 1]] = 0.5;
    deltas[[3, 1, 1]] = 2f32.ln();

    let items = decode(cls.view(), deltas.view(), 8, 0.5, 10, &single_anchor()).unwrap();
    assert_eq!(items.len(), 1);
    // 中心 (12 + 4, 12), 宽 8, 高 16
    let expected = [12.0, 4.0, 20.0, 20.0];
    for (got, want) in items[0].bbox.iter().zip(expected) {
      assert!((got - want).abs() < 1e-4, "{:?}", items[0].bbox);
    }
  }

  #[test]
  fn picks_best_class_per_location() {
    // 两个类别
    let mut cls = Array3::<f32>::zeros((2, 1, 1));
    cls[[0, 0, 0]] = 0.3;
    cls[[1, 0, 0]] = 0.7;
    let deltas = Array3::<f32>::zeros((4, 1, 1));

    let items = decode(cls.view(), deltas.view(), 8, 0.05, 10, &single_anchor()).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].class_id, 1);
    assert!((items[0].score - 0.7).abs() < 1e-6);
  }

  #[test]
  fn threshold_and_top_n_are_respected() {
    let mut cls = Array3::<f32>::zeros((1, 4, 4));
    for (i, v) in cls.iter_mut().enumerate() {
      *v = i as f32 / 16.0;
    }
    let deltas = Array3::<f32>::zeros((4, 4, 4));

    let items = decode(cls.view(), deltas.view(), 8, 0.5, 1000, &single_anchor()).unwrap();
    assert_eq!(items.len(), 8);
    assert!(items.iter().all(|d| d.score >= 0.5 && d.score <= 1.0));

    let items = decode(cls.view(), deltas.view(), 8, 0.5, 3, &single_anchor()).unwrap();
    let scores = items.iter().map(|d| d.score).collect::<Vec<_>>();
    assert_eq!(scores, vec![15.0 / 16.0, 14.0 / 16.0, 13.0 / 16.0]);

    let items = decode(cls.view(), deltas.view(), 8, 0.5, 0, &single_anchor()).unwrap();
    assert!(items.is_empty());
  }

  #[test]
  fn top_n_ties_prefer_lower_index() {
    let cls = Array3::<f32>::from_elem((1, 1, 4), 0.5);
    let deltas = Array3::<f32>::zeros((4, 1, 4));

    let items = decode(cls.view(), deltas.view(), 8, 0.1, 2, &single_anchor()).unwrap();
    let lefts = items.iter().map(|d| d.bbox[0]).collect::<Vec<_>>();
    assert_eq!(lefts, vec![0.0, 8.0]);
  }

  #[test]
  fn sigmoid_activation() {
    let mut cls = Array3::<f32>::from_elem((1, 1, 2), -10.0);
    cls[[0, 0, 0]] = 0.0;
    let deltas = Array3::<f32>::zeros((4, 1, 2));

    let items = BoxDecoder::new(0.4, 10)
      .with_activation(ScoreActivation::Sigmoid)
      .decode(cls.view(), deltas.view(), 8, &single_anchor())
      .unwrap();
    assert_eq!(items.len(), 1);
    assert!((items[0].score - 0.5).abs() < 1e-6);
  }

  #[test]
  fn identity_activation_clamps_scores() {
    let cls = Array3::<f32>::from_elem((1, 1, 1), 3.0);
    let deltas = Array3::<f32>::zeros((4, 1, 1));

    let items = decode(cls.view(), deltas.view(), 8, 0.5, 10, &single_anchor()).unwrap();
    assert_eq!(items[0].score, 1.0);
  }

  #[test]
  fn huge_deltas_stay_finite_and_inside_image() {
    let cls = Array3::<f32>::from_elem((1, 2, 2), 0.9);
    let deltas = Array3::<f32>::from_elem((4, 2, 2), 1e6);

    let items = decode(cls.view(), deltas.view(), 8, 0.5, 10, &single_anchor()).unwrap();
    assert_eq!(items.len(), 4);
    for item in items {
      assert!(item.bbox.iter().all(|v| v.is_finite()));
      assert!(item.bbox.iter().all(|v| (0.0..=16.0).contains(v)));
    }
  }

  #[test]
  fn nan_deltas_are_dropped() {
    let cls = Array3::<f32>::from_elem((1, 1, 2), 0.9);
    let mut deltas = Array3::<f32>::zeros((4, 1, 2));
    deltas[[0, 0, 0]] = f32::NAN;
    deltas[[3, 0, 0]] = f32::NAN;

    let items = decode(cls.view(), deltas.view(), 8, 0.5, 10, &single_anchor()).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].bbox, [8.0, 0.0, 16.0, 8.0]);
  }

  #[test]
  fn anchor_stride_must_match() {
    let cls = Array3::<f32>::from_elem((1, 2, 2), 0.9);
    let deltas = Array3::<f32>::zeros((4, 2, 2));
    assert!(matches!(
      decode(cls.view(), deltas.view(), 16, 0.5, 10, &single_anchor()),
      Err(PostprocessError::ShapeMismatch(_))
    ));
  }

  #[test]
  fn shape_mismatches_are_reported() {
    let anchors = generate_anchors(8, &[1.0, 2.0], &[1.0]).unwrap();

    // 分类头通道数不是锚框数量的整数倍
    let cls = Array3::<f32>::zeros((3, 2, 2));
    let deltas = Array3::<f32>::zeros((8, 2, 2));
    assert!(matches!(
      decode(cls.view(), deltas.view(), 8, 0.05, 10, &anchors),
      Err(PostprocessError::ShapeMismatch(_))
    ));

    // 回归头锚框数量不一致
    let cls = Array3::<f32>::zeros((4, 2, 2));
    let deltas = Array3::<f32>::zeros((4, 2, 2));
    assert!(matches!(
      decode(cls.view(), deltas.view(), 8, 0.05, 10, &anchors),
      Err(PostprocessError::ShapeMismatch(_))
    ));

    // 网格尺寸不一致
    let deltas = Array3::<f32>::zeros((8, 2, 3));
    assert!(matches!(
      decode(cls.view(), deltas.view(), 8, 0.05, 10, &anchors),
      Err(PostprocessError::ShapeMismatch(_))
    ));
  }

  #[test]
  fn invalid_threshold_is_rejected() {
    let cls = Array3::<f32>::zeros((1, 1, 1));
    let deltas = Array3::<f32>::zeros((4, 1, 1));
    for threshold in [0.0, -0.1, 1.5, f32::NAN] {
      assert!(matches!(
        decode(cls.view(), deltas.view(), 8, threshold, 10, &single_anchor()),
        Err(PostprocessError::InvalidConfig(_))
      ));
    }
  }
}
