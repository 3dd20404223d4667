// 该文件是 Qianli （千里眼） 项目的一部分。
// src/pipeline.rs - 检测后处理流程
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

use tracing::{debug, info};

use crate::{
  anchor::AnchorCache,
  decode::{BoxDecoder, ScoreActivation},
  error::{PostprocessError, Result},
  model::{DetectResult, Model},
  nms::nms,
  tensor::{HeadOutputs, ImageShape, LevelOutput},
};

const RETINA_RATIOS: [f32; 3] = [1.0, 2.0, 0.5];
const RETINA_NUM_SCALES: usize = 3;
const RETINA_SCORE_THRESH: f32 = 0.05;
const RETINA_TOP_N: usize = 1000;
const RETINA_NMS_THRESH: f32 = 0.5;
const RETINA_MAX_DETECTIONS: usize = 100;

/// 后处理配置，默认值即 RetinaNet 参考配置
#[derive(Debug, Clone, PartialEq)]
pub struct PostprocessConfig {
  pub ratios: Vec<f32>,
  pub scales: Vec<f32>,
  pub score_threshold: f32,
  pub top_n: usize,
  pub nms_threshold: f32,
  pub max_detections: usize,
  pub activation: ScoreActivation,
  pub box_weights: [f32; 4],
  pub bbox_xform_clip: f32,
}

impl Default for PostprocessConfig {
  fn default() -> Self {
    let decoder = BoxDecoder::default();
    Self {
      ratios: RETINA_RATIOS.to_vec(),
      // 4 * 2^(i/3)
      scales: (0..RETINA_NUM_SCALES)
        .map(|i| 4.0 * 2f32.powf(i as f32 / RETINA_NUM_SCALES as f32))
        .collect(),
      score_threshold: RETINA_SCORE_THRESH,
      top_n: RETINA_TOP_N,
      nms_threshold: RETINA_NMS_THRESH,
      max_detections: RETINA_MAX_DETECTIONS,
      activation: decoder.activation,
      box_weights: decoder.weights,
      bbox_xform_clip: decoder.bbox_xform_clip,
    }
  }
}

impl PostprocessConfig {
  pub fn with_ratios(mut self, ratios: Vec<f32>) -> Self {
    self.ratios = ratios;
    self
  }

  pub fn with_scales(mut self, scales: Vec<f32>) -> Self {
    self.scales = scales;
    self
  }

  pub fn with_score_threshold(mut self, threshold: f32) -> Self {
    self.score_threshold = threshold;
    self
  }

  pub fn with_top_n(mut self, top_n: usize) -> Self {
    self.top_n = top_n;
    self
  }

  pub fn with_nms_threshold(mut self, threshold: f32) -> Self {
    self.nms_threshold = threshold;
    self
  }

  pub fn with_max_detections(mut self, max_detections: usize) -> Self {
    self.max_detections = max_detections;
    self
  }

  pub fn with_activation(mut self, activation: ScoreActivation) -> Self {
    self.activation = activation;
    self
  }

  pub fn with_box_weights(mut self, weights: [f32; 4]) -> Self {
    self.box_weights = weights;
    self
  }

  pub fn decoder(&self) -> BoxDecoder {
    BoxDecoder::new(self.score_threshold, self.top_n)
      .with_activation(self.activation)
      .with_weights(self.box_weights)
      .with_clip(self.bbox_xform_clip)
  }

  pub fn validate(&self) -> Result<()> {
    self.decoder().validate()?;

    if !(0.0..=1.0).contains(&self.nms_threshold) {
      return Err(PostprocessError::invalid_config(format!(
        "NMS IoU 阈值必须在 [0, 1] 之间, 实际为 {}",
        self.nms_threshold
      )));
    }

    if self.max_detections == 0 {
      return Err(PostprocessError::invalid_config("最大检测数量必须为正整数"));
    }

    Ok(())
  }
}

/// 检测后处理器
///
/// 持有配置与按步长缓存的锚框，同一模型的多次调用应复用同一个实例。
#[derive(Debug)]
pub struct Postprocessor {
  config: PostprocessConfig,
  decoder: BoxDecoder,
  anchors: AnchorCache,
}

impl Postprocessor {
  pub fn new(config: PostprocessConfig) -> Result<Self> {
    config.validate()?;
    let anchors = AnchorCache::new(config.ratios.clone(), config.scales.clone())?;
    let decoder = config.decoder();
    debug!("后处理配置: {:?}", config);

    Ok(Self {
      config,
      decoder,
      anchors,
    })
  }

  pub fn config(&self) -> &PostprocessConfig {
    &self.config
  }

  pub fn anchor_cache(&self) -> &AnchorCache {
    &self.anchors
  }

  /// 处理批大小为 1 的输出
  pub fn detection_postprocess(
    &self,
    image_shape: ImageShape,
    levels: &[LevelOutput],
  ) -> Result<DetectResult> {
    let batch = check_levels(levels)?;
    if batch != 1 {
      return Err(PostprocessError::shape_mismatch(format!(
        "期望批大小为 1, 实际为 {}",
        batch
      )));
    }

    self.postprocess_item(image_shape, levels, 0)
  }

  /// 对批次中每个元素独立执行相同的后处理
  pub fn detection_postprocess_batch(
    &self,
    image_shape: ImageShape,
    levels: &[LevelOutput],
  ) -> Result<Vec<DetectResult>> {
    let batch = check_levels(levels)?;
    (0..batch)
      .map(|index| self.postprocess_item(image_shape, levels, index))
      .collect()
  }

  fn postprocess_item(
    &self,
    image_shape: ImageShape,
    levels: &[LevelOutput],
    index: usize,
  ) -> Result<DetectResult> {
    let mut candidates = Vec::new();

    for (level_idx, level) in levels.iter().enumerate() {
      let stride = level.stride(image_shape)?;
      let anchors = self.anchors.get(stride)?;
      let (map_h, map_w) = level.feature_size();
      debug!(
        "金字塔层 {}: 特征图 {}x{}, 步长 {}",
        level_idx, map_h, map_w, stride
      );

      let decoded = self.decoder.decode(
        level.cls().item(index)?,
        level.boxes().item(index)?,
        stride,
        &anchors,
      )?;
      candidates.extend(decoded);
    }

    debug!("NMS 前共 {} 个候选框", candidates.len());
    let result = nms(
      &candidates,
      self.config.nms_threshold,
      self.config.max_detections,
    )?;
    info!("检测到 {} 个物体", result.len());

    Ok(result)
  }
}

/// 检查层数非空且各层批大小一致，返回批大小
fn check_levels(levels: &[LevelOutput]) -> Result<usize> {
  let first = levels.first().ok_or(PostprocessError::EmptyInput)?;
  let batch = first.batch();

  if let Some((idx, level)) = levels
    .iter()
    .enumerate()
    .find(|(_, level)| level.batch() != batch)
  {
    return Err(PostprocessError::shape_mismatch(format!(
      "金字塔层 {} 的批大小 {} 与第一层 {} 不一致",
      idx,
      level.batch(),
      batch
    )));
  }

  Ok(batch)
}

impl Model for Postprocessor {
  type Input = HeadOutputs;
  type Output = Vec<DetectResult>;
  type Error = PostprocessError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output> {
    self.detection_postprocess_batch(input.image_shape, &input.levels)
  }
}

/// 使用参考配置执行一次完整的后处理
pub fn detection_postprocess(
  image_shape: ImageShape,
  levels: &[LevelOutput],
) -> Result<DetectResult> {
  Postprocessor::new(PostprocessConfig::default())?.detection_postprocess(image_shape, levels)
}
