// 该文件是 Qianli （千里眼） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::Parser;
use qianli::{ImageShape, PostprocessConfig, ScoreActivation};

/// Qianli 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测头输出文件（JSON）
  #[arg(long, value_name = "FILE")]
  pub input: PathBuf,

  /// 检测结果输出路径（JSON），缺省时写到标准输出
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<PathBuf>,

  /// 类别名称文件（JSON 字符串数组），缺省使用 COCO 类别
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 置信度阈值 (0.0 - 1.0]
  #[arg(long, default_value = "0.05", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 每层最多保留的候选框数量
  #[arg(long, default_value = "1000", value_name = "COUNT")]
  pub top_n: usize,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 最终最多输出的检测数量
  #[arg(long, default_value = "100", value_name = "COUNT")]
  pub max_detections: usize,

  /// 分类分数激活方式: identity 或 sigmoid
  #[arg(long, default_value = "identity", value_name = "ACTIVATION")]
  pub activation: ScoreActivation,

  /// 锚框宽高比，逗号分隔，缺省为 1.0,2.0,0.5
  #[arg(long, value_delimiter = ',', value_name = "RATIOS")]
  pub ratios: Option<Vec<f32>>,

  /// 锚框尺度，逗号分隔，缺省为 4·2^(i/3)
  #[arg(long, value_delimiter = ',', value_name = "SCALES")]
  pub scales: Option<Vec<f32>>,

  /// 原始图像高度，指定后边界框映射回原始图像
  #[arg(long, requires = "original_width", value_name = "PIXELS")]
  pub original_height: Option<usize>,

  /// 原始图像宽度
  #[arg(long, requires = "original_height", value_name = "PIXELS")]
  pub original_width: Option<usize>,
}

impl Args {
  pub fn config(&self) -> PostprocessConfig {
    let mut config = PostprocessConfig::default()
      .with_score_threshold(self.confidence)
      .with_top_n(self.top_n)
      .with_nms_threshold(self.nms_threshold)
      .with_max_detections(self.max_detections)
      .with_activation(self.activation);

    if let Some(ratios) = &self.ratios {
      config = config.with_ratios(ratios.clone());
    }
    if let Some(scales) = &self.scales {
      config = config.with_scales(scales.clone());
    }

    config
  }

  pub fn original_shape(&self) -> Option<ImageShape> {
    self
      .original_height
      .zip(self.original_width)
      .map(|(height, width)| ImageShape::new(height, width))
  }
}
