// 该文件是 Qianli （千里眼） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 后处理性能测试
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use qianli::{
  LabelMap, PostprocessConfig, Postprocessor,
  input::HeadDumpInput,
  output::LogOutput,
  task::{RepeatShotTask, Task},
};

/// Qianli 性能测试参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测头输出文件（JSON）
  #[arg(long, value_name = "FILE")]
  pub input: PathBuf,
  /// 重复次数
  #[arg(long, default_value = "1000", value_name = "COUNT")]
  pub times: usize,
  /// 置信度阈值
  #[arg(long, default_value = "0.05", value_name = "THRESHOLD")]
  pub confidence: f32,
  /// NMS IOU 阈值
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub nms_threshold: f32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("检测头输出: {}", args.input.display());
  info!("重复次数: {}", args.times);

  let config = PostprocessConfig::default()
    .with_score_threshold(args.confidence)
    .with_nms_threshold(args.nms_threshold);
  let model = Postprocessor::new(config).context("后处理配置无效")?;
  let input = HeadDumpInput::open(&args.input)
    .with_context(|| format!("无法读取检测头输出: {}", args.input.display()))?;
  let output = LogOutput::new(LabelMap::coco());

  RepeatShotTask::default()
    .with_times(args.times)
    .run_task(input, &model, output)?;

  Ok(())
}
