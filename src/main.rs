// 该文件是 Qianli （千里眼） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use qianli::{
  LabelMap, Postprocessor,
  input::HeadDumpInput,
  output::JsonOutput,
  task::{OneShotTask, Task},
};

fn main() -> Result<()> {
  // 标准输出留给检测结果
  tracing_subscriber::fmt().with_writer(std::io::stderr).init();

  let args = args::Args::parse();

  info!("Qianli 检测后处理");
  info!("检测头输出: {}", args.input.display());
  info!("置信度阈值: {}", args.confidence);
  info!("NMS 阈值: {}", args.nms_threshold);

  let labels = match &args.labels {
    Some(path) => LabelMap::from_json_file(path)
      .with_context(|| format!("无法加载类别文件: {}", path.display()))?,
    None => LabelMap::coco(),
  };

  let model = Postprocessor::new(args.config()).context("后处理配置无效")?;
  let input = HeadDumpInput::open(&args.input)
    .with_context(|| format!("无法读取检测头输出: {}", args.input.display()))?;
  let output =
    JsonOutput::new(args.output.clone(), labels).with_original_shape(args.original_shape());

  OneShotTask.run_task(input, &model, output)?;

  info!("处理完成!");
  Ok(())
}
