// 该文件是 Qianli （千里眼） 项目的一部分。
// src/error.rs - 错误定义
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

use thiserror::Error;

/// 后处理流程中可能出现的错误
///
/// 所有错误都是同步检测并立即返回给调用者的，流程内部不做任何重试。
#[derive(Error, Debug)]
pub enum PostprocessError {
  #[error("配置无效: {0}")]
  InvalidConfig(String),
  #[error("张量形状不匹配: {0}")]
  ShapeMismatch(String),
  #[error("没有提供任何金字塔层输出")]
  EmptyInput,
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[cfg(feature = "json_io")]
  #[error("JSON 解析错误: {0}")]
  Json(#[from] serde_json::Error),
}

impl PostprocessError {
  pub fn invalid_config(msg: impl Into<String>) -> Self {
    PostprocessError::InvalidConfig(msg.into())
  }

  pub fn shape_mismatch(msg: impl Into<String>) -> Self {
    PostprocessError::ShapeMismatch(msg.into())
  }
}

pub type Result<T> = std::result::Result<T, PostprocessError>;
