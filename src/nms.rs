// 该文件是 Qianli （千里眼） 项目的一部分。
// src/nms.rs - 非极大值抑制
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

use std::cmp::Ordering;

use itertools::Itertools;
use tracing::debug;

use crate::{
  bbox,
  error::{PostprocessError, Result},
  model::{DetectItem, DetectResult},
};

/// 分数降序，分数相同时原始索引小的在前
fn rank(candidates: &[DetectItem], l: usize, r: usize) -> Ordering {
  candidates[r]
    .score
    .total_cmp(&candidates[l].score)
    .then(l.cmp(&r))
}

/// 按类别独立进行的贪心非极大值抑制
///
/// 不同类别的候选框互不抑制。输出按分数降序排列，最多 `max_detections` 个。
pub fn nms(
  candidates: &[DetectItem],
  iou_threshold: f32,
  max_detections: usize,
) -> Result<DetectResult> {
  if !(0.0..=1.0).contains(&iou_threshold) {
    return Err(PostprocessError::invalid_config(format!(
      "NMS IoU 阈值必须在 [0, 1] 之间, 实际为 {}",
      iou_threshold
    )));
  }

  if max_detections == 0 {
    return Err(PostprocessError::invalid_config("最大检测数量必须为正整数"));
  }

  // 按类别分组，组内保持全局排序
  let groups = (0..candidates.len())
    .sorted_by(|&l, &r| rank(candidates, l, r))
    .into_group_map_by(|&i| candidates[i].class_id);

  let mut kept = Vec::new();
  for (class_id, group) in groups {
    let mut selected: Vec<usize> = Vec::new();
    for i in group {
      // 单个类别保留超过 max_detections 个也不会进入最终结果
      if selected.len() >= max_detections {
        break;
      }

      let suppressed = selected
        .iter()
        .any(|&k| bbox::iou(&candidates[k].bbox, &candidates[i].bbox) > iou_threshold);
      if !suppressed {
        selected.push(i);
      }
    }
    debug!("类别 {}: 保留 {} 个", class_id, selected.len());
    kept.extend(selected);
  }

  kept.sort_by(|&l, &r| rank(candidates, l, r));
  kept.truncate(max_detections);

  Ok(
    kept
      .into_iter()
      .map(|i| candidates[i].clone())
      .collect::<Vec<_>>()
      .into(),
  )
}
