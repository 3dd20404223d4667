// 该文件是 Qianli （千里眼） 项目的一部分。
// src/bbox.rs - 边界框工具函数
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

//! 边界框统一使用 `[x_min, y_min, x_max, y_max]` 表示，单位为像素。

pub type BBox = [f32; 4];

#[inline]
pub fn width(bbox: &BBox) -> f32 {
  bbox[2] - bbox[0]
}

#[inline]
pub fn height(bbox: &BBox) -> f32 {
  bbox[3] - bbox[1]
}

/// 面积，退化框（宽或高不为正）面积为 0
#[inline]
pub fn area(bbox: &BBox) -> f32 {
  width(bbox).max(0.0) * height(bbox).max(0.0)
}

#[inline]
pub fn intersection(a: &BBox, b: &BBox) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
}

/// 计算两个边界框的 IoU
///
/// 面积为 0 的框与任何其他框的 IoU 都是 0，只有与自身比较时为 1。
pub fn iou(a: &BBox, b: &BBox) -> f32 {
  let area_a = area(a);
  let area_b = area(b);

  if area_a <= 0.0 || area_b <= 0.0 {
    return if a == b { 1.0 } else { 0.0 };
  }

  let inter = intersection(a, b);
  let union = area_a + area_b - inter;

  if union > 0.0 { inter / union } else { 0.0 }
}

/// 将边界框裁剪到 `[0, max_x] x [0, max_y]`
#[inline]
pub fn clamp(bbox: BBox, max_x: f32, max_y: f32) -> BBox {
  [
    bbox[0].clamp(0.0, max_x),
    bbox[1].clamp(0.0, max_y),
    bbox[2].clamp(0.0, max_x),
    bbox[3].clamp(0.0, max_y),
  ]
}

#[inline]
pub fn scaled(bbox: &BBox, x_scale: f32, y_scale: f32) -> BBox {
  [
    bbox[0] * x_scale,
    bbox[1] * y_scale,
    bbox[2] * x_scale,
    bbox[3] * y_scale,
  ]
}
