// 该文件是 Qianli （千里眼） 项目的一部分。
// tests/pipeline.rs - 后处理流程测试
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

use ndarray::{Array3, Array4};
use rand::{Rng, SeedableRng, rngs::StdRng};

use qianli::{
  DetectItem, HeadTensor, ImageShape, LevelOutput, PostprocessConfig, PostprocessError,
  Postprocessor, decode, detection_postprocess, generate_anchors, nms,
};

fn single_anchor_config() -> PostprocessConfig {
  PostprocessConfig::default()
    .with_ratios(vec![1.0])
    .with_scales(vec![1.0])
}

fn level(cls: Array4<f32>) -> LevelOutput {
  let (n, _, h, w) = cls.dim();
  LevelOutput::new(
    HeadTensor::from(cls),
    HeadTensor::from(Array4::zeros((n, 4, h, w))),
  )
  .unwrap()
}

#[test]
fn single_level_single_detection() {
  let mut cls = Array4::<f32>::zeros((1, 1, 2, 2));
  cls[[0, 0, 0, 1]] = 0.9;

  let post = Postprocessor::new(single_anchor_config()).unwrap();
  let result = post
    .detection_postprocess(ImageShape::new(16, 16), &[level(cls)])
    .unwrap();

  assert_eq!(result.len(), 1);
  assert!((result.scores()[0] - 0.9).abs() < 1e-6);
  assert_eq!(result.boxes(), vec![[8.0, 0.0, 16.0, 8.0]]);
  assert_eq!(result.labels(), vec![0]);
}

#[test]
fn no_levels_is_empty_input() {
  assert!(matches!(
    detection_postprocess(ImageShape::new(16, 16), &[]),
    Err(PostprocessError::EmptyInput)
  ));
}

#[test]
fn overlapping_boxes_of_one_class_are_suppressed() {
  let candidates = [
    DetectItem {
      class_id: 0,
      score: 0.9,
      bbox: [0.0, 0.0, 10.0, 10.0],
    },
    DetectItem {
      class_id: 0,
      score: 0.8,
      bbox: [0.0, 0.0, 10.0, 9.0],
    },
  ];

  let result = nms(&candidates, 0.5, 100).unwrap();
  assert_eq!(result.scores(), vec![0.9]);
  assert_eq!(result.boxes(), vec![[0.0, 0.0, 10.0, 10.0]]);
}

#[test]
fn different_classes_do_not_suppress() {
  let candidates = [
    DetectItem {
      class_id: 0,
      score: 0.9,
      bbox: [0.0, 0.0, 10.0, 10.0],
    },
    DetectItem {
      class_id: 1,
      score: 0.8,
      bbox: [0.0, 0.0, 10.0, 9.0],
    },
  ];

  let result = nms(&candidates, 0.5, 100).unwrap();
  assert_eq!(result.scores(), vec![0.9, 0.8]);
  assert_eq!(result.labels(), vec![0, 1]);
}

#[test]
fn decoder_respects_threshold_and_top_n() {
  let mut rng = StdRng::seed_from_u64(7);
  let anchors = generate_anchors(16, &[1.0, 2.0, 0.5], &[1.0]).unwrap();

  for _ in 0..20 {
    let cls = Array3::from_shape_fn((3 * 4, 5, 5), |_| rng.random_range(0.0..1.0f32));
    let deltas = Array3::from_shape_fn((3 * 4, 5, 5), |_| rng.random_range(-1.0..1.0f32));
    let top_n = rng.random_range(0..20usize);
    let threshold = rng.random_range(0.1..0.9f32);

    let items = decode(cls.view(), deltas.view(), 16, threshold, top_n, &anchors).unwrap();
    assert!(items.len() <= top_n);
    assert!(items.iter().all(|d| d.score >= threshold));
    assert!(items.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(items.iter().all(|d| d.class_id < 4));
    assert!(items.iter().all(|d| {
      let [x1, y1, x2, y2] = d.bbox;
      0.0 <= x1 && x1 <= x2 && x2 <= 80.0 && 0.0 <= y1 && y1 <= y2 && y2 <= 80.0
    }));
  }
}

#[test]
fn multi_level_end_to_end() {
  let mut fine = Array4::<f32>::zeros((1, 2, 4, 4));
  fine[[0, 1, 0, 0]] = 0.9;
  let mut coarse = Array4::<f32>::zeros((1, 2, 2, 2));
  coarse[[0, 1, 0, 0]] = 0.8;
  coarse[[0, 0, 1, 1]] = 0.6;

  let post = Postprocessor::new(single_anchor_config()).unwrap();
  let result = post
    .detection_postprocess(ImageShape::new(32, 32), &[level(fine), level(coarse)])
    .unwrap();

  // IoU 为 0.25，不会互相抑制
  assert_eq!(result.scores(), vec![0.9, 0.8, 0.6]);
  assert_eq!(result.labels(), vec![1, 1, 0]);
  assert_eq!(result.boxes(), vec![
    [0.0, 0.0, 8.0, 8.0],
    [0.0, 0.0, 16.0, 16.0],
    [16.0, 16.0, 32.0, 32.0],
  ]);
  assert!(post.anchor_cache().contains(8));
  assert!(post.anchor_cache().contains(16));
}

#[test]
fn max_detections_caps_output() {
  let cls = Array4::<f32>::from_elem((1, 1, 4, 4), 0.5);

  let post = Postprocessor::new(single_anchor_config().with_max_detections(3)).unwrap();
  let result = post
    .detection_postprocess(ImageShape::new(32, 32), &[level(cls)])
    .unwrap();

  // 分数相同，按原始位置顺序保留
  assert_eq!(result.len(), 3);
  assert_eq!(result.boxes(), vec![
    [0.0, 0.0, 8.0, 8.0],
    [8.0, 0.0, 16.0, 8.0],
    [16.0, 0.0, 24.0, 8.0],
  ]);
}

#[cfg(feature = "json_io")]
#[test]
fn head_dump_to_json_file() {
  use qianli::{
    LabelMap,
    input::HeadDumpInput,
    output::JsonOutput,
    task::{OneShotTask, Task},
  };

  let dir = tempfile::tempdir().unwrap();
  let input_path = dir.path().join("head.json");
  let output_path = dir.path().join("detections.json");
  std::fs::write(
    &input_path,
    r#"{
      "image_shape": [16, 16],
      "levels": [
        {
          "cls": { "shape": [1, 2, 2, 2], "data": [0, 0, 0, 0, 0, 0.9, 0, 0] },
          "box": { "shape": [1, 4, 2, 2], "data": [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0] }
        }
      ]
    }"#,
  )
  .unwrap();

  let post = Postprocessor::new(single_anchor_config()).unwrap();
  let input = HeadDumpInput::open(&input_path).unwrap();
  let output = JsonOutput::new(Some(output_path.clone()), LabelMap::coco())
    .with_original_shape(Some(ImageShape::new(32, 32)));
  OneShotTask.run_task(input, &post, output).unwrap();

  let written: serde_json::Value =
    serde_json::from_str(&std::fs::read_to_string(&output_path).unwrap()).unwrap();
  let records = written[0].as_array().unwrap();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0]["label"], "bicycle");
  assert_eq!(records[0]["class_id"], 1);
  assert_eq!(records[0]["bbox"], serde_json::json!([16.0, 0.0, 32.0, 16.0]));
}
