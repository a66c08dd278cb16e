// 该文件是 Liuguang （流光） 项目的一部分。
// src/reduce.rs - 检测结果归约：逐框取最优类别并进行非极大值抑制
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
use tracing::{debug, trace};

use crate::{
  model::{InferenceError, RawOutputs, WithLabel},
  tensor::{Ledger, Tensor},
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
  #[error("得分阈值必须位于 [0, 1]: {0}")]
  ScoreThreshold(f32),
  #[error("IoU 阈值必须位于 [0, 1]: {0}")]
  IouThreshold(f32),
  #[error("最大检测数量必须至少为 1: {0}")]
  MaxDetections(usize),
  #[error("高斯衰减的 sigma 必须大于 0: {0}")]
  Sigma(f32),
}

/// 软抑制的衰减函数
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SoftDecay {
  /// `f = 1 - IoU`
  Linear,
  /// `f = exp(-IoU² / sigma)`
  Gaussian { sigma: f32 },
}

impl SoftDecay {
  pub fn weight(&self, iou: f32) -> f32 {
    match *self {
      SoftDecay::Linear => (1.0 - iou).max(0.0),
      SoftDecay::Gaussian { sigma } => (-(iou * iou) / sigma).exp(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SuppressionMode {
  /// 重叠框直接移除
  Hard,
  /// 重叠框按 IoU 衰减得分后重新排序
  Soft(SoftDecay),
}

/// 归约配置，所有字段都必须显式给出
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReduceConfig {
  score_threshold: f32,
  iou_threshold: f32,
  max_detections: usize,
  mode: SuppressionMode,
}

impl ReduceConfig {
  pub fn new(
    score_threshold: f32,
    iou_threshold: f32,
    max_detections: usize,
    mode: SuppressionMode,
  ) -> Result<Self, ConfigError> {
    if !(0.0..=1.0).contains(&score_threshold) {
      return Err(ConfigError::ScoreThreshold(score_threshold));
    }
    if !(0.0..=1.0).contains(&iou_threshold) {
      return Err(ConfigError::IouThreshold(iou_threshold));
    }
    if max_detections == 0 {
      return Err(ConfigError::MaxDetections(max_detections));
    }
    if let SuppressionMode::Soft(SoftDecay::Gaussian { sigma }) = mode
      && (sigma.is_nan() || sigma <= 0.0)
    {
      return Err(ConfigError::Sigma(sigma));
    }

    Ok(Self {
      score_threshold,
      iou_threshold,
      max_detections,
      mode,
    })
  }

  pub fn score_threshold(&self) -> f32 {
    self.score_threshold
  }

  pub fn iou_threshold(&self) -> f32 {
    self.iou_threshold
  }

  pub fn max_detections(&self) -> usize {
    self.max_detections
  }

  pub fn mode(&self) -> SuppressionMode {
    self.mode
  }
}

/// 像素坐标下的矩形，`(x, y)` 为左上角
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl PixelRect {
  /// 将归一化的 `(y1, x1, y2, x2)` 映射到帧尺寸
  ///
  /// 起点坐标先截断到 0，宽高以远端边为准计算。
  pub fn denormalize(bbox: [f32; 4], (width, height): (u32, u32)) -> Self {
    let [y1, x1, y2, x2] = bbox;
    let (w, h) = (width as f32, height as f32);
    let x = x1.max(0.0) * w;
    let y = y1.max(0.0) * h;
    Self {
      x,
      y,
      width: (x2 * w - x).max(0.0),
      height: (y2 * h - y).max(0.0),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub class_id: u32,
  pub label: String,
  /// 抑制后的有效得分
  pub score: f32,
  /// 归一化坐标 `(y1, x1, y2, x2)`
  pub bbox: [f32; 4],
  pub rect: PixelRect,
  /// 在模型输出中的候选框编号
  pub box_index: usize,
}

/// 按选择顺序（有效得分降序）排列的检测结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
  pub items: Box<[Detection]>,
}

impl DetectionResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }
}

impl<'a> IntoIterator for &'a DetectionResult {
  type Item = &'a Detection;
  type IntoIter = std::slice::Iter<'a, Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}

/// 每个候选框的最优类别、最优得分与压缩后的坐标
pub struct CandidateSet {
  classes: Tensor<u32>,
  scores: Tensor<f32>,
  boxes: Tensor<f32>,
}

impl CandidateSet {
  pub fn from_raw(raw: &RawOutputs, ledger: &Ledger) -> Result<Self, InferenceError> {
    let scores_shape = raw.scores.shape();
    let boxes_shape = raw.boxes.shape();
    let (n, c) = match (scores_shape, boxes_shape) {
      ([1, n, c], [1, m, 4]) if n == m => (*n, *c),
      _ => {
        return Err(InferenceError::ShapeMismatch(format!(
          "得分形状 {:?} 与候选框形状 {:?} 不匹配",
          scores_shape, boxes_shape
        )));
      }
    };
    if n > 0 && c == 0 {
      return Err(InferenceError::ShapeMismatch(format!(
        "{} 个候选框没有任何类别得分",
        n
      )));
    }

    let (classes, scores): (Vec<u32>, Vec<f32>) = raw
      .scores
      .data()
      .chunks_exact(c.max(1))
      .take(n)
      .map(top1)
      .unzip();

    let classes = ledger.alloc(&[n], classes)?;
    let scores = ledger.alloc(&[n], scores)?;
    let boxes = raw.boxes.squeeze();
    trace!("候选集: {} 个框, {} 个类别", n, c);

    Ok(Self {
      classes,
      scores,
      boxes,
    })
  }

  pub fn len(&self) -> usize {
    self.scores.len()
  }

  pub fn is_empty(&self) -> bool {
    self.scores.is_empty()
  }

  pub fn scores(&self) -> &[f32] {
    self.scores.data()
  }

  pub fn class_of(&self, index: usize) -> Option<u32> {
    self.classes.data().get(index).copied()
  }

  pub fn box_of(&self, index: usize) -> Option<[f32; 4]> {
    match self.boxes.data().get(index * 4..index * 4 + 4)? {
      &[y1, x1, y2, x2] => Some([y1, x1, y2, x2]),
      _ => None,
    }
  }

  pub fn release(self) {
    self.classes.release();
    self.scores.release();
    self.boxes.release();
  }
}

/// 取一行类别得分中的最大值，得分相同时取编号最小的类别
fn top1(row: &[f32]) -> (u32, f32) {
  let mut best = (0u32, f32::NEG_INFINITY);
  for (class_id, &score) in row.iter().enumerate() {
    if score > best.1 {
      best = (class_id as u32, score);
    }
  }
  best
}

/// 计算两个 `(y1, x1, y2, x2)` 框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let y1 = a[0].max(b[0]);
  let x1 = a[1].max(b[1]);
  let y2 = a[2].min(b[2]);
  let x2 = a[3].min(b[3]);

  let intersection = (y2 - y1).max(0.0) * (x2 - x1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 非极大值抑制，返回 `(框编号, 有效得分)`，按选择顺序排列
///
/// 每轮选出剩余得分最高的框；得分相同时编号小的优先。
pub fn suppress(boxes: &[[f32; 4]], scores: &[f32], config: &ReduceConfig) -> Vec<(usize, f32)> {
  let threshold = config.score_threshold;
  let mut remaining: Vec<(usize, f32)> = scores
    .iter()
    .copied()
    .enumerate()
    .filter(|&(_, score)| score >= threshold)
    .collect();

  let mut selected = Vec::new();
  while selected.len() < config.max_detections && !remaining.is_empty() {
    let mut best = 0;
    for (pos, &(_, score)) in remaining.iter().enumerate().skip(1) {
      if score > remaining[best].1 {
        best = pos;
      }
    }
    let (index, score) = remaining.remove(best);
    selected.push((index, score));

    let chosen = &boxes[index];
    match config.mode {
      SuppressionMode::Hard => {
        remaining.retain(|&(other, _)| iou(chosen, &boxes[other]) < config.iou_threshold);
      }
      SuppressionMode::Soft(decay) => {
        for (other, score) in remaining.iter_mut() {
          let overlap = iou(chosen, &boxes[*other]);
          if overlap >= config.iou_threshold {
            *score *= decay.weight(overlap);
          }
        }
        remaining.retain(|&(_, score)| score >= threshold);
      }
    }
  }

  selected
}

/// 将原始输出归约为检测结果
///
/// `raw` 与中间产生的候选集在返回前全部释放，无论成功与否。
pub fn reduce<L: WithLabel>(
  raw: RawOutputs,
  frame_dims: (u32, u32),
  config: &ReduceConfig,
  ledger: &Ledger,
) -> Result<DetectionResult, InferenceError> {
  let candidates = CandidateSet::from_raw(&raw, ledger);
  raw.release();
  let candidates = candidates?;

  let boxes: Vec<[f32; 4]> = (0..candidates.len())
    .filter_map(|i| candidates.box_of(i))
    .collect();
  if boxes.len() != candidates.len() {
    let found = boxes.len();
    let expected = candidates.len();
    candidates.release();
    return Err(InferenceError::ShapeMismatch(format!(
      "候选框坐标数量 {} 与候选框数量 {} 不一致",
      found, expected
    )));
  }

  let selected = suppress(&boxes, candidates.scores(), config);
  let items: Vec<Detection> = selected
    .into_iter()
    .map(|(index, score)| {
      let class_id = candidates.class_of(index).unwrap_or_default();
      let bbox = boxes[index];
      Detection {
        class_id,
        label: L::from_label_id(class_id).to_label_str(),
        score,
        bbox,
        rect: PixelRect::denormalize(bbox, frame_dims),
        box_index: index,
      }
    })
    .collect();
  candidates.release();

  debug!("归约得到 {} 个检测结果", items.len());
  Ok(DetectionResult {
    items: items.into_boxed_slice(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::CocoLabel;

  const HARD: SuppressionMode = SuppressionMode::Hard;
  const SOFT: SuppressionMode = SuppressionMode::Soft(SoftDecay::Linear);

  /// 三个框：0 与 1 的 IoU 为 0.7，2 与其他框不重叠
  fn scenario(ledger: &Ledger, scores: [f32; 3]) -> RawOutputs {
    let boxes = vec![
      0.0, 0.0, 0.5, 0.5, //
      0.0, 0.0, 0.35, 0.5, //
      0.6, 0.6, 0.9, 0.9,
    ];
    // 第二列作为类别 1 的得分，第一列较低
    let scores = scores.iter().flat_map(|&s| [s / 2.0, s]).collect();
    RawOutputs {
      scores: ledger.alloc(&[1, 3, 2], scores).unwrap(),
      boxes: ledger.alloc(&[1, 3, 4], boxes).unwrap(),
    }
  }

  fn run(
    raw: RawOutputs,
    score: f32,
    mode: SuppressionMode,
    ledger: &Ledger,
  ) -> DetectionResult {
    let config = ReduceConfig::new(score, 0.5, 20, mode).unwrap();
    reduce::<CocoLabel>(raw, (100, 100), &config, ledger).unwrap()
  }

  fn indices(result: &DetectionResult) -> Vec<usize> {
    result.iter().map(|d| d.box_index).collect()
  }

  #[test]
  fn scenario_boxes_overlap_as_described() {
    let a = [0.0, 0.0, 0.5, 0.5];
    let b = [0.0, 0.0, 0.35, 0.5];
    assert!((iou(&a, &b) - 0.7).abs() < 1e-5);
  }

  #[test]
  fn hard_mode_keeps_only_the_best_box() {
    let ledger = Ledger::new();
    let result = run(scenario(&ledger, [0.9, 0.85, 0.2]), 0.4, HARD, &ledger);

    assert_eq!(indices(&result), vec![0]);
    assert_eq!(result.items[0].score, 0.9);
    assert_eq!(result.items[0].class_id, 1);
    assert_eq!(result.items[0].label, "bicycle");
    assert_eq!(ledger.live(), 0);
  }

  #[test]
  fn soft_linear_decays_overlapping_box_below_threshold() {
    let ledger = Ledger::new();
    let result = run(scenario(&ledger, [0.9, 0.85, 0.2]), 0.4, SOFT, &ledger);
    assert_eq!(indices(&result), vec![0]);
    assert_eq!(ledger.live(), 0);
  }

  #[test]
  fn soft_decayed_box_is_reranked() {
    let ledger = Ledger::new();
    let result = run(scenario(&ledger, [0.9, 0.85, 0.3]), 0.2, SOFT, &ledger);

    // 框 1 衰减为 0.85 * 0.3 = 0.255，排到框 2 (0.3) 之后
    assert_eq!(indices(&result), vec![0, 2, 1]);
    assert!((result.items[2].score - 0.255).abs() < 1e-4);
  }

  #[test]
  fn gaussian_decay_is_monotonic() {
    let decay = SoftDecay::Gaussian { sigma: 0.5 };
    assert_eq!(decay.weight(0.0), 1.0);
    assert!(decay.weight(0.3) > decay.weight(0.7));
    assert!(decay.weight(1.0) > 0.0);
    assert_eq!(SoftDecay::Linear.weight(1.0), 0.0);
  }

  #[test]
  fn soft_gaussian_reranks_and_respects_threshold() {
    let gaussian = SuppressionMode::Soft(SoftDecay::Gaussian { sigma: 0.5 });
    let decayed = 0.85 * (-0.49f32 / 0.5).exp();

    let ledger = Ledger::new();
    let result = run(scenario(&ledger, [0.9, 0.85, 0.35]), 0.2, gaussian, &ledger);
    assert_eq!(indices(&result), vec![0, 2, 1]);
    assert!((result.items[2].score - decayed).abs() < 1e-4);

    let result = run(scenario(&ledger, [0.9, 0.85, 0.35]), 0.35, gaussian, &ledger);
    assert_eq!(indices(&result), vec![0, 2]);
    assert!(result.iter().all(|d| d.score >= 0.35));
    assert_eq!(ledger.live(), 0);
  }

  #[test]
  fn wide_gaussian_keeps_overlapping_box_ahead() {
    let config = ReduceConfig::new(
      0.3,
      0.5,
      20,
      SuppressionMode::Soft(SoftDecay::Gaussian { sigma: 10.0 }),
    )
    .unwrap();
    let boxes = [
      [0.0, 0.0, 0.5, 0.5],
      [0.0, 0.0, 0.35, 0.5],
      [0.6, 0.6, 0.9, 0.9],
    ];
    let selected = suppress(&boxes, &[0.9, 0.85, 0.35], &config);

    let order: Vec<_> = selected.iter().map(|&(i, _)| i).collect();
    assert_eq!(order, vec![0, 1, 2]);
    assert!((selected[1].1 - 0.85 * (-0.049f32).exp()).abs() < 1e-4);
    assert_eq!(selected[2].1, 0.35);
  }

  #[test]
  fn zero_boxes_give_an_empty_result() {
    let ledger = Ledger::new();
    let raw = RawOutputs {
      scores: ledger.alloc(&[1, 0, 90], Vec::new()).unwrap(),
      boxes: ledger.alloc(&[1, 0, 4], Vec::new()).unwrap(),
    };
    let result = run(raw, 0.4, HARD, &ledger);
    assert!(result.is_empty());
    assert_eq!(ledger.live(), 0);
  }

  #[test]
  fn all_below_threshold_is_empty_not_an_error() {
    let ledger = Ledger::new();
    let result = run(scenario(&ledger, [0.3, 0.2, 0.1]), 0.4, SOFT, &ledger);
    assert!(result.is_empty());
  }

  #[test]
  fn result_is_capped_at_max_detections() {
    let ledger = Ledger::new();
    let n = 10;
    let boxes = (0..n)
      .flat_map(|i| {
        let y = i as f32 * 0.1;
        [y, 0.0, y + 0.05, 0.05]
      })
      .collect();
    let raw = RawOutputs {
      scores: ledger.alloc(&[1, n, 1], vec![0.9; n]).unwrap(),
      boxes: ledger.alloc(&[1, n, 4], boxes).unwrap(),
    };
    let config = ReduceConfig::new(0.4, 0.5, 3, HARD).unwrap();
    let result = reduce::<CocoLabel>(raw, (10, 10), &config, &ledger).unwrap();

    assert_eq!(result.len(), 3);
    assert_eq!(indices(&result), vec![0, 1, 2]);
    assert_eq!(ledger.live(), 0);
  }

  #[test]
  fn ties_resolve_to_lowest_box_index() {
    let ledger = Ledger::new();
    let result = run(scenario(&ledger, [0.8, 0.8, 0.8]), 0.4, HARD, &ledger);
    assert_eq!(indices(&result), vec![0, 2]);
  }

  #[test]
  fn top1_prefers_first_class_on_ties() {
    assert_eq!(top1(&[0.1, 0.7, 0.7]), (1, 0.7));
    assert_eq!(top1(&[0.5]), (0, 0.5));
  }

  #[test]
  fn hard_mode_results_never_overlap_past_threshold() {
    let boxes: Vec<[f32; 4]> = (0..12)
      .map(|i| {
        let o = (i % 4) as f32 * 0.05 + (i / 4) as f32 * 0.3;
        [o, o, o + 0.2, o + 0.2]
      })
      .collect();
    let scores: Vec<f32> = (0..12).map(|i| 1.0 - i as f32 * 0.05).collect();
    let config = ReduceConfig::new(0.1, 0.3, 20, HARD).unwrap();

    let selected = suppress(&boxes, &scores, &config);
    assert!(!selected.is_empty());
    for (i, &(a, sa)) in selected.iter().enumerate() {
      assert!(sa >= 0.1);
      for &(b, _) in &selected[i + 1..] {
        assert!(iou(&boxes[a], &boxes[b]) < 0.3);
      }
    }
  }

  #[test]
  fn denormalize_clamps_start_and_keeps_far_edge() {
    let rect = PixelRect::denormalize([-0.1, -0.2, 0.5, 0.5], (200, 100));
    assert_eq!(rect.x, 0.0);
    assert_eq!(rect.y, 0.0);
    assert_eq!(rect.width, 100.0);
    assert_eq!(rect.height, 50.0);

    let rect = PixelRect::denormalize([0.25, 0.5, 0.75, 1.0], (200, 100));
    assert_eq!((rect.x, rect.y, rect.width, rect.height), (100.0, 25.0, 100.0, 50.0));
  }

  #[test]
  fn reserved_class_ids_use_placeholder_label() {
    let ledger = Ledger::new();
    let mut scores = vec![0.0; 90];
    scores[11] = 0.95;
    let raw = RawOutputs {
      scores: ledger.alloc(&[1, 1, 90], scores).unwrap(),
      boxes: ledger.alloc(&[1, 1, 4], vec![0.1, 0.1, 0.2, 0.2]).unwrap(),
    };
    let result = run(raw, 0.4, HARD, &ledger);
    assert_eq!(result.items[0].class_id, 11);
    assert_eq!(result.items[0].label, "unused");
  }

  #[test]
  fn mismatched_shapes_fail_and_release_everything() {
    let ledger = Ledger::new();
    let raw = RawOutputs {
      scores: ledger.alloc(&[1, 2, 3], vec![0.5; 6]).unwrap(),
      boxes: ledger.alloc(&[1, 3, 4], vec![0.0; 12]).unwrap(),
    };
    let config = ReduceConfig::new(0.4, 0.5, 20, HARD).unwrap();
    let err = reduce::<CocoLabel>(raw, (10, 10), &config, &ledger).unwrap_err();
    assert!(matches!(err, InferenceError::ShapeMismatch(_)));
    assert!(ledger.snapshot().is_balanced());
  }

  #[test]
  fn config_rejects_out_of_range_values() {
    assert_eq!(
      ReduceConfig::new(1.5, 0.5, 20, HARD),
      Err(ConfigError::ScoreThreshold(1.5))
    );
    assert_eq!(
      ReduceConfig::new(0.4, -0.1, 20, HARD),
      Err(ConfigError::IouThreshold(-0.1))
    );
    assert_eq!(
      ReduceConfig::new(0.4, 0.5, 0, HARD),
      Err(ConfigError::MaxDetections(0))
    );
    assert_eq!(
      ReduceConfig::new(
        0.4,
        0.5,
        20,
        SuppressionMode::Soft(SoftDecay::Gaussian { sigma: 0.0 })
      ),
      Err(ConfigError::Sigma(0.0))
    );
    assert!(ReduceConfig::new(f32::NAN, 0.5, 20, HARD).is_err());
  }
}
