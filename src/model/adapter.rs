// 该文件是 Liuguang （流光） 项目的一部分。
// src/model/adapter.rs - SSD 风格检测模型适配器
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

use tracing::{debug, error};

use crate::{
  model::{InferenceError, Model, RawOutputs},
  tensor::{Ledger, Tensor},
};

const BOX_COORDS: usize = 4;

/// 推理后端：输入 NHWC 字节，输出若干个扁平的 `f32` 张量
pub trait Backend {
  fn run(&mut self, input: &[u8], shape: &[usize]) -> Result<Vec<Vec<f32>>, InferenceError>;

  fn input_size(&self) -> Option<(u32, u32)> {
    None
  }
}

/// 将后端输出整理成 [`RawOutputs`]
///
/// 后端给出的输出顺序不一定固定，这里按元素个数判断哪个是类别得分
/// `[N, C]`，哪个是候选框 `[N, 4]`。
pub struct SsdAdapter<B> {
  backend: B,
  num_classes: usize,
}

impl<B: Backend> SsdAdapter<B> {
  pub fn new(backend: B, num_classes: usize) -> Self {
    Self {
      backend,
      num_classes,
    }
  }

  pub fn num_classes(&self) -> usize {
    self.num_classes
  }
}

/// 两个扁平张量若能组成 `scores[N, C]` 与 `boxes[N, 4]`，返回候选框数量 N
fn box_count(scores: &[f32], boxes: &[f32], num_classes: usize) -> Option<usize> {
  if num_classes == 0 || scores.len() % num_classes != 0 || boxes.len() % BOX_COORDS != 0 {
    return None;
  }
  let n = boxes.len() / BOX_COORDS;
  (scores.len() / num_classes == n).then_some(n)
}

/// 根据张量大小匹配得分与候选框输出
/// 返回 (scores, boxes, N) 元组，如果大小不匹配则返回 None
fn match_score_box_outputs(
  first: Vec<f32>,
  second: Vec<f32>,
  num_classes: usize,
) -> Option<(Vec<f32>, Vec<f32>, usize)> {
  if let Some(n) = box_count(&first, &second, num_classes) {
    debug!("输出顺序正常 - 索引 0 是得分，索引 1 是候选框");
    Some((first, second, n))
  } else if let Some(n) = box_count(&second, &first, num_classes) {
    debug!("输出顺序交换 - 索引 0 是候选框，索引 1 是得分");
    Some((second, first, n))
  } else {
    error!(
      "输出大小不匹配 - 张量1: {}, 张量2: {}, 类别数: {}",
      first.len(),
      second.len(),
      num_classes
    );
    None
  }
}

impl<B: Backend> Model for SsdAdapter<B> {
  fn infer(&mut self, input: &Tensor<u8>, ledger: &Ledger) -> Result<RawOutputs, InferenceError> {
    debug!("执行模型推理: 输入形状 {:?}", input.shape());
    let outputs = self.backend.run(input.data(), input.shape())?;

    let actual = outputs.len();
    let mut outputs = outputs.into_iter();
    let (Some(first), Some(second)) = (outputs.next(), outputs.next()) else {
      return Err(InferenceError::MissingOutput {
        expected: 2,
        actual,
      });
    };

    let (first_len, second_len) = (first.len(), second.len());
    let (scores, boxes, n) = match_score_box_outputs(first, second, self.num_classes)
      .ok_or_else(|| {
        InferenceError::ShapeMismatch(format!(
          "无法从大小为 {} 与 {} 的输出中识别 [N, {}] 得分与 [N, 4] 候选框",
          first_len, second_len, self.num_classes
        ))
      })?;
    debug!("模型输出 {} 个候选框", n);

    let scores = ledger.alloc(&[1, n, self.num_classes], scores)?;
    let boxes = ledger.alloc(&[1, n, BOX_COORDS], boxes)?;
    Ok(RawOutputs { scores, boxes })
  }

  fn input_size(&self) -> Option<(u32, u32)> {
    self.backend.input_size()
  }
}
