// 该文件是 Liuguang （流光） 项目的一部分。
// src/model/replay.rs - 回放已记录的模型输出
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

//! 回放后端读取预先记录的原始输出，不依赖任何推理硬件。
//!
//! 记录文件为 JSON，既可以是单帧：
//!
//! ```json
//! { "scores": [[0.9, 0.1], [0.2, 0.7]], "boxes": [[0.1, 0.1, 0.4, 0.4], [0.5, 0.5, 0.9, 0.9]] }
//! ```
//!
//! 也可以是多帧 `{ "frames": [ {...}, {...} ] }`，推理时按顺序循环使用。

use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decoded_path,
  model::{Backend, InferenceError, ModelLoadError},
  query_value,
};

#[derive(Debug, Clone, PartialEq)]
struct RecordedFrame {
  scores: Vec<f32>,
  boxes: Vec<f32>,
  classes: Option<usize>,
}

#[derive(Debug)]
pub struct ReplayBackend {
  frames: Vec<RecordedFrame>,
  cursor: usize,
  classes: Option<usize>,
  input_size: Option<(u32, u32)>,
}

impl FromUrlWithScheme for ReplayBackend {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayBackend {
  type Error = ModelLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelLoadError::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let path = decoded_path(url);
    info!("加载回放记录: {}", path);
    let text = std::fs::read_to_string(&path)?;

    let mut backend = Self::from_json(&text)?;
    if let (Some(width), Some(height)) = (query_value(url, "width"), query_value(url, "height")) {
      backend.input_size = Some((width, height));
    }
    Ok(backend)
  }
}

impl ReplayBackend {
  pub fn from_json(text: &str) -> Result<Self, ModelLoadError> {
    let value: Value = serde_json::from_str(text)?;

    let frames = match value.get("frames") {
      Some(Value::Array(frames)) => frames
        .iter()
        .enumerate()
        .map(|(i, frame)| parse_frame(frame).map_err(|e| invalid(&format!("第 {} 帧: {}", i, e))))
        .collect::<Result<Vec<_>, _>>()?,
      Some(_) => return Err(invalid("frames 必须是数组")),
      None => vec![parse_frame(&value).map_err(|e| invalid(&e))?],
    };

    if frames.is_empty() {
      return Err(invalid("回放记录不含任何帧"));
    }

    let mut classes = None;
    for (i, frame) in frames.iter().enumerate() {
      match (classes, frame.classes) {
        (Some(c), Some(w)) if c != w => {
          return Err(invalid(&format!(
            "第 {} 帧得分宽度为 {}, 之前为 {}",
            i, w, c
          )));
        }
        (None, Some(w)) => classes = Some(w),
        _ => {}
      }
    }

    debug!("回放记录共 {} 帧, 类别数 {:?}", frames.len(), classes);
    Ok(Self {
      frames,
      cursor: 0,
      classes,
      input_size: None,
    })
  }

  /// 记录中得分矩阵的列数；所有帧都没有候选框时为 `None`
  pub fn num_classes(&self) -> Option<usize> {
    self.classes
  }

  pub fn len(&self) -> usize {
    self.frames.len()
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }
}

fn invalid(msg: &str) -> ModelLoadError {
  ModelLoadError::Invalid(msg.to_string())
}

fn parse_frame(value: &Value) -> Result<RecordedFrame, String> {
  let (scores, classes) = parse_matrix(value, "scores", None)?;
  let (boxes, _) = parse_matrix(value, "boxes", Some(4))?;
  Ok(RecordedFrame {
    scores,
    boxes,
    classes,
  })
}

/// 解析二维数组并按行展开，所有行长度必须一致，同时返回行宽
fn parse_matrix(
  value: &Value,
  key: &str,
  width: Option<usize>,
) -> Result<(Vec<f32>, Option<usize>), String> {
  let rows = value
    .get(key)
    .and_then(Value::as_array)
    .ok_or_else(|| format!("缺少数组字段 {}", key))?;

  let mut expected = width;
  let mut flat = Vec::new();
  for (i, row) in rows.iter().enumerate() {
    let row = row
      .as_array()
      .ok_or_else(|| format!("{}[{}] 不是数组", key, i))?;
    match expected {
      Some(w) if w != row.len() => {
        return Err(format!(
          "{}[{}] 长度为 {}, 期望 {}",
          key,
          i,
          row.len(),
          w
        ));
      }
      None => expected = Some(row.len()),
      _ => {}
    }
    for (j, v) in row.iter().enumerate() {
      let v = v
        .as_f64()
        .ok_or_else(|| format!("{}[{}][{}] 不是数值", key, i, j))?;
      flat.push(v as f32);
    }
  }
  Ok((flat, expected.filter(|_| !rows.is_empty())))
}

impl Backend for ReplayBackend {
  fn run(&mut self, input: &[u8], shape: &[usize]) -> Result<Vec<Vec<f32>>, InferenceError> {
    if input.is_empty() {
      return Err(InferenceError::Backend(format!(
        "输入为空: 形状 {:?}",
        shape
      )));
    }

    let frame = &self.frames[self.cursor % self.frames.len()];
    self.cursor = (self.cursor + 1) % self.frames.len();
    Ok(vec![frame.scores.clone(), frame.boxes.clone()])
  }

  fn input_size(&self) -> Option<(u32, u32)> {
    self.input_size
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn single_frame_record() {
    let mut backend = ReplayBackend::from_json(
      r#"{ "scores": [[0.9, 0.1], [0.2, 0.7]], "boxes": [[0.1, 0.1, 0.4, 0.4], [0.5, 0.5, 0.9, 0.9]] }"#,
    )
    .unwrap();
    assert_eq!(backend.len(), 1);

    assert_eq!(backend.num_classes(), Some(2));

    let outputs = backend.run(&[0, 0, 0], &[1, 1, 1, 3]).unwrap();
    assert_eq!(outputs[0], vec![0.9, 0.1, 0.2, 0.7]);
    assert_eq!(outputs[1].len(), 8);
  }

  #[test]
  fn class_width_skips_empty_frames() {
    let backend = ReplayBackend::from_json(
      r#"{ "frames": [
        { "scores": [], "boxes": [] },
        { "scores": [[0.1, 0.2, 0.3]], "boxes": [[0, 0, 1, 1]] }
      ] }"#,
    )
    .unwrap();
    assert_eq!(backend.num_classes(), Some(3));

    let empty = ReplayBackend::from_json(r#"{ "scores": [], "boxes": [] }"#).unwrap();
    assert_eq!(empty.num_classes(), None);
  }

  #[test]
  fn frames_must_share_class_width() {
    let err = ReplayBackend::from_json(
      r#"{ "frames": [
        { "scores": [[0.5, 0.5]], "boxes": [[0, 0, 1, 1]] },
        { "scores": [[0.5]], "boxes": [[0, 0, 1, 1]] }
      ] }"#,
    )
    .unwrap_err();
    assert!(matches!(err, ModelLoadError::Invalid(_)));
  }

  #[test]
  fn multi_frame_record_cycles() {
    let mut backend = ReplayBackend::from_json(
      r#"{ "frames": [
        { "scores": [[0.5]], "boxes": [[0, 0, 1, 1]] },
        { "scores": [], "boxes": [] }
      ] }"#,
    )
    .unwrap();

    let first = backend.run(&[1], &[1]).unwrap();
    let second = backend.run(&[1], &[1]).unwrap();
    let third = backend.run(&[1], &[1]).unwrap();
    assert_eq!(first[0], vec![0.5]);
    assert!(second[0].is_empty());
    assert_eq!(third, first);
  }

  #[test]
  fn ragged_rows_are_rejected() {
    let err = ReplayBackend::from_json(r#"{ "scores": [[0.5, 0.1], [0.2]], "boxes": [[0,0,1,1],[0,0,1,1]] }"#)
      .unwrap_err();
    assert!(matches!(err, ModelLoadError::Invalid(_)));
  }

  #[test]
  fn boxes_must_have_four_coordinates() {
    let err = ReplayBackend::from_json(r#"{ "scores": [[0.5]], "boxes": [[0, 0, 1]] }"#).unwrap_err();
    assert!(matches!(err, ModelLoadError::Invalid(_)));
  }

  #[test]
  fn malformed_json_is_a_load_error() {
    let err = ReplayBackend::from_json("{ scores: ").unwrap_err();
    assert!(matches!(err, ModelLoadError::Json(_)));
  }

  #[test]
  fn empty_input_is_an_inference_error() {
    let mut backend = ReplayBackend::from_json(r#"{ "scores": [], "boxes": [] }"#).unwrap();
    assert!(matches!(
      backend.run(&[], &[1, 0, 0, 3]),
      Err(InferenceError::Backend(_))
    ));
  }
}
