// 该文件是 Liuguang （流光） 项目的一部分。
// src/model.rs - 模型
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
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  tensor::{Ledger, Tensor, TensorError},
};

pub mod label;
pub use self::label::{COCO_LABELS, CocoLabel, PLACEHOLDER_LABEL, UNKNOWN_LABEL, WithLabel};

mod adapter;
pub use self::adapter::{Backend, SsdAdapter};

mod replay;
pub use self::replay::ReplayBackend;

#[cfg(feature = "rknpu")]
mod rknn;
#[cfg(feature = "rknpu")]
pub use self::rknn::RknnBackend;

/// 推理得到的原始输出
///
/// - `scores`: 形状 `[1, N, C]`，每个候选框在每个类别上的得分
/// - `boxes`: 形状 `[1, N, 4]`，归一化坐标 `(y1, x1, y2, x2)`
#[derive(Debug)]
pub struct RawOutputs {
  pub scores: Tensor<f32>,
  pub boxes: Tensor<f32>,
}

impl RawOutputs {
  pub fn num_boxes(&self) -> usize {
    self.boxes.len() / 4
  }

  pub fn num_classes(&self) -> usize {
    self.scores.shape().last().copied().unwrap_or(0)
  }

  pub fn release(self) {
    self.scores.release();
    self.boxes.release();
  }
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("模型加载错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("模型记录解析错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("模型无效: {0}")]
  Invalid(String),
  #[error("模型路径错误: {0}")]
  SchemeMismatch(String),
  #[cfg(feature = "rknpu")]
  #[error("RKNN 错误: {0}")]
  Rknn(rknpu::Error),
}

#[cfg(feature = "rknpu")]
impl From<rknpu::Error> for ModelLoadError {
  fn from(err: rknpu::Error) -> Self {
    ModelLoadError::Rknn(err)
  }
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("推理后端错误: {0}")]
  Backend(String),
  #[error("模型输出数量不足: 期望至少 {expected} 个, 实际 {actual} 个")]
  MissingOutput { expected: usize, actual: usize },
  #[error("模型输出形状不匹配: {0}")]
  ShapeMismatch(String),
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
}

/// 推理引擎
///
/// `infer` 接收 `&mut self`，同一模型不可能同时执行两次推理。
/// 模型本身在整个处理循环期间保持加载，不随单帧释放。
pub trait Model {
  fn infer(&mut self, input: &Tensor<u8>, ledger: &Ledger) -> Result<RawOutputs, InferenceError>;

  /// 模型要求的固定输入尺寸 `(width, height)`，`None` 表示接受任意尺寸
  fn input_size(&self) -> Option<(u32, u32)> {
    None
  }
}

impl<M: Model + ?Sized> Model for Box<M> {
  fn infer(&mut self, input: &Tensor<u8>, ledger: &Ledger) -> Result<RawOutputs, InferenceError> {
    (**self).infer(input, ledger)
  }

  fn input_size(&self) -> Option<(u32, u32)> {
    (**self).input_size()
  }
}

/// 根据 URL 选择推理后端
///
/// - `replay:///outputs.json`（类别数默认取记录中得分矩阵的列数）
/// - `rknn:///model.rknn?width=300&height=300&classes=90`（需要 `rknpu` 特性）
pub enum ModelWrapper {
  Replay(SsdAdapter<ReplayBackend>),
  #[cfg(feature = "rknpu")]
  Rknn(SsdAdapter<RknnBackend>),
}

impl FromUrl for ModelWrapper {
  type Error = ModelLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let requested: Option<usize> = crate::query_value(url, "classes");

    match url.scheme() {
      ReplayBackend::SCHEME => {
        let backend = ReplayBackend::from_url(url)?;
        let classes = match (requested, backend.num_classes()) {
          (Some(requested), Some(recorded)) if requested != recorded => {
            return Err(ModelLoadError::Invalid(format!(
              "classes={} 与回放记录的得分宽度 {} 不一致",
              requested, recorded
            )));
          }
          (_, Some(recorded)) => recorded,
          (Some(requested), None) => requested,
          (None, None) => COCO_LABELS.len(),
        };
        info!("回放模型类别数: {}", classes);
        Ok(ModelWrapper::Replay(SsdAdapter::new(backend, classes)))
      }
      #[cfg(feature = "rknpu")]
      RknnBackend::SCHEME => {
        let backend = RknnBackend::from_url(url)?;
        let classes = requested.unwrap_or(COCO_LABELS.len());
        Ok(ModelWrapper::Rknn(SsdAdapter::new(backend, classes)))
      }
      scheme => Err(ModelLoadError::SchemeMismatch(format!(
        "不支持的模型方案: {}",
        scheme
      ))),
    }
  }
}

impl Model for ModelWrapper {
  fn infer(&mut self, input: &Tensor<u8>, ledger: &Ledger) -> Result<RawOutputs, InferenceError> {
    match self {
      ModelWrapper::Replay(model) => model.infer(input, ledger),
      #[cfg(feature = "rknpu")]
      ModelWrapper::Rknn(model) => model.infer(input, ledger),
    }
  }

  fn input_size(&self) -> Option<(u32, u32)> {
    match self {
      ModelWrapper::Replay(model) => model.input_size(),
      #[cfg(feature = "rknpu")]
      ModelWrapper::Rknn(model) => model.input_size(),
    }
  }
}
