// 该文件是 Liuguang （流光） 项目的一部分。
// src/preprocess.rs - 帧预处理
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

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{AsNhwcFrame, RgbFrame},
  tensor::{Ledger, Tensor, TensorError},
};

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("帧尺寸为零: {width}x{height}")]
  EmptyFrame { width: u32, height: u32 },
  #[error("像素数据不可用: 期望 {expected} 字节, 实际 {actual} 字节")]
  PixelDataUnavailable { expected: usize, actual: usize },
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
}

/// 帧到模型输入的转换
///
/// 产生的张量必须从 `ledger` 分配；失败时已分配的张量随错误一起释放。
pub trait Preprocess {
  fn to_input_buffer(&self, frame: &RgbFrame, ledger: &Ledger) -> Result<Tensor<u8>, PreprocessError>;
}

impl<P: Preprocess + ?Sized> Preprocess for Box<P> {
  fn to_input_buffer(&self, frame: &RgbFrame, ledger: &Ledger) -> Result<Tensor<u8>, PreprocessError> {
    (**self).to_input_buffer(frame, ledger)
  }
}

/// 将帧转换为批大小为 1 的 NHWC 模型输入
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
  target_size: Option<(u32, u32)>,
}

impl Preprocessor {
  pub fn new() -> Self {
    Self::default()
  }

  /// 模型要求固定输入尺寸时，先将帧缩放到 `(width, height)`
  pub fn with_target_size(mut self, target_size: Option<(u32, u32)>) -> Self {
    self.target_size = target_size;
    self
  }

  pub fn target_size(&self) -> Option<(u32, u32)> {
    self.target_size
  }
}

impl Preprocess for Preprocessor {
  /// 生成形状为 `[1, H, W, 3]` 的输入张量，不修改帧本身
  fn to_input_buffer(&self, frame: &RgbFrame, ledger: &Ledger) -> Result<Tensor<u8>, PreprocessError> {
    let (width, height) = frame.dimensions();
    if frame.is_empty() {
      return Err(PreprocessError::EmptyFrame { width, height });
    }

    let pixels = frame.as_nhwc();
    let expected = width as usize * height as usize * frame.channels();
    if pixels.len() != expected {
      return Err(PreprocessError::PixelDataUnavailable {
        expected,
        actual: pixels.len(),
      });
    }

    let (out_w, out_h, data) = match self.target_size {
      Some((tw, th)) if (tw, th) != (width, height) && tw > 0 && th > 0 => {
        let image = RgbImage::from_raw(width, height, pixels.to_vec()).ok_or(
          PreprocessError::PixelDataUnavailable {
            expected,
            actual: pixels.len(),
          },
        )?;
        let resized =
          image::imageops::resize(&image, tw, th, image::imageops::FilterType::Triangle);
        debug!("缩放输入帧 {}x{} -> {}x{}", width, height, tw, th);
        (tw, th, resized.into_raw())
      }
      _ => (width, height, pixels.to_vec()),
    };

    let shape = [1, out_h as usize, out_w as usize, frame.channels()];
    Ok(ledger.alloc(&shape, data)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn adds_batch_dimension() {
    let ledger = Ledger::new();
    let preprocessor = Preprocessor::new();
    let frame = RgbFrame::new(3, 2, (0..18).collect()).unwrap();

    let input = preprocessor.to_input_buffer(&frame, &ledger).unwrap();
    assert_eq!(input.shape(), &[1, 2, 3, 3]);
    assert_eq!(input.data(), frame.as_nhwc());
    assert_eq!(ledger.live(), 1);
  }

  #[test]
  fn zero_sized_frame_fails_without_allocating() {
    let ledger = Ledger::new();
    let preprocessor = Preprocessor::new();
    let frame = RgbFrame::new(0, 4, Vec::new()).unwrap();

    let err = preprocessor.to_input_buffer(&frame, &ledger).unwrap_err();
    assert!(matches!(
      err,
      PreprocessError::EmptyFrame {
        width: 0,
        height: 4
      }
    ));
    assert_eq!(ledger.snapshot().created, 0);
  }

  #[test]
  fn resizes_to_target_size() {
    let ledger = Ledger::new();
    let preprocessor = Preprocessor::new().with_target_size(Some((4, 4)));
    let frame = RgbFrame::new(8, 6, vec![128; 8 * 6 * 3]).unwrap();

    let input = preprocessor.to_input_buffer(&frame, &ledger).unwrap();
    assert_eq!(input.shape(), &[1, 4, 4, 3]);
    assert!(input.data().iter().all(|&v| v == 128));
    assert_eq!(frame.dimensions(), (8, 6));
  }
}
