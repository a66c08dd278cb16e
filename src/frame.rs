// 该文件是 Liuguang （流光） 项目的一部分。
// src/frame.rs - NHWC 帧定义
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

use std::sync::Arc;

use image::RgbImage;
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

pub trait AsNhwcFrame {
  fn as_nhwc(&self) -> &[u8];
}

pub trait ToRgbImage {
  fn to_rgb_image(&self) -> RgbImage;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 已解码的 RGB 帧，像素按 HWC 排列
///
/// 像素存储在 `Arc` 中，克隆不会复制数据。帧一旦创建便不再修改，
/// 视频源前进时会发布一个新的帧来替换旧帧。
#[derive(Debug, Clone)]
pub struct RgbFrame {
  width: u32,
  height: u32,
  data: Arc<[u8]>,
  index: u64,
  timestamp_ms: u64,
}

impl RgbFrame {
  pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      data: data.into(),
      index: 0,
      timestamp_ms: 0,
    })
  }

  /// 从 BGR 排列的数据构造帧
  pub fn from_bgr(width: u32, height: u32, bgr: &[u8]) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if bgr.len() < expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: bgr.len(),
      });
    }

    let data = bgr[..expected]
      .chunks_exact(RGB_CHANNELS)
      .flat_map(|px| [px[2], px[1], px[0]])
      .collect();
    Self::new(width, height, data)
  }

  pub fn with_sequence(mut self, index: u64, timestamp_ms: u64) -> Self {
    self.index = index;
    self.timestamp_ms = timestamp_ms;
    self
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn dimensions(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  pub fn timestamp_ms(&self) -> u64 {
    self.timestamp_ms
  }

  /// 宽或高为零的帧不含可用像素
  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }
}

impl AsNhwcFrame for RgbFrame {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

impl ToRgbImage for RgbFrame {
  fn to_rgb_image(&self) -> RgbImage {
    RgbImage::from_fn(self.width, self.height, |x, y| {
      let offset = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
      image::Rgb([self.data[offset], self.data[offset + 1], self.data[offset + 2]])
    })
  }
}

impl From<RgbImage> for RgbFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      data: image.into_raw().into(),
      index: 0,
      timestamp_ms: 0,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_checks_length() {
    let err = RgbFrame::new(2, 2, vec![0; 11]).unwrap_err();
    assert_eq!(
      err,
      FrameError::LengthMismatch {
        expected: 12,
        actual: 11
      }
    );
  }

  #[test]
  fn from_bgr_swaps_channels() {
    let frame = RgbFrame::from_bgr(2, 1, &[1, 2, 3, 4, 5, 6]).unwrap();
    assert_eq!(frame.as_nhwc(), &[3, 2, 1, 6, 5, 4]);
  }

  #[test]
  fn clone_shares_pixels() {
    let frame = RgbFrame::new(1, 1, vec![9, 8, 7]).unwrap().with_sequence(4, 100);
    let copy = frame.clone();
    assert!(std::ptr::eq(frame.as_nhwc(), copy.as_nhwc()));
    assert_eq!(copy.index(), 4);
    assert_eq!(copy.timestamp_ms(), 100);
  }

  #[test]
  fn zero_sized_frame_is_empty() {
    let frame = RgbFrame::new(0, 10, Vec::new()).unwrap();
    assert!(frame.is_empty());
  }

  #[test]
  fn from_rgb_image_keeps_layout() {
    let image = RgbImage::from_fn(2, 1, |x, _| image::Rgb([x as u8, 10, 20]));
    let frame = RgbFrame::from(image);
    assert_eq!(frame.dimensions(), (2, 1));
    assert_eq!(frame.as_nhwc(), &[0, 10, 20, 1, 10, 20]);
    assert_eq!(frame.to_rgb_image().get_pixel(1, 0), &image::Rgb([1, 10, 20]));
  }
}
