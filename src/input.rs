// 该文件是 Liuguang （流光） 项目的一部分。
// src/input.rs - 视频/图像帧来源
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

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use thiserror::Error;

use crate::{FromUrl, frame::RgbFrame};

/// 帧来源
///
/// `is_ready` 只有在已经有一帧完整解码的像素数据时才返回 `true`，
/// 设备已打开但尚未产出帧时必须返回 `false`。两个方法都没有副作用。
pub trait FrameSource {
  fn is_ready(&self) -> bool;
  fn current_frame(&self) -> Option<RgbFrame>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn is_ready(&self) -> bool {
    (**self).is_ready()
  }

  fn current_frame(&self) -> Option<RgbFrame> {
    (**self).current_frame()
  }
}

/// 最新帧槽位
///
/// 采集线程或解码回调通过 [`LatestFrame::publish`] 替换槽位中的帧，
/// 处理流程只读取。
#[derive(Debug, Clone)]
pub struct LatestFrame {
  slot: Arc<Mutex<Option<RgbFrame>>>,
  sequence: Arc<AtomicU64>,
  epoch: Instant,
}

impl Default for LatestFrame {
  fn default() -> Self {
    Self {
      slot: Arc::new(Mutex::new(None)),
      sequence: Arc::new(AtomicU64::new(0)),
      epoch: Instant::now(),
    }
  }
}

impl LatestFrame {
  pub fn new() -> Self {
    Self::default()
  }

  /// 发布一帧，覆盖之前的帧并为其编号
  pub fn publish(&self, frame: RgbFrame) {
    let index = self.sequence.fetch_add(1, Ordering::SeqCst);
    let timestamp_ms = self.epoch.elapsed().as_millis() as u64;
    let frame = frame.with_sequence(index, timestamp_ms);
    *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
  }

  pub fn clear(&self) {
    *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
  }

  /// 已发布的帧总数
  pub fn published(&self) -> u64 {
    self.sequence.load(Ordering::SeqCst)
  }
}

impl FrameSource for LatestFrame {
  fn is_ready(&self) -> bool {
    self
      .slot
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .as_ref()
      .is_some_and(|frame| !frame.is_empty())
  }

  fn current_frame(&self) -> Option<RgbFrame> {
    self
      .slot
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .as_ref()
      .filter(|frame| !frame.is_empty())
      .cloned()
  }
}

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

mod v4l_input;
pub use self::v4l_input::{V4lInput, V4lInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("V4L input error: {0}")]
  V4lInputError(#[from] V4lInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  V4l(V4lInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    #[cfg(feature = "read_image_file")]
    {
      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    #[cfg(feature = "gstreamer_input")]
    {
      if url.scheme() == GStreamerInputPipelineBuilder::SCHEME {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        return Ok(InputWrapper::GStreamerInput(input));
      }
    }
    if url.scheme() == V4lInput::SCHEME {
      let input = V4lInput::from_url(url)?;
      return Ok(InputWrapper::V4l(input));
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl FrameSource for InputWrapper {
  fn is_ready(&self) -> bool {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.is_ready(),
      InputWrapper::V4l(input) => input.is_ready(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.is_ready(),
    }
  }

  fn current_frame(&self) -> Option<RgbFrame> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.current_frame(),
      InputWrapper::V4l(input) => input.current_frame(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.current_frame(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::AsNhwcFrame;

  #[test]
  fn empty_slot_is_not_ready() {
    let latest = LatestFrame::new();
    assert!(!latest.is_ready());
    assert!(latest.current_frame().is_none());
  }

  #[test]
  fn zero_sized_frame_is_not_ready() {
    let latest = LatestFrame::new();
    latest.publish(RgbFrame::new(0, 0, Vec::new()).unwrap());
    assert!(!latest.is_ready());
    assert!(latest.current_frame().is_none());
  }

  #[test]
  fn publish_replaces_the_previous_frame() {
    let latest = LatestFrame::new();
    let reader = latest.clone();
    latest.publish(RgbFrame::new(1, 1, vec![1, 1, 1]).unwrap());
    let first = reader.current_frame().unwrap();
    latest.publish(RgbFrame::new(1, 1, vec![2, 2, 2]).unwrap());
    let second = reader.current_frame().unwrap();

    assert!(reader.is_ready());
    assert_eq!(first.as_nhwc(), &[1, 1, 1]);
    assert_eq!(second.as_nhwc(), &[2, 2, 2]);
    assert_eq!(first.index(), 0);
    assert_eq!(second.index(), 1);
    assert_eq!(latest.published(), 2);
  }

  #[test]
  fn clear_makes_the_slot_not_ready() {
    let latest = LatestFrame::new();
    latest.publish(RgbFrame::new(1, 1, vec![0, 0, 0]).unwrap());
    latest.clear();
    assert!(!latest.is_ready());
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = url::Url::parse("ftp://example.com/video").unwrap();
    match InputWrapper::from_url(&url) {
      Err(InputError::SchemeMismatch(scheme)) => assert_eq!(scheme, "ftp"),
      _ => panic!("expected scheme mismatch"),
    }
  }
}
