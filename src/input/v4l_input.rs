// 该文件是 Liuguang （流光） 项目的一部分。
// src/input/v4l_input.rs - V4L 视频输入
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
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::{
  FromUrl, FromUrlWithScheme, decoded_path,
  frame::RgbFrame,
  input::{FrameSource, LatestFrame},
  query_value,
};

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
}

const V4L_DEFAULT_DEVICE: &str = "/dev/video0";
const V4L_BUFFER_COUNT: u32 = 4;

/// V4L2 摄像头帧来源
///
/// 后台线程持续采集 RGB24 帧并发布到 [`LatestFrame`]，
/// 第一帧到达之前 `is_ready` 返回 `false`。
pub struct V4lInput {
  latest: LatestFrame,
  running: Arc<AtomicBool>,
  worker: Option<JoinHandle<()>>,
  width: u32,
  height: u32,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    // 格式: v4l:///dev/video0?width=640&height=480
    let device_path = match decoded_path(url) {
      path if path.is_empty() || path == "/" => V4L_DEFAULT_DEVICE.to_string(),
      path => path,
    };

    let device = Device::with_path(&device_path)?;

    let mut format = device.format()?;
    format.fourcc = FourCC::new(b"RGB3");
    if let Some(width) = query_value(url, "width") {
      format.width = width;
    }
    if let Some(height) = query_value(url, "height") {
      format.height = height;
    }
    let format = device.set_format(&format)?;

    if format.fourcc != FourCC::new(b"RGB3") {
      return Err(V4lInputError::UnsupportedPixelFormat(
        format.fourcc.to_string(),
      ));
    }

    info!(
      "打开 V4L 设备 {}: {}x{} {}",
      device_path, format.width, format.height, format.fourcc
    );

    Ok(Self::spawn(device, format.width, format.height))
  }
}

impl V4lInput {
  fn spawn(device: Device, width: u32, height: u32) -> Self {
    let latest = LatestFrame::new();
    let running = Arc::new(AtomicBool::new(true));

    let worker = {
      let latest = latest.clone();
      let running = running.clone();
      thread::spawn(move || capture_loop(device, width, height, latest, running))
    };

    Self {
      latest,
      running,
      worker: Some(worker),
      width,
      height,
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }
}

fn capture_loop(
  device: Device,
  width: u32,
  height: u32,
  latest: LatestFrame,
  running: Arc<AtomicBool>,
) {
  let mut stream = match Stream::with_buffers(&device, Type::VideoCapture, V4L_BUFFER_COUNT) {
    Ok(stream) => stream,
    Err(e) => {
      error!("无法创建 V4L 采集流: {}", e);
      return;
    }
  };

  run_capture(&latest, &running, |latest| {
    let (buf, meta) = CaptureStream::next(&mut stream)?;
    publish_buffer(buf, meta.sequence, width, height, latest);
    Ok(())
  });
}

/// 反复调用 `capture_one` 直到停止或采集失败
///
/// 退出时清空最新帧，采集中断后 `is_ready` 不再为真。
fn run_capture<F>(latest: &LatestFrame, running: &AtomicBool, mut capture_one: F)
where
  F: FnMut(&LatestFrame) -> std::io::Result<()>,
{
  while running.load(Ordering::SeqCst) {
    if let Err(e) = capture_one(latest) {
      error!("采集帧失败: {}", e);
      break;
    }
  }

  latest.clear();
  info!("V4L 采集线程退出");
}

fn publish_buffer(buf: &[u8], sequence: u32, width: u32, height: u32, latest: &LatestFrame) {
  let frame_size = 3 * width as usize * height as usize;
  if buf.len() < frame_size {
    warn!(
      "采集缓冲区大小不足: 期望 {}, 实际 {}",
      frame_size,
      buf.len()
    );
    return;
  }
  match RgbFrame::new(width, height, buf[..frame_size].to_vec()) {
    Ok(frame) => {
      debug!("采集到第 {} 帧", sequence);
      latest.publish(frame);
    }
    Err(e) => warn!("丢弃无效帧: {}", e),
  }
}

impl Drop for V4lInput {
  fn drop(&mut self) {
    self.running.store(false, Ordering::SeqCst);
    if let Some(worker) = self.worker.take()
      && worker.join().is_err()
    {
      warn!("V4L 采集线程异常退出");
    }
  }
}

impl FrameSource for V4lInput {
  fn is_ready(&self) -> bool {
    self.latest.is_ready()
  }

  fn current_frame(&self) -> Option<RgbFrame> {
    self.latest.current_frame()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("image:///dev/video0").unwrap();
    assert!(matches!(
      V4lInput::from_url(&url),
      Err(V4lInputError::SchemaMismatch)
    ));
  }

  #[test]
  fn capture_failure_clears_latest_frame() {
    let latest = LatestFrame::new();
    let running = AtomicBool::new(true);
    let mut calls = 0;

    run_capture(&latest, &running, |latest| {
      calls += 1;
      if calls == 1 {
        publish_buffer(&[0; 2 * 2 * 3], 1, 2, 2, latest);
        assert!(latest.is_ready());
        Ok(())
      } else {
        Err(std::io::Error::other("device unplugged"))
      }
    });

    assert_eq!(calls, 2);
    assert_eq!(latest.published(), 1);
    assert!(!latest.is_ready());
    assert!(latest.current_frame().is_none());
  }

  #[test]
  fn stopped_capture_clears_latest_frame() {
    let latest = LatestFrame::new();
    latest.publish(RgbFrame::new(2, 2, vec![0; 12]).unwrap());
    let running = AtomicBool::new(false);

    run_capture(&latest, &running, |_| Ok(()));
    assert!(!latest.is_ready());
  }

  #[test]
  fn short_buffer_is_dropped() {
    let latest = LatestFrame::new();
    publish_buffer(&[0; 5], 1, 2, 2, &latest);
    assert_eq!(latest.published(), 0);
    assert!(!latest.is_ready());
  }

  #[test]
  fn missing_device_is_io_error() {
    let url = Url::parse("v4l:///dev/liuguang-no-such-device").unwrap();
    assert!(matches!(
      V4lInput::from_url(&url),
      Err(V4lInputError::IoError(_))
    ));
  }
}
