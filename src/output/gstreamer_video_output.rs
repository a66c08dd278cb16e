// 该文件是 Liuguang （流光） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频输出
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

//! # GStreamer 视频输出
//!
//! 将叠加了检测结果的帧推送到 GStreamer 管道，显示在窗口中或编码为视频文件。
//!
//! ## URL Scheme
//!
//! - `gstvideo://display` 在窗口中实时显示
//! - `gstvideo:///output.mp4?fps=30` 编码为文件，按扩展名选择容器
//!   (`.mp4`、`.mkv`、`.avi`、`.webm`，其他扩展名按 MP4 处理)
//!
//! 帧尺寸在收到第一帧时确定。

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decoded_path,
  frame::RgbFrame,
  output::{Render, RenderError, draw::Draw},
  reduce::DetectionResult,
};

const DEFAULT_FPS: i32 = 30;
const DISPLAY_HOST: &str = "display";

impl From<gst::glib::Error> for RenderError {
  fn from(err: gst::glib::Error) -> Self {
    RenderError::GStreamer(err.to_string())
  }
}

impl From<gst::glib::BoolError> for RenderError {
  fn from(err: gst::glib::BoolError) -> Self {
    RenderError::GStreamer(err.to_string())
  }
}

impl From<gst::StateChangeError> for RenderError {
  fn from(err: gst::StateChangeError) -> Self {
    RenderError::GStreamer(err.to_string())
  }
}

pub struct GStreamerVideoOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  draw: Draw,
  fps: i32,
  frame_count: u64,
  dimensions: Option<(u32, u32)>,
}

impl FromUrlWithScheme for GStreamerVideoOutput {
  const SCHEME: &'static str = "gstvideo";
}

fn pipeline_description(url: &Url) -> String {
  if url.host_str() == Some(DISPLAY_HOST) {
    return "appsrc name=src is-live=true ! videoconvert ! autovideosink sync=false".to_string();
  }

  let file_path = decoded_path(url);
  let encoder = if file_path.ends_with(".mkv") {
    "video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! matroskamux"
  } else if file_path.ends_with(".avi") {
    "video/x-raw,format=I420 ! x264enc ! avimux"
  } else if file_path.ends_with(".webm") {
    "vp8enc ! webmmux"
  } else {
    "video/x-raw,format=I420 ! x264enc speed-preset=fast tune=zerolatency ! h264parse ! mp4mux"
  };
  format!(
    "appsrc name=src ! videoconvert ! {} ! filesink location=\"{}\"",
    encoder, file_path
  )
}

impl FromUrl for GStreamerVideoOutput {
  type Error = RenderError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(RenderError::SchemeMismatch(url.scheme().to_string()));
    }

    gst::init()?;

    let fps = crate::query_value(url, "fps").unwrap_or(DEFAULT_FPS);
    let pipeline_desc = pipeline_description(url);
    info!("Creating video output pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| RenderError::GStreamer("Failed to create pipeline".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or_else(|| RenderError::GStreamer("Failed to get appsrc element".to_string()))?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| RenderError::GStreamer("Failed to convert element to appsrc".to_string()))?;
    appsrc.set_format(gst::Format::Time);

    Ok(GStreamerVideoOutput {
      pipeline,
      appsrc,
      draw: Draw::new()?,
      fps,
      frame_count: 0,
      dimensions: None,
    })
  }
}

impl GStreamerVideoOutput {
  /// 第一帧到达时设置 caps 并启动管道，之后帧尺寸不可改变
  fn ensure_started(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
    match self.dimensions {
      Some(dims) if dims == (width, height) => Ok(()),
      Some(dims) => Err(RenderError::InvalidFrameDims {
        frame: (width, height),
        surface: dims,
      }),
      None => {
        let caps = gst::Caps::builder("video/x-raw")
          .field("format", "RGB")
          .field("width", width as i32)
          .field("height", height as i32)
          .field("framerate", gst::Fraction::new(self.fps, 1))
          .build();
        self.appsrc.set_caps(Some(&caps));
        self.pipeline.set_state(gst::State::Playing)?;
        info!(
          "Video output initialized: {}x{} @ {} fps",
          width, height, self.fps
        );
        self.dimensions = Some((width, height));
        Ok(())
      }
    }
  }

  fn push_frame(&mut self, data: &[u8]) -> Result<(), RenderError> {
    let mut buffer = gst::Buffer::from_mut_slice(data.to_vec());
    let timestamp = self.frame_count * 1_000_000_000 / self.fps as u64;
    self.frame_count += 1;

    if let Some(buffer_ref) = buffer.get_mut() {
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(timestamp));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(
        1_000_000_000 / self.fps as u64,
      ));
    }

    self
      .appsrc
      .push_buffer(buffer)
      .map_err(|e| RenderError::GStreamer(format!("Failed to push buffer: {:?}", e)))?;
    Ok(())
  }
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    if self.dimensions.is_some() {
      // EOS 让 muxer 写完文件尾
      let _ = self.appsrc.end_of_stream();
      if let Some(bus) = self.pipeline.bus() {
        let _ = bus.timed_pop_filtered(
          gst::ClockTime::from_seconds(2),
          &[gst::MessageType::Eos, gst::MessageType::Error],
        );
      }
    }

    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer video output pipeline: {}", e);
    }
    info!(
      "Video output closed. Total frames written: {}",
      self.frame_count
    );
  }
}

impl Render<RgbFrame, DetectionResult> for GStreamerVideoOutput {
  type Error = RenderError;

  fn render_result(&mut self, frame: &RgbFrame, result: &DetectionResult) -> Result<(), Self::Error> {
    let (width, height) = frame.dimensions();
    self.ensure_started(width, height)?;
    let image = self.draw.draw_detection(frame, result)?;
    self.push_frame(image.as_raw())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_host_uses_video_sink() {
    let url = Url::parse("gstvideo://display").unwrap();
    assert!(pipeline_description(&url).contains("autovideosink"));
  }

  #[test]
  fn container_follows_extension() {
    let mkv = Url::parse("gstvideo:///tmp/out.mkv").unwrap();
    let webm = Url::parse("gstvideo:///tmp/out.webm").unwrap();
    let other = Url::parse("gstvideo:///tmp/out.bin").unwrap();
    assert!(pipeline_description(&mkv).contains("matroskamux"));
    assert!(pipeline_description(&webm).contains("webmmux"));
    assert!(pipeline_description(&other).contains("mp4mux"));
  }
}
