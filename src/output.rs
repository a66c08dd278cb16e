// 该文件是 Liuguang （流光） 项目的一部分。
// src/output.rs - 输出定义
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
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbFrame, reduce::DetectionResult};

/// 输出端：接收一帧及其检测结果
///
/// 实现不得在调用结束后保留对检测结果的引用。
pub trait Render<Frame, Output> {
  type Error;
  fn render_result(&mut self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

impl<Frame, Output, R: Render<Frame, Output> + ?Sized> Render<Frame, Output> for Box<R> {
  type Error = R::Error;

  fn render_result(&mut self, frame: &Frame, result: &Output) -> Result<(), Self::Error> {
    (**self).render_result(frame, result)
  }
}

pub mod draw;
pub mod surface;

pub use self::draw::{Draw, Overlay, OverlayStyle};
pub use self::surface::{ImageSurface, Surface};

mod log_output;
pub use self::log_output::LogOutput;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::SaveImageFileOutput;

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::DirectoryRecordOutput;

#[cfg(feature = "gstreamer_output")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_video_output::GStreamerVideoOutput;

#[derive(Error, Debug)]
pub enum RenderError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("字体加载失败: {0}")]
  Font(#[from] ab_glyph::InvalidFont),
  #[error("记录序列化错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("帧尺寸 {frame:?} 无法绘制到尺寸为 {surface:?} 的表面")]
  InvalidFrameDims {
    frame: (u32, u32),
    surface: (u32, u32),
  },
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 错误: {0}")]
  GStreamer(String),
}

/// 根据 URL 选择输出端
pub enum OutputWrapper {
  Log(LogOutput),
  #[cfg(feature = "save_image_file")]
  SaveImageFile(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecord(DirectoryRecordOutput),
  #[cfg(feature = "gstreamer_output")]
  GStreamerVideo(GStreamerVideoOutput),
}

impl FromUrl for OutputWrapper {
  type Error = RenderError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      LogOutput::SCHEME => Ok(OutputWrapper::Log(LogOutput::from_url(url)?)),
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => Ok(OutputWrapper::SaveImageFile(
        SaveImageFileOutput::from_url(url)?,
      )),
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => Ok(OutputWrapper::DirectoryRecord(
        DirectoryRecordOutput::from_url(url)?,
      )),
      #[cfg(feature = "gstreamer_output")]
      GStreamerVideoOutput::SCHEME => Ok(OutputWrapper::GStreamerVideo(
        GStreamerVideoOutput::from_url(url)?,
      )),
      scheme => Err(RenderError::SchemeMismatch(format!(
        "不支持的输出方案: {}",
        scheme
      ))),
    }
  }
}

impl Render<RgbFrame, DetectionResult> for OutputWrapper {
  type Error = RenderError;

  fn render_result(&mut self, frame: &RgbFrame, result: &DetectionResult) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Log(output) => output.render_result(frame, result),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFile(output) => output.render_result(frame, result),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecord(output) => output.render_result(frame, result),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerVideo(output) => output.render_result(frame, result),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_output_scheme_is_rejected() {
    let url = Url::parse("rtsp://localhost/stream").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Err(RenderError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn log_output_is_always_available() {
    let url = Url::parse("log://").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Ok(OutputWrapper::Log(_))
    ));
  }
}
