// 该文件是 Liuguang （流光） 项目的一部分。
// src/output/log_output.rs - 将检测结果写入日志
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

use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  output::{Render, RenderError, draw::label_text},
  reduce::DetectionResult,
};

/// 不产生图像，只将每帧的检测结果记录到日志
#[derive(Debug, Default)]
pub struct LogOutput {
  rendered: u64,
}

impl LogOutput {
  pub fn rendered(&self) -> u64 {
    self.rendered
  }
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = RenderError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RenderError::SchemeMismatch(format!(
        "期望输出方式 '{}', 实际输出方式 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Ok(LogOutput::default())
  }
}

impl Render<RgbFrame, DetectionResult> for LogOutput {
  type Error = RenderError;

  fn render_result(&mut self, frame: &RgbFrame, result: &DetectionResult) -> Result<(), Self::Error> {
    self.rendered += 1;
    info!("帧 #{}: {} 个检测结果", frame.index(), result.len());
    for detection in result {
      let r = &detection.rect;
      info!(
        "  {} @ ({:.0}, {:.0}, {:.0}x{:.0})",
        label_text(detection),
        r.x,
        r.y,
        r.width,
        r.height
      );
    }
    Ok(())
  }
}
