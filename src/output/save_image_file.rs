// 该文件是 Liuguang （流光） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::PathBuf;

use image::RgbImage;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decoded_path,
  frame::RgbFrame,
  output::{Render, RenderError, draw::Draw},
  reduce::DetectionResult,
};

/// 将叠加了检测结果的帧保存为图像文件，每帧覆盖同一文件
pub struct SaveImageFileOutput {
  path: PathBuf,
  draw: Draw,
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = RenderError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(RenderError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput {
      path: PathBuf::from(decoded_path(uri)),
      draw: Draw::new()?,
    })
  }
}

impl SaveImageFileOutput {
  fn save_image(&self, image: RgbImage) -> Result<(), RenderError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    info!("保存图像到文件: {}", self.path.display());
    Ok(())
  }
}

impl Render<RgbFrame, DetectionResult> for SaveImageFileOutput {
  type Error = RenderError;

  fn render_result(&mut self, frame: &RgbFrame, result: &DetectionResult) -> Result<(), Self::Error> {
    let image = self.draw.draw_detection(frame, result)?;
    self.save_image(image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::reduce::{Detection, PixelRect};

  #[test]
  fn writes_overlay_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("out.png");
    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "image", 1)).unwrap();

    let mut output = SaveImageFileOutput::from_url(&url).unwrap();
    let frame = RgbFrame::new(64, 64, vec![0; 64 * 64 * 3]).unwrap();
    let result = DetectionResult {
      items: vec![Detection {
        class_id: 0,
        label: "person".to_string(),
        score: 0.9,
        bbox: [0.625, 0.125, 0.875, 0.375],
        rect: PixelRect {
          x: 8.0,
          y: 40.0,
          width: 16.0,
          height: 16.0,
        },
        box_index: 0,
      }]
      .into_boxed_slice(),
    };
    output.render_result(&frame, &result).unwrap();

    let saved = image::open(&path).unwrap().to_rgb8();
    assert_eq!(saved.dimensions(), (64, 64));
    assert_eq!(saved.get_pixel(8, 48), &image::Rgb([0, 255, 0]));
    assert_eq!(saved.get_pixel(16, 48), &image::Rgb([0, 0, 0]));
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("folder:///tmp/out").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(RenderError::SchemeMismatch(_))
    ));
  }
}
