// 该文件是 Liuguang （流光） 项目的一部分。
// src/output/draw.rs - 检测结果叠加层绘制
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

use image::{Rgba, RgbImage};
use tracing::trace;

use crate::{
  frame::RgbFrame,
  output::{
    RenderError,
    surface::{ImageSurface, Surface},
  },
  reduce::{Detection, DetectionResult, PixelRect},
};

// 绘制常量
const STROKE_COLOR: Rgba<u8> = Rgba([0x00, 0xFF, 0x00, 0xFF]); // #00FF00
const LINE_WIDTH: u32 = 2;
const TEXT_PAD: u32 = 4;
const LABEL_BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 0x80]);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
  pub stroke: Rgba<u8>,
  pub line_width: u32,
  pub text: Rgba<u8>,
  pub text_pad: u32,
  pub label_background: Rgba<u8>,
}

impl Default for OverlayStyle {
  fn default() -> Self {
    Self {
      stroke: STROKE_COLOR,
      line_width: LINE_WIDTH,
      text: STROKE_COLOR,
      text_pad: TEXT_PAD,
      label_background: LABEL_BACKGROUND,
    }
  }
}

/// 标签文本：类别名与取整后的百分比置信度
pub fn label_text(detection: &Detection) -> String {
  format!(
    "{} {}%",
    detection.label,
    (detection.score * 100.0).round() as i32
  )
}

/// 将检测结果绘制到表面上
#[derive(Debug, Clone, Default)]
pub struct Overlay {
  style: OverlayStyle,
}

impl Overlay {
  pub fn new(style: OverlayStyle) -> Self {
    Self { style }
  }

  pub fn style(&self) -> &OverlayStyle {
    &self.style
  }

  /// 先清空表面，再逐个绘制边框与标签
  ///
  /// 检测框以帧坐标给出，表面尺寸与帧不同时按比例缩放。
  pub fn render<S: Surface + ?Sized>(
    &self,
    surface: &mut S,
    result: &DetectionResult,
    frame_dims: (u32, u32),
  ) -> Result<(), RenderError> {
    let (frame_w, frame_h) = frame_dims;
    let (surface_w, surface_h) = surface.dimensions();
    if frame_w == 0 || frame_h == 0 {
      return Err(RenderError::InvalidFrameDims {
        frame: frame_dims,
        surface: (surface_w, surface_h),
      });
    }

    let sx = surface_w as f32 / frame_w as f32;
    let sy = surface_h as f32 / frame_h as f32;

    surface.clear();
    for detection in result {
      let rect = PixelRect {
        x: detection.rect.x * sx,
        y: detection.rect.y * sy,
        width: detection.rect.width * sx,
        height: detection.rect.height * sy,
      };
      surface.stroke_rect(rect, self.style.stroke, self.style.line_width);

      let label = label_text(detection);
      let (text_w, text_h) = surface.measure_text(&label);
      let pad = self.style.text_pad as f32;
      let background = PixelRect {
        x: rect.x,
        y: (rect.y - text_h as f32 - pad).max(0.0),
        width: text_w as f32 + pad,
        height: text_h as f32 + pad,
      };
      surface.fill_rect(background, self.style.label_background);
      surface.fill_text(
        &label,
        background.x + pad / 2.0,
        background.y + pad / 2.0,
        self.style.text,
      );
      trace!("绘制 {} @ {:?}", label, rect);
    }

    Ok(())
  }
}

/// 帧级绘制：在与帧同尺寸的表面上绘制叠加层并合成到帧上
pub struct Draw {
  surface: ImageSurface,
  overlay: Overlay,
}

impl Draw {
  pub fn new() -> Result<Self, RenderError> {
    Ok(Self {
      surface: ImageSurface::new(0, 0)?,
      overlay: Overlay::default(),
    })
  }

  pub fn with_overlay(mut self, overlay: Overlay) -> Self {
    self.overlay = overlay;
    self
  }

  pub fn draw_detection(
    &mut self,
    frame: &RgbFrame,
    result: &DetectionResult,
  ) -> Result<RgbImage, RenderError> {
    let (width, height) = frame.dimensions();
    self.surface.ensure_dimensions(width, height);
    self
      .overlay
      .render(&mut self.surface, result, frame.dimensions())?;
    self.surface.composite_onto(frame)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, Clone, PartialEq)]
  enum Call {
    Clear,
    Stroke(PixelRect),
    Fill(PixelRect),
    Text(String),
  }

  struct RecordingSurface {
    dims: (u32, u32),
    calls: Vec<Call>,
  }

  impl Surface for RecordingSurface {
    fn dimensions(&self) -> (u32, u32) {
      self.dims
    }

    fn clear(&mut self) {
      self.calls.push(Call::Clear);
    }

    fn stroke_rect(&mut self, rect: PixelRect, _color: Rgba<u8>, _line_width: u32) {
      self.calls.push(Call::Stroke(rect));
    }

    fn fill_rect(&mut self, rect: PixelRect, _color: Rgba<u8>) {
      self.calls.push(Call::Fill(rect));
    }

    fn fill_text(&mut self, text: &str, _x: f32, _y: f32, _color: Rgba<u8>) {
      self.calls.push(Call::Text(text.to_string()));
    }

    fn measure_text(&self, text: &str) -> (u32, u32) {
      (text.len() as u32 * 8, 10)
    }
  }

  fn detection(label: &str, score: f32, rect: PixelRect) -> Detection {
    Detection {
      class_id: 0,
      label: label.to_string(),
      score,
      bbox: [0.0; 4],
      rect,
      box_index: 0,
    }
  }

  fn result() -> DetectionResult {
    DetectionResult {
      items: vec![
        detection(
          "person",
          0.876,
          PixelRect {
            x: 10.0,
            y: 20.0,
            width: 30.0,
            height: 40.0,
          },
        ),
        detection(
          "dog",
          0.5,
          PixelRect {
            x: 0.0,
            y: 0.0,
            width: 5.0,
            height: 5.0,
          },
        ),
      ]
      .into_boxed_slice(),
    }
  }

  #[test]
  fn label_rounds_to_whole_percent() {
    let items = result();
    assert_eq!(label_text(&items.items[0]), "person 88%");
    assert_eq!(label_text(&items.items[1]), "dog 50%");
  }

  #[test]
  fn clears_before_drawing() {
    let mut surface = RecordingSurface {
      dims: (100, 100),
      calls: Vec::new(),
    };
    Overlay::default()
      .render(&mut surface, &result(), (100, 100))
      .unwrap();

    assert_eq!(surface.calls[0], Call::Clear);
    assert_eq!(surface.calls.iter().filter(|c| **c == Call::Clear).count(), 1);
    assert!(surface.calls.contains(&Call::Text("person 88%".to_string())));
    assert!(surface.calls.contains(&Call::Text("dog 50%".to_string())));
  }

  #[test]
  fn empty_result_only_clears() {
    let mut surface = RecordingSurface {
      dims: (10, 10),
      calls: Vec::new(),
    };
    Overlay::default()
      .render(&mut surface, &DetectionResult::default(), (10, 10))
      .unwrap();
    assert_eq!(surface.calls, vec![Call::Clear]);
  }

  #[test]
  fn boxes_scale_to_surface() {
    let mut surface = RecordingSurface {
      dims: (50, 50),
      calls: Vec::new(),
    };
    Overlay::default()
      .render(&mut surface, &result(), (100, 100))
      .unwrap();
    assert_eq!(
      surface.calls[1],
      Call::Stroke(PixelRect {
        x: 5.0,
        y: 10.0,
        width: 15.0,
        height: 20.0
      })
    );
  }

  #[test]
  fn zero_frame_dims_are_rejected() {
    let mut surface = RecordingSurface {
      dims: (10, 10),
      calls: Vec::new(),
    };
    let err = Overlay::default()
      .render(&mut surface, &result(), (0, 10))
      .unwrap_err();
    assert!(matches!(err, RenderError::InvalidFrameDims { .. }));
    assert!(surface.calls.is_empty());
  }

  #[test]
  fn rendering_twice_is_idempotent() {
    let frame = RgbFrame::new(64, 64, vec![90; 64 * 64 * 3]).unwrap();
    let mut draw = Draw::new().unwrap();
    let first = draw.draw_detection(&frame, &result()).unwrap();
    let second = draw.draw_detection(&frame, &result()).unwrap();
    assert_eq!(first, second);
    assert_ne!(first, RgbImage::from_pixel(64, 64, image::Rgb([90, 90, 90])));
  }
}
