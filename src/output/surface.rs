// 该文件是 Liuguang （流光） 项目的一部分。
// src/output/surface.rs - 叠加层绘制表面
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};

use crate::{
  frame::{RgbFrame, ToRgbImage},
  output::RenderError,
  reduce::PixelRect,
};

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
const DEFAULT_FONT_SIZE: f32 = 16.0;

/// 二维绘制目标
pub trait Surface {
  fn dimensions(&self) -> (u32, u32);

  /// 清空整个表面
  fn clear(&mut self);

  fn stroke_rect(&mut self, rect: PixelRect, color: Rgba<u8>, line_width: u32);

  fn fill_rect(&mut self, rect: PixelRect, color: Rgba<u8>);

  /// 以 `(x, y)` 为文本左上角绘制文本
  fn fill_text(&mut self, text: &str, x: f32, y: f32, color: Rgba<u8>);

  /// 文本绘制后的宽和高
  fn measure_text(&self, text: &str) -> (u32, u32);
}

/// 裁剪到 `width x height` 范围内的整数矩形，面积为零时返回 `None`
fn clip(rect: PixelRect, width: u32, height: u32) -> Option<Rect> {
  let x0 = rect.x.floor().max(0.0);
  let y0 = rect.y.floor().max(0.0);
  let x1 = (rect.x + rect.width).ceil().min(width as f32);
  let y1 = (rect.y + rect.height).ceil().min(height as f32);
  if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
    return None;
  }
  Some(Rect::at(x0 as i32, y0 as i32).of_size((x1 - x0) as u32, (y1 - y0) as u32))
}

/// 基于 RGBA 画布的绘制表面，未绘制的区域保持透明
pub struct ImageSurface {
  canvas: RgbaImage,
  font: FontArc,
  scale: PxScale,
}

impl ImageSurface {
  pub fn new(width: u32, height: u32) -> Result<Self, RenderError> {
    let font = FontArc::try_from_slice(include_bytes!("../../assets/DejaVuSans.ttf"))?;
    Ok(Self::with_font(width, height, font))
  }

  pub fn with_font(width: u32, height: u32, font: FontArc) -> Self {
    Self {
      canvas: RgbaImage::from_pixel(width, height, TRANSPARENT),
      font,
      scale: PxScale::from(DEFAULT_FONT_SIZE),
    }
  }

  pub fn font_size(mut self, size: f32) -> Self {
    self.scale = PxScale::from(size);
    self
  }

  /// 尺寸变化时重新分配画布
  pub fn ensure_dimensions(&mut self, width: u32, height: u32) {
    if self.canvas.dimensions() != (width, height) {
      self.canvas = RgbaImage::from_pixel(width, height, TRANSPARENT);
    }
  }

  pub fn canvas(&self) -> &RgbaImage {
    &self.canvas
  }

  /// 将画布按透明度叠加到帧上
  ///
  /// 帧与画布尺寸必须一致。
  pub fn composite_onto(&self, frame: &RgbFrame) -> Result<RgbImage, RenderError> {
    if frame.dimensions() != self.canvas.dimensions() {
      return Err(RenderError::InvalidFrameDims {
        frame: frame.dimensions(),
        surface: self.canvas.dimensions(),
      });
    }

    let mut image = frame.to_rgb_image();
    for (pixel, overlay) in image.pixels_mut().zip(self.canvas.pixels()) {
      let alpha = overlay[3] as u16;
      if alpha == 0 {
        continue;
      }
      let blend = |base: u8, top: u8| ((top as u16 * alpha + base as u16 * (255 - alpha)) / 255) as u8;
      *pixel = Rgb([
        blend(pixel[0], overlay[0]),
        blend(pixel[1], overlay[1]),
        blend(pixel[2], overlay[2]),
      ]);
    }
    Ok(image)
  }
}

impl Surface for ImageSurface {
  fn dimensions(&self) -> (u32, u32) {
    self.canvas.dimensions()
  }

  fn clear(&mut self) {
    for pixel in self.canvas.pixels_mut() {
      *pixel = TRANSPARENT;
    }
  }

  fn stroke_rect(&mut self, rect: PixelRect, color: Rgba<u8>, line_width: u32) {
    let (width, height) = self.canvas.dimensions();
    // 线宽向内增长
    for inset in 0..line_width {
      let inset = inset as f32;
      let inner = PixelRect {
        x: rect.x + inset,
        y: rect.y + inset,
        width: rect.width - 2.0 * inset,
        height: rect.height - 2.0 * inset,
      };
      match clip(inner, width, height) {
        Some(r) => draw_hollow_rect_mut(&mut self.canvas, r, color),
        None => break,
      }
    }
  }

  fn fill_rect(&mut self, rect: PixelRect, color: Rgba<u8>) {
    let (width, height) = self.canvas.dimensions();
    if let Some(r) = clip(rect, width, height) {
      draw_filled_rect_mut(&mut self.canvas, r, color);
    }
  }

  fn fill_text(&mut self, text: &str, x: f32, y: f32, color: Rgba<u8>) {
    draw_text_mut(
      &mut self.canvas,
      color,
      x.round() as i32,
      y.round() as i32,
      self.scale,
      &self.font,
      text,
    );
  }

  fn measure_text(&self, text: &str) -> (u32, u32) {
    text_size(self.scale, &self.font, text)
  }
}
