// 该文件是 Liuguang （流光） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

//! 按日期分目录保存叠加了检测框的帧：
//!
//! ```text
//! <root>/2026/10/18/14-03-22-0001.png
//! ```
//!
//! - `folder:///data/records` 仅保存有检测结果的帧
//! - `folder:///data/records?always` 没有检测结果的帧也会保存

use std::path::PathBuf;

use chrono::{DateTime, Datelike, Local};
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decoded_path,
  frame::RgbFrame,
  output::{Render, RenderError, draw::Draw},
  reduce::DetectionResult,
};

pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  frame_counter: u16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = RenderError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(RenderError::SchemeMismatch(format!(
        "期望输出方式 '{}', 实际输出方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    let directory = PathBuf::from(decoded_path(uri));
    info!(
      "目录记录输出: {} (always={})",
      directory.display(),
      always
    );

    Ok(DirectoryRecordOutput {
      directory,
      draw: Draw::new()?,
      frame_counter: 0,
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&mut self) -> u16 {
    self.frame_counter = self.frame_counter.wrapping_add(1);
    self.frame_counter
  }

  fn frame_path(&mut self, now: DateTime<Local>) -> Result<PathBuf, RenderError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render<RgbFrame, DetectionResult> for DirectoryRecordOutput {
  type Error = RenderError;

  fn render_result(&mut self, frame: &RgbFrame, result: &DetectionResult) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      debug!("帧 #{} 无检测结果，跳过记录", frame.index());
      return Ok(());
    }

    let path = self.frame_path(Local::now())?;
    self.draw.draw_detection(frame, result)?.save(&path)?;
    debug!("记录帧 #{} 到 {}", frame.index(), path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::path::Path;

  use super::*;
  use crate::reduce::{Detection, PixelRect};

  fn folder_url(dir: &Path, query: &str) -> Url {
    let mut url = Url::parse("folder:///").unwrap();
    url.set_path(&dir.to_string_lossy());
    if !query.is_empty() {
      url.set_query(Some(query));
    }
    url
  }

  fn files_with_extension(root: &Path, ext: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
      for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          pending.push(path);
        } else if path.extension().is_some_and(|e| e == ext) {
          found.push(path);
        }
      }
    }
    found
  }

  fn one_detection() -> DetectionResult {
    DetectionResult {
      items: vec![Detection {
        class_id: 16,
        label: "bird".to_string(),
        score: 0.75,
        bbox: [0.0, 0.0, 0.5, 0.5],
        rect: PixelRect {
          x: 0.0,
          y: 0.0,
          width: 4.0,
          height: 4.0,
        },
        box_index: 3,
      }]
      .into_boxed_slice(),
    }
  }

  #[test]
  fn skips_empty_results_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let frame = RgbFrame::new(8, 8, vec![0; 8 * 8 * 3]).unwrap();

    let mut output = DirectoryRecordOutput::from_url(&folder_url(dir.path(), "")).unwrap();
    output
      .render_result(&frame, &DetectionResult::default())
      .unwrap();
    assert!(files_with_extension(dir.path(), "png").is_empty());

    let mut output = DirectoryRecordOutput::from_url(&folder_url(dir.path(), "always")).unwrap();
    output
      .render_result(&frame, &DetectionResult::default())
      .unwrap();
    assert_eq!(files_with_extension(dir.path(), "png").len(), 1);
  }

  #[test]
  fn writes_only_drawn_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let frame = RgbFrame::new(8, 8, vec![0; 8 * 8 * 3])
      .unwrap()
      .with_sequence(7, 1234);

    let mut output = DirectoryRecordOutput::from_url(&folder_url(dir.path(), "")).unwrap();
    output.render_result(&frame, &one_detection()).unwrap();
    output.render_result(&frame, &one_detection()).unwrap();

    let snapshots = files_with_extension(dir.path(), "png");
    assert_eq!(snapshots.len(), 2);
    assert!(files_with_extension(dir.path(), "json").is_empty());
    let image = image::open(&snapshots[0]).unwrap().to_rgb8();
    assert_eq!(image.dimensions(), (8, 8));
  }

  #[test]
  fn rejects_other_schemes() {
    let dir = tempfile::tempdir().unwrap();
    let mut url = folder_url(dir.path(), "");
    url.set_scheme("image").unwrap();
    assert!(DirectoryRecordOutput::from_url(&url).is_err());
  }
}
