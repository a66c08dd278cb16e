// 该文件是 Liuguang （流光） 项目的一部分。
// src/args.rs - 命令行参数配置
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

use clap::{Args, ValueEnum};

use crate::reduce::{ConfigError, ReduceConfig, SoftDecay, SuppressionMode};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
  Hard,
  Soft,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decay {
  Linear,
  Gaussian,
}

/// 检测结果归约参数
#[derive(Args, Debug, Clone)]
pub struct ReduceArgs {
  /// 得分阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.4, value_name = "THRESHOLD")]
  pub score_threshold: f32,

  /// NMS IoU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.5, value_name = "THRESHOLD")]
  pub iou_threshold: f32,

  /// 每帧最多保留的检测数量
  #[arg(long, default_value_t = 20, value_name = "COUNT")]
  pub max_detections: usize,

  /// 抑制方式
  #[arg(long, value_enum, default_value_t = Suppression::Soft)]
  pub suppression: Suppression,

  /// 软抑制的衰减函数
  #[arg(long, value_enum, default_value_t = Decay::Linear)]
  pub decay: Decay,

  /// 高斯衰减的 sigma
  #[arg(long, default_value_t = 0.5)]
  pub sigma: f32,
}

impl ReduceArgs {
  pub fn suppression_mode(&self) -> SuppressionMode {
    match (self.suppression, self.decay) {
      (Suppression::Hard, _) => SuppressionMode::Hard,
      (Suppression::Soft, Decay::Linear) => SuppressionMode::Soft(SoftDecay::Linear),
      (Suppression::Soft, Decay::Gaussian) => {
        SuppressionMode::Soft(SoftDecay::Gaussian { sigma: self.sigma })
      }
    }
  }

  pub fn reduce_config(&self) -> Result<ReduceConfig, ConfigError> {
    ReduceConfig::new(
      self.score_threshold,
      self.iou_threshold,
      self.max_detections,
      self.suppression_mode(),
    )
  }
}
