// 该文件是 Liuguang （流光） 项目的一部分。
// src/main.rs - 实时检测主程序
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

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use liuguang::{
  FromUrl,
  args::ReduceArgs,
  input::InputWrapper,
  model::ModelWrapper,
  output::OutputWrapper,
  task::{ContinuousTask, FixedInterval, Task},
};

/// Liuguang 实时目标检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型路径，例如 replay:///outputs.json 或 rknn:///model.rknn
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，例如 v4l:///dev/video0 或 image:///frame.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，例如 log:// 或 folder:///data/records
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  #[command(flatten)]
  pub reduce: ReduceArgs,

  /// 调度间隔（毫秒）
  #[arg(long, default_value_t = 33, value_name = "MS")]
  pub interval_ms: u64,

  /// 处理指定帧数后退出
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let config = args.reduce.reduce_config()?;
  info!("归约配置: {:?}", config);

  let model = ModelWrapper::from_url(&args.model)?;
  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let summary = ContinuousTask::new(config)
    .with_ticker(FixedInterval::new(Duration::from_millis(args.interval_ms)))
    .with_frame_number(args.frame_number)
    .run_task(input, model, output)?;

  info!("共处理 {} 帧", summary.processed());
  Ok(())
}
