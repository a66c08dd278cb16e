// 该文件是 Liuguang （流光） 项目的一部分。
// src/task.rs - 帧调度与任务循环
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

use std::{
  marker::PhantomData,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::RgbFrame,
  input::FrameSource,
  model::{CocoLabel, InferenceError, Model, WithLabel},
  output::{Render, RenderError},
  preprocess::{Preprocess, PreprocessError, Preprocessor},
  reduce::{DetectionResult, ReduceConfig, reduce},
  tensor::{Ledger, LedgerSnapshot},
};

/// 调度器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
  Idle,
  Acquiring,
  Processing,
  Rendering,
  Cleanup,
  Stopped,
}

/// 单个周期内可恢复的错误，不会终止调度器
#[derive(Error, Debug)]
pub enum CycleError {
  #[error("预处理失败: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("推理失败: {0}")]
  Inference(#[from] InferenceError),
  #[error("渲染失败: {0}")]
  Render(#[from] RenderError),
}

#[derive(Debug)]
pub enum CycleOutcome {
  /// 帧来源未就绪，本周期跳过
  NotReady,
  Rendered { detections: usize },
  Failed(CycleError),
  Stopped,
}

#[derive(Debug)]
pub struct CycleReport {
  pub outcome: CycleOutcome,
  /// 本周期内张量的创建与释放次数
  pub resources: LedgerSnapshot,
  pub elapsed: Duration,
  /// 本周期依次进入的状态
  pub path: Vec<CycleState>,
  pub frame_index: Option<u64>,
}

impl CycleReport {
  pub fn is_balanced(&self) -> bool {
    self.resources.is_balanced()
  }
}

/// 停止信号，可在任意线程中触发
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn stop(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_stopped(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// 帧调度器
///
/// 每次 [`tick`](FrameScheduler::tick) 完整执行一个周期：
/// 获取帧、预处理、推理、归约、渲染、清理。周期之间严格串行，
/// 同一时刻最多只存在一个周期的临时张量。
pub struct FrameScheduler<S, M, R, L = CocoLabel> {
  source: S,
  model: M,
  output: R,
  preprocessor: Box<dyn Preprocess>,
  config: ReduceConfig,
  ledger: Ledger,
  state: CycleState,
  stop: StopHandle,
  _label: PhantomData<L>,
}

impl<S, M: Model, R> FrameScheduler<S, M, R> {
  pub fn new(source: S, model: M, output: R, config: ReduceConfig) -> Self {
    let ledger = Ledger::new();
    let preprocessor = Preprocessor::new().with_target_size(model.input_size());
    Self {
      source,
      model,
      output,
      preprocessor: Box::new(preprocessor),
      config,
      ledger,
      state: CycleState::Idle,
      stop: StopHandle::new(),
      _label: PhantomData,
    }
  }
}

impl<S, M, R, L> FrameScheduler<S, M, R, L> {
  /// 使用另一套类别标签解析类别编号
  pub fn with_labels<L2: WithLabel>(self) -> FrameScheduler<S, M, R, L2> {
    FrameScheduler {
      source: self.source,
      model: self.model,
      output: self.output,
      preprocessor: self.preprocessor,
      config: self.config,
      ledger: self.ledger,
      state: self.state,
      stop: self.stop,
      _label: PhantomData,
    }
  }

  pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
    self.stop = stop;
    self
  }

  /// 替换默认的 [`Preprocessor`]
  pub fn with_preprocessor<P: Preprocess + 'static>(mut self, preprocessor: P) -> Self {
    self.preprocessor = Box::new(preprocessor);
    self
  }

  pub fn stop_handle(&self) -> StopHandle {
    self.stop.clone()
  }

  pub fn state(&self) -> CycleState {
    self.state
  }

  pub fn ledger(&self) -> &Ledger {
    &self.ledger
  }

  pub fn config(&self) -> &ReduceConfig {
    &self.config
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  pub fn output(&self) -> &R {
    &self.output
  }
}

impl<S, M, R, L> FrameScheduler<S, M, R, L>
where
  S: FrameSource,
  M: Model,
  R: Render<RgbFrame, DetectionResult>,
  R::Error: Into<RenderError>,
  L: WithLabel,
{
  fn enter(&mut self, state: CycleState, path: &mut Vec<CycleState>) {
    debug!("状态 {:?} -> {:?}", self.state, state);
    self.state = state;
    path.push(state);
  }

  /// 在状态边界检查停止信号
  fn stop_requested(&mut self, path: &mut Vec<CycleState>) -> bool {
    if self.stop.is_stopped() {
      info!("收到停止信号，调度器停止");
      self.enter(CycleState::Stopped, path);
      true
    } else {
      false
    }
  }

  /// 预处理、推理、归约；各阶段产生的张量在返回前全部释放
  fn process(&mut self, frame: &RgbFrame) -> Result<DetectionResult, CycleError> {
    let input = self.preprocessor.to_input_buffer(frame, &self.ledger)?;
    let raw = self.model.infer(&input, &self.ledger);
    input.release();
    let result = reduce::<L>(raw?, frame.dimensions(), &self.config, &self.ledger)?;
    Ok(result)
  }

  /// 执行一个完整周期
  ///
  /// 调度器进入 [`CycleState::Stopped`] 后，`tick` 不再做任何事。
  pub fn tick(&mut self) -> CycleReport {
    let started = Instant::now();
    let before = self.ledger.snapshot();
    let mut path = Vec::new();
    let mut frame_index = None;

    let outcome = 'cycle: {
      if self.state == CycleState::Stopped || self.stop_requested(&mut path) {
        break 'cycle CycleOutcome::Stopped;
      }

      self.enter(CycleState::Acquiring, &mut path);
      let frame = match self.source.current_frame() {
        Some(frame) if self.source.is_ready() && !frame.is_empty() => frame,
        _ => {
          debug!("帧来源未就绪，跳过本周期");
          self.enter(CycleState::Idle, &mut path);
          break 'cycle CycleOutcome::NotReady;
        }
      };
      frame_index = Some(frame.index());
      if self.stop_requested(&mut path) {
        break 'cycle CycleOutcome::Stopped;
      }

      self.enter(CycleState::Processing, &mut path);
      let processed = self.process(&frame);
      if self.stop.is_stopped() {
        self.enter(CycleState::Cleanup, &mut path);
        drop(processed);
        info!("收到停止信号，丢弃本周期结果");
        self.enter(CycleState::Stopped, &mut path);
        break 'cycle CycleOutcome::Stopped;
      }

      let outcome = match processed {
        Ok(result) => {
          self.enter(CycleState::Rendering, &mut path);
          let detections = result.len();
          match self.output.render_result(&frame, &result) {
            Ok(()) => CycleOutcome::Rendered { detections },
            Err(e) => CycleOutcome::Failed(CycleError::Render(e.into())),
          }
        }
        Err(e) => CycleOutcome::Failed(e),
      };

      self.enter(CycleState::Cleanup, &mut path);
      if !self.stop_requested(&mut path) {
        self.enter(CycleState::Idle, &mut path);
      }
      outcome
    };

    if let CycleOutcome::Failed(e) = &outcome {
      warn!("帧 #{:?} 处理失败: {}", frame_index, e);
    }

    let resources = self.ledger.snapshot().since(&before);
    if !resources.is_balanced() {
      error!(
        "周期结束时张量未全部释放: 创建 {}, 释放 {}",
        resources.created, resources.released
      );
    }

    let elapsed = started.elapsed();
    debug!(
      "周期完成: {:?}, 耗时 {:.2?}, 张量 {}/{}",
      path, elapsed, resources.created, resources.released
    );

    CycleReport {
      outcome,
      resources,
      elapsed,
      path,
      frame_index,
    }
  }
}

/// 调度节拍
pub trait TickSource {
  /// 阻塞直到下一个节拍
  fn wait_next(&mut self);
}

/// 固定间隔节拍，处理耗时计入间隔
#[derive(Debug, Clone)]
pub struct FixedInterval {
  interval: Duration,
  next: Option<Instant>,
}

impl FixedInterval {
  pub fn new(interval: Duration) -> Self {
    Self {
      interval,
      next: None,
    }
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }
}

impl TickSource for FixedInterval {
  fn wait_next(&mut self) {
    let now = Instant::now();
    let deadline = match self.next {
      Some(deadline) if deadline > now => {
        thread::sleep(deadline - now);
        deadline
      }
      // 落后时不补拍
      _ => now,
    };
    self.next = Some(deadline + self.interval);
  }
}

/// 立即触发的节拍
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl TickSource for Immediate {
  fn wait_next(&mut self) {}
}

/// 任务运行统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSummary {
  pub cycles: u64,
  pub rendered: u64,
  pub not_ready: u64,
  pub failed: u64,
  pub detections: u64,
  pub created: u64,
  pub released: u64,
}

impl TaskSummary {
  pub fn record(&mut self, report: &CycleReport) {
    match &report.outcome {
      CycleOutcome::Stopped => return,
      CycleOutcome::NotReady => self.not_ready += 1,
      CycleOutcome::Rendered { detections } => {
        self.rendered += 1;
        self.detections += *detections as u64;
      }
      CycleOutcome::Failed(_) => self.failed += 1,
    }
    self.cycles += 1;
    self.created += report.resources.created;
    self.released += report.resources.released;
  }

  /// 实际处理过帧的周期数
  pub fn processed(&self) -> u64 {
    self.rendered + self.failed
  }
}

pub trait Task<S, M, R>: Sized {
  type Error;
  type Output;
  fn run_task(self, source: S, model: M, output: R) -> Result<Self::Output, Self::Error>;
}

/// 等待帧来源就绪后只处理一帧
pub struct OneShotTask {
  config: ReduceConfig,
  ready_timeout: Duration,
}

impl OneShotTask {
  const POLL_INTERVAL: Duration = Duration::from_millis(10);

  pub fn new(config: ReduceConfig) -> Self {
    Self {
      config,
      ready_timeout: Duration::from_secs(5),
    }
  }

  pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
    self.ready_timeout = timeout;
    self
  }
}

impl<S, M, R> Task<S, M, R> for OneShotTask
where
  S: FrameSource,
  M: Model,
  R: Render<RgbFrame, DetectionResult>,
  R::Error: Into<RenderError>,
{
  type Error = anyhow::Error;
  type Output = TaskSummary;

  fn run_task(self, source: S, model: M, output: R) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let deadline = Instant::now() + self.ready_timeout;
    while !source.is_ready() {
      if Instant::now() >= deadline {
        return Err(anyhow::anyhow!(
          "等待输入帧超时 ({:.2?})",
          self.ready_timeout
        ));
      }
      thread::sleep(Self::POLL_INTERVAL);
    }
    info!("输入帧就绪，开始处理...");

    let mut scheduler = FrameScheduler::new(source, model, output, self.config);
    let report = scheduler.tick();
    let mut summary = TaskSummary::default();
    summary.record(&report);
    info!("处理完成，耗时: {:.2?}", report.elapsed);

    match report.outcome {
      CycleOutcome::Failed(e) => Err(e.into()),
      CycleOutcome::NotReady => Err(anyhow::anyhow!("输入帧在处理前失效")),
      _ => Ok(summary),
    }
  }
}

/// 按固定节拍持续处理帧，直到收到停止信号或达到指定帧数
pub struct ContinuousTask<T = FixedInterval> {
  config: ReduceConfig,
  ticker: T,
  frame_number: Option<usize>,
  stop: StopHandle,
  handle_interrupt: bool,
}

impl ContinuousTask {
  pub fn new(config: ReduceConfig) -> Self {
    Self {
      config,
      ticker: FixedInterval::new(Duration::from_millis(33)),
      frame_number: None,
      stop: StopHandle::new(),
      handle_interrupt: true,
    }
  }
}

impl<T: TickSource> ContinuousTask<T> {
  pub fn with_ticker<U: TickSource>(self, ticker: U) -> ContinuousTask<U> {
    ContinuousTask {
      config: self.config,
      ticker,
      frame_number: self.frame_number,
      stop: self.stop,
      handle_interrupt: self.handle_interrupt,
    }
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
    self.stop = stop;
    self
  }

  /// 是否安装 Ctrl-C 处理器，进程内只能安装一次
  pub fn handle_interrupt(mut self, enable: bool) -> Self {
    self.handle_interrupt = enable;
    self
  }

  fn install_interrupt_handler(&self) -> Result<(), ctrlc::Error> {
    let stop = self.stop.clone();
    ctrlc::set_handler(move || {
      if stop.is_stopped() {
        return;
      }
      info!("收到中断信号，准备退出...");
      stop.stop();
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
  }
}

impl<S, M, R, T> Task<S, M, R> for ContinuousTask<T>
where
  S: FrameSource,
  M: Model,
  R: Render<RgbFrame, DetectionResult>,
  R::Error: Into<RenderError>,
  T: TickSource,
{
  type Error = anyhow::Error;
  type Output = TaskSummary;

  fn run_task(mut self, source: S, model: M, output: R) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    if self.handle_interrupt {
      self.install_interrupt_handler()?;
    }

    let mut scheduler =
      FrameScheduler::new(source, model, output, self.config).with_stop_handle(self.stop.clone());
    let mut summary = TaskSummary::default();

    loop {
      self.ticker.wait_next();
      let report = scheduler.tick();
      summary.record(&report);

      match &report.outcome {
        CycleOutcome::Stopped => {
          warn!("中断信号接收，退出任务循环");
          break;
        }
        CycleOutcome::Rendered { detections } => {
          info!(
            "第 {} 帧处理完成，检测到 {} 个目标，耗时: {:.2?}",
            summary.processed(),
            detections,
            report.elapsed
          );
        }
        _ => {}
      }

      if self
        .frame_number
        .is_some_and(|n| summary.processed() >= n as u64)
      {
        info!("达到指定帧数 {}, 退出任务循环", summary.processed());
        self.stop.stop();
        scheduler.tick();
        break;
      }
    }

    info!(
      "任务完成: {} 个周期, 渲染 {} 帧, 跳过 {} 次, 失败 {} 次, 检测 {} 个目标",
      summary.cycles, summary.rendered, summary.not_ready, summary.failed, summary.detections
    );
    Ok(summary)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stop_handle_is_shared_between_clones() {
    let stop = StopHandle::new();
    let other = stop.clone();
    assert!(!other.is_stopped());
    stop.stop();
    assert!(other.is_stopped());
  }

  #[test]
  fn fixed_interval_keeps_cadence() {
    let mut ticker = FixedInterval::new(Duration::from_millis(20));
    let started = Instant::now();
    ticker.wait_next();
    ticker.wait_next();
    ticker.wait_next();
    assert!(started.elapsed() >= Duration::from_millis(40));
  }

  #[test]
  fn summary_ignores_stopped_cycles() {
    let mut summary = TaskSummary::default();
    summary.record(&CycleReport {
      outcome: CycleOutcome::Rendered { detections: 2 },
      resources: LedgerSnapshot {
        created: 5,
        released: 5,
      },
      elapsed: Duration::ZERO,
      path: Vec::new(),
      frame_index: Some(0),
    });
    summary.record(&CycleReport {
      outcome: CycleOutcome::Stopped,
      resources: LedgerSnapshot::default(),
      elapsed: Duration::ZERO,
      path: vec![CycleState::Stopped],
      frame_index: None,
    });
    assert_eq!(summary.cycles, 1);
    assert_eq!(summary.detections, 2);
    assert_eq!(summary.processed(), 1);
  }
}
