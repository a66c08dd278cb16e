// 该文件是 Liuguang （流光） 项目的一部分。
// src/tensor.rs - 张量资源句柄与资源账本
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

//! # 张量资源
//!
//! 每一帧处理过程中产生的中间缓冲区（模型输入、原始输出、候选集）都是
//! [`Tensor`]。张量只能通过 [`Ledger::alloc`] 创建，账本记录创建与释放次数；
//! 张量在 [`Tensor::release`] 或离开作用域时释放，且只释放一次。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
  #[error("形状与数据长度不匹配: 形状 {shape:?} 需要 {expected} 个元素, 实际 {actual} 个")]
  ShapeMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
}

#[derive(Debug, Default)]
struct Counters {
  created: AtomicU64,
  released: AtomicU64,
}

/// 资源账本，可廉价克隆，所有克隆共享同一组计数器
#[derive(Debug, Clone, Default)]
pub struct Ledger {
  counters: Arc<Counters>,
}

/// 某一时刻账本计数的快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerSnapshot {
  pub created: u64,
  pub released: u64,
}

impl LedgerSnapshot {
  /// 计算自 `earlier` 以来新增的创建与释放次数
  pub fn since(&self, earlier: &LedgerSnapshot) -> LedgerSnapshot {
    LedgerSnapshot {
      created: self.created.saturating_sub(earlier.created),
      released: self.released.saturating_sub(earlier.released),
    }
  }

  pub fn is_balanced(&self) -> bool {
    self.created == self.released
  }
}

impl Ledger {
  pub fn new() -> Self {
    Self::default()
  }

  /// 创建一个新的张量，数据按行主序排列
  pub fn alloc<T>(&self, shape: &[usize], data: Vec<T>) -> Result<Tensor<T>, TensorError> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
      return Err(TensorError::ShapeMismatch {
        shape: shape.to_vec(),
        expected,
        actual: data.len(),
      });
    }

    let id = self.counters.created.fetch_add(1, Ordering::SeqCst) + 1;
    trace!("创建张量 #{}: {:?}", id, shape);

    Ok(Tensor {
      shape: shape.into(),
      data: data.into_boxed_slice(),
      guard: ReleaseGuard {
        ledger: self.clone(),
        id,
        released: false,
      },
    })
  }

  pub fn snapshot(&self) -> LedgerSnapshot {
    LedgerSnapshot {
      created: self.counters.created.load(Ordering::SeqCst),
      released: self.counters.released.load(Ordering::SeqCst),
    }
  }

  /// 当前尚未释放的张量数量
  pub fn live(&self) -> u64 {
    let snapshot = self.snapshot();
    snapshot.created.saturating_sub(snapshot.released)
  }
}

struct ReleaseGuard {
  ledger: Ledger,
  id: u64,
  released: bool,
}

impl ReleaseGuard {
  fn release(&mut self) {
    if self.released {
      return;
    }
    self.released = true;
    self.ledger.counters.released.fetch_add(1, Ordering::SeqCst);
    trace!("释放张量 #{}", self.id);
  }
}

impl Drop for ReleaseGuard {
  fn drop(&mut self) {
    self.release();
  }
}

/// 单一所有者的数值缓冲区
pub struct Tensor<T> {
  shape: Box<[usize]>,
  data: Box<[T]>,
  guard: ReleaseGuard,
}

impl<T> Tensor<T> {
  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data(&self) -> &[T] {
    &self.data
  }

  pub fn rank(&self) -> usize {
    self.shape.len()
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// 按最后一维切分的第 `index` 行，仅在秩至少为 1 时有意义
  pub fn row(&self, index: usize) -> Option<&[T]> {
    let width = *self.shape.last()?;
    if width == 0 {
      return None;
    }
    self.data.chunks_exact(width).nth(index)
  }

  /// 显式释放张量
  pub fn release(mut self) {
    self.guard.release();
  }
}

impl<T: Clone> Tensor<T> {
  /// 去掉所有长度为 1 的维度，得到一个新的张量句柄
  pub fn squeeze(&self) -> Tensor<T> {
    let shape: Vec<usize> = self.shape.iter().copied().filter(|&d| d != 1).collect();
    let ledger = &self.guard.ledger;
    let id = ledger.counters.created.fetch_add(1, Ordering::SeqCst) + 1;
    trace!("创建张量 #{} (squeeze #{}): {:?}", id, self.guard.id, shape);

    Tensor {
      shape: shape.into_boxed_slice(),
      data: self.data.clone(),
      guard: ReleaseGuard {
        ledger: ledger.clone(),
        id,
        released: false,
      },
    }
  }
}

impl<T> fmt::Debug for Tensor<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Tensor")
      .field("id", &self.guard.id)
      .field("shape", &self.shape)
      .finish()
  }
}
