// 该文件是 Beifeng （北风） 项目的一部分。
// src/task.rs - 批次任务与状态
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
  any::Any,
  fmt,
  sync::{
    Arc,
    atomic::{AtomicU8, AtomicUsize, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  cancel::CancelToken,
  channel::result_channel,
  input::{Loader, SourceId},
  model::Detector,
  output::ResultSink,
};

mod consumer;
mod pool;

pub use self::consumer::{ConsumerStats, DrainPolicy, ResultConsumer};
pub use self::pool::{Dispatcher, JobStatus, PoolStats};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 单张图像的失败原因，只影响该图像所在的任务
#[derive(Error, Debug)]
pub enum JobError {
  #[error("图像读取失败: {0}")]
  Load(#[source] BoxError),
  #[error("检测失败: {0}")]
  Detect(#[source] BoxError),
  #[error("检测任务崩溃: {0}")]
  Panicked(String),
}

/// 失败事件，附带出错图像的标识
#[derive(Debug)]
pub struct JobFailure {
  source: SourceId,
  error: JobError,
}

impl JobFailure {
  pub fn new(source: SourceId, error: JobError) -> Self {
    Self { source, error }
  }

  pub fn source(&self) -> &SourceId {
    &self.source
  }

  pub fn error(&self) -> &JobError {
    &self.error
  }
}

impl fmt::Display for JobFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.source, self.error)
  }
}

/// 取出崩溃时携带的消息
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "未知错误".to_string()
  }
}

#[derive(Error, Debug)]
pub enum BatchError {
  #[error("{0} 线程异常退出")]
  ThreadPanicked(&'static str),
}

/// 批次状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
  Idle,
  Running,
  Completed,
  Cancelled,
  Failed,
}

impl BatchStatus {
  fn from_u8(value: u8) -> Self {
    match value {
      0 => BatchStatus::Idle,
      1 => BatchStatus::Running,
      2 => BatchStatus::Completed,
      3 => BatchStatus::Cancelled,
      _ => BatchStatus::Failed,
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      BatchStatus::Completed | BatchStatus::Cancelled | BatchStatus::Failed
    )
  }
}

/// 批次的终止状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
  Completed,
  Cancelled,
  Failed(String),
}

impl BatchOutcome {
  pub fn status(&self) -> BatchStatus {
    match self {
      BatchOutcome::Completed => BatchStatus::Completed,
      BatchOutcome::Cancelled => BatchStatus::Cancelled,
      BatchOutcome::Failed(_) => BatchStatus::Failed,
    }
  }
}

impl fmt::Display for BatchOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BatchOutcome::Completed => f.write_str("已完成"),
      BatchOutcome::Cancelled => f.write_str("已取消"),
      BatchOutcome::Failed(reason) => write!(f, "失败: {}", reason),
    }
  }
}

/// 一个批次的共享状态，只通过原子操作修改
#[derive(Debug)]
pub struct BatchState {
  token: CancelToken,
  status: AtomicU8,
  jobs_total: usize,
  jobs_remaining: AtomicUsize,
}

impl BatchState {
  fn new(token: CancelToken, jobs_total: usize) -> Self {
    Self {
      token,
      status: AtomicU8::new(BatchStatus::Running as u8),
      jobs_total,
      jobs_remaining: AtomicUsize::new(jobs_total),
    }
  }

  pub fn cancel_requested(&self) -> bool {
    self.token.is_cancelled()
  }

  pub fn status(&self) -> BatchStatus {
    BatchStatus::from_u8(self.status.load(Ordering::Acquire))
  }

  fn finish(&self, status: BatchStatus) {
    self.status.store(status as u8, Ordering::Release);
  }

  pub fn jobs_total(&self) -> usize {
    self.jobs_total
  }

  pub fn jobs_remaining(&self) -> usize {
    self.jobs_remaining.load(Ordering::Acquire)
  }

  pub(crate) fn job_finished(&self) {
    self.jobs_remaining.fetch_sub(1, Ordering::AcqRel);
  }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
  /// 并发任务数，0 表示每张图像一个线程
  pub workers: usize,
  pub drain: DrainPolicy,
}

impl Default for BatchConfig {
  fn default() -> Self {
    Self {
      workers: thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1),
      drain: DrainPolicy::default(),
    }
  }
}

impl BatchConfig {
  pub fn with_workers(mut self, workers: usize) -> Self {
    self.workers = workers;
    self
  }

  pub fn with_drain(mut self, drain: DrainPolicy) -> Self {
    self.drain = drain;
    self
  }

  fn pool_width(&self, jobs: usize) -> usize {
    if self.workers == 0 {
      jobs
    } else {
      self.workers.min(jobs)
    }
  }
}

/// 批次结束时的统计
#[derive(Debug, Clone)]
pub struct BatchSummary {
  pub outcome: BatchOutcome,
  pub jobs_total: usize,
  pub pool: PoolStats,
  pub consumer: ConsumerStats,
  pub started_at: DateTime<Local>,
  pub elapsed: Duration,
}

pub struct BatchReport<S> {
  pub summary: BatchSummary,
  pub sink: S,
}

/// 尚未启动的批次
///
/// 每个批次拥有独立的取消信号。[`Batch::start`] 消耗批次本身，
/// 结束后的状态和取消信号都不会被下一个批次复用。
#[derive(Debug, Default)]
pub struct Batch {
  config: BatchConfig,
  token: CancelToken,
}

impl Batch {
  pub fn new(config: BatchConfig) -> Self {
    Self {
      config,
      token: CancelToken::new(),
    }
  }

  pub fn status(&self) -> BatchStatus {
    BatchStatus::Idle
  }

  /// 启动前即可取得取消信号；启动前取消的批次不会产生任何检测结果
  pub fn cancel_token(&self) -> CancelToken {
    self.token.clone()
  }

  /// 启动批次
  ///
  /// `detector` 在分发线程上构造，构造失败时批次直接进入 `Failed`，不会启动任何任务。
  pub fn start<F, E, D, L, S>(
    self,
    images: Vec<SourceId>,
    detector: F,
    loader: L,
    sink: S,
  ) -> BatchHandle<S>
  where
    F: FnOnce() -> Result<D, E> + Send + 'static,
    E: fmt::Display + 'static,
    D: Detector<Input = L::Output> + Sync + 'static,
    L: Loader + Send + Sync + 'static,
    S: ResultSink + Send + 'static,
  {
    let started_at = Local::now();
    let started = Instant::now();
    let Batch { config, token } = self;
    let state = Arc::new(BatchState::new(token.clone(), images.len()));
    let width = config.pool_width(images.len());
    info!(
      "批次开始: {} 张图像, {} 个工作线程, 结果处理策略 {:?}",
      images.len(),
      width,
      config.drain
    );

    let (sender, receiver) = result_channel();

    let dispatcher = {
      let state = state.clone();
      let token = token.clone();
      thread::spawn(move || {
        let detector = match detector() {
          Ok(detector) => detector,
          Err(e) => {
            error!("检测器初始化失败: {}", e);
            return Err(e.to_string());
          }
        };
        let dispatcher = Dispatcher::new(&detector, &loader, &token, &state);
        Ok(dispatcher.run(&images, width, sender))
      })
    };

    let consumer = {
      let consumer = ResultConsumer::new(token.clone(), config.drain);
      thread::spawn(move || {
        let mut sink = sink;
        let stats = consumer.drain(receiver, &mut sink);
        (sink, stats)
      })
    };

    BatchHandle {
      state,
      token,
      dispatcher,
      consumer,
      started_at,
      started,
    }
  }
}

/// 运行中的批次
pub struct BatchHandle<S> {
  state: Arc<BatchState>,
  token: CancelToken,
  dispatcher: thread::JoinHandle<Result<PoolStats, String>>,
  consumer: thread::JoinHandle<(S, ConsumerStats)>,
  started_at: DateTime<Local>,
  started: Instant,
}

impl<S: ResultSink> BatchHandle<S> {
  pub fn cancel(&self) -> bool {
    self.token.cancel()
  }

  pub fn cancel_token(&self) -> CancelToken {
    self.token.clone()
  }

  pub fn state(&self) -> &BatchState {
    &self.state
  }

  pub fn is_finished(&self) -> bool {
    self.dispatcher.is_finished() && self.consumer.is_finished()
  }

  /// 等待所有任务结束且结果通道取空
  pub fn wait(self) -> Result<BatchReport<S>, BatchError> {
    let pool = self
      .dispatcher
      .join()
      .map_err(|_| BatchError::ThreadPanicked("分发"))?;
    let (mut sink, consumer) = self
      .consumer
      .join()
      .map_err(|_| BatchError::ThreadPanicked("结果处理"))?;

    // 以通道关闭时的取消信号为准，之后的取消不改变结果
    let (outcome, pool) = match pool {
      Err(reason) => (BatchOutcome::Failed(reason), PoolStats::default()),
      Ok(pool) if pool.cancelled || consumer.cancelled => (BatchOutcome::Cancelled, pool),
      Ok(pool) => (BatchOutcome::Completed, pool),
    };
    self.state.finish(outcome.status());

    let summary = BatchSummary {
      outcome,
      jobs_total: self.state.jobs_total(),
      pool,
      consumer,
      started_at: self.started_at,
      elapsed: self.started.elapsed(),
    };
    info!(
      "批次结束: {}, 耗时 {:.2?}, 送达 {} 个目标, 失败 {} 张",
      summary.outcome, summary.elapsed, summary.consumer.delivered, summary.pool.failed
    );

    if let Err(e) = sink.finish(&summary) {
      warn!("输出收尾失败: {}", e);
    }

    Ok(BatchReport { summary, sink })
  }
}
