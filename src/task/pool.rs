// 该文件是 Beifeng （北风） 项目的一部分。
// src/task/pool.rs - 检测任务线程池
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
  panic::{self, AssertUnwindSafe},
  sync::atomic::{AtomicUsize, Ordering},
  thread,
  time::Instant,
};

use tracing::{debug, error, info, warn};

use crate::{
  cancel::CancelToken,
  channel::ResultSender,
  input::{Loader, SourceId},
  model::{Detection, Detector},
  task::{BatchState, JobError, JobFailure, panic_message},
};

/// 单个检测任务的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
  Completed { delivered: usize },
  /// 处理中途观察到取消，已送出的结果保留
  Truncated { delivered: usize, total: usize },
  /// 开始前已取消
  Skipped,
  Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
  pub completed: usize,
  pub truncated: usize,
  pub skipped: usize,
  pub failed: usize,
  pub detections_sent: usize,
  /// 所有任务结束时取消信号是否已置位
  pub cancelled: bool,
}

impl PoolStats {
  fn record(&mut self, status: JobStatus) {
    match status {
      JobStatus::Completed { delivered } => {
        self.completed += 1;
        self.detections_sent += delivered;
      }
      JobStatus::Truncated { delivered, .. } => {
        self.truncated += 1;
        self.detections_sent += delivered;
      }
      JobStatus::Skipped => self.skipped += 1,
      JobStatus::Failed => self.failed += 1,
    }
  }

  fn merge(&mut self, other: PoolStats) {
    self.completed += other.completed;
    self.truncated += other.truncated;
    self.skipped += other.skipped;
    self.failed += other.failed;
    self.detections_sent += other.detections_sent;
  }

  pub fn jobs_finished(&self) -> usize {
    self.completed + self.truncated + self.skipped + self.failed
  }
}

/// 固定宽度的工作线程池，每张图像一个检测任务
///
/// 工作线程从共享游标领取图像下标，直到所有图像被领取。
/// 每个线程持有一个发送端，全部线程退出后通道随之关闭。
pub struct Dispatcher<'a, D, L> {
  detector: &'a D,
  loader: &'a L,
  token: &'a CancelToken,
  state: &'a BatchState,
}

impl<'a, D, L> Dispatcher<'a, D, L>
where
  D: Detector<Input = L::Output> + Sync,
  L: Loader + Sync,
{
  pub fn new(detector: &'a D, loader: &'a L, token: &'a CancelToken, state: &'a BatchState) -> Self {
    Self {
      detector,
      loader,
      token,
      state,
    }
  }

  /// 阻塞直到每个任务都已完成、失败或观察到取消
  pub fn run(&self, images: &[SourceId], width: usize, sender: ResultSender) -> PoolStats {
    let cursor = AtomicUsize::new(0);
    let mut stats = PoolStats::default();

    thread::scope(|scope| {
      let workers: Vec<_> = (0..width)
        .map(|worker| {
          let sender = sender.clone();
          let cursor = &cursor;
          scope.spawn(move || self.work(worker, images, cursor, sender))
        })
        .collect();
      drop(sender);

      for (worker, handle) in workers.into_iter().enumerate() {
        match handle.join() {
          Ok(worker_stats) => stats.merge(worker_stats),
          Err(_) => error!("工作线程 {} 异常退出", worker),
        }
      }
    });

    stats.cancelled = self.token.is_cancelled();
    debug!("线程池结束: {:?}", stats);
    stats
  }

  fn work(
    &self,
    worker: usize,
    images: &[SourceId],
    cursor: &AtomicUsize,
    sender: ResultSender,
  ) -> PoolStats {
    let mut stats = PoolStats::default();
    loop {
      let index = cursor.fetch_add(1, Ordering::Relaxed);
      let Some(source) = images.get(index) else {
        break;
      };
      debug!("工作线程 {} 领取第 {} 张图像: {}", worker, index, source);
      let status = self.run_job(source, &sender);
      self.state.job_finished();
      stats.record(status);
    }
    stats
  }

  /// 执行一个检测任务
  ///
  /// 开始前与每个结果入队前检查取消信号。单张图像的错误或崩溃只结束本任务，
  /// 并作为失败事件送入结果通道。
  pub fn run_job(&self, source: &SourceId, sender: &ResultSender) -> JobStatus {
    if self.token.is_cancelled() {
      debug!("已请求取消，跳过: {}", source);
      return JobStatus::Skipped;
    }

    let now = Instant::now();
    let detections = match panic::catch_unwind(AssertUnwindSafe(|| self.infer(source))) {
      Ok(Ok(detections)) => detections,
      Ok(Err(e)) => return self.fail(source, e, sender),
      Err(payload) => {
        return self.fail(source, JobError::Panicked(panic_message(payload)), sender);
      }
    };
    debug!(
      "{}: 推理完成，耗时 {:.2?}，{} 个目标",
      source,
      now.elapsed(),
      detections.len()
    );

    let total = detections.len();
    for (delivered, detection) in detections.into_iter().enumerate() {
      if self.token.is_cancelled() {
        info!("{}: 已请求取消，停止送出剩余 {} 个目标", source, total - delivered);
        return JobStatus::Truncated { delivered, total };
      }
      sender.push_detection(source, detection);
    }
    JobStatus::Completed { delivered: total }
  }

  fn infer(&self, source: &SourceId) -> Result<Vec<Detection>, JobError> {
    let input = self
      .loader
      .load(source)
      .map_err(|e| JobError::Load(Box::new(e)))?;
    self
      .detector
      .detect(&input)
      .map_err(|e| JobError::Detect(Box::new(e)))
  }

  fn fail(&self, source: &SourceId, error: JobError, sender: &ResultSender) -> JobStatus {
    warn!("{}: {}", source, error);
    sender.push_failure(JobFailure::new(source.clone(), error));
    JobStatus::Failed
  }
}
