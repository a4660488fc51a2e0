// 该文件是 Beifeng （北风） 项目的一部分。
// src/task/consumer.rs - 检测结果消费者
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

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, info, warn};

use crate::{
  cancel::CancelToken,
  channel::{Entry, ResultReceiver},
  output::ResultSink,
  task::panic_message,
};

/// 取消后对通道中剩余检测结果的处理方式
///
/// 失败事件不受影响，总会送达输出端。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DrainPolicy {
  /// 取消前已入队的结果照常送达
  #[default]
  Flush,
  /// 观察到取消后，剩余检测结果取出即丢弃
  Discard,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
  /// 输出端成功接收的检测结果数
  pub delivered: usize,
  /// 收到的失败事件数
  pub failures: usize,
  pub discarded: usize,
  /// 输出端返回错误或崩溃的次数
  pub sink_errors: usize,
  /// 通道关闭时取消信号是否已置位
  pub cancelled: bool,
}

/// 唯一的结果消费者
///
/// 阻塞在通道上等待结果，通道关闭（所有任务结束且已取空）后返回。
/// 输出端出错或崩溃只影响当前这一项。
#[derive(Debug, Clone)]
pub struct ResultConsumer {
  token: CancelToken,
  policy: DrainPolicy,
}

impl ResultConsumer {
  pub fn new(token: CancelToken, policy: DrainPolicy) -> Self {
    Self { token, policy }
  }

  pub fn drain<S: ResultSink>(&self, receiver: ResultReceiver, sink: &mut S) -> ConsumerStats {
    let mut stats = ConsumerStats::default();
    let mut discarding = false;

    for entry in receiver {
      let is_detection = matches!(entry, Entry::Detection(..));
      if is_detection && self.policy == DrainPolicy::Discard && self.token.is_cancelled() {
        if !discarding {
          info!("已请求取消，丢弃剩余检测结果");
          discarding = true;
        }
        stats.discarded += 1;
        continue;
      }
      if !is_detection {
        stats.failures += 1;
      }

      let result = panic::catch_unwind(AssertUnwindSafe(|| match &entry {
        Entry::Detection(source, detection) => sink.accept(source, detection),
        Entry::Failure(failure) => sink.report_failure(failure),
      }));
      match result {
        Ok(Ok(())) => {
          if is_detection {
            stats.delivered += 1;
          }
        }
        Ok(Err(e)) => {
          stats.sink_errors += 1;
          warn!("{}: 输出失败: {}", entry.source(), e);
        }
        Err(payload) => {
          stats.sink_errors += 1;
          warn!("{}: 输出崩溃: {}", entry.source(), panic_message(payload));
        }
      }
    }

    stats.cancelled = self.token.is_cancelled();
    debug!("结果通道已关闭: {:?}", stats);
    stats
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    channel::result_channel,
    input::SourceId,
    model::{BoundingBox, Detection, Taxonomy},
    task::{JobError, JobFailure},
  };
  use std::fmt;

  #[derive(Debug)]
  struct Rejected;

  impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str("rejected")
    }
  }

  impl std::error::Error for Rejected {}

  /// 记录收到的结果，置信度低于 0.2 的拒收
  #[derive(Default)]
  struct Recorder {
    accepted: Vec<(SourceId, f32)>,
    failures: Vec<SourceId>,
  }

  impl ResultSink for Recorder {
    type Error = Rejected;

    fn accept(&mut self, source: &SourceId, detection: &Detection) -> Result<(), Self::Error> {
      if detection.confidence() < 0.2 {
        return Err(Rejected);
      }
      self.accepted.push((source.clone(), detection.confidence()));
      Ok(())
    }

    fn report_failure(&mut self, failure: &JobFailure) -> Result<(), Self::Error> {
      self.failures.push(failure.source().clone());
      Ok(())
    }
  }

  fn detection(source: &SourceId, confidence: f32) -> Detection {
    Detection::new(
      source.clone(),
      Taxonomy::coco().label("person").unwrap(),
      BoundingBox::new(0.0, 0.0, 1.0, 1.0),
      confidence,
    )
  }

  #[test]
  fn sink_errors_do_not_stop_the_drain() {
    let (tx, rx) = result_channel();
    let a = SourceId::from("a.jpg");
    for confidence in [0.9, 0.1, 0.8] {
      tx.push_detection(&a, detection(&a, confidence));
    }
    tx.push_failure(JobFailure::new(
      SourceId::from("b.jpg"),
      JobError::Panicked("boom".to_string()),
    ));
    drop(tx);

    let mut sink = Recorder::default();
    let stats = ResultConsumer::new(CancelToken::new(), DrainPolicy::Flush).drain(rx, &mut sink);
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.sink_errors, 1);
    assert_eq!(stats.failures, 1);
    assert_eq!(sink.accepted, vec![(a.clone(), 0.9), (a, 0.8)]);
    assert_eq!(sink.failures, vec![SourceId::from("b.jpg")]);
  }

  #[test]
  fn flush_delivers_entries_queued_before_cancellation() {
    let (tx, rx) = result_channel();
    let a = SourceId::from("a.jpg");
    tx.push_detection(&a, detection(&a, 0.9));
    tx.push_detection(&a, detection(&a, 0.7));
    drop(tx);
    let token = CancelToken::new();
    token.cancel();

    let mut sink = Recorder::default();
    let stats = ResultConsumer::new(token, DrainPolicy::Flush).drain(rx, &mut sink);
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.discarded, 0);
    assert!(stats.cancelled);
  }

  #[test]
  fn discard_drops_detections_but_keeps_failures() {
    let (tx, rx) = result_channel();
    let a = SourceId::from("a.jpg");
    tx.push_detection(&a, detection(&a, 0.9));
    tx.push_failure(JobFailure::new(
      SourceId::from("b.jpg"),
      JobError::Panicked("boom".to_string()),
    ));
    tx.push_detection(&a, detection(&a, 0.7));
    drop(tx);
    let token = CancelToken::new();
    token.cancel();

    let mut sink = Recorder::default();
    let stats = ResultConsumer::new(token, DrainPolicy::Discard).drain(rx, &mut sink);
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.discarded, 2);
    assert_eq!(stats.failures, 1);
    assert!(sink.accepted.is_empty());
    assert_eq!(sink.failures, vec![SourceId::from("b.jpg")]);
  }

  /// 第一次收到检测结果时崩溃
  #[derive(Default)]
  struct Fragile {
    armed: bool,
    accepted: usize,
  }

  impl ResultSink for Fragile {
    type Error = Rejected;

    fn accept(&mut self, _: &SourceId, _: &Detection) -> Result<(), Self::Error> {
      if !self.armed {
        self.armed = true;
        panic!("sink exploded");
      }
      self.accepted += 1;
      Ok(())
    }
  }

  #[test]
  fn sink_panic_only_loses_that_delivery() {
    let (tx, rx) = result_channel();
    let a = SourceId::from("a.jpg");
    for confidence in [0.9, 0.8, 0.7, 0.6] {
      tx.push_detection(&a, detection(&a, confidence));
    }
    drop(tx);

    let mut sink = Fragile::default();
    let stats = ResultConsumer::new(CancelToken::new(), DrainPolicy::Flush).drain(rx, &mut sink);
    assert_eq!(stats.sink_errors, 1);
    assert_eq!(stats.delivered, 3);
    assert_eq!(sink.accepted, 3);
  }
}
