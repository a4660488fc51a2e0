// 该文件是 Beifeng （北风） 项目的一部分。
// src/channel.rs - 检测结果通道
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

use std::sync::mpsc;

use tracing::debug;

use crate::{input::SourceId, model::Detection, task::JobFailure};

/// 结果通道中的一项，检测结果以产生它的任务的图像标识为键
#[derive(Debug)]
pub enum Entry {
  Detection(SourceId, Detection),
  Failure(JobFailure),
}

impl Entry {
  pub fn source(&self) -> &SourceId {
    match self {
      Entry::Detection(source, _) => source,
      Entry::Failure(failure) => failure.source(),
    }
  }
}

#[derive(Debug)]
pub enum TryRecv {
  Entry(Entry),
  Empty,
  Closed,
}

/// 多生产者单消费者的无界结果通道
///
/// 所有发送端被丢弃后通道关闭，接收端取完剩余结果后得到 `None`，
/// 以此表示批次内不会再有新的结果。
pub fn result_channel() -> (ResultSender, ResultReceiver) {
  let (tx, rx) = mpsc::channel();
  (ResultSender { tx }, ResultReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct ResultSender {
  tx: mpsc::Sender<Entry>,
}

impl ResultSender {
  /// 不阻塞；消费端已退出时丢弃结果并返回 `false`
  pub fn push(&self, entry: Entry) -> bool {
    match self.tx.send(entry) {
      Ok(()) => true,
      Err(mpsc::SendError(entry)) => {
        debug!("消费端已关闭，丢弃结果: {}", entry.source());
        false
      }
    }
  }

  pub fn push_detection(&self, source: &SourceId, detection: Detection) -> bool {
    self.push(Entry::Detection(source.clone(), detection))
  }

  pub fn push_failure(&self, failure: JobFailure) -> bool {
    self.push(Entry::Failure(failure))
  }
}

#[derive(Debug)]
pub struct ResultReceiver {
  rx: mpsc::Receiver<Entry>,
}

impl ResultReceiver {
  /// 阻塞直到取得结果，通道关闭且为空时返回 `None`
  pub fn recv(&self) -> Option<Entry> {
    self.rx.recv().ok()
  }

  pub fn try_recv(&self) -> TryRecv {
    match self.rx.try_recv() {
      Ok(entry) => TryRecv::Entry(entry),
      Err(mpsc::TryRecvError::Empty) => TryRecv::Empty,
      Err(mpsc::TryRecvError::Disconnected) => TryRecv::Closed,
    }
  }
}

impl Iterator for ResultReceiver {
  type Item = Entry;

  fn next(&mut self) -> Option<Self::Item> {
    self.recv()
  }
}
