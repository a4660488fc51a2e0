// 该文件是 Beifeng （北风） 项目的一部分。
// src/cancel.rs - 批次取消信号
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
  io::BufRead,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::Duration,
};

use tracing::{info, warn};

/// 批次取消信号
///
/// 只能从未取消变为已取消，重复调用 [`CancelToken::cancel`] 与调用一次效果相同。
/// 每个批次持有独立的信号，不跨批次复用。
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  cancelled: Arc<AtomicBool>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  /// 请求取消，仅第一次调用返回 `true`
  pub fn cancel(&self) -> bool {
    let first = !self.cancelled.swap(true, Ordering::AcqRel);
    if first {
      info!("收到取消请求");
    }
    first
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::Acquire)
  }
}

/// 收到 Ctrl-C 时取消批次，宽限期后仍未退出则强制结束进程
pub fn install_ctrlc_handler(token: CancelToken, grace: Duration) -> Result<(), ctrlc::Error> {
  ctrlc::set_handler(move || {
    if token.cancel() {
      info!("收到中断信号，等待任务收尾...");
      thread::spawn(move || {
        thread::sleep(grace);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    }
  })
}

/// 从输入流读取一行，非空则取消批次
pub fn watch_reader<R: BufRead>(token: &CancelToken, mut reader: R) -> bool {
  let mut line = String::new();
  match reader.read_line(&mut line) {
    Ok(_) if !line.trim().is_empty() => {
      info!("收到停止指令: {}", line.trim());
      token.cancel()
    }
    Ok(_) => false,
    Err(e) => {
      warn!("读取停止指令失败: {}", e);
      false
    }
  }
}

/// 在后台线程中监听标准输入
pub fn spawn_stdin_trigger(token: CancelToken) -> thread::JoinHandle<bool> {
  thread::spawn(move || watch_reader(&token, std::io::stdin().lock()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cancel_is_idempotent() {
    let token = CancelToken::new();
    assert!(!token.is_cancelled());
    assert!(token.cancel());
    assert!(!token.cancel());
    assert!(!token.cancel());
    assert!(token.is_cancelled());
  }

  #[test]
  fn clones_share_the_signal() {
    let token = CancelToken::new();
    let other = token.clone();
    thread::spawn(move || other.cancel()).join().unwrap();
    assert!(token.is_cancelled());
  }

  #[test]
  fn fresh_tokens_are_independent() {
    let first = CancelToken::new();
    first.cancel();
    assert!(!CancelToken::new().is_cancelled());
  }

  #[test]
  fn reader_trigger_needs_a_non_empty_line() {
    let token = CancelToken::new();
    assert!(!watch_reader(&token, "\n".as_bytes()));
    assert!(!watch_reader(&token, "".as_bytes()));
    assert!(!token.is_cancelled());
    assert!(watch_reader(&token, "stop\n".as_bytes()));
    assert!(token.is_cancelled());
  }
}
