// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/console.rs - 控制台文本输出
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

use std::io::{self, Write};

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::SourceId,
  model::Detection,
  output::ResultSink,
  task::{BatchSummary, JobFailure},
};

#[derive(Error, Debug)]
pub enum ConsoleOutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] io::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 每个目标输出一行文本
pub struct ConsoleOutput<W> {
  writer: W,
}

impl<W: Write> ConsoleOutput<W> {
  pub fn new(writer: W) -> Self {
    Self { writer }
  }

  pub fn into_inner(self) -> W {
    self.writer
  }
}

impl FromUrlWithScheme for ConsoleOutput<io::Stdout> {
  const SCHEME: &'static str = "console";
}

impl FromUrl for ConsoleOutput<io::Stdout> {
  type Error = ConsoleOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConsoleOutputError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Ok(ConsoleOutput::new(io::stdout()))
  }
}

impl<W: Write> ResultSink for ConsoleOutput<W> {
  type Error = ConsoleOutputError;

  fn accept(&mut self, source: &SourceId, detection: &Detection) -> Result<(), Self::Error> {
    let bbox = detection.bbox();
    writeln!(
      self.writer,
      "图像: {}, 目标: {}, 区域 ({:.1}, {:.1}) - ({:.1}, {:.1}), 置信度: {:.2}",
      source,
      detection.label(),
      bbox.x1(),
      bbox.y1(),
      bbox.x2(),
      bbox.y2(),
      detection.confidence()
    )?;
    Ok(())
  }

  fn report_failure(&mut self, failure: &JobFailure) -> Result<(), Self::Error> {
    writeln!(
      self.writer,
      "图像: {}, 处理失败: {}",
      failure.source(),
      failure.error()
    )?;
    Ok(())
  }

  fn finish(&mut self, summary: &BatchSummary) -> Result<(), Self::Error> {
    writeln!(self.writer)?;
    writeln!(self.writer, "处理{}!", summary.outcome)?;
    writeln!(
      self.writer,
      "总图像数: {}, 完成: {}, 中断: {}, 跳过: {}, 失败: {}",
      summary.jobs_total,
      summary.pool.completed,
      summary.pool.truncated,
      summary.pool.skipped,
      summary.pool.failed
    )?;
    writeln!(self.writer, "总检测数: {}", summary.consumer.delivered)?;
    writeln!(self.writer, "耗时: {} ms", summary.elapsed.as_millis())?;
    self.writer.flush()?;
    Ok(())
  }
}
