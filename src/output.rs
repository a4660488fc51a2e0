// 该文件是 Beifeng （北风） 项目的一部分。
// src/output.rs - 输出定义
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

use std::io;

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::SourceId,
  model::Detection,
  task::{BatchSummary, JobFailure},
};

/// 检测结果的去处
///
/// 只在唯一的结果消费线程上调用，调用可能较慢，但不会阻塞检测任务。
pub trait ResultSink {
  type Error: std::error::Error + Send + Sync + 'static;

  fn accept(&mut self, source: &SourceId, detection: &Detection) -> Result<(), Self::Error>;

  fn report_failure(&mut self, failure: &JobFailure) -> Result<(), Self::Error> {
    let _ = failure;
    Ok(())
  }

  fn finish(&mut self, summary: &BatchSummary) -> Result<(), Self::Error> {
    let _ = summary;
    Ok(())
  }
}

mod console;
pub use self::console::{ConsoleOutput, ConsoleOutputError};

mod json_lines;
pub use self::json_lines::{JsonLinesOutput, JsonLinesOutputError};

#[cfg(feature = "annotate")]
pub mod draw;

#[cfg(feature = "annotate")]
mod annotate;
#[cfg(feature = "annotate")]
pub use self::annotate::{AnnotateOutput, AnnotateOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("控制台输出错误: {0}")]
  ConsoleOutputError(#[from] ConsoleOutputError),
  #[error("JSON 行输出错误: {0}")]
  JsonLinesOutputError(#[from] JsonLinesOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  Console(ConsoleOutput<io::Stdout>),
  JsonLines(JsonLinesOutput<io::Stdout>),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ConsoleOutput::<io::Stdout>::SCHEME => {
        Ok(OutputWrapper::Console(ConsoleOutput::from_url(url)?))
      }
      JsonLinesOutput::<io::Stdout>::SCHEME => {
        Ok(OutputWrapper::JsonLines(JsonLinesOutput::from_url(url)?))
      }
      scheme => Err(OutputError::SchemeMismatch(scheme.to_string())),
    }
  }
}

impl ResultSink for OutputWrapper {
  type Error = OutputError;

  fn accept(&mut self, source: &SourceId, detection: &Detection) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Console(output) => output.accept(source, detection).map_err(OutputError::from),
      OutputWrapper::JsonLines(output) => {
        output.accept(source, detection).map_err(OutputError::from)
      }
    }
  }

  fn report_failure(&mut self, failure: &JobFailure) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Console(output) => output.report_failure(failure).map_err(OutputError::from),
      OutputWrapper::JsonLines(output) => {
        output.report_failure(failure).map_err(OutputError::from)
      }
    }
  }

  fn finish(&mut self, summary: &BatchSummary) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Console(output) => output.finish(summary).map_err(OutputError::from),
      OutputWrapper::JsonLines(output) => output.finish(summary).map_err(OutputError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn output_is_selected_by_scheme() {
    let url = Url::parse("console:").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Ok(OutputWrapper::Console(_))
    ));
    let url = Url::parse("jsonl:").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Ok(OutputWrapper::JsonLines(_))
    ));
    let url = Url::parse("rtsp://camera/stream").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Err(OutputError::SchemeMismatch(_))
    ));
  }
}
