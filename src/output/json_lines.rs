// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/json_lines.rs - JSON 行输出
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

use chrono::Local;
use serde_json::json;
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::SourceId,
  model::Detection,
  output::ResultSink,
  task::{BatchOutcome, BatchSummary, JobFailure},
};

#[derive(Error, Debug)]
pub enum JsonLinesOutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 每个事件输出一行 JSON
pub struct JsonLinesOutput<W> {
  writer: W,
}

impl<W: Write> JsonLinesOutput<W> {
  pub fn new(writer: W) -> Self {
    Self { writer }
  }

  pub fn into_inner(self) -> W {
    self.writer
  }

  fn write_value(&mut self, value: &serde_json::Value) -> Result<(), JsonLinesOutputError> {
    serde_json::to_writer(&mut self.writer, value)?;
    self.writer.write_all(b"\n")?;
    Ok(())
  }
}

impl FromUrlWithScheme for JsonLinesOutput<io::Stdout> {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonLinesOutput<io::Stdout> {
  type Error = JsonLinesOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonLinesOutputError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Ok(JsonLinesOutput::new(io::stdout()))
  }
}

impl<W: Write> ResultSink for JsonLinesOutput<W> {
  type Error = JsonLinesOutputError;

  fn accept(&mut self, source: &SourceId, detection: &Detection) -> Result<(), Self::Error> {
    let bbox = detection.bbox();
    self.write_value(&json!({
      "event": "detection",
      "source": source.to_string(),
      "label": detection.label().as_str(),
      "bbox": [bbox.x1(), bbox.y1(), bbox.x2(), bbox.y2()],
      "confidence": detection.confidence(),
      "timestamp": Local::now().to_rfc3339(),
    }))
  }

  fn report_failure(&mut self, failure: &JobFailure) -> Result<(), Self::Error> {
    self.write_value(&json!({
      "event": "failure",
      "source": failure.source().to_string(),
      "error": failure.error().to_string(),
      "timestamp": Local::now().to_rfc3339(),
    }))
  }

  fn finish(&mut self, summary: &BatchSummary) -> Result<(), Self::Error> {
    let (outcome, reason) = match &summary.outcome {
      BatchOutcome::Completed => ("completed", None),
      BatchOutcome::Cancelled => ("cancelled", None),
      BatchOutcome::Failed(reason) => ("failed", Some(reason.as_str())),
    };
    self.write_value(&json!({
      "event": "finished",
      "outcome": outcome,
      "reason": reason,
      "jobs_total": summary.jobs_total,
      "completed": summary.pool.completed,
      "truncated": summary.pool.truncated,
      "skipped": summary.pool.skipped,
      "failed": summary.pool.failed,
      "delivered": summary.consumer.delivered,
      "started_at": summary.started_at.to_rfc3339(),
      "elapsed_ms": summary.elapsed.as_millis() as u64,
    }))?;
    self.writer.flush()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BoundingBox, Taxonomy};

  #[test]
  fn detection_is_one_json_object_per_line() {
    let mut output = JsonLinesOutput::new(Vec::new());
    let source = SourceId::from("/data/a.jpg");
    let detection = Detection::new(
      source.clone(),
      Taxonomy::coco().label("person").unwrap(),
      BoundingBox::new(1.0, 2.0, 3.0, 4.0),
      0.5,
    );
    output.accept(&source, &detection).unwrap();
    output.accept(&source, &detection).unwrap();

    let text = String::from_utf8(output.into_inner()).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(value["event"], "detection");
    assert_eq!(value["source"], "/data/a.jpg");
    assert_eq!(value["label"], "person");
    assert_eq!(value["bbox"], json!([1.0, 2.0, 3.0, 4.0]));
    assert_eq!(value["confidence"], 0.5);
  }
}
