// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/replay.rs - 回放检测器
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::SourceId,
  model::{
    BoundingBox, ConfigError, Detection, Detector, DetectorConfig, Taxonomy, TaxonomyError,
    filter_detections,
  },
};

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("类别表错误: {0}")]
  Taxonomy(#[from] TaxonomyError),
  #[error("参数 {key} 无效: {value}")]
  InvalidParameter { key: String, value: String },
  #[error("记录文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录文件 {path} 第 {line} 行格式错误: {reason}")]
  Parse {
    path: PathBuf,
    line: usize,
    reason: String,
  },
}

/// 回放检测器，从图像旁的记录文件读取检测结果
///
/// 记录文件为图像文件名后追加 `.txt`（`a.png` 对应 `a.png.txt`），每行一条 `label, score, x1, y1, x2, y2`，
/// 坐标为源图像像素坐标。记录文件不存在时视为没有检测到目标。
#[derive(Debug, Clone)]
pub struct ReplayDetector {
  config: DetectorConfig,
  taxonomy: Taxonomy,
}

pub struct ReplayDetectorBuilder {
  config: DetectorConfig,
  labels: Option<PathBuf>,
}

impl Default for ReplayDetectorBuilder {
  fn default() -> Self {
    Self {
      config: DetectorConfig::default(),
      labels: None,
    }
  }
}

impl FromUrlWithScheme for ReplayDetectorBuilder {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayDetectorBuilder {
  type Error = ReplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let mut builder = ReplayDetectorBuilder::default();
    for (key, value) in url.query_pairs() {
      let parse = |value: &str| {
        value
          .parse::<f32>()
          .map_err(|_| ReplayError::InvalidParameter {
            key: key.to_string(),
            value: value.to_string(),
          })
      };
      match key.as_ref() {
        "labels" => builder.labels = Some(PathBuf::from(value.as_ref())),
        "confidence" => builder.config.confidence_threshold = parse(value.as_ref())?,
        "overlap" => builder.config.overlap_threshold = parse(value.as_ref())?,
        _ => debug!("忽略未知参数: {}={}", key, value),
      }
    }

    Ok(builder)
  }
}

impl ReplayDetectorBuilder {
  pub fn config(mut self, config: DetectorConfig) -> Self {
    self.config = config;
    self
  }

  pub fn confidence_threshold(mut self, threshold: f32) -> Self {
    self.config.confidence_threshold = threshold;
    self
  }

  pub fn overlap_threshold(mut self, threshold: f32) -> Self {
    self.config.overlap_threshold = threshold;
    self
  }

  pub fn labels(mut self, path: impl Into<PathBuf>) -> Self {
    self.labels = Some(path.into());
    self
  }

  pub fn build(self) -> Result<ReplayDetector, ReplayError> {
    self.config.validate()?;
    let taxonomy = match &self.labels {
      Some(path) => {
        info!("加载类别文件: {}", path.display());
        Taxonomy::from_file(path)?
      }
      None => Taxonomy::coco(),
    };
    info!(
      "回放检测器就绪: 类别数 {}, 置信度阈值 {}, 重叠阈值 {}",
      taxonomy.len(),
      self.config.confidence_threshold,
      self.config.overlap_threshold
    );
    Ok(ReplayDetector {
      config: self.config,
      taxonomy,
    })
  }
}

impl ReplayDetector {
  pub fn record_path(source: &SourceId) -> PathBuf {
    let mut path = source.as_path().as_os_str().to_owned();
    path.push(".txt");
    PathBuf::from(path)
  }

  fn parse_record(
    &self,
    source: &SourceId,
    path: &Path,
    content: &str,
    width: f32,
    height: f32,
  ) -> Result<Vec<Detection>, ReplayError> {
    let mut detections = Vec::new();
    for (index, line) in content.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }
      let parse_error = |reason: String| ReplayError::Parse {
        path: path.to_path_buf(),
        line: index + 1,
        reason,
      };

      let fields: Vec<&str> = line.split(',').map(str::trim).collect();
      if fields.len() != 6 {
        return Err(parse_error(format!("期望 6 个字段, 实际 {}", fields.len())));
      }
      let label = self.taxonomy.label(fields[0])?;
      let mut numbers = [0f32; 5];
      for (slot, field) in numbers.iter_mut().zip(&fields[1..]) {
        *slot = field
          .parse()
          .map_err(|_| parse_error(format!("无法解析数值 '{}'", field)))?;
      }
      let [score, x1, y1, x2, y2] = numbers;
      if !(0.0..=1.0).contains(&score) {
        return Err(parse_error(format!("置信度超出范围: {}", score)));
      }

      let bbox = BoundingBox::new(x1, y1, x2, y2).clamp(width, height);
      detections.push(Detection::new(source.clone(), label, bbox, score));
    }
    Ok(detections)
  }
}

impl Detector for ReplayDetector {
  type Input = Frame;
  type Error = ReplayError;

  fn detect(&self, input: &Self::Input) -> Result<Vec<Detection>, Self::Error> {
    let path = Self::record_path(input.source());
    if !path.exists() {
      debug!("没有记录文件: {}", path.display());
      return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)?;
    let detections = self.parse_record(
      input.source(),
      &path,
      &content,
      input.width() as f32,
      input.height() as f32,
    )?;
    let raw = detections.len();
    let detections = filter_detections(detections, &self.config);
    debug!(
      "{}: 原始 {} 个目标, 过滤后 {} 个",
      input.source(),
      raw,
      detections.len()
    );
    Ok(detections)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  fn frame_with_record(dir: &Path, name: &str, record: Option<&str>) -> Frame {
    let source = SourceId::from(dir.join(name));
    if let Some(record) = record {
      std::fs::write(ReplayDetector::record_path(&source), record).unwrap();
    }
    Frame::new(source, RgbImage::new(100, 80))
  }

  #[test]
  fn builder_from_url_reads_query() {
    let url = Url::parse("replay://?confidence=0.5&overlap=0.4").unwrap();
    let builder = ReplayDetectorBuilder::from_url(&url).unwrap();
    assert_eq!(builder.config.confidence_threshold, 0.5);
    assert_eq!(builder.config.overlap_threshold, 0.4);
    assert!(builder.labels.is_none());
  }

  #[test]
  fn builder_rejects_other_schemes_and_bad_numbers() {
    let url = Url::parse("yolo://model.onnx").unwrap();
    assert!(matches!(
      ReplayDetectorBuilder::from_url(&url),
      Err(ReplayError::SchemeMismatch(_))
    ));
    let url = Url::parse("replay://?confidence=high").unwrap();
    assert!(matches!(
      ReplayDetectorBuilder::from_url(&url),
      Err(ReplayError::InvalidParameter { .. })
    ));
  }

  #[test]
  fn build_fails_on_invalid_thresholds_or_labels() {
    assert!(matches!(
      ReplayDetectorBuilder::default()
        .confidence_threshold(-0.1)
        .build(),
      Err(ReplayError::Config(_))
    ));
    assert!(matches!(
      ReplayDetectorBuilder::default()
        .labels("/nonexistent/labels.txt")
        .build(),
      Err(ReplayError::Taxonomy(TaxonomyError::IoError(_)))
    ));
  }

  #[test]
  fn missing_record_means_no_detections() {
    let dir = tempfile::tempdir().unwrap();
    let detector = ReplayDetectorBuilder::default().build().unwrap();
    let frame = frame_with_record(dir.path(), "empty.jpg", None);
    assert!(detector.detect(&frame).unwrap().is_empty());
  }

  #[test]
  fn record_is_filtered_and_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let detector = ReplayDetectorBuilder::default()
      .confidence_threshold(0.3)
      .build()
      .unwrap();
    let frame = frame_with_record(
      dir.path(),
      "street.jpg",
      Some("# label, score, x1, y1, x2, y2\ncar, 0.91, 10, 10, 150, 40\nperson, 0.42, 5, 5, 20, 60\ndog, 0.1, 0, 0, 1, 1\n"),
    );

    let detections = detector.detect(&frame).unwrap();
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0].label().as_str(), "car");
    assert_eq!(detections[0].bbox().x2(), 100.0);
    assert_eq!(detections[1].label().as_str(), "person");
    assert_eq!(detections[1].source(), frame.source());
  }

  #[test]
  fn malformed_record_is_a_per_image_error() {
    let dir = tempfile::tempdir().unwrap();
    let detector = ReplayDetectorBuilder::default().build().unwrap();

    let frame = frame_with_record(dir.path(), "a.jpg", Some("car, 0.9, 1, 2, 3\n"));
    assert!(matches!(
      detector.detect(&frame),
      Err(ReplayError::Parse { line: 1, .. })
    ));

    let frame = frame_with_record(dir.path(), "b.jpg", Some("spaceship, 0.9, 1, 2, 3, 4\n"));
    assert!(matches!(
      detector.detect(&frame),
      Err(ReplayError::Taxonomy(TaxonomyError::UnknownLabel(_)))
    ));
  }

  #[test]
  fn images_sharing_a_stem_keep_separate_records() {
    let dir = tempfile::tempdir().unwrap();
    let detector = ReplayDetectorBuilder::default().build().unwrap();
    let png = frame_with_record(dir.path(), "a.png", Some("car, 0.9, 1, 2, 3, 4\n"));
    let jpg = frame_with_record(dir.path(), "a.jpg", Some("dog, 0.8, 1, 2, 3, 4\n"));

    assert_eq!(
      ReplayDetector::record_path(png.source()),
      dir.path().join("a.png.txt")
    );
    assert_eq!(detector.detect(&png).unwrap()[0].label().as_str(), "car");
    assert_eq!(detector.detect(&jpg).unwrap()[0].label().as_str(), "dog");
  }

  #[test]
  fn custom_taxonomy_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let labels = dir.path().join("labels.txt");
    std::fs::write(&labels, "widget\ngadget\n").unwrap();
    let detector = ReplayDetectorBuilder::default()
      .labels(&labels)
      .build()
      .unwrap();

    let frame = frame_with_record(dir.path(), "c.png", Some("gadget, 0.8, 1, 2, 3, 4\n"));
    assert_eq!(detector.detect(&frame).unwrap()[0].label().as_str(), "gadget");
  }
}
