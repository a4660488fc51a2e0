// 该文件是 Beifeng （北风） 项目的一部分。
// src/model.rs - 检测结果与检测器定义
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

use std::{borrow::Borrow, collections::HashSet, fmt, path::Path, sync::Arc};

use thiserror::Error;

use crate::input::SourceId;

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorbike",
  "aeroplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "sofa",
  "pottedplant",
  "bed",
  "diningtable",
  "toilet",
  "tvmonitor",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 检测模型
///
/// 一次调用处理一张图像，调用本身不可中断。
pub trait Detector {
  type Input;
  type Error: std::error::Error + Send + Sync + 'static;

  fn detect(&self, input: &Self::Input) -> Result<Vec<Detection>, Self::Error>;
}

/// 检测阈值配置，一个批次内固定不变
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
  pub confidence_threshold: f32,
  pub overlap_threshold: f32,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: 0.3,
      overlap_threshold: 0.7,
    }
  }
}

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("置信度阈值超出范围 [0, 1]: {0}")]
  ConfidenceOutOfRange(f32),
  #[error("重叠阈值超出范围 [0, 1]: {0}")]
  OverlapOutOfRange(f32),
}

impl DetectorConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&self.confidence_threshold) {
      return Err(ConfigError::ConfidenceOutOfRange(self.confidence_threshold));
    }
    if !(0.0..=1.0).contains(&self.overlap_threshold) {
      return Err(ConfigError::OverlapOutOfRange(self.overlap_threshold));
    }
    Ok(())
  }
}

/// 边界框，源图像像素坐标，保证 x1 <= x2 且 y1 <= y2
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  x1: f32,
  y1: f32,
  x2: f32,
  y2: f32,
}

impl BoundingBox {
  /// 角点顺序颠倒时自动交换
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self {
      x1: x1.min(x2),
      y1: y1.min(y2),
      x2: x1.max(x2),
      y2: y1.max(y2),
    }
  }

  pub fn x1(&self) -> f32 {
    self.x1
  }

  pub fn y1(&self) -> f32 {
    self.y1
  }

  pub fn x2(&self) -> f32 {
    self.x2
  }

  pub fn y2(&self) -> f32 {
    self.y2
  }

  pub fn width(&self) -> f32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  pub fn clamp(&self, width: f32, height: f32) -> Self {
    Self::new(
      self.x1.clamp(0.0, width),
      self.y1.clamp(0.0, height),
      self.x2.clamp(0.0, width),
      self.y2.clamp(0.0, height),
    )
  }

  pub fn iou(&self, other: &BoundingBox) -> f32 {
    let ix1 = self.x1.max(other.x1);
    let iy1 = self.y1.max(other.y1);
    let ix2 = self.x2.min(other.x2);
    let iy2 = self.y2.min(other.y2);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let union = self.area() + other.area() - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
  }
}

impl From<[f32; 4]> for BoundingBox {
  fn from(bbox: [f32; 4]) -> Self {
    BoundingBox::new(bbox[0], bbox[1], bbox[2], bbox[3])
  }
}

/// 一个识别出的目标实例，创建后不可修改
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  source: SourceId,
  label: Label,
  bbox: BoundingBox,
  confidence: f32,
}

impl Detection {
  pub fn new(source: SourceId, label: Label, bbox: BoundingBox, confidence: f32) -> Self {
    Self {
      source,
      label,
      bbox,
      confidence: confidence.clamp(0.0, 1.0),
    }
  }

  pub fn source(&self) -> &SourceId {
    &self.source
  }

  pub fn label(&self) -> &Label {
    &self.label
  }

  pub fn bbox(&self) -> &BoundingBox {
    &self.bbox
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }
}

/// 类别名称，来自一个封闭的类别表
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label(Arc<str>);

impl Label {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl Borrow<str> for Label {
  fn borrow(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Label {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Error, Debug)]
pub enum TaxonomyError {
  #[error("类别文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("类别表为空")]
  Empty,
  #[error("未知类别: {0}")]
  UnknownLabel(String),
}

/// 封闭的类别表，与顺序无关
#[derive(Debug, Clone)]
pub struct Taxonomy {
  labels: HashSet<Label>,
}

impl Default for Taxonomy {
  fn default() -> Self {
    Self::coco()
  }
}

impl Taxonomy {
  pub fn coco() -> Self {
    Self::from_names(COCO_CLASSES).expect("COCO 类别表非空")
  }

  pub fn from_names<I, S>(names: I) -> Result<Self, TaxonomyError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let labels: HashSet<Label> = names
      .into_iter()
      .map(|name| name.as_ref().trim().to_string())
      .filter(|name| !name.is_empty())
      .map(|name| Label(Arc::from(name)))
      .collect();
    if labels.is_empty() {
      return Err(TaxonomyError::Empty);
    }
    Ok(Self { labels })
  }

  /// 每行一个类别名称
  pub fn from_file(path: &Path) -> Result<Self, TaxonomyError> {
    let content = std::fs::read_to_string(path)?;
    Self::from_names(content.lines())
  }

  pub fn label(&self, name: &str) -> Result<Label, TaxonomyError> {
    self
      .labels
      .get(name.trim())
      .cloned()
      .ok_or_else(|| TaxonomyError::UnknownLabel(name.to_string()))
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }
}

/// 按置信度阈值过滤，再按类别做贪心 NMS，保留顺序为置信度降序
pub fn filter_detections(detections: Vec<Detection>, config: &DetectorConfig) -> Vec<Detection> {
  let mut candidates: Vec<Detection> = detections
    .into_iter()
    .filter(|d| d.confidence() >= config.confidence_threshold)
    .collect();
  candidates.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));

  let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
  for candidate in candidates {
    let suppressed = kept.iter().any(|k| {
      k.label() == candidate.label() && k.bbox().iou(candidate.bbox()) > config.overlap_threshold
    });
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}

mod replay;
pub use self::replay::{ReplayDetector, ReplayDetectorBuilder, ReplayError};

#[cfg(test)]
mod tests {
  use super::*;

  fn det(label: &Label, bbox: [f32; 4], confidence: f32) -> Detection {
    Detection::new(SourceId::from("a.jpg"), label.clone(), bbox.into(), confidence)
  }

  #[test]
  fn bbox_normalizes_corner_order() {
    let bbox = BoundingBox::new(10.0, 20.0, 5.0, 2.0);
    assert_eq!((bbox.x1(), bbox.y1(), bbox.x2(), bbox.y2()), (5.0, 2.0, 10.0, 20.0));
  }

  #[test]
  fn iou_of_identical_and_disjoint_boxes() {
    let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
    assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    assert_eq!(a.iou(&b), 0.0);
  }

  #[test]
  fn taxonomy_rejects_unknown_labels() {
    let taxonomy = Taxonomy::coco();
    assert_eq!(taxonomy.len(), 80);
    assert_eq!(taxonomy.label("car").unwrap().as_str(), "car");
    assert!(matches!(
      taxonomy.label("spaceship"),
      Err(TaxonomyError::UnknownLabel(_))
    ));
  }

  #[test]
  fn label_lookup_by_name_ignores_surrounding_whitespace() {
    let taxonomy = Taxonomy::from_names(["traffic light", "car"]).unwrap();
    let label = taxonomy.label("  traffic light ").unwrap();
    assert_eq!(label.as_str(), "traffic light");
    assert_eq!(label, taxonomy.label("traffic light").unwrap());
    assert_eq!(taxonomy.len(), 2);
  }

  #[test]
  fn empty_taxonomy_is_an_error() {
    assert!(matches!(
      Taxonomy::from_names(["", "  "]),
      Err(TaxonomyError::Empty)
    ));
  }

  #[test]
  fn config_validation() {
    assert!(DetectorConfig::default().validate().is_ok());
    let bad = DetectorConfig {
      confidence_threshold: 1.5,
      overlap_threshold: 0.5,
    };
    assert!(matches!(
      bad.validate(),
      Err(ConfigError::ConfidenceOutOfRange(_))
    ));
  }

  #[test]
  fn filter_applies_threshold_and_nms_per_label() {
    let taxonomy = Taxonomy::coco();
    let car = taxonomy.label("car").unwrap();
    let person = taxonomy.label("person").unwrap();
    let detections = vec![
      det(&car, [0.0, 0.0, 10.0, 10.0], 0.8),
      det(&car, [1.0, 1.0, 10.0, 10.0], 0.9),
      det(&person, [1.0, 1.0, 10.0, 10.0], 0.5),
      det(&car, [50.0, 50.0, 60.0, 60.0], 0.2),
    ];
    let config = DetectorConfig {
      confidence_threshold: 0.3,
      overlap_threshold: 0.5,
    };
    let kept = filter_detections(detections, &config);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].label(), &car);
    assert_eq!(kept[0].confidence(), 0.9);
    assert_eq!(kept[1].label(), &person);
  }
}
