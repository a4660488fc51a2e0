// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, model::Detection};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: i32 = 20;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 每字符平均宽度（粗略估计）
const BOX_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const FILL_ALPHA: f32 = 30.0 / 255.0;
const LABEL_COLOR: [u8; 3] = [75, 0, 130]; // 靛蓝

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效")]
  InvalidFont,
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("参数 {key} 无效: {value}")]
  InvalidParameter { key: String, value: String },
}

/// 在图像上绘制检测框、半透明填充与标签
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  box_color: [u8; 3],
  label_color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      box_color: BOX_COLOR,
      label_color: LABEL_COLOR,
    }
  }
}

impl FromUrlWithScheme for Draw {
  const SCHEME: &'static str = "annotate";
}

/// `annotate:?font=FILE&font_size=16`
impl FromUrl for Draw {
  type Error = DrawError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DrawError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let mut draw = Draw::default();
    let mut font = None;
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "font" => font = Some(PathBuf::from(value.as_ref())),
        "font_size" => {
          let size = value
            .parse::<f32>()
            .ok()
            .filter(|size| *size > 0.0)
            .ok_or_else(|| DrawError::InvalidParameter {
              key: key.to_string(),
              value: value.to_string(),
            })?;
          draw = draw.with_font_size(size);
        }
        _ => debug!("忽略未知参数: {}={}", key, value),
      }
    }
    if let Some(path) = font {
      info!("加载标签字体: {}", path.display());
      draw = draw.with_font_file(&path)?;
    }
    Ok(draw)
  }
}

impl Draw {
  /// 没有字体时只绘制检测框
  pub fn with_font_file(mut self, path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data).map_err(|_| DrawError::InvalidFont)?;
    self.font = Some(font);
    Ok(self)
  }

  pub fn with_font_size(mut self, size: f32) -> Self {
    self.font_size = size;
    self
  }

  /// 检测框为源图像像素坐标，超出图像的部分被裁掉
  pub fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    if w < 1.0 || h < 1.0 {
      return;
    }
    let bbox = detection.bbox().clamp(w - 1.0, h - 1.0);
    let x_min = bbox.x1().floor() as i32;
    let y_min = bbox.y1().floor() as i32;
    let x_max = bbox.x2().ceil() as i32;
    let y_max = bbox.y2().ceil() as i32;
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    self.fill(image, x_min as u32, y_min as u32, x_max as u32, y_max as u32);

    // 边框加粗为2像素
    let color = Rgb(self.box_color);
    let width = (x_max - x_min + 1) as u32;
    let height = (y_max - y_min + 1) as u32;
    draw_hollow_rect_mut(image, Rect::at(x_min, y_min).of_size(width, height), color);
    if width > 2 && height > 2 {
      draw_hollow_rect_mut(
        image,
        Rect::at(x_min + 1, y_min + 1).of_size(width - 2, height - 2),
        color,
      );
    }

    if let Some(font) = &self.font {
      let label = format!("{},{:.2}", detection.label(), detection.confidence());
      let text_width = ((label.chars().count() as f32 * LABEL_CHAR_WIDTH) as i32)
        .min(image.width() as i32 - x_min)
        .max(1) as u32;
      let label_y = (y_min - LABEL_TEXT_HEIGHT).max(0);
      draw_filled_rect_mut(
        image,
        Rect::at(x_min, label_y).of_size(text_width, LABEL_TEXT_HEIGHT as u32),
        Rgb([255, 255, 255]),
      );
      draw_text_mut(
        image,
        Rgb(self.label_color),
        x_min,
        label_y + 2,
        PxScale::from(self.font_size),
        font,
        &label,
      );
    }
  }

  fn fill(&self, image: &mut RgbImage, x_min: u32, y_min: u32, x_max: u32, y_max: u32) {
    for y in y_min..=y_max.min(image.height() - 1) {
      for x in x_min..=x_max.min(image.width() - 1) {
        let pixel = image.get_pixel_mut(x, y);
        for c in 0..3 {
          let blended =
            pixel[c] as f32 * (1.0 - FILL_ALPHA) + self.box_color[c] as f32 * FILL_ALPHA;
          pixel[c] = blended.round() as u8;
        }
      }
    }
  }
}
