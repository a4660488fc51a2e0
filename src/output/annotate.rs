// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/annotate.rs - 图像标注输出
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

use std::{collections::HashMap, sync::Arc};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  frame::Frame,
  input::{Loader, SourceId},
  model::Detection,
  output::{ResultSink, draw::Draw},
  task::JobFailure,
};

#[derive(Error, Debug)]
pub enum AnnotateOutputError {
  #[error("未登记的图像: {0}")]
  UnknownSource(SourceId),
}

type Listener = Box<dyn FnMut(&SourceId, &Arc<RgbImage>) + Send>;

/// 按图像分槽保存标注结果
///
/// 每张图像占据一个固定的槽位。标注时复制当前图像、绘制后整体替换槽位内容，
/// 已经交给外部的快照不会被修改。所有更新都发生在结果消费线程上。
pub struct AnnotateOutput {
  slots: Vec<(SourceId, Arc<RgbImage>)>,
  index: HashMap<SourceId, usize>,
  failed: Vec<SourceId>,
  draw: Draw,
  listener: Option<Listener>,
}

impl AnnotateOutput {
  pub fn new(images: impl IntoIterator<Item = (SourceId, RgbImage)>) -> Self {
    let mut slots = Vec::new();
    let mut index = HashMap::new();
    for (source, image) in images {
      if index.contains_key(&source) {
        warn!("重复的图像: {}", source);
        continue;
      }
      index.insert(source.clone(), slots.len());
      slots.push((source, Arc::new(image)));
    }
    Self {
      slots,
      index,
      failed: Vec::new(),
      draw: Draw::default(),
      listener: None,
    }
  }

  /// 加载失败的图像不占槽位
  pub fn load<L>(sources: &[SourceId], loader: &L) -> Self
  where
    L: Loader<Output = Frame>,
  {
    Self::new(sources.iter().filter_map(|source| match loader.load(source) {
      Ok(frame) => Some((source.clone(), frame.into_image())),
      Err(e) => {
        warn!("{}: 无法加载，跳过: {}", source, e);
        None
      }
    }))
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  /// 每次槽位更新后调用，例如通知界面刷新
  pub fn with_listener<F>(mut self, listener: F) -> Self
  where
    F: FnMut(&SourceId, &Arc<RgbImage>) + Send + 'static,
  {
    self.listener = Some(Box::new(listener));
    self
  }

  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  pub fn get(&self, source: &SourceId) -> Option<Arc<RgbImage>> {
    self.index.get(source).map(|&i| self.slots[i].1.clone())
  }

  /// 当前所有槽位的只读快照，顺序与登记顺序一致
  pub fn snapshot(&self) -> Vec<(SourceId, Arc<RgbImage>)> {
    self.slots.clone()
  }

  pub fn failed(&self) -> &[SourceId] {
    &self.failed
  }
}

impl ResultSink for AnnotateOutput {
  type Error = AnnotateOutputError;

  fn accept(&mut self, source: &SourceId, detection: &Detection) -> Result<(), Self::Error> {
    let &slot = self
      .index
      .get(source)
      .ok_or_else(|| AnnotateOutputError::UnknownSource(source.clone()))?;

    let mut image = RgbImage::clone(&self.slots[slot].1);
    self.draw.draw_detection(&mut image, detection);
    let image = Arc::new(image);
    self.slots[slot].1 = image.clone();
    debug!("{}: 标注 {}", source, detection.label());

    if let Some(listener) = self.listener.as_mut() {
      listener(source, &image);
    }
    Ok(())
  }

  fn report_failure(&mut self, failure: &JobFailure) -> Result<(), Self::Error> {
    self.failed.push(failure.source().clone());
    Ok(())
  }
}
