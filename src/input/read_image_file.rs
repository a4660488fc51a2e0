// 该文件是 Beifeng （北风） 项目的一部分。
// src/input/read_image_file.rs - 图像文件读取
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

use image::ImageReader;
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::Frame,
  input::{Loader, SourceId},
};

#[derive(Error, Debug)]
pub enum ImageFileLoadError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 从文件读取并解码为 RGB 图像
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageFileLoader;

impl Loader for ImageFileLoader {
  type Output = Frame;
  type Error = ImageFileLoadError;

  fn load(&self, source: &SourceId) -> Result<Self::Output, Self::Error> {
    let image = ImageReader::open(source.as_path())?
      .with_guessed_format()?
      .decode()?
      .into_rgb8();
    debug!(
      "图像解码完成: {} ({}x{})",
      source,
      image.width(),
      image.height()
    );
    Ok(Frame::new(source.clone(), image))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  #[test]
  fn loads_png_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("red.png");
    RgbImage::from_pixel(4, 3, Rgb([255, 0, 0])).save(&path).unwrap();

    let frame = ImageFileLoader.load(&SourceId::from(path)).unwrap();
    assert_eq!((frame.width(), frame.height()), (4, 3));
    assert_eq!(frame.image().get_pixel(0, 0), &Rgb([255, 0, 0]));
  }

  #[test]
  fn corrupt_file_is_a_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.jpg");
    std::fs::write(&path, b"definitely not a jpeg").unwrap();

    assert!(matches!(
      ImageFileLoader.load(&SourceId::from(path)),
      Err(ImageFileLoadError::ImageLoadError(_))
    ));
  }

  #[test]
  fn missing_file_is_an_io_error() {
    assert!(matches!(
      ImageFileLoader.load(&SourceId::from("/nonexistent/nothing.png")),
      Err(ImageFileLoadError::IoError(_))
    ));
  }
}
