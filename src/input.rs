// 该文件是 Beifeng （北风） 项目的一部分。
// src/input.rs - 图像标识与输入
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
  fmt,
  path::{Path, PathBuf},
  sync::Arc,
};

use thiserror::Error;
use tracing::debug;

/// 图像标识，通常为文件路径，一个批次内可对应多个检测结果
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(Arc<Path>);

impl SourceId {
  pub fn as_path(&self) -> &Path {
    &self.0
  }
}

impl From<PathBuf> for SourceId {
  fn from(path: PathBuf) -> Self {
    SourceId(Arc::from(path))
  }
}

impl From<&Path> for SourceId {
  fn from(path: &Path) -> Self {
    SourceId(Arc::from(path))
  }
}

impl From<&str> for SourceId {
  fn from(path: &str) -> Self {
    SourceId::from(Path::new(path))
  }
}

impl From<String> for SourceId {
  fn from(path: String) -> Self {
    SourceId::from(PathBuf::from(path))
  }
}

impl fmt::Display for SourceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.display())
  }
}

/// 图像加载器，把图像标识转换为检测模型的输入
pub trait Loader {
  type Output;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(&self, source: &SourceId) -> Result<Self::Output, Self::Error>;
}

mod read_image_file;
pub use self::read_image_file::{ImageFileLoadError, ImageFileLoader};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

#[derive(Error, Debug)]
pub enum ListImagesError {
  #[error("无法读取目录 {path}: {source}")]
  ReadDir {
    path: PathBuf,
    source: std::io::Error,
  },
}

pub fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      let lower = ext.to_lowercase();
      IMAGE_EXTENSIONS.contains(&lower.as_str())
    })
    .unwrap_or(false)
}

/// 列出目录下的图像文件（不递归），按路径排序，返回绝对路径
pub fn list_images(directory: &Path) -> Result<Vec<SourceId>, ListImagesError> {
  let read_dir_error = |source| ListImagesError::ReadDir {
    path: directory.to_path_buf(),
    source,
  };
  let directory = std::path::absolute(directory).map_err(read_dir_error)?;

  let mut paths = Vec::new();
  for entry in std::fs::read_dir(&directory).map_err(read_dir_error)? {
    let path = entry.map_err(read_dir_error)?.path();
    if path.is_file() && is_image_file(&path) {
      paths.push(path);
    } else {
      debug!("跳过非图像文件: {}", path.display());
    }
  }
  paths.sort();

  Ok(paths.into_iter().map(SourceId::from).collect())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn image_extension_matching_is_case_insensitive() {
    assert!(is_image_file(Path::new("a/b/photo.JPG")));
    assert!(is_image_file(Path::new("photo.webp")));
    assert!(!is_image_file(Path::new("photo.txt")));
    assert!(!is_image_file(Path::new("photo")));
  }

  #[test]
  fn list_images_filters_and_sorts() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.png", "a.jpg", "notes.txt", "c.jpeg.txt"] {
      std::fs::write(dir.path().join(name), b"").unwrap();
    }
    std::fs::create_dir(dir.path().join("nested.png")).unwrap();

    let images = list_images(dir.path()).unwrap();
    let names: Vec<_> = images
      .iter()
      .map(|id| id.as_path().file_name().unwrap().to_str().unwrap().to_string())
      .collect();
    assert_eq!(names, ["a.jpg", "b.png"]);
    assert!(images.iter().all(|id| id.as_path().is_absolute()));
  }

  #[test]
  fn list_images_reports_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");
    assert!(matches!(
      list_images(&missing),
      Err(ListImagesError::ReadDir { .. })
    ));
  }
}
