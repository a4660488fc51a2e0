// 该文件是 Beifeng （北风） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use url::Url;

use beifeng::task::DrainPolicy;

/// Beifeng 批量目标检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 图像目录
  #[arg(long, value_name = "DIR")]
  pub input: PathBuf,

  /// 检测器
  /// 支持格式:
  /// - 回放: replay://?labels=FILE
  #[arg(long, value_name = "DETECTOR", default_value = "replay://")]
  pub detector: Url,

  /// 输出方式
  /// 支持格式:
  /// - 控制台文本: console:
  /// - JSON 行: jsonl:
  /// - 图像标注: annotate:?font=FILE&font_size=16
  #[arg(long, value_name = "OUTPUT", default_value = "console:")]
  pub output: Url,

  /// 置信度阈值 (0.0 - 1.0)，覆盖检测器 URL 中的设置，默认 0.3
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// NMS IOU 阈值 (0.0 - 1.0)，覆盖检测器 URL 中的设置，默认 0.7
  #[arg(long, value_name = "THRESHOLD")]
  pub nms_threshold: Option<f32>,

  /// 并发任务数（默认为可用的 CPU 数，0 表示每张图像一个线程）
  #[arg(long, value_name = "COUNT")]
  pub workers: Option<usize>,

  /// 取消后对剩余结果的处理方式
  #[arg(long, value_enum, default_value_t = Drain::Flush)]
  pub drain: Drain,

  /// 在标准输入输入任意非空行即停止
  #[arg(long)]
  pub stdin_stop: bool,

  /// 收到中断信号后强制退出前的等待秒数
  #[arg(long, default_value = "30", value_name = "SECONDS")]
  pub grace: u64,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum Drain {
  Flush,
  Discard,
}

impl From<Drain> for DrainPolicy {
  fn from(drain: Drain) -> Self {
    match drain {
      Drain::Flush => DrainPolicy::Flush,
      Drain::Discard => DrainPolicy::Discard,
    }
  }
}
