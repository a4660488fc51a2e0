// 该文件是 Beifeng （北风） 项目的一部分。
// src/main.rs - 批量检测主程序
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

mod args;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "annotate")]
use beifeng::{
  FromUrlWithScheme,
  output::{AnnotateOutput, draw::Draw},
};
use beifeng::{
  FromUrl,
  cancel::{install_ctrlc_handler, spawn_stdin_trigger},
  input::{ImageFileLoader, list_images},
  model::ReplayDetectorBuilder,
  output::OutputWrapper,
  task::{Batch, BatchConfig, BatchOutcome},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = args::Args::parse();

  info!("图像目录: {}", args.input.display());
  info!("检测器: {}", args.detector);
  info!("输出方式: {}", args.output);

  let images = list_images(&args.input)
    .with_context(|| format!("无法列出图像目录: {}", args.input.display()))?;
  info!("找到 {} 张图像", images.len());

  let mut builder = ReplayDetectorBuilder::from_url(&args.detector)?;
  if let Some(confidence) = args.confidence {
    builder = builder.confidence_threshold(confidence);
  }
  if let Some(nms_threshold) = args.nms_threshold {
    builder = builder.overlap_threshold(nms_threshold);
  }

  let mut config = BatchConfig::default().with_drain(args.drain.into());
  if let Some(workers) = args.workers {
    config = config.with_workers(workers);
  }
  let batch = Batch::new(config);

  install_ctrlc_handler(batch.cancel_token(), Duration::from_secs(args.grace))
    .context("无法设置 Ctrl-C 处理器")?;
  if args.stdin_stop {
    info!("输入任意非空行并回车即可停止");
    spawn_stdin_trigger(batch.cancel_token());
  }

  let detector = move || builder.build();
  let summary = match args.output.scheme() {
    #[cfg(feature = "annotate")]
    Draw::SCHEME => {
      let draw = Draw::from_url(&args.output)?;
      let output = AnnotateOutput::load(&images, &ImageFileLoader)
        .with_draw(draw)
        .with_listener(|source, _| info!("已标注: {}", source));
      let report = batch.start(images, detector, ImageFileLoader, output).wait()?;
      info!(
        "标注图像 {} 张, 处理失败 {} 张",
        report.sink.len(),
        report.sink.failed().len()
      );
      report.summary
    }
    _ => {
      let output = OutputWrapper::from_url(&args.output)?;
      batch.start(images, detector, ImageFileLoader, output).wait()?.summary
    }
  };

  match summary.outcome {
    BatchOutcome::Failed(reason) => anyhow::bail!("批次失败: {}", reason),
    outcome => {
      info!("批次{}", outcome);
      Ok(())
    }
  }
}
