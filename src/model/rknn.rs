// 该文件是 Liuguang （流光） 项目的一部分。
// src/model/rknn.rs - RKNN NPU 推理后端
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decoded_path,
  model::{Backend, InferenceError, ModelLoadError},
  query_value,
};

const RKNN_NUM_INPUTS: u32 = 1;
const RKNN_MIN_OUTPUTS: u32 = 2;

pub struct RknnBackend {
  context: Context,
  num_outputs: u32,
  input_size: Option<(u32, u32)>,
}

impl FromUrlWithScheme for RknnBackend {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnBackend {
  type Error = ModelLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelLoadError::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let model_path = decoded_path(url);
    info!("加载模型文件: {}", model_path);
    let model_data = std::fs::read(&model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, InitFlags::default())?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(e.into());
      }
    }

    let num_inputs = context.num_inputs()?;
    let num_outputs = context.num_outputs()?;
    if num_inputs != RKNN_NUM_INPUTS {
      return Err(ModelLoadError::Invalid(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      )));
    }
    if num_outputs < RKNN_MIN_OUTPUTS {
      return Err(ModelLoadError::Invalid(format!(
        "预期模型输出数量至少为 {}, 实际为 {}",
        RKNN_MIN_OUTPUTS, num_outputs
      )));
    }
    debug!("模型输入数量: {}, 输出数量: {}", num_inputs, num_outputs);

    let input_size = match (query_value(url, "width"), query_value(url, "height")) {
      (Some(w), Some(h)) => Some((w, h)),
      _ => None,
    };
    info!("模型加载完成");

    Ok(Self {
      context,
      num_outputs,
      input_size,
    })
  }
}

impl Backend for RknnBackend {
  fn run(&mut self, input: &[u8], shape: &[usize]) -> Result<Vec<Vec<f32>>, InferenceError> {
    let backend = |e: rknpu::Error| InferenceError::Backend(e.to_string());

    debug!("设置模型输入: {:?}", shape);
    self
      .context
      .set_input(0, input, TensorFormat::NHWC, TensorType::UInt8)
      .map_err(backend)?;

    self.context.run().map_err(backend)?;

    let output = self.context.get_outputs().map_err(backend)?;
    (0..self.num_outputs as usize)
      .map(|i| output.get_f32(i).map(|data| data.to_vec()).map_err(backend))
      .collect()
  }

  fn input_size(&self) -> Option<(u32, u32)> {
    self.input_size
  }
}
