// 该文件是 Liuguang （流光） 项目的一部分。
// src/model/label.rs - 类别标签表
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

/// 保留槽位的占位标签
pub const PLACEHOLDER_LABEL: &str = "unused";

/// 超出标签表范围的类别编号使用的标签
pub const UNKNOWN_LABEL: &str = "unknown";

/// COCO 类别标签表，按模型类别编号排列
///
/// 共 90 个槽位，其中 80 个是可读类别，其余为保留槽位，
/// 以保持与模型类别编号空间对齐。
pub const COCO_LABELS: [&str; 90] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "unused",
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
  "unused",
  "backpack",
  "umbrella",
  "unused",
  "unused",
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
  "unused",
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
  "couch",
  "potted plant",
  "bed",
  "unused",
  "dining table",
  "unused",
  "unused",
  "toilet",
  "unused",
  "tv",
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
  "unused",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Self;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CocoLabel(u32);

impl CocoLabel {
  /// 保留槽位或超出标签表范围
  pub fn is_placeholder(&self) -> bool {
    match COCO_LABELS.get(self.0 as usize) {
      Some(&label) => label == PLACEHOLDER_LABEL,
      None => true,
    }
  }
}

impl WithLabel for CocoLabel {
  fn to_label_str(&self) -> String {
    COCO_LABELS
      .get(self.0 as usize)
      .copied()
      .unwrap_or(UNKNOWN_LABEL)
      .to_string()
  }

  fn to_label_id(&self) -> u32 {
    self.0
  }

  fn from_label_id(id: u32) -> Self {
    CocoLabel(id)
  }
}
