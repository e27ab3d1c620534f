//! 腫瘍クラスと説明情報の静的テーブル

use serde::Serialize;

/// クラス数
pub const NUM_CLASSES: usize = 4;

/// クラス名の定義（学習データのディレクトリ名をアルファベット順に並べた既定の順序）
///
/// 推論時のインデックス対応はモデルバンドルのメタデータを正とする。
pub const CLASS_NAMES: [&str; NUM_CLASSES] = ["glioma", "meningioma", "no_tumor", "pituitary"];

/// クラスごとの説明情報
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct TumorInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub severity: &'static str,
    pub action: &'static str,
}

const GLIOMA: TumorInfo = TumorInfo {
    name: "Glioma",
    description: "Malignant brain tumor arising from glial cells",
    severity: "High",
    action: "Seek immediate medical attention",
};

const MENINGIOMA: TumorInfo = TumorInfo {
    name: "Meningioma",
    description: "Usually benign tumor of the meninges",
    severity: "Low-Moderate",
    action: "Consult with neurosurgeon",
};

const PITUITARY: TumorInfo = TumorInfo {
    name: "Pituitary Adenoma",
    description: "Benign tumor of the pituitary gland",
    severity: "Low-Moderate",
    action: "Endocrinology consultation recommended",
};

const NO_TUMOR: TumorInfo = TumorInfo {
    name: "No Tumor Detected",
    description: "Normal brain tissue",
    severity: "None",
    action: "Continue routine monitoring",
};

/// ラベルから説明情報を取得
pub fn tumor_info(label: &str) -> Option<&'static TumorInfo> {
    match label {
        "glioma" => Some(&GLIOMA),
        "meningioma" => Some(&MENINGIOMA),
        "pituitary" => Some(&PITUITARY),
        "no_tumor" => Some(&NO_TUMOR),
        _ => None,
    }
}
