//! エンジンオプション

use std::path::PathBuf;

/// 評価値の計算方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreCalculationMethod {
    /// dn をそのまま評価値にする
    #[default]
    Dn,
    /// -pn を評価値にする
    MinusPn,
    /// dn/(pn+dn) のロジスティック変換
    Ponanza,
}

impl ScoreCalculationMethod {
    /// オプション文字列から解釈する
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dn" => Some(Self::Dn),
            "minus_pn" | "-pn" => Some(Self::MinusPn),
            "ponanza" => Some(Self::Ponanza),
            _ => None,
        }
    }
}

/// 詰み発見後の余詰探索（手数短縮）のレベル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostSearchLevel {
    /// 最初に見つけた詰みで打ち切る
    None,
    /// 手順長が上界と一致するまで探索する
    #[default]
    UpperBound,
    /// 上界を縮めながら探索し尽くす
    Precise,
}

impl PostSearchLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "upper_bound" => Some(Self::UpperBound),
            "precise" => Some(Self::Precise),
            _ => None,
        }
    }
}

/// 詰探索エンジンの設定一式
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// 置換表サイズ（MB）
    pub hash_mb: u64,
    /// 評価値の計算方法
    pub score_method: ScoreCalculationMethod,
    /// 余詰探索のレベル
    pub post_search_level: PostSearchLevel,
    /// 探索開始時に読み込む置換表ダンプ
    pub tt_read_path: Option<PathBuf>,
    /// 探索終了時に書き出す置換表ダンプ
    pub tt_write_path: Option<PathBuf>,
    /// 書き出し時に既存ファイルを上書きしない
    pub tt_no_overwrite: bool,
    /// 探索状況を出力する間隔（ms）。0 なら出力しない
    pub pv_interval_ms: u64,
    /// 探索局面数の上限
    pub nodes_limit: u64,
    /// 開始局面で手番側に王手がかかっていたら AND node として扱う
    pub root_is_and_node_if_checked: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            hash_mb: 64,
            score_method: ScoreCalculationMethod::default(),
            post_search_level: PostSearchLevel::default(),
            tt_read_path: None,
            tt_write_path: None,
            tt_no_overwrite: false,
            pv_interval_ms: 1000,
            nodes_limit: u64::MAX,
            root_is_and_node_if_checked: true,
        }
    }
}
