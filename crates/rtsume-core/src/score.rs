//! 探索状況に基づく評価値
//!
//! 確定前の局面に「どのくらい詰みに近いか」の目安を与える。
//! 計算方法は `ScoreCalculationMethod` で切り替える。

use crate::option::ScoreCalculationMethod;
use crate::search_result::SearchResult;

/// 詰まなかったときに表示する詰み手数の上限
const MATE_PRINT_MAX: i64 = 9999;

/// ポナンザ定数
const PONANZA: f64 = 600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    /// 詰み／不詰未確定
    Unknown,
    /// （開始局面の手番から見て）勝ち
    Win,
    /// （開始局面の手番から見て）負け
    Lose,
}

/// 現在の探索状況に基づく評価値
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    kind: Kind,
    /// 評価値（Unknown）または詰み手数（Win/Lose）
    value: i64,
}

impl Default for Score {
    fn default() -> Self {
        Self {
            kind: Kind::Unknown,
            value: 0,
        }
    }
}

impl Score {
    /// 探索結果から評価値を構築する
    ///
    /// 評価値は開始局面の手番を基準にするため、開始局面が AND node の
    /// ときは正負を反転する。
    pub fn make(
        method: ScoreCalculationMethod,
        result: &SearchResult,
        is_root_or_node: bool,
    ) -> Self {
        let score = if result.is_final() {
            if result.pn() == 0 {
                Score {
                    kind: Kind::Win,
                    value: i64::from(result.len().len()),
                }
            } else {
                Score {
                    kind: Kind::Lose,
                    value: i64::from(result.len().len()),
                }
            }
        } else {
            let value = match method {
                ScoreCalculationMethod::Dn => result.dn() as i64,
                ScoreCalculationMethod::MinusPn => -(result.pn() as i64),
                ScoreCalculationMethod::Ponanza => {
                    let r = result.dn() as f64 / (result.pn() + result.dn()) as f64;
                    (-PONANZA * ((1.0 - r) / r).ln()) as i64
                }
            };
            Score {
                kind: Kind::Unknown,
                value,
            }
        };

        if is_root_or_node {
            score
        } else {
            -score
        }
    }

    /// 詰み確定の評価値を構築する
    pub fn make_proven(mate_len: u32, is_root_or_node: bool) -> Self {
        let score = Score {
            kind: Kind::Win,
            value: i64::from(mate_len),
        };
        if is_root_or_node {
            score
        } else {
            -score
        }
    }

    /// 評価値が詰み／不詰確定かどうか
    pub fn is_final(&self) -> bool {
        self.kind != Kind::Unknown
    }

    /// 現在の評価値を USI の score フィールド形式で返す
    pub fn to_usi_string(&self) -> String {
        let clamp = |v: i64| v.min(MATE_PRINT_MAX);
        match self.kind {
            Kind::Win => format!("mate {}", clamp(self.value)),
            Kind::Lose => format!("mate -{}", clamp(self.value)),
            Kind::Unknown => format!("cp {}", self.value),
        }
    }
}

impl std::ops::Neg for Score {
    type Output = Score;

    fn neg(self) -> Score {
        match self.kind {
            Kind::Win => Score {
                kind: Kind::Lose,
                value: self.value,
            },
            Kind::Lose => Score {
                kind: Kind::Win,
                value: self.value,
            },
            Kind::Unknown => Score {
                kind: Kind::Unknown,
                value: -self.value,
            },
        }
    }
}
