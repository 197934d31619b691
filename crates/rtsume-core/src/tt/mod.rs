//! 詰探索用の置換表
//!
//! - `Entry`: (盤面ハッシュ, 持ち駒) ごとの探索結果。詰み手数別の
//!   サブエントリを持ち、優等・劣等関係による一般化に対応する
//! - `RepetitionTable`: 千日手局面の経路ハッシュ集合
//! - `Query`: 読み書きの唯一の窓口。クラスタ単位でアクセスする
//! - `TranspositionTable`: テーブル本体。GC とダンプの入出力を持つ
//!
//! エントリは GC でいつでも消される可能性があるため、置換表の外に
//! エントリへの参照を保持してはならない。`Query` を介して毎回
//! 引き直すこと。

mod entry;
mod repetition;
mod query;
mod table;

pub use entry::Entry;
pub use query::Query;
pub use repetition::RepetitionTable;
pub use table::{TranspositionTable, TtLoadError};

/// クラスタサイズ。1 回の LookUp で走査するエントリ数
pub const CLUSTER_SIZE: usize = 16;

/// エントリあたりのサブエントリ数
pub const SUB_ENTRY_NUM: usize = 6;

/// 置換表メモリのうち通常テーブルに使う割合。残りは千日手テーブル
pub const NORMAL_REPETITION_RATIO: f64 = 0.95;

/// ハッシュ使用率の計算で調べるエントリ数
pub const HASHFULL_CALC_ENTRIES: usize = 10_000;

/// GC で詰み／不詰エントリの探索量に掛ける倍率。
/// 確定済みの結果を未確定の結果より消されづらくする
pub const GC_FINAL_AMOUNT_MULTIPLIER: u32 = 10;

/// `min_depth` の初期値（どの深さよりも大きい番兵）
pub const MIN_DEPTH_SENTINEL: u32 = 0x00FF_FFFF;
