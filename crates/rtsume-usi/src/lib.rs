//! rtsume-usi: 詰探索エンジンの USI 風テキストプロトコル層
//!
//! `go mate <ms>` で詰探索を起動し、`checkmate <moves…>` /
//! `checkmate nomate` / `checkmate timeout` を返す。探索そのものは
//! [`rtsume_core`] に委ね、このクレートはコマンドの解釈・オプション・
//! タイマースレッド・置換表ファイルの読み書きだけを担当する。
//!
//! 局面の表記（SFEN・指し手文字列）の解釈はゲームルール側の仕事
//! なので、[`UsiAdapter`] トレイトとしてアダプタに要求する。

pub mod io;
pub mod options;
pub mod session;

use rtsume_core::rules::RulesAdapter;

pub use session::Session;

/// プロトコル層がルールアダプタへ追加で要求する操作
pub trait UsiAdapter: RulesAdapter {
    /// `position sfen …` の局面をセットする
    fn set_sfen(&mut self, sfen: &str) -> anyhow::Result<()>;

    /// USI 表記の指し手を解釈する。現局面で合法でなければ None
    fn parse_move(&self, s: &str) -> Option<Self::Move>;

    /// 開始局面が OR node（攻め方の手番）かどうかを判定する
    ///
    /// `and_node_if_checked` が true のときは、手番側に王手が
    /// かかっていれば AND node として扱う。
    fn root_is_or_node(&self, and_node_if_checked: bool) -> bool;
}
