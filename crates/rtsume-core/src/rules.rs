//! ルールアダプタ
//!
//! 詰探索コアがゲームルール側（指し手生成・合法性判定・1手詰関数・
//! 千日手判定・ハッシュ計算）に要求する最小限のインターフェース。
//! 盤面の内部表現には一切関知せず、すべてこのトレイト越しに扱う。

use std::fmt;

use crate::types::{Depth, Hand, Key, PieceType};

/// 千日手（および最大手数到達）の分類
///
/// 手番側から見た結果で返すこと。攻め方の連続王手による千日手は
/// 攻め方の手番で `Lose` になる。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepetitionClass {
    /// 千日手ではない
    None,
    /// 手番側の勝ち
    Win,
    /// 手番側の負け
    Lose,
    /// 引き分け
    Draw,
}

/// 詰探索コアが局面に要求する操作の一覧
///
/// すべてのメソッドは現在の局面状態の純粋な関数として振る舞うこと。
/// `generate_checks` / `generate_evasions` は真に合法かつ真に王手
/// （または王手回避）である手だけを返すこと。
pub trait RulesAdapter {
    /// 指し手の型。コアは同値比較と表示以外には使わない
    type Move: Copy + Eq + fmt::Debug + fmt::Display;

    /// 攻め方の王手を `out` に生成する（OR node 用）
    fn generate_checks(&mut self, out: &mut Vec<Self::Move>);
    /// 受け方の王手回避を `out` に生成する（AND node 用）
    fn generate_evasions(&mut self, out: &mut Vec<Self::Move>);
    /// 手番側に王手がかかっているか
    fn in_check(&self) -> bool;
    /// 1手詰があればその手を返す。攻め方の手番でのみ呼ばれる
    fn mate_in_one(&mut self) -> Option<Self::Move>;

    /// 指し手を進める
    fn do_move(&mut self, m: Self::Move);
    /// 指し手を戻す
    fn undo_move(&mut self, m: Self::Move);

    /// 盤面ハッシュ（駒配置と手番のみに依存）
    fn board_key(&self) -> Key;
    /// `m` を指した後の盤面ハッシュ
    fn board_key_after(&self, m: Self::Move) -> Key;

    /// 攻め方の持ち駒
    fn attacker_hand(&self) -> Hand;
    /// `m` を指した後の攻め方の持ち駒
    ///
    /// 受け方の手番では攻め方の持ち駒は変化しないので、そのまま返すこと。
    fn attacker_hand_after(&self, m: Self::Move) -> Hand;
    /// `m` を指した後の攻め方の持ち駒が `after` のとき、指す前の持ち駒を返す
    ///
    /// 攻め方の手番の手に対してのみ持ち駒が動く: 打つ手なら打った駒を
    /// 1 枚足し、駒を取る手なら取った駒を 1 枚引く（いずれも飽和演算）。
    /// 受け方の手に対しては `after` をそのまま返すこと。証明駒・反証駒を
    /// 親局面へ翻訳するのに使う。
    fn attacker_hand_before(&self, m: Self::Move, after: Hand) -> Hand;

    /// `m` を指した後の経路ハッシュ
    fn path_key_after(&self, path_key: Key, m: Self::Move, depth: Depth) -> Key;

    /// 現局面の千日手分類
    fn repetition_class(&self) -> RepetitionClass;

    // --- 証明駒・反証駒の補正に使う盤面依存の問い合わせ ---

    /// 攻め方が駒種 `pt` を持っていたら王手となる打ち場所があるか
    ///
    /// 二歩などの打ち駒制限も考慮して「合法な王手の打ち場所が存在するか」
    /// を返すこと。OR node の反証駒削りに使う。
    fn drop_gives_check(&self, pt: PieceType) -> bool;

    /// 受け方の持ち駒
    fn defender_hand(&self) -> Hand;

    /// 受け方が駒種 `pt` を持っていたら現在の王手に合駒できたか
    ///
    /// 両王手・接触王手のときは常に false を返すこと。打ち駒制限も
    /// 考慮すること。AND node の証明駒拡張（攻め方の `pt` 独占の付与）
    /// に使う。
    fn defender_could_interpose(&self, pt: PieceType) -> bool;
}
