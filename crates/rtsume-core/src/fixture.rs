//! テスト用のスクリプト固定局面アダプタ
//!
//! 明示的なゲーム木（状態と手の表）で [`RulesAdapter`] を実装する。
//! 盤面ルールの詳細から切り離して、探索コアの挙動（証明・反証、
//! 千日手、合流、GC 耐性）を決定的に検証するための道具。
//!
//! 状態はスクリプトで宣言し、手は行き先の状態を直接指す。持ち駒は
//! 状態ごとに宣言するので、打つ手・取る手の整合はスクリプトの作者が
//! 保証する。

use std::fmt;

use crate::rules::{RepetitionClass, RulesAdapter};
use crate::types::{Depth, Hand, Key, PieceType};

/// スクリプト上の指し手
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixtureMove(pub u16);

impl fmt::Display for FixtureMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// 状態の添字
pub type StateId = usize;

/// 指し手の定義
#[derive(Debug, Clone, Copy)]
pub struct MoveDef {
    pub mv: FixtureMove,
    pub to: StateId,
    /// 打つ手なら打った駒種（攻め方の手のみ意味を持つ）
    pub drop: Option<PieceType>,
    /// 駒を取る手なら取った駒種（攻め方の手のみ意味を持つ）
    pub capture: Option<PieceType>,
}

/// 状態の定義
#[derive(Debug, Clone)]
pub struct StateDef {
    pub key: Key,
    pub attacker_to_move: bool,
    pub attacker_hand: Hand,
    pub defender_hand: Hand,
    pub in_check: bool,
    /// この状態の合法手（攻め方の手番なら王手、受け方なら回避）
    pub moves: Vec<MoveDef>,
    /// 攻め方が持っていたら王手できる駒種
    pub drop_checks: [bool; 7],
    /// 受け方が持っていたら合駒できる駒種
    pub interpose: [bool; 7],
}

impl StateDef {
    /// 攻め方の手番の状態を作る
    pub fn or_state(key: Key) -> Self {
        Self::new(key, true)
    }

    /// 受け方の手番の状態を作る
    pub fn and_state(key: Key) -> Self {
        let mut state = Self::new(key, false);
        state.in_check = true;
        state
    }

    fn new(key: Key, attacker_to_move: bool) -> Self {
        Self {
            key,
            attacker_to_move,
            attacker_hand: Hand::EMPTY,
            defender_hand: Hand::EMPTY,
            in_check: false,
            moves: Vec::new(),
            drop_checks: [false; 7],
            interpose: [false; 7],
        }
    }

    pub fn attacker_hand(mut self, hand: Hand) -> Self {
        self.attacker_hand = hand;
        self
    }

    pub fn defender_hand(mut self, hand: Hand) -> Self {
        self.defender_hand = hand;
        self
    }

    /// 盤上の駒を動かす手を足す
    pub fn mv(mut self, id: u16, to: StateId) -> Self {
        self.moves.push(MoveDef {
            mv: FixtureMove(id),
            to,
            drop: None,
            capture: None,
        });
        self
    }

    /// 駒を打つ手を足す
    pub fn drop_mv(mut self, id: u16, to: StateId, pt: PieceType) -> Self {
        self.moves.push(MoveDef {
            mv: FixtureMove(id),
            to,
            drop: Some(pt),
            capture: None,
        });
        self
    }

    /// 駒を取る手を足す
    pub fn capture_mv(mut self, id: u16, to: StateId, pt: PieceType) -> Self {
        self.moves.push(MoveDef {
            mv: FixtureMove(id),
            to,
            drop: None,
            capture: Some(pt),
        });
        self
    }

    /// 攻め方が `pt` を持っていたら王手できる、と宣言する
    pub fn drop_check(mut self, pt: PieceType) -> Self {
        self.drop_checks[pt.index()] = true;
        self
    }

    /// 受け方が `pt` を持っていたら合駒できる、と宣言する
    pub fn interposable(mut self, pt: PieceType) -> Self {
        self.interpose[pt.index()] = true;
        self
    }
}

/// スクリプト固定局面
pub struct FixtureGame {
    states: Vec<StateDef>,
    cur: StateId,
    stack: Vec<StateId>,
}

impl FixtureGame {
    pub fn new(states: Vec<StateDef>, start: StateId) -> Self {
        assert!(start < states.len());
        Self {
            states,
            cur: start,
            stack: Vec::new(),
        }
    }

    /// 現在の状態の添字
    pub fn current(&self) -> StateId {
        self.cur
    }

    /// 開始局面が攻め方の手番かどうか
    pub fn attacker_to_move(&self) -> bool {
        self.state().attacker_to_move
    }

    fn state(&self) -> &StateDef {
        &self.states[self.cur]
    }

    fn move_def(&self, m: FixtureMove) -> &MoveDef {
        self.state()
            .moves
            .iter()
            .find(|md| md.mv == m)
            .expect("move not legal in the current state")
    }

    fn mix(x: u64) -> u64 {
        // splitmix64
        let mut z = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }
}

impl RulesAdapter for FixtureGame {
    type Move = FixtureMove;

    fn generate_checks(&mut self, out: &mut Vec<FixtureMove>) {
        debug_assert!(self.state().attacker_to_move);
        out.extend(self.state().moves.iter().map(|md| md.mv));
    }

    fn generate_evasions(&mut self, out: &mut Vec<FixtureMove>) {
        debug_assert!(!self.state().attacker_to_move);
        out.extend(self.state().moves.iter().map(|md| md.mv));
    }

    fn in_check(&self) -> bool {
        self.state().in_check
    }

    fn mate_in_one(&mut self) -> Option<FixtureMove> {
        let state = self.state();
        debug_assert!(state.attacker_to_move);
        state
            .moves
            .iter()
            .find(|md| self.states[md.to].moves.is_empty())
            .map(|md| md.mv)
    }

    fn do_move(&mut self, m: FixtureMove) {
        let to = self.move_def(m).to;
        self.stack.push(self.cur);
        self.cur = to;
    }

    fn undo_move(&mut self, _m: FixtureMove) {
        self.cur = self.stack.pop().expect("undo without a preceding do_move");
    }

    fn board_key(&self) -> Key {
        self.state().key
    }

    fn board_key_after(&self, m: FixtureMove) -> Key {
        self.states[self.move_def(m).to].key
    }

    fn attacker_hand(&self) -> Hand {
        self.state().attacker_hand
    }

    fn attacker_hand_after(&self, m: FixtureMove) -> Hand {
        self.states[self.move_def(m).to].attacker_hand
    }

    fn attacker_hand_before(&self, m: FixtureMove, after: Hand) -> Hand {
        if !self.state().attacker_to_move {
            return after;
        }
        let md = self.move_def(m);
        let mut hand = after;
        if let Some(pt) = md.drop {
            hand = hand.add(pt);
        }
        if let Some(pt) = md.capture {
            hand = hand.sub(pt);
        }
        hand
    }

    fn path_key_after(&self, path_key: Key, m: FixtureMove, depth: Depth) -> Key {
        path_key ^ Self::mix(u64::from(m.0) ^ (u64::from(depth) << 32))
    }

    fn repetition_class(&self) -> RepetitionClass {
        let key = self.state().key;
        let visits = self
            .stack
            .iter()
            .filter(|&&s| self.states[s].key == key)
            .count()
            + 1;
        if visits >= 4 {
            // 4 回目の出現で千日手。詰探索では攻め方の失敗として扱う
            if self.state().attacker_to_move {
                RepetitionClass::Lose
            } else {
                RepetitionClass::Win
            }
        } else {
            RepetitionClass::None
        }
    }

    fn drop_gives_check(&self, pt: PieceType) -> bool {
        self.state().drop_checks[pt.index()]
    }

    fn defender_hand(&self) -> Hand {
        self.state().defender_hand
    }

    fn defender_could_interpose(&self, pt: PieceType) -> bool {
        self.state().interpose[pt.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_do_undo_roundtrip() {
        let states = vec![
            StateDef::or_state(0x100).mv(1, 1),
            StateDef::and_state(0x200).mv(2, 0),
        ];
        let mut game = FixtureGame::new(states, 0);

        assert_eq!(game.board_key(), 0x100);
        game.do_move(FixtureMove(1));
        assert_eq!(game.board_key(), 0x200);
        game.undo_move(FixtureMove(1));
        assert_eq!(game.board_key(), 0x100);
    }

    #[test]
    fn test_mate_in_one_finds_stuck_state() {
        let states = vec![
            StateDef::or_state(0x100).mv(1, 1).mv(2, 2),
            StateDef::and_state(0x200).mv(3, 0),
            StateDef::and_state(0x300),
        ];
        let mut game = FixtureGame::new(states, 0);
        assert_eq!(game.mate_in_one(), Some(FixtureMove(2)));
    }

    #[test]
    fn test_repetition_after_fourfold() {
        let states = vec![
            StateDef::or_state(0x100).mv(1, 1),
            StateDef::and_state(0x200).mv(2, 0),
        ];
        let mut game = FixtureGame::new(states, 0);

        assert_eq!(game.repetition_class(), RepetitionClass::None);
        for _ in 0..3 {
            game.do_move(FixtureMove(1));
            game.do_move(FixtureMove(2));
        }
        // 開始局面の 4 回目の出現
        assert_eq!(game.repetition_class(), RepetitionClass::Lose);
    }

    #[test]
    fn test_hand_before_maps_drop_and_capture() {
        let states = vec![
            StateDef::or_state(0x100)
                .attacker_hand(crate::make_hand![Gold])
                .drop_mv(1, 1, PieceType::Gold)
                .capture_mv(2, 2, PieceType::Rook),
            StateDef::and_state(0x200),
            StateDef::and_state(0x300).attacker_hand(crate::make_hand![Gold, Rook]),
        ];
        let game = FixtureGame::new(states, 0);

        // 打った金は指す前には手駒に必要
        let before = game.attacker_hand_before(FixtureMove(1), Hand::EMPTY);
        assert_eq!(before, crate::make_hand![Gold]);

        // 取った飛車は指す前には持っていない
        let after = crate::make_hand![Gold, Rook];
        let before = game.attacker_hand_before(FixtureMove(2), after);
        assert_eq!(before, crate::make_hand![Gold]);
    }
}
