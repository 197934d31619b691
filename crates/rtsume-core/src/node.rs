//! 探索木を歩くカーソル
//!
//! ルールアダプタを包み、深さ・経路ハッシュ・OR/AND の役割・
//! 先祖局面の (盤面ハッシュ, 持ち駒) 列を管理する。

use crate::rules::RulesAdapter;
use crate::types::{BoardKeyHandPair, Depth, Hand, Key, MAX_MATE_PLY};

/// 探索中の局面を指すカーソル
pub struct Node<'a, A: RulesAdapter> {
    adapter: &'a mut A,
    /// 開始局面が OR node（攻め方の手番）なら true
    root_is_or_node: bool,
    depth: Depth,
    path_key: Key,
    path_stack: Vec<Key>,
    move_stack: Vec<A::Move>,
    /// 各深さの (盤面ハッシュ, 攻め方持ち駒)。`ancestors()[d]` が深さ d の局面
    ancestor_pairs: Vec<BoardKeyHandPair>,
}

impl<'a, A: RulesAdapter> Node<'a, A> {
    pub fn new(adapter: &'a mut A, root_is_or_node: bool) -> Self {
        Self {
            adapter,
            root_is_or_node,
            depth: 0,
            path_key: 0,
            path_stack: Vec::with_capacity(64),
            move_stack: Vec::with_capacity(64),
            ancestor_pairs: Vec::with_capacity(64),
        }
    }

    /// ルールアダプタへの共有参照
    #[inline]
    pub fn adapter(&self) -> &A {
        self.adapter
    }

    /// ルールアダプタへの可変参照（1手詰関数などに使う）
    #[inline]
    pub fn adapter_mut(&mut self) -> &mut A {
        self.adapter
    }

    /// 現局面が OR node（攻め方の手番）かどうか
    #[inline]
    pub fn is_or_node(&self) -> bool {
        (self.depth % 2 == 0) == self.root_is_or_node
    }

    /// 深さ `d` の先祖局面が OR node かどうか
    #[inline]
    pub fn is_or_node_at(&self, d: Depth) -> bool {
        (d % 2 == 0) == self.root_is_or_node
    }

    /// 開始局面が OR node かどうか
    #[inline]
    pub fn root_is_or_node(&self) -> bool {
        self.root_is_or_node
    }

    #[inline]
    pub fn depth(&self) -> Depth {
        self.depth
    }

    #[inline]
    pub fn path_key(&self) -> Key {
        self.path_key
    }

    /// `m` を指した後の経路ハッシュ
    #[inline]
    pub fn path_key_after(&self, m: A::Move) -> Key {
        self.adapter.path_key_after(self.path_key, m, self.depth)
    }

    #[inline]
    pub fn board_key(&self) -> Key {
        self.adapter.board_key()
    }

    /// 攻め方の持ち駒
    #[inline]
    pub fn or_hand(&self) -> Hand {
        self.adapter.attacker_hand()
    }

    /// `m` を指した後の攻め方の持ち駒
    #[inline]
    pub fn or_hand_after(&self, m: A::Move) -> Hand {
        self.adapter.attacker_hand_after(m)
    }

    /// 現局面の (盤面ハッシュ, 攻め方持ち駒)
    #[inline]
    pub fn board_key_hand_pair(&self) -> BoardKeyHandPair {
        BoardKeyHandPair::new(self.board_key(), self.or_hand())
    }

    /// 親局面の (盤面ハッシュ, 攻め方持ち駒)。ルートでは None
    #[inline]
    pub fn parent_pair(&self) -> Option<BoardKeyHandPair> {
        self.ancestor_pairs.last().copied()
    }

    /// 先祖局面の (盤面ハッシュ, 攻め方持ち駒) 列。インデックスは深さ
    #[inline]
    pub fn ancestors(&self) -> &[BoardKeyHandPair] {
        &self.ancestor_pairs
    }

    /// 絶対最大深さを超えたか
    #[inline]
    pub fn is_exceed_max_depth(&self) -> bool {
        self.depth >= MAX_MATE_PLY
    }

    /// 指し手を進める
    pub fn do_move(&mut self, m: A::Move) {
        self.ancestor_pairs.push(self.board_key_hand_pair());
        self.path_stack.push(self.path_key);
        self.path_key = self.path_key_after(m);
        self.move_stack.push(m);
        self.adapter.do_move(m);
        self.depth += 1;
    }

    /// 直前の指し手を戻す
    pub fn undo_move(&mut self) {
        let m = self
            .move_stack
            .pop()
            .expect("undo_move called on the root node");
        self.adapter.undo_move(m);
        self.path_key = self.path_stack.pop().unwrap_or(0);
        self.ancestor_pairs.pop();
        self.depth -= 1;
    }
}

/// `moves` を順に進める
pub fn roll_forward<A: RulesAdapter>(node: &mut Node<'_, A>, moves: &[A::Move]) {
    for &m in moves {
        node.do_move(m);
    }
}

/// `moves` の分だけ局面を戻す
pub fn roll_back<A: RulesAdapter>(node: &mut Node<'_, A>, moves: &[A::Move]) {
    for _ in moves {
        node.undo_move();
    }
}
