//! 置換表エントリ
//!
//! 1 エントリは (盤面ハッシュ, 攻め方持ち駒) で識別され、詰み手数別の
//! サブエントリ（pn, dn, len, 探索量）を最大 [`SUB_ENTRY_NUM`] 個持つ。
//! LookUp では持ち駒の優等・劣等関係を使って、別の持ち駒で得た
//! 結果から現局面の pn/dn を絞り込む。

use rand::rngs::SmallRng;
use rand::Rng;

use super::{MIN_DEPTH_SENTINEL, SUB_ENTRY_NUM};
use crate::types::{
    saturated_amount, BitSet64, BoardKeyHandPair, Depth, Hand, Key, MateLen, PnDn, SearchAmount,
    INFINITE_PN_DN, NULL_KEY,
};

/// 詰み手数別の探索結果
#[derive(Debug, Clone, Copy)]
pub(super) struct SubEntry {
    pub(super) used: bool,
    pub(super) amount: SearchAmount,
    pub(super) len: MateLen,
    pub(super) pn: PnDn,
    pub(super) dn: PnDn,
}

impl SubEntry {
    const EMPTY: SubEntry = SubEntry {
        used: false,
        amount: 0,
        len: MateLen::MINUS_ONE,
        pn: 1,
        dn: 1,
    };

    #[inline]
    fn is_final(&self) -> bool {
        self.pn == 0 || self.dn == 0
    }
}

/// 置換表エントリ
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub(super) board_key: Key,
    pub(super) hand: Hand,
    pub(super) min_depth: Depth,
    pub(super) may_repeat: bool,
    pub(super) parent_board_key: Key,
    pub(super) parent_hand: Hand,
    pub(super) secret: u64,
    pub(super) sum_mask: BitSet64,
    pub(super) sub_entries: [SubEntry; SUB_ENTRY_NUM],
}

impl Default for Entry {
    fn default() -> Self {
        Self::new()
    }
}

impl Entry {
    /// 未使用のエントリを作る
    pub const fn new() -> Self {
        Self {
            board_key: NULL_KEY,
            hand: Hand::NULL,
            min_depth: MIN_DEPTH_SENTINEL,
            may_repeat: false,
            parent_board_key: NULL_KEY,
            parent_hand: Hand::NULL,
            secret: 0,
            sum_mask: BitSet64::FULL,
            sub_entries: [SubEntry::EMPTY; SUB_ENTRY_NUM],
        }
    }

    /// (board_key, hand) 用にエントリを初期化する
    pub fn init(&mut self, board_key: Key, hand: Hand) {
        self.board_key = board_key;
        self.hand = hand;
        self.min_depth = MIN_DEPTH_SENTINEL;
        self.may_repeat = false;
        self.parent_board_key = NULL_KEY;
        self.parent_hand = Hand::NULL;
        self.secret = 0;
        self.sum_mask = BitSet64::FULL;
        for sub in &mut self.sub_entries {
            sub.used = false;
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.hand.is_null()
    }

    #[inline]
    pub fn set_null(&mut self) {
        self.hand = Hand::NULL;
    }

    /// 盤面ハッシュが一致するか
    #[inline]
    pub fn is_for(&self, board_key: Key) -> bool {
        self.board_key == board_key && !self.is_null()
    }

    /// 盤面ハッシュと持ち駒の両方が一致するか
    #[inline]
    pub fn is_for_exact(&self, board_key: Key, hand: Hand) -> bool {
        self.board_key == board_key && self.hand == hand
    }

    #[inline]
    pub fn hand(&self) -> Hand {
        self.hand
    }

    #[inline]
    pub fn min_depth(&self) -> Depth {
        self.min_depth
    }

    #[inline]
    pub fn may_repeat(&self) -> bool {
        self.may_repeat
    }

    #[inline]
    pub fn secret(&self) -> u64 {
        self.secret
    }

    #[inline]
    pub fn sum_mask(&self) -> BitSet64 {
        self.sum_mask
    }

    /// 置換表に記録された親局面
    #[inline]
    pub fn parent(&self) -> Option<BoardKeyHandPair> {
        if self.parent_hand.is_null() {
            None
        } else {
            Some(BoardKeyHandPair::new(
                self.parent_board_key,
                self.parent_hand,
            ))
        }
    }

    /// このエントリの探索結果で (pn, dn, len) を絞り込む
    ///
    /// 優等局面の詰み・劣等局面の不詰は確定結果として `len` を上書きし
    /// true を返す。優等・劣等の未確定結果は、このエントリが現在の深さ
    /// 以浅で観測されていない場合に限り pn/dn の下界として取り込む
    /// （浅い観測を経由すると探索木のループで pn/dn を過小評価するため）。
    ///
    /// 持ち駒まで一致するエントリが未確定のまま現局面より浅い深さで
    /// 観測済みのとき、`does_have_old_child` を立てる（TCA の延長対象）。
    pub fn lookup(
        &mut self,
        hand: Hand,
        depth: Depth,
        len: &mut MateLen,
        pn: &mut PnDn,
        dn: &mut PnDn,
        does_have_old_child: &mut bool,
    ) -> bool {
        let exact = self.hand == hand;
        let was_shallower = self.min_depth < depth;
        if exact {
            self.min_depth = self.min_depth.min(depth);
        }

        let is_superior = hand.is_superior_or_equal(self.hand);
        let is_inferior = self.hand.is_superior_or_equal(hand);
        let may_borrow = exact || self.min_depth >= depth;
        let mut hit = false;

        for sub in &self.sub_entries {
            if !sub.used {
                break;
            }

            if is_superior && *len >= sub.len {
                // 現局面が優等: 置換表の詰みは現局面でも詰み。
                // 不詰側は現局面の方が示しづらいので dn の下界になる
                if sub.pn == 0 {
                    *pn = 0;
                    *dn = INFINITE_PN_DN;
                    *len = sub.len;
                    return true;
                } else if may_borrow {
                    *dn = (*dn).max(sub.dn);
                    hit = true;
                }
            }
            if is_inferior && *len <= sub.len {
                // 現局面が劣等: 置換表の不詰は現局面でも不詰。
                // 詰み側は現局面の方が示しづらいので pn の下界になる
                if sub.dn == 0 {
                    *pn = INFINITE_PN_DN;
                    *dn = 0;
                    *len = sub.len;
                    return true;
                } else if may_borrow {
                    *pn = (*pn).max(sub.pn);
                    hit = true;
                    if exact && *len == sub.len {
                        if was_shallower && !sub.is_final() {
                            *does_have_old_child = true;
                        }
                        return true;
                    }
                }
            }
        }

        if hit && exact && was_shallower {
            *does_have_old_child = true;
        }
        // 持ち駒まで一致するエントリは、値を借りられなくても
        // 「記録あり」として扱う（sum マスクや千日手疑いを拾うため）
        hit || exact
    }

    /// サブエントリを更新（または追加）する
    ///
    /// 同じ詰み手数のサブエントリがあれば上書き。既存の確定結果に
    /// 支配される値は書き込まない。空きがなければランダムに 1 つ潰す。
    pub fn update(
        &mut self,
        depth: Depth,
        pn: PnDn,
        dn: PnDn,
        len: MateLen,
        amount: SearchAmount,
        rng: &mut SmallRng,
    ) {
        self.min_depth = self.min_depth.min(depth);

        let new_sub = SubEntry {
            used: true,
            amount,
            len,
            pn,
            dn,
        };
        for sub in &mut self.sub_entries {
            if !sub.used {
                *sub = new_sub;
                return;
            }
            if sub.len == len {
                *sub = new_sub;
                return;
            }
            if (sub.pn == 0 && pn == 0 && sub.len <= len)
                || (sub.dn == 0 && dn == 0 && sub.len >= len)
            {
                // 既存の確定結果に支配されている
                return;
            }
        }

        let idx = rng.gen_range(0..SUB_ENTRY_NUM);
        self.sub_entries[idx] = new_sub;
    }

    /// 確定した結果に支配されたサブエントリを消す
    ///
    /// 証明駒 `hand` による手数 `len` の詰み（`proven = true`）が確定
    /// したとき、`hand` 以上の持ち駒のエントリの `len` 以上のサブエントリ
    /// は用済みになる。不詰は双対。自分自身に書かれた確定結果は残す。
    pub fn clear_final(&mut self, proven: bool, hand: Hand, len: MateLen) {
        let applies = if proven {
            self.hand.is_superior_or_equal(hand)
        } else {
            hand.is_superior_or_equal(self.hand)
        };
        if !applies {
            return;
        }

        let same_hand = self.hand == hand;
        let mut write = 0;
        for read in 0..SUB_ENTRY_NUM {
            let sub = self.sub_entries[read];
            if !sub.used {
                break;
            }

            let dominated = if proven {
                len <= sub.len
            } else {
                len >= sub.len
            };
            let own_final = same_hand && ((proven && sub.pn == 0) || (!proven && sub.dn == 0));
            if dominated && !own_final {
                continue;
            }

            self.sub_entries[write] = sub;
            write += 1;
        }
        for sub in &mut self.sub_entries[write..] {
            sub.used = false;
        }

        if write == 0 {
            self.set_null();
        }
    }

    /// 千日手疑いの印をつける
    ///
    /// 経路によって評価が変わるため、未確定のサブエントリは
    /// 初期値 (1, 1) に戻す。
    pub fn set_repeat(&mut self) {
        self.may_repeat = true;
        for sub in &mut self.sub_entries {
            if !sub.used {
                break;
            }
            if !sub.is_final() {
                sub.pn = 1;
                sub.dn = 1;
            }
        }
    }

    /// 未確定の結果の付随情報を更新する
    pub fn set_unknown_meta(
        &mut self,
        parent: Option<BoardKeyHandPair>,
        secret: u64,
        sum_mask: BitSet64,
    ) {
        match parent {
            Some(pair) => {
                self.parent_board_key = pair.board_key;
                self.parent_hand = pair.hand;
            }
            None => {
                self.parent_board_key = NULL_KEY;
                self.parent_hand = Hand::NULL;
            }
        }
        self.secret = secret;
        self.sum_mask = sum_mask;
    }

    /// エントリ全体の探索量（GC の優先度に使う）
    pub fn total_amount(&self) -> SearchAmount {
        let mut total = 0;
        for sub in &self.sub_entries {
            if !sub.used {
                break;
            }
            total = saturated_amount(total, sub.amount);
        }
        total
    }

    /// 確定したサブエントリを持つか
    pub fn has_final_sub(&self) -> bool {
        self.sub_entries.iter().any(|s| s.used && s.is_final())
    }

    /// 詰み手数の確定範囲 (最長不詰手数, 最短詰み手数) を更新する
    pub fn update_final_range(&self, hand: Hand, disproven: &mut MateLen, proven: &mut MateLen) {
        let is_superior = hand.is_superior_or_equal(self.hand);
        let is_inferior = self.hand.is_superior_or_equal(hand);
        for sub in &self.sub_entries {
            if !sub.used {
                break;
            }
            if sub.pn == 0 && is_superior {
                *proven = (*proven).min(sub.len);
            }
            if sub.dn == 0 && is_inferior {
                *disproven = (*disproven).max(sub.len);
            }
        }
    }

    /// 持ち駒が一致するエントリの pn/dn と記録された親局面を集める
    pub fn update_parent_candidate(
        &self,
        hand: Hand,
        pn: &mut PnDn,
        dn: &mut PnDn,
        secret: &mut u64,
        parent: &mut Option<BoardKeyHandPair>,
    ) {
        if self.hand != hand {
            return;
        }
        for sub in &self.sub_entries {
            if !sub.used {
                break;
            }
            if !sub.is_final() {
                *pn = (*pn).max(sub.pn);
                *dn = (*dn).max(sub.dn);
            }
        }
        *secret = self.secret;
        *parent = self.parent();
    }
}
