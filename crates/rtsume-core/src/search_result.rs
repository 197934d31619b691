//! 探索結果
//!
//! 1 局面の探索状況を (pn, dn, 証明駒/反証駒, 詰み手数, 探索量) の
//! 組で表す。詰み・不詰が確定した結果（Final）と探索中の結果
//! （Unknown）で付随情報が異なる。

use std::cmp::Ordering;
use std::fmt;

use crate::types::{
    BitSet64, BoardKeyHandPair, Depth, Hand, MateLen, PnDn, SearchAmount, INFINITE_PN_DN,
};

/// 探索中（詰みも不詰も示せていない）結果の付随情報
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownData {
    /// この局面を初めて訪れた（置換表に情報がなかった）なら true
    pub is_first_visit: bool,
    /// 置換表に記録されていた親局面
    pub parent: Option<BoardKeyHandPair>,
    /// 局面展開の識別タグ。二重カウント検出に使う
    pub secret: u64,
    /// δ値を総和で数える子の集合
    pub sum_mask: BitSet64,
}

impl UnknownData {
    /// 初訪問用
    pub const fn first_visit() -> Self {
        Self {
            is_first_visit: true,
            parent: None,
            secret: 0,
            sum_mask: BitSet64::FULL,
        }
    }
}

/// 確定（詰み or 不詰）結果の付随情報
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalData {
    /// 千日手による不詰なら、その繰り返しが始まった深さ
    pub repetition_start: Option<Depth>,
}

impl FinalData {
    #[inline]
    pub const fn is_repetition(&self) -> bool {
        self.repetition_start.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultData {
    Unknown(UnknownData),
    Final(FinalData),
}

/// 1 局面の探索結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    pn: PnDn,
    dn: PnDn,
    /// 証明駒（pn=0）、反証駒（dn=0）、または現局面の攻め方持ち駒
    hand: Hand,
    len: MateLen,
    amount: SearchAmount,
    data: ResultData,
}

impl SearchResult {
    /// 探索中の結果を作る
    pub const fn make_unknown(
        pn: PnDn,
        dn: PnDn,
        hand: Hand,
        len: MateLen,
        amount: SearchAmount,
        unknown: UnknownData,
    ) -> Self {
        Self {
            pn,
            dn,
            hand,
            len,
            amount,
            data: ResultData::Unknown(unknown),
        }
    }

    /// 詰み確定の結果を作る。`hand` は証明駒
    pub const fn make_proven(hand: Hand, len: MateLen, amount: SearchAmount) -> Self {
        Self {
            pn: 0,
            dn: INFINITE_PN_DN,
            hand,
            len,
            amount,
            data: ResultData::Final(FinalData {
                repetition_start: None,
            }),
        }
    }

    /// 不詰確定の結果を作る。`hand` は反証駒
    pub const fn make_disproven(hand: Hand, len: MateLen, amount: SearchAmount) -> Self {
        Self {
            pn: INFINITE_PN_DN,
            dn: 0,
            hand,
            len,
            amount,
            data: ResultData::Final(FinalData {
                repetition_start: None,
            }),
        }
    }

    /// 千日手による不詰の結果を作る
    pub const fn make_repetition(
        hand: Hand,
        len: MateLen,
        amount: SearchAmount,
        start_depth: Depth,
    ) -> Self {
        Self {
            pn: INFINITE_PN_DN,
            dn: 0,
            hand,
            len,
            amount,
            data: ResultData::Final(FinalData {
                repetition_start: Some(start_depth),
            }),
        }
    }

    #[inline]
    pub const fn pn(&self) -> PnDn {
        self.pn
    }

    #[inline]
    pub const fn dn(&self) -> PnDn {
        self.dn
    }

    #[inline]
    pub const fn hand(&self) -> Hand {
        self.hand
    }

    #[inline]
    pub const fn len(&self) -> MateLen {
        self.len
    }

    #[inline]
    pub const fn amount(&self) -> SearchAmount {
        self.amount
    }

    /// 詰みまたは不詰が確定しているか
    #[inline]
    pub const fn is_final(&self) -> bool {
        self.pn == 0 || self.dn == 0
    }

    /// φ値（手番側から見た自分の証明数）
    #[inline]
    pub const fn phi(&self, or_node: bool) -> PnDn {
        if or_node {
            self.pn
        } else {
            self.dn
        }
    }

    /// δ値（手番側から見た相手の証明数）
    #[inline]
    pub const fn delta(&self, or_node: bool) -> PnDn {
        if or_node {
            self.dn
        } else {
            self.pn
        }
    }

    /// 探索中の付随情報。確定結果なら None
    #[inline]
    pub const fn unknown_data(&self) -> Option<&UnknownData> {
        match &self.data {
            ResultData::Unknown(u) => Some(u),
            ResultData::Final(_) => None,
        }
    }

    /// 確定結果の付随情報。探索中なら None
    #[inline]
    pub const fn final_data(&self) -> Option<&FinalData> {
        match &self.data {
            ResultData::Final(f) => Some(f),
            ResultData::Unknown(_) => None,
        }
    }

    /// 初訪問の探索中結果かどうか
    #[inline]
    pub fn is_first_visit(&self) -> bool {
        matches!(
            &self.data,
            ResultData::Unknown(u) if u.is_first_visit
        )
    }

    /// 千日手による不詰かどうか
    #[inline]
    pub fn is_repetition(&self) -> bool {
        matches!(&self.data, ResultData::Final(f) if f.is_repetition())
    }
}

impl fmt::Display for SearchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pn == 0 {
            write!(f, "proof_hand={}", self.hand)?;
        } else if self.dn == 0 {
            if self.is_repetition() {
                write!(f, "repetition")?;
            } else {
                write!(f, "disproof_hand={}", self.hand)?;
            }
        } else {
            write!(f, "(pn,dn)=({},{})", self.pn, self.dn)?;
        }
        write!(f, " len={} amount={}", self.len, self.amount)
    }
}

/// 子局面の並べ替えに使う比較器
///
/// φ値の昇順、同値なら δ値の昇順、さらに探索量の昇順（未探索を優先）。
/// どちらも不詰確定なら、通常の不詰を千日手による不詰より先に置く
/// （千日手は経路依存で、置換表に一般化して保存できないため）。
#[derive(Debug, Clone, Copy)]
pub struct SearchResultComparer {
    or_node: bool,
}

impl SearchResultComparer {
    pub const fn new(or_node: bool) -> Self {
        Self { or_node }
    }

    pub fn compare(&self, lhs: &SearchResult, rhs: &SearchResult) -> Ordering {
        lhs.phi(self.or_node)
            .cmp(&rhs.phi(self.or_node))
            .then_with(|| lhs.delta(self.or_node).cmp(&rhs.delta(self.or_node)))
            .then_with(|| {
                let l = u8::from(lhs.is_repetition());
                let r = u8::from(rhs.is_repetition());
                l.cmp(&r)
            })
            .then_with(|| lhs.amount.cmp(&rhs.amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::make_hand;
    use crate::types::Hand;

    #[test]
    fn test_make_unknown() {
        let result = SearchResult::make_unknown(
            33,
            4,
            make_hand![Pawn, Pawn, Knight],
            MateLen::make(26, 4),
            10,
            UnknownData::first_visit(),
        );

        assert_eq!(result.pn(), 33);
        assert_eq!(result.dn(), 4);
        assert_eq!(result.hand(), make_hand![Pawn, Pawn, Knight]);
        assert_eq!(result.len(), MateLen::make(26, 4));
        assert_eq!(result.amount(), 10);
        assert!(!result.is_final());
        assert!(result.is_first_visit());
    }

    #[test]
    fn test_make_proven() {
        let result = SearchResult::make_proven(make_hand![Pawn, Silver], MateLen::make(33, 4), 20);

        assert_eq!(result.pn(), 0);
        assert_eq!(result.dn(), INFINITE_PN_DN);
        assert!(result.is_final());
        assert!(!result.is_repetition());
    }

    #[test]
    fn test_make_disproven() {
        let result = SearchResult::make_disproven(make_hand![Gold, Gold], MateLen::make(33, 4), 30);

        assert_eq!(result.pn(), INFINITE_PN_DN);
        assert_eq!(result.dn(), 0);
        assert!(result.is_final());
        assert!(!result.is_repetition());
    }

    #[test]
    fn test_make_repetition() {
        let result =
            SearchResult::make_repetition(make_hand![Rook, Bishop], MateLen::make(33, 4), 40, 2);

        assert_eq!(result.pn(), INFINITE_PN_DN);
        assert_eq!(result.dn(), 0);
        assert!(result.is_final());
        assert!(result.is_repetition());
        assert_eq!(result.final_data().unwrap().repetition_start, Some(2));
    }

    #[test]
    fn test_phi_delta() {
        let result = SearchResult::make_proven(Hand::EMPTY, MateLen::make(33, 4), 20);

        assert_eq!(result.phi(true), 0);
        assert_eq!(result.phi(false), INFINITE_PN_DN);
        assert_eq!(result.delta(true), INFINITE_PN_DN);
        assert_eq!(result.delta(false), 0);
    }

    #[test]
    fn test_comparer_or_node() {
        let cmp = SearchResultComparer::new(true);
        let unknown = UnknownData::first_visit();
        let len = MateLen::make(26, 4);

        let u1 = SearchResult::make_unknown(33, 4, Hand::EMPTY, len, 10, unknown);
        let u2 = SearchResult::make_unknown(26, 4, Hand::EMPTY, len, 10, unknown);
        let u3 = SearchResult::make_unknown(33, 5, Hand::EMPTY, len, 10, unknown);
        let f1 = SearchResult::make_disproven(Hand::EMPTY, len, 20);
        let f2 = SearchResult::make_repetition(Hand::EMPTY, len, 20, 0);

        // pn の昇順
        assert_eq!(cmp.compare(&u2, &u1), Ordering::Less);
        assert_eq!(cmp.compare(&u1, &u2), Ordering::Greater);
        // 同じ pn なら dn の昇順
        assert_eq!(cmp.compare(&u1, &u3), Ordering::Less);
        // 通常の不詰 < 千日手の不詰
        assert_eq!(cmp.compare(&f1, &f2), Ordering::Less);
        // 同値
        assert_eq!(cmp.compare(&u1, &u1), Ordering::Equal);
        assert_eq!(cmp.compare(&f1, &f1), Ordering::Equal);
    }
}
