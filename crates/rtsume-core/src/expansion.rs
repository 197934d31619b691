//! 局面展開（子局面キャッシュ）
//!
//! df-pn の子選択を駆動する、1 局面ぶんの作業領域。役割は 4 つ:
//!
//! 1. 合法手（OR なら王手、AND なら回避）の一覧を覚える
//! 2. 子局面の置換表 LookUp 結果をキャッシュする
//! 3. 子局面を φ/δ のよさげ順に並べる
//! 4. 現局面の (pn, dn) と証明駒・反証駒を計算する
//!
//! 置換表の LookUp は全体で最も重い処理なので、前回の結果を
//! `Child` に持ち、再 LookUp は最善子の更新時だけに抑える。

use smallvec::SmallVec;

use crate::hands::{expand_proof_hand, tighten_disproof_hand, HandSet};
use crate::node::Node;
use crate::rules::{RepetitionClass, RulesAdapter};
use crate::search_result::{SearchResult, SearchResultComparer, UnknownData};
use crate::tt::{Query, TranspositionTable};
use crate::types::{
    saturated_add, saturated_amount, BitSet64, BoardKeyHandPair, Depth, Hand, MateLen, PnDn,
    SearchAmount, INFINITE_PN_DN,
};

/// 子局面 1 つぶんのキャッシュ
struct Child<A: RulesAdapter> {
    mv: A::Move,
    query: Query,
    /// 前回の LookUp（または再帰探索）の結果
    result: SearchResult,
    /// この子局面をまだ一度も探索していないなら true
    is_first: bool,
    /// δ値を総和で数えるなら true、max で数えるなら false
    is_sum: bool,
}

impl<A: RulesAdapter> Child<A> {
    #[inline]
    fn phi(&self, or_node: bool) -> PnDn {
        self.result.phi(or_node)
    }

    #[inline]
    fn delta(&self, or_node: bool) -> PnDn {
        self.result.delta(or_node)
    }
}

/// 1 局面ぶんの展開
pub struct LocalExpansion<A: RulesAdapter> {
    or_node: bool,
    len: MateLen,
    /// 千日手や 1 手詰など、子展開を待たずに確定した結果
    terminal: Option<SearchResult>,
    children: Vec<Child<A>>,
    /// `children` をよさげ順に並べたインデックス。
    /// `children` 自体を動かすと重いので並べ替えはこちらだけ行う
    idx: SmallVec<[u32; 64]>,
    /// δ値を総和で数える子の集合（インデックスは生成順）
    sum_mask: BitSet64,
    /// この展開の識別タグ。置換表に書いた未確定結果へ刻印する
    secret: u64,
    does_have_old_child: bool,
    /// 総和で数える子の δ値の、最善子を除いた総和
    sum_delta_except_best: PnDn,
    /// max で数える子の δ値の、最善子を除いた最大値
    max_delta_except_best: PnDn,
    /// 指し手生成用のバッファ（使い回す）
    move_buf: Vec<A::Move>,
}

impl<A: RulesAdapter> LocalExpansion<A> {
    /// 空の展開を作る（プール用）
    pub fn empty() -> Self {
        Self {
            or_node: true,
            len: MateLen::INFINITE,
            terminal: None,
            children: Vec::new(),
            idx: SmallVec::new(),
            sum_mask: BitSet64::FULL,
            secret: 0,
            does_have_old_child: false,
            sum_delta_except_best: 0,
            max_delta_except_best: 0,
            move_buf: Vec::with_capacity(128),
        }
    }

    /// 局面 `node` の展開として初期化し直す
    ///
    /// 合法手を生成して子局面を LookUp し、よさげ順に並べる。
    /// `sum_mask` には親がキャッシュしていたこの局面のマスクを渡す
    /// （初展開なら全ビット 1）。
    pub fn init(
        &mut self,
        tt: &mut TranspositionTable,
        node: &mut Node<'_, A>,
        len: MateLen,
        sum_mask: BitSet64,
    ) {
        self.or_node = node.is_or_node();
        self.len = len;
        self.terminal = None;
        self.children.clear();
        self.idx.clear();
        self.sum_mask = sum_mask;
        self.secret = tt.next_secret();
        self.does_have_old_child = false;
        self.sum_delta_except_best = 0;
        self.max_delta_except_best = 0;

        if let Some(result) = self.check_terminal(node) {
            self.terminal = Some(result);
            return;
        }

        self.move_buf.clear();
        if self.or_node {
            node.adapter_mut().generate_checks(&mut self.move_buf);
        } else {
            node.adapter_mut().generate_evasions(&mut self.move_buf);
        }

        let child_len = len - 1;
        let moves = std::mem::take(&mut self.move_buf);
        for (i, &mv) in moves.iter().enumerate() {
            let query = tt.build_child_query(node, mv);
            let mut old_child = false;
            let result = query.lookup(tt, &mut old_child, child_len, || (1, 1));
            if old_child && !result.is_final() {
                self.does_have_old_child = true;
            }

            self.children.push(Child {
                mv,
                query,
                is_first: result.is_first_visit(),
                is_sum: sum_mask.test(i),
                result,
            });
        }
        self.move_buf = moves;

        let comparer = SearchResultComparer::new(self.or_node);
        self.idx.extend(0..self.children.len() as u32);
        {
            let children = &self.children;
            let idx = &mut self.idx;
            idx.sort_by(|&a, &b| {
                comparer.compare(&children[a as usize].result, &children[b as usize].result)
            });
        }

        self.recalc_delta();
    }

    /// 千日手・1 手詰の判定
    fn check_terminal(&self, node: &mut Node<'_, A>) -> Option<SearchResult> {
        match node.adapter().repetition_class() {
            RepetitionClass::None => {}
            RepetitionClass::Win => {
                if self.or_node {
                    // 攻め方の手番での千日手勝ちは通常到達しない
                    log::warn!("repetition win at an OR node (depth {})", node.depth());
                    return Some(SearchResult::make_proven(node.or_hand(), self.len, 1));
                }
                return Some(SearchResult::make_repetition(
                    node.or_hand(),
                    self.len,
                    1,
                    node.depth(),
                ));
            }
            RepetitionClass::Lose => {
                if self.or_node {
                    // 連続王手の千日手。攻め方の負け
                    return Some(SearchResult::make_repetition(
                        node.or_hand(),
                        self.len,
                        1,
                        node.depth(),
                    ));
                }
                log::warn!("repetition lose at an AND node (depth {})", node.depth());
                return Some(SearchResult::make_proven(node.or_hand(), self.len, 1));
            }
            RepetitionClass::Draw => {
                // 千日手引き分け。詰まないので不詰扱い
                return Some(SearchResult::make_repetition(
                    node.or_hand(),
                    self.len,
                    1,
                    node.depth(),
                ));
            }
        }

        if self.or_node && self.len.len() >= 1 {
            if let Some(mv) = node.adapter_mut().mate_in_one() {
                node.do_move(mv);
                let proof_hand = expand_proof_hand(node.adapter(), Hand::EMPTY);
                node.undo_move();
                let hand = node.adapter().attacker_hand_before(mv, proof_hand);
                let len = MateLen::make(1, hand.total_count());
                return Some(SearchResult::make_proven(hand, len, 1));
            }
        }

        None
    }

    /// 合法手が 1 つ以上あるか
    #[inline]
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// 確定済み（千日手・1 手詰）の展開か
    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    /// unproven old child（浅い探索結果を参照している子）があるか
    #[inline]
    pub fn does_have_old_child(&self) -> bool {
        self.does_have_old_child
    }

    /// この展開の識別タグ
    #[inline]
    pub fn secret(&self) -> u64 {
        self.secret
    }

    /// 現在の最善手。合法手がある場合に限り呼べる
    #[inline]
    pub fn best_move(&self) -> A::Move {
        self.front().mv
    }

    /// 最善手の子局面が初訪問かどうか
    #[inline]
    pub fn front_is_first_visit(&self) -> bool {
        self.front().is_first
    }

    /// 最善手の子局面に記録されていた sum マスク
    #[inline]
    pub fn front_sum_mask(&self) -> BitSet64 {
        match self.front().result.unknown_data() {
            Some(unknown) => unknown.sum_mask,
            None => BitSet64::FULL,
        }
    }

    /// 最善子の δ寄与を総和から max に降格する（二重カウント対策）
    pub fn demote_front_to_max(&mut self) {
        if self.children.is_empty() {
            return;
        }
        let i = self.idx[0] as usize;
        if self.children[i].is_sum {
            self.children[i].is_sum = false;
            self.sum_mask = self.sum_mask.reset(i);
            self.recalc_delta();
        }
    }

    /// 現局面の (pn, dn) と証明駒・反証駒を計算する
    pub fn current_result(&self, node: &Node<'_, A>) -> SearchResult {
        if let Some(result) = &self.terminal {
            return *result;
        }

        if self.children.is_empty() {
            return self.no_moves_result(node);
        }

        let phi = self.front().phi(self.or_node);
        let delta = self.get_delta();

        if delta == 0 {
            self.all_lost_result(node)
        } else if phi == 0 {
            self.front_won_result(node)
        } else {
            let (pn, dn) = if self.or_node {
                (phi, delta)
            } else {
                (delta, phi)
            };
            let amount = self
                .children
                .iter()
                .map(|c| c.result.amount())
                .max()
                .unwrap_or(0);
            let unknown = UnknownData {
                is_first_visit: false,
                parent: None,
                secret: self.secret,
                sum_mask: self.sum_mask,
            };
            SearchResult::make_unknown(
                pn,
                dn,
                node.or_hand(),
                self.len,
                saturated_amount(amount, 1),
                unknown,
            )
        }
    }

    /// 合法手がないときの確定結果
    ///
    /// OR node（王手が掛けられない）は不詰、AND node（受けがない）は詰み。
    fn no_moves_result(&self, node: &Node<'_, A>) -> SearchResult {
        if self.or_node {
            let hand = tighten_disproof_hand(node.adapter(), crate::hands::full_hand());
            SearchResult::make_disproven(hand, self.len, 1)
        } else {
            let hand = expand_proof_hand(node.adapter(), Hand::EMPTY);
            let len = MateLen::make(0, hand.total_count());
            if self.len < len {
                // 詰んではいるが、手数の上界を使い切った後なので
                // この上界のもとでは不詰として扱う
                SearchResult::make_disproven(node.or_hand(), self.len, 1)
            } else {
                SearchResult::make_proven(hand, len, 1)
            }
        }
    }

    /// 手番側の全ての手が負けと確定したときの結果
    fn all_lost_result(&self, node: &Node<'_, A>) -> SearchResult {
        let mut amount: SearchAmount = 1;
        let mut max_len = MateLen::MINUS_ONE;
        let mut rep_start: Option<Depth> = None;

        for child in &self.children {
            amount = saturated_amount(amount, child.result.amount());
            max_len = max_len.max(child.result.len());
            if let Some(data) = child.result.final_data() {
                if let Some(start) = data.repetition_start {
                    rep_start = Some(match rep_start {
                        Some(s) => s.min(start),
                        None => start,
                    });
                }
            }
        }
        let len = max_len + 1;

        if self.or_node {
            // 全ての王手が不詰。千日手絡みなら経路依存の不詰として返す
            if let Some(start) = rep_start {
                return SearchResult::make_repetition(node.or_hand(), len, amount, start);
            }
            let mut set = HandSet::new_disproof();
            for child in &self.children {
                set.update(child.result.hand());
            }
            let hand = set.get_disproof(node.adapter());
            SearchResult::make_disproven(hand, len, amount)
        } else {
            // 全ての受けが詰み
            let mut set = HandSet::new_proof();
            for child in &self.children {
                set.update(child.result.hand());
            }
            let hand = set.get_proof(node.adapter());
            SearchResult::make_proven(hand, len, amount)
        }
    }

    /// 最善子で手番側の勝ちが確定したときの結果
    fn front_won_result(&self, node: &Node<'_, A>) -> SearchResult {
        let front = self.front();
        let child = &front.result;
        let amount = saturated_amount(child.amount(), 1);
        let len = child.len() + 1;

        if self.or_node {
            let hand = node.adapter().attacker_hand_before(front.mv, child.hand());
            SearchResult::make_proven(hand, len, amount)
        } else {
            if let Some(data) = child.final_data() {
                if let Some(start) = data.repetition_start {
                    return SearchResult::make_repetition(node.or_hand(), len, amount, start);
                }
            }
            let hand = node.adapter().attacker_hand_before(front.mv, child.hand());
            SearchResult::make_disproven(hand, len, amount)
        }
    }

    /// 最善手で探索を進めるときの、子局面の (thpn, thdn) を求める
    pub fn child_thresholds(&self, thpn: PnDn, thdn: PnDn) -> (PnDn, PnDn) {
        let (th_phi, th_delta) = if self.or_node {
            (thpn, thdn)
        } else {
            (thdn, thpn)
        };

        // φ側: 次良手に追い抜かれるまで。δ側: 親のしきい値までの残り
        let child_phi = th_phi.min(saturated_add(self.second_phi(), 1));
        let child_delta = if th_delta >= INFINITE_PN_DN {
            INFINITE_PN_DN
        } else {
            let delta = self.get_delta();
            let front_delta = self.front().delta(self.or_node);
            saturated_add(th_delta.saturating_sub(delta), front_delta)
        };

        if self.or_node {
            (child_phi, child_delta)
        } else {
            (child_delta, child_phi)
        }
    }

    /// 最善子の探索結果を反映し、並び順と δ の事前計算を更新する
    pub fn update_best_child(
        &mut self,
        tt: &mut TranspositionTable,
        result: SearchResult,
        parent: BoardKeyHandPair,
    ) {
        let front_idx = self.idx[0] as usize;
        self.children[front_idx]
            .query
            .set_result(tt, &result, Some(parent));
        self.children[front_idx].result = result;
        self.children[front_idx].is_first = false;

        // 先頭だけ順位が変わったので挿入し直す
        let comparer = SearchResultComparer::new(self.or_node);
        let front = self.idx[0];
        let mut pos = 1;
        {
            let children = &self.children;
            while pos < self.idx.len() {
                let other = self.idx[pos] as usize;
                if comparer.compare(&children[front as usize].result, &children[other].result)
                    == std::cmp::Ordering::Greater
                {
                    self.idx[pos - 1] = self.idx[pos];
                    pos += 1;
                } else {
                    break;
                }
            }
        }
        self.idx[pos - 1] = front;

        self.recalc_delta();
    }

    #[inline]
    fn front(&self) -> &Child<A> {
        &self.children[self.idx[0] as usize]
    }

    /// 次良手の φ値。合法手が 1 つなら ∞
    fn second_phi(&self) -> PnDn {
        if self.idx.len() < 2 {
            return INFINITE_PN_DN;
        }
        self.children[self.idx[1] as usize].phi(self.or_node)
    }

    /// 現在の δ値（最善子込み）
    fn get_delta(&self) -> PnDn {
        if self.children.is_empty() {
            return 0;
        }
        let front = self.front();
        let front_delta = front.delta(self.or_node);
        if front.is_sum {
            saturated_add(
                saturated_add(self.sum_delta_except_best, front_delta),
                self.max_delta_except_best,
            )
        } else {
            saturated_add(
                self.sum_delta_except_best,
                self.max_delta_except_best.max(front_delta),
            )
        }
    }

    /// δ の事前計算（最善子を除いた総和と最大値）をやり直す
    fn recalc_delta(&mut self) {
        self.sum_delta_except_best = 0;
        self.max_delta_except_best = 0;
        for &i in self.idx.iter().skip(1) {
            let child = &self.children[i as usize];
            let delta = child.delta(self.or_node);
            if child.is_sum {
                self.sum_delta_except_best = saturated_add(self.sum_delta_except_best, delta);
            } else {
                self.max_delta_except_best = self.max_delta_except_best.max(delta);
            }
        }
    }
}

/// 深さごとの展開を貯めるスタック
///
/// 再帰のたびに `LocalExpansion` を確保し直すと重いので、深さを
/// 添字とする有限プールとして使い回す。`items[d - base_depth]` が
/// 深さ `d` の局面の展開になる。
pub struct ExpansionStack<A: RulesAdapter> {
    items: Vec<LocalExpansion<A>>,
    top: usize,
    base_depth: Depth,
}

impl<A: RulesAdapter> Default for ExpansionStack<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: RulesAdapter> ExpansionStack<A> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            top: 0,
            base_depth: 0,
        }
    }

    /// 積まれている展開の数
    #[inline]
    pub fn len(&self) -> usize {
        self.top
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.top == 0
    }

    /// 局面 `node` の展開を積む
    pub fn emplace(
        &mut self,
        tt: &mut TranspositionTable,
        node: &mut Node<'_, A>,
        len: MateLen,
        sum_mask: BitSet64,
    ) -> &mut LocalExpansion<A> {
        if self.top == 0 {
            self.base_depth = node.depth();
        }
        debug_assert_eq!(self.base_depth + self.top as Depth, node.depth());

        if self.items.len() == self.top {
            self.items.push(LocalExpansion::empty());
        }
        let expansion = &mut self.items[self.top];
        expansion.init(tt, node, len, sum_mask);
        self.top += 1;
        expansion
    }

    /// いちばん上の展開を下ろす
    pub fn pop(&mut self) {
        debug_assert!(self.top > 0);
        self.top -= 1;
    }

    /// 現在（いちばん上）の展開
    #[inline]
    pub fn current(&self) -> &LocalExpansion<A> {
        &self.items[self.top - 1]
    }

    /// 現在（いちばん上）の展開への可変参照
    #[inline]
    pub fn current_mut(&mut self) -> &mut LocalExpansion<A> {
        &mut self.items[self.top - 1]
    }

    /// 現在の局面への合流を検出し、分岐元の δ寄与を降格する
    ///
    /// これから展開する最善子のエントリに現在と異なる親が記録されて
    /// いたら、分岐元を探して、その展開の現在の経路側の辺を総和から
    /// max に切り替える。
    pub fn eliminate_double_count(
        &mut self,
        tt: &mut TranspositionTable,
        node: &Node<'_, A>,
    ) {
        if self.top == 0 {
            return;
        }
        let current = self.current();
        if current.is_terminal() || !current.has_children() {
            return;
        }
        let mv = current.best_move();

        let secrets: SmallVec<[(Depth, u64); 64]> = self.items[..self.top]
            .iter()
            .enumerate()
            .map(|(i, e)| (self.base_depth + i as Depth, e.secret()))
            .collect();

        if let Some(info) = crate::double_count::find_known_ancestor(tt, node, mv, &secrets) {
            if info.ancestor_depth >= self.base_depth {
                let idx = (info.ancestor_depth - self.base_depth) as usize;
                if idx < self.top {
                    self.items[idx].demote_front_to_max();
                }
            }
        }
    }
}
