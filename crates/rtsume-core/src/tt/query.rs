//! 置換表の読み書きクエリ
//!
//! 局面の (盤面ハッシュ, 持ち駒, 深さ, 経路ハッシュ) とクラスタ先頭
//! インデックスを束ねた軽量ハンドル。エントリは GC で消える可能性が
//! あるため生ポインタは持たず、操作のたびにクラスタを引き直す。

use super::entry::Entry;
use super::{TranspositionTable, CLUSTER_SIZE};
use crate::search_result::{SearchResult, UnknownData};
use crate::types::{
    BitSet64, BoardKeyHandPair, Depth, Hand, Key, MateLen, PnDn, SearchAmount,
};

/// 置換表の読み書きハンドル
#[derive(Debug, Clone, Copy)]
pub struct Query {
    pub(super) cluster_head: usize,
    pub(super) path_key: Key,
    pub(super) board_key: Key,
    pub(super) hand: Hand,
    pub(super) depth: Depth,
}

impl Query {
    /// このクエリが指す (盤面ハッシュ, 持ち駒)
    #[inline]
    pub fn board_key_hand_pair(&self) -> BoardKeyHandPair {
        BoardKeyHandPair::new(self.board_key, self.hand)
    }

    /// クラスタから探索結果を集めて返す
    ///
    /// クラスタ内の盤面ハッシュが一致する全エントリへ優等・劣等関係を
    /// 適用して (pn, dn) を絞り込む。確定結果が見つかればそれを返す。
    /// 持ち駒まで一致するエントリが千日手疑いなら千日手テーブルも引く。
    /// エントリが 1 つもなければ `eval_fn` の初期値で返す。
    ///
    /// 置換表に現局面より浅い深さの未確定の記録があったとき
    /// `does_have_old_child` を立てる。
    pub fn lookup<F>(
        &self,
        tt: &mut TranspositionTable,
        does_have_old_child: &mut bool,
        len: MateLen,
        eval_fn: F,
    ) -> SearchResult
    where
        F: FnOnce() -> (PnDn, PnDn),
    {
        let mut len = len;
        let mut pn: PnDn = 1;
        let mut dn: PnDn = 1;
        let mut amount: SearchAmount = 1;
        let mut found_exact = false;
        let mut sum_mask = BitSet64::FULL;
        let mut parent = None;
        let mut secret = 0u64;

        let TranspositionTable {
            entries, rep_table, ..
        } = tt;

        for entry in entries[self.cluster_head..self.cluster_head + CLUSTER_SIZE].iter_mut() {
            if entry.is_null() || !entry.is_for(self.board_key) {
                continue;
            }

            if entry.lookup(self.hand, self.depth, &mut len, &mut pn, &mut dn, does_have_old_child)
            {
                amount = amount.max(entry.total_amount());
                if pn == 0 {
                    return SearchResult::make_proven(entry.hand(), len, amount);
                } else if dn == 0 {
                    return SearchResult::make_disproven(entry.hand(), len, amount);
                } else if entry.is_for_exact(self.board_key, self.hand) {
                    if entry.may_repeat() {
                        if let Some(start) = rep_table.contains(self.path_key) {
                            return SearchResult::make_repetition(self.hand, len, amount, start);
                        }
                    }
                    found_exact = true;
                    sum_mask = entry.sum_mask();
                    parent = entry.parent();
                    secret = entry.secret();
                }
            }
        }

        if found_exact {
            let unknown = UnknownData {
                is_first_visit: false,
                parent,
                secret,
                sum_mask,
            };
            return SearchResult::make_unknown(pn, dn, self.hand, len, amount, unknown);
        }

        let (init_pn, init_dn) = eval_fn();
        let pn = pn.max(init_pn);
        let dn = dn.max(init_dn);
        SearchResult::make_unknown(pn, dn, self.hand, len, amount, UnknownData::first_visit())
    }

    /// 置換表に記録された現局面の pn/dn・識別タグ・親局面を取得する
    ///
    /// 二重カウント検出用。見つからなければ (1, 1, 0, None)。
    pub fn lookup_parent(&self, tt: &TranspositionTable) -> (PnDn, PnDn, u64, Option<BoardKeyHandPair>) {
        let mut pn: PnDn = 1;
        let mut dn: PnDn = 1;
        let mut secret = 0u64;
        let mut parent = None;

        for entry in &tt.entries[self.cluster_head..self.cluster_head + CLUSTER_SIZE] {
            if !entry.is_null() && entry.is_for(self.board_key) {
                entry.update_parent_candidate(self.hand, &mut pn, &mut dn, &mut secret, &mut parent);
            }
        }
        (pn, dn, secret, parent)
    }

    /// 現局面の (最長不詰手数, 最短詰み手数) を取得する
    ///
    /// 詰み探索終了後の手順復元に使う。千日手疑いが立っていれば
    /// 不詰側を詰み手数の直前まで引き上げる。
    pub fn final_range(&self, tt: &TranspositionTable) -> (MateLen, MateLen) {
        let mut disproven = MateLen::MINUS_ONE;
        let mut proven = MateLen::INFINITE;
        let mut found_rep = false;

        for entry in &tt.entries[self.cluster_head..self.cluster_head + CLUSTER_SIZE] {
            if entry.is_null() || !entry.is_for(self.board_key) {
                continue;
            }
            entry.update_final_range(self.hand, &mut disproven, &mut proven);
            if entry.is_for_exact(self.board_key, self.hand)
                && entry.may_repeat()
                && tt.rep_table.contains(self.path_key).is_some()
            {
                found_rep = true;
            }
        }

        if found_rep {
            disproven = disproven.max(proven - 1);
        }
        (disproven, proven)
    }

    /// 探索結果をクラスタへ書き込む
    ///
    /// 確定結果なら優等・劣等関係で支配されたサブエントリの掃除も行う。
    pub fn set_result(
        &self,
        tt: &mut TranspositionTable,
        result: &SearchResult,
        parent: Option<BoardKeyHandPair>,
    ) {
        if result.pn() == 0 {
            self.set_final(tt, result, true);
        } else if result.dn() == 0 {
            if result.is_repetition() {
                self.set_repetition(tt, result);
            } else {
                self.set_final(tt, result, false);
            }
        } else {
            self.set_unknown(tt, result, parent);
        }
    }

    /// 詰み（または不詰）の確定結果を書き込む
    fn set_final(&self, tt: &mut TranspositionTable, result: &SearchResult, proven: bool) {
        let hand = result.hand();
        let TranspositionTable { entries, rng, .. } = tt;
        let cluster = &mut entries[self.cluster_head..self.cluster_head + CLUSTER_SIZE];

        let idx = find_or_create(cluster, self.board_key, hand);
        cluster[idx].update(
            self.depth,
            result.pn(),
            result.dn(),
            result.len(),
            result.amount(),
            rng,
        );

        // 新しい確定結果に支配されたサブエントリを消す
        for entry in cluster.iter_mut() {
            if entry.is_for(self.board_key) {
                entry.clear_final(proven, hand, result.len());
            }
        }
    }

    /// 千日手による不詰を書き込む
    fn set_repetition(&self, tt: &mut TranspositionTable, result: &SearchResult) {
        // 開始深さは書き込み位置より深くは記録しない
        let start_depth = match result.final_data() {
            Some(data) => data.repetition_start.unwrap_or(self.depth).min(self.depth),
            None => self.depth,
        };

        let TranspositionTable {
            entries,
            rep_table,
            ..
        } = tt;
        let cluster = &mut entries[self.cluster_head..self.cluster_head + CLUSTER_SIZE];
        let idx = find_or_create(cluster, self.board_key, self.hand);
        cluster[idx].set_repeat();
        rep_table.insert(self.path_key, start_depth);
    }

    /// 探索中の結果を書き込む
    fn set_unknown(
        &self,
        tt: &mut TranspositionTable,
        result: &SearchResult,
        parent: Option<BoardKeyHandPair>,
    ) {
        let (secret, sum_mask, recorded_parent) = match result.unknown_data() {
            Some(unknown) => (unknown.secret, unknown.sum_mask, unknown.parent),
            None => (0, BitSet64::FULL, None),
        };

        let TranspositionTable { entries, rng, .. } = tt;
        let cluster = &mut entries[self.cluster_head..self.cluster_head + CLUSTER_SIZE];
        let idx = find_or_create(cluster, self.board_key, self.hand);
        cluster[idx].update(
            self.depth,
            result.pn(),
            result.dn(),
            result.len(),
            result.amount(),
            rng,
        );
        cluster[idx].set_unknown_meta(parent.or(recorded_parent), secret, sum_mask);
    }
}

/// クラスタから (board_key, hand) のエントリを探し、なければ作る
///
/// 空きがないときは探索量が最小のエントリを潰す。
fn find_or_create(cluster: &mut [Entry], board_key: Key, hand: Hand) -> usize {
    let mut min_idx = 0;
    let mut min_amount = SearchAmount::MAX;
    let mut empty = None;

    for (i, entry) in cluster.iter().enumerate() {
        if entry.is_for_exact(board_key, hand) && !entry.is_null() {
            return i;
        }
        if entry.is_null() {
            if empty.is_none() {
                empty = Some(i);
            }
            continue;
        }
        let amount = entry.total_amount();
        if amount < min_amount {
            min_amount = amount;
            min_idx = i;
        }
    }

    let idx = empty.unwrap_or(min_idx);
    cluster[idx].init(board_key, hand);
    idx
}
