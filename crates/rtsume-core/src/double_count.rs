//! 二重カウントの検出
//!
//! 合流のある探索グラフでは、同じ部分木の δ値が複数の経路から
//! 総和に数えられて pn/dn が過大評価されることがある。ここでは
//! 「これから展開する子に、現在の経路とは別の親が置換表に記録
//! されている」ことを合流の兆候とみなし、記録された親の連鎖を
//! 遡って現在の経路との分岐元（branch root)を探す。
//!
//! 分岐元が見つかったら、呼び出し側がその局面の展開で現在の経路側の
//! 辺の δ寄与を総和から max に降格する。

use crate::node::Node;
use crate::rules::RulesAdapter;
use crate::tt::TranspositionTable;
use crate::types::{saturated_add, BoardKeyHandPair, Depth, PnDn};

/// 記録された親の連鎖を遡る最大段数
const MAX_ANCESTOR_WALK: usize = 16;

/// δ側の食い違いの許容量
///
/// 分岐元へ遡る途中のエントリの δ値が子のそれより大きく膨らんで
/// いる場合、別の探索が混ざっているので二重カウントとは見なさない。
/// φ側の食い違いは無視してよい。
const DELTA_DIFF_MAX: PnDn = 2;

/// 分岐元の情報
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchRootInfo {
    /// 分岐元の深さ（現在の経路上のインデックス）
    pub ancestor_depth: Depth,
    /// 分岐元が OR node かどうか
    pub branch_root_is_or_node: bool,
    /// 分岐元の (盤面ハッシュ, 持ち駒)
    pub branch_root_key_hand_pair: BoardKeyHandPair,
}

/// 子局面 `m` の先の部分木が既知の別経路と合流していないか調べる
///
/// 子のエントリに記録された親が現在の局面と異なるとき、記録された
/// 親の連鎖（または展開タグの一致）を手掛かりに、現在の経路上の
/// 分岐元を探して返す。
pub fn find_known_ancestor<A: RulesAdapter>(
    tt: &TranspositionTable,
    node: &Node<'_, A>,
    m: A::Move,
    ancestor_secrets: &[(Depth, u64)],
) -> Option<BranchRootInfo> {
    let child_query = tt.build_child_query(node, m);
    let (child_pn, child_dn, _, recorded_parent) = child_query.lookup_parent(tt);
    let recorded = recorded_parent?;

    let actual = node.board_key_hand_pair();
    if recorded == actual {
        return None;
    }

    // δ側（検出局面が OR なら dn）の許容上限
    let child_delta = if node.is_or_node() {
        child_dn
    } else {
        child_pn
    };
    let delta_limit = saturated_add(child_delta, DELTA_DIFF_MAX);

    let make_info = |depth: Depth, pair: BoardKeyHandPair| BranchRootInfo {
        ancestor_depth: depth,
        branch_root_is_or_node: node.is_or_node_at(depth),
        branch_root_key_hand_pair: pair,
    };

    let ancestors = node.ancestors();
    let mut cur = recorded;
    for _ in 0..MAX_ANCESTOR_WALK {
        // 現在の経路に合流したら、そこが分岐元
        if let Some(depth) = ancestors.iter().rposition(|pair| *pair == cur) {
            return Some(make_info(depth as Depth, cur));
        }

        let query = tt.build_query_by_key(cur);
        let (pn, dn, secret, parent) = query.lookup_parent(tt);

        // 展開タグが現在の経路上の展開と一致したら、その深さが分岐元
        if secret != 0 {
            if let Some(&(depth, _)) = ancestor_secrets.iter().find(|&&(_, s)| s == secret) {
                if let Some(&pair) = ancestors.get(depth as usize) {
                    return Some(make_info(depth, pair));
                }
            }
        }

        let delta = if node.is_or_node() { dn } else { pn };
        if delta > delta_limit {
            return None;
        }

        cur = parent?;
    }

    None
}
