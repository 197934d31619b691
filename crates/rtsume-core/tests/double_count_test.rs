//! 二重カウント検出（分岐元探索）のテスト
//!
//! ダイヤモンド型の合流:
//!
//! ```text
//!        0 (AND)
//!       /        \
//!    1 (OR)    2 (OR)
//!       \        /
//!        3 (AND)
//!           |
//!        4 (OR)
//! ```
//!
//! 経路 0→1→3 の探索結果が置換表に残った状態で、経路 0→2 から
//! 3 へ合流するときに分岐元 0 が検出されることを確かめる。

use rtsume_core::double_count::find_known_ancestor;
use rtsume_core::fixture::{FixtureGame, FixtureMove, StateDef};
use rtsume_core::node::{roll_back, roll_forward, Node};
use rtsume_core::search_result::{SearchResult, UnknownData};
use rtsume_core::tt::TranspositionTable;
use rtsume_core::types::{BitSet64, MateLen, PnDn};

fn diamond_states() -> Vec<StateDef> {
    vec![
        StateDef::and_state(0xD00).mv(1, 1).mv(2, 2),
        StateDef::or_state(0xD10).mv(3, 3),
        StateDef::or_state(0xD20).mv(4, 3),
        StateDef::and_state(0xD30).mv(5, 4),
        StateDef::or_state(0xD40).mv(6, 3),
    ]
}

/// `moves` に沿って子エントリを書き込み、局面を元に戻す
fn set_search_path(
    tt: &mut TranspositionTable,
    node: &mut Node<'_, FixtureGame>,
    moves: &[FixtureMove],
    pn: PnDn,
    dn: PnDn,
) {
    for &m in moves {
        let query = tt.build_child_query(node, m);
        let parent = node.board_key_hand_pair();
        let hand = node.or_hand_after(m);
        let result = SearchResult::make_unknown(
            pn,
            dn,
            hand,
            MateLen::make(33, 4),
            1,
            UnknownData::first_visit(),
        );
        query.set_result(tt, &result, Some(parent));
        node.do_move(m);
    }
    roll_back(node, moves);
}

#[test]
fn no_entry_means_no_ancestor() {
    let mut game = FixtureGame::new(diamond_states(), 0);
    let tt = TranspositionTable::new(1);
    let node = Node::new(&mut game, false);

    let found = find_known_ancestor(&tt, &node, FixtureMove(1), &[]);
    assert_eq!(found, None);
}

#[test]
fn same_parent_is_not_double_count() {
    let mut game = FixtureGame::new(diamond_states(), 0);
    let mut tt = TranspositionTable::new(1);
    let mut node = Node::new(&mut game, false);

    set_search_path(&mut tt, &mut node, &[FixtureMove(1)], 100, 100);

    // 同じ親から同じ子へ向かうだけなら合流ではない
    let found = find_known_ancestor(&tt, &node, FixtureMove(1), &[]);
    assert_eq!(found, None);
}

#[test]
fn converging_paths_find_branch_root() {
    let mut game = FixtureGame::new(diamond_states(), 0);
    let mut tt = TranspositionTable::new(1);
    let mut node = Node::new(&mut game, false);
    let root_pair = node.board_key_hand_pair();

    // 経路 A: 0 →(1)→ 1 →(3)→ 3 の探索痕を残す
    set_search_path(&mut tt, &mut node, &[FixtureMove(1), FixtureMove(3)], 100, 100);

    // 経路 B: 0 →(2)→ 2 まで進み、3 への合流を調べる
    roll_forward(&mut node, &[FixtureMove(2)]);
    let found = find_known_ancestor(&tt, &node, FixtureMove(4), &[]);
    roll_back(&mut node, &[FixtureMove(2)]);

    let info = found.expect("branch root should be detected");
    assert_eq!(info.ancestor_depth, 0);
    assert_eq!(info.branch_root_key_hand_pair, root_pair);
    assert!(!info.branch_root_is_or_node);
}

#[test]
fn larger_phi_on_chain_is_allowed() {
    let mut game = FixtureGame::new(diamond_states(), 0);
    let mut tt = TranspositionTable::new(1);
    let mut node = Node::new(&mut game, false);

    set_search_path(&mut tt, &mut node, &[FixtureMove(1), FixtureMove(3)], 100, 100);
    // 中継エントリの pn（φ側）だけが膨らんでいるのは問題ない
    set_search_path(&mut tt, &mut node, &[FixtureMove(1)], 1000, 100);

    roll_forward(&mut node, &[FixtureMove(2)]);
    let found = find_known_ancestor(&tt, &node, FixtureMove(4), &[]);
    roll_back(&mut node, &[FixtureMove(2)]);

    assert!(found.is_some());
}

#[test]
fn larger_delta_on_chain_is_rejected() {
    let mut game = FixtureGame::new(diamond_states(), 0);
    let mut tt = TranspositionTable::new(1);
    let mut node = Node::new(&mut game, false);

    set_search_path(&mut tt, &mut node, &[FixtureMove(1), FixtureMove(3)], 100, 100);
    // 中継エントリの dn（δ側）が膨らんでいるなら別の探索が混ざっている
    set_search_path(&mut tt, &mut node, &[FixtureMove(1)], 100, 1000);

    roll_forward(&mut node, &[FixtureMove(2)]);
    let found = find_known_ancestor(&tt, &node, FixtureMove(4), &[]);
    roll_back(&mut node, &[FixtureMove(2)]);

    assert_eq!(found, None);
}

#[test]
fn secret_tag_identifies_branch_root() {
    let mut game = FixtureGame::new(diamond_states(), 0);
    let mut tt = TranspositionTable::new(1);
    let mut node = Node::new(&mut game, false);

    set_search_path(&mut tt, &mut node, &[FixtureMove(1), FixtureMove(3)], 100, 100);

    // 状態 1 のエントリに分岐元（深さ 0）の展開タグを刻む
    let secret = 0x334334;
    let query = tt.build_child_query(&node, FixtureMove(1));
    let unknown = UnknownData {
        is_first_visit: false,
        parent: None,
        secret,
        sum_mask: BitSet64::FULL,
    };
    let result = SearchResult::make_unknown(
        100,
        100,
        node.or_hand_after(FixtureMove(1)),
        MateLen::make(33, 4),
        1,
        unknown,
    );
    query.set_result(&mut tt, &result, None);

    roll_forward(&mut node, &[FixtureMove(2)]);
    let found = find_known_ancestor(&tt, &node, FixtureMove(4), &[(0, secret)]);
    roll_back(&mut node, &[FixtureMove(2)]);

    let info = found.expect("secret tag should identify the branch root");
    assert_eq!(info.ancestor_depth, 0);
}
