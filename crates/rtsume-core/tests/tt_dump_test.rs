//! 置換表ダンプのファイル入出力テスト

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};

use rtsume_core::fixture::{FixtureGame, StateDef};
use rtsume_core::make_hand;
use rtsume_core::node::Node;
use rtsume_core::search_result::SearchResult;
use rtsume_core::tt::{TranspositionTable, TtLoadError};
use rtsume_core::types::{MateLen, PieceType};

fn proven_states() -> Vec<StateDef> {
    vec![
        StateDef::or_state(0x8100)
            .attacker_hand(make_hand![Gold])
            .drop_mv(1, 1, PieceType::Gold),
        StateDef::and_state(0x8200),
    ]
}

#[test]
fn save_load_through_file_is_indistinguishable() {
    let mut game = FixtureGame::new(proven_states(), 0);
    let mut tt = TranspositionTable::new(1);

    // 証明と未確定をいくつか書き込む
    {
        let node = Node::new(&mut game, true);
        let query = tt.build_query(&node);
        let proven = SearchResult::make_proven(make_hand![Gold], MateLen::make(1, 1), 42);
        query.set_result(&mut tt, &proven, None);

        let child = tt.build_child_query(&node, rtsume_core::fixture::FixtureMove(1));
        let disproven = SearchResult::make_disproven(make_hand![Gold], MateLen::make(9, 0), 7);
        child.set_result(&mut tt, &disproven, None);
    }

    let mut file = tempfile::tempfile().unwrap();
    tt.save(&mut file).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();

    let mut restored = TranspositionTable::new(1);
    restored.load(&mut file).unwrap();

    // 復元後のテーブルは元と同じ問い合わせ結果を返す
    let node = Node::new(&mut game, true);
    for tt in [&mut tt, &mut restored] {
        let query = tt.build_query(&node);
        let mut old = false;
        let result = query.lookup(tt, &mut old, MateLen::make(9, 0), || (1, 1));
        assert_eq!(result.pn(), 0);
        assert_eq!(result.len(), MateLen::make(1, 1));
        assert_eq!(result.hand(), make_hand![Gold]);
    }
}

#[test]
fn load_garbage_file_is_rejected() {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(b"definitely not a tt dump").unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();

    let mut tt = TranspositionTable::new(1);
    assert!(matches!(tt.load(&mut file), Err(TtLoadError::BadMagic)));
}

#[test]
fn load_truncated_file_keeps_table_usable() {
    let mut game = FixtureGame::new(proven_states(), 0);
    let mut tt = TranspositionTable::new(1);
    {
        let node = Node::new(&mut game, true);
        let query = tt.build_query(&node);
        let proven = SearchResult::make_proven(make_hand![Gold], MateLen::make(1, 1), 42);
        query.set_result(&mut tt, &proven, None);
    }

    let mut buf = Vec::new();
    tt.save(&mut buf).unwrap();
    buf.truncate(buf.len() - 4);

    let mut other = TranspositionTable::new(1);
    assert!(matches!(
        other.load(&mut buf.as_slice()),
        Err(TtLoadError::Io(_))
    ));

    // 失敗後もテーブルはそのまま使える
    let node = Node::new(&mut game, true);
    let query = other.build_query(&node);
    let mut old = false;
    let result = query.lookup(&mut other, &mut old, MateLen::make(9, 0), || (1, 1));
    assert!(result.is_first_visit());
}

#[test]
fn file_roundtrip_via_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mate.tt");

    let mut game = FixtureGame::new(proven_states(), 0);
    let mut tt = TranspositionTable::new(1);
    {
        let node = Node::new(&mut game, true);
        let query = tt.build_query(&node);
        let proven = SearchResult::make_proven(make_hand![Gold], MateLen::make(1, 1), 42);
        query.set_result(&mut tt, &proven, None);
    }

    let mut out = File::create(&path).unwrap();
    tt.save(&mut out).unwrap();
    drop(out);

    let mut restored = TranspositionTable::new(1);
    let mut input = File::open(&path).unwrap();
    restored.load(&mut input).unwrap();

    let node = Node::new(&mut game, true);
    let query = restored.build_query(&node);
    let mut old = false;
    let result = query.lookup(&mut restored, &mut old, MateLen::make(9, 0), || (1, 1));
    assert_eq!(result.pn(), 0);
}
