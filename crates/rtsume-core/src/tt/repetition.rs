//! 千日手テーブル
//!
//! 千日手と判明した経路ハッシュを覚えておく集合。容量は置換表の
//! サイズから決まり、あふれたら古い世代ごと捨てる（2 世代構成）。

use std::collections::HashMap;

use crate::types::{Depth, Key};

/// 世代数
const TABLE_LEN: usize = 2;

/// 千日手局面の経路ハッシュ集合
#[derive(Debug)]
pub struct RepetitionTable {
    keys: [HashMap<Key, Depth>; TABLE_LEN],
    idx: usize,
    size_max: usize,
}

impl Default for RepetitionTable {
    fn default() -> Self {
        Self {
            keys: [HashMap::new(), HashMap::new()],
            idx: 0,
            size_max: usize::MAX,
        }
    }
}

impl RepetitionTable {
    /// 登録できる経路ハッシュの総数を設定する
    pub fn set_capacity(&mut self, size_max: usize) {
        self.size_max = size_max.max(TABLE_LEN);
    }

    /// すべて削除する
    pub fn clear(&mut self) {
        for table in &mut self.keys {
            table.clear();
        }
    }

    /// `path_key` を千日手として登録する
    ///
    /// `start_depth` は繰り返しが始まった深さ。現世代が容量の半分に
    /// 達したら世代を進め、もう一方の世代を丸ごと捨てる。
    pub fn insert(&mut self, path_key: Key, start_depth: Depth) {
        self.keys[self.idx].insert(path_key, start_depth);
        if self.keys[self.idx].len() >= self.size_max / TABLE_LEN {
            self.idx = (self.idx + 1) % TABLE_LEN;
            self.keys[self.idx].clear();
        }
    }

    /// `path_key` が登録されていれば繰り返し開始深さを返す
    pub fn contains(&self, path_key: Key) -> Option<Depth> {
        self.keys
            .iter()
            .find_map(|table| table.get(&path_key).copied())
    }

    /// 登録されている経路ハッシュの総数
    pub fn len(&self) -> usize {
        self.keys.iter().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_contains() {
        let mut table = RepetitionTable::default();
        table.insert(0x334, 3);

        assert_eq!(table.contains(0x334), Some(3));
        assert_eq!(table.contains(0x264), None);
    }

    #[test]
    fn test_clear() {
        let mut table = RepetitionTable::default();
        table.insert(0x334, 0);
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.contains(0x334), None);
    }

    #[test]
    fn test_rotation_discards_oldest() {
        let mut table = RepetitionTable::default();
        table.set_capacity(4);

        // 容量 4 → 1 世代 2 件で回転する
        table.insert(1, 0);
        table.insert(2, 0);
        // ここで世代が回転し、次の挿入は新世代に入る
        table.insert(3, 0);

        assert!(table.contains(1).is_some());
        assert!(table.contains(3).is_some());

        table.insert(4, 0);
        // 2 回目の回転で最古の世代 (1, 2) が消える
        table.insert(5, 0);
        assert_eq!(table.contains(1), None);
        assert_eq!(table.contains(2), None);
        assert!(table.contains(5).is_some());
    }
}
