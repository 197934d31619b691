//! 置換表本体
//!
//! 単一の連続領域にエントリを確保し、盤面ハッシュからクラスタ先頭を
//! 決めて前方 [`CLUSTER_SIZE`] 個を走査する。確保量の 95% を通常
//! テーブル、残りを千日手テーブルに割り当てる。

use std::error::Error;
use std::fmt;
use std::io::{self, Read, Write};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::entry::Entry;
use super::query::Query;
use super::repetition::RepetitionTable;
use super::{
    CLUSTER_SIZE, GC_FINAL_AMOUNT_MULTIPLIER, HASHFULL_CALC_ENTRIES, NORMAL_REPETITION_RATIO,
    SUB_ENTRY_NUM,
};
use crate::node::Node;
use crate::rules::RulesAdapter;
use crate::types::{BoardKeyHandPair, Hand, Key, MateLen, SearchAmount, MAX_MATE_PLY};

/// ダンプファイルの先頭マジック
const DUMP_MAGIC: [u8; 4] = *b"RTTT";
/// ダンプフォーマットのバージョン
const DUMP_VERSION: u32 = 1;

/// ハッシュ使用率のサンプリング間隔
const HASHFULL_STRIDE: usize = 334;

/// 置換表のロード失敗
#[derive(Debug)]
pub enum TtLoadError {
    Io(io::Error),
    /// マジックナンバー不一致
    BadMagic,
    /// 未対応のフォーマットバージョン
    UnsupportedVersion(u32),
    /// エントリ数がテーブルサイズと合わない
    GeometryMismatch { expected: u64, found: u64 },
    /// エントリ内容が壊れている
    Corrupt,
}

impl fmt::Display for TtLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TtLoadError::Io(e) => write!(f, "io error: {e}"),
            TtLoadError::BadMagic => write!(f, "not a tt dump file"),
            TtLoadError::UnsupportedVersion(v) => write!(f, "unsupported tt dump version: {v}"),
            TtLoadError::GeometryMismatch { expected, found } => write!(
                f,
                "tt dump size mismatch: table has {expected} entries, dump has {found}"
            ),
            TtLoadError::Corrupt => write!(f, "tt dump is corrupt"),
        }
    }
}

impl Error for TtLoadError {}

impl From<io::Error> for TtLoadError {
    fn from(e: io::Error) -> Self {
        TtLoadError::Io(e)
    }
}

/// 詰探索用の置換表
pub struct TranspositionTable {
    pub(super) entries: Box<[Entry]>,
    pub(super) rep_table: RepetitionTable,
    pub(super) rng: SmallRng,
    /// 前回の GC で使ったしきい値
    pub(super) gc_threshold: SearchAmount,
}

impl TranspositionTable {
    /// `hash_mb` MB の置換表を作る
    pub fn new(hash_mb: u64) -> Self {
        let mut tt = Self {
            entries: Vec::new().into_boxed_slice(),
            rep_table: RepetitionTable::default(),
            rng: SmallRng::seed_from_u64(0x5f33_4334_a1b2_c3d4),
            gc_threshold: 1,
        };
        tt.resize(hash_mb);
        tt
    }

    /// 置換表サイズを `hash_mb` MB に変更する。保存済みの結果は消える
    pub fn resize(&mut self, hash_mb: u64) {
        let new_bytes = hash_mb.saturating_mul(1024 * 1024);
        let normal_bytes = (new_bytes as f64 * NORMAL_REPETITION_RATIO) as u64;
        let rep_bytes = new_bytes - normal_bytes;

        let entry_size = std::mem::size_of::<Entry>() as u64;
        let num_entries = (normal_bytes / entry_size).max((CLUSTER_SIZE + 1) as u64) as usize;
        let rep_entries = (rep_bytes / 3 / std::mem::size_of::<Key>() as u64).max(2) as usize;

        self.entries = vec![Entry::new(); num_entries].into_boxed_slice();
        self.rep_table.set_capacity(rep_entries);
        self.new_search();
    }

    /// 以前の探索結果をすべて消して新しい探索を始める
    pub fn new_search(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.set_null();
        }
        self.rep_table.clear();
        self.gc_threshold = 1;
    }

    /// 千日手テーブルだけを消す（PV 復元のリトライ用）
    pub fn clear_repetition(&mut self) {
        self.rep_table.clear();
    }

    /// エントリ数
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// 千日手テーブルの登録数
    pub fn rep_table_len(&self) -> usize {
        self.rep_table.len()
    }

    /// 局面 `n` 用のクエリを作る
    pub fn build_query<A: RulesAdapter>(&self, n: &Node<'_, A>) -> Query {
        let board_key = n.board_key();
        Query {
            cluster_head: self.cluster_head(board_key),
            path_key: n.path_key(),
            board_key,
            hand: n.or_hand(),
            depth: n.depth(),
        }
    }

    /// 局面 `n` から `m` で進めた子局面用のクエリを作る
    pub fn build_child_query<A: RulesAdapter>(&self, n: &Node<'_, A>, m: A::Move) -> Query {
        let board_key = n.adapter().board_key_after(m);
        Query {
            cluster_head: self.cluster_head(board_key),
            path_key: n.path_key_after(m),
            board_key,
            hand: n.or_hand_after(m),
            depth: n.depth() + 1,
        }
    }

    /// (盤面ハッシュ, 持ち駒) から直接クエリを作る
    ///
    /// 深さは番兵、経路ハッシュはなし。二重カウント検出の先祖巡回用。
    pub fn build_query_by_key(&self, pair: BoardKeyHandPair) -> Query {
        Query {
            cluster_head: self.cluster_head(pair.board_key),
            path_key: 0,
            board_key: pair.board_key,
            hand: pair.hand,
            depth: MAX_MATE_PLY,
        }
    }

    /// ハッシュ使用率（千分率）
    ///
    /// テーブルの端はエントリ数が偏るので、内側のエントリを
    /// 等間隔にサンプリングする。
    pub fn hashfull(&self) -> u32 {
        let begin_idx = CLUSTER_SIZE;
        let end_idx = (begin_idx + HASHFULL_CALC_ENTRIES).min(self.entries.len());
        let num_samples = end_idx - begin_idx;
        if num_samples == 0 {
            return 0;
        }

        let mut used = 0;
        let mut idx = begin_idx;
        for _ in 0..num_samples {
            if !self.entries[idx].is_null() {
                used += 1;
            }
            idx += HASHFULL_STRIDE;
            if idx >= end_idx {
                idx -= num_samples;
            }
        }
        (used * 1000 / num_samples) as u32
    }

    /// GC を実行する
    ///
    /// 探索量がしきい値未満のエントリを消していき、全エントリ数の
    /// `ratio_permille / 1000` 以上を消すまでしきい値を引き上げる。
    /// 確定済みエントリは探索量を水増しして消されづらくする。
    pub fn collect_garbage(&mut self, ratio_permille: u32) -> usize {
        let target = self.entries.len() * ratio_permille as usize / 1000;
        let mut removed = 0;

        loop {
            let threshold = self.gc_threshold;
            for entry in self.entries.iter_mut() {
                if entry.is_null() {
                    continue;
                }
                if Self::adjusted_amount(entry) < threshold {
                    entry.set_null();
                    removed += 1;
                }
            }

            if removed >= target || self.gc_threshold == SearchAmount::MAX {
                break;
            }
            self.gc_threshold += 1;
        }
        removed
    }

    /// GC の優先度に使う補正済み探索量
    fn adjusted_amount(entry: &Entry) -> SearchAmount {
        let amount = entry.total_amount();
        if entry.has_final_sub() {
            amount.saturating_mul(GC_FINAL_AMOUNT_MULTIPLIER)
        } else {
            amount
        }
    }

    /// 乱数から局面展開の識別タグを作る
    pub fn next_secret(&mut self) -> u64 {
        self.rng.gen()
    }

    /// 置換表の中身をダンプする
    ///
    /// 千日手テーブルは経路依存の情報なのでダンプには含めない。
    pub fn save<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&DUMP_MAGIC)?;
        writer.write_all(&DUMP_VERSION.to_le_bytes())?;
        writer.write_all(&(self.entries.len() as u64).to_le_bytes())?;

        let used = self.entries.iter().filter(|e| !e.is_null()).count() as u64;
        writer.write_all(&used.to_le_bytes())?;

        for (idx, entry) in self.entries.iter().enumerate() {
            if entry.is_null() {
                continue;
            }
            writer.write_all(&(idx as u64).to_le_bytes())?;
            write_entry(writer, entry)?;
        }
        Ok(())
    }

    /// ダンプから置換表を復元する
    ///
    /// ヘッダ検証に失敗した場合はテーブルを変更せずエラーを返す。
    /// 復元されたテーブルは、同じ書き込み列を実行した直後の状態と
    /// 区別がつかない。
    pub fn load<R: Read>(&mut self, reader: &mut R) -> Result<(), TtLoadError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != DUMP_MAGIC {
            return Err(TtLoadError::BadMagic);
        }

        let version = read_u32(reader)?;
        if version != DUMP_VERSION {
            return Err(TtLoadError::UnsupportedVersion(version));
        }

        let num_entries = read_u64(reader)?;
        if num_entries != self.entries.len() as u64 {
            return Err(TtLoadError::GeometryMismatch {
                expected: self.entries.len() as u64,
                found: num_entries,
            });
        }

        // いったん全部読み切ってから反映する（途中失敗で壊さないため）
        let used = read_u64(reader)?;
        let mut loaded = Vec::with_capacity(used as usize);
        for _ in 0..used {
            let idx = read_u64(reader)?;
            if idx >= num_entries {
                return Err(TtLoadError::Corrupt);
            }
            let entry = read_entry(reader)?;
            loaded.push((idx as usize, entry));
        }

        self.new_search();
        for (idx, entry) in loaded {
            self.entries[idx] = entry;
        }
        Ok(())
    }

    #[inline]
    fn cluster_head(&self, board_key: Key) -> usize {
        // Stockfish 系の乗算シフト。クラスタが末尾からはみ出さないよう
        // 先頭インデックスは [0, n - CLUSTER_SIZE] に収める
        let hash_low = board_key & 0xffff_ffff;
        let range = (self.entries.len() - CLUSTER_SIZE) as u64;
        ((hash_low * range) >> 32) as usize
    }
}

fn write_entry<W: Write>(writer: &mut W, entry: &Entry) -> io::Result<()> {
    writer.write_all(&entry.board_key.to_le_bytes())?;
    writer.write_all(&entry.hand.raw().to_le_bytes())?;
    writer.write_all(&entry.min_depth.to_le_bytes())?;
    writer.write_all(&[u8::from(entry.may_repeat)])?;
    writer.write_all(&entry.parent_board_key.to_le_bytes())?;
    writer.write_all(&entry.parent_hand.raw().to_le_bytes())?;
    writer.write_all(&entry.secret.to_le_bytes())?;
    writer.write_all(&entry.sum_mask.raw().to_le_bytes())?;
    for sub in &entry.sub_entries {
        writer.write_all(&[u8::from(sub.used)])?;
        writer.write_all(&sub.amount.to_le_bytes())?;
        writer.write_all(&sub.len.raw().to_le_bytes())?;
        writer.write_all(&sub.pn.to_le_bytes())?;
        writer.write_all(&sub.dn.to_le_bytes())?;
    }
    Ok(())
}

fn read_entry<R: Read>(reader: &mut R) -> Result<Entry, TtLoadError> {
    let mut entry = Entry::new();
    entry.board_key = read_u64(reader)?;
    entry.hand = Hand::from_raw(read_u32(reader)?);
    entry.min_depth = read_u32(reader)?;
    entry.may_repeat = read_u8(reader)? != 0;
    entry.parent_board_key = read_u64(reader)?;
    entry.parent_hand = Hand::from_raw(read_u32(reader)?);
    entry.secret = read_u64(reader)?;
    entry.sum_mask = crate::types::BitSet64::from_raw(read_u64(reader)?);
    for i in 0..SUB_ENTRY_NUM {
        let used = read_u8(reader)? != 0;
        let amount = read_u32(reader)?;
        let len = MateLen::from_raw(read_u16(reader)?);
        let pn = read_u64(reader)?;
        let dn = read_u64(reader)?;
        entry.sub_entries[i].used = used;
        entry.sub_entries[i].amount = amount;
        entry.sub_entries[i].len = len;
        entry.sub_entries[i].pn = pn;
        entry.sub_entries[i].dn = dn;
    }
    Ok(entry)
}

fn read_u8<R: Read>(reader: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16<R: Read>(reader: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::make_hand;
    use crate::search_result::SearchResult;
    use crate::types::INFINITE_PN_DN;

    fn query_for(tt: &TranspositionTable, board_key: Key, hand: Hand, depth: u32) -> Query {
        Query {
            cluster_head: tt.cluster_head(board_key),
            path_key: board_key ^ 0x9e37,
            board_key,
            hand,
            depth,
        }
    }

    fn lookup_pn_dn(tt: &mut TranspositionTable, q: &Query, len: MateLen) -> (u64, u64) {
        let mut old = false;
        let result = q.lookup(tt, &mut old, len, || (1, 1));
        (result.pn(), result.dn())
    }

    #[test]
    fn test_new_has_minimum_entries() {
        let tt = TranspositionTable::new(0);
        assert!(tt.num_entries() >= CLUSTER_SIZE + 1);
    }

    #[test]
    fn test_lookup_empty_is_first_visit() {
        let mut tt = TranspositionTable::new(1);
        let q = query_for(&tt, 0x334, Hand::EMPTY, 1);
        let mut old = false;
        let result = q.lookup(&mut tt, &mut old, MateLen::make(9, 0), || (3, 4));
        assert!(result.is_first_visit());
        assert_eq!(result.pn(), 3);
        assert_eq!(result.dn(), 4);
    }

    #[test]
    fn test_set_and_lookup_unknown() {
        let mut tt = TranspositionTable::new(1);
        let len = MateLen::make(9, 0);
        let q = query_for(&tt, 0x334, make_hand![Pawn], 1);

        let mut old = false;
        let first = q.lookup(&mut tt, &mut old, len, || (2, 5));
        q.set_result(&mut tt, &first, None);

        let again = q.lookup(&mut tt, &mut old, len, || (1, 1));
        assert!(!again.is_first_visit());
        assert_eq!(again.pn(), 2);
        assert_eq!(again.dn(), 5);
    }

    #[test]
    fn test_proven_generalizes_to_superior_hand() {
        let mut tt = TranspositionTable::new(1);
        let len = MateLen::make(5, 0);
        let q = query_for(&tt, 0x334, make_hand![Pawn], 3);

        let proven = SearchResult::make_proven(make_hand![Pawn], len, 10);
        q.set_result(&mut tt, &proven, None);

        // 優等な持ち駒・長い手数でも詰みが返る
        let q2 = query_for(&tt, 0x334, make_hand![Pawn, Gold], 3);
        let (pn, dn) = lookup_pn_dn(&mut tt, &q2, MateLen::make(9, 0));
        assert_eq!(pn, 0);
        assert_eq!(dn, INFINITE_PN_DN);

        // 劣等な持ち駒には波及しない
        let q3 = query_for(&tt, 0x334, Hand::EMPTY, 3);
        let (pn, _) = lookup_pn_dn(&mut tt, &q3, MateLen::make(9, 0));
        assert_ne!(pn, 0);
    }

    #[test]
    fn test_disproven_generalizes_to_inferior_hand() {
        let mut tt = TranspositionTable::new(1);
        let len = MateLen::make(9, 0);
        let q = query_for(&tt, 0x334, make_hand![Pawn, Gold], 3);

        let disproven = SearchResult::make_disproven(make_hand![Pawn, Gold], len, 10);
        q.set_result(&mut tt, &disproven, None);

        let q2 = query_for(&tt, 0x334, make_hand![Pawn], 3);
        let (pn, dn) = lookup_pn_dn(&mut tt, &q2, MateLen::make(5, 0));
        assert_eq!(pn, INFINITE_PN_DN);
        assert_eq!(dn, 0);
    }

    #[test]
    fn test_repetition_requires_same_path() {
        let mut tt = TranspositionTable::new(1);
        let len = MateLen::make(9, 0);
        let q = query_for(&tt, 0x334, make_hand![Pawn], 4);

        let rep = SearchResult::make_repetition(make_hand![Pawn], len, 10, 2);
        q.set_result(&mut tt, &rep, None);

        // 同じ経路なら千日手による不詰
        let mut old = false;
        let result = q.lookup(&mut tt, &mut old, len, || (1, 1));
        assert!(result.is_repetition());
        assert_eq!(result.final_data().unwrap().repetition_start, Some(2));

        // 経路が違えば千日手にならない
        let mut q2 = q;
        q2.path_key = 0xdead;
        let result = q2.lookup(&mut tt, &mut old, len, || (1, 1));
        assert!(!result.is_final());
    }

    #[test]
    fn test_proven_clears_dominated_entries() {
        let mut tt = TranspositionTable::new(1);
        let len = MateLen::make(9, 0);

        // 優等な持ち駒で未確定の結果を書いておく
        let q_sup = query_for(&tt, 0x334, make_hand![Pawn, Gold], 3);
        let mut old = false;
        let unknown = q_sup.lookup(&mut tt, &mut old, len, || (7, 8));
        q_sup.set_result(&mut tt, &unknown, None);

        // 劣等な持ち駒で詰みが確定 → 優等側の未確定エントリは消される
        let q_inf = query_for(&tt, 0x334, make_hand![Pawn], 3);
        let proven = SearchResult::make_proven(make_hand![Pawn], MateLen::make(5, 0), 10);
        q_inf.set_result(&mut tt, &proven, None);

        let (pn, _) = lookup_pn_dn(&mut tt, &q_sup, len);
        assert_eq!(pn, 0);
    }

    #[test]
    fn test_new_search_clears() {
        let mut tt = TranspositionTable::new(1);
        let len = MateLen::make(9, 0);
        let q = query_for(&tt, 0x334, make_hand![Pawn], 1);
        let proven = SearchResult::make_proven(make_hand![Pawn], len, 10);
        q.set_result(&mut tt, &proven, None);

        tt.new_search();
        let mut old = false;
        let result = q.lookup(&mut tt, &mut old, len, || (1, 1));
        assert!(result.is_first_visit());
    }

    #[test]
    fn test_hashfull_grows() {
        let mut tt = TranspositionTable::new(1);
        assert_eq!(tt.hashfull(), 0);

        for key in 0..2000u64 {
            let board_key = key.wrapping_mul(0x9e37_79b9_7f4a_7c15);
            let q = query_for(&tt, board_key, Hand::EMPTY, 1);
            let proven = SearchResult::make_proven(Hand::EMPTY, MateLen::make(1, 0), 1);
            q.set_result(&mut tt, &proven, None);
        }
        assert!(tt.hashfull() > 0);
    }

    #[test]
    fn test_collect_garbage_prefers_final() {
        let mut tt = TranspositionTable::new(1);
        let len = MateLen::make(3, 0);

        // 未確定（探索量 2）と確定（探索量 2、補正で 20 相当）を書く
        for key in 0..200u64 {
            let board_key = 0x1000 + key.wrapping_mul(0x9e37_79b9_7f4a_7c15);
            let q = query_for(&tt, board_key, Hand::EMPTY, 1);
            let mut old = false;
            let mut unknown = q.lookup(&mut tt, &mut old, len, || (1, 1));
            unknown = SearchResult::make_unknown(
                unknown.pn(),
                unknown.dn(),
                unknown.hand(),
                unknown.len(),
                2,
                *unknown.unknown_data().unwrap(),
            );
            q.set_result(&mut tt, &unknown, None);
        }
        let proven_key = 0x42u64.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        let q = query_for(&tt, proven_key, Hand::EMPTY, 1);
        let proven = SearchResult::make_proven(Hand::EMPTY, len, 2);
        q.set_result(&mut tt, &proven, None);

        // 未確定の探索量(2)は超えるが確定の補正量(20)は超えないしきい値まで回す
        let before = tt.hashfull();
        tt.collect_garbage(1);
        let _ = before;

        // 確定エントリは生き残る
        let (pn, _) = lookup_pn_dn(&mut tt, &q, len);
        assert_eq!(pn, 0);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let mut tt = TranspositionTable::new(1);
        let len = MateLen::make(7, 2);
        let q = query_for(&tt, 0x334334, make_hand![Pawn, Lance], 3);
        let proven = SearchResult::make_proven(make_hand![Pawn, Lance], len, 42);
        q.set_result(&mut tt, &proven, None);

        let mut buf = Vec::new();
        tt.save(&mut buf).unwrap();

        let mut restored = TranspositionTable::new(1);
        restored.load(&mut buf.as_slice()).unwrap();

        let (pn, dn) = lookup_pn_dn(&mut restored, &q, len);
        assert_eq!(pn, 0);
        assert_eq!(dn, INFINITE_PN_DN);
    }

    #[test]
    fn test_load_rejects_bad_magic() {
        let mut tt = TranspositionTable::new(1);
        let mut data: &[u8] = b"NOPE00000000";
        assert!(matches!(
            tt.load(&mut data),
            Err(TtLoadError::BadMagic)
        ));
    }

    #[test]
    fn test_load_rejects_geometry_mismatch() {
        let tt = TranspositionTable::new(1);
        let mut buf = Vec::new();
        tt.save(&mut buf).unwrap();

        let mut other = TranspositionTable::new(2);
        assert!(matches!(
            other.load(&mut buf.as_slice()),
            Err(TtLoadError::GeometryMismatch { .. })
        ));
    }
}
