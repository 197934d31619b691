//! USI `info` レコードの組み立て
//!
//! 探索側はキーと値を詰めるだけにして、出力順序や整形はここで
//! 一元管理する。`pv` と `string` は仕様上行末に置く必要がある。

use std::fmt;

/// `info` 行に載せるキー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsiInfoKey {
    Depth,
    SelDepth,
    Time,
    Nodes,
    Nps,
    Hashfull,
    CurrMove,
    Score,
    Pv,
    String,
}

impl UsiInfoKey {
    /// 出力順。pv / string は最後
    const ORDER: [UsiInfoKey; 10] = [
        UsiInfoKey::Depth,
        UsiInfoKey::SelDepth,
        UsiInfoKey::Time,
        UsiInfoKey::Nodes,
        UsiInfoKey::Nps,
        UsiInfoKey::Hashfull,
        UsiInfoKey::CurrMove,
        UsiInfoKey::Score,
        UsiInfoKey::Pv,
        UsiInfoKey::String,
    ];

    const fn label(self) -> &'static str {
        match self {
            UsiInfoKey::Depth => "depth",
            UsiInfoKey::SelDepth => "seldepth",
            UsiInfoKey::Time => "time",
            UsiInfoKey::Nodes => "nodes",
            UsiInfoKey::Nps => "nps",
            UsiInfoKey::Hashfull => "hashfull",
            UsiInfoKey::CurrMove => "currmove",
            UsiInfoKey::Score => "score",
            UsiInfoKey::Pv => "pv",
            UsiInfoKey::String => "string",
        }
    }
}

/// USI `info` レコード
#[derive(Debug, Clone, Default)]
pub struct UsiInfo {
    entries: Vec<(UsiInfoKey, String)>,
}

impl UsiInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// キーに値を設定する。同じキーへの設定は上書き
    pub fn set(&mut self, key: UsiInfoKey, value: impl ToString) {
        let value = value.to_string();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// キーの現在値
    pub fn get(&self, key: UsiInfoKey) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for UsiInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "info")?;
        for key in UsiInfoKey::ORDER {
            if let Some(value) = self.get(key) {
                write!(f, " {} {}", key.label(), value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_output() {
        let mut info = UsiInfo::new();
        info.set(UsiInfoKey::Pv, "7g7f 3c3d");
        info.set(UsiInfoKey::Nodes, 1234u64);
        info.set(UsiInfoKey::Depth, 5u32);

        // 設定順ではなく規定順で出力される
        assert_eq!(info.to_string(), "info depth 5 nodes 1234 pv 7g7f 3c3d");
    }

    #[test]
    fn test_overwrite() {
        let mut info = UsiInfo::new();
        info.set(UsiInfoKey::Depth, 1u32);
        info.set(UsiInfoKey::Depth, 2u32);
        assert_eq!(info.to_string(), "info depth 2");
    }

    #[test]
    fn test_score_field() {
        let mut info = UsiInfo::new();
        info.set(UsiInfoKey::Score, "mate 5");
        assert_eq!(info.to_string(), "info score mate 5");
    }
}
