//! 詰み手数（MateLen）
//!
//! 手数（半手数）に「詰み形での攻め方の持ち駒枚数」をタイブレークとして
//! 付加した 16bit の合成値。複数の証明の中から短い詰みを、複数の反証の
//! 中から長い受けを選ぶための全順序を与える。

use std::fmt;
use std::ops::{Add, Sub};

/// 詰み手数＋タイブレークの合成値
///
/// 内部表現:
/// - bit 4-15: 手数 + 1（12bit）。`+1` しておくことで `make(0, _)` より
///   小さい「−1」番兵を表現できる。
/// - bit 0-3: 詰み形での攻め方持ち駒枚数（15 で飽和）。同じ手数なら
///   少ない持ち駒で詰む証明を小さい値とする。
///
/// 全順序は内部値の大小そのもの。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct MateLen(u16);

impl MateLen {
    const LEN_SHIFT: u16 = 4;
    const COUNT_MASK: u16 = 0x0F;

    /// 表現可能な最大手数
    pub const LEN_MAX: u32 = 0xFFD;

    /// 「−1」番兵。あらゆる正規値より小さい
    pub const MINUS_ONE: MateLen = MateLen(0);
    /// 「+∞」番兵。あらゆる正規値より大きい
    pub const INFINITE: MateLen = MateLen(u16::MAX);

    /// 手数とタイブレークから構築する
    #[inline]
    pub const fn make(len: u32, final_hand_count: u32) -> Self {
        debug_assert!(len <= Self::LEN_MAX);
        let cnt = if final_hand_count > 15 {
            15
        } else {
            final_hand_count
        };
        MateLen((((len + 1) as u16) << Self::LEN_SHIFT) | cnt as u16)
    }

    /// 半手数
    #[inline]
    pub const fn len(self) -> u32 {
        ((self.0 >> Self::LEN_SHIFT) as u32).saturating_sub(1)
    }

    /// タイブレーク（詰み形での攻め方持ち駒枚数、15 で飽和）
    #[inline]
    pub const fn final_hand_count(self) -> u32 {
        (self.0 & Self::COUNT_MASK) as u32
    }

    /// 番兵かどうか
    #[inline]
    pub const fn is_sentinel(self) -> bool {
        self.0 >> Self::LEN_SHIFT == 0 || self.0 == u16::MAX
    }

    /// 生の内部値（置換表のダンプ用）
    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// 生の内部値から復元（置換表のロード用）
    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        MateLen(raw)
    }
}

impl Add<u32> for MateLen {
    type Output = MateLen;

    /// 手数を `rhs` だけ伸ばす。+∞ はそのまま、「−1」+1 は 0 になる
    fn add(self, rhs: u32) -> MateLen {
        if self == MateLen::INFINITE {
            return self;
        }
        // 内部の (len + 1) フィールド上で加算することで、
        // 「−1」番兵からの復帰も自然に扱える
        let len_plus_1 = u32::from(self.0 >> Self::LEN_SHIFT) + rhs;
        if len_plus_1 > Self::LEN_MAX + 1 {
            return MateLen::INFINITE;
        }
        MateLen(((len_plus_1 as u16) << Self::LEN_SHIFT) | (self.0 & Self::COUNT_MASK))
    }
}

impl Sub<u32> for MateLen {
    type Output = MateLen;

    /// 手数を `rhs` だけ縮める。0 を下回ると「−1」番兵になる
    fn sub(self, rhs: u32) -> MateLen {
        if self == MateLen::INFINITE {
            return self;
        }
        let len_plus_1 = u32::from(self.0 >> Self::LEN_SHIFT);
        if len_plus_1 <= rhs {
            return MateLen::MINUS_ONE;
        }
        let len_plus_1 = len_plus_1 - rhs;
        MateLen(((len_plus_1 as u16) << Self::LEN_SHIFT) | (self.0 & Self::COUNT_MASK))
    }
}

impl fmt::Display for MateLen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == MateLen::INFINITE {
            write!(f, "inf")
        } else if *self == MateLen::MINUS_ONE {
            write!(f, "-1")
        } else {
            write!(f, "{}", self.len())
        }
    }
}
