//! rtsume-core: 詰将棋系ゲームの df-pn 詰探索コア
//!
//! 証明数・反証数による深さ優先探索（df-pn）に Threshold Controlling
//! Algorithm (TCA) を組み合わせた詰み探索エンジン。盤面ルール
//! （指し手生成・合法性・1手詰・千日手判定・ハッシュ）は
//! [`rules::RulesAdapter`] トレイト越しに外部から与える。
//!
//! 主要コンポーネント:
//!
//! - [`tt::TranspositionTable`]: 証明駒・反証駒の優等関係に対応した置換表
//! - [`expansion::LocalExpansion`]: 子局面キャッシュと φ/δ 集計
//! - [`searcher::MateSearcher`]: 探索本体と詰み手順の復元
//! - [`monitor::SearchMonitor`]: 停止フラグ・局面数・GC の管理
//!
//! ```ignore
//! let mut searcher = MateSearcher::new(EngineOptions::default());
//! match searcher.search(&mut position, true) {
//!     NodeState::Proven => println!("mate in {}", searcher.best_moves().len()),
//!     NodeState::Disproven => println!("no mate"),
//!     NodeState::Unknown => println!("timeout"),
//! }
//! ```

pub mod double_count;
pub mod expansion;
pub mod hands;
pub mod monitor;
pub mod node;
pub mod option;
pub mod rules;
pub mod score;
pub mod search_result;
pub mod searcher;
pub mod tt;
pub mod types;
pub mod usi_info;

#[cfg(any(test, feature = "fixture"))]
pub mod fixture;

pub use node::Node;
pub use option::EngineOptions;
pub use rules::{RepetitionClass, RulesAdapter};
pub use score::Score;
pub use search_result::SearchResult;
pub use searcher::{MateSearcher, NodeState};
pub use tt::TranspositionTable;
pub use types::{Hand, MateLen, PieceType};
pub use usi_info::{UsiInfo, UsiInfoKey};
