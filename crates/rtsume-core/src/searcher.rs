//! df-pn + TCA の探索本体
//!
//! `search_impl` が再帰の中心で、しきい値 (thpn, thdn) を超えるまで
//! 最善の子を掘り続ける。外側では詰み手数の上界を縮めながら
//! `search_entry` を繰り返し、詰み手順（PV）を置換表から復元する。

use crate::expansion::ExpansionStack;
use crate::node::{roll_back, Node};
use crate::option::{EngineOptions, PostSearchLevel};
use crate::rules::RulesAdapter;
use crate::score::Score;
use crate::search_result::SearchResult;
use crate::monitor::SearchMonitor;
use crate::tt::TranspositionTable;
use crate::types::{saturated_add, BitSet64, MateLen, PnDn, INFINITE_PN_DN};
use crate::usi_info::{UsiInfo, UsiInfoKey};

/// 詰み手数の上界なしを表す番兵
const DEPTH_MAX_MATE_LEN: MateLen = MateLen::make(MateLen::LEN_MAX, 15);

/// 余詰探索の最大反復回数（発振防止の安全弁）
const MAX_SEARCH_ITERATION: usize = 128;

/// GC を起動するハッシュ使用率（千分率）の高水位
const GC_HASHFULL_HIGH_WATER: u32 = 500;

/// 1 回の GC で消すエントリの割合（千分率）
const GC_REMOVAL_RATIO: u32 = 600;

/// 探索の結末
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// 詰み
    Proven,
    /// 不詰
    Disproven,
    /// 時間切れ・局面数上限などで未確定
    Unknown,
}

/// 詰探索エンジン本体
pub struct MateSearcher<A: RulesAdapter> {
    options: EngineOptions,
    tt: TranspositionTable,
    monitor: SearchMonitor,
    expansions: ExpansionStack<A>,
    score: Score,
    final_result: Option<SearchResult>,
    best_moves: Vec<A::Move>,
    info_callback: Option<Box<dyn FnMut(&UsiInfo)>>,
    /// 次の探索でダンプから読み込んだ置換表を消さない
    keep_tt_once: bool,
}

impl<A: RulesAdapter> MateSearcher<A> {
    pub fn new(options: EngineOptions) -> Self {
        let tt = TranspositionTable::new(options.hash_mb);
        Self {
            options,
            tt,
            monitor: SearchMonitor::new(),
            expansions: ExpansionStack::new(),
            score: Score::default(),
            final_result: None,
            best_moves: Vec::new(),
            info_callback: None,
            keep_tt_once: false,
        }
    }

    /// オプションを差し替える。置換表サイズが変わっていたら確保し直す
    pub fn set_options(&mut self, options: EngineOptions) {
        if options.hash_mb != self.options.hash_mb {
            self.tt.resize(options.hash_mb);
        }
        self.options = options;
    }

    #[inline]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    #[inline]
    pub fn monitor(&self) -> &SearchMonitor {
        &self.monitor
    }

    #[inline]
    pub fn tt(&self) -> &TranspositionTable {
        &self.tt
    }

    #[inline]
    pub fn tt_mut(&mut self) -> &mut TranspositionTable {
        &mut self.tt
    }

    /// 最後の探索で得た詰み手順
    #[inline]
    pub fn best_moves(&self) -> &[A::Move] {
        &self.best_moves
    }

    /// 最後の探索のルート局面の結果
    #[inline]
    pub fn final_result(&self) -> Option<&SearchResult> {
        self.final_result.as_ref()
    }

    /// 定期出力の宛先を設定する
    pub fn set_info_callback(&mut self, callback: Box<dyn FnMut(&UsiInfo)>) {
        self.info_callback = Some(callback);
    }

    /// 次の探索開始時に置換表を初期化しない
    ///
    /// ダンプから読み込んだ探索結果を持ち越すために使う。1 回の探索で
    /// 消費され、その次からは通常どおり初期化される。
    pub fn preserve_tt_for_next_search(&mut self) {
        self.keep_tt_once = true;
    }

    /// 現在の探索状況を `info` レコードにまとめる
    pub fn current_info(&self) -> UsiInfo {
        let mut info = self.monitor.get_info();
        info.set(UsiInfoKey::Hashfull, self.tt.hashfull());
        info.set(UsiInfoKey::Score, self.score.to_usi_string());
        info
    }

    /// `adapter` の現局面から詰みを探す
    ///
    /// `is_root_or_node` は開始局面が攻め方の手番かどうか。停止フラグは
    /// 呼び出し側が事前に下ろしておくこと（タイマーが先に立てたら
    /// 即座に時間切れとして返る）。
    pub fn search(&mut self, adapter: &mut A, is_root_or_node: bool) -> NodeState {
        if !std::mem::take(&mut self.keep_tt_once) {
            self.tt.new_search();
        }
        let gc_interval = self.tt.num_entries() as u64 / 2 * 3;
        self.monitor.new_search(gc_interval);
        self.monitor.push_limit(self.options.nodes_limit);
        self.best_moves.clear();
        self.final_result = None;
        self.score = Score::default();

        let mut node = Node::new(adapter, is_root_or_node);
        let state = self.search_main_loop(&mut node);
        self.monitor.pop_limit();

        if state == NodeState::Proven && self.best_moves.len() % 2 != usize::from(is_root_or_node)
        {
            log::warn!(
                "failed to detect pv: length {} does not match the root side",
                self.best_moves.len()
            );
        }
        state
    }

    /// 反復深化の主ループ
    ///
    /// まず上界なしで詰みを探し、見つかったら手数上界を 2 縮めて
    /// 探し直す。縮めた上界で不詰が返ったら直前の詰みが最短なので、
    /// その評価値と手順を復元して終わる。
    fn search_main_loop(&mut self, node: &mut Node<'_, A>) -> NodeState {
        let mut node_state = NodeState::Unknown;
        let mut len = DEPTH_MAX_MATE_LEN;

        for i in 0..MAX_SEARCH_ITERATION {
            let old_score = self.score;
            let result = self.search_entry(node, len);
            self.score = Score::make(self.options.score_method, &result, node.root_is_or_node());
            self.final_result = Some(result);

            if result.pn() == 0 {
                debug_assert!(result.len().len() <= len.len());
                self.best_moves = self.get_mate_path(node, result.len());
                node_state = NodeState::Proven;

                let mut info = self.current_info();
                info.set(
                    UsiInfoKey::String,
                    format!(
                        "#{} result: mate in {} (upper_bound: {})",
                        i + 1,
                        self.best_moves.len(),
                        result.len()
                    ),
                );
                info.set(UsiInfoKey::Pv, self.pv_string());
                self.emit_info(info);

                if result.len().len() <= 1 {
                    break;
                }
                match self.options.post_search_level {
                    PostSearchLevel::None => break,
                    PostSearchLevel::UpperBound
                        if self.best_moves.len() as u32 == result.len().len() =>
                    {
                        break
                    }
                    _ => {}
                }
                len = result.len() - 2;
            } else {
                let mut info = self.current_info();
                info.set(UsiInfoKey::String, format!("#{} result: {}", i + 1, result));
                self.emit_info(info);

                if result.dn() == 0 && node_state != NodeState::Proven {
                    node_state = NodeState::Disproven;
                }
                if node_state == NodeState::Proven {
                    // 縮めた上界では詰まなかった。直前の詰みが最短
                    len = len + 2;
                    self.score = old_score;
                    if self.best_moves.len() as u32 != len.len() {
                        self.best_moves = self.get_mate_path(node, len);
                    }
                }
                break;
            }
        }

        node_state
    }

    /// 現局面に対する 1 回分の探索
    ///
    /// 上界なしのときは (1, 1) から、上界つきの再探索では (∞, ∞) で
    /// 一気に解く。確定しなければしきい値を倍々に広げて繰り返す。
    fn search_entry(&mut self, node: &mut Node<'_, A>, len: MateLen) -> SearchResult {
        let (mut thpn, mut thdn) = if len == DEPTH_MAX_MATE_LEN {
            (1, 1)
        } else {
            (INFINITE_PN_DN, INFINITE_PN_DN)
        };

        self.expansions.emplace(&mut self.tt, node, len, BitSet64::FULL);
        let mut result;
        loop {
            let mut inc_flag = 0;
            result = self.search_impl(node, thpn, thdn, len, &mut inc_flag);
            if result.is_final() {
                break;
            }
            if self.monitor.should_stop() {
                break;
            }
            if result.pn() >= INFINITE_PN_DN || result.dn() >= INFINITE_PN_DN {
                log::warn!(
                    "{} overflow detected at the root",
                    if result.pn() >= INFINITE_PN_DN {
                        "pn"
                    } else {
                        "dn"
                    }
                );
                break;
            }

            self.score = Score::make(self.options.score_method, &result, node.root_is_or_node());
            thpn = thpn.max((2 * result.pn()).min(INFINITE_PN_DN));
            thdn = thdn.max((2 * result.dn()).min(INFINITE_PN_DN));
        }
        self.expansions.pop();

        let query = self.tt.build_query(node);
        query.set_result(&mut self.tt, &result, None);
        result
    }

    /// df-pn + TCA の再帰本体
    ///
    /// 事前条件: `node` の展開が `expansions` の頂上に積まれていること。
    /// `inc_flag` は未消化の TCA 延長の数。
    fn search_impl(
        &mut self,
        node: &mut Node<'_, A>,
        mut thpn: PnDn,
        mut thdn: PnDn,
        len: MateLen,
        inc_flag: &mut u32,
    ) -> SearchResult {
        self.monitor.visit(node.depth());
        self.print_if_needed(node);

        // 深さ上限。経路依存の打ち切りなので千日手として扱う
        if node.is_exceed_max_depth() {
            return SearchResult::make_repetition(node.or_hand(), len, 1, node.depth());
        }

        self.expansions.eliminate_double_count(&mut self.tt, node);

        let orig_thpn = thpn;
        let orig_thdn = thdn;
        let caller_inc = *inc_flag;

        let mut curr = self.expansions.current().current_result(node);

        // Threshold Controlling Algorithm (TCA)
        // 浅い探索結果を参照しているときは、しきい値を少しだけ持ち上げて
        // 探索を延長する。そうしないとグラフの循環で pn/dn を過小評価
        // したまま無限ループに陥ることがある
        if self.expansions.current().does_have_old_child() {
            *inc_flag += 1;
        }
        if *inc_flag > 0 && !curr.is_final() {
            if curr.pn() < INFINITE_PN_DN {
                thpn = thpn.max(saturated_add(curr.pn(), 1));
            }
            if curr.dn() < INFINITE_PN_DN {
                thdn = thdn.max(saturated_add(curr.dn(), 1));
            }
        }

        if node.depth() > 0 && self.monitor.should_gc() {
            if self.tt.hashfull() >= GC_HASHFULL_HIGH_WATER {
                self.tt.collect_garbage(GC_REMOVAL_RATIO);
            }
            self.monitor.reset_next_gc();
        }

        while !self.monitor.should_stop() && curr.pn() < thpn && curr.dn() < thdn {
            let expansion = self.expansions.current();
            let best_move = expansion.best_move();
            let is_first = expansion.front_is_first_visit();
            let sum_mask = expansion.front_sum_mask();
            let (child_thpn, child_thdn) = expansion.child_thresholds(thpn, thdn);

            node.do_move(best_move);
            self.expansions.emplace(&mut self.tt, node, len - 1, sum_mask);

            let mut shortcut = None;
            if is_first {
                // 新しい局面を展開したので、TCA の延長はここで打ち止め
                *inc_flag = 0;

                // 初展開の時点でしきい値を超えていたら再帰しない。
                // 再帰すると TCA の延長に巻き込まれてすぐには戻らない
                // ことがある
                let r = self.expansions.current().current_result(node);
                if r.pn() >= child_thpn || r.dn() >= child_thdn {
                    shortcut = Some(r);
                }
            }
            let child_result = match shortcut {
                Some(r) => r,
                None => self.search_impl(node, child_thpn, child_thdn, len - 1, inc_flag),
            };

            self.expansions.pop();
            node.undo_move();

            let parent_pair = node.board_key_hand_pair();
            self.expansions
                .current_mut()
                .update_best_child(&mut self.tt, child_result, parent_pair);
            curr = self.expansions.current().current_result(node);

            thpn = orig_thpn;
            thdn = orig_thdn;
            if *inc_flag > 0 && !curr.is_final() {
                if curr.pn() < INFINITE_PN_DN {
                    thpn = thpn.max(saturated_add(curr.pn(), 1));
                }
                if curr.dn() < INFINITE_PN_DN {
                    thdn = thdn.max(saturated_add(curr.dn(), 1));
                }
            }

            // 延長を使い切ったら、延長を始めた先祖に制御を返す
            if *inc_flag == 0 && caller_inc > 0 {
                break;
            }
        }

        curr
    }

    /// ルートの詰みが確定した後、詰み手順を置換表から復元する
    ///
    /// 各局面で最短の詰みが記録された子（AND node では最長）を選んで
    /// 進む。1 手詰は置換表に書かれていないことがあるので先に調べる。
    /// 探索で詰みを示せなくなったら、千日手テーブルが汚れている
    /// 可能性があるので消して 1 回だけやり直す。
    fn get_mate_path(&mut self, node: &mut Node<'_, A>, len: MateLen) -> Vec<A::Move> {
        let mut len = len;
        let mut best_moves = Vec::new();
        let mut moves = Vec::new();

        while len.len() > 0 {
            if node.is_or_node() {
                if let Some(mv) = node.adapter_mut().mate_in_one() {
                    best_moves.push(mv);
                    node.do_move(mv);
                    break;
                }
            }

            let result = self.search_entry(node, len);
            if result.pn() != 0 {
                // 詰むはずの局面で詰みを示せない。余詰探索に千日手が
                // 絡むとしばしば起きる。千日手テーブルを消して再探索
                self.tt.clear_repetition();
                let retry = self.search_entry(node, len);
                if retry.pn() != 0 {
                    log::warn!(
                        "failed to re-prove a mate at depth {} during pv extraction",
                        node.depth()
                    );
                }
            }

            moves.clear();
            if node.is_or_node() {
                node.adapter_mut().generate_checks(&mut moves);
            } else {
                node.adapter_mut().generate_evasions(&mut moves);
            }

            let mut best_move = None;
            let mut best_len = if node.is_or_node() {
                MateLen::INFINITE
            } else {
                MateLen::MINUS_ONE
            };
            let mut best_disproven = MateLen::MINUS_ONE;
            for &mv in &moves {
                let query = self.tt.build_child_query(node, mv);
                let (disproven_len, proven_len) = query.final_range(&self.tt);
                if node.is_or_node() {
                    if proven_len < best_len {
                        best_move = Some(mv);
                        best_len = proven_len;
                        best_disproven = disproven_len;
                    }
                } else {
                    // 証明が記録されていない子は選ばない（GC で消えた子を
                    // 選ぶと手順が壊れる）。証明済み AND node の子はすべて
                    // 詰みなので、記録の残っている中で最長を選べばよい
                    if proven_len == MateLen::INFINITE {
                        continue;
                    }
                    if proven_len > best_len
                        || (proven_len == best_len && best_disproven < disproven_len)
                    {
                        best_move = Some(mv);
                        best_len = proven_len;
                        best_disproven = disproven_len;
                    }
                }
            }

            match best_move {
                Some(mv) => {
                    len = len - 1;
                    node.do_move(mv);
                    best_moves.push(mv);
                }
                None => break,
            }
        }

        roll_back(node, &best_moves);
        best_moves
    }

    fn pv_string(&self) -> String {
        let mut out = String::new();
        for (i, mv) in self.best_moves.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&mv.to_string());
        }
        out
    }

    fn print_if_needed(&mut self, node: &Node<'_, A>) {
        if !self.monitor.take_print_request() {
            return;
        }

        let mut info = self.current_info();
        info.set(UsiInfoKey::Depth, node.depth());
        self.emit_info(info);
        self.monitor.tick();
    }

    fn emit_info(&mut self, info: UsiInfo) {
        if let Some(callback) = &mut self.info_callback {
            callback(&info);
        }
    }
}
