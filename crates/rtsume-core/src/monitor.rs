//! 探索の監視
//!
//! 探索局面数・経過時間・NPS の観測、停止フラグ、GC の起動判断、
//! 定期出力の要求をまとめて扱う。停止フラグと局面数カウンタは
//! タイマースレッドと共有するため atomic で持つ。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::types::Depth;
use crate::usi_info::{UsiInfo, UsiInfoKey};

/// NPS 計算に使う履歴の長さ
const HIST_LEN: usize = 16;

/// 探索モニタ
pub struct SearchMonitor {
    stop: Arc<AtomicBool>,
    move_count: Arc<AtomicU64>,
    print_request: Arc<AtomicBool>,

    start_time: Instant,
    depth_max: Depth,

    tp_hist: [Instant; HIST_LEN],
    mc_hist: [u64; HIST_LEN],
    hist_idx: usize,

    move_limit: u64,
    limit_stack: Vec<u64>,

    gc_interval: u64,
    next_gc_count: u64,
}

impl Default for SearchMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchMonitor {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            move_count: Arc::new(AtomicU64::new(0)),
            print_request: Arc::new(AtomicBool::new(false)),
            start_time: now,
            depth_max: 0,
            tp_hist: [now; HIST_LEN],
            mc_hist: [0; HIST_LEN],
            hist_idx: 0,
            move_limit: u64::MAX,
            limit_stack: Vec::new(),
            gc_interval: u64::MAX,
            next_gc_count: u64::MAX,
        }
    }

    /// 新しい探索を開始する
    pub fn new_search(&mut self, gc_interval: u64) {
        self.start_time = Instant::now();
        self.depth_max = 0;
        self.move_count.store(0, Ordering::Relaxed);
        self.tp_hist = [self.start_time; HIST_LEN];
        self.mc_hist = [0; HIST_LEN];
        self.hist_idx = 0;
        self.move_limit = u64::MAX;
        self.limit_stack.clear();
        self.gc_interval = gc_interval;
        self.reset_next_gc();
    }

    /// 局面を 1 つ訪問した
    #[inline]
    pub fn visit(&mut self, depth: Depth) {
        self.move_count.fetch_add(1, Ordering::Relaxed);
        self.depth_max = self.depth_max.max(depth);
    }

    /// これまでに訪問した局面数
    #[inline]
    pub fn move_count(&self) -> u64 {
        self.move_count.load(Ordering::Relaxed)
    }

    /// 探索を停止すべきか（停止フラグ or 局面数上限）
    #[inline]
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed) || self.move_count() >= self.move_limit
    }

    /// 停止フラグを立てる
    pub fn set_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// 停止フラグを下ろす
    pub fn reset_stop(&self) {
        self.stop.store(false, Ordering::Relaxed);
    }

    /// タイマースレッドと共有する停止フラグ
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// タイマースレッドと共有する局面数カウンタ
    pub fn node_count_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.move_count)
    }

    /// タイマースレッドと共有する出力要求フラグ
    pub fn print_request_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.print_request)
    }

    /// 定期出力を要求する
    pub fn request_print(&self) {
        self.print_request.store(true, Ordering::Relaxed);
    }

    /// 出力要求が立っていれば下ろして true を返す
    pub fn take_print_request(&self) -> bool {
        self.print_request.swap(false, Ordering::Relaxed)
    }

    /// NPS 履歴に現時刻を記録する。定期出力のたびに呼ぶ
    pub fn tick(&mut self) {
        self.tp_hist[self.hist_idx % HIST_LEN] = Instant::now();
        self.mc_hist[self.hist_idx % HIST_LEN] = self.move_count();
        self.hist_idx += 1;
    }

    /// 局面数上限を積む（小さい方が有効になる）
    pub fn push_limit(&mut self, move_limit: u64) {
        self.limit_stack.push(self.move_limit);
        self.move_limit = self.move_limit.min(move_limit);
    }

    /// 局面数上限を戻す
    pub fn pop_limit(&mut self) {
        if let Some(limit) = self.limit_stack.pop() {
            self.move_limit = limit;
        }
    }

    /// GC を起動すべきか
    #[inline]
    pub fn should_gc(&self) -> bool {
        self.move_count() >= self.next_gc_count
    }

    /// 次回 GC の起動局面数を再設定する
    pub fn reset_next_gc(&mut self) {
        self.next_gc_count = self.move_count().saturating_add(self.gc_interval);
    }

    /// 現在の探索状況を `info` レコードにする
    pub fn get_info(&self) -> UsiInfo {
        let curr_time = Instant::now();
        let time_ms = curr_time.duration_since(self.start_time).as_millis() as u64;
        let move_count = self.move_count();

        let nps = if self.hist_idx >= HIST_LEN {
            // 直近 HIST_LEN 回の出力間隔から計算する
            let oldest = self.hist_idx % HIST_LEN;
            let tp = self.tp_hist[oldest];
            let mc = self.mc_hist[oldest];
            let diff_ms = curr_time.duration_since(tp).as_millis() as u64;
            if diff_ms > 0 {
                (move_count - mc) * 1000 / diff_ms
            } else {
                0
            }
        } else if time_ms > 0 {
            move_count * 1000 / time_ms
        } else {
            0
        };

        let mut info = UsiInfo::new();
        info.set(UsiInfoKey::SelDepth, self.depth_max);
        info.set(UsiInfoKey::Time, time_ms);
        info.set(UsiInfoKey::Nodes, move_count);
        info.set(UsiInfoKey::Nps, nps);
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visit_and_count() {
        let mut monitor = SearchMonitor::new();
        monitor.new_search(u64::MAX);
        monitor.visit(1);
        monitor.visit(5);
        monitor.visit(3);
        assert_eq!(monitor.move_count(), 3);
    }

    #[test]
    fn test_stop_flag() {
        let monitor = SearchMonitor::new();
        assert!(!monitor.should_stop());

        let handle = monitor.stop_handle();
        handle.store(true, Ordering::Relaxed);
        assert!(monitor.should_stop());

        monitor.reset_stop();
        assert!(!monitor.should_stop());
    }

    #[test]
    fn test_move_limit() {
        let mut monitor = SearchMonitor::new();
        monitor.new_search(u64::MAX);
        monitor.push_limit(2);
        monitor.visit(1);
        assert!(!monitor.should_stop());
        monitor.visit(1);
        assert!(monitor.should_stop());

        // 上限を戻せば再開できる
        monitor.pop_limit();
        assert!(!monitor.should_stop());
    }

    #[test]
    fn test_gc_schedule() {
        let mut monitor = SearchMonitor::new();
        monitor.new_search(10);
        assert!(!monitor.should_gc());
        for _ in 0..10 {
            monitor.visit(1);
        }
        assert!(monitor.should_gc());
        monitor.reset_next_gc();
        assert!(!monitor.should_gc());
    }

    #[test]
    fn test_print_request() {
        let monitor = SearchMonitor::new();
        assert!(!monitor.take_print_request());
        monitor.request_print();
        assert!(monitor.take_print_request());
        assert!(!monitor.take_print_request());
    }

    #[test]
    fn test_info_has_nodes() {
        let mut monitor = SearchMonitor::new();
        monitor.new_search(u64::MAX);
        monitor.visit(2);
        let info = monitor.get_info();
        assert_eq!(info.get(UsiInfoKey::Nodes), Some("1"));
    }
}
