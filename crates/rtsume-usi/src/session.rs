//! コマンドループ
//!
//! 1 行ずつコマンドを読み、詰探索を駆動する。`go mate <ms>` の間は
//! タイマースレッドが時間切れの停止フラグと定期出力の要求を立てる。
//! 探索自体は呼び出しスレッド上で同期的に走る。

use std::fs::File;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rtsume_core::option::EngineOptions;
use rtsume_core::searcher::{MateSearcher, NodeState};

use crate::io::{info_string, usi_println};
use crate::options::{declare_options, set_option};
use crate::UsiAdapter;

/// タイマースレッドの起床間隔
const TIMER_TICK: Duration = Duration::from_millis(10);

/// 1 接続ぶんのエンジンセッション
pub struct Session<A: UsiAdapter, W: Write + 'static> {
    adapter: A,
    searcher: MateSearcher<A>,
    options: EngineOptions,
    out: Arc<Mutex<W>>,
}

impl<A: UsiAdapter, W: Write + 'static> Session<A, W> {
    pub fn new(adapter: A, writer: W) -> Self {
        let options = EngineOptions::default();
        Self {
            adapter,
            searcher: MateSearcher::new(options.clone()),
            options,
            out: Arc::new(Mutex::new(writer)),
        }
    }

    /// 出力先への共有ハンドル
    pub fn output_handle(&self) -> Arc<Mutex<W>> {
        Arc::clone(&self.out)
    }

    /// 探索を止めるための共有フラグ
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.searcher.monitor().stop_handle()
    }

    /// EOF か `quit` までコマンドを処理する
    pub fn run<R: BufRead>(&mut self, input: R) -> Result<()> {
        for line in input.lines() {
            let line = line.context("failed to read a command line")?;
            if !self.handle_line(&line)? {
                break;
            }
        }
        Ok(())
    }

    /// 1 行ぶんのコマンドを処理する。続行するなら true
    pub fn handle_line(&mut self, line: &str) -> Result<bool> {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("usi") => {
                let mut out = self.out.lock().unwrap();
                usi_println(&mut *out, "id name rtsume")?;
                usi_println(&mut *out, "id author rtsume project")?;
                declare_options(&mut *out, &self.options)?;
                usi_println(&mut *out, "usiok")?;
            }
            Some("isready") => {
                self.searcher.set_options(self.options.clone());
                self.load_tt_if_configured()?;
                usi_println(&mut *self.out.lock().unwrap(), "readyok")?;
            }
            Some("setoption") => {
                // setoption name <name> [value <value>]
                let mut name = None;
                let mut value = String::new();
                while let Some(token) = tokens.next() {
                    match token {
                        "name" => name = tokens.next(),
                        "value" => {
                            value = tokens.by_ref().collect::<Vec<_>>().join(" ");
                            break;
                        }
                        _ => {}
                    }
                }
                if let Some(name) = name {
                    if let Err(err) = set_option(&mut self.options, name, &value) {
                        info_string(&mut *self.out.lock().unwrap(), err.to_string())?;
                    }
                }
            }
            Some("position") => {
                let rest = line.trim_start_matches("position").trim_start();
                self.handle_position(rest)?;
            }
            Some("go") => {
                match (tokens.next(), tokens.next()) {
                    (Some("mate"), budget) => {
                        let deadline_ms = match budget {
                            None | Some("infinite") => None,
                            Some(ms) => Some(
                                ms.parse::<u64>()
                                    .with_context(|| format!("invalid mate budget: {ms}"))?,
                            ),
                        };
                        self.handle_go_mate(deadline_ms)?;
                    }
                    _ => {
                        info_string(
                            &mut *self.out.lock().unwrap(),
                            "only `go mate` is supported",
                        )?;
                    }
                }
            }
            Some("stop") => {
                self.searcher.monitor().set_stop();
            }
            Some("quit") => return Ok(false),
            Some(other) => {
                info_string(
                    &mut *self.out.lock().unwrap(),
                    format!("unsupported command: {other}"),
                )?;
            }
            None => {}
        }
        Ok(true)
    }

    /// `position …` の局面をアダプタへ渡し、後続の指し手を進める
    fn handle_position(&mut self, rest: &str) -> Result<()> {
        let (sfen_part, moves_part) = match rest.find(" moves ") {
            Some(pos) => (&rest[..pos], Some(&rest[pos + " moves ".len()..])),
            None => (rest, None),
        };

        let sfen = sfen_part.trim_start_matches("sfen").trim();
        self.adapter.set_sfen(sfen)?;

        if let Some(moves) = moves_part {
            for token in moves.split_whitespace() {
                match self.adapter.parse_move(token) {
                    Some(mv) => self.adapter.do_move(mv),
                    None => {
                        info_string(
                            &mut *self.out.lock().unwrap(),
                            format!("illegal move in position command: {token}"),
                        )?;
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// `go mate` の本体。タイマースレッドを立てて同期的に探索する
    fn handle_go_mate(&mut self, budget_ms: Option<u64>) -> Result<()> {
        self.searcher.set_options(self.options.clone());
        self.searcher.monitor().reset_stop();

        let out = Arc::clone(&self.out);
        self.searcher.set_info_callback(Box::new(move |info| {
            let mut out = out.lock().unwrap();
            let _ = usi_println(&mut *out, &info.to_string());
        }));

        let stop = self.searcher.monitor().stop_handle();
        let print_request = self.searcher.monitor().print_request_handle();
        let search_end = Arc::new(AtomicBool::new(false));
        let timer_end = Arc::clone(&search_end);
        let pv_interval_ms = self.options.pv_interval_ms;
        let deadline = budget_ms.map(|ms| Instant::now() + Duration::from_millis(ms));

        let timer = thread::spawn(move || {
            run_timer(stop, print_request, timer_end, deadline, pv_interval_ms);
        });

        let root_is_or_node = self
            .adapter
            .root_is_or_node(self.options.root_is_and_node_if_checked);
        let state = self.searcher.search(&mut self.adapter, root_is_or_node);

        search_end.store(true, Ordering::Relaxed);
        let _ = timer.join();

        {
            let mut out = self.out.lock().unwrap();
            let info = self.searcher.current_info();
            usi_println(&mut *out, &info.to_string())?;

            match state {
                NodeState::Proven => {
                    let mut line = String::from("checkmate");
                    for mv in self.searcher.best_moves() {
                        line.push(' ');
                        line.push_str(&mv.to_string());
                    }
                    usi_println(&mut *out, &line)?;
                }
                NodeState::Disproven => usi_println(&mut *out, "checkmate nomate")?,
                NodeState::Unknown => usi_println(&mut *out, "checkmate timeout")?,
            }
        }

        self.save_tt_if_configured()?;
        Ok(())
    }

    /// `tt_read_path` が設定されていれば置換表を読み込む。失敗は無視
    fn load_tt_if_configured(&mut self) -> Result<()> {
        let Some(path) = self.options.tt_read_path.clone() else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        match File::open(&path) {
            Ok(mut file) => match self.searcher.tt_mut().load(&mut file) {
                Ok(()) => {
                    self.searcher.preserve_tt_for_next_search();
                    info_string(
                        &mut *self.out.lock().unwrap(),
                        format!("load_path: {}", path.display()),
                    )?;
                }
                Err(err) => {
                    log::warn!("tt load failed: {err}");
                    info_string(
                        &mut *self.out.lock().unwrap(),
                        format!("tt load failed, starting empty: {err}"),
                    )?;
                }
            },
            Err(err) => {
                log::warn!("tt load failed: {err}");
            }
        }
        Ok(())
    }

    /// `tt_write_path` が設定されていれば置換表を書き出す
    fn save_tt_if_configured(&mut self) -> Result<()> {
        let Some(path) = self.options.tt_write_path.clone() else {
            return Ok(());
        };
        let path = if self.options.tt_no_overwrite {
            no_overwrite_path(&path)
        } else {
            path
        };

        let mut file =
            File::create(&path).with_context(|| format!("cannot create {}", path.display()))?;
        self.searcher.tt().save(&mut file)?;
        info_string(
            &mut *self.out.lock().unwrap(),
            format!("save_path: {}", path.display()),
        )?;
        Ok(())
    }
}

/// タイマースレッド本体
///
/// 締切を過ぎたら停止フラグを立て、`pv_interval_ms` ごとに定期出力を
/// 要求する。`end` が立ったら戻る。
fn run_timer(
    stop: Arc<AtomicBool>,
    print_request: Arc<AtomicBool>,
    end: Arc<AtomicBool>,
    deadline: Option<Instant>,
    pv_interval_ms: u64,
) {
    let start = Instant::now();
    let mut next_print = Duration::from_millis(pv_interval_ms);

    while !end.load(Ordering::Relaxed) {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                stop.store(true, Ordering::Relaxed);
            }
        }
        if pv_interval_ms > 0 && start.elapsed() >= next_print {
            print_request.store(true, Ordering::Relaxed);
            next_print += Duration::from_millis(pv_interval_ms);
        }
        thread::sleep(TIMER_TICK);
    }
}

/// 既存ファイルと衝突しない書き込み先を探す
///
/// "name.bin" → "name (1).bin" → "name (2).bin" → … の要領で
/// 末尾の番号を増やしていく。
fn no_overwrite_path(path: &Path) -> PathBuf {
    let mut path = path.to_path_buf();
    while path.exists() {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|s| format!(".{}", s.to_string_lossy()))
            .unwrap_or_default();

        let next_stem = match parse_numbered_stem(&stem) {
            Some((base, n)) => format!("{}({})", base, n + 1),
            None => format!("{} (1)", stem),
        };
        path.set_file_name(format!("{next_stem}{ext}"));
    }
    path
}

/// "name (3)" 形式の末尾番号を取り出す。base は "name (" の手前まで
fn parse_numbered_stem(stem: &str) -> Option<(&str, u32)> {
    let open = stem.rfind(" (")?;
    let rest = &stem[open + 2..];
    let close = rest.strip_suffix(')')?;
    let n: u32 = close.parse().ok()?;
    Some((&stem[..open + 2], n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtsume_core::fixture::{FixtureGame, FixtureMove, StateDef};
    use rtsume_core::make_hand;
    use rtsume_core::types::PieceType;

    impl UsiAdapter for FixtureGame {
        fn set_sfen(&mut self, _sfen: &str) -> Result<()> {
            // スクリプト固定局面は構築時に決まっている
            Ok(())
        }

        fn parse_move(&self, s: &str) -> Option<FixtureMove> {
            s.strip_prefix('m')?.parse().ok().map(FixtureMove)
        }

        fn root_is_or_node(&self, _and_node_if_checked: bool) -> bool {
            self.attacker_to_move()
        }
    }

    fn mate_in_one_game() -> FixtureGame {
        let states = vec![
            StateDef::or_state(0x100)
                .attacker_hand(make_hand![Gold])
                .drop_mv(1, 1, PieceType::Gold),
            StateDef::and_state(0x200),
        ];
        FixtureGame::new(states, 0)
    }

    fn output_of(session: &Session<FixtureGame, Vec<u8>>) -> String {
        String::from_utf8(session.output_handle().lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn test_usi_handshake() {
        let mut session = Session::new(mate_in_one_game(), Vec::new());
        session.run("usi\nisready\nquit\n".as_bytes()).unwrap();

        let output = output_of(&session);
        assert!(output.contains("id name rtsume"));
        assert!(output.contains("option name hash_mb "));
        assert!(output.contains("usiok"));
        assert!(output.contains("readyok"));
    }

    #[test]
    fn test_go_mate_finds_mate() {
        let mut session = Session::new(mate_in_one_game(), Vec::new());
        session
            .run("usi\nisready\ngo mate 10000\nquit\n".as_bytes())
            .unwrap();

        let output = output_of(&session);
        assert!(output.contains("checkmate m1"), "output: {output}");
    }

    #[test]
    fn test_go_mate_nomate() {
        let states = vec![StateDef::or_state(0x100)];
        let mut session = Session::new(FixtureGame::new(states, 0), Vec::new());
        session
            .run("isready\ngo mate 10000\nquit\n".as_bytes())
            .unwrap();

        let output = output_of(&session);
        assert!(output.contains("checkmate nomate"), "output: {output}");
    }

    #[test]
    fn test_nodes_limit_reports_timeout() {
        // 千日手ループは即座に確定しないので、局面数 1 で打ち切られる
        let states = vec![
            StateDef::or_state(0xC00).attacker_hand(make_hand![Gold]).mv(1, 1),
            StateDef::and_state(0xC10).attacker_hand(make_hand![Gold]).mv(2, 0),
        ];
        let mut session = Session::new(FixtureGame::new(states, 0), Vec::new());
        session
            .run(
                "setoption name nodes_limit value 1\nisready\ngo mate infinite\nquit\n".as_bytes(),
            )
            .unwrap();

        let output = output_of(&session);
        assert!(output.contains("checkmate timeout"), "output: {output}");
    }

    #[test]
    fn test_position_applies_moves() {
        let states = vec![
            StateDef::or_state(0x100)
                .attacker_hand(make_hand![Gold, Gold])
                .drop_mv(1, 1, PieceType::Gold),
            StateDef::and_state(0x200).attacker_hand(make_hand![Gold]).mv(2, 2),
            StateDef::or_state(0x300)
                .attacker_hand(make_hand![Gold])
                .drop_mv(3, 3, PieceType::Gold),
            StateDef::and_state(0x400),
        ];
        let mut session = Session::new(FixtureGame::new(states, 0), Vec::new());
        session
            .run("position sfen test moves m1 m2\ngo mate 10000\nquit\n".as_bytes())
            .unwrap();

        // 2 手進めた局面は 1 手詰
        let output = output_of(&session);
        assert!(output.contains("checkmate m3"), "output: {output}");
    }

    #[test]
    fn test_tt_write_no_overwrite_probing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.bin");
        std::fs::write(&path, b"occupied").unwrap();

        let probed = no_overwrite_path(&path);
        assert_eq!(probed.file_name().unwrap(), "dump (1).bin");

        std::fs::write(&probed, b"occupied").unwrap();
        let probed2 = no_overwrite_path(&path);
        assert_eq!(probed2.file_name().unwrap(), "dump (2).bin");
    }

    #[test]
    fn test_tt_dump_roundtrip_between_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mate.tt");
        let path_str = path.display().to_string();

        let mut writer = Session::new(mate_in_one_game(), Vec::new());
        writer
            .run(
                format!(
                    "setoption name tt_write_path value {path_str}\nisready\ngo mate 10000\nquit\n"
                )
                .as_bytes(),
            )
            .unwrap();
        assert!(path.exists());

        let mut reader = Session::new(mate_in_one_game(), Vec::new());
        reader
            .run(
                format!(
                    "setoption name tt_read_path value {path_str}\nisready\ngo mate 10000\nquit\n"
                )
                .as_bytes(),
            )
            .unwrap();

        let output = output_of(&reader);
        assert!(output.contains("load_path"), "output: {output}");
        assert!(output.contains("checkmate m1"), "output: {output}");
    }
}
