//! USI オプションの宣言と解釈
//!
//! オプション名は探索コアの `EngineOptions` のフィールド名に合わせる。
//! `more_precise_pv` は `post_search_level` の簡易版で、true なら
//! `precise` に切り替える。

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use rtsume_core::option::{EngineOptions, PostSearchLevel, ScoreCalculationMethod};

use crate::io::usi_println;

/// `usi` コマンドへの応答でオプション一覧を宣言する
pub fn declare_options<W: Write>(writer: &mut W, opts: &EngineOptions) -> io::Result<()> {
    usi_println(
        writer,
        &format!(
            "option name hash_mb type spin default {} min 1 max 33554432",
            opts.hash_mb
        ),
    )?;
    usi_println(
        writer,
        "option name score_method type combo default dn var dn var minus_pn var ponanza",
    )?;
    usi_println(
        writer,
        "option name post_search_level type combo default upper_bound var none var upper_bound var precise",
    )?;
    usi_println(writer, "option name more_precise_pv type check default false")?;
    usi_println(writer, "option name tt_read_path type filename default ")?;
    usi_println(writer, "option name tt_write_path type filename default ")?;
    usi_println(writer, "option name tt_no_overwrite type check default false")?;
    usi_println(
        writer,
        &format!(
            "option name pv_interval_ms type spin default {} min 0 max 3600000",
            opts.pv_interval_ms
        ),
    )?;
    usi_println(
        writer,
        "option name nodes_limit type spin default -1 min -1 max 9223372036854775807",
    )?;
    usi_println(
        writer,
        &format!(
            "option name root_is_and_node_if_checked type check default {}",
            opts.root_is_and_node_if_checked
        ),
    )
}

/// `setoption name <name> value <value>` を `EngineOptions` に反映する
pub fn set_option(opts: &mut EngineOptions, name: &str, value: &str) -> Result<()> {
    match name {
        "hash_mb" => {
            opts.hash_mb = value
                .parse()
                .map_err(|_| anyhow!("invalid hash_mb: {value}"))?;
        }
        "score_method" => {
            opts.score_method = ScoreCalculationMethod::parse(value)
                .ok_or_else(|| anyhow!("invalid score_method: {value}"))?;
        }
        "post_search_level" => {
            opts.post_search_level = PostSearchLevel::parse(value)
                .ok_or_else(|| anyhow!("invalid post_search_level: {value}"))?;
        }
        "more_precise_pv" => {
            if parse_bool(value)? {
                opts.post_search_level = PostSearchLevel::Precise;
            }
        }
        "tt_read_path" => {
            opts.tt_read_path = non_empty_path(value);
        }
        "tt_write_path" => {
            opts.tt_write_path = non_empty_path(value);
        }
        "tt_no_overwrite" => {
            opts.tt_no_overwrite = parse_bool(value)?;
        }
        "pv_interval_ms" => {
            opts.pv_interval_ms = value
                .parse()
                .map_err(|_| anyhow!("invalid pv_interval_ms: {value}"))?;
        }
        "nodes_limit" => {
            // USI の慣習で -1 は無制限
            let parsed: i64 = value
                .parse()
                .map_err(|_| anyhow!("invalid nodes_limit: {value}"))?;
            opts.nodes_limit = if parsed < 0 { u64::MAX } else { parsed as u64 };
        }
        "root_is_and_node_if_checked" => {
            opts.root_is_and_node_if_checked = parse_bool(value)?;
        }
        _ => return Err(anyhow!("unknown option: {name}")),
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(anyhow!("invalid boolean: {value}")),
    }
}

fn non_empty_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() || value == "<empty>" {
        None
    } else {
        Some(PathBuf::from(value))
    }
}
