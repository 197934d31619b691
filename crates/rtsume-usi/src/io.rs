//! USI 出力のユーティリティ

use std::io::{self, Write};

/// USI プロトコルに沿って 1 行出力するヘルパ。行ごとに flush する
pub fn usi_println<W: Write>(writer: &mut W, line: &str) -> io::Result<()> {
    writeln!(writer, "{line}")?;
    writer.flush()
}

/// `info string …` の出力ユーティリティ
pub fn info_string<W: Write>(writer: &mut W, message: impl AsRef<str>) -> io::Result<()> {
    usi_println(writer, &format!("info string {}", message.as_ref()))
}
