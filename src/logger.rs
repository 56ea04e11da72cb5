use std::io::{self, Write};

use clap::builder::styling::AnsiColor;
use env_logger::{fmt::Formatter, WriteStyle};
use log::{Level, LevelFilter, Record};

pub fn init(level: LevelFilter, style: WriteStyle) {
    env_logger::Builder::new()
        .format(format)
        .filter_level(level)
        .write_style(style)
        .init();
}

fn format(f: &mut Formatter, record: &Record) -> io::Result<()> {
    let args = record.args();
    let level = record.level();
    match level {
        Level::Warn | Level::Error => {
            let style = f.default_level_style(level);
            let prefix = if level == Level::Warn { "warning: " } else { "error: " };
            writeln!(f, "{style}{prefix}{style:#}{args}")
        }
        Level::Info => writeln!(f, "{args}"),
        Level::Debug | Level::Trace => {
            let style = AnsiColor::BrightBlack.on_default();
            let target = record.target().trim_start_matches("databackup::");
            writeln!(f, "{style}[{target}]{style:#} {args}")
        }
    }
}
