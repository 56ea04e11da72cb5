mod args;
mod list;
mod parse;
mod run;

use std::fmt::Display;

use clap::{
    builder::{styling::AnsiColor, Styles},
    Parser, Subcommand,
};
use concolor_clap::ColorChoice;
use env_logger::WriteStyle;
use log::{error, info, LevelFilter};

use crate::logger;

use self::args::{BackupArgs, GlobalArgs, ListArgs, LoggerArgs, RestoreArgs, RetryArgs};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None, propagate_version = true, styles = cli_styles())]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up every activated subject of one kind
    Backup(BackupArgs),

    /// Restore every activated record of one kind
    Restore(RestoreArgs),

    /// Run the failed items of an earlier task again
    Retry(RetryArgs),

    /// Show known subjects or the items of a task
    List(ListArgs),
}

impl Command {
    fn global(&self) -> &GlobalArgs {
        match self {
            Command::Backup(args) => &args.global,
            Command::Restore(args) => &args.global,
            Command::Retry(args) => &args.global,
            Command::List(args) => &args.global,
        }
    }
}

pub async fn main() {
    let cli = Cli::parse();
    init_logger(&cli.command.global().logger);

    let result = match cli.command {
        Command::Backup(args) => run::backup(args).await,
        Command::Restore(args) => run::restore(args).await,
        Command::Retry(args) => run::retry(args).await,
        Command::List(args) => list::main(args).await,
    };

    if let Err(err) = result {
        error!("{err}");
    }
}

fn init_logger(args: &LoggerArgs) {
    let level = log_level_from_args(args.verbose, args.quiet);
    let style = match args.color {
        ColorChoice::Always => WriteStyle::Always,
        ColorChoice::Never => WriteStyle::Never,
        _ => WriteStyle::Auto,
    };
    logger::init(level, style);
}

fn log_level_from_args(verbose: u8, quiet: u8) -> LevelFilter {
    let verbosity = i16::from(verbose) - i16::from(quiet);
    match verbosity {
        i16::MIN..=-2 => LevelFilter::Error,
        -1 => LevelFilter::Warn,
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn print_stat<T: Display>(name: &str, value: T) {
    let style = AnsiColor::BrightCyan.on_default();
    info!("{style}{name}:{style:#} {value}");
}

fn cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightMagenta.on_default())
        .usage(AnsiColor::BrightMagenta.on_default())
        .literal(AnsiColor::BrightBlue.on_default())
        .placeholder(AnsiColor::BrightCyan.on_default())
}
