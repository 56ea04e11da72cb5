#[cfg(test)]
mod tests;

use std::{path::Path, sync::Arc};

use itertools::Itertools;
use log::debug;

use crate::shell::{quote, CommandOutput, Shell};

pub const CLEAR_FLAG: &str = "--recursive-unlink";

#[derive(Debug, Clone, Copy)]
pub struct CompressArgs<'a> {
    /// Stream through the filter program instead of handing it to `tar -I`.
    pub pipe: bool,
    pub exclusions: &'a [String],
    pub follow_symlinks: bool,
    pub src_dir: &'a Path,
    pub src: &'a str,
    pub dst: &'a Path,
    pub program: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
pub struct DecompressArgs<'a> {
    pub exclusions: &'a [String],
    pub clear: bool,
    /// Adds `m`: extracted files get the current time instead of the archived one.
    pub touch: bool,
    pub src: &'a Path,
    pub dst: &'a Path,
    pub program: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct ArchiveCodec {
    shell: Arc<dyn Shell>,
}

impl ArchiveCodec {
    pub fn new(shell: Arc<dyn Shell>) -> Self {
        ArchiveCodec { shell }
    }

    pub async fn compress(&self, args: &CompressArgs<'_>) -> CommandOutput {
        let line = compress_command(args);
        debug!("compressing {} into {}", args.src, args.dst.display());
        if args.pipe {
            self.shell.run_in(&line, Some(args.src_dir)).await
        } else {
            self.shell.run(&line).await
        }
    }

    pub async fn decompress(&self, args: &DecompressArgs<'_>) -> CommandOutput {
        let line = decompress_command(args);
        debug!("extracting {} into {}", args.src.display(), args.dst.display());
        self.shell.run(&line).await
    }

    pub async fn test(&self, src: &Path, program: Option<&str>) -> CommandOutput {
        let output = self.shell.run(&test_command(src, program)).await;
        if output.is_success() {
            output
        } else {
            output.and(CommandOutput::failed(format!(
                "archive {} failed the integrity test",
                src.display()
            )))
        }
    }
}

pub fn compress_command(args: &CompressArgs) -> String {
    let h = if args.follow_symlinks { " -h" } else { "" };
    let dst = quote(args.dst.to_string_lossy());

    let exclusions = exclusion_args(args.exclusions);
    if args.pipe {
        let filter = args
            .program
            .map(|program| format!(" | {program}"))
            .unwrap_or_default();
        // Globs expand against the working directory, so they go without `-C`.
        let src = if args.src.contains('*') {
            args.src.to_owned()
        } else {
            format!("-C {} {}", quote(args.src_dir.to_string_lossy()), quote(args.src))
        };
        format!("tar --totals{exclusions}{h} -cpf - {src}{filter} > {dst}")
    } else {
        let filter = filter_arg(args.program);
        format!(
            "tar --totals{exclusions}{h} -cpf {dst} -C {} {}{filter}",
            quote(args.src_dir.to_string_lossy()),
            quote(args.src)
        )
    }
}

pub fn decompress_command(args: &DecompressArgs) -> String {
    let exclusions = exclusion_args(args.exclusions);
    let clear = if args.clear {
        format!(" {CLEAR_FLAG}")
    } else {
        String::new()
    };
    let m = if args.touch { "m" } else { "" };
    format!(
        "tar --totals{exclusions}{clear} -x{m}pf {} -C {}{}",
        quote(args.src.to_string_lossy()),
        quote(args.dst.to_string_lossy()),
        filter_arg(args.program)
    )
}

pub fn test_command(src: &Path, program: Option<&str>) -> String {
    format!(
        "tar -t -f {}{} > /dev/null 2>&1",
        quote(src.to_string_lossy()),
        filter_arg(program)
    )
}

fn exclusion_args(exclusions: &[String]) -> String {
    exclusions
        .iter()
        .filter(|pattern| !pattern.is_empty())
        .map(|pattern| format!(" --exclude={pattern}"))
        .join("")
}

fn filter_arg(program: Option<&str>) -> String {
    program
        .map(|program| format!(" -I {}", quote(program)))
        .unwrap_or_default()
}
