use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const DEFAULT_COMPRESSION_LEVEL: u8 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    Tar,
    #[default]
    Zstd,
    Lz4,
}

impl CompressionType {
    pub fn suffix(self) -> &'static str {
        match self {
            CompressionType::Tar => "tar",
            CompressionType::Zstd => "tar.zst",
            CompressionType::Lz4 => "tar.lz4",
        }
    }

    /// Filter program fed the tar stream when writing, `None` for plain tar.
    pub fn compress_program(self, level: u8) -> Option<String> {
        match self {
            CompressionType::Tar => None,
            CompressionType::Zstd => Some(format!("zstd -r -T0 --ultra -{level} -q --priority=rt")),
            CompressionType::Lz4 => Some(format!(
                "zstd -r -T0 --ultra -{level} -q --priority=rt --format=lz4"
            )),
        }
    }

    pub fn decompress_program(self) -> Option<&'static str> {
        match self {
            CompressionType::Tar => None,
            CompressionType::Zstd | CompressionType::Lz4 => Some("zstd"),
        }
    }

    /// Recovers the type from an archive file name such as `user.tar.zst`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        [CompressionType::Zstd, CompressionType::Lz4, CompressionType::Tar]
            .into_iter()
            .find(|ct| name.ends_with(&format!(".{}", ct.suffix())))
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionType::Tar => "tar",
            CompressionType::Zstd => "zstd",
            CompressionType::Lz4 => "lz4",
        };
        write!(f, "{name}")
    }
}

impl FromStr for CompressionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tar" => Ok(CompressionType::Tar),
            "zstd" | "zst" => Ok(CompressionType::Zstd),
            "lz4" => Ok(CompressionType::Lz4),
            _ => Err(anyhow::anyhow!("unknown compression type `{s}`").into()),
        }
    }
}
