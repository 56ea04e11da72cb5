use std::{env::VarError, io, path::StripPrefixError};

use tokio::task::JoinError;

use super::Error;

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::other(error)
    }
}

impl From<VarError> for Error {
    fn from(error: VarError) -> Self {
        Error::other(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::other(error)
    }
}

impl From<JoinError> for Error {
    fn from(error: JoinError) -> Self {
        Error::other(error)
    }
}

impl From<StripPrefixError> for Error {
    fn from(error: StripPrefixError) -> Self {
        Error::other(error)
    }
}

impl From<walkdir::Error> for Error {
    fn from(error: walkdir::Error) -> Self {
        Error::other(error)
    }
}

impl From<url::ParseError> for Error {
    fn from(error: url::ParseError) -> Self {
        Error::InvalidStorageUrl(error.to_string())
    }
}

impl From<clap::Error> for Error {
    fn from(error: clap::Error) -> Self {
        Error::other(error)
    }
}

#[cfg(feature = "ftp")]
impl From<suppaftp::FtpError> for Error {
    fn from(error: suppaftp::FtpError) -> Self {
        Error::network(error)
    }
}

#[cfg(feature = "webdav")]
impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::network(error)
    }
}

#[cfg(feature = "webdav")]
impl From<quick_xml::Error> for Error {
    fn from(error: quick_xml::Error) -> Self {
        Error::other(error)
    }
}

#[cfg(feature = "sftp")]
impl From<russh::Error> for Error {
    fn from(error: russh::Error) -> Self {
        Error::network(error)
    }
}

#[cfg(feature = "sftp")]
impl From<russh_sftp::client::error::Error> for Error {
    fn from(error: russh_sftp::client::error::Error) -> Self {
        Error::network(error)
    }
}

#[cfg(feature = "smb")]
impl From<pavao::SmbError> for Error {
    fn from(error: pavao::SmbError) -> Self {
        Error::network(error)
    }
}
