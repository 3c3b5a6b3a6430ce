use crate::{configuration, task_queue};
use std::{fmt, io};

#[derive(Debug)]
pub enum Error {
    IO(io::Error),
    Watcher(String),
    Configuration(configuration::Error),
    Initialization(String),
    Execution(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IO(err) => write!(f, "I/O failure: {err}"),
            Error::Watcher(err) => write!(f, "configuration watcher failure: {err}"),
            Error::Configuration(err) => err.fmt(f),
            Error::Initialization(err) => write!(f, "startup failure: {err}"),
            Error::Execution(err) => write!(f, "server failure: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IO(err)
    }
}

impl From<notify::Error> for Error {
    fn from(err: notify::Error) -> Self {
        Error::Watcher(err.to_string())
    }
}

impl From<configuration::Error> for Error {
    fn from(err: configuration::Error) -> Self {
        Error::Configuration(err)
    }
}

impl From<task_queue::Error> for Error {
    fn from(err: task_queue::Error) -> Self {
        Error::Initialization(format!("background task queue: {err}"))
    }
}
