use thiserror::Error;

use crate::state::InitError;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("config error `{0}`")]
    Config(#[from] ::config::ConfigError),
    #[error("init error `{0}`")]
    Init(#[from] InitError),
    #[error("IO error `{0}`")]
    Io(#[from] std::io::Error),
}
