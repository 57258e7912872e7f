use crate::{
    api::ApiError, color::ColorError, config::ConfigError, store::StoreError, stream::StreamError,
};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0} is not indexed yet, run `voyager index` on it first")]
    NotIndexed(String),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("api error: {0}")]
    Api(#[from] ApiError),

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("color error: {0}")]
    Color(#[from] ColorError),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}
