use thiserror::Error;

use crate::config::ConfigError;
use crate::event::command::CommandError;
use crate::i18n::I18nError;
use crate::registry::RegistryError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    // event
    #[error("Command error: {0}")]
    Command(#[from] CommandError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("I18n error: {0}")]
    I18n(#[from] I18nError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

// エラー作成用のヘルパー関数
impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_module_errors() {
        let err: Error = RegistryError::TypeMismatch {
            identifier: "_BUS".to_string(),
            expected: "Bus",
        }
        .into();
        assert!(matches!(err, Error::Registry(_)));
        assert!(err.to_string().starts_with("Registry error: "));

        assert_eq!(
            Error::internal("boom").to_string(),
            "Internal error: boom"
        );
    }
}
