//! Error handling and exit codes.

use mempool_core::PoolError;

/// Process exit codes.
pub mod exit_codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;
    /// Generic error.
    pub const ERROR_GENERIC: i32 = 1;
    /// Invalid configuration.
    pub const ERROR_CONFIG: i32 = 4;
    /// A pool rejected an object reference.
    pub const ERROR_MISUSE: i32 = 5;
}

/// Map an application error to its exit code.
#[must_use]
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<PoolError>() {
        Some(
            PoolError::ZeroObjectSize { .. }
            | PoolError::LabelSizeConflict { .. }
            | PoolError::NegativeIdleLimit(_)
            | PoolError::InvalidConfig(_),
        ) => exit_codes::ERROR_CONFIG,
        Some(
            PoolError::ForeignObject { .. }
            | PoolError::DoubleFree { .. }
            | PoolError::StaleObject { .. }
            | PoolError::InvalidSlot { .. },
        ) => exit_codes::ERROR_MISUSE,
        None => exit_codes::ERROR_GENERIC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        let config = anyhow::Error::new(PoolError::NegativeIdleLimit(-1));
        assert_eq!(exit_code(&config), 4);

        let misuse = anyhow::Error::new(PoolError::DoubleFree {
            label: "x".into(),
        });
        assert_eq!(exit_code(&misuse), 5);

        let other = anyhow::anyhow!("disk on fire");
        assert_eq!(exit_code(&other), 1);
    }

    #[test]
    fn context_preserves_code() {
        let err = anyhow::Error::new(PoolError::InvalidConfig("page_size".into()))
            .context("loading config");
        assert_eq!(exit_code(&err), exit_codes::ERROR_CONFIG);
    }
}
