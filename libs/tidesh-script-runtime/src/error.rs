use std::time::Duration;

use thiserror::Error;
use tidesh_plugin_abi::ResultCode;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("script compilation failed: {0}")]
    ScriptCompile(String),

    #[error("script evaluation failed: {0}")]
    ScriptRuntime(String),

    #[error("script does not export a callable '{0}' function")]
    MissingExport(String),

    #[error("result coercion failed: {0}")]
    TypeCoercion(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("engine bridge is not running")]
    NotRunning,

    #[error("engine bridge error: {0}")]
    Bridge(String),

    #[error("engine failed to signal readiness within {0:?}")]
    StartupTimeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PluginError {
    /// The ABI result code this error surfaces as. Total: every failure maps
    /// to one of the stable negative codes, nothing crosses the boundary as
    /// a crash.
    pub fn result_code(&self) -> ResultCode {
        match self {
            Self::InvalidArgs(_) => ResultCode::ErrorInvalidArgs,
            _ => ResultCode::ErrorGeneral,
        }
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_args_surface_as_invalid_args() {
        let err = PluginError::InvalidArgs("empty invocation".into());
        assert_eq!(err.result_code(), ResultCode::ErrorInvalidArgs);
    }

    #[test]
    fn test_everything_else_surfaces_as_general_failure() {
        let errors = [
            PluginError::ScriptCompile("bad token".into()),
            PluginError::ScriptRuntime("thrown".into()),
            PluginError::MissingExport("handleCommand".into()),
            PluginError::TypeCoercion("string".into()),
            PluginError::NotRunning,
            PluginError::Bridge("thread died".into()),
            PluginError::StartupTimeout(Duration::from_secs(5)),
        ];
        for err in errors {
            assert_eq!(err.result_code(), ResultCode::ErrorGeneral, "{err}");
        }
    }
}
