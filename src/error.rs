use std::fmt;

use serde::Serialize;

/// Process exit codes. Matches the relay's documented exit-code table: `0` clean shutdown,
/// `2` port in use / bind failure, `3` config error. `GeneralError` covers anything else that
/// aborts the process before the server loop starts.
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    BindError = 2,
    ConfigError = 3,
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::GeneralError => write!(f, "general error"),
            Self::BindError => write!(f, "bind error"),
            Self::ConfigError => write!(f, "config error"),
        }
    }
}

#[derive(Debug)]
pub struct AppError {
    pub message: String,
    pub code: ExitCode,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl AppError {
    pub fn config(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: ExitCode::ConfigError,
        }
    }

    pub fn bind(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: ExitCode::BindError,
        }
    }

    pub fn to_json(&self) -> String {
        let output = ErrorOutput {
            error: &self.message,
            code: self.code as u8,
        };
        serde_json::to_string(&output).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"{}","code":{}}}"#,
                self.message, self.code as u8
            )
        })
    }

    pub fn print_json_stderr(&self) {
        eprintln!("{}", self.to_json());
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::bind(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorOutput<'a> {
    error: &'a str,
    code: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_produces_json_with_error_and_code() {
        let err = AppError::config("unknown key 'fooBar' in relay.toml");
        let json = err.to_json();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["error"], "unknown key 'fooBar' in relay.toml");
        assert_eq!(parsed["code"], 3);
    }

    #[test]
    fn exit_code_display() {
        assert_eq!(ExitCode::Success.to_string(), "success");
        assert_eq!(ExitCode::BindError.to_string(), "bind error");
        assert_eq!(ExitCode::ConfigError.to_string(), "config error");
    }

    #[test]
    fn app_error_display() {
        let err = AppError::bind("address already in use (os error 98)");
        assert_eq!(
            err.to_string(),
            "bind error: address already in use (os error 98)"
        );
    }
}
