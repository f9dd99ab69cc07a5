//! The outcome type every public operation returns.

use crate::error::{Error, ErrorCode, RestError};

/// Exactly one of success, a remote (non-2xx) error, or a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum BaasResult<T> {
    Success(T),
    RestError(RestError),
    FatalError(ErrorCode),
}

impl<T> BaasResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, BaasResult::Success(_))
    }

    pub fn is_rest_error(&self) -> bool {
        matches!(self, BaasResult::RestError(_))
    }

    pub fn is_fatal_error(&self) -> bool {
        matches!(self, BaasResult::FatalError(_))
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            BaasResult::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn rest_error(&self) -> Option<&RestError> {
        match self {
            BaasResult::RestError(err) => Some(err),
            _ => None,
        }
    }

    pub fn fatal_error(&self) -> Option<ErrorCode> {
        match self {
            BaasResult::FatalError(code) => Some(*code),
            _ => None,
        }
    }

    /// Transform the success payload, carrying either error through.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> BaasResult<U> {
        match self {
            BaasResult::Success(value) => BaasResult::Success(f(value)),
            BaasResult::RestError(err) => BaasResult::RestError(err),
            BaasResult::FatalError(code) => BaasResult::FatalError(code),
        }
    }

    /// Chain a fallible step that only runs on success.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> BaasResult<U>) -> BaasResult<U> {
        match self {
            BaasResult::Success(value) => f(value),
            BaasResult::RestError(err) => BaasResult::RestError(err),
            BaasResult::FatalError(code) => BaasResult::FatalError(code),
        }
    }

    pub fn into_result(self) -> Result<T, Error> {
        self.into()
    }
}

impl<T> From<BaasResult<T>> for Result<T, Error> {
    fn from(result: BaasResult<T>) -> Self {
        match result {
            BaasResult::Success(value) => Ok(value),
            BaasResult::RestError(err) => Err(Error::Rest(err)),
            BaasResult::FatalError(code) => Err(Error::Fatal(code)),
        }
    }
}

impl<T> From<ErrorCode> for BaasResult<T> {
    fn from(code: ErrorCode) -> Self {
        BaasResult::FatalError(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_are_mutually_exclusive() {
        let ok: BaasResult<u32> = BaasResult::Success(1);
        let rest: BaasResult<u32> = BaasResult::RestError(RestError {
            status_code: 400,
            reason: "bad".to_string(),
        });
        let fatal: BaasResult<u32> = BaasResult::FatalError(ErrorCode::OpenFile);

        assert!(ok.is_success() && !ok.is_rest_error() && !ok.is_fatal_error());
        assert!(!rest.is_success() && rest.is_rest_error() && !rest.is_fatal_error());
        assert!(!fatal.is_success() && !fatal.is_rest_error() && fatal.is_fatal_error());
        assert_eq!(fatal.fatal_error(), Some(ErrorCode::OpenFile));
        assert_eq!(rest.rest_error().map(|e| e.status_code), Some(400));
        assert_eq!(ok.success(), Some(&1));
    }

    #[test]
    fn map_preserves_errors() {
        let fatal: BaasResult<u32> = ErrorCode::ConnectionOver.into();
        assert_eq!(fatal.map(|v| v + 1), BaasResult::FatalError(ErrorCode::ConnectionOver));

        let ok: BaasResult<u32> = BaasResult::Success(41);
        assert_eq!(ok.map(|v| v + 1), BaasResult::Success(42));
    }

    #[test]
    fn into_result_supports_question_mark() {
        fn run(r: BaasResult<&'static str>) -> Result<usize, Error> {
            let s = r.into_result()?;
            Ok(s.len())
        }
        assert_eq!(run(BaasResult::Success("abc")), Ok(3));
        assert_eq!(
            run(BaasResult::FatalError(ErrorCode::AppKey)),
            Err(Error::Fatal(ErrorCode::AppKey))
        );
    }
}
