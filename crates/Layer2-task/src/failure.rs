//! Shared failure reason

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// The reason a task failed.
///
/// Cloning a `Failure` shares the underlying error, so a failure raised by a
/// leaf task reaches the root of the tree as the very same value
/// (see [`Failure::ptr_eq`]).
///
/// `Failure` does not implement `std::error::Error`, so it never collides
/// with the blanket `From<E: Error>` conversion into [`Rejection`](crate::Rejection).
#[derive(Clone)]
pub struct Failure(Arc<anyhow::Error>);

impl Failure {
    /// Wrap any standard error
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Arc::new(anyhow::Error::new(error)))
    }

    /// Create a failure from a plain message
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    /// Failure of a work unit that panicked, carrying the panic message
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::msg(format!("work unit panicked: {}", message))
    }

    /// Whether both values are the same failure (not merely equal text)
    pub fn ptr_eq(&self, other: &Failure) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Access the underlying error
    pub fn as_anyhow(&self) -> &anyhow::Error {
        &self.0
    }

    /// Downcast to the original error type
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }
}

impl From<anyhow::Error> for Failure {
    fn from(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_preserves_identity() {
        let failure = Failure::msg("boom");
        let shared = failure.clone();
        assert!(failure.ptr_eq(&shared));
        assert!(!failure.ptr_eq(&Failure::msg("boom")));
    }

    #[test]
    fn test_downcast() {
        let failure = Failure::new(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let io = failure.downcast_ref::<std::io::Error>().unwrap();
        assert_eq!(io.kind(), std::io::ErrorKind::NotFound);
        assert_eq!(failure.to_string(), "gone");
    }

    #[test]
    fn test_from_panic_payload() {
        let literal = std::panic::catch_unwind(|| panic!("disk full")).unwrap_err();
        assert_eq!(Failure::from_panic(literal).to_string(), "work unit panicked: disk full");

        let code = 7;
        let formatted = std::panic::catch_unwind(move || panic!("exit code {}", code)).unwrap_err();
        assert_eq!(Failure::from_panic(formatted).to_string(), "work unit panicked: exit code 7");

        let opaque = std::panic::catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(Failure::from_panic(opaque).to_string(), "work unit panicked: unknown panic payload");
    }
}
