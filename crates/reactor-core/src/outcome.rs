//! The `Result` algebra: a tagged `Success`/`Failure` value with total,
//! panic-free composition operators. Every pipeline stage in this crate
//! produces and consumes [`Outcome`]; named `Outcome` rather than `Result`
//! to stay out of the way of `core::result::Result`, which every `?` in this
//! crate still uses for ordinary Rust fallibility.

use std::fmt;

/// A tagged outcome value: exactly one of a success payload or a failure
/// payload, never both, never neither.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub enum Outcome<T, E> {
    Success(T),
    Failure(E),
}

impl<T, E> Outcome<T, E> {
    pub fn success(value: T) -> Self {
        Self::Success(value)
    }

    pub fn failure(error: E) -> Self {
        Self::Failure(error)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns the success value, or panics if this is a `Failure`.
    ///
    /// Defined in spec as a programming error, not a recoverable path; use
    /// [`Self::unwrap_or`] or [`Self::match_outcome`] on any path that must
    /// not panic.
    pub fn unwrap(self) -> T
    where
        E: fmt::Debug,
    {
        match self {
            Self::Success(v) => v,
            Self::Failure(e) => panic!("called `Outcome::unwrap()` on a `Failure` value: {e:?}"),
        }
    }

    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Self::Success(v) => v,
            Self::Failure(_) => default,
        }
    }

    pub fn unwrap_or_else(self, f: impl FnOnce(E) -> T) -> T {
        match self {
            Self::Success(v) => v,
            Self::Failure(e) => f(e),
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Self::Success(v) => Some(v),
            Self::Failure(_) => None,
        }
    }

    pub fn err(self) -> Option<E> {
        match self {
            Self::Success(_) => None,
            Self::Failure(e) => Some(e),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U, E> {
        match self {
            Self::Success(v) => Outcome::Success(f(v)),
            Self::Failure(e) => Outcome::Failure(e),
        }
    }

    /// Also called flat-map: apply `f` to the success value, flattening the
    /// resulting `Outcome` into this one. Identity laws hold: see the
    /// `monad_laws` proptests in this module.
    pub fn bind<U>(self, f: impl FnOnce(T) -> Outcome<U, E>) -> Outcome<U, E> {
        match self {
            Self::Success(v) => f(v),
            Self::Failure(e) => Outcome::Failure(e),
        }
    }

    pub fn map_error<F>(self, f: impl FnOnce(E) -> F) -> Outcome<T, F> {
        match self {
            Self::Success(v) => Outcome::Success(v),
            Self::Failure(e) => Outcome::Failure(f(e)),
        }
    }

    /// Mirror of [`Self::bind`] on the failure side: recover into a fresh
    /// `Outcome` instead of merely remapping the error payload.
    pub fn recover<F>(self, f: impl FnOnce(E) -> Outcome<T, F>) -> Outcome<T, F> {
        match self {
            Self::Success(v) => Outcome::Success(v),
            Self::Failure(e) => f(e),
        }
    }

    pub fn match_outcome<U>(
        self,
        on_success: impl FnOnce(T) -> U,
        on_failure: impl FnOnce(E) -> U,
    ) -> U {
        match self {
            Self::Success(v) => on_success(v),
            Self::Failure(e) => on_failure(e),
        }
    }

    pub fn as_ref(&self) -> Outcome<&T, &E> {
        match self {
            Self::Success(v) => Outcome::Success(v),
            Self::Failure(e) => Outcome::Failure(e),
        }
    }
}

/// Left-to-right composition over the success value, short-circuiting on the
/// first `Failure`. `pipe(outcome, [f, g, h])` is `outcome.bind(f).bind(g).bind(h)`
/// without the nested closures.
pub fn pipe<T, E>(initial: Outcome<T, E>, stages: impl IntoIterator<Item = fn(T) -> Outcome<T, E>>) -> Outcome<T, E> {
    stages
        .into_iter()
        .fold(initial, |acc, stage| acc.bind(stage))
}

/// Converts a closure that may panic into an `Outcome`, per the "no
/// operation ever raises" policy: a caught panic becomes a `Failure` of
/// `make_panic_error`'s construction rather than unwinding into the caller.
pub fn catch_unwind_as_outcome<T>(
    source_tag: &'static str,
    f: impl FnOnce() -> T + std::panic::UnwindSafe,
) -> Outcome<T, crate::error::CoreError<std::convert::Infallible>> {
    match std::panic::catch_unwind(f) {
        Ok(v) => Outcome::Success(v),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Outcome::Failure(crate::error::CoreError::wrapped_panic(message, source_tag))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn map_preserves_failure() {
        let o: Outcome<i32, &str> = Outcome::Failure("boom");
        assert_eq!(o.map(|v| v * 2), Outcome::Failure("boom"));
    }

    #[test]
    fn bind_short_circuits_on_failure() {
        let o: Outcome<i32, &str> = Outcome::Failure("boom");
        let bound = o.bind(|v| Outcome::Success(v + 1));
        assert_eq!(bound, Outcome::Failure("boom"));
    }

    #[test]
    fn recover_runs_only_on_failure() {
        let ok: Outcome<i32, &str> = Outcome::Success(1);
        assert_eq!(ok.recover(|_: &str| Outcome::Success(99)), Outcome::Success(1));

        let err: Outcome<i32, &str> = Outcome::Failure("x");
        assert_eq!(err.recover(|_| Outcome::Success(99)), Outcome::Success(99));
    }

    proptest! {
        #[test]
        fn monad_law_left_identity(x: i32, y: i32) {
            let f = move |v: i32| Outcome::<i32, String>::Success(v + y);
            prop_assert_eq!(Outcome::Success(x).bind(f), f(x));
        }

        #[test]
        fn monad_law_right_identity(x: i32) {
            let r: Outcome<i32, String> = Outcome::Success(x);
            prop_assert_eq!(r.clone().bind(Outcome::Success), r);
        }

        #[test]
        fn monad_law_associativity(x: i32, y: i32, z: i32) {
            let f = move |v: i32| Outcome::<i32, String>::Success(v + y);
            let g = move |v: i32| Outcome::<i32, String>::Success(v * z);
            let r: Outcome<i32, String> = Outcome::Success(x);

            let left = r.clone().bind(f).bind(g);
            let right = r.bind(move |v| f(v).bind(g));
            prop_assert_eq!(left, right);
        }

        #[test]
        fn failure_bind_is_absorbing(e: String, y: i32) {
            let r: Outcome<i32, String> = Outcome::Failure(e.clone());
            let f = move |v: i32| Outcome::<i32, String>::Success(v + y);
            prop_assert_eq!(r.bind(f), Outcome::Failure(e));
        }
    }
}
