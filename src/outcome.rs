use std::fmt::Display;

/// A value that was produced, possibly through a fallback path.
///
/// Combined with `Result`, this gives the three shapes callers care about:
/// `Ok(Complete(v))`, `Ok(Degraded { v, warning })` and `Err(reason)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Complete(T),
    Degraded { value: T, warning: String },
}

impl<T> Outcome<T> {
    pub fn degraded(value: T, warning: impl Display) -> Self {
        Outcome::Degraded {
            value,
            warning: warning.to_string(),
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Outcome::Complete(value) | Outcome::Degraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Outcome::Complete(value) | Outcome::Degraded { value, .. } => value,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded { .. })
    }

    pub fn warning(&self) -> Option<&str> {
        match self {
            Outcome::Complete(_) => None,
            Outcome::Degraded { warning, .. } => Some(warning),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Complete(value) => Outcome::Complete(f(value)),
            Outcome::Degraded { value, warning } => Outcome::Degraded {
                value: f(value),
                warning,
            },
        }
    }
}
