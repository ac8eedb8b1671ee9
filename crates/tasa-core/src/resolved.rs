//! [`Resolved`] — a value tagged with whether it was learned or defaulted.

use serde::{Deserialize, Serialize};

/// The outcome of a knowledge lookup that always produces a value.
///
/// `Learned` values come from accumulated evidence that cleared the relevant
/// confidence floor; `Default` values come from the single built-in default
/// for that entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", content = "value", rename_all = "snake_case")]
pub enum Resolved<T> {
  Learned(T),
  Default(T),
}

impl<T> Resolved<T> {
  pub fn value(&self) -> &T {
    match self {
      Self::Learned(v) | Self::Default(v) => v,
    }
  }

  pub fn into_inner(self) -> T {
    match self {
      Self::Learned(v) | Self::Default(v) => v,
    }
  }

  pub fn is_learned(&self) -> bool { matches!(self, Self::Learned(_)) }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolved<U> {
    match self {
      Self::Learned(v) => Resolved::Learned(f(v)),
      Self::Default(v) => Resolved::Default(f(v)),
    }
  }
}
