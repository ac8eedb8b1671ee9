//! User feedback on a finished report.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::{
  Error, Result,
  store::{Collection, Record},
};

/// The fixed set of report components a user can rate individually.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumIter,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Component {
  Valuation,
  Comparables,
  MarketTrends,
  Amenities,
  Developments,
  Summary,
  Investment,
}

/// Ratings for one component, each on a 1–5 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRating {
  pub rating:     u8,
  pub accuracy:   u8,
  pub usefulness: u8,
  #[serde(default)]
  pub comment:    Option<String>,
}

/// A user correction of one reported field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCorrection {
  pub field:     String,
  pub original:  String,
  pub corrected: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentOutcome {
  BetterThanExpected,
  AsExpected,
  WorseThanExpected,
}

/// Outcome details reported by the user after the fact (e.g. the property
/// actually sold).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeVerification {
  #[serde(default)]
  pub actual_sale_price:  Option<f64>,
  #[serde(default)]
  pub actual_sale_date:   Option<NaiveDate>,
  #[serde(default)]
  pub investment_outcome: Option<InvestmentOutcome>,
  /// Whether the reported market trend turned out to be right.
  #[serde(default)]
  pub trend_accurate:     Option<bool>,
  pub verified_at:        DateTime<Utc>,
}

/// A user's rating of a report, keyed by `feedback_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
  pub feedback_id:    Uuid,
  pub session_id:     String,
  #[serde(default)]
  pub property_id:    Option<String>,
  pub overall_rating: u8,
  #[serde(default)]
  pub components:     BTreeMap<Component, ComponentRating>,
  #[serde(default)]
  pub corrections:    Vec<FieldCorrection>,
  #[serde(default)]
  pub comments:       Option<String>,
  #[serde(default)]
  pub outcome:        Option<OutcomeVerification>,
  pub submitted_at:   DateTime<Utc>,
}

fn check_rating(field: impl Into<String>, value: u8) -> Result<()> {
  if (1..=5).contains(&value) {
    Ok(())
  } else {
    Err(Error::InvalidRating { field: field.into(), value })
  }
}

impl Feedback {
  /// Convenience constructor: an overall rating with no component detail.
  pub fn new(session_id: impl Into<String>, overall_rating: u8) -> Self {
    Self {
      feedback_id: Uuid::new_v4(),
      session_id: session_id.into(),
      property_id: None,
      overall_rating,
      components: BTreeMap::new(),
      corrections: Vec::new(),
      comments: None,
      outcome: None,
      submitted_at: Utc::now(),
    }
  }

  /// Reject any rating outside 1..=5.
  pub fn validate(&self) -> Result<()> {
    check_rating("overall", self.overall_rating)?;
    for (component, r) in &self.components {
      check_rating(format!("{component}.rating"), r.rating)?;
      check_rating(format!("{component}.accuracy"), r.accuracy)?;
      check_rating(format!("{component}.usefulness"), r.usefulness)?;
    }
    Ok(())
  }

  pub fn component(&self, component: Component) -> Option<&ComponentRating> {
    self.components.get(&component)
  }

  /// Components rated 2 or below.
  pub fn low_rated_components(&self) -> Vec<Component> {
    self
      .components
      .iter()
      .filter(|(_, r)| r.rating <= 2)
      .map(|(c, _)| *c)
      .collect()
  }

  /// All free text attached to the feedback, lowercased, for rule matching.
  pub fn comment_text(&self) -> String {
    let mut parts: Vec<&str> = self.comments.iter().map(String::as_str).collect();
    parts.extend(self.components.values().filter_map(|r| r.comment.as_deref()));
    parts.join(" ").to_lowercase()
  }
}

impl Record for Feedback {
  const COLLECTION: Collection = Collection::UserFeedback;

  fn key(&self) -> String { self.feedback_id.to_string() }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn rating(r: u8) -> ComponentRating {
    ComponentRating { rating: r, accuracy: r, usefulness: r, comment: None }
  }

  #[test]
  fn ratings_inside_range_validate() {
    let mut fb = Feedback::new("s1", 5);
    fb.components.insert(Component::Valuation, rating(1));
    assert!(fb.validate().is_ok());
  }

  #[test]
  fn overall_rating_out_of_range_rejected() {
    for bad in [0, 6, 255] {
      let fb = Feedback::new("s1", bad);
      assert!(matches!(fb.validate(), Err(Error::InvalidRating { .. })));
    }
  }

  #[test]
  fn component_rating_out_of_range_rejected() {
    let mut fb = Feedback::new("s1", 4);
    fb.components.insert(
      Component::Comparables,
      ComponentRating { rating: 3, accuracy: 0, usefulness: 3, comment: None },
    );
    let err = fb.validate().unwrap_err();
    assert!(err.to_string().contains("comparables.accuracy"));
  }

  #[test]
  fn low_rated_components_and_comment_text() {
    let mut fb = Feedback::new("s1", 3);
    fb.comments = Some("Comparables too FAR".into());
    fb.components.insert(Component::Comparables, rating(2));
    fb.components.insert(Component::Summary, rating(4));
    fb.components.get_mut(&Component::Summary).unwrap().comment = Some("ok".into());

    assert_eq!(fb.low_rated_components(), vec![Component::Comparables]);
    assert_eq!(fb.comment_text(), "comparables too far ok");
  }
}
