use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use uuid::Uuid;

/// Which consent flag, if any, an action needs before it may reach the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentClass {
    None,
    Primary,
    Marketing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    UserSignup,
    ProfileCompleted,
    PlanViewed,
    ReminderOptIn,
    SupportRequest,
    MarketingUpdate,
    NewsletterSubscription,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::UserSignup => "user_signup",
            ActionType::ProfileCompleted => "profile_completed",
            ActionType::PlanViewed => "plan_viewed",
            ActionType::ReminderOptIn => "reminder_opt_in",
            ActionType::SupportRequest => "support_request",
            ActionType::MarketingUpdate => "marketing_update",
            ActionType::NewsletterSubscription => "newsletter_subscription",
        }
    }

    pub fn consent_class(&self) -> ConsentClass {
        match self {
            ActionType::UserSignup => ConsentClass::None,
            ActionType::ProfileCompleted
            | ActionType::PlanViewed
            | ActionType::ReminderOptIn
            | ActionType::SupportRequest => ConsentClass::Primary,
            ActionType::MarketingUpdate | ActionType::NewsletterSubscription => {
                ConsentClass::Marketing
            }
        }
    }
}

impl Display for ActionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_signup" => Ok(ActionType::UserSignup),
            "profile_completed" => Ok(ActionType::ProfileCompleted),
            "plan_viewed" => Ok(ActionType::PlanViewed),
            "reminder_opt_in" => Ok(ActionType::ReminderOptIn),
            "support_request" => Ok(ActionType::SupportRequest),
            "marketing_update" => Ok(ActionType::MarketingUpdate),
            "newsletter_subscription" => Ok(ActionType::NewsletterSubscription),
            other => Err(ValidationError::UnknownActionType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field: user_id")]
    MissingUserId,

    #[error("missing required field: action_type")]
    MissingActionType,

    #[error("unrecognized action_type '{0}'")]
    UnknownActionType(String),
}

/// A dispatch request as handed over by the rest of the application.
///
/// Nothing here is trusted: `validate` turns it into a [`ValidatedRequest`]
/// or rejects it before any side effect happens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchRequest {
    #[serde(default)]
    pub user_id: String,

    #[serde(default)]
    pub action_type: String,

    #[serde(default, alias = "phone")]
    pub contact_address: Option<String>,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default)]
    pub metadata: Map<String, JsonValue>,
}

impl DispatchRequest {
    pub fn new(user_id: impl Into<String>, action_type: ActionType) -> Self {
        Self {
            user_id: user_id.into(),
            action_type: action_type.as_str().to_string(),
            ..Default::default()
        }
    }

    pub fn with_contact(mut self, contact_address: Option<String>) -> Self {
        self.contact_address = contact_address;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn validate(self) -> Result<ValidatedRequest, ValidationError> {
        let user_id = self.user_id.trim();
        if user_id.is_empty() {
            return Err(ValidationError::MissingUserId);
        }

        let action_type = self.action_type.trim();
        if action_type.is_empty() {
            return Err(ValidationError::MissingActionType);
        }
        let action_type = action_type.parse::<ActionType>()?;

        let contact_address = self
            .contact_address
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        Ok(ValidatedRequest {
            trace_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            action_type,
            contact_address,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            metadata: self.metadata,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidatedRequest {
    pub trace_id: Uuid,
    pub user_id: String,
    pub action_type: ActionType,
    pub contact_address: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: Map<String, JsonValue>,
}

/// The plan a user opened, forwarded with `plan_viewed`. Both kinds share
/// one action name; `plan_kind` in the metadata tells them apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "plan_kind", rename_all = "snake_case")]
pub enum PlanView {
    Diet {
        diet_type: Option<String>,
        recommendations_count: usize,
    },
    Protection {
        risk_band: String,
        sections_accessed: Vec<String>,
    },
}

impl PlanView {
    /// A protection plan view listing only the sections that have content.
    pub fn protection<S: Into<String>>(
        risk_band: impl Into<String>,
        sections: impl IntoIterator<Item = (S, usize)>,
    ) -> Self {
        PlanView::Protection {
            risk_band: risk_band.into(),
            sections_accessed: sections
                .into_iter()
                .filter(|(_, items)| *items > 0)
                .map(|(name, _)| name.into())
                .collect(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PlanView::Diet { .. } => "diet",
            PlanView::Protection { .. } => "protection",
        }
    }

    pub fn metadata(&self) -> Vec<(&'static str, JsonValue)> {
        let mut metadata = vec![("plan_kind", JsonValue::from(self.kind()))];

        match self {
            PlanView::Diet {
                diet_type,
                recommendations_count,
            } => {
                metadata.push(("diet_type", JsonValue::from(diet_type.clone())));
                metadata.push((
                    "recommendations_count",
                    JsonValue::from(*recommendations_count),
                ));
            }
            PlanView::Protection {
                risk_band,
                sections_accessed,
            } => {
                metadata.push(("risk_band", JsonValue::from(risk_band.as_str())));
                metadata.push((
                    "sections_accessed",
                    JsonValue::from(sections_accessed.clone()),
                ));
            }
        }

        metadata
    }
}

/// The subset of a user profile forwarded with `profile_completed`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub city: Option<String>,
    pub diet_type: Option<String>,
    pub budget_level: Option<String>,
    pub lifestyle: Option<String>,
}

impl ProfileSummary {
    /// Percentage of the six profile fields that are filled in, rounded.
    pub fn completion_score(&self) -> u32 {
        let filled = |field: &Option<String>| {
            field.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
        };

        let completed = [
            self.age.map(|age| age > 0).unwrap_or(false),
            filled(&self.gender),
            filled(&self.city),
            filled(&self.diet_type),
            filled(&self.budget_level),
            filled(&self.lifestyle),
        ]
        .iter()
        .filter(|done| **done)
        .count() as u32;

        (completed * 100 + 3) / 6
    }
}
