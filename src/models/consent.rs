use serde::{Deserialize, Serialize};

use crate::models::request::ConsentClass;

/// Consent flags and contact address currently stored for a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub primary_consent: bool,
    pub marketing_consent: bool,
    pub contact_address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentDecision {
    Granted,
    NoProfile,
    MissingConsent,
    MissingContact,
}

impl ConsentDecision {
    /// Applies the rule for `class` to the stored record.
    ///
    /// `request_contact` wins over the stored contact address when both exist.
    pub fn evaluate(
        class: ConsentClass,
        record: Option<&ConsentRecord>,
        request_contact: Option<&str>,
    ) -> Self {
        if class == ConsentClass::None {
            return ConsentDecision::Granted;
        }

        let Some(record) = record else {
            return ConsentDecision::NoProfile;
        };

        let flag = match class {
            ConsentClass::Primary => record.primary_consent,
            ConsentClass::Marketing => record.marketing_consent,
            ConsentClass::None => true,
        };
        if !flag {
            return ConsentDecision::MissingConsent;
        }

        let has_contact = request_contact
            .or(record.contact_address.as_deref())
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false);
        if !has_contact {
            return ConsentDecision::MissingContact;
        }

        ConsentDecision::Granted
    }

    pub fn is_granted(&self) -> bool {
        *self == ConsentDecision::Granted
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentDecision::Granted => "granted",
            ConsentDecision::NoProfile => "no_profile",
            ConsentDecision::MissingConsent => "missing_consent",
            ConsentDecision::MissingContact => "missing_contact",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsentStats {
    pub total_users: i64,
    pub primary_consent: i64,
    pub marketing_consent: i64,
    pub has_contact: i64,
}
