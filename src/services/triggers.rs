//! Fire-and-forget entry points for the rest of the application.
//!
//! Each trigger builds a [`DispatchRequest`] and spawns the dispatch on its
//! own task. The returned handle may be dropped; a failed notification is
//! only visible in the delivery log.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::{
    models::request::{ActionType, DispatchRequest, PlanView, ProfileSummary},
    services::dispatcher::Dispatcher,
};

const SIGNUP_SOURCE: &str = "website";

impl Dispatcher {
    pub fn submit(self: &Arc<Self>, request: DispatchRequest) -> JoinHandle<bool> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.dispatch(request).await })
    }

    pub fn trigger_signup(
        self: &Arc<Self>,
        user_id: &str,
        contact_address: Option<String>,
    ) -> JoinHandle<bool> {
        let request = DispatchRequest::new(user_id, ActionType::UserSignup)
            .with_contact(contact_address)
            .with_metadata("signup_source", SIGNUP_SOURCE);

        self.submit(request)
    }

    pub fn trigger_profile_completed(
        self: &Arc<Self>,
        user_id: &str,
        contact_address: Option<String>,
        profile: &ProfileSummary,
    ) -> JoinHandle<bool> {
        let request = DispatchRequest::new(user_id, ActionType::ProfileCompleted)
            .with_contact(contact_address)
            .with_metadata("diet_type", profile.diet_type.clone())
            .with_metadata("budget_level", profile.budget_level.clone())
            .with_metadata("lifestyle", profile.lifestyle.clone())
            .with_metadata("completion_score", profile.completion_score());

        self.submit(request)
    }

    pub fn trigger_plan_viewed(
        self: &Arc<Self>,
        user_id: &str,
        contact_address: Option<String>,
        view: &PlanView,
    ) -> JoinHandle<bool> {
        let request = view.metadata().into_iter().fold(
            DispatchRequest::new(user_id, ActionType::PlanViewed).with_contact(contact_address),
            |request, (key, value)| request.with_metadata(key, value),
        );

        self.submit(request)
    }

    pub fn trigger_marketing_update(
        self: &Arc<Self>,
        user_id: &str,
        contact_address: Option<String>,
    ) -> JoinHandle<bool> {
        let request = DispatchRequest::new(user_id, ActionType::MarketingUpdate)
            .with_contact(contact_address);

        self.submit(request)
    }

    pub fn trigger_reminder_opt_in(
        self: &Arc<Self>,
        user_id: &str,
        contact_address: Option<String>,
    ) -> JoinHandle<bool> {
        let request = DispatchRequest::new(user_id, ActionType::ReminderOptIn)
            .with_contact(contact_address)
            .with_metadata("opt_in_source", SIGNUP_SOURCE);

        self.submit(request)
    }

    pub fn trigger_support_request(
        self: &Arc<Self>,
        user_id: &str,
        contact_address: Option<String>,
        issue_type: &str,
    ) -> JoinHandle<bool> {
        let request = DispatchRequest::new(user_id, ActionType::SupportRequest)
            .with_contact(contact_address)
            .with_metadata("issue_type", issue_type)
            .with_metadata("urgency", "normal");

        self.submit(request)
    }

    pub fn trigger_newsletter_subscription(
        self: &Arc<Self>,
        user_id: &str,
        contact_address: Option<String>,
    ) -> JoinHandle<bool> {
        let request = DispatchRequest::new(user_id, ActionType::NewsletterSubscription)
            .with_contact(contact_address)
            .with_metadata("subscription_source", SIGNUP_SOURCE);

        self.submit(request)
    }
}
