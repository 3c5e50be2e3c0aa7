//! Request payload validation.
//!
//! Payloads are deserialized into structs whose fields are all optional and
//! then checked field by field, so that a single 400 response can report
//! every problem with the request at once.

use std::collections::BTreeMap;
use std::str::FromStr;

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::request::Parts,
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};

use crate::error::AppError;

pub const NON_FIELD_ERRORS: &str = "non_field_errors";
pub const REQUIRED: &str = "This field is required.";
pub const BLANK: &str = "This field may not be blank.";
pub const MAX_TITLE_LEN: usize = 255;
pub const MIN_AGE: i64 = 15;
pub const MIN_PASSWORD_LEN: usize = 8;

/// Field name to list of messages, serialized as a plain JSON object.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn into_result(self) -> Result<(), AppError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self))
        }
    }

    /// Records a "required" error when a mandatory value is absent.
    pub fn required<T>(&mut self, field: &str, value: Option<T>, required: bool) -> Option<T> {
        if value.is_none() && required {
            self.add(field, REQUIRED);
        }
        value
    }

    /// Non-blank text, optionally bounded in length.
    pub fn text(
        &mut self,
        field: &str,
        value: Option<String>,
        required: bool,
        max_len: Option<usize>,
    ) -> Option<String> {
        let value = self.required(field, value, required)?;
        if value.trim().is_empty() {
            self.add(field, BLANK);
            return None;
        }
        if let Some(max) = max_len {
            if value.chars().count() > max {
                self.add(
                    field,
                    format!("Ensure this field has no more than {max} characters."),
                );
                return None;
            }
        }
        Some(value)
    }

    /// One of a closed set of values, parsed through `FromStr`.
    pub fn choice<T: FromStr>(
        &mut self,
        field: &str,
        value: Option<String>,
        required: bool,
    ) -> Option<T> {
        let raw = self.required(field, value, required)?;
        match raw.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                self.add(field, format!("\"{raw}\" is not a valid choice."));
                None
            }
        }
    }

    pub fn age(&mut self, value: Option<i64>, required: bool) -> Option<i64> {
        let age = self.required("age", value, required)?;
        if age < MIN_AGE {
            self.add("age", format!("User must be at least {MIN_AGE} years old."));
            return None;
        }
        Some(age)
    }

    pub fn email(&mut self, value: Option<String>, required: bool) -> Option<String> {
        let email = self.text("email", value, required, Some(254))?;
        let valid = match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.is_empty()
                    && !domain.contains('@')
                    && !email.chars().any(char::is_whitespace)
            }
            None => false,
        };
        if !valid {
            self.add("email", "Enter a valid email address.");
            return None;
        }
        Some(email)
    }

    pub fn password(&mut self, value: Option<String>, required: bool) -> Option<String> {
        let password = self.required("password", value, required)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            self.add(
                "password",
                format!("Password must be at least {MIN_PASSWORD_LEN} characters."),
            );
            return None;
        }
        Some(password)
    }
}

/// Distinguishes an absent field from an explicit `null`.
///
/// Use with `#[serde(default, deserialize_with = "nullable")]` on an
/// `Option<Option<T>>` field.
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// JSON body extractor whose rejection is a field-level validation error
/// instead of axum's plain-text response.
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(AppError::Validation(FieldErrors::single(
                NON_FIELD_ERRORS,
                rejection.body_text(),
            ))),
        }
    }
}

/// Query string extractor with the same error shape as [`ValidJson`].
pub struct ValidQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ValidQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(AppError::Validation(FieldErrors::single(
                NON_FIELD_ERRORS,
                rejection.body_text(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::ProjectType;

    #[test]
    fn missing_required_fields_are_reported() {
        let mut errors = FieldErrors::new();
        assert_eq!(errors.text("title", None, true, Some(MAX_TITLE_LEN)), None);
        assert_eq!(errors.text("description", None, false, None), None);

        assert_eq!(errors.get("title"), Some(&[REQUIRED.to_string()][..]));
        assert_eq!(errors.get("description"), None);
    }

    #[test]
    fn blank_and_long_text_is_rejected() {
        let mut errors = FieldErrors::new();
        errors.text("title", Some("   ".into()), true, None);
        errors.text("summary", Some("x".repeat(256)), true, Some(MAX_TITLE_LEN));

        assert_eq!(errors.get("title"), Some(&[BLANK.to_string()][..]));
        assert_eq!(
            errors.get("summary"),
            Some(&["Ensure this field has no more than 255 characters.".to_string()][..])
        );
    }

    #[test]
    fn age_below_minimum_is_rejected() {
        let mut errors = FieldErrors::new();
        assert_eq!(errors.age(Some(14), true), None);
        assert_eq!(
            errors.get("age"),
            Some(&["User must be at least 15 years old.".to_string()][..])
        );

        let mut errors = FieldErrors::new();
        assert_eq!(errors.age(Some(15), true), Some(15));
        assert!(errors.is_empty());
    }

    #[test]
    fn unknown_choice_names_the_value() {
        let mut errors = FieldErrors::new();
        let parsed: Option<ProjectType> = errors.choice("type", Some("Web".into()), true);

        assert_eq!(parsed, None);
        assert_eq!(
            errors.get("type"),
            Some(&["\"Web\" is not a valid choice.".to_string()][..])
        );
    }

    #[test]
    fn email_needs_local_part_and_domain() {
        let mut errors = FieldErrors::new();
        assert_eq!(errors.email(Some("nobody".into()), true), None);
        assert_eq!(errors.email(Some("@example.com".into()), true), None);
        assert_eq!(
            errors.email(Some("dev@example.com".into()), true),
            Some("dev@example.com".to_string())
        );
        assert_eq!(errors.get("email").map(<[String]>::len), Some(2));
    }

    #[test]
    fn errors_serialize_as_plain_object() {
        let mut errors = FieldErrors::new();
        errors.add("project", REQUIRED);

        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json, serde_json::json!({ "project": [REQUIRED] }));
        assert!(errors.into_result().is_err());
    }

    #[derive(Debug, Deserialize)]
    struct Assign {
        #[serde(default, deserialize_with = "nullable")]
        assignee: Option<Option<String>>,
    }

    #[test]
    fn nullable_keeps_explicit_null_apart_from_absence() {
        let absent: Assign = serde_json::from_str("{}").unwrap();
        let cleared: Assign = serde_json::from_str(r#"{"assignee": null}"#).unwrap();
        let set: Assign = serde_json::from_str(r#"{"assignee": "abc"}"#).unwrap();

        assert_eq!(absent.assignee, None);
        assert_eq!(cleared.assignee, Some(None));
        assert_eq!(set.assignee, Some(Some("abc".to_string())));
    }
}
