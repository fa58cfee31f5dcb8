use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Minimum length for new passwords.
pub const PASSWORD_MIN_LEN: usize = 8;

const MISSING_FIELDS: &str = "missing required fields";

/// Request body for login.
#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Request body for user registration.
#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub username: Option<String>,
}

/// Login input after presence checks. The email is only normalised; an
/// address that matches no record fails as bad credentials.
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Registration input after presence and format checks.
pub struct Registration {
    pub email: String,
    pub password: String,
    pub username: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[redacted]")
            .finish()
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("email", &self.email)
            .field("password", &"[redacted]")
            .field("username", &self.username)
            .finish()
    }
}

/// Response returned after login or register.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn required(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.is_empty())
}

impl LoginRequest {
    pub fn validate(self) -> Result<Credentials, ApiError> {
        let (Some(email), Some(password)) = (required(self.email), required(self.password)) else {
            return Err(ApiError::Validation(MISSING_FIELDS.into()));
        };
        Ok(Credentials {
            email: normalize_email(&email),
            password,
        })
    }
}

impl RegisterRequest {
    pub fn validate(self) -> Result<Registration, ApiError> {
        let (Some(email), Some(password)) = (required(self.email), required(self.password)) else {
            return Err(ApiError::Validation(MISSING_FIELDS.into()));
        };
        let email = normalize_email(&email);
        if !is_valid_email(&email) {
            return Err(ApiError::Validation("invalid email".into()));
        }
        if password.chars().count() < PASSWORD_MIN_LEN {
            return Err(ApiError::Validation(format!(
                "password must be at least {PASSWORD_MIN_LEN} characters long"
            )));
        }
        let username = self
            .username
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        Ok(Registration {
            email,
            password,
            username,
        })
    }
}
