use std::str::FromStr;

use serde_email::Email;
use serde_json::Value;

use super::{check_length, Fields};
use crate::error::FieldError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterInput {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

/// Trimmed, lowercased, 1..=255 characters and a well-formed address.
fn email(fields: &mut Fields<'_>) -> Option<String> {
    let raw = fields.str("email", Some("Email is required"))?;
    let email = raw.trim().to_lowercase();
    if !check_length(fields, "email", &email, 1, 255) {
        return None;
    }
    if Email::from_str(&email).is_err() {
        fields.error("email", "Invalid email address");
        return None;
    }
    Some(email)
}

fn password(fields: &mut Fields<'_>) -> Option<String> {
    let password = fields.str("password", Some("Password is required"))?.trim();
    let len = password.chars().count();
    if len < 6 {
        fields.error("password", "Password must be at least 6 characters long");
        return None;
    }
    if len > 100 {
        fields.error("password", "Password must be at most 100 characters long");
        return None;
    }
    Some(password.to_string())
}

pub fn parse_register(body: &Value) -> Result<RegisterInput, Vec<FieldError>> {
    let mut fields = Fields::new(body);

    let name = fields
        .str("name", Some("Name is required"))
        .map(str::trim)
        .filter(|name| check_length(&mut fields, "name", name, 1, 255))
        .map(str::to_string);
    let email = email(&mut fields);
    let password = password(&mut fields);

    fields.finish(|| {
        Some(RegisterInput {
            name: name?,
            email: email?,
            password: password?,
        })
    })
}

pub fn parse_login(body: &Value) -> Result<LoginInput, Vec<FieldError>> {
    let mut fields = Fields::new(body);

    let email = email(&mut fields);
    let password = password(&mut fields);

    fields.finish(|| {
        Some(LoginInput {
            email: email?,
            password: password?,
        })
    })
}
