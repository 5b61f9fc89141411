use lazy_static::lazy_static;
use regex::Regex;

use super::dto::{ProfileUpdate, RegisterRequest};
use super::errors::FieldError;

pub const MIN_PASSWORD_LEN: usize = 8;
const NAME_LEN: std::ops::RangeInclusive<usize> = 2..=50;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// E.164: a plus sign and up to fifteen digits, no leading zero.
pub(crate) fn is_valid_phone(phone: &str) -> bool {
    lazy_static! {
        static ref E164_RE: Regex = Regex::new(r"^\+[1-9][0-9]{1,14}$").unwrap();
    }
    E164_RE.is_match(phone)
}

fn check_name(field: &'static str, value: &str, errors: &mut Vec<FieldError>) {
    if !NAME_LEN.contains(&value.trim().chars().count()) {
        errors.push(FieldError::new(field, "must be between 2 and 50 characters"));
    }
}

fn check_phone(phone: Option<&str>, errors: &mut Vec<FieldError>) {
    if let Some(phone) = phone {
        if !is_valid_phone(phone) {
            errors.push(FieldError::new("phone", "must be in E.164 format"));
        }
    }
}

pub fn validate_registration(req: &RegisterRequest) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();
    check_name("first_name", &req.first_name, &mut errors);
    check_name("surname", &req.surname, &mut errors);
    if !is_valid_email(&req.email) {
        errors.push(FieldError::new("email", "invalid email"));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(FieldError::new("password", "must be at least 8 characters"));
    }
    check_phone(req.phone.as_deref(), &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn validate_login(email: &str, password: &str) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();
    if !is_valid_email(email) {
        errors.push(FieldError::new("email", "invalid email"));
    }
    if password.is_empty() {
        errors.push(FieldError::new("password", "is required"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn validate_profile_update(update: &ProfileUpdate) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();
    if let Some(first_name) = &update.first_name {
        check_name("first_name", first_name, &mut errors);
    }
    if let Some(surname) = &update.surname {
        check_name("surname", surname, &mut errors);
    }
    check_phone(update.phone.as_deref(), &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
