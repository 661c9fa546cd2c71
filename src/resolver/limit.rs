//! Guest/user override parsing.
//!
//! A limit is either a scalar applying to everyone, or `"<guest>|<user>"` where the
//! user side is a literal or the name of a numeric property on the identity.

use super::Identity;
use crate::config::LimitSetting;
use crate::error::LimiterError;
use std::str::FromStr;

/// Numeric types a limit can resolve to.
pub trait LimitValue: Copy + FromStr + PartialEq + std::fmt::Debug {
    /// Whether a parsed literal is acceptable.
    fn is_valid(self) -> bool {
        true
    }

    /// Convert a value read from an identity property.
    fn from_property(value: f64) -> Option<Self>;
}

impl LimitValue for u64 {
    // Whole numbers only, like the literal form.
    fn from_property(value: f64) -> Option<Self> {
        (value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value < u64::MAX as f64)
            .then(|| value as u64)
    }
}

impl LimitValue for f64 {
    fn is_valid(self) -> bool {
        self.is_finite() && self >= 0.0
    }

    fn from_property(value: f64) -> Option<Self> {
        value.is_valid().then_some(value)
    }
}

/// Authenticated-side value of a split override.
#[derive(Debug, Clone, PartialEq)]
pub enum UserValue<T> {
    Literal(T),
    Property(String),
}

/// A parsed limit override.
#[derive(Debug, Clone, PartialEq)]
pub enum Override<T> {
    /// Same value for guests and users.
    Uniform(T),
    /// Separate guest and user values.
    Split { guest: T, user: UserValue<T> },
}

impl<T: LimitValue> Override<T> {
    /// Parse an override string, failing on any token that is not a valid number
    /// (guest side) or a number/property name (user side).
    pub fn parse(field: &'static str, raw: &str) -> Result<Self, LimiterError> {
        let invalid = || LimiterError::InvalidOverride { field, value: raw.to_string() };

        match raw.split_once('|') {
            None => literal(raw.trim()).map(Override::Uniform).ok_or_else(invalid),
            Some((guest, user)) => {
                let guest = literal(guest.trim()).ok_or_else(invalid)?;
                let user = user.trim();
                let user = match literal(user) {
                    Some(value) => UserValue::Literal(value),
                    None if is_property_name(user) => UserValue::Property(user.to_string()),
                    None => return Err(invalid()),
                };
                Ok(Override::Split { guest, user })
            }
        }
    }

    /// Parse a configured setting.
    pub fn from_setting(field: &'static str, setting: &LimitSetting) -> Result<Self, LimiterError> {
        Self::parse(field, &setting.to_string())
    }

    /// Value for a guest (no identity) or for the given identity.
    pub fn resolve(
        &self,
        field: &'static str,
        identity: Option<&dyn Identity>,
    ) -> Result<T, LimiterError> {
        match (self, identity) {
            (Override::Uniform(value), _) => Ok(*value),
            (Override::Split { guest, .. }, None) => Ok(*guest),
            (Override::Split { user: UserValue::Literal(value), .. }, Some(_)) => Ok(*value),
            (Override::Split { user: UserValue::Property(name), .. }, Some(identity)) => {
                let value = identity
                    .property(name)
                    .ok_or_else(|| LimiterError::MissingProperty { field, property: name.clone() })?;
                T::from_property(value).ok_or_else(|| LimiterError::InvalidProperty {
                    field,
                    property: name.clone(),
                    value,
                })
            }
        }
    }
}

fn literal<T: LimitValue>(token: &str) -> Option<T> {
    token.parse::<T>().ok().filter(|value| value.is_valid())
}

fn is_property_name(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticIdentity;

    #[test]
    fn scalar_is_uniform() {
        assert_eq!(Override::<u64>::parse("max", "60").unwrap(), Override::Uniform(60));
        assert_eq!(Override::<f64>::parse("rate", " 0.1 ").unwrap(), Override::Uniform(0.1));
    }

    #[test]
    fn split_literal_and_property() {
        assert_eq!(
            Override::<u64>::parse("max", "30|60").unwrap(),
            Override::Split { guest: 30, user: UserValue::Literal(60) }
        );
        assert_eq!(
            Override::<f64>::parse("rate", "1|rate").unwrap(),
            Override::Split { guest: 1.0, user: UserValue::Property("rate".into()) }
        );
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        for raw in ["", "ten", "-1", "30|", "|60", "30|6-0", "1|2|3", "0.5"] {
            let err = Override::<u64>::parse("max", raw).unwrap_err();
            assert!(err.is_configuration(), "{raw:?} should be rejected");
        }
        assert!(Override::<f64>::parse("rate", "-0.5").is_err());
    }

    #[test]
    fn resolve_reads_identity_property() {
        let limit = Override::<u64>::parse("max", "60|max").unwrap();
        let user = StaticIdentity::new("johndoe@example.test").with_property("max", 100.0);
        assert_eq!(limit.resolve("max", None).unwrap(), 60);
        assert_eq!(limit.resolve("max", Some(&user)).unwrap(), 100);
    }

    #[test]
    fn resolve_reports_missing_property() {
        let limit = Override::<f64>::parse("rate", "1|burst").unwrap();
        let user = StaticIdentity::new("johndoe@example.test");
        let err = limit.resolve("rate", Some(&user)).unwrap_err();
        assert!(matches!(
            err,
            LimiterError::MissingProperty { field: "rate", ref property } if property == "burst"
        ));
    }

    #[test]
    fn fractional_capacity_property_is_rejected() {
        let limit = Override::<u64>::parse("max", "60|max").unwrap();
        let user = StaticIdentity::new("johndoe@example.test").with_property("max", 100.7);
        let err = limit.resolve("max", Some(&user)).unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(
            err,
            LimiterError::InvalidProperty { field: "max", ref property, value } if property == "max" && value == 100.7
        ));

        let rate = Override::<f64>::parse("rate", "1|rate").unwrap();
        let user = StaticIdentity::new("johndoe@example.test").with_property("rate", 2.5);
        assert_eq!(rate.resolve("rate", Some(&user)).unwrap(), 2.5);
    }
}
