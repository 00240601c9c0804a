use serde_json::Value;

use super::Fields;
use crate::{db::report::ReportFrequency, error::FieldError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSettingUpdate {
    pub is_enabled: bool,
    pub frequency: Option<ReportFrequency>,
}

pub fn parse_setting_update(body: &Value) -> Result<ReportSettingUpdate, Vec<FieldError>> {
    let mut fields = Fields::new(body);

    let is_enabled = fields.boolean("isEnabled");
    if is_enabled.is_none() && !fields.has_errors() {
        fields.error("isEnabled", "isEnabled is required");
    }
    let frequency = fields.choice("frequency", "Invalid report frequency", false);

    fields.finish(|| {
        Some(ReportSettingUpdate {
            is_enabled: is_enabled?,
            frequency,
        })
    })
}
