//! 表单数据与校验。
//!
//! `Form` 同时保存提交的原始值与每个字段的错误信息，
//! 校验失败时整个对象会被放回 `ViewModel`，页面据此回显输入并提示错误。

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde_derive::Serialize;

lazy_static! {
    pub static ref EMAIL_RX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    )
    .unwrap();
}

/// 与具体字段无关的错误（例如登录失败）使用的键
pub const GENERIC_ERROR: &str = "generic";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Form {
    values: BTreeMap<String, String>,
    errors: BTreeMap<String, String>,
}

impl Form {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self {
            values,
            errors: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> &str {
        self.values.get(field).map_or("", |v| v.as_str())
    }

    /// 记录字段错误，同一字段只保留第一条
    pub fn add_error(&mut self, field: &str, message: &str) {
        self.errors
            .entry(field.to_string())
            .or_insert_with(|| message.to_string());
    }

    pub fn error(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(|e| e.as_str())
    }

    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn required(&mut self, fields: &[&str]) {
        for field in fields {
            if self.get(field).trim().is_empty() {
                self.add_error(field, "This field cannot be blank");
            }
        }
    }

    pub fn max_length(&mut self, field: &str, max: usize) {
        let value = self.get(field);
        if !value.is_empty() && value.chars().count() > max {
            let message = format!("This field is too long (maximum is {} characters)", max);
            self.add_error(field, &message);
        }
    }

    pub fn min_length(&mut self, field: &str, min: usize) {
        let value = self.get(field);
        if !value.is_empty() && value.chars().count() < min {
            let message = format!("This field is too short (minimum is {} characters)", min);
            self.add_error(field, &message);
        }
    }

    pub fn permitted_values(&mut self, field: &str, options: &[&str]) {
        let value = self.get(field);
        if !value.is_empty() && !options.contains(&value) {
            self.add_error(field, "This field is invalid");
        }
    }

    pub fn matches_pattern(&mut self, field: &str, pattern: &Regex) {
        let value = self.get(field);
        if !value.is_empty() && !pattern.is_match(value) {
            self.add_error(field, "This field is invalid");
        }
    }
}

/// 新建片段表单的全部规则
pub fn validate_snippet(form: &mut Form) {
    form.required(&["title", "content", "expires"]);
    form.max_length("title", 100);
    form.permitted_values("expires", &["365", "7", "1"]);
}

/// 注册表单的全部规则
pub fn validate_signup(form: &mut Form) {
    form.required(&["name", "email", "password"]);
    form.max_length("email", 255);
    form.matches_pattern("email", &EMAIL_RX);
    form.min_length("password", 10);
}
