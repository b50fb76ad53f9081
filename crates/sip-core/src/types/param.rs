//! Generic `;name=value` parameters shared by URIs, name-addr headers and Via

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single header or URI parameter. Flag parameters (`;lr`) carry no value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name, compared case-insensitively
    pub name: String,
    /// Optional value
    pub value: Option<String>,
}

impl Param {
    /// Parameter with a value
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Param {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Flag parameter without a value
    pub fn flag(name: impl Into<String>) -> Self {
        Param {
            name: name.into(),
            value: None,
        }
    }

    /// `tag=...`
    pub fn tag(tag: impl Into<String>) -> Self {
        Param::new("tag", tag)
    }

    /// `branch=...`
    pub fn branch(branch: impl Into<String>) -> Self {
        Param::new("branch", branch)
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.name, value),
            None => f.write_str(&self.name),
        }
    }
}

/// Finds a parameter by case-insensitive name
pub fn find_param<'a>(params: &'a [Param], name: &str) -> Option<&'a Param> {
    params.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

/// Replaces (or appends) a parameter
pub fn set_param(params: &mut Vec<Param>, param: Param) {
    if let Some(existing) = params
        .iter_mut()
        .find(|p| p.name.eq_ignore_ascii_case(&param.name))
    {
        *existing = param;
    } else {
        params.push(param);
    }
}

/// Writes `;a=b;c` for each parameter
pub fn write_params(f: &mut fmt::Formatter<'_>, params: &[Param]) -> fmt::Result {
    for param in params {
        write!(f, ";{}", param)?;
    }
    Ok(())
}
