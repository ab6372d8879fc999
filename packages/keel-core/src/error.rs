use std::fmt;

/// Business-level rejection carrying a numeric code and a message.
///
/// Raised by a remote method to refuse a call; it crosses the wire intact
/// and is never retried by the invocation client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[error("code:{code} msg:{msg}")]
pub struct CodeError {
    pub code: i64,
    pub msg: String,
}

impl CodeError {
    #[must_use]
    pub fn new(code: i64, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }

    /// Builds an error from a registered [`CodeMsg`], substituting `args`
    /// into each `{}` placeholder of its template in order.
    #[must_use]
    pub fn from_code_msg(code_msg: &CodeMsg, args: &[&dyn fmt::Display]) -> Self {
        let mut msg = String::with_capacity(code_msg.template.len());
        let mut args = args.iter();
        let mut rest = code_msg.template;
        while let Some(pos) = rest.find("{}") {
            msg.push_str(&rest[..pos]);
            match args.next() {
                Some(arg) => msg.push_str(&arg.to_string()),
                None => msg.push_str("{}"),
            }
            rest = &rest[pos + 2..];
        }
        msg.push_str(rest);
        Self::new(code_msg.code, msg)
    }
}

/// A statically declared error code with its message template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeMsg {
    pub code: i64,
    pub template: &'static str,
}

impl CodeMsg {
    #[must_use]
    pub const fn new(code: i64, template: &'static str) -> Self {
        Self { code, template }
    }
}
