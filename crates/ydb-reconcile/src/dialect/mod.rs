//! DDL dialect implementations.
//!
//! A dialect knows how to turn each [`DdlOperation`] into statement text,
//! including how identifiers and literals are quoted.

mod yql;

pub use yql::YqlDialect;

use crate::error::{ReconcileError, Result};
use crate::operations::DdlOperation;

/// Trait for database-specific DDL generation.
pub trait DdlDialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Generates the statement for an operation.
    fn generate_sql(&self, operation: &DdlOperation) -> Result<String>;

    /// Generates statements for a sequence of operations, in order.
    fn generate_all(&self, operations: &[DdlOperation]) -> Result<Vec<String>> {
        operations.iter().map(|op| self.generate_sql(op)).collect()
    }

    /// Quote an identifier (table path, column name, etc.).
    ///
    /// Backticks, backslashes and control characters are refused.
    fn quote_identifier(&self, name: &str) -> Result<String> {
        if name.chars().any(|c| c == '`' || c == '\\' || c.is_control()) {
            return Err(ReconcileError::Encoding(format!(
                "identifier {:?} contains a forbidden character",
                name
            )));
        }
        Ok(format!("`{}`", escape(name)))
    }

    /// Quote a string literal. Backslashes and control characters are refused.
    fn quote_literal(&self, value: &str) -> Result<String> {
        if value.chars().any(|c| c == '\\' || c.is_control()) {
            return Err(ReconcileError::Encoding(format!(
                "literal {:?} contains a forbidden character",
                value
            )));
        }
        Ok(format!("\"{}\"", escape(value)))
    }

    /// Quote identifiers and join them with `, `.
    fn quote_list(&self, names: &[String]) -> Result<String> {
        let quoted = names
            .iter()
            .map(|n| self.quote_identifier(n))
            .collect::<Result<Vec<_>>>()?;
        Ok(quoted.join(", "))
    }
}

/// Backslash-escapes `"` and `/`; every other character passes through.
#[must_use]
pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '"' || c == '/' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
