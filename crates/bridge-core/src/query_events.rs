use indexmap::IndexMap;

use crate::Value;

/// A single parameter map for one event bound into a statement's `$events`
/// (or equivalent) list.
pub type EventParams = IndexMap<String, Value>;

/// A parameterized statement paired with the ordered list of parameter maps
/// it should be invoked with (spec section 3). This is what every strategy
/// handler emits and what the grouper coalesces.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryEvents {
    pub statement: String,
    pub parameters: Vec<EventParams>,
}

impl QueryEvents {
    pub fn new(statement: impl Into<String>) -> Self {
        Self { statement: statement.into(), parameters: Vec::new() }
    }

    pub fn with_parameters(statement: impl Into<String>, parameters: Vec<EventParams>) -> Self {
        Self { statement: statement.into(), parameters }
    }

    pub fn push(&mut self, params: EventParams) {
        self.parameters.push(params);
    }
}

/// Quotes a graph identifier with the backtick convention, doubling any
/// embedded backtick (spec section 4.3's quoting rule, shared by every
/// handler).
pub fn quote_identifier(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_embedded_backticks() {
        assert_eq!(quote_identifier("Person"), "`Person`");
        assert_eq!(quote_identifier("weird`label"), "`weird``label`");
    }
}
