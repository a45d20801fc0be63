//! Option-value expression trees.
//!
//! Proc options are carried as expression trees rather than raw values so
//! that both constants and references work (`read -from :2014-01-01:` as
//! well as `read -from start_time`). The full expression system lives in
//! the compiler front end; this module defines only the serialized form
//! the graph stores and the small constant-folding surface the validators
//! and annotators need.

use crate::point::Value;

/// A serialized option-value expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal constant.
    Literal(Value),
    /// A reference to a point field or declared input.
    Ref(String),
    /// A call to a (renamed) user or built-in function.
    Call {
        /// The program-unique function symbol.
        name: String,
        /// Positional argument expressions.
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Shorthand for a literal expression.
    #[must_use]
    pub fn literal(value: Value) -> Self {
        Expr::Literal(value)
    }

    /// Returns the constant value of this expression, if it is a literal.
    ///
    /// References and calls are not folded here; the front end is expected
    /// to have constant-folded anything it could before graph construction.
    #[must_use]
    pub fn const_value(&self) -> Option<&Value> {
        match self {
            Expr::Literal(v) => Some(v),
            _ => None,
        }
    }
}

/// A parameter in a user function or reducer signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Default value expression; `None` means the parameter is required.
    pub default: Option<Expr>,
}

impl Param {
    /// Creates a required parameter.
    #[must_use]
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    /// Creates an optional parameter with a default value.
    #[must_use]
    pub fn optional(name: impl Into<String>, default: Expr) -> Self {
        Self {
            name: name.into(),
            default: Some(default),
        }
    }
}

/// A user-defined function or reducer registered with the builder.
///
/// The declared name is renamed to a program-unique symbol at registration
/// time so multiple inclusions of the same module do not collide.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    /// The name as declared in source.
    pub declared: String,
    /// The program-unique renamed symbol.
    pub unique: String,
    /// Parameter signature.
    pub params: Vec<Param>,
    /// Body expression.
    pub body: Expr,
}
