use plume_ast::Span;
use std::fmt;

/// A fatal type error. One error aborts the pass; there is no
/// multi-error accumulation in the checker.
#[derive(Debug, Clone)]
pub struct TypeError {
    pub message: String,
    pub span: Option<Span>,
    /// Sub-spans of the two sides of a failed equation, when known.
    pub related: Vec<Span>,
}

impl TypeError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span: Some(span),
            related: Vec::new(),
        }
    }

    pub fn without_span(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            span: None,
            related: Vec::new(),
        }
    }

    pub fn with_related(mut self, span: Span) -> Self {
        self.related.push(span);
        self
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(span) => write!(f, "[{}:{}] {}", span.start, span.end, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for TypeError {}
