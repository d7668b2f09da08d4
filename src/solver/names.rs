//! Encoding of variable and row names for external solvers.
//!
//! Fortran-era NLP solvers read names as fixed-width byte strings. The default encoding
//! reproduces that convention: a six-space prefix and a total width of eight characters,
//! padded with spaces or truncated.

/// How names are encoded before they are handed to a solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEncoding {
    /// Prepended to every name
    pub prefix: String,
    /// Total width after prefixing; `None` keeps names at their natural length
    pub width: Option<usize>,
}

impl Default for NameEncoding {
    fn default() -> Self {
        Self {
            prefix: " ".repeat(6),
            width: Some(8),
        }
    }
}

impl NameEncoding {
    /// Fixed-width encoding with the default prefix
    pub fn new() -> Self {
        Self::default()
    }

    /// Names passed through unchanged
    pub fn plain() -> Self {
        Self {
            prefix: String::new(),
            width: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = Some(width);
        self
    }

    pub fn without_width(mut self) -> Self {
        self.width = None;
        self
    }

    /// Encode one name
    pub fn encode(&self, name: &str) -> String {
        let prefixed = format!("{}{}", self.prefix, name);
        match self.width {
            Some(width) => format!("{:<width$.width$}", prefixed, width = width),
            None => prefixed,
        }
    }

    pub fn encode_all<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        names.iter().map(|name| self.encode(name.as_ref())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_encoding_is_fixed_width() {
        let encoding = NameEncoding::default();
        assert_eq!(encoding.encode("x"), "      x ");
        assert_eq!(encoding.encode("objective"), "      ob");
        assert_eq!(encoding.encode(""), "        ");
    }

    #[test]
    fn test_plain_encoding_is_identity() {
        let encoding = NameEncoding::plain();
        assert_eq!(encoding.encode("y_0_1"), "y_0_1");
    }

    #[test]
    fn test_custom_width_and_prefix() {
        let encoding = NameEncoding::plain().with_prefix("v:").with_width(6);
        assert_eq!(
            encoding.encode_all(&["a", "longname"]),
            vec!["v:a   ".to_string(), "v:long".to_string()]
        );
    }

    #[test]
    fn test_truncation_respects_characters() {
        let encoding = NameEncoding::plain().with_width(2);
        assert_eq!(encoding.encode("θφψ"), "θφ");
    }
}
